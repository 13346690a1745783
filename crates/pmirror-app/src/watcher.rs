//! Connection watcher
//!
//! The long-running loop behind `pmirror watch`: polls adb for device state,
//! logs transitions, optionally starts mirroring as soon as a device
//! connects, and tears everything down when the watched device goes away.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use pmirror_core::prelude::*;
use pmirror_core::{ConnectionState, Device};
use pmirror_device::{AdbBridge, LogcatCapture, MirrorManager, ToolLocator};

use crate::settings::Settings;

/// Behavior knobs for a watch run.
#[derive(Debug, Clone)]
pub struct WatcherOptions {
    /// How often device state is re-polled.
    pub poll_interval: Duration,
    /// Start mirroring whenever a device reaches the connected state. When
    /// unset, the persisted setting decides.
    pub auto_mirror: Option<bool>,
}

impl Default for WatcherOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            auto_mirror: None,
        }
    }
}

/// Polls device state and drives mirroring and log capture in response.
pub struct Watcher {
    bridge: AdbBridge,
    mirror: MirrorManager,
    logcat: LogcatCapture,
    settings: Settings,
    options: WatcherOptions,
    /// State as reported on the previous tick, used for transition logging.
    last_state: Option<ConnectionState>,
    /// Serial of the device currently being mirrored, if any.
    mirrored_serial: Option<String>,
}

impl Watcher {
    pub fn new(locator: Arc<ToolLocator>, settings: Settings, options: WatcherOptions) -> Self {
        Self {
            bridge: AdbBridge::new(Arc::clone(&locator)),
            mirror: MirrorManager::new(Arc::clone(&locator)),
            logcat: LogcatCapture::new(locator),
            settings,
            options,
            last_state: None,
            mirrored_serial: None,
        }
    }

    fn auto_mirror(&self) -> bool {
        self.options
            .auto_mirror
            .unwrap_or(self.settings.auto_mirror_on_connect)
    }

    /// Run the watch loop until `cancel_rx` fires or its sender is dropped.
    pub async fn run(&mut self, mut cancel_rx: oneshot::Receiver<()>) {
        // Fan state ticks from the poll task into the select loop. The
        // bounded channel with try_send means a busy loop sheds ticks
        // rather than queueing stale state.
        let (tick_tx, mut tick_rx) = mpsc::channel::<(ConnectionState, Option<Device>)>(8);
        let (poll_cancel_tx, poll_cancel_rx) = oneshot::channel();
        let bridge = self.bridge.clone();
        let interval = self.options.poll_interval;
        let poll_task = tokio::spawn(async move {
            bridge
                .poll_state(
                    interval,
                    move |state, device| {
                        let _ = tick_tx.try_send((state, device));
                    },
                    poll_cancel_rx,
                )
                .await;
        });

        // Session-ended oneshots are forwarded into one long-lived channel
        // so the loop below has a single place to listen.
        let (ended_tx, mut ended_rx) = mpsc::channel::<String>(8);

        loop {
            tokio::select! {
                _ = &mut cancel_rx => {
                    info!("watch loop stopping");
                    break;
                }
                Some(message) = ended_rx.recv() => {
                    info!("{message}");
                    self.mirrored_serial = None;
                    self.report_recent_errors();
                }
                Some((state, device)) = tick_rx.recv() => {
                    self.handle_tick(state, device, &ended_tx).await;
                }
            }
        }

        let _ = poll_cancel_tx.send(());
        let _ = poll_task.await;
        self.mirror.stop();
        self.logcat.stop_capture();
    }

    async fn handle_tick(
        &mut self,
        state: ConnectionState,
        device: Option<Device>,
        ended_tx: &mpsc::Sender<String>,
    ) {
        let effective = self.effective_state(state).await;
        let transitioned = self.last_state != Some(effective);
        if transitioned {
            match &device {
                Some(device) => info!("state: {effective} ({})", device.display_name()),
                None => info!("state: {effective}"),
            }
            self.last_state = Some(effective);
        }

        match effective {
            ConnectionState::Connected => {
                // Only on the transition into Connected, so a session that
                // keeps crashing does not get relaunched every tick.
                if transitioned && self.auto_mirror() {
                    if let Some(device) = device {
                        self.start_mirroring(&device, ended_tx).await;
                    }
                }
            }
            ConnectionState::Mirroring => {}
            _ => {
                // The watched device is gone or unusable.
                if self.mirrored_serial.take().is_some() {
                    info!("device lost, stopping mirror session");
                    self.mirror.stop();
                }
                self.logcat.stop_capture();
            }
        }
    }

    /// Overlay local knowledge on top of the adb-derived state: an active
    /// session means mirroring, and a connected device is only usable when
    /// scrcpy can be found.
    async fn effective_state(&self, state: ConnectionState) -> ConnectionState {
        match state {
            ConnectionState::Connected if self.mirror.is_mirroring() => ConnectionState::Mirroring,
            ConnectionState::Connected if !self.mirror.is_available().await => {
                ConnectionState::ScrcpyUnavailable
            }
            other => other,
        }
    }

    async fn start_mirroring(&mut self, device: &Device, ended_tx: &mpsc::Sender<String>) {
        info!("auto-starting mirror for {}", device.display_name());
        let started = self
            .mirror
            .start(
                &device.serial,
                self.settings.default_preset,
                self.settings.keep_screen_awake,
                self.settings.start_fullscreen,
            )
            .await;

        match started {
            Ok(ended) => {
                self.mirrored_serial = Some(device.serial.clone());
                self.logcat.start_capture(&device.serial).await;
                let ended_tx = ended_tx.clone();
                tokio::spawn(async move {
                    if let Ok(message) = ended.await {
                        let _ = ended_tx.send(message).await;
                    }
                });
            }
            Err(e) if e.is_tool_missing() => {
                warn!("could not start mirroring: {e}");
            }
            Err(e) => {
                error!("could not start mirroring: {e}");
            }
        }
    }

    fn report_recent_errors(&self) {
        let errors = self.logcat.recent_errors();
        if errors.is_empty() {
            return;
        }
        warn!("{} device error(s) shortly before the session ended:", errors.len());
        for entry in errors {
            warn!("  {}/{}: {}", entry.level, entry.tag, entry.message);
        }
    }
}
