//! Device discovery and state polling through adb

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::sync::oneshot;

use pmirror_core::prelude::*;
use pmirror_core::{ConnectionState, Device};

use crate::exec;
use crate::locate::{Tool, ToolLocator};

/// Timeout for short adb commands (devices, start-server).
const COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

/// Timeout for the availability probe.
const VERSION_TIMEOUT: Duration = Duration::from_secs(3);

/// Timeout for screenshot capture.
const SCREENSHOT_TIMEOUT: Duration = Duration::from_secs(10);

/// Device discovery and per-device commands over adb.
///
/// Cheap to clone; the tool locator (and its path cache) is shared.
#[derive(Debug, Clone)]
pub struct AdbBridge {
    locator: Arc<ToolLocator>,
}

impl AdbBridge {
    pub fn new(locator: Arc<ToolLocator>) -> Self {
        Self { locator }
    }

    /// Resolved adb path (bare name fallback when not installed).
    pub async fn adb_path(&self) -> std::path::PathBuf {
        self.locator.resolve(Tool::Adb).await
    }

    /// Lightweight availability probe: `adb version` must exit 0.
    pub async fn is_available(&self) -> bool {
        let adb = self.adb_path().await;
        exec::run(&adb, &["version"], VERSION_TIMEOUT).await.success()
    }

    /// Best-effort `adb start-server`. Failures are swallowed; a dead server
    /// surfaces through the next device listing instead.
    pub async fn ensure_server(&self) {
        let adb = self.adb_path().await;
        let outcome = exec::run(&adb, &["start-server"], COMMAND_TIMEOUT).await;
        if !outcome.success() {
            debug!("adb start-server failed: {}", outcome.stderr.trim());
        }
    }

    /// List attached devices via `adb devices -l`.
    ///
    /// A failed invocation yields an empty list, not an error.
    pub async fn list_devices(&self) -> Vec<Device> {
        let adb = self.adb_path().await;
        let outcome = exec::run(&adb, &["devices", "-l"], COMMAND_TIMEOUT).await;
        if !outcome.success() {
            warn!(
                "adb devices failed with code {}: {}",
                outcome.exit_code,
                outcome.stderr.trim()
            );
            return Vec::new();
        }

        parse_devices(&outcome.stdout)
    }

    /// Compute the high-level connection state, evaluated fresh on each call.
    pub async fn current_state(&self) -> (ConnectionState, Option<Device>) {
        if !self.is_available().await {
            return (ConnectionState::AdbUnavailable, None);
        }

        self.ensure_server().await;

        let mut devices = self.list_devices().await;

        if devices.is_empty() {
            return (ConnectionState::NoDevice, None);
        }

        if devices.len() > 1 {
            // First-listed device wins; adb gives no ordering guarantee
            // beyond its own output order.
            return (
                ConnectionState::MultipleDevices,
                Some(devices.swap_remove(0)),
            );
        }

        match devices.pop() {
            Some(device) => {
                let state = ConnectionState::from_raw(&device.state_raw);
                (state, Some(device))
            }
            None => (ConnectionState::NoDevice, None),
        }
    }

    /// Poll the connection state at a fixed interval, reporting each result
    /// to `observer`.
    ///
    /// Ticks are strictly sequential: each cycle finishes its compute and
    /// observe before sleeping, and the sleep is the only suspension point
    /// the cancel signal can interrupt. A bad tick never terminates the
    /// loop.
    pub async fn poll_state(
        &self,
        interval: Duration,
        mut observer: impl FnMut(ConnectionState, Option<Device>),
        mut cancel_rx: oneshot::Receiver<()>,
    ) {
        loop {
            let (state, device) = self.current_state().await;
            observer(state, device);

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = &mut cancel_rx => {
                    debug!("device state polling cancelled");
                    break;
                }
            }
        }
    }

    /// Capture a PNG screenshot via `adb exec-out screencap -p`.
    ///
    /// The PNG bytes arrive on stdout as binary data, drained concurrently
    /// with stderr while the exit is awaited.
    pub async fn screenshot(&self, serial: &str) -> Result<Vec<u8>> {
        let adb = self.adb_path().await;

        let mut child = Command::new(&adb)
            .args(["-s", serial, "exec-out", "screencap", "-p"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::screenshot(format!("failed to start adb: {e}")))?;

        let mut stdout = child.stdout.take().expect("stdout was configured");
        let mut stderr = child.stderr.take().expect("stderr was configured");
        let png_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            let _ = stdout.read_to_end(&mut buf).await;
            buf
        });
        let err_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            let _ = stderr.read_to_end(&mut buf).await;
            String::from_utf8_lossy(&buf).into_owned()
        });

        let status = tokio::select! {
            status = child.wait() => status,
            _ = tokio::time::sleep(SCREENSHOT_TIMEOUT) => {
                if let Err(e) = child.kill().await {
                    debug!("kill after screenshot timeout failed: {e}");
                }
                return Err(Error::screenshot("capture timed out"));
            }
        };

        let png = png_task.await.unwrap_or_default();
        let stderr_text = err_task.await.unwrap_or_default();

        match status {
            Ok(status) if status.success() => {}
            Ok(status) => {
                return Err(Error::screenshot(format!(
                    "adb screencap exited with code {:?}: {}",
                    status.code(),
                    stderr_text.trim()
                )));
            }
            Err(e) => return Err(Error::screenshot(format!("wait failed: {e}"))),
        }

        // PNG magic: 89 'P' 'N' 'G'
        if png.len() < 8 || png[..4] != [0x89, b'P', b'N', b'G'] {
            return Err(Error::screenshot("invalid screenshot data received"));
        }

        Ok(png)
    }
}

/// Parse the line-oriented output of `adb devices -l`.
///
/// Each data line is `SERIAL STATE [key:value ...]`; blank lines, the
/// "List of devices" header, and lines with fewer than two tokens are
/// skipped without affecting sibling lines.
pub fn parse_devices(output: &str) -> Vec<Device> {
    let mut devices = Vec::new();

    for line in output.lines() {
        let line = line.trim();
        if line.is_empty() || starts_with_ignore_case(line, "List of devices") {
            continue;
        }

        let mut tokens = line.split_whitespace();
        let (Some(serial), Some(state_raw)) = (tokens.next(), tokens.next()) else {
            continue;
        };

        let model = tokens
            .filter_map(|token| strip_prefix_ignore_case(token, "model:"))
            .next()
            .unwrap_or("");

        devices.push(Device::new(serial, model, state_raw));
    }

    devices
}

// Byte-wise comparison: adb tokens may carry multibyte OEM strings, so a
// str slice at prefix.len() could land inside a character.
fn starts_with_ignore_case(text: &str, prefix: &str) -> bool {
    text.as_bytes()
        .get(..prefix.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(prefix.as_bytes()))
}

fn strip_prefix_ignore_case<'a>(text: &'a str, prefix: &str) -> Option<&'a str> {
    if starts_with_ignore_case(text, prefix) {
        // The matched head is ASCII, so the boundary is a char boundary.
        text.get(prefix.len()..)
    } else {
        None
    }
}
