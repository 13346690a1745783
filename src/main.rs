//! pmirror - mirror an Android device screen from the command line
//!
//! Thin CLI over the phone-mirror crates: device discovery and state
//! reporting, one-shot mirroring, the auto-mirror watch loop, and
//! screenshots.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{bail, eyre};
use color_eyre::Result;
use tracing::info;

use pmirror_app::{Settings, Watcher, WatcherOptions};
use pmirror_core::{ConnectionState, Device, QualityPreset};
use pmirror_device::{AdbBridge, LogcatCapture, MirrorManager, ToolLocator};

/// Mirror an Android device screen using adb and scrcpy.
#[derive(Parser, Debug)]
#[command(name = "pmirror")]
#[command(about = "Mirror an Android device screen using adb and scrcpy", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List attached devices
    Devices,

    /// Report the current connection state
    State,

    /// Mirror a device until it exits or Ctrl-C
    Mirror {
        /// Device serial (required only when several devices are attached)
        #[arg(short, long)]
        serial: Option<String>,

        /// Quality preset: low, balanced, or high
        #[arg(short, long)]
        preset: Option<QualityPreset>,

        /// Launch the mirror window fullscreen (overrides the saved setting)
        #[arg(long, overrides_with = "no_fullscreen")]
        fullscreen: bool,

        /// Launch the mirror window windowed (overrides the saved setting)
        #[arg(long)]
        no_fullscreen: bool,

        /// Keep the device screen awake while mirroring (overrides the saved setting)
        #[arg(long, overrides_with = "no_stay_awake")]
        stay_awake: bool,

        /// Let the device screen sleep while mirroring (overrides the saved setting)
        #[arg(long)]
        no_stay_awake: bool,
    },

    /// Watch for devices and react to connection changes
    Watch {
        /// Start mirroring as soon as a device connects
        #[arg(long)]
        auto_mirror: bool,

        /// Poll interval in seconds
        #[arg(long, default_value_t = 2)]
        interval: u64,
    },

    /// Capture a screenshot from a device
    Screenshot {
        /// Device serial (required only when several devices are attached)
        #[arg(short, long)]
        serial: Option<String>,

        /// Output file
        #[arg(short, long, default_value = "screenshot.png")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    pmirror_core::logging::init()?;

    let args = Args::parse();
    let locator = Arc::new(ToolLocator::new());

    match args.command {
        Command::Devices => devices(locator).await,
        Command::State => state(locator).await,
        Command::Mirror {
            serial,
            preset,
            fullscreen,
            no_fullscreen,
            stay_awake,
            no_stay_awake,
        } => {
            mirror(
                locator,
                serial,
                preset,
                flag_override(fullscreen, no_fullscreen),
                flag_override(stay_awake, no_stay_awake),
            )
            .await
        }
        Command::Watch {
            auto_mirror,
            interval,
        } => watch(locator, auto_mirror, interval).await,
        Command::Screenshot { serial, output } => screenshot(locator, serial, output).await,
    }
}

async fn devices(locator: Arc<ToolLocator>) -> Result<()> {
    let bridge = AdbBridge::new(locator);
    if !bridge.is_available().await {
        return Err(pmirror_core::Error::AdbNotFound.into());
    }
    bridge.ensure_server().await;

    let devices = bridge.list_devices().await;
    if devices.is_empty() {
        println!("No devices attached.");
        return Ok(());
    }
    for device in devices {
        println!("{}\t{}\t{}", device.serial, device.state_raw, device.display_name());
    }
    Ok(())
}

async fn state(locator: Arc<ToolLocator>) -> Result<()> {
    let bridge = AdbBridge::new(Arc::clone(&locator));
    let mirror = MirrorManager::new(locator);

    let (mut state, device) = bridge.current_state().await;
    if state == ConnectionState::Connected && !mirror.is_available().await {
        state = ConnectionState::ScrcpyUnavailable;
    }

    match device {
        Some(device) => println!("{state} ({})", device.display_name()),
        None => println!("{state}"),
    }
    Ok(())
}

async fn mirror(
    locator: Arc<ToolLocator>,
    serial: Option<String>,
    preset: Option<QualityPreset>,
    fullscreen: Option<bool>,
    stay_awake: Option<bool>,
) -> Result<()> {
    let bridge = AdbBridge::new(Arc::clone(&locator));
    let device = pick_device(&bridge, serial).await?;

    let settings = Settings::load();
    let preset = preset.unwrap_or(settings.default_preset);
    let fullscreen = fullscreen.unwrap_or(settings.start_fullscreen);
    let stay_awake = stay_awake.unwrap_or(settings.keep_screen_awake);

    let mut manager = MirrorManager::new(Arc::clone(&locator));
    let mut logcat = LogcatCapture::new(locator);

    let ended = manager
        .start(&device.serial, preset, stay_awake, fullscreen)
        .await?;
    logcat.start_capture(&device.serial).await;
    println!(
        "Mirroring {} at {} quality. Press Ctrl-C to stop.",
        device.display_name(),
        preset
    );

    tokio::select! {
        message = ended => {
            let message = message.unwrap_or_else(|_| "scrcpy exited.".to_string());
            println!("{message}");
            for entry in logcat.recent_errors() {
                println!("  {}/{}: {}", entry.level, entry.tag, entry.message);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted, stopping mirror session");
            manager.stop();
            println!("Stopped.");
        }
    }

    logcat.stop_capture();
    Ok(())
}

async fn watch(locator: Arc<ToolLocator>, auto_mirror: bool, interval: u64) -> Result<()> {
    let settings = Settings::load();
    let options = WatcherOptions {
        poll_interval: Duration::from_secs(interval.max(1)),
        auto_mirror: auto_mirror.then_some(true),
    };

    println!("Watching for devices. Press Ctrl-C to stop.");
    println!(
        "Logging to {}",
        pmirror_core::logging::get_current_log_file().display()
    );
    let mut watcher = Watcher::new(locator, settings, options);

    let (cancel_tx, cancel_rx) = tokio::sync::oneshot::channel();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        let _ = cancel_tx.send(());
    });

    watcher.run(cancel_rx).await;
    Ok(())
}

async fn screenshot(
    locator: Arc<ToolLocator>,
    serial: Option<String>,
    output: PathBuf,
) -> Result<()> {
    let bridge = AdbBridge::new(locator);
    let device = pick_device(&bridge, serial).await?;

    let png = bridge.screenshot(&device.serial).await?;
    std::fs::write(&output, &png)?;
    println!("Saved {} bytes to {}", png.len(), output.display());
    Ok(())
}

/// Collapse an on/off flag pair: either flag overrides the saved setting,
/// neither defers to it.
fn flag_override(on: bool, off: bool) -> Option<bool> {
    if on {
        Some(true)
    } else if off {
        Some(false)
    } else {
        None
    }
}

/// Resolve the target device: an explicit serial wins, otherwise exactly one
/// connected device must be attached.
async fn pick_device(bridge: &AdbBridge, serial: Option<String>) -> Result<Device> {
    if !bridge.is_available().await {
        return Err(pmirror_core::Error::AdbNotFound.into());
    }
    bridge.ensure_server().await;

    let devices = bridge.list_devices().await;
    if let Some(serial) = serial {
        return devices
            .into_iter()
            .find(|device| device.serial == serial)
            .ok_or_else(|| eyre!("no attached device with serial {serial}"));
    }

    let mut connected: Vec<Device> = devices
        .into_iter()
        .filter(|device| device.state_raw == "device")
        .collect();
    match connected.len() {
        0 => bail!("no connected device (is USB debugging authorized?)"),
        1 => Ok(connected.remove(0)),
        n => bail!("{n} devices attached; pick one with --serial"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_override_beats_setting_in_both_directions() {
        // --stay-awake / --fullscreen force on regardless of the setting.
        assert_eq!(flag_override(true, false), Some(true));
        // --no-stay-awake / --no-fullscreen force off, even against a saved
        // default of true.
        assert_eq!(flag_override(false, true), Some(false));
        // Neither flag defers to the setting.
        assert_eq!(flag_override(false, false), None);
        assert_eq!(flag_override(false, false).unwrap_or(true), true);
        assert_eq!(flag_override(false, true).unwrap_or(true), false);
    }

    #[test]
    fn test_cli_parses_negated_flags() {
        use clap::Parser;

        let args = Args::parse_from(["pmirror", "mirror", "--no-stay-awake"]);
        let Command::Mirror {
            stay_awake,
            no_stay_awake,
            ..
        } = args.command
        else {
            panic!("expected mirror subcommand");
        };
        assert!(!stay_awake);
        assert!(no_stay_awake);
    }
}
