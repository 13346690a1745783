//! Domain types shared across phone-mirror crates

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// An attached Android device as reported by `adb devices -l`.
///
/// Immutable snapshot: a new instance is created on every discovery poll.
/// No identity persists across polls beyond equal serial values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    /// Device serial number (unique stable identifier)
    pub serial: String,

    /// Device model name (may be empty if adb did not report one)
    pub model: String,

    /// Raw connection-state token from adb (device, unauthorized, offline, ...)
    pub state_raw: String,
}

impl Device {
    pub fn new(
        serial: impl Into<String>,
        model: impl Into<String>,
        state_raw: impl Into<String>,
    ) -> Self {
        Self {
            serial: serial.into(),
            model: model.into(),
            state_raw: state_raw.into(),
        }
    }

    /// User-friendly display name: the model when available, otherwise
    /// the serial.
    pub fn display_name(&self) -> &str {
        if self.model.is_empty() {
            &self.serial
        } else {
            &self.model
        }
    }
}

/// High-level device connection state.
///
/// Derived fresh on every poll tick from adb output and tool availability,
/// never cached beyond that tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No device is attached
    NoDevice,

    /// Device requires USB debugging authorization
    Unauthorized,

    /// Device is offline or in an unresponsive state
    Offline,

    /// Device is connected and ready for mirroring
    Connected,

    /// More than one device is attached
    MultipleDevices,

    /// The adb executable is not available
    AdbUnavailable,

    /// The scrcpy executable is not available
    ScrcpyUnavailable,

    /// Screen mirroring is currently active
    Mirroring,
}

impl ConnectionState {
    /// Map a raw adb state token to a connection state.
    ///
    /// Unrecognized tokens are treated conservatively as offline.
    pub fn from_raw(raw: &str) -> Self {
        match raw {
            "unauthorized" => ConnectionState::Unauthorized,
            "offline" => ConnectionState::Offline,
            "device" => ConnectionState::Connected,
            _ => ConnectionState::Offline,
        }
    }

    /// Human-readable status text
    pub fn description(&self) -> &'static str {
        match self {
            ConnectionState::NoDevice => "No device connected",
            ConnectionState::Unauthorized => "Device unauthorized - accept the USB debugging prompt",
            ConnectionState::Offline => "Device offline",
            ConnectionState::Connected => "Device connected",
            ConnectionState::MultipleDevices => "Multiple devices connected",
            ConnectionState::AdbUnavailable => "adb not available",
            ConnectionState::ScrcpyUnavailable => "scrcpy not available",
            ConnectionState::Mirroring => "Mirroring",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// Quality presets for scrcpy mirroring sessions.
///
/// Each preset maps to a fixed bitrate / max-dimension / max-frame-rate
/// triple used when building scrcpy arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityPreset {
    /// 4M bitrate, 1024 max-size, 30fps. Best for older devices.
    Low,

    /// 8M bitrate, 1280 max-size, 60fps. Good quality/performance balance.
    #[default]
    Balanced,

    /// 16M bitrate, 1920 max-size, 60fps. Best quality.
    High,
}

impl QualityPreset {
    pub fn video_bit_rate(&self) -> &'static str {
        match self {
            QualityPreset::Low => "4M",
            QualityPreset::Balanced => "8M",
            QualityPreset::High => "16M",
        }
    }

    pub fn max_size(&self) -> u32 {
        match self {
            QualityPreset::Low => 1024,
            QualityPreset::Balanced => 1280,
            QualityPreset::High => 1920,
        }
    }

    pub fn max_fps(&self) -> u32 {
        match self {
            QualityPreset::Low => 30,
            QualityPreset::Balanced | QualityPreset::High => 60,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            QualityPreset::Low => "low",
            QualityPreset::Balanced => "balanced",
            QualityPreset::High => "high",
        }
    }
}

impl fmt::Display for QualityPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for QualityPreset {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(QualityPreset::Low),
            "balanced" => Ok(QualityPreset::Balanced),
            "high" => Ok(QualityPreset::High),
            other => Err(format!(
                "unknown preset '{other}' (expected low, balanced, or high)"
            )),
        }
    }
}

/// A single parsed logcat entry.
///
/// Entries are immutable once constructed. The timestamp assumes the current
/// year because the logcat wire format omits it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    /// Entry timestamp (UTC, current year assumed)
    pub timestamp: DateTime<Utc>,

    /// Single-character severity code (V, D, I, W, E, F)
    pub level: char,

    /// Source tag
    pub tag: String,

    /// Log message text
    pub message: String,
}
