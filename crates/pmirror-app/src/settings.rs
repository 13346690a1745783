//! Persisted user preferences
//!
//! Settings live in a JSON file under the platform config directory.
//! Loading and saving never fail the caller: a missing or corrupt file
//! yields defaults, a failed save is logged and swallowed.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use pmirror_core::prelude::*;
use pmirror_core::QualityPreset;

/// User preferences persisted across runs.
///
/// Every field carries a serde default so settings files written by older
/// versions keep loading after new fields are added.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Quality preset used when one is not given explicitly.
    #[serde(default)]
    pub default_preset: QualityPreset,
    /// Start mirroring as soon as a device reaches the connected state.
    #[serde(default)]
    pub auto_mirror_on_connect: bool,
    /// Launch the mirror window fullscreen.
    #[serde(default)]
    pub start_fullscreen: bool,
    /// Keep the device screen awake while mirroring.
    #[serde(default = "default_true")]
    pub keep_screen_awake: bool,
}

fn default_true() -> bool {
    true
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_preset: QualityPreset::Balanced,
            auto_mirror_on_connect: false,
            start_fullscreen: false,
            keep_screen_awake: true,
        }
    }
}

/// Path of the settings file, `None` when the platform exposes no config
/// directory.
pub fn settings_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("phone-mirror").join("settings.json"))
}

impl Settings {
    /// Load settings from the default location. Never fails; any problem
    /// falls back to defaults.
    pub fn load() -> Self {
        match settings_path() {
            Some(path) => Self::load_from(&path),
            None => {
                warn!("no config directory on this platform, using default settings");
                Self::default()
            }
        }
    }

    pub fn load_from(path: &Path) -> Self {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) => {
                debug!("settings file not read ({e}), using defaults");
                return Self::default();
            }
        };
        match serde_json::from_str(&contents) {
            Ok(settings) => settings,
            Err(e) => {
                warn!("settings file is malformed ({e}), using defaults");
                Self::default()
            }
        }
    }

    /// Save settings to the default location. Failures are logged, not
    /// returned.
    pub fn save(&self) {
        match settings_path() {
            Some(path) => self.save_to(&path),
            None => warn!("no config directory on this platform, settings not saved"),
        }
    }

    pub fn save_to(&self, path: &Path) {
        if let Some(dir) = path.parent() {
            if let Err(e) = std::fs::create_dir_all(dir) {
                warn!("could not create settings directory {}: {e}", dir.display());
                return;
            }
        }
        let json = match serde_json::to_string_pretty(self) {
            Ok(json) => json,
            Err(e) => {
                warn!("could not serialize settings: {e}");
                return;
            }
        };
        if let Err(e) = std::fs::write(path, json) {
            warn!("could not write settings to {}: {e}", path.display());
        }
    }
}
