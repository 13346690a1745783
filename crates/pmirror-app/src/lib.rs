//! # pmirror-app - Application Layer
//!
//! Ties device discovery, mirroring, and log capture together into the
//! long-running watch loop, and persists user preferences across runs.
//!
//! ## Public API
//!
//! ### Settings (`settings`)
//! - [`Settings`] - Persisted user preferences (quality preset, auto-mirror,
//!   fullscreen, stay-awake) backed by a JSON file in the platform config dir
//!
//! ### Watcher (`watcher`)
//! - [`Watcher`] - Polls device state, reacts to transitions, optionally
//!   auto-starts mirroring on connect, and reports session endings

pub mod settings;
pub mod watcher;

// Public API re-exports
pub use settings::Settings;
pub use watcher::{Watcher, WatcherOptions};
