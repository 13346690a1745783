//! # pmirror-core - Core Domain Types
//!
//! Foundation crate for phone-mirror. Provides domain types, error handling,
//! and logging setup.
//!
//! This crate has **zero internal dependencies** -- it only depends on external
//! crates (serde, chrono, thiserror, tracing).
//!
//! ## Public API
//!
//! ### Domain Types (`types`)
//! - [`Device`] - An attached Android device as reported by adb
//! - [`ConnectionState`] - High-level device connection state
//! - [`QualityPreset`] - Named bitrate/resolution/framerate bundles for scrcpy
//! - [`LogEntry`] - A parsed logcat line with level, tag, and timestamp
//!
//! ### Error Handling (`error`)
//! - [`Error`] - Custom error enum
//! - [`Result`] - Type alias for `std::result::Result<T, Error>`
//!
//! ## Prelude
//!
//! Import commonly used types with:
//! ```rust
//! use pmirror_core::prelude::*;
//! ```

pub mod error;
pub mod logging;
pub mod types;

/// Prelude for common imports used throughout all phone-mirror crates
pub mod prelude {
    pub use super::error::{Error, Result};
    pub use tracing::{debug, error, info, trace, warn};
}

// Re-export commonly used types at crate root for convenience
pub use error::{Error, Result};
pub use types::{ConnectionState, Device, LogEntry, QualityPreset};
