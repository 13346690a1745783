//! Application error types

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Application error types organized by layer/domain
#[derive(Debug, Error)]
pub enum Error {
    // ─────────────────────────────────────────────────────────────
    // Common/Infrastructure Errors
    // ─────────────────────────────────────────────────────────────
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // ─────────────────────────────────────────────────────────────
    // External Tool Errors
    // ─────────────────────────────────────────────────────────────
    #[error("adb not found. Install Android platform-tools or put 'adb' in your PATH.")]
    AdbNotFound,

    #[error("scrcpy not found. Ensure {executable} is available next to the application or in PATH.")]
    ScrcpyNotFound { executable: String },

    #[error("Failed to spawn process: {reason}")]
    ProcessSpawn { reason: String },

    // ─────────────────────────────────────────────────────────────
    // Capture Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Screenshot capture failed: {message}")]
    Screenshot { message: String },
}

// ─────────────────────────────────────────────────────────────────
// Convenience Constructors
// ─────────────────────────────────────────────────────────────────

impl Error {
    pub fn scrcpy_not_found(executable: impl Into<String>) -> Self {
        Self::ScrcpyNotFound {
            executable: executable.into(),
        }
    }

    pub fn process_spawn(reason: impl Into<String>) -> Self {
        Self::ProcessSpawn {
            reason: reason.into(),
        }
    }

    pub fn screenshot(message: impl Into<String>) -> Self {
        Self::Screenshot {
            message: message.into(),
        }
    }

    /// Check if this error means an external tool is missing.
    ///
    /// Tool absence is surfaced to callers as a [`ConnectionState`] value
    /// rather than a failure, so these are never treated as fatal.
    ///
    /// [`ConnectionState`]: crate::types::ConnectionState
    pub fn is_tool_missing(&self) -> bool {
        matches!(self, Error::AdbNotFound | Error::ScrcpyNotFound { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_messages() {
        let err = Error::process_spawn("scrcpy: exec format error");
        assert_eq!(
            err.to_string(),
            "Failed to spawn process: scrcpy: exec format error"
        );

        let err = Error::AdbNotFound;
        assert!(err.to_string().contains("adb not found"));

        let err = Error::scrcpy_not_found("scrcpy.exe");
        assert!(err.to_string().contains("scrcpy.exe"));
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_is_tool_missing() {
        assert!(Error::AdbNotFound.is_tool_missing());
        assert!(Error::scrcpy_not_found("scrcpy").is_tool_missing());
        assert!(!Error::process_spawn("test").is_tool_missing());
        assert!(!Error::screenshot("test").is_tool_missing());
    }

    #[test]
    fn test_error_constructors() {
        let err = Error::process_spawn("exec format error");
        assert!(err.to_string().contains("exec format error"));
        let err = Error::screenshot("timed out");
        assert!(err.to_string().contains("timed out"));
    }
}
