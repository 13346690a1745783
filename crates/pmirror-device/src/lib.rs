//! # pmirror-device - External Tool Management
//!
//! Manages the two external executables phone-mirror depends on: adb (device
//! discovery and per-device commands) and scrcpy (the mirroring subprocess).
//!
//! Depends on [`pmirror_core`] for domain types and error handling.
//!
//! ## Public API
//!
//! ### Process Execution
//! - [`run()`] / [`run_with_cancel()`] - Run a command and capture its output
//!   without risking pipe-buffer deadlock
//! - [`run_streaming()`] - Line-by-line output delivery for long-running
//!   subprocesses
//! - [`ProcessOutcome`] - Exit code plus captured stdout/stderr
//!
//! ### Tool Location
//! - [`ToolLocator`] - Resolves adb/scrcpy paths through an ordered candidate
//!   list, cached behind a lock with explicit refresh
//! - [`Tool`], [`BundledTools`]
//!
//! ### Device Discovery
//! - [`AdbBridge`] - List devices, compute connection state, poll for state
//!   transitions, capture screenshots
//!
//! ### Mirroring Sessions
//! - [`MirrorManager`] - Start/stop the scrcpy subprocess with a one-shot
//!   session-ended notification
//!
//! ### Log Capture
//! - [`LogcatCapture`] - Bounded buffer of error-level logcat entries fed by
//!   a streaming subprocess

pub mod adb;
pub mod exec;
pub mod locate;
pub mod logcat;
pub mod scrcpy;

// Public API re-exports
pub use adb::{parse_devices, AdbBridge};
pub use exec::{run, run_streaming, run_with_cancel, ProcessOutcome, StreamLine, DEFAULT_TIMEOUT};
pub use locate::{BundledTools, Tool, ToolLocator};
pub use logcat::{parse_logcat_line, LogcatCapture, LOG_BUFFER_CAPACITY};
pub use scrcpy::{build_mirror_args, MirrorManager};
