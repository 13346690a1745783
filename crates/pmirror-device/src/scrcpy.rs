//! Mirroring session management
//!
//! Runs scrcpy as a long-lived subprocess. The `Child` handle is moved into
//! a dedicated wait task that captures the real exit code, composes a
//! human-readable status message from the captured output, and fires a
//! one-shot "session ended" notification. That notification is the single
//! channel by which callers learn a session died, regardless of why it
//! stopped.

use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::oneshot;

use pmirror_core::prelude::*;
use pmirror_core::QualityPreset;

use crate::locate::{Tool, ToolLocator};

/// Manages at most one scrcpy subprocess.
///
/// Session lifecycle: idle -> starting -> active -> idle. Starting a new
/// session implicitly supersedes the old one; the superseded session still
/// delivers exactly one ended notification through its own channel.
#[derive(Debug)]
pub struct MirrorManager {
    locator: Arc<ToolLocator>,
    current: Option<SessionHandle>,
}

/// Scoped ownership of the running subprocess: the handle's kill channel is
/// the only way to terminate it, and the manager holds exactly one handle.
#[derive(Debug)]
struct SessionHandle {
    /// One-shot sender that tells the wait task to force-kill the process.
    kill_tx: Option<oneshot::Sender<()>>,
    /// Set by the wait task once the child has exited.
    exited: Arc<AtomicBool>,
}

impl MirrorManager {
    pub fn new(locator: Arc<ToolLocator>) -> Self {
        Self {
            locator,
            current: None,
        }
    }

    /// Whether a mirroring subprocess is currently running.
    pub fn is_mirroring(&self) -> bool {
        self.current
            .as_ref()
            .is_some_and(|handle| !handle.exited.load(Ordering::Acquire))
    }

    /// Whether scrcpy can be located at all.
    pub async fn is_available(&self) -> bool {
        self.locator.probe(Tool::Scrcpy).await.is_some()
    }

    /// Start a mirroring session for the given device.
    ///
    /// Returns the receiving end of the session-ended notification: it
    /// resolves with a diagnostic message once the subprocess exits for any
    /// reason (clean exit, crash, external kill, or [`stop`]).
    ///
    /// [`stop`]: MirrorManager::stop
    pub async fn start(
        &mut self,
        serial: &str,
        preset: QualityPreset,
        keep_awake: bool,
        fullscreen: bool,
    ) -> Result<oneshot::Receiver<String>> {
        // At most one concurrent session per manager.
        self.stop();

        // Re-resolve so an scrcpy installed since the last attempt is
        // picked up.
        self.locator.refresh().await;
        let scrcpy = self
            .locator
            .probe(Tool::Scrcpy)
            .await
            .ok_or_else(|| Error::scrcpy_not_found(Tool::Scrcpy.executable_name()))?;

        let args = build_mirror_args(serial, preset, keep_awake, fullscreen);
        info!("starting scrcpy: {} {}", scrcpy.display(), args.join(" "));

        let mut command = Command::new(&scrcpy);
        command
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // scrcpy looks for its bundled server and libraries next to the
        // executable.
        if let Some(dir) = scrcpy.parent().filter(|d| !d.as_os_str().is_empty()) {
            command.current_dir(dir);
        }

        let mut child = command
            .spawn()
            .map_err(|e| Error::process_spawn(format!("scrcpy: {e}")))?;
        debug!("scrcpy started with PID: {:?}", child.id());

        // Drain both pipes into buffers immediately; the exit handler reads
        // them back when composing the status message.
        let stdout_buf = Arc::new(Mutex::new(String::new()));
        let stderr_buf = Arc::new(Mutex::new(String::new()));
        let stdout = child.stdout.take().expect("stdout was configured");
        let stderr = child.stderr.take().expect("stderr was configured");
        let out_task = tokio::spawn(buffer_lines(stdout, Arc::clone(&stdout_buf)));
        let err_task = tokio::spawn(buffer_lines(stderr, Arc::clone(&stderr_buf)));

        let exited = Arc::new(AtomicBool::new(false));
        let (kill_tx, kill_rx) = oneshot::channel();
        let (ended_tx, ended_rx) = oneshot::channel();

        tokio::spawn(wait_for_exit(
            child,
            kill_rx,
            ended_tx,
            (out_task, err_task),
            (stdout_buf, stderr_buf),
            Arc::clone(&exited),
        ));

        self.current = Some(SessionHandle {
            kill_tx: Some(kill_tx),
            exited,
        });

        Ok(ended_rx)
    }

    /// Stop the current session. Idempotent; a no-op when idle.
    ///
    /// Termination is signalled to the wait task, so the ended notification
    /// fires through the same path as any other exit, never synchronously
    /// from here.
    pub fn stop(&mut self) {
        if let Some(mut handle) = self.current.take() {
            if let Some(tx) = handle.kill_tx.take() {
                // Send error means the wait task already finished naturally.
                let _ = tx.send(());
            }
        }
    }
}

impl Drop for MirrorManager {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Background task: owns the child, waits for exit (natural or kill signal),
/// composes the status message, and fires the ended notification exactly
/// once.
async fn wait_for_exit(
    mut child: Child,
    kill_rx: oneshot::Receiver<()>,
    ended_tx: oneshot::Sender<String>,
    reader_tasks: (tokio::task::JoinHandle<()>, tokio::task::JoinHandle<()>),
    buffers: (Arc<Mutex<String>>, Arc<Mutex<String>>),
    exited: Arc<AtomicBool>,
) {
    let code: Option<i32> = tokio::select! {
        result = child.wait() => match result {
            Ok(status) => {
                info!("scrcpy exited with status: {:?}", status);
                status.code()
            }
            Err(e) => {
                error!("error waiting for scrcpy: {}", e);
                None
            }
        },
        _ = kill_rx => {
            info!("stop requested, killing scrcpy");
            if let Err(e) = child.kill().await {
                debug!("kill failed (scrcpy may have already exited): {e}");
            }
            match child.wait().await {
                Ok(status) => status.code(),
                Err(e) => {
                    error!("error waiting after kill: {}", e);
                    None
                }
            }
        }
    };

    // The pipes close with the process; wait for the readers to drain the
    // last lines before reading the buffers back.
    let _ = reader_tasks.0.await;
    let _ = reader_tasks.1.await;

    let (stdout_buf, stderr_buf) = buffers;
    let stdout = stdout_buf
        .lock()
        .map(|buf| buf.trim().to_string())
        .unwrap_or_default();
    let stderr = stderr_buf
        .lock()
        .map(|buf| buf.trim().to_string())
        .unwrap_or_default();
    let message = exit_message(code, &stdout, &stderr);

    // Mark exited before notifying so is_mirroring() is already false when
    // the caller observes the message.
    exited.store(true, Ordering::Release);
    let _ = ended_tx.send(message);
}

/// Compose the human-readable session-ended message: exit status plus
/// captured stderr (preferred) or stdout (fallback).
fn exit_message(code: Option<i32>, stdout: &str, stderr: &str) -> String {
    let mut message = match code {
        Some(0) => "scrcpy exited.".to_string(),
        Some(code) => format!("scrcpy failed with code {code}."),
        None => "scrcpy was terminated.".to_string(),
    };

    if !stderr.is_empty() {
        message.push_str(" stderr: ");
        message.push_str(stderr);
    } else if !stdout.is_empty() {
        message.push_str(" stdout: ");
        message.push_str(stdout);
    }

    message
}

/// Build the scrcpy argument list for a session.
pub fn build_mirror_args(
    serial: &str,
    preset: QualityPreset,
    keep_awake: bool,
    fullscreen: bool,
) -> Vec<String> {
    let mut args = vec![
        "-s".to_string(),
        serial.to_string(),
        "--video-bit-rate".to_string(),
        preset.video_bit_rate().to_string(),
        "--max-size".to_string(),
        preset.max_size().to_string(),
        "--max-fps".to_string(),
        preset.max_fps().to_string(),
    ];

    if keep_awake {
        args.push("--stay-awake".to_string());
    }
    if fullscreen {
        args.push("--fullscreen".to_string());
    }

    // The local mirror substitutes for the physical screen.
    args.push("--turn-screen-off".to_string());

    args
}

/// Append complete lines from a pipe into a shared buffer.
async fn buffer_lines<R>(stream: R, buf: Arc<Mutex<String>>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stream).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if let Ok(mut buf) = buf.lock() {
            buf.push_str(&line);
            buf.push('\n');
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locate::BundledTools;
    use std::time::Duration;

    #[test]
    fn test_build_args_balanced() {
        let args = build_mirror_args("SERIAL1", QualityPreset::Balanced, false, false);
        assert_eq!(
            args,
            vec![
                "-s",
                "SERIAL1",
                "--video-bit-rate",
                "8M",
                "--max-size",
                "1280",
                "--max-fps",
                "60",
                "--turn-screen-off",
            ]
        );
    }

    #[test]
    fn test_build_args_low_preset() {
        let args = build_mirror_args("X", QualityPreset::Low, false, false);
        assert!(args.contains(&"4M".to_string()));
        assert!(args.contains(&"1024".to_string()));
        assert!(args.contains(&"30".to_string()));
    }

    #[test]
    fn test_build_args_high_preset_with_flags() {
        let args = build_mirror_args("X", QualityPreset::High, true, true);
        assert!(args.contains(&"16M".to_string()));
        assert!(args.contains(&"1920".to_string()));
        assert!(args.contains(&"--stay-awake".to_string()));
        assert!(args.contains(&"--fullscreen".to_string()));
        // Screen-off is unconditional and last.
        assert_eq!(args.last().unwrap(), "--turn-screen-off");
    }

    #[test]
    fn test_build_args_flags_off() {
        let args = build_mirror_args("X", QualityPreset::Balanced, false, false);
        assert!(!args.contains(&"--stay-awake".to_string()));
        assert!(!args.contains(&"--fullscreen".to_string()));
    }

    #[test]
    fn test_exit_message_clean() {
        assert_eq!(exit_message(Some(0), "", ""), "scrcpy exited.");
    }

    #[test]
    fn test_exit_message_prefers_stderr() {
        let message = exit_message(Some(2), "some stdout", "device disconnected");
        assert!(message.contains("code 2"));
        assert!(message.contains("stderr: device disconnected"));
        assert!(!message.contains("some stdout"));
    }

    #[test]
    fn test_exit_message_falls_back_to_stdout() {
        let message = exit_message(Some(1), "INFO: closed", "");
        assert!(message.contains("stdout: INFO: closed"));
    }

    #[test]
    fn test_exit_message_signal_termination() {
        let message = exit_message(None, "", "");
        assert!(message.contains("terminated"));
    }

    #[test]
    fn test_stop_when_idle_is_noop() {
        let mut manager = MirrorManager::new(Arc::new(ToolLocator::new()));
        assert!(!manager.is_mirroring());
        manager.stop();
        manager.stop();
        assert!(!manager.is_mirroring());
    }

    /// Point the manager at a fake scrcpy script.
    #[cfg(unix)]
    fn fake_manager(dir: &std::path::Path, script: &str) -> MirrorManager {
        use std::os::unix::fs::PermissionsExt;

        let fake = dir.join("scrcpy");
        std::fs::write(&fake, script).unwrap();
        std::fs::set_permissions(&fake, std::fs::Permissions::from_mode(0o755)).unwrap();

        MirrorManager::new(Arc::new(ToolLocator::with_bundled(BundledTools {
            adb: None,
            scrcpy: Some(fake),
        })))
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_start_missing_tool_is_descriptive_error() {
        let mut manager = MirrorManager::new(Arc::new(ToolLocator::with_bundled(BundledTools {
            adb: None,
            scrcpy: Some(std::path::PathBuf::from("/nonexistent/scrcpy-missing")),
        })));

        // Hermetic only when no system scrcpy exists; skip otherwise.
        if manager.is_available().await {
            return;
        }

        let result = manager
            .start("SERIAL1", QualityPreset::Balanced, false, false)
            .await;
        assert!(matches!(result, Err(Error::ScrcpyNotFound { .. })));
        assert!(!manager.is_mirroring());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_session_ended_fires_on_crash() {
        let dir = tempfile::tempdir().unwrap();
        let mut manager = fake_manager(
            dir.path(),
            "#!/bin/sh\necho 'ERROR: connection lost' 1>&2\nexit 2\n",
        );

        let ended_rx = manager
            .start("SERIAL1", QualityPreset::Low, false, false)
            .await
            .unwrap();

        let message = tokio::time::timeout(Duration::from_secs(5), ended_rx)
            .await
            .expect("ended notification within 5s")
            .expect("sender not dropped");

        assert!(message.contains("code 2"), "message: {message}");
        assert!(message.contains("connection lost"), "message: {message}");
        assert!(!manager.is_mirroring());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stop_triggers_single_ended_notification() {
        let dir = tempfile::tempdir().unwrap();
        let mut manager = fake_manager(dir.path(), "#!/bin/sh\nsleep 30\n");

        let ended_rx = manager
            .start("SERIAL1", QualityPreset::Balanced, false, false)
            .await
            .unwrap();
        assert!(manager.is_mirroring());

        manager.stop();

        let message = tokio::time::timeout(Duration::from_secs(5), ended_rx)
            .await
            .expect("ended notification within 5s")
            .expect("sender not dropped");
        assert!(message.contains("terminated"), "message: {message}");
        assert!(!manager.is_mirroring());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_second_start_supersedes_first() {
        let dir = tempfile::tempdir().unwrap();
        let mut manager = fake_manager(dir.path(), "#!/bin/sh\nsleep 30\n");

        let first_rx = manager
            .start("SERIAL1", QualityPreset::Balanced, false, false)
            .await
            .unwrap();

        let second_rx = manager
            .start("SERIAL2", QualityPreset::Balanced, false, false)
            .await
            .unwrap();

        // Exactly one notification for the superseded session.
        let first_message = tokio::time::timeout(Duration::from_secs(5), first_rx)
            .await
            .expect("superseded session must notify")
            .expect("sender not dropped");
        assert!(first_message.contains("terminated"));

        // The second session is still running.
        assert!(manager.is_mirroring());
        manager.stop();
        let _ = tokio::time::timeout(Duration::from_secs(5), second_rx).await;
    }
}
