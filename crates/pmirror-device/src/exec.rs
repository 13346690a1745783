//! External process execution
//!
//! Every subprocess phone-mirror launches goes through this module. The
//! critical invariant: both output pipes are drained by dedicated tasks
//! started immediately after spawn, and process exit is awaited only
//! concurrently with (never before) the drain. OS pipe buffers hold tens of
//! kilobytes; a child that fills its pipe while the parent waits for exit
//! hangs forever.

use std::ffi::OsStr;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use pmirror_core::prelude::*;

/// Default timeout for captured-output runs.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// The result of a completed process invocation.
///
/// Created once per invocation and never mutated. Exit code -1 stands in for
/// launch failure, timeout, and cancellation; the distinction lives in
/// `stderr`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutcome {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutcome {
    /// Success is defined as exit code 0.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    fn failed(stdout: String, stderr: String) -> Self {
        Self {
            exit_code: -1,
            stdout,
            stderr,
        }
    }
}

/// One complete line of subprocess output, tagged by stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamLine {
    Stdout(String),
    Stderr(String),
}

/// Run a command and capture its output, racing a timeout against completion.
///
/// Never returns an error: launch failure and timeout both yield an outcome
/// with exit code -1 and an explanatory stderr message.
pub async fn run<S: AsRef<OsStr>>(program: &Path, args: &[S], timeout: Duration) -> ProcessOutcome {
    // The guard keeps the cancel channel open so the run can only end by
    // completion or timeout.
    let (_guard, cancel_rx) = oneshot::channel();
    run_with_cancel(program, args, timeout, cancel_rx).await
}

/// Run a command with an external cancellation signal in addition to the
/// timeout.
///
/// Cancelling (sending on, or dropping, the paired sender) force-kills the
/// child and yields exit code -1, exactly like a timeout but with a
/// distinguishing message. Cancellation is a normal exit path, not an error.
pub async fn run_with_cancel<S: AsRef<OsStr>>(
    program: &Path,
    args: &[S],
    timeout: Duration,
    mut cancel_rx: oneshot::Receiver<()>,
) -> ProcessOutcome {
    let mut child = match spawn(program, args) {
        Ok(child) => child,
        Err(e) => {
            warn!("failed to start {}: {}", program.display(), e);
            return ProcessOutcome::failed(
                String::new(),
                format!("Failed to start process: {e}"),
            );
        }
    };

    // Begin draining both pipes before anything awaits process exit.
    let out_task = drain_to_string(child.stdout.take().expect("stdout was configured"));
    let err_task = drain_to_string(child.stderr.take().expect("stderr was configured"));

    enum Verdict {
        Exited(Option<i32>),
        TimedOut,
        Cancelled,
    }

    let verdict = tokio::select! {
        // Natural exit. The readers own the pipes, so waiting here cannot
        // block the child on a full buffer.
        result = child.wait() => match result {
            Ok(status) => Verdict::Exited(status.code()),
            Err(e) => {
                error!("error waiting for {}: {}", program.display(), e);
                Verdict::Exited(None)
            }
        },
        _ = tokio::time::sleep(timeout) => Verdict::TimedOut,
        _ = &mut cancel_rx => Verdict::Cancelled,
    };

    match verdict {
        Verdict::Exited(code) => ProcessOutcome {
            exit_code: code.unwrap_or(-1),
            stdout: out_task.await.unwrap_or_default(),
            stderr: err_task.await.unwrap_or_default(),
        },
        Verdict::TimedOut => {
            warn!(
                "{} timed out after {} seconds, killing",
                program.display(),
                timeout.as_secs()
            );
            kill_child(&mut child).await;
            // The pipes closed with the child, so the readers finish promptly
            // and we keep whatever stdout was already captured.
            ProcessOutcome::failed(
                out_task.await.unwrap_or_default(),
                format!("Process timed out after {} seconds", timeout.as_secs()),
            )
        }
        Verdict::Cancelled => {
            debug!("{} cancelled, killing", program.display());
            kill_child(&mut child).await;
            ProcessOutcome::failed(
                out_task.await.unwrap_or_default(),
                "Process was cancelled".to_string(),
            )
        }
    }
}

/// Run a long-lived command, delivering output one complete line at a time
/// on `line_tx`.
///
/// Same spawn and drain discipline as [`run_with_cancel`]. Returns the exit
/// code, or -1 on launch failure or cancellation.
pub async fn run_streaming<S: AsRef<OsStr>>(
    program: &Path,
    args: &[S],
    line_tx: mpsc::Sender<StreamLine>,
    mut cancel_rx: oneshot::Receiver<()>,
) -> i32 {
    let mut child = match spawn(program, args) {
        Ok(child) => child,
        Err(e) => {
            warn!("failed to start {}: {}", program.display(), e);
            return -1;
        }
    };

    let stdout = child.stdout.take().expect("stdout was configured");
    let stderr = child.stderr.take().expect("stderr was configured");
    let out_task = tokio::spawn(forward_lines(
        stdout,
        line_tx.clone(),
        StreamLine::Stdout as fn(String) -> StreamLine,
    ));
    let err_task = tokio::spawn(forward_lines(
        stderr,
        line_tx,
        StreamLine::Stderr as fn(String) -> StreamLine,
    ));

    let code = tokio::select! {
        result = child.wait() => match result {
            Ok(status) => status.code().unwrap_or(-1),
            Err(e) => {
                error!("error waiting for {}: {}", program.display(), e);
                -1
            }
        },
        _ = &mut cancel_rx => {
            debug!("streaming {} cancelled, killing", program.display());
            kill_child(&mut child).await;
            -1
        }
    };

    // Flush any lines still buffered in the readers before returning.
    let _ = out_task.await;
    let _ = err_task.await;
    code
}

fn spawn<S: AsRef<OsStr>>(program: &Path, args: &[S]) -> std::io::Result<Child> {
    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    // Lead a fresh process group so the kill path reaches descendants too.
    #[cfg(unix)]
    command.process_group(0);

    command.spawn()
}

/// Force-kill and reap the child so the OS releases the process entry.
///
/// On Unix the whole process group is signalled: a child that spawned its
/// own children (a wrapper script, a forked server) must not leave them
/// running, or holding our pipes open, past a timeout.
async fn kill_child(child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        unsafe {
            libc::killpg(pid as i32, libc::SIGKILL);
        }
    }
    if let Err(e) = child.kill().await {
        debug!("kill failed (process may have already exited): {e}");
    }
}

fn drain_to_string<R>(stream: R) -> JoinHandle<String>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        let mut reader = BufReader::new(stream);
        let _ = reader.read_to_end(&mut buf).await;
        String::from_utf8_lossy(&buf).into_owned()
    })
}

/// Forward complete lines from a pipe until EOF or until the consumer hangs
/// up.
async fn forward_lines<R>(stream: R, tx: mpsc::Sender<StreamLine>, wrap: fn(String) -> StreamLine)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stream).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if tx.send(wrap(line)).await.is_err() {
            debug!("line channel closed, stopping reader");
            break;
        }
    }
}
