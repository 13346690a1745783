//! Logcat error capture
//!
//! Streams `adb logcat *:E` for a device and keeps a bounded in-memory
//! buffer of parsed entries. Logcat timestamps carry no year, so parsed
//! entries are stamped with the current year at ingest time.

use std::collections::VecDeque;
use std::sync::{Arc, LazyLock, Mutex};
use std::time::Duration;

use chrono::{DateTime, Datelike, NaiveDateTime, Utc};
use regex::Regex;
use tokio::sync::{mpsc, oneshot};

use pmirror_core::prelude::*;
use pmirror_core::LogEntry;

use crate::exec::{self, StreamLine};
use crate::locate::{Tool, ToolLocator};

/// Maximum number of buffered entries. The oldest entry is evicted first.
pub const LOG_BUFFER_CAPACITY: usize = 1000;

/// How far back [`LogcatCapture::recent_errors`] looks.
const RECENT_WINDOW: Duration = Duration::from_secs(10);

/// `MM-DD HH:MM:SS.mmm LEVEL/tag: message` as produced by the default
/// logcat output format.
static LOGCAT_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{2}-\d{2}\s+\d{2}:\d{2}:\d{2}\.\d{3})\s+([VDIWEF])/([^:]+):\s*(.*)$")
        .expect("logcat line regex is valid")
});

/// Parse a single logcat line into a structured entry.
///
/// `now` supplies the year missing from the logcat timestamp. Returns `None`
/// for lines that do not match the expected format (continuation lines,
/// logcat banners).
pub fn parse_logcat_line(line: &str, now: DateTime<Utc>) -> Option<LogEntry> {
    let caps = LOGCAT_LINE.captures(line)?;

    let stamped = format!("{}-{}", now.year(), &caps[1]);
    let timestamp = NaiveDateTime::parse_from_str(&stamped, "%Y-%m-%d %H:%M:%S%.3f")
        .ok()?
        .and_utc();

    Some(LogEntry {
        timestamp,
        level: caps[2].chars().next()?,
        tag: caps[3].trim().to_string(),
        message: caps[4].to_string(),
    })
}

/// Bounded capture of error-level logcat output for one device.
///
/// At most one capture subprocess runs at a time; starting a new capture
/// stops the previous one. The entry buffer survives stop/start cycles so
/// errors around a device reconnect are not lost.
#[derive(Debug)]
pub struct LogcatCapture {
    locator: Arc<ToolLocator>,
    entries: Arc<Mutex<VecDeque<LogEntry>>>,
    kill_tx: Option<oneshot::Sender<()>>,
}

impl LogcatCapture {
    pub fn new(locator: Arc<ToolLocator>) -> Self {
        Self {
            locator,
            entries: Arc::new(Mutex::new(VecDeque::with_capacity(LOG_BUFFER_CAPACITY))),
            kill_tx: None,
        }
    }

    /// Start capturing error-level logcat output from the given device.
    pub async fn start_capture(&mut self, serial: &str) {
        self.stop_capture();

        let adb = self.locator.resolve(Tool::Adb).await;
        let args: Vec<String> = vec![
            "-s".to_string(),
            serial.to_string(),
            "logcat".to_string(),
            "*:E".to_string(),
        ];
        info!("starting logcat capture for {serial}");

        let (line_tx, mut line_rx) = mpsc::channel::<StreamLine>(256);
        let (kill_tx, kill_rx) = oneshot::channel();
        self.kill_tx = Some(kill_tx);

        tokio::spawn(async move {
            // Capture is best-effort; a failed launch is just a non-zero
            // code here.
            let code = exec::run_streaming(&adb, &args, line_tx, kill_rx).await;
            debug!("logcat stream closed with code {code}");
        });

        let entries = Arc::clone(&self.entries);
        tokio::spawn(async move {
            while let Some(line) = line_rx.recv().await {
                let StreamLine::Stdout(line) = line else {
                    continue;
                };
                let Some(entry) = parse_logcat_line(&line, Utc::now()) else {
                    continue;
                };
                if let Ok(mut entries) = entries.lock() {
                    if entries.len() >= LOG_BUFFER_CAPACITY {
                        entries.pop_front();
                    }
                    entries.push_back(entry);
                }
            }
        });
    }

    /// Stop the capture subprocess. Idempotent; the buffer is retained.
    pub fn stop_capture(&mut self) {
        if let Some(tx) = self.kill_tx.take() {
            let _ = tx.send(());
        }
    }

    /// Entries from the last ten seconds, oldest first.
    pub fn recent_errors(&self) -> Vec<LogEntry> {
        self.recent_errors_at(Utc::now())
    }

    fn recent_errors_at(&self, now: DateTime<Utc>) -> Vec<LogEntry> {
        let cutoff = now - chrono::Duration::from_std(RECENT_WINDOW).unwrap_or_default();
        self.entries
            .lock()
            .map(|entries| {
                entries
                    .iter()
                    .filter(|entry| entry.timestamp >= cutoff)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Every buffered entry, oldest first.
    pub fn all_errors(&self) -> Vec<LogEntry> {
        self.entries
            .lock()
            .map(|entries| entries.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Discard all buffered entries without disturbing a running capture.
    pub fn clear_errors(&self) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.clear();
        }
    }
}

impl Drop for LogcatCapture {
    fn drop(&mut self) {
        self.stop_capture();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).unwrap()
    }

    fn entry_at(capture: &LogcatCapture, timestamp: DateTime<Utc>, message: &str) {
        let mut entries = capture.entries.lock().unwrap();
        if entries.len() >= LOG_BUFFER_CAPACITY {
            entries.pop_front();
        }
        entries.push_back(LogEntry {
            timestamp,
            level: 'E',
            tag: "test".to_string(),
            message: message.to_string(),
        });
    }

    #[test]
    fn test_parse_valid_line() {
        let line = "06-15 11:59:58.123  E/ActivityManager: ANR in com.example.app";
        let entry = parse_logcat_line(line, now()).unwrap();
        assert_eq!(entry.level, 'E');
        assert_eq!(entry.tag, "ActivityManager");
        assert_eq!(entry.message, "ANR in com.example.app");
        assert_eq!(
            entry.timestamp,
            Utc.with_ymd_and_hms(2024, 6, 15, 11, 59, 58).unwrap()
                + chrono::Duration::milliseconds(123)
        );
    }

    #[test]
    fn test_parse_stamps_current_year() {
        let line = "01-02 03:04:05.006 W/Tag: msg";
        let entry = parse_logcat_line(line, now()).unwrap();
        assert_eq!(entry.timestamp.year(), 2024);
    }

    #[test]
    fn test_parse_trims_tag() {
        let line = "06-15 11:00:00.000 E/chatty  : uid=1000 expire";
        let entry = parse_logcat_line(line, now()).unwrap();
        assert_eq!(entry.tag, "chatty");
    }

    #[test]
    fn test_parse_rejects_banner_and_continuation() {
        assert!(parse_logcat_line("--------- beginning of main", now()).is_none());
        assert!(parse_logcat_line("    at com.example.Foo.bar(Foo.java:12)", now()).is_none());
        assert!(parse_logcat_line("", now()).is_none());
    }

    #[test]
    fn test_parse_all_levels() {
        for level in ['V', 'D', 'I', 'W', 'E', 'F'] {
            let line = format!("06-15 10:00:00.000 {level}/Tag: msg");
            let entry = parse_logcat_line(&line, now()).unwrap();
            assert_eq!(entry.level, level);
        }
        assert!(parse_logcat_line("06-15 10:00:00.000 X/Tag: msg", now()).is_none());
    }

    #[test]
    fn test_parse_empty_message() {
        let line = "06-15 10:00:00.000 E/Tag:";
        let entry = parse_logcat_line(line, now()).unwrap();
        assert_eq!(entry.message, "");
    }

    #[test]
    fn test_buffer_evicts_oldest_first() {
        let capture = LogcatCapture::new(Arc::new(ToolLocator::new()));
        for i in 0..LOG_BUFFER_CAPACITY + 5 {
            entry_at(&capture, now(), &format!("msg {i}"));
        }

        let all = capture.all_errors();
        assert_eq!(all.len(), LOG_BUFFER_CAPACITY);
        assert_eq!(all[0].message, "msg 5");
        assert_eq!(all.last().unwrap().message, format!("msg {}", LOG_BUFFER_CAPACITY + 4));
    }

    #[test]
    fn test_recent_errors_window() {
        let capture = LogcatCapture::new(Arc::new(ToolLocator::new()));
        let now = now();
        entry_at(&capture, now - chrono::Duration::seconds(30), "stale");
        entry_at(&capture, now - chrono::Duration::seconds(5), "recent");
        entry_at(&capture, now, "fresh");

        let recent = capture.recent_errors_at(now);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].message, "recent");
        assert_eq!(recent[1].message, "fresh");

        // The full buffer is unaffected by the window.
        assert_eq!(capture.all_errors().len(), 3);
    }

    #[test]
    fn test_clear_errors() {
        let capture = LogcatCapture::new(Arc::new(ToolLocator::new()));
        entry_at(&capture, now(), "msg");
        assert_eq!(capture.all_errors().len(), 1);
        capture.clear_errors();
        assert!(capture.all_errors().is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_capture_from_fake_adb() {
        use crate::locate::BundledTools;
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let fake = dir.path().join("adb");
        std::fs::write(
            &fake,
            "#!/bin/sh\n\
             echo '06-15 10:00:00.001 E/First: one'\n\
             echo 'not a logcat line'\n\
             echo '06-15 10:00:00.002 E/Second: two'\n",
        )
        .unwrap();
        std::fs::set_permissions(&fake, std::fs::Permissions::from_mode(0o755)).unwrap();

        let mut capture = LogcatCapture::new(Arc::new(ToolLocator::with_bundled(BundledTools {
            adb: Some(fake),
            scrcpy: None,
        })));
        capture.start_capture("SERIAL1").await;

        // Poll until both parsed entries land; the script exits immediately.
        let mut all = Vec::new();
        for _ in 0..50 {
            all = capture.all_errors();
            if all.len() == 2 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        }
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].tag, "First");
        assert_eq!(all[1].tag, "Second");
        capture.stop_capture();
    }
}
