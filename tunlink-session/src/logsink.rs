//! Session log files
//!
//! The controller keeps a plain-text session log next to its other state so
//! that a failed session can be inspected after the fact. On open the
//! previous log is rotated aside, so the last two sessions are always
//! available.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Instant;

use crate::error::Result;

const CURRENT_LOG: &str = "session.log";
const PREVIOUS_LOG: &str = "session-previous.log";

/// Receives session log lines
pub trait LogSink: Send + Sync {
    /// Append one line to the log
    fn write_line(&self, line: &str);
}

/// Log sink that discards everything
pub struct NullLogSink;

impl LogSink for NullLogSink {
    fn write_line(&self, _line: &str) {}
}

/// File-backed session log with one-deep rotation
pub struct FileLogSink {
    dir: PathBuf,
    file: Mutex<File>,
    opened: Instant,
}

impl FileLogSink {
    /// Open the session log in `dir`, rotating any existing log aside
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;

        let current = dir.join(CURRENT_LOG);
        if current.exists() {
            // best effort; a failed rotation only loses the older log
            if let Err(e) = fs::rename(&current, dir.join(PREVIOUS_LOG)) {
                log::warn!("session log rotation failed: {}", e);
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&current)?;

        Ok(Self {
            dir,
            file: Mutex::new(file),
            opened: Instant::now(),
        })
    }

    /// Contents of the current session log
    pub fn current_log(&self) -> String {
        self.read_log(CURRENT_LOG)
    }

    /// Contents of the previous session log
    pub fn previous_log(&self) -> String {
        self.read_log(PREVIOUS_LOG)
    }

    fn read_log(&self, name: &str) -> String {
        fs::read_to_string(self.dir.join(name)).unwrap_or_else(|_| "no log available".to_string())
    }
}

impl LogSink for FileLogSink {
    fn write_line(&self, line: &str) {
        let elapsed = self.opened.elapsed();
        if let Ok(mut file) = self.file.lock() {
            // flushed per line so the log survives a crash
            let _ = writeln!(file, "[{:>8.3}s] {}", elapsed.as_secs_f64(), line);
            let _ = file.flush();
        }
    }
}
