//! Time-ranged retrieval of historical log lines
//!
//! Reads the log directory directly, with no coordination with the writer. A
//! rotation racing a query can hide the newest lines but never breaks it.
//!
//! Budgets count the length of each line after whitespace trimming and color
//! stripping, not bytes on disk. A line that does not fit ends the scan, so the
//! total returned never exceeds the budget.

use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use crate::naming::{clean_line, line_timestamp, LogFile};

struct Budget {
    remaining: i64,
}

impl Budget {
    fn new(num_bytes: i64) -> Self {
        Self {
            remaining: num_bytes,
        }
    }

    /// Charge `len`; a line that does not fit exhausts the budget
    fn take(&mut self, len: usize) -> bool {
        let len = i64::try_from(len).unwrap_or(i64::MAX);
        if len > self.remaining {
            self.remaining = 0;
            return false;
        }
        self.remaining -= len;
        true
    }

    fn exhausted(&self) -> bool {
        self.remaining <= 0
    }
}

/// Reads cleaned lines of one file; unreadable files yield nothing
fn read_lines(path: &Path) -> impl Iterator<Item = String> {
    let reader = match File::open(path) {
        Ok(file) => Some(BufReader::new(file)),
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "Skipping unreadable log file");
            None
        }
    };
    let path = path.to_path_buf();
    let mut reader = reader;
    std::iter::from_fn(move || {
        let r = reader.as_mut()?;
        let mut buf = Vec::new();
        match r.read_until(b'\n', &mut buf) {
            Ok(0) => None,
            Ok(_) => Some(clean_line(&String::from_utf8_lossy(&buf)).into_owned()),
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "Stopped reading log file");
                reader = None;
                None
            }
        }
    })
}

/// Lines at or after `start_ts`, from the front of the file
fn lines_after(file: &LogFile, start_ts: i64, budget: &mut Budget) -> Vec<String> {
    let mut find_first_line = file.created < start_ts;
    let mut lines = Vec::new();
    for line in read_lines(&file.path) {
        if find_first_line {
            if line_timestamp(&line) < start_ts {
                continue;
            }
            find_first_line = false;
        }
        if !budget.take(line.len()) {
            break;
        }
        lines.push(line);
        if budget.exhausted() {
            break;
        }
    }
    lines
}

/// Tail of the lines before `start_ts`; `start_ts <= 0` means the whole file
fn lines_before(file: &LogFile, start_ts: i64, budget: &mut Budget) -> Vec<String> {
    let mut lines = Vec::new();
    for line in read_lines(&file.path) {
        if start_ts > 0 && line_timestamp(&line) >= start_ts {
            break;
        }
        lines.push(line);
    }

    let mut first = lines.len();
    for i in (0..lines.len()).rev() {
        if !budget.take(lines[i].len()) {
            break;
        }
        first = i;
        if budget.exhausted() {
            break;
        }
    }
    lines.split_off(first)
}

/// Answers `log_lines` queries against a log directory
#[derive(Debug, Clone)]
pub struct LogReader {
    logs_dir: PathBuf,
}

impl LogReader {
    pub fn new(logs_dir: impl Into<PathBuf>) -> Self {
        Self {
            logs_dir: logs_dir.into(),
        }
    }

    pub fn logs_dir(&self) -> &Path {
        &self.logs_dir
    }

    /// Log files in the directory, newest first
    pub fn log_files(&self) -> Vec<LogFile> {
        let entries = match fs::read_dir(&self.logs_dir) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::debug!(dir = %self.logs_dir.display(), error = %e, "Failed to list log directory");
                return Vec::new();
            }
        };

        let mut files: Vec<LogFile> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().map(|ft| ft.is_file()).unwrap_or(false))
            .filter_map(|entry| LogFile::from_path(&entry.path()))
            .collect();
        files.sort_by(LogFile::newest_first);
        files
    }

    /// Get at most `num_bytes` worth of log lines, in chronological order
    ///
    /// - `start_ts == 0`: the most recent lines.
    /// - `start_ts > 0`: lines at or after `start_ts`, oldest first.
    /// - `start_ts < 0`: lines before `-start_ts`.
    pub fn log_lines(&self, start_ts: i64, num_bytes: i64) -> Vec<String> {
        if num_bytes <= 0 {
            return Vec::new();
        }
        let files = self.log_files();
        if files.is_empty() {
            return Vec::new();
        }
        let mut budget = Budget::new(num_bytes);

        match start_ts {
            0 => {
                let mut chunks = Vec::new();
                for file in &files {
                    chunks.push(lines_before(file, 0, &mut budget));
                    if budget.exhausted() {
                        break;
                    }
                }
                chunks.into_iter().rev().flatten().collect()
            }
            ts if ts > 0 => {
                // Newest file created at or before ts, else the oldest one
                let start = files
                    .partition_point(|f| f.created > ts)
                    .min(files.len() - 1);
                let mut lines = Vec::new();
                for file in files[..=start].iter().rev() {
                    lines.extend(lines_after(file, ts, &mut budget));
                    if budget.exhausted() {
                        break;
                    }
                }
                lines
            }
            ts => {
                let mut before = ts.checked_neg().unwrap_or(i64::MAX);
                let start = files.partition_point(|f| f.created >= before);
                let mut chunks = Vec::new();
                for file in &files[start..] {
                    chunks.push(lines_before(file, before, &mut budget));
                    if budget.exhausted() {
                        break;
                    }
                    // Older files are read from their end
                    before = 0;
                }
                chunks.into_iter().rev().flatten().collect()
            }
        }
    }

    /// [`log_lines`](Self::log_lines) on tokio's blocking pool
    pub async fn log_lines_async(&self, start_ts: i64, num_bytes: i64) -> Vec<String> {
        let reader = self.clone();
        tokio::task::spawn_blocking(move || reader.log_lines(start_ts, num_bytes))
            .await
            .unwrap_or_default()
    }
}
