//! Log file names and line timestamps
//!
//! Files are named `<processStart>_<fileCreate>_<seq>.log` with both timestamps
//! in `YYYYMMDD-HHMMSS` local time. The creation timestamp is the ordering key
//! for retrieval. Lines start with `YYYY/MM/DD HH:MM:SS`.

use std::borrow::Cow;
use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use chrono::{DateTime, Local, NaiveDateTime, TimeZone};
use regex::Regex;

use crate::record::LINE_TIME_FORMAT;

/// Timestamp format inside log file names
pub const FILE_TIME_FORMAT: &str = "%Y%m%d-%H%M%S";

/// Name of the pointer to the active file
pub const LATEST_LINK: &str = "latest";

fn file_name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^([0-9]{8}-[0-9]{6})_([0-9]{8}-[0-9]{6})_([0-9]+)\.log$")
            .expect("valid file name regex")
    })
}

fn line_start_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^([0-9]{4}/[0-9]{2}/[0-9]{2} [0-9]{2}:[0-9]{2}:[0-9]{2})")
            .expect("valid line timestamp regex")
    })
}

fn color_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new("\x1b\\[[;0-9]+m").expect("valid color regex"))
}

/// Build the base name of a log file
pub fn log_file_name(process_start: DateTime<Local>, created: DateTime<Local>, seq: u32) -> String {
    format!(
        "{}_{}_{}.log",
        process_start.format(FILE_TIME_FORMAT),
        created.format(FILE_TIME_FORMAT),
        seq
    )
}

/// Whether `name` follows the log file naming pattern
pub fn is_log_file_name(name: &str) -> bool {
    file_name_re().is_match(name)
}

fn parse_in<Tz: TimeZone>(s: &str, format: &str, tz: &Tz) -> Option<i64> {
    let naive = NaiveDateTime::parse_from_str(s, format).ok()?;
    tz.from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.timestamp())
}

/// Creation timestamp (Unix seconds) encoded in a log file name, in local time
pub fn file_created_at(name: &str) -> Option<i64> {
    file_created_at_in(name, &Local)
}

/// Same as [`file_created_at`] for an explicit time zone
pub fn file_created_at_in<Tz: TimeZone>(name: &str, tz: &Tz) -> Option<i64> {
    let caps = file_name_re().captures(name)?;
    parse_in(&caps[2], FILE_TIME_FORMAT, tz)
}

/// Timestamp (Unix seconds) at the start of a log line in local time, 0 if absent
pub fn line_timestamp(line: &str) -> i64 {
    line_timestamp_in(line, &Local)
}

/// Same as [`line_timestamp`] for an explicit time zone
pub fn line_timestamp_in<Tz: TimeZone>(line: &str, tz: &Tz) -> i64 {
    line_start_re()
        .captures(line)
        .and_then(|caps| parse_in(&caps[1], LINE_TIME_FORMAT, tz))
        .unwrap_or(0)
}

/// Trim surrounding whitespace and drop ANSI color sequences
pub fn clean_line(line: &str) -> Cow<'_, str> {
    color_re().replace_all(line.trim(), "")
}

/// A rotated log file found on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFile {
    pub path: PathBuf,
    /// Unix seconds the owning process started
    pub process_start: i64,
    /// Unix seconds the file was created
    pub created: i64,
    pub seq: u32,
}

impl LogFile {
    /// Parse a directory entry; `None` if the name does not match the pattern
    pub fn from_path(path: &Path) -> Option<Self> {
        Self::from_path_in(path, &Local)
    }

    pub fn from_path_in<Tz: TimeZone>(path: &Path, tz: &Tz) -> Option<Self> {
        let name = path.file_name()?.to_str()?;
        let caps = file_name_re().captures(name)?;
        Some(Self {
            path: path.to_path_buf(),
            process_start: parse_in(&caps[1], FILE_TIME_FORMAT, tz)?,
            created: parse_in(&caps[2], FILE_TIME_FORMAT, tz)?,
            seq: caps[3].parse().ok()?,
        })
    }

    /// Newest first: creation time, then process start, then sequence
    pub fn newest_first(a: &LogFile, b: &LogFile) -> Ordering {
        (b.created, b.process_start, b.seq).cmp(&(a.created, a.process_start, a.seq))
    }
}
