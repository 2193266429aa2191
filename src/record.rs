//! Log records and the on-disk line format

use std::fmt;

use chrono::{DateTime, Local};

/// Red, used for fatal lines
pub const COLOR_ERROR: &str = "\x1b[0;31m";
/// Yellow, used for warnings and the dropped-lines notice
pub const COLOR_WARNING: &str = "\x1b[0;33m";
/// Green, used for success lines and the repeat notice
pub const COLOR_SUCCESS: &str = "\x1b[0;32m";
/// Reset
pub const COLOR_NONE: &str = "\x1b[0m";

/// Timestamp prefix of every emitted line
pub const LINE_TIME_FORMAT: &str = "%Y/%m/%d %H:%M:%S";

/// Level of fatal records
pub const LEVEL_FATAL: i32 = -1;
/// Level of warnings
pub const LEVEL_WARNING: i32 = 0;
/// Level used by plain prints
pub const LEVEL_INFO: i32 = 1;
/// Levels at or above this are rendered as success
pub const LEVEL_SUCCESS: i32 = 3;

/// Source location of a log call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Location {
    pub file: &'static str,
    pub line: u32,
}

impl Location {
    pub const fn new(file: &'static str, line: u32) -> Self {
        Self { file, line }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.line > 0 {
            write!(f, "{}:{}", self.file, self.line)
        } else {
            f.write_str(self.file)
        }
    }
}

/// A single log call on its way to disk
///
/// Records carry no timestamp; the consumer stamps the line when it emits it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub location: Option<Location>,
    /// -1 fatal, 0 warning, 1+ verbose, 3+ success
    pub level: i32,
    pub text: String,
}

impl LogRecord {
    pub fn new(location: Option<Location>, level: i32, text: impl Into<String>) -> Self {
        Self {
            location,
            level,
            text: text.into(),
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.level < 0
    }
}

/// Color opening sequence for a level
pub fn color_prefix(level: i32) -> &'static str {
    if level < 0 {
        COLOR_ERROR
    } else if level == LEVEL_WARNING {
        COLOR_WARNING
    } else if level >= LEVEL_SUCCESS {
        COLOR_SUCCESS
    } else {
        ""
    }
}

/// Color closing sequence for a level
pub fn color_suffix(level: i32) -> &'static str {
    if level <= LEVEL_WARNING || level >= LEVEL_SUCCESS {
        COLOR_NONE
    } else {
        ""
    }
}

/// `[file:line] `, `[file] ` or `[unknown] `
pub fn location_prefix(location: Option<&Location>) -> String {
    match location {
        Some(loc) if !loc.file.is_empty() => format!("[{}] ", loc),
        _ => "[unknown] ".to_string(),
    }
}

/// Render a record as one newline-terminated line
pub fn format_line(record: &LogRecord, now: DateTime<Local>) -> String {
    format!(
        "{} {}{}{}{}\n",
        now.format(LINE_TIME_FORMAT),
        location_prefix(record.location.as_ref()),
        color_prefix(record.level),
        record.text,
        color_suffix(record.level)
    )
}

/// Render a line the pipeline itself emits (no location)
pub fn format_notice(color: &str, text: &str, now: DateTime<Local>) -> String {
    format!(
        "{} {}{}{}\n",
        now.format(LINE_TIME_FORMAT),
        color,
        text,
        COLOR_NONE
    )
}
