//! Configuration management for the log sink

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::Error;

/// Categories of disk errors for user-friendly messages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiskErrorKind {
    /// Disk is full or quota exceeded
    DiskFull,
    /// Permission denied (read or write)
    PermissionDenied,
    /// File or directory not found
    NotFound,
    /// Other IO error
    Other,
}

impl DiskErrorKind {
    /// Get a user-friendly message for this error kind
    pub fn user_message(&self) -> &'static str {
        match self {
            DiskErrorKind::DiskFull => "disk full, log output is being lost",
            DiskErrorKind::PermissionDenied => "permission denied writing to the log directory",
            DiskErrorKind::NotFound => "log file or directory not found",
            DiskErrorKind::Other => "failed to write log",
        }
    }
}

/// Categorize an IO error into a user-friendly category
pub fn categorize_io_error(e: &std::io::Error) -> DiskErrorKind {
    use std::io::ErrorKind;

    match e.kind() {
        ErrorKind::WriteZero => DiskErrorKind::DiskFull,
        ErrorKind::PermissionDenied => DiskErrorKind::PermissionDenied,
        ErrorKind::NotFound => DiskErrorKind::NotFound,

        // Check raw OS error for disk full on Unix
        _ => {
            #[cfg(unix)]
            {
                if let Some(os_error) = e.raw_os_error() {
                    if os_error == libc::ENOSPC || os_error == libc::EDQUOT {
                        return DiskErrorKind::DiskFull;
                    }
                    if os_error == libc::EACCES {
                        return DiskErrorKind::PermissionDenied;
                    }
                }
            }
            DiskErrorKind::Other
        }
    }
}

/// Create a user-friendly error message from an IO error
pub fn friendly_io_error_message(e: &std::io::Error, context: &str) -> String {
    let kind = categorize_io_error(e);
    match kind {
        DiskErrorKind::Other => format!("{}: {}", context, e),
        _ => format!("{}: {} ({})", context, kind.user_message(), e),
    }
}

/// Log sink configuration
///
/// Everything except `verbose_level` is read once when the sink starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding the rotated log files and the "latest" pointer
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,

    /// Capacity of the queue between callers and the dedup consumer (default: 10000)
    #[serde(default = "default_line_queue_capacity")]
    pub line_queue_capacity: usize,

    /// Capacity of the queue between the dedup consumer and the file writer (default: 100)
    #[serde(default = "default_write_queue_capacity")]
    pub write_queue_capacity: usize,

    /// Switch to a new file once the active one reaches this many bytes (default: 10 MB)
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,

    /// Recycle old files once the directory reaches this many bytes (default: 1 GB)
    #[serde(default = "default_max_dir_size")]
    pub max_dir_size: u64,

    /// Mirror every write to the original stdout
    #[serde(default)]
    pub also_log_to_stdout: bool,

    /// Initial verbosity; lines with a higher level are not emitted (default: 1)
    #[serde(default = "default_verbose_level")]
    pub verbose_level: i32,
}

fn default_log_dir() -> PathBuf {
    logs_dir()
}

fn default_line_queue_capacity() -> usize {
    10_000
}

fn default_write_queue_capacity() -> usize {
    100
}

fn default_max_file_size() -> u64 {
    10 * 1000 * 1000
}

fn default_max_dir_size() -> u64 {
    1000 * 1000 * 1000
}

fn default_verbose_level() -> i32 {
    1
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_dir: default_log_dir(),
            line_queue_capacity: default_line_queue_capacity(),
            write_queue_capacity: default_write_queue_capacity(),
            max_file_size: default_max_file_size(),
            max_dir_size: default_max_dir_size(),
            also_log_to_stdout: false,
            verbose_level: default_verbose_level(),
        }
    }
}

impl Config {
    /// Default configuration writing into `log_dir`
    pub fn with_log_dir(log_dir: impl Into<PathBuf>) -> Self {
        Self {
            log_dir: log_dir.into(),
            ..Self::default()
        }
    }

    /// Load configuration from the default file, or return default if not found
    pub fn load() -> Result<Self> {
        let path = config_file_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific file
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        toml::from_str(&content).context("Failed to parse config file")
    }

    /// Save configuration to a specific file
    pub fn save_to(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, content).context("Failed to write config file")?;
        Ok(())
    }

    /// Check that the values can drive the pipeline
    pub fn validate(&self) -> crate::Result<()> {
        if self.line_queue_capacity == 0 || self.write_queue_capacity == 0 {
            return Err(Error::Configuration(
                "queue capacities must be greater than zero".to_string(),
            ));
        }
        if self.max_file_size < 10 {
            return Err(Error::Configuration(format!(
                "max_file_size must be at least 10 bytes, got {}",
                self.max_file_size
            )));
        }
        if self.max_dir_size == 0 {
            return Err(Error::Configuration(
                "max_dir_size must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Bytes written between two size checks of the active file
    pub fn check_block(&self) -> u64 {
        self.max_file_size / 10
    }
}

/// Get the base configuration directory (~/.logsink)
/// Falls back to ./.logsink if home directory cannot be determined
pub fn config_dir() -> PathBuf {
    try_config_dir().unwrap_or_else(|| PathBuf::from(".logsink"))
}

/// Try to get the base configuration directory, returning None if home dir is unavailable
pub fn try_config_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".logsink"))
}

/// Get the path to the config file
pub fn config_file_path() -> PathBuf {
    config_dir().join("config.toml")
}

/// Get the path to the default logs directory
pub fn logs_dir() -> PathBuf {
    config_dir().join("logs")
}
