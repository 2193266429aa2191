//! logsink - process-local log sink
//!
//! Decouples log production from disk I/O. Lines go through a non-blocking,
//! deduplicating pipeline to a writer thread that owns the redirected stdout and
//! stderr, rotates files by size and recycles old ones by directory size.
//! Historical lines can be read back by time range under a byte budget.
//!
//! ```no_run
//! use logsink::{Config, LogSink};
//!
//! let sink = LogSink::start(Config::with_log_dir("/var/log/myapp"))?;
//! logsink::log_print!(sink, "started with pid {}", std::process::id());
//! let recent = sink.log_lines(0, 64 * 1024);
//! sink.close();
//! # Ok::<(), logsink::Error>(())
//! ```

#[macro_use]
mod macros;

pub mod config;
pub mod error;
pub mod naming;
pub mod pipeline;
pub mod record;
pub mod redirect;
pub mod retention;
pub mod retrieval;
pub mod rotation;
pub mod sink;
pub mod tracing_bridge;

pub use config::Config;
pub use error::{Error, Result};
pub use record::{Location, LogRecord};
pub use retrieval::LogReader;
pub use sink::LogSink;
pub use tracing_bridge::{init_tracing, LevelWriter};
