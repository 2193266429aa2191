//! The log sink context
//!
//! A [`LogSink`] owns the whole write side: the redirected output streams, the
//! line pipeline and the writer thread. It is created once at startup, shared
//! by cloning, and shut down with [`LogSink::close`], which is safe to call any
//! number of times from any clone.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::config::Config;
use crate::error::Error;
use crate::pipeline::{self, PipelineHandle, Workers};
use crate::record::{Location, LogRecord, LEVEL_FATAL, LEVEL_INFO};
use crate::redirect::{platform_redirector, StreamRedirector};
use crate::retrieval::LogReader;
use crate::rotation::RotationManager;
use crate::Result;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct Inner {
    pipeline: PipelineHandle,
    workers: Mutex<Option<Workers>>,
    verbose_level: AtomicI32,
    nlog_counts: Mutex<HashMap<Location, u64>>,
    reader: LogReader,
}

impl Inner {
    fn shutdown(&self) {
        let mut workers = lock(&self.workers);
        if let Some(workers) = workers.take() {
            self.pipeline.request_shutdown();
            workers.join();
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Handle to a running log sink
#[derive(Clone)]
pub struct LogSink {
    inner: Arc<Inner>,
}

impl LogSink {
    /// Start a sink that redirects the process's own stdout and stderr
    pub fn start(config: Config) -> Result<Self> {
        Self::start_with(config, platform_redirector())
    }

    /// Start a sink on top of a specific redirector
    ///
    /// Fails before any redirection if the configuration is invalid or the log
    /// directory cannot be created.
    pub fn start_with(config: Config, redirector: Box<dyn StreamRedirector>) -> Result<Self> {
        config.validate()?;
        fs::create_dir_all(&config.log_dir).map_err(|source| Error::CreateDirectory {
            path: config.log_dir.clone(),
            source,
        })?;

        let mut manager = RotationManager::new(&config, redirector);
        manager.open_initial()?;

        let (pipeline, workers) = pipeline::spawn(
            config.line_queue_capacity,
            config.write_queue_capacity,
            manager,
        )?;

        tracing::debug!(dir = %config.log_dir.display(), "Log sink started");

        Ok(Self {
            inner: Arc::new(Inner {
                pipeline,
                workers: Mutex::new(Some(workers)),
                verbose_level: AtomicI32::new(config.verbose_level),
                nlog_counts: Mutex::new(HashMap::new()),
                reader: LogReader::new(config.log_dir),
            }),
        })
    }

    /// Enqueue a record without blocking, regardless of verbosity
    pub fn submit(&self, record: LogRecord) -> bool {
        self.inner.pipeline.submit(record)
    }

    pub fn verbose_level(&self) -> i32 {
        self.inner.verbose_level.load(Ordering::Relaxed)
    }

    pub fn set_verbose_level(&self, level: i32) {
        self.inner.verbose_level.store(level, Ordering::Relaxed);
    }

    /// Whether a call at `level` would be emitted
    pub fn enabled(&self, level: i32) -> bool {
        level <= self.verbose_level()
    }

    /// Log `text` if `level` is within the current verbosity
    pub fn vlog(&self, location: Option<Location>, level: i32, text: impl Into<String>) {
        if self.enabled(level) {
            self.submit(LogRecord::new(location, level, text));
        }
    }

    /// Log at the default level
    pub fn print(&self, location: Option<Location>, text: impl Into<String>) {
        self.vlog(location, LEVEL_INFO, text);
    }

    /// Count a call at `location`; true for the 1st, (n+1)th, (2n+1)th... call
    pub fn nlog_due(&self, location: Location, n: u64) -> bool {
        let n = n.max(1);
        let mut counts = lock(&self.inner.nlog_counts);
        let count = counts.entry(location).or_insert(0);
        *count += 1;
        (*count - 1) % n == 0
    }

    /// Log one in every `n` calls from `location`
    pub fn nlog(&self, location: Location, n: u64, level: i32, text: impl Into<String>) {
        if self.nlog_due(location, n) {
            self.vlog(Some(location), level, text);
        }
    }

    /// Log a fatal line, flush everything to disk and exit the process
    pub fn fatal(&self, location: Option<Location>, text: impl Into<String>) -> ! {
        self.fatal_flush(location, text);
        std::process::exit(1);
    }

    /// Enqueue a fatal record without dropping it, then drain and close
    fn fatal_flush(&self, location: Option<Location>, text: impl Into<String>) {
        self.inner
            .pipeline
            .submit_waiting(LogRecord::new(location, LEVEL_FATAL, text));
        self.close();
    }

    /// Records dropped since the last line the consumer emitted
    pub fn dropped_lines(&self) -> u64 {
        self.inner.pipeline.pending_drops()
    }

    pub fn log_dir(&self) -> &Path {
        self.inner.reader.logs_dir()
    }

    /// See [`LogReader::log_lines`]
    pub fn log_lines(&self, start_ts: i64, num_bytes: i64) -> Vec<String> {
        self.inner.reader.log_lines(start_ts, num_bytes)
    }

    /// See [`LogReader::log_lines_async`]
    pub async fn log_lines_async(&self, start_ts: i64, num_bytes: i64) -> Vec<String> {
        self.inner.reader.log_lines_async(start_ts, num_bytes).await
    }

    /// Stop accepting lines, drain both queues and wait for the writer
    ///
    /// Every line accepted before this call is on disk when it returns.
    /// Later calls return immediately.
    pub fn close(&self) {
        self.inner.shutdown();
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.inner.workers).is_none()
    }
}
