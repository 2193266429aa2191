//! Line pipeline between log callers and the file writer
//!
//! Callers enqueue records without ever blocking; a full queue drops the record
//! and bumps the drop counter. A single consumer thread stamps, deduplicates and
//! formats records in arrival order, then hands the bytes to the writer thread.
//!
//! ```text
//! submit() ──try_send──▶ [line queue] ──▶ consumer ──send──▶ [write queue] ──▶ writer
//!    │ full                                  │ dedup, drop notices            │ rotation
//!    ▼                                       ▼                                ▼ recycling
//! DropCounter                           formatted lines                   log files
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::Local;
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::error::Error;
use crate::record::{format_line, format_notice, LogRecord, COLOR_SUCCESS, COLOR_WARNING};
use crate::rotation::{ChunkSender, RotationManager};

/// How long to wait before retrying a send that must not be dropped
const FULL_QUEUE_POLL: Duration = Duration::from_millis(1);

/// Items on the line queue
#[derive(Debug)]
pub enum Message {
    Record(LogRecord),
    /// Stop accepting records; drain what is queued and exit
    Shutdown,
}

/// Count of records discarded because the line queue was full
#[derive(Debug, Default)]
pub struct DropCounter(AtomicU64);

impl DropCounter {
    pub fn increment(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }

    /// Read and reset in one step
    pub fn take(&self) -> u64 {
        self.0.swap(0, Ordering::AcqRel)
    }
}

/// Collapses runs of identical lines
#[derive(Debug, Default)]
pub struct RepeatState {
    last: Option<String>,
    count: u64,
}

impl RepeatState {
    /// Returns `true` if `text` repeats the previous line and must be suppressed
    pub fn is_repeat(&mut self, text: &str) -> bool {
        if self.last.as_deref() == Some(text) {
            self.count += 1;
            true
        } else {
            false
        }
    }

    /// Start a new run with `text`, returning how often the previous line repeated
    pub fn start(&mut self, text: &str) -> u64 {
        self.last = Some(text.to_string());
        std::mem::take(&mut self.count)
    }

    /// Pending repeat count, reset to zero
    pub fn take_count(&mut self) -> u64 {
        std::mem::take(&mut self.count)
    }
}

/// Producer side of the pipeline
#[derive(Debug, Clone)]
pub struct PipelineHandle {
    tx: mpsc::Sender<Message>,
    drops: Arc<DropCounter>,
}

impl PipelineHandle {
    /// Enqueue without blocking; a full queue counts as a drop
    ///
    /// Returns whether the record was accepted. Records sent after shutdown are
    /// discarded without being counted.
    pub fn submit(&self, record: LogRecord) -> bool {
        match self.tx.try_send(Message::Record(record)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.drops.increment();
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Enqueue, waiting for room instead of dropping
    pub fn submit_waiting(&self, record: LogRecord) -> bool {
        self.send_waiting(Message::Record(record))
    }

    /// Ask the consumer to drain and exit
    pub fn request_shutdown(&self) -> bool {
        self.send_waiting(Message::Shutdown)
    }

    /// Records dropped since the last emitted line
    pub fn pending_drops(&self) -> u64 {
        self.drops.get()
    }

    /// Retries `try_send` every millisecond until there is room or the
    /// consumer is gone; usable from inside a tokio runtime.
    fn send_waiting(&self, mut msg: Message) -> bool {
        loop {
            match self.tx.try_send(msg) {
                Ok(()) => return true,
                Err(TrySendError::Full(m)) => {
                    msg = m;
                    thread::sleep(FULL_QUEUE_POLL);
                }
                Err(TrySendError::Closed(_)) => return false,
            }
        }
    }
}

/// The dedup/emit stage
pub struct Consumer {
    rx: mpsc::Receiver<Message>,
    out: ChunkSender,
    drops: Arc<DropCounter>,
    repeat: RepeatState,
}

impl Consumer {
    pub fn new(rx: mpsc::Receiver<Message>, out: ChunkSender, drops: Arc<DropCounter>) -> Self {
        Self {
            rx,
            out,
            drops,
            repeat: RepeatState::default(),
        }
    }

    fn emit(&self, line: String) {
        // The writer only goes away after we do
        let _ = self.out.blocking_send(line.into_bytes());
    }

    fn report_drops(&self) {
        let dropped = self.drops.take();
        if dropped > 0 {
            self.emit(format_notice(
                COLOR_WARNING,
                &format!("{} log lines were dropped.", dropped),
                Local::now(),
            ));
        }
    }

    fn report_repeats(&self, count: u64) {
        if count > 0 {
            self.emit(format_notice(
                COLOR_SUCCESS,
                &format!("Last line repeated {} times.", count),
                Local::now(),
            ));
        }
    }

    fn process(&mut self, record: LogRecord) {
        self.report_drops();
        if self.repeat.is_repeat(&record.text) {
            return;
        }
        let repeated = self.repeat.start(&record.text);
        self.report_repeats(repeated);
        self.emit(format_line(&record, Local::now()));
    }

    /// Consume until shutdown or until every producer is gone
    pub fn run(mut self) {
        while let Some(msg) = self.rx.blocking_recv() {
            match msg {
                Message::Record(record) => self.process(record),
                // Closing keeps the buffered records; recv yields them, then None.
                Message::Shutdown => self.rx.close(),
            }
        }
        self.report_drops();
        let repeated = self.repeat.take_count();
        self.report_repeats(repeated);
    }
}

/// Join handles of the two pipeline threads
pub struct Workers {
    consumer: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl Workers {
    /// Wait for the consumer, then the writer
    pub fn join(self) {
        let _ = self.consumer.join();
        let _ = self.writer.join();
    }
}

/// Start the consumer and writer threads
pub fn spawn(
    line_capacity: usize,
    write_capacity: usize,
    manager: RotationManager,
) -> crate::Result<(PipelineHandle, Workers)> {
    let (line_tx, line_rx) = mpsc::channel(line_capacity);
    let (chunk_tx, chunk_rx) = mpsc::channel(write_capacity);
    let drops = Arc::new(DropCounter::default());

    let writer = thread::Builder::new()
        .name("logsink-writer".to_string())
        .spawn(move || manager.run(chunk_rx))
        .map_err(|source| Error::Spawn {
            name: "writer",
            source,
        })?;

    let consumer = Consumer::new(line_rx, chunk_tx, Arc::clone(&drops));
    let consumer = thread::Builder::new()
        .name("logsink-consumer".to_string())
        .spawn(move || consumer.run())
        .map_err(|source| Error::Spawn {
            name: "consumer",
            source,
        })?;

    Ok((
        PipelineHandle { tx: line_tx, drops },
        Workers { consumer, writer },
    ))
}
