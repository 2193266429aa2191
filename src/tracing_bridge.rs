//! `tracing` integration
//!
//! Routes `tracing` events and plain `io::Write` output into a [`LogSink`], so
//! libraries that log through either end up in the rotated files with the same
//! prefix, dedup and drop accounting as direct calls.

use std::fmt::Write as _;
use std::io;

use anyhow::{Context as _, Result};
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Layer;

use crate::record::{Location, LEVEL_INFO, LEVEL_WARNING};
use crate::sink::LogSink;

/// Verbosity level for a `tracing` level
pub fn level_for(level: &tracing::Level) -> i32 {
    match *level {
        tracing::Level::ERROR | tracing::Level::WARN => LEVEL_WARNING,
        tracing::Level::INFO => LEVEL_INFO,
        tracing::Level::DEBUG | tracing::Level::TRACE => 2,
    }
}

/// Collects the message and fields of an event into one line
#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: String,
}

impl MessageVisitor {
    fn push_field(&mut self, name: &str, value: std::fmt::Arguments<'_>) {
        if !self.fields.is_empty() {
            self.fields.push(' ');
        }
        let _ = write!(self.fields, "{}={}", name, value);
    }

    fn into_text(self) -> String {
        match (self.message.is_empty(), self.fields.is_empty()) {
            (_, true) => self.message,
            (true, false) => self.fields,
            (false, false) => format!("{} {}", self.message, self.fields),
        }
    }
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.push_field(field.name(), format_args!("{}", value));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        } else {
            self.push_field(field.name(), format_args!("{:?}", value));
        }
    }
}

/// A `tracing` layer that submits every event to a sink
pub struct SinkLayer {
    sink: LogSink,
}

impl SinkLayer {
    pub fn new(sink: LogSink) -> Self {
        Self { sink }
    }
}

impl<S> Layer<S> for SinkLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let metadata = event.metadata();
        let level = level_for(metadata.level());
        if !self.sink.enabled(level) {
            return;
        }

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        let mut text = visitor.into_text();

        if let Some(scope) = ctx.event_scope(event) {
            let spans: Vec<&str> = scope.from_root().map(|span| span.name()).collect();
            if !spans.is_empty() {
                text = format!("{}: {}", spans.join("::"), text);
            }
        }

        let location = metadata
            .file()
            .map(|file| Location::new(file, metadata.line().unwrap_or(0)));
        self.sink.vlog(location, level, text);
    }
}

/// Install a global subscriber that logs into `sink`
///
/// The filter comes from `RUST_LOG` and defaults to `info`.
pub fn init_tracing(sink: &LogSink) -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(SinkLayer::new(sink.clone()))
        .try_init()
        .context("Failed to install tracing subscriber")
}

/// An `io::Write` that logs each written line at a fixed level
///
/// Incomplete trailing lines are held until the next newline, `flush` or drop.
pub struct LevelWriter {
    sink: LogSink,
    location: Option<Location>,
    level: i32,
    pending: Vec<u8>,
}

impl LevelWriter {
    pub fn new(sink: LogSink, level: i32) -> Self {
        Self {
            sink,
            location: None,
            level,
            pending: Vec::new(),
        }
    }

    pub fn with_location(mut self, location: Location) -> Self {
        self.location = Some(location);
        self
    }

    fn emit(&self, line: &[u8]) {
        let text = String::from_utf8_lossy(line);
        let text = text.trim_end_matches('\r');
        if !text.is_empty() {
            self.sink.vlog(self.location, self.level, text);
        }
    }
}

impl io::Write for LevelWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.pending.extend_from_slice(buf);
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            self.emit(&line[..pos]);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if !self.pending.is_empty() {
            let line = std::mem::take(&mut self.pending);
            self.emit(&line);
        }
        Ok(())
    }
}

impl Drop for LevelWriter {
    fn drop(&mut self) {
        let _ = io::Write::flush(self);
    }
}
