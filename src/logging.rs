//! Log aggregation.
//!
//! Connection tasks never touch the log file. They emit `tracing` events,
//! [`AggregatorLayer`] turns each into a [`LogEvent`] and enqueues it, and a
//! single consumer thread owned by [`LogAggregator`] writes events in queue
//! order. Enqueueing never blocks.

use chrono::{DateTime, Local};
use std::fmt::{self, Write as _};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::thread;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::field::{Field, Visit};
use tracing::span::{Attributes, Id};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

/// Origin used for events emitted outside any span.
pub const DEFAULT_ORIGIN: &str = "server";

/// One log record on its way to the aggregator.
#[derive(Debug, Clone)]
pub struct LogEvent {
    pub level: Level,
    pub message: String,
    pub timestamp: DateTime<Local>,
    pub origin: String,
}

impl LogEvent {
    pub fn new(level: Level, message: impl Into<String>, origin: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            timestamp: Local::now(),
            origin: origin.into(),
        }
    }
}

impl fmt::Display for LogEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} - {} - {} - {}",
            self.timestamp.format("%Y-%m-%d %H:%M:%S%.3f"),
            self.origin,
            self.level,
            self.message
        )
    }
}

enum LogMessage {
    Event(LogEvent),
    /// Ends the consumer loop.
    Shutdown,
}

/// Producer side of the aggregator queue.
#[derive(Clone)]
pub struct LogHandle {
    tx: UnboundedSender<LogMessage>,
}

impl LogHandle {
    /// Enqueue an event. Events sent after shutdown are dropped.
    pub fn send(&self, event: LogEvent) {
        let _ = self.tx.send(LogMessage::Event(event));
    }
}

/// Single consumer that owns the log destination.
pub struct LogAggregator {
    handle: LogHandle,
    worker: thread::JoinHandle<io::Result<u64>>,
}

impl LogAggregator {
    /// Start the consumer thread writing to `destination`.
    pub fn spawn<W>(destination: W) -> io::Result<Self>
    where
        W: Write + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = thread::Builder::new()
            .name("log-aggregator".to_string())
            .spawn(move || drain(rx, destination))?;

        Ok(Self {
            handle: LogHandle { tx },
            worker,
        })
    }

    pub fn handle(&self) -> LogHandle {
        self.handle.clone()
    }

    /// Enqueue the terminal sentinel, wait for everything queued before it
    /// to be written, and return the number of events written.
    pub fn shutdown(self) -> io::Result<u64> {
        let _ = self.handle.tx.send(LogMessage::Shutdown);
        self.worker
            .join()
            .map_err(|_| io::Error::other("log aggregator thread panicked"))?
    }
}

fn drain<W: Write>(mut rx: UnboundedReceiver<LogMessage>, mut destination: W) -> io::Result<u64> {
    let mut written = 0u64;
    while let Some(message) = rx.blocking_recv() {
        match message {
            LogMessage::Event(event) => {
                writeln!(destination, "{event}")?;
                written += 1;
                if rx.is_empty() {
                    destination.flush()?;
                }
            }
            LogMessage::Shutdown => break,
        }
    }
    destination.flush()?;
    Ok(written)
}

/// Move an existing log file out of the way as `<name>_<dd_mm_YYYY_HH_MM_SS>`.
///
/// Returns the new path if a file was rotated.
pub fn rotate_log_file(path: &Path) -> io::Result<Option<PathBuf>> {
    if !path.is_file() {
        return Ok(None);
    }
    let suffix = Local::now().format("%d_%m_%Y_%H_%M_%S");
    let mut rotated = path.as_os_str().to_owned();
    rotated.push(format!("_{suffix}"));
    let rotated = PathBuf::from(rotated);
    std::fs::rename(path, &rotated)?;
    Ok(Some(rotated))
}

/// `tracing` layer that forwards events to a [`LogAggregator`].
///
/// The origin of each event is built from its enclosing spans, e.g.
/// `conn[id=3 peer=127.0.0.1:50211]`.
pub struct AggregatorLayer {
    handle: LogHandle,
}

impl AggregatorLayer {
    pub fn new(handle: LogHandle) -> Self {
        Self { handle }
    }
}

/// Rendered span name and fields, stored in span extensions.
struct OriginTag(String);

impl<S> Layer<S> for AggregatorLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &Attributes<'_>, id: &Id, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(id) else { return };
        let mut fields = FieldCollector::default();
        attrs.record(&mut fields);
        let tag = if fields.fields.is_empty() {
            span.name().to_string()
        } else {
            format!("{}[{}]", span.name(), fields.fields)
        };
        span.extensions_mut().insert(OriginTag(tag));
    }

    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let mut fields = FieldCollector::default();
        event.record(&mut fields);

        let origin = ctx
            .event_scope(event)
            .map(|scope| {
                scope
                    .from_root()
                    .filter_map(|span| span.extensions().get::<OriginTag>().map(|t| t.0.clone()))
                    .collect::<Vec<_>>()
                    .join(":")
            })
            .filter(|origin| !origin.is_empty())
            .unwrap_or_else(|| DEFAULT_ORIGIN.to_string());

        let message = if fields.fields.is_empty() {
            fields.message
        } else if fields.message.is_empty() {
            fields.fields
        } else {
            format!("{} {}", fields.message, fields.fields)
        };

        self.handle
            .send(LogEvent::new(*event.metadata().level(), message, origin));
    }
}

/// Collects the `message` field and renders the rest as `key=value`.
#[derive(Default)]
struct FieldCollector {
    message: String,
    fields: String,
}

impl FieldCollector {
    fn push(&mut self, field: &Field, value: fmt::Arguments<'_>) {
        if field.name() == "message" {
            let _ = self.message.write_fmt(value);
        } else {
            if !self.fields.is_empty() {
                self.fields.push(' ');
            }
            let _ = write!(self.fields, "{}={}", field.name(), value);
        }
    }
}

impl Visit for FieldCollector {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.push(field, format_args!("{value}"));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.push(field, format_args!("{value:?}"));
    }
}
