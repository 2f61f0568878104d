//! Attachable log destinations.
//!
//! [`LogSinks`] is a tracing layer that fans formatted log lines out to a set
//! of destinations, each with its own level. Destinations are added with
//! [`LogSinks::attach`] and live as long as the returned [`LogTap`].

use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::Context;

/// Lines buffered per destination before new lines are dropped.
pub const DEFAULT_TAP_CAPACITY: usize = 256;

struct Sink {
    id: u64,
    level: Level,
    tx: mpsc::Sender<String>,
}

/// Shared set of log destinations.
#[derive(Clone, Default)]
pub struct LogSinks {
    sinks: Arc<RwLock<Vec<Sink>>>,
    next_id: Arc<AtomicU64>,
}

impl std::fmt::Debug for LogSinks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogSinks")
            .field("attached", &self.attached())
            .finish_non_exhaustive()
    }
}

impl LogSinks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a destination receiving lines at `level` or more severe.
    pub fn attach(&self, level: Level, capacity: usize) -> LogTap {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.sinks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Sink { id, level, tx });
        LogTap {
            id,
            sinks: self.clone(),
            rx,
        }
    }

    /// Number of attached destinations.
    pub fn attached(&self) -> usize {
        self.sinks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn detach(&self, id: u64) {
        self.sinks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|sink| sink.id != id);
    }
}

/// Receiving end of an attached destination. Dropping it detaches.
pub struct LogTap {
    id: u64,
    sinks: LogSinks,
    rx: mpsc::Receiver<String>,
}

impl LogTap {
    pub async fn recv(&mut self) -> Option<String> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<String> {
        self.rx.try_recv().ok()
    }
}

impl std::fmt::Debug for LogTap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogTap")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl Drop for LogTap {
    fn drop(&mut self) {
        self.sinks.detach(self.id);
    }
}

/// Collects the message and any structured fields of an event.
#[derive(Default)]
struct LineVisitor {
    message: String,
    fields: String,
}

impl Visit for LineVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{:?}", value);
        } else {
            let _ = write!(self.fields, " {}={:?}", field.name(), value);
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            let _ = write!(self.fields, " {}={}", field.name(), value);
        }
    }
}

fn format_line(event: &Event<'_>) -> String {
    let meta = event.metadata();
    let mut visitor = LineVisitor::default();
    event.record(&mut visitor);
    format!(
        "{} {:>5} {}: {}{}",
        Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ"),
        meta.level(),
        meta.target(),
        visitor.message,
        visitor.fields
    )
}

impl<S> Layer<S> for LogSinks
where
    S: Subscriber,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let sinks = self.sinks.read().unwrap_or_else(PoisonError::into_inner);
        let level = *event.metadata().level();
        // More verbose levels compare greater.
        let mut wanted = sinks.iter().filter(|sink| level <= sink.level).peekable();
        if wanted.peek().is_none() {
            return;
        }
        let line = format_line(event);
        // A destination that cannot keep up loses lines; logging never waits.
        for sink in wanted {
            let _ = sink.tx.try_send(line.clone());
        }
    }
}
