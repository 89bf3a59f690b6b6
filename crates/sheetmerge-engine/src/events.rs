//! Structured status events.
//!
//! The engine never prints. Every notable step becomes a [`StatusEvent`]
//! handed to an [`EventSink`] through a [`Reporter`], which drops `Debug`
//! events unless debug mode is on.

use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Debug,
    Info,
    Warning,
    Error,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warning => "warning",
            Level::Error => "error",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct EventCounts {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StatusEvent {
    pub level: Level,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sheet: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub counts: Option<EventCounts>,
}

impl StatusEvent {
    pub fn new(level: Level, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            sheet: None,
            column: None,
            counts: None,
        }
    }

    pub fn debug(message: impl Into<String>) -> Self {
        Self::new(Level::Debug, message)
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(Level::Info, message)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(Level::Warning, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(Level::Error, message)
    }

    pub fn sheet(mut self, sheet: impl Into<String>) -> Self {
        self.sheet = Some(sheet.into());
        self
    }

    pub fn column(mut self, column: impl Into<String>) -> Self {
        self.column = Some(column.into());
        self
    }

    pub fn counts(mut self, counts: EventCounts) -> Self {
        self.counts = Some(counts);
        self
    }
}

pub trait EventSink: Send + Sync {
    fn emit(&self, event: &StatusEvent);
}

/// Forwards events to `tracing`.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: &StatusEvent) {
        let sheet = event.sheet.as_deref().unwrap_or("");
        let column = event.column.as_deref().unwrap_or("");
        let (attempted, succeeded, failed) = event
            .counts
            .map(|c| (c.attempted, c.succeeded, c.failed))
            .unwrap_or_default();
        let msg = event.message.as_str();
        match event.level {
            Level::Debug => {
                tracing::debug!(sheet, column, attempted, succeeded, failed, "{msg}")
            }
            Level::Info => {
                tracing::info!(sheet, column, attempted, succeeded, failed, "{msg}")
            }
            Level::Warning => {
                tracing::warn!(sheet, column, attempted, succeeded, failed, "{msg}")
            }
            Level::Error => {
                tracing::error!(sheet, column, attempted, succeeded, failed, "{msg}")
            }
        }
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct CollectingSink {
    events: Mutex<Vec<StatusEvent>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<StatusEvent> {
        self.events.lock().clone()
    }

    pub fn at_level(&self, level: Level) -> Vec<StatusEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.level == level)
            .cloned()
            .collect()
    }

    pub fn contains(&self, level: Level, needle: &str) -> bool {
        self.events
            .lock()
            .iter()
            .any(|e| e.level == level && e.message.contains(needle))
    }
}

impl EventSink for CollectingSink {
    fn emit(&self, event: &StatusEvent) {
        self.events.lock().push(event.clone());
    }
}

/// Debug-aware handle to a sink; cheap to clone into worker threads.
#[derive(Clone)]
pub struct Reporter {
    sink: Arc<dyn EventSink>,
    debug: bool,
}

impl Reporter {
    pub fn new(sink: Arc<dyn EventSink>, debug: bool) -> Self {
        Self { sink, debug }
    }

    /// A reporter that forwards to `tracing`.
    pub fn tracing(debug: bool) -> Self {
        Self::new(Arc::new(TracingSink), debug)
    }

    pub fn debug_enabled(&self) -> bool {
        self.debug
    }

    pub fn emit(&self, event: StatusEvent) {
        if event.level == Level::Debug && !self.debug {
            return;
        }
        self.sink.emit(&event);
    }
}

impl fmt::Debug for Reporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reporter").field("debug", &self.debug).finish()
    }
}
