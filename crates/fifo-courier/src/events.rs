//! Structured observability events.
//!
//! The producer and the poll loop report what they do as [`CourierEvent`]s
//! handed to an [`EventSink`]. [`TracingSink`] forwards them to `tracing`;
//! [`RecordingSink`] keeps them in memory for assertions.

use std::sync::{Mutex, PoisonError};

/// Severity of an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EventLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// What happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    MessageSent,
    SendFailed,
    MessageReceived,
    MessageAcked,
    AckFailed,
    HandlerFailed,
    TransientFailure,
    LoopTerminated,
}

/// One structured event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CourierEvent {
    pub level: EventLevel,
    pub kind: EventKind,
    pub message: String,
    pub fields: Vec<(&'static str, String)>,
}

impl CourierEvent {
    pub fn new(level: EventLevel, kind: EventKind, message: impl Into<String>) -> Self {
        Self {
            level,
            kind,
            message: message.into(),
            fields: Vec::new(),
        }
    }

    /// Attach a structured field
    pub fn with_field(mut self, name: &'static str, value: impl ToString) -> Self {
        self.fields.push((name, value.to_string()));
        self
    }

    /// Look up a field value by name
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value.as_str())
    }
}

/// Receiver of structured events
pub trait EventSink: Send + Sync {
    fn emit(&self, event: CourierEvent);
}

/// Sink that forwards events to the `tracing` subscriber
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: CourierEvent) {
        let fields = FieldList(&event.fields);
        let kind = format!("{:?}", event.kind);
        match event.level {
            EventLevel::Debug => tracing::debug!(kind = %kind, fields = %fields, "{}", event.message),
            EventLevel::Info => tracing::info!(kind = %kind, fields = %fields, "{}", event.message),
            EventLevel::Warn => tracing::warn!(kind = %kind, fields = %fields, "{}", event.message),
            EventLevel::Error => {
                tracing::error!(kind = %kind, fields = %fields, "{}", event.message)
            }
        }
    }
}

struct FieldList<'a>(&'a [(&'static str, String)]);

impl std::fmt::Display for FieldList<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, (name, value)) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{}={}", name, value)?;
        }
        Ok(())
    }
}

/// Sink that stores every event in memory
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<CourierEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all recorded events, oldest first
    pub fn events(&self) -> Vec<CourierEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of recorded events of one kind
    pub fn count(&self, kind: EventKind) -> usize {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|event| event.kind == kind)
            .count()
    }

    /// Recorded events of one kind
    pub fn of_kind(&self, kind: EventKind) -> Vec<CourierEvent> {
        self.events()
            .into_iter()
            .filter(|event| event.kind == kind)
            .collect()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: CourierEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}

#[cfg(test)]
#[path = "events_tests.rs"]
mod tests;
