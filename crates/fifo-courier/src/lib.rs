//! # FIFO Courier
//!
//! Reliable client core for a FIFO message queue: a bounded at-least-once
//! poll loop with explicit acknowledgment, and a send path that attaches
//! deduplication keys so retried sends are not delivered twice.
//!
//! This library provides:
//! - Deterministic dedup keys derived from business keys
//! - An acknowledgment tracker that deletes only successfully handled messages
//! - Exponential backoff with jitter for transient failures
//! - Amazon SQS and in-memory transports behind one trait
//! - Structured events for every send, receive and acknowledgment
//!
//! ## Module Organization
//!
//! - [`error`] - Error types for all queue operations
//! - [`message`] - Destinations, identifiers and message structures
//! - [`dedup`] - Deduplication key generation
//! - [`ack`] - Acknowledgment bookkeeping
//! - [`backoff`] - Idle and transient wait intervals
//! - [`transport`] - The queue service interface
//! - [`providers`] - SQS and in-memory transports
//! - [`producer`] - The send path
//! - [`consumer`] - The poll loop
//! - [`events`] - Observability events and sinks
//! - [`config`] - File and environment configuration

// Module declarations
pub mod ack;
pub mod backoff;
pub mod config;
pub mod consumer;
pub mod dedup;
pub mod error;
pub mod events;
pub mod message;
pub mod producer;
pub mod providers;
pub mod transport;

// Re-export commonly used types at crate root for convenience
pub use ack::{AckOutcome, AckRecord, AckTracker};
pub use backoff::{BackoffConfig, BackoffKind, BackoffPolicy};
pub use self::config::{CourierConfig, TransportConfig, TransportKind};
pub use consumer::{handler_fn, MessageHandler, PollConfig, PollLoop, PollSummary};
pub use dedup::{DedupKey, DedupKeyGenerator};
pub use error::{
    ConfigurationError, HandlerError, InvalidStateError, PollError, SendError, TransportError,
    ValidationError,
};
pub use events::{CourierEvent, EventKind, EventLevel, EventSink, RecordingSink, TracingSink};
pub use message::{Destination, Message, MessageId, OutboundMessage, PartitionKey, ReceiptToken};
pub use producer::Producer;
pub use providers::{InMemoryConfig, InMemoryTransport, SqsConfig, SqsTransport};
pub use transport::QueueTransport;

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
