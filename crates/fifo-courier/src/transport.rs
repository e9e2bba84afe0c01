//! Transport trait implemented by queue service backends.

use crate::dedup::DedupKey;
use crate::error::TransportError;
use crate::message::{Destination, Message, MessageId, PartitionKey, ReceiptToken};
use async_trait::async_trait;
use std::time::Duration;

/// Raw queue operations the producer and the poll loop are built on.
///
/// Implementations perform exactly one service call per method and never
/// retry; retry and backoff decisions belong to the callers.
#[async_trait]
pub trait QueueTransport: Send + Sync {
    /// Enqueue one message
    async fn send(
        &self,
        destination: &Destination,
        partition_key: Option<&PartitionKey>,
        body: &str,
        dedup_key: &DedupKey,
    ) -> Result<MessageId, TransportError>;

    /// Long-poll for up to `batch_size` messages, waiting at most `wait`
    async fn receive(
        &self,
        destination: &Destination,
        batch_size: u32,
        wait: Duration,
    ) -> Result<Vec<Message>, TransportError>;

    /// Delete a received message
    async fn delete(
        &self,
        destination: &Destination,
        receipt_token: &ReceiptToken,
    ) -> Result<(), TransportError>;

    /// Largest batch a single receive may return
    fn max_batch_size(&self) -> u32;

    /// Largest accepted message body in bytes
    fn max_message_size(&self) -> usize;

    /// Short name for logs
    fn name(&self) -> &'static str;
}
