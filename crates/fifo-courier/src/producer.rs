//! Send path with idempotent delivery.

use crate::dedup::DedupKeyGenerator;
use crate::error::SendError;
use crate::events::{CourierEvent, EventKind, EventLevel, EventSink, TracingSink};
use crate::message::{Destination, MessageId, OutboundMessage};
use crate::transport::QueueTransport;
use std::sync::Arc;

/// Submits single messages with a deduplication key attached.
///
/// Each call to [`Producer::send`] makes exactly one transport call and never
/// retries. Callers that retry a [`SendError::Transient`] should re-send with
/// the same business key so the queue suppresses a duplicate.
///
/// # Examples
///
/// ```rust
/// use fifo_courier::{Destination, InMemoryTransport, OutboundMessage, PartitionKey, Producer};
/// use std::sync::Arc;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let producer = Producer::new(Arc::new(InMemoryTransport::default()));
/// let queue = Destination::new("orders.fifo".to_string())?;
///
/// let message = OutboundMessage::new(r#"{"order":42}"#)
///     .with_partition_key(PartitionKey::new("customer-7".to_string())?)
///     .with_business_key("order-42");
/// let id = producer.send(&queue, message).await?;
/// # let _ = id;
/// # Ok(())
/// # }
/// ```
pub struct Producer {
    transport: Arc<dyn QueueTransport>,
    generator: DedupKeyGenerator,
    sink: Arc<dyn EventSink>,
}

impl Producer {
    /// Producer with an un-namespaced key generator that logs through `tracing`
    pub fn new(transport: Arc<dyn QueueTransport>) -> Self {
        Self {
            transport,
            generator: DedupKeyGenerator::new(),
            sink: Arc::new(TracingSink),
        }
    }

    /// Replace the dedup key generator
    pub fn with_generator(mut self, generator: DedupKeyGenerator) -> Self {
        self.generator = generator;
        self
    }

    /// Replace the event sink
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Send one message.
    ///
    /// Validation failures are reported as [`SendError::Rejected`] without
    /// contacting the queue.
    pub async fn send(
        &self,
        destination: &Destination,
        message: OutboundMessage,
    ) -> Result<MessageId, SendError> {
        if let Err(error) = self.validate(destination, &message) {
            self.report_failure(destination, &error);
            return Err(error);
        }

        let dedup_key = self.generator.generate(message.business_key.as_deref());
        let result = self
            .transport
            .send(
                destination,
                message.partition_key.as_ref(),
                &message.body,
                &dedup_key,
            )
            .await;

        match result {
            Ok(message_id) => {
                let mut event =
                    CourierEvent::new(EventLevel::Info, EventKind::MessageSent, "Message sent")
                        .with_field("destination", destination)
                        .with_field("message_id", &message_id)
                        .with_field("dedup_key", &dedup_key);
                if let Some(key) = &message.partition_key {
                    event = event.with_field("partition_key", key);
                }
                self.sink.emit(event);
                Ok(message_id)
            }
            Err(error) => {
                let error = SendError::from(error);
                self.report_failure(destination, &error);
                Err(error)
            }
        }
    }

    fn validate(
        &self,
        destination: &Destination,
        message: &OutboundMessage,
    ) -> Result<(), SendError> {
        if message.body.is_empty() {
            return Err(SendError::Rejected {
                reason: "Message body cannot be empty".to_string(),
            });
        }

        let limit = self.transport.max_message_size();
        if message.body.len() > limit {
            return Err(SendError::Rejected {
                reason: format!(
                    "Message of {} bytes exceeds the {} byte limit",
                    message.body.len(),
                    limit
                ),
            });
        }

        if destination.is_fifo() && message.partition_key.is_none() {
            return Err(SendError::Rejected {
                reason: format!("FIFO destination '{}' requires a partition key", destination),
            });
        }

        Ok(())
    }

    fn report_failure(&self, destination: &Destination, error: &SendError) {
        let level = if error.is_transient() {
            EventLevel::Warn
        } else {
            EventLevel::Error
        };
        self.sink.emit(
            CourierEvent::new(level, EventKind::SendFailed, "Message send failed")
                .with_field("destination", destination)
                .with_field("transient", error.is_transient())
                .with_field("error", error),
        );
    }
}

impl std::fmt::Debug for Producer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Producer")
            .field("transport", &self.transport.name())
            .field("generator", &self.generator)
            .finish()
    }
}

#[cfg(test)]
#[path = "producer_tests.rs"]
mod tests;
