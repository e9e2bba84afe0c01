//! In-memory queue transport for testing and development.
//!
//! This module provides a queue implementation that behaves like a FIFO queue
//! service:
//! - Messages are delivered in send order
//! - Received messages stay hidden for a visibility timeout and reappear with
//!   an incremented receive count unless deleted
//! - FIFO queues hold back a partition while one of its messages is in flight
//! - FIFO queues drop sends that repeat a dedup key inside the dedup window
//! - Faults can be injected per operation to exercise failure handling
//!
//! Time is measured with `tokio::time::Instant`, so tests running on a paused
//! clock control visibility and dedup expiry.

use crate::dedup::DedupKey;
use crate::error::TransportError;
use crate::message::{Destination, Message, MessageId, PartitionKey, ReceiptToken};
use crate::transport::QueueTransport;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;

/// In-memory transport configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InMemoryConfig {
    pub visibility_timeout_ms: u64,
    pub dedup_window_ms: u64,
    pub max_batch_size: u32,
    pub max_message_size: usize,
    /// Create queues on first use instead of failing with `QueueDoesNotExist`
    pub auto_create_queues: bool,
}

impl Default for InMemoryConfig {
    fn default() -> Self {
        Self {
            visibility_timeout_ms: 30_000,
            dedup_window_ms: 5 * 60 * 1_000,
            max_batch_size: 10,
            max_message_size: 256 * 1024,
            auto_create_queues: true,
        }
    }
}

/// Transport operation a fault can be attached to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Send,
    Receive,
    Delete,
}

/// Injected failure, consumed by the next call of its operation
#[derive(Debug, Clone)]
pub enum Fault {
    /// The call fails and has no effect
    Fail(TransportError),
    /// The call takes effect but the caller sees an error, as when the
    /// service's response is lost
    FailAfterCommit(TransportError),
}

/// Record of one `send` call, successful or not
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendCall {
    pub destination: String,
    pub partition_key: Option<String>,
    pub body: String,
    pub dedup_key: String,
}

// ============================================================================
// Internal Storage Structures
// ============================================================================

#[derive(Clone)]
struct StoredMessage {
    sequence: u64,
    id: MessageId,
    body: String,
    partition_key: Option<PartitionKey>,
    receive_count: u32,
}

struct InFlightMessage {
    message: StoredMessage,
    visible_at: Instant,
}

#[derive(Default)]
struct QueueState {
    ready: VecDeque<StoredMessage>,
    in_flight: HashMap<String, InFlightMessage>,
    dedup: HashMap<String, (MessageId, Instant)>,
}

impl QueueState {
    /// Move messages whose visibility timeout elapsed back to `ready`,
    /// preserving send order
    fn release_expired(&mut self, now: Instant) {
        let expired: Vec<String> = self
            .in_flight
            .iter()
            .filter(|(_, entry)| entry.visible_at <= now)
            .map(|(receipt, _)| receipt.clone())
            .collect();

        for receipt in expired {
            if let Some(entry) = self.in_flight.remove(&receipt) {
                let position = self
                    .ready
                    .iter()
                    .position(|m| m.sequence > entry.message.sequence)
                    .unwrap_or(self.ready.len());
                self.ready.insert(position, entry.message);
            }
        }
    }
}

#[derive(Default)]
struct Storage {
    queues: HashMap<String, QueueState>,
    next_sequence: u64,
    faults: HashMap<Operation, VecDeque<Fault>>,
    send_calls: Vec<SendCall>,
    delete_calls: Vec<String>,
    receive_calls: usize,
}

impl Storage {
    fn take_fault(&mut self, operation: Operation) -> Option<Fault> {
        self.faults.get_mut(&operation).and_then(VecDeque::pop_front)
    }
}

// ============================================================================
// InMemoryTransport
// ============================================================================

/// In-memory queue transport
pub struct InMemoryTransport {
    storage: Mutex<Storage>,
    arrivals: Notify,
    config: InMemoryConfig,
}

impl InMemoryTransport {
    /// Create new in-memory transport with configuration
    pub fn new(config: InMemoryConfig) -> Self {
        Self {
            storage: Mutex::new(Storage::default()),
            arrivals: Notify::new(),
            config,
        }
    }

    /// Create a queue explicitly; a no-op if it already exists
    pub fn create_queue(&self, destination: &Destination) {
        self.lock()
            .queues
            .entry(destination.queue_name().to_string())
            .or_default();
    }

    /// Queue a fault for the next call of `operation`
    pub fn inject_fault(&self, operation: Operation, fault: Fault) {
        self.lock()
            .faults
            .entry(operation)
            .or_default()
            .push_back(fault);
    }

    /// Messages available for receive, including ones whose visibility
    /// timeout has elapsed
    pub fn queue_depth(&self, destination: &Destination) -> usize {
        let mut storage = self.lock();
        match storage.queues.get_mut(destination.queue_name()) {
            Some(queue) => {
                queue.release_expired(Instant::now());
                queue.ready.len()
            }
            None => 0,
        }
    }

    /// Messages received but neither deleted nor returned to the queue
    pub fn in_flight_count(&self, destination: &Destination) -> usize {
        let mut storage = self.lock();
        match storage.queues.get_mut(destination.queue_name()) {
            Some(queue) => {
                queue.release_expired(Instant::now());
                queue.in_flight.len()
            }
            None => 0,
        }
    }

    /// Every send call so far, in call order
    pub fn send_calls(&self) -> Vec<SendCall> {
        self.lock().send_calls.clone()
    }

    /// Dedup keys of every send call so far, in call order
    pub fn sent_dedup_keys(&self) -> Vec<String> {
        self.lock()
            .send_calls
            .iter()
            .map(|call| call.dedup_key.clone())
            .collect()
    }

    /// Receipt tokens of every delete call so far, in call order
    pub fn delete_calls(&self) -> Vec<String> {
        self.lock().delete_calls.clone()
    }

    /// Number of receive calls so far
    pub fn receive_calls(&self) -> usize {
        self.lock().receive_calls
    }

    fn lock(&self) -> MutexGuard<'_, Storage> {
        self.storage.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn queue_mut<'a>(
        &self,
        storage: &'a mut Storage,
        destination: &Destination,
    ) -> Result<&'a mut QueueState, TransportError> {
        let name = destination.queue_name();
        if self.config.auto_create_queues {
            return Ok(storage.queues.entry(name.to_string()).or_default());
        }

        storage.queues.get_mut(name).ok_or_else(|| {
            TransportError::permanent(
                "QueueDoesNotExist",
                format!("The specified queue does not exist: {}", name),
            )
        })
    }

    fn enqueue(
        &self,
        storage: &mut Storage,
        destination: &Destination,
        partition_key: Option<&PartitionKey>,
        body: &str,
        dedup_key: &DedupKey,
    ) -> Result<MessageId, TransportError> {
        if body.len() > self.config.max_message_size {
            return Err(TransportError::permanent(
                "InvalidParameterValue",
                format!(
                    "Message of {} bytes exceeds the {} byte limit",
                    body.len(),
                    self.config.max_message_size
                ),
            ));
        }
        if destination.is_fifo() && partition_key.is_none() {
            return Err(TransportError::permanent(
                "MissingParameter",
                "The request must contain the parameter MessageGroupId.",
            ));
        }

        let now = Instant::now();
        let window = Duration::from_millis(self.config.dedup_window_ms);
        let sequence = storage.next_sequence;
        let queue = self.queue_mut(storage, destination)?;

        if destination.is_fifo() {
            queue.dedup.retain(|_, (_, accepted_at)| *accepted_at + window > now);
            if let Some((id, _)) = queue.dedup.get(dedup_key.as_str()) {
                return Ok(id.clone());
            }
        }

        let id = MessageId::new();
        queue.ready.push_back(StoredMessage {
            sequence,
            id: id.clone(),
            body: body.to_string(),
            partition_key: partition_key.cloned(),
            receive_count: 0,
        });
        if destination.is_fifo() {
            queue
                .dedup
                .insert(dedup_key.as_str().to_string(), (id.clone(), now));
        }
        storage.next_sequence += 1;

        Ok(id)
    }

    fn take_batch(
        &self,
        storage: &mut Storage,
        destination: &Destination,
        batch_size: u32,
    ) -> Result<Vec<Message>, TransportError> {
        let now = Instant::now();
        let visibility = Duration::from_millis(self.config.visibility_timeout_ms);
        let limit = batch_size.min(self.config.max_batch_size) as usize;
        let queue = self.queue_mut(storage, destination)?;
        queue.release_expired(now);

        // A FIFO partition with a message in flight is blocked until that
        // message is deleted or becomes visible again.
        let blocked: HashSet<PartitionKey> = if destination.is_fifo() {
            queue
                .in_flight
                .values()
                .filter_map(|entry| entry.message.partition_key.clone())
                .collect()
        } else {
            HashSet::new()
        };

        let mut batch = Vec::new();
        let mut remaining = VecDeque::with_capacity(queue.ready.len());
        while let Some(mut stored) = queue.ready.pop_front() {
            let is_blocked = stored
                .partition_key
                .as_ref()
                .is_some_and(|key| blocked.contains(key));
            if batch.len() >= limit || is_blocked {
                remaining.push_back(stored);
                continue;
            }

            stored.receive_count += 1;
            let receipt = format!("{}#{}", destination.queue_name(), uuid::Uuid::new_v4());
            let mut message = Message::new(
                stored.id.clone(),
                stored.body.clone(),
                ReceiptToken::new(receipt.clone()),
            )
            .with_receive_count(stored.receive_count);
            if let Some(key) = &stored.partition_key {
                message = message.with_partition_key(key.clone());
            }

            queue.in_flight.insert(
                receipt,
                InFlightMessage {
                    message: stored,
                    visible_at: now + visibility,
                },
            );
            batch.push(message);
        }
        queue.ready = remaining;

        Ok(batch)
    }
}

impl Default for InMemoryTransport {
    fn default() -> Self {
        Self::new(InMemoryConfig::default())
    }
}

impl std::fmt::Debug for InMemoryTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryTransport")
            .field("config", &self.config)
            .finish()
    }
}

#[async_trait]
impl QueueTransport for InMemoryTransport {
    async fn send(
        &self,
        destination: &Destination,
        partition_key: Option<&PartitionKey>,
        body: &str,
        dedup_key: &DedupKey,
    ) -> Result<MessageId, TransportError> {
        let result = {
            let mut storage = self.lock();
            storage.send_calls.push(SendCall {
                destination: destination.to_string(),
                partition_key: partition_key.map(|k| k.to_string()),
                body: body.to_string(),
                dedup_key: dedup_key.to_string(),
            });

            match storage.take_fault(Operation::Send) {
                Some(Fault::Fail(error)) => Err(error),
                Some(Fault::FailAfterCommit(error)) => self
                    .enqueue(&mut storage, destination, partition_key, body, dedup_key)
                    .and(Err(error)),
                None => self.enqueue(&mut storage, destination, partition_key, body, dedup_key),
            }
        };

        self.arrivals.notify_waiters();
        result
    }

    async fn receive(
        &self,
        destination: &Destination,
        batch_size: u32,
        wait: Duration,
    ) -> Result<Vec<Message>, TransportError> {
        let deadline = Instant::now() + wait;
        {
            let mut storage = self.lock();
            storage.receive_calls += 1;
            match storage.take_fault(Operation::Receive) {
                Some(Fault::Fail(error)) => return Err(error),
                Some(Fault::FailAfterCommit(error)) => {
                    self.take_batch(&mut storage, destination, batch_size)?;
                    return Err(error);
                }
                None => {}
            }
        }

        loop {
            // Register interest before checking so a send landing in between
            // is not missed.
            let notified = self.arrivals.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let batch = {
                let mut storage = self.lock();
                self.take_batch(&mut storage, destination, batch_size)?
            };
            if !batch.is_empty() || Instant::now() >= deadline {
                return Ok(batch);
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                let mut storage = self.lock();
                return self.take_batch(&mut storage, destination, batch_size);
            }
        }
    }

    async fn delete(
        &self,
        destination: &Destination,
        receipt_token: &ReceiptToken,
    ) -> Result<(), TransportError> {
        let mut storage = self.lock();
        storage
            .delete_calls
            .push(receipt_token.as_str().to_string());

        let commit_error = match storage.take_fault(Operation::Delete) {
            Some(Fault::Fail(error)) => return Err(error),
            Some(Fault::FailAfterCommit(error)) => Some(error),
            None => None,
        };

        let queue = self.queue_mut(&mut storage, destination)?;
        queue.release_expired(Instant::now());
        if queue.in_flight.remove(receipt_token.as_str()).is_none() {
            return Err(TransportError::permanent(
                "ReceiptHandleIsInvalid",
                format!("The receipt handle is not valid: {:?}", receipt_token),
            ));
        }

        match commit_error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn max_batch_size(&self) -> u32 {
        self.config.max_batch_size
    }

    fn max_message_size(&self) -> usize {
        self.config.max_message_size
    }

    fn name(&self) -> &'static str {
        "in-memory"
    }
}
