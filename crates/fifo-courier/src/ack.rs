//! Acknowledgment bookkeeping for received messages.
//!
//! Every pulled message gets an [`AckRecord`] in the `Pending` state. The
//! record resolves exactly once: to `Acked` after the queue confirms the
//! delete, or to `Failed` when the handler or the delete fails. A second
//! resolution is a caller bug and is refused with [`InvalidStateError`].

use crate::error::InvalidStateError;
use crate::message::{Message, MessageId, ReceiptToken};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

/// Resolution state of a received message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    Pending,
    Acked,
    Failed,
}

impl std::fmt::Display for AckOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Acked => write!(f, "Acked"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// Handle to one tracked message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckRecord {
    sequence: u64,
    message_id: MessageId,
    receipt_token: ReceiptToken,
}

impl AckRecord {
    pub fn message_id(&self) -> &MessageId {
        &self.message_id
    }

    pub fn receipt_token(&self) -> &ReceiptToken {
        &self.receipt_token
    }
}

/// Counts of records per outcome
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AckCounts {
    pub pending: usize,
    pub acked: usize,
    pub failed: usize,
}

/// Thread-safe tracker of [`AckRecord`] outcomes.
///
/// Records are keyed by an internal sequence number rather than the message
/// id, so a message redelivered within the same batch is tracked twice.
#[derive(Debug, Default)]
pub struct AckTracker {
    next_sequence: AtomicU64,
    outcomes: Mutex<HashMap<u64, AckOutcome>>,
}

impl AckTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a received message in the `Pending` state
    pub fn track(&self, message: &Message) -> AckRecord {
        let sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed);
        self.lock().insert(sequence, AckOutcome::Pending);

        AckRecord {
            sequence,
            message_id: message.id.clone(),
            receipt_token: message.receipt_token.clone(),
        }
    }

    /// Record that the message was deleted from the queue
    pub fn mark_acked(&self, record: &AckRecord) -> Result<(), InvalidStateError> {
        self.transition(record, AckOutcome::Acked)
    }

    /// Record that the message must stay on the queue for redelivery
    pub fn mark_failed(&self, record: &AckRecord) -> Result<(), InvalidStateError> {
        self.transition(record, AckOutcome::Failed)
    }

    /// Current outcome of a record, `None` if this tracker never issued it
    pub fn outcome(&self, record: &AckRecord) -> Option<AckOutcome> {
        self.lock().get(&record.sequence).copied()
    }

    /// Number of records still waiting for resolution
    pub fn pending(&self) -> usize {
        self.counts().pending
    }

    pub fn counts(&self) -> AckCounts {
        let outcomes = self.lock();
        let mut counts = AckCounts::default();
        for outcome in outcomes.values() {
            match outcome {
                AckOutcome::Pending => counts.pending += 1,
                AckOutcome::Acked => counts.acked += 1,
                AckOutcome::Failed => counts.failed += 1,
            }
        }
        counts
    }

    fn transition(&self, record: &AckRecord, to: AckOutcome) -> Result<(), InvalidStateError> {
        let mut outcomes = self.lock();
        match outcomes.get_mut(&record.sequence) {
            Some(current @ AckOutcome::Pending) => {
                *current = to;
                Ok(())
            }
            Some(current) => Err(InvalidStateError::AlreadyResolved {
                message_id: record.message_id.to_string(),
                current: current.to_string(),
            }),
            None => Err(InvalidStateError::UnknownRecord {
                message_id: record.message_id.to_string(),
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<u64, AckOutcome>> {
        // Outcomes stay consistent under poisoning: every mutation is a single
        // assignment.
        self.outcomes.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
#[path = "ack_tests.rs"]
mod tests;
