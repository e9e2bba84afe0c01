//! Message types and core domain identifiers.

use crate::error::ValidationError;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Maximum length of an SQS queue name, including the `.fifo` suffix
const MAX_QUEUE_NAME_LENGTH: usize = 80;

/// Suffix marking a queue that enforces grouped, ordered delivery
const FIFO_SUFFIX: &str = ".fifo";

// ============================================================================
// Core Domain Identifiers
// ============================================================================

/// Validated queue destination: either a bare queue name or a full queue URL
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Destination(String);

impl Destination {
    /// Create new destination with validation
    pub fn new(destination: String) -> Result<Self, ValidationError> {
        if destination.is_empty() {
            return Err(ValidationError::Required {
                field: "destination".to_string(),
            });
        }

        if destination.starts_with("http://") || destination.starts_with("https://") {
            let url = url::Url::parse(&destination).map_err(|e| ValidationError::InvalidFormat {
                field: "destination".to_string(),
                message: format!("invalid queue URL: {}", e),
            })?;
            let name = url
                .path_segments()
                .and_then(|mut segments| segments.next_back())
                .unwrap_or_default();
            validate_queue_name(name)?;
            return Ok(Self(destination));
        }

        validate_queue_name(&destination)?;
        Ok(Self(destination))
    }

    /// Queue name portion of the destination
    pub fn queue_name(&self) -> &str {
        if self.is_url() {
            self.0.rsplit('/').next().unwrap_or(&self.0)
        } else {
            &self.0
        }
    }

    /// Whether the destination is a full queue URL rather than a name
    pub fn is_url(&self) -> bool {
        self.0.starts_with("http://") || self.0.starts_with("https://")
    }

    /// Whether the queue enforces ordered delivery within partitions
    pub fn is_fifo(&self) -> bool {
        self.queue_name().ends_with(FIFO_SUFFIX)
    }

    /// Get destination as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn validate_queue_name(name: &str) -> Result<(), ValidationError> {
    if name.is_empty() || name.len() > MAX_QUEUE_NAME_LENGTH {
        return Err(ValidationError::OutOfRange {
            field: "queue_name".to_string(),
            message: format!("must be 1-{} characters", MAX_QUEUE_NAME_LENGTH),
        });
    }

    let base = name.strip_suffix(FIFO_SUFFIX).unwrap_or(name);
    if base.is_empty()
        || !base
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ValidationError::InvalidFormat {
            field: "queue_name".to_string(),
            message: "only ASCII alphanumeric, hyphens, underscores and a '.fifo' suffix allowed"
                .to_string(),
        });
    }

    Ok(())
}

impl std::fmt::Display for Destination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Destination {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string())
    }
}

/// Identifier assigned to a message by the queue service
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(String);

impl MessageId {
    /// Generate new random message ID
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Get message ID as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MessageId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(ValidationError::Required {
                field: "message_id".to_string(),
            });
        }

        Ok(Self(s.to_string()))
    }
}

/// Grouping key for ordered delivery (the SQS message group)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartitionKey(String);

impl PartitionKey {
    /// Create new partition key with validation
    pub fn new(key: String) -> Result<Self, ValidationError> {
        if key.is_empty() {
            return Err(ValidationError::Required {
                field: "partition_key".to_string(),
            });
        }

        if key.len() > 128 {
            return Err(ValidationError::OutOfRange {
                field: "partition_key".to_string(),
                message: "maximum 128 characters".to_string(),
            });
        }

        if !key.chars().all(|c| c.is_ascii_graphic()) {
            return Err(ValidationError::InvalidFormat {
                field: "partition_key".to_string(),
                message: "only ASCII alphanumeric and punctuation characters allowed".to_string(),
            });
        }

        Ok(Self(key))
    }

    /// Get partition key as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for PartitionKey {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string())
    }
}

/// Opaque token proving receipt of a message; required to delete it
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ReceiptToken(String);

impl ReceiptToken {
    /// Wrap a transport-issued token
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Get token as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// Receipt handles from SQS run to several hundred characters.
impl std::fmt::Debug for ReceiptToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let preview: String = self.0.chars().take(16).collect();
        if self.0.len() > preview.len() {
            write!(f, "ReceiptToken({}...)", preview)
        } else {
            write!(f, "ReceiptToken({})", preview)
        }
    }
}

// ============================================================================
// Message Types
// ============================================================================

/// A message to be sent through the queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub body: String,
    pub partition_key: Option<PartitionKey>,
    pub business_key: Option<String>,
}

impl OutboundMessage {
    /// Create new message with body
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            partition_key: None,
            business_key: None,
        }
    }

    /// Set the partition (message group) for ordered delivery
    pub fn with_partition_key(mut self, partition_key: PartitionKey) -> Self {
        self.partition_key = Some(partition_key);
        self
    }

    /// Set a stable business key so re-sends of the same logical message are
    /// deduplicated by the queue
    pub fn with_business_key(mut self, business_key: impl Into<String>) -> Self {
        self.business_key = Some(business_key.into());
        self
    }
}

/// A message received from the queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub body: String,
    pub receipt_token: ReceiptToken,
    /// Approximate number of times the queue has handed this message out
    pub receive_count: u32,
    pub partition_key: Option<PartitionKey>,
}

impl Message {
    /// Create a received message on its first delivery
    pub fn new(id: MessageId, body: impl Into<String>, receipt_token: ReceiptToken) -> Self {
        Self {
            id,
            body: body.into(),
            receipt_token,
            receive_count: 1,
            partition_key: None,
        }
    }

    /// Set the receive count reported by the transport
    pub fn with_receive_count(mut self, receive_count: u32) -> Self {
        self.receive_count = receive_count;
        self
    }

    /// Set the partition the message was sent to
    pub fn with_partition_key(mut self, partition_key: PartitionKey) -> Self {
        self.partition_key = Some(partition_key);
        self
    }

    /// Whether the queue has delivered this message before
    pub fn is_redelivery(&self) -> bool {
        self.receive_count > 1
    }
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;
