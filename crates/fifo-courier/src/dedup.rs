//! Deduplication keys for idempotent sends.
//!
//! FIFO queues drop a message whose deduplication key matches one accepted
//! within the dedup window. Deriving the key from a stable business key makes
//! a re-send of the same logical message harmless; omitting the business key
//! yields a fresh random key so every call is a distinct message.

use sha2::{Digest, Sha256};

/// Token the transport uses to suppress duplicate sends
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupKey(String);

impl DedupKey {
    /// Get key as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DedupKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Generates [`DedupKey`]s, deterministically for business keys and randomly
/// otherwise
#[derive(Debug, Clone, Default)]
pub struct DedupKeyGenerator {
    namespace: String,
}

impl DedupKeyGenerator {
    /// Generator with no namespace
    pub fn new() -> Self {
        Self::default()
    }

    /// Generator whose derived keys are scoped to `namespace`, so producers
    /// sharing a queue cannot collide on equal business keys
    pub fn with_namespace(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    /// Produce the key for one send attempt.
    ///
    /// The derived form is the hex SHA-256 of the namespaced business key:
    /// 64 characters, inside the 128 character SQS limit regardless of the
    /// business key's length or alphabet.
    pub fn generate(&self, business_key: Option<&str>) -> DedupKey {
        match business_key {
            Some(key) => {
                let mut hasher = Sha256::new();
                hasher.update(self.namespace.as_bytes());
                // Separator keeps ("ab", "c") and ("a", "bc") apart.
                hasher.update([0u8]);
                hasher.update(key.as_bytes());
                DedupKey(hex::encode(hasher.finalize()))
            }
            None => DedupKey(uuid::Uuid::new_v4().simple().to_string()),
        }
    }
}

#[cfg(test)]
#[path = "dedup_tests.rs"]
mod tests;
