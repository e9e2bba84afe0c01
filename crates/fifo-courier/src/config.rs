//! Courier configuration.
//!
//! Sources, later overriding earlier:
//!  1. Built-in defaults (every field carries a serde default)
//!  2. An optional file (TOML, YAML or JSON, chosen by extension)
//!  3. Environment variables prefixed `COURIER__` with `__` separators,
//!     e.g. `COURIER__POLL__BATCH_SIZE=5` sets `poll.batch_size = 5`

use crate::backoff::{BackoffConfig, BackoffPolicy};
use crate::consumer::PollConfig;
use crate::error::ConfigurationError;
use crate::providers::memory::{InMemoryConfig, InMemoryTransport};
use crate::providers::sqs::{SqsConfig, SqsTransport};
use crate::transport::QueueTransport;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// Environment variable prefix for configuration overrides
pub const ENV_PREFIX: &str = "COURIER";

/// Which queue backend to use
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    #[default]
    Sqs,
    InMemory,
}

/// Transport selection and per-backend settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub kind: TransportKind,
    pub sqs: SqsConfig,
    pub in_memory: InMemoryConfig,
}

impl TransportConfig {
    /// Create the configured transport
    pub fn build(&self) -> Result<Arc<dyn QueueTransport>, ConfigurationError> {
        let transport: Arc<dyn QueueTransport> = match self.kind {
            TransportKind::Sqs => Arc::new(SqsTransport::new(self.sqs.clone())?),
            TransportKind::InMemory => Arc::new(InMemoryTransport::new(self.in_memory.clone())),
        };
        tracing::debug!(transport = transport.name(), "Created queue transport");
        Ok(transport)
    }
}

/// Complete configuration for a producer and poll loop
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CourierConfig {
    pub poll: PollConfig,
    pub backoff: BackoffConfig,
    pub transport: TransportConfig,
}

impl CourierConfig {
    /// Load from defaults, an optional file and the process environment.
    ///
    /// A missing file given explicitly is an error; so is a value that cannot
    /// be converted to its field's type.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigurationError> {
        Self::load_with_env(path, None)
    }

    /// Like [`CourierConfig::load`] with an explicit environment map in place
    /// of the process environment
    pub fn load_with_env(
        path: Option<&Path>,
        env: Option<HashMap<String, String>>,
    ) -> Result<Self, ConfigurationError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            if !path.exists() {
                return Err(ConfigurationError::Missing {
                    key: format!("configuration file {}", path.display()),
                });
            }
            tracing::info!(path = %path.display(), "Loading configuration file");
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let config = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .source(env),
            )
            .build()?;

        let courier: CourierConfig = config.try_deserialize()?;
        courier.validate()?;
        Ok(courier)
    }

    /// Reject values the poll loop or backoff policy cannot honor
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        self.poll.validate()?;

        if self.backoff.max_ms < self.backoff.base_ms {
            return Err(ConfigurationError::Invalid {
                message: format!(
                    "backoff.max_ms ({}) must not be below backoff.base_ms ({})",
                    self.backoff.max_ms, self.backoff.base_ms
                ),
            });
        }
        if !(0.0..=1.0).contains(&self.backoff.jitter_percent) {
            return Err(ConfigurationError::Invalid {
                message: format!(
                    "backoff.jitter_percent must be between 0.0 and 1.0, got {}",
                    self.backoff.jitter_percent
                ),
            });
        }

        Ok(())
    }

    /// Backoff policy described by the `backoff` section
    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy::from_config(&self.backoff)
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
