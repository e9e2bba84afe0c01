//! Queue transport implementations.
//!
//! This module contains concrete implementations of the `QueueTransport`
//! trait for different queue backends.

pub mod memory;
pub mod sqs;

pub use memory::{Fault, InMemoryConfig, InMemoryTransport, Operation, SendCall};
pub use sqs::{SqsConfig, SqsCredentials, SqsTransport};
