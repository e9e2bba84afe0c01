//! # Poll Loop Module
//!
//! Bounded at-least-once consumption: each cycle receives a batch, hands every
//! message to a caller-supplied [`MessageHandler`], and deletes only the
//! messages whose handler succeeded.
//!
//! ## Cycle
//!
//! ```text
//! Idle -> Polling -> Empty ------------------------> (idle wait) -> Idle
//!                 -> Processing -> Acking ----------------------> Idle
//!                 -> transient failure ------> (transient wait) -> Idle
//!                 -> permanent failure -> stop with PollError::Fatal
//! ```
//!
//! A failed handler leaves its message on the queue; the visibility timeout
//! is the only retry path. A failed delete is logged and the message will be
//! redelivered, so handlers must be idempotent.
//!
//! ## Termination
//!
//! - after `max_cycles` cycles when a bound is given (empty cycles count)
//! - after `max_idle_cycles` consecutive empty cycles when unbounded
//! - on cancellation, observed between cycles and during waits, never inside
//!   a cycle

use crate::ack::{AckRecord, AckTracker};
use crate::backoff::{BackoffKind, BackoffPolicy};
use crate::error::{ConfigurationError, HandlerError, PollError};
use crate::events::{CourierEvent, EventKind, EventLevel, EventSink, TracingSink};
use crate::message::{Destination, Message};
use crate::transport::QueueTransport;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Longest long-poll wait the queue service accepts
pub const MAX_WAIT_SECONDS: u64 = 20;

// ============================================================================
// Handler
// ============================================================================

/// Processes one received message.
///
/// Returning `Ok` allows the poll loop to delete the message. Returning `Err`
/// leaves it on the queue for redelivery. Handlers may see the same message
/// more than once and must be idempotent.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: &Message) -> Result<(), HandlerError>;
}

/// [`MessageHandler`] backed by an async closure taking an owned message
pub struct HandlerFn<F> {
    f: F,
}

/// Wrap an async closure as a [`MessageHandler`]
///
/// # Examples
///
/// ```rust
/// use fifo_courier::consumer::handler_fn;
/// use fifo_courier::{HandlerError, Message};
///
/// let handler = handler_fn(|message: Message| async move {
///     if message.body.is_empty() {
///         return Err(HandlerError::msg("empty body"));
///     }
///     Ok(())
/// });
/// # let _ = handler;
/// ```
pub fn handler_fn<F, Fut>(f: F) -> HandlerFn<F>
where
    F: Fn(Message) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send,
{
    HandlerFn { f }
}

#[async_trait]
impl<F, Fut> MessageHandler for HandlerFn<F>
where
    F: Fn(Message) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send,
{
    async fn handle(&self, message: &Message) -> Result<(), HandlerError> {
        (self.f)(message.clone()).await
    }
}

// ============================================================================
// Configuration and Summary
// ============================================================================

/// Poll loop configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    /// Messages requested per receive, clamped to the transport's limit
    pub batch_size: u32,
    /// Long-poll wait per receive
    pub wait_seconds: u64,
    /// Cycle bound; `None` runs until idle or cancelled
    pub max_cycles: Option<u64>,
    /// Consecutive empty cycles that end an unbounded run
    pub max_idle_cycles: u32,
    /// Handlers allowed in flight at once within one batch
    pub handler_concurrency: usize,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            wait_seconds: 10,
            max_cycles: None,
            max_idle_cycles: 2,
            handler_concurrency: 1,
        }
    }
}

impl PollConfig {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.batch_size == 0 {
            return Err(ConfigurationError::Invalid {
                message: "poll.batch_size must be at least 1".to_string(),
            });
        }
        if self.wait_seconds > MAX_WAIT_SECONDS {
            return Err(ConfigurationError::Invalid {
                message: format!(
                    "poll.wait_seconds must be at most {}, got {}",
                    MAX_WAIT_SECONDS, self.wait_seconds
                ),
            });
        }
        if self.max_idle_cycles == 0 {
            return Err(ConfigurationError::Invalid {
                message: "poll.max_idle_cycles must be at least 1".to_string(),
            });
        }
        if self.handler_concurrency == 0 {
            return Err(ConfigurationError::Invalid {
                message: "poll.handler_concurrency must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// Totals for one poll loop run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PollSummary {
    pub cycles_run: u64,
    pub messages_received: u64,
    pub messages_acked: u64,
    /// Messages whose handler failed
    pub messages_failed: u64,
    /// Deletes that failed after a successful handler
    pub ack_failures: u64,
}

/// One receive-process-acknowledge iteration
struct PollCycle {
    index: u64,
    batch: Vec<Message>,
}

#[derive(Default)]
struct CycleOutcome {
    acked: u64,
    failed: u64,
    ack_failures: u64,
    transient_ack_failure: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopReason {
    MaxCycles,
    Idle,
    Cancelled,
}

impl StopReason {
    fn as_str(self) -> &'static str {
        match self {
            Self::MaxCycles => "max_cycles",
            Self::Idle => "idle",
            Self::Cancelled => "cancelled",
        }
    }
}

// ============================================================================
// Poll Loop
// ============================================================================

/// Drives receive, process and acknowledge cycles against one destination.
pub struct PollLoop {
    transport: Arc<dyn QueueTransport>,
    config: PollConfig,
    backoff: BackoffPolicy,
    sink: Arc<dyn EventSink>,
}

impl PollLoop {
    /// Poll loop with the default backoff policy that logs through `tracing`
    pub fn new(transport: Arc<dyn QueueTransport>, config: PollConfig) -> Self {
        Self {
            transport,
            config,
            backoff: BackoffPolicy::default(),
            sink: Arc::new(TracingSink),
        }
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn config(&self) -> &PollConfig {
        &self.config
    }

    /// Run until `max_cycles` cycles complete, or until idle when unbounded.
    pub async fn run(
        &self,
        destination: &Destination,
        handler: &dyn MessageHandler,
        max_cycles: Option<u64>,
    ) -> Result<PollSummary, PollError> {
        self.run_until_cancelled(destination, handler, max_cycles, &CancellationToken::new())
            .await
    }

    /// Like [`PollLoop::run`], also stopping when `cancel` fires.
    ///
    /// A cycle in progress when `cancel` fires finishes, acknowledgments
    /// included, before the loop returns.
    pub async fn run_until_cancelled(
        &self,
        destination: &Destination,
        handler: &dyn MessageHandler,
        max_cycles: Option<u64>,
        cancel: &CancellationToken,
    ) -> Result<PollSummary, PollError> {
        let batch_size = self
            .config
            .batch_size
            .clamp(1, self.transport.max_batch_size().max(1));
        let wait = Duration::from_secs(self.config.wait_seconds.min(MAX_WAIT_SECONDS));

        let mut summary = PollSummary::default();
        let mut idle_streak: u32 = 0;
        let mut transient_attempt: u32 = 0;

        let reason = loop {
            if max_cycles.is_some_and(|max| summary.cycles_run >= max) {
                break StopReason::MaxCycles;
            }
            if cancel.is_cancelled() {
                break StopReason::Cancelled;
            }

            let index = summary.cycles_run;
            tracing::debug!(cycle = index, destination = %destination, "Starting poll cycle");
            let received = self.transport.receive(destination, batch_size, wait).await;
            summary.cycles_run += 1;

            let delay = match received {
                Err(error) if error.is_transient() => {
                    let delay = self.backoff.next_delay(transient_attempt, BackoffKind::Transient);
                    self.sink.emit(
                        CourierEvent::new(
                            EventLevel::Warn,
                            EventKind::TransientFailure,
                            "Receive failed transiently",
                        )
                        .with_field("destination", destination)
                        .with_field("cycle", index)
                        .with_field("attempt", transient_attempt)
                        .with_field("delay_ms", delay.as_millis())
                        .with_field("error", &error),
                    );
                    transient_attempt = transient_attempt.saturating_add(1);
                    idle_streak = 0;
                    delay
                }
                Err(error) => {
                    self.sink.emit(
                        CourierEvent::new(
                            EventLevel::Error,
                            EventKind::LoopTerminated,
                            "Poll loop stopped on permanent failure",
                        )
                        .with_field("destination", destination)
                        .with_field("reason", "fatal")
                        .with_field("cycles_run", summary.cycles_run)
                        .with_field("error", &error),
                    );
                    return Err(PollError::Fatal {
                        source: error,
                        summary,
                    });
                }
                Ok(batch) if batch.is_empty() => {
                    transient_attempt = 0;
                    idle_streak += 1;
                    if max_cycles.is_none() && idle_streak >= self.config.max_idle_cycles {
                        break StopReason::Idle;
                    }
                    self.backoff.next_delay(0, BackoffKind::Idle)
                }
                Ok(batch) => {
                    idle_streak = 0;
                    summary.messages_received += batch.len() as u64;

                    let outcome = self
                        .process(destination, handler, PollCycle { index, batch })
                        .await;
                    summary.messages_acked += outcome.acked;
                    summary.messages_failed += outcome.failed;
                    summary.ack_failures += outcome.ack_failures;

                    if outcome.transient_ack_failure {
                        let delay =
                            self.backoff.next_delay(transient_attempt, BackoffKind::Transient);
                        transient_attempt = transient_attempt.saturating_add(1);
                        delay
                    } else {
                        transient_attempt = 0;
                        Duration::ZERO
                    }
                }
            };

            if max_cycles.is_some_and(|max| summary.cycles_run >= max) {
                break StopReason::MaxCycles;
            }
            if !delay.is_zero() {
                tokio::select! {
                    _ = cancel.cancelled() => break StopReason::Cancelled,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        };

        self.sink.emit(
            CourierEvent::new(EventLevel::Info, EventKind::LoopTerminated, "Poll loop finished")
                .with_field("destination", destination)
                .with_field("reason", reason.as_str())
                .with_field("cycles_run", summary.cycles_run)
                .with_field("messages_received", summary.messages_received)
                .with_field("messages_acked", summary.messages_acked)
                .with_field("messages_failed", summary.messages_failed)
                .with_field("ack_failures", summary.ack_failures),
        );

        Ok(summary)
    }

    /// Processing and Acking for one non-empty batch
    async fn process(
        &self,
        destination: &Destination,
        handler: &dyn MessageHandler,
        cycle: PollCycle,
    ) -> CycleOutcome {
        let tracker = AckTracker::new();
        let records: Vec<AckRecord> = cycle
            .batch
            .iter()
            .map(|message| {
                self.sink.emit(
                    CourierEvent::new(
                        EventLevel::Debug,
                        EventKind::MessageReceived,
                        "Message received",
                    )
                    .with_field("cycle", cycle.index)
                    .with_field("message_id", &message.id)
                    .with_field("receive_count", message.receive_count),
                );
                tracker.track(message)
            })
            .collect();

        // Results come back in receive order regardless of concurrency.
        let results: Vec<Result<(), HandlerError>> = stream::iter(
            cycle.batch.iter().map(|message| handler.handle(message)),
        )
        .buffered(self.config.handler_concurrency.max(1))
        .collect()
        .await;

        let mut outcome = CycleOutcome::default();
        for ((message, record), result) in cycle.batch.iter().zip(&records).zip(results) {
            if let Err(error) = result {
                self.sink.emit(
                    CourierEvent::new(EventLevel::Warn, EventKind::HandlerFailed, "Handler failed")
                        .with_field("cycle", cycle.index)
                        .with_field("message_id", &message.id)
                        .with_field("receive_count", message.receive_count)
                        .with_field("error", &error),
                );
                resolve(&tracker, record, false);
                outcome.failed += 1;
                continue;
            }

            match self.transport.delete(destination, record.receipt_token()).await {
                Ok(()) => {
                    self.sink.emit(
                        CourierEvent::new(
                            EventLevel::Info,
                            EventKind::MessageAcked,
                            "Message acknowledged",
                        )
                        .with_field("cycle", cycle.index)
                        .with_field("message_id", &message.id),
                    );
                    resolve(&tracker, record, true);
                    outcome.acked += 1;
                }
                Err(error) => {
                    self.sink.emit(
                        CourierEvent::new(
                            EventLevel::Warn,
                            EventKind::AckFailed,
                            "Acknowledgment failed",
                        )
                        .with_field("cycle", cycle.index)
                        .with_field("message_id", &message.id)
                        .with_field("transient", error.is_transient())
                        .with_field("error", &error),
                    );
                    resolve(&tracker, record, false);
                    outcome.ack_failures += 1;
                    outcome.transient_ack_failure |= error.is_transient();
                }
            }
        }

        debug_assert_eq!(tracker.pending(), 0);
        outcome
    }
}

/// Resolve a record issued by this cycle's tracker
fn resolve(tracker: &AckTracker, record: &AckRecord, acked: bool) {
    let result = if acked {
        tracker.mark_acked(record)
    } else {
        tracker.mark_failed(record)
    };
    if let Err(error) = result {
        tracing::error!(error = %error, "Acknowledgment record resolved twice");
    }
}

impl std::fmt::Debug for PollLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollLoop")
            .field("transport", &self.transport.name())
            .field("config", &self.config)
            .field("backoff", &self.backoff)
            .finish()
    }
}

#[cfg(test)]
#[path = "consumer_tests.rs"]
mod tests;
