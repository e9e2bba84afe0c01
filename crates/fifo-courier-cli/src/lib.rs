//! # FIFO Courier CLI
//!
//! Command-line interface for sending to and consuming from a FIFO queue.
//!
//! This module provides CLI commands for:
//! - Sending a single message with an optional group and business key
//! - Running a bounded or cancellable consume loop
//! - A send-then-consume demonstration round
//! - Configuration validation and display
//! - Shell completions

use async_trait::async_trait;
use clap::{CommandFactory, Parser, Subcommand};
use fifo_courier::{
    ConfigurationError, CourierConfig, Destination, HandlerError, Message, MessageHandler,
    OutboundMessage, PartitionKey, PollError, PollLoop, PollSummary, Producer, SendError,
    ValidationError,
};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// ============================================================================
// CLI Structure
// ============================================================================

/// FIFO Courier CLI - reliable sends and at-least-once consumption
#[derive(Parser)]
#[command(name = "courier")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Send to and consume from FIFO message queues")]
#[command(
    long_about = "Sends messages with deduplication keys and consumes them with explicit acknowledgment"
)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "COURIER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Logging level, used when RUST_LOG is not set
    #[arg(short, long, default_value = "info")]
    pub log_level: String,

    /// Enable JSON logging
    #[arg(long)]
    pub json_logs: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Send one message
    Send {
        /// Queue name or URL
        #[arg(short, long)]
        queue: String,

        /// Message group; required for `.fifo` queues
        #[arg(short, long)]
        group: Option<String>,

        /// Message body
        #[arg(short, long)]
        body: String,

        /// Stable key making retried sends idempotent
        #[arg(long)]
        business_key: Option<String>,
    },

    /// Consume messages, logging and acknowledging each one
    Consume {
        /// Queue name or URL
        #[arg(short, long)]
        queue: String,

        /// Stop after this many poll cycles
        #[arg(short, long)]
        max_cycles: Option<u64>,
    },

    /// Send one generated user record, then consume
    Demo {
        /// Queue name or URL
        #[arg(short, long)]
        queue: String,

        /// Message group; a fresh one is generated when omitted
        #[arg(short, long)]
        group: Option<String>,

        /// Poll cycles to run after sending
        #[arg(short, long, default_value = "4")]
        max_cycles: u64,
    },

    /// Validate configuration
    Config {
        /// Show resolved configuration
        #[arg(short, long)]
        show: bool,

        /// Output format for configuration
        #[arg(short = 'f', long, default_value = "yaml")]
        format: ConfigFormat,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

/// Configuration format options
#[derive(Clone, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum ConfigFormat {
    /// YAML format
    Yaml,
    /// JSON format
    Json,
    /// TOML format
    Toml,
}

// ============================================================================
// CLI Error Types
// ============================================================================

/// CLI-specific errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Send failed: {0}")]
    Send(#[from] SendError),

    #[error("Consume failed: {0}")]
    Poll(#[from] PollError),

    #[error("Invalid argument: {arg} - {message}")]
    InvalidArgument { arg: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization failed: {message}")]
    Serialization { message: String },
}

impl CliError {
    /// Process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Configuration(_) => 1,
            Self::Send(_) => 2,
            Self::Poll(_) => 3,
            Self::InvalidArgument { .. } => 4,
            Self::Io(_) => 5,
            Self::Serialization { .. } => 6,
        }
    }

    fn invalid(arg: &str, error: ValidationError) -> Self {
        Self::InvalidArgument {
            arg: arg.to_string(),
            message: error.to_string(),
        }
    }
}

// ============================================================================
// Demo Payload
// ============================================================================

/// User record sent by the `demo` command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, serde::Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UserRecord {
    pub group_id: String,
    pub user_id: uuid::Uuid,
    pub user_name: String,
    pub age: u8,
}

impl UserRecord {
    /// Random user belonging to `group_id`, aged 18 to 99
    pub fn generate(group_id: &str) -> Self {
        use rand::Rng;

        Self {
            group_id: group_id.to_string(),
            user_id: uuid::Uuid::new_v4(),
            user_name: format!("User-{}", uuid::Uuid::new_v4()),
            age: rand::thread_rng().gen_range(18..100),
        }
    }
}

// ============================================================================
// Handler
// ============================================================================

/// Handler that logs each message and lets the loop acknowledge it
#[derive(Debug, Default)]
pub struct LoggingHandler;

#[async_trait]
impl MessageHandler for LoggingHandler {
    async fn handle(&self, message: &Message) -> Result<(), HandlerError> {
        info!(
            message_id = %message.id,
            receive_count = message.receive_count,
            body = %message.body,
            "Message received"
        );
        Ok(())
    }
}

// ============================================================================
// Main Entry Point
// ============================================================================

/// Main CLI entry point
pub async fn run_cli() -> Result<(), CliError> {
    let cli = Cli::parse();
    initialize_logging(&cli);
    execute(cli).await
}

/// Run a parsed command line
pub async fn execute(cli: Cli) -> Result<(), CliError> {
    let config = CourierConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Send {
            queue,
            group,
            body,
            business_key,
        } => execute_send_command(&config, &queue, group, body, business_key)
            .await
            .map(|_| ()),
        Commands::Consume { queue, max_cycles } => {
            let cancel = cancel_on_ctrl_c();
            let max_cycles = max_cycles.or(config.poll.max_cycles);
            execute_consume_command(&config, &queue, max_cycles, &cancel)
                .await
                .map(|_| ())
        }
        Commands::Demo {
            queue,
            group,
            max_cycles,
        } => {
            let cancel = cancel_on_ctrl_c();
            execute_demo_command(&config, &queue, group, max_cycles, &cancel)
                .await
                .map(|_| ())
        }
        Commands::Config { show, format } => {
            if show {
                println!("{}", render_config(&config, &format)?);
            } else {
                info!("Configuration is valid");
            }
            Ok(())
        }
        Commands::Completions { shell } => {
            let mut command = Cli::command();
            let name = command.get_name().to_string();
            clap_complete::generate(shell, &mut command, name, &mut std::io::stdout());
            Ok(())
        }
    }
}

/// Install the tracing subscriber: `RUST_LOG` when set, else `--log-level`
fn initialize_logging(cli: &Cli) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);
    let result = if cli.json_logs {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()
    };

    if let Err(e) = result {
        eprintln!("Logging already initialized: {}", e);
    }
}

/// Token cancelled on the first Ctrl-C
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current cycle");
            token.cancel();
        }
    });
    cancel
}

// ============================================================================
// Command Implementations
// ============================================================================

/// Send one message, printing its id
pub async fn execute_send_command(
    config: &CourierConfig,
    queue: &str,
    group: Option<String>,
    body: String,
    business_key: Option<String>,
) -> Result<fifo_courier::MessageId, CliError> {
    let destination =
        Destination::new(queue.to_string()).map_err(|e| CliError::invalid("queue", e))?;

    let mut message = OutboundMessage::new(body);
    if let Some(group) = group {
        let key = PartitionKey::new(group).map_err(|e| CliError::invalid("group", e))?;
        message = message.with_partition_key(key);
    }
    if let Some(business_key) = business_key {
        message = message.with_business_key(business_key);
    }

    let producer = Producer::new(config.transport.build()?);
    let message_id = producer.send(&destination, message).await?;

    println!("{}", message_id);
    Ok(message_id)
}

/// Consume until `max_cycles`, idle or `cancel`
pub async fn execute_consume_command(
    config: &CourierConfig,
    queue: &str,
    max_cycles: Option<u64>,
    cancel: &CancellationToken,
) -> Result<PollSummary, CliError> {
    let destination =
        Destination::new(queue.to_string()).map_err(|e| CliError::invalid("queue", e))?;

    let poll_loop = PollLoop::new(config.transport.build()?, config.poll.clone())
        .with_backoff(config.backoff_policy());
    let summary = poll_loop
        .run_until_cancelled(&destination, &LoggingHandler, max_cycles, cancel)
        .await?;

    report_summary(&summary);
    Ok(summary)
}

/// Send a generated user record, then consume for `max_cycles` cycles or
/// until `cancel`.
///
/// Both halves share one transport so the in-memory backend sees its own
/// message.
pub async fn execute_demo_command(
    config: &CourierConfig,
    queue: &str,
    group: Option<String>,
    max_cycles: u64,
    cancel: &CancellationToken,
) -> Result<PollSummary, CliError> {
    let destination =
        Destination::new(queue.to_string()).map_err(|e| CliError::invalid("queue", e))?;
    let group = group.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let partition_key =
        PartitionKey::new(group.clone()).map_err(|e| CliError::invalid("group", e))?;

    let record = UserRecord::generate(&group);
    let body = serde_json::to_string(&record).map_err(|e| CliError::Serialization {
        message: e.to_string(),
    })?;

    let transport = config.transport.build()?;

    let message_id = Producer::new(transport.clone())
        .send(
            &destination,
            OutboundMessage::new(body).with_partition_key(partition_key),
        )
        .await?;
    info!(message_id = %message_id, group = %group, "Demo message sent");

    let summary = PollLoop::new(transport, config.poll.clone())
        .with_backoff(config.backoff_policy())
        .run_until_cancelled(&destination, &LoggingHandler, Some(max_cycles), cancel)
        .await?;

    report_summary(&summary);
    Ok(summary)
}

fn report_summary(summary: &PollSummary) {
    info!(
        cycles = summary.cycles_run,
        received = summary.messages_received,
        acked = summary.messages_acked,
        failed = summary.messages_failed,
        ack_failures = summary.ack_failures,
        "Consume finished"
    );
}

/// Render the resolved configuration with credentials masked
pub fn render_config(config: &CourierConfig, format: &ConfigFormat) -> Result<String, CliError> {
    let mut config = config.clone();
    let sqs = &mut config.transport.sqs;
    for secret in [&mut sqs.secret_access_key, &mut sqs.session_token] {
        if secret.is_some() {
            *secret = Some("***".to_string());
        }
    }

    let rendered = match format {
        ConfigFormat::Yaml => serde_yaml::to_string(&config).map_err(|e| e.to_string()),
        ConfigFormat::Json => serde_json::to_string_pretty(&config).map_err(|e| e.to_string()),
        ConfigFormat::Toml => toml::to_string_pretty(&config).map_err(|e| e.to_string()),
    };

    rendered.map_err(|message| CliError::Serialization { message })
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
