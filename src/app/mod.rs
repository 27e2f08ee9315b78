pub mod config;
pub mod logging;
pub mod shutdown;

pub use config::{Config, ConfigError, LogLevel};
pub use logging::{LoggingError, init_logging};
pub use shutdown::ShutdownHandle;

use crate::domain::{ErrorRecord, Transaction};
use crate::queue::{QueueError, QueueHandle};
use crate::sender::{HttpTransport, JsonSerializer, TransportConfig, TransportError};
use crate::worker::{Message, RequestMessage, Worker, WorkerConfig};
use anyhow::Context;
use bytes::Bytes;
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("Worker task panicked")]
    WorkerPanicked,
    #[error("Shutdown timeout")]
    ShutdownTimeout,
}

/// Producer-side handle to a running agent. Cheap to clone; instrumentation
/// code pushes through it from any task. Producers receive no delivery
/// acknowledgment; log output is the only failure signal.
#[derive(Debug, Clone)]
pub struct AgentHandle {
    control: QueueHandle<Message>,
    transactions: QueueHandle<Transaction>,
}

impl AgentHandle {
    /// Buffer a completed transaction trace for the next batched flush.
    pub fn record_transaction(&self, transaction: Transaction) -> Result<(), QueueError> {
        self.transactions.push(transaction)
    }

    /// Enqueue a captured error for relay to the collector.
    pub fn record_error(&self, record: ErrorRecord) -> Result<(), QueueError> {
        self.control.push(Message::Error(record))
    }

    /// Enqueue a prepared outbound request as-is.
    pub fn enqueue_request(
        &self,
        path: impl Into<String>,
        payload: Bytes,
    ) -> Result<(), QueueError> {
        self.control
            .push(Message::Request(RequestMessage::new(path, payload)))
    }

    /// Request graceful shutdown of the worker.
    pub fn stop(&self) -> Result<(), QueueError> {
        self.control.push(Message::Stop)
    }

    /// Transactions currently awaiting a batched flush.
    pub fn pending_transactions(&self) -> usize {
        self.transactions.len()
    }
}

/// Wires the queues, transport, and serializer into a worker and runs it on
/// a dedicated task.
pub struct Agent {
    worker: Worker<HttpTransport, JsonSerializer>,
    handle: AgentHandle,
}

impl Agent {
    pub fn new(config: &Config) -> Result<Self, AgentError> {
        config.validate()?;

        let transport = HttpTransport::new(TransportConfig {
            endpoint: config.endpoint.clone(),
            timeout: config.request_timeout(),
            connection_timeout: config.connection_timeout(),
            max_connections: config.max_connections,
            enable_compression: config.enable_compression,
            ..Default::default()
        })?;

        let worker = Worker::new(
            WorkerConfig {
                flush_interval: config.flush_interval(),
                max_queue_size: config.max_queue_size,
                timer_mode: config.flush_timer_mode,
            },
            transport,
            JsonSerializer::new(),
        );

        let handle = AgentHandle {
            control: worker.control_handle(),
            transactions: worker.transaction_handle(),
        };

        Ok(Self { worker, handle })
    }

    pub fn handle(&self) -> AgentHandle {
        self.handle.clone()
    }

    /// Spawn the worker task. The returned handle drives shutdown.
    pub fn start(self) -> ShutdownHandle {
        let control = self.handle.control.clone();
        let mut worker = self.worker;
        let worker_task = tokio::spawn(async move {
            worker.run_forever().await;
        });
        ShutdownHandle::new(control, worker_task)
    }
}

pub fn get_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

// Main entry point for the binary
pub async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();

    // Handle version flag specially
    if args.len() > 1 && (args[1] == "--version" || args[1] == "-V") {
        println!("telemetry-relay {}", get_version());
        return Ok(());
    }

    // Handle help flag
    if args.len() > 1 && (args[1] == "--help" || args[1] == "-h") {
        use clap::Parser;
        Config::parse_from(["telemetry-relay", "--help"]);
        return Ok(());
    }

    let cli_config = Config::from_args_and_env(args).context("Failed to parse configuration")?;

    // A config file, when given, replaces the CLI/env configuration.
    let config = if let Some(config_file) = &cli_config.config_file {
        eprintln!("Loading configuration from file: {}", config_file.display());
        Config::from_file(config_file).context("Failed to load configuration file")?
    } else {
        cli_config
    };

    init_logging(&config).context("Failed to initialize logging")?;

    info!("Starting telemetry-relay v{}", crate::VERSION);
    info!(
        "Configuration: endpoint={}, flush_interval_ms={}, max_queue_size={}",
        config.endpoint, config.flush_interval_ms, config.max_queue_size
    );

    let agent = Agent::new(&config).context("Failed to initialize agent")?;
    let shutdown_handle = agent.start();

    info!("telemetry-relay is running. Press Ctrl+C to stop.");
    shutdown_handle.wait_for_shutdown().await;
    info!("telemetry-relay stopped.");

    Ok(())
}
