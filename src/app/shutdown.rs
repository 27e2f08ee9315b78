use super::AgentError;
use crate::queue::QueueHandle;
use crate::worker::Message;
use std::time::Duration;
use tokio::signal;
#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal as unix_signal};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{error, info, warn};

// Bounded wait for the worker's final flush; fits within typical container
// stop grace periods.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(4);

/// Handle to a running agent's worker task. Dropping it does not stop the
/// worker; call [`shutdown`](ShutdownHandle::shutdown) or let the signal
/// handler do it.
#[derive(Debug)]
pub struct ShutdownHandle {
    control: QueueHandle<Message>,
    worker_task: JoinHandle<()>,
}

impl ShutdownHandle {
    pub(super) fn new(control: QueueHandle<Message>, worker_task: JoinHandle<()>) -> Self {
        Self {
            control,
            worker_task,
        }
    }

    /// Push a stop message and wait (bounded) for the worker to finish its
    /// final flush and exit.
    pub async fn shutdown(self) -> Result<(), AgentError> {
        info!("Initiating graceful shutdown...");

        if self.control.push(Message::Stop).is_err() {
            warn!("Worker already gone, nothing to stop");
        }

        match timeout(SHUTDOWN_TIMEOUT, self.worker_task).await {
            Ok(Ok(())) => {
                info!("Graceful shutdown completed");
                Ok(())
            }
            Ok(Err(e)) => {
                error!("Worker task failed during shutdown: {e}");
                Err(AgentError::WorkerPanicked)
            }
            Err(_) => {
                error!("Shutdown timeout exceeded");
                Err(AgentError::ShutdownTimeout)
            }
        }
    }

    /// Block until SIGINT/SIGTERM, then shut down.
    pub async fn wait_for_shutdown(self) {
        wait_for_signal().await;
        if let Err(e) = self.shutdown().await {
            error!("Shutdown error: {e}");
        }
    }
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        let mut sigterm = match unix_signal(SignalKind::terminate()) {
            Ok(stream) => stream,
            Err(e) => {
                error!("Failed to install SIGTERM handler: {e}");
                return;
            }
        };

        tokio::select! {
            result = signal::ctrl_c() => {
                match result {
                    Ok(()) => info!("Received SIGINT (Ctrl+C), initiating graceful shutdown"),
                    Err(e) => error!("Failed to listen for SIGINT: {e}"),
                }
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, initiating graceful shutdown");
            }
        }
    }

    #[cfg(not(unix))]
    {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received SIGINT (Ctrl+C), initiating graceful shutdown"),
            Err(e) => error!("Failed to listen for SIGINT: {e}"),
        }
    }
}
