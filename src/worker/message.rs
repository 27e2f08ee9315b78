use crate::domain::ErrorRecord;
use bytes::Bytes;

/// Collector path for batched transaction traces.
pub const TRANSACTIONS_PATH: &str = "/v1/transactions";
/// Collector path for relayed error reports.
pub const ERRORS_PATH: &str = "/v1/errors";

/// An outbound HTTP delivery unit. Consumed exactly once by the worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestMessage {
    pub path: String,
    pub payload: Bytes,
}

impl RequestMessage {
    pub fn new(path: impl Into<String>, payload: Bytes) -> Self {
        Self {
            path: path.into(),
            payload,
        }
    }
}

/// Control-queue item, dispatched by kind on every worker tick.
#[derive(Debug, Clone)]
pub enum Message {
    /// Deliver a prepared payload to the collector.
    Request(RequestMessage),
    /// A captured error; relayed as a `Request` on the same queue.
    Error(ErrorRecord),
    /// Graceful shutdown sentinel.
    Stop,
}
