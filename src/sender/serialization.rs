use crate::domain::{ErrorRecord, Transaction};
use bytes::Bytes;
use serde::Serialize;
use thiserror::Error;

// Sizing hints for the serialization buffer; oversized batches are capped
// rather than pre-allocating unbounded memory.
const MAX_SAFE_BUFFER_SIZE: usize = 100 * 1024 * 1024; // 100MB
const ESTIMATED_RECORD_SIZE: usize = 256; // bytes per record

#[derive(Error, Debug)]
pub enum SerializationError {
    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Batch is empty")]
    EmptyBatch,
}

/// Builds wire payloads from domain records. Injected into the worker at
/// construction so the loop stays independent of the wire format.
pub trait PayloadSerializer: Send + Sync {
    fn transaction_batch(&self, transactions: &[Transaction]) -> Result<Bytes, SerializationError>;
    fn error_batch(&self, errors: &[ErrorRecord]) -> Result<Bytes, SerializationError>;
}

/// JSON-array payloads, the collector's native format.
#[derive(Debug, Clone, Default)]
pub struct JsonSerializer;

impl JsonSerializer {
    pub fn new() -> Self {
        Self
    }

    fn serialize_batch<T: Serialize>(&self, records: &[T]) -> Result<Bytes, SerializationError> {
        if records.is_empty() {
            return Err(SerializationError::EmptyBatch);
        }

        let estimated = records.len().saturating_mul(ESTIMATED_RECORD_SIZE);
        let capacity = estimated.min(MAX_SAFE_BUFFER_SIZE);

        let mut buffer = Vec::with_capacity(capacity);
        serde_json::to_writer(&mut buffer, records)?;
        Ok(Bytes::from(buffer))
    }
}

impl PayloadSerializer for JsonSerializer {
    fn transaction_batch(&self, transactions: &[Transaction]) -> Result<Bytes, SerializationError> {
        self.serialize_batch(transactions)
    }

    fn error_batch(&self, errors: &[ErrorRecord]) -> Result<Bytes, SerializationError> {
        self.serialize_batch(errors)
    }
}
