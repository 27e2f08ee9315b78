pub mod client;
pub mod serialization;

pub use client::{
    HttpTransport, Transport, TransportConfig, TransportError, TransportStats,
    TransportStatsSnapshot,
};
pub use serialization::{JsonSerializer, PayloadSerializer, SerializationError};

#[cfg(test)]
pub use client::MockTransport;
