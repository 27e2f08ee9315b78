use bytes::Bytes;
use reqwest::header::{CONTENT_ENCODING, CONTENT_TYPE, HeaderMap, HeaderValue};
use reqwest::{Client, ClientBuilder};
use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::debug;
use url::Url;

#[cfg(test)]
use mockall::automock;

// Compressing tiny payloads costs more than it saves.
const COMPRESSION_THRESHOLD: usize = 1024;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("HTTP error: {status} - {message}")]
    Http { status: u16, message: String },
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("Compression failed: {0}")]
    Compression(#[from] std::io::Error),
}

#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub endpoint: String,
    pub timeout: Duration,
    pub connection_timeout: Duration,
    pub max_connections: usize,
    pub keep_alive_timeout: Duration,
    pub user_agent: String,
    pub enable_compression: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://collector:9800".to_string(),
            timeout: Duration::from_secs(30),
            connection_timeout: Duration::from_secs(10),
            max_connections: 10,
            keep_alive_timeout: Duration::from_secs(60),
            user_agent: format!("telemetry-relay/{}", env!("CARGO_PKG_VERSION")),
            enable_compression: true,
        }
    }
}

/// The outbound delivery seam. The worker only ever calls `post`; anything
/// the adapter surfaces as `Err` is contained at the worker's call site.
#[cfg_attr(test, automock)]
pub trait Transport: Send + Sync {
    fn post(
        &self,
        path: &str,
        payload: Bytes,
    ) -> impl std::future::Future<Output = Result<(), TransportError>> + Send;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportStatsSnapshot {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
}

#[derive(Debug, Default)]
pub struct TransportStats {
    total_requests: AtomicU64,
    successful_requests: AtomicU64,
    failed_requests: AtomicU64,
}

impl TransportStats {
    pub fn record_request(&self, success: bool) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        if success {
            self.successful_requests.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed_requests.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> TransportStatsSnapshot {
        TransportStatsSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            successful_requests: self.successful_requests.load(Ordering::Relaxed),
            failed_requests: self.failed_requests.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    config: TransportConfig,
    base_url: Url,
    stats: Arc<TransportStats>,
}

impl HttpTransport {
    pub fn new(config: TransportConfig) -> Result<Self, TransportError> {
        let base_url: Url = config.endpoint.parse().map_err(|e| {
            TransportError::InvalidConfiguration(format!("Invalid endpoint URL: {e}"))
        })?;

        let client = ClientBuilder::new()
            .timeout(config.timeout)
            .connect_timeout(config.connection_timeout)
            .pool_max_idle_per_host(config.max_connections)
            .pool_idle_timeout(config.keep_alive_timeout)
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| {
                TransportError::InvalidConfiguration(format!("Failed to build HTTP client: {e}"))
            })?;

        Ok(Self {
            client,
            config,
            base_url,
            stats: Arc::new(TransportStats::default()),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.config.endpoint
    }

    pub fn stats(&self) -> TransportStatsSnapshot {
        self.stats.snapshot()
    }

    fn request_url(&self, path: &str) -> Url {
        let mut url = self.base_url.clone();
        let base_path = url.path().trim_end_matches('/').to_string();
        url.set_path(&format!("{base_path}{path}"));
        url
    }

    fn prepare_body(&self, payload: &Bytes) -> Result<(Vec<u8>, bool), TransportError> {
        if self.config.enable_compression && payload.len() > COMPRESSION_THRESHOLD {
            use flate2::{Compression, write::GzEncoder};
            let mut encoder = GzEncoder::new(Vec::new(), Compression::fast());
            encoder.write_all(payload)?;
            Ok((encoder.finish()?, true))
        } else {
            Ok((payload.to_vec(), false))
        }
    }
}

impl Transport for HttpTransport {
    async fn post(&self, path: &str, payload: Bytes) -> Result<(), TransportError> {
        let url = self.request_url(path);
        let (body, compressed) = self.prepare_body(&payload)?;
        let bytes_sent = body.len();

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if compressed {
            headers.insert(CONTENT_ENCODING, HeaderValue::from_static("gzip"));
        }

        let start = Instant::now();
        let result = self
            .client
            .post(url)
            .headers(headers)
            .body(body)
            .send()
            .await;
        let latency = start.elapsed();

        match result {
            Ok(response) => {
                let status = response.status();
                self.stats.record_request(status.is_success());
                if status.is_success() {
                    debug!(
                        "Delivered {} bytes to {} in {:?} (compressed: {})",
                        bytes_sent, path, latency, compressed
                    );
                    Ok(())
                } else {
                    Err(TransportError::Http {
                        status: status.as_u16(),
                        message: format!("Collector rejected {path}: {status}"),
                    })
                }
            }
            Err(e) => {
                self.stats.record_request(false);
                Err(TransportError::Network(e))
            }
        }
    }
}
