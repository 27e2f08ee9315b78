pub mod message;

pub use message::{ERRORS_PATH, Message, RequestMessage, TRANSACTIONS_PATH};

use crate::domain::{ErrorRecord, Transaction};
use crate::queue::{EventQueue, QueueHandle};
use crate::sender::{PayloadSerializer, Transport};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tracing::{debug, error, info};

/// Inter-tick suspension of the polling loop. Throughput and latency are
/// bounded by this tick.
pub const SLEEP_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Running,
    Stopped,
}

/// When the interval-flush timestamp is updated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FlushTimerMode {
    /// Reset the timestamp after every flush that drained a batch, so the
    /// configured interval measures batch cadence.
    #[default]
    ResetAfterFlush,
    /// Set the timestamp once at construction and never update it. Once
    /// the interval has first elapsed, every tick flushes.
    FixedFromStart,
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// `None` flushes on every tick (still a no-op on an empty buffer).
    pub flush_interval: Option<Duration>,
    /// Flush regardless of elapsed time once the buffer reaches this size.
    pub max_queue_size: usize,
    pub timer_mode: FlushTimerMode,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            flush_interval: Some(Duration::from_secs(30)),
            max_queue_size: 1000,
            timer_mode: FlushTimerMode::ResetAfterFlush,
        }
    }
}

/// The message-processing loop of the agent.
///
/// One dedicated task runs [`run_forever`]; producers push onto the control
/// queue and the transaction buffer through [`QueueHandle`]s. Each tick
/// drains the control queue to exhaustion, then decides once whether to
/// flush the buffered transactions. Delivery failures are contained here
/// and never reach producers.
///
/// [`run_forever`]: Worker::run_forever
pub struct Worker<T, S> {
    control: EventQueue<Message>,
    control_tx: QueueHandle<Message>,
    transactions: EventQueue<Transaction>,
    transport: T,
    serializer: S,
    config: WorkerConfig,
    last_flush: Instant,
    state: WorkerState,
}

impl<T: Transport, S: PayloadSerializer> Worker<T, S> {
    pub fn new(config: WorkerConfig, transport: T, serializer: S) -> Self {
        let control = EventQueue::new();
        let control_tx = control.handle();
        Self {
            control,
            control_tx,
            transactions: EventQueue::new(),
            transport,
            serializer,
            config,
            last_flush: Instant::now(),
            state: WorkerState::Running,
        }
    }

    /// Producer handle for the control queue.
    pub fn control_handle(&self) -> QueueHandle<Message> {
        self.control_tx.clone()
    }

    /// Producer handle for the transaction batch buffer.
    pub fn transaction_handle(&self) -> QueueHandle<Transaction> {
        self.transactions.handle()
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    /// Tick until a `StopMessage` is processed.
    pub async fn run_forever(&mut self) {
        info!("Worker loop started");
        while self.state == WorkerState::Running {
            self.run_once().await;
            if self.state == WorkerState::Running {
                sleep(SLEEP_INTERVAL).await;
            }
        }
        info!("Worker loop stopped");
    }

    /// One full cycle: drain the control queue, then conditionally flush.
    pub async fn run_once(&mut self) {
        while let Some(message) = self.control.try_pop() {
            match message {
                Message::Request(request) => self.process_request(request).await,
                Message::Error(record) => self.process_error(record),
                Message::Stop => {
                    debug!("Stop message received, flushing before shutdown");
                    self.flush_transactions().await;
                    self.state = WorkerState::Stopped;
                    return;
                }
            }
        }

        if self.should_flush_transactions() {
            self.flush_transactions().await;
        }
    }

    /// Best-effort, at-most-once delivery. Failures are logged and dropped;
    /// nothing propagates to the caller and nothing is retried.
    async fn process_request(&self, request: RequestMessage) {
        if let Err(e) = self.transport.post(&request.path, request.payload).await {
            error!("Delivery to {} failed: {e}", request.path);
            debug!("Delivery failure detail: {e:?}");
        }
    }

    /// Relay a captured error as an ordinary outbound request at the tail
    /// of the control queue, keeping a single delivery code path.
    fn process_error(&self, record: ErrorRecord) {
        let payload = match self.serializer.error_batch(std::slice::from_ref(&record)) {
            Ok(payload) => payload,
            Err(e) => {
                error!("Failed to serialize error report, dropping it: {e}");
                return;
            }
        };
        let request = RequestMessage::new(ERRORS_PATH, payload);
        if self.control_tx.push(Message::Request(request)).is_err() {
            error!("Control queue closed while relaying error report");
        }
    }

    /// Flush policy, evaluated once per tick after the drain.
    pub fn should_flush_transactions(&self) -> bool {
        let Some(interval) = self.config.flush_interval else {
            return true;
        };
        if self.transactions.len() >= self.config.max_queue_size {
            return true;
        }
        self.last_flush.elapsed() >= interval
    }

    /// Drain the buffered transactions into one request and deliver it
    /// synchronously through the contained-failure path.
    ///
    /// The drain is bounded by a length snapshot: transactions pushed while
    /// it runs stay in the buffer for the next flush decision.
    pub async fn flush_transactions(&mut self) {
        let snapshot = self.transactions.len();
        if snapshot == 0 {
            return;
        }

        let mut batch = Vec::with_capacity(snapshot);
        for _ in 0..snapshot {
            match self.transactions.try_pop() {
                Some(transaction) => batch.push(transaction),
                None => break,
            }
        }
        if batch.is_empty() {
            return;
        }

        debug!("Flushing {} buffered transactions", batch.len());
        match self.serializer.transaction_batch(&batch) {
            Ok(payload) => {
                self.process_request(RequestMessage::new(TRANSACTIONS_PATH, payload))
                    .await;
            }
            Err(e) => {
                error!("Failed to serialize transaction batch, dropping it: {e}");
            }
        }

        if self.config.timer_mode == FlushTimerMode::ResetAfterFlush {
            self.last_flush = Instant::now();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sender::{JsonSerializer, TransportError};
    use bytes::Bytes;
    use chrono::Utc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct TestTransport {
        calls: Arc<Mutex<Vec<(String, Bytes)>>>,
        fail: Arc<AtomicBool>,
    }

    impl TestTransport {
        fn calls(&self) -> Vec<(String, Bytes)> {
            self.calls.lock().unwrap().clone()
        }

        fn set_failing(&self, fail: bool) {
            self.fail.store(fail, Ordering::SeqCst);
        }
    }

    impl Transport for TestTransport {
        async fn post(&self, path: &str, payload: Bytes) -> Result<(), TransportError> {
            self.calls
                .lock()
                .unwrap()
                .push((path.to_string(), payload));
            if self.fail.load(Ordering::SeqCst) {
                Err(TransportError::Http {
                    status: 503,
                    message: "unavailable".to_string(),
                })
            } else {
                Ok(())
            }
        }
    }

    fn test_worker(
        config: WorkerConfig,
    ) -> (Worker<TestTransport, JsonSerializer>, TestTransport) {
        let transport = TestTransport::default();
        let worker = Worker::new(config, transport.clone(), JsonSerializer::new());
        (worker, transport)
    }

    fn transaction(name: &str) -> Transaction {
        Transaction::new(name, Utc::now(), Duration::from_millis(10))
    }

    #[tokio::test]
    async fn idle_tick_makes_no_transport_calls() {
        let (mut worker, transport) = test_worker(WorkerConfig::default());
        worker.run_once().await;
        assert!(transport.calls().is_empty());
        assert_eq!(worker.state(), WorkerState::Running);
    }

    #[tokio::test]
    async fn request_messages_are_delivered_in_fifo_order() {
        let (mut worker, transport) = test_worker(WorkerConfig::default());
        let control = worker.control_handle();
        for path in ["/v1/errors", "/v1/transactions", "/v1/errors"] {
            control
                .push(Message::Request(RequestMessage::new(
                    path,
                    Bytes::from_static(b"{}"),
                )))
                .unwrap();
        }

        worker.run_once().await;

        let paths: Vec<String> = transport.calls().into_iter().map(|(p, _)| p).collect();
        assert_eq!(paths, ["/v1/errors", "/v1/transactions", "/v1/errors"]);
    }

    #[tokio::test]
    async fn error_message_is_relayed_and_delivered_same_tick() {
        let (mut worker, transport) = test_worker(WorkerConfig::default());
        let control = worker.control_handle();
        let record = ErrorRecord::new("RuntimeError", "boom");
        control.push(Message::Error(record.clone())).unwrap();

        worker.run_once().await;

        // The relayed request lands at the tail of the same queue and the
        // drain pass picks it up.
        let calls = transport.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, ERRORS_PATH);
        let expected = JsonSerializer::new()
            .error_batch(std::slice::from_ref(&record))
            .unwrap();
        assert_eq!(calls[0].1, expected);
    }

    #[tokio::test]
    async fn delivery_failure_is_contained() {
        let (mut worker, transport) = test_worker(WorkerConfig::default());
        transport.set_failing(true);
        let control = worker.control_handle();
        control
            .push(Message::Request(RequestMessage::new(
                "/v1/errors",
                Bytes::from_static(b"{}"),
            )))
            .unwrap();
        control
            .push(Message::Request(RequestMessage::new(
                "/v1/transactions",
                Bytes::from_static(b"{}"),
            )))
            .unwrap();

        worker.run_once().await;

        // Both attempted, neither retried, loop still running.
        assert_eq!(transport.calls().len(), 2);
        assert_eq!(worker.state(), WorkerState::Running);
    }

    #[tokio::test]
    async fn stop_flushes_then_terminates_without_draining_remainder() {
        let (mut worker, transport) = test_worker(WorkerConfig::default());
        let control = worker.control_handle();
        let batch = worker.transaction_handle();
        batch.push(transaction("pending")).unwrap();

        control
            .push(Message::Request(RequestMessage::new(
                "/v1/errors",
                Bytes::from_static(b"{}"),
            )))
            .unwrap();
        control.push(Message::Stop).unwrap();
        control
            .push(Message::Request(RequestMessage::new(
                "/v1/never",
                Bytes::from_static(b"{}"),
            )))
            .unwrap();

        worker.run_once().await;

        assert_eq!(worker.state(), WorkerState::Stopped);
        let paths: Vec<String> = transport.calls().into_iter().map(|(p, _)| p).collect();
        // The request ahead of Stop is delivered, the final flush runs, and
        // the message behind Stop is never processed.
        assert_eq!(paths, ["/v1/errors", TRANSACTIONS_PATH]);
    }

    #[tokio::test]
    async fn no_interval_flushes_every_tick_with_content() {
        let (mut worker, transport) = test_worker(WorkerConfig {
            flush_interval: None,
            ..Default::default()
        });
        let batch = worker.transaction_handle();

        worker.run_once().await;
        assert!(transport.calls().is_empty());

        batch.push(transaction("a")).unwrap();
        worker.run_once().await;
        assert_eq!(transport.calls().len(), 1);
        assert_eq!(transport.calls()[0].0, TRANSACTIONS_PATH);

        batch.push(transaction("b")).unwrap();
        worker.run_once().await;
        assert_eq!(transport.calls().len(), 2);
    }

    #[tokio::test]
    async fn size_threshold_overrides_interval() {
        let (worker, _transport) = test_worker(WorkerConfig {
            flush_interval: Some(Duration::from_secs(3600)),
            max_queue_size: 3,
            timer_mode: FlushTimerMode::ResetAfterFlush,
        });
        let batch = worker.transaction_handle();

        batch.push(transaction("a")).unwrap();
        batch.push(transaction("b")).unwrap();
        assert!(!worker.should_flush_transactions());

        batch.push(transaction("c")).unwrap();
        assert!(worker.should_flush_transactions());
    }

    #[tokio::test(start_paused = true)]
    async fn interval_gates_the_flush() {
        let (mut worker, transport) = test_worker(WorkerConfig {
            flush_interval: Some(Duration::from_secs(10)),
            max_queue_size: 1000,
            timer_mode: FlushTimerMode::ResetAfterFlush,
        });
        let batch = worker.transaction_handle();
        batch.push(transaction("a")).unwrap();

        assert!(!worker.should_flush_transactions());
        worker.run_once().await;
        assert!(transport.calls().is_empty());

        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(worker.should_flush_transactions());
        worker.run_once().await;
        assert_eq!(transport.calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn reset_mode_rearms_the_interval_after_flush() {
        let (mut worker, transport) = test_worker(WorkerConfig {
            flush_interval: Some(Duration::from_secs(10)),
            max_queue_size: 1000,
            timer_mode: FlushTimerMode::ResetAfterFlush,
        });
        let batch = worker.transaction_handle();

        batch.push(transaction("a")).unwrap();
        tokio::time::advance(Duration::from_secs(10)).await;
        worker.run_once().await;
        assert_eq!(transport.calls().len(), 1);

        // Timer was reset; a fresh transaction must wait out the interval.
        batch.push(transaction("b")).unwrap();
        tokio::time::advance(Duration::from_secs(5)).await;
        worker.run_once().await;
        assert_eq!(transport.calls().len(), 1);

        tokio::time::advance(Duration::from_secs(5)).await;
        worker.run_once().await;
        assert_eq!(transport.calls().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn fixed_mode_flushes_every_tick_once_elapsed() {
        let (mut worker, transport) = test_worker(WorkerConfig {
            flush_interval: Some(Duration::from_secs(10)),
            max_queue_size: 1000,
            timer_mode: FlushTimerMode::FixedFromStart,
        });
        let batch = worker.transaction_handle();

        batch.push(transaction("a")).unwrap();
        tokio::time::advance(Duration::from_secs(10)).await;
        worker.run_once().await;
        assert_eq!(transport.calls().len(), 1);

        // The timestamp never moves, so the very next tick with content
        // flushes again without waiting.
        batch.push(transaction("b")).unwrap();
        worker.run_once().await;
        assert_eq!(transport.calls().len(), 2);
    }

    #[tokio::test]
    async fn flush_drains_fifo_into_one_request() {
        let (mut worker, transport) = test_worker(WorkerConfig {
            flush_interval: None,
            ..Default::default()
        });
        let batch = worker.transaction_handle();
        let txs = vec![transaction("a"), transaction("b"), transaction("c")];
        for tx in &txs {
            batch.push(tx.clone()).unwrap();
        }

        worker.run_once().await;

        let calls = transport.calls();
        assert_eq!(calls.len(), 1);
        let expected = JsonSerializer::new().transaction_batch(&txs).unwrap();
        assert_eq!(calls[0].1, expected);
        assert_eq!(worker.transaction_handle().len(), 0);
    }

    #[tokio::test]
    async fn failed_flush_is_not_requeued() {
        let (mut worker, transport) = test_worker(WorkerConfig {
            flush_interval: None,
            ..Default::default()
        });
        transport.set_failing(true);
        let batch = worker.transaction_handle();
        batch.push(transaction("lost")).unwrap();

        worker.run_once().await;

        assert_eq!(transport.calls().len(), 1);
        // Drained contents are dropped, not recovered.
        assert_eq!(worker.transaction_handle().len(), 0);
        assert_eq!(worker.state(), WorkerState::Running);
    }

    #[tokio::test]
    async fn run_forever_exits_after_stop() {
        let (mut worker, _transport) = test_worker(WorkerConfig::default());
        let control = worker.control_handle();
        control.push(Message::Stop).unwrap();

        worker.run_forever().await;
        assert_eq!(worker.state(), WorkerState::Stopped);
    }
}
