use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use thiserror::Error;
use tokio::sync::mpsc::{
    UnboundedReceiver, UnboundedSender, error::TryRecvError, unbounded_channel,
};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum QueueError {
    #[error("Queue is closed")]
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueStats {
    pub len: usize,
    pub pushed: u64,
    pub popped: u64,
}

#[derive(Debug, Default)]
struct Counters {
    pushed: AtomicU64,
    popped: AtomicU64,
    depth: AtomicUsize,
}

/// Unbounded multi-producer FIFO with a single non-blocking consumer.
///
/// Producers hold cloneable [`QueueHandle`]s; the worker owns the queue and
/// is the only caller of [`try_pop`]. An empty queue is a normal outcome,
/// not an error. Depth is tracked with atomics so `len` is lock-free for
/// the flush policy.
///
/// [`try_pop`]: EventQueue::try_pop
pub struct EventQueue<T> {
    tx: UnboundedSender<T>,
    rx: UnboundedReceiver<T>,
    counters: Arc<Counters>,
}

impl<T> EventQueue<T> {
    pub fn new() -> Self {
        let (tx, rx) = unbounded_channel();
        Self {
            tx,
            rx,
            counters: Arc::new(Counters::default()),
        }
    }

    /// Producer-side handle. Cheap to clone, shareable across tasks.
    pub fn handle(&self) -> QueueHandle<T> {
        QueueHandle {
            tx: self.tx.clone(),
            counters: self.counters.clone(),
        }
    }

    /// Pop the next item without blocking. `None` means the queue is
    /// currently empty and ends the caller's drain.
    #[inline]
    pub fn try_pop(&mut self) -> Option<T> {
        match self.rx.try_recv() {
            Ok(item) => {
                self.counters.popped.fetch_add(1, Ordering::Relaxed);
                self.counters.depth.fetch_sub(1, Ordering::Release);
                Some(item)
            }
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    pub fn len(&self) -> usize {
        self.counters.depth.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            len: self.len(),
            pushed: self.counters.pushed.load(Ordering::Relaxed),
            popped: self.counters.popped.load(Ordering::Relaxed),
        }
    }
}

impl<T> Default for EventQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for EventQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventQueue")
            .field("len", &self.len())
            .field("pushed", &self.counters.pushed.load(Ordering::Relaxed))
            .field("popped", &self.counters.popped.load(Ordering::Relaxed))
            .finish()
    }
}

/// Cloneable producer side of an [`EventQueue`].
pub struct QueueHandle<T> {
    tx: UnboundedSender<T>,
    counters: Arc<Counters>,
}

impl<T> QueueHandle<T> {
    /// Append an item at the tail. Fails only when the consumer is gone.
    pub fn push(&self, item: T) -> Result<(), QueueError> {
        // Reserve the depth slot before the send so the consumer's
        // decrement always pairs with a prior increment.
        self.counters.depth.fetch_add(1, Ordering::Release);
        if self.tx.send(item).is_err() {
            self.counters.depth.fetch_sub(1, Ordering::Release);
            return Err(QueueError::Closed);
        }
        self.counters.pushed.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.counters.depth.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Clone for QueueHandle<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            counters: self.counters.clone(),
        }
    }
}

impl<T> std::fmt::Debug for QueueHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueHandle").field("len", &self.len()).finish()
    }
}
