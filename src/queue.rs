//! Bounded multi-producer, single-consumer queue of outbound buffers.
//!
//! A fixed-capacity crossbeam channel carries ownership of the buffers; an
//! atomic depth mirror answers "can accept more" without touching the channel
//! on the fast path. The mirror is advisory: a racing check-then-push may see
//! stale depth, and `try_push` remains the authority.

use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_channel::{Receiver, Sender, TrySendError};

pub(crate) struct SendQueue {
    tx: Sender<Vec<u8>>,
    rx: Receiver<Vec<u8>>,
    depth: AtomicUsize,
    capacity: usize,
}

impl SendQueue {
    pub(crate) fn new(capacity: usize) -> Self {
        let (tx, rx) = crossbeam_channel::bounded(capacity);
        Self {
            tx,
            rx,
            depth: AtomicUsize::new(0),
            capacity,
        }
    }

    /// Push a buffer without blocking. Returns `false` at capacity; ownership
    /// transfers to the queue only on success. Callable from any thread.
    pub(crate) fn try_push(&self, buf: Vec<u8>) -> bool {
        match self.tx.try_send(buf) {
            Ok(()) => {
                self.depth.fetch_add(1, Ordering::Release);
                true
            }
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => false,
        }
    }

    /// Remove and return the oldest buffer, if any. Event-loop thread only.
    pub(crate) fn pop_if_any(&self) -> Option<Vec<u8>> {
        match self.rx.try_recv() {
            Ok(buf) => {
                self.depth.fetch_sub(1, Ordering::Release);
                Some(buf)
            }
            Err(_) => None,
        }
    }

    /// Advisory queue depth, lock-free, readable from any thread.
    pub(crate) fn len(&self) -> usize {
        self.depth.load(Ordering::Acquire)
    }

    pub(crate) fn has_capacity(&self) -> bool {
        self.len() < self.capacity
    }
}
