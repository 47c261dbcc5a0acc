//! Producer-side handle for threads that do not own the connection.

use std::sync::Arc;

use crate::connection::{Shared, State};

/// Cloneable, thread-safe surface onto one connection.
///
/// Producer threads use it to enqueue writes and read advisory state; the
/// socket itself is never touched from here. All operations are non-blocking
/// except [`wait_state`](Handle::wait_state).
#[derive(Clone)]
pub struct Handle {
    shared: Arc<Shared>,
}

impl Handle {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    /// Enqueue a buffer for sending, transferring ownership on success.
    /// Returns `false` without blocking when the connection is not
    /// connected, a close has been requested, or the queue is at capacity.
    pub fn write(&self, data: impl Into<Vec<u8>>) -> bool {
        self.shared.try_write(data.into())
    }

    /// Stop accepting writes and close once all queued sends have been
    /// attempted. Idempotent.
    pub fn request_close(&self) {
        self.shared.request_close();
    }

    pub fn state(&self) -> State {
        self.shared.state()
    }

    /// True iff connected, no close pending, and the queue has spare
    /// capacity. Advisory: a racing `write` may still be rejected.
    pub fn can_send_messages(&self) -> bool {
        self.shared.can_send_messages()
    }

    pub fn bytes_sent(&self) -> u64 {
        self.shared.bytes_sent()
    }

    pub fn msgs_sent(&self) -> u64 {
        self.shared.msgs_sent()
    }

    pub fn msgs_received(&self) -> u64 {
        self.shared.msgs_received()
    }

    /// Advisory count of queued, not-yet-attempted buffers.
    pub fn pending_writes(&self) -> usize {
        self.shared.pending_writes()
    }

    /// Block until the connection reaches `target`, with no timeout.
    /// Administrative and test use only; never call from the event-loop
    /// thread.
    pub fn wait_state(&self, target: State) {
        self.shared.wait_state(target);
    }
}
