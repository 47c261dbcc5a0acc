//! Callback slots invoked by the event-loop thread.
//!
//! Each slot is an owned closure supplied at construction; unset slots fall
//! back to a no-op. Callbacks are never invoked concurrently: only the
//! event-loop thread that drives [`process_one_ready_event`] calls them.
//!
//! [`process_one_ready_event`]: crate::TcpClient::process_one_ready_event

use std::io;

use crate::error::Error;

/// Classified outcome of a connect attempt, reported once per `connect()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionResult {
    /// The connection is established.
    Success,
    /// The OS reported an error outside the classified set.
    UnknownError,
    /// The peer refused or reset the connection attempt.
    CouldNotConnect,
    /// The host name did not resolve to any address.
    HostUnknown,
    /// The attempt did not complete within the externally enforced interval.
    Timeout,
}

/// Invoked when the outcome of a connect attempt becomes available.
pub type OnConnectionResult = Box<dyn FnMut(ConnectionResult) + Send>;

/// Invoked exactly once when the connection is closed. The flag is `true`
/// when the peer initiated the close, `false` when the local side did.
pub type OnDisconnected = Box<dyn FnMut(bool) + Send>;

/// Invoked at most once per queued buffer. On `Ok` the written size always
/// equals the buffer length; on `Err` it is the number of bytes actually
/// sent before the failure.
pub type OnWriteResult = Box<dyn FnMut(io::Result<()>, &[u8], usize) + Send>;

/// Invoked with a read-only view of received bytes. The view must not be
/// retained past the callback's return.
pub type OnReceivedData = Box<dyn FnMut(&[u8]) + Send>;

/// Invoked when an internal fault occurs during event processing, such as a
/// registration rearm failure. The connection favors fail-safe disconnection
/// over continuing in an unknown state.
pub type OnFault = Box<dyn FnMut(Error) + Send>;

/// The set of callback slots for one connection.
pub struct Callbacks {
    pub(crate) on_connection_result: OnConnectionResult,
    pub(crate) on_disconnected: OnDisconnected,
    pub(crate) on_write_result: OnWriteResult,
    pub(crate) on_received_data: OnReceivedData,
    pub(crate) on_fault: OnFault,
}

impl Callbacks {
    /// All slots set to no-ops.
    pub fn new() -> Self {
        Self {
            on_connection_result: Box::new(|_| {}),
            on_disconnected: Box::new(|_| {}),
            on_write_result: Box::new(|_, _, _| {}),
            on_received_data: Box::new(|_| {}),
            on_fault: Box::new(|_| {}),
        }
    }

    pub fn on_connection_result<F>(mut self, f: F) -> Self
    where
        F: FnMut(ConnectionResult) + Send + 'static,
    {
        self.on_connection_result = Box::new(f);
        self
    }

    pub fn on_disconnected<F>(mut self, f: F) -> Self
    where
        F: FnMut(bool) + Send + 'static,
    {
        self.on_disconnected = Box::new(f);
        self
    }

    pub fn on_write_result<F>(mut self, f: F) -> Self
    where
        F: FnMut(io::Result<()>, &[u8], usize) + Send + 'static,
    {
        self.on_write_result = Box::new(f);
        self
    }

    pub fn on_received_data<F>(mut self, f: F) -> Self
    where
        F: FnMut(&[u8]) + Send + 'static,
    {
        self.on_received_data = Box::new(f);
        self
    }

    pub fn on_fault<F>(mut self, f: F) -> Self
    where
        F: FnMut(Error) + Send + 'static,
    {
        self.on_fault = Box::new(f);
        self
    }
}

impl Default for Callbacks {
    fn default() -> Self {
        Self::new()
    }
}
