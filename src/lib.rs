//! tcp-client - A non-blocking TCP client connection for readiness-driven
//! event loops.
//!
//! This crate provides a single pollable unit that owns one TCP socket
//! end-to-end: non-blocking connect with per-address fallback and error
//! classification, readiness-driven reads and writes, orderly close, and
//! delivery of lifecycle and data events through caller-supplied callbacks.
//! It is designed to be embedded in a larger event-driven service as one
//! event source among many.
//!
//! # Threading model
//!
//! One event-loop thread owns the socket, the state machine, and all
//! callback invocations, and never blocks on I/O. Any number of producer
//! threads enqueue outbound buffers through a cloneable [`Handle`]; a bounded
//! queue provides backpressure (a full queue rejects, never blocks) and an
//! eventfd wakeup signal tells the loop to check the queue.
//!
//! # Quick Start
//!
//! ```ignore
//! use std::os::fd::AsRawFd;
//! use tcp_client::{Callbacks, Config, State, TcpClient};
//!
//! let callbacks = Callbacks::new()
//!     .on_received_data(|data| println!("got {} bytes", data.len()))
//!     .on_disconnected(|from_peer| println!("closed (peer: {from_peer})"));
//!
//! let mut client = TcpClient::new(Config::default(), callbacks)?;
//! client.init("cache.example.com", 6379)?;
//! client.connect()?;
//!
//! // Hand client.as_raw_fd() to the host event loop; when it reports the
//! // fd readable, drain one round of work:
//! client.process_one_ready_event()?;
//!
//! // Producer threads write through a handle:
//! let handle = client.handle();
//! std::thread::spawn(move || {
//!     if !handle.write(&b"PING\r\n"[..]) {
//!         // backpressure or not connected - caller backs off
//!     }
//! });
//! ```

mod callbacks;
mod config;
mod connection;
mod error;
mod handle;
mod queue;
mod registration;
mod wakeup;

pub use callbacks::{
    Callbacks, ConnectionResult, OnConnectionResult, OnDisconnected, OnFault, OnReceivedData,
    OnWriteResult,
};
pub use config::Config;
pub use connection::{State, TcpClient};
pub use error::Error;
pub use handle::Handle;
