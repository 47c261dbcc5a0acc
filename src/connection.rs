//! The client connection state machine and its read/write paths.
//!
//! A `TcpClient` owns one socket end-to-end and registers as a single
//! pollable unit with a host event loop: the waitable handle is the private
//! poll's file descriptor, and `process_one_ready_event()` drains one round
//! of pending work. The socket, the registration, and every callback
//! invocation belong to the event-loop thread; producer threads interact
//! solely through the send queue and the wakeup signal via [`Handle`].
//!
//! [`Handle`]: crate::Handle

use std::io::{self, Read, Write};
use std::net::{SocketAddr, ToSocketAddrs};
use std::os::fd::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use mio::net::TcpStream;
use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token};
use tracing::{debug, trace, warn};

use crate::callbacks::{Callbacks, ConnectionResult};
use crate::config::Config;
use crate::error::Error;
use crate::queue::SendQueue;
use crate::registration::Registration;
use crate::wakeup::Wakeup;

const SOCKET: Token = Token(0);
const WAKEUP: Token = Token(1);

/// Connection lifecycle state.
///
/// Transitions are serialized on the event-loop thread; any thread may read
/// the current value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum State {
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
    Disconnecting = 3,
}

impl State {
    fn from_u8(value: u8) -> State {
        match value {
            1 => State::Connecting,
            2 => State::Connected,
            3 => State::Disconnecting,
            _ => State::Disconnected,
        }
    }
}

/// State shared between the event-loop thread and producer threads.
pub(crate) struct Shared {
    state: AtomicU8,
    pending_close: AtomicBool,
    bytes_sent: AtomicU64,
    msgs_sent: AtomicU64,
    msgs_received: AtomicU64,
    queue: SendQueue,
    wakeup: Wakeup,
    state_lock: Mutex<()>,
    state_cond: Condvar,
}

impl Shared {
    fn new(max_messages: usize, wakeup: Wakeup) -> Self {
        Self {
            state: AtomicU8::new(State::Disconnected as u8),
            pending_close: AtomicBool::new(false),
            bytes_sent: AtomicU64::new(0),
            msgs_sent: AtomicU64::new(0),
            msgs_received: AtomicU64::new(0),
            queue: SendQueue::new(max_messages),
            wakeup,
            state_lock: Mutex::new(()),
            state_cond: Condvar::new(),
        }
    }

    pub(crate) fn state(&self) -> State {
        State::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: State) {
        let _guard = match self.state_lock.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        self.state.store(state as u8, Ordering::Release);
        self.state_cond.notify_all();
    }

    /// Block until the connection reaches `target`. Administrative and test
    /// use only; never call from the event-loop thread.
    pub(crate) fn wait_state(&self, target: State) {
        let mut guard = match self.state_lock.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        while self.state() != target {
            guard = match self.state_cond.wait(guard) {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
        }
    }

    /// Enqueue a buffer for sending. Returns `false` without blocking when
    /// not connected, a close has been requested, or the queue is full.
    pub(crate) fn try_write(&self, data: Vec<u8>) -> bool {
        if self.state() != State::Connected || self.pending_close.load(Ordering::Acquire) {
            return false;
        }
        if !self.queue.try_push(data) {
            return false;
        }
        self.wakeup.ping();
        true
    }

    /// Stop accepting writes and close once the send queue drains. Idempotent.
    pub(crate) fn request_close(&self) {
        if !self.pending_close.swap(true, Ordering::AcqRel) {
            self.wakeup.ping();
        }
    }

    pub(crate) fn can_send_messages(&self) -> bool {
        self.state() == State::Connected
            && !self.pending_close.load(Ordering::Acquire)
            && self.queue.has_capacity()
    }

    pub(crate) fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }

    pub(crate) fn msgs_sent(&self) -> u64 {
        self.msgs_sent.load(Ordering::Relaxed)
    }

    pub(crate) fn msgs_received(&self) -> u64 {
        self.msgs_received.load(Ordering::Relaxed)
    }

    pub(crate) fn pending_writes(&self) -> usize {
        self.queue.len()
    }
}

/// Map the OS error left behind by a failed connect to its classification.
pub(crate) fn classify_connect_errno(errno: Option<i32>) -> ConnectionResult {
    match errno {
        Some(libc::ECONNREFUSED) | Some(libc::ECONNRESET) => ConnectionResult::CouldNotConnect,
        Some(libc::ETIMEDOUT) => ConnectionResult::Timeout,
        _ => ConnectionResult::UnknownError,
    }
}

/// Head-of-line buffer currently being drained onto the socket.
struct InFlight {
    buf: Vec<u8>,
    sent: usize,
}

enum ReadOutcome {
    Idle,
    PeerClosed,
    Failed(i32),
}

enum WriteOutcome {
    Idle,
    Failed(i32),
}

/// A non-blocking TCP client connection driven by readiness notifications.
///
/// Owned by one event-loop thread. Cross-thread producers obtain a
/// [`Handle`](crate::Handle) via [`handle()`](TcpClient::handle).
pub struct TcpClient {
    shared: Arc<Shared>,
    callbacks: Callbacks,
    poll: Poll,
    events: Events,
    stream: Option<TcpStream>,
    registration: Registration,
    host: Option<String>,
    port: u16,
    resolved: Vec<SocketAddr>,
    pre_resolved: bool,
    addr_pos: usize,
    last_connect_err: Option<io::Error>,
    in_flight: Option<InFlight>,
    recv_buf: Vec<u8>,
    readable: bool,
    writable: bool,
    nodelay: bool,
}

impl TcpClient {
    pub fn new(config: Config, callbacks: Callbacks) -> Result<Self, Error> {
        let poll = Poll::new().map_err(Error::Io)?;
        let wakeup = Wakeup::new()?;
        let wakeup_fd = wakeup.as_raw_fd();
        poll.registry()
            .register(&mut SourceFd(&wakeup_fd), WAKEUP, Interest::READABLE)
            .map_err(Error::Registration)?;

        Ok(Self {
            shared: Arc::new(Shared::new(config.max_messages, wakeup)),
            callbacks,
            poll,
            events: Events::with_capacity(16),
            stream: None,
            registration: Registration::default(),
            host: None,
            port: 0,
            resolved: Vec::new(),
            pre_resolved: false,
            addr_pos: 0,
            last_connect_err: None,
            in_flight: None,
            recv_buf: vec![0u8; config.recv_buf_size],
            readable: false,
            writable: false,
            nodelay: config.tcp_nodelay,
        })
    }

    /// Bind the target host and port. Only legal while disconnected; the
    /// host is resolved when `connect()` is called.
    pub fn init(&mut self, host: &str, port: u16) -> Result<(), Error> {
        if self.shared.state() != State::Disconnected {
            return Err(Error::InvalidState("init"));
        }
        self.host = Some(host.to_string());
        self.port = port;
        self.resolved.clear();
        self.pre_resolved = false;
        Ok(())
    }

    /// Bind the target from a `tcp://host:port` or `host:port` string.
    pub fn init_url(&mut self, url: &str) -> Result<(), Error> {
        let rest = url.strip_prefix("tcp://").unwrap_or(url);
        let (host, port) = rest
            .rsplit_once(':')
            .ok_or_else(|| Error::InvalidAddress(url.to_string()))?;
        let port: u16 = port
            .parse()
            .map_err(|_| Error::InvalidAddress(url.to_string()))?;
        self.init(host, port)
    }

    /// Bind a pre-resolved address list, attempted in order at connect time.
    pub fn init_addrs(&mut self, addrs: Vec<SocketAddr>) -> Result<(), Error> {
        if self.shared.state() != State::Disconnected {
            return Err(Error::InvalidState("init"));
        }
        self.host = None;
        self.resolved = addrs;
        self.pre_resolved = true;
        Ok(())
    }

    /// Disable (`true`) or keep (`false`) the Nagle algorithm; applied when
    /// the connection is established.
    pub fn set_nodelay(&mut self, nodelay: bool) {
        self.nodelay = nodelay;
    }

    /// Initiate a non-blocking connect toward the bound target. A no-op if
    /// already connecting or connected. The outcome is reported exactly once
    /// via the connection-result callback.
    pub fn connect(&mut self) -> Result<(), Error> {
        match self.shared.state() {
            State::Connecting | State::Connected => return Ok(()),
            State::Disconnecting => return Err(Error::InvalidState("connect")),
            State::Disconnected => {}
        }
        // A close requested against the previous connection must not leak
        // into this one.
        self.shared.pending_close.store(false, Ordering::Release);
        // A producer that loaded the connected state just before the previous
        // teardown drained the queue can slip a buffer in after the drain.
        // Surface it here rather than sending it to a different peer.
        while let Some(buf) = self.shared.queue.pop_if_any() {
            (self.callbacks.on_write_result)(
                Err(io::Error::from_raw_os_error(libc::ECANCELED)),
                &buf,
                0,
            );
        }

        if !self.pre_resolved {
            let host = match self.host.clone() {
                Some(host) => host,
                None => return Err(Error::InvalidState("connect")),
            };
            match (host.as_str(), self.port).to_socket_addrs() {
                Ok(addrs) => self.resolved = addrs.collect(),
                Err(e) => {
                    debug!(host = %host, error = %e, "host resolution failed");
                    (self.callbacks.on_connection_result)(ConnectionResult::HostUnknown);
                    return Ok(());
                }
            }
        }
        if self.resolved.is_empty() {
            (self.callbacks.on_connection_result)(ConnectionResult::HostUnknown);
            return Ok(());
        }

        self.addr_pos = 0;
        self.last_connect_err = None;
        self.shared.set_state(State::Connecting);
        self.start_connect_attempt();
        Ok(())
    }

    /// Abandon a connect attempt that has run past its externally enforced
    /// deadline. The core runs no timer of its own; a surrounding timer
    /// source calls this, yielding exactly one `Timeout` result.
    pub fn abort_connect(&mut self) {
        if self.shared.state() != State::Connecting {
            return;
        }
        debug!("connect attempt abandoned");
        self.drop_socket();
        self.shared.set_state(State::Disconnected);
        (self.callbacks.on_connection_result)(ConnectionResult::Timeout);
    }

    /// Cloneable producer-side surface for other threads.
    pub fn handle(&self) -> crate::Handle {
        crate::Handle::new(self.shared.clone())
    }

    /// Enqueue a buffer for sending. See [`Handle::write`](crate::Handle::write).
    pub fn write(&self, data: impl Into<Vec<u8>>) -> bool {
        self.shared.try_write(data.into())
    }

    /// Request an orderly close once queued sends drain. Idempotent.
    pub fn request_close(&self) {
        self.shared.request_close();
    }

    pub fn state(&self) -> State {
        self.shared.state()
    }

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

    /// Drain one round of pending work: wakeup drain, connect completion,
    /// socket reads and writes, close-request handling, and registration
    /// rearm. Called by the host event loop when this unit's handle is
    /// readable; never blocks.
    pub fn process_one_ready_event(&mut self) -> Result<(), Error> {
        self.poll
            .poll(&mut self.events, Some(Duration::ZERO))
            .map_err(Error::Io)?;

        let mut wake = false;
        let mut socket_error = false;
        for event in self.events.iter() {
            match event.token() {
                WAKEUP => wake = true,
                SOCKET => {
                    if event.is_readable() || event.is_read_closed() {
                        self.readable = true;
                    }
                    if event.is_writable() {
                        self.writable = true;
                    }
                    if event.is_error() {
                        socket_error = true;
                    }
                }
                _ => {}
            }
        }
        if wake {
            self.shared.wakeup.drain();
        }

        if self.shared.state() == State::Connecting && (socket_error || self.writable) {
            self.complete_connect();
            socket_error = false;
        }

        if matches!(self.shared.state(), State::Connected | State::Disconnecting) {
            if socket_error {
                let errno = self.take_socket_error();
                self.teardown(false, errno);
            } else {
                match self.drain_reads() {
                    ReadOutcome::Idle => {}
                    ReadOutcome::PeerClosed => self.teardown(true, libc::EPIPE),
                    ReadOutcome::Failed(errno) => self.teardown(false, errno),
                }
            }
        }

        if matches!(self.shared.state(), State::Connected | State::Disconnecting) {
            if self.shared.state() == State::Connected
                && self.shared.pending_close.load(Ordering::Acquire)
            {
                debug!("close requested, draining sends");
                self.shared.set_state(State::Disconnecting);
            }
            match self.flush_writes() {
                WriteOutcome::Idle => {}
                WriteOutcome::Failed(errno) => self.teardown(false, errno),
            }
            if self.shared.state() == State::Disconnecting
                && self.in_flight.is_none()
                && self.shared.queue.len() == 0
            {
                self.teardown(false, libc::ECANCELED);
            }
        }

        self.rearm();
        Ok(())
    }

    fn start_connect_attempt(&mut self) {
        while self.addr_pos < self.resolved.len() {
            let addr = self.resolved[self.addr_pos];
            match self.begin_connect(addr) {
                Ok(stream) => {
                    self.stream = Some(stream);
                    self.readable = false;
                    self.writable = false;
                    self.rearm();
                    trace!(%addr, "connect issued");
                    return;
                }
                Err(e) => {
                    debug!(%addr, error = %e, "connect attempt failed");
                    self.last_connect_err = Some(e);
                    self.addr_pos += 1;
                }
            }
        }
        let result = classify_connect_errno(
            self.last_connect_err.as_ref().and_then(|e| e.raw_os_error()),
        );
        self.finish_failed_connect(result);
    }

    fn begin_connect(&self, addr: SocketAddr) -> io::Result<TcpStream> {
        let domain = match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        };
        let socket = socket2::Socket::new(
            domain,
            socket2::Type::STREAM,
            Some(socket2::Protocol::TCP),
        )?;
        socket.set_nonblocking(true)?;
        match socket.connect(&addr.into()) {
            Ok(()) => {}
            Err(e) if e.raw_os_error() == Some(libc::EINPROGRESS) => {}
            Err(e) => return Err(e),
        }
        Ok(TcpStream::from_std(socket.into()))
    }

    /// Inspect the pending socket error once the non-blocking connect signals
    /// completion via writability.
    fn complete_connect(&mut self) {
        let pending = match self.stream.as_ref() {
            Some(stream) => stream.take_error(),
            None => return,
        };
        match pending {
            Ok(None) => {
                if self.nodelay {
                    if let Some(stream) = self.stream.as_ref() {
                        let _ = stream.set_nodelay(true);
                    }
                }
                self.shared.set_state(State::Connected);
                self.writable = true;
                debug!("connected");
                (self.callbacks.on_connection_result)(ConnectionResult::Success);
            }
            Ok(Some(e)) | Err(e) => {
                trace!(error = %e, "connect completed with error");
                self.last_connect_err = Some(e);
                self.addr_pos += 1;
                self.drop_socket();
                self.start_connect_attempt();
            }
        }
    }

    fn finish_failed_connect(&mut self, result: ConnectionResult) {
        self.drop_socket();
        self.shared.set_state(State::Disconnected);
        debug!(?result, "connect failed");
        (self.callbacks.on_connection_result)(result);
    }

    fn take_socket_error(&self) -> i32 {
        self.stream
            .as_ref()
            .and_then(|s| s.take_error().ok())
            .flatten()
            .and_then(|e| e.raw_os_error())
            .unwrap_or(libc::EIO)
    }

    /// Drain readable bytes until the socket would block. Each non-empty
    /// receive is delivered to the data callback as a transient view.
    fn drain_reads(&mut self) -> ReadOutcome {
        if !self.readable {
            return ReadOutcome::Idle;
        }
        loop {
            let result = match self.stream.as_mut() {
                Some(stream) => stream.read(&mut self.recv_buf),
                None => return ReadOutcome::Idle,
            };
            match result {
                Ok(0) => {
                    trace!("peer closed connection");
                    return ReadOutcome::PeerClosed;
                }
                Ok(n) => {
                    self.shared.msgs_received.fetch_add(1, Ordering::Relaxed);
                    (self.callbacks.on_received_data)(&self.recv_buf[..n]);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    self.readable = false;
                    return ReadOutcome::Idle;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    return ReadOutcome::Failed(e.raw_os_error().unwrap_or(libc::EIO));
                }
            }
        }
    }

    /// Drain the send queue onto the socket, one in-flight buffer at a time.
    /// A fully sent buffer fires its write-result callback and the next is
    /// popped immediately; a partial send keeps the cursor and waits for the
    /// next writable event.
    fn flush_writes(&mut self) -> WriteOutcome {
        loop {
            if self.in_flight.is_none() {
                match self.shared.queue.pop_if_any() {
                    Some(buf) => self.in_flight = Some(InFlight { buf, sent: 0 }),
                    None => return WriteOutcome::Idle,
                }
            }
            if !self.writable {
                return WriteOutcome::Idle;
            }
            let result = match (self.stream.as_mut(), self.in_flight.as_ref()) {
                (Some(stream), Some(inflight)) => stream.write(&inflight.buf[inflight.sent..]),
                _ => return WriteOutcome::Idle,
            };
            match result {
                Ok(n) => {
                    self.shared.bytes_sent.fetch_add(n as u64, Ordering::Relaxed);
                    let complete = match self.in_flight.as_mut() {
                        Some(inflight) => {
                            inflight.sent += n;
                            inflight.sent == inflight.buf.len()
                        }
                        None => return WriteOutcome::Idle,
                    };
                    if complete {
                        if let Some(done) = self.in_flight.take() {
                            self.shared.msgs_sent.fetch_add(1, Ordering::Relaxed);
                            (self.callbacks.on_write_result)(Ok(()), &done.buf, done.buf.len());
                        }
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    self.writable = false;
                    return WriteOutcome::Idle;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    let errno = e.raw_os_error().unwrap_or(libc::EIO);
                    if let Some(failed) = self.in_flight.take() {
                        (self.callbacks.on_write_result)(Err(e), &failed.buf, failed.sent);
                    }
                    return WriteOutcome::Failed(errno);
                }
            }
        }
    }

    /// Tear down from a connected state: report any unattempted buffers,
    /// release the socket, and fire the disconnect callback exactly once.
    fn teardown(&mut self, from_peer: bool, errno: i32) {
        if self.shared.state() == State::Disconnected {
            return;
        }
        self.shared.set_state(State::Disconnecting);
        self.fail_pending_writes(errno);
        self.drop_socket();
        self.shared.pending_close.store(false, Ordering::Release);
        self.shared.set_state(State::Disconnected);
        debug!(from_peer, "disconnected");
        (self.callbacks.on_disconnected)(from_peer);
    }

    /// Each queued or in-flight buffer receives exactly one write-result
    /// callback before being discarded.
    fn fail_pending_writes(&mut self, errno: i32) {
        if let Some(inflight) = self.in_flight.take() {
            (self.callbacks.on_write_result)(
                Err(io::Error::from_raw_os_error(errno)),
                &inflight.buf,
                inflight.sent,
            );
        }
        while let Some(buf) = self.shared.queue.pop_if_any() {
            (self.callbacks.on_write_result)(Err(io::Error::from_raw_os_error(errno)), &buf, 0);
        }
    }

    /// Dropping the stream closes the fd and removes it from the poll set:
    /// the single release point for the socket resource.
    fn drop_socket(&mut self) {
        self.registration.reset();
        self.stream = None;
        self.readable = false;
        self.writable = false;
    }

    /// Recompute the interest set from current need and push it to the
    /// registry. A rearm failure would silently stall the connection, so it
    /// is reported through the fault callback and forces disconnection.
    fn rearm(&mut self) {
        let want = match self.shared.state() {
            State::Disconnected => None,
            State::Connecting => Some(Interest::WRITABLE),
            State::Connected | State::Disconnecting => {
                let need_write = self.in_flight.is_some() || self.shared.queue.len() > 0;
                if need_write {
                    Some(Interest::READABLE | Interest::WRITABLE)
                } else {
                    Some(Interest::READABLE)
                }
            }
        };
        let stream = match self.stream.as_mut() {
            Some(stream) => stream,
            None => {
                self.registration.reset();
                return;
            }
        };
        if let Err(e) = self
            .registration
            .update(self.poll.registry(), stream, SOCKET, want)
        {
            warn!(error = %e, "readiness rearm failed");
            (self.callbacks.on_fault)(Error::Registration(e));
            self.teardown(false, libc::EIO);
        }
    }
}

impl AsRawFd for TcpClient {
    /// The waitable handle for host-loop registration: readable whenever the
    /// socket or the wakeup signal has a pending event.
    fn as_raw_fd(&self) -> RawFd {
        self.poll.as_raw_fd()
    }
}
