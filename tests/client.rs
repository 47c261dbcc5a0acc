//! Integration tests driving real loopback TCP connections.
//!
//! Each test plays the host event loop: it calls `process_one_ready_event`
//! in a polling loop while a `std::net` peer acts as the server side.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use tcp_client::{Callbacks, Config, ConnectionResult, State, TcpClient};

/// Everything the callbacks observed, in invocation order.
#[derive(Default)]
struct Recorded {
    results: Mutex<Vec<ConnectionResult>>,
    disconnects: Mutex<Vec<bool>>,
    /// (succeeded, buffer, written_size) per write-result callback.
    writes: Mutex<Vec<(bool, Vec<u8>, usize)>>,
    data: Mutex<Vec<u8>>,
}

fn recording_callbacks(recorded: &Arc<Recorded>) -> Callbacks {
    let results = recorded.clone();
    let disconnects = recorded.clone();
    let writes = recorded.clone();
    let data = recorded.clone();
    Callbacks::new()
        .on_connection_result(move |r| results.results.lock().unwrap().push(r))
        .on_disconnected(move |from_peer| disconnects.disconnects.lock().unwrap().push(from_peer))
        .on_write_result(move |result, written, size| {
            writes
                .writes
                .lock()
                .unwrap()
                .push((result.is_ok(), written.to_vec(), size));
        })
        .on_received_data(move |bytes| data.data.lock().unwrap().extend_from_slice(bytes))
}

fn drive_until(
    client: &mut TcpClient,
    timeout: Duration,
    mut done: impl FnMut(&TcpClient) -> bool,
) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        client.process_one_ready_event().unwrap();
        if done(client) {
            return true;
        }
        if Instant::now() > deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(1));
    }
}

fn listener() -> (TcpListener, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, addr)
}

/// Accepts one connection and reads until the client closes.
fn spawn_reader(listener: TcpListener) -> thread::JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let mut buf = Vec::new();
        stream.read_to_end(&mut buf).unwrap();
        buf
    })
}

fn connect_client(config: Config, addr: SocketAddr, recorded: &Arc<Recorded>) -> TcpClient {
    let mut client = TcpClient::new(config, recording_callbacks(recorded)).unwrap();
    client.init_addrs(vec![addr]).unwrap();
    client.connect().unwrap();
    assert!(drive_until(&mut client, Duration::from_secs(5), |c| {
        c.state() == State::Connected
    }));
    client
}

#[test]
fn connect_reports_success_once() {
    let (listener, addr) = listener();
    let recorded = Arc::new(Recorded::default());
    let mut client = connect_client(Config::default(), addr, &recorded);

    assert_eq!(
        *recorded.results.lock().unwrap(),
        vec![ConnectionResult::Success]
    );
    assert!(client.can_send_messages());

    // Idempotent: connecting again has no additional effect.
    client.connect().unwrap();
    client.process_one_ready_event().unwrap();
    assert_eq!(recorded.results.lock().unwrap().len(), 1);
    drop(listener);
}

#[test]
fn connect_refused_is_classified() {
    let (listener, addr) = listener();
    drop(listener); // nobody listens on this port anymore

    let recorded = Arc::new(Recorded::default());
    let mut client = TcpClient::new(Config::default(), recording_callbacks(&recorded)).unwrap();
    client.init_addrs(vec![addr]).unwrap();
    client.connect().unwrap();

    assert!(drive_until(&mut client, Duration::from_secs(5), |_| {
        !recorded.results.lock().unwrap().is_empty()
    }));
    assert_eq!(
        *recorded.results.lock().unwrap(),
        vec![ConnectionResult::CouldNotConnect]
    );
    assert_eq!(client.state(), State::Disconnected);
    assert!(recorded.disconnects.lock().unwrap().is_empty());
    assert!(recorded.writes.lock().unwrap().is_empty());
}

#[test]
fn resolution_failure_reports_host_unknown() {
    let recorded = Arc::new(Recorded::default());
    let mut client = TcpClient::new(Config::default(), recording_callbacks(&recorded)).unwrap();
    // .invalid is reserved and never resolves.
    client.init("no-such-host.invalid", 4096).unwrap();
    client.connect().unwrap();

    assert_eq!(
        *recorded.results.lock().unwrap(),
        vec![ConnectionResult::HostUnknown]
    );
    assert_eq!(client.state(), State::Disconnected);
}

#[test]
fn writes_complete_in_push_order() {
    let (listener, addr) = listener();
    let reader = spawn_reader(listener);

    let recorded = Arc::new(Recorded::default());
    let mut client = connect_client(Config::default(), addr, &recorded);

    assert!(client.write(&b"alpha"[..]));
    assert!(client.write(&b"beta"[..]));
    assert!(client.write(&b"gamma"[..]));

    assert!(drive_until(&mut client, Duration::from_secs(5), |c| {
        c.msgs_sent() == 3
    }));
    assert_eq!(client.bytes_sent(), 14);

    let writes = recorded.writes.lock().unwrap().clone();
    assert_eq!(
        writes,
        vec![
            (true, b"alpha".to_vec(), 5),
            (true, b"beta".to_vec(), 4),
            (true, b"gamma".to_vec(), 5),
        ]
    );

    client.request_close();
    assert!(drive_until(&mut client, Duration::from_secs(5), |c| {
        c.state() == State::Disconnected
    }));
    assert_eq!(*recorded.disconnects.lock().unwrap(), vec![false]);

    assert_eq!(reader.join().unwrap(), b"alphabetagamma");
}

#[test]
fn large_write_flushes_across_partial_sends() {
    let (listener, addr) = listener();
    // A deliberately slow reader keeps the socket send buffer full, so the
    // in-flight cursor has to advance across many writable events.
    let server = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let mut received = Vec::new();
        let mut chunk = [0u8; 65536];
        loop {
            match stream.read(&mut chunk) {
                Ok(0) => return received,
                Ok(n) => {
                    received.extend_from_slice(&chunk[..n]);
                    thread::sleep(Duration::from_millis(1));
                }
                Err(e) => panic!("peer read failed: {e}"),
            }
        }
    });

    let recorded = Arc::new(Recorded::default());
    let mut client = connect_client(Config::default(), addr, &recorded);

    let payload: Vec<u8> = (0..8 * 1024 * 1024u32).map(|i| (i % 251) as u8).collect();
    assert!(client.write(payload.clone()));

    assert!(drive_until(&mut client, Duration::from_secs(30), |c| {
        c.msgs_sent() == 1
    }));
    assert_eq!(client.bytes_sent(), payload.len() as u64);

    // One buffer, one completion, reported only once fully sent.
    let writes = recorded.writes.lock().unwrap().clone();
    assert_eq!(writes.len(), 1);
    let (ok, buf, size) = &writes[0];
    assert!(*ok);
    assert_eq!(*size, payload.len());
    assert_eq!(*buf, payload);

    client.request_close();
    assert!(drive_until(&mut client, Duration::from_secs(30), |c| {
        c.state() == State::Disconnected
    }));
    assert_eq!(server.join().unwrap(), payload);
}

#[test]
fn reset_with_queued_buffers_reports_each_once() {
    let (listener, addr) = listener();
    let acceptor = thread::spawn(move || listener.accept().unwrap().0);

    let recorded = Arc::new(Recorded::default());
    let mut client = connect_client(Config::default(), addr, &recorded);

    // Zero linger makes the peer's close an immediate reset.
    let peer = socket2::Socket::from(acceptor.join().unwrap());
    peer.set_linger(Some(Duration::from_secs(0))).unwrap();
    drop(peer);
    thread::sleep(Duration::from_millis(50));

    assert!(client.write(&b"one"[..]));
    assert!(client.write(&b"two"[..]));
    assert!(client.write(&b"three"[..]));

    assert!(drive_until(&mut client, Duration::from_secs(5), |c| {
        c.state() == State::Disconnected
    }));

    // Each queued buffer fails exactly once, in order, before the single
    // disconnect notification; none of them count as sent.
    let writes = recorded.writes.lock().unwrap().clone();
    assert_eq!(writes.len(), 3);
    for (ok, _, sent) in &writes {
        assert!(!*ok);
        assert_eq!(*sent, 0);
    }
    let buffers: Vec<Vec<u8>> = writes.into_iter().map(|(_, buf, _)| buf).collect();
    assert_eq!(
        buffers,
        vec![b"one".to_vec(), b"two".to_vec(), b"three".to_vec()]
    );
    assert_eq!(recorded.disconnects.lock().unwrap().len(), 1);
    assert_eq!(client.msgs_sent(), 0);
}

#[test]
fn received_bytes_then_peer_close() {
    let (listener, addr) = listener();
    let payload: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
    let sent = payload.clone();
    let server = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        stream.write_all(&sent).unwrap();
        // dropping the stream sends FIN
    });

    let recorded = Arc::new(Recorded::default());
    let mut client = connect_client(Config::default(), addr, &recorded);

    assert!(drive_until(&mut client, Duration::from_secs(5), |_| {
        !recorded.disconnects.lock().unwrap().is_empty()
    }));
    server.join().unwrap();

    assert_eq!(*recorded.disconnects.lock().unwrap(), vec![true]);
    assert_eq!(*recorded.data.lock().unwrap(), payload);
    assert!(client.msgs_received() >= 2); // larger than one recv buffer
    assert_eq!(client.state(), State::Disconnected);
}

#[test]
fn queue_capacity_applies_backpressure() {
    let (listener, addr) = listener();
    let reader = spawn_reader(listener);

    let config = Config {
        max_messages: 2,
        ..Config::default()
    };
    let recorded = Arc::new(Recorded::default());
    let mut client = connect_client(config, addr, &recorded);

    // Nothing drains between these pushes: the loop is not being driven.
    assert!(client.write(&b"one"[..]));
    assert!(client.write(&b"two"[..]));
    assert!(!client.write(&b"three"[..]));
    assert!(!client.can_send_messages());

    assert!(drive_until(&mut client, Duration::from_secs(5), |c| {
        c.msgs_sent() == 2
    }));
    assert!(client.can_send_messages());
    assert!(client.write(&b"four"[..]));
    assert!(drive_until(&mut client, Duration::from_secs(5), |c| {
        c.msgs_sent() == 3
    }));

    client.request_close();
    assert!(drive_until(&mut client, Duration::from_secs(5), |c| {
        c.state() == State::Disconnected
    }));
    assert_eq!(reader.join().unwrap(), b"onetwofour");
}

#[test]
fn request_close_flushes_queued_writes_first() {
    let (listener, addr) = listener();
    let reader = spawn_reader(listener);

    let recorded = Arc::new(Recorded::default());
    let mut client = connect_client(Config::default(), addr, &recorded);
    let handle = client.handle();

    assert!(handle.write(&b"aa"[..]));
    assert!(handle.write(&b"bb"[..]));
    assert!(handle.write(&b"cc"[..]));
    handle.request_close();
    handle.request_close(); // idempotent
    assert!(!handle.write(&b"dd"[..]));

    assert!(drive_until(&mut client, Duration::from_secs(5), |_| {
        handle.state() == State::Disconnected
    }));

    let writes = recorded.writes.lock().unwrap().clone();
    assert_eq!(
        writes,
        vec![
            (true, b"aa".to_vec(), 2),
            (true, b"bb".to_vec(), 2),
            (true, b"cc".to_vec(), 2),
        ]
    );
    assert_eq!(*recorded.disconnects.lock().unwrap(), vec![false]);
    assert_eq!(reader.join().unwrap(), b"aabbcc");
}

#[test]
fn concurrent_producers_each_buffer_reported_once() {
    let (listener, addr) = listener();
    let reader = spawn_reader(listener);

    let config = Config {
        max_messages: 64,
        ..Config::default()
    };
    let recorded = Arc::new(Recorded::default());
    let mut client = connect_client(config, addr, &recorded);

    let producers: Vec<_> = (0..4u8)
        .map(|t| {
            let handle = client.handle();
            thread::spawn(move || {
                for i in 0..8u8 {
                    while !handle.write(vec![t, i]) {
                        thread::yield_now();
                    }
                }
            })
        })
        .collect();
    for p in producers {
        p.join().unwrap();
    }

    assert!(drive_until(&mut client, Duration::from_secs(5), |c| {
        c.msgs_sent() == 32
    }));
    assert_eq!(client.bytes_sent(), 64);

    let mut buffers: Vec<Vec<u8>> = recorded
        .writes
        .lock()
        .unwrap()
        .iter()
        .map(|(ok, buf, size)| {
            assert!(*ok);
            assert_eq!(*size, buf.len());
            buf.clone()
        })
        .collect();
    buffers.sort();
    buffers.dedup();
    assert_eq!(buffers.len(), 32);

    client.request_close();
    assert!(drive_until(&mut client, Duration::from_secs(5), |c| {
        c.state() == State::Disconnected
    }));
    assert_eq!(reader.join().unwrap().len(), 64);
}

#[test]
fn counters_accumulate_across_reconnects() {
    let (listener, addr) = listener();
    let recorded = Arc::new(Recorded::default());

    let first_reader = spawn_reader(listener);
    let mut client = connect_client(Config::default(), addr, &recorded);
    assert!(client.write(&b"ab"[..]));
    assert!(drive_until(&mut client, Duration::from_secs(5), |c| {
        c.msgs_sent() == 1
    }));
    client.request_close();
    assert!(drive_until(&mut client, Duration::from_secs(5), |c| {
        c.state() == State::Disconnected
    }));
    assert_eq!(first_reader.join().unwrap(), b"ab");

    // Reconnect against a fresh listener on the same address list.
    let listener = TcpListener::bind(addr).unwrap();
    let second_reader = spawn_reader(listener);
    client.connect().unwrap();
    assert!(drive_until(&mut client, Duration::from_secs(5), |c| {
        c.state() == State::Connected
    }));
    assert!(client.write(&b"cd"[..]));
    assert!(drive_until(&mut client, Duration::from_secs(5), |c| {
        c.msgs_sent() == 2
    }));
    client.request_close();
    assert!(drive_until(&mut client, Duration::from_secs(5), |c| {
        c.state() == State::Disconnected
    }));
    assert_eq!(second_reader.join().unwrap(), b"cd");

    assert_eq!(client.bytes_sent(), 4);
    assert_eq!(client.msgs_sent(), 2);
    assert_eq!(
        *recorded.results.lock().unwrap(),
        vec![ConnectionResult::Success, ConnectionResult::Success]
    );
    assert_eq!(*recorded.disconnects.lock().unwrap(), vec![false, false]);
}

#[test]
fn abort_connect_reports_timeout() {
    let recorded = Arc::new(Recorded::default());
    let mut client = TcpClient::new(Config::default(), recording_callbacks(&recorded)).unwrap();
    // Non-routable (RFC 5737 TEST-NET-3): the SYN goes unanswered, keeping
    // the attempt in Connecting. On hosts with no such route the connect
    // fails immediately instead, which is also a valid single result.
    client
        .init_addrs(vec!["203.0.113.1:9".parse().unwrap()])
        .unwrap();
    client.connect().unwrap();
    client.process_one_ready_event().unwrap();

    if client.state() == State::Connecting {
        client.abort_connect();
        assert_eq!(
            *recorded.results.lock().unwrap(),
            vec![ConnectionResult::Timeout]
        );
    } else {
        let results = recorded.results.lock().unwrap().clone();
        assert_eq!(results.len(), 1);
        assert_ne!(results[0], ConnectionResult::Success);
    }
    assert_eq!(client.state(), State::Disconnected);
}

#[test]
fn wait_state_unblocks_on_transition() {
    let (listener, addr) = listener();
    let recorded = Arc::new(Recorded::default());
    let mut client = TcpClient::new(Config::default(), recording_callbacks(&recorded)).unwrap();
    client.init_addrs(vec![addr]).unwrap();

    let handle = client.handle();
    let reached = Arc::new(AtomicBool::new(false));
    let flag = reached.clone();
    let waiter = thread::spawn(move || {
        handle.wait_state(State::Connected);
        flag.store(true, Ordering::Release);
    });

    client.connect().unwrap();
    assert!(drive_until(&mut client, Duration::from_secs(5), |_| {
        reached.load(Ordering::Acquire)
    }));
    waiter.join().unwrap();
    drop(listener);
}
