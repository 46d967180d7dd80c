//! End-to-end scenarios exercising two in-process `Talker`s over real loopback UDP sockets -
//! S1, S2, S3, and a large-payload analog of S4 from SPEC_FULL.md's testable-properties table.
//! S5 (restart mid-message) is exercised directly against `Connector::reconnect` in
//! `connector.rs`'s unit tests, since a restart is sender-local state surgery, not something a
//! two-Talker loopback harness can usefully simulate. S6 (broadcast kill of 1000 objects) is a
//! `nucleus-core::service` property and is tested there.

use mio::net::UdpSocket;
use nucleus_core::identity::{FullId, Handle};
use nucleus_core::object::{Object, ObjectCore, IN_DONE};
use nucleus_core::serialize::{CommandMarker, ReadCursor, WriteCursor};
use nucleus_ipc::{IpcConfig, Talker, TalkerSink};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn handle(service_idx: u32) -> Handle {
    Handle::new(FullId::encode(service_idx, 0), 0)
}

struct Collector {
    segments: Mutex<Vec<(SocketAddr, u64, CommandMarker, Vec<u8>)>>,
}

impl Collector {
    fn new() -> Arc<Collector> {
        Arc::new(Collector { segments: Mutex::new(Vec::new()) })
    }

    /// Reassembles every message's segments (`NewCommand` plus however many `ContinuedCommand`
    /// chunks followed it) into its full body, keyed by the wire message id so concurrently
    /// interleaved messages never bleed into each other. Returned in the order each message's
    /// first segment was delivered.
    fn completed_messages(&self) -> Vec<Vec<u8>> {
        let segments = self.segments.lock();
        let mut order: Vec<u64> = Vec::new();
        let mut bodies: HashMap<u64, Vec<u8>> = HashMap::new();

        for (_, message_id, _marker, body) in segments.iter() {
            if !bodies.contains_key(message_id) {
                order.push(*message_id);
            }
            bodies.entry(*message_id).or_default().extend_from_slice(body);
        }

        order.into_iter().map(|id| bodies.remove(&id).unwrap()).collect()
    }
}

impl TalkerSink for Collector {
    fn deliver(&self, peer: SocketAddr, message_id: u64, marker: CommandMarker, body: Vec<u8>) {
        self.segments.lock().push((peer, message_id, marker, body));
    }
}

fn bind_talker(service_idx: u32, config: IpcConfig, sink: Arc<dyn TalkerSink>) -> (Talker, SocketAddr) {
    let socket = UdpSocket::bind("127.0.0.1:0".parse().unwrap()).unwrap();
    let addr = socket.local_addr().unwrap();
    let base_port = addr.port() as u32;
    (Talker::new(ObjectCore::new(handle(service_idx)), socket, base_port, config, sink), addr)
}

fn encode_ping(n: u32) -> Vec<u8> {
    let mut buf = vec![0u8; 4];
    WriteCursor::new(&mut buf).write_u32(n).unwrap();
    buf
}

/// Drives every talker's `execute()` in a tight loop until `done` reports success or `timeout`
/// elapses - standing in for a real selector pool's worker thread for test purposes.
fn pump(talkers: &[&Talker], timeout: Duration, mut done: impl FnMut() -> bool) {
    let start = Instant::now();
    while start.elapsed() < timeout {
        for talker in talkers {
            let mut deadline = Instant::now() + Duration::from_millis(10);
            talker.execute(IN_DONE, &mut deadline);
        }
        if done() {
            return;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn test_s1_ping_delivered_exactly_once_within_a_second() {
    let b_sink = Collector::new();
    let (b, b_addr) = bind_talker(1, IpcConfig::default(), b_sink.clone());
    let a_sink = Collector::new();
    let (a, _a_addr) = bind_talker(0, IpcConfig::default(), a_sink.clone());

    let idx = a.connect(b_addr);
    assert!(a.send_message(idx, encode_ping(42), true, false));

    pump(&[&a, &b], Duration::from_secs(1), || !b_sink.completed_messages().is_empty());

    let bodies = b_sink.completed_messages();
    assert_eq!(bodies.len(), 1, "Ping{{42}} observed exactly once");
    assert_eq!(ReadCursor::new(&bodies[0]).read_u32().unwrap(), 42);
}

/// A UDP relay standing in for a lossy link between A and B: learns A's address from its first
/// datagram, silently drops the first `drop_count` it would otherwise forward on to B, and
/// relays everything else (both directions) unconditionally.
fn spawn_lossy_relay(real_b: SocketAddr, drop_count: usize) -> SocketAddr {
    let a_facing = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
    a_facing.set_read_timeout(Some(Duration::from_millis(20))).unwrap();
    let a_facing_addr = a_facing.local_addr().unwrap();

    let b_facing = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
    b_facing.set_read_timeout(Some(Duration::from_millis(20))).unwrap();

    std::thread::spawn(move || {
        let mut dropped = 0usize;
        let mut buf = [0u8; 2048];
        let mut a_peer: Option<SocketAddr> = None;

        loop {
            if let Ok((n, from)) = a_facing.recv_from(&mut buf) {
                a_peer = Some(from);
                if dropped < drop_count {
                    dropped += 1;
                } else {
                    let _ = b_facing.send_to(&buf[..n], real_b);
                }
            }

            if let Ok((n, _)) = b_facing.recv_from(&mut buf) {
                if let Some(peer) = a_peer {
                    let _ = a_facing.send_to(&buf[..n], peer);
                }
            }
        }
    });

    a_facing_addr
}

#[test]
fn test_s2_dropped_datagrams_recovered_by_retransmit_delivered_exactly_once() {
    let b_sink = Collector::new();
    let (b, b_addr) = bind_talker(1, IpcConfig::default(), b_sink.clone());
    let a_sink = Collector::new();
    let (a, _a_addr) = bind_talker(0, IpcConfig::default(), a_sink.clone());

    let relay_addr = spawn_lossy_relay(b_addr, 2);
    let idx = a.connect(relay_addr);
    assert!(a.send_message(idx, encode_ping(42), true, false));

    pump(&[&a, &b], Duration::from_secs(5), || !b_sink.completed_messages().is_empty());

    let bodies = b_sink.completed_messages();
    assert_eq!(bodies.len(), 1, "B sees Ping{{42}} exactly once despite the two dropped datagrams");
    assert_eq!(ReadCursor::new(&bodies[0]).read_u32().unwrap(), 42);
}

#[test]
fn test_s3_large_messages_arrive_in_order_when_only_one_is_active_at_a_time() {
    // Forcing one message into rotation at a time collapses `fill_payload`'s fairness rotation
    // to strict FIFO, so completion order is queue order with no interleaving to reason about.
    let config = IpcConfig { max_send_command_queue: 1, ..IpcConfig::default() };

    let b_sink = Collector::new();
    let (b, b_addr) = bind_talker(1, config.clone(), b_sink.clone());
    let a_sink = Collector::new();
    let (a, _a_addr) = bind_talker(0, config.clone(), a_sink.clone());

    let idx = a.connect(b_addr);

    // Each message needs more than MaxCommandBufferCount (32) buffers to send in full.
    let per_buffer = config.payload_mtu - 1;
    let message_len = per_buffer * (config.max_command_buffer_count as usize + 8);

    for tag in 1u8..=3 {
        let mut data = vec![tag; message_len];
        data[0] = tag;
        assert!(a.send_message(idx, data, true, false));
    }

    pump(&[&a, &b], Duration::from_secs(10), || b_sink.completed_messages().len() >= 3);

    let bodies = b_sink.completed_messages();
    assert_eq!(bodies.len(), 3);
    let tags: Vec<u8> = bodies.iter().map(|body| body[0]).collect();
    assert_eq!(tags, vec![1, 2, 3], "messages complete in the order they were queued, no interleaving");
}

#[test]
fn test_s3b_several_concurrently_queued_messages_interleave_and_each_arrives_intact() {
    // Default config: up to MaxSendCommandQueueSize (16) messages rotate through fill_payload's
    // fairness loop, so their segments genuinely interleave inside shared buffers. Each message's
    // segments still carry its own id, so the receiver reassembles every one uncorrupted.
    let config = IpcConfig::default();

    let b_sink = Collector::new();
    let (b, b_addr) = bind_talker(1, config.clone(), b_sink.clone());
    let a_sink = Collector::new();
    let (a, _a_addr) = bind_talker(0, config.clone(), a_sink.clone());

    let idx = a.connect(b_addr);

    // Several buffers' worth per message, so many ticks see more than one message active at once.
    let per_buffer = config.payload_mtu - 1;
    let message_len = per_buffer * 6;

    let mut expected: Vec<Vec<u8>> = Vec::new();
    for tag in 1u8..=5 {
        let data = vec![tag; message_len];
        expected.push(data.clone());
        assert!(a.send_message(idx, data, true, false));
    }

    pump(&[&a, &b], Duration::from_secs(10), || b_sink.completed_messages().len() >= 5);

    let mut bodies = b_sink.completed_messages();
    bodies.sort_by_key(|b| b[0]);
    expected.sort_by_key(|b| b[0]);
    assert_eq!(bodies, expected, "every concurrently interleaved message arrives byte-for-byte intact");
}

#[test]
fn test_large_single_message_delivered_byte_for_byte_across_many_buffers() {
    // A transport-layer analog of S4 (the embedded-4MiB-stream scenario): this crate moves a
    // message spanning many buffers without loss or corruption. This only exercises this crate's
    // own reliable-delivery chunking; an embedded `Streammer` fragmented through
    // `Engine::drive_serialize` is a distinct mechanism covered by `nucleus_core::serialize`'s
    // own tests (see `engine.rs`'s `test_drive_serialize_*` cases), not this one.
    let b_sink = Collector::new();
    let (b, b_addr) = bind_talker(1, IpcConfig::default(), b_sink.clone());
    let a_sink = Collector::new();
    let (a, _a_addr) = bind_talker(0, IpcConfig::default(), a_sink.clone());

    let idx = a.connect(b_addr);
    let payload: Vec<u8> = (0..200_000usize).map(|i| (i % 251) as u8).collect();
    assert!(a.send_message(idx, payload.clone(), true, false));

    pump(&[&a, &b], Duration::from_secs(10), || !b_sink.completed_messages().is_empty());

    let bodies = b_sink.completed_messages();
    assert_eq!(bodies.len(), 1);
    assert_eq!(bodies[0].len(), payload.len());
    assert_eq!(bodies[0], payload);
}
