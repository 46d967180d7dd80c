//! The Talker: an `Object` hosted in the UDP talker pool. Owns one UDP socket, a connector per
//! peer, and drives the handshake/retransmit/composition logic in `connector::Connector` on
//! every tick.

use crate::config::IpcConfig;
use crate::connector::{Connector, ConnectorAction};
use crate::packet::{BufferType, Header, HEADER_LEN};
use hashbrown::HashMap;
use mio::net::UdpSocket;
use mio::Interest;
use nucleus_core::identity::{Handle, SlotTable};
use nucleus_core::object::{ExecResult, Object, ObjectCore, EventMask, IN_DONE};
use nucleus_core::serialize::{CommandMarker, ReadCursor};
use parking_lot::Mutex;
use std::io;
use std::net::SocketAddr;
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::Arc;
use std::time::Instant;

/// Where a Talker delivers fully-reassembled command segments it receives. A real deployment
/// wires this to the command executer; tests use a simple in-memory collector. `message_id`
/// identifies which logical message a `ContinuedCommand` segment belongs to, since up to
/// `max_send_command_queue` messages may have chunks interleaved in one buffer.
pub trait TalkerSink: Send + Sync {
    fn deliver(&self, peer: SocketAddr, message_id: u64, marker: CommandMarker, body: Vec<u8>);
}

struct State {
    socket: UdpSocket,
    base_port: u32,
    connectors: SlotTable<Connector>,
    by_addr: HashMap<SocketAddr, u32>,
    next_message_id: u64,
    sink: Arc<dyn TalkerSink>,
    config: IpcConfig,
}

pub struct Talker {
    core: ObjectCore,
    state: Mutex<State>,
}

impl Talker {
    pub fn new(core: ObjectCore, socket: UdpSocket, base_port: u32, config: IpcConfig, sink: Arc<dyn TalkerSink>) -> Talker {
        Talker {
            core,
            state: Mutex::new(State {
                socket,
                base_port,
                connectors: SlotTable::new(),
                by_addr: HashMap::new(),
                next_message_id: 1,
                sink,
                config,
            }),
        }
    }

    /// Initiates a connection to `peer`, returning the connector index used to address it for
    /// `send_message`.
    pub fn connect(&self, peer: SocketAddr) -> u32 {
        let mut state = self.state.lock();
        let config = state.config.clone();
        let (idx, _gen) = state.connectors.insert(Connector::connecting(peer, config));
        state.by_addr.insert(peer, idx);
        idx
    }

    /// Queues `data` for reliable delivery to the connector at `idx`. Returns `false` if the
    /// connector no longer exists (a stale reference is a silent no-op, per the framework's
    /// `Gone` discipline).
    pub fn send_message(&self, idx: u32, data: Vec<u8>, resendable: bool, session_scoped: bool) -> bool {
        let mut state = self.state.lock();
        let msg_id = state.next_message_id;
        state.next_message_id += 1;

        let gen = match state.connectors.gen_of(idx) {
            Some(g) => g,
            None => return false,
        };

        match state.connectors.get_mut(idx, gen).found() {
            Some(connector) => {
                connector.queue_message(msg_id, data, resendable, session_scoped);
                true
            }
            None => false,
        }
    }

    fn drain_incoming(&self, state: &mut State) {
        let mut buf = [0u8; 2048];
        loop {
            let (n, from) = match state.socket.recv_from(&mut buf) {
                Ok(v) => v,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(_) => break,
            };

            if n < HEADER_LEN {
                continue;
            }

            let mut cursor = ReadCursor::new(&buf[..n]);
            let header = match Header::decode(&mut cursor) {
                Ok(h) => h,
                Err(_) => continue,
            };

            let ack_count = header.ack_count as usize;
            let mut ack_ids = Vec::with_capacity(ack_count);
            let mut ok = true;
            for _ in 0..ack_count {
                match cursor.read_u32() {
                    Ok(id) => ack_ids.push(id),
                    Err(_) => {
                        ok = false;
                        break;
                    }
                }
            }
            if !ok {
                continue;
            }

            let payload_start = HEADER_LEN + ack_count * 4;
            let payload = &buf[payload_start..n];

            let idx = match state.by_addr.get(&from).copied() {
                Some(idx) => idx,
                None if header.buffer_type == BufferType::Connecting => {
                    let mut peer_base_port = 0u32;
                    if let Ok(port) = ReadCursor::new(payload).read_u32() {
                        peer_base_port = port;
                    }
                    let config = state.config.clone();
                    let (idx, _gen) = state.connectors.insert(Connector::accepting(from, peer_base_port, config));
                    state.by_addr.insert(from, idx);
                    idx
                }
                None => continue,
            };

            let gen = match state.connectors.gen_of(idx) {
                Some(g) => g,
                None => continue,
            };

            let delivered = match state.connectors.get_mut(idx, gen).found() {
                Some(connector) => connector.on_receive(&header, &ack_ids, payload),
                None => continue,
            };

            for (message_id, marker, body) in delivered {
                state.sink.deliver(from, message_id, marker, body);
            }
        }
    }

    fn drive_connectors(&self, state: &mut State, now: Instant) {
        let base_port = state.base_port;
        let indices: Vec<(u32, u32)> = state
            .connectors
            .iter()
            .map(|(idx, _)| (idx, state.connectors.gen_of(idx).unwrap_or(0)))
            .collect();

        for (idx, gen) in indices {
            let (action, peer) = match state.connectors.get_mut(idx, gen).found() {
                Some(connector) => (connector.tick(base_port, now), connector.peer),
                None => continue,
            };

            match action {
                ConnectorAction::Send(bytes) => {
                    let _ = state.socket.send_to(&bytes, peer);
                }
                ConnectorAction::Destroyed => {
                    state.connectors.remove(idx, gen);
                    state.by_addr.retain(|_, v| *v != idx);
                }
                ConnectorAction::Idle => {}
            }
        }
    }
}

impl Object for Talker {
    fn handle(&self) -> Handle {
        self.core.handle()
    }

    fn core(&self) -> &ObjectCore {
        &self.core
    }

    fn execute(&self, events: EventMask, deadline: &mut Instant) -> ExecResult {
        let mut state = self.state.lock();

        if events & IN_DONE != 0 {
            self.drain_incoming(&mut state);
        }

        let now = Instant::now();
        self.drive_connectors(&mut state, now);

        let next = state
            .connectors
            .iter()
            .map(|(_, c)| c.next_send_time)
            .min();

        match next {
            Some(t) => {
                *deadline = t;
                ExecResult::Nok
            }
            None => ExecResult::Nok,
        }
    }

    fn io_descriptor(&self) -> Option<RawFd> {
        Some(self.state.lock().socket.as_raw_fd())
    }

    fn io_interest(&self) -> Option<Interest> {
        Some(Interest::READABLE)
    }
}
