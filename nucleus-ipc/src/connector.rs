//! Per-peer connector state machine: handshake, send-credit ("jeton") bookkeeping, reliable
//! delivery with retransmission, out-of-order reassembly, and the reconnect surgery that
//! preserves resendable user intent across a lost session.

use crate::config::IpcConfig;
use crate::packet::{seq_lt, seq_next, BufferType, Header, UPDATE_BUFFER};
use nucleus_core::serialize::{CommandMarker, ReadCursor, WriteCursor};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum ConnectorState {
    Connecting,
    Accepting,
    WaitAccept,
    Connected,
    Disconnecting,
}

/// A user message queued for reliable delivery. Once fully chunked into sent buffers it lingers
/// in `in_flight` (not `queued`) until its last carrying buffer is acknowledged, so a lost
/// buffer can be retransmitted verbatim without re-touching the message.
pub struct OutgoingMessage {
    pub id: u64,
    pub data: Vec<u8>,
    pub cursor: usize,
    /// Must survive a reconnect and be resent in a fresh session.
    pub resendable: bool,
    /// Tied to the session that queued it (e.g. a reply correlated to a request on the old
    /// connection); dropped rather than resent across a reconnect.
    pub session_scoped: bool,
    last_buffer_id: Option<u32>,
    consecutive_buffers: u32,
}

impl OutgoingMessage {
    pub fn new(id: u64, data: Vec<u8>, resendable: bool, session_scoped: bool) -> OutgoingMessage {
        OutgoingMessage {
            id,
            data,
            cursor: 0,
            resendable,
            session_scoped,
            last_buffer_id: None,
            consecutive_buffers: 0,
        }
    }

    fn is_drained(&self) -> bool {
        self.cursor >= self.data.len()
    }
}

struct SentBuffer {
    id: u32,
    retrans_id: u16,
    buffer_type: BufferType,
    bytes: Vec<u8>,
    sent_at: Instant,
    rto: Duration,
    retransmits: u32,
    /// Messages whose `last_buffer_id` points at this buffer; acking it delivers them.
    carries: Vec<u64>,
}

/// What a connector wants its Talker to do right after a tick.
#[derive(Debug)]
pub enum ConnectorAction {
    /// Nothing to send this tick.
    Idle,
    /// Send this encoded datagram to the peer.
    Send(Vec<u8>),
    /// The connector gave up on the peer; the Talker should tear it down.
    Destroyed,
}

pub struct Connector {
    pub peer: SocketAddr,
    pub peer_base_port: Option<u32>,
    state: ConnectorState,
    initiator: bool,

    jetons_available: u32,
    jetons_total: u32,

    send_id: u32,
    expected_id: u32,

    reorder: Vec<(u32, Vec<u8>)>,
    ack_queue: VecDeque<u32>,

    sent: VecDeque<SentBuffer>,
    queued: VecDeque<OutgoingMessage>,
    in_flight: Vec<OutgoingMessage>,
    active: VecDeque<u64>,

    connect_retransmits: u32,
    rto: Duration,

    pub next_send_time: Instant,
    config: IpcConfig,
}

impl Connector {
    pub fn connecting(peer: SocketAddr, config: IpcConfig) -> Connector {
        let jetons = config.connect_jetons;
        let rto = config.initial_rto;
        Connector {
            peer,
            peer_base_port: None,
            state: ConnectorState::Connecting,
            initiator: true,
            jetons_available: jetons,
            jetons_total: jetons,
            send_id: 0,
            expected_id: 1,
            reorder: Vec::new(),
            ack_queue: VecDeque::new(),
            sent: VecDeque::new(),
            queued: VecDeque::new(),
            in_flight: Vec::new(),
            active: VecDeque::new(),
            connect_retransmits: 0,
            rto,
            next_send_time: Instant::now(),
            config,
        }
    }

    pub fn accepting(peer: SocketAddr, peer_base_port: u32, config: IpcConfig) -> Connector {
        let jetons = config.accept_jetons;
        let rto = config.initial_rto;
        Connector {
            peer,
            peer_base_port: Some(peer_base_port),
            state: ConnectorState::Accepting,
            initiator: false,
            jetons_available: jetons,
            jetons_total: jetons,
            send_id: 0,
            expected_id: 1,
            reorder: Vec::new(),
            ack_queue: VecDeque::new(),
            sent: VecDeque::new(),
            queued: VecDeque::new(),
            in_flight: Vec::new(),
            active: VecDeque::new(),
            connect_retransmits: 0,
            rto,
            next_send_time: Instant::now(),
            config,
        }
    }

    pub fn state(&self) -> ConnectorState {
        self.state
    }

    pub fn queue_message(&mut self, id: u64, data: Vec<u8>, resendable: bool, session_scoped: bool) {
        self.queued.push_back(OutgoingMessage::new(id, data, resendable, session_scoped));
    }

    /// Drives the handshake forward and composes one outgoing buffer if there's anything to
    /// send. Called once per Talker tick per connector.
    pub fn tick(&mut self, my_base_port: u32, now: Instant) -> ConnectorAction {
        if self.handshake_retransmits_exhausted() {
            return ConnectorAction::Destroyed;
        }

        if self.data_retransmits_exhausted() {
            self.reconnect();
        }

        if let Some(bytes) = self.check_retransmits(now) {
            self.next_send_time = now + self.rto;
            return ConnectorAction::Send(bytes);
        }

        match self.state {
            ConnectorState::Connecting => self.compose_handshake(BufferType::Connecting, my_base_port, now),
            ConnectorState::Accepting => self.compose_handshake(BufferType::Accepting, my_base_port, now),
            ConnectorState::WaitAccept | ConnectorState::Connected => self.compose_data(now),
            ConnectorState::Disconnecting => ConnectorAction::Destroyed,
        }
    }

    fn compose_handshake(&mut self, buffer_type: BufferType, my_base_port: u32, now: Instant) -> ConnectorAction {
        // Handshake buffers are not re-composed while one is already outstanding; `check_retransmits`
        // resends the existing one until it's acked or the connector gives up.
        if !self.sent.is_empty() {
            return ConnectorAction::Idle;
        }

        let mut payload = vec![0u8; 4];
        WriteCursor::new(&mut payload).write_u32(my_base_port).ok();

        let id = 0;
        let bytes = self.encode_buffer(Header::new(buffer_type, id), &payload);
        self.sent.push_back(SentBuffer {
            id,
            retrans_id: 0,
            buffer_type,
            bytes: bytes.clone(),
            sent_at: now,
            rto: self.rto,
            retransmits: 0,
            carries: Vec::new(),
        });

        match buffer_type {
            BufferType::Connecting => self.state = ConnectorState::WaitAccept,
            BufferType::Accepting => self.state = ConnectorState::Connected,
            BufferType::Data => unreachable!("handshake composer never called with Data"),
        }

        self.next_send_time = now + self.rto;
        ConnectorAction::Send(bytes)
    }

    fn compose_data(&mut self, now: Instant) -> ConnectorAction {
        let ack_ids: Vec<u32> = self.ack_queue.drain(..self.ack_queue.len().min(self.config.ack_piggyback_cap)).collect();

        let mut payload = Vec::new();
        if self.jetons_available > 0 {
            self.fill_payload(&mut payload);
        }

        if payload.is_empty() && ack_ids.is_empty() {
            self.next_send_time = now + self.rto;
            return ConnectorAction::Idle;
        }

        if payload.is_empty() {
            let header = Header::new(BufferType::Data, UPDATE_BUFFER);
            let bytes = self.encode_with_acks(header, &ack_ids, &payload);
            self.next_send_time = now + self.rto;
            return ConnectorAction::Send(bytes);
        }

        let id = self.send_id;
        self.send_id = seq_next(self.send_id);
        self.jetons_available -= 1;

        let carries: Vec<u64> = self.in_flight.iter().filter(|m| m.last_buffer_id == Some(id)).map(|m| m.id).collect();

        let header = Header::new(BufferType::Data, id);
        let bytes = self.encode_with_acks(header, &ack_ids, &payload);

        self.sent.push_back(SentBuffer {
            id,
            retrans_id: 0,
            buffer_type: BufferType::Data,
            bytes: bytes.clone(),
            sent_at: now,
            rto: self.rto,
            retransmits: 0,
            carries,
        });

        self.next_send_time = now + self.rto;
        ConnectorAction::Send(bytes)
    }

    /// Interleaves chunks from the active message rotation into `payload` up to the MTU,
    /// respecting `max_command_buffer_count` consecutive buffers per message and
    /// `max_send_command_queue` concurrently active messages. A message only enters `active`
    /// (and becomes eligible for rotation) once it is promoted into `in_flight` here - not at
    /// `queue_message` time - so the cap below actually bounds concurrency instead of admitting
    /// nothing once more messages are queued than the cap allows.
    ///
    /// Each segment is self-delimiting on the wire (marker byte, the owning message's id, a u32
    /// body length, then the body) so that several messages' chunks can share one buffer without
    /// the receiver having to guess where one segment ends and the next begins.
    fn fill_payload(&mut self, payload: &mut Vec<u8>) {
        while self.in_flight.len() < self.config.max_send_command_queue {
            match self.queued.pop_front() {
                Some(msg) => {
                    self.active.push_back(msg.id);
                    self.in_flight.push(msg);
                }
                None => break,
            }
        }

        let mut rounds = self.active.len();

        while rounds > 0 && self.config.payload_mtu.saturating_sub(payload.len()) > SEGMENT_HEADER_LEN {
            rounds -= 1;
            let Some(msg_id) = self.active.pop_front() else { break };
            let Some(msg) = self.in_flight.iter_mut().find(|m| m.id == msg_id) else { continue };

            let marker = if msg.cursor == 0 { CommandMarker::NewCommand } else { CommandMarker::ContinuedCommand };
            let remaining_budget = self
                .config
                .payload_mtu
                .saturating_sub(payload.len())
                .saturating_sub(SEGMENT_HEADER_LEN);
            if remaining_budget == 0 {
                self.active.push_front(msg_id);
                break;
            }

            let chunk_len = (msg.data.len() - msg.cursor).min(remaining_budget);
            write_segment_header(payload, marker, msg.id, chunk_len as u32);
            payload.extend_from_slice(&msg.data[msg.cursor..msg.cursor + chunk_len]);
            msg.cursor += chunk_len;
            msg.consecutive_buffers += 1;

            if msg.is_drained() {
                msg.last_buffer_id = Some(self.send_id);
            } else if msg.consecutive_buffers < self.config.max_command_buffer_count {
                self.active.push_back(msg_id);
            } else {
                msg.consecutive_buffers = 0;
                self.active.push_back(msg_id);
            }
        }
    }

    fn encode_buffer(&self, header: Header, payload: &[u8]) -> Vec<u8> {
        self.encode_with_acks(header, &[], payload)
    }

    fn encode_with_acks(&self, mut header: Header, ack_ids: &[u32], payload: &[u8]) -> Vec<u8> {
        header.ack_count = ack_ids.len() as u16;
        let mut buf = vec![0u8; crate::packet::HEADER_LEN + ack_ids.len() * 4 + payload.len()];
        {
            let mut cursor = WriteCursor::new(&mut buf);
            header.encode(&mut cursor).expect("buffer sized for its own header");
            for ack in ack_ids {
                cursor.write_u32(*ack).expect("buffer sized for its own ack list");
            }
            cursor.write_bytes(payload).expect("buffer sized for its own payload");
        }
        buf
    }

    /// Resends any sent buffer past its RTO deadline, doubling the backoff up to `max_rto`.
    /// Exceeding the retransmit limit moves a Data connector to reconnect, or destroys a
    /// still-handshaking one outright.
    fn check_retransmits(&mut self, now: Instant) -> Option<Vec<u8>> {
        for sent in self.sent.iter_mut() {
            if now < sent.sent_at + sent.rto {
                continue;
            }

            let limit = match sent.buffer_type {
                BufferType::Data => self.config.data_retransmit_limit,
                BufferType::Connecting | BufferType::Accepting => self.config.connect_retransmit_limit,
            };

            if sent.retransmits >= limit {
                continue;
            }

            sent.retransmits += 1;
            sent.retrans_id = sent.retrans_id.wrapping_add(1);
            sent.sent_at = now;
            sent.rto = (sent.rto * 2).min(self.config.max_rto);

            patch_retrans_id(&mut sent.bytes, sent.retrans_id);
            return Some(sent.bytes.clone());
        }
        None
    }

    fn handshake_retransmits_exhausted(&self) -> bool {
        self.sent.iter().any(|s| {
            matches!(s.buffer_type, BufferType::Connecting | BufferType::Accepting)
                && s.retransmits >= self.config.connect_retransmit_limit
        })
    }

    fn data_retransmits_exhausted(&self) -> bool {
        self.sent
            .iter()
            .any(|s| s.buffer_type == BufferType::Data && s.retransmits >= self.config.data_retransmit_limit)
    }

    /// Handles one inbound buffer for this connector. Returns the segments it carried, each
    /// tagged with the id of the message it belongs to so a caller juggling several concurrently
    /// in-flight messages can tell which `ContinuedCommand` chunk continues which `NewCommand`.
    pub fn on_receive(&mut self, header: &Header, ack_ids: &[u32], payload: &[u8]) -> Vec<(u64, CommandMarker, Vec<u8>)> {
        for ack in ack_ids {
            self.apply_ack(*ack);
        }

        if matches!(header.buffer_type, BufferType::Accepting) && self.state == ConnectorState::WaitAccept {
            if let Ok(port) = ReadCursor::new(payload).read_u32() {
                self.peer_base_port = Some(port);
            }
            self.state = ConnectorState::Connected;
            self.sent.clear();
            self.connect_retransmits = 0;
        }

        if header.id == UPDATE_BUFFER || payload.is_empty() {
            return Vec::new();
        }

        self.accept_data_buffer(header.id, payload)
    }

    fn accept_data_buffer(&mut self, id: u32, payload: &[u8]) -> Vec<(u64, CommandMarker, Vec<u8>)> {
        let mut delivered = Vec::new();

        if seq_lt(id, self.expected_id) {
            self.ack_queue.push_back(id);
            return delivered;
        }

        if id == self.expected_id {
            delivered.extend(split_segments(payload));
            self.ack_queue.push_back(id);
            self.expected_id = seq_next(self.expected_id);

            // Walk the reorder heap, consuming any now-contiguous successor.
            loop {
                let pos = self.reorder.iter().position(|(rid, _)| *rid == self.expected_id);
                match pos {
                    Some(idx) => {
                        let (rid, rpayload) = self.reorder.remove(idx);
                        delivered.extend(split_segments(&rpayload));
                        self.ack_queue.push_back(rid);
                        self.expected_id = seq_next(self.expected_id);
                    }
                    None => break,
                }
            }
        } else if self.reorder.len() < self.config.reorder_heap_cap {
            self.reorder.push((id, payload.to_vec()));
        }
        // else: heap full and this is a genuinely new arrival - drop it, the sender retransmits.

        delivered
    }

    fn apply_ack(&mut self, id: u32) {
        if let Some(pos) = self.sent.iter().position(|s| s.id == id) {
            let sent = self.sent.remove(pos).unwrap();
            if sent.buffer_type == BufferType::Data {
                self.jetons_available = (self.jetons_available + 1).min(self.jetons_total);
            }

            for msg_id in sent.carries {
                if let Some(idx) = self.in_flight.iter().position(|m| m.id == msg_id && m.is_drained()) {
                    self.in_flight.remove(idx);
                }
            }
        }
    }

    /// Surgical state reset preserving resendable user intent: discard transport-session state,
    /// drop session-scoped messages, and reprepend everything else (in original message-id
    /// order) to the send queue ahead of anything still untouched.
    pub fn reconnect(&mut self) {
        self.send_id = 0;
        self.expected_id = 1;
        self.jetons_available = self.jetons_total;
        self.reorder.clear();
        self.ack_queue.clear();
        self.sent.clear();
        self.active.clear();
        self.connect_retransmits = 0;
        self.rto = self.config.initial_rto;

        let mut retained: Vec<OutgoingMessage> = self.in_flight.drain(..).filter(|m| !m.session_scoped).collect();
        retained.sort_by_key(|m| m.id);
        for msg in retained.iter_mut() {
            msg.cursor = 0;
            msg.last_buffer_id = None;
            msg.consecutive_buffers = 0;
        }

        let still_queued: Vec<OutgoingMessage> = self.queued.drain(..).collect();

        for msg in retained.into_iter().chain(still_queued.into_iter()) {
            self.queued.push_back(msg);
        }

        self.state = if self.initiator { ConnectorState::Connecting } else { ConnectorState::Accepting };
    }
}

/// `marker:u8, message_id:u64, body_len:u32, body:bytes`, repeated back-to-back. Self-delimiting
/// so several messages' chunks can share one buffer (see `Connector::fill_payload`) without the
/// reader guessing where one segment ends and the next begins.
const SEGMENT_HEADER_LEN: usize = 1 + 8 + 4;

fn write_segment_header(payload: &mut Vec<u8>, marker: CommandMarker, message_id: u64, body_len: u32) {
    let mut header = [0u8; SEGMENT_HEADER_LEN];
    {
        let mut cursor = WriteCursor::new(&mut header);
        cursor.write_u8(marker.as_byte()).expect("fixed-size header buffer");
        cursor.write_u64(message_id).expect("fixed-size header buffer");
        cursor.write_u32(body_len).expect("fixed-size header buffer");
    }
    payload.extend_from_slice(&header);
}

fn split_segments(payload: &[u8]) -> Vec<(u64, CommandMarker, Vec<u8>)> {
    let mut out = Vec::new();
    let mut cursor = ReadCursor::new(payload);

    while cursor.remaining() >= SEGMENT_HEADER_LEN {
        let marker = match CommandMarker::from_byte(match cursor.read_u8() {
            Ok(b) => b,
            Err(_) => break,
        }) {
            Some(m) => m,
            None => break,
        };
        let message_id = match cursor.read_u64() {
            Ok(id) => id,
            Err(_) => break,
        };
        let body_len = match cursor.read_u32() {
            Ok(n) => n as usize,
            Err(_) => break,
        };
        let body = match cursor.read_bytes(body_len) {
            Ok(b) => b.to_vec(),
            Err(_) => break,
        };
        out.push((message_id, marker, body));
    }

    out
}

fn patch_retrans_id(bytes: &mut [u8], retrans_id: u16) {
    if bytes.len() >= 8 {
        bytes[6] = (retrans_id & 0xFF) as u8;
        bytes[7] = (retrans_id >> 8) as u8;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> SocketAddr {
        "127.0.0.1:9000".parse().unwrap()
    }

    fn encode_segment(marker: CommandMarker, message_id: u64, body: &[u8]) -> Vec<u8> {
        let mut payload = Vec::new();
        write_segment_header(&mut payload, marker, message_id, body.len() as u32);
        payload.extend_from_slice(body);
        payload
    }

    #[test]
    fn test_connecting_connector_composes_handshake_then_waits() {
        let mut c = Connector::connecting(addr(), IpcConfig::default());
        let action = c.tick(1234, Instant::now());
        assert!(matches!(action, ConnectorAction::Send(_)));
        assert_eq!(c.state(), ConnectorState::WaitAccept);

        // No second handshake buffer composed while one is outstanding.
        let action2 = c.tick(1234, Instant::now());
        assert!(matches!(action2, ConnectorAction::Idle));
    }

    #[test]
    fn test_accepting_connector_moves_straight_to_connected() {
        let mut c = Connector::accepting(addr(), 5555, IpcConfig::default());
        let action = c.tick(1234, Instant::now());
        assert!(matches!(action, ConnectorAction::Send(_)));
        assert_eq!(c.state(), ConnectorState::Connected);
    }

    #[test]
    fn test_wait_accept_receiving_accepting_buffer_adopts_peer_base_port() {
        let mut c = Connector::connecting(addr(), IpcConfig::default());
        c.tick(1234, Instant::now());

        let header = Header::new(BufferType::Accepting, 0);
        let mut payload = vec![0u8; 4];
        WriteCursor::new(&mut payload).write_u32(9999).unwrap();

        c.on_receive(&header, &[], &payload);

        assert_eq!(c.state(), ConnectorState::Connected);
        assert_eq!(c.peer_base_port, Some(9999));
    }

    #[test]
    fn test_in_order_data_buffer_advances_expected_id_and_delivers() {
        let mut c = Connector::connecting(addr(), IpcConfig::default());
        c.state = ConnectorState::Connected;

        let header = Header::new(BufferType::Data, 1);
        let payload = encode_segment(CommandMarker::NewCommand, 42, b"hello");

        let delivered = c.on_receive(&header, &[], &payload);
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].0, 42);
        assert_eq!(delivered[0].1, CommandMarker::NewCommand);
        assert_eq!(delivered[0].2, b"hello");
        assert_eq!(c.expected_id, 2);
    }

    #[test]
    fn test_out_of_order_buffer_is_reordered_then_consumed_in_order() {
        let mut c = Connector::connecting(addr(), IpcConfig::default());
        c.state = ConnectorState::Connected;

        let p2 = encode_segment(CommandMarker::NewCommand, 2, b"second");
        let delivered = c.on_receive(&Header::new(BufferType::Data, 2), &[], &p2);
        assert!(delivered.is_empty(), "id 2 arrives before expected id 1 - held in reorder heap");

        let p1 = encode_segment(CommandMarker::NewCommand, 1, b"first");
        let delivered = c.on_receive(&Header::new(BufferType::Data, 1), &[], &p1);

        assert_eq!(delivered.len(), 2);
        assert_eq!(delivered[0].2, b"first");
        assert_eq!(delivered[1].2, b"second");
        assert_eq!(c.expected_id, 3);
    }

    #[test]
    fn test_interleaved_segments_from_two_messages_in_one_buffer_both_delivered_intact() {
        let mut sender = Connector::connecting(addr(), IpcConfig::default());
        sender.state = ConnectorState::Connected;
        sender.jetons_available = 2;
        sender.jetons_total = 2;

        let first_body = vec![b'a'; 40];
        let second_body = vec![b'b'; 40];
        sender.queue_message(11, first_body.clone(), true, false);
        sender.queue_message(22, second_body.clone(), true, false);

        let mut payload = Vec::new();
        sender.fill_payload(&mut payload);

        let mut receiver = Connector::connecting(addr(), IpcConfig::default());
        receiver.state = ConnectorState::Connected;
        let delivered = receiver.on_receive(&Header::new(BufferType::Data, 1), &[], &payload);

        assert_eq!(delivered.len(), 2, "both messages' segments decoded from the one shared buffer");

        let first: Vec<&Vec<u8>> = delivered.iter().filter(|(id, _, _)| *id == 11).map(|(_, _, b)| b).collect();
        let second: Vec<&Vec<u8>> = delivered.iter().filter(|(id, _, _)| *id == 22).map(|(_, _, b)| b).collect();

        assert_eq!(first.into_iter().flatten().copied().collect::<Vec<u8>>(), first_body);
        assert_eq!(second.into_iter().flatten().copied().collect::<Vec<u8>>(), second_body);
    }

    #[test]
    fn test_stale_buffer_is_acked_again_and_dropped() {
        let mut c = Connector::connecting(addr(), IpcConfig::default());
        c.state = ConnectorState::Connected;
        c.expected_id = 5;

        let delivered = c.on_receive(&Header::new(BufferType::Data, 2), &[], b"\x00stale");
        assert!(delivered.is_empty());
        assert_eq!(c.ack_queue.back(), Some(&2));
    }

    #[test]
    fn test_ack_returns_jeton_and_delivers_message() {
        let mut c = Connector::connecting(addr(), IpcConfig::default());
        c.state = ConnectorState::Connected;
        c.jetons_available = 1;
        c.jetons_total = 1;
        c.queue_message(1, b"payload".to_vec(), true, false);

        let action = c.compose_data(Instant::now());
        assert!(matches!(action, ConnectorAction::Send(_)));
        assert_eq!(c.jetons_available, 0, "sending a data buffer consumes a jeton");

        c.apply_ack(0);
        assert_eq!(c.jetons_available, 1, "acking the buffer returns the jeton");
        assert!(c.in_flight.is_empty(), "fully-drained, acked message is delivered and dropped");
    }

    #[test]
    fn test_reconnect_drops_session_scoped_and_keeps_resendable_in_id_order() {
        let mut c = Connector::connecting(addr(), IpcConfig::default());
        c.state = ConnectorState::Connected;
        c.in_flight.push(OutgoingMessage::new(2, b"b".to_vec(), true, false));
        c.in_flight.push(OutgoingMessage::new(1, b"a".to_vec(), true, false));
        c.in_flight.push(OutgoingMessage::new(3, b"c".to_vec(), false, true));

        c.reconnect();

        let ids: Vec<u64> = c.queued.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![1, 2]);
        assert_eq!(c.state(), ConnectorState::Connecting);
    }
}
