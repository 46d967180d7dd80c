//! The UDP buffer format: a fixed header, an optional run of piggybacked ACK ids, and a payload
//! of command segments. All multi-byte header fields are little-endian on the wire.

use nucleus_core::serialize::{ReadCursor, WriteCursor};
use std::io;

/// Sentinel buffer id meaning "no payload, only ACKs matter". Sequence ids wrap past
/// `LAST_BUFFER_ID` back to `0`.
pub const UPDATE_BUFFER: u32 = 0xFFFF_FFFF;
pub const LAST_BUFFER_ID: u32 = 0xFFFF_FFFE;

pub const HEADER_LEN: usize = 1 + 1 + 2 + 4 + 2 + 2;

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum BufferType {
    Data = 0,
    Connecting = 1,
    Accepting = 2,
}

impl BufferType {
    pub fn from_byte(b: u8) -> Option<BufferType> {
        match b {
            0 => Some(BufferType::Data),
            1 => Some(BufferType::Connecting),
            2 => Some(BufferType::Accepting),
            _ => None,
        }
    }
}

bitflags::bitflags! {
    pub struct BufferFlags: u16 {
        const REQUEST_RECEIPT = 1 << 0;
        const SWITCH_TO_NEW = 1 << 1;
        const SWITCH_TO_OLD = 1 << 2;
    }
}

/// A decoded buffer header plus raw views into the ack list and payload.
#[derive(Debug)]
pub struct Header {
    pub version: u8,
    pub buffer_type: BufferType,
    pub flags: BufferFlags,
    pub id: u32,
    pub retrans_id: u16,
    pub ack_count: u16,
}

pub const WIRE_VERSION: u8 = 1;

impl Header {
    pub fn new(buffer_type: BufferType, id: u32) -> Header {
        Header {
            version: WIRE_VERSION,
            buffer_type,
            flags: BufferFlags::empty(),
            id,
            retrans_id: 0,
            ack_count: 0,
        }
    }

    pub fn encode(&self, cursor: &mut WriteCursor) -> io::Result<()> {
        cursor.write_u8(self.version).map_err(to_io)?;
        cursor.write_u8(self.buffer_type as u8).map_err(to_io)?;
        cursor.write_u8((self.flags.bits() & 0xFF) as u8).map_err(to_io)?;
        cursor.write_u8((self.flags.bits() >> 8) as u8).map_err(to_io)?;
        cursor.write_u32(self.id).map_err(to_io)?;
        cursor.write_u8((self.retrans_id & 0xFF) as u8).map_err(to_io)?;
        cursor.write_u8((self.retrans_id >> 8) as u8).map_err(to_io)?;
        cursor.write_u8((self.ack_count & 0xFF) as u8).map_err(to_io)?;
        cursor.write_u8((self.ack_count >> 8) as u8).map_err(to_io)?;
        Ok(())
    }

    pub fn decode(cursor: &mut ReadCursor) -> io::Result<Header> {
        let version = cursor.read_u8().map_err(to_io)?;
        let buffer_type = BufferType::from_byte(cursor.read_u8().map_err(to_io)?)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "unknown buffer type"))?;
        let flags_lo = cursor.read_u8().map_err(to_io)? as u16;
        let flags_hi = cursor.read_u8().map_err(to_io)? as u16;
        let flags = BufferFlags::from_bits_truncate(flags_lo | (flags_hi << 8));
        let id = cursor.read_u32().map_err(to_io)?;
        let retrans_lo = cursor.read_u8().map_err(to_io)? as u16;
        let retrans_hi = cursor.read_u8().map_err(to_io)? as u16;
        let retrans_id = retrans_lo | (retrans_hi << 8);
        let ack_lo = cursor.read_u8().map_err(to_io)? as u16;
        let ack_hi = cursor.read_u8().map_err(to_io)? as u16;
        let ack_count = ack_lo | (ack_hi << 8);

        Ok(Header { version, buffer_type, flags, id, retrans_id, ack_count })
    }
}

fn to_io(e: nucleus_core::serialize::Error) -> io::Error {
    io::Error::new(io::ErrorKind::UnexpectedEof, format!("{:?}", e))
}

/// Half-range wraparound comparison for `u32` sequence ids: `a` is considered "before" `b` iff
/// the forward distance from `a` to `b` is less than `2^31`. Used throughout the connector so a
/// wrapped sequence number still compares correctly against a recent one.
pub fn seq_lt(a: u32, b: u32) -> bool {
    a != b && b.wrapping_sub(a) < 0x8000_0000
}

pub fn seq_next(id: u32) -> u32 {
    if id >= LAST_BUFFER_ID {
        0
    } else {
        id + 1
    }
}
