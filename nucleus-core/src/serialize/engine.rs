//! Primitive cursors (little-endian, via `byteorder`) and the two-stack engine that drives a
//! queue of pending objects/streams across successive output buffers.

use crate::serialize::stream::Streammer;
use crate::serialize::typemap::{TypeMap, WireObject};
use byteorder::{ByteOrder, LittleEndian};
use std::io;
use std::sync::Arc;

#[derive(Debug)]
pub enum Error {
    /// The buffer offered has no room even for an empty frame; caller must come back with a
    /// fresh buffer. Never logged as an error - see §7 "Transient wait".
    NoRoom,
    UnknownType(String),
    Truncated,
    MaxNestingExceeded,
    Io(io::Error),
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Error {
        Error::Io(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Outcome of driving the engine against one buffer.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum FrameResult {
    /// The work stack is empty; everything queued has been fully written/read.
    Done,
    /// The buffer is full (or the reader ran dry); call again with a fresh buffer to continue.
    Yield,
    Fail,
}

/// A cursor over an output buffer. Primitive writes are atomic: if there isn't room for the
/// whole value, nothing is written and `Error::NoRoom` is returned, so a retry against a fresh
/// buffer never double-writes a partial value.
pub struct WriteCursor<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> WriteCursor<'a> {
    pub fn new(buf: &'a mut [u8]) -> WriteCursor<'a> {
        WriteCursor { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn write_u8(&mut self, v: u8) -> Result<()> {
        self.require(1)?;
        self.buf[self.pos] = v;
        self.pos += 1;
        Ok(())
    }

    pub fn write_bool(&mut self, v: bool) -> Result<()> {
        self.write_u8(v as u8)
    }

    pub fn write_u32(&mut self, v: u32) -> Result<()> {
        self.require(4)?;
        LittleEndian::write_u32(&mut self.buf[self.pos..self.pos + 4], v);
        self.pos += 4;
        Ok(())
    }

    pub fn write_u64(&mut self, v: u64) -> Result<()> {
        self.require(8)?;
        LittleEndian::write_u64(&mut self.buf[self.pos..self.pos + 8], v);
        self.pos += 8;
        Ok(())
    }

    pub fn write_i64(&mut self, v: i64) -> Result<()> {
        self.require(8)?;
        LittleEndian::write_i64(&mut self.buf[self.pos..self.pos + 8], v);
        self.pos += 8;
        Ok(())
    }

    pub fn write_bytes(&mut self, data: &[u8]) -> Result<()> {
        self.require(data.len())?;
        self.buf[self.pos..self.pos + data.len()].copy_from_slice(data);
        self.pos += data.len();
        Ok(())
    }

    /// Writes as many bytes of `data` as fit, returning the count actually written - used for
    /// streammer pumping, where a partial write is expected and fine.
    pub fn write_bytes_partial(&mut self, data: &[u8]) -> usize {
        let n = data.len().min(self.remaining());
        self.buf[self.pos..self.pos + n].copy_from_slice(&data[..n]);
        self.pos += n;
        n
    }

    pub fn write_string(&mut self, s: &str) -> Result<()> {
        self.require(4 + s.len())?;
        self.write_u32(s.len() as u32)?;
        self.write_bytes(s.as_bytes())
    }

    fn require(&self, n: usize) -> Result<()> {
        if self.remaining() < n {
            Err(Error::NoRoom)
        } else {
            Ok(())
        }
    }
}

/// The read-side counterpart of `WriteCursor`.
pub struct ReadCursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ReadCursor<'a> {
    pub fn new(buf: &'a [u8]) -> ReadCursor<'a> {
        ReadCursor { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    /// Rewinds to an earlier position, used to undo a read that turned out to be short on
    /// bytes so the next `drive_deserialize` call can retry it whole once more data arrives.
    pub fn seek(&mut self, pos: usize) {
        self.pos = pos;
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        self.require(1)?;
        let v = self.buf[self.pos];
        self.pos += 1;
        Ok(v)
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        self.require(4)?;
        let v = LittleEndian::read_u32(&self.buf[self.pos..self.pos + 4]);
        self.pos += 4;
        Ok(v)
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        self.require(8)?;
        let v = LittleEndian::read_u64(&self.buf[self.pos..self.pos + 8]);
        self.pos += 8;
        Ok(v)
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        self.require(8)?;
        let v = LittleEndian::read_i64(&self.buf[self.pos..self.pos + 8]);
        self.pos += 8;
        Ok(v)
    }

    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        self.require(n)?;
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn read_bytes_partial(&mut self, max: usize) -> &'a [u8] {
        let n = max.min(self.remaining());
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        slice
    }

    pub fn read_string(&mut self) -> Result<String> {
        let len = self.read_u32()? as usize;
        let bytes = self.read_bytes(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| Error::Truncated)
    }

    fn require(&self, n: usize) -> Result<()> {
        if self.remaining() < n {
            Err(Error::Truncated)
        } else {
            Ok(())
        }
    }
}

enum WorkItem {
    Object { name_written: bool, obj: Arc<dyn WireObject> },
    Stream { remaining: i64, streammer: Box<dyn Streammer> },
}

/// Receive-side counterpart of `WorkItem`. `Awaiting` doesn't hold a concrete type yet - the wire
/// name read off the buffer picks it, via `TypeMap`, only once the bytes are actually in hand.
enum RecvWorkItem {
    Awaiting,
    Stream { remaining: i64, streammer: Box<dyn Streammer> },
}

/// The serialize-side work stack plus its companion extra stack of scratch state. One `Engine`
/// instance corresponds to one in-flight command on one connector; IPC keeps one alive per
/// direction per peer across however many buffers it takes to drain. The send (`work`) and
/// receive (`recv`) stacks are independent - a full-duplex peer drives both from the same
/// instance without them interfering.
pub struct Engine {
    work: Vec<WorkItem>,
    recv: Vec<RecvWorkItem>,
    max_nesting: usize,
}

impl Engine {
    pub fn new(max_nesting: usize) -> Engine {
        Engine {
            work: Vec::new(),
            recv: Vec::new(),
            max_nesting,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.work.is_empty()
    }

    pub fn is_receive_idle(&self) -> bool {
        self.recv.is_empty()
    }

    pub fn queue_object(&mut self, obj: Arc<dyn WireObject>) -> Result<()> {
        if self.work.len() >= self.max_nesting {
            return Err(Error::MaxNestingExceeded);
        }
        self.work.push(WorkItem::Object { name_written: false, obj });
        Ok(())
    }

    pub fn queue_stream(&mut self, streammer: Box<dyn Streammer>, size: i64) -> Result<()> {
        if self.work.len() >= self.max_nesting {
            return Err(Error::MaxNestingExceeded);
        }
        self.work.push(WorkItem::Stream { remaining: size, streammer });
        Ok(())
    }

    /// Marks the start of a fresh top-level command on the receive side - called when a buffer
    /// segment arrives tagged `CommandMarker::NewCommand`.
    pub fn begin_receive(&mut self) -> Result<()> {
        if self.recv.len() >= self.max_nesting {
            return Err(Error::MaxNestingExceeded);
        }
        self.recv.push(RecvWorkItem::Awaiting);
        Ok(())
    }

    /// Pops the current receive work item to resume whatever was suspended beneath it - called
    /// when a buffer segment arrives tagged `CommandMarker::OldCommand`. The nesting rule caps
    /// this at one level: a giant stream interleaved with one small concurrent message.
    pub fn resume_receive(&mut self) {
        self.recv.pop();
    }

    /// Queues an embedded receive-side stream of `size` bytes directly (bypassing `Awaiting`'s
    /// type-name lookup), for when the surrounding protocol already knows a stream is coming
    /// next rather than an ordinary typed object.
    pub fn queue_receive_stream(&mut self, streammer: Box<dyn Streammer>, size: i64) -> Result<()> {
        if self.recv.len() >= self.max_nesting {
            return Err(Error::MaxNestingExceeded);
        }
        self.recv.push(RecvWorkItem::Stream { remaining: size, streammer });
        Ok(())
    }

    /// Drains as much of the work stack into `cursor` as fits. Returns `Done` once the stack is
    /// empty, `Yield` if the buffer filled up with work still pending.
    pub fn drive_serialize(&mut self, cursor: &mut WriteCursor, types: &TypeMap) -> Result<FrameResult> {
        while let Some(item) = self.work.last_mut() {
            match item {
                WorkItem::Object { name_written, obj } => {
                    if !*name_written {
                        let name = obj.wire_name();
                        if cursor.remaining() < 4 + name.len() {
                            return Ok(FrameResult::Yield);
                        }
                        cursor.write_string(name)?;
                        *name_written = true;
                    }

                    let entry = types.lookup(obj.wire_name()).ok_or_else(|| Error::UnknownType(obj.wire_name().into()))?;
                    let size = (entry.size)(obj.as_ref());
                    if cursor.remaining() < size {
                        return Ok(FrameResult::Yield);
                    }
                    (entry.serialize)(obj.as_ref(), cursor)?;
                    self.work.pop();
                }
                WorkItem::Stream { remaining, streammer } => {
                    if cursor.remaining() == 0 {
                        return Ok(FrameResult::Yield);
                    }

                    let want = (*remaining).min(cursor.remaining() as i64).max(0) as usize;
                    let mut scratch = vec![0u8; want];
                    let n = streammer.read(&mut scratch)?;
                    cursor.write_bytes(&scratch[..n])?;
                    *remaining -= n as i64;

                    if n == 0 || *remaining <= 0 {
                        self.work.pop();
                    }
                }
            }
        }

        Ok(FrameResult::Done)
    }

    /// Drains as much of the receive work stack as `cursor` has bytes for, appending every
    /// fully-decoded object to `out` in completion order. Mirrors `drive_serialize`: an
    /// `Awaiting` item either decodes whole from the bytes currently available or rewinds and
    /// yields untouched, so a short buffer never leaves a type name consumed with no object to
    /// show for it. A `Stream` item instead keeps pulling whatever bytes the cursor has, since an
    /// embedded stream has no notion of "whole" - it only cares about hitting its declared size.
    pub fn drive_deserialize(
        &mut self,
        cursor: &mut ReadCursor,
        types: &TypeMap,
        out: &mut Vec<Arc<dyn WireObject>>,
    ) -> Result<FrameResult> {
        while let Some(item) = self.recv.last_mut() {
            match item {
                RecvWorkItem::Awaiting => {
                    let checkpoint = cursor.position();
                    let name = match cursor.read_string() {
                        Ok(name) => name,
                        Err(_) => {
                            cursor.seek(checkpoint);
                            return Ok(FrameResult::Yield);
                        }
                    };

                    match types.deserialize_by_name(&name, cursor) {
                        Ok(obj) => {
                            self.recv.pop();
                            out.push(obj);
                        }
                        Err(Error::Truncated) => {
                            cursor.seek(checkpoint);
                            return Ok(FrameResult::Yield);
                        }
                        Err(e) => return Err(e),
                    }
                }
                RecvWorkItem::Stream { remaining, streammer } => {
                    if cursor.remaining() == 0 {
                        return Ok(FrameResult::Yield);
                    }

                    let want = (*remaining).min(cursor.remaining() as i64).max(0) as usize;
                    let bytes = cursor.read_bytes_partial(want);
                    streammer.write(bytes)?;
                    *remaining -= bytes.len() as i64;

                    if bytes.is_empty() || *remaining <= 0 {
                        self.recv.pop();
                    }
                }
            }
        }

        Ok(FrameResult::Done)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serialize::typemap::{TypeMap, WireObject, WireType};
    use std::any::Any;
    use std::io;

    #[derive(Debug, PartialEq)]
    struct Counter {
        n: u32,
    }

    impl WireObject for Counter {
        fn wire_name(&self) -> &'static str {
            Counter::WIRE_NAME
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    impl WireType for Counter {
        const WIRE_NAME: &'static str = "nucleus.test.Counter";

        fn wire_serialize(&self, cursor: &mut WriteCursor) -> Result<()> {
            cursor.write_u32(self.n)
        }

        fn wire_deserialize(cursor: &mut ReadCursor) -> Result<Self> {
            Ok(Counter { n: cursor.read_u32()? })
        }

        fn wire_size(&self) -> usize {
            4
        }
    }

    /// A `Streammer` backed by an in-memory byte source/sink, for driving `drive_serialize`/
    /// `drive_deserialize` across several small buffers in a test without real I/O.
    struct MemStreammer {
        source: Vec<u8>,
        read_pos: usize,
        sink: Vec<u8>,
    }

    impl Streammer for MemStreammer {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = (self.source.len() - self.read_pos).min(buf.len());
            buf[..n].copy_from_slice(&self.source[self.read_pos..self.read_pos + n]);
            self.read_pos += n;
            Ok(n)
        }

        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.sink.extend_from_slice(buf);
            Ok(buf.len())
        }
    }

    #[test]
    fn test_write_cursor_primitives_roundtrip_via_read_cursor() {
        let mut buf = [0u8; 32];
        {
            let mut w = WriteCursor::new(&mut buf);
            w.write_u32(0xdead_beef).unwrap();
            w.write_i64(-42).unwrap();
            w.write_string("hi").unwrap();
        }

        let mut r = ReadCursor::new(&buf);
        assert_eq!(r.read_u32().unwrap(), 0xdead_beef);
        assert_eq!(r.read_i64().unwrap(), -42);
        assert_eq!(r.read_string().unwrap(), "hi");
    }

    #[test]
    fn test_write_cursor_reports_no_room_without_partial_write() {
        let mut buf = [0u8; 3];
        let mut w = WriteCursor::new(&mut buf);
        assert!(matches!(w.write_u32(1), Err(Error::NoRoom)));
        assert_eq!(w.position(), 0, "a failed primitive write must not advance the cursor");
    }

    #[test]
    fn test_little_endian_on_the_wire() {
        let mut buf = [0u8; 4];
        WriteCursor::new(&mut buf).write_u32(1).unwrap();
        assert_eq!(buf, [1, 0, 0, 0]);
    }

    #[test]
    fn test_drive_serialize_streams_a_streammer_across_multiple_small_buffers() {
        let mut engine = Engine::new(2);
        let source: Vec<u8> = (0u8..200).collect();
        let streammer = MemStreammer { source: source.clone(), read_pos: 0, sink: Vec::new() };
        engine.queue_stream(Box::new(streammer), source.len() as i64).unwrap();

        let types = TypeMap::new();
        let mut assembled = Vec::new();
        loop {
            let mut buf = [0u8; 32];
            let mut cursor = WriteCursor::new(&mut buf);
            let result = engine.drive_serialize(&mut cursor, &types).unwrap();
            assembled.extend_from_slice(&buf[..cursor.position()]);
            if result == FrameResult::Done {
                break;
            }
        }

        assert_eq!(assembled, source, "a stream larger than any one buffer reassembles byte-for-byte");
        assert!(engine.is_idle());
    }

    #[test]
    fn test_drive_serialize_then_drive_deserialize_roundtrips_a_queued_object() {
        let mut types = TypeMap::new();
        types.register::<Counter>();

        let mut send_engine = Engine::new(4);
        send_engine.queue_object(Arc::new(Counter { n: 99 })).unwrap();

        let mut buf = [0u8; 64];
        let mut write_cursor = WriteCursor::new(&mut buf);
        assert_eq!(send_engine.drive_serialize(&mut write_cursor, &types).unwrap(), FrameResult::Done);
        let written = write_cursor.position();

        let mut recv_engine = Engine::new(4);
        recv_engine.begin_receive().unwrap();
        let mut out = Vec::new();
        let mut read_cursor = ReadCursor::new(&buf[..written]);
        let result = recv_engine.drive_deserialize(&mut read_cursor, &types, &mut out).unwrap();

        assert_eq!(result, FrameResult::Done);
        assert!(recv_engine.is_receive_idle());
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].as_any().downcast_ref::<Counter>(), Some(&Counter { n: 99 }));
    }

    #[test]
    fn test_drive_deserialize_yields_and_resumes_once_the_rest_of_the_object_arrives() {
        let mut types = TypeMap::new();
        types.register::<Counter>();

        let mut send_engine = Engine::new(4);
        send_engine.queue_object(Arc::new(Counter { n: 7 })).unwrap();
        let mut buf = [0u8; 64];
        let mut write_cursor = WriteCursor::new(&mut buf);
        send_engine.drive_serialize(&mut write_cursor, &types).unwrap();
        let full = buf[..write_cursor.position()].to_vec();

        // Split the encoded bytes mid-object so the first drive_deserialize call genuinely runs
        // dry before the object is complete.
        let split = full.len() - 2;

        let mut recv_engine = Engine::new(4);
        recv_engine.begin_receive().unwrap();
        let mut out = Vec::new();

        let mut first_cursor = ReadCursor::new(&full[..split]);
        let result = recv_engine.drive_deserialize(&mut first_cursor, &types, &mut out).unwrap();
        assert_eq!(result, FrameResult::Yield);
        assert!(out.is_empty(), "a short buffer must not hand back a half-decoded object");

        let mut second_cursor = ReadCursor::new(&full);
        let result = recv_engine.drive_deserialize(&mut second_cursor, &types, &mut out).unwrap();
        assert_eq!(result, FrameResult::Done);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].as_any().downcast_ref::<Counter>(), Some(&Counter { n: 7 }));
    }

    #[test]
    fn test_old_command_resumes_the_outer_object_suspended_beneath_a_stream() {
        let types = TypeMap::new();
        let mut engine = Engine::new(2);

        // Outer command suspended while a nested stream drains - the one level of nesting the
        // nesting rule allows.
        engine.begin_receive().unwrap();
        let stream = MemStreammer { source: Vec::new(), read_pos: 0, sink: Vec::new() };
        engine.queue_receive_stream(Box::new(stream), 0).unwrap();
        assert_eq!(engine.recv.len(), 2);

        let mut out = Vec::new();
        let buf = [0u8; 4];
        let mut cursor = ReadCursor::new(&buf);
        // The zero-length stream finishes immediately on its first drain attempt.
        engine.drive_deserialize(&mut cursor, &types, &mut out).unwrap();
        assert_eq!(engine.recv.len(), 1, "finished stream pops, leaving the suspended outer command");

        engine.resume_receive();
        assert!(engine.is_receive_idle(), "OldCommand pops back to (and past) the outer suspended item");
    }
}
