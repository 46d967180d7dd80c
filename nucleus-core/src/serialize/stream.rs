//! Embedded byte streams and the IPC framing markers that tell a deserializer whether a buffer
//! segment starts a fresh message, continues the current one, or pops back to an earlier
//! suspended one.

use std::io;

/// A message-side capability yielding a byte stream for serialization (send) or deserialization
/// (receive). The engine pumps bytes through this without knowing what backs it - a file, a
/// generated blob, an in-memory buffer.
pub trait Streammer: Send + Sync {
    /// Pull up to `buf.len()` bytes for sending. Returning `0` before the declared size is
    /// reached ends the stream early (rare; the declared size header wins on the wire either
    /// way since the engine tracks its own remaining count).
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Accept up to `buf.len()` received bytes. An unavailable backing store (e.g. the
    /// FileManager hasn't granted a handle yet) should still accept and discard bytes rather
    /// than block, so parsing can never stall on storage back-pressure - see `DummySink`.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;
}

/// Receive-side fallback used when no real stream is available yet: accepts and discards every
/// byte so the deserializer never stalls. The message's `destroy_stream` hook is later told the
/// stream was invalid.
pub struct DummySink;

impl Streammer for DummySink {
    fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        Ok(0)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(buf.len())
    }
}

/// One-byte marker preceding each command segment inside a `Data` buffer's payload (see
/// `nucleus-ipc`'s wire format). A single buffer may carry several segments back to back.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum CommandMarker {
    /// Start deserializing a brand new message.
    NewCommand = 0,
    /// Keep feeding bytes into the message currently being assembled.
    ContinuedCommand = 1,
    /// Pop back to an earlier suspended message (one level of nesting), used when a large
    /// stream interleaves with small concurrent messages.
    OldCommand = 2,
}

impl CommandMarker {
    pub fn from_byte(b: u8) -> Option<CommandMarker> {
        match b {
            0 => Some(CommandMarker::NewCommand),
            1 => Some(CommandMarker::ContinuedCommand),
            2 => Some(CommandMarker::OldCommand),
            _ => None,
        }
    }

    pub fn as_byte(self) -> u8 {
        self as u8
    }
}
