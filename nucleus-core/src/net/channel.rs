use crate::net::buffer::Buffer;
use mio::net::TcpStream;
use mio::Interest;
use std::io;
use std::io::{Read, Write};
use std::os::unix::io::{AsRawFd, RawFd};

/// Errors a `Channel` implementation can surface. Anything that isn't a transient
/// would-block condition is fatal to the connection that owns the channel.
#[derive(Debug)]
pub enum Error {
    Closed,
    Io(io::Error),
}

impl From<io::Error> for Error {
    fn from(io_error: io::Error) -> Self {
        Error::Io(io_error)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Outcome of a single send/recv attempt. `Nok` means the caller should come back once the
/// selector reports readiness again; it is never an error.
#[derive(Debug, Eq, PartialEq)]
pub enum IoEvent {
    /// The requested operation fully completed; `usize` carries the byte count for stream ops.
    Done(usize),
    Nok,
}

/// Capability the TCP connection selector drives. Applications that want a custom wire
/// protocol implement this directly; `TcpChannel` is the batteries-included, non-blocking,
/// chunk-buffered implementation used by the provided connection selector.
pub trait Channel {
    /// Queue `buf` for sending, writing as much of it immediately as the socket accepts.
    fn send(&mut self, buf: &[u8]) -> Result<IoEvent>;

    /// Drain whatever the socket currently has available into `buf`. `Done(n)` means `n`
    /// bytes were placed into `buf`; it never blocks.
    fn recv(&mut self, buf: &mut [u8]) -> Result<IoEvent>;

    /// Stream up to `size` bytes from `reader` straight into the outgoing buffer, for
    /// payloads too large to stage through an intermediate slice (e.g. embedded streams).
    fn send_stream(&mut self, reader: &mut dyn Read, size: usize) -> Result<IoEvent>;

    /// Stream up to `size` bytes of already-received data into `writer`.
    fn recv_stream(&mut self, writer: &mut dyn Write, size: usize) -> Result<IoEvent>;

    /// Interest the selector should register for this channel right now.
    fn io_request(&self) -> Interest;

    /// Raw descriptor for kernel registration.
    fn descriptor(&self) -> RawFd;
}

/// Non-blocking, edge-triggered TCP channel. Coalesces queued sends into as few socket
/// writes as possible and buffers partial reads/writes in chunk pools so the connection
/// selector never has to retry a short write itself.
pub struct TcpChannel {
    stream: TcpStream,
    read_buffer: Buffer,
    write_buffer: Buffer,
    writable: bool,
}

impl TcpChannel {
    pub fn new(stream: TcpStream) -> TcpChannel {
        TcpChannel {
            stream,
            read_buffer: Buffer::new(),
            write_buffer: Buffer::new(),
            writable: true,
        }
    }

    pub fn stream(&self) -> &TcpStream {
        &self.stream
    }

    pub fn stream_mut(&mut self) -> &mut TcpStream {
        &mut self.stream
    }

    /// Pump as much of the write buffer to the socket as it will accept. Called by the
    /// selector on a writability event, and opportunistically after every `send`.
    pub fn flush(&mut self) -> Result<IoEvent> {
        match self.write_buffer.egress(&mut self.stream) {
            Ok(n) => {
                self.writable = self.write_buffer.is_empty();
                Ok(IoEvent::Done(n))
            }
            Err(e) => {
                if e.kind() == io::ErrorKind::WouldBlock {
                    self.writable = false;
                    Ok(IoEvent::Nok)
                } else {
                    Err(e.into())
                }
            }
        }
    }

    fn ingress(&mut self) -> Result<usize> {
        match self.read_buffer.ingress(&mut self.stream) {
            Ok(n) => Ok(n),
            Err(e) => {
                if e.kind() == io::ErrorKind::WouldBlock {
                    Ok(0)
                } else {
                    Err(e.into())
                }
            }
        }
    }
}

impl Channel for TcpChannel {
    fn send(&mut self, buf: &[u8]) -> Result<IoEvent> {
        self.write_buffer.write_all(buf)?;
        self.flush()
    }

    fn recv(&mut self, buf: &mut [u8]) -> Result<IoEvent> {
        self.ingress()?;

        if self.read_buffer.is_empty() {
            return Ok(IoEvent::Nok);
        }

        let n = self.read_buffer.read(buf)?;
        Ok(IoEvent::Done(n))
    }

    fn send_stream(&mut self, reader: &mut dyn Read, size: usize) -> Result<IoEvent> {
        let mut remaining = size;
        let mut total = 0usize;
        let mut chunk = [0u8; 8192];

        while remaining > 0 {
            let to_read = remaining.min(chunk.len());
            let n = reader.read(&mut chunk[..to_read])?;

            if n == 0 {
                break;
            }

            self.write_buffer.write_all(&chunk[..n])?;
            remaining -= n;
            total += n;
        }

        self.flush()?;
        Ok(IoEvent::Done(total))
    }

    fn recv_stream(&mut self, writer: &mut dyn Write, size: usize) -> Result<IoEvent> {
        self.ingress()?;

        let available = self.read_buffer.len().min(size);
        let mut chunk = vec![0u8; available];
        let n = self.read_buffer.read(&mut chunk)?;
        writer.write_all(&chunk[..n])?;

        if n < size {
            Ok(IoEvent::Nok)
        } else {
            Ok(IoEvent::Done(n))
        }
    }

    fn io_request(&self) -> Interest {
        if self.writable {
            Interest::READABLE
        } else {
            Interest::READABLE | Interest::WRITABLE
        }
    }

    fn descriptor(&self) -> RawFd {
        self.stream.as_raw_fd()
    }
}
