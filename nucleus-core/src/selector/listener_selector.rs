//! The TCP listener selector: a small poll loop that accepts connections and hands them to a
//! callback (normally "wrap in a `TcpChannel`, construct a connection object, push it into the
//! connection pool").

use super::{SelectorDriver, WAKE_TOKEN};
use crate::object::Object;
use mio::net::TcpListener;
use mio::{Events, Interest, Poll, Token, Waker};
use std::io;
use std::os::unix::io::AsRawFd;
use std::sync::Arc;
use std::time::Duration;

const WAKER_TOKEN: Token = Token(usize::MAX);

pub struct ListenerDriver {
    poll: Poll,
    waker: Arc<Waker>,
    events: Events,
}

impl ListenerDriver {
    pub fn new() -> io::Result<ListenerDriver> {
        let poll = Poll::new()?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKER_TOKEN)?);
        Ok(ListenerDriver {
            poll,
            waker,
            events: Events::with_capacity(64),
        })
    }
}

impl SelectorDriver for ListenerDriver {
    fn poll(&mut self, timeout: Option<Duration>, on_event: &mut dyn FnMut(u32, crate::object::EventMask)) -> io::Result<()> {
        match self.poll.poll(&mut self.events, timeout) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return Ok(()),
            Err(e) => return Err(e),
        }

        for event in self.events.iter() {
            if event.token() == WAKER_TOKEN {
                on_event(WAKE_TOKEN, 0);
            } else {
                on_event(event.token().0 as u32, crate::object::IN_DONE);
            }
        }

        Ok(())
    }

    fn register(&mut self, slot: u32, object: &dyn Object) -> io::Result<()> {
        let fd = object
            .io_descriptor()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "listener object has no descriptor"))?;
        let mut source = mio::unix::SourceFd(&fd);
        self.poll.registry().register(&mut source, Token(slot as usize), Interest::READABLE)
    }

    fn reregister(&mut self, _slot: u32, _object: &dyn Object) -> io::Result<()> {
        // A listener's interest never changes; it is always readable-for-accept.
        Ok(())
    }

    fn deregister(&mut self, _slot: u32) {}

    fn waker(&self) -> Arc<Waker> {
        self.waker.clone()
    }
}

/// Registers a raw `mio::net::TcpListener` directly, for the one-time setup call before the
/// listener object itself is pushed into the pool (the pool's own `register` goes through the
/// `Object::io_descriptor` capability afterwards).
pub fn bind(addr: std::net::SocketAddr) -> io::Result<TcpListener> {
    TcpListener::bind(addr)
}

pub(crate) fn raw_fd(listener: &TcpListener) -> std::os::unix::io::RawFd {
    listener.as_raw_fd()
}
