//! The UDP talker selector: the fourth flavor named alongside object/TCP-connection/listener in
//! the core's selector design, living here rather than in `nucleus-core` since only the IPC
//! transport hosts UDP talkers.

use mio::{Events, Poll, Token, Waker};
use nucleus_core::object::{Object, ERR_DONE, IN_DONE};
use nucleus_core::selector::SelectorDriver;
use std::io;
use std::sync::Arc;
use std::time::Duration;

const WAKER_TOKEN: Token = Token(usize::MAX);

pub struct TalkerDriver {
    poll: Poll,
    waker: Arc<Waker>,
    events: Events,
}

impl TalkerDriver {
    pub fn new() -> io::Result<TalkerDriver> {
        let poll = Poll::new()?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKER_TOKEN)?);
        Ok(TalkerDriver { poll, waker, events: Events::with_capacity(256) })
    }
}

impl SelectorDriver for TalkerDriver {
    fn poll(&mut self, timeout: Option<Duration>, on_event: &mut dyn FnMut(u32, nucleus_core::object::EventMask)) -> io::Result<()> {
        match self.poll.poll(&mut self.events, timeout) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return Ok(()),
            Err(e) => return Err(e),
        }

        for event in self.events.iter() {
            if event.token() == WAKER_TOKEN {
                on_event(nucleus_core::selector::WAKE_TOKEN, 0);
                continue;
            }

            let mut mask = 0;
            if event.is_readable() {
                mask |= IN_DONE;
            }
            if event.is_error() {
                mask |= ERR_DONE;
            }
            on_event(event.token().0 as u32, mask);
        }

        Ok(())
    }

    fn register(&mut self, slot: u32, object: &dyn Object) -> io::Result<()> {
        let fd = object
            .io_descriptor()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "talker has no socket descriptor"))?;
        let mut source = mio::unix::SourceFd(&fd);
        self.poll.registry().register(&mut source, Token(slot as usize), mio::Interest::READABLE)
    }

    fn reregister(&mut self, slot: u32, object: &dyn Object) -> io::Result<()> {
        let fd = match object.io_descriptor() {
            Some(fd) => fd,
            None => return Ok(()),
        };
        let mut source = mio::unix::SourceFd(&fd);
        self.poll.registry().reregister(&mut source, Token(slot as usize), mio::Interest::READABLE)
    }

    fn deregister(&mut self, _slot: u32) {}

    fn waker(&self) -> Arc<Waker> {
        self.waker.clone()
    }
}
