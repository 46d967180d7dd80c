//! The object/timer selector: a pure queue-and-deadline driver with no per-slot file
//! descriptors. Used for services, the command executer, the file manager, and any other
//! object whose readiness is driven entirely by signals and timers rather than a socket.

use super::{SelectorDriver, WAKE_TOKEN};
use crate::object::{EventMask, Object};
use mio::{Events, Poll, Token, Waker};
use std::io;
use std::sync::Arc;
use std::time::Duration;

const WAKER_TOKEN: Token = Token(usize::MAX);

pub struct ObjectDriver {
    poll: Poll,
    waker: Arc<Waker>,
    events: Events,
}

impl ObjectDriver {
    pub fn new() -> io::Result<ObjectDriver> {
        let poll = Poll::new()?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKER_TOKEN)?);
        Ok(ObjectDriver {
            poll,
            waker,
            events: Events::with_capacity(256),
        })
    }
}

impl SelectorDriver for ObjectDriver {
    fn poll(&mut self, timeout: Option<Duration>, on_event: &mut dyn FnMut(u32, EventMask)) -> io::Result<()> {
        match self.poll.poll(&mut self.events, timeout) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return Ok(()),
            Err(e) => return Err(e),
        }

        for event in self.events.iter() {
            if event.token() == WAKER_TOKEN {
                on_event(WAKE_TOKEN, 0);
            }
        }

        Ok(())
    }

    fn register(&mut self, _slot: u32, _object: &dyn Object) -> io::Result<()> {
        // No kernel-level descriptor to register; readiness here is purely signal/timer driven.
        Ok(())
    }

    fn reregister(&mut self, _slot: u32, _object: &dyn Object) -> io::Result<()> {
        Ok(())
    }

    fn deregister(&mut self, _slot: u32) {}

    fn waker(&self) -> Arc<Waker> {
        self.waker.clone()
    }
}
