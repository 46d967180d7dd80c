//! Per-thread event loops ("selectors") that pack many objects onto a worker thread, drive
//! their `execute()` state machines, and hand out the `(pool_id, slot)` residency pairs the
//! `Manager` uses to route wakeups.
//!
//! The four selector flavors named in the design (object/timer, TCP connection, TCP listener,
//! UDP talker) differ only in what kernel primitive they multiplex and how they turn readiness
//! into an `EventMask`; that difference is captured by the `SelectorDriver` capability trait and
//! everything else - the worker loop, the ready queue, the deadline scan, cross-thread wakeups -
//! lives once in `Pool<S>`.

mod object_selector;
mod tcp_selector;
mod listener_selector;
mod worker;

pub use object_selector::ObjectDriver;
pub use tcp_selector::TcpConnDriver;
pub use listener_selector::ListenerDriver;
pub use worker::{Pool, PoolConfig};

use crate::object::{EventMask, Object};
pub use crate::object::Residency;
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A single hosted object inside one worker's slot table.
pub struct Hosted {
    pub object: Arc<dyn Object>,
    pub deadline: Instant,
    /// Event bits observed since the object's last `execute()`, consumed (and reset) when the
    /// ready queue next runs it.
    pub pending_events: EventMask,
}

/// Capability a `Pool` drives: register/reregister/deregister kernel interest for a slot, and
/// block waiting for either readiness or the shared waker.
///
/// Implementors own their own `mio::Poll`; `Pool` never touches `mio` types directly so that
/// adding a fifth flavor never requires changing the worker loop.
pub trait SelectorDriver: Send + 'static {
    /// Block for up to `timeout` (`None` = forever), invoking `on_event(local_slot, events)`
    /// for every readiness notification observed, including the reserved waker token (reported
    /// as slot `u32::MAX`, events `0`, which callers treat as "drain the wake queue").
    fn poll(&mut self, timeout: Option<Duration>, on_event: &mut dyn FnMut(u32, EventMask)) -> io::Result<()>;

    /// Register kernel interest for a freshly hosted object.
    fn register(&mut self, slot: u32, object: &dyn Object) -> io::Result<()>;

    /// Recompute kernel interest after `execute()` returned `Register`/`Unregister`.
    fn reregister(&mut self, slot: u32, object: &dyn Object) -> io::Result<()>;

    fn deregister(&mut self, slot: u32);

    /// A waker this driver's `poll()` is guaranteed to wake for - used by `Pool::raise()` for
    /// cross-thread wakeups.
    fn waker(&self) -> Arc<mio::Waker>;
}

/// Reserved token reported by a driver's `poll()` for its own waker, as opposed to a real slot.
pub const WAKE_TOKEN: u32 = u32::MAX;

/// Type-erased handle to a `Pool<S>`, letting `Manager` hold pools of different driver flavors
/// in one vector and route a wakeup without caring which flavor owns the target slot.
pub trait PoolHandle: Send + Sync {
    fn pool_id(&self) -> u32;
    fn raise(&self, slot: u32) -> io::Result<()>;
    fn raise_scan_all(&self) -> io::Result<()>;
}

impl<S: SelectorDriver> PoolHandle for Pool<S> {
    fn pool_id(&self) -> u32 {
        Pool::pool_id(self)
    }

    fn raise(&self, slot: u32) -> io::Result<()> {
        Pool::raise(self, slot)
    }

    fn raise_scan_all(&self) -> io::Result<()> {
        Pool::raise_scan_all(self)
    }
}

// `Residency` (which pool, which globally-unique slot - worker index and in-worker index are
// folded into one number via `slot = worker_idx * capacity + local`) lives in `crate::object`
// since `ObjectCore` stores it directly; re-exported here for selector-local code.
