//! The object base: signal mask, inbound message queue, and the `execute()` state-machine
//! contract every scheduled entity implements.
//!
//! Per the sharing policy of the framework (see `crate::service`), the mask/queue/residency
//! fields here are touched by a non-owning thread only while holding the object's shard
//! mutex - so they're plain `UnsafeCell`s rather than atomics or `Mutex`es of their own. The
//! shard mutex is the single synchronization boundary; duplicating it per-field would just
//! burn memory without adding safety.

use crate::identity::Handle;
use mio::Interest;
use std::cell::UnsafeCell;
use std::collections::VecDeque;
use std::os::unix::io::RawFd;
use std::sync::Arc;
use std::time::Instant;

pub type SignalMask = u32;

pub const S_RAISE: SignalMask = 1 << 0;
pub const S_KILL: SignalMask = 1 << 1;
pub const S_SIG: SignalMask = 1 << 2;
pub const S_CMD: SignalMask = 1 << 3;

/// Events reported by a selector to `execute()`: which of read/write/error completed.
pub type EventMask = u32;

pub const IN_DONE: EventMask = 1 << 0;
pub const OUT_DONE: EventMask = 1 << 1;
pub const ERR_DONE: EventMask = 1 << 2;

/// Outcome of one `execute()` tick.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum ExecResult {
    /// Reschedule immediately - there's more work this object can do right now.
    Ok,
    /// Sleep until the next event or `deadline`.
    Nok,
    /// Destroy the object: deregister from the kernel, free the slot, drop the reference.
    Bad,
    /// Release the slot but keep the object alive; the caller now owns it (used when an
    /// object migrates to a different pool).
    Leave,
    /// The object's file-descriptor-of-interest changed; the selector must re-register it.
    Register,
    /// The object no longer wants kernel event delivery at all.
    Unregister,
}

/// Whether the core should reclaim a message after an IPC-layer hook ran.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum Ownership {
    Drop,
    Keep,
}

/// A message's home location while resident in a pool: which pool, and which slot within
/// that pool's selector. `(u32::MAX, u32::MAX)` means "not yet scheduled anywhere."
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct Residency {
    pub pool_id: u32,
    pub slot: u32,
}

impl Residency {
    pub const UNSET: Residency = Residency { pool_id: u32::MAX, slot: u32::MAX };

    pub fn is_set(self) -> bool {
        self != Residency::UNSET
    }
}

/// A polymorphic unit of work delivered to an object's inbound queue. Messages used in a
/// `Service::signal_all` broadcast are shared (`Arc`) across every target and so must be
/// internally immutable - see Open Question (a) in `SPEC_FULL.md`.
pub trait Message: Send + Sync {
    /// Apply this message to `target`, running on whichever thread currently executes it.
    fn execute_on(&self, target: &dyn Object);

    /// Called when this message arrives over IPC, before it is handed to `execute_on`. May
    /// reroute the message (e.g. to a different local object) by returning `Ownership::Keep`
    /// and doing the rerouting itself; the default just lets the core deliver normally.
    fn received(&self, _connector_id: u32) -> Ownership {
        Ownership::Drop
    }
}

/// Double-dispatch hook for broadcast-style operations (`Service::visit`).
pub trait Visitor {
    fn visit(&mut self, obj: &dyn Object);
}

/// The scheduling contract every hosted entity implements: TCP connections, UDP talkers,
/// the command executer, the file manager, and application objects all go through this.
pub trait Object: Send + Sync + 'static {
    fn handle(&self) -> Handle;

    fn core(&self) -> &ObjectCore;

    /// The state-machine tick. `deadline` is in/out: the object may push it further out or
    /// pull it closer; the caller (selector) takes the returned value as its next wake time.
    fn execute(&self, events: EventMask, deadline: &mut Instant) -> ExecResult;

    /// Double-dispatch hook used by broadcast operations (`Service::visit`).
    fn accept(&self, v: &mut dyn Visitor) {
        v.visit(self);
    }

    /// The raw descriptor a selector should register kernel interest for, if this object is
    /// backed by one (a TCP connection, listener, or UDP talker). `None` for pure timer/signal
    /// objects - the object selector never calls this.
    fn io_descriptor(&self) -> Option<RawFd> {
        None
    }

    /// The interest (`READABLE`/`WRITABLE`) the connection/listener/talker selector should
    /// register for this object right now.
    fn io_interest(&self) -> Option<Interest> {
        None
    }

    /// Escape hatch for messages that need to call a concrete method their target exposes
    /// beyond the `Object` contract (e.g. the command executer's `register`) - downcast via
    /// `target.as_any().downcast_ref::<Concrete>()`, matching the type map's `WireObject::as_any`.
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

/// Shared mutable state every `Object` carries, guarded by the owning service's shard
/// mutex - see `crate::service::Service::shard_mutex`. Callers MUST hold that mutex before
/// calling any method here; the type itself enforces nothing because the lock lives outside
/// the object, in the service's shard pool, not in a per-object field (this is the whole
/// point of sharding: a bounded number of OS mutexes regardless of object population).
pub struct ObjectCore {
    handle: Handle,
    mask: UnsafeCell<SignalMask>,
    queue: UnsafeCell<VecDeque<Arc<dyn Message>>>,
    residency: UnsafeCell<Residency>,
    dying: UnsafeCell<bool>,
}

// Safety: every access is performed by a thread holding the matching shard mutex in
// `Service`; there is never concurrent access to the cells above.
unsafe impl Sync for ObjectCore {}
unsafe impl Send for ObjectCore {}

impl ObjectCore {
    pub fn new(handle: Handle) -> ObjectCore {
        ObjectCore {
            handle,
            mask: UnsafeCell::new(0),
            queue: UnsafeCell::new(VecDeque::new()),
            residency: UnsafeCell::new(Residency::UNSET),
            dying: UnsafeCell::new(false),
        }
    }

    pub fn handle(&self) -> Handle {
        self.handle
    }

    pub fn residency(&self) -> Residency {
        unsafe { *self.residency.get() }
    }

    /// Precondition: caller holds this object's shard mutex.
    pub fn set_residency(&self, residency: Residency) {
        unsafe {
            *self.residency.get() = residency;
        }
    }

    pub fn is_dying(&self) -> bool {
        unsafe { *self.dying.get() }
    }

    /// Precondition: caller holds this object's shard mutex.
    pub fn mark_dying(&self) {
        unsafe {
            *self.dying.get() = true;
        }
    }

    /// `mask |= m`. Returns `true` iff `S_RAISE` transitioned from cleared to set as part of
    /// this call *and* the mask actually changed - the signal that the Manager needs to wake
    /// this object's pool.
    ///
    /// Precondition: caller holds this object's shard mutex.
    pub fn signal_mask(&self, m: SignalMask) -> bool {
        unsafe {
            let before = *self.mask.get();
            let after = before | m;

            if after == before {
                return false;
            }

            *self.mask.get() = after;
            (before & S_RAISE == 0) && (after & S_RAISE != 0)
        }
    }

    /// Appends `msg` to the inbound queue then signals `S_CMD | S_RAISE`. Refuses silently if
    /// the object is dying.
    ///
    /// Precondition: caller holds this object's shard mutex.
    pub fn signal_message(&self, msg: Arc<dyn Message>) -> bool {
        if self.is_dying() {
            return false;
        }

        unsafe {
            (*self.queue.get()).push_back(msg);
        }

        self.signal_mask(S_CMD | S_RAISE)
    }

    /// Returns the current mask and atomically resets it to `mask & keep`. Must be called by
    /// the executing thread at the top of `execute`, under this object's shard mutex.
    pub fn grab_signal_mask(&self, keep: SignalMask) -> SignalMask {
        unsafe {
            let current = *self.mask.get();
            *self.mask.get() = current & keep;
            current
        }
    }

    /// Drains the inbound queue. Precondition: caller holds this object's shard mutex.
    pub fn drain_messages(&self) -> Vec<Arc<dyn Message>> {
        unsafe { (*self.queue.get()).drain(..).collect() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::FullId;

    fn handle() -> Handle {
        Handle::new(FullId::encode(0, 0), 0)
    }

    #[test]
    fn test_signal_mask_reports_wake_only_on_raise_transition() {
        let core = ObjectCore::new(handle());

        // Setting a mask that doesn't touch S_RAISE never wakes.
        assert!(!core.signal_mask(S_SIG));
        // Setting S_RAISE the first time does.
        assert!(core.signal_mask(S_RAISE));
        // Setting it again (already set) does not.
        assert!(!core.signal_mask(S_RAISE));
        // Re-signalling a mask that doesn't change anything at all does not.
        assert!(!core.signal_mask(S_SIG));
    }

    #[test]
    fn test_grab_signal_mask_resets_to_kept_bits() {
        let core = ObjectCore::new(handle());
        core.signal_mask(S_RAISE | S_SIG | S_KILL);

        let grabbed = core.grab_signal_mask(S_KILL);

        assert_eq!(grabbed, S_RAISE | S_SIG | S_KILL);
        // S_KILL is sticky across a grab (a kill signal must not be lost mid-tick).
        assert_eq!(core.grab_signal_mask(0), S_KILL);
    }

    #[test]
    fn test_dying_object_refuses_messages() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        struct Counter(Arc<AtomicUsize>);
        impl Message for Counter {
            fn execute_on(&self, _target: &dyn Object) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let core = ObjectCore::new(handle());
        let counter = Arc::new(AtomicUsize::new(0));

        assert!(core.signal_message(Arc::new(Counter(counter.clone()))));
        assert_eq!(core.drain_messages().len(), 1);

        core.mark_dying();
        assert!(!core.signal_message(Arc::new(Counter(counter))));
        assert_eq!(core.drain_messages().len(), 0);
    }

    #[test]
    fn test_message_queue_fifo_order() {
        struct Tag(u32, Arc<UnsafeCell<Vec<u32>>>);
        unsafe impl Send for Tag {}
        unsafe impl Sync for Tag {}
        impl Message for Tag {
            fn execute_on(&self, _target: &dyn Object) {
                unsafe { (*self.1.get()).push(self.0) };
            }
        }

        let core = ObjectCore::new(handle());
        let order = Arc::new(UnsafeCell::new(Vec::new()));

        for i in 0..5 {
            core.signal_message(Arc::new(Tag(i, order.clone())));
        }

        let drained = core.drain_messages();
        assert_eq!(drained.len(), 5);
        for (i, msg) in drained.iter().enumerate() {
            msg.execute_on(&DummyObject);
            assert_eq!(i as u32, unsafe { *order.get() }.last().copied().unwrap());
        }
    }

    struct DummyObject;
    impl Object for DummyObject {
        fn handle(&self) -> Handle {
            handle()
        }
        fn core(&self) -> &ObjectCore {
            unimplemented!()
        }
        fn execute(&self, _events: EventMask, _deadline: &mut Instant) -> ExecResult {
            ExecResult::Nok
        }
    }
}
