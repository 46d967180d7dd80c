//! A `Service` is a container of objects sharing one domain (TCP connections, command executer
//! slots, IPC talkers, ...). It owns the slot table that hands out handles and a sharded mutex
//! pool that serializes access to each object's mask/queue/residency without forcing every
//! delivery through one lock.

use crate::identity::{FullId, Handle, Lookup, SlotTable};
use crate::object::{Message, Object, SignalMask, Visitor};
use parking_lot::{Condvar, Mutex, RwLock};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug)]
pub enum Error {
    Stopping,
    Gone,
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum ServiceState {
    Running,
    Stopping,
    Stopped,
}

/// How many shard mutexes a service carries, independent of how many objects it ends up
/// holding. Default picked to keep contention low for a few thousand objects without
/// allocating one OS mutex per object.
#[derive(Clone, Debug, serde_derive::Deserialize)]
pub struct ServiceConfig {
    pub shard_count: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        ServiceConfig { shard_count: 64 }
    }
}

struct Inner {
    objects: RwLock<SlotTable<Arc<dyn Object>>>,
    shards: Vec<Mutex<()>>,
    state: Mutex<ServiceState>,
    stopped_cond: Condvar,
    object_count: AtomicUsize,
}

/// A container of objects sharing one domain, addressable by the high bits of `full_id`.
pub struct Service {
    service_idx: u32,
    inner: Inner,
}

impl Service {
    pub fn new(service_idx: u32, config: ServiceConfig) -> Service {
        let shard_count = config.shard_count.max(1);
        let mut shards = Vec::with_capacity(shard_count);
        shards.resize_with(shard_count, || Mutex::new(()));

        Service {
            service_idx,
            inner: Inner {
                objects: RwLock::new(SlotTable::new()),
                shards,
                state: Mutex::new(ServiceState::Running),
                stopped_cond: Condvar::new(),
                object_count: AtomicUsize::new(0),
            },
        }
    }

    pub fn service_idx(&self) -> u32 {
        self.service_idx
    }

    pub fn state(&self) -> ServiceState {
        *self.inner.state.lock()
    }

    /// The shard mutex guarding index `idx`'s mask/queue/residency. Picked by a plain modulo -
    /// a bounded pool, not one mutex per object.
    fn shard_for(&self, idx: u32) -> &Mutex<()> {
        &self.inner.shards[idx as usize % self.inner.shards.len()]
    }

    /// Inserts an object built from the handle it will be known by. `make` runs while holding
    /// the service-level write lock, so it must not itself try to touch this service.
    pub fn insert<F>(&self, make: F) -> Result<Handle>
    where
        F: FnOnce(Handle) -> Arc<dyn Object>,
    {
        if *self.inner.state.lock() != ServiceState::Running {
            return Err(Error::Stopping);
        }

        let service_idx = self.service_idx;
        let mut objects = self.inner.objects.write();
        let (_idx, _gen) = objects.insert_with(|idx, gen| {
            let handle = Handle::new(FullId::encode(service_idx, idx), gen);
            make(handle)
        });

        self.inner.object_count.fetch_add(1, Ordering::SeqCst);
        // Re-read back the handle rather than re-deriving it, so the stored object and the
        // returned handle are guaranteed to agree.
        let handle = objects
            .get(_idx, _gen)
            .found()
            .expect("object just inserted")
            .handle();

        Ok(handle)
    }

    /// Removes an object by handle, regardless of whether the handle is still live (a stale
    /// handle is simply a no-op).
    pub fn remove(&self, handle: Handle) {
        let idx = handle.full_id.index();
        let _shard = self.shard_for(idx).lock();
        let mut objects = self.inner.objects.write();

        if objects.remove(idx, handle.uid).is_some() {
            drop(objects);
            if self.inner.object_count.fetch_sub(1, Ordering::SeqCst) == 1
                && self.state() == ServiceState::Stopping
            {
                *self.inner.state.lock() = ServiceState::Stopped;
                self.inner.stopped_cond.notify_all();
            }
        }
    }

    /// Looks an object up and runs `f` on it while holding its shard mutex. A stale handle is
    /// `Gone` - the normal, silent outcome of a racy cross-thread reference.
    fn with_object<R>(&self, handle: Handle, f: impl FnOnce(&Arc<dyn Object>) -> R) -> Lookup<R> {
        let idx = handle.full_id.index();
        let _shard = self.shard_for(idx).lock();
        let objects = self.inner.objects.read();

        match objects.get(idx, handle.uid) {
            Lookup::Found(obj) => Lookup::Found(f(obj)),
            Lookup::Gone => Lookup::Gone,
        }
    }

    /// Delivers a bare signal mask to the object named by `handle`. Returns whether the
    /// scheduler needs to wake it up; `Gone` is folded into `false` since a disappeared
    /// addressee needs no wakeup.
    pub fn signal(&self, handle: Handle, mask: SignalMask) -> bool {
        self.with_object(handle, |obj| obj.core().signal_mask(mask))
            .found()
            .unwrap_or(false)
    }

    /// Delivers a message to the object named by `handle`.
    pub fn signal_message(&self, handle: Handle, msg: Arc<dyn Message>) -> bool {
        self.with_object(handle, |obj| obj.core().signal_message(msg))
            .found()
            .unwrap_or(false)
    }

    /// The object's current pool/slot residency, used by `Manager::raise` to route a wakeup.
    /// `Gone` for a stale handle, same as every other lookup here.
    pub fn residency(&self, handle: Handle) -> Lookup<crate::object::Residency> {
        self.with_object(handle, |obj| obj.core().residency())
    }

    /// Broadcasts a bare mask to every live object, in index order, each under its own shard
    /// mutex. Returns the handles that need a scheduler wakeup.
    pub fn signal_all(&self, mask: SignalMask) -> Vec<Handle> {
        let objects = self.inner.objects.read();
        let mut woken = Vec::new();

        for (idx, obj) in objects.iter() {
            let _shard = self.shard_for(idx).lock();
            if obj.core().signal_mask(mask) {
                woken.push(obj.handle());
            }
        }

        woken
    }

    /// Broadcasts a shared message to every live object. Messages delivered this way must be
    /// `Send + Sync` and internally immutable, since every target sees the same `Arc`.
    pub fn signal_all_message(&self, msg: Arc<dyn Message>) -> Vec<Handle> {
        let objects = self.inner.objects.read();
        let mut woken = Vec::new();

        for (idx, obj) in objects.iter() {
            let _shard = self.shard_for(idx).lock();
            if obj.core().signal_message(msg.clone()) {
                woken.push(obj.handle());
            }
        }

        woken
    }

    pub fn visit(&self, visitor: &mut dyn Visitor) {
        let objects = self.inner.objects.read();
        for (_, obj) in objects.iter() {
            obj.accept(visitor);
        }
    }

    pub fn uid(&self, idx: u32) -> Option<u32> {
        self.inner.objects.read().gen_of(idx)
    }

    pub fn object_count(&self) -> usize {
        self.inner.object_count.load(Ordering::SeqCst)
    }

    /// Sets state to `Stopping` and broadcasts `S_KILL`. If `wait` is set, blocks until every
    /// contained object has unregistered, at which point state becomes `Stopped`.
    pub fn stop(&self, wait: bool) {
        {
            let mut state = self.inner.state.lock();
            if *state == ServiceState::Stopped {
                return;
            }
            *state = ServiceState::Stopping;
        }

        self.signal_all(crate::object::S_KILL);

        if self.inner.object_count.load(Ordering::SeqCst) == 0 {
            *self.inner.state.lock() = ServiceState::Stopped;
            return;
        }

        if wait {
            let mut state = self.inner.state.lock();
            while *state != ServiceState::Stopped {
                self.inner.stopped_cond.wait_for(&mut state, Duration::from_secs(5));
            }
        }
    }
}
