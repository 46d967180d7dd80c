//! The thread-local singleton tying `Service`s and selector `Pool`s together into the single
//! global directory that `signal`/`raise` route through.
//!
//! Each worker thread installs a pointer to the (one, process-wide) `Manager` into a
//! thread-local at startup via `prepare_thread`, so any code running on that thread - an
//! object's own `execute()`, a message's `execute_on` - can reach `Manager::current()` without
//! threading a reference through every call.

use crate::identity::Handle;
use crate::object::{Message, Object, SignalMask};
use crate::selector::PoolHandle;
use crate::service::Service;
use parking_lot::RwLock;
use std::cell::Cell;
use std::sync::Arc;

thread_local! {
    static CURRENT: Cell<*const Manager> = Cell::new(std::ptr::null());
}

/// The compact, append-only directory of services and pools. Services are addressed by the
/// small high bits of `full_id`, so adding one is just appending to (or filling a reserved slot
/// in) this vector - but it MUST happen before the service can receive any signal, since a
/// concurrent handle may already reference an index whose service pointer isn't published yet.
pub struct Manager {
    services: RwLock<Vec<Option<Arc<Service>>>>,
    pools: RwLock<Vec<Arc<dyn PoolHandle>>>,
}

impl Manager {
    pub fn new() -> Manager {
        Manager {
            services: RwLock::new(Vec::new()),
            pools: RwLock::new(Vec::new()),
        }
    }

    /// Publishes a service at its own `service_idx`, growing the vector with reserved `None`
    /// slots if needed. Panics on a double-add: re-publishing a live index would race any
    /// in-flight handle into the wrong service.
    pub fn add_service(&self, service: Arc<Service>) {
        let idx = service.service_idx() as usize;
        let mut services = self.services.write();
        if services.len() <= idx {
            services.resize(idx + 1, None);
        }
        assert!(services[idx].is_none(), "service index {} already published", idx);
        services[idx] = Some(service);
    }

    /// Publishes a pool at `pool_id`, same growth discipline as `add_service`.
    pub fn add_pool(&self, pool_id: u32, pool: Arc<dyn PoolHandle>) {
        let idx = pool_id as usize;
        let mut pools = self.pools.write();
        if pools.len() <= idx {
            pools.resize_with(idx + 1, || Arc::new(NullPool) as Arc<dyn PoolHandle>);
        }
        pools[idx] = pool;
    }

    fn service(&self, handle: Handle) -> Option<Arc<Service>> {
        let idx = handle.full_id.service() as usize;
        self.services.read().get(idx).cloned().flatten()
    }

    fn pool(&self, pool_id: u32) -> Option<Arc<dyn PoolHandle>> {
        self.pools.read().get(pool_id as usize).cloned()
    }

    /// Decodes `handle`, forwards a bare signal mask to its owning service, and if the service
    /// reports the object needs a scheduler wakeup, routes one through `raise`.
    pub fn signal(&self, handle: Handle, mask: SignalMask) -> bool {
        let Some(service) = self.service(handle) else { return false };
        let needs_wake = service.signal(handle, mask);
        if needs_wake {
            self.raise(&service, handle);
        }
        needs_wake
    }

    /// Same as `signal`, but delivering a polymorphic message rather than a bare mask.
    pub fn signal_message(&self, handle: Handle, msg: Arc<dyn Message>) -> bool {
        let Some(service) = self.service(handle) else { return false };
        let needs_wake = service.signal_message(handle, msg);
        if needs_wake {
            self.raise(&service, handle);
        }
        needs_wake
    }

    /// Reads `handle`'s residency and pings the owning pool's worker so it picks the object up
    /// off its wake queue. A `Gone` residency lookup, or one that never got a pool assigned yet,
    /// is silently skipped - the object will be scheduled once it does.
    fn raise(&self, service: &Service, handle: Handle) {
        let Some(residency) = service.residency(handle).found() else { return };
        if !residency.is_set() {
            return;
        }
        if let Some(pool) = self.pool(residency.pool_id) {
            let _ = pool.raise(residency.slot);
        }
    }

    pub fn uid(&self, handle: Handle) -> Option<u32> {
        let service = self.service(handle)?;
        service.uid(handle.full_id.index())
    }

    /// Installs a pointer to `manager` into this thread's thread-local slot. `manager` must
    /// outlive every call to `Manager::current()` made from this thread - in practice, it's a
    /// process-wide singleton torn down only at shutdown.
    pub fn prepare_thread(manager: &Manager) {
        CURRENT.with(|cell| cell.set(manager as *const Manager));
    }

    pub fn unprepare_thread() {
        CURRENT.with(|cell| cell.set(std::ptr::null()));
    }

    /// Borrows the manager installed on this thread by `prepare_thread`. Panics if none was
    /// installed - every worker thread and every thread driving `execute()` must call
    /// `prepare_thread` before touching objects.
    pub fn current<'a>() -> &'a Manager {
        CURRENT.with(|cell| {
            let ptr = cell.get();
            assert!(!ptr.is_null(), "Manager::current() called on a thread that never called prepare_thread");
            unsafe { &*ptr }
        })
    }
}

impl Default for Manager {
    fn default() -> Self {
        Manager::new()
    }
}

/// Placeholder occupying a reserved-but-unpublished pool slot, so `add_pool` can grow the
/// vector ahead of actually registering every flavor without `Option` bookkeeping at every
/// call site. `raise`ing an unpublished slot is a no-op, same as a `Gone` handle.
struct NullPool;
impl PoolHandle for NullPool {
    fn pool_id(&self) -> u32 {
        u32::MAX
    }
    fn raise(&self, _slot: u32) -> std::io::Result<()> {
        Ok(())
    }
    fn raise_scan_all(&self) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::FullId;
    use crate::object::{EventMask, ExecResult, ObjectCore};
    use crate::service::ServiceConfig;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Instant;

    struct Noop(ObjectCore);
    impl Object for Noop {
        fn handle(&self) -> Handle {
            self.0.handle()
        }
        fn core(&self) -> &ObjectCore {
            &self.0
        }
        fn execute(&self, _events: EventMask, _deadline: &mut Instant) -> ExecResult {
            ExecResult::Nok
        }
    }

    struct CountingPool(AtomicU32);
    impl PoolHandle for CountingPool {
        fn pool_id(&self) -> u32 {
            0
        }
        fn raise(&self, _slot: u32) -> std::io::Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        fn raise_scan_all(&self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_signal_routes_a_wakeup_through_the_objects_pool() {
        let manager = Manager::new();
        let service = Arc::new(Service::new(0, ServiceConfig::default()));
        let handle = service
            .insert(|h| Arc::new(Noop(ObjectCore::new(h))) as Arc<dyn Object>)
            .unwrap();
        service.residency(handle); // sanity: handle is live before we set anything

        // Residency starts unset, so a signal should not try to raise anything yet.
        manager.add_service(service.clone());
        let pool = Arc::new(CountingPool(AtomicU32::new(0)));
        manager.add_pool(0, pool.clone());

        manager.signal(handle, crate::object::S_RAISE);
        assert_eq!(pool.0.load(Ordering::SeqCst), 0, "no residency yet -> no raise");
    }

    #[test]
    fn test_stale_handle_signal_is_false_and_does_not_panic() {
        let manager = Manager::new();
        let service = Arc::new(Service::new(0, ServiceConfig::default()));
        manager.add_service(service.clone());

        let bogus = Handle::new(FullId::encode(0, 999), 0);
        assert!(!manager.signal(bogus, crate::object::S_RAISE));
    }

    #[test]
    fn test_prepare_thread_installs_and_clears_current() {
        let manager = Manager::new();
        Manager::prepare_thread(&manager);
        let _ = Manager::current();
        Manager::unprepare_thread();
    }

    #[test]
    #[should_panic(expected = "prepare_thread")]
    fn test_current_panics_without_prepare_thread() {
        // The default test harness gives every #[test] its own fresh thread, so this thread's
        // CURRENT has never been set.
        Manager::current();
    }
}
