//! The worker loop shared by every selector flavor: a fixed-capacity slot table, a FIFO ready
//! queue, deadline bookkeeping amortized over `time_read_interval` iterations, and cross-thread
//! wakeups routed through the driver's `mio::Waker`.

use super::{Hosted, Residency, SelectorDriver, WAKE_TOKEN};
use crate::object::{ExecResult, Object};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

#[derive(Clone, Debug, serde_derive::Deserialize)]
pub struct PoolConfig {
    /// Objects hosted per worker before a new worker is spawned.
    pub capacity: u32,
    /// Upper bound on worker count; the pool only ever grows (see DESIGN.md).
    pub max_workers: u32,
    /// How many non-blocking poll iterations pass between clock reads.
    pub time_read_interval: u32,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            capacity: 4096,
            max_workers: num_cpus(),
            time_read_interval: 128,
        }
    }
}

fn num_cpus() -> u32 {
    thread::available_parallelism().map(|n| n.get() as u32).unwrap_or(1)
}

enum WakeMsg {
    Raise(u32),
    Scan,
}

type HostedCallback = Box<dyn FnOnce(u32) + Send>;

struct WorkerHandle {
    waker: Arc<mio::Waker>,
    wake_queue: Arc<Mutex<VecDeque<WakeMsg>>>,
    push_queue: Arc<Mutex<VecDeque<(Arc<dyn Object>, HostedCallback)>>>,
    hosted: Arc<AtomicUsize>,
    _join: thread::JoinHandle<()>,
}

/// A pool of interchangeable worker threads, each running one instance of driver `S`. Workers
/// are spawned lazily: the first `push` spawns worker 0; once a worker's hosted count reaches
/// `capacity`, the next push spawns another, up to `max_workers`.
pub struct Pool<S: SelectorDriver> {
    pool_id: u32,
    config: PoolConfig,
    make_driver: Box<dyn Fn() -> io::Result<S> + Send + Sync>,
    workers: Mutex<Vec<WorkerHandle>>,
}

impl<S: SelectorDriver> Pool<S> {
    pub fn new<F>(pool_id: u32, config: PoolConfig, make_driver: F) -> Pool<S>
    where
        F: Fn() -> io::Result<S> + Send + Sync + 'static,
    {
        Pool {
            pool_id,
            config,
            make_driver: Box::new(make_driver),
            workers: Mutex::new(Vec::new()),
        }
    }

    pub fn pool_id(&self) -> u32 {
        self.pool_id
    }

    /// Hosts `object` in some worker with spare capacity, spawning one if needed. `on_hosted`
    /// runs on the worker thread once the object has been placed into a slot, so the caller can
    /// record the resulting residency under the owning service's shard mutex.
    pub fn push(
        &self,
        object: Arc<dyn Object>,
        on_hosted: impl FnOnce(Residency) + Send + 'static,
    ) -> io::Result<()> {
        let mut workers = self.workers.lock();
        let capacity = self.config.capacity;

        let worker_idx = match workers
            .iter()
            .position(|w| w.hosted.load(Ordering::SeqCst) < capacity as usize)
        {
            Some(idx) => idx,
            None if (workers.len() as u32) < self.config.max_workers => {
                let idx = workers.len();
                workers.push(self.spawn_worker()?);
                idx
            }
            // At the worker ceiling with no spare capacity: host on the least loaded worker
            // rather than refuse outright - over-subscription, not rejection.
            None => workers
                .iter()
                .enumerate()
                .min_by_key(|(_, w)| w.hosted.load(Ordering::SeqCst))
                .map(|(idx, _)| idx)
                .unwrap_or(0),
        };

        let worker = &workers[worker_idx];
        worker.hosted.fetch_add(1, Ordering::SeqCst);

        let pool_id = self.pool_id;
        let worker_idx_u32 = worker_idx as u32;
        let callback: HostedCallback = Box::new(move |local_slot: u32| {
            on_hosted(Residency {
                pool_id,
                slot: worker_idx_u32 * capacity + local_slot,
            });
        });

        worker.push_queue.lock().push_back((object, callback));
        worker.waker.wake()
    }

    /// Wakes the worker owning `slot` (a pool-global slot number) so it drains its wake queue.
    pub fn raise(&self, slot: u32) -> io::Result<()> {
        let workers = self.workers.lock();
        let worker_idx = (slot / self.config.capacity) as usize;
        let local_slot = slot % self.config.capacity;

        if let Some(worker) = workers.get(worker_idx) {
            worker.wake_queue.lock().push_back(WakeMsg::Raise(local_slot));
            worker.waker.wake()?;
        }

        Ok(())
    }

    /// Wakes every worker and asks each for a full slot scan - used when a signal's target
    /// slot is unknown, or a per-worker wake queue would otherwise overflow.
    pub fn raise_scan_all(&self) -> io::Result<()> {
        let workers = self.workers.lock();
        for worker in workers.iter() {
            worker.wake_queue.lock().push_back(WakeMsg::Scan);
            worker.waker.wake()?;
        }
        Ok(())
    }

    fn spawn_worker(&self) -> io::Result<WorkerHandle> {
        let driver = (self.make_driver)()?;
        let waker = driver.waker();
        let wake_queue: Arc<Mutex<VecDeque<WakeMsg>>> = Arc::new(Mutex::new(VecDeque::new()));
        let push_queue: Arc<Mutex<VecDeque<(Arc<dyn Object>, HostedCallback)>>> =
            Arc::new(Mutex::new(VecDeque::new()));
        let hosted = Arc::new(AtomicUsize::new(0));

        let time_read_interval = self.config.time_read_interval;
        let capacity = self.config.capacity;

        let worker_wake_queue = wake_queue.clone();
        let worker_push_queue = push_queue.clone();
        let worker_hosted = hosted.clone();

        let join = thread::Builder::new()
            .name("selector-worker".into())
            .spawn(move || {
                run_worker(
                    driver,
                    capacity,
                    time_read_interval,
                    worker_wake_queue,
                    worker_push_queue,
                    worker_hosted,
                );
            })
            .expect("failed to spawn selector worker thread");

        Ok(WorkerHandle {
            waker,
            wake_queue,
            push_queue,
            hosted,
            _join: join,
        })
    }
}

fn run_worker<S: SelectorDriver>(
    mut driver: S,
    capacity: u32,
    time_read_interval: u32,
    wake_queue: Arc<Mutex<VecDeque<WakeMsg>>>,
    push_queue: Arc<Mutex<VecDeque<(Arc<dyn Object>, HostedCallback)>>>,
    hosted: Arc<AtomicUsize>,
) {
    let mut slots: Vec<Option<Hosted>> = Vec::with_capacity(capacity as usize);
    let mut free: Vec<u32> = Vec::new();
    let mut ready: VecDeque<u32> = VecDeque::new();

    let mut iterations_since_clock_read: u32 = 0;
    let mut now = Instant::now();
    let mut next_deadline_global: Option<Instant> = None;

    loop {
        iterations_since_clock_read += 1;
        if iterations_since_clock_read >= time_read_interval {
            now = Instant::now();
            iterations_since_clock_read = 0;
        }

        let timeout = next_deadline_global.map(|d| d.saturating_duration_since(now));

        let mut woken_slots: VecDeque<(u32, crate::object::EventMask)> = VecDeque::new();
        let poll_result = driver.poll(timeout, &mut |slot, events| {
            woken_slots.push_back((slot, events));
        });

        if poll_result.is_err() {
            // A hard error from the poll call itself is unrecoverable for this iteration; back
            // off rather than spin hot.
            thread::sleep(Duration::from_millis(10));
        }

        for (slot, events) in woken_slots {
            if slot == WAKE_TOKEN {
                drain_wake_queue(&wake_queue, &push_queue, &mut slots, &mut free, &mut ready);
            } else {
                if let Some(entry) = slots.get_mut(slot as usize).and_then(|s| s.as_mut()) {
                    entry.pending_events |= events;
                }
                enqueue_ready(&mut ready, slot, &slots);
            }
        }

        // Full deadline scan only when the clock has actually advanced past the global next
        // deadline, never every iteration.
        if let Some(deadline) = next_deadline_global {
            if now >= deadline {
                for idx in 0..slots.len() as u32 {
                    let past_due = matches!(&slots[idx as usize], Some(h) if now >= h.deadline);
                    if past_due {
                        enqueue_ready(&mut ready, idx, &slots);
                    }
                }
            }
        }

        // Drain the ready queue in one bounded FIFO pass; enqueues made during the pass do not
        // get re-examined until the next loop iteration.
        let this_pass = ready.len();
        for _ in 0..this_pass {
            let slot = match ready.pop_front() {
                Some(s) => s,
                None => break,
            };

            let object = match slots.get(slot as usize).and_then(|s| s.as_ref()) {
                Some(entry) => entry.object.clone(),
                None => continue,
            };

            let mut deadline = slots[slot as usize].as_ref().unwrap().deadline;
            let events = slots[slot as usize].as_ref().unwrap().pending_events;
            let result = object.execute(events, &mut deadline);
            if let Some(entry) = slots.get_mut(slot as usize).and_then(|s| s.as_mut()) {
                entry.deadline = deadline;
                entry.pending_events = 0;
            }

            match result {
                ExecResult::Ok => ready.push_back(slot),
                ExecResult::Nok => {}
                ExecResult::Bad | ExecResult::Leave => {
                    driver.deregister(slot);
                    slots[slot as usize] = None;
                    free.push(slot);
                    hosted.fetch_sub(1, Ordering::SeqCst);
                }
                ExecResult::Register | ExecResult::Unregister => {
                    let _ = driver.reregister(slot, object.as_ref());
                }
            }
        }

        next_deadline_global = slots.iter().filter_map(|s| s.as_ref().map(|h| h.deadline)).min();
    }
}

fn enqueue_ready(ready: &mut VecDeque<u32>, slot: u32, slots: &[Option<Hosted>]) {
    if matches!(slots.get(slot as usize), Some(Some(_))) && !ready.contains(&slot) {
        ready.push_back(slot);
    }
}

fn drain_wake_queue(
    wake_queue: &Mutex<VecDeque<WakeMsg>>,
    push_queue: &Mutex<VecDeque<(Arc<dyn Object>, HostedCallback)>>,
    slots: &mut Vec<Option<Hosted>>,
    free: &mut Vec<u32>,
    ready: &mut VecDeque<u32>,
) {
    let mut pending = push_queue.lock();
    while let Some((object, on_hosted)) = pending.pop_front() {
        let local_slot = if let Some(idx) = free.pop() {
            slots[idx as usize] = Some(Hosted { object, deadline: Instant::now(), pending_events: 0 });
            idx
        } else {
            let idx = slots.len() as u32;
            slots.push(Some(Hosted { object, deadline: Instant::now(), pending_events: 0 }));
            idx
        };

        ready.push_back(local_slot);
        on_hosted(local_slot);
    }
    drop(pending);

    let mut queue = wake_queue.lock();
    while let Some(msg) = queue.pop_front() {
        match msg {
            WakeMsg::Raise(slot) => enqueue_ready(ready, slot, slots),
            WakeMsg::Scan => {
                for idx in 0..slots.len() as u32 {
                    enqueue_ready(ready, idx, slots);
                }
            }
        }
    }
}
