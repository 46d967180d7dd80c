//! The command executer: a generic `Object` that hosts request-id-keyed in-flight message
//! state, with its own timeout bookkeeping independent of the selector's per-object deadline.

use crate::identity::SlotTable;
use crate::object::{EventMask, ExecResult, Message, Object, ObjectCore};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Names one in-flight command: the slot it lives in within the executer, plus the generation
/// that slot was at when the command was registered.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct RequestUid {
    pub slot: u32,
    pub gen: u32,
}

/// Request-scoped logic hosted by the command executer - distinct from `Message`, which is the
/// signal-delivery contract: a `CommandMessage` is already inside the executer and is driven by
/// its own tick rather than the generic scheduler event mask.
pub trait CommandMessage: Send + Sync {
    /// Called once per executer tick while this command is in the active queue.
    fn execute(&self, uid: RequestUid, now: Instant) -> ExecResult;

    /// How long this command may sit unattended before the executer gives up on it. `None`
    /// means no timeout (the command relies entirely on being re-signaled).
    fn timeout(&self) -> Option<Duration> {
        None
    }
}

struct InFlight {
    msg: Arc<dyn CommandMessage>,
    deadline: Option<Instant>,
}

/// Enqueues `msg` for registration the next time the executer ticks. Delivered as an ordinary
/// `Message` via `Service::signal`, then dispatched here by downcasting the target.
pub struct RegisterCommand {
    pub msg: Arc<dyn CommandMessage>,
}

impl Message for RegisterCommand {
    fn execute_on(&self, target: &dyn Object) {
        if let Some(executer) = target.as_any().downcast_ref::<CommandExecuter>() {
            executer.register(self.msg.clone());
        }
    }
}

pub struct CommandExecuter {
    core: ObjectCore,
    slots: Mutex<SlotTable<InFlight>>,
    queue: Mutex<VecDeque<RequestUid>>,
}

impl CommandExecuter {
    pub fn new(core: ObjectCore) -> CommandExecuter {
        CommandExecuter {
            core,
            slots: Mutex::new(SlotTable::new()),
            queue: Mutex::new(VecDeque::new()),
        }
    }

    /// Registers a freshly arrived command and pushes it onto the active queue for the next
    /// tick. Exposed so `RegisterCommand::execute_on` can reach it after a downcast.
    pub fn register(&self, msg: Arc<dyn CommandMessage>) -> RequestUid {
        let deadline = msg.timeout().map(|d| Instant::now() + d);
        let mut slots = self.slots.lock();
        let (slot, gen) = slots.insert(InFlight { msg, deadline });
        let uid = RequestUid { slot, gen };
        self.queue.lock().push_back(uid);
        uid
    }

    pub fn cancel(&self, uid: RequestUid) -> bool {
        self.slots.lock().remove(uid.slot, uid.gen).is_some()
    }
}

impl Object for CommandExecuter {
    fn handle(&self) -> crate::identity::Handle {
        self.core.handle()
    }

    fn core(&self) -> &ObjectCore {
        &self.core
    }

    /// Drains newly signaled commands (queued by `register`) and runs each queued command's
    /// own `execute`, classifying the result the same way a selector classifies an object's:
    /// `Bad`/`Leave` drop the slot, anything else keeps it for the next tick. Expired commands
    /// (per-message timeout, scanned when the global next deadline passes) are dropped the same
    /// way a `Bad` result would drop them.
    fn execute(&self, _events: EventMask, deadline: &mut Instant) -> ExecResult {
        let mut queue = self.queue.lock();
        let now = Instant::now();
        let pending: Vec<RequestUid> = queue.drain(..).collect();
        drop(queue);

        let mut next_deadline: Option<Instant> = None;
        let mut still_queued = VecDeque::new();

        for uid in pending {
            let msg = {
                let slots = self.slots.lock();
                match slots.get(uid.slot, uid.gen).found() {
                    Some(entry) => entry.msg.clone(),
                    None => continue,
                }
            };

            let timed_out = {
                let slots = self.slots.lock();
                matches!(slots.get(uid.slot, uid.gen).found(), Some(entry) if matches!(entry.deadline, Some(d) if now >= d))
            };

            let result = if timed_out { ExecResult::Bad } else { msg.execute(uid, now) };

            match result {
                ExecResult::Bad | ExecResult::Leave => {
                    self.slots.lock().remove(uid.slot, uid.gen);
                }
                _ => {
                    if let Some(d) = self.slots.lock().get(uid.slot, uid.gen).found().and_then(|e| e.deadline) {
                        next_deadline = Some(next_deadline.map_or(d, |nd| nd.min(d)));
                    }
                    still_queued.push_back(uid);
                }
            }
        }

        self.queue.lock().extend(still_queued);

        if let Some(d) = next_deadline {
            *deadline = d;
        }

        if self.queue.lock().is_empty() {
            ExecResult::Nok
        } else {
            ExecResult::Ok
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{FullId, Handle};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn handle() -> Handle {
        Handle::new(FullId::encode(0, 0), 0)
    }

    struct CountUntilDone {
        remaining: AtomicUsize,
    }

    impl CommandMessage for CountUntilDone {
        fn execute(&self, _uid: RequestUid, _now: Instant) -> ExecResult {
            if self.remaining.fetch_sub(1, Ordering::SeqCst) == 1 {
                ExecResult::Bad
            } else {
                ExecResult::Ok
            }
        }
    }

    #[test]
    fn test_registered_command_runs_until_it_reports_bad() {
        let executer = CommandExecuter::new(ObjectCore::new(handle()));
        let uid = executer.register(Arc::new(CountUntilDone { remaining: AtomicUsize::new(3) }));

        let mut deadline = Instant::now();
        for _ in 0..3 {
            executer.execute(0, &mut deadline);
        }

        assert!(executer.slots.lock().get(uid.slot, uid.gen).found().is_none());
    }

    #[test]
    fn test_timed_out_command_is_dropped_without_running() {
        let executer = CommandExecuter::new(ObjectCore::new(handle()));

        struct NeverRuns;
        impl CommandMessage for NeverRuns {
            fn execute(&self, _uid: RequestUid, _now: Instant) -> ExecResult {
                panic!("must not run once timed out");
            }
            fn timeout(&self) -> Option<Duration> {
                Some(Duration::from_secs(0))
            }
        }

        let uid = executer.register(Arc::new(NeverRuns));
        std::thread::sleep(Duration::from_millis(5));

        let mut deadline = Instant::now();
        executer.execute(0, &mut deadline);

        assert!(executer.slots.lock().get(uid.slot, uid.gen).found().is_none());
    }
}
