//! The file manager handoff contract: the one external collaborator the core depends on for
//! async resource acquisition, without shipping a concrete filesystem-backed implementation.
//! A deployment satisfies this with whatever it likes - a pool of descriptors plus an LRU
//! cache, a purely in-memory blob store for tests, and so on.

use crate::commandexec::RequestUid;
use crate::serialize::Streammer;
use std::io;

bitflags::bitflags! {
    /// Request modifiers for `FileManager::stream`.
    pub struct StreamFlags: u32 {
        /// Create the file if it doesn't already exist.
        const CREATE = 1 << 0;
        /// Allow concurrent readers even while a writer holds the file.
        const FORCED = 1 << 1;
        /// Fail immediately with `StreamOutcome::Fail` instead of returning `WouldBlock`.
        const NO_WAIT = 1 << 2;
    }
}

/// Why a `stream` call failed outright (as opposed to needing a retry).
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum FileError {
    NotFound,
    PermissionDenied,
    WouldBlockRefused,
    Busy,
    Other,
}

/// Outcome of a `stream` call.
#[derive(Debug)]
pub enum StreamOutcome {
    /// The stream is ready now; the manager returned a live `Streammer` plus the file's uid.
    Ready(Box<dyn Streammer>, u64),
    /// Not ready yet - the manager will deliver `(stream_handle, file_uid)` later via a normal
    /// signal to `request_uid`'s object.
    WouldBlock,
    Fail(FileError),
}

/// Identifies which file a `stream` call is about: either a path-like key (first acquisition)
/// or a previously issued file uid (reopening a file this manager already resolved once).
#[derive(Clone, Debug)]
pub enum FileKey {
    Name(String),
    Uid(u64),
}

/// The async resource-acquisition collaborator the core depends on. Only the trait and its
/// flag/error vocabulary live here; no concrete implementation ships with the core.
pub trait FileManager: Send + Sync {
    /// Request a stream for `key`. `request_uid` names the command-executer slot to notify if
    /// this call can't complete synchronously. Implementations must never block the calling
    /// thread - return `WouldBlock` and deliver the result asynchronously instead.
    fn stream(&self, key: FileKey, request_uid: RequestUid, flags: StreamFlags) -> io::Result<StreamOutcome>;
}
