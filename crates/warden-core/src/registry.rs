use std::collections::HashMap;
use std::sync::Mutex;

use crate::process::{ProcessHandle, ProcessId};

/// One registry entry: wire metadata plus the exclusively owned handle to
/// the OS process. No other component may signal this process directly.
pub struct TrackedProcess<I> {
    pub info: I,
    pub handle: Box<dyn ProcessHandle>,
}

/// Concurrent map from pid to tracked process.
///
/// Constructed once per process kind and passed by reference to whoever
/// needs it; all mutation happens under the internal lock. Entries only
/// become visible after a successful spawn, so a snapshot never observes a
/// half-inserted entry. The handle leaves the registry only through `take`,
/// which transfers ownership to the caller so termination can run outside
/// the lock.
pub struct ProcessRegistry<I> {
    entries: Mutex<HashMap<ProcessId, TrackedProcess<I>>>,
}

impl<I> Default for ProcessRegistry<I> {
    fn default() -> Self {
        Self::new()
    }
}

impl<I> ProcessRegistry<I> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn insert(&self, pid: ProcessId, info: I, handle: Box<dyn ProcessHandle>) {
        let mut entries = self.entries.lock().unwrap();
        entries.insert(pid, TrackedProcess { info, handle });
    }

    /// Remove and return the entry for `pid`, transferring handle ownership
    /// to the caller.
    pub fn take(&self, pid: ProcessId) -> Option<TrackedProcess<I>> {
        let mut entries = self.entries.lock().unwrap();
        entries.remove(&pid)
    }

    /// First pid whose metadata matches the predicate.
    pub fn find_pid<F>(&self, pred: F) -> Option<ProcessId>
    where
        F: Fn(&I) -> bool,
    {
        let entries = self.entries.lock().unwrap();
        entries
            .iter()
            .find(|(_, tracked)| pred(&tracked.info))
            .map(|(pid, _)| *pid)
    }

    pub fn pids(&self) -> Vec<ProcessId> {
        let entries = self.entries.lock().unwrap();
        entries.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<I: Clone> ProcessRegistry<I> {
    /// Point-in-time copy of the metadata map. Processes may exit the moment
    /// the lock is released; callers must not assume the snapshot stays valid.
    pub fn snapshot(&self) -> HashMap<ProcessId, I> {
        let entries = self.entries.lock().unwrap();
        entries
            .iter()
            .map(|(pid, tracked)| (*pid, tracked.info.clone()))
            .collect()
    }
}
