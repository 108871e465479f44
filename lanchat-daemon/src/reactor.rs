//! Registry of readiness-driven socket tasks.
//!
//! Each registered descriptor is owned by one spawned task that blocks on
//! its readiness future (`recv_from`, framed reads, `accept`). Deregistering
//! aborts the task, which drops and closes the socket it owns -- the same
//! teardown path the sockets get when the whole registry is dropped. Two
//! independent instances run per process: one for the UDP discovery pair,
//! one for the TCP connection set.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::task::JoinHandle;

#[derive(Default)]
pub struct Reactor {
    tasks: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl Reactor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take ownership of a socket-driving task. Registering over an
    /// existing key aborts the old task first.
    pub fn register(&self, key: impl Into<String>, task: JoinHandle<()>) {
        if let Some(old) = self.lock_tasks().insert(key.into(), task) {
            old.abort();
        }
    }

    /// Abort and forget the task owning `key`. Idempotent: an unknown key
    /// is a no-op returning false.
    pub fn deregister(&self, key: &str) -> bool {
        match self.lock_tasks().remove(key) {
            Some(task) => {
                task.abort();
                true
            }
            None => false,
        }
    }

    /// Remove the task owning `key` without aborting it, handing the
    /// handle back to the caller.
    pub fn take(&self, key: &str) -> Option<JoinHandle<()>> {
        self.lock_tasks().remove(key)
    }

    /// Abort every registered task.
    pub fn shutdown(&self) {
        for (_, task) in self.lock_tasks().drain() {
            task.abort();
        }
    }

    fn lock_tasks(&self) -> std::sync::MutexGuard<'_, HashMap<String, JoinHandle<()>>> {
        // The map holds only abortable handles; a panic mid-update cannot
        // leave it inconsistent, so a poisoned lock is still usable.
        self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for Reactor {
    fn drop(&mut self) {
        self.shutdown();
    }
}
