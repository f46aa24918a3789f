//! Per-scope mutual exclusion for the in-memory backend.
//!
//! [`KeyLocks`] hands out one mutex slot per scope from a `DashMap`. Two
//! sections on the same scope run one after the other; sections on
//! different scopes never contend. Slots are dropped as soon as the last
//! holder finishes, so the table only ever contains scopes that are in use.

use std::sync::{Arc, Mutex, PoisonError};

use dashmap::DashMap;

/// Table of per-scope locks.
#[derive(Debug, Default)]
pub(crate) struct KeyLocks {
    slots: DashMap<String, Arc<Mutex<()>>>,
}

impl KeyLocks {
    /// Runs `f` while holding the lock for `scope`.
    pub(crate) fn with_key<T>(&self, scope: &str, f: impl FnOnce() -> T) -> T {
        // Clone the slot out so the shard lock is released before blocking.
        let slot = Arc::clone(
            self.slots
                .entry(scope.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        );

        let out = {
            let _held = slot.lock().unwrap_or_else(PoisonError::into_inner);
            f()
        };

        // Map + this handle: nobody else is waiting on the slot.
        self.slots
            .remove_if(scope, |_, s| Arc::strong_count(s) == 2);
        out
    }

    #[cfg(test)]
    fn active(&self) -> usize {
        self.slots.len()
    }
}
