use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, ThreadId};

use rustc_hash::FxHashMap;

use crate::named::{LockError, LockRegistry, NamedLock, NamedLockFactory};

/// Default permit count per name; effectively "unbounded readers".
pub const DEFAULT_MAX_PERMITS: usize = 256;

struct State {
    available: usize,
    /// Permits taken per thread, most recent last, so `unlock` returns the
    /// right amount.
    taken: FxHashMap<ThreadId, Vec<usize>>,
}

/// A per-name counting semaphore: shared holds consume one permit, exclusive
/// holds consume all of them.
///
/// Plain counting, no reentrancy bookkeeping: a thread that already holds
/// permits and asks for more than remain will block like anybody else. Used
/// when those simpler semantics suffice.
pub struct LocalSemaphoreLock {
    name: String,
    max_permits: usize,
    state: Mutex<State>,
    available: Condvar,
}

impl LocalSemaphoreLock {
    fn new(name: String, max_permits: usize) -> Self {
        Self {
            name,
            max_permits,
            state: Mutex::new(State {
                available: max_permits,
                taken: FxHashMap::default(),
            }),
            available: Condvar::new(),
        }
    }

    fn take(&self, permits: usize) {
        let me = thread::current().id();
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        while state.available < permits {
            state = self
                .available
                .wait(state)
                .unwrap_or_else(std::sync::PoisonError::into_inner);
        }
        state.available -= permits;
        state.taken.entry(me).or_default().push(permits);
    }
}

impl NamedLock for LocalSemaphoreLock {
    fn name(&self) -> &str {
        &self.name
    }

    fn lock_shared(&self) -> Result<(), LockError> {
        self.take(1);
        Ok(())
    }

    fn lock_exclusive(&self) -> Result<(), LockError> {
        self.take(self.max_permits);
        Ok(())
    }

    fn unlock(&self) {
        let me = thread::current().id();
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let Some(permits) = state.taken.get_mut(&me).and_then(Vec::pop) else {
            tracing::warn!("unlock of {} without a hold by this thread", self.name);
            return;
        };
        state.available += permits;
        if state.taken.get(&me).is_some_and(Vec::is_empty) {
            state.taken.remove(&me);
        }
        drop(state);
        self.available.notify_all();
    }
}

/// In-process semaphore named locks.
pub struct LocalSemaphoreLockFactory {
    max_permits: usize,
    registry: LockRegistry<LocalSemaphoreLock>,
}

impl LocalSemaphoreLockFactory {
    pub fn new(max_permits: usize) -> Self {
        Self {
            max_permits,
            registry: LockRegistry::default(),
        }
    }
}

impl Default for LocalSemaphoreLockFactory {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PERMITS)
    }
}

impl NamedLockFactory for LocalSemaphoreLockFactory {
    fn get_lock(&self, name: &str) -> Arc<dyn NamedLock> {
        let max_permits = self.max_permits;
        self.registry
            .get_or_create(name, |name| Arc::new(LocalSemaphoreLock::new(name, max_permits)))
    }
}
