use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, ThreadId};

use rustc_hash::FxHashMap;

use crate::named::{LockError, LockRegistry, NamedLock, NamedLockFactory};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Shared,
    Exclusive,
}

#[derive(Default)]
struct State {
    exclusive_owner: Option<ThreadId>,
    exclusive_count: usize,
    shared: FxHashMap<ThreadId, usize>,
    /// Per-thread acquisition order, so `unlock` releases the most recent
    /// hold of the calling thread.
    stacks: FxHashMap<ThreadId, Vec<Mode>>,
}

/// A per-name reentrant read/write lock.
///
/// Supports shared→shared and exclusive→shared/exclusive reentrancy; a
/// shared→exclusive upgrade from the same thread is refused (the holder must
/// release and re-acquire).
pub struct LocalReadWriteLock {
    name: String,
    state: Mutex<State>,
    available: Condvar,
}

impl LocalReadWriteLock {
    pub(crate) fn new(name: String) -> Self {
        Self {
            name,
            state: Mutex::new(State::default()),
            available: Condvar::new(),
        }
    }

    fn lock(&self, mode: Mode) -> Result<(), LockError> {
        let me = thread::current().id();
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        loop {
            let granted = match mode {
                Mode::Shared => {
                    // Reentrant under our own exclusive hold, otherwise only
                    // while nobody holds exclusively.
                    state.exclusive_count == 0 || state.exclusive_owner == Some(me)
                }
                Mode::Exclusive => {
                    if state.exclusive_owner == Some(me) {
                        true
                    } else if state.shared.contains_key(&me) {
                        return Err(LockError::UnsupportedUpgrade {
                            name: self.name.clone(),
                        });
                    } else {
                        state.exclusive_count == 0 && state.shared.is_empty()
                    }
                }
            };
            if granted {
                match mode {
                    Mode::Shared => *state.shared.entry(me).or_insert(0) += 1,
                    Mode::Exclusive => {
                        state.exclusive_owner = Some(me);
                        state.exclusive_count += 1;
                    }
                }
                state.stacks.entry(me).or_default().push(mode);
                return Ok(());
            }
            state = self
                .available
                .wait(state)
                .unwrap_or_else(std::sync::PoisonError::into_inner);
        }
    }
}

impl NamedLock for LocalReadWriteLock {
    fn name(&self) -> &str {
        &self.name
    }

    fn lock_shared(&self) -> Result<(), LockError> {
        self.lock(Mode::Shared)
    }

    fn lock_exclusive(&self) -> Result<(), LockError> {
        self.lock(Mode::Exclusive)
    }

    fn unlock(&self) {
        let me = thread::current().id();
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let Some(mode) = state.stacks.get_mut(&me).and_then(Vec::pop) else {
            tracing::warn!("unlock of {} without a hold by this thread", self.name);
            return;
        };
        match mode {
            Mode::Shared => {
                if let Some(count) = state.shared.get_mut(&me) {
                    *count -= 1;
                    if *count == 0 {
                        state.shared.remove(&me);
                    }
                }
            }
            Mode::Exclusive => {
                state.exclusive_count -= 1;
                if state.exclusive_count == 0 {
                    state.exclusive_owner = None;
                }
            }
        }
        if state.stacks.get(&me).is_some_and(Vec::is_empty) {
            state.stacks.remove(&me);
        }
        drop(state);
        self.available.notify_all();
    }
}

/// In-process read/write named locks; the default backend.
#[derive(Default)]
pub struct LocalReadWriteLockFactory {
    registry: LockRegistry<LocalReadWriteLock>,
}

impl NamedLockFactory for LocalReadWriteLockFactory {
    fn get_lock(&self, name: &str) -> Arc<dyn NamedLock> {
        self.registry.get_or_create(name, |name| Arc::new(LocalReadWriteLock::new(name)))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    #[test]
    fn shared_holds_coexist() {
        let factory = LocalReadWriteLockFactory::default();
        let lock = factory.get_lock("coords");
        lock.lock_shared().unwrap();

        let lock2 = factory.get_lock("coords");
        std::thread::scope(|scope| {
            scope
                .spawn(|| lock2.lock_shared().unwrap())
                .join()
                .unwrap();
        });

        lock.unlock();
        lock.unlock();
    }

    #[test]
    fn exclusive_excludes_other_threads() {
        let factory = Arc::new(LocalReadWriteLockFactory::default());
        let lock = factory.get_lock("coords");
        lock.lock_exclusive().unwrap();

        let entered = Arc::new(AtomicUsize::new(0));
        let waiter = {
            let factory = Arc::clone(&factory);
            let entered = Arc::clone(&entered);
            std::thread::spawn(move || {
                let lock = factory.get_lock("coords");
                lock.lock_exclusive().unwrap();
                entered.fetch_add(1, Ordering::SeqCst);
                lock.unlock();
            })
        };

        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(entered.load(Ordering::SeqCst), 0);

        lock.unlock();
        waiter.join().unwrap();
        assert_eq!(entered.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn exclusive_reenters_shared_and_exclusive() {
        let factory = LocalReadWriteLockFactory::default();
        let lock = factory.get_lock("coords");
        lock.lock_exclusive().unwrap();
        lock.lock_exclusive().unwrap();
        lock.lock_shared().unwrap();
        lock.unlock();
        lock.unlock();
        lock.unlock();
    }

    #[test]
    fn shared_to_exclusive_is_refused() {
        let factory = LocalReadWriteLockFactory::default();
        let lock = factory.get_lock("coords");
        lock.lock_shared().unwrap();
        assert!(matches!(
            lock.lock_exclusive(),
            Err(LockError::UnsupportedUpgrade { .. })
        ));
        lock.unlock();
        // After releasing, the exclusive acquisition succeeds.
        lock.lock_exclusive().unwrap();
        lock.unlock();
    }
}
