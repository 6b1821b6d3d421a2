use std::sync::{Arc, Mutex, Weak};

use rustc_hash::FxHashMap;

/// Failure to acquire a named lock.
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    /// The backend does not support upgrading a shared hold to an exclusive
    /// one from the same thread; release and re-acquire instead.
    #[error("lock {name} is held shared by the current thread and cannot be upgraded")]
    UnsupportedUpgrade { name: String },

    /// The file-lock backend failed at the OS level.
    #[error("failed to lock {name}: {source}")]
    Io {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

/// A reentrancy-aware lock identified by a string. Locks are handed out by a
/// [`NamedLockFactory`]; two calls with the same name observe the same
/// underlying lock state.
pub trait NamedLock: Send + Sync {
    fn name(&self) -> &str;

    /// Blocks until a shared hold is granted.
    fn lock_shared(&self) -> Result<(), LockError>;

    /// Blocks until an exclusive hold is granted.
    fn lock_exclusive(&self) -> Result<(), LockError>;

    /// Releases the most recent hold of the current thread.
    fn unlock(&self);
}

/// Hands out named locks. Backends differ in scope: in-process only, or
/// OS-level for caches shared between processes.
pub trait NamedLockFactory: Send + Sync {
    fn get_lock(&self, name: &str) -> Arc<dyn NamedLock>;
}

/// Name-keyed weak registry so that all holders of a name share one lock
/// instance while unused instances can be dropped.
pub(crate) struct LockRegistry<T: ?Sized> {
    locks: Mutex<FxHashMap<String, Weak<T>>>,
}

impl<T: ?Sized> Default for LockRegistry<T> {
    fn default() -> Self {
        Self {
            locks: Mutex::new(FxHashMap::default()),
        }
    }
}

impl<T: ?Sized> LockRegistry<T> {
    pub(crate) fn get_or_create(
        &self,
        name: &str,
        create: impl FnOnce(String) -> Arc<T>,
    ) -> Arc<T> {
        let mut locks = self.locks.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(existing) = locks.get(name).and_then(Weak::upgrade) {
            return existing;
        }
        locks.retain(|_, weak| weak.strong_count() > 0);
        let lock = create(name.to_string());
        locks.insert(name.to_string(), Arc::downgrade(&lock));
        lock
    }
}

/// Grants every request immediately. Only suitable for tests and
/// single-threaded offline use.
#[derive(Default)]
pub struct NoopNamedLockFactory;

struct NoopLock {
    name: String,
}

impl NamedLock for NoopLock {
    fn name(&self) -> &str {
        &self.name
    }

    fn lock_shared(&self) -> Result<(), LockError> {
        Ok(())
    }

    fn lock_exclusive(&self) -> Result<(), LockError> {
        Ok(())
    }

    fn unlock(&self) {}
}

impl NamedLockFactory for NoopNamedLockFactory {
    fn get_lock(&self, name: &str) -> Arc<dyn NamedLock> {
        Arc::new(NoopLock {
            name: name.to_string(),
        })
    }
}
