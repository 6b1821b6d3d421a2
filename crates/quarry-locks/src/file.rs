use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use fs2::FileExt;

use crate::named::{LockError, LockRegistry, NamedLock, NamedLockFactory};
use crate::rwlock::LocalReadWriteLock;

/// Directory under the local repository holding the lock files.
pub const LOCK_DIR: &str = ".locks";

struct OsState {
    file: Option<fs_err::File>,
    holders: usize,
}

/// An OS advisory file lock on `<basedir>/.locks/<name>`, shared between
/// processes operating on the same local cache.
///
/// OS locks are process-scoped, so an in-process read/write gate fronts the
/// file lock: only the first in-process holder touches the OS lock, and the
/// gate guarantees all concurrent in-process holders use a compatible mode.
pub struct FileNamedLock {
    gate: LocalReadWriteLock,
    path: PathBuf,
    os: Mutex<OsState>,
}

impl FileNamedLock {
    fn new(name: String, path: PathBuf) -> Self {
        Self {
            gate: LocalReadWriteLock::new(name),
            path,
            os: Mutex::new(OsState {
                file: None,
                holders: 0,
            }),
        }
    }

    fn lock_os(&self, exclusive: bool) -> Result<(), LockError> {
        let mut os = self
            .os
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if os.holders == 0 {
            let file = self.open_lock_file().map_err(|source| LockError::Io {
                name: self.gate.name().to_string(),
                source,
            })?;
            let result = if exclusive {
                file.file().lock_exclusive()
            } else {
                file.file().lock_shared()
            };
            result.map_err(|source| LockError::Io {
                name: self.gate.name().to_string(),
                source,
            })?;
            os.file = Some(file);
        }
        os.holders += 1;
        Ok(())
    }

    fn unlock_os(&self) {
        let mut os = self
            .os
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        os.holders -= 1;
        if os.holders == 0 {
            if let Some(file) = os.file.take() {
                if let Err(err) = file.file().unlock() {
                    tracing::warn!("failed to release file lock {}: {err}", self.path.display());
                }
            }
        }
    }

    fn open_lock_file(&self) -> std::io::Result<fs_err::File> {
        if let Some(parent) = self.path.parent() {
            fs_err::create_dir_all(parent)?;
        }
        fs_err::OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&self.path)
    }
}

impl NamedLock for FileNamedLock {
    fn name(&self) -> &str {
        self.gate.name()
    }

    fn lock_shared(&self) -> Result<(), LockError> {
        self.gate.lock_shared()?;
        if let Err(err) = self.lock_os(false) {
            self.gate.unlock();
            return Err(err);
        }
        Ok(())
    }

    fn lock_exclusive(&self) -> Result<(), LockError> {
        self.gate.lock_exclusive()?;
        if let Err(err) = self.lock_os(true) {
            self.gate.unlock();
            return Err(err);
        }
        Ok(())
    }

    fn unlock(&self) {
        self.unlock_os();
        self.gate.unlock();
    }
}

/// File-lock backend rooted below a local repository. The same lock names
/// are produced by every process sharing the cache directory.
pub struct FileLockNamedLockFactory {
    basedir: PathBuf,
    registry: LockRegistry<FileNamedLock>,
}

impl FileLockNamedLockFactory {
    pub fn new(local_repository_basedir: impl Into<PathBuf>) -> Self {
        Self {
            basedir: local_repository_basedir.into().join(LOCK_DIR),
            registry: LockRegistry::default(),
        }
    }
}

impl NamedLockFactory for FileLockNamedLockFactory {
    fn get_lock(&self, name: &str) -> Arc<dyn NamedLock> {
        let path = self.basedir.join(name);
        self.registry
            .get_or_create(name, |name| Arc::new(FileNamedLock::new(name, path)))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use anyhow::Result;

    use super::*;

    #[test]
    fn creates_lock_file_under_locks_dir() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let factory = FileLockNamedLockFactory::new(dir.path());
        let lock = factory.get_lock("coords");
        lock.lock_shared()?;
        assert!(dir.path().join(LOCK_DIR).join("coords").is_file());
        lock.unlock();
        Ok(())
    }

    #[test]
    fn exclusive_excludes_within_process() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let factory = Arc::new(FileLockNamedLockFactory::new(dir.path()));
        let lock = factory.get_lock("coords");
        lock.lock_exclusive()?;

        let entered = Arc::new(AtomicUsize::new(0));
        let waiter = {
            let factory = Arc::clone(&factory);
            let entered = Arc::clone(&entered);
            std::thread::spawn(move || {
                let lock = factory.get_lock("coords");
                lock.lock_shared().unwrap();
                entered.fetch_add(1, Ordering::SeqCst);
                lock.unlock();
            })
        };

        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(entered.load(Ordering::SeqCst), 0);

        lock.unlock();
        waiter.join().unwrap();
        assert_eq!(entered.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[test]
    fn nested_names_create_directories() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let factory = FileLockNamedLockFactory::new(dir.path());
        let lock = factory.get_lock("ab/cd/abcdef");
        lock.lock_exclusive()?;
        assert!(dir.path().join(LOCK_DIR).join("ab/cd/abcdef").is_file());
        lock.unlock();
        Ok(())
    }
}
