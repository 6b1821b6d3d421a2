use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::trace;

use quarry_types::{Artifact, LocalRepositoryManager, Metadata, Session};

use crate::file::FileLockNamedLockFactory;
use crate::name_mapper::{
    DiscriminatingNameMapper, FileGavNameMapper, GavNameMapper, HashingNameMapper, NameMapper,
    NoopNameMapper, StaticNameMapper,
};
use crate::named::{LockError, NamedLock, NamedLockFactory, NoopNamedLockFactory};
use crate::rwlock::LocalReadWriteLockFactory;
use crate::semaphore::LocalSemaphoreLockFactory;

/// Selects the named-lock backend: `rwlock-local`, `semaphore-local`,
/// `file-lock` or `noop`.
pub const CONFIG_LOCK_FACTORY: &str = "quarry.syncContext.named.factory";
/// Selects the name mapper: `gav`, `file-gav`, `discriminating`, `hashing`,
/// `static` or `noop`.
pub const CONFIG_NAME_MAPPER: &str = "quarry.syncContext.named.nameMapper";
/// Directory-tree depth (0–4) of the `hashing` mapper.
pub const CONFIG_HASHING_DEPTH: &str = "quarry.syncContext.named.hashing.depth";
/// Permit count of the `semaphore-local` backend.
pub const CONFIG_SEMAPHORE_PERMITS: &str = "quarry.syncContext.named.semaphore.maxPermits";

const DEFAULT_LOCK_FACTORY: &str = "rwlock-local";
const DEFAULT_NAME_MAPPER: &str = "gav";
const SESSION_ADAPTER_KEY: &str = "quarry.locks.adapter";

/// A scoped acquisition shielding a coordinate set across threads and
/// processes.
///
/// Lock names are acquired in canonical (sorted) order, precluding deadlock
/// cycles when two contexts overlap. Dropping the context releases exactly
/// the locks it acquired, in reverse order, on every exit path.
pub struct SyncContext<'a> {
    session: &'a Session,
    shared: bool,
    adapter: Arc<LockAdapter>,
    acquired_names: BTreeSet<String>,
    acquired: Vec<Arc<dyn NamedLock>>,
}

impl<'a> SyncContext<'a> {
    /// Whether this context holds shared (true) or exclusive (false) locks.
    pub fn is_shared(&self) -> bool {
        self.shared
    }

    /// Acquires locks for all given artifacts and metadata. Incremental:
    /// names already held by this context are skipped.
    pub fn acquire(
        &mut self,
        artifacts: &[Artifact],
        metadata: &[Metadata],
    ) -> Result<(), LockError> {
        let names = self.adapter.mapper.name_locks(self.session, artifacts, metadata);
        for name in names {
            if self.acquired_names.contains(&name) {
                continue;
            }
            let lock = self.adapter.factory.get_lock(&name);
            trace!(
                "acquiring {} lock {name}",
                if self.shared { "shared" } else { "exclusive" }
            );
            if self.shared {
                lock.lock_shared()?;
            } else {
                lock.lock_exclusive()?;
            }
            self.acquired.push(lock);
            self.acquired_names.insert(name);
        }
        Ok(())
    }
}

impl Drop for SyncContext<'_> {
    fn drop(&mut self) {
        for lock in self.acquired.drain(..).rev() {
            trace!("releasing lock {}", lock.name());
            lock.unlock();
        }
    }
}

struct LockAdapter {
    factory: Arc<dyn NamedLockFactory>,
    mapper: Box<dyn NameMapper>,
}

/// Creates [`SyncContext`]s, choosing backend and mapper from the session
/// configuration.
///
/// The backend instances live at factory (i.e. system) scope and are shared
/// between sessions: two sessions of one process resolving into the same
/// cache must contend on the same in-process locks. The selected
/// (backend, mapper) pair is additionally cached per session.
#[derive(Default)]
pub struct SyncContextFactory {
    backends: std::sync::Mutex<rustc_hash::FxHashMap<String, Arc<dyn NamedLockFactory>>>,
}

impl SyncContextFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_context<'a>(&self, session: &'a Session, shared: bool) -> SyncContext<'a> {
        let adapter = session
            .data()
            .compute_if_absent(SESSION_ADAPTER_KEY, || self.create_adapter(session));
        SyncContext {
            session,
            shared,
            adapter,
            acquired_names: BTreeSet::new(),
            acquired: Vec::new(),
        }
    }

    fn backend(&self, key: String, create: impl FnOnce() -> Arc<dyn NamedLockFactory>) -> Arc<dyn NamedLockFactory> {
        let mut backends = self
            .backends
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        backends.entry(key).or_insert_with(create).clone()
    }

    fn create_adapter(&self, session: &Session) -> LockAdapter {
        let factory_name = session
            .config()
            .get_str(CONFIG_LOCK_FACTORY, DEFAULT_LOCK_FACTORY)
            .to_string();
        let mapper_name = session
            .config()
            .get_str(CONFIG_NAME_MAPPER, DEFAULT_NAME_MAPPER)
            .to_string();

        let factory = match factory_name.as_str() {
            "semaphore-local" => {
                let permits = session
                    .config()
                    .get_usize(CONFIG_SEMAPHORE_PERMITS, crate::semaphore::DEFAULT_MAX_PERMITS);
                self.backend(format!("semaphore-local:{permits}"), || {
                    Arc::new(LocalSemaphoreLockFactory::new(permits))
                })
            }
            "file-lock" => {
                let basedir = session.local_repository_manager().repository().basedir();
                self.backend(format!("file-lock:{}", basedir.display()), || {
                    Arc::new(FileLockNamedLockFactory::new(basedir))
                })
            }
            "noop" => self.backend("noop".to_string(), || Arc::new(NoopNamedLockFactory)),
            "rwlock-local" => self.backend("rwlock-local".to_string(), || {
                Arc::new(LocalReadWriteLockFactory::default())
            }),
            other => {
                tracing::warn!("unknown lock factory {other}, using {DEFAULT_LOCK_FACTORY}");
                self.backend("rwlock-local".to_string(), || {
                    Arc::new(LocalReadWriteLockFactory::default())
                })
            }
        };

        let mapper: Box<dyn NameMapper> = match mapper_name.as_str() {
            "file-gav" => Box::new(FileGavNameMapper),
            "discriminating" => Box::new(DiscriminatingNameMapper::new(Box::new(GavNameMapper))),
            "hashing" => {
                let depth = session.config().get_usize(CONFIG_HASHING_DEPTH, 2);
                Box::new(HashingNameMapper::new(Box::new(GavNameMapper), depth))
            }
            "static" => Box::new(StaticNameMapper),
            "noop" => Box::new(NoopNameMapper),
            "gav" => Box::new(GavNameMapper),
            other => {
                tracing::warn!("unknown name mapper {other}, using {DEFAULT_NAME_MAPPER}");
                Box::new(GavNameMapper)
            }
        };

        if factory_name == "file-lock" && !mapper.is_file_system_friendly() {
            tracing::warn!(
                "name mapper {mapper_name} does not produce file names; file locks may fail"
            );
        }

        LockAdapter { factory, mapper }
    }
}
