//! Named locks and the scoped sync context.
//!
//! Cache mutations are serialized by acquiring a set of named locks derived
//! from the affected coordinates. Backends range from in-process read/write
//! locks to OS advisory file locks for caches shared between processes.

pub mod file;
pub mod name_mapper;
pub mod named;
pub mod rwlock;
pub mod semaphore;
pub mod sync_context;

pub use file::FileLockNamedLockFactory;
pub use name_mapper::{
    DiscriminatingNameMapper, FileGavNameMapper, GavNameMapper, HashingNameMapper, NameMapper,
    NoopNameMapper, StaticNameMapper,
};
pub use named::{LockError, NamedLock, NamedLockFactory, NoopNamedLockFactory};
pub use rwlock::LocalReadWriteLockFactory;
pub use semaphore::LocalSemaphoreLockFactory;
pub use sync_context::{
    SyncContext, SyncContextFactory, CONFIG_HASHING_DEPTH, CONFIG_LOCK_FACTORY, CONFIG_NAME_MAPPER,
    CONFIG_SEMAPHORE_PERMITS,
};
