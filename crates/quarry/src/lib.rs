//! quarry — content-addressed build-artifact resolution.
//!
//! Given a batch of requests referencing artifacts by coordinates and a set
//! of candidate remotes, quarry returns a local file path per artifact (or a
//! structured error), fetching and validating missing artifacts into a
//! shared, origin-tracking local cache. Installation of locally produced
//! artifacts shares the same cache and the same concurrency discipline.
//!
//! The entry point is [`RepositorySystem`]:
//!
//! ```no_run
//! use std::sync::Arc;
//! use quarry::{Artifact, ArtifactRequest, ConfigProperties, RemoteRepository, RepositorySystem};
//!
//! # fn connector_factory() -> Arc<dyn quarry::RepositoryConnectorFactory> { unimplemented!() }
//! let system = RepositorySystem::builder()
//!     .connector_factory(connector_factory())
//!     .build();
//! let session = system
//!     .new_session_builder("/path/to/cache", ConfigProperties::default())
//!     .build();
//!
//! let request = ArtifactRequest::new(Artifact::new("org.example", "lib", "jar", "1.0"))
//!     .with_repositories(vec![RemoteRepository::new("central", "https://repo.example.org/")]);
//! let results = system.resolve_artifacts(&session, vec![request])?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod lifecycle;
pub mod system;

pub use lifecycle::{LifecycleError, RepositorySystemLifecycle};
pub use system::{RepositorySystem, RepositorySystemBuilder};

pub use quarry_cache::{EnhancedLocalRepositoryManager, TrackingFileManager, UpdateCheckManager};
pub use quarry_install::{DeployError, InstallError};
pub use quarry_locks::{LockError, SyncContext, SyncContextFactory};
pub use quarry_resolver::{PrefixesRemoteRepositoryFilter, ResolveError, TrustedChecksumsPostProcessor};
pub use quarry_types::session::ConfigProperties;
pub use quarry_types::{
    Artifact, ArtifactRequest, ArtifactResolutionError, ArtifactResult, DeployRequest,
    DeployResult, InstallRequest, InstallResult, Metadata, MetadataRequest, MetadataResult,
    Nature, RemoteRepository, RepositoryConnector, RepositoryConnectorFactory, RepositoryPolicy,
    RepositoryRef, ResolutionError, Session, TransferError, VersionResolver,
};
