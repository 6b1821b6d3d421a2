use std::path::PathBuf;

use crate::artifact::Artifact;
use crate::error::{LocalRepositoryError, TransferError, VersionResolutionError};
use crate::metadata::Metadata;
use crate::repository::{LocalRepository, RemoteRepository, RepositoryRef, WorkspaceRepository};
use crate::request::{
    ArtifactResult, DeployRequest, InstallRequest, LocalArtifactRegistration, LocalArtifactRequest,
    LocalArtifactResult, LocalMetadataRegistration, LocalMetadataRequest, LocalMetadataResult,
    VersionRequest, VersionResult,
};
use crate::session::Session;

/// Pins request versions to concrete versions; notably expands `-SNAPSHOT`
/// to timestamped qualifiers. The implementation is an external collaborator.
pub trait VersionResolver: Send + Sync {
    fn resolve_version(
        &self,
        session: &Session,
        request: &VersionRequest,
    ) -> Result<VersionResult, VersionResolutionError>;
}

/// Serves artifacts straight from the project workspace, short-circuiting
/// repository resolution.
pub trait WorkspaceReader: Send + Sync {
    fn repository(&self) -> WorkspaceRepository;

    fn find_artifact(&self, artifact: &Artifact) -> Option<PathBuf>;
}

/// Verdict of a [`RemoteRepositoryFilter`] for one (repository, item) pair.
#[derive(Debug, Clone)]
pub struct FilterDecision {
    accepted: bool,
    reasoning: String,
}

impl FilterDecision {
    pub fn accept() -> Self {
        Self {
            accepted: true,
            reasoning: String::new(),
        }
    }

    pub fn reject(reasoning: impl Into<String>) -> Self {
        Self {
            accepted: false,
            reasoning: reasoning.into(),
        }
    }

    pub fn is_accepted(&self) -> bool {
        self.accepted
    }

    pub fn reasoning(&self) -> &str {
        &self.reasoning
    }
}

/// Predicate over (remote, artifact|metadata). Rejected remotes are dropped
/// from the candidate list with a recorded cause; rejection is fatal only
/// when every candidate is rejected.
pub trait RemoteRepositoryFilter: Send + Sync {
    fn accept_artifact(&self, repository: &RemoteRepository, artifact: &Artifact)
        -> FilterDecision;

    fn accept_metadata(&self, repository: &RemoteRepository, metadata: &Metadata)
        -> FilterDecision;
}

/// Runs over the full result list after resolution; may attach additional
/// verification or replace an artifact's path. Only observes results whose
/// path is set and valid on disk.
pub trait ArtifactResolverPostProcessor: Send + Sync {
    /// A stable name, used for priority overrides in the session config.
    fn name(&self) -> &'static str;

    fn priority(&self) -> f32 {
        0.0
    }

    fn post_process(&self, session: &Session, results: &mut [ArtifactResult]);
}

/// Transforms the artifact stream of an install/deploy request and emits
/// companion metadata before and after the artifacts are written.
pub trait MetadataGenerator: Send {
    /// Metadata to process before any artifact is written.
    fn prepare(&mut self, artifacts: &[Artifact]) -> Vec<Metadata>;

    /// Maps each artifact before it is written; identity by default.
    fn transform_artifact(&mut self, artifact: Artifact) -> Artifact {
        artifact
    }

    /// Metadata to process after all artifacts were written.
    fn finish(&mut self, artifacts: &[Artifact]) -> Vec<Metadata>;
}

/// Produces [`MetadataGenerator`]s for install and deploy requests. A factory
/// may decline a request by returning `None`.
pub trait MetadataGeneratorFactory: Send + Sync {
    /// A stable name, used for priority overrides in the session config.
    fn name(&self) -> &'static str;

    fn priority(&self) -> f32 {
        0.0
    }

    fn new_install_generator(
        &self,
        session: &Session,
        request: &InstallRequest,
    ) -> Option<Box<dyn MetadataGenerator>>;

    fn new_deploy_generator(
        &self,
        session: &Session,
        request: &DeployRequest,
    ) -> Option<Box<dyn MetadataGenerator>>;
}

/// Maps coordinates to cache paths and answers origin-aware lookups against
/// the local repository.
pub trait LocalRepositoryManager: Send + Sync {
    fn repository(&self) -> &LocalRepository;

    /// Relative path for a locally installed artifact.
    fn path_for_local_artifact(&self, artifact: &Artifact) -> PathBuf;

    /// Relative path for an artifact cached from the given remote.
    fn path_for_remote_artifact(
        &self,
        artifact: &Artifact,
        repository: &RemoteRepository,
        context: &str,
    ) -> PathBuf;

    /// Relative path for locally installed metadata.
    fn path_for_local_metadata(&self, metadata: &Metadata) -> PathBuf;

    /// Relative path for metadata cached from the given remote.
    fn path_for_remote_metadata(
        &self,
        metadata: &Metadata,
        repository: &RemoteRepository,
        context: &str,
    ) -> PathBuf;

    fn find_artifact(&self, session: &Session, request: &LocalArtifactRequest)
        -> LocalArtifactResult;

    fn add_artifact(
        &self,
        session: &Session,
        registration: &LocalArtifactRegistration,
    ) -> Result<(), LocalRepositoryError>;

    fn find_metadata(&self, session: &Session, request: &LocalMetadataRequest)
        -> LocalMetadataResult;

    fn add_metadata(
        &self,
        session: &Session,
        registration: &LocalMetadataRegistration,
    ) -> Result<(), LocalRepositoryError>;
}

/// Event sink for repository activity. All methods default to no-ops; a
/// session installs at most one listener.
#[allow(unused_variables)]
pub trait RepositoryListener: Send + Sync {
    fn artifact_resolving(&self, artifact: &Artifact) {}

    fn artifact_resolved(&self, artifact: &Artifact, repository: Option<&RepositoryRef>) {}

    fn artifact_downloading(&self, artifact: &Artifact, repository: &RemoteRepository) {}

    fn artifact_downloaded(
        &self,
        artifact: &Artifact,
        repository: &RemoteRepository,
        error: Option<&TransferError>,
    ) {
    }

    fn metadata_resolving(&self, metadata: &Metadata) {}

    fn metadata_resolved(&self, metadata: &Metadata, error: Option<&TransferError>) {}

    fn metadata_downloading(&self, metadata: &Metadata, repository: &RemoteRepository) {}

    fn metadata_downloaded(
        &self,
        metadata: &Metadata,
        repository: &RemoteRepository,
        error: Option<&TransferError>,
    ) {
    }

    fn artifact_installing(&self, artifact: &Artifact, path: &std::path::Path) {}

    fn artifact_installed(&self, artifact: &Artifact, path: &std::path::Path) {}

    fn metadata_installing(&self, metadata: &Metadata, path: &std::path::Path) {}

    fn metadata_installed(&self, metadata: &Metadata, path: &std::path::Path) {}

    fn artifact_deploying(&self, artifact: &Artifact, repository: &RemoteRepository) {}

    fn artifact_deployed(&self, artifact: &Artifact, repository: &RemoteRepository) {}

    fn metadata_deploying(&self, metadata: &Metadata, repository: &RemoteRepository) {}

    fn metadata_deployed(&self, metadata: &Metadata, repository: &RemoteRepository) {}
}
