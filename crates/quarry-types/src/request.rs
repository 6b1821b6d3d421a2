use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use std::sync::Arc;

use crate::artifact::Artifact;
use crate::error::ResolutionError;
use crate::metadata::Metadata;
use crate::repository::{RemoteRepository, RepositoryRef};

/// Opaque breadcrumb describing what triggered a request; carried through the
/// pipelines for diagnostics only.
#[derive(Debug, Clone)]
pub struct RequestTrace {
    pub data: String,
    pub parent: Option<Arc<RequestTrace>>,
}

impl RequestTrace {
    pub fn new(data: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            parent: None,
        }
    }
}

/// A request to resolve one artifact against a list of candidate remotes.
#[derive(Debug, Clone)]
pub struct ArtifactRequest {
    pub artifact: Artifact,
    pub repositories: Vec<RemoteRepository>,
    pub context: String,
    pub trace: Option<RequestTrace>,
}

impl ArtifactRequest {
    pub fn new(artifact: Artifact) -> Self {
        Self {
            artifact,
            repositories: Vec::new(),
            context: String::new(),
            trace: None,
        }
    }

    #[must_use]
    pub fn with_repositories(mut self, repositories: Vec<RemoteRepository>) -> Self {
        self.repositories = repositories;
        self
    }

    #[must_use]
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }
}

/// Outcome of resolving one [`ArtifactRequest`]. The request succeeded iff
/// [`Self::artifact`] is set and carries a path.
#[derive(Debug, Clone)]
pub struct ArtifactResult {
    pub request: ArtifactRequest,
    pub artifact: Option<Artifact>,
    pub repository: Option<RepositoryRef>,
    pub local_result: Option<LocalArtifactResult>,
    pub exceptions: Vec<ResolutionError>,
}

impl ArtifactResult {
    pub fn new(request: ArtifactRequest) -> Self {
        Self {
            request,
            artifact: None,
            repository: None,
            local_result: None,
            exceptions: Vec::new(),
        }
    }

    /// Whether the artifact was resolved to an on-disk path.
    pub fn is_resolved(&self) -> bool {
        self.artifact
            .as_ref()
            .is_some_and(|artifact| artifact.path().is_some())
    }

    /// Whether at least one candidate reported the artifact missing and none
    /// produced it.
    pub fn is_missing(&self) -> bool {
        !self.is_resolved() && self.exceptions.iter().all(ResolutionError::is_not_found)
    }
}

/// A request to resolve one metadata document.
///
/// With no repository set, only the local repository is consulted.
#[derive(Debug, Clone)]
pub struct MetadataRequest {
    pub metadata: Metadata,
    pub repository: Option<RemoteRepository>,
    pub context: String,
    /// Suppress remote update checks when the local copy satisfies the
    /// request.
    pub favor_local_repository: bool,
    /// Remove the local copy when every authoritative source confirms the
    /// metadata is gone.
    pub delete_local_copy_if_missing: bool,
    pub trace: Option<RequestTrace>,
}

impl MetadataRequest {
    pub fn new(metadata: Metadata) -> Self {
        Self {
            metadata,
            repository: None,
            context: String::new(),
            favor_local_repository: false,
            delete_local_copy_if_missing: false,
            trace: None,
        }
    }

    #[must_use]
    pub fn with_repository(mut self, repository: RemoteRepository) -> Self {
        self.repository = Some(repository);
        self
    }

    #[must_use]
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }

    #[must_use]
    pub fn favoring_local(mut self) -> Self {
        self.favor_local_repository = true;
        self
    }

    #[must_use]
    pub fn deleting_local_copy_if_missing(mut self) -> Self {
        self.delete_local_copy_if_missing = true;
        self
    }
}

/// Outcome of resolving one [`MetadataRequest`].
#[derive(Debug, Clone)]
pub struct MetadataResult {
    pub request: MetadataRequest,
    pub metadata: Option<Metadata>,
    pub exception: Option<ResolutionError>,
    /// Whether the local copy was refreshed by this resolution.
    pub updated: bool,
}

impl MetadataResult {
    pub fn new(request: MetadataRequest) -> Self {
        Self {
            request,
            metadata: None,
            exception: None,
            updated: false,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.metadata
            .as_ref()
            .is_some_and(|metadata| metadata.path().is_some())
    }
}

/// A request to install locally-produced artifacts and metadata into the
/// local cache.
#[derive(Debug, Clone, Default)]
pub struct InstallRequest {
    pub artifacts: Vec<Artifact>,
    pub metadata: Vec<Metadata>,
    pub trace: Option<RequestTrace>,
}

impl InstallRequest {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_artifact(mut self, artifact: Artifact) -> Self {
        self.artifacts.push(artifact);
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata.push(metadata);
        self
    }
}

/// Artifacts and metadata as they ended up in the local cache.
#[derive(Debug, Clone, Default)]
pub struct InstallResult {
    pub artifacts: Vec<Artifact>,
    pub metadata: Vec<Metadata>,
}

/// A request to upload locally-produced artifacts and metadata to a remote.
#[derive(Debug, Clone)]
pub struct DeployRequest {
    pub artifacts: Vec<Artifact>,
    pub metadata: Vec<Metadata>,
    pub repository: RemoteRepository,
    pub trace: Option<RequestTrace>,
}

impl DeployRequest {
    pub fn new(repository: RemoteRepository) -> Self {
        Self {
            artifacts: Vec::new(),
            metadata: Vec::new(),
            repository,
            trace: None,
        }
    }

    #[must_use]
    pub fn with_artifact(mut self, artifact: Artifact) -> Self {
        self.artifacts.push(artifact);
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata.push(metadata);
        self
    }
}

/// Artifacts and metadata as they were uploaded.
#[derive(Debug, Clone, Default)]
pub struct DeployResult {
    pub artifacts: Vec<Artifact>,
    pub metadata: Vec<Metadata>,
}

/// Query against the local repository manager for one artifact.
#[derive(Debug, Clone)]
pub struct LocalArtifactRequest {
    pub artifact: Artifact,
    /// Remotes whose cached copies are acceptable to the caller.
    pub repositories: Vec<RemoteRepository>,
    pub context: String,
}

/// Answer from the local repository manager.
///
/// `path` is set whenever a file with the right name exists; `available`
/// additionally certifies that the tracking file attributes the file to one
/// of the requested origins (or to a local installation).
#[derive(Debug, Clone, Default)]
pub struct LocalArtifactResult {
    pub path: Option<PathBuf>,
    pub available: bool,
    /// The matching origin, when availability came from a tracked remote.
    pub repository: Option<RemoteRepository>,
}

/// Registration of a cached artifact with the local repository manager.
/// An absent repository means "locally installed".
#[derive(Debug, Clone)]
pub struct LocalArtifactRegistration {
    pub artifact: Artifact,
    pub repository: Option<RemoteRepository>,
    pub contexts: Vec<String>,
}

/// Query against the local repository manager for one metadata document.
#[derive(Debug, Clone)]
pub struct LocalMetadataRequest {
    pub metadata: Metadata,
    /// The origin remote; absent for locally installed metadata.
    pub repository: Option<RemoteRepository>,
    pub context: String,
}

/// Answer from the local repository manager for metadata.
#[derive(Debug, Clone, Default)]
pub struct LocalMetadataResult {
    pub path: Option<PathBuf>,
    /// The cached copy predates a layout or origin change and must not be
    /// trusted without a re-fetch.
    pub stale: bool,
}

/// Registration of cached metadata with the local repository manager.
#[derive(Debug, Clone)]
pub struct LocalMetadataRegistration {
    pub metadata: Metadata,
    pub repository: Option<RemoteRepository>,
    pub context: String,
}

/// Request to the downstream version resolver.
#[derive(Debug, Clone)]
pub struct VersionRequest {
    pub artifact: Artifact,
    pub repositories: Vec<RemoteRepository>,
    pub context: String,
}

/// Version pinned by the downstream version resolver. The repository, when
/// known, narrows the candidate set for the subsequent download.
#[derive(Debug, Clone)]
pub struct VersionResult {
    pub version: String,
    pub repository: Option<RepositoryRef>,
}

/// Batch failure of [`crate::ArtifactRequest`] resolution: at least one
/// result lacks a resolved path. Carries every per-request result so callers
/// can produce per-artifact diagnostics.
#[derive(Debug, Clone)]
pub struct ArtifactResolutionError {
    pub results: Vec<ArtifactResult>,
}

impl ArtifactResolutionError {
    pub fn failed_results(&self) -> impl Iterator<Item = &ArtifactResult> {
        self.results.iter().filter(|result| !result.is_resolved())
    }
}

impl Display for ArtifactResolutionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let failed: Vec<String> = self
            .failed_results()
            .map(|result| result.request.artifact.to_string())
            .collect();
        write!(
            f,
            "failed to resolve {} of {} artifacts: {}",
            failed.len(),
            self.results.len(),
            failed.join(", ")
        )
    }
}

impl std::error::Error for ArtifactResolutionError {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransferError;

    #[test]
    fn result_resolved_requires_path() {
        let request = ArtifactRequest::new(Artifact::new("g", "a", "jar", "1.0"));
        let mut result = ArtifactResult::new(request);
        assert!(!result.is_resolved());

        result.artifact = Some(Artifact::new("g", "a", "jar", "1.0"));
        assert!(!result.is_resolved());

        result.artifact = Some(Artifact::new("g", "a", "jar", "1.0").with_path("/tmp/a-1.0.jar"));
        assert!(result.is_resolved());
    }

    #[test]
    fn missing_requires_only_not_found_causes() {
        let request = ArtifactRequest::new(Artifact::new("g", "a", "jar", "1.0"));
        let mut result = ArtifactResult::new(request);
        result.exceptions.push(ResolutionError::Transfer(TransferError::NotFound {
            item: "g:a:jar:1.0".into(),
            location: "r".into(),
        }));
        assert!(result.is_missing());

        result.exceptions.push(ResolutionError::Offline {
            item: "g:a:jar:1.0".into(),
            repository: "r".into(),
        });
        assert!(!result.is_missing());
    }

    #[test]
    fn batch_error_lists_failures() {
        let ok_request = ArtifactRequest::new(Artifact::new("g", "ok", "jar", "1.0"));
        let mut ok = ArtifactResult::new(ok_request);
        ok.artifact = Some(Artifact::new("g", "ok", "jar", "1.0").with_path("/tmp/ok.jar"));

        let bad_request = ArtifactRequest::new(Artifact::new("g", "bad", "jar", "1.0"));
        let bad = ArtifactResult::new(bad_request);

        let error = ArtifactResolutionError { results: vec![ok, bad] };
        let rendered = error.to_string();
        assert!(rendered.contains("1 of 2"));
        assert!(rendered.contains("g:bad:jar:1.0"));
    }
}
