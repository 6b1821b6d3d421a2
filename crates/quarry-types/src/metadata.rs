use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Which repository policies apply to a piece of metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Nature {
    /// Only release repositories serve this metadata.
    Release,
    /// Only snapshot repositories serve this metadata.
    Snapshot,
    /// Any enabled repository serves this metadata.
    ReleaseOrSnapshot,
}

impl Nature {
    /// Whether a repository with the given release/snapshot enablement may
    /// serve metadata of this nature.
    pub fn is_applicable(self, releases_enabled: bool, snapshots_enabled: bool) -> bool {
        match self {
            Nature::Release => releases_enabled,
            Nature::Snapshot => snapshots_enabled,
            Nature::ReleaseOrSnapshot => releases_enabled || snapshots_enabled,
        }
    }
}

/// Merges an existing metadata file into a freshly written one. Mergeable
/// metadata participates in deploy-side merging: the current remote content is
/// downloaded, merged with the locally produced content, and uploaded back.
pub trait MetadataMerger: Send + Sync {
    /// Merges `existing` (the current file, if any) into `target`, leaving the
    /// merged content at `target`.
    fn merge(&self, existing: Option<&Path>, target: &Path) -> Result<(), MetadataMergeError>;
}

/// Error raised by a [`MetadataMerger`].
#[derive(Debug, thiserror::Error)]
#[error("failed to merge metadata {name}: {reason}")]
pub struct MetadataMergeError {
    pub name: String,
    pub reason: String,
}

/// Ancillary indexing documents describing available versions of an artifact
/// group.
///
/// `group_id`, `artifact_id` and `version` narrow the scope of the document;
/// empty strings mean "not applicable at this level" (e.g. group-level
/// metadata has no artifact id).
#[derive(Clone)]
pub struct Metadata {
    group_id: String,
    artifact_id: String,
    version: String,
    kind: String,
    nature: Nature,
    path: Option<PathBuf>,
    merger: Option<Arc<dyn MetadataMerger>>,
}

impl Metadata {
    pub fn new(
        group_id: impl Into<String>,
        artifact_id: impl Into<String>,
        version: impl Into<String>,
        kind: impl Into<String>,
        nature: Nature,
    ) -> Self {
        Self {
            group_id: group_id.into(),
            artifact_id: artifact_id.into(),
            version: version.into(),
            kind: kind.into(),
            nature,
            path: None,
            merger: None,
        }
    }

    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    pub fn artifact_id(&self) -> &str {
        &self.artifact_id
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// The document type, e.g. `artifacts.meta`. Doubles as the filename
    /// inside the repository directory.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn nature(&self) -> Nature {
        self.nature
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn is_mergeable(&self) -> bool {
        self.merger.is_some()
    }

    pub fn merger(&self) -> Option<&Arc<dyn MetadataMerger>> {
        self.merger.as_ref()
    }

    #[must_use]
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_merger(mut self, merger: Arc<dyn MetadataMerger>) -> Self {
        self.merger = Some(merger);
        self
    }
}

impl std::fmt::Debug for Metadata {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metadata")
            .field("group_id", &self.group_id)
            .field("artifact_id", &self.artifact_id)
            .field("version", &self.version)
            .field("kind", &self.kind)
            .field("nature", &self.nature)
            .field("path", &self.path)
            .field("mergeable", &self.merger.is_some())
            .finish()
    }
}

impl Display for Metadata {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}:{}/{}",
            self.group_id, self.artifact_id, self.version, self.kind
        )
    }
}

impl PartialEq for Metadata {
    fn eq(&self, other: &Self) -> bool {
        self.group_id == other.group_id
            && self.artifact_id == other.artifact_id
            && self.version == other.version
            && self.kind == other.kind
            && self.nature == other.nature
            && self.path == other.path
    }
}

impl Eq for Metadata {}
