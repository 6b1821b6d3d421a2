use std::path::PathBuf;

use crate::artifact::Artifact;
use crate::error::{NoConnectorError, TransferError};
use crate::metadata::Metadata;
use crate::repository::RemoteRepository;
use crate::session::Session;

/// One artifact transfer to execute against a remote. The connector fills in
/// [`Self::error`]; an untouched `None` after `get` means success.
#[derive(Debug, Clone)]
pub struct ArtifactDownload {
    pub artifact: Artifact,
    /// Destination inside the local cache.
    pub path: PathBuf,
    /// Only verify remote existence; the destination already holds the bytes.
    pub existence_check: bool,
    pub checksum_policy: String,
    /// Resolution contexts on whose behalf this download happens; recorded as
    /// origins after a successful transfer.
    pub supported_contexts: Vec<String>,
    pub error: Option<TransferError>,
}

impl ArtifactDownload {
    pub fn new(artifact: Artifact, path: PathBuf) -> Self {
        Self {
            artifact,
            path,
            existence_check: false,
            checksum_policy: String::new(),
            supported_contexts: Vec::new(),
            error: None,
        }
    }
}

/// One metadata transfer to execute against a remote.
#[derive(Debug, Clone)]
pub struct MetadataDownload {
    pub metadata: Metadata,
    pub path: PathBuf,
    pub checksum_policy: String,
    pub error: Option<TransferError>,
}

impl MetadataDownload {
    pub fn new(metadata: Metadata, path: PathBuf) -> Self {
        Self {
            metadata,
            path,
            checksum_policy: String::new(),
            error: None,
        }
    }
}

/// One artifact upload to a remote.
#[derive(Debug, Clone)]
pub struct ArtifactUpload {
    pub artifact: Artifact,
    pub path: PathBuf,
    pub error: Option<TransferError>,
}

impl ArtifactUpload {
    pub fn new(artifact: Artifact, path: PathBuf) -> Self {
        Self {
            artifact,
            path,
            error: None,
        }
    }
}

/// One metadata upload to a remote.
#[derive(Debug, Clone)]
pub struct MetadataUpload {
    pub metadata: Metadata,
    pub path: PathBuf,
    pub error: Option<TransferError>,
}

impl MetadataUpload {
    pub fn new(metadata: Metadata, path: PathBuf) -> Self {
        Self {
            metadata,
            path,
            error: None,
        }
    }
}

/// A wire connector for one remote repository, produced by a
/// [`RepositoryConnectorFactory`]. Transfers are batched; individual failures
/// are reported on the descriptors, never by aborting the batch.
///
/// Implementations block on network I/O and must be safe to call from
/// multiple threads; cancellation propagates through the transport and
/// surfaces as [`TransferError::Cancelled`] on the descriptor.
pub trait RepositoryConnector: Send + Sync {
    fn get(&self, artifacts: &mut [ArtifactDownload], metadata: &mut [MetadataDownload]);

    fn put(&self, artifacts: &mut [ArtifactUpload], metadata: &mut [MetadataUpload]);
}

impl std::fmt::Debug for dyn RepositoryConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn RepositoryConnector")
    }
}

/// Creates connectors for remote repositories. Factories are consulted in
/// priority order; the first one that succeeds wins.
pub trait RepositoryConnectorFactory: Send + Sync {
    /// A stable name, used for priority overrides in the session config.
    fn name(&self) -> &'static str;

    fn priority(&self) -> f32 {
        0.0
    }

    fn new_connector(
        &self,
        session: &Session,
        repository: &RemoteRepository,
    ) -> Result<Box<dyn RepositoryConnector>, NoConnectorError>;
}
