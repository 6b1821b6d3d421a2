use std::fmt::Display;

use crate::repository::RemoteRepository;

/// Why a single transfer failed. Produced by connectors and carried through
/// results; cloneable so a cause can live in both a per-request result and an
/// aggregated batch error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransferError {
    /// The remote confirmed the item is absent. Cacheable under the
    /// resolution error policy.
    #[error("{item} was not found in {location}")]
    NotFound { item: String, location: String },

    /// Network or I/O failure; possibly transient.
    #[error("transfer of {item} from {location} failed: {reason}")]
    Failed {
        item: String,
        location: String,
        reason: String,
    },

    /// The transfer was cancelled cooperatively.
    #[error("transfer of {item} from {location} was cancelled")]
    Cancelled { item: String, location: String },

    /// A checksum or trust policy rejected the transferred bytes.
    #[error("checksum validation of {item} from {location} failed: {reason}")]
    ChecksumFailure {
        item: String,
        location: String,
        reason: String,
    },
}

impl TransferError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, TransferError::NotFound { .. })
    }

    /// Round-trips through the tracking file, where only the rendered string
    /// survives. Anything non-empty deserializes as a generic failure.
    pub fn from_cached(item: &str, location: &str, rendered: &str) -> Self {
        TransferError::Failed {
            item: item.to_string(),
            location: location.to_string(),
            reason: rendered.to_string(),
        }
    }
}

/// A single cause recorded against one candidate repository (or the local
/// repository) during resolution. Per-remote causes accumulate in results and
/// never abort sibling remotes or sibling requests.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolutionError {
    /// No candidate repository had the item.
    #[error("{item} was not found in {location}")]
    NotFound { item: String, location: String },

    /// A transfer was attempted and failed.
    #[error(transparent)]
    Transfer(TransferError),

    /// A remote repository filter rejected this repository for the item.
    #[error("{item} was filtered out of {repository}: {reason}")]
    FilteredOut {
        item: String,
        repository: String,
        reason: String,
    },

    /// The session is offline and the item was not previously downloaded from
    /// this repository.
    #[error("cannot access {repository} for {item} in offline mode")]
    Offline { item: String, repository: String },

    /// No connector factory could serve the repository.
    #[error("no connector available for {repository}: {reason}")]
    NoConnector { repository: String, reason: String },

    /// The downstream version resolver failed.
    #[error("version resolution of {item} failed: {reason}")]
    VersionResolution { item: String, reason: String },

    /// A post-processor or policy rejected an otherwise resolved item.
    #[error("{item} violates policy: {reason}")]
    PolicyViolation { item: String, reason: String },
}

impl ResolutionError {
    pub fn offline(item: impl Display, repository: &RemoteRepository) -> Self {
        ResolutionError::Offline {
            item: item.to_string(),
            repository: repository.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            ResolutionError::NotFound { .. } => true,
            ResolutionError::Transfer(transfer) => transfer.is_not_found(),
            _ => false,
        }
    }
}

/// Error produced when no connector factory can serve a remote repository.
#[derive(Debug, Clone, thiserror::Error)]
#[error("no connector available for {repository}: {reason}")]
pub struct NoConnectorError {
    pub repository: String,
    pub reason: String,
}

impl NoConnectorError {
    pub fn new(repository: &RemoteRepository, reason: impl Into<String>) -> Self {
        Self {
            repository: repository.to_string(),
            reason: reason.into(),
        }
    }
}

/// Error produced by the downstream version resolver.
#[derive(Debug, Clone, thiserror::Error)]
#[error("version resolution of {item} failed: {reason}")]
pub struct VersionResolutionError {
    pub item: String,
    pub reason: String,
}

/// Failure of a local repository mutation (tracking file or cache write).
#[derive(Debug, thiserror::Error)]
pub enum LocalRepositoryError {
    #[error("failed to update tracking file {path}: {source}")]
    Tracking {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to stage {path}: {source}")]
    Staging {
        path: String,
        #[source]
        source: std::io::Error,
    },
}
