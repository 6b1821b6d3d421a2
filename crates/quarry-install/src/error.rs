use quarry_locks::LockError;
use quarry_types::{
    LocalRepositoryError, MetadataMergeError, NoConnectorError, TransferError,
};

/// Failure to install into the local cache.
#[derive(Debug, thiserror::Error)]
pub enum InstallError {
    /// Source and destination are the same file; installing would destroy
    /// the source.
    #[error("cannot install {item} onto itself at {path}")]
    SamePath { item: String, path: String },

    #[error("{item} has no file attached")]
    NoFile { item: String },

    #[error("failed to install {item}: {source}")]
    Io {
        item: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Merge(#[from] MetadataMergeError),

    #[error(transparent)]
    Registration(#[from] LocalRepositoryError),

    #[error(transparent)]
    Lock(#[from] LockError),
}

/// Failure to deploy to a remote repository.
#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    #[error(transparent)]
    NoConnector(#[from] NoConnectorError),

    #[error(transparent)]
    Transfer(TransferError),

    #[error("{item} has no file attached")]
    NoFile { item: String },

    #[error("failed to stage {item}: {source}")]
    Io {
        item: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Merge(#[from] MetadataMergeError),

    #[error(transparent)]
    Registration(#[from] LocalRepositoryError),

    #[error(transparent)]
    Lock(#[from] LockError),
}
