//! The origin-tracking local repository.
//!
//! A cache rooted at a base directory, laid out by coordinates, optionally
//! partitioned into local/remote and release/snapshot trees. Every cached
//! file has a sidecar tracking file recording which origin(s) it came from
//! and the outcome of the last update check against each origin.

pub mod manager;
pub mod prefix;
pub mod tracking;
pub mod update;

pub use manager::{
    repository_key, EnhancedLocalRepositoryManager, CONFIG_TRACKING_FILENAME,
    DEFAULT_TRACKING_FILENAME,
};
pub use prefix::{
    composer_from_config, NoopPrefixComposer, PathPrefixComposer, SplitPrefixComposer,
    CONFIG_COMPOSER, CONFIG_LOCAL_PREFIX, CONFIG_RELEASE_PREFIX, CONFIG_REMOTE_PREFIX,
    CONFIG_SNAPSHOT_PREFIX,
};
pub use tracking::TrackingFileManager;
pub use update::{UpdateCheck, UpdateCheckManager, UpdatePolicyAnalyzer};
