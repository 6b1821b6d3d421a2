//! Cache-path prefix composition: the optional `{local|remote}` split of the
//! enhanced local repository layout.

use quarry_types::session::ConfigProperties;
use quarry_types::{Artifact, Metadata, Nature, RemoteRepository};

/// Selects the composer: `noop`, `split` or `split-repository`.
pub const CONFIG_COMPOSER: &str = "quarry.dynamicLocalRepository.composer";
/// Prefix for locally installed files (default `installed`).
pub const CONFIG_LOCAL_PREFIX: &str = "quarry.enhancedLocalRepository.localPrefix";
/// Prefix for files cached from remotes (default `cached`).
pub const CONFIG_REMOTE_PREFIX: &str = "quarry.enhancedLocalRepository.remotePrefix";
/// Release partition under the remote prefix (default `releases`).
pub const CONFIG_RELEASE_PREFIX: &str = "quarry.enhancedLocalRepository.releasePrefix";
/// Snapshot partition under the remote prefix (default `snapshots`).
pub const CONFIG_SNAPSHOT_PREFIX: &str = "quarry.enhancedLocalRepository.snapshotPrefix";

const DEFAULT_LOCAL_PREFIX: &str = "installed";
const DEFAULT_REMOTE_PREFIX: &str = "cached";
const DEFAULT_RELEASE_PREFIX: &str = "releases";
const DEFAULT_SNAPSHOT_PREFIX: &str = "snapshots";

/// Turns (item, origin) into a cache-path prefix. `None` means "no prefix",
/// i.e. the classic flat layout.
pub trait PathPrefixComposer: Send + Sync {
    fn prefix_for_local_artifact(&self, artifact: &Artifact) -> Option<String>;

    fn prefix_for_remote_artifact(
        &self,
        artifact: &Artifact,
        repository: &RemoteRepository,
    ) -> Option<String>;

    fn prefix_for_local_metadata(&self, metadata: &Metadata) -> Option<String>;

    fn prefix_for_remote_metadata(
        &self,
        metadata: &Metadata,
        repository: &RemoteRepository,
    ) -> Option<String>;
}

/// The classic layout: everything in one tree.
#[derive(Default)]
pub struct NoopPrefixComposer;

impl PathPrefixComposer for NoopPrefixComposer {
    fn prefix_for_local_artifact(&self, _artifact: &Artifact) -> Option<String> {
        None
    }

    fn prefix_for_remote_artifact(
        &self,
        _artifact: &Artifact,
        _repository: &RemoteRepository,
    ) -> Option<String> {
        None
    }

    fn prefix_for_local_metadata(&self, _metadata: &Metadata) -> Option<String> {
        None
    }

    fn prefix_for_remote_metadata(
        &self,
        _metadata: &Metadata,
        _repository: &RemoteRepository,
    ) -> Option<String> {
        None
    }
}

/// Splits the cache by local/remote and release/snapshot, optionally also by
/// origin repository id so caches from different origins never share a file.
pub struct SplitPrefixComposer {
    local_prefix: String,
    remote_prefix: String,
    release_prefix: String,
    snapshot_prefix: String,
    split_repository: bool,
}

impl SplitPrefixComposer {
    pub fn from_config(config: &ConfigProperties, split_repository: bool) -> Self {
        Self {
            local_prefix: config.get_str(CONFIG_LOCAL_PREFIX, DEFAULT_LOCAL_PREFIX).to_string(),
            remote_prefix: config.get_str(CONFIG_REMOTE_PREFIX, DEFAULT_REMOTE_PREFIX).to_string(),
            release_prefix: config
                .get_str(CONFIG_RELEASE_PREFIX, DEFAULT_RELEASE_PREFIX)
                .to_string(),
            snapshot_prefix: config
                .get_str(CONFIG_SNAPSHOT_PREFIX, DEFAULT_SNAPSHOT_PREFIX)
                .to_string(),
            split_repository,
        }
    }

    fn remote_prefix_for(&self, snapshot: bool, repository: &RemoteRepository) -> String {
        let partition = if snapshot {
            &self.snapshot_prefix
        } else {
            &self.release_prefix
        };
        if self.split_repository {
            format!("{}/{}/{}", self.remote_prefix, partition, repository.id())
        } else {
            format!("{}/{}", self.remote_prefix, partition)
        }
    }
}

impl PathPrefixComposer for SplitPrefixComposer {
    fn prefix_for_local_artifact(&self, _artifact: &Artifact) -> Option<String> {
        Some(self.local_prefix.clone())
    }

    fn prefix_for_remote_artifact(
        &self,
        artifact: &Artifact,
        repository: &RemoteRepository,
    ) -> Option<String> {
        Some(self.remote_prefix_for(artifact.is_snapshot(), repository))
    }

    fn prefix_for_local_metadata(&self, _metadata: &Metadata) -> Option<String> {
        Some(self.local_prefix.clone())
    }

    fn prefix_for_remote_metadata(
        &self,
        metadata: &Metadata,
        repository: &RemoteRepository,
    ) -> Option<String> {
        Some(self.remote_prefix_for(metadata.nature() == Nature::Snapshot, repository))
    }
}

/// Builds the composer selected by [`CONFIG_COMPOSER`].
pub fn composer_from_config(config: &ConfigProperties) -> Box<dyn PathPrefixComposer> {
    match config.get_str(CONFIG_COMPOSER, "noop") {
        "split" => Box::new(SplitPrefixComposer::from_config(config, false)),
        "split-repository" => Box::new(SplitPrefixComposer::from_config(config, true)),
        "noop" => Box::new(NoopPrefixComposer),
        other => {
            tracing::warn!("unknown path composer {other}, using noop");
            Box::new(NoopPrefixComposer)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_partitions_by_origin_and_nature() {
        let composer = SplitPrefixComposer::from_config(&ConfigProperties::default(), true);
        let remote = RemoteRepository::new("central", "https://r/");

        let release = Artifact::new("g", "a", "jar", "1.0");
        assert_eq!(
            composer.prefix_for_remote_artifact(&release, &remote).as_deref(),
            Some("cached/releases/central")
        );

        let snapshot = Artifact::new("g", "a", "jar", "1.0-SNAPSHOT");
        assert_eq!(
            composer.prefix_for_remote_artifact(&snapshot, &remote).as_deref(),
            Some("cached/snapshots/central")
        );

        assert_eq!(composer.prefix_for_local_artifact(&release).as_deref(), Some("installed"));
    }

    #[test]
    fn composer_selection_defaults_to_noop() {
        let composer = composer_from_config(&ConfigProperties::default());
        assert!(composer
            .prefix_for_local_artifact(&Artifact::new("g", "a", "jar", "1.0"))
            .is_none());
    }

    #[test]
    fn custom_prefixes_are_honored() {
        let mut config = ConfigProperties::default();
        config.set(CONFIG_REMOTE_PREFIX, "fetched");
        config.set(CONFIG_SNAPSHOT_PREFIX, "snap");
        let composer = SplitPrefixComposer::from_config(&config, false);
        let remote = RemoteRepository::new("central", "https://r/");
        let snapshot = Artifact::new("g", "a", "jar", "1.0-SNAPSHOT");
        assert_eq!(
            composer.prefix_for_remote_artifact(&snapshot, &remote).as_deref(),
            Some("fetched/snap")
        );
    }
}
