//! A remote repository filter backed by per-repository prefix lists.
//!
//! A repository that publishes an index of its content can be summarized as
//! a list of path prefixes. With a file `prefixes-<repository-id>.txt` in the
//! filter basedir, only items whose repository path starts with one of the
//! listed prefixes are attempted against that repository; everything else is
//! rejected without a network round trip. Repositories without a prefix file
//! are unaffected.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use rustc_hash::FxHashMap;
use tracing::{debug, warn};

use quarry_types::session::ConfigProperties;
use quarry_types::{
    Artifact, FilterDecision, Metadata, RemoteRepository, RemoteRepositoryFilter,
};

/// Enables the prefixes filter.
pub const CONFIG_PREFIXES_ENABLED: &str = "quarry.remoteRepositoryFilter.prefixes.enabled";
/// Directory holding the `prefixes-<repository-id>.txt` files; resolved
/// against the local repository basedir when relative.
pub const CONFIG_PREFIXES_BASEDIR: &str = "quarry.remoteRepositoryFilter.prefixes.basedir";
/// Default directory name under the local repository.
pub const DEFAULT_PREFIXES_DIR: &str = ".remoteRepositoryFilters";

pub struct PrefixesRemoteRepositoryFilter {
    basedir: PathBuf,
    /// Loaded prefix lists per repository id; `None` records "no file", so
    /// the lookup happens once per repository.
    cache: Mutex<FxHashMap<String, Option<Vec<String>>>>,
}

impl PrefixesRemoteRepositoryFilter {
    pub fn new(basedir: impl Into<PathBuf>) -> Self {
        Self {
            basedir: basedir.into(),
            cache: Mutex::new(FxHashMap::default()),
        }
    }

    /// Builds the filter when [`CONFIG_PREFIXES_ENABLED`] is set. A relative
    /// basedir is resolved against the local repository.
    pub fn from_config(
        config: &ConfigProperties,
        local_repository_basedir: &Path,
    ) -> Option<Self> {
        if !config.get_bool(CONFIG_PREFIXES_ENABLED, false) {
            return None;
        }
        let configured = config.get_str(CONFIG_PREFIXES_BASEDIR, DEFAULT_PREFIXES_DIR);
        let basedir = if Path::new(configured).is_absolute() {
            PathBuf::from(configured)
        } else {
            local_repository_basedir.join(configured)
        };
        Some(Self::new(basedir))
    }

    fn decide(&self, repository: &RemoteRepository, path: &str, item: &dyn std::fmt::Display) -> FilterDecision {
        let mut cache = self
            .cache
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let prefixes = cache
            .entry(repository.id().to_string())
            .or_insert_with(|| self.load(repository));
        match prefixes {
            None => FilterDecision::accept(),
            Some(prefixes) => {
                if prefixes.iter().any(|prefix| path.starts_with(prefix.as_str())) {
                    FilterDecision::accept()
                } else {
                    debug!("prefix list of {repository} rejects {item}");
                    FilterDecision::reject(format!(
                        "{} is not among the published prefixes of {}",
                        path,
                        repository.id()
                    ))
                }
            }
        }
    }

    fn load(&self, repository: &RemoteRepository) -> Option<Vec<String>> {
        let file = self.basedir.join(format!("prefixes-{}.txt", repository.id()));
        let content = match fs_err::read_to_string(&file) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return None,
            Err(err) => {
                warn!("unreadable prefix file {}: {err}", file.display());
                return None;
            }
        };
        let prefixes: Vec<String> = content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(|line| line.trim_start_matches('/').to_string())
            .collect();
        debug!("loaded {} prefixes for {}", prefixes.len(), repository.id());
        Some(prefixes)
    }
}

/// The path of an artifact inside a remote repository, which is what prefix
/// lists describe.
fn remote_artifact_path(artifact: &Artifact) -> String {
    let mut path = artifact.group_id().replace('.', "/");
    path.push('/');
    path.push_str(artifact.artifact_id());
    path.push('/');
    path.push_str(artifact.base_version());
    path.push('/');
    path.push_str(&artifact.file_name());
    path
}

fn remote_metadata_path(metadata: &Metadata) -> String {
    let mut path = metadata.group_id().replace('.', "/");
    if !metadata.artifact_id().is_empty() {
        path.push('/');
        path.push_str(metadata.artifact_id());
    }
    if !metadata.version().is_empty() {
        path.push('/');
        path.push_str(metadata.version());
    }
    path.push('/');
    path.push_str(metadata.kind());
    path
}

impl RemoteRepositoryFilter for PrefixesRemoteRepositoryFilter {
    fn accept_artifact(
        &self,
        repository: &RemoteRepository,
        artifact: &Artifact,
    ) -> FilterDecision {
        self.decide(repository, &remote_artifact_path(artifact), artifact)
    }

    fn accept_metadata(
        &self,
        repository: &RemoteRepository,
        metadata: &Metadata,
    ) -> FilterDecision {
        self.decide(repository, &remote_metadata_path(metadata), metadata)
    }
}
