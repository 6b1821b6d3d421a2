//! The enhanced local repository manager: coordinate-tree layout, optional
//! prefix splitting, and origin tracking via sidecar files.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use quarry_types::session::ConfigProperties;
use quarry_types::{
    Artifact, LocalArtifactRegistration, LocalArtifactRequest, LocalArtifactResult,
    LocalMetadataRegistration, LocalMetadataRequest, LocalMetadataResult, LocalRepository,
    LocalRepositoryError, LocalRepositoryManager, Metadata, RemoteRepository, Session,
};

use crate::prefix::{composer_from_config, PathPrefixComposer};
use crate::tracking::TrackingFileManager;

/// Name of the per-directory tracking file; must not contain path separators
/// or `..`.
pub const CONFIG_TRACKING_FILENAME: &str = "quarry.enhancedLocalRepository.trackingFilename";
pub const DEFAULT_TRACKING_FILENAME: &str = "_remote.repositories";

/// The origin id under which a cached file is recorded: the remote id,
/// suffixed with the resolution context when one is set. The empty string
/// (absent repository) denotes "locally installed".
pub fn repository_key(repository: &RemoteRepository, context: &str) -> String {
    if context.is_empty() {
        repository.id().to_string()
    } else {
        format!("{}-{}", repository.id(), context)
    }
}

/// Maps artifacts and metadata to paths under a base directory and records
/// which origin(s) each cached file came from.
pub struct EnhancedLocalRepositoryManager {
    repository: LocalRepository,
    tracking: TrackingFileManager,
    tracking_filename: String,
    composer: Box<dyn PathPrefixComposer>,
}

impl EnhancedLocalRepositoryManager {
    pub fn new(basedir: impl Into<PathBuf>, config: &ConfigProperties) -> Self {
        let tracking_filename = validated_tracking_filename(config);
        Self {
            repository: LocalRepository::new(basedir),
            tracking: TrackingFileManager::new(),
            tracking_filename,
            composer: composer_from_config(config),
        }
    }

    pub fn basedir(&self) -> &Path {
        self.repository.basedir()
    }

    /// Absolute path a remote-origin artifact will be cached at.
    pub fn absolute_path_for_remote_artifact(
        &self,
        artifact: &Artifact,
        repository: &RemoteRepository,
        context: &str,
    ) -> PathBuf {
        self.basedir().join(self.path_for_remote_artifact(artifact, repository, context))
    }

    pub fn absolute_path_for_local_artifact(&self, artifact: &Artifact) -> PathBuf {
        self.basedir().join(self.path_for_local_artifact(artifact))
    }

    pub fn absolute_path_for_remote_metadata(
        &self,
        metadata: &Metadata,
        repository: &RemoteRepository,
        context: &str,
    ) -> PathBuf {
        self.basedir().join(self.path_for_remote_metadata(metadata, repository, context))
    }

    pub fn absolute_path_for_local_metadata(&self, metadata: &Metadata) -> PathBuf {
        self.basedir().join(self.path_for_local_metadata(metadata))
    }

    fn prefixed(&self, prefix: Option<String>, rel: PathBuf) -> PathBuf {
        match prefix {
            Some(prefix) => PathBuf::from(prefix).join(rel),
            None => rel,
        }
    }

    fn tracking_path_for(&self, file: &Path) -> PathBuf {
        match file.parent() {
            Some(parent) => parent.join(&self.tracking_filename),
            None => PathBuf::from(&self.tracking_filename),
        }
    }

    fn read_tracking(&self, file: &Path) -> BTreeMap<String, String> {
        let path = self.tracking_path_for(file);
        match self.tracking.read(&path) {
            Ok(entries) => entries,
            Err(err) => {
                warn!("failed to read tracking file {}: {err}", path.display());
                BTreeMap::new()
            }
        }
    }

    /// The availability decision for an existing cached file, per the
    /// tracking file next to it.
    fn check_availability(
        &self,
        session: &Session,
        file: &Path,
        request: &LocalArtifactRequest,
        result: &mut LocalArtifactResult,
    ) {
        let entries = self.read_tracking(file);
        let file_name = file
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        // Locally installed wins outright.
        if entries.contains_key(&format!("{file_name}>")) {
            result.available = true;
            return;
        }

        for remote in &request.repositories {
            let key = format!("{file_name}>{}", repository_key(remote, &request.context));
            if entries.contains_key(&key) {
                result.available = true;
                result.repository = Some(remote.clone());
                return;
            }
        }

        if !is_tracked(&entries, &file_name) {
            // Interop with caches written without tracking: treat the file as
            // locally installed, unless a repository filter is in effect, in
            // which case unattributed files must not pass it by.
            result.available = session.remote_repository_filter().is_none();
        }
    }
}

fn is_tracked(entries: &BTreeMap<String, String>, file_name: &str) -> bool {
    let prefix = format!("{file_name}>");
    entries.keys().any(|key| {
        key.starts_with(&prefix)
            && !key.ends_with(":lastUpdated")
            && !key.ends_with(":lastError")
    })
}

fn validated_tracking_filename(config: &ConfigProperties) -> String {
    let name = config.get_str(CONFIG_TRACKING_FILENAME, DEFAULT_TRACKING_FILENAME);
    if name.is_empty() || name.contains('/') || name.contains('\\') || name.contains("..") {
        warn!("invalid tracking filename {name:?}, using {DEFAULT_TRACKING_FILENAME}");
        DEFAULT_TRACKING_FILENAME.to_string()
    } else {
        name.to_string()
    }
}

fn artifact_rel_path(artifact: &Artifact, file_name: String) -> PathBuf {
    let mut path = PathBuf::new();
    for segment in artifact.group_id().split('.').filter(|s| !s.is_empty()) {
        path.push(segment);
    }
    path.push(artifact.artifact_id());
    path.push(artifact.base_version());
    path.push(file_name);
    path
}

fn metadata_rel_path(metadata: &Metadata, file_name: String) -> PathBuf {
    let mut path = PathBuf::new();
    for segment in metadata.group_id().split('.').filter(|s| !s.is_empty()) {
        path.push(segment);
    }
    if !metadata.artifact_id().is_empty() {
        path.push(metadata.artifact_id());
    }
    if !metadata.version().is_empty() {
        path.push(metadata.version());
    }
    path.push(file_name);
    path
}

/// `versions.meta` cached from `central` becomes `versions-central.meta`, so
/// copies from different origins never collide.
fn insert_repository_key(kind: &str, key: &str) -> String {
    match kind.rfind('.') {
        Some(dot) => format!("{}-{}{}", &kind[..dot], key, &kind[dot..]),
        None => format!("{kind}-{key}"),
    }
}

impl LocalRepositoryManager for EnhancedLocalRepositoryManager {
    fn repository(&self) -> &LocalRepository {
        &self.repository
    }

    fn path_for_local_artifact(&self, artifact: &Artifact) -> PathBuf {
        self.prefixed(
            self.composer.prefix_for_local_artifact(artifact),
            artifact_rel_path(artifact, artifact.base_file_name()),
        )
    }

    fn path_for_remote_artifact(
        &self,
        artifact: &Artifact,
        repository: &RemoteRepository,
        _context: &str,
    ) -> PathBuf {
        self.prefixed(
            self.composer.prefix_for_remote_artifact(artifact, repository),
            artifact_rel_path(artifact, artifact.file_name()),
        )
    }

    fn path_for_local_metadata(&self, metadata: &Metadata) -> PathBuf {
        self.prefixed(
            self.composer.prefix_for_local_metadata(metadata),
            metadata_rel_path(metadata, metadata.kind().to_string()),
        )
    }

    fn path_for_remote_metadata(
        &self,
        metadata: &Metadata,
        repository: &RemoteRepository,
        context: &str,
    ) -> PathBuf {
        let file_name =
            insert_repository_key(metadata.kind(), &repository_key(repository, context));
        self.prefixed(
            self.composer.prefix_for_remote_metadata(metadata, repository),
            metadata_rel_path(metadata, file_name),
        )
    }

    fn find_artifact(
        &self,
        session: &Session,
        request: &LocalArtifactRequest,
    ) -> LocalArtifactResult {
        let mut result = LocalArtifactResult::default();
        let artifact = &request.artifact;

        let mut candidates = Vec::new();
        // Timestamped snapshots are never looked up as locally installed.
        if artifact.version() == artifact.base_version() {
            candidates.push(self.absolute_path_for_local_artifact(artifact));
        }
        for remote in &request.repositories {
            let path = self.absolute_path_for_remote_artifact(artifact, remote, &request.context);
            if !candidates.contains(&path) {
                candidates.push(path);
            }
        }

        for path in candidates {
            if path.is_file() {
                result.path = Some(path.clone());
                self.check_availability(session, &path, request, &mut result);
                break;
            }
        }
        result
    }

    fn add_artifact(
        &self,
        _session: &Session,
        registration: &LocalArtifactRegistration,
    ) -> Result<(), LocalRepositoryError> {
        let artifact = &registration.artifact;
        let file = match &registration.repository {
            None => self.absolute_path_for_local_artifact(artifact),
            Some(remote) => self.absolute_path_for_remote_artifact(artifact, remote, ""),
        };
        let file_name = file
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        let mut updates: BTreeMap<String, Option<String>> = BTreeMap::new();
        match &registration.repository {
            None => {
                updates.insert(format!("{file_name}>"), Some(String::new()));
            }
            Some(remote) => {
                if registration.contexts.is_empty() {
                    updates.insert(
                        format!("{file_name}>{}", repository_key(remote, "")),
                        Some(String::new()),
                    );
                }
                for context in &registration.contexts {
                    updates.insert(
                        format!("{file_name}>{}", repository_key(remote, context)),
                        Some(String::new()),
                    );
                }
            }
        }

        let tracking_path = self.tracking_path_for(&file);
        debug!("registering {artifact} in {}", tracking_path.display());
        self.tracking
            .update(&tracking_path, &updates)
            .map(|_| ())
            .map_err(|source| LocalRepositoryError::Tracking {
                path: tracking_path.display().to_string(),
                source,
            })
    }

    fn find_metadata(
        &self,
        _session: &Session,
        request: &LocalMetadataRequest,
    ) -> LocalMetadataResult {
        let path = match &request.repository {
            None => self.absolute_path_for_local_metadata(&request.metadata),
            Some(remote) => {
                self.absolute_path_for_remote_metadata(&request.metadata, remote, &request.context)
            }
        };
        let mut result = LocalMetadataResult::default();
        if path.is_file() {
            result.path = Some(path);
        }
        result
    }

    fn add_metadata(
        &self,
        _session: &Session,
        registration: &LocalMetadataRegistration,
    ) -> Result<(), LocalRepositoryError> {
        // Metadata copies are already partitioned per origin by their file
        // name; there is nothing further to track.
        debug!("registered metadata {}", registration.metadata);
        Ok(())
    }
}
