use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;

use crate::traits::{
    LocalRepositoryManager, RemoteRepositoryFilter, RepositoryListener, WorkspaceReader,
};

/// Typed view over the session's string-keyed configuration bag.
#[derive(Debug, Clone, Default)]
pub struct ConfigProperties {
    entries: BTreeMap<String, String>,
}

impl ConfigProperties {
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(key.into(), value.into());
    }

    pub fn get_str<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.entries.get(key).map_or(default, String::as_str)
    }

    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        match self.entries.get(key).map(String::as_str) {
            Some("true") | Some("1") => true,
            Some("false") | Some("0") => false,
            Some(other) => {
                tracing::warn!("ignoring malformed boolean config {key}={other}");
                default
            }
            None => default,
        }
    }

    pub fn get_usize(&self, key: &str, default: usize) -> usize {
        match self.entries.get(key).map(|value| value.parse()) {
            Some(Ok(parsed)) => parsed,
            Some(Err(_)) => {
                tracing::warn!("ignoring malformed integer config {key}");
                default
            }
            None => default,
        }
    }

    /// Parses a float; `nan` is a meaningful value (it disables a prioritized
    /// component), so parse failures are distinguished from it.
    pub fn get_f32(&self, key: &str) -> Option<f32> {
        let raw = self.entries.get(key)?;
        match raw.parse() {
            Ok(parsed) => Some(parsed),
            Err(_) => {
                tracing::warn!("ignoring malformed float config {key}={raw}");
                None
            }
        }
    }
}

/// Thread-safe per-session scratch space. `compute_if_absent` builds
/// session-scoped singletons exactly once.
#[derive(Default)]
pub struct SessionData {
    map: DashMap<String, Arc<dyn Any + Send + Sync>>,
}

impl SessionData {
    pub fn get<T: Send + Sync + 'static>(&self, key: &str) -> Option<Arc<T>> {
        let value = self.map.get(key)?.clone();
        value.downcast().ok()
    }

    pub fn set<T: Send + Sync + 'static>(&self, key: impl Into<String>, value: T) {
        self.map.insert(key.into(), Arc::new(value));
    }

    pub fn compute_if_absent<T: Send + Sync + 'static>(
        &self,
        key: &str,
        init: impl FnOnce() -> T,
    ) -> Arc<T> {
        let value = self
            .map
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(init()) as Arc<dyn Any + Send + Sync>)
            .clone();
        value
            .downcast()
            .unwrap_or_else(|_| panic!("session data key {key} holds a value of a different type"))
    }
}

/// Governs when cached per-origin failures suppress a re-attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolutionErrorPolicy {
    /// Cache "remote confirmed absent" outcomes until the update policy
    /// expires them.
    pub cache_not_found: bool,
    /// Cache transient transfer failures the same way.
    pub cache_transfer_errors: bool,
}

impl Default for ResolutionErrorPolicy {
    fn default() -> Self {
        Self {
            cache_not_found: true,
            cache_transfer_errors: false,
        }
    }
}

struct NoopListener;

impl RepositoryListener for NoopListener {}

/// A configuration bundle created once and used for many requests.
///
/// Sessions are cheap to share by reference across threads; all interior
/// state (the data map) is concurrent.
pub struct Session {
    offline: bool,
    update_policy: Option<String>,
    metadata_update_policy: Option<String>,
    checksum_policy: Option<String>,
    error_policy: ResolutionErrorPolicy,
    config: ConfigProperties,
    data: SessionData,
    local_repository_manager: Arc<dyn LocalRepositoryManager>,
    workspace_reader: Option<Arc<dyn WorkspaceReader>>,
    remote_repository_filter: Option<Arc<dyn RemoteRepositoryFilter>>,
    listener: Arc<dyn RepositoryListener>,
}

impl Session {
    pub fn builder(local_repository_manager: Arc<dyn LocalRepositoryManager>) -> SessionBuilder {
        SessionBuilder {
            offline: false,
            update_policy: None,
            metadata_update_policy: None,
            checksum_policy: None,
            error_policy: ResolutionErrorPolicy::default(),
            config: ConfigProperties::default(),
            local_repository_manager,
            workspace_reader: None,
            remote_repository_filter: None,
            listener: None,
        }
    }

    pub fn is_offline(&self) -> bool {
        self.offline
    }

    /// Session-wide artifact update policy; overrides per-remote values
    /// during resolution when set.
    pub fn update_policy(&self) -> Option<&str> {
        self.update_policy.as_deref()
    }

    pub fn metadata_update_policy(&self) -> Option<&str> {
        self.metadata_update_policy.as_deref()
    }

    pub fn checksum_policy(&self) -> Option<&str> {
        self.checksum_policy.as_deref()
    }

    pub fn error_policy(&self) -> ResolutionErrorPolicy {
        self.error_policy
    }

    pub fn config(&self) -> &ConfigProperties {
        &self.config
    }

    pub fn data(&self) -> &SessionData {
        &self.data
    }

    pub fn local_repository_manager(&self) -> &Arc<dyn LocalRepositoryManager> {
        &self.local_repository_manager
    }

    pub fn workspace_reader(&self) -> Option<&Arc<dyn WorkspaceReader>> {
        self.workspace_reader.as_ref()
    }

    /// The filter restricting which remotes may serve which items. Its mere
    /// presence also disables the untracked-file interop fallback of the
    /// local repository manager.
    pub fn remote_repository_filter(&self) -> Option<&Arc<dyn RemoteRepositoryFilter>> {
        self.remote_repository_filter.as_ref()
    }

    pub fn listener(&self) -> &Arc<dyn RepositoryListener> {
        &self.listener
    }
}

/// Builder for [`Session`]; fills in the no-op listener and default error
/// policy when not customized.
pub struct SessionBuilder {
    offline: bool,
    update_policy: Option<String>,
    metadata_update_policy: Option<String>,
    checksum_policy: Option<String>,
    error_policy: ResolutionErrorPolicy,
    config: ConfigProperties,
    local_repository_manager: Arc<dyn LocalRepositoryManager>,
    workspace_reader: Option<Arc<dyn WorkspaceReader>>,
    remote_repository_filter: Option<Arc<dyn RemoteRepositoryFilter>>,
    listener: Option<Arc<dyn RepositoryListener>>,
}

impl SessionBuilder {
    #[must_use]
    pub fn offline(mut self, offline: bool) -> Self {
        self.offline = offline;
        self
    }

    #[must_use]
    pub fn update_policy(mut self, policy: impl Into<String>) -> Self {
        self.update_policy = Some(policy.into());
        self
    }

    #[must_use]
    pub fn metadata_update_policy(mut self, policy: impl Into<String>) -> Self {
        self.metadata_update_policy = Some(policy.into());
        self
    }

    #[must_use]
    pub fn checksum_policy(mut self, policy: impl Into<String>) -> Self {
        self.checksum_policy = Some(policy.into());
        self
    }

    #[must_use]
    pub fn error_policy(mut self, policy: ResolutionErrorPolicy) -> Self {
        self.error_policy = policy;
        self
    }

    #[must_use]
    pub fn config(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.set(key, value);
        self
    }

    /// Replaces the whole configuration bag, e.g. with the one the local
    /// repository manager was built from.
    #[must_use]
    pub fn config_properties(mut self, config: ConfigProperties) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn workspace_reader(mut self, reader: Arc<dyn WorkspaceReader>) -> Self {
        self.workspace_reader = Some(reader);
        self
    }

    #[must_use]
    pub fn remote_repository_filter(mut self, filter: Arc<dyn RemoteRepositoryFilter>) -> Self {
        self.remote_repository_filter = Some(filter);
        self
    }

    #[must_use]
    pub fn listener(mut self, listener: Arc<dyn RepositoryListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn build(self) -> Session {
        Session {
            offline: self.offline,
            update_policy: self.update_policy,
            metadata_update_policy: self.metadata_update_policy,
            checksum_policy: self.checksum_policy,
            error_policy: self.error_policy,
            config: self.config,
            data: SessionData::default(),
            local_repository_manager: self.local_repository_manager,
            workspace_reader: self.workspace_reader,
            remote_repository_filter: self.remote_repository_filter,
            listener: self.listener.unwrap_or_else(|| Arc::new(NoopListener)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::artifact::Artifact;
    use crate::error::LocalRepositoryError;
    use crate::metadata::Metadata;
    use crate::repository::{LocalRepository, RemoteRepository};
    use crate::request::{
        LocalArtifactRegistration, LocalArtifactRequest, LocalArtifactResult,
        LocalMetadataRegistration, LocalMetadataRequest, LocalMetadataResult,
    };

    struct StubManager {
        repository: LocalRepository,
    }

    impl LocalRepositoryManager for StubManager {
        fn repository(&self) -> &LocalRepository {
            &self.repository
        }

        fn path_for_local_artifact(&self, artifact: &Artifact) -> PathBuf {
            PathBuf::from(artifact.file_name())
        }

        fn path_for_remote_artifact(
            &self,
            artifact: &Artifact,
            _repository: &RemoteRepository,
            _context: &str,
        ) -> PathBuf {
            PathBuf::from(artifact.file_name())
        }

        fn path_for_local_metadata(&self, metadata: &Metadata) -> PathBuf {
            PathBuf::from(metadata.kind())
        }

        fn path_for_remote_metadata(
            &self,
            metadata: &Metadata,
            _repository: &RemoteRepository,
            _context: &str,
        ) -> PathBuf {
            PathBuf::from(metadata.kind())
        }

        fn find_artifact(
            &self,
            _session: &Session,
            _request: &LocalArtifactRequest,
        ) -> LocalArtifactResult {
            LocalArtifactResult::default()
        }

        fn add_artifact(
            &self,
            _session: &Session,
            _registration: &LocalArtifactRegistration,
        ) -> Result<(), LocalRepositoryError> {
            Ok(())
        }

        fn find_metadata(
            &self,
            _session: &Session,
            _request: &LocalMetadataRequest,
        ) -> LocalMetadataResult {
            LocalMetadataResult::default()
        }

        fn add_metadata(
            &self,
            _session: &Session,
            _registration: &LocalMetadataRegistration,
        ) -> Result<(), LocalRepositoryError> {
            Ok(())
        }
    }

    fn stub_session() -> Session {
        Session::builder(Arc::new(StubManager {
            repository: LocalRepository::new("/tmp/repo"),
        }))
        .build()
    }

    #[test]
    fn config_typed_getters() {
        let session = stub_session();
        assert!(!session.config().get_bool("missing", false));

        let session = Session::builder(session.local_repository_manager().clone())
            .config("flag", "true")
            .config("threads", "8")
            .config("priority", "nan")
            .build();
        assert!(session.config().get_bool("flag", false));
        assert_eq!(session.config().get_usize("threads", 4), 8);
        assert!(session.config().get_f32("priority").is_some_and(f32::is_nan));
    }

    #[test]
    fn session_data_singleton() {
        let session = stub_session();
        let built = AtomicUsize::new(0);
        for _ in 0..3 {
            let value: Arc<Vec<u32>> = session.data().compute_if_absent("key", || {
                built.fetch_add(1, Ordering::SeqCst);
                vec![1, 2, 3]
            });
            assert_eq!(*value, vec![1, 2, 3]);
        }
        assert_eq!(built.load(Ordering::SeqCst), 1);
    }
}
