//! The artifact and metadata resolution pipelines.
//!
//! Batches of requests come in; every request resolves independently against
//! its candidate remotes, accumulating per-remote failures instead of
//! aborting siblings. Cache mutations run under the named-lock sync context,
//! upgraded from shared to exclusive only when a download is actually needed.

pub mod artifact;
pub mod connector_provider;
pub mod filter;
pub mod metadata;
pub mod policies;
pub mod postprocessor;
pub mod prioritized;

pub use artifact::{
    ArtifactResolver, ResolveError, CONFIG_SIMPLE_LRM_INTEROP, CONFIG_SNAPSHOT_NORMALIZATION,
};
pub use connector_provider::RepositoryConnectorProvider;
pub use filter::PrefixesRemoteRepositoryFilter;
pub use metadata::{MetadataResolver, CONFIG_METADATA_THREADS};
pub use policies::{
    ChecksumPolicyProvider, OfflineController, CONFIG_OFFLINE_PROTOCOLS,
};
pub use postprocessor::TrustedChecksumsPostProcessor;
pub use prioritized::{PrioritizedComponents, CONFIG_USE_INSERTION_ORDER};

#[cfg(test)]
pub(crate) mod testing {
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use quarry_types::{
        Artifact, ArtifactDownload, ArtifactUpload, LocalArtifactRegistration,
        LocalArtifactRequest, LocalArtifactResult, LocalMetadataRegistration,
        LocalMetadataRequest, LocalMetadataResult, LocalRepository, LocalRepositoryError,
        LocalRepositoryManager, Metadata, MetadataDownload, MetadataUpload, NoConnectorError,
        RemoteRepository, RepositoryConnector, RepositoryConnectorFactory, RepositoryRef, Session,
        TransferError, VersionRequest, VersionResolutionError, VersionResolver, VersionResult,
    };

    /// A local repository manager stub for tests that only exercise path
    /// mapping and never touch the disk.
    pub(crate) struct PathOnlyManager(pub(crate) LocalRepository);

    impl LocalRepositoryManager for PathOnlyManager {
        fn repository(&self) -> &LocalRepository {
            &self.0
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

    pub(crate) fn path_only_session() -> Session {
        Session::builder(Arc::new(PathOnlyManager(LocalRepository::new("/tmp")))).build()
    }

    /// Echoes the requested version back, i.e. resolves nothing but succeeds.
    pub(crate) struct StaticVersionResolver {
        pub(crate) repository: Option<RepositoryRef>,
    }

    impl VersionResolver for StaticVersionResolver {
        fn resolve_version(
            &self,
            _session: &Session,
            request: &VersionRequest,
        ) -> Result<VersionResult, VersionResolutionError> {
            Ok(VersionResult {
                version: request.artifact.version().to_string(),
                repository: self.repository.clone(),
            })
        }
    }

    /// Serves fixed bytes per coordinate string and counts `get` batches.
    #[derive(Default)]
    pub(crate) struct RecordingConnector {
        pub(crate) gets: AtomicUsize,
        pub(crate) contents: Mutex<Vec<(String, Vec<u8>)>>,
        pub(crate) missing_items: Mutex<Vec<String>>,
    }

    impl RecordingConnector {
        pub(crate) fn serving(items: &[(&str, &[u8])]) -> Arc<Self> {
            let connector = Self::default();
            *connector.contents.lock().unwrap() = items
                .iter()
                .map(|(coords, bytes)| ((*coords).to_string(), bytes.to_vec()))
                .collect();
            Arc::new(connector)
        }

        fn lookup(&self, coords: &str) -> Option<Vec<u8>> {
            self.contents
                .lock()
                .unwrap()
                .iter()
                .find(|(key, _)| key == coords)
                .map(|(_, bytes)| bytes.clone())
        }
    }

    /// Wraps the shared handle so the orphan rule is satisfied: the trait and
    /// `Arc` are both foreign to this crate, but this newtype is local.
    pub(crate) struct RecordingConnectorHandle(pub(crate) Arc<RecordingConnector>);

    impl RepositoryConnector for RecordingConnectorHandle {
        fn get(&self, artifacts: &mut [ArtifactDownload], metadata: &mut [MetadataDownload]) {
            self.0.gets.fetch_add(1, Ordering::SeqCst);
            for download in artifacts.iter_mut() {
                match self.0.lookup(&download.artifact.to_string()) {
                    Some(bytes) => {
                        fs_err::create_dir_all(download.path.parent().unwrap()).unwrap();
                        fs_err::write(&download.path, bytes).unwrap();
                    }
                    None => {
                        self.0.missing_items.lock().unwrap().push(download.artifact.to_string());
                        download.error = Some(TransferError::NotFound {
                            item: download.artifact.to_string(),
                            location: "stub".to_string(),
                        });
                    }
                }
            }
            for download in metadata.iter_mut() {
                match self.0.lookup(&download.metadata.to_string()) {
                    Some(bytes) => {
                        fs_err::create_dir_all(download.path.parent().unwrap()).unwrap();
                        fs_err::write(&download.path, bytes).unwrap();
                    }
                    None => {
                        download.error = Some(TransferError::NotFound {
                            item: download.metadata.to_string(),
                            location: "stub".to_string(),
                        });
                    }
                }
            }
        }

        fn put(&self, _artifacts: &mut [ArtifactUpload], _metadata: &mut [MetadataUpload]) {}
    }

    pub(crate) struct RecordingConnectorFactory(pub(crate) Arc<RecordingConnector>);

    impl RepositoryConnectorFactory for RecordingConnectorFactory {
        fn name(&self) -> &'static str {
            "recording"
        }

        fn new_connector(
            &self,
            _session: &Session,
            _repository: &RemoteRepository,
        ) -> Result<Box<dyn RepositoryConnector>, NoConnectorError> {
            Ok(Box::new(RecordingConnectorHandle(Arc::clone(&self.0))))
        }
    }
}
