//! Shared fixtures: an in-memory remote store and a snapshot-expanding
//! version resolver.

// Each integration test binary compiles its own view of this module and
// uses a different subset of it.
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use quarry::{
    Artifact, RemoteRepository, RepositoryConnector, RepositoryConnectorFactory, Session,
    TransferError, VersionResolver,
};
use quarry_types::{
    ArtifactDownload, ArtifactUpload, MetadataDownload, MetadataUpload, NoConnectorError,
    VersionRequest, VersionResolutionError, VersionResult,
};

/// Content-addressed bytes shared by all repositories of a test, with a
/// per-repository availability switch.
#[derive(Default)]
pub struct InMemoryStore {
    pub gets: AtomicUsize,
    pub puts: AtomicUsize,
    items: Mutex<HashMap<String, Vec<u8>>>,
    unavailable_repositories: Mutex<HashSet<String>>,
}

impl InMemoryStore {
    pub fn serving(items: &[(&str, &[u8])]) -> Arc<Self> {
        let store = Self::default();
        *store.items.lock().unwrap() = items
            .iter()
            .map(|(coords, bytes)| ((*coords).to_string(), bytes.to_vec()))
            .collect();
        Arc::new(store)
    }

    /// Marks a repository id as confirmed-absent for every item.
    pub fn mark_unavailable(&self, repository_id: &str) {
        self.unavailable_repositories
            .lock()
            .unwrap()
            .insert(repository_id.to_string());
    }

    pub fn stored(&self, coords: &str) -> Option<Vec<u8>> {
        self.items.lock().unwrap().get(coords).cloned()
    }

    fn fetch(&self, repository_id: &str, coords: &str) -> Result<Vec<u8>, TransferError> {
        if self.unavailable_repositories.lock().unwrap().contains(repository_id) {
            return Err(TransferError::NotFound {
                item: coords.to_string(),
                location: repository_id.to_string(),
            });
        }
        self.items
            .lock()
            .unwrap()
            .get(coords)
            .cloned()
            .ok_or_else(|| TransferError::NotFound {
                item: coords.to_string(),
                location: repository_id.to_string(),
            })
    }
}

struct StoreConnector {
    repository_id: String,
    store: Arc<InMemoryStore>,
}

impl RepositoryConnector for StoreConnector {
    fn get(&self, artifacts: &mut [ArtifactDownload], metadata: &mut [MetadataDownload]) {
        self.store.gets.fetch_add(1, Ordering::SeqCst);
        for download in artifacts.iter_mut() {
            match self.store.fetch(&self.repository_id, &download.artifact.to_string()) {
                Ok(bytes) => {
                    fs_err::create_dir_all(download.path.parent().unwrap()).unwrap();
                    fs_err::write(&download.path, bytes).unwrap();
                }
                Err(error) => download.error = Some(error),
            }
        }
        for download in metadata.iter_mut() {
            match self.store.fetch(&self.repository_id, &download.metadata.to_string()) {
                Ok(bytes) => {
                    fs_err::create_dir_all(download.path.parent().unwrap()).unwrap();
                    fs_err::write(&download.path, bytes).unwrap();
                }
                Err(error) => download.error = Some(error),
            }
        }
    }

    fn put(&self, artifacts: &mut [ArtifactUpload], metadata: &mut [MetadataUpload]) {
        self.store.puts.fetch_add(1, Ordering::SeqCst);
        let mut items = self.store.items.lock().unwrap();
        for upload in artifacts.iter() {
            items.insert(upload.artifact.to_string(), fs_err::read(&upload.path).unwrap());
        }
        for upload in metadata.iter() {
            items.insert(upload.metadata.to_string(), fs_err::read(&upload.path).unwrap());
        }
    }
}

pub struct StoreConnectorFactory(pub Arc<InMemoryStore>);

impl RepositoryConnectorFactory for StoreConnectorFactory {
    fn name(&self) -> &'static str {
        "in-memory-store"
    }

    fn new_connector(
        &self,
        _session: &Session,
        repository: &RemoteRepository,
    ) -> Result<Box<dyn RepositoryConnector>, NoConnectorError> {
        Ok(Box::new(StoreConnector {
            repository_id: repository.id().to_string(),
            store: Arc::clone(&self.0),
        }))
    }
}

/// Expands `-SNAPSHOT` versions to a fixed timestamped qualifier, the way a
/// real version resolver would from snapshot metadata.
pub struct TimestampingVersionResolver;

impl VersionResolver for TimestampingVersionResolver {
    fn resolve_version(
        &self,
        _session: &Session,
        request: &VersionRequest,
    ) -> Result<VersionResult, VersionResolutionError> {
        let version = request.artifact.version();
        let expanded = match version.strip_suffix("-SNAPSHOT") {
            Some(base) => format!("{base}-20200101.120000-3"),
            None => version.to_string(),
        };
        Ok(VersionResult {
            version: expanded,
            repository: None,
        })
    }
}

pub fn release_artifact(artifact_id: &str) -> Artifact {
    Artifact::new("org.example", artifact_id, "jar", "1.0")
}
