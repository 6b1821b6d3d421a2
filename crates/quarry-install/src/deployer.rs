//! Uploads locally produced artifacts and metadata to a remote repository,
//! staging metadata merges through the local cache.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::debug;

use quarry_fs::PathProcessor;
use quarry_locks::SyncContextFactory;
use quarry_resolver::{prioritized, RepositoryConnectorProvider};
use quarry_types::{
    ArtifactUpload, DeployRequest, DeployResult, LocalRepositoryManager, Metadata,
    MetadataDownload, MetadataGenerator, MetadataGeneratorFactory, MetadataUpload,
    RemoteRepository, RepositoryConnector, Session, TransferError,
};

use crate::error::DeployError;

pub struct Deployer {
    connector_provider: Arc<RepositoryConnectorProvider>,
    generator_factories: Vec<Arc<dyn MetadataGeneratorFactory>>,
    sync_factory: Arc<SyncContextFactory>,
    fs: PathProcessor,
}

impl Deployer {
    pub fn new(
        connector_provider: Arc<RepositoryConnectorProvider>,
        generator_factories: Vec<Arc<dyn MetadataGeneratorFactory>>,
        sync_factory: Arc<SyncContextFactory>,
    ) -> Self {
        Self {
            connector_provider,
            generator_factories,
            sync_factory,
            fs: PathProcessor::new(),
        }
    }

    pub fn deploy(
        &self,
        session: &Session,
        request: DeployRequest,
    ) -> Result<DeployResult, DeployError> {
        let connector = self.connector_provider.new_connector(session, &request.repository)?;
        let mut generators = self.create_generators(session, &request);

        let mut artifacts = request.artifacts.clone();
        let mut prepared: Vec<Metadata> = Vec::new();
        for generator in &mut generators {
            prepared.extend(generator.prepare(&artifacts));
        }

        let mut result = DeployResult::default();

        {
            let mut context = self.sync_factory.new_context(session, false);
            let mut locked_metadata = prepared.clone();
            locked_metadata.extend(request.metadata.iter().cloned());
            context.acquire(&request.artifacts, &locked_metadata)?;

            // Prepared metadata goes first: it may announce the coordinates
            // the artifact uploads are about to occupy.
            for metadata in &prepared {
                result
                    .metadata
                    .push(self.upload_metadata(session, connector.as_ref(), &request, metadata)?);
            }

            let mut uploads: Vec<ArtifactUpload> = Vec::new();
            for artifact in &mut artifacts {
                let mut transformed = artifact.clone();
                for generator in &mut generators {
                    transformed = generator.transform_artifact(transformed);
                }
                let path = transformed
                    .path()
                    .ok_or_else(|| DeployError::NoFile {
                        item: transformed.to_string(),
                    })?
                    .to_path_buf();
                session.listener().artifact_deploying(&transformed, &request.repository);
                uploads.push(ArtifactUpload::new(transformed.clone(), path));
                *artifact = transformed;
            }
            connector.put(&mut uploads, &mut []);
            for upload in uploads {
                if let Some(error) = upload.error {
                    return Err(DeployError::Transfer(error));
                }
                session.listener().artifact_deployed(&upload.artifact, &request.repository);
                result.artifacts.push(upload.artifact);
            }

            for metadata in &request.metadata {
                result
                    .metadata
                    .push(self.upload_metadata(session, connector.as_ref(), &request, metadata)?);
            }
        }

        // Finalizer metadata is produced only after the artifacts are up, and
        // gets its own acquisition round.
        let mut finished: Vec<Metadata> = Vec::new();
        for generator in &mut generators {
            finished.extend(generator.finish(&artifacts));
        }
        if !finished.is_empty() {
            let mut context = self.sync_factory.new_context(session, false);
            context.acquire(&[], &finished)?;
            for metadata in &finished {
                result
                    .metadata
                    .push(self.upload_metadata(session, connector.as_ref(), &request, metadata)?);
            }
        }

        Ok(result)
    }

    fn create_generators(
        &self,
        session: &Session,
        request: &DeployRequest,
    ) -> Vec<Box<dyn MetadataGenerator>> {
        let ordered = prioritized::cached(
            session,
            "deployGenerators",
            &self.generator_factories,
            |factory| factory.name(),
            MetadataGeneratorFactory::priority,
        );
        ordered
            .enabled()
            .filter_map(|factory| factory.new_deploy_generator(session, request))
            .collect()
    }

    /// Uploads one metadata document. Mergeable metadata is first refreshed
    /// from the remote into the local staging path and merged there, so the
    /// upload never clobbers concurrent publications.
    fn upload_metadata(
        &self,
        session: &Session,
        connector: &dyn RepositoryConnector,
        request: &DeployRequest,
        metadata: &Metadata,
    ) -> Result<Metadata, DeployError> {
        let repository = &request.repository;
        let staging = self.staging_path(session, metadata, repository);
        session.listener().metadata_deploying(metadata, repository);

        if let Some(merger) = metadata.merger() {
            self.refresh_staging(connector, metadata, &staging)?;
            let existing = staging.is_file().then_some(staging.as_path());
            merger.merge(existing, &staging)?;
        } else {
            let source = metadata.path().ok_or_else(|| DeployError::NoFile {
                item: metadata.to_string(),
            })?;
            if source != staging {
                self.fs.copy(source, &staging).map_err(|source| DeployError::Io {
                    item: metadata.to_string(),
                    source,
                })?;
            }
        }

        let mut uploads = [MetadataUpload::new(metadata.clone(), staging.clone())];
        connector.put(&mut [], &mut uploads);
        let [upload] = uploads;
        if let Some(error) = upload.error {
            return Err(DeployError::Transfer(error));
        }

        session.local_repository_manager().add_metadata(
            session,
            &quarry_types::LocalMetadataRegistration {
                metadata: metadata.clone(),
                repository: Some(repository.clone()),
                context: String::new(),
            },
        )?;
        session.listener().metadata_deployed(metadata, repository);
        Ok(metadata.clone().with_path(staging))
    }

    /// Pulls the current remote rendition into the staging path. A missing
    /// remote copy clears any stale staging file; any other failure aborts
    /// the deploy.
    fn refresh_staging(
        &self,
        connector: &dyn RepositoryConnector,
        metadata: &Metadata,
        staging: &std::path::Path,
    ) -> Result<(), DeployError> {
        let mut downloads = [MetadataDownload::new(metadata.clone(), staging.to_path_buf())];
        connector.get(&mut [], &mut downloads);
        let [download] = downloads;
        match download.error {
            None => Ok(()),
            Some(TransferError::NotFound { .. }) => {
                if staging.is_file() {
                    debug!("remote has no {metadata}, clearing staging copy");
                    fs_err::remove_file(staging).map_err(|source| DeployError::Io {
                        item: metadata.to_string(),
                        source,
                    })?;
                }
                Ok(())
            }
            Some(error) => Err(DeployError::Transfer(error)),
        }
    }

    fn staging_path(
        &self,
        session: &Session,
        metadata: &Metadata,
        repository: &RemoteRepository,
    ) -> PathBuf {
        let manager = session.local_repository_manager();
        let rel = manager.path_for_remote_metadata(metadata, repository, "");
        manager.repository().basedir().join(rel)
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use anyhow::Result;

    use quarry_cache::EnhancedLocalRepositoryManager;
    use quarry_types::session::ConfigProperties;
    use quarry_types::{
        Artifact, ArtifactDownload, MetadataMergeError, MetadataMerger, Nature, NoConnectorError,
        RepositoryConnectorFactory,
    };

    use super::*;

    /// Stores uploads keyed by coordinates; serves stored metadata back.
    #[derive(Default)]
    struct InMemoryRemote {
        puts: AtomicUsize,
        stored: Mutex<Vec<(String, Vec<u8>)>>,
        metadata_error: Mutex<Option<TransferError>>,
    }

    /// Wraps the shared handle so the orphan rule is satisfied: the trait and
    /// `Arc` are both foreign to this crate, but this newtype is local.
    struct InMemoryRemoteHandle(Arc<InMemoryRemote>);

    impl RepositoryConnector for InMemoryRemoteHandle {
        fn get(&self, _artifacts: &mut [ArtifactDownload], metadata: &mut [MetadataDownload]) {
            for download in metadata.iter_mut() {
                if let Some(error) = self.0.metadata_error.lock().unwrap().clone() {
                    download.error = Some(error);
                    continue;
                }
                let stored = self.0.stored.lock().unwrap();
                match stored.iter().find(|(key, _)| *key == download.metadata.to_string()) {
                    Some((_, bytes)) => {
                        fs_err::create_dir_all(download.path.parent().unwrap()).unwrap();
                        fs_err::write(&download.path, bytes).unwrap();
                    }
                    None => {
                        download.error = Some(TransferError::NotFound {
                            item: download.metadata.to_string(),
                            location: "memory".into(),
                        });
                    }
                }
            }
        }

        fn put(&self, artifacts: &mut [ArtifactUpload], metadata: &mut [MetadataUpload]) {
            self.0.puts.fetch_add(1, Ordering::SeqCst);
            let mut stored = self.0.stored.lock().unwrap();
            for upload in artifacts.iter() {
                stored.push((
                    upload.artifact.to_string(),
                    fs_err::read(&upload.path).unwrap(),
                ));
            }
            for upload in metadata.iter() {
                stored.push((
                    upload.metadata.to_string(),
                    fs_err::read(&upload.path).unwrap(),
                ));
            }
        }
    }

    struct InMemoryRemoteFactory(Arc<InMemoryRemote>);

    impl RepositoryConnectorFactory for InMemoryRemoteFactory {
        fn name(&self) -> &'static str {
            "in-memory"
        }

        fn new_connector(
            &self,
            _session: &Session,
            _repository: &RemoteRepository,
        ) -> Result<Box<dyn RepositoryConnector>, NoConnectorError> {
            Ok(Box::new(InMemoryRemoteHandle(Arc::clone(&self.0))))
        }
    }

    fn cache_session(dir: &Path) -> Session {
        Session::builder(Arc::new(EnhancedLocalRepositoryManager::new(
            dir.join("repo"),
            &ConfigProperties::default(),
        )))
        .build()
    }

    fn deployer(remote: &Arc<InMemoryRemote>) -> Deployer {
        Deployer::new(
            Arc::new(RepositoryConnectorProvider::new(vec![Arc::new(
                InMemoryRemoteFactory(Arc::clone(remote)),
            )])),
            Vec::new(),
            Arc::new(SyncContextFactory::new()),
        )
    }

    #[test]
    fn deploys_artifact_bytes() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let session = cache_session(dir.path());
        let remote = Arc::new(InMemoryRemote::default());
        let deployer = deployer(&remote);

        let source = dir.path().join("a-1.0.jar");
        fs_err::write(&source, b"deployed-bytes")?;
        let artifact = Artifact::new("g", "a", "jar", "1.0").with_path(&source);

        let result = deployer.deploy(
            &session,
            DeployRequest::new(RemoteRepository::new("releases", "https://deploy/"))
                .with_artifact(artifact),
        )?;

        assert_eq!(result.artifacts.len(), 1);
        let stored = remote.stored.lock().unwrap();
        assert_eq!(stored[0].0, "g:a:jar:1.0");
        assert_eq!(stored[0].1, b"deployed-bytes");
        Ok(())
    }

    #[test]
    fn artifact_without_file_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let session = cache_session(dir.path());
        let remote = Arc::new(InMemoryRemote::default());
        let deployer = deployer(&remote);

        let err = deployer
            .deploy(
                &session,
                DeployRequest::new(RemoteRepository::new("releases", "https://deploy/"))
                    .with_artifact(Artifact::new("g", "a", "jar", "1.0")),
            )
            .unwrap_err();
        assert!(matches!(err, DeployError::NoFile { .. }));
    }

    #[test]
    fn mergeable_metadata_folds_in_remote_state() -> Result<()> {
        struct AppendMerger;
        impl MetadataMerger for AppendMerger {
            fn merge(
                &self,
                existing: Option<&Path>,
                target: &Path,
            ) -> Result<(), MetadataMergeError> {
                let mut content = match existing {
                    Some(path) => fs_err::read(path).unwrap_or_default(),
                    None => Vec::new(),
                };
                content.extend_from_slice(b"+local");
                fs_err::create_dir_all(target.parent().unwrap()).ok();
                fs_err::write(target, content).map_err(|err| MetadataMergeError {
                    name: "versions.meta".into(),
                    reason: err.to_string(),
                })
            }
        }

        let dir = tempfile::tempdir()?;
        let session = cache_session(dir.path());
        let remote = Arc::new(InMemoryRemote::default());
        remote
            .stored
            .lock()
            .unwrap()
            .push(("g:a:/versions.meta".to_string(), b"remote".to_vec()));
        let deployer = deployer(&remote);

        let metadata = Metadata::new("g", "a", "", "versions.meta", Nature::Release)
            .with_merger(Arc::new(AppendMerger));
        deployer.deploy(
            &session,
            DeployRequest::new(RemoteRepository::new("releases", "https://deploy/"))
                .with_metadata(metadata),
        )?;

        let stored = remote.stored.lock().unwrap();
        let uploaded = stored.iter().rfind(|(key, _)| key == "g:a:/versions.meta").unwrap();
        assert_eq!(uploaded.1, b"remote+local");
        Ok(())
    }

    #[test]
    fn missing_remote_metadata_clears_staging() -> Result<()> {
        struct OverwriteMerger;
        impl MetadataMerger for OverwriteMerger {
            fn merge(
                &self,
                existing: Option<&Path>,
                target: &Path,
            ) -> Result<(), MetadataMergeError> {
                assert!(existing.is_none(), "stale staging copy must be gone");
                fs_err::create_dir_all(target.parent().unwrap()).ok();
                fs_err::write(target, b"fresh").map_err(|err| MetadataMergeError {
                    name: "versions.meta".into(),
                    reason: err.to_string(),
                })
            }
        }

        let dir = tempfile::tempdir()?;
        let session = cache_session(dir.path());
        let remote = Arc::new(InMemoryRemote::default());
        let deployer = deployer(&remote);

        // A stale staging file from an earlier deploy.
        let staging = dir.path().join("repo/g/a/versions-releases.meta");
        fs_err::create_dir_all(staging.parent().unwrap())?;
        fs_err::write(&staging, b"stale")?;

        let metadata = Metadata::new("g", "a", "", "versions.meta", Nature::Release)
            .with_merger(Arc::new(OverwriteMerger));
        deployer.deploy(
            &session,
            DeployRequest::new(RemoteRepository::new("releases", "https://deploy/"))
                .with_metadata(metadata),
        )?;
        assert_eq!(fs_err::read(&staging)?, b"fresh");
        Ok(())
    }

    #[test]
    fn transfer_error_during_refresh_aborts() {
        let dir = tempfile::tempdir().unwrap();
        let session = cache_session(dir.path());
        let remote = Arc::new(InMemoryRemote::default());
        *remote.metadata_error.lock().unwrap() = Some(TransferError::Failed {
            item: "g:a:/versions.meta".into(),
            location: "memory".into(),
            reason: "connection reset".into(),
        });
        let deployer = deployer(&remote);

        struct PanickyMerger;
        impl MetadataMerger for PanickyMerger {
            fn merge(&self, _: Option<&Path>, _: &Path) -> Result<(), MetadataMergeError> {
                unreachable!("merge must not run after a failed refresh");
            }
        }

        let metadata = Metadata::new("g", "a", "", "versions.meta", Nature::Release)
            .with_merger(Arc::new(PanickyMerger));
        let err = deployer
            .deploy(
                &session,
                DeployRequest::new(RemoteRepository::new("releases", "https://deploy/"))
                    .with_metadata(metadata),
            )
            .unwrap_err();
        assert!(matches!(err, DeployError::Transfer(TransferError::Failed { .. })));
    }
}
