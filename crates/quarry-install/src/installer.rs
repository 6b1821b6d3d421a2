//! Writes locally produced artifacts and metadata into the shared cache,
//! under the same locking discipline the resolvers use.

use std::sync::Arc;

use tracing::debug;

use quarry_fs::PathProcessor;
use quarry_locks::SyncContextFactory;
use quarry_resolver::prioritized;
use quarry_types::{
    Artifact, InstallRequest, InstallResult, LocalArtifactRegistration, LocalRepositoryManager,
    Metadata, MetadataGenerator, MetadataGeneratorFactory, Session,
};

use crate::error::InstallError;

/// The artifact-descriptor extension; descriptors are always re-copied on
/// install because their rendering may change without the size or mtime
/// moving.
const DESCRIPTOR_EXTENSION: &str = "pom";

pub struct Installer {
    generator_factories: Vec<Arc<dyn MetadataGeneratorFactory>>,
    sync_factory: Arc<SyncContextFactory>,
    fs: PathProcessor,
}

impl Installer {
    pub fn new(
        generator_factories: Vec<Arc<dyn MetadataGeneratorFactory>>,
        sync_factory: Arc<SyncContextFactory>,
    ) -> Self {
        Self {
            generator_factories,
            sync_factory,
            fs: PathProcessor::new(),
        }
    }

    pub fn install(
        &self,
        session: &Session,
        request: InstallRequest,
    ) -> Result<InstallResult, InstallError> {
        let mut generators = self.create_generators(session, &request);

        let mut artifacts = request.artifacts.clone();
        let mut prepared: Vec<Metadata> = Vec::new();
        for generator in &mut generators {
            prepared.extend(generator.prepare(&artifacts));
        }

        let mut context = self.sync_factory.new_context(session, false);
        context.acquire(&request.artifacts, &request.metadata)?;

        let mut result = InstallResult::default();

        for metadata in &prepared {
            result.metadata.push(self.install_metadata(session, metadata)?);
        }

        for artifact in &mut artifacts {
            let mut transformed = artifact.clone();
            for generator in &mut generators {
                transformed = generator.transform_artifact(transformed);
            }
            self.install_artifact(session, &transformed)?;
            *artifact = transformed.clone();
            result.artifacts.push(transformed);
        }

        for metadata in &request.metadata {
            result.metadata.push(self.install_metadata(session, metadata)?);
        }
        let mut finished: Vec<Metadata> = Vec::new();
        for generator in &mut generators {
            finished.extend(generator.finish(&artifacts));
        }
        for metadata in &finished {
            result.metadata.push(self.install_metadata(session, metadata)?);
        }

        Ok(result)
    }

    fn create_generators(
        &self,
        session: &Session,
        request: &InstallRequest,
    ) -> Vec<Box<dyn MetadataGenerator>> {
        let ordered = prioritized::cached(
            session,
            "installGenerators",
            &self.generator_factories,
            |factory| factory.name(),
            MetadataGeneratorFactory::priority,
        );
        ordered
            .enabled()
            .filter_map(|factory| factory.new_install_generator(session, request))
            .collect()
    }

    fn install_artifact(&self, session: &Session, artifact: &Artifact) -> Result<(), InstallError> {
        let source = artifact.path().ok_or_else(|| InstallError::NoFile {
            item: artifact.to_string(),
        })?;
        let manager = session.local_repository_manager();
        let destination = manager
            .repository()
            .basedir()
            .join(manager.path_for_local_artifact(artifact));

        if source == destination {
            return Err(InstallError::SamePath {
                item: artifact.to_string(),
                path: destination.display().to_string(),
            });
        }

        if copy_needed(artifact, source, &destination)? {
            session.listener().artifact_installing(artifact, &destination);
            self.fs
                .copy(source, &destination)
                .map_err(|source| InstallError::Io {
                    item: artifact.to_string(),
                    source,
                })?;
        } else {
            debug!("skipping unchanged {artifact}");
        }

        manager.add_artifact(
            session,
            &LocalArtifactRegistration {
                artifact: artifact.clone(),
                repository: None,
                contexts: Vec::new(),
            },
        )?;
        session.listener().artifact_installed(artifact, &destination);
        Ok(())
    }

    fn install_metadata(
        &self,
        session: &Session,
        metadata: &Metadata,
    ) -> Result<Metadata, InstallError> {
        let manager = session.local_repository_manager();
        let destination = manager
            .repository()
            .basedir()
            .join(manager.path_for_local_metadata(metadata));
        session.listener().metadata_installing(metadata, &destination);

        if let Some(merger) = metadata.merger() {
            // Mergeable metadata writes itself, folding in whatever version
            // is already installed.
            let existing = destination.is_file().then_some(destination.as_path());
            merger.merge(existing, &destination)?;
        } else {
            let source = metadata.path().ok_or_else(|| InstallError::NoFile {
                item: metadata.to_string(),
            })?;
            if source == destination {
                return Err(InstallError::SamePath {
                    item: metadata.to_string(),
                    path: destination.display().to_string(),
                });
            }
            self.fs
                .copy(source, &destination)
                .map_err(|source| InstallError::Io {
                    item: metadata.to_string(),
                    source,
                })?;
        }

        manager.add_metadata(
            session,
            &quarry_types::LocalMetadataRegistration {
                metadata: metadata.clone(),
                repository: None,
                context: String::new(),
            },
        )?;
        session.listener().metadata_installed(metadata, &destination);
        Ok(metadata.clone().with_path(destination))
    }
}

/// An install may skip the copy when the destination already mirrors the
/// source. Descriptors are always copied.
fn copy_needed(
    artifact: &Artifact,
    source: &std::path::Path,
    destination: &std::path::Path,
) -> Result<bool, InstallError> {
    if artifact.extension() == DESCRIPTOR_EXTENSION {
        return Ok(true);
    }
    let io_error = |source| InstallError::Io {
        item: artifact.to_string(),
        source,
    };
    let destination_meta = match fs_err::metadata(destination) {
        Ok(meta) => meta,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(true),
        Err(err) => return Err(io_error(err)),
    };
    let source_meta = fs_err::metadata(source).map_err(io_error)?;
    let same = source_meta.len() == destination_meta.len()
        && matches!(
            (source_meta.modified(), destination_meta.modified()),
            (Ok(src), Ok(dst)) if src == dst
        );
    Ok(!same)
}
