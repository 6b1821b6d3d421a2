//! The facade wiring resolvers, installer and deployer together.

use std::path::PathBuf;
use std::sync::Arc;

use quarry_cache::EnhancedLocalRepositoryManager;
use quarry_install::{DeployError, Deployer, InstallError, Installer};
use quarry_locks::SyncContextFactory;
use quarry_resolver::{
    ArtifactResolver, MetadataResolver, PrefixesRemoteRepositoryFilter,
    RepositoryConnectorProvider, ResolveError,
};
use quarry_types::session::ConfigProperties;
use quarry_types::{
    ArtifactRequest, ArtifactResult, DeployRequest, DeployResult, InstallRequest, InstallResult,
    MetadataRequest, MetadataResult, Session, SessionBuilder, VersionRequest,
    VersionResolutionError, VersionResolver, VersionResult,
};

use crate::lifecycle::{LifecycleError, RepositorySystemLifecycle};

/// Accepts requested versions as-is. Build tools that support dynamic
/// versions (snapshot timestamps, ranges) plug in their own resolver.
struct IdentityVersionResolver;

impl VersionResolver for IdentityVersionResolver {
    fn resolve_version(
        &self,
        _session: &Session,
        request: &VersionRequest,
    ) -> Result<VersionResult, VersionResolutionError> {
        Ok(VersionResult {
            version: request.artifact.version().to_string(),
            repository: None,
        })
    }
}

/// The entry point: one instance serves many sessions and requests.
pub struct RepositorySystem {
    artifact_resolver: ArtifactResolver,
    metadata_resolver: MetadataResolver,
    installer: Installer,
    deployer: Deployer,
    lifecycle: Arc<RepositorySystemLifecycle>,
}

impl RepositorySystem {
    pub fn builder() -> RepositorySystemBuilder {
        RepositorySystemBuilder::default()
    }

    /// Builds a session working against a local repository at `basedir`.
    /// The configuration bag seeds the local repository manager, the session
    /// itself, and (when enabled there) the prefixes repository filter.
    pub fn new_session_builder(
        &self,
        basedir: impl Into<PathBuf>,
        config: ConfigProperties,
    ) -> SessionBuilder {
        let manager = Arc::new(EnhancedLocalRepositoryManager::new(basedir, &config));
        let manager_trait: Arc<dyn quarry_types::LocalRepositoryManager> = Arc::clone(&manager) as _;
        let mut builder = Session::builder(manager_trait);
        if let Some(filter) =
            PrefixesRemoteRepositoryFilter::from_config(&config, manager.basedir())
        {
            builder = builder.remote_repository_filter(Arc::new(filter));
        }
        builder.config_properties(config)
    }

    pub fn resolve_artifacts(
        &self,
        session: &Session,
        requests: Vec<ArtifactRequest>,
    ) -> Result<Vec<ArtifactResult>, ResolveError> {
        self.artifact_resolver.resolve_artifacts(session, requests)
    }

    pub fn resolve_metadata(
        &self,
        session: &Session,
        requests: Vec<MetadataRequest>,
    ) -> Result<Vec<MetadataResult>, quarry_locks::LockError> {
        self.metadata_resolver.resolve_metadata(session, requests)
    }

    pub fn install(
        &self,
        session: &Session,
        request: InstallRequest,
    ) -> Result<InstallResult, InstallError> {
        self.installer.install(session, request)
    }

    pub fn deploy(
        &self,
        session: &Session,
        request: DeployRequest,
    ) -> Result<DeployResult, DeployError> {
        self.deployer.deploy(session, request)
    }

    pub fn lifecycle(&self) -> &Arc<RepositorySystemLifecycle> {
        &self.lifecycle
    }

    /// Runs the session's end-of-life handlers. The session should not be
    /// used afterwards.
    pub fn end_session(&self, session: &Session) -> Result<(), LifecycleError> {
        self.lifecycle.session_end(session)
    }

    /// Shuts the system down, running all system-end handlers once.
    pub fn shutdown(&self) -> Result<(), LifecycleError> {
        self.lifecycle.system_end()
    }
}

/// Assembles a [`RepositorySystem`] from pluggable components.
#[derive(Default)]
pub struct RepositorySystemBuilder {
    version_resolver: Option<Arc<dyn VersionResolver>>,
    connector_factories: Vec<Arc<dyn quarry_types::RepositoryConnectorFactory>>,
    post_processors: Vec<Arc<dyn quarry_types::ArtifactResolverPostProcessor>>,
    generator_factories: Vec<Arc<dyn quarry_types::MetadataGeneratorFactory>>,
}

impl RepositorySystemBuilder {
    #[must_use]
    pub fn version_resolver(mut self, resolver: Arc<dyn VersionResolver>) -> Self {
        self.version_resolver = Some(resolver);
        self
    }

    #[must_use]
    pub fn connector_factory(
        mut self,
        factory: Arc<dyn quarry_types::RepositoryConnectorFactory>,
    ) -> Self {
        self.connector_factories.push(factory);
        self
    }

    #[must_use]
    pub fn post_processor(
        mut self,
        processor: Arc<dyn quarry_types::ArtifactResolverPostProcessor>,
    ) -> Self {
        self.post_processors.push(processor);
        self
    }

    #[must_use]
    pub fn metadata_generator_factory(
        mut self,
        factory: Arc<dyn quarry_types::MetadataGeneratorFactory>,
    ) -> Self {
        self.generator_factories.push(factory);
        self
    }

    pub fn build(self) -> RepositorySystem {
        let version_resolver = self
            .version_resolver
            .unwrap_or_else(|| Arc::new(IdentityVersionResolver));
        let connector_provider =
            Arc::new(RepositoryConnectorProvider::new(self.connector_factories));
        let sync_factory = Arc::new(SyncContextFactory::new());

        RepositorySystem {
            artifact_resolver: ArtifactResolver::new(
                version_resolver,
                Arc::clone(&connector_provider),
                Arc::clone(&sync_factory),
                self.post_processors,
            ),
            metadata_resolver: MetadataResolver::new(
                Arc::clone(&connector_provider),
                Arc::clone(&sync_factory),
            ),
            installer: Installer::new(
                self.generator_factories.clone(),
                Arc::clone(&sync_factory),
            ),
            deployer: Deployer::new(
                connector_provider,
                self.generator_factories,
                sync_factory,
            ),
            lifecycle: Arc::new(RepositorySystemLifecycle::new()),
        }
    }
}
