//! Connector selection by priority, with optional filter wrapping.

use std::sync::Arc;

use tracing::debug;

use quarry_types::{
    ArtifactDownload, ArtifactUpload, MetadataDownload, MetadataUpload, NoConnectorError,
    RemoteRepository, RemoteRepositoryFilter, RepositoryConnector, RepositoryConnectorFactory,
    Session, TransferError,
};

use crate::prioritized;

/// Picks a wire connector for a remote by asking the registered factories in
/// priority order; the first success wins.
pub struct RepositoryConnectorProvider {
    factories: Vec<Arc<dyn RepositoryConnectorFactory>>,
}

impl RepositoryConnectorProvider {
    pub fn new(factories: Vec<Arc<dyn RepositoryConnectorFactory>>) -> Self {
        Self { factories }
    }

    pub fn new_connector(
        &self,
        session: &Session,
        repository: &RemoteRepository,
    ) -> Result<Box<dyn RepositoryConnector>, NoConnectorError> {
        if repository.is_blocked() {
            return Err(NoConnectorError::new(repository, "repository is blocked"));
        }

        let ordered = prioritized::cached(
            session,
            "connectorFactories",
            &self.factories,
            |factory| factory.name(),
            RepositoryConnectorFactory::priority,
        );

        let mut reasons = Vec::new();
        for factory in ordered.enabled() {
            match factory.new_connector(session, repository) {
                Ok(connector) => {
                    debug!("connector {} serves {repository}", factory.name());
                    return Ok(self.wrap(session, repository, connector));
                }
                Err(err) => reasons.push(format!("{}: {}", factory.name(), err.reason)),
            }
        }
        let reason = if reasons.is_empty() {
            "no connector factories registered".to_string()
        } else {
            reasons.join("; ")
        };
        Err(NoConnectorError::new(repository, reason))
    }

    fn wrap(
        &self,
        session: &Session,
        repository: &RemoteRepository,
        connector: Box<dyn RepositoryConnector>,
    ) -> Box<dyn RepositoryConnector> {
        match session.remote_repository_filter() {
            Some(filter) => Box::new(FilteringConnector {
                repository: repository.clone(),
                filter: Arc::clone(filter),
                delegate: connector,
            }),
            None => connector,
        }
    }
}

/// Short-circuits filtered-out transfers before they reach the wire.
struct FilteringConnector {
    repository: RemoteRepository,
    filter: Arc<dyn RemoteRepositoryFilter>,
    delegate: Box<dyn RepositoryConnector>,
}

impl RepositoryConnector for FilteringConnector {
    fn get(&self, artifacts: &mut [ArtifactDownload], metadata: &mut [MetadataDownload]) {
        let mut pass_artifacts = Vec::new();
        for (index, download) in artifacts.iter_mut().enumerate() {
            let decision = self.filter.accept_artifact(&self.repository, &download.artifact);
            if decision.is_accepted() {
                pass_artifacts.push(index);
            } else {
                download.error = Some(TransferError::NotFound {
                    item: download.artifact.to_string(),
                    location: format!("{} (filtered: {})", self.repository, decision.reasoning()),
                });
            }
        }
        let mut pass_metadata = Vec::new();
        for (index, download) in metadata.iter_mut().enumerate() {
            let decision = self.filter.accept_metadata(&self.repository, &download.metadata);
            if decision.is_accepted() {
                pass_metadata.push(index);
            } else {
                download.error = Some(TransferError::NotFound {
                    item: download.metadata.to_string(),
                    location: format!("{} (filtered: {})", self.repository, decision.reasoning()),
                });
            }
        }

        // Hand the accepted subset through in one batch, then copy outcomes
        // back onto the original descriptors.
        let mut accepted_artifacts: Vec<ArtifactDownload> =
            pass_artifacts.iter().map(|&i| artifacts[i].clone()).collect();
        let mut accepted_metadata: Vec<MetadataDownload> =
            pass_metadata.iter().map(|&i| metadata[i].clone()).collect();
        self.delegate.get(&mut accepted_artifacts, &mut accepted_metadata);
        for (slot, outcome) in pass_artifacts.iter().zip(accepted_artifacts) {
            artifacts[*slot] = outcome;
        }
        for (slot, outcome) in pass_metadata.iter().zip(accepted_metadata) {
            metadata[*slot] = outcome;
        }
    }

    fn put(&self, artifacts: &mut [ArtifactUpload], metadata: &mut [MetadataUpload]) {
        self.delegate.put(artifacts, metadata);
    }
}
