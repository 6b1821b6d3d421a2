//! The artifact resolution pipeline: version resolve → local lookup →
//! planned remote download → install → post-process.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};

use quarry_cache::{UpdateCheck, UpdateCheckManager};
use quarry_fs::PathProcessor;
use quarry_locks::{LockError, SyncContextFactory};
use quarry_types::{
    artifact, Artifact, ArtifactDownload, ArtifactRequest, ArtifactResolutionError,
    ArtifactResolverPostProcessor, ArtifactResult, LocalArtifactRegistration, LocalArtifactRequest,
    LocalArtifactResult, LocalRepositoryManager, RemoteRepository, RepositoryRef, ResolutionError,
    Session, TransferError, VersionRequest, VersionResolver,
};

use crate::connector_provider::RepositoryConnectorProvider;
use crate::policies::{resolved_checksum_policy, resolved_update_policy, OfflineController};
use crate::prioritized;

/// Copy a resolved timestamped snapshot to a `-SNAPSHOT`-named sibling and
/// return the sibling (default true).
pub const CONFIG_SNAPSHOT_NORMALIZATION: &str = "quarry.artifactResolver.snapshotNormalization";
/// Without a repository filter, treat a cached file as usable when the
/// version resolver attributed it to the local repository (default false).
pub const CONFIG_SIMPLE_LRM_INTEROP: &str = "quarry.artifactResolver.simpleLrmInterop";

/// Batch resolution failed to acquire its locks; resolution proper reports
/// failures through [`ArtifactResolutionError`].
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error(transparent)]
    Resolution(#[from] ArtifactResolutionError),
    #[error(transparent)]
    Lock(#[from] LockError),
}

/// One artifact awaiting download through a resolution group. `resolved` is
/// shared between the groups of one request, so whichever group succeeds
/// first wins and the others skip the transfer.
struct ResolutionItem {
    index: usize,
    artifact: Artifact,
    local: LocalArtifactResult,
    context: String,
    resolved: Arc<AtomicBool>,
}

/// Downloads destined for canonically equivalent remotes ride through one
/// connector batch.
struct ResolutionGroup {
    remote: RemoteRepository,
    items: Vec<ResolutionItem>,
}

/// Resolves batches of artifact requests into local cache paths.
pub struct ArtifactResolver {
    version_resolver: Arc<dyn VersionResolver>,
    connector_provider: Arc<RepositoryConnectorProvider>,
    sync_factory: Arc<SyncContextFactory>,
    post_processors: Vec<Arc<dyn ArtifactResolverPostProcessor>>,
    offline: OfflineController,
    fs: PathProcessor,
}

impl ArtifactResolver {
    pub fn new(
        version_resolver: Arc<dyn VersionResolver>,
        connector_provider: Arc<RepositoryConnectorProvider>,
        sync_factory: Arc<SyncContextFactory>,
        post_processors: Vec<Arc<dyn ArtifactResolverPostProcessor>>,
    ) -> Self {
        Self {
            version_resolver,
            connector_provider,
            sync_factory,
            post_processors,
            offline: OfflineController::new(),
            fs: PathProcessor::new(),
        }
    }

    /// Resolves every request, in input order. Fails iff at least one result
    /// lacks a usable path; the error carries all per-request results.
    pub fn resolve_artifacts(
        &self,
        session: &Session,
        requests: Vec<ArtifactRequest>,
    ) -> Result<Vec<ArtifactResult>, ResolveError> {
        let coordinates: Vec<Artifact> =
            requests.iter().map(|request| request.artifact.clone()).collect();
        for coordinate in &coordinates {
            session.listener().artifact_resolving(coordinate);
        }

        {
            // First pass under shared locks: cache hits need no exclusivity.
            let mut context = self.sync_factory.new_context(session, true);
            context.acquire(&coordinates, &[])?;
            let (results, groups) = self.evaluate(session, &requests);
            if groups.is_empty() {
                return self.finish(session, results);
            }
            // Downloads are needed: upgrade. The shared context must be
            // released first, the lock backend refuses same-thread upgrades.
        }

        let mut context = self.sync_factory.new_context(session, false);
        context.acquire(&coordinates, &[])?;
        // A concurrent resolver may have installed some of the artifacts
        // while we were unlocked, so the whole evaluation runs again.
        let (mut results, groups) = self.evaluate(session, &requests);
        let update_checks = UpdateCheckManager::new(session.config());
        for group in groups {
            self.download_group(session, &update_checks, group, &mut results);
        }
        self.finish(session, results)
    }

    /// Steps 1–8 of the pipeline for every request: everything short of
    /// actually transferring bytes.
    fn evaluate(
        &self,
        session: &Session,
        requests: &[ArtifactRequest],
    ) -> (Vec<ArtifactResult>, Vec<ResolutionGroup>) {
        let mut results: Vec<ArtifactResult> = Vec::with_capacity(requests.len());
        let mut groups: Vec<ResolutionGroup> = Vec::new();

        for (index, request) in requests.iter().enumerate() {
            let mut result = ArtifactResult::new(request.clone());
            self.evaluate_request(session, request, index, &mut result, &mut groups);
            results.push(result);
        }
        (results, groups)
    }

    fn evaluate_request(
        &self,
        session: &Session,
        request: &ArtifactRequest,
        index: usize,
        result: &mut ArtifactResult,
        groups: &mut Vec<ResolutionGroup>,
    ) {
        let requested = &request.artifact;

        // A client-supplied absolute path bypasses repositories entirely.
        if let Some(local_path) = requested.property(artifact::LOCAL_PATH) {
            let path = PathBuf::from(local_path);
            if path.is_file() {
                result.artifact = Some(requested.clone().with_path(path));
                session
                    .listener()
                    .artifact_resolved(requested, result.repository.as_ref());
            } else {
                result.exceptions.push(ResolutionError::NotFound {
                    item: requested.to_string(),
                    location: path.display().to_string(),
                });
            }
            return;
        }

        // Filtering narrows the candidate list; rejection is fatal only when
        // nothing remains and nothing is cached.
        let mut candidates: Vec<RemoteRepository> = request.repositories.clone();
        if let Some(filter) = session.remote_repository_filter() {
            candidates.retain(|remote| {
                let decision = filter.accept_artifact(remote, requested);
                if decision.is_accepted() {
                    true
                } else {
                    result.exceptions.push(ResolutionError::FilteredOut {
                        item: requested.to_string(),
                        repository: remote.to_string(),
                        reason: decision.reasoning().to_string(),
                    });
                    false
                }
            });
        }

        let version_request = VersionRequest {
            artifact: requested.clone(),
            repositories: candidates.clone(),
            context: request.context.clone(),
        };
        let version_result =
            match self.version_resolver.resolve_version(session, &version_request) {
                Ok(version_result) => version_result,
                Err(err) => {
                    // One cause per candidate the failure forecloses; with no
                    // candidate left, the local repository takes the blame.
                    if candidates.is_empty() {
                        result.exceptions.push(ResolutionError::VersionResolution {
                            item: requested.to_string(),
                            reason: format!("local repository: {}", err.reason),
                        });
                    }
                    for remote in &candidates {
                        result.exceptions.push(ResolutionError::VersionResolution {
                            item: requested.to_string(),
                            reason: format!("{remote}: {}", err.reason),
                        });
                    }
                    return;
                }
            };

        let pinned = requested.clone().with_version(version_result.version.as_str());
        match &version_result.repository {
            Some(RepositoryRef::Remote(source)) => {
                // The resolver knows where this version lives; no other
                // remote can serve it.
                candidates.retain(|candidate| candidate.id() == source.id());
            }
            Some(_) => candidates.clear(),
            None => {}
        }

        if let Some(reader) = session.workspace_reader() {
            if let Some(path) = reader.find_artifact(&pinned) {
                result.repository = Some(RepositoryRef::Workspace(reader.repository()));
                result.artifact = Some(pinned.clone().with_path(path));
                session
                    .listener()
                    .artifact_resolved(&pinned, result.repository.as_ref());
                return;
            }
        }

        let local_request = LocalArtifactRequest {
            artifact: pinned.clone(),
            repositories: candidates.clone(),
            context: request.context.clone(),
        };
        let local = session.local_repository_manager().find_artifact(session, &local_request);
        result.local_result = Some(local.clone());

        let cache_hit = if session.remote_repository_filter().is_some() {
            local.available
        } else {
            let locally_sourced =
                matches!(version_result.repository, Some(RepositoryRef::Local(_)));
            let interop = session.config().get_bool(CONFIG_SIMPLE_LRM_INTEROP, false);
            local.available || (local.path.is_some() && interop && locally_sourced)
        };

        if cache_hit {
            self.emit_cache_hit(session, &pinned, &local, result);
            return;
        }

        // Plan downloads against every remaining usable remote.
        let resolved = Arc::new(AtomicBool::new(false));
        for remote in &candidates {
            if !remote.policy(pinned.is_snapshot()).enabled {
                continue;
            }
            if let Err(err) = self.offline.check(session, &pinned, remote) {
                result.exceptions.push(err);
                continue;
            }
            let item = ResolutionItem {
                index,
                artifact: pinned.clone(),
                local: local.clone(),
                context: request.context.clone(),
                resolved: Arc::clone(&resolved),
            };
            match groups.iter_mut().find(|group| group.remote.is_equivalent_to(remote)) {
                Some(group) => group.items.push(item),
                None => groups.push(ResolutionGroup {
                    remote: remote.clone(),
                    items: vec![item],
                }),
            }
        }
    }

    /// A cache hit: attribute the result and normalize snapshots.
    fn emit_cache_hit(
        &self,
        session: &Session,
        pinned: &Artifact,
        local: &LocalArtifactResult,
        result: &mut ArtifactResult,
    ) {
        let Some(path) = &local.path else { return };
        result.repository = Some(match &local.repository {
            Some(remote) => RepositoryRef::Remote(remote.clone()),
            None => {
                RepositoryRef::Local(session.local_repository_manager().repository().clone())
            }
        });
        match self.normalized_path(session, pinned, path) {
            Ok(final_path) => {
                result.artifact = Some(pinned.clone().with_path(final_path));
                session
                    .listener()
                    .artifact_resolved(pinned, result.repository.as_ref());
            }
            Err(err) => {
                result.exceptions.push(ResolutionError::Transfer(TransferError::Failed {
                    item: pinned.to_string(),
                    location: "local repository".to_string(),
                    reason: err.to_string(),
                }));
            }
        }
    }

    /// Steps 10–11: plan, execute and evaluate the downloads of one group.
    fn download_group(
        &self,
        session: &Session,
        update_checks: &UpdateCheckManager,
        group: ResolutionGroup,
        results: &mut [ArtifactResult],
    ) {
        let connector = match self.connector_provider.new_connector(session, &group.remote) {
            Ok(connector) => connector,
            Err(err) => {
                for item in &group.items {
                    results[item.index].exceptions.push(ResolutionError::NoConnector {
                        repository: err.repository.clone(),
                        reason: err.reason.clone(),
                    });
                }
                return;
            }
        };

        let manager = session.local_repository_manager();
        let mut downloads: Vec<ArtifactDownload> = Vec::new();
        let mut pending: Vec<ResolutionItem> = Vec::new();

        for item in group.items {
            if item.resolved.load(Ordering::SeqCst) {
                continue;
            }
            let policy = group.remote.policy(item.artifact.is_snapshot());
            let (path, existence_check) = match &item.local.path {
                // The bytes are present but unattributed: confirm the remote
                // has them instead of re-downloading.
                Some(existing) => (existing.clone(), true),
                None => {
                    let rel = manager.path_for_remote_artifact(
                        &item.artifact,
                        &group.remote,
                        &item.context,
                    );
                    (manager.repository().basedir().join(rel), false)
                }
            };

            // The error cache may veto this attempt outright.
            let update_policy = resolved_update_policy(session, &policy.update_policy);
            let mut check = UpdateCheck::new(
                item.artifact.to_string(),
                path.clone(),
                update_policy,
                group.remote.clone(),
            );
            check.file_valid = false;
            update_checks.check_artifact(session, &mut check);
            if !check.required {
                if let Some(cached) = check.error {
                    debug!("using cached failure for {}", item.artifact);
                    results[item.index].exceptions.push(ResolutionError::Transfer(cached));
                    continue;
                }
            }

            let mut download = ArtifactDownload::new(item.artifact.clone(), path);
            download.existence_check = existence_check;
            download.checksum_policy =
                resolved_checksum_policy(session, &policy.checksum_policy).to_string();
            download.supported_contexts = vec![item.context.clone()];
            session.listener().artifact_downloading(&item.artifact, &group.remote);
            downloads.push(download);
            pending.push(item);
        }

        if downloads.is_empty() {
            return;
        }
        connector.get(&mut downloads, &mut []);

        for (download, item) in downloads.into_iter().zip(pending) {
            let result = &mut results[item.index];
            let policy = group.remote.policy(item.artifact.is_snapshot());
            let mut check = UpdateCheck::new(
                item.artifact.to_string(),
                download.path.clone(),
                resolved_update_policy(session, &policy.update_policy),
                group.remote.clone(),
            );

            match &download.error {
                None => {
                    item.resolved.store(true, Ordering::SeqCst);
                    result.repository = Some(RepositoryRef::Remote(group.remote.clone()));
                    let registration = LocalArtifactRegistration {
                        artifact: item.artifact.clone(),
                        repository: Some(group.remote.clone()),
                        contexts: download.supported_contexts.clone(),
                    };
                    if let Err(err) = manager.add_artifact(session, &registration) {
                        warn!("failed to register {}: {err}", item.artifact);
                    }
                    match self.normalized_path(session, &item.artifact, &download.path) {
                        Ok(path) => {
                            result.artifact = Some(item.artifact.clone().with_path(path));
                        }
                        Err(err) => {
                            result.exceptions.push(ResolutionError::Transfer(
                                TransferError::Failed {
                                    item: item.artifact.to_string(),
                                    location: group.remote.to_string(),
                                    reason: err.to_string(),
                                },
                            ));
                        }
                    }
                    // The touch strictly follows the registration above, so a
                    // concurrent reader either re-checks or sees the file.
                    update_checks.touch_artifact(session, &check);
                    session.listener().artifact_downloaded(&item.artifact, &group.remote, None);
                    if result.is_resolved() {
                        session
                            .listener()
                            .artifact_resolved(&item.artifact, result.repository.as_ref());
                    }
                }
                Some(error) => {
                    result.exceptions.push(ResolutionError::Transfer(error.clone()));
                    check.error = Some(error.clone());
                    update_checks.touch_artifact(session, &check);
                    session
                        .listener()
                        .artifact_downloaded(&item.artifact, &group.remote, Some(error));
                }
            }
        }
    }

    /// When enabled, a resolved timestamped snapshot gets a `-SNAPSHOT`-named
    /// sibling with identical length and mtime; the sibling is the returned
    /// path.
    fn normalized_path(
        &self,
        session: &Session,
        artifact: &Artifact,
        path: &Path,
    ) -> io::Result<PathBuf> {
        if artifact.version() == artifact.base_version()
            || !session.config().get_bool(CONFIG_SNAPSHOT_NORMALIZATION, true)
        {
            return Ok(path.to_path_buf());
        }
        let sibling = path.with_file_name(artifact.base_file_name());
        let source = fs_err::metadata(path)?;
        // Length plus mtime is the entire freshness oracle here; equal pairs
        // with different bytes will be conflated.
        let copy_needed = match fs_err::metadata(&sibling) {
            Ok(existing) => {
                existing.len() != source.len() || existing.modified()? != source.modified()?
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => true,
            Err(err) => return Err(err),
        };
        if copy_needed {
            debug!("normalizing {} -> {}", path.display(), sibling.display());
            self.fs.copy(path, &sibling)?;
        }
        Ok(sibling)
    }

    /// Step 12–13: post-process, then synthesize NotFound for anything still
    /// unresolved and fail the batch if needed.
    fn finish(
        &self,
        session: &Session,
        mut results: Vec<ArtifactResult>,
    ) -> Result<Vec<ArtifactResult>, ResolveError> {
        if !self.post_processors.is_empty() {
            let ordered = prioritized::cached(
                session,
                "postProcessors",
                &self.post_processors,
                |processor| processor.name(),
                ArtifactResolverPostProcessor::priority,
            );
            for processor in ordered.enabled() {
                processor.post_process(session, &mut results);
            }
        }

        let mut failed = false;
        for result in &mut results {
            if !result.is_resolved() {
                failed = true;
                result.artifact = None;
                if result.exceptions.is_empty() {
                    result.exceptions.push(ResolutionError::NotFound {
                        item: result.request.artifact.to_string(),
                        location: "no repository".to_string(),
                    });
                }
            }
        }
        if failed {
            return Err(ArtifactResolutionError { results }.into());
        }
        Ok(results)
    }
}
