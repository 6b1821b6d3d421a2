//! The metadata resolution pipeline: staleness-aware update checks and
//! bounded-parallel fetches, one per authoritative origin.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use rayon::ThreadPoolBuilder;
use tracing::{debug, warn};

use quarry_cache::{UpdateCheck, UpdateCheckManager};
use quarry_locks::{LockError, SyncContextFactory};
use quarry_types::{
    LocalMetadataRegistration, LocalMetadataRequest, LocalRepositoryManager, Metadata,
    MetadataDownload, MetadataRequest, MetadataResult, Nature, RemoteRepository, ResolutionError,
    Session, TransferError,
};

use crate::connector_provider::RepositoryConnectorProvider;
use crate::policies::{
    resolved_checksum_policy, resolved_metadata_update_policy, OfflineController,
};

/// Parallelism of the metadata download phase (default 4).
pub const CONFIG_METADATA_THREADS: &str = "quarry.metadataResolver.threads";

const DEFAULT_THREADS: usize = 4;

/// One fetch against one authoritative origin.
struct DownloadTask {
    /// Index of the owning request/result.
    index: usize,
    metadata: Metadata,
    /// The remote the bytes travel through (the request repository).
    repository: RemoteRepository,
    /// The origin the outcome is recorded against.
    authoritative: RemoteRepository,
    path: PathBuf,
    checksum_policy: String,
    policy: String,
    error: Option<ResolutionError>,
}

/// Resolves batches of metadata requests.
pub struct MetadataResolver {
    connector_provider: Arc<RepositoryConnectorProvider>,
    sync_factory: Arc<SyncContextFactory>,
    offline: OfflineController,
}

impl MetadataResolver {
    pub fn new(
        connector_provider: Arc<RepositoryConnectorProvider>,
        sync_factory: Arc<SyncContextFactory>,
    ) -> Self {
        Self {
            connector_provider,
            sync_factory,
            offline: OfflineController::new(),
        }
    }

    /// Resolves every request, in input order. Unlike artifact resolution,
    /// per-request failures never fail the batch; each result carries its own
    /// outcome.
    pub fn resolve_metadata(
        &self,
        session: &Session,
        requests: Vec<MetadataRequest>,
    ) -> Result<Vec<MetadataResult>, LockError> {
        let coordinates: Vec<Metadata> =
            requests.iter().map(|request| request.metadata.clone()).collect();
        for coordinate in &coordinates {
            session.listener().metadata_resolving(coordinate);
        }
        let update_checks = UpdateCheckManager::new(session.config());

        {
            let mut context = self.sync_factory.new_context(session, true);
            context.acquire(&[], &coordinates)?;
            let (results, tasks) = self.evaluate(session, &update_checks, &requests);
            if tasks.is_empty() {
                return Ok(results);
            }
            // Upgrade for the download phase; same discipline as artifacts.
        }

        let mut context = self.sync_factory.new_context(session, false);
        context.acquire(&[], &coordinates)?;
        let (mut results, mut tasks) = self.evaluate(session, &update_checks, &requests);

        self.run_downloads(session, &mut tasks);

        // Evaluate task outcomes: register, touch, then re-look-up what the
        // connector left in the cache.
        for task in &tasks {
            if task.error.is_none() {
                let registration = LocalMetadataRegistration {
                    metadata: task.metadata.clone(),
                    repository: Some(task.repository.clone()),
                    context: requests[task.index].context.clone(),
                };
                if let Err(err) =
                    session.local_repository_manager().add_metadata(session, &registration)
                {
                    warn!("failed to register metadata {}: {err}", task.metadata);
                }
            }
            let mut check = UpdateCheck::new(
                task.metadata.to_string(),
                task.path.clone(),
                task.policy.clone(),
                task.repository.clone(),
            )
            .with_authoritative_repository(task.authoritative.clone());
            check.error = match &task.error {
                Some(ResolutionError::Transfer(transfer)) => Some(transfer.clone()),
                Some(other) => Some(TransferError::Failed {
                    item: task.metadata.to_string(),
                    location: task.authoritative.to_string(),
                    reason: other.to_string(),
                }),
                None => None,
            };
            update_checks.touch_metadata(session, &check);
            session.listener().metadata_downloaded(
                &task.metadata,
                &task.authoritative,
                check.error.as_ref(),
            );
        }

        for (index, result) in results.iter_mut().enumerate() {
            let request = &requests[index];
            let Some(repository) = &request.repository else { continue };
            let tasks_of_request: Vec<&DownloadTask> =
                tasks.iter().filter(|task| task.index == index).collect();
            if tasks_of_request.is_empty() {
                continue;
            }
            result.updated = true;
            let lookup = session.local_repository_manager().find_metadata(
                session,
                &LocalMetadataRequest {
                    metadata: request.metadata.clone(),
                    repository: Some(repository.clone()),
                    context: request.context.clone(),
                },
            );
            match lookup.path {
                Some(path) => {
                    result.metadata = Some(request.metadata.clone().with_path(path));
                    result.exception = None;
                }
                None => {
                    if result.exception.is_none() {
                        result.exception = tasks_of_request
                            .iter()
                            .find_map(|task| task.error.clone())
                            .or_else(|| {
                                Some(ResolutionError::NotFound {
                                    item: request.metadata.to_string(),
                                    location: repository.to_string(),
                                })
                            });
                    }
                    if request.delete_local_copy_if_missing
                        && tasks_of_request.iter().all(|task| {
                            task.error.as_ref().is_some_and(ResolutionError::is_not_found)
                        })
                    {
                        self.delete_local_copy(session, request, repository);
                    }
                }
            }
            session.listener().metadata_resolved(
                &request.metadata,
                match &result.exception {
                    Some(ResolutionError::Transfer(transfer)) => Some(transfer),
                    _ => None,
                },
            );
        }

        Ok(results)
    }

    /// Decides, per request, what is already satisfied locally and what needs
    /// a fetch from which authoritative origin.
    fn evaluate(
        &self,
        session: &Session,
        update_checks: &UpdateCheckManager,
        requests: &[MetadataRequest],
    ) -> (Vec<MetadataResult>, Vec<DownloadTask>) {
        let mut results = Vec::with_capacity(requests.len());
        let mut tasks = Vec::new();
        for (index, request) in requests.iter().enumerate() {
            let mut result = MetadataResult::new(request.clone());
            self.evaluate_request(session, update_checks, request, index, &mut result, &mut tasks);
            results.push(result);
        }
        (results, tasks)
    }

    fn evaluate_request(
        &self,
        session: &Session,
        update_checks: &UpdateCheckManager,
        request: &MetadataRequest,
        index: usize,
        result: &mut MetadataResult,
        tasks: &mut Vec<DownloadTask>,
    ) {
        let metadata = &request.metadata;
        let manager = session.local_repository_manager();

        let Some(repository) = &request.repository else {
            // Local repository only.
            let lookup = manager.find_metadata(
                session,
                &LocalMetadataRequest {
                    metadata: metadata.clone(),
                    repository: None,
                    context: request.context.clone(),
                },
            );
            match lookup.path {
                Some(path) => result.metadata = Some(metadata.clone().with_path(path)),
                None => {
                    result.exception = Some(ResolutionError::NotFound {
                        item: metadata.to_string(),
                        location: "local repository".to_string(),
                    });
                }
            }
            return;
        };

        // The repo-manager-scoped lookup path; also where downloads land.
        let lookup = manager.find_metadata(
            session,
            &LocalMetadataRequest {
                metadata: metadata.clone(),
                repository: Some(repository.clone()),
                context: request.context.clone(),
            },
        );
        if let Some(path) = &lookup.path {
            result.metadata = Some(metadata.clone().with_path(path.clone()));
        }

        if request.favor_local_repository && lookup.path.is_some() && !lookup.stale {
            return;
        }

        if let Err(offline) = self.offline.check(session, metadata, repository) {
            if result.metadata.is_none() {
                result.exception = Some(offline);
            }
            return;
        }

        let mut authoritatives = expand_authoritatives(repository, metadata.nature());
        if let Some(filter) = session.remote_repository_filter() {
            authoritatives.retain(|authoritative| {
                let decision = filter.accept_metadata(authoritative, metadata);
                if decision.is_accepted() {
                    true
                } else {
                    if result.metadata.is_none() && result.exception.is_none() {
                        result.exception = Some(ResolutionError::FilteredOut {
                            item: metadata.to_string(),
                            repository: authoritative.to_string(),
                            reason: decision.reasoning().to_string(),
                        });
                    }
                    false
                }
            });
        }

        let lookup_path = absolute_remote_metadata_path(session, metadata, repository, request);
        let local_last_updated = lookup
            .path
            .as_deref()
            .and_then(|path| fs_err::metadata(path).ok())
            .and_then(|meta| meta.modified().ok())
            .and_then(|mtime| mtime.duration_since(UNIX_EPOCH).ok())
            .map_or(0, |elapsed| elapsed.as_millis() as i64);

        for authoritative in authoritatives {
            let snapshot = metadata.nature() == Nature::Snapshot;
            let policy = resolved_metadata_update_policy(
                session,
                &authoritative.policy(snapshot).metadata_update_policy,
            )
            .to_string();
            let mut check = UpdateCheck::new(
                metadata.to_string(),
                lookup_path.clone(),
                policy.clone(),
                repository.clone(),
            )
            .with_authoritative_repository(authoritative.clone());
            check.file_valid = false;
            check.local_last_updated = local_last_updated;
            update_checks.check_metadata(session, &mut check);

            if lookup.stale || check.required {
                debug!("fetching {metadata} from {authoritative}");
                session.listener().metadata_downloading(metadata, &authoritative);
                tasks.push(DownloadTask {
                    index,
                    metadata: metadata.clone(),
                    repository: repository.clone(),
                    authoritative: authoritative.clone(),
                    path: lookup_path.clone(),
                    checksum_policy: resolved_checksum_policy(
                        session,
                        &authoritative.policy(snapshot).checksum_policy,
                    )
                    .to_string(),
                    policy,
                    error: None,
                });
            } else if let Some(cached) = check.error {
                if result.metadata.is_none() && result.exception.is_none() {
                    result.exception = Some(ResolutionError::Transfer(cached));
                }
            }
        }
    }

    /// Executes the tasks on a bounded pool. Individual failures land on
    /// their task and never cancel siblings; the batch completes fully before
    /// outcomes are evaluated.
    fn run_downloads(&self, session: &Session, tasks: &mut [DownloadTask]) {
        if tasks.is_empty() {
            return;
        }
        let threads = session
            .config()
            .get_usize(CONFIG_METADATA_THREADS, DEFAULT_THREADS)
            .max(1);
        let pool = match ThreadPoolBuilder::new().num_threads(threads).build() {
            Ok(pool) => pool,
            Err(err) => {
                warn!("falling back to sequential metadata downloads: {err}");
                for task in tasks.iter_mut() {
                    self.run_task(session, task);
                }
                return;
            }
        };
        pool.scope(|scope| {
            for task in tasks.iter_mut() {
                scope.spawn(move |_| self.run_task(session, task));
            }
        });
    }

    fn run_task(&self, session: &Session, task: &mut DownloadTask) {
        let connector = match self.connector_provider.new_connector(session, &task.authoritative) {
            Ok(connector) => connector,
            Err(err) => {
                task.error = Some(ResolutionError::NoConnector {
                    repository: err.repository,
                    reason: err.reason,
                });
                return;
            }
        };
        let mut download = MetadataDownload::new(task.metadata.clone(), task.path.clone());
        download.checksum_policy = task.checksum_policy.clone();
        connector.get(&mut [], std::slice::from_mut(&mut download));
        task.error = download.error.map(ResolutionError::Transfer);
    }

    fn delete_local_copy(
        &self,
        session: &Session,
        request: &MetadataRequest,
        repository: &RemoteRepository,
    ) {
        let lookup = session.local_repository_manager().find_metadata(
            session,
            &LocalMetadataRequest {
                metadata: request.metadata.clone(),
                repository: Some(repository.clone()),
                context: request.context.clone(),
            },
        );
        if let Some(path) = lookup.path {
            debug!("deleting stale local copy {}", path.display());
            if let Err(err) = fs_err::remove_file(&path) {
                warn!("failed to delete {}: {err}", path.display());
            }
        }
    }
}

/// The origins a fetch may be recorded against: a repository manager expands
/// to its mirrored sources filtered by the metadata's nature, a plain remote
/// stands for itself when its policy enables the nature.
fn expand_authoritatives(repository: &RemoteRepository, nature: Nature) -> Vec<RemoteRepository> {
    let applicable = |candidate: &RemoteRepository| {
        nature.is_applicable(
            candidate.release_policy().enabled,
            candidate.snapshot_policy().enabled,
        )
    };
    if repository.is_repository_manager() {
        repository
            .mirrored_repositories()
            .iter()
            .filter(|mirrored| applicable(mirrored))
            .cloned()
            .collect()
    } else if applicable(repository) {
        vec![repository.clone()]
    } else {
        Vec::new()
    }
}

fn absolute_remote_metadata_path(
    session: &Session,
    metadata: &Metadata,
    repository: &RemoteRepository,
    request: &MetadataRequest,
) -> PathBuf {
    let manager = session.local_repository_manager();
    let rel = manager.path_for_remote_metadata(metadata, repository, &request.context);
    manager.repository().basedir().join(rel)
}
