//! The update-check policy engine: decides whether a cached file or a cached
//! failure is still authoritative, and records outcomes in the tracking file.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{Local, TimeZone};
use tracing::{debug, warn};

use quarry_types::session::ConfigProperties;
use quarry_types::{
    repository, RemoteRepository, Session, TransferError,
};

use crate::manager::{repository_key, CONFIG_TRACKING_FILENAME, DEFAULT_TRACKING_FILENAME};
use crate::tracking::TrackingFileManager;

const LAST_UPDATED_SUFFIX: &str = ":lastUpdated";
const LAST_ERROR_SUFFIX: &str = ":lastError";
/// Persisted spelling of a cached "remote confirmed absent" outcome. An empty
/// or missing error value means success.
const NOT_FOUND_VALUE: &str = "not found";

/// One update decision for an (item, authoritative origin) pair. Inputs are
/// filled by the caller; [`Self::required`] and [`Self::error`] by the check.
#[derive(Debug, Clone)]
pub struct UpdateCheck {
    /// Rendered coordinates, for messages only.
    pub item: String,
    /// The cached file this check guards.
    pub file: PathBuf,
    /// Whether an existing file satisfies the check (artifacts yes; metadata
    /// carries its own staleness via `local_last_updated`).
    pub file_valid: bool,
    /// Last-modified of the cached copy in epoch millis; 0 when absent. Only
    /// consulted for metadata checks.
    pub local_last_updated: i64,
    pub policy: String,
    /// The repository the caller wants to fetch from.
    pub repository: RemoteRepository,
    /// The origin the outcome is recorded against.
    pub authoritative_repository: RemoteRepository,
    pub required: bool,
    pub error: Option<TransferError>,
}

impl UpdateCheck {
    pub fn new(
        item: impl Into<String>,
        file: PathBuf,
        policy: impl Into<String>,
        repository: RemoteRepository,
    ) -> Self {
        let authoritative_repository = repository.clone();
        Self {
            item: item.into(),
            file,
            file_valid: true,
            local_last_updated: 0,
            policy: policy.into(),
            repository,
            authoritative_repository,
            required: false,
            error: None,
        }
    }

    #[must_use]
    pub fn with_authoritative_repository(mut self, repository: RemoteRepository) -> Self {
        self.authoritative_repository = repository;
        self
    }

    fn file_name(&self) -> String {
        self.file
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    fn location(&self) -> String {
        self.authoritative_repository.to_string()
    }
}

/// Maps update policy strings to decisions.
#[derive(Debug, Clone, Copy, Default)]
pub struct UpdatePolicyAnalyzer;

impl UpdatePolicyAnalyzer {
    pub fn new() -> Self {
        Self
    }

    /// Of two policies, the one requiring more frequent updates wins.
    pub fn effective_policy<'a>(&self, policy1: &'a str, policy2: &'a str) -> &'a str {
        if policy1.is_empty() {
            return policy2;
        }
        if policy2.is_empty() {
            return policy1;
        }
        if Self::ordinal(policy2) < Self::ordinal(policy1) {
            policy2
        } else {
            policy1
        }
    }

    fn ordinal(policy: &str) -> i64 {
        match policy {
            repository::UPDATE_POLICY_ALWAYS => 0,
            repository::UPDATE_POLICY_DAILY => 24 * 60,
            repository::UPDATE_POLICY_NEVER => i64::MAX,
            _ => interval_minutes(policy).unwrap_or(24 * 60),
        }
    }

    /// Whether a file last updated at `last_updated_millis` must be
    /// re-fetched under `policy`.
    pub fn is_update_required(&self, last_updated_millis: i64, policy: &str) -> bool {
        match policy {
            repository::UPDATE_POLICY_ALWAYS => true,
            repository::UPDATE_POLICY_NEVER => false,
            repository::UPDATE_POLICY_DAILY => last_updated_millis < start_of_today_millis(),
            _ => match interval_minutes(policy) {
                Some(minutes) => now_millis() - last_updated_millis >= minutes * 60 * 1000,
                None => {
                    warn!("unknown update policy {policy:?}, assuming no update needed");
                    false
                }
            },
        }
    }
}

fn interval_minutes(policy: &str) -> Option<i64> {
    let rest = policy.strip_prefix(repository::UPDATE_POLICY_INTERVAL)?;
    let minutes = rest.strip_prefix(':').unwrap_or(rest);
    minutes.parse().ok().filter(|m| *m >= 0)
}

pub(crate) fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_millis() as i64)
}

fn start_of_today_millis() -> i64 {
    let now = Local::now();
    let Some(midnight) = now.date_naive().and_hms_opt(0, 0, 0) else {
        return 0;
    };
    match Local.from_local_datetime(&midnight).earliest() {
        Some(start) => start.timestamp_millis(),
        None => 0,
    }
}

/// Decides whether a re-fetch is required and records outcomes against the
/// authoritative origin, persisted in the tracking file next to the cached
/// item.
pub struct UpdateCheckManager {
    tracking: TrackingFileManager,
    tracking_filename: String,
    analyzer: UpdatePolicyAnalyzer,
}

impl UpdateCheckManager {
    pub fn new(config: &ConfigProperties) -> Self {
        Self {
            tracking: TrackingFileManager::new(),
            tracking_filename: config
                .get_str(CONFIG_TRACKING_FILENAME, DEFAULT_TRACKING_FILENAME)
                .to_string(),
            analyzer: UpdatePolicyAnalyzer::new(),
        }
    }

    pub fn analyzer(&self) -> &UpdatePolicyAnalyzer {
        &self.analyzer
    }

    /// Fills `required`/`error` for an artifact check. The cached file itself
    /// is authoritative while it exists; the tracking file supplies the
    /// outcome of the last attempt when it does not.
    pub fn check_artifact(&self, session: &Session, check: &mut UpdateCheck) {
        self.check(session, check, false);
    }

    /// Fills `required`/`error` for a metadata check; freshness of an
    /// existing copy comes from `local_last_updated`.
    pub fn check_metadata(&self, session: &Session, check: &mut UpdateCheck) {
        self.check(session, check, true);
    }

    fn check(&self, session: &Session, check: &mut UpdateCheck, metadata: bool) {
        let entries = self.read_entries(check);
        let origin = repository_key(&check.authoritative_repository, "");
        let file_name = check.file_name();
        let cached_error = entries
            .get(&error_key(&file_name, &origin))
            .filter(|value| !value.is_empty());

        let file_current = if metadata {
            check.local_last_updated != 0
        } else {
            check.file_valid && check.file.is_file()
        };

        let last_updated = if cached_error.is_none() {
            if file_current {
                if metadata {
                    check.local_last_updated
                } else {
                    file_mtime_millis(&check.file)
                }
            } else {
                0
            }
        } else {
            entries
                .get(&updated_key(&file_name, &origin))
                .and_then(|value| value.parse().ok())
                .unwrap_or(0)
        };

        if last_updated == 0 {
            check.required = true;
            return;
        }
        if self.analyzer.is_update_required(last_updated, &check.policy) {
            check.required = true;
            return;
        }
        if file_current {
            check.required = false;
            return;
        }

        // The last attempt failed and its outcome is still fresh. Honor it
        // only when the session's error policy caches that failure kind.
        let error = rebuild_error(&check.item, &check.location(), cached_error);
        let cacheable = match &error {
            Some(error) if error.is_not_found() => session.error_policy().cache_not_found,
            Some(_) => session.error_policy().cache_transfer_errors,
            None => false,
        };
        if cacheable {
            check.required = false;
            check.error = error;
            debug!("suppressing re-fetch of {}: cached failure still fresh", check.item);
        } else {
            check.required = true;
            check.error = None;
        }
    }

    /// Records the outcome of an attempt. Runs strictly after the local-cache
    /// registration for the item, so concurrent readers never observe
    /// "updated but absent".
    pub fn touch_artifact(&self, session: &Session, check: &UpdateCheck) {
        self.touch(session, check);
    }

    pub fn touch_metadata(&self, session: &Session, check: &UpdateCheck) {
        self.touch(session, check);
    }

    fn touch(&self, _session: &Session, check: &UpdateCheck) {
        let origin = repository_key(&check.authoritative_repository, "");
        let file_name = check.file_name();
        let mut updates: BTreeMap<String, Option<String>> = BTreeMap::new();
        updates.insert(updated_key(&file_name, &origin), Some(now_millis().to_string()));
        let error_value = match &check.error {
            None => None,
            Some(error) if error.is_not_found() => Some(NOT_FOUND_VALUE.to_string()),
            Some(error) => Some(error.to_string()),
        };
        updates.insert(error_key(&file_name, &origin), error_value);

        let path = self.tracking_path(check);
        if let Err(err) = self.tracking.update(&path, &updates) {
            warn!("failed to record update check for {}: {err}", check.item);
        }
    }

    fn read_entries(&self, check: &UpdateCheck) -> BTreeMap<String, String> {
        let path = self.tracking_path(check);
        match self.tracking.read(&path) {
            Ok(entries) => entries,
            Err(err) => {
                warn!("failed to read update records from {}: {err}", path.display());
                BTreeMap::new()
            }
        }
    }

    fn tracking_path(&self, check: &UpdateCheck) -> PathBuf {
        match check.file.parent() {
            Some(parent) => parent.join(&self.tracking_filename),
            None => PathBuf::from(&self.tracking_filename),
        }
    }
}

fn updated_key(file_name: &str, origin: &str) -> String {
    format!("{file_name}>{origin}{LAST_UPDATED_SUFFIX}")
}

fn error_key(file_name: &str, origin: &str) -> String {
    format!("{file_name}>{origin}{LAST_ERROR_SUFFIX}")
}

fn rebuild_error(item: &str, location: &str, value: Option<&String>) -> Option<TransferError> {
    let value = value?;
    if value == NOT_FOUND_VALUE {
        Some(TransferError::NotFound {
            item: item.to_string(),
            location: location.to_string(),
        })
    } else {
        Some(TransferError::from_cached(item, location, value))
    }
}

fn file_mtime_millis(path: &std::path::Path) -> i64 {
    fs_err::metadata(path)
        .and_then(|metadata| metadata.modified())
        .ok()
        .and_then(|mtime| mtime.duration_since(UNIX_EPOCH).ok())
        .map_or(0, |elapsed| elapsed.as_millis() as i64)
}
