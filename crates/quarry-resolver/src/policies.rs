//! Checksum-policy coarsening and the offline gate.

use quarry_types::{repository, RemoteRepository, ResolutionError, Session};

/// Comma-separated URL schemes a session may contact even when offline
/// (e.g. `file`).
pub const CONFIG_OFFLINE_PROTOCOLS: &str = "quarry.offline.protocols";

/// Maps pairs of checksum policies to the effective one.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChecksumPolicyProvider;

impl ChecksumPolicyProvider {
    pub fn new() -> Self {
        Self
    }

    /// The stricter of the two policies wins: `fail` > `warn` > `ignore`.
    pub fn effective_policy<'a>(&self, policy1: &'a str, policy2: &'a str) -> &'a str {
        if policy1.is_empty() {
            return policy2;
        }
        if policy2.is_empty() {
            return policy1;
        }
        if Self::rank(policy2) > Self::rank(policy1) {
            policy2
        } else {
            policy1
        }
    }

    fn rank(policy: &str) -> u8 {
        match policy {
            repository::CHECKSUM_POLICY_FAIL => 2,
            repository::CHECKSUM_POLICY_WARN => 1,
            repository::CHECKSUM_POLICY_IGNORE => 0,
            other => {
                tracing::warn!("unknown checksum policy {other:?}, treating as warn");
                1
            }
        }
    }
}

/// The checksum policy in effect for one transfer: the session override when
/// set, the repository policy otherwise.
pub fn resolved_checksum_policy<'a>(session: &'a Session, repository_policy: &'a str) -> &'a str {
    match session.checksum_policy() {
        Some(global) if !global.is_empty() => global,
        _ => repository_policy,
    }
}

/// The artifact update policy in effect for one transfer.
pub fn resolved_update_policy<'a>(session: &'a Session, repository_policy: &'a str) -> &'a str {
    match session.update_policy() {
        Some(global) if !global.is_empty() => global,
        _ => repository_policy,
    }
}

/// The metadata update policy in effect for one transfer.
pub fn resolved_metadata_update_policy<'a>(
    session: &'a Session,
    repository_policy: &'a str,
) -> &'a str {
    match session.metadata_update_policy() {
        Some(global) if !global.is_empty() => global,
        _ => repository_policy,
    }
}

/// Decides whether a remote may be contacted under the session's offline
/// flag.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineController;

impl OfflineController {
    pub fn new() -> Self {
        Self
    }

    /// `Err` when the session is offline and the repository's scheme is not
    /// allow-listed.
    pub fn check(
        &self,
        session: &Session,
        item: &dyn std::fmt::Display,
        repository: &RemoteRepository,
    ) -> Result<(), ResolutionError> {
        if !session.is_offline() {
            return Ok(());
        }
        let allowed = session.config().get_str(CONFIG_OFFLINE_PROTOCOLS, "");
        let scheme = repository.url().split(':').next().unwrap_or("");
        if !scheme.is_empty()
            && allowed
                .split(',')
                .map(str::trim)
                .any(|protocol| protocol.eq_ignore_ascii_case(scheme))
        {
            return Ok(());
        }
        Err(ResolutionError::offline(item, repository))
    }
}
