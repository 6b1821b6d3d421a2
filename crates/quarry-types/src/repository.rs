use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

/// Update policy: re-fetch on every resolution.
pub const UPDATE_POLICY_ALWAYS: &str = "always";
/// Update policy: re-fetch at most once per calendar day (local time).
pub const UPDATE_POLICY_DAILY: &str = "daily";
/// Update policy: never re-fetch once cached.
pub const UPDATE_POLICY_NEVER: &str = "never";
/// Update policy prefix: re-fetch when older than `interval:N` minutes.
pub const UPDATE_POLICY_INTERVAL: &str = "interval";

/// Checksum policy: reject the transfer on mismatch.
pub const CHECKSUM_POLICY_FAIL: &str = "fail";
/// Checksum policy: warn on mismatch but keep the transfer.
pub const CHECKSUM_POLICY_WARN: &str = "warn";
/// Checksum policy: skip checksum validation.
pub const CHECKSUM_POLICY_IGNORE: &str = "ignore";

/// Enablement and staleness rules for one half (release or snapshot) of a
/// remote repository.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RepositoryPolicy {
    pub enabled: bool,
    pub update_policy: String,
    pub metadata_update_policy: String,
    pub checksum_policy: String,
}

impl RepositoryPolicy {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            update_policy: UPDATE_POLICY_DAILY.to_string(),
            metadata_update_policy: UPDATE_POLICY_DAILY.to_string(),
            checksum_policy: CHECKSUM_POLICY_WARN.to_string(),
        }
    }

    #[must_use]
    pub fn with_update_policy(mut self, policy: impl Into<String>) -> Self {
        self.update_policy = policy.into();
        self
    }

    #[must_use]
    pub fn with_metadata_update_policy(mut self, policy: impl Into<String>) -> Self {
        self.metadata_update_policy = policy.into();
        self
    }

    #[must_use]
    pub fn with_checksum_policy(mut self, policy: impl Into<String>) -> Self {
        self.checksum_policy = policy.into();
        self
    }
}

impl Default for RepositoryPolicy {
    fn default() -> Self {
        Self::new(true)
    }
}

/// A downloadable source of artifacts and metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteRepository {
    id: String,
    content_type: String,
    url: String,
    release_policy: RepositoryPolicy,
    snapshot_policy: RepositoryPolicy,
    mirrored: Vec<RemoteRepository>,
    repository_manager: bool,
    blocked: bool,
    proxy: Option<Proxy>,
    authentication: Option<Authentication>,
}

impl RemoteRepository {
    pub fn new(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content_type: "default".to_string(),
            url: url.into(),
            release_policy: RepositoryPolicy::default(),
            snapshot_policy: RepositoryPolicy::new(false),
            mirrored: Vec::new(),
            repository_manager: false,
            blocked: false,
            proxy: None,
            authentication: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// The policy applying to artifacts of the given snapshot-ness.
    pub fn policy(&self, snapshot: bool) -> &RepositoryPolicy {
        if snapshot {
            &self.snapshot_policy
        } else {
            &self.release_policy
        }
    }

    pub fn release_policy(&self) -> &RepositoryPolicy {
        &self.release_policy
    }

    pub fn snapshot_policy(&self) -> &RepositoryPolicy {
        &self.snapshot_policy
    }

    /// The repositories this remote aggregates, when it acts as a repository
    /// manager. Resolution records origins at this (authoritative) level.
    pub fn mirrored_repositories(&self) -> &[RemoteRepository] {
        &self.mirrored
    }

    pub fn is_repository_manager(&self) -> bool {
        self.repository_manager
    }

    pub fn is_blocked(&self) -> bool {
        self.blocked
    }

    pub fn proxy(&self) -> Option<&Proxy> {
        self.proxy.as_ref()
    }

    pub fn authentication(&self) -> Option<&Authentication> {
        self.authentication.as_ref()
    }

    /// Two remotes are interchangeable for download batching iff their
    /// `(url, content type, repository-manager flag)` match.
    pub fn is_equivalent_to(&self, other: &RemoteRepository) -> bool {
        self.url == other.url
            && self.content_type == other.content_type
            && self.repository_manager == other.repository_manager
    }

    #[must_use]
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }

    #[must_use]
    pub fn with_release_policy(mut self, policy: RepositoryPolicy) -> Self {
        self.release_policy = policy;
        self
    }

    #[must_use]
    pub fn with_snapshot_policy(mut self, policy: RepositoryPolicy) -> Self {
        self.snapshot_policy = policy;
        self
    }

    #[must_use]
    pub fn with_mirrored(mut self, mirrored: Vec<RemoteRepository>) -> Self {
        self.mirrored = mirrored;
        self
    }

    #[must_use]
    pub fn as_repository_manager(mut self) -> Self {
        self.repository_manager = true;
        self
    }

    #[must_use]
    pub fn blocked(mut self, blocked: bool) -> Self {
        self.blocked = blocked;
        self
    }

    #[must_use]
    pub fn with_proxy(mut self, proxy: Proxy) -> Self {
        self.proxy = Some(proxy);
        self
    }

    #[must_use]
    pub fn with_authentication(mut self, authentication: Authentication) -> Self {
        self.authentication = Some(authentication);
        self
    }
}

impl Display for RemoteRepository {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.id, self.url)
    }
}

/// Connection proxy for a remote. Selection mechanics live outside the core;
/// the resolved value merely rides along on the repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Proxy {
    pub host: String,
    pub port: u16,
}

/// Credentials for a remote. Secret handling is the transport's concern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authentication {
    pub username: String,
}

/// The shared local cache all resolutions install into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalRepository {
    basedir: PathBuf,
    content_type: String,
}

impl LocalRepository {
    pub fn new(basedir: impl Into<PathBuf>) -> Self {
        Self {
            basedir: basedir.into(),
            content_type: "enhanced".to_string(),
        }
    }

    pub fn basedir(&self) -> &Path {
        &self.basedir
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }
}

/// The project workspace, when a workspace reader short-circuits resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceRepository {
    id: String,
}

impl WorkspaceRepository {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Default for WorkspaceRepository {
    fn default() -> Self {
        Self::new("workspace")
    }
}

/// Where a resolved artifact or metadata actually came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepositoryRef {
    Local(LocalRepository),
    Remote(RemoteRepository),
    Workspace(WorkspaceRepository),
}

impl RepositoryRef {
    pub fn id(&self) -> &str {
        match self {
            RepositoryRef::Local(_) => "local",
            RepositoryRef::Remote(remote) => remote.id(),
            RepositoryRef::Workspace(workspace) => workspace.id(),
        }
    }

    pub fn as_remote(&self) -> Option<&RemoteRepository> {
        match self {
            RepositoryRef::Remote(remote) => Some(remote),
            _ => None,
        }
    }
}

impl Display for RepositoryRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            RepositoryRef::Local(local) => write!(f, "local ({})", local.basedir().display()),
            RepositoryRef::Remote(remote) => Display::fmt(remote, f),
            RepositoryRef::Workspace(workspace) => write!(f, "workspace ({})", workspace.id()),
        }
    }
}
