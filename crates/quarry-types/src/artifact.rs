use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

/// Property key for a client-supplied absolute path. An artifact carrying this
/// property is never resolved against a repository; the recorded path is
/// validated and returned as-is.
pub const LOCAL_PATH: &str = "localPath";

/// The version suffix that marks a snapshot.
pub const SNAPSHOT: &str = "SNAPSHOT";

const SNAPSHOT_SUFFIX: &str = "-SNAPSHOT";

/// A single content-addressed file identified by coordinates.
///
/// Artifacts are value objects: all mutators return a new instance. The
/// optional `path` points at the resolved bytes on the local disk and is only
/// set by the resolution and installation pipelines.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Artifact {
    group_id: String,
    artifact_id: String,
    version: String,
    base_version: Option<String>,
    classifier: String,
    extension: String,
    path: Option<PathBuf>,
    properties: BTreeMap<String, String>,
}

impl Artifact {
    /// Creates a new artifact with the given coordinates and an empty
    /// classifier.
    pub fn new(
        group_id: impl Into<String>,
        artifact_id: impl Into<String>,
        extension: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        let version = version.into();
        Self {
            base_version: derived_base_version(&version),
            group_id: group_id.into(),
            artifact_id: artifact_id.into(),
            version,
            classifier: String::new(),
            extension: extension.into(),
            path: None,
            properties: BTreeMap::new(),
        }
    }

    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    pub fn artifact_id(&self) -> &str {
        &self.artifact_id
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// The base version, i.e. the version with any timestamped snapshot
    /// qualifier collapsed back to the `-SNAPSHOT` label. Equal to
    /// [`Self::version`] for releases.
    pub fn base_version(&self) -> &str {
        self.base_version.as_deref().unwrap_or(&self.version)
    }

    pub fn classifier(&self) -> &str {
        &self.classifier
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    pub fn properties(&self) -> &BTreeMap<String, String> {
        &self.properties
    }

    /// Whether this artifact is a snapshot, i.e. its base version carries the
    /// `-SNAPSHOT` label or its version is a timestamped snapshot expansion.
    pub fn is_snapshot(&self) -> bool {
        self.base_version().ends_with(SNAPSHOT_SUFFIX)
    }

    #[must_use]
    pub fn with_classifier(mut self, classifier: impl Into<String>) -> Self {
        self.classifier = classifier.into();
        self
    }

    /// Pins the version. The base version is re-derived, so expanding
    /// `-SNAPSHOT` to a timestamped qualifier retains the `-SNAPSHOT`
    /// spelling as the base version.
    #[must_use]
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self.base_version = derived_base_version(&self.version);
        self
    }

    #[must_use]
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    #[must_use]
    pub fn without_path(mut self) -> Self {
        self.path = None;
        self
    }

    #[must_use]
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// The filename of this artifact inside a repository directory:
    /// `artifact-version[-classifier].extension`.
    pub fn file_name(&self) -> String {
        let mut name = format!("{}-{}", self.artifact_id, self.version);
        if !self.classifier.is_empty() {
            name.push('-');
            name.push_str(&self.classifier);
        }
        name.push('.');
        name.push_str(&self.extension);
        name
    }

    /// The filename using the base version, i.e. the `-SNAPSHOT` spelling for
    /// timestamped snapshots.
    pub fn base_file_name(&self) -> String {
        let mut name = format!("{}-{}", self.artifact_id, self.base_version());
        if !self.classifier.is_empty() {
            name.push('-');
            name.push_str(&self.classifier);
        }
        name.push('.');
        name.push_str(&self.extension);
        name
    }
}

impl Display for Artifact {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.group_id, self.artifact_id, self.extension)?;
        if !self.classifier.is_empty() {
            write!(f, ":{}", self.classifier)?;
        }
        write!(f, ":{}", self.version)
    }
}

fn derived_base_version(version: &str) -> Option<String> {
    let base = base_version_of(version);
    (base != version).then_some(base)
}

/// Returns the byte offset where the timestamped snapshot qualifier
/// (`YYYYMMDD.HHMMSS-N`) starts, if the version ends with one.
pub fn timestamped_qualifier_start(version: &str) -> Option<usize> {
    // <prefix>-YYYYMMDD.HHMMSS-<build>
    let bytes = version.as_bytes();
    let last_dash = version.rfind('-')?;
    let build = &version[last_dash + 1..];
    if build.is_empty() || !build.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let stamp_start = last_dash.checked_sub(15)?;
    let stamp = &bytes[stamp_start..last_dash];
    let ok = stamp.len() == 15
        && stamp[..8].iter().all(u8::is_ascii_digit)
        && stamp[8] == b'.'
        && stamp[9..].iter().all(u8::is_ascii_digit);
    if !ok {
        return None;
    }
    // The stamp must be a qualifier, not the whole version.
    if stamp_start == 0 {
        Some(0)
    } else if bytes[stamp_start - 1] == b'-' {
        Some(stamp_start)
    } else {
        None
    }
}

/// Computes the base version string for a possibly timestamped version.
pub fn base_version_of(version: &str) -> String {
    if version.ends_with(SNAPSHOT_SUFFIX) {
        return version.to_string();
    }
    match timestamped_qualifier_start(version) {
        Some(0) => SNAPSHOT.to_string(),
        Some(start) => format!("{}{}", &version[..start], SNAPSHOT),
        None => version.to_string(),
    }
}
