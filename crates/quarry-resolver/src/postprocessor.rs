//! Post-resolution verification against a local register of trusted
//! checksums.
//!
//! The register is a `sha1sum`-style summary file: one `<hex digest>  <path>`
//! line per artifact, keyed by the artifact's repository path. Resolved
//! artifacts with a register entry must match it; in recording mode, freshly
//! resolved artifacts are added instead.

use std::collections::BTreeMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use sha1::{Digest, Sha1};
use tracing::{debug, warn};

use quarry_fs::PathProcessor;
use quarry_types::{
    Artifact, ArtifactResolverPostProcessor, ArtifactResult, ResolutionError, Session,
};

/// Summary file name inside the register directory.
pub const SUMMARY_FILE: &str = "checksums.sha1";

/// Record checksums of newly resolved artifacts instead of requiring them.
pub const CONFIG_RECORD: &str = "quarry.trustedChecksums.record";

pub struct TrustedChecksumsPostProcessor {
    basedir: PathBuf,
    /// The register, loaded lazily and kept in sync with the summary file.
    register: Mutex<Option<BTreeMap<String, String>>>,
    fs: PathProcessor,
}

impl TrustedChecksumsPostProcessor {
    pub fn new(basedir: impl Into<PathBuf>) -> Self {
        Self {
            basedir: basedir.into(),
            register: Mutex::new(None),
            fs: PathProcessor::new(),
        }
    }

    fn summary_path(&self) -> PathBuf {
        self.basedir.join(SUMMARY_FILE)
    }

    fn load(&self) -> BTreeMap<String, String> {
        let content = match fs_err::read_to_string(self.summary_path()) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(err) => {
                warn!("unreadable checksum register: {err}");
                String::new()
            }
        };
        let mut register = BTreeMap::new();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some((digest, path)) = line.split_once("  ") {
                register.insert(path.to_string(), digest.to_string());
            }
        }
        register
    }

    fn store(&self, register: &BTreeMap<String, String>) {
        let mut content = String::new();
        for (path, digest) in register {
            content.push_str(digest);
            content.push_str("  ");
            content.push_str(path);
            content.push('\n');
        }
        if let Err(err) = self.fs.write(&self.summary_path(), content.as_bytes()) {
            warn!("failed to write checksum register: {err}");
        }
    }
}

fn registry_key(artifact: &Artifact) -> String {
    format!(
        "{}/{}/{}/{}",
        artifact.group_id().replace('.', "/"),
        artifact.artifact_id(),
        artifact.base_version(),
        artifact.file_name()
    )
}

fn sha1_of(path: &Path) -> std::io::Result<String> {
    let mut file = fs_err::File::open(path)?;
    let mut hasher = Sha1::new();
    let mut buffer = vec![0u8; 32 * 1024];
    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

impl ArtifactResolverPostProcessor for TrustedChecksumsPostProcessor {
    fn name(&self) -> &'static str {
        "trustedChecksums"
    }

    fn post_process(&self, session: &Session, results: &mut [ArtifactResult]) {
        let record = session.config().get_bool(CONFIG_RECORD, false);
        let mut guard = self
            .register
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let register = guard.get_or_insert_with(|| self.load());
        let mut dirty = false;

        for result in results.iter_mut() {
            // Only results that actually resolved to bytes on disk are
            // subject to verification.
            let Some(artifact) = &result.artifact else { continue };
            let Some(path) = artifact.path() else { continue };
            if !path.is_file() {
                continue;
            }

            let actual = match sha1_of(path) {
                Ok(digest) => digest,
                Err(err) => {
                    warn!("cannot digest {}: {err}", path.display());
                    continue;
                }
            };
            let key = registry_key(artifact);
            match register.get(&key) {
                Some(trusted) if *trusted == actual => {}
                Some(trusted) => {
                    result.exceptions.push(ResolutionError::PolicyViolation {
                        item: artifact.to_string(),
                        reason: format!(
                            "checksum mismatch: trusted {trusted}, actual {actual}"
                        ),
                    });
                    result.artifact = None;
                }
                None if record => {
                    debug!("recording trusted checksum for {key}");
                    register.insert(key, actual);
                    dirty = true;
                }
                None => {}
            }
        }

        if dirty {
            self.store(register);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use anyhow::Result;

    use quarry_types::{ArtifactRequest, LocalRepository, Session};

    use super::*;
    use crate::testing::PathOnlyManager;

    fn result_with_file(dir: &Path, bytes: &[u8]) -> Result<ArtifactResult> {
        let file = dir.join("a-1.0.jar");
        fs_err::write(&file, bytes)?;
        let artifact = Artifact::new("g", "a", "jar", "1.0").with_path(&file);
        let mut result = ArtifactResult::new(ArtifactRequest::new(artifact.clone().without_path()));
        result.artifact = Some(artifact);
        Ok(result)
    }

    fn session() -> Session {
        Session::builder(Arc::new(PathOnlyManager(LocalRepository::new("/tmp")))).build()
    }

    fn recording_session() -> Session {
        Session::builder(Arc::new(PathOnlyManager(LocalRepository::new("/tmp"))))
            .config(CONFIG_RECORD, "true")
            .build()
    }

    #[test]
    fn records_then_verifies() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let register_dir = dir.path().join("register");

        let processor = TrustedChecksumsPostProcessor::new(&register_dir);
        let mut results = vec![result_with_file(dir.path(), b"payload")?];
        processor.post_process(&recording_session(), &mut results);
        assert!(results[0].is_resolved());
        assert!(register_dir.join(SUMMARY_FILE).is_file());

        // A fresh processor instance re-reads the register and passes the
        // same bytes.
        let processor = TrustedChecksumsPostProcessor::new(&register_dir);
        let mut results = vec![result_with_file(dir.path(), b"payload")?];
        processor.post_process(&session(), &mut results);
        assert!(results[0].is_resolved());
        Ok(())
    }

    #[test]
    fn mismatch_fails_the_result() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let register_dir = dir.path().join("register");

        let processor = TrustedChecksumsPostProcessor::new(&register_dir);
        let mut results = vec![result_with_file(dir.path(), b"payload")?];
        processor.post_process(&recording_session(), &mut results);

        // Tampered bytes no longer match the recorded digest.
        let processor = TrustedChecksumsPostProcessor::new(&register_dir);
        let mut results = vec![result_with_file(dir.path(), b"tampered")?];
        processor.post_process(&session(), &mut results);
        assert!(!results[0].is_resolved());
        assert!(matches!(
            results[0].exceptions.as_slice(),
            [ResolutionError::PolicyViolation { .. }]
        ));
        Ok(())
    }

    #[test]
    fn unknown_artifact_passes_without_recording() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let processor = TrustedChecksumsPostProcessor::new(dir.path().join("register"));
        let mut results = vec![result_with_file(dir.path(), b"payload")?];
        processor.post_process(&session(), &mut results);
        assert!(results[0].is_resolved());
        assert!(!dir.path().join("register").join(SUMMARY_FILE).exists());
        Ok(())
    }
}
