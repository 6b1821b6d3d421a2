use std::collections::BTreeSet;

use sha1::{Digest, Sha1};

use quarry_types::{Artifact, LocalRepositoryManager, Metadata, Session};

/// Maps the coordinate set of a sync context to lock names. Returned names
/// are sorted and deduplicated, so overlapping contexts acquire in the same
/// canonical order.
pub trait NameMapper: Send + Sync {
    fn name_locks(
        &self,
        session: &Session,
        artifacts: &[Artifact],
        metadata: &[Metadata],
    ) -> Vec<String>;

    /// Whether produced names are safe to use as file names (required by the
    /// file-lock backend).
    fn is_file_system_friendly(&self) -> bool {
        false
    }
}

fn sorted(names: BTreeSet<String>) -> Vec<String> {
    names.into_iter().collect()
}

/// `artifact:gid:aid:ext:cls:ver` / `metadata:gid:aid:ver:kind` names.
#[derive(Default)]
pub struct GavNameMapper;

impl GavNameMapper {
    fn artifact_name(artifact: &Artifact) -> String {
        format!(
            "artifact:{}:{}:{}:{}:{}",
            artifact.group_id(),
            artifact.artifact_id(),
            artifact.extension(),
            artifact.classifier(),
            artifact.base_version(),
        )
    }

    fn metadata_name(metadata: &Metadata) -> String {
        format!(
            "metadata:{}:{}:{}:{}",
            metadata.group_id(),
            metadata.artifact_id(),
            metadata.version(),
            metadata.kind(),
        )
    }
}

impl NameMapper for GavNameMapper {
    fn name_locks(
        &self,
        _session: &Session,
        artifacts: &[Artifact],
        metadata: &[Metadata],
    ) -> Vec<String> {
        let mut names = BTreeSet::new();
        for artifact in artifacts {
            names.insert(Self::artifact_name(artifact));
        }
        for metadata in metadata {
            names.insert(Self::metadata_name(metadata));
        }
        sorted(names)
    }
}

/// Like [`GavNameMapper`] but with coordinates escaped into file-name-safe
/// tokens; meant for the file-lock backend.
#[derive(Default)]
pub struct FileGavNameMapper;

fn file_safe(value: &str) -> String {
    value
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '~'
            }
        })
        .collect()
}

impl NameMapper for FileGavNameMapper {
    fn name_locks(
        &self,
        _session: &Session,
        artifacts: &[Artifact],
        metadata: &[Metadata],
    ) -> Vec<String> {
        let mut names = BTreeSet::new();
        for artifact in artifacts {
            names.insert(file_safe(&GavNameMapper::artifact_name(artifact)));
        }
        for metadata in metadata {
            names.insert(file_safe(&GavNameMapper::metadata_name(metadata)));
        }
        sorted(names)
    }

    fn is_file_system_friendly(&self) -> bool {
        true
    }
}

/// Prefixes each delegate name with a digest of the local repository basedir,
/// isolating lock domains of distinct caches sharing one lock backend.
pub struct DiscriminatingNameMapper {
    delegate: Box<dyn NameMapper>,
}

impl DiscriminatingNameMapper {
    pub fn new(delegate: Box<dyn NameMapper>) -> Self {
        Self { delegate }
    }

    fn discriminator(session: &Session) -> String {
        let basedir = session.local_repository_manager().repository().basedir();
        let digest = Sha1::digest(basedir.to_string_lossy().as_bytes());
        hex::encode(&digest[..8])
    }
}

impl NameMapper for DiscriminatingNameMapper {
    fn name_locks(
        &self,
        session: &Session,
        artifacts: &[Artifact],
        metadata: &[Metadata],
    ) -> Vec<String> {
        let discriminator = Self::discriminator(session);
        self.delegate
            .name_locks(session, artifacts, metadata)
            .into_iter()
            .map(|name| format!("{discriminator}:{name}"))
            .collect()
    }

    fn is_file_system_friendly(&self) -> bool {
        false
    }
}

/// SHA-1-hashes the delegate's names; optionally spreads the hashes over a
/// shallow directory tree so file locks stay out of one flat directory.
pub struct HashingNameMapper {
    delegate: Box<dyn NameMapper>,
    /// Directory levels (0–4) prepended to each hashed name.
    depth: usize,
}

impl HashingNameMapper {
    pub fn new(delegate: Box<dyn NameMapper>, depth: usize) -> Self {
        Self {
            delegate,
            depth: depth.min(4),
        }
    }

    fn hashed(&self, name: &str) -> String {
        let digest = hex::encode(Sha1::digest(name.as_bytes()));
        if self.depth == 0 {
            return digest;
        }
        let mut spread = String::with_capacity(digest.len() + self.depth * 3);
        for level in 0..self.depth {
            spread.push_str(&digest[level * 2..level * 2 + 2]);
            spread.push('/');
        }
        spread.push_str(&digest);
        spread
    }
}

impl NameMapper for HashingNameMapper {
    fn name_locks(
        &self,
        session: &Session,
        artifacts: &[Artifact],
        metadata: &[Metadata],
    ) -> Vec<String> {
        self.delegate
            .name_locks(session, artifacts, metadata)
            .into_iter()
            .map(|name| self.hashed(&name))
            .collect()
    }

    fn is_file_system_friendly(&self) -> bool {
        true
    }
}

/// A single fixed name: one coarse global lock.
#[derive(Default)]
pub struct StaticNameMapper;

impl NameMapper for StaticNameMapper {
    fn name_locks(
        &self,
        _session: &Session,
        artifacts: &[Artifact],
        metadata: &[Metadata],
    ) -> Vec<String> {
        if artifacts.is_empty() && metadata.is_empty() {
            Vec::new()
        } else {
            vec!["static".to_string()]
        }
    }

    fn is_file_system_friendly(&self) -> bool {
        true
    }
}

/// Maps everything to no locks at all.
#[derive(Default)]
pub struct NoopNameMapper;

impl NameMapper for NoopNameMapper {
    fn name_locks(
        &self,
        _session: &Session,
        _artifacts: &[Artifact],
        _metadata: &[Metadata],
    ) -> Vec<String> {
        Vec::new()
    }

    fn is_file_system_friendly(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::test_session;
    use quarry_types::Nature;

    #[test]
    fn gav_names_are_sorted_and_deduplicated() {
        let session = test_session();
        let artifacts = vec![
            Artifact::new("org.z", "later", "jar", "1.0"),
            Artifact::new("org.a", "earlier", "jar", "1.0"),
            Artifact::new("org.a", "earlier", "jar", "1.0"),
        ];
        let names = GavNameMapper.name_locks(&session, &artifacts, &[]);
        assert_eq!(
            names,
            vec![
                "artifact:org.a:earlier:jar::1.0".to_string(),
                "artifact:org.z:later:jar::1.0".to_string(),
            ]
        );
    }

    #[test]
    fn gav_uses_base_version_for_snapshots() {
        let session = test_session();
        let timestamped =
            Artifact::new("g", "a", "jar", "1.0-SNAPSHOT").with_version("1.0-20200101.120000-3");
        let plain = Artifact::new("g", "a", "jar", "1.0-SNAPSHOT");
        let names = GavNameMapper.name_locks(&session, &[timestamped, plain], &[]);
        // Both spellings of the same snapshot coordinate map to one lock.
        assert_eq!(names.len(), 1);
    }

    #[test]
    fn file_gav_escapes_separators() {
        let session = test_session();
        let metadata = Metadata::new("org.example", "lib", "1.0", "versions.meta", Nature::Release);
        let names = FileGavNameMapper.name_locks(&session, &[], &[metadata]);
        assert_eq!(names, vec!["metadata~org.example~lib~1.0~versions.meta".to_string()]);
    }

    #[test]
    fn hashing_spreads_over_directories() {
        let mapper = HashingNameMapper::new(Box::new(GavNameMapper), 2);
        let session = test_session();
        let names =
            mapper.name_locks(&session, &[Artifact::new("g", "a", "jar", "1.0")], &[]);
        assert_eq!(names.len(), 1);
        let name = &names[0];
        // "ab/cd/<40 hex chars>"
        assert_eq!(name.len(), 46);
        assert_eq!(&name[..2], &name[6..8]);
        assert_eq!(name.matches('/').count(), 2);
    }

    #[test]
    fn static_mapper_collapses_everything() {
        let session = test_session();
        let names = StaticNameMapper.name_locks(
            &session,
            &[Artifact::new("g", "a", "jar", "1.0")],
            &[Metadata::new("g", "a", "1.0", "versions.meta", Nature::Release)],
        );
        assert_eq!(names, vec!["static".to_string()]);
        assert!(StaticNameMapper.name_locks(&session, &[], &[]).is_empty());
    }
}
