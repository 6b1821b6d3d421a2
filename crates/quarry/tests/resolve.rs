//! End-to-end resolution scenarios against an in-memory remote.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use anyhow::Result;

use quarry::{
    Artifact, ArtifactRequest, ConfigProperties, Metadata, MetadataRequest, Nature,
    RemoteRepository, RepositoryPolicy, RepositorySystem, ResolveError, Session,
};

use crate::common::{
    release_artifact, InMemoryStore, StoreConnectorFactory, TimestampingVersionResolver,
};

mod common;

fn system_with(store: &Arc<InMemoryStore>) -> RepositorySystem {
    RepositorySystem::builder()
        .connector_factory(Arc::new(StoreConnectorFactory(Arc::clone(store))))
        .build()
}

fn session(system: &RepositorySystem, basedir: &std::path::Path) -> Session {
    system
        .new_session_builder(basedir, ConfigProperties::default())
        .build()
}

fn central() -> RemoteRepository {
    RemoteRepository::new("central", "https://repo.example.org/")
}

#[test]
fn cold_resolve_single_remote() -> Result<()> {
    let cache = tempfile::tempdir()?;
    let store = InMemoryStore::serving(&[("org.example:lib:jar:1.0", b"jar-bytes")]);
    let system = system_with(&store);
    let session = session(&system, cache.path());

    let request = ArtifactRequest::new(release_artifact("lib")).with_repositories(vec![central()]);
    let results = system.resolve_artifacts(&session, vec![request]).unwrap();

    assert_eq!(store.gets.load(Ordering::SeqCst), 1);
    let path = results[0].artifact.as_ref().unwrap().path().unwrap();
    assert_eq!(path, cache.path().join("org/example/lib/1.0/lib-1.0.jar"));
    assert_eq!(fs_err::read(path)?, b"jar-bytes");

    let tracking =
        fs_err::read_to_string(cache.path().join("org/example/lib/1.0/_remote.repositories"))?;
    assert!(tracking.contains("lib-1.0.jar>central"));
    Ok(())
}

#[test]
fn warm_resolve_hits_cache_without_network() -> Result<()> {
    let cache = tempfile::tempdir()?;
    let store = InMemoryStore::serving(&[("org.example:lib:jar:1.0", b"jar-bytes")]);
    let system = system_with(&store);
    let session = session(&system, cache.path());

    for _ in 0..2 {
        let request =
            ArtifactRequest::new(release_artifact("lib")).with_repositories(vec![central()]);
        let results = system.resolve_artifacts(&session, vec![request]).unwrap();
        assert!(results[0].is_resolved());
    }
    assert_eq!(store.gets.load(Ordering::SeqCst), 1);
    Ok(())
}

#[test]
fn snapshot_normalization_returns_sibling() -> Result<()> {
    let cache = tempfile::tempdir()?;
    let store = InMemoryStore::serving(&[(
        "org.example:lib:jar:1.0-20200101.120000-3",
        b"snapshot-bytes",
    )]);
    let system = RepositorySystem::builder()
        .connector_factory(Arc::new(StoreConnectorFactory(Arc::clone(&store))))
        .version_resolver(Arc::new(TimestampingVersionResolver))
        .build();
    let session = session(&system, cache.path());

    let snapshots = RemoteRepository::new("snapshots", "https://repo.example.org/")
        .with_snapshot_policy(RepositoryPolicy::new(true));
    let request = ArtifactRequest::new(Artifact::new("org.example", "lib", "jar", "1.0-SNAPSHOT"))
        .with_repositories(vec![snapshots]);
    let results = system.resolve_artifacts(&session, vec![request]).unwrap();

    let path = results[0].artifact.as_ref().unwrap().path().unwrap();
    assert_eq!(
        path,
        cache
            .path()
            .join("org/example/lib/1.0-SNAPSHOT/lib-1.0-SNAPSHOT.jar")
    );

    let timestamped = path.with_file_name("lib-1.0-20200101.120000-3.jar");
    let original = fs_err::metadata(&timestamped)?;
    let normalized = fs_err::metadata(path)?;
    assert_eq!(original.len(), normalized.len());
    assert_eq!(original.modified()?, normalized.modified()?);
    Ok(())
}

#[test]
fn concurrent_resolution_downloads_once() -> Result<()> {
    let cache = tempfile::tempdir()?;
    let store = InMemoryStore::serving(&[("org.example:lib:jar:1.0", b"jar-bytes")]);
    let system = system_with(&store);
    let session = session(&system, cache.path());

    let paths: Vec<_> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..4)
            .map(|_| {
                scope.spawn(|| {
                    let request = ArtifactRequest::new(release_artifact("lib"))
                        .with_repositories(vec![central()]);
                    let results = system.resolve_artifacts(&session, vec![request]).unwrap();
                    results[0].artifact.as_ref().unwrap().path().unwrap().to_path_buf()
                })
            })
            .collect();
        handles.into_iter().map(|handle| handle.join().unwrap()).collect()
    });

    assert_eq!(store.gets.load(Ordering::SeqCst), 1);
    assert!(paths.windows(2).all(|pair| pair[0] == pair[1]));
    assert_eq!(fs_err::read(&paths[0])?, b"jar-bytes");
    Ok(())
}

#[test]
fn offline_session_uses_prior_cache() -> Result<()> {
    let cache = tempfile::tempdir()?;
    let store = InMemoryStore::serving(&[("org.example:lib:jar:1.0", b"jar-bytes")]);
    let system = system_with(&store);

    let warm = session(&system, cache.path());
    let request = ArtifactRequest::new(release_artifact("lib")).with_repositories(vec![central()]);
    system.resolve_artifacts(&warm, vec![request.clone()]).unwrap();

    let offline = system
        .new_session_builder(cache.path(), ConfigProperties::default())
        .offline(true)
        .build();
    let results = system.resolve_artifacts(&offline, vec![request]).unwrap();

    assert!(results[0].is_resolved());
    assert!(results[0].exceptions.is_empty());
    assert_eq!(store.gets.load(Ordering::SeqCst), 1);
    Ok(())
}

#[test]
fn batch_failure_carries_every_result() {
    let cache = tempfile::tempdir().unwrap();
    let store = InMemoryStore::serving(&[("org.example:present:jar:1.0", b"bytes")]);
    let system = system_with(&store);
    let session = session(&system, cache.path());

    let requests = vec![
        ArtifactRequest::new(release_artifact("present")).with_repositories(vec![central()]),
        ArtifactRequest::new(release_artifact("absent")).with_repositories(vec![central()]),
    ];
    let err = system.resolve_artifacts(&session, requests).unwrap_err();
    let ResolveError::Resolution(aggregate) = err else {
        panic!("expected an aggregated resolution failure");
    };
    assert_eq!(aggregate.results.len(), 2);
    assert!(aggregate.results[0].is_resolved());
    assert!(aggregate.results[1].is_missing());
}

#[test]
fn split_repository_layout_separates_origins() -> Result<()> {
    let cache = tempfile::tempdir()?;
    let store = InMemoryStore::serving(&[("org.example:lib:jar:1.0", b"jar-bytes")]);
    let system = system_with(&store);
    let mut config = ConfigProperties::default();
    config.set("quarry.dynamicLocalRepository.composer", "split-repository");
    let session = system.new_session_builder(cache.path(), config).build();

    for id in ["mirror-a", "mirror-b"] {
        let remote = RemoteRepository::new(id, format!("https://{id}.example.org/"));
        let request =
            ArtifactRequest::new(release_artifact("lib")).with_repositories(vec![remote]);
        let results = system.resolve_artifacts(&session, vec![request]).unwrap();
        assert!(results[0].is_resolved());
    }

    // Same coordinates, two physically separate caches and tracking files.
    for id in ["mirror-a", "mirror-b"] {
        let file = cache
            .path()
            .join("cached/releases")
            .join(id)
            .join("org/example/lib/1.0/lib-1.0.jar");
        assert!(file.is_file(), "{} missing", file.display());
        let tracking = fs_err::read_to_string(
            file.parent().unwrap().join("_remote.repositories"),
        )?;
        assert!(tracking.contains(&format!("lib-1.0.jar>{id}")));
    }
    assert_eq!(store.gets.load(Ordering::SeqCst), 2);
    Ok(())
}

#[test]
fn metadata_parallel_fetch_with_partial_failure() -> Result<()> {
    let cache = tempfile::tempdir()?;
    let store = InMemoryStore::serving(&[("org.example:lib:/versions.meta", b"<versions/>")]);
    store.mark_unavailable("mirror-three");
    let system = system_with(&store);
    let session = session(&system, cache.path());

    let aggregator = RemoteRepository::new("aggregator", "https://aggregator.example.org/")
        .as_repository_manager()
        .with_mirrored(vec![
            RemoteRepository::new("mirror-one", "https://one.example.org/"),
            RemoteRepository::new("mirror-two", "https://two.example.org/"),
            RemoteRepository::new("mirror-three", "https://three.example.org/"),
        ]);
    let metadata = Metadata::new("org.example", "lib", "", "versions.meta", Nature::Release);
    let results = system
        .resolve_metadata(
            &session,
            vec![MetadataRequest::new(metadata).with_repository(aggregator)],
        )
        .unwrap();

    // One fetch per authoritative source, failures included.
    assert_eq!(store.gets.load(Ordering::SeqCst), 3);
    assert!(results[0].updated);
    assert!(results[0].exception.is_none());
    assert!(results[0].metadata.as_ref().unwrap().path().is_some());

    // All three authoritatives got their update-check record.
    let tracking = fs_err::read_to_string(
        cache.path().join("org/example/lib/_remote.repositories"),
    )?;
    for origin in ["mirror-one", "mirror-two", "mirror-three"] {
        assert!(
            tracking.contains(&format!("versions-aggregator.meta>{origin}:lastUpdated")),
            "missing update record for {origin}"
        );
    }
    Ok(())
}

#[test]
fn never_policy_suppresses_refetch_after_success() -> Result<()> {
    let cache = tempfile::tempdir()?;
    let store = InMemoryStore::serving(&[("org.example:lib:jar:1.0", b"jar-bytes")]);
    let system = system_with(&store);
    let session = session(&system, cache.path());

    let never = central().with_release_policy(
        RepositoryPolicy::new(true).with_update_policy("never"),
    );
    for _ in 0..2 {
        let request = ArtifactRequest::new(release_artifact("lib"))
            .with_repositories(vec![never.clone()]);
        let results = system.resolve_artifacts(&session, vec![request]).unwrap();
        assert!(results[0].is_resolved());
    }
    assert_eq!(store.gets.load(Ordering::SeqCst), 1);
    Ok(())
}
