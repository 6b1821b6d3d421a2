//! End-to-end install and deploy scenarios.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use anyhow::Result;

use quarry::{
    ArtifactRequest, ConfigProperties, DeployRequest, InstallRequest, RemoteRepository,
    RepositorySystem, Session,
};

use crate::common::{release_artifact, InMemoryStore, StoreConnectorFactory};

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

#[test]
fn install_then_resolve_returns_installed_path() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let cache = dir.path().join("cache");
    let store = InMemoryStore::serving(&[]);
    let system = system_with(&store);
    let session = session(&system, &cache);

    let built = dir.path().join("target/lib-1.0.jar");
    fs_err::create_dir_all(built.parent().unwrap())?;
    fs_err::write(&built, b"built-bytes")?;

    system.install(
        &session,
        InstallRequest::new().with_artifact(release_artifact("lib").with_path(&built)),
    )?;

    // Resolving the same coordinates serves the installed copy, without any
    // remote in sight.
    let results = system
        .resolve_artifacts(&session, vec![ArtifactRequest::new(release_artifact("lib"))])
        .unwrap();
    let path = results[0].artifact.as_ref().unwrap().path().unwrap();
    assert_eq!(path, cache.join("org/example/lib/1.0/lib-1.0.jar"));
    assert_eq!(fs_err::read(path)?, b"built-bytes");
    assert_eq!(store.gets.load(Ordering::SeqCst), 0);

    // A second resolve returns the identical path.
    let again = system
        .resolve_artifacts(&session, vec![ArtifactRequest::new(release_artifact("lib"))])
        .unwrap();
    assert_eq!(again[0].artifact.as_ref().unwrap().path().unwrap(), path);
    Ok(())
}

#[test]
fn deploy_then_resolve_round_trips_bytes() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let store = InMemoryStore::serving(&[]);
    let system = system_with(&store);

    let publisher = session(&system, &dir.path().join("publisher-cache"));
    let built = dir.path().join("lib-1.0.jar");
    fs_err::write(&built, b"deployed-bytes")?;
    let releases = RemoteRepository::new("releases", "https://releases.example.org/");
    system.deploy(
        &publisher,
        DeployRequest::new(releases.clone())
            .with_artifact(release_artifact("lib").with_path(&built)),
    )?;
    assert_eq!(store.puts.load(Ordering::SeqCst), 1);
    assert_eq!(store.stored("org.example:lib:jar:1.0").as_deref(), Some(&b"deployed-bytes"[..]));

    // A consumer with a fresh cache resolves the deployed artifact from the
    // same remote and sees the same bytes.
    let consumer = session(&system, &dir.path().join("consumer-cache"));
    let request =
        ArtifactRequest::new(release_artifact("lib")).with_repositories(vec![releases]);
    let results = system.resolve_artifacts(&consumer, vec![request]).unwrap();
    let path = results[0].artifact.as_ref().unwrap().path().unwrap();
    assert_eq!(fs_err::read(path)?, b"deployed-bytes");
    Ok(())
}

#[test]
fn session_end_handlers_run_in_reverse_order() {
    let dir = tempfile::tempdir().unwrap();
    let store = InMemoryStore::serving(&[]);
    let system = system_with(&store);
    let session = session(&system, dir.path());

    let order = Arc::new(std::sync::Mutex::new(Vec::new()));
    for index in 0..3 {
        let order = Arc::clone(&order);
        system
            .lifecycle()
            .on_session_end(&session, format!("handler-{index}"), move || {
                order.lock().unwrap().push(index);
                Ok(())
            });
    }

    system.end_session(&session).unwrap();
    assert_eq!(*order.lock().unwrap(), vec![2, 1, 0]);

    // Ending twice is a no-op.
    system.end_session(&session).unwrap();
    assert_eq!(order.lock().unwrap().len(), 3);
}
