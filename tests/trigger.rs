// tests/trigger.rs

mod common;

use std::error::Error;
use std::sync::Arc;

use common::*;
use ingestflow::engine::EngineBuilder;
use ingestflow::errors::EngineError;
use ingestflow::fs::mock::MockFileSystem;
use ingestflow::types::{PackageStatus, Terminal, UnitType};
use uuid::Uuid;

type TestResult = Result<(), Box<dyn Error>>;

const WATCHED: &str = "watchedDirectories/approve";

fn config() -> ingestflow::config::ConfigFile {
    WorkflowBuilder::new()
        .trigger_capacity(1)
        .watched(WATCHED, UnitType::Sip, "review")
        .link("review", LinkBuilder::choice(&["archive", "discard"]).build())
        .link(
            "archive",
            LinkBuilder::task("archive")
                .args(&["%SIPUUID%", "%SIPName%"])
                .on_terminal(0, Terminal::Completed)
                .default_terminal(Terminal::Failed)
                .build(),
        )
        .link(
            "discard",
            LinkBuilder::set_variable("discarded", "yes")
                .default_terminal(Terminal::Rejected)
                .build(),
        )
        .build()
}

#[tokio::test]
async fn start_ingest_then_resume_through_trigger() -> TestResult {
    init_tracing();
    let fs = MockFileSystem::new();
    let uuid = Uuid::new_v4();
    let path = format!("{SHARED}/{WATCHED}/maps-{uuid}");
    fs.add_dir(&path);

    let archive = FakeScript::exit(0);
    let engine = EngineBuilder::new(config())
        .registry(registry_of(&[("archive", &archive)]))
        .filesystem(Arc::new(fs.clone()))
        .watch(false)
        .start()
        .await?;
    let trigger = engine.trigger();

    let started = with_timeout(trigger.start_ingest(&path, 0)).await?;
    assert_eq!(started, Some(uuid));
    with_timeout(engine.wait_idle()).await;

    with_timeout(trigger.resume(uuid, "archive")).await?;
    with_timeout(engine.wait_idle()).await;

    let pkg = engine.store().package(uuid)?.ok_or("missing")?;
    assert_eq!(pkg.status, PackageStatus::Completed);
    assert_eq!(
        archive.calls()[0].arguments,
        vec![uuid.to_string(), "maps".to_string()]
    );
    engine.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn trigger_reports_unknown_package() -> TestResult {
    init_tracing();
    let archive = FakeScript::exit(0);
    let engine = EngineBuilder::new(config())
        .registry(registry_of(&[("archive", &archive)]))
        .filesystem(Arc::new(MockFileSystem::new()))
        .watch(false)
        .start()
        .await?;

    let missing = Uuid::new_v4();
    let result = with_timeout(engine.trigger().resume(missing, "archive")).await;
    assert!(matches!(result, Err(EngineError::PackageNotFound(id)) if id == missing));
    engine.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn many_concurrent_requests_are_all_answered() -> TestResult {
    init_tracing();
    let fs = MockFileSystem::new();
    let mut ids = Vec::new();
    for i in 0..8 {
        let uuid = Uuid::new_v4();
        fs.add_dir(format!("{SHARED}/{WATCHED}/pkg{i}-{uuid}"));
        ids.push(uuid);
    }

    let archive = FakeScript::exit(0);
    let engine = EngineBuilder::new(config())
        .registry(registry_of(&[("archive", &archive)]))
        .filesystem(Arc::new(fs.clone()))
        .watch(false)
        .start()
        .await?;
    assert_eq!(engine.scan_watched_dirs()?, 8);
    with_timeout(engine.wait_idle()).await;

    let trigger = engine.trigger();
    let requests = ids.iter().map(|id| {
        let trigger = trigger.clone();
        let id = *id;
        tokio::spawn(async move { trigger.resume(id, "discard").await })
    });
    for handle in requests.collect::<Vec<_>>() {
        with_timeout(handle).await??;
    }
    with_timeout(engine.wait_idle()).await;

    for id in ids {
        let pkg = engine.store().package(id)?.ok_or("missing")?;
        assert_eq!(pkg.status, PackageStatus::Rejected);
    }
    engine.shutdown().await?;

    let after = engine.trigger().resume(Uuid::new_v4(), "discard").await;
    assert!(matches!(after, Err(EngineError::Shutdown)));
    Ok(())
}

#[tokio::test]
async fn lists_active_packages_and_pending_decisions() -> TestResult {
    init_tracing();
    let fs = MockFileSystem::new();
    let mut ids = Vec::new();
    for i in 0..3 {
        let uuid = Uuid::new_v4();
        fs.add_dir(format!("{SHARED}/{WATCHED}/pkg{i}-{uuid}"));
        ids.push(uuid);
    }

    let archive = FakeScript::exit(0);
    let engine = EngineBuilder::new(config())
        .registry(registry_of(&[("archive", &archive)]))
        .filesystem(Arc::new(fs.clone()))
        .watch(false)
        .start()
        .await?;
    assert_eq!(engine.scan_watched_dirs()?, 3);
    with_timeout(engine.wait_idle()).await;

    let trigger = engine.trigger();
    with_timeout(trigger.resume(ids[0], "discard")).await?;
    with_timeout(engine.wait_idle()).await;

    let mut active: Vec<Uuid> = with_timeout(trigger.list_active_packages())
        .await?
        .into_iter()
        .map(|p| p.uuid)
        .collect();
    active.sort();
    let mut expected = ids[1..].to_vec();
    expected.sort();
    assert_eq!(active, expected);

    let mut parked = with_timeout(trigger.list_awaiting_decisions()).await?;
    parked.sort_by_key(|d| d.package);
    assert_eq!(parked.len(), 2);
    for (decision, id) in parked.iter().zip(&expected) {
        assert_eq!(decision.package, *id);
        assert_eq!(decision.link, "review");
        assert_eq!(decision.choices, vec!["archive".to_string(), "discard".to_string()]);
    }
    engine.shutdown().await?;
    Ok(())
}
