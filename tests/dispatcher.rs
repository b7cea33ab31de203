// tests/dispatcher.rs
//
// Worker pool and dispatcher: fan-out, retries, lost tasks, fan-in and
// queue admission.

mod common;

use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use common::*;
use ingestflow::config::ConfigFile;
use ingestflow::errors::EngineError;
use ingestflow::exec::{
    Dispatcher, Invocation, RegisteredScript, ScriptContract, ScriptOutcome, ScriptRegistry,
    WorkItem, WorkerPool,
};
use ingestflow::fs::FileSystem;
use ingestflow::metrics::{spawn_metrics_sink, MetricsEvent, MetricsSender};
use ingestflow::store::{JobRecord, MemoryStore, Package, Store};
use ingestflow::types::{JobStatus, TaskStatus, Terminal, UnitType};
use ingestflow::workflow::{FanInPolicy, JobOutcome};
use uuid::Uuid;

type TestResult = Result<(), Box<dyn Error>>;

const PKG_ROOT: &str = "/shared/currentlyProcessing/pkg";

struct Fixture {
    dispatcher: Dispatcher,
    store: Arc<dyn Store>,
    package: Package,
    config: ConfigFile,
}

fn fixture(
    config: ConfigFile,
    registry: ScriptRegistry,
    files: &[&str],
    capacity: usize,
    metrics: MetricsSender,
) -> Result<Fixture, Box<dyn Error>> {
    let fs: Arc<dyn FileSystem> = mock_package(PKG_ROOT, files);
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let (package, _) = store.create_package_if_absent(Package::new(
        Uuid::new_v4(),
        UnitType::Transfer,
        format!("{PKG_ROOT}/"),
        Some(0),
    ))?;
    let pool = Arc::new(WorkerPool::start(capacity, 0));
    let dispatcher = Dispatcher::new(
        pool,
        Arc::new(registry),
        Arc::clone(&store),
        fs,
        metrics,
        PathBuf::from(SHARED),
        1,
    );
    Ok(Fixture {
        dispatcher,
        store,
        package,
        config,
    })
}

impl Fixture {
    async fn run(&self, link: &str) -> Result<(JobRecord, JobOutcome), Box<dyn Error>> {
        let mut job = JobRecord::new(self.package.uuid, link);
        self.store.insert_job(&job)?;
        let link = self.config.graph.get(link).ok_or("unknown link")?;
        let outcome = self.dispatcher.run_job(&mut job, link, &self.package).await?;
        Ok((job, outcome))
    }
}

fn per_file_workflow(policy: FanInPolicy) -> ConfigFile {
    WorkflowBuilder::new()
        .link(
            "characterize",
            LinkBuilder::task("identify")
                .per_file()
                .filter_subdir("objects")
                .args(&["%relativeLocation%", "%SIPUUID%"])
                .fan_in(policy)
                .on_terminal(0, Terminal::Completed)
                .default_terminal(Terminal::Failed)
                .build(),
        )
        .build()
}

#[tokio::test]
async fn per_file_link_runs_one_task_per_matching_file() -> TestResult {
    init_tracing();
    let identify = FakeScript::exit(0);
    let fx = fixture(
        per_file_workflow(FanInPolicy::FirstAbnormal),
        registry_of(&[("identify", &identify)]),
        &["objects/a.tif", "objects/sub/b.tif", "metadata/m.xml"],
        2,
        MetricsSender::disabled(),
    )?;

    let (job, outcome) = with_timeout(fx.run("characterize")).await?;
    assert_eq!(outcome, JobOutcome::Code(0));
    assert_eq!(job.status, JobStatus::Completed);

    let mut seen: Vec<String> = identify.calls().iter().map(|c| c.arguments[0].clone()).collect();
    seen.sort();
    assert_eq!(seen, vec!["objects/a.tif", "objects/sub/b.tif"]);

    let tasks = fx.store.tasks_for(job.id)?;
    assert_eq!(tasks.len(), 2);
    assert!(tasks.iter().all(|t| t.status == TaskStatus::Done));
    assert!(tasks.iter().all(|t| t.arguments[1] == fx.package.uuid.to_string()));
    Ok(())
}

#[tokio::test]
async fn fan_in_reports_first_abnormal_code() -> TestResult {
    init_tracing();
    let identify = FakeScript::failing_on("b.tif", 3);
    let fx = fixture(
        per_file_workflow(FanInPolicy::FirstAbnormal),
        registry_of(&[("identify", &identify)]),
        &["objects/a.tif", "objects/b.tif", "objects/c.tif"],
        3,
        MetricsSender::disabled(),
    )?;

    let (job, outcome) = with_timeout(fx.run("characterize")).await?;
    assert_eq!(outcome, JobOutcome::Code(3));
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.exit_code, Some(3));
    Ok(())
}

#[tokio::test]
async fn any_success_policy_tolerates_failures() -> TestResult {
    init_tracing();
    let identify = FakeScript::failing_on("b.tif", 3);
    let fx = fixture(
        per_file_workflow(FanInPolicy::AnySuccess),
        registry_of(&[("identify", &identify)]),
        &["objects/a.tif", "objects/b.tif"],
        2,
        MetricsSender::disabled(),
    )?;

    let (_, outcome) = with_timeout(fx.run("characterize")).await?;
    assert_eq!(outcome, JobOutcome::Code(0));
    Ok(())
}

#[tokio::test]
async fn per_file_without_files_runs_one_package_task() -> TestResult {
    init_tracing();
    let identify = FakeScript::exit(0);
    let config = WorkflowBuilder::new()
        .link(
            "scan",
            LinkBuilder::task("identify")
                .per_file()
                .filter_subdir("objects")
                .args(&["%SIPDirectory%"])
                .default_terminal(Terminal::Completed)
                .build(),
        )
        .build();
    let fx = fixture(
        config,
        registry_of(&[("identify", &identify)]),
        &["metadata/only.xml"],
        1,
        MetricsSender::disabled(),
    )?;

    let (job, outcome) = with_timeout(fx.run("scan")).await?;
    assert_eq!(outcome, JobOutcome::Code(0));
    assert_eq!(identify.call_count(), 1);
    assert_eq!(identify.calls()[0].arguments, vec![format!("{PKG_ROOT}/")]);
    assert_eq!(identify.calls()[0].working_dir, PathBuf::from(PKG_ROOT));
    assert_eq!(fx.store.tasks_for(job.id)?.len(), 1);
    Ok(())
}

fn single_task(retries: Option<u32>) -> ConfigFile {
    let mut link = LinkBuilder::task("flaky")
        .on_terminal(0, Terminal::Completed)
        .default_terminal(Terminal::Failed)
        .indeterminate_terminal(Terminal::Failed);
    if let Some(n) = retries {
        link = link.retries(n);
    }
    WorkflowBuilder::new().link("only", link.build()).build()
}

#[tokio::test]
async fn indeterminate_task_is_retried() -> TestResult {
    init_tracing();
    let flaky = FakeScript::sequence(vec![
        FakeResponse::Error("connection reset".into()),
        FakeResponse::Exit(0),
    ]);
    let fx = fixture(
        single_task(None),
        registry_of(&[("flaky", &flaky)]),
        &[],
        1,
        MetricsSender::disabled(),
    )?;

    let (job, outcome) = with_timeout(fx.run("only")).await?;
    assert_eq!(outcome, JobOutcome::Code(0));
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(flaky.call_count(), 2);

    let tasks = fx.store.tasks_for(job.id)?;
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].attempt, 1);
    assert_eq!(tasks[0].outcome, Some(ScriptOutcome::Success));
    Ok(())
}

#[tokio::test]
async fn exhausted_retries_leave_job_indeterminate() -> TestResult {
    init_tracing();
    let flaky = FakeScript::error("no answer");
    let fx = fixture(
        single_task(Some(2)),
        registry_of(&[("flaky", &flaky)]),
        &[],
        1,
        MetricsSender::disabled(),
    )?;

    let (job, outcome) = with_timeout(fx.run("only")).await?;
    assert!(matches!(outcome, JobOutcome::Indeterminate(_)));
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.indeterminate.is_some());
    assert_eq!(job.exit_code, None);
    assert_eq!(flaky.call_count(), 3);
    Ok(())
}

#[tokio::test]
async fn panicking_worker_loses_the_task() -> TestResult {
    init_tracing();
    let crash = FakeScript::panicking("segfault");
    let fx = fixture(
        single_task(Some(0)),
        registry_of(&[("flaky", &crash)]),
        &[],
        1,
        MetricsSender::disabled(),
    )?;

    let (job, outcome) = with_timeout(fx.run("only")).await?;
    assert!(matches!(outcome, JobOutcome::Indeterminate(_)));
    assert_eq!(job.status, JobStatus::Failed);

    let tasks = fx.store.tasks_for(job.id)?;
    assert_eq!(tasks[0].status, TaskStatus::Lost);
    assert!(matches!(tasks[0].outcome, Some(ScriptOutcome::Indeterminate(_))));

    // the worker survives the panic
    let ok = FakeScript::exit(0);
    let fx2 = fixture(
        single_task(Some(0)),
        registry_of(&[("flaky", &ok)]),
        &[],
        1,
        MetricsSender::disabled(),
    )?;
    let (_, outcome) = with_timeout(fx2.run("only")).await?;
    assert_eq!(outcome, JobOutcome::Code(0));
    Ok(())
}

#[tokio::test]
async fn job_status_override_is_applied() -> TestResult {
    init_tracing();
    let script = FakeScript::exit(1);
    let config = WorkflowBuilder::new()
        .link(
            "warn_only",
            LinkBuilder::task("s")
                .on_terminal(1, Terminal::Completed)
                .job_status("1", JobStatus::Completed)
                .build(),
        )
        .build();
    let fx = fixture(config, registry_of(&[("s", &script)]), &[], 1, MetricsSender::disabled())?;

    let (job, outcome) = with_timeout(fx.run("warn_only")).await?;
    assert_eq!(outcome, JobOutcome::Code(1));
    assert_eq!(job.status, JobStatus::Completed);
    Ok(())
}

#[tokio::test]
async fn unknown_placeholder_fails_dispatch() -> TestResult {
    init_tracing();
    let script = FakeScript::exit(0);
    let config = WorkflowBuilder::new()
        .link(
            "bad",
            LinkBuilder::task("s")
                .args(&["%bogus%"])
                .default_terminal(Terminal::Completed)
                .build(),
        )
        .build();
    let fx = fixture(config, registry_of(&[("s", &script)]), &[], 1, MetricsSender::disabled())?;

    let mut job = JobRecord::new(fx.package.uuid, "bad");
    fx.store.insert_job(&job)?;
    let link = fx.config.graph.get("bad").ok_or("unknown link")?;
    let result = fx.dispatcher.run_job(&mut job, link, &fx.package).await;
    assert!(matches!(result, Err(EngineError::Argument(_))));
    assert_eq!(script.call_count(), 0);
    Ok(())
}

#[tokio::test]
async fn task_durations_are_emitted() -> TestResult {
    init_tracing();
    let sink = RecordingSink::new();
    let (metrics, _task) = spawn_metrics_sink(sink.boxed(), 64);
    let script = FakeScript::exit(0);
    let fx = fixture(single_task(None), registry_of(&[("flaky", &script)]), &[], 1, metrics)?;

    with_timeout(fx.run("only")).await?;
    with_timeout(wait_until(|| {
        sink.count(|e| matches!(e, MetricsEvent::JobCompleted { .. })) == 1
    }))
    .await;
    assert_eq!(
        sink.count(|e| matches!(e, MetricsEvent::TaskDuration { script, .. } if script == "flaky")),
        1
    );
    Ok(())
}

fn item(script: &Arc<RegisteredScript>) -> WorkItem {
    WorkItem {
        script: Arc::clone(script),
        invocation: Invocation {
            task_id: Uuid::new_v4(),
            script: script.name.clone(),
            arguments: vec![],
            working_dir: PathBuf::from("/"),
        },
    }
}

fn registered(name: &str, fake: &FakeScript) -> Arc<RegisteredScript> {
    Arc::new(RegisteredScript {
        name: name.to_string(),
        contract: ScriptContract::new(),
        handler: fake.handler(),
    })
}

#[tokio::test]
async fn pool_never_exceeds_capacity() -> TestResult {
    init_tracing();
    let fake = FakeScript::exit(0).with_delay(Duration::from_millis(20));
    let script = registered("slow", &fake);
    let pool = WorkerPool::start(2, 0);

    let receivers = pool.submit_batch((0..10).map(|_| item(&script)).collect())?;
    for rx in receivers {
        let done = with_timeout(rx).await?;
        assert_eq!(done.outcome, ScriptOutcome::Success);
    }

    let stats = pool.stats();
    assert_eq!(stats.completed, 10);
    assert!(stats.peak_in_flight <= 2, "peak {}", stats.peak_in_flight);
    assert!(fake.peak_running() <= 2);
    assert_eq!(stats.queued, 0);
    Ok(())
}

#[tokio::test]
async fn bounded_queue_rejects_whole_batch() -> TestResult {
    init_tracing();
    let fake = FakeScript::hanging();
    let script = registered("stuck", &fake);
    let pool = WorkerPool::start(1, 2);

    // an empty queue admits even an oversized batch
    let _held = pool.submit_batch((0..3).map(|_| item(&script)).collect())?;

    match pool.submit_batch(vec![item(&script)]) {
        Err(EngineError::QueueFull(_)) => {}
        other => panic!("expected QueueFull, got {:?}", other.map(|r| r.len())),
    }
    assert!(pool.stats().queued >= 2);

    pool.abort();
    assert!(matches!(
        pool.submit_batch(vec![item(&script)]),
        Err(EngineError::Shutdown)
    ));
    Ok(())
}

#[tokio::test]
async fn aborted_pool_drops_in_flight_replies() -> TestResult {
    init_tracing();
    let fake = FakeScript::hanging();
    let script = registered("stuck", &fake);
    let pool = WorkerPool::start(1, 0);

    let mut receivers = pool.submit_batch(vec![item(&script)])?;
    with_timeout(wait_until(|| fake.call_count() == 1)).await;
    pool.abort();

    let rx = receivers.remove(0);
    assert!(with_timeout(rx).await.is_err(), "reply should be dropped");
    Ok(())
}
