// tests/chain.rs
//
// The JobChain state machine on its own: no store, no workers.

mod common;

use std::error::Error;

use common::*;
use ingestflow::config::ConfigFile;
use ingestflow::engine::{ChainState, ChainStep, JobChain, Transition};
use ingestflow::errors::EngineError;
use ingestflow::store::Package;
use ingestflow::types::{PackageStatus, Terminal, UnitType};
use ingestflow::workflow::JobOutcome;
use uuid::Uuid;

type TestResult = Result<(), Box<dyn Error>>;

fn package() -> Package {
    Package::new(Uuid::new_v4(), UnitType::Transfer, "/shared/incoming/pkg/", Some(0))
}

/// verify --0--> pick (choice: normalize | reject)
/// verify --1--> rejected
/// normalize --default--> completed, indeterminate --> failed
/// reject: set_variable then terminal rejected
fn workflow() -> ConfigFile {
    WorkflowBuilder::new()
        .link(
            "verify",
            LinkBuilder::task("check")
                .on(0, "pick")
                .on_terminal(1, Terminal::Rejected)
                .build(),
        )
        .link("pick", LinkBuilder::choice(&["normalize", "reject"]).build())
        .link(
            "normalize",
            LinkBuilder::task("norm")
                .default_terminal(Terminal::Completed)
                .indeterminate_terminal(Terminal::Failed)
                .build(),
        )
        .link(
            "reject",
            LinkBuilder::set_variable("reason", "manual")
                .default_terminal(Terminal::Rejected)
                .build(),
        )
        .build()
}

fn expect_job(step: ChainStep) -> ingestflow::store::JobRecord {
    match step {
        ChainStep::RunJob(job) => job,
        other => panic!("expected a job, got {other:?}"),
    }
}

#[test]
fn task_link_yields_one_job_and_blocks() -> TestResult {
    let cfg = workflow();
    let mut pkg = package();
    let mut chain = JobChain::new(pkg.uuid, "verify");

    let job = expect_job(chain.next(&cfg.graph, &mut pkg)?);
    assert_eq!(job.link, "verify");
    assert_eq!(job.package, pkg.uuid);
    assert_eq!(chain.state(), &ChainState::AwaitingJob(job.id));
    assert_eq!(pkg.current_link.as_deref(), Some("verify"));

    // not re-entrant while a job is pending
    assert!(matches!(
        chain.next(&cfg.graph, &mut pkg),
        Err(EngineError::InvalidState(_))
    ));
    Ok(())
}

#[test]
fn success_moves_to_choice_and_parks() -> TestResult {
    let cfg = workflow();
    let mut pkg = package();
    let mut chain = JobChain::new(pkg.uuid, "verify");

    let job = expect_job(chain.next(&cfg.graph, &mut pkg)?);
    let transition = chain.complete_job(&cfg.graph, &mut pkg, job.id, &JobOutcome::Code(0))?;
    assert_eq!(transition, Transition::Moved("pick".into()));
    assert_eq!(pkg.current_link.as_deref(), Some("pick"));

    let step = chain.next(&cfg.graph, &mut pkg)?;
    assert_eq!(
        step,
        ChainStep::AwaitDecision {
            link: "pick".into(),
            choices: vec!["normalize".into(), "reject".into()],
        }
    );
    assert_eq!(chain.state(), &ChainState::AwaitingDecision);
    assert_eq!(pkg.status, PackageStatus::Active);
    Ok(())
}

#[test]
fn mapped_failure_code_reaches_terminal() -> TestResult {
    let cfg = workflow();
    let mut pkg = package();
    let mut chain = JobChain::new(pkg.uuid, "verify");

    let job = expect_job(chain.next(&cfg.graph, &mut pkg)?);
    let transition = chain.complete_job(&cfg.graph, &mut pkg, job.id, &JobOutcome::Code(1))?;
    assert_eq!(transition, Transition::Finished(PackageStatus::Rejected));
    assert_eq!(pkg.status, PackageStatus::Rejected);

    // terminal chains stay terminal
    assert_eq!(
        chain.next(&cfg.graph, &mut pkg)?,
        ChainStep::Finished(PackageStatus::Rejected)
    );
    Ok(())
}

#[test]
fn unmapped_code_without_default_is_a_fault() -> TestResult {
    let cfg = workflow();
    let mut pkg = package();
    let mut chain = JobChain::new(pkg.uuid, "verify");

    let job = expect_job(chain.next(&cfg.graph, &mut pkg)?);
    let transition = chain.complete_job(&cfg.graph, &mut pkg, job.id, &JobOutcome::Code(7))?;
    let Transition::Fault(fault) = transition else {
        panic!("expected fault, got {transition:?}");
    };
    assert_eq!(fault.link, "verify");
    assert_eq!(pkg.status, PackageStatus::Failed);
    assert_eq!(pkg.fault.as_ref(), Some(&fault));
    Ok(())
}

#[test]
fn indeterminate_never_takes_the_default_exit() -> TestResult {
    let cfg = WorkflowBuilder::new()
        .link(
            "only",
            LinkBuilder::task("s")
                .default_terminal(Terminal::Completed)
                .build(),
        )
        .build();
    let mut pkg = package();
    let mut chain = JobChain::new(pkg.uuid, "only");

    let job = expect_job(chain.next(&cfg.graph, &mut pkg)?);
    let outcome = JobOutcome::Indeterminate("worker lost".into());
    let transition = chain.complete_job(&cfg.graph, &mut pkg, job.id, &outcome)?;
    assert!(matches!(transition, Transition::Fault(_)));
    assert_ne!(pkg.status, PackageStatus::Completed);
    Ok(())
}

#[test]
fn indeterminate_follows_its_own_entry() -> TestResult {
    let cfg = workflow();
    let mut pkg = package();
    let mut chain = JobChain::new(pkg.uuid, "normalize");

    let job = expect_job(chain.next(&cfg.graph, &mut pkg)?);
    let outcome = JobOutcome::Indeterminate("timeout".into());
    let transition = chain.complete_job(&cfg.graph, &mut pkg, job.id, &outcome)?;
    assert_eq!(transition, Transition::Finished(PackageStatus::Failed));
    Ok(())
}

#[test]
fn completing_the_wrong_job_is_rejected() -> TestResult {
    let cfg = workflow();
    let mut pkg = package();
    let mut chain = JobChain::new(pkg.uuid, "verify");
    chain.next(&cfg.graph, &mut pkg)?;

    let result = chain.complete_job(&cfg.graph, &mut pkg, Uuid::new_v4(), &JobOutcome::Code(0));
    assert!(matches!(result, Err(EngineError::InvalidState(_))));
    Ok(())
}

#[test]
fn resume_applies_allowed_choice() -> TestResult {
    let cfg = workflow();
    let mut pkg = package();
    let mut chain = JobChain::new(pkg.uuid, "pick");
    chain.next(&cfg.graph, &mut pkg)?;

    assert!(matches!(
        chain.resume(&cfg.graph, &mut pkg, "verify"),
        Err(EngineError::InvalidDecision(_))
    ));

    chain.resume(&cfg.graph, &mut pkg, "normalize")?;
    assert_eq!(chain.cursor(), "normalize");
    let job = expect_job(chain.next(&cfg.graph, &mut pkg)?);
    assert_eq!(job.link, "normalize");
    Ok(())
}

#[test]
fn resume_outside_a_decision_is_rejected() -> TestResult {
    let cfg = workflow();
    let mut pkg = package();
    let mut chain = JobChain::new(pkg.uuid, "verify");
    assert!(matches!(
        chain.resume(&cfg.graph, &mut pkg, "normalize"),
        Err(EngineError::InvalidDecision(_))
    ));
    Ok(())
}

#[test]
fn set_variable_records_value_and_follows_default() -> TestResult {
    let cfg = workflow();
    let mut pkg = package();
    let mut chain = JobChain::new(pkg.uuid, "reject");

    let step = chain.next(&cfg.graph, &mut pkg)?;
    assert_eq!(step, ChainStep::Finished(PackageStatus::Rejected));
    assert_eq!(pkg.variables.get("reason").map(String::as_str), Some("manual"));
    Ok(())
}

#[test]
fn link_pull_routes_by_variable_then_default() -> TestResult {
    let cfg = WorkflowBuilder::new()
        .link(
            "choose",
            LinkBuilder::set_variable("next", "fast").default_next("pull").build(),
        )
        .link("pull", LinkBuilder::link_pull("next").default_next("slow").build())
        .link("fast", LinkBuilder::task("s").default_terminal(Terminal::Completed).build())
        .link("slow", LinkBuilder::task("s").default_terminal(Terminal::Completed).build())
        .build();

    let mut pkg = package();
    let mut chain = JobChain::new(pkg.uuid, "choose");
    let job = expect_job(chain.next(&cfg.graph, &mut pkg)?);
    assert_eq!(job.link, "fast");

    // without the variable the pull falls back to its default
    let mut other = package();
    let mut chain = JobChain::new(other.uuid, "pull");
    let job = expect_job(chain.next(&cfg.graph, &mut other)?);
    assert_eq!(job.link, "slow");
    Ok(())
}

#[test]
fn terminal_package_yields_no_job() -> TestResult {
    let cfg = workflow();
    let mut pkg = package();
    pkg.status = PackageStatus::Completed;
    let mut chain = JobChain::new(pkg.uuid, "verify");
    assert_eq!(
        chain.next(&cfg.graph, &mut pkg)?,
        ChainStep::Finished(PackageStatus::Completed)
    );
    Ok(())
}

#[test]
fn missing_cursor_link_is_a_fault() -> TestResult {
    let cfg = workflow();
    let mut pkg = package();
    let mut chain = JobChain::new(pkg.uuid, "deleted_link");
    assert!(matches!(chain.next(&cfg.graph, &mut pkg)?, ChainStep::Fault(_)));
    assert_eq!(pkg.status, PackageStatus::Failed);
    Ok(())
}
