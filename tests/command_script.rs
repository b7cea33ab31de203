// tests/command_script.rs
//
// CommandScript against a real shell.

#![cfg(unix)]

mod common;

use std::error::Error;
use std::path::PathBuf;

use common::*;
use ingestflow::exec::{
    CommandScript, Invocation, ScriptContract, ScriptHandler, ScriptOutcome, StructuredOutcome,
};
use uuid::Uuid;

type TestResult = Result<(), Box<dyn Error>>;

fn invocation(args: &[&str], dir: PathBuf) -> Invocation {
    Invocation {
        task_id: Uuid::new_v4(),
        script: "test_script".to_string(),
        arguments: args.iter().map(|a| a.to_string()).collect(),
        working_dir: dir,
    }
}

#[tokio::test]
async fn passes_arguments_and_captures_output() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let script = CommandScript::new("printf '%s|' ")?;

    let report = with_timeout(script.run(&invocation(&["a b", "c"], dir.path().to_path_buf()))).await?;
    assert_eq!(report.exit_code, Some(0));
    assert_eq!(report.stdout, "a b|c|");
    Ok(())
}

#[tokio::test]
async fn non_utf8_output_does_not_hide_exit_code() -> TestResult {
    init_tracing();
    let script = CommandScript::new("printf 'caf\\351\\n'; printf 'bad \\377\\n' >&2; exit 0; ")?;

    let report = with_timeout(script.run(&invocation(&[], PathBuf::from("/nonexistent")))).await?;
    assert_eq!(report.exit_code, Some(0));
    assert_eq!(report.stdout, "caf\u{FFFD}\n");
    assert_eq!(report.stderr, "bad \u{FFFD}\n");
    assert_eq!(ScriptContract::new().classify(&report), ScriptOutcome::Success);
    Ok(())
}

#[tokio::test]
async fn runs_in_package_directory() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    std::fs::write(dir.path().join("marker.txt"), "hi")?;
    let script = CommandScript::new("cat marker.txt; true")?;

    let report = with_timeout(script.run(&invocation(&[], dir.path().to_path_buf()))).await?;
    assert_eq!(report.exit_code, Some(0));
    assert!(report.stdout.starts_with("hi"));
    Ok(())
}

#[tokio::test]
async fn non_zero_exit_is_classified_with_stderr_detail() -> TestResult {
    init_tracing();
    let script = CommandScript::new("echo 'checksum mismatch' >&2; exit 3; :")?;
    let report = with_timeout(script.run(&invocation(&[], PathBuf::from("/nonexistent")))).await?;

    assert_eq!(report.exit_code, Some(3));
    let outcome = ScriptContract::new().classify(&report);
    assert_eq!(
        outcome,
        ScriptOutcome::Failure {
            code: 3,
            detail: Some("checksum mismatch".to_string())
        }
    );
    Ok(())
}

#[tokio::test]
async fn structured_outcome_line_is_parsed() -> TestResult {
    init_tracing();
    let script = CommandScript::new("echo '@outcome unknown tool crashed'; exit 75; :")?;
    let report = with_timeout(script.run(&invocation(&[], PathBuf::from("/")))).await?;

    assert_eq!(
        report.structured,
        Some(StructuredOutcome {
            state: "unknown".to_string(),
            details: Some("tool crashed".to_string()),
        })
    );
    let outcome = ScriptContract::new()
        .with_indeterminate_codes([75])
        .classify(&report);
    assert_eq!(
        outcome,
        ScriptOutcome::Indeterminate("unknown: tool crashed".to_string())
    );
    Ok(())
}

#[tokio::test]
async fn killed_process_is_indeterminate() -> TestResult {
    init_tracing();
    let script = CommandScript::new("kill -9 $$; :")?;
    let report = with_timeout(script.run(&invocation(&[], PathBuf::from("/")))).await?;
    assert_eq!(report.exit_code, None);
    assert!(ScriptContract::new().classify(&report).is_indeterminate());
    Ok(())
}

#[test]
fn rejects_invalid_outcome_pattern() {
    assert!(CommandScript::with_pattern("true", "(").is_err());
}
