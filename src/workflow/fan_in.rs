// src/workflow/fan_in.rs

//! Reduction of task outcomes into one job outcome.

use std::fmt;

use serde::Deserialize;

use crate::exec::ScriptOutcome;

/// Aggregate outcome of a job, as seen by the exit-code lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Code(i32),
    Indeterminate(String),
}

impl JobOutcome {
    pub fn code(&self) -> Option<i32> {
        match self {
            JobOutcome::Code(c) => Some(*c),
            JobOutcome::Indeterminate(_) => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, JobOutcome::Code(0))
    }
}

impl fmt::Display for JobOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobOutcome::Code(c) => write!(f, "exit code {c}"),
            JobOutcome::Indeterminate(detail) => write!(f, "indeterminate outcome ({detail})"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FanInPolicy {
    /// Indeterminate wins; else the first non-zero code in task order; else 0.
    #[default]
    FirstAbnormal,
    /// Numerically highest code; indeterminate still wins.
    Highest,
    /// 0 if any task succeeded, otherwise as `FirstAbnormal`.
    AnySuccess,
}

impl FanInPolicy {
    /// The result is always a code some task produced, or indeterminate.
    pub fn reduce(&self, outcomes: &[ScriptOutcome]) -> JobOutcome {
        match outcomes {
            [] => JobOutcome::Indeterminate("job produced no task outcomes".to_string()),
            [single] => single_outcome(single),
            _ => match self {
                FanInPolicy::FirstAbnormal => first_abnormal(outcomes),
                FanInPolicy::Highest => highest(outcomes),
                FanInPolicy::AnySuccess => {
                    if outcomes.iter().any(ScriptOutcome::is_success) {
                        JobOutcome::Code(0)
                    } else {
                        first_abnormal(outcomes)
                    }
                }
            },
        }
    }
}

fn single_outcome(outcome: &ScriptOutcome) -> JobOutcome {
    match outcome.code() {
        Some(code) => JobOutcome::Code(code),
        None => JobOutcome::Indeterminate(outcome.detail().unwrap_or_default().to_string()),
    }
}

fn first_indeterminate(outcomes: &[ScriptOutcome]) -> Option<JobOutcome> {
    outcomes.iter().find_map(|o| match o {
        ScriptOutcome::Indeterminate(detail) => Some(JobOutcome::Indeterminate(detail.clone())),
        _ => None,
    })
}

fn first_abnormal(outcomes: &[ScriptOutcome]) -> JobOutcome {
    if let Some(ind) = first_indeterminate(outcomes) {
        return ind;
    }
    let code = outcomes
        .iter()
        .filter_map(ScriptOutcome::code)
        .find(|c| *c != 0)
        .unwrap_or(0);
    JobOutcome::Code(code)
}

fn highest(outcomes: &[ScriptOutcome]) -> JobOutcome {
    if let Some(ind) = first_indeterminate(outcomes) {
        return ind;
    }
    let code = outcomes
        .iter()
        .filter_map(ScriptOutcome::code)
        .max()
        .unwrap_or(0);
    JobOutcome::Code(code)
}
