// src/exec/contract.rs

//! The script-invocation contract.
//!
//! A `ScriptHandler` runs one task and returns a raw `ScriptReport`. The
//! script's `ScriptContract` then classifies the report into a
//! `ScriptOutcome`. Handlers never decide success themselves.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::ScriptConfig;

/// Tagged three-state result of one task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScriptOutcome {
    Success,
    Failure { code: i32, detail: Option<String> },
    /// The script could not decide. Never treated as success.
    Indeterminate(String),
}

impl ScriptOutcome {
    pub fn code(&self) -> Option<i32> {
        match self {
            ScriptOutcome::Success => Some(0),
            ScriptOutcome::Failure { code, .. } => Some(*code),
            ScriptOutcome::Indeterminate(_) => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ScriptOutcome::Success)
    }

    pub fn is_indeterminate(&self) -> bool {
        matches!(self, ScriptOutcome::Indeterminate(_))
    }

    pub fn detail(&self) -> Option<&str> {
        match self {
            ScriptOutcome::Success => None,
            ScriptOutcome::Failure { detail, .. } => detail.as_deref(),
            ScriptOutcome::Indeterminate(detail) => Some(detail),
        }
    }
}

/// What a task is asked to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub task_id: Uuid,
    pub script: String,
    pub arguments: Vec<String>,
    /// The package location.
    pub working_dir: PathBuf,
}

/// `(state, details)` a script may print alongside its exit code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructuredOutcome {
    pub state: String,
    pub details: Option<String>,
}

/// Raw result of running a handler.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScriptReport {
    /// `None` when the process ended without a code (e.g. killed by a signal).
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub structured: Option<StructuredOutcome>,
}

impl ScriptReport {
    pub fn exit(code: i32) -> Self {
        Self {
            exit_code: Some(code),
            ..Self::default()
        }
    }
}

pub type HandlerFuture<'a> =
    Pin<Box<dyn Future<Output = anyhow::Result<ScriptReport>> + Send + 'a>>;

/// Something that can run a named script.
///
/// Production uses [`crate::exec::CommandScript`]; tests register fakes.
/// An `Err` means the handler could not tell what happened and is
/// classified as indeterminate.
pub trait ScriptHandler: Send + Sync {
    fn run<'a>(&'a self, invocation: &'a Invocation) -> HandlerFuture<'a>;
}

/// Declared behaviour of a script.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScriptContract {
    /// Exact argument count, if declared.
    pub params: Option<usize>,
    pub exit_codes: Vec<i32>,
    pub indeterminate_codes: Vec<i32>,
}

impl ScriptContract {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(cfg: &ScriptConfig) -> Self {
        Self {
            params: cfg.params,
            exit_codes: cfg.exit_codes.clone(),
            indeterminate_codes: cfg.indeterminate_codes.clone(),
        }
    }

    pub fn with_params(mut self, params: usize) -> Self {
        self.params = Some(params);
        self
    }

    pub fn with_exit_codes(mut self, codes: impl IntoIterator<Item = i32>) -> Self {
        self.exit_codes = codes.into_iter().collect();
        self
    }

    pub fn with_indeterminate_codes(mut self, codes: impl IntoIterator<Item = i32>) -> Self {
        self.indeterminate_codes = codes.into_iter().collect();
        self
    }

    pub fn classify(&self, report: &ScriptReport) -> ScriptOutcome {
        let detail = report_detail(report);
        match report.exit_code {
            None => ScriptOutcome::Indeterminate(
                detail.unwrap_or_else(|| "process ended without an exit code".to_string()),
            ),
            Some(code) if self.indeterminate_codes.contains(&code) => {
                ScriptOutcome::Indeterminate(
                    detail.unwrap_or_else(|| format!("script reported indeterminate code {code}")),
                )
            }
            Some(0) => ScriptOutcome::Success,
            Some(code) => ScriptOutcome::Failure { code, detail },
        }
    }
}

fn report_detail(report: &ScriptReport) -> Option<String> {
    if let Some(s) = &report.structured {
        return Some(match &s.details {
            Some(d) => format!("{}: {}", s.state, d),
            None => s.state.clone(),
        });
    }
    report
        .stderr
        .lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .map(|l| l.trim().to_string())
}
