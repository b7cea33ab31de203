// src/exec/command.rs

//! Production script handler: runs an external executable.

use std::process::Stdio;

use anyhow::{Context, Result};
use regex::Regex;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::ScriptConfig;
use crate::errors::EngineError;
use crate::exec::contract::{HandlerFuture, Invocation, ScriptHandler, ScriptReport, StructuredOutcome};

pub const DEFAULT_OUTCOME_PATTERN: &str = r"^@outcome (\S+)(?: (.*))?$";

/// Runs `cmd` through `sh -c`, passing the resolved task arguments as
/// positional parameters so they are never re-split by the shell.
#[derive(Debug, Clone)]
pub struct CommandScript {
    cmd: String,
    outcome_pattern: Regex,
}

impl CommandScript {
    pub fn new(cmd: impl Into<String>) -> crate::errors::Result<Self> {
        Self::with_pattern(cmd, DEFAULT_OUTCOME_PATTERN)
    }

    pub fn with_pattern(cmd: impl Into<String>, pattern: &str) -> crate::errors::Result<Self> {
        let outcome_pattern = Regex::new(pattern)
            .map_err(|e| EngineError::ConfigError(format!("invalid outcome_pattern: {e}")))?;
        Ok(Self {
            cmd: cmd.into(),
            outcome_pattern,
        })
    }

    pub fn from_config(cfg: &ScriptConfig) -> crate::errors::Result<Self> {
        Self::with_pattern(
            cfg.cmd.clone(),
            cfg.outcome_pattern.as_deref().unwrap_or(DEFAULT_OUTCOME_PATTERN),
        )
    }

    async fn execute(&self, invocation: &Invocation) -> Result<ScriptReport> {
        info!(
            task = %invocation.task_id,
            script = %invocation.script,
            cmd = %self.cmd,
            "starting script process"
        );

        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(format!("{} \"$@\"", self.cmd))
            .arg(&invocation.script)
            .args(&invocation.arguments);
        if invocation.working_dir.is_dir() {
            cmd.current_dir(&invocation.working_dir);
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .with_context(|| format!("spawning process for script '{}'", invocation.script))?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let (stdout, stderr, status) = tokio::join!(
            collect_output(stdout),
            collect_output(stderr),
            child.wait()
        );
        let status = status
            .with_context(|| format!("waiting for process of script '{}'", invocation.script))?;
        let stdout = stdout.context("reading stdout")?;
        let stderr = stderr.context("reading stderr")?;

        let structured = stdout.lines().find_map(|line| {
            self.outcome_pattern.captures(line).map(|caps| StructuredOutcome {
                state: caps.get(1).map(|m| m.as_str().to_string()).unwrap_or_default(),
                details: caps.get(2).map(|m| m.as_str().to_string()),
            })
        });

        debug!(
            task = %invocation.task_id,
            exit_code = ?status.code(),
            "script process exited"
        );

        Ok(ScriptReport {
            exit_code: status.code(),
            stdout,
            stderr,
            structured,
        })
    }
}

impl ScriptHandler for CommandScript {
    fn run<'a>(&'a self, invocation: &'a Invocation) -> HandlerFuture<'a> {
        Box::pin(self.execute(invocation))
    }
}

/// Reads the whole stream. Bytes that are not UTF-8 (e.g. Latin-1 file
/// names) are replaced rather than failing the task.
async fn collect_output<R: AsyncRead + Unpin>(reader: Option<R>) -> Result<String> {
    let Some(mut reader) = reader else {
        return Ok(String::new());
    };
    let mut buf = Vec::new();
    reader.read_to_end(&mut buf).await?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}
