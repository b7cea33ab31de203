// src/config/model.rs

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::errors::{EngineError, Result};
use crate::types::{JobStatus, StoreMode, Terminal, UnitType};
use crate::workflow::{FanInPolicy, WorkflowGraph};

/// Top-level configuration as read from a TOML file.
///
/// ```toml
/// [engine]
/// shared_directory = "/var/archivematica/sharedDirectory"
/// worker_capacity = 4
///
/// [[watched_directory]]
/// path = "watchedDirectories/activeTransfers/standardTransfer"
/// unit_type = "transfer"
/// link = "start_transfer"
///
/// [script.verify]
/// cmd = "/usr/lib/archivematica/verify.py"
/// exit_codes = [0, 1]
///
/// [link.start_transfer]
/// kind = "task"
/// script = "verify"
/// [link.start_transfer.exit_codes]
/// 0 = { terminal = "completed" }
/// default = { terminal = "failed" }
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawConfigFile {
    #[serde(default)]
    pub engine: EngineSection,

    #[serde(default, rename = "watched_directory")]
    pub watched_directories: Vec<WatchedDirectory>,

    /// Script contracts from `[script.<name>]`.
    #[serde(default)]
    pub script: BTreeMap<String, ScriptConfig>,

    /// Chain links from `[link.<id>]`, keyed by link id.
    #[serde(default)]
    pub link: BTreeMap<String, LinkConfig>,
}

/// A validated configuration. Build it with `ConfigFile::try_from(raw)`.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub engine: EngineSettings,
    pub watched_directories: Vec<WatchedDirectory>,
    pub scripts: BTreeMap<String, ScriptConfig>,
    pub graph: WorkflowGraph,
}

impl ConfigFile {
    /// Construct without running validation. Used by the validator itself.
    pub(crate) fn new_unchecked(
        engine: EngineSettings,
        watched_directories: Vec<WatchedDirectory>,
        scripts: BTreeMap<String, ScriptConfig>,
        graph: WorkflowGraph,
    ) -> Self {
        Self {
            engine,
            watched_directories,
            scripts,
            graph,
        }
    }

    pub fn watched_directory(&self, index: usize) -> Option<&WatchedDirectory> {
        self.watched_directories.get(index)
    }
}

/// `[engine]` section, as written in the file.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineSection {
    #[serde(default = "default_shared_directory")]
    pub shared_directory: PathBuf,

    /// Number of workers (W).
    #[serde(default = "default_worker_capacity")]
    pub worker_capacity: usize,

    /// Concurrent trigger requests (R).
    #[serde(default = "default_trigger_capacity")]
    pub trigger_capacity: usize,

    /// 0 means unbounded.
    #[serde(default)]
    pub max_queue_depth: usize,

    /// Extra attempts for indeterminate or lost tasks.
    #[serde(default = "default_task_retries")]
    pub task_retries: u32,

    /// Attempts for store and dispatch faults before a walker gives up.
    #[serde(default = "default_infra_retries")]
    pub infra_retries: u32,

    #[serde(default = "default_drain_timeout")]
    pub drain_timeout: String,

    #[serde(default = "default_poll_interval")]
    pub poll_interval: String,

    #[serde(default)]
    pub store: StoreMode,

    /// Glob patterns for entry names the watcher skips (e.g. `.*`).
    #[serde(default)]
    pub ignore: Vec<String>,
}

fn default_shared_directory() -> PathBuf {
    PathBuf::from("/var/archivematica/sharedDirectory")
}

fn default_worker_capacity() -> usize {
    4
}

fn default_trigger_capacity() -> usize {
    2
}

fn default_task_retries() -> u32 {
    1
}

fn default_infra_retries() -> u32 {
    3
}

fn default_drain_timeout() -> String {
    "30s".to_string()
}

fn default_poll_interval() -> String {
    "1s".to_string()
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            shared_directory: default_shared_directory(),
            worker_capacity: default_worker_capacity(),
            trigger_capacity: default_trigger_capacity(),
            max_queue_depth: 0,
            task_retries: default_task_retries(),
            infra_retries: default_infra_retries(),
            drain_timeout: default_drain_timeout(),
            poll_interval: default_poll_interval(),
            store: StoreMode::default(),
            ignore: Vec::new(),
        }
    }
}

/// `[engine]` with durations parsed.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub shared_directory: PathBuf,
    pub worker_capacity: usize,
    pub trigger_capacity: usize,
    pub max_queue_depth: usize,
    pub task_retries: u32,
    pub infra_retries: u32,
    pub drain_timeout: Duration,
    pub poll_interval: Duration,
    pub store: StoreMode,
    pub ignore: Vec<String>,
}

impl EngineSettings {
    pub fn from_section(section: &EngineSection) -> Result<Self> {
        let drain_timeout = parse_duration(&section.drain_timeout).map_err(|e| {
            EngineError::ConfigError(format!("[engine].drain_timeout: {e}"))
        })?;
        let poll_interval = parse_duration(&section.poll_interval).map_err(|e| {
            EngineError::ConfigError(format!("[engine].poll_interval: {e}"))
        })?;

        Ok(Self {
            shared_directory: section.shared_directory.clone(),
            worker_capacity: section.worker_capacity,
            trigger_capacity: section.trigger_capacity,
            max_queue_depth: section.max_queue_depth,
            task_retries: section.task_retries,
            infra_retries: section.infra_retries,
            drain_timeout,
            poll_interval,
            store: section.store,
            ignore: section.ignore.clone(),
        })
    }
}

/// `[[watched_directory]]` entry.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WatchedDirectory {
    /// Relative to the shared directory.
    pub path: String,
    pub unit_type: UnitType,
    /// Entry link for packages arriving here.
    pub link: String,
    #[serde(default)]
    pub only_dirs: bool,
}

/// `[script.<name>]` section: the contract of one external script.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ScriptConfig {
    pub cmd: String,

    /// Exact argument count, when the script declares one.
    #[serde(default)]
    pub params: Option<usize>,

    /// Codes the script is known to produce.
    #[serde(default)]
    pub exit_codes: Vec<i32>,

    /// Codes that mean "could not decide".
    #[serde(default)]
    pub indeterminate_codes: Vec<i32>,

    /// Regex for the structured outcome line on stdout.
    #[serde(default)]
    pub outcome_pattern: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkKindTag {
    Task,
    SetVariable,
    LinkPull,
    Choice,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FanOutMode {
    #[default]
    Package,
    PerFile,
}

/// `[link.<id>]` section.
///
/// Fields are flat; which ones are required depends on `kind` and is
/// checked by the validator.
#[derive(Debug, Clone, Deserialize)]
pub struct LinkConfig {
    pub kind: LinkKindTag,

    #[serde(default)]
    pub description: Option<String>,

    // task
    #[serde(default)]
    pub script: Option<String>,
    #[serde(default)]
    pub arguments: Vec<String>,
    #[serde(default)]
    pub fan_out: FanOutMode,
    #[serde(default)]
    pub filter_subdir: Option<String>,
    #[serde(default)]
    pub filter_file_end: Option<String>,
    #[serde(default)]
    pub fan_in: FanInPolicy,
    #[serde(default)]
    pub retries: Option<u32>,

    // set_variable / link_pull
    #[serde(default)]
    pub variable: Option<String>,
    #[serde(default)]
    pub value: Option<String>,

    // choice
    #[serde(default)]
    pub choices: Vec<String>,

    /// Keys are integer codes, `default` or `indeterminate`.
    #[serde(default)]
    pub exit_codes: BTreeMap<String, ExitEntryConfig>,
}

impl LinkConfig {
    pub fn new(kind: LinkKindTag) -> Self {
        Self {
            kind,
            description: None,
            script: None,
            arguments: Vec::new(),
            fan_out: FanOutMode::Package,
            filter_subdir: None,
            filter_file_end: None,
            fan_in: FanInPolicy::default(),
            retries: None,
            variable: None,
            value: None,
            choices: Vec::new(),
            exit_codes: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ExitEntryConfig {
    #[serde(default)]
    pub next: Option<String>,
    #[serde(default)]
    pub terminal: Option<Terminal>,
    #[serde(default)]
    pub job_status: Option<JobStatus>,
}

/// Parse `"250ms"`, `"3s"`, `"5m"`, `"1h"`.
pub fn parse_duration(s: &str) -> std::result::Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration string".to_string());
    }

    let idx = s
        .chars()
        .position(|c| !c.is_ascii_digit())
        .ok_or_else(|| "duration missing unit suffix".to_string())?;

    let (num_part, unit_part) = s.split_at(idx);
    let value: u64 = num_part
        .parse()
        .map_err(|e| format!("invalid duration number '{}': {}", num_part, e))?;

    match unit_part.trim().to_lowercase().as_str() {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        "m" => Ok(Duration::from_secs(value * 60)),
        "h" => Ok(Duration::from_secs(value * 60 * 60)),
        unit => Err(format!(
            "unsupported duration unit '{}'; expected ms, s, m, or h",
            unit
        )),
    }
}
