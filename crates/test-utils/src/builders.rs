#![allow(dead_code)]

use ingestflow::config::{
    ConfigFile, ExitEntryConfig, FanOutMode, LinkConfig, LinkKindTag, RawConfigFile,
    ScriptConfig, WatchedDirectory,
};
use ingestflow::errors::Result;
use ingestflow::types::{JobStatus, StoreMode, Terminal, UnitType};
use ingestflow::workflow::FanInPolicy;

pub const SHARED: &str = "/shared";

/// Builder for `ConfigFile` to simplify test setup.
///
/// Defaults: shared directory `/shared`, in-memory store, two workers, short
/// drain and poll intervals.
pub struct WorkflowBuilder {
    config: RawConfigFile,
}

impl WorkflowBuilder {
    pub fn new() -> Self {
        let mut config = RawConfigFile::default();
        config.engine.shared_directory = SHARED.into();
        config.engine.store = StoreMode::Memory;
        config.engine.worker_capacity = 2;
        config.engine.drain_timeout = "2s".to_string();
        config.engine.poll_interval = "50ms".to_string();
        Self { config }
    }

    pub fn shared_directory(mut self, path: impl Into<std::path::PathBuf>) -> Self {
        self.config.engine.shared_directory = path.into();
        self
    }

    pub fn store(mut self, mode: StoreMode) -> Self {
        self.config.engine.store = mode;
        self
    }

    pub fn worker_capacity(mut self, n: usize) -> Self {
        self.config.engine.worker_capacity = n;
        self
    }

    pub fn trigger_capacity(mut self, n: usize) -> Self {
        self.config.engine.trigger_capacity = n;
        self
    }

    pub fn max_queue_depth(mut self, n: usize) -> Self {
        self.config.engine.max_queue_depth = n;
        self
    }

    pub fn task_retries(mut self, n: u32) -> Self {
        self.config.engine.task_retries = n;
        self
    }

    pub fn infra_retries(mut self, n: u32) -> Self {
        self.config.engine.infra_retries = n;
        self
    }

    pub fn drain_timeout(mut self, d: &str) -> Self {
        self.config.engine.drain_timeout = d.to_string();
        self
    }

    pub fn ignore(mut self, pattern: &str) -> Self {
        self.config.engine.ignore.push(pattern.to_string());
        self
    }

    /// A watched directory that only accepts directories.
    pub fn watched(self, path: &str, unit_type: UnitType, link: &str) -> Self {
        self.watched_with(path, unit_type, link, true)
    }

    pub fn watched_with(mut self, path: &str, unit_type: UnitType, link: &str, only_dirs: bool) -> Self {
        self.config.watched_directories.push(WatchedDirectory {
            path: path.to_string(),
            unit_type,
            link: link.to_string(),
            only_dirs,
        });
        self
    }

    pub fn script(mut self, name: &str, script: ScriptConfig) -> Self {
        self.config.script.insert(name.to_string(), script);
        self
    }

    pub fn link(mut self, id: &str, link: LinkConfig) -> Self {
        self.config.link.insert(id.to_string(), link);
        self
    }

    pub fn raw(self) -> RawConfigFile {
        self.config
    }

    pub fn try_build(self) -> Result<ConfigFile> {
        ConfigFile::try_from(self.config)
    }

    pub fn build(self) -> ConfigFile {
        self.try_build()
            .expect("Failed to build valid config from builder")
    }
}

impl Default for WorkflowBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `LinkConfig`.
pub struct LinkBuilder {
    link: LinkConfig,
}

impl LinkBuilder {
    pub fn task(script: &str) -> Self {
        let mut link = LinkConfig::new(LinkKindTag::Task);
        link.script = Some(script.to_string());
        Self { link }
    }

    pub fn set_variable(variable: &str, value: &str) -> Self {
        let mut link = LinkConfig::new(LinkKindTag::SetVariable);
        link.variable = Some(variable.to_string());
        link.value = Some(value.to_string());
        Self { link }
    }

    pub fn link_pull(variable: &str) -> Self {
        let mut link = LinkConfig::new(LinkKindTag::LinkPull);
        link.variable = Some(variable.to_string());
        Self { link }
    }

    pub fn choice(choices: &[&str]) -> Self {
        let mut link = LinkConfig::new(LinkKindTag::Choice);
        link.choices = choices.iter().map(|c| c.to_string()).collect();
        Self { link }
    }

    pub fn args(mut self, args: &[&str]) -> Self {
        self.link.arguments = args.iter().map(|a| a.to_string()).collect();
        self
    }

    pub fn per_file(mut self) -> Self {
        self.link.fan_out = FanOutMode::PerFile;
        self
    }

    pub fn filter_subdir(mut self, subdir: &str) -> Self {
        self.link.filter_subdir = Some(subdir.to_string());
        self
    }

    pub fn filter_file_end(mut self, end: &str) -> Self {
        self.link.filter_file_end = Some(end.to_string());
        self
    }

    pub fn fan_in(mut self, policy: FanInPolicy) -> Self {
        self.link.fan_in = policy;
        self
    }

    pub fn retries(mut self, n: u32) -> Self {
        self.link.retries = Some(n);
        self
    }

    fn entry(mut self, key: String, next: Option<&str>, terminal: Option<Terminal>) -> Self {
        self.link.exit_codes.insert(
            key,
            ExitEntryConfig {
                next: next.map(str::to_string),
                terminal,
                job_status: None,
            },
        );
        self
    }

    pub fn on(self, code: i32, next: &str) -> Self {
        self.entry(code.to_string(), Some(next), None)
    }

    pub fn on_terminal(self, code: i32, terminal: Terminal) -> Self {
        self.entry(code.to_string(), None, Some(terminal))
    }

    pub fn default_next(self, next: &str) -> Self {
        self.entry("default".to_string(), Some(next), None)
    }

    pub fn default_terminal(self, terminal: Terminal) -> Self {
        self.entry("default".to_string(), None, Some(terminal))
    }

    pub fn indeterminate_next(self, next: &str) -> Self {
        self.entry("indeterminate".to_string(), Some(next), None)
    }

    pub fn indeterminate_terminal(self, terminal: Terminal) -> Self {
        self.entry("indeterminate".to_string(), None, Some(terminal))
    }

    /// Set the `job_status` override on an existing entry (`"0"`, `"default"`, ...).
    pub fn job_status(mut self, key: &str, status: JobStatus) -> Self {
        if let Some(entry) = self.link.exit_codes.get_mut(key) {
            entry.job_status = Some(status);
        }
        self
    }

    pub fn build(self) -> LinkConfig {
        self.link
    }
}

/// Builder for `ScriptConfig`.
pub struct ScriptConfigBuilder {
    script: ScriptConfig,
}

impl ScriptConfigBuilder {
    pub fn new(cmd: &str) -> Self {
        Self {
            script: ScriptConfig {
                cmd: cmd.to_string(),
                ..ScriptConfig::default()
            },
        }
    }

    pub fn params(mut self, n: usize) -> Self {
        self.script.params = Some(n);
        self
    }

    pub fn exit_codes(mut self, codes: &[i32]) -> Self {
        self.script.exit_codes = codes.to_vec();
        self
    }

    pub fn indeterminate_codes(mut self, codes: &[i32]) -> Self {
        self.script.indeterminate_codes = codes.to_vec();
        self
    }

    pub fn outcome_pattern(mut self, pattern: &str) -> Self {
        self.script.outcome_pattern = Some(pattern.to_string());
        self
    }

    pub fn build(self) -> ScriptConfig {
        self.script
    }
}
