// src/config/validate.rs

use std::collections::BTreeMap;

use globset::Glob;
use petgraph::algo::tarjan_scc;
use petgraph::graphmap::DiGraphMap;
use petgraph::visit::Dfs;
use regex::Regex;
use tracing::warn;

use crate::config::model::{
    ConfigFile, EngineSettings, ExitEntryConfig, FanOutMode, LinkConfig, LinkKindTag,
    RawConfigFile,
};
use crate::errors::{EngineError, Result};
use crate::workflow::{
    ChainLink, ExitCodeMap, ExitEntry, ExitTarget, FanOut, LinkKind, TaskTemplate, WorkflowGraph,
};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = EngineError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        let engine = validate_engine(&raw)?;
        ensure_has_links(&raw)?;
        validate_scripts(&raw)?;

        let mut links = Vec::with_capacity(raw.link.len());
        for (id, cfg) in raw.link.iter() {
            links.push(build_link(id, cfg)?);
        }
        let graph = WorkflowGraph::new(links);

        validate_targets(&graph)?;
        validate_watched_directories(&raw, &graph)?;
        validate_decision_cycles(&graph)?;
        warn_unreachable(&raw, &graph);

        Ok(ConfigFile::new_unchecked(
            engine,
            raw.watched_directories,
            raw.script,
            graph,
        ))
    }
}

fn config_err(msg: impl Into<String>) -> EngineError {
    EngineError::ConfigError(msg.into())
}

fn validate_engine(cfg: &RawConfigFile) -> Result<EngineSettings> {
    if cfg.engine.worker_capacity == 0 {
        return Err(config_err("[engine].worker_capacity must be >= 1 (got 0)"));
    }
    if cfg.engine.trigger_capacity == 0 {
        return Err(config_err("[engine].trigger_capacity must be >= 1 (got 0)"));
    }
    for pattern in cfg.engine.ignore.iter() {
        Glob::new(pattern)
            .map_err(|e| config_err(format!("[engine].ignore pattern '{pattern}': {e}")))?;
    }
    EngineSettings::from_section(&cfg.engine)
}

fn ensure_has_links(cfg: &RawConfigFile) -> Result<()> {
    if cfg.link.is_empty() {
        return Err(config_err(
            "config must contain at least one [link.<id>] section",
        ));
    }
    Ok(())
}

fn validate_scripts(cfg: &RawConfigFile) -> Result<()> {
    for (name, script) in cfg.script.iter() {
        if script.cmd.trim().is_empty() {
            return Err(config_err(format!("script '{name}' has an empty `cmd`")));
        }
        if let Some(pattern) = &script.outcome_pattern {
            Regex::new(pattern).map_err(|e| {
                config_err(format!("script '{name}' has an invalid outcome_pattern: {e}"))
            })?;
        }
    }
    Ok(())
}

fn build_link(id: &str, cfg: &LinkConfig) -> Result<ChainLink> {
    let exit_codes = build_exit_map(id, &cfg.exit_codes)?;

    let kind = match cfg.kind {
        LinkKindTag::Task => {
            let script = cfg
                .script
                .clone()
                .ok_or_else(|| config_err(format!("task link '{id}' has no `script`")))?;
            if exit_codes.is_empty() {
                return Err(config_err(format!(
                    "task link '{id}' has an empty exit_codes map"
                )));
            }
            let fan_out = match cfg.fan_out {
                FanOutMode::Package => FanOut::Package,
                FanOutMode::PerFile => FanOut::PerFile {
                    filter_subdir: cfg.filter_subdir.clone(),
                    filter_file_end: cfg.filter_file_end.clone(),
                },
            };
            LinkKind::Task(TaskTemplate {
                script,
                arguments: cfg.arguments.clone(),
                fan_out,
                fan_in: cfg.fan_in,
                retries: cfg.retries,
            })
        }
        LinkKindTag::SetVariable => {
            let (Some(variable), Some(value)) = (cfg.variable.clone(), cfg.value.clone()) else {
                return Err(config_err(format!(
                    "set_variable link '{id}' needs both `variable` and `value`"
                )));
            };
            require_default(id, &exit_codes)?;
            LinkKind::SetVariable { variable, value }
        }
        LinkKindTag::LinkPull => {
            let variable = cfg
                .variable
                .clone()
                .ok_or_else(|| config_err(format!("link_pull link '{id}' has no `variable`")))?;
            require_default(id, &exit_codes)?;
            LinkKind::LinkPull { variable }
        }
        LinkKindTag::Choice => {
            if cfg.choices.is_empty() {
                return Err(config_err(format!("choice link '{id}' has no `choices`")));
            }
            LinkKind::Choice {
                choices: cfg.choices.clone(),
            }
        }
    };

    Ok(ChainLink {
        id: id.to_string(),
        description: cfg.description.clone(),
        kind,
        exit_codes,
    })
}

fn require_default(id: &str, map: &ExitCodeMap) -> Result<()> {
    if map.default_entry().is_none() {
        return Err(config_err(format!(
            "decision link '{id}' needs a `default` exit entry"
        )));
    }
    Ok(())
}

fn build_exit_map(id: &str, raw: &BTreeMap<String, ExitEntryConfig>) -> Result<ExitCodeMap> {
    let mut map = ExitCodeMap::new();
    for (key, entry_cfg) in raw.iter() {
        let target = match (&entry_cfg.next, entry_cfg.terminal) {
            (Some(next), None) => ExitTarget::Link(next.clone()),
            (None, Some(terminal)) => ExitTarget::Terminal(terminal),
            _ => {
                return Err(config_err(format!(
                    "link '{id}' exit entry '{key}' must set exactly one of `next` or `terminal`"
                )))
            }
        };
        let entry = ExitEntry {
            target,
            job_status: entry_cfg.job_status,
        };
        match key.as_str() {
            "default" => map.set_default(entry),
            "indeterminate" => map.set_indeterminate(entry),
            code => {
                let code: i32 = code.parse().map_err(|_| {
                    config_err(format!(
                        "link '{id}' has exit key '{code}'; expected an integer, `default` or `indeterminate`"
                    ))
                })?;
                map.insert_code(code, entry);
            }
        }
    }
    Ok(map)
}

fn validate_targets(graph: &WorkflowGraph) -> Result<()> {
    for link in graph.links() {
        for target in link.successors() {
            if !graph.contains(target) {
                return Err(config_err(format!(
                    "link '{}' points at unknown link '{}'",
                    link.id, target
                )));
            }
        }
    }
    Ok(())
}

fn validate_watched_directories(cfg: &RawConfigFile, graph: &WorkflowGraph) -> Result<()> {
    for (idx, watched) in cfg.watched_directories.iter().enumerate() {
        if watched.path.trim().is_empty() {
            return Err(config_err(format!(
                "watched_directory #{idx} has an empty `path`"
            )));
        }
        if !graph.contains(&watched.link) {
            return Err(config_err(format!(
                "watched_directory '{}' starts at unknown link '{}'",
                watched.path, watched.link
            )));
        }
    }
    Ok(())
}

/// Decision links are walked inline; a cycle made only of them would never
/// yield a job.
fn validate_decision_cycles(graph: &WorkflowGraph) -> Result<()> {
    let mut decisions: DiGraphMap<&str, ()> = DiGraphMap::new();
    for link in graph.links().filter(|l| l.is_decision()) {
        decisions.add_node(link.id.as_str());
        for target in link.successors() {
            if graph.get(target).is_some_and(|t| t.is_decision()) {
                decisions.add_edge(link.id.as_str(), target.as_str(), ());
            }
        }
    }

    for scc in tarjan_scc(&decisions) {
        let self_loop = scc.len() == 1 && decisions.contains_edge(scc[0], scc[0]);
        if scc.len() > 1 || self_loop {
            let mut members: Vec<&str> = scc;
            members.sort();
            return Err(config_err(format!(
                "decision links form a cycle with no task link: {}",
                members.join(" -> ")
            )));
        }
    }
    Ok(())
}

fn warn_unreachable(cfg: &RawConfigFile, graph: &WorkflowGraph) {
    let mut all: DiGraphMap<&str, ()> = DiGraphMap::new();
    for link in graph.links() {
        all.add_node(link.id.as_str());
        for target in link.successors() {
            all.add_edge(link.id.as_str(), target.as_str(), ());
        }
    }

    let mut reachable = std::collections::HashSet::new();
    for watched in cfg.watched_directories.iter() {
        let mut dfs = Dfs::new(&all, watched.link.as_str());
        while let Some(node) = dfs.next(&all) {
            reachable.insert(node);
        }
    }

    if cfg.watched_directories.is_empty() {
        return;
    }
    for id in graph.ids() {
        // link_pull targets are only known at runtime
        if !reachable.contains(id.as_str()) {
            warn!(link = %id, "link is not reachable from any watched directory");
        }
    }
}
