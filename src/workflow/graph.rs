// src/workflow/graph.rs

use std::collections::{BTreeMap, HashMap};

use crate::types::{JobStatus, Terminal};
use crate::workflow::fan_in::{FanInPolicy, JobOutcome};

pub type LinkId = String;

/// Where an exit entry sends the package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitTarget {
    Link(LinkId),
    Terminal(Terminal),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitEntry {
    pub target: ExitTarget,
    /// Overrides the job status derived from the aggregate code.
    pub job_status: Option<JobStatus>,
}

impl ExitEntry {
    pub fn next(link: impl Into<LinkId>) -> Self {
        Self {
            target: ExitTarget::Link(link.into()),
            job_status: None,
        }
    }

    pub fn terminal(terminal: Terminal) -> Self {
        Self {
            target: ExitTarget::Terminal(terminal),
            job_status: None,
        }
    }

    pub fn with_job_status(mut self, status: JobStatus) -> Self {
        self.job_status = Some(status);
        self
    }
}

/// Exit code → target. Lookup for a code tries the exact key, then
/// `default`. Indeterminate outcomes only ever match `indeterminate`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExitCodeMap {
    codes: BTreeMap<i32, ExitEntry>,
    default: Option<ExitEntry>,
    indeterminate: Option<ExitEntry>,
}

impl ExitCodeMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_code(&mut self, code: i32, entry: ExitEntry) {
        self.codes.insert(code, entry);
    }

    pub fn set_default(&mut self, entry: ExitEntry) {
        self.default = Some(entry);
    }

    pub fn set_indeterminate(&mut self, entry: ExitEntry) {
        self.indeterminate = Some(entry);
    }

    pub fn lookup(&self, outcome: &JobOutcome) -> Option<&ExitEntry> {
        match outcome {
            JobOutcome::Code(code) => self.codes.get(code).or(self.default.as_ref()),
            JobOutcome::Indeterminate(_) => self.indeterminate.as_ref(),
        }
    }

    /// True if `code` routes somewhere (exactly or through `default`).
    pub fn resolves(&self, code: i32) -> bool {
        self.codes.contains_key(&code) || self.default.is_some()
    }

    pub fn default_entry(&self) -> Option<&ExitEntry> {
        self.default.as_ref()
    }

    pub fn indeterminate_entry(&self) -> Option<&ExitEntry> {
        self.indeterminate.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty() && self.default.is_none() && self.indeterminate.is_none()
    }

    /// All entries, in code order, then `default`, then `indeterminate`.
    pub fn entries(&self) -> impl Iterator<Item = &ExitEntry> {
        self.codes
            .values()
            .chain(self.default.iter())
            .chain(self.indeterminate.iter())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FanOut {
    /// Exactly one task for the package.
    Package,
    /// One task per file below the package (optionally narrowed).
    PerFile {
        filter_subdir: Option<String>,
        filter_file_end: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskTemplate {
    pub script: String,
    pub arguments: Vec<String>,
    pub fan_out: FanOut,
    pub fan_in: FanInPolicy,
    pub retries: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkKind {
    Task(TaskTemplate),
    SetVariable { variable: String, value: String },
    LinkPull { variable: String },
    /// Manual decision; parks the package until resumed.
    Choice { choices: Vec<LinkId> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainLink {
    pub id: LinkId,
    pub description: Option<String>,
    pub kind: LinkKind,
    pub exit_codes: ExitCodeMap,
}

impl ChainLink {
    /// Decision links are resolved inline by the walker and never create jobs.
    pub fn is_decision(&self) -> bool {
        matches!(
            self.kind,
            LinkKind::SetVariable { .. } | LinkKind::LinkPull { .. }
        )
    }

    pub fn template(&self) -> Option<&TaskTemplate> {
        match &self.kind {
            LinkKind::Task(t) => Some(t),
            _ => None,
        }
    }

    pub fn script(&self) -> Option<&str> {
        self.template().map(|t| t.script.as_str())
    }

    /// Statically known successors: exit targets and choice options.
    pub fn successors(&self) -> Vec<&LinkId> {
        let mut out: Vec<&LinkId> = self
            .exit_codes
            .entries()
            .filter_map(|e| match &e.target {
                ExitTarget::Link(id) => Some(id),
                ExitTarget::Terminal(_) => None,
            })
            .collect();
        if let LinkKind::Choice { choices } = &self.kind {
            out.extend(choices.iter());
        }
        out
    }
}

/// `ChainLinkID → ChainLink`.
#[derive(Debug, Clone, Default)]
pub struct WorkflowGraph {
    links: HashMap<LinkId, ChainLink>,
}

impl WorkflowGraph {
    pub fn new(links: impl IntoIterator<Item = ChainLink>) -> Self {
        Self {
            links: links.into_iter().map(|l| (l.id.clone(), l)).collect(),
        }
    }

    pub fn get(&self, id: &str) -> Option<&ChainLink> {
        self.links.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.links.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    pub fn links(&self) -> impl Iterator<Item = &ChainLink> {
        self.links.values()
    }

    /// Link ids in sorted order.
    pub fn ids(&self) -> Vec<&LinkId> {
        let mut ids: Vec<&LinkId> = self.links.keys().collect();
        ids.sort();
        ids
    }
}
