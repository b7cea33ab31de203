// src/store/records.rs

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::WorkflowFault;
use crate::exec::ScriptOutcome;
use crate::types::{JobStatus, PackageStatus, TaskStatus, UnitType};
use crate::workflow::LinkId;

/// A unit travelling through the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Package {
    pub uuid: Uuid,
    pub unit_type: UnitType,
    /// Directories keep a trailing `/`, files do not.
    pub location: String,
    /// `None` until the first link runs.
    pub current_link: Option<LinkId>,
    pub status: PackageStatus,
    pub created_at: DateTime<Utc>,
    /// Index of the watched directory the package was last started from.
    #[serde(default)]
    pub watched_dir: Option<usize>,
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
    #[serde(default)]
    pub fault: Option<WorkflowFault>,
}

impl Package {
    pub fn new(
        uuid: Uuid,
        unit_type: UnitType,
        location: impl Into<String>,
        watched_dir: Option<usize>,
    ) -> Self {
        Self {
            uuid,
            unit_type,
            location: location.into(),
            current_link: None,
            status: PackageStatus::Active,
            created_at: Utc::now(),
            watched_dir,
            variables: BTreeMap::new(),
            fault: None,
        }
    }

    pub fn is_directory(&self) -> bool {
        self.location.ends_with('/')
    }

    /// Last component of the location, without the trailing separator.
    pub fn basename(&self) -> String {
        self.location
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .to_string()
    }

    /// Take the fields a walker owns from `chain`: cursor, status, variables
    /// and fault. Location and watched directory belong to the watcher.
    pub fn apply_chain_state(&mut self, chain: &Package) {
        self.current_link = chain.current_link.clone();
        self.status = chain.status;
        self.variables = chain.variables.clone();
        self.fault = chain.fault.clone();
    }

    /// Basename with a `-<uuid>` suffix removed.
    pub fn name(&self) -> String {
        let base = self.basename();
        let suffix = format!("-{}", self.uuid);
        match base.strip_suffix(&suffix) {
            Some(stripped) if !stripped.is_empty() => stripped.to_string(),
            _ => base,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: Uuid,
    pub package: Uuid,
    pub link: LinkId,
    pub status: JobStatus,
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub indeterminate: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    pub fn new(package: Uuid, link: impl Into<LinkId>) -> Self {
        Self {
            id: Uuid::new_v4(),
            package,
            link: link.into(),
            status: JobStatus::Created,
            exit_code: None,
            indeterminate: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: Uuid,
    pub job: Uuid,
    pub arguments: Vec<String>,
    pub status: TaskStatus,
    pub worker: Option<usize>,
    pub attempt: u32,
    pub exit_code: Option<i32>,
    pub outcome: Option<ScriptOutcome>,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
    pub duration_ms: Option<u64>,
}

impl TaskRecord {
    pub fn new(id: Uuid, job: Uuid, arguments: Vec<String>) -> Self {
        Self {
            id,
            job,
            arguments,
            status: TaskStatus::Pending,
            worker: None,
            attempt: 0,
            exit_code: None,
            outcome: None,
            stdout: String::new(),
            stderr: String::new(),
            duration_ms: None,
        }
    }
}

/// What startup recovery found and changed.
#[derive(Debug, Clone, Default)]
pub struct RecoveryReport {
    pub failed_jobs: usize,
    pub lost_tasks: usize,
    /// Active packages to re-queue, oldest first.
    pub resumable: Vec<Package>,
}
