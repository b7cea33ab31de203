// src/store/state.rs

//! The record set shared by both store backends.

use std::collections::{BTreeMap, HashMap};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{EngineError, Result};
use crate::store::records::{JobRecord, Package, RecoveryReport, TaskRecord};
use crate::types::{JobStatus, PackageStatus, TaskStatus};

pub(crate) const INTERRUPTED: &str = "engine shut down while processing";

/// Packages and jobs serialize as the snapshot. Tasks are kept apart:
/// `FileStore` persists them in its task log.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct StoreState {
    packages: BTreeMap<Uuid, Package>,
    /// Insertion order.
    jobs: Vec<JobRecord>,
    #[serde(skip)]
    tasks: Vec<TaskRecord>,
    #[serde(skip)]
    task_index: HashMap<Uuid, usize>,
}

impl StoreState {
    pub(crate) fn create_package_if_absent(&mut self, candidate: Package) -> (Package, bool) {
        if let Some(existing) = self
            .packages
            .values()
            .find(|p| p.location == candidate.location)
        {
            return (existing.clone(), false);
        }
        if let Some(existing) = self.packages.get(&candidate.uuid) {
            return (existing.clone(), false);
        }
        self.packages.insert(candidate.uuid, candidate.clone());
        (candidate, true)
    }

    pub(crate) fn package(&self, uuid: Uuid) -> Option<Package> {
        self.packages.get(&uuid).cloned()
    }

    pub(crate) fn package_by_location(&self, location: &str) -> Option<Package> {
        self.packages
            .values()
            .find(|p| p.location == location)
            .cloned()
    }

    pub(crate) fn packages(&self) -> Vec<Package> {
        let mut all: Vec<Package> = self.packages.values().cloned().collect();
        all.sort_by_key(|p| p.created_at);
        all
    }

    pub(crate) fn save_package(&mut self, package: &Package) -> Result<()> {
        self.update_package(package.uuid, &mut |stored: &mut Package| *stored = package.clone())
            .map(|_| ())
    }

    /// Apply `edit` to the stored record; fields it does not touch keep
    /// whatever another writer last stored.
    pub(crate) fn update_package(
        &mut self,
        uuid: Uuid,
        edit: &mut dyn FnMut(&mut Package),
    ) -> Result<Package> {
        let stored = self
            .packages
            .get_mut(&uuid)
            .ok_or(EngineError::PackageNotFound(uuid))?;
        let mut next = stored.clone();
        edit(&mut next);
        if stored.status.is_terminal() && stored.status != next.status {
            return Err(EngineError::InvalidState(format!(
                "package {} is already {:?}; refusing to change it to {:?}",
                uuid, stored.status, next.status
            )));
        }
        *stored = next.clone();
        Ok(next)
    }

    pub(crate) fn insert_job(&mut self, job: &JobRecord) -> Result<()> {
        let package = self
            .packages
            .get(&job.package)
            .ok_or(EngineError::PackageNotFound(job.package))?;
        if package.status.is_terminal() {
            return Err(EngineError::InvalidState(format!(
                "package {} is terminal; no new jobs may be created",
                job.package
            )));
        }
        if self.jobs.iter().any(|j| j.id == job.id) {
            return Err(EngineError::Store(format!("job {} already exists", job.id)));
        }
        self.jobs.push(job.clone());
        Ok(())
    }

    pub(crate) fn save_job(&mut self, job: &JobRecord) -> Result<()> {
        let stored = self
            .jobs
            .iter_mut()
            .find(|j| j.id == job.id)
            .ok_or_else(|| EngineError::Store(format!("unknown job {}", job.id)))?;
        *stored = job.clone();
        Ok(())
    }

    pub(crate) fn job(&self, id: Uuid) -> Option<JobRecord> {
        self.jobs.iter().find(|j| j.id == id).cloned()
    }

    pub(crate) fn jobs_for(&self, package: Uuid) -> Vec<JobRecord> {
        self.jobs
            .iter()
            .filter(|j| j.package == package)
            .cloned()
            .collect()
    }

    pub(crate) fn insert_tasks(&mut self, tasks: &[TaskRecord]) -> Result<()> {
        for task in tasks {
            if !self.jobs.iter().any(|j| j.id == task.job) {
                return Err(EngineError::Store(format!(
                    "task {} belongs to unknown job {}",
                    task.id, task.job
                )));
            }
        }
        for task in tasks {
            self.put_task(task.clone());
        }
        Ok(())
    }

    pub(crate) fn save_task(&mut self, task: &TaskRecord) -> Result<()> {
        let slot = *self
            .task_index
            .get(&task.id)
            .ok_or_else(|| EngineError::Store(format!("unknown task {}", task.id)))?;
        self.tasks[slot] = task.clone();
        Ok(())
    }

    /// Insert or replace by id, keeping first-seen order.
    pub(crate) fn put_task(&mut self, task: TaskRecord) {
        match self.task_index.get(&task.id) {
            Some(&slot) => self.tasks[slot] = task,
            None => {
                self.task_index.insert(task.id, self.tasks.len());
                self.tasks.push(task);
            }
        }
    }

    pub(crate) fn all_tasks(&self) -> &[TaskRecord] {
        &self.tasks
    }

    pub(crate) fn tasks_for(&self, job: Uuid) -> Vec<TaskRecord> {
        self.tasks.iter().filter(|t| t.job == job).cloned().collect()
    }

    /// Packages and jobs only, for a snapshot write.
    pub(crate) fn clone_records(&self) -> StoreState {
        StoreState {
            packages: self.packages.clone(),
            jobs: self.jobs.clone(),
            ..StoreState::default()
        }
    }

    pub(crate) fn replace_records(&mut self, records: StoreState) {
        self.packages = records.packages;
        self.jobs = records.jobs;
    }

    /// Close out work that was in flight when the engine stopped.
    pub(crate) fn recover_interrupted(&mut self) -> RecoveryReport {
        let failed_jobs = self.fail_unfinished_jobs();
        let lost_tasks = self.lose_unfinished_tasks().len();
        RecoveryReport {
            failed_jobs,
            lost_tasks,
            resumable: self.resumable(),
        }
    }

    pub(crate) fn fail_unfinished_jobs(&mut self) -> usize {
        let now = Utc::now();
        let mut failed = 0;
        for job in self.jobs.iter_mut().filter(|j| !j.status.is_terminal()) {
            job.status = JobStatus::Failed;
            job.indeterminate = Some(INTERRUPTED.to_string());
            job.finished_at = Some(now);
            failed += 1;
        }
        failed
    }

    /// Returns the tasks it changed.
    pub(crate) fn lose_unfinished_tasks(&mut self) -> Vec<TaskRecord> {
        let mut lost = Vec::new();
        for task in self.tasks.iter_mut().filter(|t| !t.status.is_terminal()) {
            task.status = TaskStatus::Lost;
            task.exit_code = None;
            task.stderr.push_str(INTERRUPTED);
            lost.push(task.clone());
        }
        lost
    }

    /// Active packages, oldest first.
    pub(crate) fn resumable(&self) -> Vec<Package> {
        self.packages()
            .into_iter()
            .filter(|p| p.status == PackageStatus::Active)
            .collect()
    }
}
