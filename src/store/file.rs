// src/store/file.rs

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Context;
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::errors::{EngineError, Result};
use crate::store::impl_store;
use crate::store::records::{RecoveryReport, TaskRecord};
use crate::store::state::StoreState;
use crate::store::task_log::TaskLog;

/// Records kept in memory and persisted next to `path`.
///
/// Packages and jobs go to a JSON snapshot at `path`. A change to them is
/// applied to a copy, written to `<path>.tmp`, renamed over the snapshot and
/// only then made visible, so a failed write leaves both the file and the
/// in-memory view unchanged. Task records, with their captured output, are
/// appended to `<path>.tasks.jsonl` by a background writer.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    state: Mutex<StoreState>,
    log: TaskLog,
}

impl FileStore {
    /// `<shared>/.ingestflow/state.json`
    pub fn default_path(shared_directory: &Path) -> PathBuf {
        shared_directory.join(".ingestflow").join("state.json")
    }

    /// Load the snapshot and task log at `path`, or start empty if there are
    /// none.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut state = if path.exists() {
            let raw = fs::read_to_string(&path)
                .with_context(|| format!("reading store snapshot {:?}", path))?;
            let state: StoreState = serde_json::from_str(&raw)?;
            info!(path = %path.display(), "loaded store snapshot");
            state
        } else {
            debug!(path = %path.display(), "no store snapshot yet; starting empty");
            StoreState::default()
        };

        let log_path = path.with_extension("tasks.jsonl");
        for task in TaskLog::replay(&log_path)? {
            state.put_task(task);
        }
        let log = TaskLog::open(log_path, state.all_tasks())?;

        Ok(Self {
            path,
            state: Mutex::new(state),
            log,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn task_log_path(&self) -> &Path {
        self.log.path()
    }

    fn read<R>(&self, f: impl FnOnce(&StoreState) -> R) -> R {
        f(&self.state.lock())
    }

    fn mutate<R>(&self, f: impl FnOnce(&mut StoreState) -> Result<R>) -> Result<R> {
        let mut guard = self.state.lock();
        let mut next = guard.clone_records();
        let out = f(&mut next)?;
        self.write_snapshot(&next)?;
        guard.replace_records(next);
        Ok(out)
    }

    /// Apply in memory and queue `changed` for the log. The snapshot is
    /// left alone.
    fn mutate_tasks(
        &self,
        changed: &[TaskRecord],
        f: impl FnOnce(&mut StoreState) -> Result<()>,
    ) -> Result<()> {
        let mut guard = self.state.lock();
        f(&mut guard)?;
        for task in changed {
            self.log.append(task.clone());
        }
        Ok(())
    }

    fn recover(&self) -> Result<RecoveryReport> {
        let mut guard = self.state.lock();
        let mut next = guard.clone_records();
        let failed_jobs = next.fail_unfinished_jobs();
        if failed_jobs > 0 {
            self.write_snapshot(&next)?;
        }
        guard.replace_records(next);

        let lost = guard.lose_unfinished_tasks();
        for task in &lost {
            self.log.append(task.clone());
        }
        Ok(RecoveryReport {
            failed_jobs,
            lost_tasks: lost.len(),
            resumable: guard.resumable(),
        })
    }

    fn write_snapshot(&self, state: &StoreState) -> Result<()> {
        self.try_write_snapshot(state)
            .map_err(|e| EngineError::Store(format!("{e:#}")))
    }

    fn try_write_snapshot(&self, state: &StoreState) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).with_context(|| format!("creating dir {:?}", parent))?;
        }
        let json = serde_json::to_vec(state).context("serializing store snapshot")?;
        let tmp = self.path.with_extension("json.tmp");
        {
            let mut file =
                fs::File::create(&tmp).with_context(|| format!("creating file {:?}", tmp))?;
            file.write_all(&json)
                .with_context(|| format!("writing to file {:?}", tmp))?;
            file.sync_all()
                .with_context(|| format!("syncing file {:?}", tmp))?;
        }
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("renaming {:?} to {:?}", tmp, self.path))?;
        Ok(())
    }
}

impl_store!(FileStore);
