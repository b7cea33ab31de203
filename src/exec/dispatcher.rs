// src/exec/dispatcher.rs

//! Expands a job into tasks, runs them on the pool and reduces the results.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::errors::{EngineError, Result};
use crate::exec::contract::{Invocation, ScriptOutcome};
use crate::exec::pool::{Completion, WorkItem, WorkerPool};
use crate::exec::registry::{RegisteredScript, ScriptRegistry};
use crate::exec::retry::InfraRetry;
use crate::fs::FileSystem;
use crate::metrics::{MetricsEvent, MetricsSender};
use crate::store::{JobRecord, Package, Store, TaskRecord};
use crate::types::{JobStatus, TaskStatus};
use crate::workflow::{
    resolve_arguments, ArgContext, ChainLink, FanOut, FileItem, JobOutcome, TaskTemplate,
};

const LOST: &str = "worker lost while running task";

pub struct Dispatcher {
    pool: Arc<WorkerPool>,
    registry: Arc<ScriptRegistry>,
    store: Arc<dyn Store>,
    fs: Arc<dyn FileSystem>,
    metrics: MetricsSender,
    shared_dir: PathBuf,
    default_retries: u32,
    infra: InfraRetry,
}

impl Dispatcher {
    pub fn new(
        pool: Arc<WorkerPool>,
        registry: Arc<ScriptRegistry>,
        store: Arc<dyn Store>,
        fs: Arc<dyn FileSystem>,
        metrics: MetricsSender,
        shared_dir: PathBuf,
        default_retries: u32,
    ) -> Self {
        Self {
            pool,
            registry,
            store,
            fs,
            metrics,
            shared_dir,
            default_retries,
            infra: InfraRetry::default(),
        }
    }

    /// Retry policy for store writes and queue admission.
    pub fn with_infra_retry(mut self, infra: InfraRetry) -> Self {
        self.infra = infra;
        self
    }

    /// Build the fixed task set of `job`. Always at least one task.
    pub fn expand(&self, job: &JobRecord, link: &ChainLink, package: &Package) -> Result<Vec<TaskRecord>> {
        let (template, script) = self.resolve_link(link)?;
        let now = Utc::now();

        let files = match &template.fan_out {
            FanOut::Package => Vec::new(),
            FanOut::PerFile {
                filter_subdir,
                filter_file_end,
            } => self.list_files(package, filter_subdir.as_deref(), filter_file_end.as_deref())?,
        };

        let build = |file: Option<&FileItem>| -> Result<TaskRecord> {
            let task_id = Uuid::new_v4();
            let ctx = ArgContext {
                package,
                shared_dir: &self.shared_dir,
                job_id: job.id,
                task_id,
                now,
                file,
            };
            let args = resolve_arguments(&template.arguments, &ctx, script.contract.params)?;
            Ok(TaskRecord::new(task_id, job.id, args))
        };

        if files.is_empty() {
            return Ok(vec![build(None)?]);
        }
        files.iter().map(|f| build(Some(f))).collect()
    }

    /// Run `job` to completion and record its aggregate outcome.
    ///
    /// Indeterminate and lost tasks are resubmitted up to the link's retry
    /// budget. Store writes and queue admission are retried on their own, so
    /// a task that finished is never run again. An error with
    /// `job.started_at` still unset means no task reached the pool.
    pub async fn run_job(
        &self,
        job: &mut JobRecord,
        link: &ChainLink,
        package: &Package,
    ) -> Result<JobOutcome> {
        let (template, script) = self.resolve_link(link)?;
        let mut tasks = self.expand(job, link, package)?;

        self.infra
            .run("recording tasks", || self.store.insert_tasks(&tasks))
            .await?;
        job.status = JobStatus::Running;
        self.infra
            .run("saving job", || self.store.save_job(&*job))
            .await?;

        info!(
            package = %package.uuid,
            link = %link.id,
            job = %job.id,
            tasks = tasks.len(),
            "dispatching job"
        );

        let result = self
            .run_tasks(job, &mut tasks, template, &script, package)
            .await;
        let outcomes = match result {
            Ok(outcomes) => outcomes,
            Err(err) => {
                for task in tasks.iter_mut().filter(|t| !t.status.is_terminal()) {
                    task.status = TaskStatus::Lost;
                    self.persist_task(task).await;
                }
                job.status = JobStatus::Failed;
                job.indeterminate = Some(format!("dispatch failed: {err}"));
                job.finished_at = Some(Utc::now());
                if let Err(save_err) = self.store.save_job(job) {
                    warn!(job = %job.id, error = %save_err, "could not record failed dispatch");
                }
                return Err(err);
            }
        };

        let outcome = template.fan_in.reduce(&outcomes);
        self.finish_job(job, link, &outcome).await?;
        Ok(outcome)
    }

    /// Errors only before the first batch is admitted; later faults turn the
    /// affected tasks into lost ones.
    async fn run_tasks(
        &self,
        job: &mut JobRecord,
        tasks: &mut [TaskRecord],
        template: &TaskTemplate,
        script: &Arc<RegisteredScript>,
        package: &Package,
    ) -> Result<Vec<ScriptOutcome>> {
        let retries = template.retries.unwrap_or(self.default_retries);
        let working_dir = location_path(&package.location);
        let mut round: Vec<usize> = (0..tasks.len()).collect();

        for attempt in 0..=retries {
            let mut items = Vec::with_capacity(round.len());
            for &i in &round {
                let task = &mut tasks[i];
                task.attempt = attempt;
                task.status = TaskStatus::Dispatched;
                self.persist_task(task).await;
                items.push(WorkItem {
                    script: Arc::clone(script),
                    invocation: Invocation {
                        task_id: task.id,
                        script: script.name.clone(),
                        arguments: task.arguments.clone(),
                        working_dir: working_dir.clone(),
                    },
                });
            }

            let submitted = self
                .infra
                .run("submitting tasks", || self.pool.submit_batch(items.clone()))
                .await;
            let receivers = match submitted {
                Ok(receivers) => receivers,
                Err(err) if job.started_at.is_none() => return Err(err),
                Err(err) => {
                    warn!(job = %job.id, attempt, error = %err, "could not resubmit tasks; marking them lost");
                    for &i in &round {
                        let task = &mut tasks[i];
                        task.status = TaskStatus::Lost;
                        task.outcome = Some(ScriptOutcome::Indeterminate(LOST.to_string()));
                        self.persist_task(task).await;
                    }
                    break;
                }
            };
            job.started_at.get_or_insert_with(Utc::now);

            let mut retry = Vec::new();
            for (&i, rx) in round.iter().zip(receivers) {
                let task = &mut tasks[i];
                let completion = rx.await.ok();
                let final_attempt = attempt == retries;

                match completion {
                    Some(done) => {
                        self.metrics.emit(MetricsEvent::TaskDuration {
                            script: script.name.clone(),
                            seconds: done.duration.as_secs_f64(),
                        });
                        if done.outcome.is_indeterminate() && !final_attempt {
                            warn!(task = %task.id, attempt, detail = done.outcome.detail().unwrap_or_default(), "indeterminate task; retrying");
                            retry.push(i);
                        } else {
                            record_completion(task, done);
                        }
                    }
                    None if !final_attempt => {
                        warn!(task = %task.id, attempt, "task lost; retrying");
                        retry.push(i);
                    }
                    None => {
                        warn!(task = %task.id, attempt, "task lost");
                        task.status = TaskStatus::Lost;
                        task.outcome = Some(ScriptOutcome::Indeterminate(LOST.to_string()));
                    }
                }
                self.persist_task(task).await;
            }

            if retry.is_empty() {
                break;
            }
            round = retry;
        }

        Ok(tasks
            .iter()
            .map(|t| {
                t.outcome
                    .clone()
                    .unwrap_or_else(|| ScriptOutcome::Indeterminate(LOST.to_string()))
            })
            .collect())
    }

    /// Task rows are bookkeeping: the outcome in hand still counts if the
    /// write keeps failing.
    async fn persist_task(&self, task: &TaskRecord) {
        if let Err(err) = self.infra.run("saving task", || self.store.save_task(task)).await {
            warn!(task = %task.id, status = ?task.status, error = %err, "could not record task state");
        }
    }

    async fn finish_job(&self, job: &mut JobRecord, link: &ChainLink, outcome: &JobOutcome) -> Result<()> {
        let override_status = link
            .exit_codes
            .lookup(outcome)
            .and_then(|entry| entry.job_status);
        job.status = match outcome {
            JobOutcome::Indeterminate(_) => JobStatus::Failed,
            JobOutcome::Code(_) => match override_status {
                Some(status @ (JobStatus::Completed | JobStatus::Failed)) => status,
                _ if outcome.is_success() => JobStatus::Completed,
                _ => JobStatus::Failed,
            },
        };
        job.exit_code = outcome.code();
        job.indeterminate = match outcome {
            JobOutcome::Indeterminate(detail) => Some(detail.clone()),
            JobOutcome::Code(_) => None,
        };
        job.finished_at = Some(Utc::now());
        self.infra
            .run("saving job", || self.store.save_job(&*job))
            .await?;

        let script = link.script().unwrap_or_default().to_string();
        let event = if job.status == JobStatus::Completed {
            MetricsEvent::JobCompleted {
                link: link.id.clone(),
                script,
            }
        } else {
            MetricsEvent::JobFailed {
                link: link.id.clone(),
                script,
            }
        };
        self.metrics.emit(event);

        debug!(job = %job.id, status = ?job.status, %outcome, "job finished");
        Ok(())
    }

    fn resolve_link<'a>(&self, link: &'a ChainLink) -> Result<(&'a TaskTemplate, Arc<RegisteredScript>)> {
        let template = link.template().ok_or_else(|| {
            EngineError::InvalidState(format!("link '{}' does not run a script", link.id))
        })?;
        let script = self
            .registry
            .get(&template.script)
            .ok_or_else(|| EngineError::UnknownScript(template.script.clone()))?;
        Ok((template, script))
    }

    fn list_files(
        &self,
        package: &Package,
        filter_subdir: Option<&str>,
        filter_file_end: Option<&str>,
    ) -> Result<Vec<FileItem>> {
        let root = location_path(&package.location);
        let base = match filter_subdir {
            Some(sub) => root.join(sub.trim_matches('/')),
            None => root.clone(),
        };
        if !self.fs.is_dir(&base) {
            return Ok(Vec::new());
        }

        let files = self.fs.list_files_recursive(&base)?;
        Ok(files
            .into_iter()
            .filter(|p| match filter_file_end {
                Some(end) => p.to_string_lossy().ends_with(end),
                None => true,
            })
            .map(|path| FileItem {
                relative: relative_to(&root, &path),
                path,
            })
            .collect())
    }
}

fn record_completion(task: &mut TaskRecord, done: Completion) {
    task.status = TaskStatus::Done;
    task.worker = Some(done.worker);
    task.exit_code = done.outcome.code();
    task.duration_ms = Some(done.duration.as_millis() as u64);
    if let Some(report) = done.report {
        task.stdout = report.stdout;
        task.stderr = report.stderr;
    }
    task.outcome = Some(done.outcome);
}

/// Location string without the directory marker.
pub(crate) fn location_path(location: &str) -> PathBuf {
    let trimmed = location.trim_end_matches('/');
    if trimmed.is_empty() {
        PathBuf::from("/")
    } else {
        PathBuf::from(trimmed)
    }
}

fn relative_to(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}
