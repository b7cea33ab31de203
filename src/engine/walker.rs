// src/engine/walker.rs

//! Async shell around [`JobChain`].
//!
//! The walker owns a package for as long as its [`PackageGuard`] lives. It
//! persists the package at every stable point, runs jobs through the
//! dispatcher and retries infrastructure faults with backoff. A cursor is
//! only written after the job that moved it has finished.
//!
//! Only the chain fields of the package (cursor, status, variables, fault)
//! are written back. The location belongs to the watcher, which may move it
//! while a job runs; the walker picks the new one up after each save.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::engine::chain::{ChainStep, JobChain, Transition};
use crate::engine::locks::PackageGuard;
use crate::errors::{EngineError, Result};
use crate::exec::{Dispatcher, InfraRetry};
use crate::metrics::{MetricsEvent, MetricsSender};
use crate::store::{JobRecord, Package, Store};
use crate::types::PackageStatus;
use crate::workflow::{JobOutcome, WorkflowGraph};

/// Shared pieces every walker needs.
#[derive(Clone)]
pub struct ChainContext {
    pub graph: Arc<WorkflowGraph>,
    pub store: Arc<dyn Store>,
    pub dispatcher: Arc<Dispatcher>,
    pub metrics: MetricsSender,
    pub infra: InfraRetry,
    pub shutdown: watch::Receiver<bool>,
}

/// How a walk ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainEnd {
    Finished(PackageStatus),
    AwaitingDecision(String),
    /// Shutdown was requested; the cursor is persisted for recovery.
    Interrupted,
}

impl ChainContext {
    fn stopping(&self) -> bool {
        *self.shutdown.borrow()
    }

    async fn retry<T>(&self, what: &str, op: impl FnMut() -> Result<T>) -> Result<T> {
        self.infra.run(what, op).await
    }

    /// Write the chain fields of `package` and adopt whatever location the
    /// store holds now.
    async fn persist(&self, package: &mut Package) -> Result<()> {
        let snapshot = package.clone();
        let stored = self
            .retry("saving package", || {
                self.store
                    .update_package(snapshot.uuid, &mut |p: &mut Package| p.apply_chain_state(&snapshot))
            })
            .await?;
        if stored.location != package.location {
            debug!(package = %package.uuid, from = %package.location, to = %stored.location, "package moved");
            package.location = stored.location;
        }
        Ok(())
    }

    fn emit_terminal(&self, package: &Package) {
        let unit = package.unit_type;
        let event = match package.status {
            PackageStatus::Completed => MetricsEvent::PackageCompleted { unit },
            PackageStatus::Failed => MetricsEvent::PackageFailed { unit },
            PackageStatus::Rejected => MetricsEvent::PackageRejected { unit },
            PackageStatus::Active => return,
        };
        self.metrics.emit(event);
    }
}

/// Drive `chain` until the package is terminal, parked, or the engine stops.
///
/// On an exhausted infrastructure retry the error is returned and the
/// package stays `active` at its last persisted cursor.
pub async fn drive(ctx: &ChainContext, mut chain: JobChain, _guard: PackageGuard) -> Result<ChainEnd> {
    let package_id = chain.package();
    let mut package = load(ctx, package_id).await?;

    loop {
        if ctx.stopping() {
            info!(package = %package_id, link = %chain.cursor(), "walker stopping for shutdown");
            return Ok(ChainEnd::Interrupted);
        }

        let step = chain.next(&ctx.graph, &mut package)?;
        match step {
            ChainStep::RunJob(job) => {
                ctx.persist(&mut package).await?;
                let outcome = run_job(ctx, &package, job.clone()).await?;

                if ctx.stopping() && matches!(outcome, JobOutcome::Indeterminate(_)) {
                    // tasks were cut off by shutdown; re-run the link on restart
                    info!(package = %package_id, link = %job.link, "job interrupted by shutdown");
                    return Ok(ChainEnd::Interrupted);
                }

                let transition = chain.complete_job(&ctx.graph, &mut package, job.id, &outcome)?;
                ctx.persist(&mut package).await?;

                match transition {
                    Transition::Moved(next) => {
                        debug!(package = %package_id, link = %next, "cursor advanced");
                    }
                    Transition::Finished(status) => {
                        info!(package = %package_id, ?status, "package finished");
                        ctx.emit_terminal(&package);
                        return Ok(ChainEnd::Finished(status));
                    }
                    Transition::Fault(fault) => {
                        error!(package = %package_id, link = %fault.link, %fault, "workflow definition fault");
                        ctx.emit_terminal(&package);
                        return Ok(ChainEnd::Finished(PackageStatus::Failed));
                    }
                }
            }
            ChainStep::AwaitDecision { link, choices } => {
                ctx.persist(&mut package).await?;
                info!(package = %package_id, %link, ?choices, "package awaiting decision");
                return Ok(ChainEnd::AwaitingDecision(link));
            }
            ChainStep::Finished(status) => {
                ctx.persist(&mut package).await?;
                info!(package = %package_id, ?status, "package finished");
                ctx.emit_terminal(&package);
                return Ok(ChainEnd::Finished(status));
            }
            ChainStep::Fault(fault) => {
                ctx.persist(&mut package).await?;
                error!(package = %package_id, link = %fault.link, %fault, "workflow definition fault");
                ctx.emit_terminal(&package);
                return Ok(ChainEnd::Finished(PackageStatus::Failed));
            }
        }
    }
}

async fn load(ctx: &ChainContext, package: Uuid) -> Result<Package> {
    ctx.retry("loading package", || ctx.store.package(package))
        .await?
        .ok_or(EngineError::PackageNotFound(package))
}

/// Create, persist and dispatch one job.
///
/// A transient fault that hits before any task was admitted retries the
/// whole job with a fresh record; the chain still sees the original id.
/// Once tasks have run the error is returned so finished scripts are not
/// executed twice.
async fn run_job(
    ctx: &ChainContext,
    package: &Package,
    job: JobRecord,
) -> Result<JobOutcome> {
    let link = ctx
        .graph
        .get(&job.link)
        .ok_or_else(|| EngineError::LinkNotFound(job.link.clone()))?;

    let mut attempt = 0u32;
    let mut record = job;
    loop {
        ctx.retry("creating job", || ctx.store.insert_job(&record))
            .await?;
        match ctx.dispatcher.run_job(&mut record, link, package).await {
            Ok(outcome) => return Ok(outcome),
            Err(err)
                if err.is_transient()
                    && record.started_at.is_none()
                    && attempt < ctx.infra.retries()
                    && !ctx.stopping() =>
            {
                attempt += 1;
                warn!(package = %package.uuid, link = %link.id, attempt, error = %err, "dispatch failed before any task ran; retrying job");
                tokio::time::sleep(ctx.infra.backoff(attempt)).await;
                record = JobRecord::new(package.uuid, link.id.clone());
            }
            Err(err) => return Err(err),
        }
    }
}
