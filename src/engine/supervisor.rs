// src/engine/supervisor.rs

//! Process supervisor: startup, package starts, decisions and shutdown.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use globset::GlobSet;
use parking_lot::Mutex;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{ConfigFile, WatchedDirectory};
use crate::engine::chain::{ChainStep, JobChain};
use crate::engine::locks::{PackageGuard, PackageLocks};
use crate::engine::walker::{self, ChainContext, ChainEnd};
use crate::errors::{EngineError, Result};
use crate::exec::{Dispatcher, InfraRetry, PoolStats, ScriptRegistry, WorkerPool};
use crate::fs::{FileSystem, RealFileSystem};
use crate::metrics::{self, LogSink, MetricsEvent, MetricsSender, MetricsSink};
use crate::store::{open_store, Package, Store};
use crate::trigger::{self, AwaitingDecision, TriggerHandle};
use crate::watch::path_utils::{build_ignore_set, is_ignored};
use crate::watch::{resolve_package, spawn_watcher, WatcherHandle};
use crate::workflow::{LinkId, LinkKind, WorkflowGraph};

/// Created under the shared directory at startup, next to the watched paths.
pub const SHARED_DIRS: &[&str] = &[
    "currentlyProcessing",
    "completed",
    "failed",
    "rejected",
    "tmp",
    "watchedDirectories",
];

/// Where a started chain begins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartAt {
    /// A specific link (new packages, packages entering a new watched dir).
    Link(LinkId),
    /// The persisted cursor, or the watched directory's entry if unset.
    Cursor,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// All chains stopped within `drain_timeout`.
    pub drained: bool,
    pub failed_jobs: usize,
    pub lost_tasks: usize,
}

#[derive(Default)]
struct ChainTracker {
    active: AtomicUsize,
    idle: Notify,
}

impl ChainTracker {
    fn begin(&self) {
        self.active.fetch_add(1, Ordering::SeqCst);
    }

    fn end(&self) {
        if self.active.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }

    async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            if self.active.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }
}

struct Shared {
    config: ConfigFile,
    graph: Arc<WorkflowGraph>,
    store: Arc<dyn Store>,
    fs: Arc<dyn FileSystem>,
    pool: Arc<WorkerPool>,
    metrics: MetricsSender,
    locks: PackageLocks,
    ignore: GlobSet,
    ctx: ChainContext,
    accepting: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
    chains: ChainTracker,
    trigger: TriggerHandle,
    background: Mutex<Vec<JoinHandle<()>>>,
    watcher: Mutex<Option<WatcherHandle>>,
}

/// Handle to a running engine. Cheap to clone.
#[derive(Clone)]
pub struct Engine {
    shared: Arc<Shared>,
}

/// Assembles an [`Engine`]. Anything not supplied is built from the config.
pub struct EngineBuilder {
    config: ConfigFile,
    registry: Option<ScriptRegistry>,
    store: Option<Arc<dyn Store>>,
    fs: Option<Arc<dyn FileSystem>>,
    sink: Option<Box<dyn MetricsSink>>,
    watch: bool,
}

impl EngineBuilder {
    pub fn new(config: ConfigFile) -> Self {
        Self {
            config,
            registry: None,
            store: None,
            fs: None,
            sink: None,
            watch: true,
        }
    }

    pub fn registry(mut self, registry: ScriptRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn filesystem(mut self, fs: Arc<dyn FileSystem>) -> Self {
        self.fs = Some(fs);
        self
    }

    pub fn metrics_sink(mut self, sink: Box<dyn MetricsSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Start the polling watcher (default true).
    pub fn watch(mut self, enabled: bool) -> Self {
        self.watch = enabled;
        self
    }

    pub async fn start(self) -> Result<Engine> {
        let config = self.config;
        let settings = config.engine.clone();
        let graph = Arc::new(config.graph.clone());

        let registry = match self.registry {
            Some(registry) => registry,
            None => ScriptRegistry::from_config(&config)?,
        };
        registry.validate_workflow(&graph)?;
        let registry = Arc::new(registry);

        let fs: Arc<dyn FileSystem> = self.fs.unwrap_or_else(|| Arc::new(RealFileSystem));
        create_layout(fs.as_ref(), &settings.shared_directory, &config.watched_directories)?;

        let store = match self.store {
            Some(store) => store,
            None => open_store(settings.store, &settings.shared_directory)?,
        };

        let recovery = store.recover_interrupted()?;
        if recovery.failed_jobs > 0 || recovery.lost_tasks > 0 {
            warn!(
                failed_jobs = recovery.failed_jobs,
                lost_tasks = recovery.lost_tasks,
                "recovered work interrupted by a previous shutdown"
            );
        }

        let pool = Arc::new(WorkerPool::start(
            settings.worker_capacity,
            settings.max_queue_depth,
        ));

        let sink = self.sink.unwrap_or_else(|| Box::new(LogSink));
        let (metrics, metrics_task) = metrics::spawn_metrics_sink(sink, metrics::DEFAULT_BUFFER);

        let infra = InfraRetry::new(settings.infra_retries);
        let dispatcher = Arc::new(
            Dispatcher::new(
                Arc::clone(&pool),
                registry,
                Arc::clone(&store),
                Arc::clone(&fs),
                metrics.clone(),
                settings.shared_directory.clone(),
                settings.task_retries,
            )
            .with_infra_retry(infra),
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let ctx = ChainContext {
            graph: Arc::clone(&graph),
            store: Arc::clone(&store),
            dispatcher,
            metrics: metrics.clone(),
            infra,
            shutdown: shutdown_rx.clone(),
        };

        let (trigger, trigger_rx) = TriggerHandle::channel(settings.trigger_capacity * 4);
        let ignore = build_ignore_set(&settings.ignore)?;

        let engine = Engine {
            shared: Arc::new(Shared {
                config,
                graph,
                store,
                fs,
                pool,
                metrics,
                locks: PackageLocks::new(),
                ignore,
                ctx,
                accepting: AtomicBool::new(true),
                shutdown_tx,
                chains: ChainTracker::default(),
                trigger,
                background: Mutex::new(vec![metrics_task]),
                watcher: Mutex::new(None),
            }),
        };

        let trigger_task = trigger::spawn_trigger_service(
            engine.clone(),
            trigger_rx,
            settings.trigger_capacity,
            shutdown_rx,
        );
        engine.shared.background.lock().push(trigger_task);

        if self.watch {
            let handle = spawn_watcher(engine.clone(), settings.poll_interval)?;
            *engine.shared.watcher.lock() = Some(handle);
        }

        for package in recovery.resumable {
            match engine.start_package(package.uuid, StartAt::Cursor, None) {
                Ok(true) => info!(package = %package.uuid, link = ?package.current_link, "re-queued package"),
                Ok(false) => {}
                Err(err) => warn!(package = %package.uuid, error = %err, "could not re-queue package"),
            }
        }

        info!(
            workers = settings.worker_capacity,
            triggers = settings.trigger_capacity,
            shared = %settings.shared_directory.display(),
            "engine started"
        );
        Ok(engine)
    }
}

fn create_layout(fs: &dyn FileSystem, shared: &Path, watched: &[WatchedDirectory]) -> Result<()> {
    let dirs = SHARED_DIRS
        .iter()
        .map(|d| shared.join(d))
        .chain(watched.iter().map(|w| shared.join(&w.path)));
    for dir in dirs {
        fs.create_dir_all(&dir)?;
    }
    Ok(())
}

impl Engine {
    pub fn config(&self) -> &ConfigFile {
        &self.shared.config
    }

    pub fn store(&self) -> Arc<dyn Store> {
        Arc::clone(&self.shared.store)
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.shared.pool.stats()
    }

    pub fn trigger(&self) -> TriggerHandle {
        self.shared.trigger.clone()
    }

    pub fn is_busy(&self, package: Uuid) -> bool {
        self.shared.locks.is_held(package)
    }

    /// Packages that are not terminal yet, oldest first.
    pub fn active_packages(&self) -> Result<Vec<Package>> {
        Ok(self
            .shared
            .store
            .packages()?
            .into_iter()
            .filter(|p| !p.status.is_terminal())
            .collect())
    }

    /// Packages parked at a choice link with no chain running.
    pub fn awaiting_decisions(&self) -> Result<Vec<AwaitingDecision>> {
        let parked = self
            .active_packages()?
            .into_iter()
            .filter(|p| !self.is_busy(p.uuid))
            .filter_map(|p| {
                let link = self.shared.graph.get(p.current_link.as_deref()?)?;
                match &link.kind {
                    LinkKind::Choice { choices } => Some(AwaitingDecision {
                        package: p.uuid,
                        link: link.id.clone(),
                        choices: choices.clone(),
                    }),
                    _ => None,
                }
            })
            .collect();
        Ok(parked)
    }

    /// Absolute path of watched directory `index`.
    pub fn watched_root(&self, index: usize) -> Option<PathBuf> {
        self.shared
            .config
            .watched_directory(index)
            .map(|w| self.shared.config.engine.shared_directory.join(&w.path))
    }

    pub fn watched_roots(&self) -> Vec<(usize, PathBuf)> {
        (0..self.shared.config.watched_directories.len())
            .filter_map(|i| self.watched_root(i).map(|root| (i, root)))
            .collect()
    }

    /// Resolve `path` (a child of watched directory `index`) and start its
    /// chain. Returns the package UUID if a chain was started.
    pub fn ingest(&self, path: &Path, index: usize) -> Result<Option<Uuid>> {
        let watched = self
            .shared
            .config
            .watched_directory(index)
            .ok_or_else(|| EngineError::ConfigError(format!("no watched directory #{index}")))?;

        if is_ignored(&self.shared.ignore, path) {
            debug!(path = %path.display(), "ignored entry");
            return Ok(None);
        }
        if watched.only_dirs && !self.shared.fs.is_dir(path) {
            debug!(path = %path.display(), "watched directory only accepts directories");
            return Ok(None);
        }
        if !self.shared.fs.exists(path) {
            debug!(path = %path.display(), "entry disappeared before it could be resolved");
            return Ok(None);
        }

        let resolution = resolve_package(
            self.shared.store.as_ref(),
            self.shared.fs.as_ref(),
            path,
            index,
            watched,
        )?;
        let package = &resolution.package;

        let at = if resolution.created
            || package.current_link.is_none()
            || package.watched_dir != Some(index)
        {
            StartAt::Link(watched.link.clone())
        } else {
            StartAt::Cursor
        };

        let started = self.start_package(package.uuid, at, Some(index))?;
        Ok(started.then_some(package.uuid))
    }

    /// Start a walker for `package`. Returns `false` if the package is owned
    /// by another chain or already terminal.
    pub fn start_package(&self, package: Uuid, at: StartAt, index: Option<usize>) -> Result<bool> {
        if !self.shared.accepting.load(Ordering::SeqCst) {
            return Err(EngineError::Shutdown);
        }
        let Some(guard) = self.shared.locks.try_acquire(package) else {
            debug!(%package, "package already owned by a chain");
            return Ok(false);
        };

        let mut record = self
            .shared
            .store
            .package(package)?
            .ok_or(EngineError::PackageNotFound(package))?;
        if record.status.is_terminal() {
            debug!(%package, status = ?record.status, "package is terminal; not starting");
            return Ok(false);
        }

        if let Some(i) = index {
            if record.watched_dir != Some(i) {
                record = self
                    .shared
                    .store
                    .update_package(package, &mut |p: &mut Package| p.watched_dir = Some(i))?;
            }
        }

        let start = match at {
            StartAt::Link(link) => link,
            StartAt::Cursor => record
                .current_link
                .clone()
                .or_else(|| {
                    record
                        .watched_dir
                        .and_then(|i| self.shared.config.watched_directory(i))
                        .map(|w| w.link.clone())
                })
                .ok_or_else(|| {
                    EngineError::InvalidState(format!("package {package} has no cursor or entry link"))
                })?,
        };
        if !self.shared.graph.contains(&start) {
            return Err(EngineError::LinkNotFound(start));
        }

        self.shared.metrics.emit(MetricsEvent::PackageStarted {
            unit: record.unit_type,
        });
        info!(%package, link = %start, location = %record.location, "starting chain");
        self.spawn_chain(JobChain::new(package, start), guard);
        Ok(true)
    }

    /// Apply a decision to a parked package, or re-queue a non-running
    /// package at an explicit link.
    pub fn resume(&self, package: Uuid, link: &str) -> Result<()> {
        if !self.shared.accepting.load(Ordering::SeqCst) {
            return Err(EngineError::Shutdown);
        }
        let guard = self
            .shared
            .locks
            .try_acquire(package)
            .ok_or(EngineError::Busy(package))?;

        let mut record = self
            .shared
            .store
            .package(package)?
            .ok_or(EngineError::PackageNotFound(package))?;
        if record.status.is_terminal() {
            return Err(EngineError::InvalidDecision(format!(
                "package {package} is already {:?}",
                record.status
            )));
        }
        let cursor = record.current_link.clone().ok_or_else(|| {
            EngineError::InvalidDecision(format!("package {package} has not started"))
        })?;

        let graph = &self.shared.graph;
        let chain = match graph.get(&cursor).map(|l| &l.kind) {
            Some(LinkKind::Choice { .. }) => {
                let mut chain = JobChain::new(package, cursor);
                match chain.next(graph, &mut record)? {
                    ChainStep::AwaitDecision { .. } => {}
                    other => {
                        return Err(EngineError::InvalidState(format!(
                            "expected a parked decision, got {other:?}"
                        )))
                    }
                }
                chain.resume(graph, &mut record, link)?;
                chain
            }
            _ => {
                if !graph.contains(link) {
                    return Err(EngineError::LinkNotFound(link.to_string()));
                }
                record.current_link = Some(link.to_string());
                JobChain::new(package, link)
            }
        };
        self.shared
            .store
            .update_package(package, &mut |p: &mut Package| p.apply_chain_state(&record))?;

        info!(%package, %link, "resuming package");
        self.spawn_chain(chain, guard);
        Ok(())
    }

    fn spawn_chain(&self, chain: JobChain, guard: PackageGuard) {
        self.shared.chains.begin();
        let engine = self.clone();
        tokio::spawn(async move {
            let package = chain.package();
            match walker::drive(&engine.shared.ctx, chain, guard).await {
                Ok(ChainEnd::Finished(status)) => debug!(%package, ?status, "chain finished"),
                Ok(end) => debug!(%package, ?end, "chain stopped"),
                Err(EngineError::Shutdown) => info!(%package, "chain stopped by shutdown"),
                Err(err) => error!(
                    %package,
                    error = %err,
                    "chain aborted; package left active for recovery"
                ),
            }
            engine.shared.locks.prune();
            engine.shared.chains.end();
        });
    }

    /// Ingest every entry already present in the watched directories.
    pub fn scan_watched_dirs(&self) -> Result<usize> {
        let mut started = 0;
        for (index, root) in self.watched_roots() {
            if !self.shared.fs.is_dir(&root) {
                continue;
            }
            let mut entries = self.shared.fs.read_dir(&root)?;
            entries.sort();
            for entry in entries {
                match self.ingest(&entry, index) {
                    Ok(Some(_)) => started += 1,
                    Ok(None) => {}
                    Err(err) => warn!(path = %entry.display(), error = %err, "could not ingest entry"),
                }
            }
        }
        Ok(started)
    }

    /// Resolve once no chain is running.
    pub async fn wait_idle(&self) {
        self.shared.chains.wait_idle().await;
    }

    /// Stop accepting starts, drain chains up to `drain_timeout`, then stop
    /// workers, the watcher and the trigger surface.
    pub async fn shutdown(&self) -> Result<ShutdownReport> {
        info!("engine shutting down");
        self.shared.accepting.store(false, Ordering::SeqCst);
        let _ = self.shared.shutdown_tx.send(true);
        self.shared.watcher.lock().take();

        let timeout = self.shared.config.engine.drain_timeout;
        let drained = tokio::time::timeout(timeout, self.wait_idle()).await.is_ok();

        let mut report = ShutdownReport {
            drained,
            ..ShutdownReport::default()
        };
        if drained {
            self.shared.pool.close();
            self.shared.pool.join().await;
        } else {
            warn!(?timeout, "drain timeout reached; abandoning in-flight tasks");
            self.shared.pool.abort();
            let recovery = self.shared.store.recover_interrupted()?;
            report.failed_jobs = recovery.failed_jobs;
            report.lost_tasks = recovery.lost_tasks;
        }

        for handle in self.shared.background.lock().drain(..) {
            handle.abort();
        }
        info!(drained, "engine stopped");
        Ok(report)
    }
}
