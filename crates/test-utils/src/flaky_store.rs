use std::sync::atomic::{AtomicUsize, Ordering};

use ingestflow::errors::{EngineError, Result};
use ingestflow::store::{JobRecord, MemoryStore, Package, RecoveryReport, Store, TaskRecord};
use ingestflow::types::TaskStatus;
use uuid::Uuid;

/// `MemoryStore` that fails selected writes with a transient store error.
///
/// `new(n)` fails the first `n` job inserts. `failing_finished_tasks(n)`
/// additionally fails the first `n` saves of a task that reached `Done`.
pub struct FlakyStore {
    inner: MemoryStore,
    remaining: AtomicUsize,
    finished_task_failures: AtomicUsize,
}

impl FlakyStore {
    pub fn new(failures: usize) -> Self {
        Self {
            inner: MemoryStore::new(),
            remaining: AtomicUsize::new(failures),
            finished_task_failures: AtomicUsize::new(0),
        }
    }

    pub fn failing_finished_tasks(self, failures: usize) -> Self {
        self.finished_task_failures.store(failures, Ordering::SeqCst);
        self
    }

    fn maybe_fail(counter: &AtomicUsize) -> Result<()> {
        let tripped = counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if tripped {
            return Err(EngineError::Store("injected failure".to_string()));
        }
        Ok(())
    }
}

impl Store for FlakyStore {
    fn create_package_if_absent(&self, candidate: Package) -> Result<(Package, bool)> {
        self.inner.create_package_if_absent(candidate)
    }

    fn package(&self, uuid: Uuid) -> Result<Option<Package>> {
        self.inner.package(uuid)
    }

    fn package_by_location(&self, location: &str) -> Result<Option<Package>> {
        self.inner.package_by_location(location)
    }

    fn packages(&self) -> Result<Vec<Package>> {
        self.inner.packages()
    }

    fn save_package(&self, package: &Package) -> Result<()> {
        self.inner.save_package(package)
    }

    fn update_package(&self, uuid: Uuid, edit: &mut dyn FnMut(&mut Package)) -> Result<Package> {
        self.inner.update_package(uuid, edit)
    }

    fn insert_job(&self, job: &JobRecord) -> Result<()> {
        Self::maybe_fail(&self.remaining)?;
        self.inner.insert_job(job)
    }

    fn save_job(&self, job: &JobRecord) -> Result<()> {
        self.inner.save_job(job)
    }

    fn job(&self, id: Uuid) -> Result<Option<JobRecord>> {
        self.inner.job(id)
    }

    fn jobs_for(&self, package: Uuid) -> Result<Vec<JobRecord>> {
        self.inner.jobs_for(package)
    }

    fn insert_tasks(&self, tasks: &[TaskRecord]) -> Result<()> {
        self.inner.insert_tasks(tasks)
    }

    fn save_task(&self, task: &TaskRecord) -> Result<()> {
        if task.status == TaskStatus::Done {
            Self::maybe_fail(&self.finished_task_failures)?;
        }
        self.inner.save_task(task)
    }

    fn tasks_for(&self, job: Uuid) -> Result<Vec<TaskRecord>> {
        self.inner.tasks_for(job)
    }

    fn recover_interrupted(&self) -> Result<RecoveryReport> {
        self.inner.recover_interrupted()
    }
}
