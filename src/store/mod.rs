// src/store/mod.rs

//! Persistence boundary for packages, jobs and tasks.
//!
//! The engine only sees the `Store` trait. Two backends mirror each other:
//! `MemoryStore` keeps records in memory, `FileStore` additionally writes a
//! JSON snapshot of packages and jobs after each change to them and appends
//! task records to a log. Both enforce the package status monotonicity rule
//! at the boundary.

use std::path::Path;
use std::sync::Arc;

use uuid::Uuid;

use crate::errors::Result;
use crate::types::StoreMode;

mod file;
mod memory;
pub mod records;
mod state;
mod task_log;

pub use file::FileStore;
pub use memory::MemoryStore;
pub use records::{JobRecord, Package, RecoveryReport, TaskRecord};

pub trait Store: Send + Sync {
    /// Atomically insert `candidate` unless a package with the same location
    /// (or UUID) exists. Returns the stored package and whether it was created.
    fn create_package_if_absent(&self, candidate: Package) -> Result<(Package, bool)>;

    fn package(&self, uuid: Uuid) -> Result<Option<Package>>;

    fn package_by_location(&self, location: &str) -> Result<Option<Package>>;

    /// All packages, oldest first.
    fn packages(&self) -> Result<Vec<Package>>;

    /// Overwrite an existing package. Fails if it would leave a terminal status.
    fn save_package(&self, package: &Package) -> Result<()>;

    /// Apply `edit` to the stored package atomically and return the result.
    /// Writers that own different fields use this so neither overwrites the
    /// other. Same terminal rule as `save_package`.
    fn update_package(&self, uuid: Uuid, edit: &mut dyn FnMut(&mut Package)) -> Result<Package>;

    /// Fails if the package is terminal.
    fn insert_job(&self, job: &JobRecord) -> Result<()>;

    fn save_job(&self, job: &JobRecord) -> Result<()>;

    fn job(&self, id: Uuid) -> Result<Option<JobRecord>>;

    /// Jobs of a package in creation order.
    fn jobs_for(&self, package: Uuid) -> Result<Vec<JobRecord>>;

    fn insert_tasks(&self, tasks: &[TaskRecord]) -> Result<()>;

    fn save_task(&self, task: &TaskRecord) -> Result<()>;

    fn tasks_for(&self, job: Uuid) -> Result<Vec<TaskRecord>>;

    /// Fail unfinished jobs, mark unfinished tasks lost and list the active
    /// packages that need to be re-queued.
    fn recover_interrupted(&self) -> Result<RecoveryReport>;
}

/// Open the backend selected by `[engine].store`.
pub fn open_store(mode: StoreMode, shared_directory: &Path) -> Result<Arc<dyn Store>> {
    let store: Arc<dyn Store> = match mode {
        StoreMode::Memory => Arc::new(MemoryStore::new()),
        StoreMode::File => Arc::new(FileStore::open(FileStore::default_path(
            shared_directory,
        ))?),
    };
    Ok(store)
}

/// Implements `Store` for a backend that provides `read`, `mutate` (packages
/// and jobs), `mutate_tasks` and `recover`.
macro_rules! impl_store {
    ($ty:ty) => {
        impl $crate::store::Store for $ty {
            fn create_package_if_absent(
                &self,
                candidate: $crate::store::Package,
            ) -> $crate::errors::Result<($crate::store::Package, bool)> {
                self.mutate(|s| Ok(s.create_package_if_absent(candidate)))
            }

            fn package(
                &self,
                uuid: ::uuid::Uuid,
            ) -> $crate::errors::Result<Option<$crate::store::Package>> {
                Ok(self.read(|s| s.package(uuid)))
            }

            fn package_by_location(
                &self,
                location: &str,
            ) -> $crate::errors::Result<Option<$crate::store::Package>> {
                Ok(self.read(|s| s.package_by_location(location)))
            }

            fn packages(&self) -> $crate::errors::Result<Vec<$crate::store::Package>> {
                Ok(self.read(|s| s.packages()))
            }

            fn save_package(&self, package: &$crate::store::Package) -> $crate::errors::Result<()> {
                self.mutate(|s| s.save_package(package))
            }

            fn update_package(
                &self,
                uuid: ::uuid::Uuid,
                edit: &mut dyn FnMut(&mut $crate::store::Package),
            ) -> $crate::errors::Result<$crate::store::Package> {
                self.mutate(|s| s.update_package(uuid, edit))
            }

            fn insert_job(&self, job: &$crate::store::JobRecord) -> $crate::errors::Result<()> {
                self.mutate(|s| s.insert_job(job))
            }

            fn save_job(&self, job: &$crate::store::JobRecord) -> $crate::errors::Result<()> {
                self.mutate(|s| s.save_job(job))
            }

            fn job(
                &self,
                id: ::uuid::Uuid,
            ) -> $crate::errors::Result<Option<$crate::store::JobRecord>> {
                Ok(self.read(|s| s.job(id)))
            }

            fn jobs_for(
                &self,
                package: ::uuid::Uuid,
            ) -> $crate::errors::Result<Vec<$crate::store::JobRecord>> {
                Ok(self.read(|s| s.jobs_for(package)))
            }

            fn insert_tasks(
                &self,
                tasks: &[$crate::store::TaskRecord],
            ) -> $crate::errors::Result<()> {
                self.mutate_tasks(tasks, |s| s.insert_tasks(tasks))
            }

            fn save_task(&self, task: &$crate::store::TaskRecord) -> $crate::errors::Result<()> {
                self.mutate_tasks(::std::slice::from_ref(task), |s| s.save_task(task))
            }

            fn tasks_for(
                &self,
                job: ::uuid::Uuid,
            ) -> $crate::errors::Result<Vec<$crate::store::TaskRecord>> {
                Ok(self.read(|s| s.tasks_for(job)))
            }

            fn recover_interrupted(
                &self,
            ) -> $crate::errors::Result<$crate::store::RecoveryReport> {
                self.recover()
            }
        }
    };
}

pub(crate) use impl_store;
