// src/engine/mod.rs

//! Workflow engine.
//!
//! - [`chain`]: the pure `JobChain` state machine (no IO).
//! - [`walker`]: the async shell that drives a chain for one package.
//! - [`locks`]: per-package ownership.
//! - [`supervisor`]: startup, package starts, decisions and shutdown.

pub mod chain;
pub mod locks;
pub mod supervisor;
pub mod walker;

pub use chain::{ChainState, ChainStep, JobChain, Transition};
pub use locks::{PackageGuard, PackageLocks};
pub use supervisor::{Engine, EngineBuilder, ShutdownReport, StartAt, SHARED_DIRS};
pub use walker::{ChainContext, ChainEnd};
