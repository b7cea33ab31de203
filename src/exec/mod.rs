// src/exec/mod.rs

//! Task execution layer.
//!
//! - [`contract`]: the `ScriptHandler` trait and outcome classification.
//! - [`registry`]: name → handler lookup, passed explicitly to the dispatcher.
//! - [`command`]: `CommandScript`, the production handler built on
//!   `tokio::process::Command`.
//! - [`pool`]: the bounded worker pool.
//! - [`dispatcher`]: job expansion, submission, retries and fan-in.
//! - [`retry`]: backoff for transient store and queue faults.

pub mod command;
pub mod contract;
pub mod dispatcher;
pub mod pool;
pub mod registry;
pub mod retry;

pub use command::CommandScript;
pub use contract::{
    HandlerFuture, Invocation, ScriptContract, ScriptHandler, ScriptOutcome, ScriptReport,
    StructuredOutcome,
};
pub use dispatcher::Dispatcher;
pub use pool::{Completion, PoolStats, WorkItem, WorkerPool};
pub use registry::{RegisteredScript, ScriptRegistry};
pub use retry::InfraRetry;
