// src/workflow/mod.rs

//! The in-memory workflow: chain links, their exit-code maps, fan-in
//! policies and the argument resolver used when a link is expanded into
//! tasks.

pub mod args;
pub mod fan_in;
pub mod graph;

pub use args::{resolve_arguments, ArgContext, FileItem};
pub use fan_in::{FanInPolicy, JobOutcome};
pub use graph::{
    ChainLink, ExitCodeMap, ExitEntry, ExitTarget, FanOut, LinkId, LinkKind, TaskTemplate,
    WorkflowGraph,
};
