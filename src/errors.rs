// src/errors.rs

//! Crate-wide error type.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// A workflow-definition fault: the graph could not route an outcome.
///
/// Faults are fatal to the package they happen on and are stored on the
/// package record so they can be inspected afterwards.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("link '{link}' cannot route {outcome}: {reason}")]
pub struct WorkflowFault {
    pub link: String,
    pub outcome: String,
    pub reason: String,
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Chain link not found: {0}")]
    LinkNotFound(String),

    #[error("Package not found: {0}")]
    PackageNotFound(Uuid),

    #[error("Workflow definition fault: {0}")]
    Workflow(#[from] WorkflowFault),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Worker queue is full ({0} tasks queued)")]
    QueueFull(usize),

    #[error("Unknown script: {0}")]
    UnknownScript(String),

    #[error("Argument error: {0}")]
    Argument(String),

    #[error("Package {0} is owned by another chain")]
    Busy(Uuid),

    #[error("Invalid decision: {0}")]
    InvalidDecision(String),

    #[error("Invalid chain state: {0}")]
    InvalidState(String),

    #[error("Engine is shutting down")]
    Shutdown,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl EngineError {
    /// Infrastructure faults are retried at the operation level; everything
    /// else is surfaced immediately.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            EngineError::Store(_) | EngineError::QueueFull(_) | EngineError::IoError(_)
        )
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, EngineError>;
