// src/types.rs

//! Small shared enums used across config, store and engine.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Kind of unit travelling through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitType {
    Transfer,
    Sip,
    Dip,
}

impl UnitType {
    /// Label used in task arguments and metrics (`Transfer`, `SIP`, `DIP`).
    pub fn as_str(&self) -> &'static str {
        match self {
            UnitType::Transfer => "Transfer",
            UnitType::Sip => "SIP",
            UnitType::Dip => "DIP",
        }
    }
}

impl fmt::Display for UnitType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UnitType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "transfer" => Ok(UnitType::Transfer),
            "sip" => Ok(UnitType::Sip),
            "dip" => Ok(UnitType::Dip),
            other => Err(format!(
                "invalid unit type: {other} (expected \"transfer\", \"sip\" or \"dip\")"
            )),
        }
    }
}

/// Lifecycle status of a package.
///
/// Only `Active` is non-terminal; once a package leaves it, it never comes
/// back and no further jobs are created for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageStatus {
    Active,
    Completed,
    Failed,
    Rejected,
}

impl PackageStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PackageStatus::Active)
    }
}

/// Terminal tag a workflow exit entry can route to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Terminal {
    Completed,
    Failed,
    Rejected,
}

impl From<Terminal> for PackageStatus {
    fn from(t: Terminal) -> Self {
        match t {
            Terminal::Completed => PackageStatus::Completed,
            Terminal::Failed => PackageStatus::Failed,
            Terminal::Rejected => PackageStatus::Rejected,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Created,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Dispatched,
    Done,
    /// The worker vanished (or the engine stopped) before reporting.
    Lost,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Lost)
    }
}

/// Where package/job/task records are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreMode {
    /// JSON snapshot under `<shared>/.ingestflow/state.json`.
    File,
    /// In memory only (lost on restart).
    Memory,
}

impl Default for StoreMode {
    fn default() -> Self {
        StoreMode::File
    }
}
