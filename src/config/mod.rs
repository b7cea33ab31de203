// src/config/mod.rs

//! Configuration loading and validation.
//!
//! - `model.rs`: the TOML-backed data model.
//! - `loader.rs`: reading a file from disk.
//! - `validate.rs`: turning the raw model into a checked `ConfigFile` with a
//!   typed `WorkflowGraph`.

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{default_config_path, load_and_validate, load_from_path, parse_str};
pub use model::{
    parse_duration, ConfigFile, EngineSection, EngineSettings, ExitEntryConfig, FanOutMode,
    LinkConfig, LinkKindTag, RawConfigFile, ScriptConfig, WatchedDirectory,
};
