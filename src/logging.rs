// src/logging.rs

//! Logging setup using `tracing` + `tracing-subscriber`.
//!
//! Priority for the filter:
//! 1. `--log-level` CLI flag
//! 2. `INGESTFLOW_LOG` (any `EnvFilter` directive, e.g. `ingestflow=debug,info`)
//! 3. `info`

use anyhow::{anyhow, Result};
use tracing_subscriber::EnvFilter;

use crate::cli::LogLevel;

pub const LOG_ENV: &str = "INGESTFLOW_LOG";

/// Install the global subscriber. Logs go to stderr so stdout stays free
/// for `--dry-run` output.
pub fn init_logging(cli_level: Option<LogLevel>) -> Result<()> {
    let filter = build_filter(cli_level, std::env::var(LOG_ENV).ok().as_deref());

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .try_init()
        .map_err(|e| anyhow!("installing log subscriber: {e}"))
}

fn build_filter(cli_level: Option<LogLevel>, env: Option<&str>) -> EnvFilter {
    if let Some(level) = cli_level {
        return EnvFilter::new(level.as_str());
    }
    env.and_then(|s| EnvFilter::try_new(s.trim()).ok())
        .unwrap_or_else(|| EnvFilter::new("info"))
}
