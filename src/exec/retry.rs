// src/exec/retry.rs

//! Operation-level retry for infrastructure faults (store writes, queue
//! admission).

use std::time::Duration;

use tracing::warn;

use crate::errors::Result;

const BACKOFF_BASE: Duration = Duration::from_millis(50);

/// Retries an operation while it fails with a transient error, sleeping
/// `base * 2^attempt` between tries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InfraRetry {
    retries: u32,
    base: Duration,
}

impl Default for InfraRetry {
    fn default() -> Self {
        Self::new(0)
    }
}

impl InfraRetry {
    pub fn new(retries: u32) -> Self {
        Self {
            retries,
            base: BACKOFF_BASE,
        }
    }

    pub fn with_base(mut self, base: Duration) -> Self {
        self.base = base;
        self
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base * 2u32.pow(attempt.min(6))
    }

    pub async fn run<T>(&self, what: &str, mut op: impl FnMut() -> Result<T>) -> Result<T> {
        let mut attempt = 0u32;
        loop {
            match op() {
                Ok(v) => return Ok(v),
                Err(err) if err.is_transient() && attempt < self.retries => {
                    attempt += 1;
                    warn!(attempt, error = %err, "{what} failed; retrying");
                    tokio::time::sleep(self.backoff(attempt)).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
