use std::io;
use std::thread;
use std::time::Duration;

use anyhow::Result;
use serde_json::json;
use sitesmith_contracts::events::EventWriter;

use crate::error::EngineError;
use crate::{error_chain_text, map_object};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: usize, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Delay before the retry that follows failed attempt `attempt` (1-based).
    /// Saturates at `Duration::MAX`.
    pub fn delay_after(&self, attempt: usize) -> Duration {
        let factor = u32::try_from(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(Duration::MAX)
    }
}

/// Runs `op` until it succeeds, fails with a non-timeout error, or
/// `max_attempts` is reached. `op` receives the 1-based attempt number.
/// Waits `attempt * base_delay` between attempts; the last error is returned
/// unchanged.
pub fn load_with_retry<T, F>(
    policy: &RetryPolicy,
    operation: &str,
    events: &EventWriter,
    mut op: F,
) -> Result<T>
where
    F: FnMut(usize) -> Result<T>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op(attempt) {
            Ok(value) => return Ok(value),
            Err(err) => {
                let retryable = is_retryable(&err);
                if !retryable || attempt >= max_attempts {
                    let _ = events.emit(
                        "load_failed",
                        map_object(json!({
                            "operation": operation,
                            "attempts": attempt,
                            "retryable": retryable,
                            "error": error_chain_text(&err, 512),
                        })),
                    );
                    return Err(err);
                }
                let delay = policy.delay_after(attempt);
                let _ = events.emit(
                    "load_retry",
                    map_object(json!({
                        "operation": operation,
                        "attempt": attempt,
                        "max_attempts": max_attempts,
                        "delay_s": delay.as_secs_f64(),
                        "error": error_chain_text(&err, 512),
                    })),
                );
                if !delay.is_zero() {
                    thread::sleep(delay);
                }
                attempt += 1;
            }
        }
    }
}

/// Timeout-class failures are the only retryable ones.
pub fn is_retryable(err: &anyhow::Error) -> bool {
    if matches!(
        err.downcast_ref::<EngineError>(),
        Some(EngineError::Timeout { .. })
    ) {
        return true;
    }
    err.chain().any(|cause| {
        if let Some(reqwest_err) = cause.downcast_ref::<reqwest::Error>() {
            if reqwest_err.is_timeout() {
                return true;
            }
        }
        if let Some(io_err) = cause.downcast_ref::<io::Error>() {
            if io_err.kind() == io::ErrorKind::TimedOut {
                return true;
            }
        }
        let text = cause.to_string().to_ascii_lowercase();
        text.contains("timeout") || text.contains("timed out")
    })
}
