//! Bounded retry with exponential backoff for transient I/O failures.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for retry behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts, including the first. `1` disables retrying.
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 50,
            max_delay_ms: 2000,
        }
    }
}

impl RetryConfig {
    /// A policy that never retries.
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }
}

/// Run `operation`, retrying while it fails with a transient error.
///
/// The delay doubles after every failed attempt, capped at `max_delay_ms`.
///
/// # Errors
///
/// Returns the last error when it is permanent (see
/// [`Error::is_transient`](crate::error::Error::is_transient)) or when the attempts
/// are exhausted.
pub fn retry_with_backoff<F, T>(config: &RetryConfig, mut operation: F) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    let mut attempt = 0;
    let mut delay_ms = config.initial_delay_ms;

    loop {
        attempt += 1;
        match operation() {
            Ok(v) => return Ok(v),
            Err(err) => {
                if !err.is_transient() || attempt >= config.max_attempts.max(1) {
                    return Err(err);
                }
                tracing::warn!(attempt, delay_ms, error = %err, "transient failure, retrying");
                std::thread::sleep(Duration::from_millis(delay_ms));
                delay_ms = delay_ms.saturating_mul(2).min(config.max_delay_ms);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::io;

    fn fast(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            initial_delay_ms: 1,
            max_delay_ms: 2,
        }
    }

    #[test]
    fn retries_transient_until_success() {
        let mut calls = 0;
        let out = retry_with_backoff(&fast(5), || {
            calls += 1;
            if calls < 3 {
                Err(Error::io("open", "f", io::Error::from(io::ErrorKind::Interrupted)))
            } else {
                Ok(calls)
            }
        })
        .unwrap();
        assert_eq!(out, 3);
    }

    #[test]
    fn permanent_error_is_not_retried() {
        let mut calls = 0;
        let res: Result<()> = retry_with_backoff(&fast(5), || {
            calls += 1;
            Err(Error::io("open", "f", io::Error::from(io::ErrorKind::PermissionDenied)))
        });
        assert!(res.is_err());
        assert_eq!(calls, 1);
    }

    #[test]
    fn attempts_are_bounded() {
        let mut calls = 0;
        let res: Result<()> = retry_with_backoff(&fast(3), || {
            calls += 1;
            Err(Error::io("open", "f", io::Error::from(io::ErrorKind::TimedOut)))
        });
        assert!(res.is_err());
        assert_eq!(calls, 3);
    }
}
