// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Bounded retry for transport connection establishment.
//
// Only connection-establishment failures (no device yet, unauthorized,
// offline) are retried. Application-level failures (validation
// rejections, parse errors) are classified Permanent and surface
// immediately.

use std::time::Duration;

use integritykit_core::error::{IntegrityError, Result};
use integritykit_core::types::ErrorClass;
use tracing::{debug, warn};

/// Retry configuration.
pub struct RetryConfig {
    /// Maximum number of retry attempts after the first try.
    pub max_retries: u32,
    /// Base delay between retries (exponential backoff).
    pub base_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
        }
    }
}

/// Classify an error for the establishment loop.
pub fn classify(err: &IntegrityError) -> ErrorClass {
    match err {
        IntegrityError::Transport(detail) => {
            let lower = detail.to_ascii_lowercase();
            if lower.contains("unauthorized")
                || lower.contains("offline")
                || lower.contains("no devices")
                || lower.contains("connection refused")
                || lower.contains("connection reset")
            {
                ErrorClass::Transient
            } else {
                ErrorClass::Permanent
            }
        }
        _ => ErrorClass::Permanent,
    }
}

/// Run `op` until it succeeds, a permanent error occurs, or the retry
/// budget is exhausted. Sleeps between attempts.
pub fn establish<T>(config: &RetryConfig, mut op: impl FnMut() -> Result<T>) -> Result<T> {
    let mut attempt = 0u32;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(err) => {
                if classify(&err) == ErrorClass::Permanent {
                    return Err(err);
                }
                if attempt >= config.max_retries {
                    warn!(attempt, max = config.max_retries, "retry limit exhausted");
                    return Err(err);
                }
                let delay = compute_delay(attempt, config);
                debug!(attempt, delay_ms = delay.as_millis(), error = %err, "retrying");
                std::thread::sleep(delay);
                attempt += 1;
            }
        }
    }
}

/// Compute exponential backoff delay with jitter.
///
/// delay = min(base * 2^attempt + jitter, max_delay)
fn compute_delay(attempt: u32, config: &RetryConfig) -> Duration {
    let base_ms = config.base_delay.as_millis() as u64;
    let exp_ms = base_ms.saturating_mul(1u64 << attempt.min(10));
    let total_ms = exp_ms.saturating_add(jitter(base_ms, attempt));
    Duration::from_millis(total_ms.min(config.max_delay.as_millis() as u64))
}

/// Deterministic jitter from a hash of the attempt number, spread across
/// [0, base).
fn jitter(base_ms: u64, attempt: u32) -> u64 {
    let hash = (attempt as u64).wrapping_mul(6364136223846793005);
    hash % base_ms.max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_config() -> RetryConfig {
        RetryConfig {
            max_retries: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        }
    }

    #[test]
    fn unauthorized_is_transient() {
        let err = IntegrityError::Transport("device is unauthorized".into());
        assert_eq!(classify(&err), ErrorClass::Transient);
    }

    #[test]
    fn parse_error_is_permanent() {
        let err = IntegrityError::ParseError("bad element".into());
        assert_eq!(classify(&err), ErrorClass::Permanent);
    }

    #[test]
    fn transient_failures_retry_until_success() {
        let mut calls = 0;
        let result = establish(&fast_config(), || {
            calls += 1;
            if calls < 3 {
                Err(IntegrityError::Transport("no devices found".into()))
            } else {
                Ok(calls)
            }
        });
        assert_eq!(result.unwrap(), 3);
    }

    #[test]
    fn permanent_failure_does_not_retry() {
        let mut calls = 0;
        let result: Result<()> = establish(&fast_config(), || {
            calls += 1;
            Err(IntegrityError::ParseError("broken".into()))
        });
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }

    #[test]
    fn retry_budget_is_bounded() {
        let mut calls = 0;
        let result: Result<()> = establish(&fast_config(), || {
            calls += 1;
            Err(IntegrityError::Transport("no devices found".into()))
        });
        assert!(result.is_err());
        // One initial try plus max_retries.
        assert_eq!(calls, 4);
    }

    #[test]
    fn delay_capped_at_max() {
        let config = fast_config();
        assert!(compute_delay(20, &config) <= Duration::from_millis(5));
    }
}
