//! Retry policy with exponential backoff and jitter.
//!
//! All batch provider calls go through [`with_retry`]. The transient vs
//! permanent decision is centralized here: the rest of the system depends
//! only on the [`ErrorClass`] verdict, never on vendor error codes.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

/// Provider error codes treated as retryable.
const TRANSIENT_CODES: &[&str] = &[
    "DEADLINE_EXCEEDED",
    "RESOURCE_EXHAUSTED",
    "UNAVAILABLE",
    "INTERNAL",
    "SERVICE_UNAVAILABLE",
];

/// HTTP-style statuses treated as retryable.
const TRANSIENT_STATUSES: &[u16] = &[408, 429, 500, 502, 503, 504];

/// Message fragments (matched case-insensitively) treated as retryable.
const TRANSIENT_FRAGMENTS: &[&str] = &[
    "timeout",
    "deadline",
    "unavailable",
    "resource exhausted",
    "rate limit",
    "too many requests",
];

/// Socket-level errors treated as retryable.
const TRANSIENT_ERRNOS: &[&str] = &["ECONNREFUSED", "ECONNRESET", "ETIMEDOUT"];

/// Verdict of the failure classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Worth retrying: quota, timeout, 5xx, network reset.
    Transient,
    /// Retrying cannot help: auth, invalid argument, permanent 4xx.
    Permanent,
}

/// Structured view of a provider failure, fed to the classifier.
///
/// Errors carry whichever facets the provider exposed; absent facets simply
/// don't match. A failure is transient if any facet matches a transient
/// table.
pub trait RetryableError {
    /// Provider error code name, e.g. `"RESOURCE_EXHAUSTED"`.
    fn error_code(&self) -> Option<&str> {
        None
    }
    /// HTTP-style status, e.g. `503`.
    fn http_status(&self) -> Option<u16> {
        None
    }
    /// Human-readable message.
    fn message(&self) -> String;
}

/// Classifies a failure as transient or permanent.
pub fn classify<E: RetryableError>(error: &E) -> ErrorClass {
    if let Some(code) = error.error_code() {
        if TRANSIENT_CODES.contains(&code.to_uppercase().as_str()) {
            return ErrorClass::Transient;
        }
    }

    if let Some(status) = error.http_status() {
        if TRANSIENT_STATUSES.contains(&status) {
            return ErrorClass::Transient;
        }
    }

    let message = error.message().to_lowercase();
    if TRANSIENT_FRAGMENTS.iter().any(|f| message.contains(f)) {
        return ErrorClass::Transient;
    }
    if TRANSIENT_ERRNOS
        .iter()
        .any(|e| message.contains(&e.to_lowercase()))
    {
        return ErrorClass::Transient;
    }

    ErrorClass::Permanent
}

/// Backoff parameters. Delay before attempt `k` (0-indexed) is
/// `min(initial × multiplier^k, max) + uniform(0, jitter_factor × that)`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub initial: Duration,
    pub multiplier: f64,
    pub max: Duration,
    pub jitter_factor: f64,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            multiplier: 2.0,
            max: Duration::from_secs(30),
            jitter_factor: 0.1,
            max_attempts: 4,
        }
    }
}

impl RetryPolicy {
    /// Deterministic part of the delay before attempt `k`.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exp = self.initial.as_secs_f64() * self.multiplier.powi(attempt as i32);
        Duration::from_secs_f64(exp.min(self.max.as_secs_f64()))
    }

    /// Base delay plus uniform jitter in `[0, jitter_factor × base)`.
    fn delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        let jitter_cap = base.as_secs_f64() * self.jitter_factor;
        let jitter = if jitter_cap > 0.0 {
            rand::thread_rng().gen_range(0.0..jitter_cap)
        } else {
            0.0
        };
        base + Duration::from_secs_f64(jitter)
    }
}

/// Runs `operation` up to `policy.max_attempts` times, sleeping between
/// attempts. Permanent failures surface immediately.
pub async fn with_retry<T, E, F, Fut>(
    op_name: &str,
    policy: &RetryPolicy,
    mut operation: F,
) -> Result<T, E>
where
    E: RetryableError + std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0u32;
    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    debug!(op = op_name, attempt, "operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(error) => {
                let class = classify(&error);
                attempt += 1;

                if class == ErrorClass::Permanent {
                    warn!(
                        op = op_name,
                        attempt,
                        error = %error,
                        "permanent failure, not retrying"
                    );
                    return Err(error);
                }

                if attempt >= policy.max_attempts {
                    warn!(
                        op = op_name,
                        attempt,
                        error = %error,
                        "transient failure, attempts exhausted"
                    );
                    return Err(error);
                }

                let delay = policy.delay(attempt - 1);
                warn!(
                    op = op_name,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "transient failure, backing off"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
