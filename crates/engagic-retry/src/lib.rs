// SPDX-License-Identifier: MIT OR Apache-2.0
//! Backoff and retry policies shared across the pipeline.
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! Three call sites need retry-with-backoff and each has its own schedule:
//! adapter HTTP fetches, LLM batch-quota polling, and the scheduler's
//! per-city sync retry. [`RetryConfig`] carries an explicit delay schedule
//! rather than a single exponential formula so all three can share
//! [`retry_async`].

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Configuration for a retry-with-backoff loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts after the initial one. `0` means
    /// only the initial attempt.
    pub max_retries: u32,
    /// Delay to apply after each failed attempt, indexed by attempt number.
    /// If `max_retries` exceeds the schedule length, the last entry repeats.
    #[serde(with = "duration_millis_vec")]
    pub schedule: Vec<Duration>,
    /// Overall wall-clock timeout across all attempts.
    #[serde(with = "duration_millis")]
    pub overall_timeout: Duration,
    /// Absolute jitter window applied as a uniform `±jitter_abs` offset.
    /// `None` disables jitter.
    #[serde(with = "duration_millis_opt")]
    pub jitter_abs: Option<Duration>,
}

impl RetryConfig {
    /// Adapter HTTP fetch retry: 3 attempts at 1s, 2s, 4s, no jitter.
    pub fn adapter_fetch() -> Self {
        Self {
            max_retries: 3,
            schedule: vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4),
            ],
            overall_timeout: Duration::from_secs(30),
            jitter_abs: None,
        }
    }

    /// LLM batch-quota backoff: 60s, 120s, 240s, no jitter.
    pub fn llm_quota_backoff() -> Self {
        Self {
            max_retries: 3,
            schedule: vec![
                Duration::from_secs(60),
                Duration::from_secs(120),
                Duration::from_secs(240),
            ],
            overall_timeout: Duration::from_secs(450),
            jitter_abs: None,
        }
    }

    /// Scheduler per-city sync retry: 5s and 20s, each ± 2s jitter.
    pub fn scheduler_city_retry() -> Self {
        Self {
            max_retries: 2,
            schedule: vec![Duration::from_secs(5), Duration::from_secs(20)],
            overall_timeout: Duration::from_secs(60),
            jitter_abs: Some(Duration::from_secs(2)),
        }
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        let idx = (attempt as usize).min(self.schedule.len().saturating_sub(1));
        self.schedule.get(idx).copied().unwrap_or(Duration::ZERO)
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(val: &Duration, ser: S) -> Result<S::Ok, S::Error> {
        val.as_millis().serialize(ser)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Duration, D::Error> {
        let ms: u64 = u64::deserialize(de)?;
        Ok(Duration::from_millis(ms))
    }
}

mod duration_millis_vec {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(val: &[Duration], ser: S) -> Result<S::Ok, S::Error> {
        let ms: Vec<u128> = val.iter().map(|d| d.as_millis()).collect();
        ms.serialize(ser)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<Duration>, D::Error> {
        let ms: Vec<u64> = Vec::deserialize(de)?;
        Ok(ms.into_iter().map(Duration::from_millis).collect())
    }
}

mod duration_millis_opt {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(val: &Option<Duration>, ser: S) -> Result<S::Ok, S::Error> {
        val.map(|d| d.as_millis()).serialize(ser)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Option<Duration>, D::Error> {
        let ms: Option<u64> = Option::deserialize(de)?;
        Ok(ms.map(Duration::from_millis))
    }
}

/// Compute the backoff delay for a given zero-indexed attempt, with jitter.
pub fn compute_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let base = config.delay_for(attempt);
    match config.jitter_abs {
        Some(window) if window > Duration::ZERO => {
            let offset_ms = rand::thread_rng().gen_range(0..=window.as_millis() as i64 * 2) - window.as_millis() as i64;
            let base_ms = base.as_millis() as i64;
            let jittered_ms = (base_ms + offset_ms).max(0) as u64;
            Duration::from_millis(jittered_ms)
        }
        _ => base,
    }
}

// ---------------------------------------------------------------------------
// Metadata
// ---------------------------------------------------------------------------

/// Record of a single failed attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryAttempt {
    /// Zero-indexed attempt number.
    pub attempt: u32,
    /// Error message from this attempt.
    pub error: String,
    /// Backoff delay applied before the next attempt.
    #[serde(with = "duration_millis")]
    pub delay: Duration,
}

/// Metadata captured across all retry attempts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetryMetadata {
    /// Total number of attempts made (including the successful one).
    pub total_attempts: u32,
    /// Records of each *failed* attempt.
    pub failed_attempts: Vec<RetryAttempt>,
    /// Wall-clock time spanning all attempts.
    #[serde(with = "duration_millis")]
    pub total_duration: Duration,
}

/// Result of a retry-enabled operation.
#[derive(Debug)]
pub struct RetryOutcome<T> {
    /// The successfully produced value.
    pub value: T,
    /// Retry metadata (empty `failed_attempts` when the first attempt succeeds).
    pub metadata: RetryMetadata,
}

/// Error surfaced when a retry loop is abandoned before the operation succeeds.
#[derive(Debug)]
pub enum RetryError<E> {
    /// The operation's own error, surfaced because it was non-retryable or
    /// retries were exhausted.
    Operation(E),
    /// The overall wall-clock timeout elapsed.
    TimedOut {
        /// Configured timeout that was exceeded.
        duration: Duration,
    },
}

impl<E: std::fmt::Display> std::fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Operation(e) => write!(f, "{e}"),
            Self::TimedOut { duration } => write!(f, "retry loop timed out after {duration:?}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Core retry loop
// ---------------------------------------------------------------------------

/// Generic retry loop. Calls `op` up to `config.max_retries + 1` times with
/// the configured backoff schedule, returning the first successful result
/// along with metadata about failed attempts.
///
/// `retryable` decides whether a given error should trigger a retry; errors
/// it rejects are surfaced immediately as [`RetryError::Operation`].
pub async fn retry_async<T, E, F, Fut>(
    config: &RetryConfig,
    mut op: F,
    retryable: impl Fn(&E) -> bool,
) -> Result<RetryOutcome<T>, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let start = Instant::now();
    let max_attempts = config.max_retries + 1;
    let mut failed_attempts = Vec::new();

    for attempt in 0..max_attempts {
        if start.elapsed() >= config.overall_timeout {
            warn!(attempt, "retry overall timeout exceeded");
            return Err(RetryError::TimedOut {
                duration: config.overall_timeout,
            });
        }

        debug!(attempt, max_attempts, "attempting operation");

        match op().await {
            Ok(value) => {
                let total_duration = start.elapsed();
                debug!(attempt, total_duration_ms = total_duration.as_millis() as u64, "operation succeeded");
                return Ok(RetryOutcome {
                    value,
                    metadata: RetryMetadata {
                        total_attempts: attempt + 1,
                        failed_attempts,
                        total_duration,
                    },
                });
            }
            Err(err) => {
                let is_last = attempt + 1 >= max_attempts;

                if !retryable(&err) {
                    debug!(error = %err, "non-retryable error, giving up");
                    return Err(RetryError::Operation(err));
                }

                if is_last {
                    warn!(error = %err, attempt, "max retries exhausted");
                    return Err(RetryError::Operation(err));
                }

                let delay = compute_delay(config, attempt);
                warn!(error = %err, attempt, delay_ms = delay.as_millis() as u64, "retryable error, backing off");

                failed_attempts.push(RetryAttempt {
                    attempt,
                    error: err.to_string(),
                    delay,
                });

                let remaining = config.overall_timeout.saturating_sub(start.elapsed());
                if delay > remaining {
                    return Err(RetryError::TimedOut {
                        duration: config.overall_timeout,
                    });
                }

                tokio::time::sleep(delay).await;
            }
        }
    }

    Err(RetryError::TimedOut {
        duration: config.overall_timeout,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
