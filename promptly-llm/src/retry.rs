//! Retry engine: exponential backoff with jitter, a total-time budget and
//! cooperative cancellation.
//!
//! Each attempt produces exactly one [`AttemptOutcome`]; the loop in
//! [`RetryEngine::execute`] only acts on it. The decision itself is the pure
//! function [`decide`], so the policy can be tested without any I/O.
//!
//! Per attempt `i` (0-based, up to `max_retries` inclusive):
//!
//! ```text
//! budget spent?  -> BudgetExceeded        (checked before every attempt)
//! token fired?   -> Cancelled
//! call (raced against the token); blank text counts as a failure
//! classify -> non-retryable            -> that error
//!          -> retryable, last attempt  -> RetriesExhausted
//!          -> elapsed + delay > budget -> BudgetExceeded
//!          -> sleep(delay) raced against the token, next attempt
//! ```

use std::future::Future;
use std::time::Duration;

use promptly_core::config::RetrySettings;
use promptly_core::telemetry::{self, EventKind, TelemetryBus, TelemetryEvent};
use promptly_core::Provider;
use rand::Rng;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::cancel::EffectiveToken;
use crate::classify::classify;
use crate::error::{BackendError, ClassifiedError, LlmError};
use crate::types::Completion;

/// Result of one attempt, as seen by the retry loop.
#[derive(Debug)]
pub enum AttemptOutcome {
    /// Non-blank content; stop and return it.
    Success(String),
    /// Retryable failure with room left; sleep `delay` and go again.
    Retry {
        delay: Duration,
        error: ClassifiedError,
    },
    /// Terminal failure.
    Fail(LlmError),
}

/// Backoff before the retry that follows attempt `attempt` (0-based):
/// `min(base * 2^attempt + jitter, max_delay)` with
/// `jitter` drawn from `[0, 0.3 * base * 2^attempt)`.
pub fn backoff_delay<R: Rng + ?Sized>(attempt: u32, settings: &RetrySettings, rng: &mut R) -> Duration {
    let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
    let exponential = settings.base_delay_ms.saturating_mul(factor);
    let jitter_bound = exponential.saturating_mul(3) / 10;
    let jitter = if jitter_bound == 0 {
        0
    } else {
        rng.gen_range(0..jitter_bound)
    };
    Duration::from_millis(exponential.saturating_add(jitter).min(settings.max_delay_ms))
}

/// Decide what follows attempt `attempt` given its result and the time spent
/// so far.
pub fn decide<R: Rng + ?Sized>(
    attempt: u32,
    result: Result<String, ClassifiedError>,
    elapsed: Duration,
    settings: &RetrySettings,
    rng: &mut R,
) -> AttemptOutcome {
    let error = match result {
        Ok(content) => return AttemptOutcome::Success(content),
        Err(error) => error,
    };
    let attempts = attempt + 1;

    if !error.retryable {
        return AttemptOutcome::Fail(LlmError::Classified(error));
    }
    if attempt >= settings.max_retries {
        return AttemptOutcome::Fail(LlmError::RetriesExhausted {
            attempts,
            last: error,
        });
    }

    let delay = backoff_delay(attempt, settings, rng);
    if elapsed.saturating_add(delay) > settings.total_timeout() {
        return AttemptOutcome::Fail(LlmError::BudgetExceeded {
            budget_ms: settings.total_timeout_ms,
            elapsed_ms: millis(elapsed),
            attempts,
            last: Some(error),
        });
    }

    AttemptOutcome::Retry { delay, error }
}

/// Drives a backend operation to completion under a [`RetrySettings`] policy.
///
/// Cloning is cheap; clones publish to the same telemetry bus.
#[derive(Clone)]
pub struct RetryEngine {
    bus: TelemetryBus,
}

impl RetryEngine {
    /// Engine publishing to `bus`.
    #[must_use]
    pub fn new(bus: TelemetryBus) -> Self {
        Self { bus }
    }

    /// Engine publishing to the process-wide bus.
    #[must_use]
    pub fn global() -> Self {
        Self::new(telemetry::global().clone())
    }

    /// The bus this engine reports to.
    #[must_use]
    pub fn bus(&self) -> &TelemetryBus {
        &self.bus
    }

    /// Run `operation` until it yields non-blank text, a terminal error
    /// occurs, the budget is spent, or `token` fires. Attempts are strictly
    /// sequential. Exactly one telemetry event is published per call.
    ///
    /// # Errors
    /// - [`LlmError::Classified`] for a non-retryable failure,
    /// - [`LlmError::RetriesExhausted`] when every attempt failed retryably,
    /// - [`LlmError::BudgetExceeded`] when `total_timeout_ms` would be passed,
    /// - [`LlmError::Cancelled`] when the token fires during a call or sleep.
    pub async fn execute<F, Fut>(
        &self,
        mut operation: F,
        provider: Provider,
        model: &str,
        token: &EffectiveToken,
        settings: &RetrySettings,
    ) -> Result<Completion, LlmError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<String, BackendError>>,
    {
        let invocation_id = Uuid::new_v4();
        let start = Instant::now();

        let (result, attempts) = self
            .run(&mut operation, provider, token, settings, start, invocation_id)
            .await;

        let duration_ms = millis(start.elapsed());
        match &result {
            Ok(_) => {
                debug!(%invocation_id, %provider, model, attempts, duration_ms, "LLM call succeeded");
                self.bus.publish_with(|| {
                    TelemetryEvent::success(
                        invocation_id,
                        EventKind::Completion,
                        provider,
                        model,
                        attempts,
                        duration_ms,
                    )
                });
            }
            Err(err) => {
                warn!(%invocation_id, %provider, model, attempts, duration_ms, code = %err.code(), "LLM call failed: {}", err);
                self.bus.publish_with(|| {
                    TelemetryEvent::failure(
                        invocation_id,
                        EventKind::Completion,
                        provider,
                        model,
                        attempts,
                        duration_ms,
                        err.code(),
                        err.status(),
                    )
                });
            }
        }

        result.map(|content| Completion { content, attempts })
    }

    async fn run<F, Fut>(
        &self,
        operation: &mut F,
        provider: Provider,
        token: &EffectiveToken,
        settings: &RetrySettings,
        start: Instant,
        invocation_id: Uuid,
    ) -> (Result<String, LlmError>, u32)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<String, BackendError>>,
    {
        let mut last: Option<ClassifiedError> = None;

        for attempt in 0..=settings.max_retries {
            let elapsed = start.elapsed();
            if elapsed > settings.total_timeout() {
                let err = LlmError::BudgetExceeded {
                    budget_ms: settings.total_timeout_ms,
                    elapsed_ms: millis(elapsed),
                    attempts: attempt,
                    last,
                };
                return (Err(err), attempt);
            }
            if let Some(reason) = token.cancel_reason() {
                let err = LlmError::Cancelled {
                    reason,
                    attempts: attempt,
                    last,
                };
                return (Err(err), attempt);
            }

            if attempt > 0 {
                debug!(%invocation_id, "Retrying LLM call (attempt {}/{})", attempt + 1, settings.max_attempts());
            }

            let raw = tokio::select! {
                biased;
                reason = token.cancelled() => {
                    let err = LlmError::Cancelled { reason, attempts: attempt + 1, last };
                    return (Err(err), attempt + 1);
                }
                result = operation() => result,
            };

            let result = match raw {
                Ok(text) if !text.trim().is_empty() => Ok(text),
                Ok(_) => Err(classify(BackendError::EmptyResponse, provider)),
                Err(raw) => {
                    debug!(%invocation_id, %provider, "raw backend failure: {}", raw);
                    Err(classify(raw, provider))
                }
            };
            if let Err(err) = &result {
                warn!(
                    %invocation_id,
                    %provider,
                    attempt = attempt + 1,
                    code = %err.code,
                    retryable = err.retryable,
                    "LLM attempt failed: {}",
                    err
                );
            }

            let outcome = decide(attempt, result, start.elapsed(), settings, &mut rand::thread_rng());
            match outcome {
                AttemptOutcome::Success(content) => return (Ok(content), attempt + 1),
                AttemptOutcome::Fail(err) => return (Err(err), attempt + 1),
                AttemptOutcome::Retry { delay, error } => {
                    debug!(%invocation_id, delay_ms = millis(delay), "backing off before next attempt");
                    last = Some(error);
                    tokio::select! {
                        biased;
                        reason = token.cancelled() => {
                            let err = LlmError::Cancelled { reason, attempts: attempt + 1, last };
                            return (Err(err), attempt + 1);
                        }
                        () = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        // `decide` fails the final attempt, so the loop only ends early.
        let attempts = settings.max_attempts();
        let err = match last {
            Some(last) => LlmError::RetriesExhausted { attempts, last },
            None => LlmError::Config("retry loop ended without an attempt".into()),
        };
        (Err(err), attempts)
    }
}

impl Default for RetryEngine {
    fn default() -> Self {
        Self::new(TelemetryBus::new())
    }
}

#[allow(clippy::cast_possible_truncation)]
fn millis(d: Duration) -> u64 {
    d.as_millis().min(u128::from(u64::MAX)) as u64
}
