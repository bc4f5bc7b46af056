//! Invocation counters fed by the telemetry bus.
//!
//! [`InvocationCounters`] is an ordinary bus subscriber: attaching it costs
//! nothing on the invocation path beyond the handler call, and detaching it
//! leaves the core's behaviour unchanged. All counters are relaxed atomics;
//! readers take a [`CounterSnapshot`] for export.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::telemetry::{EventKind, Subscription, TelemetryBus, TelemetryEvent};
use crate::types::ErrorCode;

/// Lock-free counters for invocation outcomes.
pub struct InvocationCounters {
    /// Completed text completions (success or failure).
    pub completions: AtomicU64,
    /// Completions that succeeded.
    pub completions_ok: AtomicU64,
    /// Attempts beyond the first, summed over all completions.
    pub retries: AtomicU64,
    /// Completed structured requests.
    pub structured: AtomicU64,
    /// Structured requests that needed the strict-JSON retry to succeed.
    pub structured_fallbacks: AtomicU64,
    /// Total wall-clock milliseconds spent in completions.
    pub completion_ms_total: AtomicU64,
    failures_by_code: [AtomicU64; ErrorCode::ALL.len()],
}

impl InvocationCounters {
    /// Create a new set of zeroed counters.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            completions: AtomicU64::new(0),
            completions_ok: AtomicU64::new(0),
            retries: AtomicU64::new(0),
            structured: AtomicU64::new(0),
            structured_fallbacks: AtomicU64::new(0),
            completion_ms_total: AtomicU64::new(0),
            failures_by_code: [const { AtomicU64::new(0) }; ErrorCode::ALL.len()],
        }
    }

    /// Subscribe these counters to `bus`.
    pub fn attach(self: &Arc<Self>, bus: &TelemetryBus) -> Subscription {
        let counters = Arc::clone(self);
        bus.subscribe(move |event| counters.record(event))
    }

    /// Fold one event into the counters.
    pub fn record(&self, event: &TelemetryEvent) {
        match event.kind {
            EventKind::Completion => {
                self.completions.fetch_add(1, Ordering::Relaxed);
                self.completion_ms_total
                    .fetch_add(event.duration_ms, Ordering::Relaxed);
                self.retries.fetch_add(
                    u64::from(event.attempts.saturating_sub(1)),
                    Ordering::Relaxed,
                );
                if event.ok {
                    self.completions_ok.fetch_add(1, Ordering::Relaxed);
                }
            }
            EventKind::Structured => {
                self.structured.fetch_add(1, Ordering::Relaxed);
                if event.ok && event.used_fallback {
                    self.structured_fallbacks.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        if let Some(code) = event.error_code {
            self.failures_by_code[code.index()].fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Failures recorded for `code`.
    #[must_use]
    pub fn failures(&self, code: ErrorCode) -> u64 {
        self.failures_by_code[code.index()].load(Ordering::Relaxed)
    }

    /// Snapshot all counters for export.
    #[must_use]
    pub fn snapshot(&self) -> CounterSnapshot {
        let mut failures = [0u64; ErrorCode::ALL.len()];
        for (slot, counter) in failures.iter_mut().zip(&self.failures_by_code) {
            *slot = counter.load(Ordering::Relaxed);
        }
        CounterSnapshot {
            completions: self.completions.load(Ordering::Relaxed),
            completions_ok: self.completions_ok.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            structured: self.structured.load(Ordering::Relaxed),
            structured_fallbacks: self.structured_fallbacks.load(Ordering::Relaxed),
            completion_ms_total: self.completion_ms_total.load(Ordering::Relaxed),
            failures_by_code: failures,
        }
    }
}

impl Default for InvocationCounters {
    fn default() -> Self {
        Self::new()
    }
}

/// A snapshot of counter values at a point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterSnapshot {
    /// Completed text completions.
    pub completions: u64,
    /// Successful completions.
    pub completions_ok: u64,
    /// Retries across all completions.
    pub retries: u64,
    /// Completed structured requests.
    pub structured: u64,
    /// Structured requests rescued by the strict-JSON retry.
    pub structured_fallbacks: u64,
    /// Milliseconds spent in completions.
    pub completion_ms_total: u64,
    /// Failures indexed by [`ErrorCode::index`].
    pub failures_by_code: [u64; ErrorCode::ALL.len()],
}

impl CounterSnapshot {
    /// Mean completion latency in milliseconds, or 0 with no completions.
    #[must_use]
    pub fn mean_completion_ms(&self) -> u64 {
        self.completion_ms_total
            .checked_div(self.completions)
            .unwrap_or(0)
    }

    /// Format as Prometheus-compatible text.
    #[must_use]
    pub fn to_prometheus(&self) -> String {
        let mut out = format!(
            "# HELP promptly_completions_total Resilient completions finished\n\
             # TYPE promptly_completions_total counter\n\
             promptly_completions_total {}\n\
             # HELP promptly_completions_ok_total Completions that returned content\n\
             # TYPE promptly_completions_ok_total counter\n\
             promptly_completions_ok_total {}\n\
             # HELP promptly_retries_total Attempts beyond the first\n\
             # TYPE promptly_retries_total counter\n\
             promptly_retries_total {}\n\
             # HELP promptly_structured_total Structured-output requests finished\n\
             # TYPE promptly_structured_total counter\n\
             promptly_structured_total {}\n\
             # HELP promptly_structured_fallbacks_total Structured requests rescued by the strict retry\n\
             # TYPE promptly_structured_fallbacks_total counter\n\
             promptly_structured_fallbacks_total {}\n\
             # HELP promptly_completion_ms_total Milliseconds spent in completions\n\
             # TYPE promptly_completion_ms_total counter\n\
             promptly_completion_ms_total {}\n\
             # HELP promptly_failures_total Terminal failures by taxonomy code\n\
             # TYPE promptly_failures_total counter\n",
            self.completions,
            self.completions_ok,
            self.retries,
            self.structured,
            self.structured_fallbacks,
            self.completion_ms_total,
        );
        for code in ErrorCode::ALL {
            out.push_str(&format!(
                "promptly_failures_total{{code=\"{}\"}} {}\n",
                code.as_str(),
                self.failures_by_code[code.index()]
            ));
        }
        out
    }
}
