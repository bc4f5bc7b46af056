//! Telemetry bus: passive observation of invocation outcomes.
//!
//! The retry engine and structured-output recovery publish one
//! [`TelemetryEvent`] per completed invocation. Subscribers receive every
//! event synchronously on the publishing task and must stay cheap.
//!
//! With no subscribers, [`TelemetryBus::publish_with`] is a single atomic load:
//! the event is never even built. A subscriber that panics is isolated at the
//! bus boundary and never unwinds into the publisher.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::types::{ErrorCode, Provider};

/// Which stage produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A resilient text completion (one retry-engine run).
    Completion,
    /// A structured-output request (one or two completions plus parsing).
    Structured,
}

/// Outcome of one completed invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryEvent {
    /// Correlates the event with log lines of the same invocation.
    pub invocation_id: Uuid,
    /// Stage that emitted the event. A structured request publishes one
    /// `Structured` event on top of the `Completion` event of each call it
    /// makes, so subscribers counting invocations must filter on `kind`.
    pub kind: EventKind,
    /// Provider the request went to.
    pub provider: Provider,
    /// Model name.
    pub model: String,
    /// Attempts consumed (retry attempts for completions, parse attempts for
    /// structured requests).
    pub attempts: u32,
    /// Wall-clock duration of the whole invocation.
    pub duration_ms: u64,
    /// Whether the invocation produced a result.
    pub ok: bool,
    /// Taxonomy code of the terminal failure.
    pub error_code: Option<ErrorCode>,
    /// HTTP-like status captured at classification time.
    pub status: Option<u16>,
    /// Structured requests only: the strict-JSON retry produced the value.
    #[serde(default)]
    pub used_fallback: bool,
    /// When the invocation finished.
    pub at: DateTime<Utc>,
}

impl TelemetryEvent {
    /// Event for a successful invocation.
    #[must_use]
    pub fn success(
        invocation_id: Uuid,
        kind: EventKind,
        provider: Provider,
        model: impl Into<String>,
        attempts: u32,
        duration_ms: u64,
    ) -> Self {
        Self {
            invocation_id,
            kind,
            provider,
            model: model.into(),
            attempts,
            duration_ms,
            ok: true,
            error_code: None,
            status: None,
            used_fallback: false,
            at: Utc::now(),
        }
    }

    /// Event for a terminal failure.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn failure(
        invocation_id: Uuid,
        kind: EventKind,
        provider: Provider,
        model: impl Into<String>,
        attempts: u32,
        duration_ms: u64,
        error_code: ErrorCode,
        status: Option<u16>,
    ) -> Self {
        Self {
            invocation_id,
            kind,
            provider,
            model: model.into(),
            attempts,
            duration_ms,
            ok: false,
            error_code: Some(error_code),
            status,
            used_fallback: false,
            at: Utc::now(),
        }
    }

    /// Mark the event as produced by the strict-JSON retry.
    #[must_use]
    pub fn with_fallback(mut self, used_fallback: bool) -> Self {
        self.used_fallback = used_fallback;
        self
    }
}

type Handler = Arc<dyn Fn(&TelemetryEvent) + Send + Sync>;

struct BusInner {
    handlers: RwLock<Vec<(u64, Handler)>>,
    subscriber_count: AtomicUsize,
    next_id: AtomicU64,
    panics: AtomicU64,
}

/// Publish/subscribe channel for [`TelemetryEvent`]s.
///
/// Cloning yields another handle to the same bus.
#[derive(Clone)]
pub struct TelemetryBus {
    inner: Arc<BusInner>,
}

impl TelemetryBus {
    /// Create an independent bus with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                handlers: RwLock::new(Vec::new()),
                subscriber_count: AtomicUsize::new(0),
                next_id: AtomicU64::new(0),
                panics: AtomicU64::new(0),
            }),
        }
    }

    /// Whether anyone is listening.
    #[must_use]
    pub fn has_subscribers(&self) -> bool {
        self.inner.subscriber_count.load(Ordering::Acquire) > 0
    }

    /// Number of active subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscriber_count.load(Ordering::Acquire)
    }

    /// Subscriber panics swallowed so far.
    #[must_use]
    pub fn swallowed_panics(&self) -> u64 {
        self.inner.panics.load(Ordering::Relaxed)
    }

    /// Register a handler. It stays registered until
    /// [`Subscription::unsubscribe`] is called.
    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&TelemetryEvent) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let mut handlers = self.inner.handlers.write();
        handlers.push((id, Arc::new(handler)));
        self.inner
            .subscriber_count
            .store(handlers.len(), Ordering::Release);
        Subscription {
            bus: Arc::downgrade(&self.inner),
            id,
        }
    }

    /// Build and deliver an event only if someone is subscribed.
    pub fn publish_with<F>(&self, build: F)
    where
        F: FnOnce() -> TelemetryEvent,
    {
        if !self.has_subscribers() {
            return;
        }
        self.deliver(&build());
    }

    /// Deliver an already-built event.
    pub fn publish(&self, event: &TelemetryEvent) {
        if !self.has_subscribers() {
            return;
        }
        self.deliver(event);
    }

    fn deliver(&self, event: &TelemetryEvent) {
        // Snapshot so handlers may subscribe/unsubscribe without deadlocking.
        let handlers: Vec<Handler> = self
            .inner
            .handlers
            .read()
            .iter()
            .map(|(_, h)| Arc::clone(h))
            .collect();

        for handler in handlers {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| handler(event)));
            if outcome.is_err() {
                self.inner.panics.fetch_add(1, Ordering::Relaxed);
                warn!(
                    invocation_id = %event.invocation_id,
                    "telemetry subscriber panicked; event dropped for that subscriber"
                );
            }
        }
    }
}

impl Default for TelemetryBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle returned by [`TelemetryBus::subscribe`].
#[must_use = "dropping a Subscription keeps the handler registered; call unsubscribe() to remove it"]
pub struct Subscription {
    bus: Weak<BusInner>,
    id: u64,
}

impl Subscription {
    /// Remove the handler. A no-op if the bus is already gone.
    pub fn unsubscribe(self) {
        let Some(inner) = self.bus.upgrade() else {
            return;
        };
        let mut handlers = inner.handlers.write();
        handlers.retain(|(id, _)| *id != self.id);
        inner.subscriber_count.store(handlers.len(), Ordering::Release);
    }
}

static GLOBAL: OnceLock<TelemetryBus> = OnceLock::new();

/// The process-wide telemetry bus.
pub fn global() -> &'static TelemetryBus {
    GLOBAL.get_or_init(TelemetryBus::new)
}
