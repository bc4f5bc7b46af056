//! Cancellation composer.
//!
//! An [`EffectiveToken`] fires when either the caller's token is cancelled or
//! the per-call timeout elapses. The deadline is a plain instant: no timer
//! exists until something awaits [`EffectiveToken::cancelled`], and that timer
//! is dropped together with the awaiting future.

use std::fmt;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Why an effective token fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// The caller (or a holder of the effective token) cancelled.
    Cancelled,
    /// The timeout elapsed.
    TimedOut,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cancelled => f.write_str("cancelled"),
            Self::TimedOut => f.write_str("timed out"),
        }
    }
}

/// Caller cancellation merged with a deadline.
#[derive(Debug, Clone)]
pub struct EffectiveToken {
    token: CancellationToken,
    deadline: Instant,
    timeout: Duration,
}

/// Roughly thirty years; stands in for "no deadline" without overflowing.
const FAR_FUTURE: Duration = Duration::from_secs(30 * 365 * 24 * 60 * 60);

/// Combine a timeout with an optional caller token.
///
/// Cancelling the effective token never cancels the caller's token.
#[must_use]
pub fn compose(timeout: Duration, caller: Option<&CancellationToken>) -> EffectiveToken {
    let token = caller.map_or_else(CancellationToken::new, CancellationToken::child_token);
    let now = Instant::now();
    let deadline = now
        .checked_add(timeout)
        .unwrap_or_else(|| now + FAR_FUTURE);
    EffectiveToken {
        token,
        deadline,
        timeout,
    }
}

impl EffectiveToken {
    /// A token with no caller and no practical deadline.
    #[must_use]
    pub fn never() -> Self {
        compose(FAR_FUTURE, None)
    }

    /// Why the token has fired, or `None` while it is live.
    #[must_use]
    pub fn cancel_reason(&self) -> Option<CancelReason> {
        if self.token.is_cancelled() {
            Some(CancelReason::Cancelled)
        } else if Instant::now() >= self.deadline {
            Some(CancelReason::TimedOut)
        } else {
            None
        }
    }

    /// Whether the token has fired.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_reason().is_some()
    }

    /// Cancel this token (and any clones), leaving the caller's token alone.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Resolve once the token fires.
    pub async fn cancelled(&self) -> CancelReason {
        if let Some(reason) = self.cancel_reason() {
            return reason;
        }
        tokio::select! {
            biased;
            () = self.token.cancelled() => CancelReason::Cancelled,
            () = tokio::time::sleep_until(self.deadline) => CancelReason::TimedOut,
        }
    }

    /// The timeout this token was composed with.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Time left before the deadline.
    #[must_use]
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }
}
