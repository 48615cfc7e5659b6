// src/engine/scope.rs

//! Hierarchical deadline scopes.
//!
//! A scope is a cancellation token plus an absolute deadline. Children are
//! derived from a parent: cancelling the parent cancels every child, and a
//! child's deadline never outlives its parent's. A child ending on its own
//! deadline leaves the parent untouched.

use std::time::Duration;

use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;

/// Cap for deadlines that would overflow `Instant`, roughly 30 years out.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// `now + timeout`, capped at [`FAR_FUTURE`] when the sum overflows.
fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout).unwrap_or_else(|| now + FAR_FUTURE)
}

/// Why a scope ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeEnd {
    DeadlineExceeded,
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct DeadlineScope {
    token: CancellationToken,
    deadline: Instant,
}

impl DeadlineScope {
    /// Root scope for a run: child of `parent`, bounded by `timeout`.
    pub fn new(parent: &CancellationToken, timeout: Duration) -> Self {
        Self {
            token: parent.child_token(),
            deadline: deadline_after(timeout),
        }
    }

    /// Derive a child bounded by `timeout` and by this scope's deadline.
    pub fn child(&self, timeout: Duration) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline.min(deadline_after(timeout)),
        }
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Time left until the deadline (zero once it has passed).
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.deadline
    }

    /// `Some` once the scope has ended. An expired deadline wins over
    /// cancellation.
    pub fn end_reason(&self) -> Option<ScopeEnd> {
        if self.is_expired() {
            Some(ScopeEnd::DeadlineExceeded)
        } else if self.is_cancelled() {
            Some(ScopeEnd::Cancelled)
        } else {
            None
        }
    }

    /// Resolve when the scope is cancelled or its deadline passes.
    pub async fn done(&self) -> ScopeEnd {
        tokio::select! {
            _ = self.token.cancelled() => ScopeEnd::Cancelled,
            _ = sleep_until(self.deadline) => ScopeEnd::DeadlineExceeded,
        }
    }
}
