use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

/// Cancellation and deadline carrier passed down the policy chain.
///
/// A context is derived, never replaced: every policy hands downstream a
/// context equal to or derived from the one it received. The cancellation
/// token is shared with all children, so cancelling the root interrupts the
/// whole call tree.
#[derive(Clone, Debug, Default)]
pub struct Context {
    deadline: Option<Instant>,
    cancellation: CancellationToken,
}

/// How a [`Context::sleep`] ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SleepOutcome {
    Elapsed,
    Cancelled,
    DeadlineExpired,
}

impl Context {
    /// A context with no deadline and a fresh cancellation token.
    pub fn background() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Instant::now().checked_add(timeout),
            cancellation: CancellationToken::new(),
        }
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            deadline: Some(deadline),
            cancellation: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(cancellation: CancellationToken) -> Self {
        Self {
            deadline: None,
            cancellation,
        }
    }

    /// Derive a child whose deadline is `min(parent deadline, now + timeout)`.
    /// The child shares the parent's cancellation token.
    pub fn child_with_timeout(&self, timeout: Duration) -> Self {
        let candidate = Instant::now().checked_add(timeout);
        let deadline = match (self.deadline, candidate) {
            (Some(parent), Some(child)) => Some(parent.min(child)),
            (Some(parent), None) => Some(parent),
            (None, child) => child,
        };
        Self {
            deadline,
            cancellation: self.cancellation.clone(),
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    pub fn is_expired(&self) -> bool {
        self.deadline.is_some_and(|at| Instant::now() >= at)
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    pub async fn cancelled(&self) {
        self.cancellation.cancelled().await;
    }

    /// Sleep for `delay`, waking early on cancellation or deadline expiry.
    pub async fn sleep(&self, delay: Duration) -> SleepOutcome {
        tokio::select! {
            _ = tokio::time::sleep(delay) => SleepOutcome::Elapsed,
            _ = self.cancellation.cancelled() => SleepOutcome::Cancelled,
            _ = deadline_wait(self.deadline) => SleepOutcome::DeadlineExpired,
        }
    }
}

/// Pends forever when no deadline is set.
pub(crate) async fn deadline_wait(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(tokio::time::Instant::from_std(at)).await,
        None => std::future::pending::<()>().await,
    }
}
