//! Per-run deadline and cancellation scope.

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

/// Upper bound on the cleanup allowance past a run's deadline.
const MAX_GRACE: Duration = Duration::from_secs(2);

/// Cleanup allowance granted after a run's deadline: a tenth of the
/// timeout, capped at two seconds.
pub fn cleanup_grace(timeout: Duration) -> Duration {
    (timeout / 10).min(MAX_GRACE)
}

/// Wait until `shutdown` carries `true` or its sender is gone.
pub async fn shutdown_signalled(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

/// Everything a probe run is bounded by.
///
/// `deadline` bounds the checks themselves. `hard_deadline` is slightly
/// later and bounds cleanup; the scheduler aborts the run when it passes.
/// `shutdown` fires on process shutdown, whichever comes first.
#[derive(Debug, Clone)]
pub struct RunContext {
    deadline: Instant,
    hard_deadline: Instant,
    shutdown: Option<watch::Receiver<bool>>,
}

impl RunContext {
    /// Start a run now with the given timeout and shutdown signal.
    pub fn new(timeout: Duration, shutdown: watch::Receiver<bool>) -> Self {
        let deadline = Instant::now() + timeout;
        Self {
            deadline,
            hard_deadline: deadline + cleanup_grace(timeout),
            shutdown: Some(shutdown),
        }
    }

    /// A run that is only bounded by its timeout (one-off checks, tests).
    pub fn detached(timeout: Duration) -> Self {
        let deadline = Instant::now() + timeout;
        Self {
            deadline,
            hard_deadline: deadline + cleanup_grace(timeout),
            shutdown: None,
        }
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn hard_deadline(&self) -> Instant {
        self.hard_deadline
    }

    /// Time left until the deadline (zero once passed).
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Deadline for a sub-step with its own budget, never past the run's.
    pub fn step_deadline(&self, budget: Duration) -> Instant {
        (Instant::now() + budget).min(self.deadline)
    }

    pub fn is_cancelled(&self) -> bool {
        self.shutdown.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Resolves on shutdown. Never resolves for a detached context.
    pub async fn cancelled(&self) {
        match &self.shutdown {
            Some(rx) => shutdown_signalled(&mut rx.clone()).await,
            None => std::future::pending().await,
        }
    }
}
