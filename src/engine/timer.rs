//! One-shot task deadline timer.

use tokio::time::{sleep_until, Duration, Instant};

/// The single countdown governing one task.
///
/// Exactly one deadline is outstanding at a time: `extend` replaces the
/// armed deadline instead of adding a second one, and a replaced or
/// cancelled deadline never delivers a fire event.
#[derive(Debug)]
pub struct DeadlineTimer {
    deadline: Instant,
    cancelled: bool,
}

impl DeadlineTimer {
    /// Arm the timer `timeout` from now.
    pub fn start(timeout: Duration) -> Self {
        Self { deadline: Instant::now() + timeout, cancelled: false }
    }

    /// Replace the outstanding deadline with `timeout` from now.
    pub fn extend(&mut self, timeout: Duration) {
        if !self.cancelled {
            self.deadline = Instant::now() + timeout;
        }
    }

    /// Stop the timer permanently. A queued fire is suppressed.
    pub fn cancel(&mut self) {
        self.cancelled = true;
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    pub fn deadline(&self) -> Option<Instant> {
        if self.cancelled { None } else { Some(self.deadline) }
    }

    /// Resolves when the current deadline expires; never resolves once
    /// cancelled. Callers re-await after every `extend`, so a superseded
    /// deadline cannot fire.
    pub async fn expired(&self) {
        match self.deadline() {
            Some(deadline) => sleep_until(deadline).await,
            None => std::future::pending().await,
        }
    }
}
