//! Caller-owned admission control: at most one operation of a kind in
//! flight.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};

/// Capacity-1 gate a caller takes before creating a task and releases in
/// the task's terminal branch.
#[derive(Debug, Clone)]
pub struct AdmissionGuard {
    kind: &'static str,
    semaphore: Arc<Semaphore>,
}

/// Proof of admission. Dropping it reopens the gate, so the ticket is
/// released on every exit path even if the terminal branch never runs.
#[derive(Debug)]
pub struct AdmissionTicket {
    kind: &'static str,
    _permit: OwnedSemaphorePermit,
}

impl AdmissionGuard {
    pub fn new(kind: &'static str) -> Self {
        Self { kind, semaphore: Arc::new(Semaphore::new(1)) }
    }

    /// Try to admit one operation; `None` while another is in flight.
    pub fn try_acquire(&self) -> Option<AdmissionTicket> {
        match Arc::clone(&self.semaphore).try_acquire_owned() {
            Ok(permit) => Some(AdmissionTicket { kind: self.kind, _permit: permit }),
            Err(TryAcquireError::NoPermits) | Err(TryAcquireError::Closed) => {
                tracing::debug!(kind = self.kind, "admission rejected, operation in flight");
                None
            }
        }
    }
}

impl AdmissionTicket {
    pub fn kind(&self) -> &'static str {
        self.kind
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn only_one_ticket_at_a_time() {
        let guard = AdmissionGuard::new("firmware-update");
        let ticket = guard.try_acquire().unwrap();
        assert_eq!(ticket.kind(), "firmware-update");
        assert!(guard.try_acquire().is_none());

        drop(ticket);
        assert!(guard.try_acquire().is_some());
    }

    #[tokio::test]
    async fn clones_share_the_gate() {
        let guard = AdmissionGuard::new("virtual-media");
        let other = guard.clone();
        let _ticket = guard.try_acquire().unwrap();
        assert!(other.try_acquire().is_none());
    }
}
