//! Per-feed action guard.
//!
//! While a lease is held the feed's reconciliation is skipped and samples are
//! dropped rather than queued. The lease is released when it goes out of
//! scope, including when the guarded action unwinds.
//!
//! Every acquire and every release bumps an epoch. A sample stamped with an
//! older epoch than the current one was taken across a guarded action and is
//! discarded too, so the first reconciliation after release always uses a
//! sample taken after it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::error::{Result, TelemetryError};

#[derive(Debug, Default)]
struct GuardState {
    held: AtomicBool,
    epoch: AtomicU64,
}

/// Shared flag for one feed. Clones observe the same state.
#[derive(Debug, Clone, Default)]
pub struct ActionGuard {
    state: Arc<GuardState>,
}

impl ActionGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_held(&self) -> bool {
        self.state.held.load(Ordering::Acquire)
    }

    pub fn epoch(&self) -> u64 {
        self.state.epoch.load(Ordering::Acquire)
    }

    /// Take the guard, or `None` if another action holds it.
    pub fn try_acquire(&self) -> Option<ActionLease> {
        self.state
            .held
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        self.state.epoch.fetch_add(1, Ordering::AcqRel);
        Some(ActionLease {
            state: Arc::clone(&self.state),
        })
    }

    /// Run `action` with the guard held.
    pub fn run<T>(&self, action: impl FnOnce() -> T) -> Result<T> {
        let _lease = self.try_acquire().ok_or_else(|| {
            TelemetryError::ActionRejected("another action is already in progress".into())
        })?;
        Ok(action())
    }
}

/// Proof that the guard is held. Dropping it releases the guard.
#[derive(Debug)]
#[must_use = "the guard is released as soon as the lease is dropped"]
pub struct ActionLease {
    state: Arc<GuardState>,
}

impl Drop for ActionLease {
    fn drop(&mut self) {
        self.state.epoch.fetch_add(1, Ordering::AcqRel);
        self.state.held.store(false, Ordering::Release);
    }
}
