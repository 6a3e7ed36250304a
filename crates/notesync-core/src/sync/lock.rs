//! Injectable sync gate with scoped acquisition.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{Error, Result};

/// Non-queueing mutual exclusion for sync runs.
///
/// Clones share the same gate, so one lock can be handed to several
/// orchestrators to serialise them.
#[derive(Debug, Clone, Default)]
pub struct SyncLock {
    held: Arc<AtomicBool>,
}

impl SyncLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the gate or fail immediately with `SyncAlreadyInProgress`.
    pub fn try_acquire(&self) -> Result<SyncLockGuard> {
        self.held
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| Error::SyncAlreadyInProgress)?;
        Ok(SyncLockGuard {
            held: Arc::clone(&self.held),
        })
    }

    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::Acquire)
    }
}

/// Releases the gate when dropped, including on error and cancellation.
#[derive(Debug)]
#[must_use = "the sync lock is released as soon as the guard is dropped"]
pub struct SyncLockGuard {
    held: Arc<AtomicBool>,
}

impl Drop for SyncLockGuard {
    fn drop(&mut self) {
        self.held.store(false, Ordering::Release);
    }
}
