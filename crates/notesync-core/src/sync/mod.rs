//! Bidirectional sync engine.
//!
//! [`SyncOrchestrator`] drives a run; [`EntitySyncManager`] implements the
//! per-entity protocol over the [`SyncEntity`] capability trait.

mod cleanup;
mod counters;
mod entity;
mod events;
mod lock;
mod manager;
mod orchestrator;
mod progress;
mod retry;
mod scheduler;
mod transaction;

pub use cleanup::CleanupReport;
pub use counters::{CounterSnapshot, SyncCounters};
pub use entity::{EntityKind, PayloadPolicy, SyncEntity, Transfer};
pub use events::{EventBus, SubscriptionId, SyncEvent};
pub use lock::{SyncLock, SyncLockGuard};
pub use manager::{EntitySyncManager, PhaseReport, Resolution};
pub use orchestrator::{SyncOptions, SyncOrchestrator, SyncReport};
pub use progress::{ProgressCoordinator, ProgressObserver, SyncProgress};
pub use retry::NetworkRecoveryManager;
pub use scheduler::{SchedulerHandle, SyncScheduler};
pub use transaction::{Checkpoint, SyncTransaction, TransactionManager};
