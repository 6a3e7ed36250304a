//! Atomic per-run counters.

use std::sync::atomic::{AtomicUsize, Ordering};

use super::entity::EntityKind;

/// Counters shared between the orchestrator, entity managers and progress.
#[derive(Debug, Default)]
pub struct SyncCounters {
    total_folders: AtomicUsize,
    synced_folders: AtomicUsize,
    downloaded_folders: AtomicUsize,
    total_notes: AtomicUsize,
    synced_notes: AtomicUsize,
    downloaded_notes: AtomicUsize,
    resolved_conflicts: AtomicUsize,
    failed_records: AtomicUsize,
    skipped_payloads: AtomicUsize,
}

/// Point-in-time copy of [`SyncCounters`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub total_folders: usize,
    pub synced_folders: usize,
    pub downloaded_folders: usize,
    pub total_notes: usize,
    pub synced_notes: usize,
    pub downloaded_notes: usize,
    pub resolved_conflicts: usize,
    pub failed_records: usize,
    pub skipped_payloads: usize,
}

impl SyncCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add records discovered for a phase.
    pub fn add_total(&self, kind: EntityKind, count: usize) {
        match kind {
            EntityKind::Folder => self.total_folders.fetch_add(count, Ordering::Relaxed),
            EntityKind::Note => self.total_notes.fetch_add(count, Ordering::Relaxed),
        };
    }

    pub fn record_uploaded(&self, kind: EntityKind) {
        match kind {
            EntityKind::Folder => self.synced_folders.fetch_add(1, Ordering::Relaxed),
            EntityKind::Note => self.synced_notes.fetch_add(1, Ordering::Relaxed),
        };
    }

    pub fn record_downloaded(&self, kind: EntityKind) {
        match kind {
            EntityKind::Folder => self.downloaded_folders.fetch_add(1, Ordering::Relaxed),
            EntityKind::Note => self.downloaded_notes.fetch_add(1, Ordering::Relaxed),
        };
    }

    pub fn record_conflict(&self) {
        self.resolved_conflicts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failed_records.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_skipped_payload(&self) {
        self.skipped_payloads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn resolved_conflicts(&self) -> usize {
        self.resolved_conflicts.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            total_folders: self.total_folders.load(Ordering::Relaxed),
            synced_folders: self.synced_folders.load(Ordering::Relaxed),
            downloaded_folders: self.downloaded_folders.load(Ordering::Relaxed),
            total_notes: self.total_notes.load(Ordering::Relaxed),
            synced_notes: self.synced_notes.load(Ordering::Relaxed),
            downloaded_notes: self.downloaded_notes.load(Ordering::Relaxed),
            resolved_conflicts: self.resolved_conflicts.load(Ordering::Relaxed),
            failed_records: self.failed_records.load(Ordering::Relaxed),
            skipped_payloads: self.skipped_payloads.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn counters_track_each_kind_separately() {
        let counters = SyncCounters::new();
        counters.add_total(EntityKind::Folder, 2);
        counters.add_total(EntityKind::Note, 5);
        counters.record_uploaded(EntityKind::Folder);
        counters.record_downloaded(EntityKind::Note);
        counters.record_downloaded(EntityKind::Note);
        counters.record_conflict();

        let snapshot = counters.snapshot();
        assert_eq!(snapshot.total_folders, 2);
        assert_eq!(snapshot.total_notes, 5);
        assert_eq!(snapshot.synced_folders, 1);
        assert_eq!(snapshot.synced_notes, 0);
        assert_eq!(snapshot.downloaded_notes, 2);
        assert_eq!(snapshot.resolved_conflicts, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn increments_from_many_tasks_are_not_lost() {
        let counters = Arc::new(SyncCounters::new());
        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let counters = Arc::clone(&counters);
                tokio::spawn(async move {
                    for _ in 0..100 {
                        counters.record_conflict();
                    }
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(counters.resolved_conflicts(), 800);
    }
}
