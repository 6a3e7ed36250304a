//! Rate-limited progress delivery.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

use super::counters::CounterSnapshot;

/// One progress update as seen by observers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncProgress {
    pub total_folders: usize,
    pub synced_folders: usize,
    pub downloaded_folders: usize,
    pub total_notes: usize,
    pub synced_notes: usize,
    pub downloaded_notes: usize,
    pub resolved_conflicts: usize,
    pub status_message: String,
}

impl SyncProgress {
    pub fn from_counters(counters: &CounterSnapshot, status_message: impl Into<String>) -> Self {
        Self {
            total_folders: counters.total_folders,
            synced_folders: counters.synced_folders,
            downloaded_folders: counters.downloaded_folders,
            total_notes: counters.total_notes,
            synced_notes: counters.synced_notes,
            downloaded_notes: counters.downloaded_notes,
            resolved_conflicts: counters.resolved_conflicts,
            status_message: status_message.into(),
        }
    }
}

impl fmt::Display for SyncProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (folders {}/{} up, {} down; notes {}/{} up, {} down; {} conflicts)",
            self.status_message,
            self.synced_folders,
            self.total_folders,
            self.downloaded_folders,
            self.synced_notes,
            self.total_notes,
            self.downloaded_notes,
            self.resolved_conflicts
        )
    }
}

/// Progress sink. Called on the sync task; must return quickly.
pub trait ProgressObserver: Send + Sync {
    fn on_progress(&self, progress: &SyncProgress);
}

impl<F> ProgressObserver for F
where
    F: Fn(&SyncProgress) + Send + Sync,
{
    fn on_progress(&self, progress: &SyncProgress) {
        self(progress);
    }
}

#[derive(Default)]
struct Throttle {
    last_delivery: Option<Instant>,
    coalesced: usize,
    last_delivered: Option<SyncProgress>,
}

/// Forwards at most one update per interval, always delivering the final one.
pub struct ProgressCoordinator {
    observer: Option<Arc<dyn ProgressObserver>>,
    interval: Duration,
    throttle: Mutex<Throttle>,
}

impl ProgressCoordinator {
    pub fn new(observer: Option<Arc<dyn ProgressObserver>>, interval: Duration) -> Self {
        Self {
            observer,
            interval,
            throttle: Mutex::new(Throttle::default()),
        }
    }

    /// Deliver `progress` unless another update went out within the interval.
    pub fn report(&self, progress: SyncProgress) {
        if self.observer.is_none() {
            return;
        }
        let now = Instant::now();
        {
            let mut throttle = self.throttle.lock().unwrap_or_else(PoisonError::into_inner);
            let due = throttle
                .last_delivery
                .is_none_or(|last| now.duration_since(last) >= self.interval);
            if !due {
                throttle.coalesced += 1;
                return;
            }
            throttle.last_delivery = Some(now);
            throttle.coalesced = 0;
            throttle.last_delivered = Some(progress.clone());
        }
        self.deliver(&progress);
    }

    /// Deliver unconditionally. Used for the terminal update of a run.
    pub fn finish(&self, progress: SyncProgress) {
        {
            let mut throttle = self.throttle.lock().unwrap_or_else(PoisonError::into_inner);
            if throttle.coalesced > 0 {
                tracing::trace!("Coalesced {} progress updates", throttle.coalesced);
            }
            throttle.last_delivery = Some(Instant::now());
            throttle.coalesced = 0;
            throttle.last_delivered = Some(progress.clone());
        }
        self.deliver(&progress);
    }

    pub fn last_delivered(&self) -> Option<SyncProgress> {
        self.throttle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last_delivered
            .clone()
    }

    fn deliver(&self, progress: &SyncProgress) {
        if let Some(observer) = &self.observer {
            observer.on_progress(progress);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recording() -> (Arc<Mutex<Vec<SyncProgress>>>, Arc<dyn ProgressObserver>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let observer: Arc<dyn ProgressObserver> =
            Arc::new(move |progress: &SyncProgress| sink.lock().unwrap().push(progress.clone()));
        (seen, observer)
    }

    fn update(message: &str) -> SyncProgress {
        SyncProgress {
            status_message: message.to_string(),
            ..SyncProgress::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn updates_inside_the_interval_are_coalesced() {
        let (seen, observer) = recording();
        let coordinator = ProgressCoordinator::new(Some(observer), Duration::from_millis(500));

        coordinator.report(update("one"));
        coordinator.report(update("two"));
        coordinator.report(update("three"));
        tokio::time::advance(Duration::from_millis(500)).await;
        coordinator.report(update("four"));

        let messages: Vec<_> = seen
            .lock()
            .unwrap()
            .iter()
            .map(|progress| progress.status_message.clone())
            .collect();
        assert_eq!(messages, vec!["one", "four"]);
    }

    #[tokio::test(start_paused = true)]
    async fn finish_is_always_delivered() {
        let (seen, observer) = recording();
        let coordinator = ProgressCoordinator::new(Some(observer), Duration::from_millis(500));

        coordinator.report(update("working"));
        coordinator.finish(update("done"));

        assert_eq!(seen.lock().unwrap().len(), 2);
        assert_eq!(coordinator.last_delivered().unwrap().status_message, "done");
    }

    #[test]
    fn display_summarises_counts() {
        let progress = SyncProgress::from_counters(
            &CounterSnapshot {
                total_notes: 5,
                synced_notes: 2,
                resolved_conflicts: 1,
                ..CounterSnapshot::default()
            },
            "Uploading notes",
        );
        let rendered = progress.to_string();
        assert!(rendered.starts_with("Uploading notes"));
        assert!(rendered.contains("notes 2/5 up"));
    }
}
