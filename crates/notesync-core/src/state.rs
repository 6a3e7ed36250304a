//! Shared cross-platform state types.

use crate::sync::SyncEvent;

/// Coarse sync state for status indicators.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SyncState {
    #[default]
    Idle,
    Offline,
    Syncing,
    Synced,
    Error,
}

impl SyncState {
    /// Fold a sync event into the next state.
    #[must_use]
    pub const fn apply(self, event: &SyncEvent) -> Self {
        match event {
            SyncEvent::SyncStarted { .. } => Self::Syncing,
            SyncEvent::SyncFinished { success: true, .. } => Self::Synced,
            SyncEvent::SyncFinished { success: false, .. } => Self::Error,
            SyncEvent::SyncFailed { offline: true, .. } => Self::Offline,
            SyncEvent::SyncFailed { offline: false, .. } => Self::Error,
            SyncEvent::SessionChanged { user_id: None } => Self::Idle,
            SyncEvent::SessionChanged { .. } => self,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_follows_sync_events() {
        let state = SyncState::default().apply(&SyncEvent::SyncStarted { two_way: true });
        assert_eq!(state, SyncState::Syncing);

        let state = state.apply(&SyncEvent::SyncFailed {
            message: "offline".to_string(),
            offline: true,
        });
        assert_eq!(state, SyncState::Offline);

        let state = state.apply(&SyncEvent::SyncFinished {
            success: true,
            resolved_conflicts: 0,
        });
        assert_eq!(state, SyncState::Synced);

        let state = state.apply(&SyncEvent::SessionChanged { user_id: None });
        assert_eq!(state, SyncState::Idle);
    }
}
