//! Sync conflict model

use serde::{Deserialize, Serialize};

/// Recorded sync conflict resolved by strategy (e.g., LWW)
///
/// Written when a download overwrote a record that still had unsynced
/// local edits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConflict {
    /// Conflict row identifier
    pub id: i64,
    /// Entity table involved (`folders` or `notes`)
    pub entity: String,
    /// Record involved in the conflict
    pub record_id: String,
    /// Local row's timestamp when the conflict occurred
    pub local_updated_at: i64,
    /// Incoming row's timestamp that won
    pub incoming_updated_at: i64,
    /// Resolution timestamp (unix ms)
    pub resolved_at: i64,
    /// Resolution strategy name
    pub strategy: String,
}
