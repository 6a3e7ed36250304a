//! notesync-core - Core library for notesync
//!
//! This crate contains the models, the libSQL-backed local store, the remote
//! data client contract and the bidirectional sync engine used by every
//! notesync host.

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod remote;
pub mod state;
pub mod sync;
pub mod util;

pub use error::{Error, RemoteError, Result};
pub use models::{Folder, FolderId, Note, NoteId, SyncStatus, UserId};
pub use sync::{SyncOptions, SyncOrchestrator, SyncReport};
