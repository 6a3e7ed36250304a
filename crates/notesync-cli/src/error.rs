use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] notesync_core::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Authentication error: {0}")]
    Auth(String),
    #[error("Invalid folder ID: {0}")]
    InvalidFolderId(String),
    #[error("Not signed in. Run `notesync session set` first.")]
    NotSignedIn,
    #[error(
        "Sync is not configured. Set rest_url and anon_key in the config file, or NOTESYNC_REST_URL and NOTESYNC_ANON_KEY."
    )]
    SyncNotConfigured,
    #[error("Sync finished with {0} failed records")]
    SyncIncomplete(usize),
}

impl From<notesync_core::auth::AuthError> for CliError {
    fn from(error: notesync_core::auth::AuthError) -> Self {
        Self::Auth(error.to_string())
    }
}
