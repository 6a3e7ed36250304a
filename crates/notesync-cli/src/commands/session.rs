use notesync_core::auth::{AuthSession, AuthUser};
use notesync_core::util::normalize_text_option;

use crate::auth::{load_stored_session, open_session};
use crate::commands::common::format_sync_timestamp;
use crate::config::CliConfig;
use crate::error::CliError;

pub struct SessionInput {
    pub user_id: String,
    pub email: Option<String>,
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: i64,
}

impl SessionInput {
    pub fn into_session(self) -> Result<AuthSession, CliError> {
        let user_id = normalize_text_option(Some(self.user_id))
            .ok_or_else(|| CliError::Auth("user id must not be empty".into()))?;
        let access_token = normalize_text_option(Some(self.access_token))
            .ok_or_else(|| CliError::Auth("access token must not be empty".into()))?;
        let refresh_token = normalize_text_option(Some(self.refresh_token))
            .ok_or_else(|| CliError::Auth("refresh token must not be empty".into()))?;

        Ok(AuthSession {
            access_token,
            refresh_token,
            expires_at: self.expires_at,
            user: AuthUser {
                id: user_id,
                email: normalize_text_option(self.email),
            },
        })
    }
}

pub fn run_session_set(config: &CliConfig, input: SessionInput) -> Result<(), CliError> {
    let session = input.into_session()?;
    let user_id = session.user.id.clone();
    open_session(&config.remote)?.install(session)?;
    println!("Signed in as {user_id}");
    Ok(())
}

pub fn run_session_show(config: &CliConfig) -> Result<(), CliError> {
    match load_stored_session(&config.remote)? {
        Some(session) => {
            println!("User:    {}", session.user.id);
            if let Some(email) = session.user.email.as_deref() {
                println!("Email:   {email}");
            }
            println!(
                "Expires: {}{}",
                format_sync_timestamp(session.expires_at.saturating_mul(1000)),
                if session.is_expired() { " (refresh due)" } else { "" }
            );
        }
        None => println!("Signed out"),
    }
    Ok(())
}

pub async fn run_session_clear(config: &CliConfig) -> Result<(), CliError> {
    open_session(&config.remote)?.sign_out().await?;
    println!("Signed out");
    Ok(())
}
