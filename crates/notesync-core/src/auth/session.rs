//! Session providers consumed by the sync engine.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError, RwLock};

use async_trait::async_trait;

use super::{AuthError, AuthSession, SessionPersistence, SupabaseAuthClient};
use crate::error::{Error, RemoteError, Result};
use crate::models::UserId;
use crate::sync::{EventBus, SyncEvent};

/// Source of the signed-in identity and its credentials.
#[async_trait]
pub trait SessionProvider: Send + Sync {
    /// Make sure the session is usable, refreshing it when close to expiry.
    ///
    /// Fails with an auth error when there is no session or it was revoked.
    async fn validate_and_refresh_if_needed(&self) -> Result<()>;

    /// The signed-in user, if any.
    fn current_user_id(&self) -> Option<UserId>;

    /// Bearer token for data requests.
    fn access_token(&self) -> Option<String>;

    fn is_signed_in(&self) -> bool {
        self.current_user_id().is_some()
    }
}

/// Supabase-backed session kept in memory and mirrored to a `SessionPersistence`.
pub struct SupabaseSession<S: SessionPersistence> {
    client: SupabaseAuthClient<S>,
    current: RwLock<Option<AuthSession>>,
    events: Option<EventBus>,
}

impl<S: SessionPersistence> SupabaseSession<S> {
    /// Start from whatever session the store holds.
    pub fn new(client: SupabaseAuthClient<S>) -> Result<Self> {
        let stored = client.store().load_session()?;
        Ok(Self {
            client,
            current: RwLock::new(stored),
            events: None,
        })
    }

    #[must_use]
    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn snapshot(&self) -> Option<AuthSession> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Adopt a session obtained elsewhere (e.g. an exchanged refresh token).
    pub fn install(&self, session: AuthSession) -> Result<()> {
        self.client.store().save_session(&session)?;
        self.replace(Some(session));
        Ok(())
    }

    pub async fn sign_out(&self) -> Result<()> {
        if let Some(session) = self.snapshot() {
            self.client.sign_out(&session.access_token).await?;
        } else {
            self.client.store().clear_session()?;
        }
        self.replace(None);
        Ok(())
    }

    fn replace(&self, next: Option<AuthSession>) {
        let changed = {
            let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
            let before = current.as_ref().map(|session| session.user.id.clone());
            let after = next.as_ref().map(|session| session.user.id.clone());
            *current = next;
            (before != after).then_some(after)
        };

        if let (Some(user_id), Some(events)) = (changed, &self.events) {
            events.publish(&SyncEvent::SessionChanged {
                user_id: user_id.map(UserId::new),
            });
        }
    }
}

#[async_trait]
impl<S: SessionPersistence> SessionProvider for SupabaseSession<S> {
    async fn validate_and_refresh_if_needed(&self) -> Result<()> {
        let session = self.snapshot().ok_or(AuthError::SignedOut)?;
        if !session.is_expired() {
            return Ok(());
        }

        tracing::debug!("Refreshing session for user {}", session.user.id);
        match self.client.refresh_session(&session.refresh_token).await {
            Ok(refreshed) => {
                self.replace(Some(refreshed));
                Ok(())
            }
            Err(error) => {
                let error = Error::from(error);
                if error.is_auth() {
                    tracing::warn!("Session for user {} was revoked: {}", session.user.id, error);
                    self.client.store().clear_session()?;
                    self.replace(None);
                }
                Err(error)
            }
        }
    }

    fn current_user_id(&self) -> Option<UserId> {
        self.snapshot().map(|session| UserId::new(session.user.id))
    }

    fn access_token(&self) -> Option<String> {
        self.snapshot().map(|session| session.access_token)
    }
}

/// Fixed identity with scripted validation failures.
///
/// Backs offline use and tests; every validation is counted.
#[derive(Default)]
pub struct StaticSession {
    user: RwLock<Option<UserId>>,
    token: Option<String>,
    failures: Mutex<VecDeque<RemoteError>>,
    validations: AtomicUsize,
    events: Option<EventBus>,
}

impl StaticSession {
    pub fn new(user: impl Into<UserId>) -> Self {
        Self {
            user: RwLock::new(Some(user.into())),
            ..Self::default()
        }
    }

    pub fn signed_out() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    #[must_use]
    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    /// Queue a failure for the next validation call.
    pub fn fail_next_validation(&self, error: RemoteError) {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(error);
    }

    /// Switch accounts, notifying subscribers when the user changes.
    pub fn set_user(&self, user: Option<UserId>) {
        let changed = {
            let mut current = self.user.write().unwrap_or_else(PoisonError::into_inner);
            let changed = *current != user;
            current.clone_from(&user);
            changed
        };
        if let (true, Some(events)) = (changed, &self.events) {
            events.publish(&SyncEvent::SessionChanged { user_id: user });
        }
    }

    pub fn validation_count(&self) -> usize {
        self.validations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionProvider for StaticSession {
    async fn validate_and_refresh_if_needed(&self) -> Result<()> {
        self.validations.fetch_add(1, Ordering::SeqCst);
        let scripted = self
            .failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        if let Some(error) = scripted {
            return Err(error.into());
        }
        if self.is_signed_in() {
            Ok(())
        } else {
            Err(AuthError::SignedOut.into())
        }
    }

    fn current_user_id(&self) -> Option<UserId> {
        self.user
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn access_token(&self) -> Option<String> {
        self.token.clone()
    }
}
