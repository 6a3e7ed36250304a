//! Retry with exponential backoff for remote calls.

use std::future::Future;

use crate::config::{RetryConfig, RetryProfiles};
use crate::error::Result;

/// Runs fallible network operations under a [`RetryConfig`].
///
/// Only errors classified by [`crate::Error::is_retryable`] are retried. A
/// 429 response moves the remaining attempts onto the rate-limited profile.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct NetworkRecoveryManager {
    profiles: RetryProfiles,
}

impl NetworkRecoveryManager {
    pub const fn new(profiles: RetryProfiles) -> Self {
        Self { profiles }
    }

    pub const fn profiles(&self) -> &RetryProfiles {
        &self.profiles
    }

    /// Execute `operation` until it succeeds, fails terminally, or the retry
    /// budget runs out. The last error is returned unchanged.
    pub async fn execute_with_retry<T, F, Fut>(
        &self,
        name: &str,
        config: &RetryConfig,
        mut operation: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut config = *config;
        let mut attempt: u32 = 0;
        let mut rate_limited = false;

        loop {
            let error = match operation().await {
                Ok(value) => {
                    if attempt > 0 || rate_limited {
                        tracing::info!("{} succeeded after retrying", name);
                    }
                    return Ok(value);
                }
                Err(error) => error,
            };

            if !error.is_retryable() {
                tracing::debug!("{} failed with a terminal error: {}", name, error);
                return Err(error);
            }

            if error.is_rate_limited() && !rate_limited {
                rate_limited = true;
                config = self.profiles.rate_limited;
                attempt = 0;
                tracing::warn!("{} was rate limited, switching to the rate-limited profile", name);
            }

            if attempt >= config.max_retries {
                tracing::warn!(
                    "{} failed after {} retries, giving up: {}",
                    name,
                    attempt,
                    error
                );
                return Err(error);
            }

            let delay = config.delay_for_attempt(attempt);
            tracing::warn!(
                "{} failed (retry {}/{}), retrying in {:?}: {}",
                name,
                attempt + 1,
                config.max_retries,
                delay,
                error
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    pub async fn with_default<T, F, Fut>(&self, name: &str, operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let config = self.profiles.default;
        self.execute_with_retry(name, &config, operation).await
    }

    pub async fn with_aggressive<T, F, Fut>(&self, name: &str, operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let config = self.profiles.aggressive;
        self.execute_with_retry(name, &config, operation).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use tokio::time::Instant;

    use super::*;
    use crate::error::{Error, RemoteError};

    /// Operation that fails with the scripted errors, then succeeds.
    fn scripted(
        errors: Vec<RemoteError>,
        attempts: Arc<Mutex<Vec<Instant>>>,
    ) -> impl FnMut() -> std::future::Ready<Result<&'static str>> {
        let mut errors = errors.into_iter();
        move || {
            attempts.lock().unwrap().push(Instant::now());
            std::future::ready(match errors.next() {
                Some(error) => Err(Error::Remote(error)),
                None => Ok("done"),
            })
        }
    }

    fn gaps(attempts: &[Instant]) -> Vec<Duration> {
        attempts
            .windows(2)
            .map(|pair| pair[1].duration_since(pair[0]))
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_back_off_then_succeed() {
        let manager = NetworkRecoveryManager::default();
        let attempts = Arc::new(Mutex::new(Vec::new()));
        let timeouts = vec![RemoteError::Timeout("slow".into()); 3];

        let value = manager
            .execute_with_retry(
                "fetch notes",
                &RetryConfig::DEFAULT,
                scripted(timeouts, Arc::clone(&attempts)),
            )
            .await
            .unwrap();

        assert_eq!(value, "done");
        let delays = gaps(&attempts.lock().unwrap());
        assert_eq!(
            delays,
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4)
            ]
        );
        assert!(delays.windows(2).all(|pair| pair[0] <= pair[1]));
    }

    #[tokio::test(start_paused = true)]
    async fn delays_never_exceed_the_cap() {
        let manager = NetworkRecoveryManager::default();
        let attempts = Arc::new(Mutex::new(Vec::new()));
        let config = RetryConfig {
            max_retries: 4,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(3),
            multiplier: 2.0,
        };

        manager
            .execute_with_retry(
                "upload",
                &config,
                scripted(vec![RemoteError::http(503, "busy"); 4], Arc::clone(&attempts)),
            )
            .await
            .unwrap();

        let delays = gaps(&attempts.lock().unwrap());
        assert_eq!(
            delays,
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(3),
                Duration::from_secs(3)
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn auth_failure_is_not_retried() {
        let manager = NetworkRecoveryManager::default();
        let attempts = Arc::new(Mutex::new(Vec::new()));
        let started = Instant::now();

        let error = manager
            .execute_with_retry(
                "validate session",
                &RetryConfig::AGGRESSIVE,
                scripted(vec![RemoteError::http(401, "expired")], Arc::clone(&attempts)),
            )
            .await
            .unwrap_err();

        assert!(error.is_auth());
        assert_eq!(attempts.lock().unwrap().len(), 1);
        assert_eq!(Instant::now(), started);
    }

    #[tokio::test(start_paused = true)]
    async fn client_errors_fail_immediately() {
        let manager = NetworkRecoveryManager::default();
        for status in [400, 403, 404] {
            let attempts = Arc::new(Mutex::new(Vec::new()));
            let result = manager
                .with_default(
                    "update",
                    scripted(vec![RemoteError::http(status, "no")], Arc::clone(&attempts)),
                )
                .await;
            assert!(result.is_err());
            assert_eq!(attempts.lock().unwrap().len(), 1);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_returns_the_last_error() {
        let manager = NetworkRecoveryManager::default();
        let attempts = Arc::new(Mutex::new(Vec::new()));
        let errors = vec![
            RemoteError::Timeout("first".into()),
            RemoteError::Offline("second".into()),
            RemoteError::Dns("third".into()),
            RemoteError::ConnectionReset("last".into()),
        ];

        let error = manager
            .with_default("fetch folders", scripted(errors, Arc::clone(&attempts)))
            .await
            .unwrap_err();

        assert!(matches!(error, Error::Remote(RemoteError::ConnectionReset(ref message)) if message == "last"));
        assert_eq!(attempts.lock().unwrap().len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_switches_profile() {
        let manager = NetworkRecoveryManager::default();
        let attempts = Arc::new(Mutex::new(Vec::new()));
        let errors = vec![
            RemoteError::http(429, "slow down"),
            RemoteError::http(429, "slow down"),
        ];

        manager
            .with_default("insert note", scripted(errors, Arc::clone(&attempts)))
            .await
            .unwrap();

        let delays = gaps(&attempts.lock().unwrap());
        assert_eq!(
            delays,
            vec![Duration::from_secs(5), Duration::from_secs(15)]
        );
    }
}
