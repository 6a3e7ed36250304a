//! Engine and backend configuration.
//!
//! `SyncSettings` tunes the sync engine; `RemoteConfig` locates the REST
//! backend. Both are plain serde structs so hosts can load them from their
//! own config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::util::{is_http_url, normalize_text_option};

/// Per-field cap for binary payloads (10 MiB, measured after encoding).
pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 10 * 1024 * 1024;
const DEFAULT_PROGRESS_INTERVAL_MS: u64 = 500;
const DEFAULT_TOMBSTONE_RETENTION_DAYS: u32 = 30;

/// Retry policy for one class of network operation.
///
/// `delay(attempt) = min(base_delay * multiplier^attempt, max_delay)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry
    #[serde(with = "duration_millis")]
    pub base_delay: Duration,
    /// Upper bound for any single delay
    #[serde(with = "duration_millis")]
    pub max_delay: Duration,
    /// Growth factor between consecutive delays
    pub multiplier: f64,
}

impl RetryConfig {
    /// 3 retries, 1s base, 30s cap, x2.
    pub const DEFAULT: Self = Self {
        max_retries: 3,
        base_delay: Duration::from_secs(1),
        max_delay: Duration::from_secs(30),
        multiplier: 2.0,
    };

    /// 5 retries, 0.5s base, 60s cap, x2.5. For auth-adjacent calls.
    pub const AGGRESSIVE: Self = Self {
        max_retries: 5,
        base_delay: Duration::from_millis(500),
        max_delay: Duration::from_secs(60),
        multiplier: 2.5,
    };

    /// 2 retries, 5s base, 120s cap, x3. Used once the backend answers 429.
    pub const RATE_LIMITED: Self = Self {
        max_retries: 2,
        base_delay: Duration::from_secs(5),
        max_delay: Duration::from_secs(120),
        multiplier: 3.0,
    };

    /// Delay to wait before retry number `attempt` (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let scaled = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = scaled.min(self.max_delay.as_secs_f64());
        if capped.is_finite() && capped >= 0.0 {
            Duration::from_secs_f64(capped)
        } else {
            self.max_delay
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Named retry profiles used by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryProfiles {
    pub default: RetryConfig,
    pub aggressive: RetryConfig,
    pub rate_limited: RetryConfig,
}

impl Default for RetryProfiles {
    fn default() -> Self {
        Self {
            default: RetryConfig::DEFAULT,
            aggressive: RetryConfig::AGGRESSIVE,
            rate_limited: RetryConfig::RATE_LIMITED,
        }
    }
}

/// Tunables for the sync engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Largest encoded size accepted for one binary field
    pub max_payload_bytes: usize,
    /// Minimum spacing between progress deliveries
    #[serde(with = "duration_millis")]
    pub progress_interval: Duration,
    /// Tombstones older than this are purged even without remote confirmation
    pub tombstone_retention_days: u32,
    /// Name of the well-known default folder
    pub default_folder_name: String,
    pub retry: RetryProfiles,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
            progress_interval: Duration::from_millis(DEFAULT_PROGRESS_INTERVAL_MS),
            tombstone_retention_days: DEFAULT_TOMBSTONE_RETENTION_DAYS,
            default_folder_name: crate::models::Folder::DEFAULT_NAME.to_string(),
            retry: RetryProfiles::default(),
        }
    }
}

impl SyncSettings {
    /// Parse settings from JSON; missing fields take their defaults.
    pub fn from_json(payload: &str) -> Result<Self> {
        let settings: Self = serde_json::from_str(payload)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_payload_bytes == 0 {
            return Err(Error::InvalidInput(
                "max_payload_bytes must be greater than zero".into(),
            ));
        }
        if self.default_folder_name.trim().is_empty() {
            return Err(Error::InvalidInput(
                "default_folder_name must not be empty".into(),
            ));
        }
        for (name, profile) in [
            ("default", &self.retry.default),
            ("aggressive", &self.retry.aggressive),
            ("rate_limited", &self.retry.rate_limited),
        ] {
            if !(profile.multiplier.is_finite() && profile.multiplier >= 1.0) {
                return Err(Error::InvalidInput(format!(
                    "retry profile '{name}' needs a multiplier >= 1"
                )));
            }
        }
        Ok(())
    }

    /// Retention window as milliseconds.
    pub fn tombstone_retention_millis(&self) -> i64 {
        i64::from(self.tombstone_retention_days) * 24 * 60 * 60 * 1000
    }
}

/// Location and public key of the REST backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Base URL of the REST data API (e.g. `https://project.supabase.co`)
    #[serde(default)]
    pub rest_url: Option<String>,
    /// Public (anon) API key
    #[serde(default)]
    pub anon_key: Option<String>,
}

impl RemoteConfig {
    pub fn new(rest_url: impl Into<String>, anon_key: impl Into<String>) -> Self {
        Self {
            rest_url: Some(rest_url.into()),
            anon_key: Some(anon_key.into()),
        }
    }

    /// Validate and return `(base_url, anon_key)`.
    ///
    /// The base URL is trimmed and loses any trailing slash.
    pub fn resolve(&self) -> Result<(String, String)> {
        let url = normalize_text_option(self.rest_url.clone())
            .ok_or_else(|| Error::InvalidInput("rest_url is required".into()))?;
        if !is_http_url(&url) {
            return Err(Error::InvalidInput(
                "rest_url must include http:// or https://".into(),
            ));
        }
        let anon_key = normalize_text_option(self.anon_key.clone())
            .ok_or_else(|| Error::InvalidInput("anon_key is required".into()))?;
        Ok((url.trim_end_matches('/').to_string(), anon_key))
    }

    pub fn is_configured(&self) -> bool {
        self.resolve().is_ok()
    }
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
