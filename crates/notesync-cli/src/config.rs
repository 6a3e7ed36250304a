//! Persistent CLI configuration.

use std::env;
use std::path::{Path, PathBuf};

use notesync_core::config::{RemoteConfig, SyncSettings};
use notesync_core::util::normalize_text_option;
use serde::{Deserialize, Serialize};

const CONFIG_DIR_NAME: &str = "notesync";
const CONFIG_FILE_NAME: &str = "config.json";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CliConfig {
    #[serde(default = "default_config_version")]
    pub version: u32,
    #[serde(default)]
    pub database_path: Option<PathBuf>,
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub sync: SyncSettings,
}

const fn default_config_version() -> u32 {
    1
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
}

impl CliConfig {
    /// Load from `explicit`, or the default location; a missing file yields defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self, String> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => match default_config_path() {
                Some(path) => path,
                None => return Ok(Self::default().with_env_overrides()),
            },
        };
        Ok(Self::load_from_path(&path)?.with_env_overrides())
    }

    pub fn load_from_path(path: &Path) -> Result<Self, String> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)
            .map_err(|error| format!("Failed to read config at {}: {}", path.display(), error))?;
        let mut config = serde_json::from_str::<Self>(&raw)
            .map_err(|error| format!("Failed to parse config at {}: {}", path.display(), error))?;
        config.normalize();
        config
            .sync
            .validate()
            .map_err(|error| format!("Invalid sync settings in {}: {}", path.display(), error))?;
        Ok(config)
    }

    pub fn save_to_path(&self, path: &Path) -> Result<(), String> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|error| {
                format!(
                    "Failed to create config directory {}: {}",
                    parent.display(),
                    error
                )
            })?;
        }

        let mut normalized = self.clone();
        normalized.normalize();
        let serialized = serde_json::to_string_pretty(&normalized)
            .map_err(|error| format!("Failed to serialize config: {error}"))?;
        std::fs::write(path, serialized)
            .map_err(|error| format!("Failed to write config at {}: {}", path.display(), error))
    }

    /// `NOTESYNC_REST_URL` and `NOTESYNC_ANON_KEY` win over the file.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(url) = normalize_text_option(env::var("NOTESYNC_REST_URL").ok()) {
            self.remote.rest_url = Some(url);
        }
        if let Some(key) = normalize_text_option(env::var("NOTESYNC_ANON_KEY").ok()) {
            self.remote.anon_key = Some(key);
        }
        self
    }

    fn normalize(&mut self) {
        self.remote.rest_url = normalize_text_option(self.remote.rest_url.take());
        self.remote.anon_key = normalize_text_option(self.remote.anon_key.take());
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = CliConfig::load_from_path(&dir.path().join("absent.json")).unwrap();
        assert_eq!(config, CliConfig::default());
    }

    #[test]
    fn config_roundtrip_normalizes_remote() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILE_NAME);
        let mut config = CliConfig {
            version: 1,
            database_path: Some(PathBuf::from("/tmp/notesync.db")),
            remote: RemoteConfig::new(" https://project.supabase.co ", " anon-key "),
            sync: SyncSettings::default(),
        };
        config.sync.progress_interval = Duration::from_millis(250);

        config.save_to_path(&path).unwrap();
        let loaded = CliConfig::load_from_path(&path).unwrap();

        assert_eq!(
            loaded.remote.rest_url.as_deref(),
            Some("https://project.supabase.co")
        );
        assert_eq!(loaded.remote.anon_key.as_deref(), Some("anon-key"));
        assert_eq!(loaded.sync.progress_interval, Duration::from_millis(250));
        assert_eq!(loaded.database_path, config.database_path);
    }

    #[test]
    fn partial_sync_settings_keep_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, r#"{"sync": {"tombstone_retention_days": 7}}"#).unwrap();

        let loaded = CliConfig::load_from_path(&path).unwrap();

        assert_eq!(loaded.sync.tombstone_retention_days, 7);
        assert_eq!(
            loaded.sync.max_payload_bytes,
            SyncSettings::default().max_payload_bytes
        );
    }

    #[test]
    fn invalid_sync_settings_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, r#"{"sync": {"max_payload_bytes": 0}}"#).unwrap();

        let error = CliConfig::load_from_path(&path).unwrap_err();
        assert!(error.contains("max_payload_bytes"));
    }
}
