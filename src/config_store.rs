//! Local credential file handling.
//!
//! The setup CLI writes the validated credentials to `.pulsewire.json` in the
//! project directory. The SDK reads the same file as the last fallback when
//! resolving credentials, and the file name is kept out of version control by
//! appending it to `.gitignore`.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

/// File name of the local credential file.
pub const CONFIG_FILE_NAME: &str = ".pulsewire.json";

const GITIGNORE_FILE_NAME: &str = ".gitignore";

/// Errors raised while reading or writing local state.
#[derive(Debug, Error)]
pub enum ConfigStoreError {
    #[error("config file not found at {}", .path.display())]
    NotFound { path: PathBuf },

    #[error("failed to access {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("config file {} is not valid JSON: {source}", .path.display())]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to serialize config for {}: {source}", .path.display())]
    Serialize {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("config file {} is missing required field `{field}`", .path.display())]
    MissingField { path: PathBuf, field: &'static str },
}

/// Contents of the local credential file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredConfig {
    #[serde(default)]
    pub api_key: String,

    #[serde(default)]
    pub instance_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdk_version: Option<String>,
}

impl StoredConfig {
    pub fn new(api_key: impl Into<String>, instance_id: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            instance_id: instance_id.into(),
            company_name: None,
            created_at: None,
            sdk_version: None,
        }
    }
}

/// Reads and writes [`StoredConfig`] inside one directory.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    dir: PathBuf,
}

impl ConfigStore {
    /// Store rooted at `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Store rooted at the process working directory.
    pub fn current_dir() -> Result<Self, ConfigStoreError> {
        let dir = std::env::current_dir().map_err(|source| ConfigStoreError::Io {
            path: PathBuf::from("."),
            source,
        })?;
        Ok(Self::new(dir))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Full path of the credential file.
    pub fn path(&self) -> PathBuf {
        self.dir.join(CONFIG_FILE_NAME)
    }

    pub fn exists(&self) -> bool {
        self.path().is_file()
    }

    /// Read and validate the credential file.
    ///
    /// # Errors
    ///
    /// `NotFound` if the file is absent, `Malformed` if it is not a JSON
    /// object of the expected shape, `MissingField` if `apiKey` or
    /// `instanceId` is empty.
    pub fn read(&self) -> Result<StoredConfig, ConfigStoreError> {
        let path = self.path();
        let config = self.load()?;

        if config.api_key.trim().is_empty() {
            return Err(ConfigStoreError::MissingField {
                path,
                field: "apiKey",
            });
        }
        if config.instance_id.trim().is_empty() {
            return Err(ConfigStoreError::MissingField {
                path,
                field: "instanceId",
            });
        }

        debug!(path = %path.display(), "Loaded local config");
        Ok(config)
    }

    /// Read the credential file, treating a missing file as `None`.
    pub fn read_optional(&self) -> Result<Option<StoredConfig>, ConfigStoreError> {
        match self.read() {
            Ok(config) => Ok(Some(config)),
            Err(ConfigStoreError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Read the credential file without requiring both credentials.
    ///
    /// Empty fields are returned as empty strings so callers can fill them
    /// from other sources. A missing file is `None`.
    pub fn read_partial(&self) -> Result<Option<StoredConfig>, ConfigStoreError> {
        match self.load() {
            Ok(config) => Ok(Some(config)),
            Err(ConfigStoreError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn load(&self) -> Result<StoredConfig, ConfigStoreError> {
        let path = self.path();
        let raw = fs::read_to_string(&path).map_err(|source| match source.kind() {
            io::ErrorKind::NotFound => ConfigStoreError::NotFound { path: path.clone() },
            _ => ConfigStoreError::Io {
                path: path.clone(),
                source,
            },
        })?;

        serde_json::from_str(&raw).map_err(|source| ConfigStoreError::Malformed { path, source })
    }

    /// Write the credential file as pretty-printed JSON, replacing any existing one.
    pub fn write(&self, config: &StoredConfig) -> Result<PathBuf, ConfigStoreError> {
        let path = self.path();
        let mut body = serde_json::to_string_pretty(config).map_err(|source| {
            ConfigStoreError::Serialize {
                path: path.clone(),
                source,
            }
        })?;
        body.push('\n');

        fs::write(&path, body).map_err(|source| ConfigStoreError::Io {
            path: path.clone(),
            source,
        })?;

        info!(path = %path.display(), "Wrote local config");
        Ok(path)
    }

    /// Delete the credential file. Returns `false` when there was nothing to delete.
    pub fn remove(&self) -> Result<bool, ConfigStoreError> {
        let path = self.path();
        match fs::remove_file(&path) {
            Ok(()) => {
                info!(path = %path.display(), "Removed local config");
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(ConfigStoreError::Io { path, source }),
        }
    }

    /// Make sure `.gitignore` in the store directory lists the credential file.
    ///
    /// Returns `true` if the file was changed.
    pub fn ensure_gitignore(&self) -> Result<bool, ConfigStoreError> {
        ensure_gitignore(&self.dir)
    }
}

/// Append [`CONFIG_FILE_NAME`] to `dir/.gitignore` unless a line already names it.
///
/// Creates the file when absent. Running it again leaves the file untouched.
pub fn ensure_gitignore(dir: &Path) -> Result<bool, ConfigStoreError> {
    let path = dir.join(GITIGNORE_FILE_NAME);

    let existing = match fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => String::new(),
        Err(source) => return Err(ConfigStoreError::Io { path, source }),
    };

    if existing.lines().any(|line| line.trim() == CONFIG_FILE_NAME) {
        return Ok(false);
    }

    let mut updated = existing;
    if !updated.is_empty() && !updated.ends_with('\n') {
        updated.push('\n');
    }
    updated.push_str(CONFIG_FILE_NAME);
    updated.push('\n');

    fs::write(&path, updated).map_err(|source| ConfigStoreError::Io {
        path: path.clone(),
        source,
    })?;

    info!(path = %path.display(), "Added {} to .gitignore", CONFIG_FILE_NAME);
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_config() -> StoredConfig {
        StoredConfig {
            api_key: "pk_live_123".to_string(),
            instance_id: "billing-api".to_string(),
            company_name: Some("Acme".to_string()),
            created_at: Some(Utc::now()),
            sdk_version: Some("0.1.0".to_string()),
        }
    }

    #[test]
    fn test_write_then_read_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = ConfigStore::new(dir.path());
        let config = sample_config();

        store.write(&config).unwrap();
        let loaded = store.read().unwrap();

        assert_eq!(loaded, config);
    }

    #[test]
    fn test_read_ignores_key_order_and_unknown_keys() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            r#"{"extra": true, "instanceId": "worker-1", "apiKey": "k"}"#,
        )
        .unwrap();

        let loaded = ConfigStore::new(dir.path()).read().unwrap();
        assert_eq!(loaded, StoredConfig::new("k", "worker-1"));
    }

    #[test]
    fn test_written_file_uses_camel_case() {
        let dir = TempDir::new().unwrap();
        let store = ConfigStore::new(dir.path());
        store.write(&sample_config()).unwrap();

        let raw = fs::read_to_string(store.path()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["apiKey"], "pk_live_123");
        assert_eq!(value["instanceId"], "billing-api");
        assert_eq!(value["companyName"], "Acme");
        assert!(value.get("createdAt").is_some());
    }

    #[test]
    fn test_read_missing_file() {
        let dir = TempDir::new().unwrap();
        let store = ConfigStore::new(dir.path());

        assert!(matches!(
            store.read(),
            Err(ConfigStoreError::NotFound { .. })
        ));
        assert!(store.read_optional().unwrap().is_none());
    }

    #[test]
    fn test_read_malformed_file() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(CONFIG_FILE_NAME), "{not json").unwrap();

        let err = ConfigStore::new(dir.path()).read().unwrap_err();
        assert!(matches!(err, ConfigStoreError::Malformed { .. }));
        assert!(err.to_string().contains("not valid JSON"));
    }

    #[test]
    fn test_read_missing_required_field() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(CONFIG_FILE_NAME), r#"{"apiKey": "k"}"#).unwrap();

        let err = ConfigStore::new(dir.path()).read().unwrap_err();
        assert!(matches!(
            err,
            ConfigStoreError::MissingField {
                field: "instanceId",
                ..
            }
        ));
    }

    #[test]
    fn test_read_partial_keeps_present_fields() {
        let dir = TempDir::new().unwrap();
        let store = ConfigStore::new(dir.path());
        assert!(store.read_partial().unwrap().is_none());

        fs::write(dir.path().join(CONFIG_FILE_NAME), r#"{"apiKey": "k"}"#).unwrap();

        let loaded = store.read_partial().unwrap().unwrap();
        assert_eq!(loaded.api_key, "k");
        assert!(loaded.instance_id.is_empty());
    }

    #[test]
    fn test_read_partial_rejects_malformed_file() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(CONFIG_FILE_NAME), "[1, 2]").unwrap();

        let err = ConfigStore::new(dir.path()).read_partial().unwrap_err();
        assert!(matches!(err, ConfigStoreError::Malformed { .. }));
    }

    #[test]
    fn test_serialize_error_is_not_reported_as_bad_json() {
        let source = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err = ConfigStoreError::Serialize {
            path: PathBuf::from("/tmp/.pulsewire.json"),
            source,
        };

        let message = err.to_string();
        assert!(message.starts_with("failed to serialize config for /tmp/.pulsewire.json"));
        assert!(!message.contains("not valid JSON"));
    }

    #[test]
    fn test_remove() {
        let dir = TempDir::new().unwrap();
        let store = ConfigStore::new(dir.path());
        store.write(&sample_config()).unwrap();

        assert!(store.remove().unwrap());
        assert!(!store.exists());
        assert!(!store.remove().unwrap());
    }

    #[test]
    fn test_ensure_gitignore_creates_file() {
        let dir = TempDir::new().unwrap();

        assert!(ensure_gitignore(dir.path()).unwrap());
        let content = fs::read_to_string(dir.path().join(".gitignore")).unwrap();
        assert_eq!(content, ".pulsewire.json\n");
    }

    #[test]
    fn test_ensure_gitignore_appends_after_missing_newline() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(".gitignore"), "target").unwrap();

        ensure_gitignore(dir.path()).unwrap();
        let content = fs::read_to_string(dir.path().join(".gitignore")).unwrap();
        assert_eq!(content, "target\n.pulsewire.json\n");
    }

    #[test]
    fn test_ensure_gitignore_is_idempotent() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(".gitignore"), "target/\n").unwrap();

        assert!(ensure_gitignore(dir.path()).unwrap());
        let first = fs::read(dir.path().join(".gitignore")).unwrap();

        assert!(!ensure_gitignore(dir.path()).unwrap());
        let second = fs::read(dir.path().join(".gitignore")).unwrap();

        assert_eq!(first, second);
    }
}
