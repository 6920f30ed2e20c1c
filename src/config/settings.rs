//! Persisted adapter settings.
//!
//! Settings live in `<config dir>/config.json` (XDG or platform equivalent).
//! A caller may instead hand over a complete override document; the two
//! sources are never merged.

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::descriptor::ProviderDescriptor;
use super::placeholders::resolve_document;
use crate::domain::ConfigError;
use crate::providers::RetryPolicy;
use crate::storage::SecretVault;

/// File name of the persisted settings document.
pub const CONFIG_FILE: &str = "config.json";

/// Top-level adapter settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Mailbox the provider acts for.
    pub email: String,
    /// Back end selection and its parameters.
    pub provider: ProviderDescriptor,
    /// Network behaviour of the executor.
    pub http: HttpSettings,
    /// Where the OAuth token cache is kept; per-user data dir when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_cache_path: Option<PathBuf>,
}

/// Timeout, retry and pagination limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
    pub timeout_secs: u64,
    pub max_attempts: u32,
    pub backoff_base_secs: u64,
    pub retry_after_fallback_secs: u64,
    pub max_retry_after_secs: u64,
    pub max_pages: usize,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            max_attempts: 3,
            backoff_base_secs: 1,
            retry_after_fallback_secs: 5,
            max_retry_after_secs: 120,
            max_pages: 50,
        }
    }
}

impl HttpSettings {
    pub fn to_policy(&self) -> RetryPolicy {
        RetryPolicy {
            timeout: Duration::from_secs(self.timeout_secs),
            max_attempts: self.max_attempts.max(1),
            backoff_base: Duration::from_secs(self.backoff_base_secs),
            retry_after_fallback: Duration::from_secs(self.retry_after_fallback_secs),
            max_retry_after: Duration::from_secs(self.max_retry_after_secs),
            max_pages: self.max_pages.max(1),
        }
    }
}

impl Settings {
    /// `<config dir>/config.json` for the current user.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if no home directory is known.
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        let dirs = ProjectDirs::from("", "", "mailbridge")
            .ok_or_else(|| ConfigError::new("no per-user configuration directory available"))?;
        Ok(dirs.config_dir().join(CONFIG_FILE))
    }

    /// Reads a settings document without resolving placeholders.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file is missing, unreadable or not a
    /// settings document.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        Self::from_value(read_document(path)?)
    }

    /// Writes the settings as pretty-printed JSON, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be written.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let write_error =
            |e: std::io::Error| ConfigError::new(format!("cannot write {}: {e}", path.display()));
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(write_error)?;
        }
        let text = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::new(format!("cannot encode settings: {e}")))?;
        std::fs::write(path, text).map_err(write_error)
    }

    /// Resolves settings from `override_document` or, failing that, from the
    /// default settings file.
    ///
    /// # Errors
    ///
    /// See [`resolve_from`](Self::resolve_from).
    pub async fn resolve(
        override_document: Option<Value>,
        vault: Option<&dyn SecretVault>,
    ) -> Result<Self, ConfigError> {
        match usable_override(override_document) {
            Some(document) => Self::from_resolved(document, vault).await,
            None => Self::resolve_from(None, &Self::default_path()?, vault).await,
        }
    }

    /// All-or-nothing resolution.
    ///
    /// An override carrying a non-empty `email` is used as the entire
    /// configuration. Otherwise the document at `path` is used, and the
    /// override is ignored. Placeholders are resolved in whichever document
    /// wins.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file is needed but missing or invalid,
    /// or a placeholder cannot be resolved.
    pub async fn resolve_from(
        override_document: Option<Value>,
        path: &Path,
        vault: Option<&dyn SecretVault>,
    ) -> Result<Self, ConfigError> {
        let document = match usable_override(override_document) {
            Some(document) => document,
            None => {
                tracing::debug!(path = %path.display(), "loading persisted settings");
                read_document(path)?
            }
        };
        Self::from_resolved(document, vault).await
    }

    async fn from_resolved(
        document: Value,
        vault: Option<&dyn SecretVault>,
    ) -> Result<Self, ConfigError> {
        Self::from_value(resolve_document(document, vault).await?)
    }

    fn from_value(document: Value) -> Result<Self, ConfigError> {
        serde_json::from_value(document)
            .map_err(|e| ConfigError::new(format!("invalid settings document: {e}")))
    }
}

fn usable_override(document: Option<Value>) -> Option<Value> {
    document.filter(|doc| {
        doc.get("email")
            .and_then(Value::as_str)
            .is_some_and(|email| !email.trim().is_empty())
    })
}

fn read_document(path: &Path) -> Result<Value, ConfigError> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ConfigError::new(format!(
                "configuration file not found: {}",
                path.display()
            )))
        }
        Err(e) => {
            return Err(ConfigError::new(format!(
                "cannot read {}: {e}",
                path.display()
            )))
        }
    };
    serde_json::from_str(&text)
        .map_err(|e| ConfigError::new(format!("invalid JSON in {}: {e}", path.display())))
}
