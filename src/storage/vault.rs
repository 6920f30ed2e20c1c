//! Secret vault access.
//!
//! Wraps the keyring crate to read secrets referenced by configuration
//! placeholders from the OS-native credential store.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{Result, StorageError};

/// Read/write access to named secrets.
#[async_trait]
pub trait SecretVault: Send + Sync {
    /// Retrieves a secret, or `None` if nothing is stored under `key`.
    async fn retrieve(&self, key: &str) -> Result<Option<String>>;

    /// Stores a secret, overwriting any previous value.
    async fn store(&self, key: &str, value: &str) -> Result<()>;
}

/// [`SecretVault`] backed by the OS keychain.
///
/// Secrets are namespaced by service name. keyring calls block, so each one
/// runs on the blocking thread pool.
#[derive(Debug, Clone)]
pub struct KeyringVault {
    service_name: String,
}

impl KeyringVault {
    /// Default service name for mailbridge secrets.
    pub const DEFAULT_SERVICE: &'static str = "mailbridge";

    /// Creates a vault using the default service name.
    pub fn new() -> Self {
        Self {
            service_name: Self::DEFAULT_SERVICE.to_string(),
        }
    }

    /// Creates a vault with a custom service name.
    ///
    /// Useful for testing to avoid interfering with real secrets.
    pub fn with_service(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
        }
    }

    /// Returns the service name used for this vault.
    pub fn service_name(&self) -> &str {
        &self.service_name
    }
}

impl Default for KeyringVault {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SecretVault for KeyringVault {
    async fn retrieve(&self, key: &str) -> Result<Option<String>> {
        let service = self.service_name.clone();
        let key = key.to_string();

        tokio::task::spawn_blocking(move || {
            let entry = keyring::Entry::new(&service, &key)?;
            match entry.get_password() {
                Ok(secret) => Ok(Some(secret)),
                Err(keyring::Error::NoEntry) => Ok(None),
                Err(e) => Err(StorageError::Keyring(e)),
            }
        })
        .await
        .map_err(|e| StorageError::TaskFailed(e.to_string()))?
    }

    async fn store(&self, key: &str, value: &str) -> Result<()> {
        let service = self.service_name.clone();
        let key = key.to_string();
        let value = value.to_string();

        tokio::task::spawn_blocking(move || {
            let entry = keyring::Entry::new(&service, &key)?;
            entry.set_password(&value)?;
            Ok(())
        })
        .await
        .map_err(|e| StorageError::TaskFailed(e.to_string()))?
    }
}

/// In-memory [`SecretVault`].
#[derive(Debug, Default)]
pub struct MemoryVault {
    secrets: Mutex<HashMap<String, String>>,
}

impl MemoryVault {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a vault pre-populated with `entries`.
    pub fn with_entries<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            secrets: Mutex::new(
                entries
                    .into_iter()
                    .map(|(k, v)| (k.into(), v.into()))
                    .collect(),
            ),
        }
    }
}

#[async_trait]
impl SecretVault for MemoryVault {
    async fn retrieve(&self, key: &str) -> Result<Option<String>> {
        let secrets = self
            .secrets
            .lock()
            .map_err(|e| StorageError::TaskFailed(e.to_string()))?;
        Ok(secrets.get(key).cloned())
    }

    async fn store(&self, key: &str, value: &str) -> Result<()> {
        let mut secrets = self
            .secrets
            .lock()
            .map_err(|e| StorageError::TaskFailed(e.to_string()))?;
        secrets.insert(key.to_string(), value.to_string());
        Ok(())
    }
}
