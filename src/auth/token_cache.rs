//! Serializable OAuth token cache.
//!
//! The cache is a plain owned value. Loading and saving are pure functions
//! over bytes; where those bytes live is up to a
//! [`TokenCacheStore`](crate::storage::TokenCacheStore). Every mutation that
//! changes content sets a change flag so callers write back only when needed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

const CACHE_VERSION: u32 = 1;

/// Errors decoding or encoding a token cache document.
#[derive(Debug, Error)]
pub enum TokenCacheError {
    #[error("malformed token cache: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("unsupported token cache version {0}")]
    UnsupportedVersion(u32),
}

/// Tokens held for one (account, tenant) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedAccount {
    pub username: String,
    pub tenant_id: String,
    pub client_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub scopes: Vec<String>,
}

impl CachedAccount {
    fn matches(&self, username: &str, tenant_id: &str) -> bool {
        self.username.eq_ignore_ascii_case(username) && self.tenant_id == tenant_id
    }

    /// Seconds the cached access token remains valid beyond `skew_secs`.
    pub fn remaining_lifetime(&self, now: DateTime<Utc>, skew_secs: i64) -> Option<u64> {
        self.access_token.as_ref()?;
        let remaining = (self.expires_at? - now).num_seconds();
        (remaining > skew_secs).then_some(remaining as u64)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CacheDocument {
    version: u32,
    #[serde(default)]
    accounts: Vec<CachedAccount>,
}

/// In-memory view of the persisted token cache.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenCache {
    accounts: Vec<CachedAccount>,
    changed: bool,
}

impl TokenCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes a cache document. Empty input is an empty cache.
    ///
    /// # Errors
    ///
    /// Returns [`TokenCacheError`] when the bytes are not a cache document.
    pub fn deserialize(bytes: &[u8]) -> Result<Self, TokenCacheError> {
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::new());
        }
        let document: CacheDocument = serde_json::from_slice(bytes)?;
        if document.version != CACHE_VERSION {
            return Err(TokenCacheError::UnsupportedVersion(document.version));
        }
        Ok(Self {
            accounts: document.accounts,
            changed: false,
        })
    }

    /// Encodes the cache as a JSON document.
    pub fn serialize(&self) -> Result<Vec<u8>, TokenCacheError> {
        let document = CacheDocument {
            version: CACHE_VERSION,
            accounts: self.accounts.clone(),
        };
        Ok(serde_json::to_vec_pretty(&document)?)
    }

    /// Whether content changed since load or the last [`mark_persisted`](Self::mark_persisted).
    pub fn has_state_changed(&self) -> bool {
        self.changed
    }

    /// Clears the change flag after a successful write.
    pub fn mark_persisted(&mut self) {
        self.changed = false;
    }

    pub fn accounts(&self) -> &[CachedAccount] {
        &self.accounts
    }

    /// Finds the entry for `username` (case-insensitive) in `tenant_id`.
    pub fn find(&self, username: &str, tenant_id: &str) -> Option<&CachedAccount> {
        self.accounts.iter().find(|a| a.matches(username, tenant_id))
    }

    /// Inserts or replaces the entry for the account's (username, tenant).
    ///
    /// The change flag is only set when the stored content differs.
    pub fn upsert(&mut self, account: CachedAccount) {
        match self
            .accounts
            .iter_mut()
            .find(|a| a.matches(&account.username, &account.tenant_id))
        {
            Some(existing) if *existing == account => {}
            Some(existing) => {
                *existing = account;
                self.changed = true;
            }
            None => {
                self.accounts.push(account);
                self.changed = true;
            }
        }
    }

    /// Drops the entry for (`username`, `tenant_id`). Returns whether one existed.
    pub fn remove(&mut self, username: &str, tenant_id: &str) -> bool {
        let before = self.accounts.len();
        self.accounts.retain(|a| !a.matches(username, tenant_id));
        let removed = self.accounts.len() != before;
        self.changed |= removed;
        removed
    }
}
