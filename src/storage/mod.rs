//! Local storage collaborators.
//!
//! - [`TokenCacheStore`] persists the serialized OAuth token cache
//! - [`SecretVault`] reads secrets referenced by configuration placeholders
//!
//! Both come with an in-memory stand-in for tests.

mod token_store;
mod vault;

pub use token_store::{FileTokenStore, MemoryTokenStore, TokenCacheStore, TOKEN_CACHE_FILE};
pub use vault::{KeyringVault, MemoryVault, SecretVault};

use thiserror::Error;

/// Errors that can occur in the storage layer.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Keychain error: {0}")]
    Keyring(#[from] keyring::Error),

    #[error("Failed to spawn blocking task: {0}")]
    TaskFailed(String),

    #[error("No per-user directory available")]
    NoDirectory,
}

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;
