//! Durable storage for the serialized OAuth token cache.
//!
//! The store only moves bytes; decoding and the change flag belong to
//! [`TokenCache`](crate::auth::TokenCache). Writes replace the whole document.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use directories::ProjectDirs;

use super::{Result, StorageError};

/// File name of the token cache inside the per-user data directory.
pub const TOKEN_CACHE_FILE: &str = "token_cache.json";

/// Loads and saves the serialized token cache.
#[async_trait]
pub trait TokenCacheStore: Send + Sync {
    /// Returns the stored bytes, or `None` when nothing has been saved yet.
    async fn load(&self) -> Result<Option<Vec<u8>>>;

    /// Replaces the stored bytes.
    async fn save(&self, bytes: &[u8]) -> Result<()>;
}

/// [`TokenCacheStore`] backed by a single JSON file.
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at `<data dir>/token_cache.json` for the current user.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NoDirectory`] if no home directory is known.
    pub fn default_location() -> Result<Self> {
        let dirs = ProjectDirs::from("", "", "mailbridge").ok_or(StorageError::NoDirectory)?;
        Ok(Self::new(dirs.data_local_dir().join(TOKEN_CACHE_FILE)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl TokenCacheStore for FileTokenStore {
    async fn load(&self) -> Result<Option<Vec<u8>>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "no token cache on disk");
                Ok(None)
            }
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    async fn save(&self, bytes: &[u8]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let staging = self.path.with_extension("json.tmp");
        tokio::fs::write(&staging, bytes).await?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&staging, std::fs::Permissions::from_mode(0o600)).await?;
        }
        tokio::fs::rename(&staging, &self.path).await?;

        tracing::debug!(path = %self.path.display(), bytes = bytes.len(), "token cache written");
        Ok(())
    }
}

/// In-memory [`TokenCacheStore`] that counts saves.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    bytes: Mutex<Option<Vec<u8>>>,
    saves: AtomicUsize,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store that starts out holding `bytes`.
    pub fn with_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: Mutex::new(Some(bytes.into())),
            saves: AtomicUsize::new(0),
        }
    }

    /// Number of completed `save` calls.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// Current contents.
    pub fn snapshot(&self) -> Option<Vec<u8>> {
        self.bytes.lock().ok().and_then(|bytes| bytes.clone())
    }
}

#[async_trait]
impl TokenCacheStore for MemoryTokenStore {
    async fn load(&self) -> Result<Option<Vec<u8>>> {
        let bytes = self
            .bytes
            .lock()
            .map_err(|e| StorageError::TaskFailed(e.to_string()))?;
        Ok(bytes.clone())
    }

    async fn save(&self, bytes: &[u8]) -> Result<()> {
        let mut stored = self
            .bytes
            .lock()
            .map_err(|e| StorageError::TaskFailed(e.to_string()))?;
        *stored = Some(bytes.to_vec());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_file_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTokenStore::new(dir.path().join("absent.json"));
        assert_eq!(store.load().await.unwrap(), None);
    }

    #[tokio::test]
    async fn save_creates_parent_and_replaces_contents() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTokenStore::new(dir.path().join("nested").join(TOKEN_CACHE_FILE));

        store.save(b"{\"v\":1}").await.unwrap();
        store.save(b"{\"v\":2}").await.unwrap();

        assert_eq!(store.load().await.unwrap(), Some(b"{\"v\":2}".to_vec()));
        assert!(!store.path().with_extension("json.tmp").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn saved_file_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let store = FileTokenStore::new(dir.path().join(TOKEN_CACHE_FILE));
        store.save(b"{}").await.unwrap();

        let mode = std::fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[tokio::test]
    async fn memory_store_counts_saves() {
        let store = MemoryTokenStore::with_bytes(b"seed".to_vec());
        assert_eq!(store.load().await.unwrap(), Some(b"seed".to_vec()));

        store.save(b"next").await.unwrap();
        assert_eq!(store.save_count(), 1);
        assert_eq!(store.snapshot(), Some(b"next".to_vec()));
    }
}
