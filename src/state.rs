//! Registry cache persistence

use crate::error::ModelError;
use crate::models::registry::{ModelRegistry, PersistedEntry};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

// ============================================================================
// Trait Definitions
// ============================================================================

/// Trait for storage backend operations
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Save content to a file path atomically
    async fn save(&self, path: &Path, content: &str) -> Result<()>;

    /// Load content from a file path
    /// Returns None if file doesn't exist
    async fn load(&self, path: &Path) -> Result<Option<String>>;
}

// ============================================================================
// Production Implementation
// ============================================================================

/// Production storage backend using tokio::fs
pub struct FileSystemStorage;

impl FileSystemStorage {
    pub fn new() -> Self {
        Self
    }
}

impl Default for FileSystemStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorageBackend for FileSystemStorage {
    async fn save(&self, path: &Path, content: &str) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create cache directory: {:?}", parent))?;
        }

        // Atomic write: write to temp file, then rename
        let temp_file = path.with_extension("tmp");

        let mut file = fs::File::create(&temp_file)
            .await
            .context("Failed to create temp cache file")?;
        file.write_all(content.as_bytes())
            .await
            .context("Failed to write cache file")?;
        file.sync_all().await.context("Failed to sync cache file")?;

        fs::rename(&temp_file, path)
            .await
            .context("Failed to rename temp cache file")?;

        Ok(())
    }

    async fn load(&self, path: &Path) -> Result<Option<String>> {
        match fs::read_to_string(path).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read cache file: {:?}", path)),
        }
    }
}

// ============================================================================
// Registry store
// ============================================================================

/// Single writer for the registry cache file
///
/// The cache is a JSON object keyed by model id holding
/// `{status, local_path, validation_status}`.
pub struct RegistryStore {
    cache_file: PathBuf,
    storage: Arc<dyn StorageBackend>,
    write_lock: Mutex<()>,
}

impl RegistryStore {
    /// Create a store with a custom storage backend
    pub fn new_with_storage(cache_file: PathBuf, storage: Arc<dyn StorageBackend>) -> Self {
        Self {
            cache_file,
            storage,
            write_lock: Mutex::new(()),
        }
    }

    /// Create a store backed by the filesystem
    pub fn new(cache_file: PathBuf) -> Self {
        Self::new_with_storage(cache_file, Arc::new(FileSystemStorage::new()))
    }

    pub fn cache_file(&self) -> &Path {
        &self.cache_file
    }

    /// Write the current registry state
    pub async fn save(&self, registry: &ModelRegistry) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        // Snapshot under the write lock so saves land in order
        let snapshot = registry.persisted_snapshot().await;
        let content =
            serde_json::to_string_pretty(&snapshot).context("Failed to serialize registry")?;

        self.storage.save(&self.cache_file, &content).await?;

        tracing::debug!(
            path = ?self.cache_file,
            models = snapshot.len(),
            "Registry cache saved"
        );

        Ok(())
    }

    /// Save, logging a failure instead of returning it
    pub async fn persist(&self, registry: &ModelRegistry) {
        if let Err(e) = self.save(registry).await {
            let err = ModelError::Persistence(format!("{:#}", e));
            tracing::error!(path = ?self.cache_file, error = %err, "Registry cache write failed");
        }
    }

    /// Read the cache file; a missing file is an empty cache
    pub async fn load(&self) -> Result<BTreeMap<String, PersistedEntry>> {
        let Some(content) = self.storage.load(&self.cache_file).await? else {
            tracing::info!(path = ?self.cache_file, "No registry cache found, starting from catalog");
            return Ok(BTreeMap::new());
        };

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse registry cache: {:?}", self.cache_file))
    }

    /// Merge the cache into the registry, ignoring an unreadable cache
    pub async fn restore(&self, registry: &ModelRegistry) -> usize {
        match self.load().await {
            Ok(cached) => {
                let restored = registry.restore(cached).await;
                tracing::info!(restored = restored, "Registry state restored");
                restored
            }
            Err(e) => {
                tracing::warn!(
                    path = ?self.cache_file,
                    error = %e,
                    "Registry cache unreadable, starting from catalog"
                );
                0
            }
        }
    }
}

// ============================================================================
// Mock Implementation for Testing
// ============================================================================
