use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::debug;

use crate::crawler::error::CrawlError;

/// Trait for artifact storage
///
/// Paths are relative to the store root; parent directories are created on write.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OutputStore: Send + Sync {
    /// Write a JSON document, pretty-printed
    async fn write_json(&self, path: &Path, value: &serde_json::Value) -> Result<(), CrawlError>;

    /// Write raw bytes (screenshots, rendered reports)
    async fn write_binary(&self, path: &Path, bytes: &[u8]) -> Result<(), CrawlError>;

    /// Create a directory and all of its parents
    async fn ensure_dir(&self, path: &Path) -> Result<(), CrawlError>;

    /// Read a JSON document back
    async fn read_json(&self, path: &Path) -> Result<serde_json::Value, CrawlError>;

    /// Recursively list files named `file_name` below `path`
    async fn find_files(&self, path: &Path, file_name: &str) -> Result<Vec<PathBuf>, CrawlError>;
}

/// Factory for creating an OutputStore implementation
pub struct OutputStoreFactory;

impl OutputStoreFactory {
    /// Create a filesystem store rooted at `root`, creating the directory
    pub async fn create(root: impl Into<PathBuf>) -> Result<Arc<dyn OutputStore>, CrawlError> {
        let store = FsOutputStore::new(root);
        store.ensure_dir(Path::new("")).await?;
        Ok(Arc::new(store))
    }
}

/// Filesystem implementation of OutputStore
#[derive(Debug, Clone)]
pub struct FsOutputStore {
    /// Root of the output tree
    root: PathBuf,
}

impl FsOutputStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        self.root.join(path)
    }

    async fn ensure_parent(&self, target: &Path) -> Result<(), CrawlError> {
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await.map_err(|e| {
                CrawlError::Persistence(format!(
                    "Failed to create directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }
        Ok(())
    }
}

#[async_trait]
impl OutputStore for FsOutputStore {
    async fn write_json(&self, path: &Path, value: &serde_json::Value) -> Result<(), CrawlError> {
        let target = self.resolve(path);
        self.ensure_parent(&target).await?;

        let contents = serde_json::to_vec_pretty(value)
            .map_err(|e| CrawlError::Persistence(format!("Failed to serialize {}: {}", path.display(), e)))?;

        fs::write(&target, contents).await.map_err(|e| {
            CrawlError::Persistence(format!("Failed to write {}: {}", target.display(), e))
        })?;

        debug!("Wrote {}", target.display());
        Ok(())
    }

    async fn write_binary(&self, path: &Path, bytes: &[u8]) -> Result<(), CrawlError> {
        let target = self.resolve(path);
        self.ensure_parent(&target).await?;

        fs::write(&target, bytes).await.map_err(|e| {
            CrawlError::Persistence(format!("Failed to write {}: {}", target.display(), e))
        })?;

        debug!("Wrote {} bytes to {}", bytes.len(), target.display());
        Ok(())
    }

    async fn ensure_dir(&self, path: &Path) -> Result<(), CrawlError> {
        let target = self.resolve(path);
        fs::create_dir_all(&target).await.map_err(|e| {
            CrawlError::Persistence(format!("Failed to create directory {}: {}", target.display(), e))
        })
    }

    async fn read_json(&self, path: &Path) -> Result<serde_json::Value, CrawlError> {
        let target = self.resolve(path);
        let contents = fs::read(&target).await.map_err(|e| {
            CrawlError::Persistence(format!("Failed to read {}: {}", target.display(), e))
        })?;

        serde_json::from_slice(&contents)
            .map_err(|e| CrawlError::Persistence(format!("Failed to parse {}: {}", target.display(), e)))
    }

    async fn find_files(&self, path: &Path, file_name: &str) -> Result<Vec<PathBuf>, CrawlError> {
        let mut found = Vec::new();
        let mut pending = vec![path.to_path_buf()];

        while let Some(dir) = pending.pop() {
            let absolute = self.resolve(&dir);
            let mut entries = match fs::read_dir(&absolute).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => {
                    return Err(CrawlError::Persistence(format!(
                        "Failed to list {}: {}",
                        absolute.display(),
                        e
                    )))
                }
            };

            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| CrawlError::Persistence(e.to_string()))?
            {
                let relative = dir.join(entry.file_name());
                let file_type = entry
                    .file_type()
                    .await
                    .map_err(|e| CrawlError::Persistence(e.to_string()))?;

                if file_type.is_dir() {
                    pending.push(relative);
                } else if entry.file_name() == file_name {
                    found.push(relative);
                }
            }
        }

        found.sort();
        Ok(found)
    }
}
