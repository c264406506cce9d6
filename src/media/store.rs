use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;

/// File/blob storage for downloaded images. Paths are relative to the store root.
#[async_trait]
pub trait ContentStore: Send + Sync {
    async fn put(&self, path: &str, bytes: &[u8]) -> Result<()>;
    async fn exists(&self, path: &str) -> Result<bool>;
    /// Deletes a stored file. Missing files are not an error.
    async fn remove(&self, path: &str) -> Result<()>;
    /// Creates the directory if it is missing; a no-op otherwise.
    async fn ensure_dir(&self, dir: &str) -> Result<()>;
}

/// Content store on the local filesystem (the "public disk").
#[derive(Debug, Clone)]
pub struct LocalContentStore {
    root: PathBuf,
}

impl LocalContentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn full_path(&self, relative: &str) -> PathBuf {
        self.root.join(relative.trim_start_matches('/'))
    }
}

#[async_trait]
impl ContentStore for LocalContentStore {
    async fn put(&self, path: &str, bytes: &[u8]) -> Result<()> {
        let full = self.full_path(path);
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&full, bytes)
            .await
            .with_context(|| format!("cannot write {}", full.display()))
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        Ok(tokio::fs::try_exists(self.full_path(path)).await?)
    }

    async fn remove(&self, path: &str) -> Result<()> {
        let full = self.full_path(path);
        match tokio::fs::remove_file(&full).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("cannot remove {}", full.display())),
        }
    }

    async fn ensure_dir(&self, dir: &str) -> Result<()> {
        let full = self.full_path(dir);
        if !tokio::fs::try_exists(&full).await? {
            tokio::fs::create_dir_all(&full)
                .await
                .with_context(|| format!("cannot create content directory {}", full.display()))?;
        }
        Ok(())
    }
}
