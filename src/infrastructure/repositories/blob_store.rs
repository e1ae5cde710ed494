use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use tokio::io::AsyncWriteExt;

#[derive(Debug, thiserror::Error)]
pub enum BlobStoreError {
    #[error("blob not found: {0}")]
    NotFound(String),
    #[error("invalid blob key: {0}")]
    InvalidKey(String),
    #[error("blob store error: {0}")]
    Backend(String),
}

/// Durable storage for final and partial audio artifacts.
///
/// `put` returns an opaque reference that `get` and `delete` accept. A
/// successful `put` means the bytes are durable.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<String, BlobStoreError>;

    async fn get(&self, blob_ref: &str) -> Result<Vec<u8>, BlobStoreError>;

    /// Deleting a missing blob is not an error
    async fn delete(&self, blob_ref: &str) -> Result<(), BlobStoreError>;
}

/// Filesystem blob store rooted at a directory; references are root-relative keys
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, key: &str) -> Result<PathBuf, BlobStoreError> {
        let relative = Path::new(key);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
        if key.is_empty() || escapes {
            return Err(BlobStoreError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<String, BlobStoreError> {
        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| BlobStoreError::Backend(e.to_string()))?;
        }

        write_durably(&path, &bytes)
            .await
            .map_err(|e| BlobStoreError::Backend(e.to_string()))?;

        tracing::debug!(key = key, size_bytes = bytes.len(), "Blob stored");
        Ok(key.to_string())
    }

    async fn get(&self, blob_ref: &str) -> Result<Vec<u8>, BlobStoreError> {
        let path = self.resolve(blob_ref)?;
        tokio::fs::read(&path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => BlobStoreError::NotFound(blob_ref.to_string()),
            _ => BlobStoreError::Backend(e.to_string()),
        })
    }

    async fn delete(&self, blob_ref: &str) -> Result<(), BlobStoreError> {
        let path = self.resolve(blob_ref)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(BlobStoreError::Backend(e.to_string())),
        }
    }
}

/// Staging file next to the target; the rename only happens once the bytes
/// are on disk, and the parent directory is synced so the rename survives a
/// crash too.
async fn write_durably(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let staging = staging_path(path);

    let mut file = tokio::fs::File::create(&staging).await?;
    file.write_all(bytes).await?;
    file.sync_all().await?;
    drop(file);

    if let Err(e) = tokio::fs::rename(&staging, path).await {
        let _ = tokio::fs::remove_file(&staging).await;
        return Err(e);
    }

    match path.parent() {
        Some(parent) => sync_dir(parent).await,
        None => Ok(()),
    }
}

#[cfg(unix)]
async fn sync_dir(dir: &Path) -> std::io::Result<()> {
    tokio::fs::File::open(dir).await?.sync_all().await
}

#[cfg(not(unix))]
async fn sync_dir(_dir: &Path) -> std::io::Result<()> {
    Ok(())
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    path.with_file_name(name)
}
