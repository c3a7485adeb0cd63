use std::path::{Path, PathBuf};

use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum BlobError {
    #[error("blob {0} not found")]
    NotFound(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Typed wrapper over the blob store collaborator: `Put`, `Get`,
/// `Delete`, `Stat`, keyed by opaque `blob_key` strings.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, key: &str, data: Vec<u8>) -> Result<(), BlobError>;
    async fn get(&self, key: &str) -> Result<Vec<u8>, BlobError>;
    async fn delete(&self, key: &str) -> Result<(), BlobError>;
    /// Returns the blob's size in bytes, or `None` if it does not exist.
    async fn stat(&self, key: &str) -> Result<Option<u64>, BlobError>;
}

/// Content-addressed filesystem blob store. Writes are atomic: data lands in
/// a `.tmp` sibling file and is renamed into place, so a reader never
/// observes a partially written blob.
pub struct FilesystemBlobStore {
    root: PathBuf,
}

impl FilesystemBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(sanitize_key(key))
    }
}

/// Blob keys are `{job_id}/{stage}/{name}`; turn the path
/// separators into a filesystem-safe form without colliding across keys.
fn sanitize_key(key: &str) -> PathBuf {
    let mut path = PathBuf::new();
    for part in key.split('/') {
        if !part.is_empty() {
            path.push(part);
        }
    }
    path
}

#[async_trait]
impl BlobStore for FilesystemBlobStore {
    async fn put(&self, key: &str, data: Vec<u8>) -> Result<(), BlobError> {
        let path = self.path_for(key);
        tokio::task::spawn_blocking(move || write_atomic(&path, &data))
            .await
            .map_err(|err| BlobError::Io(std::io::Error::other(err)))?
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, BlobError> {
        let path = self.path_for(key);
        let key = key.to_string();
        tokio::task::spawn_blocking(move || {
            std::fs::read(&path).map_err(|err| {
                if err.kind() == std::io::ErrorKind::NotFound {
                    BlobError::NotFound(key)
                } else {
                    BlobError::Io(err)
                }
            })
        })
        .await
        .map_err(|err| BlobError::Io(std::io::Error::other(err)))?
    }

    async fn delete(&self, key: &str) -> Result<(), BlobError> {
        let path = self.path_for(key);
        tokio::task::spawn_blocking(move || match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(BlobError::Io(err)),
        })
        .await
        .map_err(|err| BlobError::Io(std::io::Error::other(err)))?
    }

    async fn stat(&self, key: &str) -> Result<Option<u64>, BlobError> {
        let path = self.path_for(key);
        tokio::task::spawn_blocking(move || match std::fs::metadata(&path) {
            Ok(meta) => Ok(Some(meta.len())),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(BlobError::Io(err)),
        })
        .await
        .map_err(|err| BlobError::Io(std::io::Error::other(err)))?
    }
}

fn write_atomic(path: &Path, data: &[u8]) -> Result<(), BlobError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, data)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}
