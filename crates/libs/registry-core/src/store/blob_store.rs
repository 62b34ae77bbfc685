//! The `BlobStore` port: raw byte storage for artifact ZIPs and their side
//! artifacts, addressed by the keys built in [`crate::utils::storage_key`].

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::error::Result;

/// Raw byte storage, keyed by opaque strings.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Returns the stored bytes, or `None` if the key is absent.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Writes `bytes` at `key`, creating or overwriting it.
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<()>;

    /// Removes the object at `key`, if present.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Whether an object exists at `key`, without reading its bytes.
    async fn exists(&self, key: &str) -> Result<bool>;
}

/// The default/local adapter: blobs live as files under a root directory,
/// mirroring the key's `/`-separated path segments.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: std::path::PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<std::path::PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> Result<std::path::PathBuf> {
        if key.contains("..") {
            return Err(crate::error::Error::InvalidStorageKey(key.to_string()));
        }
        Ok(self.root.join(key))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(key)?;
        match tokio::fs::File::open(&path).await {
            Ok(mut file) => {
                let mut buf = Vec::new();
                file.read_to_end(&mut buf).await?;
                Ok(Some(buf))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn put(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp_path = path.with_extension(format!(
            "{}.tmp",
            path.extension().and_then(|e| e.to_str()).unwrap_or("")
        ));
        let mut file = tokio::fs::File::create(&tmp_path).await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        tokio::fs::rename(&tmp_path, &path).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let path = self.path_for(key)?;
        Ok(tokio::fs::try_exists(&path).await.unwrap_or(false))
    }
}
