//! File-backed payload storage for snap images.
//!
//! Payloads are opaque bytes keyed by UUID.  Every operation is wrapped in a
//! bounded timeout so a wedged disk cannot stall a request indefinitely, and
//! `delete` is idempotent so the sweep can safely retry.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::fs;
use tracing::debug;
use uuid::Uuid;

use crate::error::CoreError;
use crate::Result;

/// Verify that a resolved path stays within the expected base directory.
/// Prevents path traversal.
fn ensure_within(base: &Path, target: &Path) -> Result<PathBuf> {
    let canonical_base = base.canonicalize().unwrap_or_else(|_| base.to_path_buf());
    let mut resolved = canonical_base.clone();
    for component in target
        .strip_prefix(&canonical_base)
        .unwrap_or(target)
        .components()
    {
        match component {
            std::path::Component::Normal(c) => resolved.push(c),
            std::path::Component::ParentDir => {
                return Err(CoreError::Invalid("path traversal detected".to_string()));
            }
            _ => {} // RootDir, CurDir, Prefix
        }
    }
    if !resolved.starts_with(&canonical_base) {
        return Err(CoreError::Invalid("path traversal detected".to_string()));
    }
    Ok(resolved)
}

#[derive(Debug, Clone)]
pub struct PayloadStore {
    base_path: PathBuf,
    max_size: usize,
    op_timeout: Duration,
}

impl PayloadStore {
    /// Create the store, creating the backing directory if missing.
    pub async fn new(
        base_path: PathBuf,
        max_size: usize,
        op_timeout: Duration,
    ) -> Result<Self> {
        fs::create_dir_all(&base_path).await.map_err(|e| {
            CoreError::Storage(format!(
                "failed to create payload directory '{}': {}",
                base_path.display(),
                e
            ))
        })?;

        tracing::info!(path = %base_path.display(), "payload store initialized");

        Ok(Self {
            base_path,
            max_size,
            op_timeout,
        })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Store payload bytes and return the new opaque handle.
    ///
    /// A timed-out or failed write returns [`CoreError::Storage`]; the caller
    /// must not create any record pointing at the handle in that case.
    pub async fn store(&self, data: &[u8], mime: &str) -> Result<Uuid> {
        if data.is_empty() {
            return Err(CoreError::Invalid("empty payload".to_string()));
        }
        if data.len() > self.max_size {
            return Err(CoreError::Invalid(format!(
                "payload too large: {} bytes (max {})",
                data.len(),
                self.max_size
            )));
        }

        let id = Uuid::new_v4();
        let path = self.safe_payload_path(&id)?;

        self.bounded(fs::write(&path, data), "write").await?;

        debug!(id = %id, size = data.len(), mime, "stored payload");
        Ok(id)
    }

    /// Fetch payload bytes by handle.
    pub async fn fetch(&self, id: Uuid) -> Result<Vec<u8>> {
        let path = self.safe_payload_path(&id)?;

        if !path.exists() {
            return Err(CoreError::NotFound);
        }

        let data = self.bounded(fs::read(&path), "read").await?;

        debug!(id = %id, size = data.len(), "retrieved payload");
        Ok(data)
    }

    /// Delete a payload.  Idempotent: returns `Ok(false)` when the payload
    /// is already gone, an error only on a real backend failure.
    pub async fn delete(&self, id: Uuid) -> Result<bool> {
        let path = self.safe_payload_path(&id)?;

        if !path.exists() {
            return Ok(false);
        }

        self.bounded(fs::remove_file(&path), "delete").await?;

        debug!(id = %id, "deleted payload");
        Ok(true)
    }

    /// Run a filesystem future under the configured timeout.
    async fn bounded<T>(
        &self,
        fut: impl std::future::Future<Output = std::io::Result<T>>,
        op: &str,
    ) -> Result<T> {
        match tokio::time::timeout(self.op_timeout, fut).await {
            Ok(Ok(v)) => Ok(v),
            Ok(Err(e)) => Err(CoreError::Storage(format!("payload {op} failed: {e}"))),
            Err(_) => Err(CoreError::Storage(format!(
                "payload {op} timed out after {:?}",
                self.op_timeout
            ))),
        }
    }

    /// Safe payload path that validates against traversal.
    fn safe_payload_path(&self, id: &Uuid) -> Result<PathBuf> {
        let raw = self.base_path.join(id.to_string());
        ensure_within(&self.base_path, &raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn test_store() -> (PayloadStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = PayloadStore::new(
            dir.path().to_path_buf(),
            1024 * 1024,
            Duration::from_secs(5),
        )
        .await
        .unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn store_and_fetch() {
        let (store, _dir) = test_store().await;
        let data = b"jpeg-bytes";

        let id = store.store(data, "image/jpeg").await.unwrap();
        let retrieved = store.fetch(id).await.unwrap();
        assert_eq!(retrieved, data);
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let (store, _dir) = test_store().await;
        let id = store.store(b"delete-me", "image/png").await.unwrap();

        assert!(store.delete(id).await.unwrap());
        assert!(!store.delete(id).await.unwrap());
        assert!(matches!(store.fetch(id).await, Err(CoreError::NotFound)));
    }

    #[tokio::test]
    async fn missing_payload_is_not_found() {
        let (store, _dir) = test_store().await;
        assert!(matches!(
            store.fetch(Uuid::new_v4()).await,
            Err(CoreError::NotFound)
        ));
    }

    #[tokio::test]
    async fn empty_payload_rejected() {
        let (store, _dir) = test_store().await;
        assert!(store.store(b"", "image/png").await.is_err());
    }

    #[tokio::test]
    async fn oversized_payload_rejected() {
        let dir = TempDir::new().unwrap();
        let store = PayloadStore::new(dir.path().to_path_buf(), 4, Duration::from_secs(5))
            .await
            .unwrap();
        assert!(store.store(b"too big", "image/png").await.is_err());
    }
}
