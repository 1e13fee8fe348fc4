//! Blob storage adapters for the save-archive cold tier.
//!
//! Two back-ends behind the `BlobStore` port: a local directory (names
//! with slashes become nested directories, parents are created on
//! demand) and an S3-compatible object store for MinIO deployments.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use object_store::aws::AmazonS3Builder;
use object_store::path::Path as ObjectPath;
use object_store::{ObjectStore, PutPayload};
use serde_json::Value;

use crate::config::{StorageConfig, StorageKind};
use crate::error::EngineError;
use crate::infrastructure::ports::{BlobStore, StorageError};

/// Build the configured blob backend. Unknown kinds are rejected at
/// config parse time, so this only fails on backend construction.
pub fn blob_store_from_config(config: &StorageConfig) -> Result<Arc<dyn BlobStore>, EngineError> {
    match config.kind {
        StorageKind::Local => Ok(Arc::new(LocalBlobStore::new(&config.base_path))),
        StorageKind::Minio => {
            let store = ObjectBlobStore::new(
                &config.endpoint,
                &config.bucket,
                &config.access_key,
                &config.secret_key,
            )
            .map_err(|e| EngineError::config(format!("object store init failed: {e}")))?;
            Ok(Arc::new(store))
        }
    }
}

// =============================================================================
// Local directory backend
// =============================================================================

pub struct LocalBlobStore {
    base_path: PathBuf,
}

impl LocalBlobStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    fn full_path(&self, name: &str) -> PathBuf {
        let mut path = self.base_path.clone();
        for segment in name.split('/').filter(|s| !s.is_empty()) {
            path.push(segment);
        }
        path
    }
}

fn io_err(err: std::io::Error) -> StorageError {
    StorageError::Backend(err.to_string())
}

fn walk_json_files(root: &Path, base: &Path, out: &mut Vec<String>) -> std::io::Result<()> {
    if !root.exists() {
        return Ok(());
    }
    for entry in std::fs::read_dir(root)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            walk_json_files(&path, base, out)?;
        } else if path.extension().is_some_and(|ext| ext == "json") {
            if let Ok(rel) = path.strip_prefix(base) {
                let name = rel
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                out.push(name);
            }
        }
    }
    Ok(())
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn save_json(&self, name: &str, value: &Value) -> Result<(), StorageError> {
        let path = self.full_path(name);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }
        let bytes = serde_json::to_vec_pretty(value)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        tokio::fs::write(&path, bytes).await.map_err(io_err)
    }

    async fn load_json(&self, name: &str) -> Result<Option<Value>, StorageError> {
        let path = self.full_path(name);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_err(e)),
        };
        // A corrupt blob reads as absent rather than failing the caller.
        Ok(serde_json::from_slice(&bytes).ok())
    }

    async fn delete(&self, name: &str) -> Result<bool, StorageError> {
        let path = self.full_path(name);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(io_err(e)),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let mut names = Vec::new();
        walk_json_files(&self.base_path, &self.base_path, &mut names).map_err(io_err)?;
        names.retain(|n| n.starts_with(prefix));
        names.sort();
        Ok(names)
    }

    async fn exists(&self, name: &str) -> Result<bool, StorageError> {
        Ok(self.full_path(name).exists())
    }
}

// =============================================================================
// S3-compatible backend (MinIO)
// =============================================================================

pub struct ObjectBlobStore {
    store: Arc<dyn ObjectStore>,
}

impl ObjectBlobStore {
    pub fn new(
        endpoint: &str,
        bucket: &str,
        access_key: &str,
        secret_key: &str,
    ) -> Result<Self, StorageError> {
        let store = AmazonS3Builder::new()
            .with_endpoint(endpoint)
            .with_bucket_name(bucket)
            .with_access_key_id(access_key)
            .with_secret_access_key(secret_key)
            .with_region("us-east-1")
            .with_allow_http(true)
            .build()
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(Self {
            store: Arc::new(store),
        })
    }
}

fn object_err(err: object_store::Error) -> StorageError {
    StorageError::Backend(err.to_string())
}

#[async_trait]
impl BlobStore for ObjectBlobStore {
    async fn save_json(&self, name: &str, value: &Value) -> Result<(), StorageError> {
        let bytes = serde_json::to_vec(value)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        self.store
            .put(&ObjectPath::from(name), PutPayload::from(bytes))
            .await
            .map_err(object_err)?;
        Ok(())
    }

    async fn load_json(&self, name: &str) -> Result<Option<Value>, StorageError> {
        let result = match self.store.get(&ObjectPath::from(name)).await {
            Ok(result) => result,
            Err(object_store::Error::NotFound { .. }) => return Ok(None),
            Err(e) => return Err(object_err(e)),
        };
        let bytes = result.bytes().await.map_err(object_err)?;
        Ok(serde_json::from_slice(&bytes).ok())
    }

    async fn delete(&self, name: &str) -> Result<bool, StorageError> {
        match self.store.delete(&ObjectPath::from(name)).await {
            Ok(()) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(object_err(e)),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let prefix_path = ObjectPath::from(prefix.trim_end_matches('/'));
        let mut stream = self.store.list(Some(&prefix_path));
        let mut names = Vec::new();
        while let Some(meta) = stream.next().await {
            names.push(meta.map_err(object_err)?.location.to_string());
        }
        names.sort();
        Ok(names)
    }

    async fn exists(&self, name: &str) -> Result<bool, StorageError> {
        match self.store.head(&ObjectPath::from(name)).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(object_err(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn save_load_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = LocalBlobStore::new(dir.path());
        let value = json!({"session_id": "s1", "history": []});
        store.save_json("saves/s1.json", &value).await.expect("save");
        let loaded = store.load_json("saves/s1.json").await.expect("load");
        assert_eq!(loaded, Some(value));
    }

    #[tokio::test]
    async fn slashes_become_nested_directories() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = LocalBlobStore::new(dir.path());
        store
            .save_json("saves/deep/nested/s2.json", &json!({}))
            .await
            .expect("save");
        assert!(dir.path().join("saves/deep/nested/s2.json").exists());
    }

    #[tokio::test]
    async fn load_missing_is_none() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = LocalBlobStore::new(dir.path());
        assert_eq!(store.load_json("saves/none.json").await.expect("load"), None);
    }

    #[tokio::test]
    async fn corrupt_blob_reads_as_absent() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir_all(dir.path().join("saves")).expect("mkdir");
        std::fs::write(dir.path().join("saves/bad.json"), b"{not json").expect("write");
        let store = LocalBlobStore::new(dir.path());
        assert_eq!(store.load_json("saves/bad.json").await.expect("load"), None);
    }

    #[tokio::test]
    async fn delete_reports_presence() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = LocalBlobStore::new(dir.path());
        store.save_json("saves/s1.json", &json!({})).await.expect("save");
        assert!(store.delete("saves/s1.json").await.expect("delete"));
        assert!(!store.delete("saves/s1.json").await.expect("delete"));
    }

    #[tokio::test]
    async fn list_filters_by_prefix() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = LocalBlobStore::new(dir.path());
        store.save_json("saves/a.json", &json!({})).await.expect("save");
        store.save_json("saves/b.json", &json!({})).await.expect("save");
        store.save_json("exports/c.json", &json!({})).await.expect("save");
        let names = store.list("saves/").await.expect("list");
        assert_eq!(names, vec!["saves/a.json", "saves/b.json"]);
    }

    #[tokio::test]
    async fn exists_reflects_saves() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = LocalBlobStore::new(dir.path());
        assert!(!store.exists("saves/s1.json").await.expect("exists"));
        store.save_json("saves/s1.json", &json!({})).await.expect("save");
        assert!(store.exists("saves/s1.json").await.expect("exists"));
    }
}
