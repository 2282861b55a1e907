//! Snapshot bucket implementations and typed access to the published artifacts.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::config::{RegistryConfig, POPULARITY_FILE, REGISTRY_FILE, REGISTRY_VERSION_FILE};
use crate::contract::{ClientError, SnapshotStore};
use crate::model::{PopularitySnapshot, RegistrySnapshot, SnapshotVersion};

/// Bucket kept in memory. Counts writes so tests can assert a pass was a no-op.
#[derive(Debug, Default)]
pub struct InMemorySnapshotStore {
    objects: Mutex<HashMap<(String, String), Vec<u8>>>,
    puts: AtomicUsize,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    pub fn object(&self, bucket: &str, path: &str) -> Option<Vec<u8>> {
        let objects = self.objects.lock().unwrap_or_else(|p| p.into_inner());
        objects.get(&(bucket.to_string(), path.to_string())).cloned()
    }
}

#[async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn get(&self, bucket: &str, path: &str) -> Result<Option<Vec<u8>>, ClientError> {
        Ok(self.object(bucket, path))
    }

    async fn put(&self, bucket: &str, path: &str, bytes: Vec<u8>) -> Result<(), ClientError> {
        let mut objects = self.objects.lock().unwrap_or_else(|p| p.into_inner());
        objects.insert((bucket.to_string(), path.to_string()), bytes);
        self.puts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn upload_file(&self, bucket: &str, path: &str, local: &Path) -> Result<(), ClientError> {
        let bytes = tokio::fs::read(local).await?;
        self.put(bucket, path, bytes).await
    }
}

/// Bucket mapped onto a directory tree: `<root>/<bucket>/<path>`.
#[derive(Debug, Clone)]
pub struct LocalFsSnapshotStore {
    root: PathBuf,
}

impl LocalFsSnapshotStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        LocalFsSnapshotStore { root: root.into() }
    }

    fn object_path(&self, bucket: &str, path: &str) -> Result<PathBuf, ClientError> {
        if path.split('/').any(|segment| segment == "..") || bucket.contains('/') {
            return Err(format!("refusing object path {bucket}/{path}").into());
        }
        Ok(self.root.join(bucket).join(path))
    }

    async fn ensure_parent(target: &Path) -> Result<(), ClientError> {
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl SnapshotStore for LocalFsSnapshotStore {
    async fn get(&self, bucket: &str, path: &str) -> Result<Option<Vec<u8>>, ClientError> {
        let target = self.object_path(bucket, path)?;
        match tokio::fs::read(&target).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Box::new(e)),
        }
    }

    async fn put(&self, bucket: &str, path: &str, bytes: Vec<u8>) -> Result<(), ClientError> {
        let target = self.object_path(bucket, path)?;
        Self::ensure_parent(&target).await?;
        tracing::debug!(path = %target.display(), size = bytes.len(), "Writing snapshot object");
        tokio::fs::write(&target, bytes).await?;
        Ok(())
    }

    async fn upload_file(&self, bucket: &str, path: &str, local: &Path) -> Result<(), ClientError> {
        let target = self.object_path(bucket, path)?;
        Self::ensure_parent(&target).await?;
        tokio::fs::copy(local, &target).await?;
        Ok(())
    }
}

async fn read_json<T: DeserializeOwned + Default>(
    store: &dyn SnapshotStore,
    bucket: &str,
    path: &str,
) -> Result<T, ClientError> {
    match store.get(bucket, path).await? {
        Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
        None => {
            tracing::warn!(bucket, path, "Snapshot object missing, starting from empty");
            Ok(T::default())
        }
    }
}

async fn write_json<T: Serialize>(
    store: &dyn SnapshotStore,
    bucket: &str,
    path: &str,
    value: &T,
) -> Result<(), ClientError> {
    store.put(bucket, path, serde_json::to_vec(value)?).await
}

pub async fn read_registry(
    store: &dyn SnapshotStore,
    config: &RegistryConfig,
) -> Result<RegistrySnapshot, ClientError> {
    read_json(store, &config.bucket, REGISTRY_FILE).await
}

pub async fn write_registry(
    store: &dyn SnapshotStore,
    config: &RegistryConfig,
    registry: &RegistrySnapshot,
) -> Result<(), ClientError> {
    write_json(store, &config.bucket, REGISTRY_FILE, registry).await
}

pub async fn read_popularity(
    store: &dyn SnapshotStore,
    config: &RegistryConfig,
) -> Result<PopularitySnapshot, ClientError> {
    read_json(store, &config.bucket, POPULARITY_FILE).await
}

pub async fn write_popularity(
    store: &dyn SnapshotStore,
    config: &RegistryConfig,
    popularity: &PopularitySnapshot,
) -> Result<(), ClientError> {
    write_json(store, &config.bucket, POPULARITY_FILE, popularity).await
}

pub async fn read_version(
    store: &dyn SnapshotStore,
    config: &RegistryConfig,
) -> Result<SnapshotVersion, ClientError> {
    read_json(store, &config.bucket, REGISTRY_VERSION_FILE).await
}

pub async fn write_version(
    store: &dyn SnapshotStore,
    config: &RegistryConfig,
    version: SnapshotVersion,
) -> Result<(), ClientError> {
    write_json(store, &config.bucket, REGISTRY_VERSION_FILE, &version).await
}

/// Blob path of a published extension archive.
pub fn archive_path(name: &str, version: &str) -> String {
    format!("extensions/{name}-{version}.zip")
}
