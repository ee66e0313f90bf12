//! Object storage for model artifacts.

/// Google Cloud Storage uploads.
pub mod gcs;

use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::{
    config::EnvironmentConfig,
    error::{Result, TrainerError},
};

pub use gcs::GcsObjectStore;

/// Bucket-style blob store.
pub trait ObjectStore: Send + Sync {
    /// Writes `bytes` at `key` and returns the object URI.
    fn put(&self, key: &str, bytes: &[u8]) -> Result<String>;

    /// Uploads a local file to `key`.
    fn upload_file(&self, path: &Path, key: &str) -> Result<String> {
        let bytes = fs::read(path).map_err(|err| {
            TrainerError::Storage(format!("reading {}: {err}", path.display()))
        })?;
        self.put(key, &bytes)
    }
}

/// Bucket mirrored onto a local directory (`<root>/<bucket>/<key>`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalObjectStore {
    bucket_dir: PathBuf,
}

impl LocalObjectStore {
    /// Store rooted at `root` for `bucket`.
    #[must_use]
    pub fn new(root: impl AsRef<Path>, bucket: &str) -> Self {
        Self {
            bucket_dir: root.as_ref().join(bucket),
        }
    }

    /// Directory standing in for the bucket.
    #[must_use]
    pub fn bucket_dir(&self) -> &Path {
        &self.bucket_dir
    }
}

impl ObjectStore for LocalObjectStore {
    fn put(&self, key: &str, bytes: &[u8]) -> Result<String> {
        if key.split('/').any(|part| part == "..") {
            return Err(TrainerError::Storage(format!("invalid object key {key:?}")));
        }
        let target = self.bucket_dir.join(key);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&target, bytes)?;
        Ok(format!("file://{}", target.display()))
    }
}

/// Store for the configured bucket: `file://` roots stay local, anything
/// else goes to Google Cloud Storage.
pub fn from_env(env: &EnvironmentConfig) -> Result<Box<dyn ObjectStore>> {
    match env.storage_root.as_deref() {
        Some(root) if root.starts_with("file://") => Ok(Box::new(LocalObjectStore::new(
            root.trim_start_matches("file://"),
            &env.bucket_name,
        ))),
        _ => Ok(Box::new(GcsObjectStore::from_env(&env.bucket_name)?)),
    }
}
