//! Storage Gateway: object storage for uploaded files.
//!
//! Objects are addressed by a relative path of the form
//! `{user_id}/{uuid}.{ext}`. The filesystem backend writes atomically
//! (temp file + rename) and hands out two kinds of URL:
//!
//! - public URLs: `{public_base_url}/files/{path}`
//! - signed URLs: the public URL plus `expires` (unix seconds) and an
//!   HMAC-SHA256 `signature` over `{path}:{expires}`
//!
//! ## Example
//!
//! ```rust,ignore
//! use secondlight_db::file_storage::{FilesystemBackend, StorageBackend};
//!
//! let storage = FilesystemBackend::new("/var/lib/secondlight/files", "http://localhost:3000", b"key");
//! let path = storage.upload(&storage_path(user_id, file_id, "pdf"), &bytes).await?;
//! let url = storage.signed_url(&path, Duration::from_secs(3600))?;
//! ```

use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

use secondlight_core::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

/// Storage backend trait for different storage implementations.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Store bytes at `path`, returning the stable path of the object.
    async fn upload(&self, path: &str, data: &[u8]) -> Result<String>;

    /// Read an object.
    async fn download(&self, path: &str) -> Result<Vec<u8>>;

    /// Delete an object. Missing objects are not an error.
    async fn delete(&self, path: &str) -> Result<()>;

    /// Check if an object exists.
    async fn exists(&self, path: &str) -> Result<bool>;

    /// Unauthenticated URL for an object.
    fn public_url(&self, path: &str) -> String;

    /// Expiring URL for an object.
    fn signed_url(&self, path: &str, ttl: Duration) -> Result<String>;
}

/// Build the storage path for one uploaded file.
pub fn storage_path(user_id: Uuid, file_id: Uuid, extension: &str) -> String {
    let ext: String = extension
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .take(8)
        .collect::<String>()
        .to_ascii_lowercase();
    if ext.is_empty() {
        format!("{}/{}.bin", user_id, file_id)
    } else {
        format!("{}/{}.{}", user_id, file_id, ext)
    }
}

/// Reject paths that could escape the storage root.
pub fn validate_object_path(path: &str) -> Result<()> {
    if path.is_empty() {
        return Err(Error::Storage("empty object path".to_string()));
    }
    let ok = Path::new(path)
        .components()
        .all(|c| matches!(c, Component::Normal(_)));
    if !ok {
        return Err(Error::Storage(format!("invalid object path: {}", path)));
    }
    Ok(())
}

/// Filesystem storage backend.
pub struct FilesystemBackend {
    base_path: PathBuf,
    public_base_url: String,
    signing_key: Vec<u8>,
}

impl FilesystemBackend {
    /// Create a new filesystem backend.
    pub fn new(
        base_path: impl Into<PathBuf>,
        public_base_url: impl Into<String>,
        signing_key: impl AsRef<[u8]>,
    ) -> Self {
        Self {
            base_path: base_path.into(),
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
            signing_key: signing_key.as_ref().to_vec(),
        }
    }

    fn full_path(&self, path: &str) -> Result<PathBuf> {
        validate_object_path(path)?;
        Ok(self.base_path.join(path))
    }

    fn signature(&self, path: &str, expires: i64) -> Result<String> {
        let mut mac = HmacSha256::new_from_slice(&self.signing_key)
            .map_err(|e| Error::Config(format!("invalid signing key: {}", e)))?;
        mac.update(format!("{}:{}", path, expires).as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Check a signed URL's parameters against `now` (unix seconds).
    pub fn verify_signed_url(&self, path: &str, expires: i64, signature: &str, now: i64) -> bool {
        if expires < now {
            return false;
        }
        let Ok(provided) = hex::decode(signature) else {
            return false;
        };
        let Ok(mut mac) = HmacSha256::new_from_slice(&self.signing_key) else {
            return false;
        };
        mac.update(format!("{}:{}", path, expires).as_bytes());
        mac.verify_slice(&provided).is_ok()
    }

    /// Validate that the storage root is writable and readable.
    ///
    /// Run at startup to catch permission and mount problems early.
    pub async fn validate(&self) -> std::result::Result<(), String> {
        let test_dir = self.base_path.join(".health-check");
        let test_file = test_dir.join(".write_check");

        fs::create_dir_all(&test_dir)
            .await
            .map_err(|e| format!("create_dir_all({:?}): {}", test_dir, e))?;

        let data = b"storage-health-check";
        fs::write(&test_file, data)
            .await
            .map_err(|e| format!("write({:?}): {}", test_file, e))?;

        let read_back = fs::read(&test_file)
            .await
            .map_err(|e| format!("read({:?}): {}", test_file, e))?;
        if read_back != data {
            return Err("read-back mismatch".to_string());
        }

        fs::remove_file(&test_file)
            .await
            .map_err(|e| format!("remove_file({:?}): {}", test_file, e))?;
        let _ = fs::remove_dir(&test_dir).await;

        Ok(())
    }
}

#[async_trait]
impl StorageBackend for FilesystemBackend {
    async fn upload(&self, path: &str, data: &[u8]) -> Result<String> {
        let full_path = self.full_path(path)?;
        debug!(subsystem = "storage", storage_path = %path, size = data.len(), "upload");

        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| {
                warn!(parent = %parent.display(), error = %e, "storage: create_dir_all failed");
                e
            })?;
        }

        let temp_path = full_path.with_extension("tmp");
        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(data).await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&temp_path, &full_path).await.map_err(|e| {
            warn!(from = %temp_path.display(), to = %full_path.display(), error = %e, "storage: rename failed");
            e
        })?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&full_path, std::fs::Permissions::from_mode(0o644)).await?;
        }

        Ok(path.to_string())
    }

    async fn download(&self, path: &str) -> Result<Vec<u8>> {
        let full_path = self.full_path(path)?;
        match fs::read(&full_path).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::NotFound(format!("object {}", path)))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let full_path = self.full_path(path)?;
        if fs::try_exists(&full_path).await? {
            fs::remove_file(full_path).await?;
        }
        Ok(())
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let full_path = self.full_path(path)?;
        Ok(fs::try_exists(full_path).await?)
    }

    fn public_url(&self, path: &str) -> String {
        format!("{}/files/{}", self.public_base_url, path)
    }

    fn signed_url(&self, path: &str, ttl: Duration) -> Result<String> {
        validate_object_path(path)?;
        let expires = Utc::now().timestamp() + ttl.as_secs() as i64;
        let signature = self.signature(path, expires)?;
        Ok(format!(
            "{}?expires={}&signature={}",
            self.public_url(path),
            expires,
            signature
        ))
    }
}
