//! Media storage client backed by the local filesystem.

use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};
use tokio::fs;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{StorageError, StorageResult};

/// Configuration for media storage.
#[derive(Debug, Clone)]
pub struct MediaConfig {
    /// Directory all keys are resolved against
    pub root: PathBuf,
    /// URL prefix media is served under
    pub base_url: String,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("media"),
            base_url: "/media/".to_string(),
        }
    }
}

impl MediaConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            root: std::env::var("MEDIA_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("media")),
            base_url: std::env::var("MEDIA_URL").unwrap_or_else(|_| "/media/".to_string()),
        }
    }
}

/// Media storage rooted at a local directory.
#[derive(Debug, Clone)]
pub struct MediaStorage {
    root: PathBuf,
    base_url: String,
}

impl MediaStorage {
    /// Create storage from configuration, creating the root if needed.
    pub async fn new(config: MediaConfig) -> StorageResult<Self> {
        fs::create_dir_all(&config.root).await.map_err(|e| {
            StorageError::config_error(format!(
                "cannot create media root {}: {}",
                config.root.display(),
                e
            ))
        })?;
        info!("Media storage rooted at {}", config.root.display());
        Ok(Self {
            root: config.root,
            base_url: config.base_url,
        })
    }

    /// Create from environment variables.
    pub async fn from_env() -> StorageResult<Self> {
        Self::new(MediaConfig::from_env()).await
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a key to a path under the root.
    ///
    /// Keys must be relative and may not contain `..` or root components.
    pub fn path_for(&self, key: &str) -> StorageResult<PathBuf> {
        let key_path = Path::new(key);
        if key.is_empty()
            || !key_path
                .components()
                .all(|c| matches!(c, Component::Normal(_)))
        {
            return Err(StorageError::invalid_key(key));
        }
        Ok(self.root.join(key_path))
    }

    /// Public URL for a stored key.
    pub fn url_for(&self, key: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            key.trim_start_matches('/')
        )
    }

    /// Write bytes to `key`, replacing any existing object.
    pub async fn upload_bytes(&self, data: &[u8], key: &str) -> StorageResult<()> {
        let path = self.path_for(key)?;
        debug!("Writing {} bytes to {}", data.len(), key);

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::upload_failed(e.to_string()))?;
        }

        // Write to a sibling temp file first so readers never see a partial object
        let tmp = path.with_file_name(format!(".{}.tmp", Uuid::new_v4()));
        fs::write(&tmp, data)
            .await
            .map_err(|e| StorageError::upload_failed(e.to_string()))?;
        if let Err(e) = fs::rename(&tmp, &path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(StorageError::upload_failed(e.to_string()));
        }

        Ok(())
    }

    /// Read an object into memory.
    pub async fn download_bytes(&self, key: &str) -> StorageResult<Vec<u8>> {
        let path = self.path_for(key)?;
        match fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::not_found(key))
            }
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    /// Delete an object. Returns false when it did not exist.
    pub async fn delete_object(&self, key: &str) -> StorageResult<bool> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => {
                debug!("Deleted {}", key);
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::delete_failed(format!("{}: {}", key, e))),
        }
    }

    /// Delete several objects, returning how many existed.
    pub async fn delete_objects(&self, keys: &[String]) -> StorageResult<u32> {
        let mut deleted = 0;
        for key in keys {
            if self.delete_object(key).await? {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    /// List files directly under a prefix directory.
    pub async fn list_objects(&self, prefix: &str) -> StorageResult<Vec<ObjectInfo>> {
        let dir = self.path_for(prefix)?;
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StorageError::Io(e)),
        };

        let mut objects = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let metadata = entry.metadata().await?;
            if !metadata.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') {
                continue;
            }
            objects.push(ObjectInfo {
                key: format!("{}/{}", prefix.trim_end_matches('/'), name),
                size: metadata.len(),
                last_modified: metadata.modified().ok().map(DateTime::<Utc>::from),
            });
        }

        objects.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(objects)
    }

    /// Check if an object exists.
    pub async fn exists(&self, key: &str) -> StorageResult<bool> {
        let path = self.path_for(key)?;
        Ok(fs::try_exists(&path).await?)
    }

    /// Check the media root is present and is a directory.
    pub async fn check_connectivity(&self) -> StorageResult<()> {
        let metadata = fs::metadata(&self.root).await?;
        if !metadata.is_dir() {
            return Err(StorageError::config_error(format!(
                "media root {} is not a directory",
                self.root.display()
            )));
        }
        Ok(())
    }
}

/// Information about a stored object.
#[derive(Debug, Clone)]
pub struct ObjectInfo {
    /// Object key
    pub key: String,
    /// Size in bytes
    pub size: u64,
    /// Last modification time
    pub last_modified: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn storage() -> (tempfile::TempDir, MediaStorage) {
        let dir = tempfile::tempdir().unwrap();
        let storage = MediaStorage::new(MediaConfig {
            root: dir.path().join("media"),
            base_url: "/media/".to_string(),
        })
        .await
        .unwrap();
        (dir, storage)
    }

    #[tokio::test]
    async fn upload_then_download() {
        let (_dir, storage) = storage().await;
        storage.upload_bytes(b"hello", "recipes/images/a.jpg").await.unwrap();

        assert!(storage.exists("recipes/images/a.jpg").await.unwrap());
        assert_eq!(
            storage.download_bytes("recipes/images/a.jpg").await.unwrap(),
            b"hello"
        );
    }

    #[tokio::test]
    async fn rejects_traversal_keys() {
        let (_dir, storage) = storage().await;
        assert!(matches!(
            storage.upload_bytes(b"x", "../escape.txt").await,
            Err(StorageError::InvalidKey(_))
        ));
        assert!(storage.path_for("/etc/passwd").is_err());
        assert!(storage.path_for("").is_err());
    }

    #[tokio::test]
    async fn missing_objects() {
        let (_dir, storage) = storage().await;
        assert!(matches!(
            storage.download_bytes("nope.png").await,
            Err(StorageError::NotFound(_))
        ));
        assert!(!storage.delete_object("nope.png").await.unwrap());
        assert!(storage.list_objects("exports").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn lists_files_with_keys() {
        let (_dir, storage) = storage().await;
        storage.upload_bytes(b"a", "exports/b.csv").await.unwrap();
        storage.upload_bytes(b"bb", "exports/a.csv").await.unwrap();

        let objects = storage.list_objects("exports").await.unwrap();
        let keys: Vec<_> = objects.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(keys, vec!["exports/a.csv", "exports/b.csv"]);
        assert_eq!(objects[0].size, 2);
        assert!(objects[0].last_modified.is_some());

        assert_eq!(
            storage
                .delete_objects(&["exports/a.csv".to_string(), "exports/zz.csv".to_string()])
                .await
                .unwrap(),
            1
        );
    }

    #[test]
    fn url_joins_without_double_slash() {
        let storage = MediaStorage {
            root: PathBuf::from("media"),
            base_url: "/media/".to_string(),
        };
        assert_eq!(storage.url_for("recipes/images/x.jpg"), "/media/recipes/images/x.jpg");
    }
}
