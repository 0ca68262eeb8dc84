//! Durable key/value store backed by one file per key
//!
//! Writes go to a temp file in the same directory followed by a rename, so
//! a reader sees either the previous value or the new one - never a torn
//! write. Absence of a key is distinct from an empty value.

use crate::keys;
use base64::Engine as _;
use std::path::{Path, PathBuf};
use tokio::fs;
use upd_errors::{Error, PersistError};

/// Subdirectory whose keys survive a powerwash
const SAFE_DIR: &str = "powerwash-safe";

/// Durable mapping from namespaced keys to scalar or blob values
#[derive(Debug, Clone)]
pub struct ProgressStore {
    root: PathBuf,
}

impl ProgressStore {
    /// Open (creating if needed) a store rooted at `root`
    ///
    /// # Errors
    /// Returns an error if the directories cannot be created.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, Error> {
        let root = root.into();
        for dir in [root.clone(), root.join(SAFE_DIR)] {
            fs::create_dir_all(&dir).await.map_err(|e| {
                Error::from(PersistError::StoreUnusable {
                    path: dir.display().to_string(),
                    message: e.to_string(),
                })
            })?;
        }
        Ok(Self { root })
    }

    fn key_path(&self, key: &str) -> Result<PathBuf, Error> {
        if key.is_empty()
            || !key
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            return Err(PersistError::InvalidKey(key.to_string()).into());
        }
        if keys::POWERWASH_SAFE.contains(&key) {
            Ok(self.root.join(SAFE_DIR).join(key))
        } else {
            Ok(self.root.join(key))
        }
    }

    /// Read a string value, `None` when the key was never written
    ///
    /// # Errors
    /// Returns an error on I/O failure other than absence.
    pub async fn get_string(&self, key: &str) -> Result<Option<String>, Error> {
        let path = self.key_path(key)?;
        match fs::read_to_string(&path).await {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(PersistError::ReadFailed {
                key: key.to_string(),
                message: e.to_string(),
            }
            .into()),
        }
    }

    /// Atomically write a string value
    ///
    /// # Errors
    /// Returns an error on I/O failure.
    pub async fn set_string(&self, key: &str, value: &str) -> Result<(), Error> {
        let path = self.key_path(key)?;
        write_atomic(&path, value.as_bytes())
            .await
            .map_err(|e| {
                PersistError::WriteFailed {
                    key: key.to_string(),
                    message: e.to_string(),
                }
                .into()
            })
    }

    /// Read an integer value
    ///
    /// # Errors
    /// Returns an error on I/O failure or if the stored value is not an
    /// integer.
    pub async fn get_i64(&self, key: &str) -> Result<Option<i64>, Error> {
        match self.get_string(key).await? {
            None => Ok(None),
            Some(text) => text.trim().parse::<i64>().map(Some).map_err(|_| {
                PersistError::TypeMismatch {
                    key: key.to_string(),
                    expected: "integer".to_string(),
                }
                .into()
            }),
        }
    }

    /// Atomically write an integer value
    ///
    /// # Errors
    /// Returns an error on I/O failure.
    pub async fn set_i64(&self, key: &str, value: i64) -> Result<(), Error> {
        self.set_string(key, &value.to_string()).await
    }

    /// Read a binary blob (stored base64-encoded)
    ///
    /// # Errors
    /// Returns an error on I/O failure or if the stored value is not
    /// valid base64.
    pub async fn get_blob(&self, key: &str) -> Result<Option<Vec<u8>>, Error> {
        match self.get_string(key).await? {
            None => Ok(None),
            Some(text) => base64::engine::general_purpose::STANDARD
                .decode(text.trim())
                .map(Some)
                .map_err(|_| {
                    PersistError::TypeMismatch {
                        key: key.to_string(),
                        expected: "base64 blob".to_string(),
                    }
                    .into()
                }),
        }
    }

    /// Atomically write a binary blob
    ///
    /// # Errors
    /// Returns an error on I/O failure.
    pub async fn set_blob(&self, key: &str, value: &[u8]) -> Result<(), Error> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(value);
        self.set_string(key, &encoded).await
    }

    /// Whether the key has ever been written
    pub async fn exists(&self, key: &str) -> bool {
        match self.key_path(key) {
            Ok(path) => fs::try_exists(&path).await.unwrap_or(false),
            Err(_) => false,
        }
    }

    /// Remove a key; removing an absent key is a no-op
    ///
    /// # Errors
    /// Returns an error on I/O failure other than absence.
    pub async fn remove(&self, key: &str) -> Result<(), Error> {
        let path = self.key_path(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(PersistError::WriteFailed {
                key: key.to_string(),
                message: e.to_string(),
            }
            .into()),
        }
    }

    /// Clear every key outside the powerwash-safe subset
    ///
    /// # Errors
    /// Returns an error if the store directory cannot be scanned.
    pub async fn reset_for_powerwash(&self) -> Result<(), Error> {
        let mut entries = fs::read_dir(&self.root).await.map_err(|e| {
            Error::from(PersistError::StoreUnusable {
                path: self.root.display().to_string(),
                message: e.to_string(),
            })
        })?;
        while let Some(entry) = entries.next_entry().await.map_err(Error::from)? {
            let path = entry.path();
            if path.is_file() {
                fs::remove_file(&path)
                    .await
                    .map_err(|e| Error::io_with_path(&e, &path))?;
            }
        }
        Ok(())
    }

    /// Write the powerwash marker artifact at `marker_path`, requesting a
    /// factory reset on next boot
    ///
    /// # Errors
    /// Returns an error carrying the marker path on I/O failure.
    pub async fn write_powerwash_marker(marker_path: &Path) -> Result<(), Error> {
        write_atomic(marker_path, keys::POWERWASH_COMMAND.as_bytes())
            .await
            .map_err(|e| Error::io_with_path(&e, marker_path))
    }
}

/// Write via temp file + rename in the same directory
async fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let tmp = match (path.parent(), path.file_name()) {
        (Some(dir), Some(name)) => {
            let mut tmp_name = std::ffi::OsString::from(".");
            tmp_name.push(name);
            tmp_name.push(".tmp");
            dir.join(tmp_name)
        }
        _ => {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "path has no parent directory",
            ))
        }
    };
    fs::write(&tmp, contents).await?;
    fs::rename(&tmp, path).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn absence_is_not_zero() {
        let dir = tempdir().unwrap();
        let store = ProgressStore::open(dir.path()).await.unwrap();

        assert_eq!(store.get_i64("current-bytes-downloaded").await.unwrap(), None);
        store.set_i64("current-bytes-downloaded", 0).await.unwrap();
        assert_eq!(
            store.get_i64("current-bytes-downloaded").await.unwrap(),
            Some(0)
        );
    }

    #[tokio::test]
    async fn empty_string_distinct_from_absent() {
        let dir = tempdir().unwrap();
        let store = ProgressStore::open(dir.path()).await.unwrap();

        assert_eq!(store.get_string("signature").await.unwrap(), None);
        store.set_string("signature", "").await.unwrap();
        assert_eq!(
            store.get_string("signature").await.unwrap(),
            Some(String::new())
        );
    }

    #[tokio::test]
    async fn blob_round_trip() {
        let dir = tempdir().unwrap();
        let store = ProgressStore::open(dir.path()).await.unwrap();

        let blob = vec![0u8, 1, 254, 255];
        store.set_blob("signature-blob", &blob).await.unwrap();
        assert_eq!(store.get_blob("signature-blob").await.unwrap(), Some(blob));
    }

    #[tokio::test]
    async fn rejects_bad_key_names() {
        let dir = tempdir().unwrap();
        let store = ProgressStore::open(dir.path()).await.unwrap();
        assert!(store.set_string("../escape", "x").await.is_err());
        assert!(store.set_string("", "x").await.is_err());
        assert!(store.set_string("Upper", "x").await.is_err());
    }

    #[tokio::test]
    async fn non_integer_value_is_type_mismatch() {
        let dir = tempdir().unwrap();
        let store = ProgressStore::open(dir.path()).await.unwrap();
        store.set_string("payload-attempt-number", "abc").await.unwrap();
        assert!(store.get_i64("payload-attempt-number").await.is_err());
    }

    #[tokio::test]
    async fn powerwash_preserves_safe_subset() {
        let dir = tempdir().unwrap();
        let store = ProgressStore::open(dir.path()).await.unwrap();

        store.set_i64(keys::PEER_NUM_ATTEMPTS, 4).await.unwrap();
        store.set_i64(keys::CURRENT_BYTES_DOWNLOADED, 100).await.unwrap();
        store.set_string(keys::UPDATE_STATE, "{}").await.unwrap();

        store.reset_for_powerwash().await.unwrap();

        assert_eq!(store.get_i64(keys::PEER_NUM_ATTEMPTS).await.unwrap(), Some(4));
        assert_eq!(store.get_i64(keys::CURRENT_BYTES_DOWNLOADED).await.unwrap(), None);
        assert!(!store.exists(keys::UPDATE_STATE).await);
    }

    #[tokio::test]
    async fn powerwash_marker_contains_command() {
        let dir = tempdir().unwrap();
        let marker = dir.path().join("factory_install_reset");
        ProgressStore::write_powerwash_marker(&marker).await.unwrap();
        let contents = tokio::fs::read_to_string(&marker).await.unwrap();
        assert_eq!(contents, keys::POWERWASH_COMMAND);
    }
}
