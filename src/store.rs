//! Blob storage abstraction and implementations.
//!
//! Blobs are addressed by (logical name, fingerprint), so two generations
//! sharing an unchanged resource share one stored blob, and evicting a key
//! can never free bytes another logical name still references.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};

use crate::error::Result;

/// Storage key for one fingerprinted revision of a resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlobKey {
    /// Logical resource name.
    pub name: String,
    /// Fingerprint the bytes were stored under.
    pub fingerprint: String,
}

impl BlobKey {
    /// Creates a key from name and fingerprint.
    pub fn new(name: impl Into<String>, fingerprint: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fingerprint: fingerprint.into(),
        }
    }

    /// Returns a filesystem-safe identifier for this key.
    ///
    /// Logical names are path-like and fingerprints are opaque, so neither
    /// can be used in a file name directly; the SHA-256 of both is.
    #[must_use]
    pub fn storage_id(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.name.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.fingerprint.as_bytes());
        let hash = hasher.finalize();

        let mut id = String::with_capacity(hash.len() * 2);
        for byte in hash {
            id.push_str(&format!("{byte:02x}"));
        }
        id
    }
}

impl fmt::Display for BlobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.fingerprint)
    }
}

/// Abstraction over blob storage for testability.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Stores bytes under a key, replacing any previous value.
    async fn put(&self, key: &BlobKey, bytes: Bytes) -> Result<()>;

    /// Returns the stored bytes for a key, or `None` if absent.
    async fn get(&self, key: &BlobKey) -> Result<Option<Bytes>>;

    /// Deletes a key. Deleting an absent key is not an error.
    async fn delete(&self, key: &BlobKey) -> Result<()>;

    /// Returns true if the key is stored.
    async fn contains(&self, key: &BlobKey) -> Result<bool>;
}

#[async_trait]
impl<T: BlobStore + ?Sized> BlobStore for std::sync::Arc<T> {
    async fn put(&self, key: &BlobKey, bytes: Bytes) -> Result<()> {
        (**self).put(key, bytes).await
    }

    async fn get(&self, key: &BlobKey) -> Result<Option<Bytes>> {
        (**self).get(key).await
    }

    async fn delete(&self, key: &BlobKey) -> Result<()> {
        (**self).delete(key).await
    }

    async fn contains(&self, key: &BlobKey) -> Result<bool> {
        (**self).contains(key).await
    }
}

/// In-memory blob store for tests and ephemeral caches.
#[derive(Debug, Default)]
pub struct MemoryStore {
    blobs: Mutex<HashMap<BlobKey, Bytes>>,
}

impl MemoryStore {
    /// Creates an empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored blobs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.blobs.lock().len()
    }

    /// Returns true if no blobs are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blobs.lock().is_empty()
    }
}

#[async_trait]
impl BlobStore for MemoryStore {
    async fn put(&self, key: &BlobKey, bytes: Bytes) -> Result<()> {
        self.blobs.lock().insert(key.clone(), bytes);
        Ok(())
    }

    async fn get(&self, key: &BlobKey) -> Result<Option<Bytes>> {
        Ok(self.blobs.lock().get(key).cloned())
    }

    async fn delete(&self, key: &BlobKey) -> Result<()> {
        self.blobs.lock().remove(key);
        Ok(())
    }

    async fn contains(&self, key: &BlobKey) -> Result<bool> {
        Ok(self.blobs.lock().contains_key(key))
    }
}

/// Disk-backed blob store.
///
/// Each blob lives in a single file named by [`BlobKey::storage_id`]. Writes
/// go to a `.part` file first and are renamed into place, so a crashed write
/// never leaves a torn blob behind.
#[derive(Debug, Clone)]
pub struct DiskStore {
    root: PathBuf,
}

impl DiskStore {
    /// Creates a store rooted at the given directory.
    ///
    /// The directory is created lazily on first write.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the root directory of the store.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn blob_path(&self, key: &BlobKey) -> PathBuf {
        self.root.join(format!("{}.blob", key.storage_id()))
    }
}

#[async_trait]
impl BlobStore for DiskStore {
    async fn put(&self, key: &BlobKey, bytes: Bytes) -> Result<()> {
        tokio::fs::create_dir_all(&self.root).await?;

        let path = self.blob_path(key);
        let part = path.with_extension("blob.part");

        tokio::fs::write(&part, &bytes).await?;
        tokio::fs::rename(&part, &path).await?;
        Ok(())
    }

    async fn get(&self, key: &BlobKey) -> Result<Option<Bytes>> {
        match tokio::fs::read(self.blob_path(key)).await {
            Ok(bytes) => Ok(Some(Bytes::from(bytes))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, key: &BlobKey) -> Result<()> {
        match tokio::fs::remove_file(self.blob_path(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn contains(&self, key: &BlobKey) -> Result<bool> {
        Ok(tokio::fs::metadata(self.blob_path(key)).await.is_ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn key(name: &str, fingerprint: &str) -> BlobKey {
        BlobKey::new(name, fingerprint)
    }

    #[test]
    fn storage_id_is_stable_hex() {
        let id = key("index.html", "h1").storage_id();
        assert_eq!(id.len(), 64);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(id, key("index.html", "h1").storage_id());
    }

    #[test]
    fn storage_id_separates_name_and_fingerprint() {
        // "ab" + "c" must not collide with "a" + "bc".
        assert_ne!(key("ab", "c").storage_id(), key("a", "bc").storage_id());
        assert_ne!(key("a", "h1").storage_id(), key("a", "h2").storage_id());
        assert_ne!(key("a", "h1").storage_id(), key("b", "h1").storage_id());
    }

    #[test]
    fn blob_key_display() {
        assert_eq!(key("app.js", "abc").to_string(), "app.js@abc");
    }

    #[tokio::test]
    async fn memory_store_roundtrip() {
        let store = MemoryStore::new();
        let k = key("a", "h1");

        assert_eq!(store.get(&k).await.unwrap(), None);
        store.put(&k, Bytes::from_static(b"bytes")).await.unwrap();
        assert!(store.contains(&k).await.unwrap());
        assert_eq!(
            store.get(&k).await.unwrap(),
            Some(Bytes::from_static(b"bytes"))
        );

        store.delete(&k).await.unwrap();
        assert!(!store.contains(&k).await.unwrap());
        // Deleting again is fine.
        store.delete(&k).await.unwrap();
    }

    #[tokio::test]
    async fn disk_store_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = DiskStore::new(dir.path());
        let k = key("css/app.css", "deadbeef");

        assert_eq!(store.get(&k).await.unwrap(), None);
        store.put(&k, Bytes::from_static(b"body{}")).await.unwrap();
        assert!(store.contains(&k).await.unwrap());
        assert_eq!(
            store.get(&k).await.unwrap(),
            Some(Bytes::from_static(b"body{}"))
        );

        store.delete(&k).await.unwrap();
        assert_eq!(store.get(&k).await.unwrap(), None);
        store.delete(&k).await.unwrap();
    }

    #[tokio::test]
    async fn disk_store_put_replaces_existing() {
        let dir = TempDir::new().unwrap();
        let store = DiskStore::new(dir.path());
        let k = key("a", "h1");

        store.put(&k, Bytes::from_static(b"old")).await.unwrap();
        store.put(&k, Bytes::from_static(b"new")).await.unwrap();
        assert_eq!(
            store.get(&k).await.unwrap(),
            Some(Bytes::from_static(b"new"))
        );
    }

    #[tokio::test]
    async fn disk_store_leaves_no_part_files() {
        let dir = TempDir::new().unwrap();
        let store = DiskStore::new(dir.path());
        store
            .put(&key("a", "h1"), Bytes::from_static(b"x"))
            .await
            .unwrap();

        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().is_some_and(|ext| ext == "part"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn distinct_fingerprints_stored_separately() {
        let dir = TempDir::new().unwrap();
        let store = DiskStore::new(dir.path());

        store
            .put(&key("a", "h1"), Bytes::from_static(b"one"))
            .await
            .unwrap();
        store
            .put(&key("a", "h2"), Bytes::from_static(b"two"))
            .await
            .unwrap();

        assert_eq!(
            store.get(&key("a", "h1")).await.unwrap(),
            Some(Bytes::from_static(b"one"))
        );
        assert_eq!(
            store.get(&key("a", "h2")).await.unwrap(),
            Some(Bytes::from_static(b"two"))
        );
    }
}
