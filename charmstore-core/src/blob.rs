//! Content-addressed blob storage
//!
//! The store keeps charm bundles in a [`BlobStore`]: a flat, content-addressed
//! byte store keyed by SHA-256. [`BlobWriter`] is the capture sink the publish
//! path streams bundle bytes through; it accumulates the running hash and
//! total length, and only lands the blob on an explicit `commit`. Dropping a
//! writer without committing discards the bytes.
//!
//! Two implementations are provided: [`MemoryBlobStore`] for tests and
//! [`FileBlobStore`] over a local directory.

use crate::error::{Error, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt::Debug;
use std::io::{self, Cursor, Read, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, RwLock};

/// Compute SHA-256 of bytes as a lowercase hex string.
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Identity of a committed blob.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlobRef {
    /// Hex SHA-256 of the blob bytes
    pub sha256: String,
    /// Blob length in bytes
    pub size: u64,
    /// Storage handle the blob can be read back by
    pub handle: String,
}

/// Content-addressed byte storage
///
/// `put` is idempotent: writing the same content twice yields the same handle.
#[async_trait]
pub trait BlobStore: Debug + Send + Sync {
    /// Store bytes under their content hash, returning the handle.
    async fn put(&self, sha256_hex: &str, bytes: &[u8]) -> Result<String>;

    /// Read a blob back by handle.
    ///
    /// Returns `Error::NotFound` when no blob exists at the handle.
    async fn read(&self, handle: &str) -> Result<Vec<u8>>;

    /// Check whether a blob exists at the handle.
    async fn exists(&self, handle: &str) -> Result<bool>;
}

// ============================================================================
// BlobWriter
// ============================================================================

/// Streaming capture sink for a blob being published
///
/// Implements `std::io::Write`; the hash and length are updated as bytes
/// flow through. `commit` lands the captured bytes in the blob store.
pub struct BlobWriter {
    store: Arc<dyn BlobStore>,
    hasher: Sha256,
    buf: Vec<u8>,
}

impl BlobWriter {
    /// Open a writer that will commit into the given store.
    pub fn new(store: Arc<dyn BlobStore>) -> Self {
        BlobWriter {
            store,
            hasher: Sha256::new(),
            buf: Vec::new(),
        }
    }

    /// Bytes captured so far.
    pub fn len(&self) -> u64 {
        self.buf.len() as u64
    }

    /// Whether any bytes have been captured.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Land the captured bytes and return their identity.
    pub async fn commit(self) -> Result<BlobRef> {
        let sha256 = hex::encode(self.hasher.finalize());
        let size = self.buf.len() as u64;
        let handle = self.store.put(&sha256, &self.buf).await?;
        Ok(BlobRef {
            sha256,
            size,
            handle,
        })
    }
}

impl Write for BlobWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.hasher.update(buf);
        self.buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Debug for BlobWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlobWriter")
            .field("captured_bytes", &self.buf.len())
            .finish()
    }
}

// ============================================================================
// BlobReader
// ============================================================================

/// Owned read stream over a blob's bytes
///
/// Dropping the reader closes the stream.
#[derive(Debug)]
pub struct BlobReader {
    inner: Cursor<Vec<u8>>,
}

impl BlobReader {
    /// Wrap blob bytes in a reader.
    pub fn new(bytes: Vec<u8>) -> Self {
        BlobReader {
            inner: Cursor::new(bytes),
        }
    }

    /// Total blob length in bytes.
    pub fn len(&self) -> u64 {
        self.inner.get_ref().len() as u64
    }

    /// Whether the blob is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.get_ref().is_empty()
    }

    /// Consume the reader, returning the underlying bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.inner.into_inner()
    }
}

impl Read for BlobReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

// ============================================================================
// MemoryBlobStore
// ============================================================================

/// In-memory blob store for tests
#[derive(Debug, Clone, Default)]
pub struct MemoryBlobStore {
    data: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl MemoryBlobStore {
    /// Create a new empty memory blob store
    pub fn new() -> Self {
        Self::default()
    }

    fn handle_for(sha256_hex: &str) -> String {
        format!("charm:memory://blobs/{sha256_hex}")
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, sha256_hex: &str, bytes: &[u8]) -> Result<String> {
        let handle = Self::handle_for(sha256_hex);
        self.data
            .write()
            .expect("RwLock poisoned")
            .insert(handle.clone(), bytes.to_vec());
        Ok(handle)
    }

    async fn read(&self, handle: &str) -> Result<Vec<u8>> {
        self.data
            .read()
            .expect("RwLock poisoned")
            .get(handle)
            .cloned()
            .ok_or(Error::NotFound)
    }

    async fn exists(&self, handle: &str) -> Result<bool> {
        Ok(self
            .data
            .read()
            .expect("RwLock poisoned")
            .contains_key(handle))
    }
}

// ============================================================================
// FileBlobStore
// ============================================================================

/// Blob store over a local directory
///
/// Blobs land at `<base>/blobs/<sha256>`; handles are
/// `charm:file://blobs/<sha256>`.
#[derive(Debug, Clone)]
pub struct FileBlobStore {
    base: PathBuf,
}

impl FileBlobStore {
    /// Create a file blob store rooted at the given directory.
    pub fn new(base: impl Into<PathBuf>) -> Self {
        FileBlobStore { base: base.into() }
    }

    /// Base directory blobs are stored under.
    pub fn base_path(&self) -> &Path {
        &self.base
    }

    fn handle_for(sha256_hex: &str) -> String {
        format!("charm:file://blobs/{sha256_hex}")
    }

    /// Resolve a handle to a path under the base directory.
    ///
    /// Rejects absolute paths and parent traversal.
    fn resolve(&self, handle: &str) -> Result<PathBuf> {
        let rel = handle
            .strip_prefix("charm:file://")
            .ok_or_else(|| Error::storage(format!("not a file blob handle: {handle}")))?;
        let p = Path::new(rel);
        if p.is_absolute()
            || p.components()
                .any(|c| matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_)))
        {
            return Err(Error::storage(format!(
                "invalid blob path {rel:?}: must be relative without '..'"
            )));
        }
        Ok(self.base.join(p))
    }
}

#[async_trait]
impl BlobStore for FileBlobStore {
    async fn put(&self, sha256_hex: &str, bytes: &[u8]) -> Result<String> {
        let handle = Self::handle_for(sha256_hex);
        let path = self.resolve(&handle)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::io(format!("failed to create {}: {e}", parent.display())))?;
        }
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| Error::io(format!("failed to write {}: {e}", path.display())))?;
        Ok(handle)
    }

    async fn read(&self, handle: &str) -> Result<Vec<u8>> {
        let path = self.resolve(handle)?;
        tokio::fs::read(&path).await.map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                Error::NotFound
            } else {
                Error::io(format!("failed to read {}: {e}", path.display()))
            }
        })
    }

    async fn exists(&self, handle: &str) -> Result<bool> {
        let path = self.resolve(handle)?;
        match tokio::fs::metadata(&path).await {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::io(format!("failed to stat {}: {e}", path.display()))),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const REV_ZERO_SHA: &str = "319095521ac8a62fa1e8423351973512ecca8928c9f62025e37de57c9ef07a53";

    #[tokio::test]
    async fn test_writer_captures_hash_and_size() {
        let store: Arc<dyn BlobStore> = Arc::new(MemoryBlobStore::new());
        let mut writer = BlobWriter::new(store.clone());
        writer.write_all(b"charm-").unwrap();
        writer.write_all(b"revision-0").unwrap();
        assert_eq!(writer.len(), 16);

        let blob = writer.commit().await.unwrap();
        assert_eq!(blob.sha256, REV_ZERO_SHA);
        assert_eq!(blob.size, 16);

        let bytes = store.read(&blob.handle).await.unwrap();
        assert_eq!(bytes, b"charm-revision-0");
    }

    #[tokio::test]
    async fn test_uncommitted_writer_discards() {
        let store: Arc<dyn BlobStore> = Arc::new(MemoryBlobStore::new());
        {
            let mut writer = BlobWriter::new(store.clone());
            writer.write_all(b"partial").unwrap();
        }
        let handle = format!("charm:memory://blobs/{}", sha256_hex(b"partial"));
        assert!(!store.exists(&handle).await.unwrap());
    }

    #[tokio::test]
    async fn test_memory_store_not_found() {
        let store = MemoryBlobStore::new();
        assert!(matches!(
            store.read("charm:memory://blobs/missing").await,
            Err(Error::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_memory_store_put_is_idempotent() {
        let store = MemoryBlobStore::new();
        let sha = sha256_hex(b"data");
        let h1 = store.put(&sha, b"data").await.unwrap();
        let h2 = store.put(&sha, b"data").await.unwrap();
        assert_eq!(h1, h2);
        assert_eq!(store.read(&h1).await.unwrap(), b"data");
    }

    #[tokio::test]
    async fn test_file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileBlobStore::new(dir.path());
        let sha = sha256_hex(b"bundle bytes");
        let handle = store.put(&sha, b"bundle bytes").await.unwrap();
        assert_eq!(handle, format!("charm:file://blobs/{sha}"));
        assert!(store.exists(&handle).await.unwrap());
        assert_eq!(store.read(&handle).await.unwrap(), b"bundle bytes");
    }

    #[tokio::test]
    async fn test_file_store_rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileBlobStore::new(dir.path());
        let result = store.read("charm:file://../escape").await;
        assert!(matches!(result, Err(Error::Storage(_))));
    }

    #[tokio::test]
    async fn test_blob_reader() {
        let mut reader = BlobReader::new(b"hello".to_vec());
        assert_eq!(reader.len(), 5);
        let mut out = String::new();
        reader.read_to_string(&mut out).unwrap();
        assert_eq!(out, "hello");
    }

    #[test]
    fn test_sha256_hex_vector() {
        assert_eq!(sha256_hex(b"charm-revision-0"), REV_ZERO_SHA);
    }
}
