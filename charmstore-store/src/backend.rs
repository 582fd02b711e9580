//! Backing-store collection traits
//!
//! The store engines program against narrow async traits, one per collection
//! concern, so any document-oriented datastore offering atomic single-document
//! upsert, conditional update, and ordered scans can back them. Conflicting
//! writes are reported as ordinary outcomes (`Ok(false)` / silent no-op), not
//! errors; the engines decide what a conflict means.
//!
//! [`MemoryBackend`](crate::memory::MemoryBackend) is the reference
//! implementation.

use async_trait::async_trait;
use charmstore_core::{CharmConfig, CharmMeta, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Debug;

use crate::event::CharmEvent;

/// Stored description of one published charm revision
///
/// Keyed by `(url, revision)`; `url` is the canonical unrevisioned form.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CharmRecord {
    pub url: String,
    pub revision: u32,
    /// Publisher-supplied source digest, used for redundancy detection
    pub digest: String,
    pub meta: CharmMeta,
    pub config: CharmConfig,
    /// Hex SHA-256 of the committed bundle bytes
    pub bundle_sha256: String,
    /// Committed bundle length in bytes
    pub bundle_size: u64,
    /// Blob store handle the bundle can be read back by
    pub blob_handle: String,
}

/// Head pointer for one unrevisioned URL
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AliasRecord {
    pub url: String,
    pub latest_revision: u32,
    pub digest: String,
}

/// Charm records and their alias head pointers
#[async_trait]
pub trait CharmRegistry: Debug + Send + Sync {
    /// Insert a charm record.
    ///
    /// Returns `Ok(false)` when a record already exists at
    /// `(url, revision)`, meaning the caller lost a revision race.
    async fn insert_charm(&self, record: CharmRecord) -> Result<bool>;

    /// Fetch the charm record at an exact `(url, revision)`.
    async fn charm(&self, url: &str, revision: u32) -> Result<Option<CharmRecord>>;

    /// Fetch the alias head pointer for an unrevisioned URL.
    async fn alias(&self, url: &str) -> Result<Option<AliasRecord>>;

    /// Advance the alias head pointer, monotonically.
    ///
    /// Writes only when no alias exists or `latest_revision < revision`;
    /// anything else is a silent no-op, which makes the update idempotent
    /// under retries and safe under write races.
    async fn advance_alias(&self, url: &str, revision: u32, digest: &str) -> Result<()>;
}

/// Advisory update locks, one document per unrevisioned URL
#[async_trait]
pub trait LockTable: Debug + Send + Sync {
    /// Atomically insert a lock stamped `now`, or take over one whose stamp
    /// is at or before `expired_before`.
    ///
    /// Returns `Ok(false)` when a live lock holds the URL.
    async fn acquire(
        &self,
        url: &str,
        now: DateTime<Utc>,
        expired_before: DateTime<Utc>,
    ) -> Result<bool>;

    /// Delete the lock only if its stamp matches `time`.
    ///
    /// The condition makes release after a takeover a no-op, so a stale
    /// holder cannot clobber its successor.
    async fn release(&self, url: &str, time: DateTime<Utc>) -> Result<()>;
}

/// Append-only publication event log
#[async_trait]
pub trait EventLog: Debug + Send + Sync {
    async fn append(&self, event: CharmEvent) -> Result<()>;

    /// Most recent event mentioning `url` with the given digest.
    async fn find(&self, url: &str, digest: &str) -> Result<Option<CharmEvent>>;
}

/// Filter over the encoded counter-key order
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum KeyMatch {
    /// Documents whose encoded key equals the operand
    Exact(String),
    /// Documents strictly below the operand in the key hierarchy
    Below(String),
}

/// One counter document: increments merged per (key, stamp window)
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterDoc {
    /// Encoded key (token ids in hex, each followed by `:`)
    pub key: String,
    /// Unix seconds, floored to the merge window
    pub stamp: i64,
    pub count: i64,
}

/// Token table and counter documents
#[async_trait]
pub trait StatStore: Debug + Send + Sync {
    /// Find or atomically create the token for a key segment.
    ///
    /// Concurrent creations of the same segment resolve to one id.
    async fn token_id(&self, segment: &str) -> Result<i64>;

    /// Read-only token lookup; never allocates.
    async fn find_token(&self, segment: &str) -> Result<Option<i64>>;

    /// Batch reverse lookup: token id to segment.
    ///
    /// Ids with no token row are absent from the result.
    async fn token_segments(&self, ids: &[i64]) -> Result<HashMap<i64, String>>;

    /// Merge a single increment into the (key, stamp) document, creating it
    /// when absent. Parallel increments must sum exactly.
    async fn add_count(&self, key: &str, stamp: i64) -> Result<()>;

    /// Scan counter documents matching the filter, optionally bounded to
    /// stamps in `[start, stop)`.
    async fn scan_counts(
        &self,
        matcher: &KeyMatch,
        start: Option<i64>,
        stop: Option<i64>,
    ) -> Result<Vec<CounterDoc>>;
}

/// Full backend capability marker
///
/// Provides a single bound for backends implementing every collection
/// concern.
pub trait Backend: CharmRegistry + LockTable + EventLog + StatStore {}
impl<T: CharmRegistry + LockTable + EventLog + StatStore> Backend for T {}
