//! In-memory backend implementation
//!
//! Stores every collection in `Arc<RwLock<..>>`-guarded maps, making the
//! backend `Clone` and safe for multi-threaded async runtimes. Ordered maps
//! back the collections that need range scans. This is the reference
//! implementation used throughout the test suites; it also exposes a few
//! public hooks tests use to manipulate collections directly (rewinding lock
//! stamps, re-stamping counter documents) the way an operator could against a
//! real datastore.

use async_trait::async_trait;
use charmstore_core::Result;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::fmt::Debug;
use std::sync::Arc;

use crate::backend::{
    AliasRecord, CharmRecord, CharmRegistry, CounterDoc, EventLog, KeyMatch, LockTable, StatStore,
};
use crate::event::CharmEvent;

#[derive(Default)]
struct TokenTable {
    by_segment: HashMap<String, i64>,
    by_id: HashMap<i64, String>,
    next_id: i64,
}

/// In-memory backend for tests and single-process deployments
#[derive(Clone, Default)]
pub struct MemoryBackend {
    /// Charm records keyed by (canonical URL, revision)
    charms: Arc<RwLock<BTreeMap<(String, u32), CharmRecord>>>,
    /// Alias head pointers keyed by canonical URL
    aliases: Arc<RwLock<HashMap<String, AliasRecord>>>,
    /// Update locks: URL to acquisition stamp
    locks: Arc<RwLock<HashMap<String, DateTime<Utc>>>>,
    /// Append-only publication events
    events: Arc<RwLock<Vec<CharmEvent>>>,
    /// Write-once segment/token table
    tokens: Arc<RwLock<TokenTable>>,
    /// Counter documents keyed by (encoded key, stamp)
    counters: Arc<RwLock<BTreeMap<(String, i64), i64>>>,
}

impl Debug for MemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBackend")
            .field("charm_count", &self.charms.read().len())
            .field("alias_count", &self.aliases.read().len())
            .field("lock_count", &self.locks.read().len())
            .field("event_count", &self.events.read().len())
            .field("token_count", &self.tokens.read().by_segment.len())
            .field("counter_doc_count", &self.counters.read().len())
            .finish()
    }
}

impl MemoryBackend {
    /// Create a new empty backend
    pub fn new() -> Self {
        Self::default()
    }

    /// Rewind a held lock's stamp (test support for takeover scenarios).
    pub fn set_lock_time(&self, url: &str, time: DateTime<Utc>) {
        if let Some(stamp) = self.locks.write().get_mut(url) {
            *stamp = time;
        }
    }

    /// Current stamp of a held lock, if any.
    pub fn lock_time(&self, url: &str) -> Option<DateTime<Utc>> {
        self.locks.read().get(url).copied()
    }

    /// Move every counter document stamped at or after `min_stamp` to
    /// `new_stamp`, merging counts on collision (test support for
    /// time-bucketing scenarios).
    pub fn restamp_counters(&self, min_stamp: i64, new_stamp: i64) {
        let mut counters = self.counters.write();
        let moved: Vec<((String, i64), i64)> = counters
            .iter()
            .filter(|((_, stamp), _)| *stamp >= min_stamp)
            .map(|(key, count)| (key.clone(), *count))
            .collect();
        for ((key, stamp), count) in moved {
            counters.remove(&(key.clone(), stamp));
            *counters.entry((key, new_stamp)).or_default() += count;
        }
    }

    /// Rename every stored token segment so only cached resolutions keep
    /// working (test support for token-cache generation scenarios).
    pub fn corrupt_tokens(&self) {
        let mut tokens = self.tokens.write();
        let renamed: Vec<(i64, String)> = tokens
            .by_id
            .iter()
            .map(|(id, segment)| (*id, format!("corrupted-{segment}")))
            .collect();
        tokens.by_segment.clear();
        tokens.by_id.clear();
        for (id, segment) in renamed {
            tokens.by_segment.insert(segment.clone(), id);
            tokens.by_id.insert(id, segment);
        }
    }

    /// Number of counter documents currently stored.
    pub fn counter_doc_count(&self) -> usize {
        self.counters.read().len()
    }

    /// Number of allocated tokens.
    pub fn token_count(&self) -> usize {
        self.tokens.read().by_segment.len()
    }
}

#[async_trait]
impl CharmRegistry for MemoryBackend {
    async fn insert_charm(&self, record: CharmRecord) -> Result<bool> {
        let mut charms = self.charms.write();
        let key = (record.url.clone(), record.revision);
        if charms.contains_key(&key) {
            return Ok(false);
        }
        charms.insert(key, record);
        Ok(true)
    }

    async fn charm(&self, url: &str, revision: u32) -> Result<Option<CharmRecord>> {
        Ok(self
            .charms
            .read()
            .get(&(url.to_string(), revision))
            .cloned())
    }

    async fn alias(&self, url: &str) -> Result<Option<AliasRecord>> {
        Ok(self.aliases.read().get(url).cloned())
    }

    async fn advance_alias(&self, url: &str, revision: u32, digest: &str) -> Result<()> {
        let mut aliases = self.aliases.write();
        match aliases.get_mut(url) {
            Some(alias) if alias.latest_revision >= revision => {
                // Monotonic: a newer head is already in place.
            }
            Some(alias) => {
                alias.latest_revision = revision;
                alias.digest = digest.to_string();
            }
            None => {
                aliases.insert(
                    url.to_string(),
                    AliasRecord {
                        url: url.to_string(),
                        latest_revision: revision,
                        digest: digest.to_string(),
                    },
                );
            }
        }
        Ok(())
    }
}

#[async_trait]
impl LockTable for MemoryBackend {
    async fn acquire(
        &self,
        url: &str,
        now: DateTime<Utc>,
        expired_before: DateTime<Utc>,
    ) -> Result<bool> {
        let mut locks = self.locks.write();
        match locks.get(url) {
            Some(&held) if held > expired_before => Ok(false),
            _ => {
                locks.insert(url.to_string(), now);
                Ok(true)
            }
        }
    }

    async fn release(&self, url: &str, time: DateTime<Utc>) -> Result<()> {
        let mut locks = self.locks.write();
        if locks.get(url) == Some(&time) {
            locks.remove(url);
        }
        Ok(())
    }
}

#[async_trait]
impl EventLog for MemoryBackend {
    async fn append(&self, event: CharmEvent) -> Result<()> {
        self.events.write().push(event);
        Ok(())
    }

    async fn find(&self, url: &str, digest: &str) -> Result<Option<CharmEvent>> {
        let events = self.events.read();
        Ok(events
            .iter()
            .rev()
            .find(|e| e.digest == digest && e.urls.iter().any(|u| u.to_string() == url))
            .cloned())
    }
}

#[async_trait]
impl StatStore for MemoryBackend {
    async fn token_id(&self, segment: &str) -> Result<i64> {
        let mut tokens = self.tokens.write();
        if let Some(&id) = tokens.by_segment.get(segment) {
            return Ok(id);
        }
        tokens.next_id += 1;
        let id = tokens.next_id;
        tokens.by_segment.insert(segment.to_string(), id);
        tokens.by_id.insert(id, segment.to_string());
        Ok(id)
    }

    async fn find_token(&self, segment: &str) -> Result<Option<i64>> {
        Ok(self.tokens.read().by_segment.get(segment).copied())
    }

    async fn token_segments(&self, ids: &[i64]) -> Result<HashMap<i64, String>> {
        let tokens = self.tokens.read();
        Ok(ids
            .iter()
            .filter_map(|id| tokens.by_id.get(id).map(|s| (*id, s.clone())))
            .collect())
    }

    async fn add_count(&self, key: &str, stamp: i64) -> Result<()> {
        *self
            .counters
            .write()
            .entry((key.to_string(), stamp))
            .or_default() += 1;
        Ok(())
    }

    async fn scan_counts(
        &self,
        matcher: &KeyMatch,
        start: Option<i64>,
        stop: Option<i64>,
    ) -> Result<Vec<CounterDoc>> {
        let counters = self.counters.read();
        let mut out = Vec::new();
        let in_bounds =
            |stamp: i64| start.map_or(true, |s| stamp >= s) && stop.map_or(true, |s| stamp < s);
        match matcher {
            KeyMatch::Exact(key) => {
                let range = (key.clone(), i64::MIN)..=(key.clone(), i64::MAX);
                for ((k, stamp), count) in counters.range(range) {
                    if in_bounds(*stamp) {
                        out.push(CounterDoc {
                            key: k.clone(),
                            stamp: *stamp,
                            count: *count,
                        });
                    }
                }
            }
            KeyMatch::Below(prefix) => {
                for ((k, stamp), count) in counters.range((prefix.clone(), i64::MIN)..) {
                    if !k.starts_with(prefix.as_str()) {
                        break;
                    }
                    if k == prefix {
                        continue;
                    }
                    if in_bounds(*stamp) {
                        out.push(CounterDoc {
                            key: k.clone(),
                            stamp: *stamp,
                            count: *count,
                        });
                    }
                }
            }
        }
        Ok(out)
    }
}
