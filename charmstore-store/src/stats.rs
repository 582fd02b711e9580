//! Usage counter engine
//!
//! Counter keys are ordered segment sequences. Each segment is replaced by a
//! stable numeric token from the backing store's write-once token table; the
//! encoded key concatenates the token ids in lowercase hex, each followed by
//! a `:` delimiter, so prefix queries reduce to range scans. Increments merge
//! into one document per (key, 60-second window); reads aggregate documents
//! into exact sums, per-child listings, or UTC day/week buckets.
//!
//! Token resolution goes through a bounded two-generation cache. The cache is
//! an optimization only: list queries fall back to the token table for any
//! segment it cannot name.

use charmstore_core::{Error, Result};
use chrono::{DateTime, Datelike, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;
use std::mem;
use std::sync::Arc;

use crate::backend::{CounterDoc, KeyMatch, StatStore};

const DAY_SECS: i64 = 86_400;

/// Time bucketing granularity for counter reads
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CounterBy {
    /// One aggregate over the whole requested range
    #[default]
    None,
    /// One aggregate per UTC day
    Day,
    /// One aggregate per week, labeled by its closing Sunday 00:00 UTC
    Week,
}

/// A counter read request
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CounterRequest {
    /// Key segments; must be non-empty
    pub key: Vec<String>,
    /// Count everything strictly below the key instead of the key itself
    pub prefix: bool,
    /// Group results by the child segment directly below the key
    /// (requires `prefix`)
    pub list: bool,
    pub by: CounterBy,
    /// Inclusive lower time bound
    pub start: Option<DateTime<Utc>>,
    /// Exclusive upper time bound
    pub stop: Option<DateTime<Utc>>,
}

/// One aggregated counter in a read result
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Counter {
    pub key: Vec<String>,
    /// Whether the count covers the subtree strictly below `key`
    pub prefix: bool,
    pub count: i64,
    /// Bucket start, present when the request bucketed by time
    pub time: Option<DateTime<Utc>>,
}

// ============================================================================
// Two-generation token cache
// ============================================================================

/// One cache generation: segment-to-id and id-to-segment maps sharing the
/// segment allocation.
#[derive(Debug, Default)]
struct Generation {
    forward: HashMap<Arc<str>, i64>,
    reverse: HashMap<i64, Arc<str>>,
}

impl Generation {
    fn insert(&mut self, segment: Arc<str>, id: i64) {
        self.forward.insert(segment.clone(), id);
        self.reverse.insert(id, segment);
    }

    fn len(&self) -> usize {
        self.forward.len()
    }
}

/// Bounded two-generation token cache
///
/// Lookups consult the newer generation, then the older; a hit in the older
/// generation does not refresh the entry. When an insert finds the newer
/// generation full, the older generation is dropped, the newer one becomes
/// old, and the insert lands in a fresh map. An older-generation entry can
/// therefore be lost on the rotation after its last hit; that is the
/// documented trade for bounded memory without bookkeeping.
#[derive(Debug)]
pub(crate) struct TokenCache {
    gen_size: usize,
    newer: Generation,
    older: Generation,
}

impl TokenCache {
    pub(crate) fn new(gen_size: usize) -> Self {
        TokenCache {
            gen_size,
            newer: Generation::default(),
            older: Generation::default(),
        }
    }

    pub(crate) fn id_of(&self, segment: &str) -> Option<i64> {
        self.newer
            .forward
            .get(segment)
            .or_else(|| self.older.forward.get(segment))
            .copied()
    }

    pub(crate) fn segment_of(&self, id: i64) -> Option<Arc<str>> {
        self.newer
            .reverse
            .get(&id)
            .or_else(|| self.older.reverse.get(&id))
            .cloned()
    }

    pub(crate) fn install(&mut self, segment: &str, id: i64) {
        if self.newer.forward.contains_key(segment) {
            return;
        }
        if self.newer.len() >= self.gen_size {
            self.older = mem::take(&mut self.newer);
        }
        self.newer.insert(Arc::from(segment), id);
    }
}

// ============================================================================
// Counter engine
// ============================================================================

/// Counter engine: increments plus aggregation reads
///
/// The token cache is per-engine state; multiple engines over one backing
/// store are independent caches over the same token table.
#[derive(Debug)]
pub(crate) struct CounterEngine {
    stats: Arc<dyn StatStore>,
    cache: Mutex<TokenCache>,
    window_secs: i64,
}

impl CounterEngine {
    pub(crate) fn new(stats: Arc<dyn StatStore>, gen_size: usize, window_secs: i64) -> Self {
        CounterEngine {
            stats,
            cache: Mutex::new(TokenCache::new(gen_size)),
            window_secs: window_secs.max(1),
        }
    }

    /// Record one hit against the key, allocating tokens as needed.
    pub(crate) async fn inc(&self, key: &[String]) -> Result<()> {
        if key.is_empty() {
            return Err(Error::EmptyCounterKey);
        }
        let ids = self.resolve_create(key).await?;
        let encoded = encode(&ids);
        let stamp = window_floor(Utc::now().timestamp(), self.window_secs);
        self.stats.add_count(&encoded, stamp).await
    }

    /// Aggregate counters for the request.
    pub(crate) async fn counters(&self, req: &CounterRequest) -> Result<Vec<Counter>> {
        if req.key.is_empty() {
            return Err(Error::EmptyCounterKey);
        }
        if req.list && !req.prefix {
            return Err(Error::CounterListWithoutPrefix);
        }

        let ids = self.resolve_existing(&req.key).await?;
        let start = req.start.map(|t| t.timestamp());
        let stop = req.stop.map(|t| t.timestamp());
        let docs = match &ids {
            Some(ids) => {
                let encoded = encode(ids);
                let matcher = if req.prefix {
                    KeyMatch::Below(encoded)
                } else {
                    KeyMatch::Exact(encoded)
                };
                self.stats.scan_counts(&matcher, start, stop).await?
            }
            // Unknown segment: nothing stored below this key, and read-only
            // resolution must not grow the token table.
            None => Vec::new(),
        };

        if req.list {
            match ids {
                Some(ids) => self.list_counters(req, &ids, &docs).await,
                None => Ok(Vec::new()),
            }
        } else {
            Ok(sum_counters(req, &docs))
        }
    }

    /// Resolve every segment, allocating missing tokens.
    async fn resolve_create(&self, key: &[String]) -> Result<Vec<i64>> {
        let mut ids = Vec::with_capacity(key.len());
        for segment in key {
            let cached = self.cache.lock().id_of(segment);
            let id = match cached {
                Some(id) => id,
                None => {
                    let id = self.stats.token_id(segment).await?;
                    self.cache.lock().install(segment, id);
                    id
                }
            };
            ids.push(id);
        }
        Ok(ids)
    }

    /// Resolve every segment read-only; `None` when any segment has no token.
    async fn resolve_existing(&self, key: &[String]) -> Result<Option<Vec<i64>>> {
        let mut ids = Vec::with_capacity(key.len());
        for segment in key {
            let cached = self.cache.lock().id_of(segment);
            let id = match cached {
                Some(id) => id,
                None => match self.stats.find_token(segment).await? {
                    Some(id) => {
                        self.cache.lock().install(segment, id);
                        id
                    }
                    None => return Ok(None),
                },
            };
            ids.push(id);
        }
        Ok(Some(ids))
    }

    /// Name a batch of token ids, consulting the cache first.
    async fn segments_for(&self, ids: &[i64]) -> Result<HashMap<i64, String>> {
        let mut out = HashMap::new();
        let mut missing = Vec::new();
        {
            let cache = self.cache.lock();
            for &id in ids {
                match cache.segment_of(id) {
                    Some(segment) => {
                        out.insert(id, segment.to_string());
                    }
                    None => missing.push(id),
                }
            }
        }
        if !missing.is_empty() {
            let fetched = self.stats.token_segments(&missing).await?;
            let mut cache = self.cache.lock();
            for (id, segment) in &fetched {
                cache.install(segment, *id);
            }
            drop(cache);
            out.extend(fetched);
        }
        Ok(out)
    }

    /// Group documents by the child segment directly below the prefix.
    ///
    /// Each child appears as a leaf (documents exactly at the child) and,
    /// when it has descendants, again as a subtree.
    async fn list_counters(
        &self,
        req: &CounterRequest,
        prefix_ids: &[i64],
        docs: &[CounterDoc],
    ) -> Result<Vec<Counter>> {
        let prefix = encode(prefix_ids);
        // (bucket, child token, is-leaf) -> count
        let mut groups: HashMap<(i64, i64, bool), i64> = HashMap::new();
        let mut child_ids: Vec<i64> = Vec::new();
        for doc in docs {
            let Some(rest) = doc.key.strip_prefix(prefix.as_str()) else {
                continue;
            };
            let Some((child_hex, tail)) = rest.split_once(':') else {
                continue;
            };
            let Ok(child) = i64::from_str_radix(child_hex, 16) else {
                continue;
            };
            let bucket = bucket_start(doc.stamp, req.by);
            *groups.entry((bucket, child, tail.is_empty())).or_default() += doc.count;
            child_ids.push(child);
        }
        child_ids.sort_unstable();
        child_ids.dedup();
        let segments = self.segments_for(&child_ids).await?;

        let mut out: Vec<(i64, Counter)> = groups
            .into_iter()
            .map(|((bucket, child, leaf), count)| {
                let mut key = req.key.clone();
                key.push(segments.get(&child).cloned().unwrap_or_default());
                let time = match req.by {
                    CounterBy::None => None,
                    _ => Some(from_stamp(bucket)),
                };
                (
                    bucket,
                    Counter {
                        key,
                        prefix: !leaf,
                        count,
                        time,
                    },
                )
            })
            .collect();

        // Time ascending, count descending, key ascending, leaf before
        // subtree on full ties.
        out.sort_by(|(ta, a), (tb, b)| {
            ta.cmp(tb)
                .then_with(|| b.count.cmp(&a.count))
                .then_with(|| a.key.cmp(&b.key))
                .then_with(|| a.prefix.cmp(&b.prefix))
        });
        Ok(out.into_iter().map(|(_, counter)| counter).collect())
    }
}

/// Aggregate without listing: one counter per time bucket, or exactly one
/// (possibly zero) counter when not bucketing.
fn sum_counters(req: &CounterRequest, docs: &[CounterDoc]) -> Vec<Counter> {
    match req.by {
        CounterBy::None => {
            let count = docs.iter().map(|d| d.count).sum();
            vec![Counter {
                key: req.key.clone(),
                prefix: req.prefix,
                count,
                time: None,
            }]
        }
        by => {
            let mut buckets: BTreeMap<i64, i64> = BTreeMap::new();
            for doc in docs {
                *buckets.entry(bucket_start(doc.stamp, by)).or_default() += doc.count;
            }
            buckets
                .into_iter()
                .map(|(bucket, count)| Counter {
                    key: req.key.clone(),
                    prefix: req.prefix,
                    count,
                    time: Some(from_stamp(bucket)),
                })
                .collect()
        }
    }
}

/// Encode token ids as the stored key form: lowercase hex, `:`-terminated.
fn encode(ids: &[i64]) -> String {
    let mut out = String::with_capacity(ids.len() * 4);
    for id in ids {
        let _ = write!(out, "{id:x}:");
    }
    out
}

fn window_floor(secs: i64, window: i64) -> i64 {
    secs - secs.rem_euclid(window)
}

/// Bucket label for a document stamp at the requested granularity.
///
/// Days floor to UTC midnight. Weeks run Monday through Sunday and are
/// labeled by the Sunday that closes them out.
fn bucket_start(stamp: i64, by: CounterBy) -> i64 {
    match by {
        CounterBy::None => 0,
        CounterBy::Day => stamp - stamp.rem_euclid(DAY_SECS),
        CounterBy::Week => {
            let day = stamp - stamp.rem_euclid(DAY_SECS);
            let weekday = DateTime::from_timestamp(day, 0)
                .map(|dt| i64::from(dt.weekday().num_days_from_sunday()))
                .unwrap_or(0);
            day + (7 - weekday) % 7 * DAY_SECS
        }
    }
}

fn from_stamp(stamp: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(stamp, 0).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn stamp(y: i32, m: u32, d: u32) -> i64 {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap().timestamp()
    }

    #[test]
    fn test_encode_is_prefix_unambiguous() {
        assert_eq!(encode(&[3, 2, 1]), "3:2:1:");
        assert_eq!(encode(&[0x1f]), "1f:");
        // "1:" must not be a prefix of the encoding of id 0x12.
        assert!(!encode(&[0x12]).starts_with(&encode(&[1])));
        assert!(encode(&[1, 2]).starts_with(&encode(&[1])));
    }

    #[test]
    fn test_window_floor() {
        assert_eq!(window_floor(0, 60), 0);
        assert_eq!(window_floor(59, 60), 0);
        assert_eq!(window_floor(60, 60), 60);
        assert_eq!(window_floor(119, 60), 60);
    }

    #[test]
    fn test_day_bucket_floors_to_midnight() {
        let noon = Utc
            .with_ymd_and_hms(2012, 5, 3, 12, 30, 0)
            .unwrap()
            .timestamp();
        assert_eq!(bucket_start(noon, CounterBy::Day), stamp(2012, 5, 3));
    }

    #[test]
    fn test_week_bucket_labels_closing_sunday() {
        // 2012-05-01 is a Tuesday; its week closes on Sunday 2012-05-06.
        assert_eq!(
            bucket_start(stamp(2012, 5, 1), CounterBy::Week),
            stamp(2012, 5, 6)
        );
        // 2012-05-09 (Wednesday) closes on 2012-05-13.
        assert_eq!(
            bucket_start(stamp(2012, 5, 9), CounterBy::Week),
            stamp(2012, 5, 13)
        );
        // A Sunday labels itself.
        assert_eq!(
            bucket_start(stamp(2012, 5, 6), CounterBy::Week),
            stamp(2012, 5, 6)
        );
    }

    #[test]
    fn test_cache_rotation_drops_older_generation() {
        let mut cache = TokenCache::new(2);
        cache.install("a", 1);
        cache.install("b", 2);
        assert_eq!(cache.id_of("a"), Some(1));
        assert_eq!(cache.id_of("b"), Some(2));

        // Newer generation is full; this insert rotates.
        cache.install("c", 3);
        assert_eq!(cache.id_of("a"), Some(1));
        assert_eq!(cache.id_of("c"), Some(3));

        cache.install("d", 4);
        // Second rotation: the generation holding a and b is gone.
        cache.install("e", 5);
        assert_eq!(cache.id_of("a"), None);
        assert_eq!(cache.id_of("b"), None);
        assert_eq!(cache.id_of("c"), Some(3));
        assert_eq!(cache.id_of("d"), Some(4));
        assert_eq!(cache.id_of("e"), Some(5));
    }

    #[test]
    fn test_cache_old_hit_does_not_promote() {
        let mut cache = TokenCache::new(2);
        cache.install("a", 1);
        cache.install("b", 2);
        cache.install("c", 3); // rotates; a and b now in the older generation

        // Hitting "a" in the older generation must not refresh it.
        assert_eq!(cache.id_of("a"), Some(1));
        cache.install("d", 4); // fills the newer generation
        cache.install("e", 5); // rotates; a is lost despite its recent hit
        assert_eq!(cache.id_of("a"), None);
        assert_eq!(cache.id_of("c"), Some(3));
    }

    #[test]
    fn test_cache_reverse_lookup() {
        let mut cache = TokenCache::new(2);
        cache.install("alpha", 7);
        assert_eq!(cache.segment_of(7).as_deref(), Some("alpha"));
        assert_eq!(cache.segment_of(8), None);
    }

    #[test]
    fn test_reinstall_same_segment_is_a_no_op() {
        let mut cache = TokenCache::new(2);
        cache.install("a", 1);
        cache.install("a", 1);
        cache.install("b", 2);
        // Re-installing "a" must not have consumed capacity or rotated.
        assert_eq!(cache.id_of("a"), Some(1));
        assert_eq!(cache.id_of("b"), Some(2));
    }
}
