//! Advisory update locks over sets of charm URLs
//!
//! Locks are plain timestamped documents in the backing store rather than an
//! infrastructure TTL feature: a lock older than the update timeout is fair
//! game for takeover, and release is conditional on the acquisition stamp so
//! a stale holder's release cannot disturb its successor.

use charmstore_core::{CharmUrl, Error, Result};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

use crate::backend::LockTable;

/// Default age at which a held lock may be taken over, in seconds.
pub const UPDATE_TIMEOUT_SECS: i64 = 600;

/// A held advisory lock over a set of unrevisioned URLs
///
/// Returned by acquisition as an explicit value so a publisher can hold it
/// across the publish call. Dropping a lock without releasing it leaves the
/// documents to expire via the takeover horizon.
#[derive(Debug)]
pub struct UpdateLock {
    table: Arc<dyn LockTable>,
    urls: Vec<String>,
    time: DateTime<Utc>,
}

impl UpdateLock {
    /// Acquire locks over every URL in the set, or fail with
    /// `Error::UpdateConflict` leaving nothing held.
    ///
    /// URLs must be unrevisioned and the set non-empty; `op` names the
    /// calling operation in validation errors. The set is processed in
    /// sorted, deduplicated order so concurrent multi-URL acquisitions
    /// cannot deadlock.
    pub(crate) async fn acquire(
        table: Arc<dyn LockTable>,
        urls: &[CharmUrl],
        timeout: Duration,
        op: &str,
    ) -> Result<UpdateLock> {
        if urls.is_empty() {
            return Err(Error::no_urls(op));
        }
        for url in urls {
            if url.is_revisioned() {
                return Err(Error::revisioned(op, url.to_string()));
            }
        }

        let mut keys: Vec<String> = urls.iter().map(|u| u.to_string()).collect();
        keys.sort();
        keys.dedup();

        let now = Utc::now();
        let expired_before = now - timeout;
        let mut held: Vec<String> = Vec::new();
        for key in &keys {
            match table.acquire(key, now, expired_before).await {
                Ok(true) => held.push(key.clone()),
                Ok(false) => {
                    release_keys(&table, &held, now).await;
                    return Err(Error::UpdateConflict);
                }
                Err(e) => {
                    release_keys(&table, &held, now).await;
                    return Err(e);
                }
            }
        }

        Ok(UpdateLock {
            table,
            urls: keys,
            time: now,
        })
    }

    /// Canonical URL strings covered by this lock, in acquisition order.
    pub fn urls(&self) -> &[String] {
        &self.urls
    }

    /// Acquisition stamp recorded in the lock documents.
    pub fn time(&self) -> DateTime<Utc> {
        self.time
    }

    /// Release the lock documents whose stamp still matches this holder.
    ///
    /// A no-op for any URL taken over in the meantime. Release failures are
    /// logged rather than surfaced so they cannot mask an operation's
    /// primary error.
    pub async fn release(&self) {
        release_keys(&self.table, &self.urls, self.time).await;
    }
}

async fn release_keys(table: &Arc<dyn LockTable>, keys: &[String], time: DateTime<Utc>) {
    for key in keys {
        if let Err(e) = table.release(key, time).await {
            tracing::warn!(url = %key, error = %e, "failed to release update lock");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBackend;

    fn urls(strs: &[&str]) -> Vec<CharmUrl> {
        strs.iter().map(|s| CharmUrl::parse(s).unwrap()).collect()
    }

    fn timeout() -> Duration {
        Duration::seconds(UPDATE_TIMEOUT_SECS)
    }

    #[tokio::test]
    async fn test_acquire_and_release() {
        let backend = MemoryBackend::new();
        let table: Arc<dyn LockTable> = Arc::new(backend.clone());

        let lock = UpdateLock::acquire(
            table.clone(),
            &urls(&["cs:oneiric/wordpress-b", "cs:oneiric/wordpress-a"]),
            timeout(),
            "lock_updates",
        )
        .await
        .unwrap();

        // Sorted, canonical ordering.
        assert_eq!(
            lock.urls(),
            &["cs:oneiric/wordpress-a", "cs:oneiric/wordpress-b"]
        );
        assert!(backend.lock_time("cs:oneiric/wordpress-a").is_some());

        lock.release().await;
        assert!(backend.lock_time("cs:oneiric/wordpress-a").is_none());
        assert!(backend.lock_time("cs:oneiric/wordpress-b").is_none());
    }

    #[tokio::test]
    async fn test_partial_conflict_releases_everything() {
        let backend = MemoryBackend::new();
        let table: Arc<dyn LockTable> = Arc::new(backend.clone());

        let held = UpdateLock::acquire(
            table.clone(),
            &urls(&["cs:oneiric/wordpress-b"]),
            timeout(),
            "lock_updates",
        )
        .await
        .unwrap();

        let err = UpdateLock::acquire(
            table.clone(),
            &urls(&["cs:oneiric/wordpress-a", "cs:oneiric/wordpress-b"]),
            timeout(),
            "lock_updates",
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::UpdateConflict));

        // The partially-acquired A lock was rolled back.
        assert!(backend.lock_time("cs:oneiric/wordpress-a").is_none());

        held.release().await;
        let lock = UpdateLock::acquire(
            table,
            &urls(&["cs:oneiric/wordpress-a", "cs:oneiric/wordpress-b"]),
            timeout(),
            "lock_updates",
        )
        .await
        .unwrap();
        lock.release().await;
    }

    #[tokio::test]
    async fn test_rejects_revisioned_and_empty() {
        let backend = MemoryBackend::new();
        let table: Arc<dyn LockTable> = Arc::new(backend);

        let err = UpdateLock::acquire(
            table.clone(),
            &urls(&["cs:oneiric/wordpress-0"]),
            timeout(),
            "lock_updates",
        )
        .await
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "lock_updates: got charm URL with revision: cs:oneiric/wordpress-0"
        );

        let err = UpdateLock::acquire(table, &[], timeout(), "lock_updates")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NoUrls { .. }));
    }

    #[tokio::test]
    async fn test_duplicate_urls_collapse() {
        let backend = MemoryBackend::new();
        let table: Arc<dyn LockTable> = Arc::new(backend);

        let lock = UpdateLock::acquire(
            table,
            &urls(&["cs:oneiric/mysql", "cs:oneiric/mysql"]),
            timeout(),
            "lock_updates",
        )
        .await
        .unwrap();
        assert_eq!(lock.urls(), &["cs:oneiric/mysql"]);
        lock.release().await;
    }
}
