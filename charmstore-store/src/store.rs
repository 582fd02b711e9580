//! The store facade
//!
//! [`Store`] wires a backend, a blob store, and a configuration together and
//! exposes the public operations: publication, the read path, update locks,
//! the event log, and usage counters. Every operation is safe for concurrent
//! invocation; per-handle state is limited to the counter token cache, so
//! multiple `Store` handles over one backend are fully coherent.

use charmstore_core::{BlobReader, BlobStore, CharmUrl, Error, Result};
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::backend::{Backend, CharmRecord, CharmRegistry, EventLog, LockTable};
use crate::event::CharmEvent;
use crate::lock::{UpdateLock, UPDATE_TIMEOUT_SECS};
use crate::publish::CharmPublisher;
use crate::stats::{Counter, CounterEngine, CounterRequest};

/// Store tuning knobs
///
/// The defaults suit production use; tests shrink them to exercise takeover
/// and cache-rotation behavior.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Age at which a held update lock may be taken over, in seconds
    pub update_timeout_secs: i64,
    /// Entries per token-cache generation
    pub token_generation_size: usize,
    /// Counter document merge window, in seconds; must stay below one day
    pub counter_window_secs: i64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            update_timeout_secs: UPDATE_TIMEOUT_SECS,
            token_generation_size: 1024,
            counter_window_secs: 60,
        }
    }
}

impl StoreConfig {
    fn update_timeout(&self) -> Duration {
        Duration::seconds(self.update_timeout_secs)
    }
}

/// A handle on the charm store
#[derive(Debug)]
pub struct Store {
    registry: Arc<dyn CharmRegistry>,
    locks: Arc<dyn LockTable>,
    events: Arc<dyn EventLog>,
    stats: CounterEngine,
    blobs: Arc<dyn BlobStore>,
    config: StoreConfig,
}

impl Store {
    /// Open a store over the given backend and blob store with default
    /// configuration.
    pub fn new(backend: impl Backend + 'static, blobs: impl BlobStore + 'static) -> Self {
        Self::with_config(backend, blobs, StoreConfig::default())
    }

    /// Open a store with explicit configuration.
    pub fn with_config(
        backend: impl Backend + 'static,
        blobs: impl BlobStore + 'static,
        config: StoreConfig,
    ) -> Self {
        let backend = Arc::new(backend);
        Store {
            registry: backend.clone(),
            locks: backend.clone(),
            events: backend.clone(),
            stats: CounterEngine::new(
                backend,
                config.token_generation_size,
                config.counter_window_secs,
            ),
            blobs: Arc::new(blobs),
            config,
        }
    }

    /// This handle's configuration.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    // ------------------------------------------------------------------
    // Publication
    // ------------------------------------------------------------------

    /// Prepare a publication of one bundle to every URL in the set.
    ///
    /// Acquires the update lock, assigns the next revision across the
    /// aliases, and returns the publisher holding the lock. Fails with
    /// `RedundantUpdate` when every alias already carries `digest`: the
    /// store is in the desired state. If at least one alias is missing or
    /// differs, a fresh revision is assigned even where some aliases already
    /// hold the digest: publication means every alias reaches it.
    pub async fn charm_publisher(
        &self,
        urls: &[CharmUrl],
        digest: &str,
    ) -> Result<CharmPublisher> {
        const OP: &str = "charm_publisher";
        let lock = UpdateLock::acquire(
            self.locks.clone(),
            urls,
            self.config.update_timeout(),
            OP,
        )
        .await?;

        let mut max_rev: Option<u32> = None;
        let mut all_current = true;
        for url in urls {
            match self.registry.alias(&url.to_string()).await {
                Ok(Some(alias)) => {
                    if alias.digest != digest {
                        all_current = false;
                    }
                    max_rev = Some(max_rev.map_or(alias.latest_revision, |m| {
                        m.max(alias.latest_revision)
                    }));
                }
                Ok(None) => all_current = false,
                Err(e) => {
                    lock.release().await;
                    return Err(e);
                }
            }
        }
        if all_current {
            lock.release().await;
            return Err(Error::RedundantUpdate);
        }

        let revision = max_rev.map_or(0, |m| m + 1);
        tracing::debug!(digest = %digest, revision, "assigned publication revision");
        Ok(CharmPublisher::new(
            self.registry.clone(),
            self.events.clone(),
            self.blobs.clone(),
            urls.to_vec(),
            digest.to_string(),
            revision,
            lock,
        ))
    }

    // ------------------------------------------------------------------
    // Read path
    // ------------------------------------------------------------------

    /// Fetch the charm record a URL resolves to.
    ///
    /// An unrevisioned URL resolves through its alias head to the latest
    /// revision; a revisioned URL fetches that exact revision.
    pub async fn charm_info(&self, url: &CharmUrl) -> Result<CharmRecord> {
        self.resolve(url).await
    }

    /// Fetch a charm record together with a read stream over its bundle.
    ///
    /// The caller must close (drop) the stream.
    pub async fn open_charm(&self, url: &CharmUrl) -> Result<(CharmRecord, BlobReader)> {
        let info = self.resolve(url).await?;
        let bytes = self.blobs.read(&info.blob_handle).await?;
        Ok((info, BlobReader::new(bytes)))
    }

    async fn resolve(&self, url: &CharmUrl) -> Result<CharmRecord> {
        let (key, revision) = match url.revision() {
            Some(revision) => (url.unrevisioned().to_string(), revision),
            None => {
                let key = url.to_string();
                let alias = self.registry.alias(&key).await?.ok_or(Error::NotFound)?;
                (key, alias.latest_revision)
            }
        };
        self.registry
            .charm(&key, revision)
            .await?
            .ok_or(Error::NotFound)
    }

    // ------------------------------------------------------------------
    // Update locks
    // ------------------------------------------------------------------

    /// Acquire the advisory update lock over a URL set.
    ///
    /// Fails with `UpdateConflict` when any URL is held by a live lock;
    /// locks older than the update timeout are taken over.
    pub async fn lock_updates(&self, urls: &[CharmUrl]) -> Result<UpdateLock> {
        UpdateLock::acquire(
            self.locks.clone(),
            urls,
            self.config.update_timeout(),
            "lock_updates",
        )
        .await
    }

    // ------------------------------------------------------------------
    // Event log
    // ------------------------------------------------------------------

    /// Append an event to the publication log.
    ///
    /// URLs must be unrevisioned. The event time is stamped with now when
    /// absent.
    pub async fn log_event(&self, mut event: CharmEvent) -> Result<()> {
        const OP: &str = "log_event";
        if event.urls.is_empty() {
            return Err(Error::no_urls(OP));
        }
        for url in &event.urls {
            if url.is_revisioned() {
                return Err(Error::revisioned(OP, url.to_string()));
            }
        }
        if event.time.is_none() {
            event.time = Some(Utc::now());
        }
        self.events.append(event).await
    }

    /// Fetch the most recent event mentioning the URL with the given digest.
    pub async fn charm_event(&self, url: &CharmUrl, digest: &str) -> Result<CharmEvent> {
        const OP: &str = "charm_event";
        if url.is_revisioned() {
            return Err(Error::revisioned(OP, url.to_string()));
        }
        self.events
            .find(&url.to_string(), digest)
            .await?
            .ok_or(Error::NotFound)
    }

    // ------------------------------------------------------------------
    // Usage counters
    // ------------------------------------------------------------------

    /// Record one hit against a counter key.
    pub async fn inc_counter(&self, key: &[String]) -> Result<()> {
        self.stats.inc(key).await
    }

    /// Aggregate counters: exact or prefix sums, per-child listings, and
    /// day/week bucketing, per the request.
    pub async fn counters(&self, req: &CounterRequest) -> Result<Vec<Counter>> {
        self.stats.counters(req).await
    }
}
