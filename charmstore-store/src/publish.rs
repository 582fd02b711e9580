//! Charm publication
//!
//! A [`CharmPublisher`] is created with the update lock already held and a
//! revision assigned; [`CharmPublisher::publish`] streams the bundle through a
//! blob writer, commits a charm record per requested URL, advances the alias
//! heads monotonically, logs the outcome event, and releases the lock on
//! success and failure alike.
//!
//! The unique `(url, revision)` constraint is the safety net under the lock:
//! if two publishers ever reach the same revision, exactly one insert wins
//! per URL and the loser surfaces `UpdateConflict`. The monotonic alias
//! advance makes the winner's heads authoritative regardless of wall-clock
//! interleaving, so nothing is rolled back on the losing side.

use charmstore_core::{
    BlobStore, BlobWriter, CharmConfig, CharmMeta, CharmUrl, Error, Result,
};
use chrono::Utc;
use std::io;
use std::sync::Arc;

use crate::backend::{CharmRecord, CharmRegistry, EventLog};
use crate::event::CharmEvent;
use crate::lock::UpdateLock;

/// Caller-supplied source of a charm's metadata and bundle bytes
///
/// Anything that can describe itself and stream its archive can publish; no
/// particular charm representation is assumed.
pub trait CharmBundler: Send {
    fn meta(&self) -> CharmMeta;

    fn config(&self) -> CharmConfig;

    /// Informs the bundler of the revision being published before bundling.
    fn set_revision(&mut self, revision: u32);

    /// Stream the bundle into the sink. An error here aborts the
    /// publication and is surfaced to the caller verbatim.
    fn bundle_to(&mut self, sink: &mut dyn io::Write) -> io::Result<()>;
}

/// A single-shot publication of one bundle to a set of aliases
///
/// Holds the update lock from creation until `publish` returns. Discarding a
/// publisher without publishing leaves its lock to expire via the takeover
/// horizon.
#[derive(Debug)]
pub struct CharmPublisher {
    registry: Arc<dyn CharmRegistry>,
    events: Arc<dyn EventLog>,
    blobs: Arc<dyn BlobStore>,
    urls: Vec<CharmUrl>,
    digest: String,
    revision: u32,
    lock: UpdateLock,
}

impl CharmPublisher {
    pub(crate) fn new(
        registry: Arc<dyn CharmRegistry>,
        events: Arc<dyn EventLog>,
        blobs: Arc<dyn BlobStore>,
        urls: Vec<CharmUrl>,
        digest: String,
        revision: u32,
        lock: UpdateLock,
    ) -> Self {
        CharmPublisher {
            registry,
            events,
            blobs,
            urls,
            digest,
            revision,
            lock,
        }
    }

    /// The revision this publication will commit. Stable for the
    /// publisher's lifetime.
    pub fn revision(&self) -> u32 {
        self.revision
    }

    /// URLs the publication covers.
    pub fn urls(&self) -> &[CharmUrl] {
        &self.urls
    }

    /// Publisher-supplied source digest.
    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// Publish the bundle to every requested URL.
    ///
    /// On any failure a `publish-error` event is logged with the error text;
    /// the lock is released on every exit path.
    pub async fn publish(self, bundler: &mut dyn CharmBundler) -> Result<()> {
        let result = self.try_publish(bundler).await;
        if let Err(err) = &result {
            let mut event =
                CharmEvent::publish_error(self.urls.clone(), self.digest.clone(), err.to_string());
            event.time = Some(Utc::now());
            if let Err(log_err) = self.events.append(event).await {
                tracing::warn!(error = %log_err, "failed to log publish-error event");
            }
        }
        self.lock.release().await;
        result
    }

    async fn try_publish(&self, bundler: &mut dyn CharmBundler) -> Result<()> {
        let mut writer = BlobWriter::new(self.blobs.clone());
        bundler.set_revision(self.revision);
        // A bundler error discards the captured bytes and is the
        // operation's error, unwrapped.
        bundler.bundle_to(&mut writer).map_err(Error::Bundle)?;
        let blob = writer.commit().await?;

        let meta = bundler.meta();
        let config = bundler.config();

        for url in &self.urls {
            let record = CharmRecord {
                url: url.to_string(),
                revision: self.revision,
                digest: self.digest.clone(),
                meta: meta.clone(),
                config: config.clone(),
                bundle_sha256: blob.sha256.clone(),
                bundle_size: blob.size,
                blob_handle: blob.handle.clone(),
            };
            if !self.registry.insert_charm(record).await? {
                // A concurrent publisher already owns this revision. Sibling
                // records stay in place; the winner's alias advance makes
                // the heads consistent.
                tracing::debug!(url = %url, revision = self.revision, "lost revision race");
                return Err(Error::UpdateConflict);
            }
        }

        for url in &self.urls {
            self.registry
                .advance_alias(&url.to_string(), self.revision, &self.digest)
                .await?;
        }

        let mut event = CharmEvent::published(self.urls.clone(), self.revision, self.digest.clone());
        event.time = Some(Utc::now());
        self.events.append(event).await?;
        Ok(())
    }
}
