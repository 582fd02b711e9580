//! Charm store engines
//!
//! This crate implements the publication and aggregation core of a charm
//! store over a pluggable document backend:
//!
//! - [`Store`]: the facade for publication, reads, locks, events, counters
//! - [`CharmPublisher`] / [`CharmBundler`]: atomic multi-alias publication
//!   with content-addressed deduplication and revision assignment
//! - [`UpdateLock`]: advisory locks with timestamp-based takeover
//! - [`backend`]: the collection traits any datastore driver implements
//! - [`MemoryBackend`]: the in-memory reference backend
//! - counters: hierarchical usage counting with a bounded two-generation
//!   token cache and bucketed time-range queries
//!
//! Publishers call [`Store::charm_publisher`], stream bytes through the
//! returned publisher, and the store commits metadata for every requested
//! alias plus a log event. Readers bypass locks entirely. Counter writes are
//! lock-free; counter reads aggregate sharded per-window documents.

pub mod backend;
pub mod event;
pub mod lock;
pub mod memory;
pub mod publish;
pub mod stats;
mod store;

pub use backend::{
    AliasRecord, Backend, CharmRecord, CharmRegistry, CounterDoc, EventLog, KeyMatch, LockTable,
    StatStore,
};
pub use charmstore_core::{Error, Result};
pub use event::{CharmEvent, EventKind};
pub use lock::{UpdateLock, UPDATE_TIMEOUT_SECS};
pub use memory::MemoryBackend;
pub use publish::{CharmBundler, CharmPublisher};
pub use stats::{Counter, CounterBy, CounterRequest};
pub use store::{Store, StoreConfig};
