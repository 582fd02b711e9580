//! Core types for the charm store
//!
//! This crate provides the pieces shared by every store engine:
//!
//! - [`CharmUrl`]: canonical package identifiers (`cs:<series>/<name>[-<rev>]`)
//! - [`CharmMeta`] / [`CharmConfig`]: queriable charm attributes
//! - [`BlobStore`] / [`BlobWriter`]: content-addressed bundle storage with
//!   streaming SHA-256 + size capture
//! - [`Error`]: the store-wide error enum, including the sentinel conflict
//!   and redundancy errors callers match on

pub mod blob;
pub mod error;
pub mod meta;
pub mod url;

pub use blob::{
    sha256_hex, BlobReader, BlobRef, BlobStore, BlobWriter, FileBlobStore, MemoryBlobStore,
};
pub use error::{Error, Result};
pub use meta::{CharmConfig, CharmMeta, ConfigOption, Relation};
pub use url::CharmUrl;
