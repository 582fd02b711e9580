//! Error types shared across the charm store crates

use thiserror::Error;

/// Result type alias using our Error
pub type Result<T> = std::result::Result<T, Error>;

/// Store-wide error type
///
/// The first three variants are sentinels that callers are expected to match
/// on structurally; their Display strings are part of the API surface.
#[derive(Error, Debug)]
pub enum Error {
    /// Requested charm, revision, or event does not exist
    #[error("entry not found")]
    NotFound,

    /// Lost an update lock or a revision race to a concurrent publisher
    #[error("charm update in progress")]
    UpdateConflict,

    /// Every requested alias already carries the supplied digest
    #[error("charm is up-to-date")]
    RedundantUpdate,

    /// String does not parse as a charm URL
    #[error("invalid charm URL {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },

    /// A revisioned URL was passed where an unrevisioned one is required
    #[error("{op}: got charm URL with revision: {url}")]
    RevisionedUrl { op: String, url: String },

    /// An operation over a URL set received an empty set
    #[error("{op}: no charm URLs given")]
    NoUrls { op: String },

    /// Counter keys are non-empty segment sequences
    #[error("counter key must not be empty")]
    EmptyCounterKey,

    /// Counter list queries group children under a prefix
    #[error("counter list query requires a prefix")]
    CounterListWithoutPrefix,

    /// Error reported by a caller-supplied bundler, surfaced verbatim
    #[error(transparent)]
    Bundle(std::io::Error),

    /// Backing-store error
    #[error("storage error: {0}")]
    Storage(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(String),
}

impl Error {
    /// Create an invalid URL error
    pub fn invalid_url(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::InvalidUrl {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Create a revisioned-URL validation error for the named operation
    pub fn revisioned(op: impl Into<String>, url: impl Into<String>) -> Self {
        Error::RevisionedUrl {
            op: op.into(),
            url: url.into(),
        }
    }

    /// Create an empty-URL-set validation error for the named operation
    pub fn no_urls(op: impl Into<String>) -> Self {
        Error::NoUrls { op: op.into() }
    }

    /// Create a storage error
    pub fn storage(msg: impl Into<String>) -> Self {
        Error::Storage(msg.into())
    }

    /// Create an I/O error
    pub fn io(msg: impl Into<String>) -> Self {
        Error::Io(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentinel_messages() {
        assert_eq!(Error::NotFound.to_string(), "entry not found");
        assert_eq!(Error::UpdateConflict.to_string(), "charm update in progress");
        assert_eq!(Error::RedundantUpdate.to_string(), "charm is up-to-date");
    }

    #[test]
    fn test_revisioned_message() {
        let err = Error::revisioned("charm_publisher", "cs:oneiric/wordpress-0");
        assert_eq!(
            err.to_string(),
            "charm_publisher: got charm URL with revision: cs:oneiric/wordpress-0"
        );
    }

    #[test]
    fn test_bundle_error_is_verbatim() {
        let err = Error::Bundle(std::io::Error::other("before-write"));
        assert_eq!(err.to_string(), "before-write");
    }
}
