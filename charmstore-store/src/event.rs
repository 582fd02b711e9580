//! Publication event log records

use charmstore_core::CharmUrl;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// What happened to a charm during a publication attempt
///
/// New kinds must map to a lowercase-and-dash wire identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    Published,
    PublishError,
}

impl EventKind {
    /// Every defined kind, in declaration order.
    pub const ALL: [EventKind; 2] = [EventKind::Published, EventKind::PublishError];

    /// Stable wire string form.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Published => "published",
            EventKind::PublishError => "publish-error",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry in the append-only publication log
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CharmEvent {
    pub kind: EventKind,

    /// Unrevisioned URLs the attempt covered
    pub urls: Vec<CharmUrl>,

    /// Revision assigned, for successful publications
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<u32>,

    /// Publisher-supplied source digest
    pub digest: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,

    /// Stamped with the log time when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<DateTime<Utc>>,
}

impl CharmEvent {
    /// A successful publication at the given revision.
    pub fn published(urls: Vec<CharmUrl>, revision: u32, digest: impl Into<String>) -> Self {
        CharmEvent {
            kind: EventKind::Published,
            urls,
            revision: Some(revision),
            digest: digest.into(),
            errors: Vec::new(),
            warnings: Vec::new(),
            time: None,
        }
    }

    /// A failed publication attempt carrying the error text.
    pub fn publish_error(
        urls: Vec<CharmUrl>,
        digest: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        CharmEvent {
            kind: EventKind::PublishError,
            urls,
            revision: None,
            digest: digest.into(),
            errors: vec![error.into()],
            warnings: Vec::new(),
            time: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_wire_strings() {
        assert_eq!(EventKind::Published.to_string(), "published");
        assert_eq!(EventKind::PublishError.to_string(), "publish-error");
    }

    #[test]
    fn test_every_kind_is_lowercase_and_dash() {
        // Guarantees additions to the enum keep the wire-identifier shape.
        for kind in EventKind::ALL {
            let s = kind.as_str();
            assert!(!s.is_empty());
            assert!(
                s.bytes().all(|b| b.is_ascii_lowercase() || b == b'-'),
                "kind {s:?} is not lowercase-and-dash"
            );
        }
    }

    #[test]
    fn test_publish_error_carries_message() {
        let url = CharmUrl::parse("cs:oneiric/wordpress").unwrap();
        let event = CharmEvent::publish_error(vec![url], "some-digest", "boom");
        assert_eq!(event.kind, EventKind::PublishError);
        assert_eq!(event.errors, vec!["boom".to_string()]);
        assert_eq!(event.revision, None);
    }
}
