//! Canonical charm URL parsing and formatting
//!
//! A charm URL has the form `cs:<series>/<name>[-<revision>]`. The series is
//! a lowercase alphanumeric word starting with a letter; the name is
//! lowercase alphanumeric with interior dashes, at least two characters, and
//! must not end with a dash. A trailing `-<digits>` suffix is the revision;
//! without it the URL addresses the latest revision of its alias.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A parsed charm URL
///
/// Ordering is lexicographic over `(series, name, revision)`; lock
/// acquisition relies on it for deterministic multi-URL ordering.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CharmUrl {
    series: String,
    name: String,
    revision: Option<u32>,
}

impl CharmUrl {
    /// Parse a charm URL from its canonical string form
    pub fn parse(s: &str) -> Result<Self> {
        let rest = s
            .strip_prefix("cs:")
            .ok_or_else(|| Error::invalid_url(s, "schema must be cs:"))?;

        let (series, name_part) = rest
            .split_once('/')
            .ok_or_else(|| Error::invalid_url(s, "expected <series>/<name>"))?;

        if !valid_series(series) {
            return Err(Error::invalid_url(s, format!("invalid series {series:?}")));
        }

        // A trailing -<digits> suffix is the revision; anything else stays
        // part of the name.
        let (name, revision) = match name_part.rsplit_once('-') {
            Some((head, tail)) if !tail.is_empty() && tail.bytes().all(|b| b.is_ascii_digit()) => {
                let rev = tail
                    .parse::<u32>()
                    .map_err(|_| Error::invalid_url(s, format!("revision {tail:?} out of range")))?;
                (head, Some(rev))
            }
            _ => (name_part, None),
        };

        if !valid_name(name) {
            return Err(Error::invalid_url(s, format!("invalid name {name:?}")));
        }

        Ok(CharmUrl {
            series: series.to_string(),
            name: name.to_string(),
            revision,
        })
    }

    /// The series segment
    pub fn series(&self) -> &str {
        &self.series
    }

    /// The name segment
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The revision, if this URL is revisioned
    pub fn revision(&self) -> Option<u32> {
        self.revision
    }

    /// Whether this URL pins a specific revision
    pub fn is_revisioned(&self) -> bool {
        self.revision.is_some()
    }

    /// A copy of this URL pinned to the given revision
    pub fn with_revision(&self, revision: u32) -> Self {
        CharmUrl {
            series: self.series.clone(),
            name: self.name.clone(),
            revision: Some(revision),
        }
    }

    /// A copy of this URL with the revision stripped
    pub fn unrevisioned(&self) -> Self {
        CharmUrl {
            series: self.series.clone(),
            name: self.name.clone(),
            revision: None,
        }
    }
}

impl fmt::Display for CharmUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cs:{}/{}", self.series, self.name)?;
        if let Some(rev) = self.revision {
            write!(f, "-{rev}")?;
        }
        Ok(())
    }
}

impl FromStr for CharmUrl {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        CharmUrl::parse(s)
    }
}

fn valid_series(s: &str) -> bool {
    let mut bytes = s.bytes();
    match bytes.next() {
        Some(b) if b.is_ascii_lowercase() => {}
        _ => return false,
    }
    bytes.all(|b| b.is_ascii_lowercase() || b.is_ascii_digit())
}

fn valid_name(s: &str) -> bool {
    let bytes = s.as_bytes();
    if bytes.len() < 2 {
        return false;
    }
    if !bytes[0].is_ascii_lowercase() {
        return false;
    }
    let last = bytes[bytes.len() - 1];
    if !(last.is_ascii_lowercase() || last.is_ascii_digit()) {
        return false;
    }
    bytes[1..bytes.len() - 1]
        .iter()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || *b == b'-')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_unrevisioned() {
        let url = CharmUrl::parse("cs:oneiric/wordpress").unwrap();
        assert_eq!(url.series(), "oneiric");
        assert_eq!(url.name(), "wordpress");
        assert_eq!(url.revision(), None);
        assert!(!url.is_revisioned());
        assert_eq!(url.to_string(), "cs:oneiric/wordpress");
    }

    #[test]
    fn test_parse_revisioned() {
        let url = CharmUrl::parse("cs:oneiric/wordpress-12").unwrap();
        assert_eq!(url.name(), "wordpress");
        assert_eq!(url.revision(), Some(12));
        assert_eq!(url.to_string(), "cs:oneiric/wordpress-12");
    }

    #[test]
    fn test_parse_dashed_name() {
        // A non-numeric suffix is part of the name, not a revision.
        let url = CharmUrl::parse("cs:oneiric/wordpress-a").unwrap();
        assert_eq!(url.name(), "wordpress-a");
        assert_eq!(url.revision(), None);

        let url = CharmUrl::parse("cs:oneiric/wordpress-a-0").unwrap();
        assert_eq!(url.name(), "wordpress-a");
        assert_eq!(url.revision(), Some(0));
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for bad in [
            "",
            "wordpress",
            "cs:wordpress",
            "cs:/wordpress",
            "cs:oneiric/",
            "cs:Oneiric/wordpress",
            "cs:oneiric/Wordpress",
            "cs:oneiric/w",
            "cs:oneiric/wordpress-",
            "cs:1oneiric/wordpress",
            "cs:oneiric/-wordpress",
            "cs:oneiric/extra/wordpress",
        ] {
            assert!(
                matches!(CharmUrl::parse(bad), Err(Error::InvalidUrl { .. })),
                "expected parse failure for {bad:?}"
            );
        }
    }

    #[test]
    fn test_parse_revision_overflow() {
        assert!(CharmUrl::parse("cs:oneiric/wordpress-99999999999999999999").is_err());
    }

    #[test]
    fn test_with_revision_round_trip() {
        let url = CharmUrl::parse("cs:oneiric/mysql").unwrap();
        let pinned = url.with_revision(3);
        assert_eq!(pinned.to_string(), "cs:oneiric/mysql-3");
        assert_eq!(pinned.unrevisioned(), url);
    }

    #[test]
    fn test_unrevisioned_equality_ignores_nothing() {
        // Two unrevisioned URLs with the same series/name compare equal.
        let a = CharmUrl::parse("cs:oneiric/mysql").unwrap();
        let b = CharmUrl::parse("cs:oneiric/mysql").unwrap();
        assert_eq!(a, b);
        assert_ne!(a, a.with_revision(0));
    }

    #[test]
    fn test_from_str() {
        let url: CharmUrl = "cs:precise/dummy-0".parse().unwrap();
        assert_eq!(url.revision(), Some(0));
    }

    #[test]
    fn test_ordering_is_deterministic() {
        let mut urls = vec![
            CharmUrl::parse("cs:oneiric/wordpress-b").unwrap(),
            CharmUrl::parse("cs:oneiric/wordpress-a").unwrap(),
            CharmUrl::parse("cs:natty/wordpress-a").unwrap(),
        ];
        urls.sort();
        let strs: Vec<String> = urls.iter().map(|u| u.to_string()).collect();
        assert_eq!(
            strs,
            vec![
                "cs:natty/wordpress-a",
                "cs:oneiric/wordpress-a",
                "cs:oneiric/wordpress-b"
            ]
        );
    }
}
