//! ---
//! ra_section: "14-versioning"
//! ra_subsection: "module"
//! ra_type: "source"
//! ra_scope: "code"
//! ra_description: "Version labels, build metadata and revision references."
//! ra_version: "v0.1.0"
//! ra_owner: "tbd"
//! ---
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Number of characters shown for the short form of a revision.
pub const SHORT_REF_LEN: usize = 7;

/// Identifier of a point in upstream history plus optional metadata.
///
/// The full identifier is canonical; [`RevisionRef::short`] is derived on
/// demand and never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevisionRef {
    id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    author: Option<String>,
}

impl RevisionRef {
    /// Create a reference from its identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into().trim().to_owned(),
            summary: None,
            timestamp: None,
            author: None,
        }
    }

    /// Attach a one-line summary (commit subject or release name).
    #[must_use]
    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        let summary = summary.into();
        let summary = summary.trim();
        self.summary = (!summary.is_empty()).then(|| summary.to_owned());
        self
    }

    /// Attach the commit or publication timestamp.
    #[must_use]
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Attach the author name.
    #[must_use]
    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        let author = author.into();
        let author = author.trim();
        self.author = (!author.is_empty()).then(|| author.to_owned());
        self
    }

    /// Canonical identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Truncated display form of the identifier.
    #[must_use]
    pub fn short(&self) -> &str {
        match self.id.char_indices().nth(SHORT_REF_LEN) {
            Some((idx, _)) => &self.id[..idx],
            None => &self.id,
        }
    }

    /// One-line summary, if known.
    #[must_use]
    pub fn summary(&self) -> Option<&str> {
        self.summary.as_deref()
    }

    /// Timestamp, if known.
    #[must_use]
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.timestamp
    }

    /// Author, if known.
    #[must_use]
    pub fn author(&self) -> Option<&str> {
        self.author.as_deref()
    }

    /// True when `other` names this revision, either in full or as an
    /// abbreviation of at least [`SHORT_REF_LEN`] characters (or vice versa).
    #[must_use]
    pub fn matches(&self, other: &str) -> bool {
        let ours = self.id.to_ascii_lowercase();
        let theirs = other.trim().to_ascii_lowercase();
        if ours.is_empty() || theirs.is_empty() {
            return false;
        }
        if ours == theirs {
            return true;
        }
        let shorter = ours.len().min(theirs.len());
        shorter >= SHORT_REF_LEN && (ours.starts_with(&theirs) || theirs.starts_with(&ours))
    }

    /// True when both references name the same revision.
    #[must_use]
    pub fn same_revision(&self, other: &RevisionRef) -> bool {
        self.matches(&other.id)
    }
}

/// Serialized view of a change entry in check responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentChange {
    /// Short revision identifier.
    #[serde(rename = "ref")]
    pub reference: String,
    /// Commit subject.
    pub summary: String,
    /// Commit timestamp.
    pub timestamp: Option<DateTime<Utc>>,
    /// Commit author.
    pub author: Option<String>,
}

impl From<&RevisionRef> for RecentChange {
    fn from(revision: &RevisionRef) -> Self {
        Self {
            reference: revision.short().to_owned(),
            summary: revision.summary().unwrap_or_default().to_owned(),
            timestamp: revision.timestamp(),
            author: revision.author().map(str::to_owned),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_form_is_derived() {
        let rev = RevisionRef::new("0123456789abcdef");
        assert_eq!(rev.short(), "0123456");
        assert_eq!(rev.id(), "0123456789abcdef");
        assert_eq!(RevisionRef::new("abc").short(), "abc");
    }

    #[test]
    fn abbreviations_match_full_identifiers() {
        let full = RevisionRef::new("abc1234ffee0011");
        assert!(full.matches("abc1234"));
        assert!(full.matches("ABC1234FFEE0011"));
        assert!(!full.matches("abc12"));
        assert!(!full.matches("def5678"));
        assert!(!full.matches(""));
        assert!(RevisionRef::new("abc1234").same_revision(&full));
    }

    #[test]
    fn empty_metadata_is_dropped() {
        let rev = RevisionRef::new("abc1234")
            .with_summary("   ")
            .with_author("");
        assert_eq!(rev.summary(), None);
        assert_eq!(rev.author(), None);
    }

    #[test]
    fn recent_change_uses_short_ref() {
        let rev = RevisionRef::new("def5678aaaa").with_summary("fix bug");
        let change = RecentChange::from(&rev);
        assert_eq!(change.reference, "def5678");
        assert_eq!(change.summary, "fix bug");
        let json = serde_json::to_value(&change).unwrap();
        assert_eq!(json["ref"], "def5678");
    }
}
