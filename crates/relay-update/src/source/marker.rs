//! ---
//! ra_section: "14-versioning"
//! ra_subsection: "module"
//! ra_type: "source"
//! ra_scope: "code"
//! ra_description: "Applied-revision marker for archive deployments."
//! ra_version: "v0.1.0"
//! ra_owner: "tbd"
//! ---
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::Result;
use relay_versioning::RevisionRef;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MarkerRecord {
    #[serde(rename = "ref")]
    reference: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    committed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    applied_at: Option<DateTime<Utc>>,
}

/// File recording the last revision applied to this deployment.
///
/// Accepts either `{"ref": "...", "committedAt": "...", "appliedAt": "..."}`
/// or a bare revision string. Only `committedAt` dates the revision;
/// `appliedAt` records when the deployment was replaced.
#[derive(Debug, Clone)]
pub struct AppliedRevisionMarker {
    path: PathBuf,
}

impl AppliedRevisionMarker {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Recorded revision, or `None` when absent or unreadable.
    pub async fn read(&self) -> Option<RevisionRef> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no applied-revision marker");
                return None;
            }
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "unable to read applied-revision marker");
                return None;
            }
        };
        parse_marker(&raw)
    }

    /// Record `revision` as applied now.
    pub async fn write(&self, revision: &RevisionRef) -> Result<()> {
        let record = MarkerRecord {
            reference: revision.id().to_owned(),
            summary: revision.summary().map(str::to_owned),
            committed_at: revision.timestamp(),
            applied_at: Some(Utc::now()),
        };
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(&record)?).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        debug!(path = %self.path.display(), revision = revision.short(), "applied-revision marker written");
        Ok(())
    }
}

fn parse_marker(raw: &str) -> Option<RevisionRef> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if trimmed.starts_with('{') {
        return match serde_json::from_str::<MarkerRecord>(trimmed) {
            Ok(record) if !record.reference.trim().is_empty() => {
                let mut revision = RevisionRef::new(record.reference);
                if let Some(summary) = record.summary {
                    revision = revision.with_summary(summary);
                }
                if let Some(at) = record.committed_at {
                    revision = revision.with_timestamp(at);
                }
                Some(revision)
            }
            Ok(_) => None,
            Err(err) => {
                warn!(error = %err, "malformed applied-revision marker");
                None
            }
        };
    }
    trimmed
        .lines()
        .next()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(RevisionRef::new)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let marker = AppliedRevisionMarker::new(dir.path().join("state/applied.json"));
        assert!(marker.read().await.is_none());

        marker.write(&RevisionRef::new("def5678aaaa")).await.unwrap();
        let read = marker.read().await.unwrap();
        assert_eq!(read.id(), "def5678aaaa");
        assert!(read.timestamp().is_none());

        let committed = "2024-05-01T08:00:00Z".parse::<DateTime<Utc>>().unwrap();
        marker
            .write(
                &RevisionRef::new("abc1234bbbb")
                    .with_summary("initial")
                    .with_timestamp(committed),
            )
            .await
            .unwrap();
        let read = marker.read().await.unwrap();
        assert_eq!(read.summary(), Some("initial"));
        assert_eq!(read.timestamp(), Some(committed));
    }

    #[test]
    fn applied_time_does_not_date_the_revision() {
        let read = parse_marker(
            r#"{"ref":"abc1234","committedAt":"2024-05-01T08:00:00Z","appliedAt":"2024-06-01T08:00:00Z"}"#,
        )
        .unwrap();
        assert_eq!(read.timestamp().unwrap().to_rfc3339(), "2024-05-01T08:00:00+00:00");

        let legacy = parse_marker(r#"{"ref":"abc1234","appliedAt":"2024-06-01T08:00:00Z"}"#).unwrap();
        assert!(legacy.timestamp().is_none());
    }

    #[test]
    fn accepts_bare_and_json_forms() {
        assert_eq!(parse_marker("abc1234\n").unwrap().id(), "abc1234");
        assert_eq!(
            parse_marker(r#"{"ref":"abc1234","appliedAt":"2024-05-01T08:00:00Z"}"#)
                .unwrap()
                .id(),
            "abc1234"
        );
        assert!(parse_marker("").is_none());
        assert!(parse_marker("{not json").is_none());
        assert!(parse_marker(r#"{"ref":"  "}"#).is_none());
    }
}
