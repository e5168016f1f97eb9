//! ---
//! ra_section: "14-versioning"
//! ra_subsection: "module"
//! ra_type: "source"
//! ra_scope: "code"
//! ra_description: "Update verdicts and their wire representation."
//! ra_version: "v0.1.0"
//! ra_owner: "tbd"
//! ---
use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::classifier::DeploymentMode;
use crate::source::github::Release;
use relay_versioning::{compare_versions, RecentChange, RevisionRef};

/// Release notes shown alongside a verdict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseInfo {
    pub name: String,
    pub body: String,
    pub published_at: Option<DateTime<Utc>>,
    pub url: Option<String>,
}

impl ReleaseInfo {
    /// Synthesised from the remote revision when verdicts are ref-based.
    pub fn from_revision(revision: &RevisionRef, body: String, url: Option<String>) -> Self {
        Self {
            name: revision
                .summary()
                .map(str::to_owned)
                .unwrap_or_else(|| revision.short().to_owned()),
            body,
            published_at: revision.timestamp(),
            url,
        }
    }

    pub fn from_release(release: &Release) -> Self {
        Self {
            name: release
                .name
                .clone()
                .filter(|name| !name.trim().is_empty())
                .unwrap_or_else(|| release.tag.clone()),
            body: release.body.clone().unwrap_or_default(),
            published_at: release.published_at,
            url: release.url.clone(),
        }
    }

    pub fn no_releases() -> Self {
        Self {
            name: "No releases found".to_owned(),
            body: "The upstream repository has no releases yet.".to_owned(),
            published_at: Some(Utc::now()),
            url: None,
        }
    }

    pub fn check_failed(message: &str) -> Self {
        Self {
            name: "Update check failed".to_owned(),
            body: format!("Unable to check for updates: {message}"),
            published_at: Some(Utc::now()),
            url: None,
        }
    }
}

/// Evidence gathered by one check. This is what gets cached; the
/// availability bit is always derived from it, never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerdictRecord {
    pub current_label: String,
    pub latest_label: String,
    pub method: DeploymentMode,
    pub local_ref: Option<RevisionRef>,
    pub remote_ref: Option<RevisionRef>,
    #[serde(default)]
    pub recent_changes: Vec<RecentChange>,
    #[serde(default)]
    pub release_info: Option<ReleaseInfo>,
    pub computed_at: DateTime<Utc>,
}

impl VerdictRecord {
    /// Record for a check that could not learn anything about upstream.
    pub fn unavailable(current_label: &str, method: DeploymentMode, release: ReleaseInfo) -> Self {
        Self {
            current_label: current_label.to_owned(),
            latest_label: current_label.to_owned(),
            method,
            local_ref: None,
            remote_ref: None,
            recent_changes: Vec::new(),
            release_info: Some(release),
            computed_at: Utc::now(),
        }
    }

    /// Same upstream evidence with freshly read local state.
    #[must_use]
    pub fn refreshed(mut self, current_label: &str, local_ref: Option<RevisionRef>) -> Self {
        self.current_label = current_label.to_owned();
        self.local_ref = local_ref;
        self
    }

    /// Whether the deployment is behind upstream.
    ///
    /// Ref inequality when both refs are known, otherwise numeric comparison
    /// of the version labels.
    pub fn has_update(&self) -> bool {
        match (&self.local_ref, &self.remote_ref) {
            (Some(local), Some(remote)) => !local.same_revision(remote),
            _ => compare_versions(&self.current_label, &self.latest_label) == Ordering::Less,
        }
    }
}

/// Outcome of a check: the record plus everything derived at response time.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateVerdict {
    pub record: VerdictRecord,
    pub has_update: bool,
    pub change_summary: String,
    pub cached: bool,
    pub warning: Option<String>,
    pub error: bool,
}

impl UpdateVerdict {
    /// Derive availability and summary from `record`.
    pub fn assess(record: VerdictRecord) -> Self {
        let has_update = record.has_update();
        let change_summary = summarize(&record, has_update);
        Self {
            record,
            has_update,
            change_summary,
            cached: false,
            warning: None,
            error: false,
        }
    }

    #[must_use]
    pub fn from_cache(mut self) -> Self {
        self.cached = true;
        self
    }

    #[must_use]
    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warning = Some(warning.into());
        self
    }

    #[must_use]
    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.change_summary = summary.into();
        self
    }

    #[must_use]
    pub fn failed(mut self) -> Self {
        self.error = true;
        self
    }

    /// Response body for the check endpoint.
    pub fn report(&self) -> CheckReport {
        let record = &self.record;
        CheckReport {
            current: record.current_label.clone(),
            latest: record.latest_label.clone(),
            has_update: self.has_update,
            method: record.method,
            local_ref: record.local_ref.as_ref().map(|r| r.short().to_owned()),
            remote_ref: record.remote_ref.as_ref().map(|r| r.short().to_owned()),
            is_managed: record.method.is_managed(),
            is_source_controlled: record.method.is_source_controlled(),
            release_info: record.release_info.clone(),
            recent_changes: if self.has_update {
                record.recent_changes.clone()
            } else {
                Vec::new()
            },
            change_summary: self.change_summary.clone(),
            cached: self.cached,
            computed_at: record.computed_at,
            warning: self.warning.clone(),
            error: self.error,
        }
    }
}

fn summarize(record: &VerdictRecord, has_update: bool) -> String {
    match (&record.local_ref, &record.remote_ref) {
        (Some(local), Some(remote)) if has_update => {
            let count = record.recent_changes.len();
            if count == 0 {
                format!("Update available: {} -> {}", local.short(), remote.short())
            } else {
                format!(
                    "Update available: {} -> {} ({count} new commit{})",
                    local.short(),
                    remote.short(),
                    if count == 1 { "" } else { "s" }
                )
            }
        }
        (Some(local), Some(_)) => format!("Up to date at {}", local.short()),
        _ if has_update => format!(
            "Version {} is available (running {})",
            record.latest_label, record.current_label
        ),
        _ => format!("Running the latest version ({})", record.current_label),
    }
}

/// Wire shape of `GET check-updates`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckReport {
    pub current: String,
    pub latest: String,
    pub has_update: bool,
    pub method: DeploymentMode,
    pub local_ref: Option<String>,
    pub remote_ref: Option<String>,
    pub is_managed: bool,
    pub is_source_controlled: bool,
    pub release_info: Option<ReleaseInfo>,
    pub recent_changes: Vec<RecentChange>,
    pub change_summary: String,
    pub cached: bool,
    pub computed_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub error: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(local: Option<&str>, remote: Option<&str>, current: &str, latest: &str) -> VerdictRecord {
        VerdictRecord {
            current_label: current.to_owned(),
            latest_label: latest.to_owned(),
            method: DeploymentMode::SourceControlled,
            local_ref: local.map(RevisionRef::new),
            remote_ref: remote.map(RevisionRef::new),
            recent_changes: vec![RecentChange::from(
                &RevisionRef::new("def5678").with_summary("fix bug"),
            )],
            release_info: None,
            computed_at: Utc::now(),
        }
    }

    #[test]
    fn ref_inequality_decides_when_both_known() {
        let verdict = UpdateVerdict::assess(record(Some("abc1234"), Some("def5678"), "1.0.0", "1.0.0"));
        assert!(verdict.has_update);
        assert_eq!(
            verdict.change_summary,
            "Update available: abc1234 -> def5678 (1 new commit)"
        );

        let verdict = UpdateVerdict::assess(record(Some("abc1234"), Some("abc1234ffff"), "1.0.0", "2.0.0"));
        assert!(!verdict.has_update);
        assert!(verdict.report().recent_changes.is_empty());
    }

    #[test]
    fn falls_back_to_version_labels() {
        assert!(record(None, Some("def5678"), "1.2.0", "1.10.0").has_update());
        assert!(!record(Some("abc1234"), None, "1.10.0", "1.2.0").has_update());
        assert!(!record(None, None, "1.0", "1.0.0").has_update());
    }

    #[test]
    fn refresh_recomputes_against_new_local_ref() {
        let cached = record(Some("abc1234"), Some("def5678"), "1.0.0", "def5678");
        let refreshed = cached.refreshed("1.0.1", Some(RevisionRef::new("def5678")));
        assert!(!refreshed.has_update());
        assert_eq!(refreshed.current_label, "1.0.1");
    }

    #[test]
    fn report_shape() {
        let verdict = UpdateVerdict::assess(record(Some("abc1234"), Some("def5678"), "1.0.0", "def5678"))
            .from_cache()
            .with_warning("Using cached data due to network error");
        let json = serde_json::to_value(verdict.report()).unwrap();
        assert_eq!(json["hasUpdate"], true);
        assert_eq!(json["cached"], true);
        assert_eq!(json["method"], "source-controlled");
        assert_eq!(json["isSourceControlled"], true);
        assert_eq!(json["recentChanges"][0]["ref"], "def5678");
        assert_eq!(json["recentChanges"][0]["summary"], "fix bug");
        assert!(json.get("error").is_none());
        assert!(json["computedAt"].is_string());
    }

    #[test]
    fn release_info_sources() {
        let rev = RevisionRef::new("def5678aaaa").with_summary("fix bug");
        let info = ReleaseInfo::from_revision(&rev, "1 new commit".into(), None);
        assert_eq!(info.name, "fix bug");
        let info = ReleaseInfo::from_revision(&RevisionRef::new("def5678aaaa"), String::new(), None);
        assert_eq!(info.name, "def5678");
        assert_eq!(ReleaseInfo::no_releases().name, "No releases found");
    }
}
