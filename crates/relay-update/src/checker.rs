//! ---
//! ra_section: "14-versioning"
//! ra_subsection: "module"
//! ra_type: "source"
//! ra_scope: "code"
//! ra_description: "Computes whether the deployment is behind upstream."
//! ra_version: "v0.1.0"
//! ra_owner: "tbd"
//! ---
use tracing::{debug, info, warn};

use crate::cache::VerdictCache;
use crate::classifier::{DeploymentClassifier, DeploymentMode};
use crate::error::{FailureKind, Result, UpdateError};
use crate::lock::ExecutionLock;
use crate::source::github::RemoteError;
use crate::source::RevisionSource;
use crate::verdict::{ReleaseInfo, UpdateVerdict, VerdictRecord};
use relay_common::{read_version_label, UpdateConfig};
use relay_metrics::UpdateMetrics;
use relay_versioning::{RecentChange, RevisionRef};

const NETWORK_WARNING: &str = "Using cached data due to network error";
const BUSY_WARNING: &str = "An update is in progress; showing the last known status";

/// Produces [`UpdateVerdict`]s. Checks never fail: upstream trouble is
/// reported through the verdict's warning and error fields.
#[derive(Clone)]
pub struct UpdateChecker {
    config: UpdateConfig,
    classifier: DeploymentClassifier,
    source: RevisionSource,
    cache: VerdictCache,
    lock: ExecutionLock,
    metrics: Option<UpdateMetrics>,
}

impl UpdateChecker {
    pub fn new(
        config: UpdateConfig,
        classifier: DeploymentClassifier,
        source: RevisionSource,
        cache: VerdictCache,
        lock: ExecutionLock,
    ) -> Self {
        Self {
            config,
            classifier,
            source,
            cache,
            lock,
            metrics: None,
        }
    }

    #[must_use]
    pub fn with_metrics(mut self, metrics: UpdateMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub async fn current_label(&self) -> String {
        read_version_label(&self.config.version_path(), &self.config.baseline_version).await
    }

    /// Check for an update, consulting the cache unless `force` is set.
    pub async fn check(&self, force: bool) -> UpdateVerdict {
        let label = self.current_label().await;
        let mode = self.classifier.classify().await;
        let local = self.source.local_ref(mode).await;

        if !force {
            if let Some(entry) = self.cache.verdict().await {
                if entry.is_fresh() && entry.payload.method == mode {
                    debug!(method = %mode, stored_at = %entry.stored_at, "serving cached verdict");
                    self.record("cache-hit", mode);
                    if let Some(metrics) = &self.metrics {
                        metrics.record_cache_hit();
                    }
                    return UpdateVerdict::assess(entry.payload.refreshed(&label, local))
                        .from_cache();
                }
            }
        }

        let busy = mode.is_source_controlled() && self.lock.is_held();
        if busy {
            if let Some(verdict) = self.stale(mode, &label, local.clone(), BUSY_WARNING).await {
                self.record("busy", mode);
                return verdict;
            }
        }

        match self.compute(mode, &label, local.clone(), busy).await {
            Ok(record) => {
                if let Err(err) = self.cache.store_verdict(&record).await {
                    warn!(error = %err, "unable to cache update verdict");
                }
                let verdict = UpdateVerdict::assess(record);
                info!(
                    method = %mode,
                    has_update = verdict.has_update,
                    current = %verdict.record.current_label,
                    latest = %verdict.record.latest_label,
                    "update check complete"
                );
                self.record("fresh", mode);
                verdict
            }
            Err(err) => self.degrade(mode, &label, local, err).await,
        }
    }

    async fn compute(
        &self,
        mode: DeploymentMode,
        label: &str,
        local: Option<RevisionRef>,
        skip_sync: bool,
    ) -> Result<VerdictRecord> {
        let mut sync_failure = None;
        let mut remote = None;

        if mode.is_source_controlled() && !skip_sync {
            match self.source.remote_ref_via_sync(mode).await {
                Ok(found) => remote = found,
                Err(err) => {
                    warn!(error = %err, "synchronize failed; falling back to hosted api");
                    sync_failure = Some(err);
                }
            }
        }
        if remote.is_none() && !mode.is_managed() {
            remote = self.source.remote_ref().await.ok().flatten();
        }

        if let (Some(local), Some(remote)) = (&local, &remote) {
            return Ok(self.ref_record(mode, label, local, remote).await);
        }

        debug!(method = %mode, local = local.is_some(), remote = remote.is_some(), "comparing version labels");
        let release = match self.source.latest_release().await {
            Ok(Some(release)) => release,
            Ok(None) => {
                return Err(sync_failure
                    .unwrap_or_else(|| UpdateError::UpstreamMissing("no published release".into())))
            }
            Err(err) => {
                return Err(match (err, sync_failure) {
                    (RemoteError::NotConfigured, Some(sync)) => sync,
                    (err, _) => err.into(),
                })
            }
        };
        Ok(VerdictRecord {
            current_label: label.to_owned(),
            latest_label: release.version().to_owned(),
            method: mode,
            local_ref: local,
            remote_ref: remote,
            recent_changes: Vec::new(),
            release_info: Some(ReleaseInfo::from_release(&release)),
            computed_at: chrono::Utc::now(),
        })
    }

    async fn ref_record(
        &self,
        mode: DeploymentMode,
        label: &str,
        local: &RevisionRef,
        remote: &RevisionRef,
    ) -> VerdictRecord {
        let changes = if local.same_revision(remote) {
            Vec::new()
        } else {
            self.source
                .recent_changes(mode, local, remote, self.config.recent_change_limit)
                .await
        };
        let body = if changes.is_empty() {
            remote.summary().unwrap_or_default().to_owned()
        } else {
            changes
                .iter()
                .map(|change| format!("{} {}", change.short(), change.summary().unwrap_or_default()))
                .collect::<Vec<_>>()
                .join("\n")
        };
        VerdictRecord {
            current_label: label.to_owned(),
            latest_label: remote.short().to_owned(),
            method: mode,
            local_ref: Some(local.clone()),
            remote_ref: Some(remote.clone()),
            recent_changes: changes.iter().map(RecentChange::from).collect(),
            release_info: Some(ReleaseInfo::from_revision(
                remote,
                body,
                self.source.revision_url(remote.id()),
            )),
            computed_at: chrono::Utc::now(),
        }
    }

    /// Last cached verdict for `mode` regardless of freshness.
    async fn stale(
        &self,
        mode: DeploymentMode,
        label: &str,
        local: Option<RevisionRef>,
        warning: &str,
    ) -> Option<UpdateVerdict> {
        let entry = self.cache.verdict().await?;
        if entry.payload.method != mode {
            debug!(cached = %entry.payload.method, current = %mode, "ignoring cached verdict from another mode");
            return None;
        }
        Some(
            UpdateVerdict::assess(entry.payload.refreshed(label, local))
                .from_cache()
                .with_warning(warning),
        )
    }

    async fn degrade(
        &self,
        mode: DeploymentMode,
        label: &str,
        local: Option<RevisionRef>,
        err: UpdateError,
    ) -> UpdateVerdict {
        let network = err.kind() == FailureKind::Network || matches!(err, UpdateError::SyncFailed(_));
        if network {
            if let Some(verdict) = self.stale(mode, label, local, NETWORK_WARNING).await {
                warn!(error = %err, "update check failed; serving last known verdict");
                self.record("stale", mode);
                return verdict;
            }
        }

        if err.kind() == FailureKind::NotFound {
            let warning = match &err {
                UpdateError::Remote(RemoteError::NotConfigured) => err.to_string(),
                _ => "Upstream repository has no releases".to_owned(),
            };
            info!(method = %mode, %warning, "no upstream release");
            self.record("not-found", mode);
            return UpdateVerdict::assess(VerdictRecord::unavailable(
                label,
                mode,
                ReleaseInfo::no_releases(),
            ))
            .with_summary("No releases found upstream")
            .with_warning(warning);
        }

        warn!(error = %err, kind = %err.kind(), "update check failed");
        self.record("error", mode);
        let message = err.to_string();
        UpdateVerdict::assess(VerdictRecord::unavailable(
            label,
            mode,
            ReleaseInfo::check_failed(&message),
        ))
        .with_summary(format!("Unable to check for updates: {message}"))
        .with_warning(message)
        .failed()
    }

    fn record(&self, outcome: &str, mode: DeploymentMode) {
        if let Some(metrics) = &self.metrics {
            metrics.record_check(mode.as_ref(), outcome);
        }
    }
}
