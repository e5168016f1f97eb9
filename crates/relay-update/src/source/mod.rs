//! ---
//! ra_section: "14-versioning"
//! ra_subsection: "module"
//! ra_type: "source"
//! ra_scope: "code"
//! ra_description: "Where current and latest revisions come from, per deployment mode."
//! ra_version: "v0.1.0"
//! ra_owner: "tbd"
//! ---
pub mod git;
pub mod github;
pub mod marker;

use std::sync::Arc;

use tracing::{debug, warn};

use crate::classifier::DeploymentMode;
use crate::error::{Result, UpdateError};
use git::WorkingCopy;
use github::{Release, RemoteError, RemoteRepository};
use marker::AppliedRevisionMarker;
use relay_versioning::RevisionRef;

/// Dispatches revision lookups to the working copy, the marker file or the
/// hosted repository depending on [`DeploymentMode`].
#[derive(Clone)]
pub struct RevisionSource {
    working_copy: WorkingCopy,
    remote: Option<Arc<dyn RemoteRepository>>,
    marker: AppliedRevisionMarker,
}

impl RevisionSource {
    pub fn new(
        working_copy: WorkingCopy,
        remote: Option<Arc<dyn RemoteRepository>>,
        marker: AppliedRevisionMarker,
    ) -> Self {
        Self {
            working_copy,
            remote,
            marker,
        }
    }

    pub fn working_copy(&self) -> &WorkingCopy {
        &self.working_copy
    }

    pub fn marker(&self) -> &AppliedRevisionMarker {
        &self.marker
    }

    fn remote(&self) -> std::result::Result<&Arc<dyn RemoteRepository>, RemoteError> {
        self.remote.as_ref().ok_or(RemoteError::NotConfigured)
    }

    /// Revision the deployment is running.
    pub async fn local_ref(&self, mode: DeploymentMode) -> Option<RevisionRef> {
        match mode {
            DeploymentMode::SourceControlled => match self.working_copy.head().await {
                Ok(head) => Some(head),
                Err(err) => {
                    warn!(error = %err, "unable to read working copy head");
                    None
                }
            },
            DeploymentMode::Unmanaged => self.marker.read().await,
            DeploymentMode::Managed => None,
        }
    }

    /// Head of the tracked branch according to the hosted API.
    ///
    /// `Ok(None)` when the branch does not exist upstream.
    pub async fn remote_ref(&self) -> std::result::Result<Option<RevisionRef>, RemoteError> {
        let result = self.remote()?.latest_revision().await;
        if let Err(err) = &result {
            warn!(error = %err, "remote revision lookup failed");
        }
        result
    }

    /// Fill in commit metadata for `reference` from the hosted API. Falls
    /// back to the bare id when the lookup is unavailable.
    pub async fn resolve(&self, reference: &str) -> RevisionRef {
        let Ok(remote) = self.remote() else {
            return RevisionRef::new(reference);
        };
        match remote.revision(reference).await {
            Ok(Some(revision)) => revision,
            Ok(None) => {
                debug!(revision = reference, "revision unknown upstream");
                RevisionRef::new(reference)
            }
            Err(err) => {
                warn!(error = %err, revision = reference, "revision lookup failed");
                RevisionRef::new(reference)
            }
        }
    }

    /// Fetch the tracked branch and read the remote-tracking ref.
    pub async fn remote_ref_via_sync(&self, mode: DeploymentMode) -> Result<Option<RevisionRef>> {
        if !mode.is_source_controlled() {
            return Ok(None);
        }
        self.working_copy
            .fetch()
            .await
            .map_err(UpdateError::SyncFailed)?;
        self.working_copy.remote_tracking().await.map(Some)
    }

    /// Commits after `local` up to `remote`, newest first. Best-effort: any
    /// failure yields an empty list. Hosted history stops at `local`.
    pub async fn recent_changes(
        &self,
        mode: DeploymentMode,
        local: &RevisionRef,
        remote: &RevisionRef,
        limit: usize,
    ) -> Vec<RevisionRef> {
        let mut changes = None;
        if mode.is_source_controlled() {
            match self
                .working_copy
                .log_between(local.id(), remote.id(), limit)
                .await
            {
                Ok(log) => changes = Some(log),
                Err(err) => debug!(error = %err, "local history unavailable; trying hosted api"),
            }
        }
        if changes.is_none() {
            if let Ok(remote_repo) = self.remote() {
                let since = match local.timestamp() {
                    Some(at) => Some(at),
                    None => self.resolve(local.id()).await.timestamp(),
                };
                match remote_repo.revisions_since(since, limit).await {
                    Ok(log) => {
                        changes = Some(
                            log.into_iter()
                                .take_while(|change| !local.same_revision(change))
                                .collect(),
                        )
                    }
                    Err(err) => warn!(error = %err, "recent changes unavailable"),
                }
            }
        }
        let mut changes: Vec<RevisionRef> = changes
            .unwrap_or_default()
            .into_iter()
            .filter(|change| !local.same_revision(change))
            .collect();
        changes.truncate(limit);
        changes
    }

    /// Latest published release, `Ok(None)` when there is none.
    pub async fn latest_release(&self) -> std::result::Result<Option<Release>, RemoteError> {
        let result = self.remote()?.latest_release().await;
        if let Err(err) = &result {
            warn!(error = %err, "release lookup failed");
        }
        result
    }

    /// Browser URL for a revision when a hosted repository is configured.
    pub fn revision_url(&self, id: &str) -> Option<String> {
        self.remote.as_ref().and_then(|remote| remote.revision_url(id))
    }
}
