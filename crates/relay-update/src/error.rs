//! ---
//! ra_section: "14-versioning"
//! ra_subsection: "module"
//! ra_type: "source"
//! ra_scope: "code"
//! ra_description: "Failure taxonomy for update checks and executions."
//! ra_version: "v0.1.0"
//! ra_owner: "tbd"
//! ---
use serde::Serialize;
use strum::{AsRefStr, Display};

use crate::classifier::DeploymentMode;
use crate::process::ProcessError;
use crate::source::github::RemoteError;
use relay_common::StoreError;

/// Result alias used throughout the update crate.
pub type Result<T> = std::result::Result<T, UpdateError>;

/// Coarse classification used to decide how a failure is surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display, AsRefStr)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum FailureKind {
    /// Timeouts, refused connections, unexpected upstream statuses.
    Network,
    /// Upstream has no release or branch.
    NotFound,
    /// Operation is not valid for the current deployment.
    Precondition,
    /// An external program failed.
    ExternalTool,
    /// Malformed cached or upstream payload.
    Parse,
    /// Another update holds the execution lock.
    Busy,
    /// Local filesystem failure.
    Io,
}

/// Error type for the update orchestrator.
#[derive(Debug, thiserror::Error)]
pub enum UpdateError {
    /// In-place updates only apply to version-controlled checkouts.
    #[error("in-place update is not available for {mode} deployments")]
    NotSourceControlled { mode: DeploymentMode },
    /// Another execute call is running against the same project root.
    #[error("an update is already in progress")]
    InProgress,
    /// Fetching the upstream branch failed.
    #[error("failed to synchronize with upstream: {0}")]
    SyncFailed(#[source] ProcessError),
    /// Moving the working copy to the upstream revision failed.
    #[error("failed to advance working copy: {0}")]
    AdvanceFailed(#[source] ProcessError),
    /// A revision that must exist could not be read.
    #[error("revision unavailable: {0}")]
    UpstreamMissing(String),
    #[error(transparent)]
    Process(#[from] ProcessError),
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("malformed payload: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl UpdateError {
    /// Taxonomy bucket for this error.
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::NotSourceControlled { .. } => FailureKind::Precondition,
            Self::InProgress => FailureKind::Busy,
            Self::SyncFailed(_) | Self::AdvanceFailed(_) | Self::Process(_) => {
                FailureKind::ExternalTool
            }
            Self::UpstreamMissing(_) => FailureKind::NotFound,
            Self::Remote(err) => err.kind(),
            Self::Store(StoreError::Serialization(_)) | Self::Parse(_) => FailureKind::Parse,
            Self::Store(StoreError::Unavailable(_)) => FailureKind::Network,
            Self::Io(_) => FailureKind::Io,
        }
    }

    /// Machine-readable reason surfaced to API clients.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::NotSourceControlled { .. } => "not-source-controlled",
            Self::InProgress => "update-in-progress",
            Self::SyncFailed(_) => "sync-failed",
            Self::AdvanceFailed(_) => "advance-failed",
            Self::UpstreamMissing(_) => "upstream-missing",
            Self::Process(_) => "external-tool-failed",
            Self::Remote(_) => "upstream-unavailable",
            Self::Store(_) => "store-unavailable",
            Self::Parse(_) => "malformed-payload",
            Self::Io(_) => "io-error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reasons_and_kinds() {
        let err = UpdateError::NotSourceControlled {
            mode: DeploymentMode::Managed,
        };
        assert_eq!(err.reason(), "not-source-controlled");
        assert_eq!(err.kind(), FailureKind::Precondition);
        assert_eq!(
            err.to_string(),
            "in-place update is not available for managed deployments"
        );

        let err = UpdateError::SyncFailed(ProcessError::TimedOut {
            command: "git fetch origin main".into(),
            timeout: std::time::Duration::from_secs(60),
        });
        assert_eq!(err.reason(), "sync-failed");
        assert_eq!(err.kind(), FailureKind::ExternalTool);
        assert_eq!(UpdateError::InProgress.kind(), FailureKind::Busy);
        assert_eq!(FailureKind::ExternalTool.as_ref(), "external-tool");
    }
}
