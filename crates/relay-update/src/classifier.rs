//! ---
//! ra_section: "14-versioning"
//! ra_subsection: "module"
//! ra_type: "source"
//! ra_scope: "code"
//! ra_description: "Deployment topology detection."
//! ra_version: "v0.1.0"
//! ra_owner: "tbd"
//! ---
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use tracing::debug;

use crate::process::{Invocation, ProcessRunner};
use relay_common::UpdateConfig;

/// How the running instance was deployed, which decides the update strategy.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, AsRefStr, EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum DeploymentMode {
    /// Container image; updates happen by replacing the image.
    Managed,
    /// Version-control working copy that can be advanced in place.
    SourceControlled,
    /// Unpacked archive with neither container nor version-control metadata.
    Unmanaged,
}

impl DeploymentMode {
    pub fn is_managed(self) -> bool {
        matches!(self, Self::Managed)
    }

    pub fn is_source_controlled(self) -> bool {
        matches!(self, Self::SourceControlled)
    }
}

/// Probes the filesystem and the working copy to pick a [`DeploymentMode`].
#[derive(Clone)]
pub struct DeploymentClassifier {
    container_markers: Vec<PathBuf>,
    project_root: PathBuf,
    probe_timeout: Duration,
    runner: Arc<dyn ProcessRunner>,
}

impl DeploymentClassifier {
    pub fn new(config: &UpdateConfig, runner: Arc<dyn ProcessRunner>) -> Self {
        Self {
            container_markers: config.container_markers.clone(),
            project_root: config.project_root.clone(),
            probe_timeout: config.probe_timeout,
            runner,
        }
    }

    /// Classify the deployment. Never fails; inconclusive probes yield `Unmanaged`.
    pub async fn classify(&self) -> DeploymentMode {
        for marker in &self.container_markers {
            if tokio::fs::try_exists(marker).await.unwrap_or(false) {
                debug!(marker = %marker.display(), "container marker present");
                return DeploymentMode::Managed;
            }
        }

        let probe = Invocation::new("git", self.probe_timeout)
            .args(["rev-parse", "--is-inside-work-tree"])
            .env("GIT_TERMINAL_PROMPT", "0")
            .current_dir(&self.project_root);
        match self.runner.run(&probe).await {
            Ok(output) if output.success && output.stdout.trim() == "true" => {
                DeploymentMode::SourceControlled
            }
            Ok(output) => {
                debug!(code = ?output.code, "working copy probe negative");
                DeploymentMode::Unmanaged
            }
            Err(err) => {
                debug!(error = %err, "working copy probe inconclusive");
                DeploymentMode::Unmanaged
            }
        }
    }
}
