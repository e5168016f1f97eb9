//! ---
//! ra_section: "14-versioning"
//! ra_subsection: "module"
//! ra_type: "source"
//! ra_scope: "code"
//! ra_description: "Wiring of the update orchestrator components."
//! ra_version: "v0.1.0"
//! ra_owner: "tbd"
//! ---
use std::sync::Arc;

use tracing::info;

use crate::cache::VerdictCache;
use crate::checker::UpdateChecker;
use crate::classifier::{DeploymentClassifier, DeploymentMode};
use crate::error::Result;
use crate::executor::{UpdateExecutor, UpdateOutcome};
use crate::lock::ExecutionLock;
use crate::process::{ProcessRunner, TokioProcessRunner};
use crate::source::git::WorkingCopy;
use crate::source::github::{GitHubRepository, RemoteRepository};
use crate::source::marker::AppliedRevisionMarker;
use crate::source::RevisionSource;
use crate::verdict::UpdateVerdict;
use relay_common::{KeyValueStore, UpdateConfig};
use relay_metrics::UpdateMetrics;
use relay_versioning::RevisionRef;

/// Entry point used by the API and the CLI.
#[derive(Clone)]
pub struct UpdateService {
    config: UpdateConfig,
    classifier: DeploymentClassifier,
    source: RevisionSource,
    checker: UpdateChecker,
    executor: UpdateExecutor,
}

impl UpdateService {
    /// Production wiring: real processes and the GitHub API when configured.
    pub fn from_config(config: &UpdateConfig, store: Arc<dyn KeyValueStore>) -> Result<Self> {
        let remote = GitHubRepository::from_config(config)?
            .map(|repo| Arc::new(repo) as Arc<dyn RemoteRepository>);
        if remote.is_none() {
            info!("no hosted repository configured; release lookups disabled");
        }
        Ok(Self::with_parts(
            config.clone(),
            store,
            Arc::new(TokioProcessRunner),
            remote,
        ))
    }

    /// Wiring with explicit collaborators.
    pub fn with_parts(
        config: UpdateConfig,
        store: Arc<dyn KeyValueStore>,
        runner: Arc<dyn ProcessRunner>,
        remote: Option<Arc<dyn RemoteRepository>>,
    ) -> Self {
        let classifier = DeploymentClassifier::new(&config, runner.clone());
        let source = RevisionSource::new(
            WorkingCopy::new(&config, runner.clone()),
            remote,
            AppliedRevisionMarker::new(config.marker_path()),
        );
        let cache = VerdictCache::new(store, config.cache_ttl, config.stale_retention);
        let lock = ExecutionLock::for_root(&config.project_root);
        let checker = UpdateChecker::new(
            config.clone(),
            classifier.clone(),
            source.clone(),
            cache.clone(),
            lock.clone(),
        );
        let executor = UpdateExecutor::new(
            config.clone(),
            classifier.clone(),
            source.clone(),
            cache,
            lock,
            runner,
        );
        Self {
            config,
            classifier,
            source,
            checker,
            executor,
        }
    }

    #[must_use]
    pub fn with_metrics(mut self, metrics: UpdateMetrics) -> Self {
        self.checker = self.checker.with_metrics(metrics.clone());
        self.executor = self.executor.with_metrics(metrics);
        self
    }

    pub fn config(&self) -> &UpdateConfig {
        &self.config
    }

    pub async fn classify(&self) -> DeploymentMode {
        self.classifier.classify().await
    }

    pub async fn current_label(&self) -> String {
        self.checker.current_label().await
    }

    pub async fn check(&self, force: bool) -> UpdateVerdict {
        self.checker.check(force).await
    }

    pub async fn execute(&self) -> Result<UpdateOutcome> {
        self.executor.execute().await
    }

    /// Record `reference` as the revision an archive deployment runs,
    /// dated from the hosted repository when it knows the commit.
    pub async fn mark_applied(&self, reference: &str) -> Result<RevisionRef> {
        let revision = self.source.resolve(reference.trim()).await;
        self.source.marker().write(&revision).await?;
        info!(revision = revision.short(), path = %self.source.marker().path().display(), "applied revision recorded");
        Ok(revision)
    }
}
