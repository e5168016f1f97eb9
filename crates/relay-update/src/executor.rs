//! ---
//! ra_section: "14-versioning"
//! ra_subsection: "module"
//! ra_type: "source"
//! ra_scope: "code"
//! ra_description: "Advances a source-controlled deployment to the upstream head."
//! ra_version: "v0.1.0"
//! ra_owner: "tbd"
//! ---
//! Execution is a linear sequence of steps. Precheck, synchronize and
//! advance abort the run; stash, dependency refresh, asset rebuild and
//! cache invalidation are recorded as failed steps and the run continues.
//! Nothing is written into the working copy besides what `git` itself
//! changes. The process is never restarted from here.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use strum::{AsRefStr, Display};
use tracing::{info, warn};

use crate::cache::VerdictCache;
use crate::classifier::DeploymentClassifier;
use crate::error::{Result, UpdateError};
use crate::lock::ExecutionLock;
use crate::process::{Invocation, ProcessRunner};
use crate::source::RevisionSource;
use relay_common::UpdateConfig;
use relay_metrics::UpdateMetrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display, AsRefStr)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum UpdateStep {
    Precheck,
    Stash,
    Synchronize,
    Compare,
    Advance,
    DependencyRefresh,
    AssetRebuild,
    CacheInvalidation,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepRecord {
    pub step: UpdateStep,
    pub description: String,
    pub succeeded: bool,
    pub duration_ms: u64,
}

/// Ordered log of the steps taken by one execution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct UpdateStepReport {
    entries: Vec<StepRecord>,
}

impl UpdateStepReport {
    pub fn push(&mut self, record: StepRecord) {
        self.entries.push(record);
    }

    pub fn get(&self, step: UpdateStep) -> Option<&StepRecord> {
        self.entries.iter().find(|entry| entry.step == step)
    }

    pub fn failures(&self) -> impl Iterator<Item = &StepRecord> {
        self.entries.iter().filter(|entry| !entry.succeeded)
    }
}

/// Result of a completed execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateOutcome {
    pub updated: bool,
    pub previous_ref: Option<String>,
    pub current_ref: Option<String>,
    pub steps: UpdateStepReport,
    pub need_restart: bool,
    pub message: String,
}

#[derive(Clone)]
pub struct UpdateExecutor {
    config: UpdateConfig,
    classifier: DeploymentClassifier,
    source: RevisionSource,
    cache: VerdictCache,
    lock: ExecutionLock,
    runner: Arc<dyn ProcessRunner>,
    metrics: Option<UpdateMetrics>,
}

struct StepTimer {
    step: UpdateStep,
    started: Instant,
}

impl UpdateExecutor {
    pub fn new(
        config: UpdateConfig,
        classifier: DeploymentClassifier,
        source: RevisionSource,
        cache: VerdictCache,
        lock: ExecutionLock,
        runner: Arc<dyn ProcessRunner>,
    ) -> Self {
        Self {
            config,
            classifier,
            source,
            cache,
            lock,
            runner,
            metrics: None,
        }
    }

    #[must_use]
    pub fn with_metrics(mut self, metrics: UpdateMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Advance the working copy to the upstream head.
    pub async fn execute(&self) -> Result<UpdateOutcome> {
        let started = Instant::now();
        let result = self.run().await;
        if let Some(metrics) = &self.metrics {
            let outcome = match &result {
                Ok(outcome) if outcome.updated => "updated",
                Ok(_) => "noop",
                Err(err) => err.reason(),
            };
            metrics.record_execute(outcome, started.elapsed().as_secs_f64());
        }
        if let Err(err) = &result {
            warn!(reason = err.reason(), error = %err, "update aborted");
        }
        result
    }

    async fn run(&self) -> Result<UpdateOutcome> {
        let mut report = UpdateStepReport::default();

        let timer = self.start(UpdateStep::Precheck);
        let mode = self.classifier.classify().await;
        if !mode.is_source_controlled() {
            return Err(UpdateError::NotSourceControlled { mode });
        }
        let _guard = self.lock.try_acquire()?;
        self.finish(&mut report, timer, true, "working copy detected");

        let working_copy = self.source.working_copy();

        let timer = self.start(UpdateStep::Stash);
        match working_copy.is_dirty().await {
            Ok(false) => self.finish(&mut report, timer, true, "no local modifications"),
            Ok(true) => match working_copy.stash().await {
                Ok(()) => self.finish(&mut report, timer, true, "local modifications stashed"),
                Err(err) => self.finish(
                    &mut report,
                    timer,
                    false,
                    format!("failed to stash local modifications: {err}"),
                ),
            },
            Err(err) => self.finish(
                &mut report,
                timer,
                false,
                format!("unable to inspect local modifications: {err}"),
            ),
        }

        let previous = working_copy.head().await?;

        let timer = self.start(UpdateStep::Synchronize);
        working_copy.fetch().await.map_err(UpdateError::SyncFailed)?;
        self.finish(&mut report, timer, true, "fetched upstream branch");

        let timer = self.start(UpdateStep::Compare);
        let target = working_copy.remote_tracking().await?;
        if previous.same_revision(&target) {
            self.finish(
                &mut report,
                timer,
                true,
                format!("already at {}", previous.short()),
            );
            info!(revision = previous.short(), "working copy already current");
            return Ok(UpdateOutcome {
                updated: false,
                previous_ref: Some(previous.short().to_owned()),
                current_ref: Some(previous.short().to_owned()),
                steps: report,
                need_restart: false,
                message: "Already up to date".to_owned(),
            });
        }
        self.finish(
            &mut report,
            timer,
            true,
            format!("{} -> {}", previous.short(), target.short()),
        );

        let timer = self.start(UpdateStep::Advance);
        working_copy
            .reset_hard(target.id())
            .await
            .map_err(UpdateError::AdvanceFailed)?;
        self.finish(
            &mut report,
            timer,
            true,
            format!("working copy reset to {}", target.short()),
        );

        let changed = match working_copy.changed_paths(previous.id(), target.id()).await {
            Ok(paths) => Some(paths),
            Err(err) => {
                warn!(error = %err, "unable to list changed paths; refreshing everything");
                None
            }
        };

        let refresh_dependencies = changed.as_deref().map_or(true, |paths| {
            paths
                .iter()
                .any(|path| is_manifest(path, &self.config.dependency_manifests))
        });
        self.external_step(
            &mut report,
            UpdateStep::DependencyRefresh,
            refresh_dependencies,
            &self.config.install_command,
            self.config.install_timeout,
            "dependencies",
        )
        .await;

        let rebuild_assets = changed.as_deref().map_or(true, |paths| {
            paths.iter().any(|path| {
                self.config
                    .asset_paths
                    .iter()
                    .any(|prefix| path.starts_with(prefix.as_str()))
            })
        });
        self.external_step(
            &mut report,
            UpdateStep::AssetRebuild,
            rebuild_assets,
            &self.config.build_command,
            self.config.build_timeout,
            "web assets",
        )
        .await;

        let timer = self.start(UpdateStep::CacheInvalidation);
        match self.cache.invalidate_verdict().await {
            Ok(_) => self.finish(&mut report, timer, true, "cached verdict dropped"),
            Err(err) => self.finish(
                &mut report,
                timer,
                false,
                format!("failed to drop cached verdict: {err}"),
            ),
        }

        let warnings = report.failures().count();
        let message = if warnings == 0 {
            "Update complete; restart the service to load the new version".to_owned()
        } else {
            format!(
                "Update applied with {warnings} warning{}; restart the service to load the new version",
                if warnings == 1 { "" } else { "s" }
            )
        };
        info!(
            previous = previous.short(),
            current = target.short(),
            warnings,
            "update applied"
        );
        Ok(UpdateOutcome {
            updated: true,
            previous_ref: Some(previous.short().to_owned()),
            current_ref: Some(target.short().to_owned()),
            steps: report,
            need_restart: true,
            message,
        })
    }

    async fn external_step(
        &self,
        report: &mut UpdateStepReport,
        step: UpdateStep,
        needed: bool,
        argv: &[String],
        timeout: Duration,
        what: &str,
    ) {
        let timer = self.start(step);
        if !needed {
            self.finish(report, timer, true, format!("{what} unchanged; skipped"));
            return;
        }
        let Some(invocation) = Invocation::from_argv(argv, timeout) else {
            self.finish(report, timer, false, format!("no command configured for {what}"));
            return;
        };
        let invocation = invocation.current_dir(&self.config.project_root);
        match self.runner.run_checked(&invocation).await {
            Ok(_) => self.finish(
                report,
                timer,
                true,
                format!("{what} refreshed with `{}`", invocation.display()),
            ),
            Err(err) => self.finish(report, timer, false, format!("{what} refresh failed: {err}")),
        }
    }

    fn start(&self, step: UpdateStep) -> StepTimer {
        info!(%step, "update step started");
        StepTimer {
            step,
            started: Instant::now(),
        }
    }

    fn finish(
        &self,
        report: &mut UpdateStepReport,
        timer: StepTimer,
        succeeded: bool,
        description: impl Into<String>,
    ) {
        let description = description.into();
        let duration_ms = timer.started.elapsed().as_millis() as u64;
        if succeeded {
            info!(step = %timer.step, ok = true, duration_ms, %description, "update step finished");
        } else {
            warn!(step = %timer.step, ok = false, duration_ms, %description, "update step failed");
            if let Some(metrics) = &self.metrics {
                metrics.record_step_failure(timer.step.as_ref());
            }
        }
        report.push(StepRecord {
            step: timer.step,
            description,
            succeeded,
            duration_ms,
        });
    }
}

fn is_manifest(path: &str, manifests: &[String]) -> bool {
    let file_name = Path::new(path)
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or(path);
    manifests
        .iter()
        .any(|manifest| manifest == path || manifest == file_name)
}
