//! ---
//! ra_section: "14-versioning"
//! ra_subsection: "tests"
//! ra_type: "test"
//! ra_scope: "code"
//! ra_description: "Update checker and executor behaviour across deployment modes."
//! ra_version: "v0.1.0"
//! ra_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use relay_common::{KeyValueStore, MemoryStore, UpdateConfig};
use relay_update::testing::{release, FakeCheckout, StaticRepository};
use relay_update::{
    DeploymentMode, ExecutionLock, Invocation, ProcessRunner, RemoteRepository, UpdateError,
    UpdateService, UpdateStep, VERSION_CHECK_KEY,
};
use relay_versioning::RevisionRef;
use tempfile::TempDir;

struct Fixture {
    dir: TempDir,
    checkout: Arc<FakeCheckout>,
    remote: Arc<StaticRepository>,
    store: Arc<MemoryStore>,
    service: UpdateService,
}

impl Fixture {
    fn new(head: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("VERSION"), "1.2.0\n").unwrap();
        let config = UpdateConfig {
            project_root: dir.path().to_path_buf(),
            container_markers: vec![dir.path().join(".dockerenv")],
            ..UpdateConfig::default()
        };
        let checkout = Arc::new(FakeCheckout::new(head));
        let remote = Arc::new(StaticRepository::new());
        let store = Arc::new(MemoryStore::new());
        let service = UpdateService::with_parts(
            config,
            store.clone(),
            checkout.clone(),
            Some(remote.clone() as Arc<dyn RemoteRepository>),
        );
        Self {
            dir,
            checkout,
            remote,
            store,
            service,
        }
    }

    fn containerize(&self) {
        std::fs::write(self.dir.path().join(".dockerenv"), "").unwrap();
    }

    async fn cached_raw(&self) -> Option<String> {
        self.store.get(VERSION_CHECK_KEY).await.unwrap()
    }
}

#[tokio::test]
async fn equal_refs_after_sync_report_no_update() {
    let fx = Fixture::new("abc1234");
    let verdict = fx.service.check(false).await;
    assert!(!verdict.has_update);
    assert_eq!(verdict.record.method, DeploymentMode::SourceControlled);
    let report = verdict.report();
    assert_eq!(report.local_ref.as_deref(), Some("abc1234"));
    assert_eq!(report.remote_ref.as_deref(), Some("abc1234"));
    assert!(report.recent_changes.is_empty());
    assert!(!report.cached);
    assert_eq!(fx.checkout.count_calls("git fetch"), 1);
}

#[tokio::test]
async fn one_upstream_commit_is_reported() {
    let fx = Fixture::new("abc1234");
    fx.checkout.push_upstream("def5678", "fix bug");
    let report = fx.service.check(false).await.report();
    assert!(report.has_update);
    assert_eq!(report.latest, "def5678");
    assert_eq!(report.recent_changes.len(), 1);
    assert_eq!(report.recent_changes[0].reference, "def5678");
    assert_eq!(report.recent_changes[0].summary, "fix bug");
    assert_eq!(report.release_info.unwrap().name, "fix bug");
}

#[tokio::test]
async fn cached_verdict_recomputes_availability() {
    let fx = Fixture::new("abc1234");
    fx.checkout.push_upstream("def5678", "fix bug");
    let first = fx.service.check(false).await;
    assert!(first.has_update);

    let reset = Invocation::new("git", Duration::from_secs(1)).args(["reset", "--hard", "def5678"]);
    fx.checkout.run_checked(&reset).await.unwrap();

    let second = fx.service.check(false).await;
    assert!(second.cached);
    assert!(!second.has_update);
    assert_eq!(second.record.computed_at, first.record.computed_at);
    assert_eq!(fx.checkout.count_calls("git fetch"), 1);
}

#[tokio::test]
async fn forced_check_bypasses_cache() {
    let fx = Fixture::new("abc1234");
    fx.service.check(false).await;
    let forced = fx.service.check(true).await;
    assert!(!forced.cached);
    assert_eq!(fx.checkout.count_calls("git fetch"), 2);
}

#[tokio::test]
async fn network_failure_serves_last_verdict() {
    let fx = Fixture::new("abc1234");
    fx.checkout.push_upstream("def5678", "fix bug");
    fx.service.check(false).await;

    fx.checkout.fail_fetch(true);
    fx.remote.fail_with_network(true);
    let verdict = fx.service.check(true).await;
    assert!(verdict.cached);
    assert!(verdict.has_update);
    assert!(!verdict.error);
    assert_eq!(
        verdict.warning.as_deref(),
        Some("Using cached data due to network error")
    );
}

#[tokio::test]
async fn network_failure_without_cache_is_flagged() {
    let fx = Fixture::new("abc1234");
    fx.checkout.set_working_copy(false);
    fx.remote.fail_with_network(true);
    let verdict = fx.service.check(false).await;
    assert_eq!(verdict.record.method, DeploymentMode::Unmanaged);
    assert!(verdict.error);
    assert!(!verdict.has_update);
    assert_eq!(verdict.record.latest_label, "1.2.0");
    assert!(verdict.warning.is_some());
}

#[tokio::test]
async fn missing_release_is_not_an_error() {
    let fx = Fixture::new("abc1234");
    fx.checkout.set_working_copy(false);
    let verdict = fx.service.check(false).await;
    assert!(!verdict.has_update);
    assert!(!verdict.error);
    assert!(verdict.warning.is_some());
    assert_eq!(
        verdict.record.release_info.as_ref().unwrap().name,
        "No releases found"
    );
    assert!(fx.cached_raw().await.is_none());
}

#[tokio::test]
async fn managed_deployment_compares_release_labels() {
    let fx = Fixture::new("abc1234");
    fx.containerize();
    fx.remote.set_release(Some(release("1.10.0")));
    let report = fx.service.check(false).await.report();
    assert_eq!(report.method, DeploymentMode::Managed);
    assert!(report.is_managed);
    assert!(report.has_update);
    assert_eq!(report.current, "1.2.0");
    assert_eq!(report.latest, "1.10.0");
    assert!(fx.checkout.calls().is_empty());
    assert_eq!(fx.remote.latest_calls(), 0);
    assert_eq!(fx.remote.release_calls(), 1);
}

#[tokio::test]
async fn verdict_from_another_mode_is_not_served() {
    let fx = Fixture::new("abc1234");
    fx.containerize();
    fx.remote.set_release(Some(release("1.2.0")));
    let managed = fx.service.check(false).await;
    assert_eq!(managed.record.method, DeploymentMode::Managed);

    std::fs::remove_file(fx.dir.path().join(".dockerenv")).unwrap();
    let source = fx.service.check(false).await;
    assert!(!source.cached);
    assert_eq!(source.record.method, DeploymentMode::SourceControlled);
}

fn day(day: u32) -> chrono::DateTime<chrono::Utc> {
    chrono::TimeZone::with_ymd_and_hms(&chrono::Utc, 2024, 5, day, 8, 0, 0)
        .single()
        .unwrap()
}

fn dated_history(fx: &Fixture) {
    let head = RevisionRef::new("def5678")
        .with_summary("fix bug")
        .with_timestamp(day(3));
    fx.remote.set_latest(Some(head.clone()));
    fx.remote.set_history(vec![
        head,
        RevisionRef::new("abc1234")
            .with_summary("initial")
            .with_timestamp(day(2)),
        RevisionRef::new("0badc0d")
            .with_summary("older")
            .with_timestamp(day(1)),
    ]);
}

#[tokio::test]
async fn archive_deployment_reads_marker() {
    let fx = Fixture::new("abc1234");
    fx.checkout.set_working_copy(false);
    dated_history(&fx);
    let recorded = fx.service.mark_applied("abc1234").await.unwrap();
    assert_eq!(recorded.timestamp(), Some(day(2)));

    let report = fx.service.check(false).await.report();
    assert_eq!(report.method, DeploymentMode::Unmanaged);
    assert!(report.has_update);
    assert_eq!(report.local_ref.as_deref(), Some("abc1234"));
    assert_eq!(report.recent_changes.len(), 1);
    assert_eq!(report.recent_changes[0].reference, "def5678");
}

#[tokio::test]
async fn undated_marker_lists_only_newer_commits() {
    let fx = Fixture::new("abc1234");
    fx.checkout.set_working_copy(false);
    dated_history(&fx);
    std::fs::create_dir_all(fx.dir.path().join(".relay-admin")).unwrap();
    std::fs::write(
        fx.dir.path().join(".relay-admin/applied-revision.json"),
        r#"{"ref":"abc1234","appliedAt":"2024-06-01T00:00:00Z"}"#,
    )
    .unwrap();

    let report = fx.service.check(false).await.report();
    assert_eq!(report.local_ref.as_deref(), Some("abc1234"));
    let changes: Vec<&str> = report
        .recent_changes
        .iter()
        .map(|change| change.reference.as_str())
        .collect();
    assert_eq!(changes, vec!["def5678"]);
}

#[tokio::test]
async fn managed_execute_is_rejected_without_mutation() {
    let fx = Fixture::new("abc1234");
    fx.containerize();
    let err = fx.service.execute().await.unwrap_err();
    assert!(matches!(
        err,
        UpdateError::NotSourceControlled {
            mode: DeploymentMode::Managed
        }
    ));
    assert_eq!(err.reason(), "not-source-controlled");
    assert_eq!(fx.checkout.count_calls("git reset"), 0);
}

#[tokio::test]
async fn execute_advances_and_invalidates_cache() {
    let fx = Fixture::new("abc1234");
    fx.checkout.push_upstream("def5678", "fix bug");
    fx.service.check(false).await;
    assert!(fx.cached_raw().await.is_some());

    let outcome = fx.service.execute().await.unwrap();
    assert!(outcome.updated);
    assert!(outcome.need_restart);
    assert_eq!(outcome.previous_ref.as_deref(), Some("abc1234"));
    assert_eq!(outcome.current_ref.as_deref(), Some("def5678"));
    assert_eq!(fx.checkout.head(), "def5678");
    assert_eq!(outcome.steps.failures().count(), 0);
    assert_eq!(fx.checkout.count_calls("npm install"), 1);
    assert_eq!(fx.checkout.count_calls("npm run build:web"), 1);
    assert!(fx.cached_raw().await.is_none());
    assert!(!fx.dir.path().join(".relay-admin").exists());
}

#[tokio::test]
async fn repeated_execute_is_a_no_op() {
    let fx = Fixture::new("abc1234");
    fx.checkout.push_upstream("def5678", "fix bug");
    assert!(fx.service.execute().await.unwrap().updated);

    let second = fx.service.execute().await.unwrap();
    assert!(!second.updated);
    assert!(!second.need_restart);
    assert_eq!(fx.checkout.count_calls("git reset"), 1);
    assert!(second.steps.get(UpdateStep::Advance).is_none());
}

#[tokio::test]
async fn synchronize_and_advance_failures_abort() {
    let fx = Fixture::new("abc1234");
    fx.checkout.push_upstream("def5678", "fix bug");
    fx.checkout.fail_fetch(true);
    let err = fx.service.execute().await.unwrap_err();
    assert_eq!(err.reason(), "sync-failed");

    fx.checkout.fail_fetch(false);
    fx.checkout.fail_reset(true);
    let err = fx.service.execute().await.unwrap_err();
    assert_eq!(err.reason(), "advance-failed");
    assert_eq!(fx.checkout.head(), "abc1234");
    assert_eq!(fx.checkout.count_calls("npm"), 0);
}

#[tokio::test]
async fn dependency_failure_is_a_warning() {
    let fx = Fixture::new("abc1234");
    fx.checkout.push_upstream("def5678", "fix bug");
    fx.checkout.fail_command("npm install");
    let outcome = fx.service.execute().await.unwrap();
    assert!(outcome.updated);
    let step = outcome.steps.get(UpdateStep::DependencyRefresh).unwrap();
    assert!(!step.succeeded);
    assert!(outcome.steps.get(UpdateStep::AssetRebuild).unwrap().succeeded);
    assert!(outcome.message.contains("1 warning"));
}

#[tokio::test]
async fn unchanged_manifests_skip_tooling() {
    let fx = Fixture::new("abc1234");
    fx.checkout.push_upstream("def5678", "docs");
    fx.checkout.set_changed_paths(["README.md"]);
    let outcome = fx.service.execute().await.unwrap();
    assert!(outcome.updated);
    assert_eq!(fx.checkout.count_calls("npm"), 0);
    assert!(outcome
        .steps
        .get(UpdateStep::DependencyRefresh)
        .unwrap()
        .description
        .contains("skipped"));
}

#[tokio::test]
async fn unknown_change_set_refreshes_everything() {
    let fx = Fixture::new("abc1234");
    fx.checkout.push_upstream("def5678", "fix bug");
    fx.checkout.set_changed_paths(Vec::<String>::new());
    fx.checkout.fail_diff(true);
    fx.service.execute().await.unwrap();
    assert_eq!(fx.checkout.count_calls("npm install"), 1);
    assert_eq!(fx.checkout.count_calls("npm run build:web"), 1);
}

#[tokio::test]
async fn local_modifications_are_stashed_best_effort() {
    let fx = Fixture::new("abc1234");
    fx.checkout.push_upstream("def5678", "fix bug");
    fx.checkout.set_dirty(true);
    fx.checkout.fail_stash(true);
    let outcome = fx.service.execute().await.unwrap();
    assert!(outcome.updated);
    assert!(!outcome.steps.get(UpdateStep::Stash).unwrap().succeeded);
    assert_eq!(fx.checkout.count_calls("git stash"), 1);
}

#[tokio::test]
async fn held_lock_rejects_execute_and_shields_checks() {
    let fx = Fixture::new("abc1234");
    fx.checkout.push_upstream("def5678", "fix bug");
    fx.service.check(false).await;

    let guard = ExecutionLock::for_root(fx.dir.path()).try_acquire().unwrap();
    let err = fx.service.execute().await.unwrap_err();
    assert!(matches!(err, UpdateError::InProgress));
    assert_eq!(err.reason(), "update-in-progress");

    let verdict = fx.service.check(true).await;
    assert!(verdict.cached);
    assert!(verdict.warning.is_some());
    assert_eq!(fx.checkout.count_calls("git fetch"), 1);

    drop(guard);
    assert!(fx.service.execute().await.unwrap().updated);
}
