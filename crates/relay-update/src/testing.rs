//! ---
//! ra_section: "14-versioning"
//! ra_subsection: "module"
//! ra_type: "source"
//! ra_scope: "test"
//! ra_description: "In-memory doubles for the process runner and hosted repository."
//! ra_version: "v0.1.0"
//! ra_owner: "tbd"
//! ---
//! Scripted stand-ins used by unit tests, the integration suites and the
//! test harness crate.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use parking_lot::Mutex;

use crate::process::{Invocation, ProcessError, ProcessOutput, ProcessRunner};
use crate::source::git::format_log;
use crate::source::github::{Release, RemoteError, RemoteRepository};
use relay_versioning::RevisionRef;

fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0)
        .single()
        .unwrap_or_else(Utc::now)
}

#[derive(Debug)]
struct CheckoutState {
    git_available: bool,
    working_copy: bool,
    head: String,
    tracking: String,
    upstream: String,
    history: Vec<RevisionRef>,
    dirty: bool,
    changed_paths: Vec<String>,
    fail_fetch: bool,
    fail_reset: bool,
    fail_stash: bool,
    fail_diff: bool,
    failing_commands: HashSet<String>,
    calls: Vec<String>,
}

/// Stateful stand-in for `git` and the package tooling.
///
/// `fetch` moves the remote-tracking ref to the upstream head, `reset --hard`
/// moves HEAD, and every other program succeeds unless told to fail.
#[derive(Debug)]
pub struct FakeCheckout {
    state: Mutex<CheckoutState>,
}

impl FakeCheckout {
    /// A clean working copy whose HEAD, tracking ref and upstream are `head`.
    pub fn new(head: &str) -> Self {
        let initial = RevisionRef::new(head)
            .with_summary("initial")
            .with_timestamp(base_time())
            .with_author("Relay Bot");
        Self {
            state: Mutex::new(CheckoutState {
                git_available: true,
                working_copy: true,
                head: head.to_owned(),
                tracking: head.to_owned(),
                upstream: head.to_owned(),
                history: vec![initial],
                dirty: false,
                changed_paths: vec!["package.json".to_owned(), "web/src/app.js".to_owned()],
                fail_fetch: false,
                fail_reset: false,
                fail_stash: false,
                fail_diff: false,
                failing_commands: HashSet::new(),
                calls: Vec::new(),
            }),
        }
    }

    /// Publish a new upstream commit. Visible locally after the next fetch.
    pub fn push_upstream(&self, id: &str, summary: &str) {
        let mut state = self.state.lock();
        let at = base_time() + ChronoDuration::minutes(state.history.len() as i64);
        state.history.push(
            RevisionRef::new(id)
                .with_summary(summary)
                .with_timestamp(at)
                .with_author("Relay Bot"),
        );
        state.upstream = id.to_owned();
    }

    pub fn set_git_available(&self, available: bool) {
        self.state.lock().git_available = available;
    }

    pub fn set_working_copy(&self, present: bool) {
        self.state.lock().working_copy = present;
    }

    pub fn set_dirty(&self, dirty: bool) {
        self.state.lock().dirty = dirty;
    }

    /// Paths reported by `git diff --name-only`.
    pub fn set_changed_paths<I, S>(&self, paths: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.state.lock().changed_paths = paths.into_iter().map(Into::into).collect();
    }

    pub fn fail_fetch(&self, fail: bool) {
        self.state.lock().fail_fetch = fail;
    }

    pub fn fail_reset(&self, fail: bool) {
        self.state.lock().fail_reset = fail;
    }

    pub fn fail_stash(&self, fail: bool) {
        self.state.lock().fail_stash = fail;
    }

    pub fn fail_diff(&self, fail: bool) {
        self.state.lock().fail_diff = fail;
    }

    /// Make a non-git command line (e.g. `npm install`) exit non-zero.
    pub fn fail_command(&self, command_line: &str) {
        self.state
            .lock()
            .failing_commands
            .insert(command_line.to_owned());
    }

    pub fn head(&self) -> String {
        self.state.lock().head.clone()
    }

    pub fn tracking(&self) -> String {
        self.state.lock().tracking.clone()
    }

    pub fn is_dirty(&self) -> bool {
        self.state.lock().dirty
    }

    /// Every command line run so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    /// Number of recorded command lines starting with `prefix`.
    pub fn count_calls(&self, prefix: &str) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|call| call.starts_with(prefix))
            .count()
    }

    fn git(state: &mut CheckoutState, args: &[String]) -> ProcessOutput {
        let not_a_repo = || ProcessOutput::failed(128, "fatal: not a git repository");
        let Some(subcommand) = args.first().map(String::as_str) else {
            return ProcessOutput::failed(1, "usage: git");
        };
        if subcommand == "rev-parse" {
            return if state.working_copy {
                ProcessOutput::ok("true\n")
            } else {
                not_a_repo()
            };
        }
        if !state.working_copy {
            return not_a_repo();
        }
        match subcommand {
            "log" => Self::log(state, args),
            "fetch" if state.fail_fetch => {
                ProcessOutput::failed(128, "fatal: unable to access remote")
            }
            "fetch" => {
                state.tracking = state.upstream.clone();
                ProcessOutput::ok("")
            }
            "status" if state.dirty => ProcessOutput::ok(" M config/local.json\n"),
            "status" => ProcessOutput::ok(""),
            "stash" if state.fail_stash => ProcessOutput::failed(1, "error: could not stash"),
            "stash" => {
                state.dirty = false;
                ProcessOutput::ok("Saved working directory")
            }
            "reset" if state.fail_reset => {
                ProcessOutput::failed(128, "fatal: unable to write index")
            }
            "reset" => match args.last() {
                Some(target) => {
                    state.head = target.clone();
                    state.dirty = false;
                    ProcessOutput::ok(format!("HEAD is now at {target}"))
                }
                None => ProcessOutput::failed(1, "usage: git reset"),
            },
            "diff" if state.fail_diff => ProcessOutput::failed(128, "fatal: bad revision"),
            "diff" => ProcessOutput::ok(state.changed_paths.join("\n")),
            _ => ProcessOutput::failed(1, format!("git: '{subcommand}' is not scripted")),
        }
    }

    fn resolve(state: &CheckoutState, rev: &str) -> Option<usize> {
        let id = if rev == "HEAD" {
            state.head.as_str()
        } else if rev.starts_with("refs/remotes/") {
            state.tracking.as_str()
        } else {
            rev
        };
        state.history.iter().position(|commit| commit.matches(id))
    }

    fn log(state: &CheckoutState, args: &[String]) -> ProcessOutput {
        let Some(spec) = args.last() else {
            return ProcessOutput::failed(1, "usage: git log");
        };
        if let Some((since, until)) = spec.split_once("..") {
            let limit = args
                .iter()
                .find_map(|arg| arg.strip_prefix("--max-count="))
                .and_then(|raw| raw.parse::<usize>().ok())
                .unwrap_or(usize::MAX);
            return match (Self::resolve(state, since), Self::resolve(state, until)) {
                (Some(from), Some(to)) if from <= to => {
                    let range = &state.history[from + 1..=to];
                    ProcessOutput::ok(format_log(range.iter().rev().take(limit)))
                }
                (Some(_), Some(_)) => ProcessOutput::ok(""),
                _ => ProcessOutput::failed(128, "fatal: bad revision"),
            };
        }
        match Self::resolve(state, spec) {
            Some(index) => ProcessOutput::ok(format_log([&state.history[index]])),
            None => ProcessOutput::failed(128, "fatal: bad revision"),
        }
    }
}

#[async_trait]
impl ProcessRunner for FakeCheckout {
    async fn run(&self, invocation: &Invocation) -> Result<ProcessOutput, ProcessError> {
        let command_line = invocation.display();
        let mut state = self.state.lock();
        state.calls.push(command_line.clone());
        if invocation.program == "git" {
            if !state.git_available {
                return Err(ProcessError::Spawn {
                    command: command_line,
                    source: std::io::Error::new(std::io::ErrorKind::NotFound, "git not found"),
                });
            }
            return Ok(Self::git(&mut state, &invocation.args));
        }
        if state.failing_commands.contains(&command_line) {
            return Ok(ProcessOutput::failed(1, format!("{command_line} failed")));
        }
        Ok(ProcessOutput::ok(""))
    }
}

#[derive(Debug, Default)]
struct RepositoryState {
    latest: Option<RevisionRef>,
    history: Vec<RevisionRef>,
    release: Option<Release>,
    network_failure: bool,
    latest_calls: usize,
    release_calls: usize,
}

/// Scripted [`RemoteRepository`].
#[derive(Debug, Default)]
pub struct StaticRepository {
    state: Mutex<RepositoryState>,
}

impl StaticRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_latest(&self, latest: Option<RevisionRef>) {
        self.state.lock().latest = latest;
    }

    pub fn set_history(&self, history: Vec<RevisionRef>) {
        self.state.lock().history = history;
    }

    pub fn set_release(&self, release: Option<Release>) {
        self.state.lock().release = release;
    }

    /// Answer every call with a 503.
    pub fn fail_with_network(&self, fail: bool) {
        self.state.lock().network_failure = fail;
    }

    pub fn latest_calls(&self) -> usize {
        self.state.lock().latest_calls
    }

    pub fn release_calls(&self) -> usize {
        self.state.lock().release_calls
    }

    fn unavailable() -> RemoteError {
        RemoteError::Status {
            status: 503,
            url: "https://api.example.invalid".to_owned(),
        }
    }
}

/// Release tagged `v{version}`.
pub fn release(version: &str) -> Release {
    Release {
        tag: format!("v{version}"),
        name: Some(format!("Release {version}")),
        body: Some("Bug fixes".to_owned()),
        published_at: Some(base_time()),
        url: Some(format!(
            "https://github.com/acme/relay/releases/tag/v{version}"
        )),
    }
}

#[async_trait]
impl RemoteRepository for StaticRepository {
    async fn latest_revision(&self) -> Result<Option<RevisionRef>, RemoteError> {
        let mut state = self.state.lock();
        state.latest_calls += 1;
        if state.network_failure {
            return Err(Self::unavailable());
        }
        Ok(state.latest.clone())
    }

    async fn revision(&self, id: &str) -> Result<Option<RevisionRef>, RemoteError> {
        let state = self.state.lock();
        if state.network_failure {
            return Err(Self::unavailable());
        }
        Ok(state
            .history
            .iter()
            .chain(state.latest.iter())
            .find(|rev| rev.matches(id))
            .cloned())
    }

    async fn revisions_since(
        &self,
        since: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<RevisionRef>, RemoteError> {
        let state = self.state.lock();
        if state.network_failure {
            return Err(Self::unavailable());
        }
        Ok(state
            .history
            .iter()
            .filter(|rev| match (since, rev.timestamp()) {
                (Some(since), Some(at)) => at >= since,
                _ => true,
            })
            .take(limit)
            .cloned()
            .collect())
    }

    async fn latest_release(&self) -> Result<Option<Release>, RemoteError> {
        let mut state = self.state.lock();
        state.release_calls += 1;
        if state.network_failure {
            return Err(Self::unavailable());
        }
        Ok(state.release.clone())
    }

    fn revision_url(&self, id: &str) -> Option<String> {
        Some(format!("https://github.com/acme/relay/commit/{id}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn git(args: &[&str]) -> Invocation {
        Invocation::new("git", Duration::from_secs(1)).args(args.iter().copied())
    }

    #[tokio::test]
    async fn fetch_then_reset_moves_refs() {
        let checkout = FakeCheckout::new("abc1234");
        checkout.push_upstream("def5678", "fix bug");
        assert_eq!(checkout.tracking(), "abc1234");
        checkout.run_checked(&git(&["fetch", "origin", "main"])).await.unwrap();
        assert_eq!(checkout.tracking(), "def5678");
        checkout
            .run_checked(&git(&["reset", "--hard", "def5678"]))
            .await
            .unwrap();
        assert_eq!(checkout.head(), "def5678");
        assert_eq!(checkout.count_calls("git reset"), 1);
    }

    #[tokio::test]
    async fn scripted_command_failures() {
        let checkout = FakeCheckout::new("abc1234");
        checkout.fail_command("npm install");
        let npm = Invocation::new("npm", Duration::from_secs(1)).arg("install");
        assert!(checkout.run_checked(&npm).await.is_err());
        let build = Invocation::new("npm", Duration::from_secs(1)).args(["run", "build:web"]);
        assert!(checkout.run_checked(&build).await.is_ok());
    }
}
