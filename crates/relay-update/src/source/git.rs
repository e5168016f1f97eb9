//! ---
//! ra_section: "14-versioning"
//! ra_subsection: "module"
//! ra_type: "source"
//! ra_scope: "code"
//! ra_description: "Local working-copy inspection and mutation through git."
//! ra_version: "v0.1.0"
//! ra_owner: "tbd"
//! ---
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::error::{Result, UpdateError};
use crate::process::{Invocation, ProcessError, ProcessRunner};
use relay_common::UpdateConfig;
use relay_versioning::RevisionRef;

const FIELD_SEP: char = '\u{1f}';
const RECORD_SEP: char = '\u{1e}';
/// `git log` format: id, subject, committer date, author name.
pub(crate) const LOG_FORMAT: &str = "--format=%H%x1f%s%x1f%cI%x1f%an%x1e";

/// Git working copy rooted at the project directory.
#[derive(Clone)]
pub struct WorkingCopy {
    root: PathBuf,
    remote: String,
    branch: String,
    read_timeout: Duration,
    sync_timeout: Duration,
    advance_timeout: Duration,
    runner: Arc<dyn ProcessRunner>,
}

impl WorkingCopy {
    pub fn new(config: &UpdateConfig, runner: Arc<dyn ProcessRunner>) -> Self {
        Self {
            root: config.project_root.clone(),
            remote: config.git_remote.clone(),
            branch: config.git_branch.clone(),
            read_timeout: config.probe_timeout,
            sync_timeout: config.sync_timeout,
            advance_timeout: config.advance_timeout,
            runner,
        }
    }

    /// `refs/remotes/<remote>/<branch>`.
    pub fn tracking_ref(&self) -> String {
        format!("refs/remotes/{}/{}", self.remote, self.branch)
    }

    fn git<I, S>(&self, args: I, timeout: Duration) -> Invocation
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Invocation::new("git", timeout)
            .args(args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .current_dir(&self.root)
    }

    async fn read_one(&self, rev: &str) -> Result<RevisionRef> {
        let invocation = self.git(["log", "-1", LOG_FORMAT, rev], self.read_timeout);
        let output = self.runner.run_checked(&invocation).await?;
        parse_log(&output.stdout)
            .into_iter()
            .next()
            .ok_or_else(|| UpdateError::UpstreamMissing(rev.to_owned()))
    }

    /// Revision currently checked out.
    pub async fn head(&self) -> Result<RevisionRef> {
        self.read_one("HEAD").await
    }

    /// Revision of the remote-tracking branch as of the last fetch.
    pub async fn remote_tracking(&self) -> Result<RevisionRef> {
        self.read_one(&self.tracking_ref()).await
    }

    /// Fetch the tracked branch without merging.
    pub async fn fetch(&self) -> std::result::Result<(), ProcessError> {
        let invocation = self.git(
            ["fetch".to_owned(), self.remote.clone(), self.branch.clone()],
            self.sync_timeout,
        );
        let output = self.runner.run_checked(&invocation).await?;
        debug!(elapsed_ms = output.elapsed.as_millis() as u64, "fetch complete");
        Ok(())
    }

    /// True when tracked or untracked files differ from HEAD.
    pub async fn is_dirty(&self) -> Result<bool> {
        let invocation = self.git(["status", "--porcelain"], self.read_timeout);
        let output = self.runner.run_checked(&invocation).await?;
        Ok(!output.stdout.trim().is_empty())
    }

    /// Put local modifications aside, including untracked files.
    pub async fn stash(&self) -> std::result::Result<(), ProcessError> {
        let message = format!("relay-admin pre-update {}", Utc::now().to_rfc3339());
        let invocation = self.git(
            [
                "stash".to_owned(),
                "push".to_owned(),
                "--include-untracked".to_owned(),
                "-m".to_owned(),
                message,
            ],
            self.sync_timeout,
        );
        self.runner.run_checked(&invocation).await?;
        info!("local modifications stashed");
        Ok(())
    }

    /// Force the working copy and current branch onto `id`.
    pub async fn reset_hard(&self, id: &str) -> std::result::Result<(), ProcessError> {
        let invocation = self.git(["reset", "--hard", id], self.advance_timeout);
        self.runner.run_checked(&invocation).await?;
        Ok(())
    }

    /// Paths that differ between two revisions.
    pub async fn changed_paths(&self, from: &str, to: &str) -> Result<Vec<String>> {
        let invocation = self.git(["diff", "--name-only", from, to], self.read_timeout);
        let output = self.runner.run_checked(&invocation).await?;
        Ok(output
            .stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_owned)
            .collect())
    }

    /// Commits reachable from `until` but not from `since`, newest first.
    pub async fn log_between(
        &self,
        since: &str,
        until: &str,
        limit: usize,
    ) -> Result<Vec<RevisionRef>> {
        let invocation = self.git(
            [
                "log".to_owned(),
                LOG_FORMAT.to_owned(),
                format!("--max-count={limit}"),
                format!("{since}..{until}"),
            ],
            self.read_timeout,
        );
        let output = self.runner.run_checked(&invocation).await?;
        Ok(parse_log(&output.stdout))
    }
}

/// Parse output produced with [`LOG_FORMAT`].
pub(crate) fn parse_log(stdout: &str) -> Vec<RevisionRef> {
    stdout
        .split(RECORD_SEP)
        .filter_map(|record| {
            let mut fields = record.trim_matches(|c: char| c == '\n' || c == '\r').split(FIELD_SEP);
            let id = fields.next()?.trim();
            if id.is_empty() {
                return None;
            }
            let mut revision = RevisionRef::new(id).with_summary(fields.next().unwrap_or_default());
            if let Some(ts) = fields
                .next()
                .and_then(|raw| DateTime::parse_from_rfc3339(raw.trim()).ok())
            {
                revision = revision.with_timestamp(ts.with_timezone(&Utc));
            }
            Some(revision.with_author(fields.next().unwrap_or_default()))
        })
        .collect()
}

/// Render revisions the way [`LOG_FORMAT`] prints them.
#[cfg(any(test, feature = "testing"))]
pub(crate) fn format_log<'a>(revisions: impl IntoIterator<Item = &'a RevisionRef>) -> String {
    revisions
        .into_iter()
        .map(|rev| {
            format!(
                "{}{FIELD_SEP}{}{FIELD_SEP}{}{FIELD_SEP}{}{RECORD_SEP}\n",
                rev.id(),
                rev.summary().unwrap_or_default(),
                rev.timestamp().map(|ts| ts.to_rfc3339()).unwrap_or_default(),
                rev.author().unwrap_or_default()
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeCheckout;

    #[test]
    fn parses_log_records() {
        let stdout = "def5678aa\u{1f}fix bug\u{1f}2024-05-01T10:00:00+02:00\u{1f}Ada\u{1e}\n\
                      abc1234bb\u{1f}initial\u{1f}not-a-date\u{1f}\u{1e}\n";
        let revisions = parse_log(stdout);
        assert_eq!(revisions.len(), 2);
        assert_eq!(revisions[0].short(), "def5678");
        assert_eq!(revisions[0].summary(), Some("fix bug"));
        assert_eq!(
            revisions[0].timestamp().unwrap().to_rfc3339(),
            "2024-05-01T08:00:00+00:00"
        );
        assert_eq!(revisions[0].author(), Some("Ada"));
        assert_eq!(revisions[1].timestamp(), None);
        assert_eq!(revisions[1].author(), None);
        assert!(parse_log("").is_empty());
    }

    #[tokio::test]
    async fn reads_head_and_tracking_refs() {
        let checkout = Arc::new(FakeCheckout::new("abc1234"));
        checkout.push_upstream("def5678", "fix bug");
        let copy = WorkingCopy::new(&UpdateConfig::default(), checkout.clone());

        assert_eq!(copy.head().await.unwrap().id(), "abc1234");
        assert_eq!(copy.remote_tracking().await.unwrap().id(), "abc1234");
        copy.fetch().await.unwrap();
        assert_eq!(copy.remote_tracking().await.unwrap().id(), "def5678");

        let log = copy.log_between("abc1234", "def5678", 20).await.unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].summary(), Some("fix bug"));
    }
}
