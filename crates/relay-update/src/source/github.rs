//! ---
//! ra_section: "14-versioning"
//! ra_subsection: "module"
//! ra_type: "source"
//! ra_scope: "code"
//! ra_description: "Hosted repository client for revisions and releases."
//! ra_version: "v0.1.0"
//! ra_owner: "tbd"
//! ---
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{ACCEPT, AUTHORIZATION, USER_AGENT};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::error::FailureKind;
use relay_common::UpdateConfig;
use relay_versioning::RevisionRef;

/// Published release on the hosted repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Release {
    pub tag: String,
    pub name: Option<String>,
    pub body: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub url: Option<String>,
}

impl Release {
    /// Version label derived from the tag, without a leading `v`.
    pub fn version(&self) -> &str {
        self.tag
            .strip_prefix('v')
            .or_else(|| self.tag.strip_prefix('V'))
            .unwrap_or(&self.tag)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("hosted repository is not configured")]
    NotConfigured,
    #[error("invalid repository api url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("request to hosted repository failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("hosted repository returned {status} for {url}")]
    Status { status: u16, url: String },
    #[error("malformed hosted repository payload: {0}")]
    Payload(String),
}

impl RemoteError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::NotConfigured => FailureKind::NotFound,
            Self::InvalidUrl(_) => FailureKind::Precondition,
            Self::Transport(_) => FailureKind::Network,
            Self::Status { status: 404, .. } => FailureKind::NotFound,
            Self::Status { .. } => FailureKind::Network,
            Self::Payload(_) => FailureKind::Parse,
        }
    }
}

/// Read-only view of the upstream repository.
///
/// `Ok(None)` means the upstream answered that the object does not exist.
#[async_trait]
pub trait RemoteRepository: Send + Sync {
    /// Head of the tracked branch.
    async fn latest_revision(&self) -> Result<Option<RevisionRef>, RemoteError>;
    /// A single commit, looked up by full or abbreviated id.
    async fn revision(&self, id: &str) -> Result<Option<RevisionRef>, RemoteError>;
    /// Commits on the tracked branch, newest first.
    async fn revisions_since(
        &self,
        since: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<RevisionRef>, RemoteError>;
    /// Most recent published release.
    async fn latest_release(&self) -> Result<Option<Release>, RemoteError>;
    /// Browser URL for a revision.
    fn revision_url(&self, id: &str) -> Option<String>;
}

#[derive(Debug, Deserialize)]
struct CommitPayload {
    sha: String,
    commit: CommitDetail,
}

#[derive(Debug, Deserialize)]
struct CommitDetail {
    #[serde(default)]
    message: String,
    #[serde(default)]
    author: Option<Signature>,
    #[serde(default)]
    committer: Option<Signature>,
}

#[derive(Debug, Deserialize)]
struct Signature {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    date: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct ReleasePayload {
    tag_name: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    html_url: Option<String>,
}

impl From<CommitPayload> for RevisionRef {
    fn from(payload: CommitPayload) -> Self {
        let subject = payload.commit.message.lines().next().unwrap_or_default();
        let mut revision = RevisionRef::new(payload.sha).with_summary(subject);
        let date = payload
            .commit
            .committer
            .as_ref()
            .and_then(|sig| sig.date)
            .or_else(|| payload.commit.author.as_ref().and_then(|sig| sig.date));
        if let Some(date) = date {
            revision = revision.with_timestamp(date);
        }
        if let Some(name) = payload.commit.author.and_then(|sig| sig.name) {
            revision = revision.with_author(name);
        }
        revision
    }
}

/// [`RemoteRepository`] backed by the GitHub REST API.
#[derive(Debug, Clone)]
pub struct GitHubRepository {
    client: Client,
    api_base: Url,
    owner: String,
    repo: String,
    branch: String,
    token: Option<String>,
    user_agent: String,
}

impl GitHubRepository {
    /// Build a client, or `Ok(None)` when no repository is configured.
    pub fn from_config(config: &UpdateConfig) -> Result<Option<Self>, RemoteError> {
        let Some((owner, repo)) = config.github() else {
            return Ok(None);
        };
        let client = Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(config.request_timeout.min(Duration::from_secs(5)))
            .build()?;
        Ok(Some(Self {
            client,
            api_base: Url::parse(&config.github_api_url)?,
            owner: owner.to_owned(),
            repo: repo.to_owned(),
            branch: config.github_branch().to_owned(),
            token: config.github_token.clone(),
            user_agent: config.user_agent.clone(),
        }))
    }

    fn endpoint(&self, tail: &[&str]) -> Result<Url, RemoteError> {
        let mut url = self.api_base.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|()| RemoteError::InvalidUrl(url::ParseError::RelativeUrlWithCannotBeABaseBase))?;
            segments
                .pop_if_empty()
                .extend(["repos", self.owner.as_str(), self.repo.as_str()])
                .extend(tail);
        }
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: Url,
        query: &[(&str, String)],
    ) -> Result<Option<T>, RemoteError> {
        let mut request = self
            .client
            .get(url.clone())
            .query(query)
            .header(ACCEPT, "application/vnd.github+json")
            .header(USER_AGENT, &self.user_agent);
        if let Some(token) = &self.token {
            request = request.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        let response = request.send().await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            debug!(url = %url, "hosted repository object not found");
            return Ok(None);
        }
        if !status.is_success() {
            return Err(RemoteError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        let body = response.text().await?;
        serde_json::from_str(&body)
            .map(Some)
            .map_err(|err| RemoteError::Payload(err.to_string()))
    }
}

#[async_trait]
impl RemoteRepository for GitHubRepository {
    async fn latest_revision(&self) -> Result<Option<RevisionRef>, RemoteError> {
        let url = self.endpoint(&["commits", self.branch.as_str()])?;
        let payload: Option<CommitPayload> = self.get_json(url, &[]).await?;
        Ok(payload.map(RevisionRef::from))
    }

    async fn revision(&self, id: &str) -> Result<Option<RevisionRef>, RemoteError> {
        let url = self.endpoint(&["commits", id])?;
        let payload: Option<CommitPayload> = self.get_json(url, &[]).await?;
        Ok(payload.map(RevisionRef::from))
    }

    async fn revisions_since(
        &self,
        since: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<RevisionRef>, RemoteError> {
        let url = self.endpoint(&["commits"])?;
        let mut query = vec![
            ("sha", self.branch.clone()),
            ("per_page", limit.clamp(1, 100).to_string()),
        ];
        if let Some(since) = since {
            query.push(("since", since.to_rfc3339()));
        }
        let payload: Option<Vec<CommitPayload>> = self.get_json(url, &query).await?;
        Ok(payload
            .unwrap_or_default()
            .into_iter()
            .take(limit)
            .map(RevisionRef::from)
            .collect())
    }

    async fn latest_release(&self) -> Result<Option<Release>, RemoteError> {
        let url = self.endpoint(&["releases", "latest"])?;
        let payload: Option<ReleasePayload> = self.get_json(url, &[]).await?;
        Ok(payload.map(|release| Release {
            tag: release.tag_name,
            name: release.name,
            body: release.body,
            published_at: release.published_at,
            url: release.html_url,
        }))
    }

    fn revision_url(&self, id: &str) -> Option<String> {
        let host = self.api_base.host_str()?;
        let web_host = host.strip_prefix("api.").unwrap_or(host);
        Some(format!(
            "{}://{}/{}/{}/commit/{}",
            self.api_base.scheme(),
            web_host,
            self.owner,
            self.repo,
            id
        ))
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use axum::extract::Query;
    use axum::http::StatusCode as HttpStatus;
    use axum::routing::get;
    use axum::{Json, Router};
    use serde_json::{json, Value};
    use tokio::net::TcpListener;

    use super::*;

    async fn serve(router: Router) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router.into_make_service())
                .await
                .unwrap();
        });
        addr
    }

    fn config(addr: SocketAddr) -> UpdateConfig {
        UpdateConfig {
            github_owner: Some("acme".into()),
            github_repo: Some("relay".into()),
            github_api_url: format!("http://{addr}"),
            request_timeout: Duration::from_millis(500),
            ..UpdateConfig::default()
        }
    }

    fn commit(sha: &str, message: &str) -> Value {
        json!({
            "sha": sha,
            "html_url": format!("https://github.com/acme/relay/commit/{sha}"),
            "commit": {
                "message": message,
                "author": { "name": "Ada", "date": "2024-05-01T08:00:00Z" },
                "committer": { "name": "Ada", "date": "2024-05-01T09:00:00Z" }
            }
        })
    }

    #[tokio::test]
    async fn reads_branch_head_and_history() {
        let router = Router::new()
            .route(
                "/repos/acme/relay/commits/main",
                get(|| async { Json(commit("def5678ffff", "fix bug\n\nlonger body")) }),
            )
            .route(
                "/repos/acme/relay/commits",
                get(|Query(q): Query<std::collections::HashMap<String, String>>| async move {
                    assert_eq!(q.get("sha").map(String::as_str), Some("main"));
                    assert!(q.contains_key("since"));
                    Json(json!([commit("def5678ffff", "fix bug"), commit("abc1234eeee", "base")]))
                }),
            );
        let addr = serve(router).await;
        let repo = GitHubRepository::from_config(&config(addr)).unwrap().unwrap();

        let head = repo.latest_revision().await.unwrap().unwrap();
        assert_eq!(head.short(), "def5678");
        assert_eq!(head.summary(), Some("fix bug"));
        assert_eq!(head.author(), Some("Ada"));
        assert_eq!(head.timestamp().unwrap().to_rfc3339(), "2024-05-01T09:00:00+00:00");

        let history = repo
            .revisions_since(head.timestamp(), 1)
            .await
            .unwrap();
        assert_eq!(history.len(), 1);
    }

    #[tokio::test]
    async fn single_commit_lookup_carries_commit_date() {
        let router = Router::new().route(
            "/repos/acme/relay/commits/abc1234",
            get(|| async { Json(commit("abc1234eeee", "base")) }),
        );
        let addr = serve(router).await;
        let repo = GitHubRepository::from_config(&config(addr)).unwrap().unwrap();

        let found = repo.revision("abc1234").await.unwrap().unwrap();
        assert_eq!(found.id(), "abc1234eeee");
        assert_eq!(found.timestamp().unwrap().to_rfc3339(), "2024-05-01T09:00:00+00:00");
        assert_eq!(repo.revision("fffffff").await.unwrap(), None);
    }

    #[tokio::test]
    async fn missing_release_is_none() {
        let router = Router::new().route(
            "/repos/acme/relay/releases/latest",
            get(|| async { (HttpStatus::NOT_FOUND, Json(json!({"message": "Not Found"}))) }),
        );
        let addr = serve(router).await;
        let repo = GitHubRepository::from_config(&config(addr)).unwrap().unwrap();
        assert_eq!(repo.latest_release().await.unwrap(), None);
    }

    #[tokio::test]
    async fn release_tag_prefix_is_stripped() {
        let router = Router::new().route(
            "/repos/acme/relay/releases/latest",
            get(|| async {
                Json(json!({
                    "tag_name": "v1.4.0",
                    "name": "Relay 1.4",
                    "body": "notes",
                    "published_at": "2024-05-01T08:00:00Z",
                    "html_url": "https://github.com/acme/relay/releases/v1.4.0"
                }))
            }),
        );
        let addr = serve(router).await;
        let repo = GitHubRepository::from_config(&config(addr)).unwrap().unwrap();
        let release = repo.latest_release().await.unwrap().unwrap();
        assert_eq!(release.version(), "1.4.0");
        assert_eq!(release.name.as_deref(), Some("Relay 1.4"));
    }

    #[tokio::test]
    async fn failures_are_classified() {
        let router = Router::new()
            .route(
                "/repos/acme/relay/commits/main",
                get(|| async { (HttpStatus::BAD_GATEWAY, "upstream down") }),
            )
            .route(
                "/repos/acme/relay/releases/latest",
                get(|| async { "not json" }),
            );
        let addr = serve(router).await;
        let repo = GitHubRepository::from_config(&config(addr)).unwrap().unwrap();

        let err = repo.latest_revision().await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::Network);
        let err = repo.latest_release().await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::Parse);
    }

    #[tokio::test]
    async fn slow_upstream_times_out() {
        let router = Router::new().route(
            "/repos/acme/relay/commits/main",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Json(commit("def5678", "late"))
            }),
        );
        let addr = serve(router).await;
        let repo = GitHubRepository::from_config(&config(addr)).unwrap().unwrap();
        let err = repo.latest_revision().await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::Network);
    }

    #[test]
    fn unconfigured_repository_is_none() {
        assert!(GitHubRepository::from_config(&UpdateConfig::default())
            .unwrap()
            .is_none());
    }

    #[test]
    fn revision_urls_point_at_web_host() {
        let config = UpdateConfig {
            github_owner: Some("acme".into()),
            github_repo: Some("relay".into()),
            ..UpdateConfig::default()
        };
        let repo = GitHubRepository::from_config(&config).unwrap().unwrap();
        assert_eq!(
            repo.revision_url("def5678").as_deref(),
            Some("https://github.com/acme/relay/commit/def5678")
        );
        assert_eq!(
            repo.endpoint(&["releases", "latest"]).unwrap().as_str(),
            "https://api.github.com/repos/acme/relay/releases/latest"
        );
    }
}
