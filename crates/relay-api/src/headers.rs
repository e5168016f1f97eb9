//! ---
//! ra_section: "05-networking-external-interfaces"
//! ra_subsection: "module"
//! ra_type: "source"
//! ra_scope: "code"
//! ra_description: "Captured client header records and the unified user-agent cache."
//! ra_version: "v0.1.0"
//! ra_owner: "tbd"
//! ---
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use relay_common::KeyValueStore;

use crate::error::ApiError;
use crate::{ApiState, Envelope};

pub const HEADERS_PREFIX: &str = "claude_code_headers:";
pub const ACCOUNT_PREFIX: &str = "claude_account:";
pub const USER_AGENT_KEY: &str = "claude_code_user_agent:daily";

const UNKNOWN_ACCOUNT: &str = "Unknown";

/// Headers captured from a client for one upstream account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapturedHeaders {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub headers: IndexMap<String, String>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct AccountRecord {
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountHeaders {
    pub account_id: String,
    pub account_name: String,
    pub version: Option<String>,
    pub user_agent: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
    pub headers: IndexMap<String, String>,
}

/// Every parseable header record, in key order.
pub async fn collect_headers(store: &dyn KeyValueStore) -> Result<Vec<AccountHeaders>, ApiError> {
    let mut entries = Vec::new();
    for key in store.keys(HEADERS_PREFIX).await? {
        let Some(account_id) = key.strip_prefix(HEADERS_PREFIX) else {
            continue;
        };
        let Some(raw) = store.get(&key).await? else {
            continue;
        };
        let captured: CapturedHeaders = match serde_json::from_str(&raw) {
            Ok(captured) => captured,
            Err(err) => {
                warn!(account_id, error = %err, "skipping unreadable header record");
                continue;
            }
        };
        let account_name = account_name(store, account_id).await?;
        let user_agent = captured
            .headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case("user-agent"))
            .map(|(_, value)| value.clone());
        entries.push(AccountHeaders {
            account_id: account_id.to_owned(),
            account_name,
            version: captured.version,
            user_agent,
            updated_at: captured.updated_at,
            headers: captured.headers,
        });
    }
    Ok(entries)
}

async fn account_name(store: &dyn KeyValueStore, account_id: &str) -> Result<String, ApiError> {
    let raw = store.get(&format!("{ACCOUNT_PREFIX}{account_id}")).await?;
    let name = raw
        .and_then(|raw| serde_json::from_str::<AccountRecord>(&raw).ok())
        .and_then(|record| record.name)
        .filter(|name| !name.trim().is_empty());
    Ok(name.unwrap_or_else(|| UNKNOWN_ACCOUNT.to_owned()))
}

/// `GET /admin/claude-code-headers`.
pub async fn list_headers(
    State(state): State<Arc<ApiState>>,
) -> Result<Json<Envelope<Vec<AccountHeaders>>>, ApiError> {
    let entries = collect_headers(state.store()).await?;
    Ok(Json(Envelope::data(entries)))
}

/// `DELETE /admin/claude-code-headers/:account_id`.
pub async fn clear_headers(
    State(state): State<Arc<ApiState>>,
    Path(account_id): Path<String>,
) -> Result<Json<Envelope<()>>, ApiError> {
    let removed = state
        .store()
        .delete(&format!("{HEADERS_PREFIX}{account_id}"))
        .await?;
    info!(account_id = %account_id, removed, "captured headers cleared");
    Ok(Json(Envelope::message(format!(
        "Claude Code headers cleared for account {account_id}"
    ))))
}

/// Unified user-agent status. `ttlSeconds` is 0 when nothing is cached and
/// -1 when the value has no expiry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserAgentStatus {
    pub success: bool,
    pub user_agent: Option<String>,
    pub is_active: bool,
    pub ttl_seconds: i64,
    pub last_updated: Option<DateTime<Utc>>,
}

pub async fn read_user_agent(store: &dyn KeyValueStore) -> Result<UserAgentStatus, ApiError> {
    let user_agent = store.get(USER_AGENT_KEY).await?;
    let ttl_seconds = match &user_agent {
        Some(_) => store
            .ttl(USER_AGENT_KEY)
            .await?
            .map_or(-1, |ttl| ttl.as_secs() as i64),
        None => 0,
    };
    Ok(UserAgentStatus {
        success: true,
        is_active: user_agent.is_some(),
        last_updated: user_agent.as_ref().map(|_| Utc::now()),
        user_agent,
        ttl_seconds,
    })
}

/// `GET /admin/claude-code-version`.
pub async fn user_agent_status(
    State(state): State<Arc<ApiState>>,
) -> Result<Json<UserAgentStatus>, ApiError> {
    Ok(Json(read_user_agent(state.store()).await?))
}

/// `POST /admin/claude-code-version/clear`.
pub async fn clear_user_agent(
    State(state): State<Arc<ApiState>>,
) -> Result<Json<Envelope<()>>, ApiError> {
    let removed = state.store().delete(USER_AGENT_KEY).await?;
    info!(removed, "unified user-agent cache cleared");
    Ok(Json(Envelope::message(
        "Unified User-Agent cache cleared successfully",
    )))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use relay_common::MemoryStore;

    #[tokio::test]
    async fn lists_records_with_account_names() {
        let store = MemoryStore::new();
        store
            .set(
                "claude_code_headers:acc-1",
                r#"{"version":"1.0.57","headers":{"user-agent":"claude-cli/1.0.57","x-app":"cli"},"updatedAt":"2026-01-02T03:04:05Z"}"#.into(),
                None,
            )
            .await
            .unwrap();
        store
            .set("claude_code_headers:acc-2", r#"{"headers":{}}"#.into(), None)
            .await
            .unwrap();
        store
            .set("claude_code_headers:broken", "nope".into(), None)
            .await
            .unwrap();
        store
            .set("claude_account:acc-1", r#"{"id":"acc-1","name":"Primary"}"#.into(), None)
            .await
            .unwrap();

        let entries = collect_headers(&store).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].account_name, "Primary");
        assert_eq!(entries[0].user_agent.as_deref(), Some("claude-cli/1.0.57"));
        assert_eq!(entries[0].headers.keys().collect::<Vec<_>>(), ["user-agent", "x-app"]);
        assert_eq!(entries[1].account_id, "acc-2");
        assert_eq!(entries[1].account_name, "Unknown");
        assert_eq!(entries[1].user_agent, None);
    }

    #[tokio::test]
    async fn user_agent_status_reflects_cache() {
        let store = MemoryStore::new();
        let idle = read_user_agent(&store).await.unwrap();
        assert!(!idle.is_active);
        assert_eq!(idle.ttl_seconds, 0);
        assert_eq!(idle.last_updated, None);

        store
            .set(USER_AGENT_KEY, "claude-cli/1.0.60".into(), Some(Duration::from_secs(3600)))
            .await
            .unwrap();
        let active = read_user_agent(&store).await.unwrap();
        assert!(active.is_active);
        assert_eq!(active.user_agent.as_deref(), Some("claude-cli/1.0.60"));
        assert!(active.ttl_seconds > 3500 && active.ttl_seconds <= 3600);
        assert!(active.last_updated.is_some());
    }
}
