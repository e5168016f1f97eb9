//! ---
//! ra_section: "05-networking-external-interfaces"
//! ra_subsection: "module"
//! ra_type: "source"
//! ra_scope: "code"
//! ra_description: "Restart scheduling and process introspection handlers."
//! ra_version: "v0.1.0"
//! ra_owner: "tbd"
//! ---
use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Serialize;
use tracing::info;

use relay_update::DeploymentMode;

use crate::{ApiState, Envelope};

const PROC_STATUS: &str = "/proc/self/status";

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryUsage {
    pub rss_mb: f64,
    pub virtual_mb: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildInfo {
    pub git_sha: String,
    pub profile: String,
    pub target: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemInfo {
    pub version: String,
    pub method: DeploymentMode,
    pub is_managed: bool,
    pub platform: &'static str,
    pub arch: &'static str,
    pub uptime: u64,
    pub memory: Option<MemoryUsage>,
    pub pid: u32,
    pub build: BuildInfo,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RestartAck {
    pub scheduled: bool,
    pub delay_ms: u64,
}

/// `POST /admin/restart-service`: acknowledge now, terminate after the delay.
pub async fn restart_service(State(state): State<Arc<ApiState>>) -> Json<Envelope<RestartAck>> {
    let lifecycle = state.lifecycle();
    let scheduled = lifecycle.schedule_restart();
    if scheduled {
        if let Some(metrics) = state.daemon_metrics() {
            metrics.inc_restart_requested();
        }
        info!("service restart requested");
    }
    let message = if scheduled {
        "Service restart scheduled"
    } else {
        "Service restart already pending"
    };
    let ack = RestartAck {
        scheduled,
        delay_ms: lifecycle.delay().as_millis() as u64,
    };
    Json(Envelope::data(ack).with_message(message))
}

/// `GET /admin/system-info`.
pub async fn system_info(State(state): State<Arc<ApiState>>) -> Json<Envelope<SystemInfo>> {
    let updates = state.updates();
    let method = updates.classify().await;
    let version = updates.current_label().await;
    let info = SystemInfo {
        version,
        method,
        is_managed: method.is_managed(),
        platform: std::env::consts::OS,
        arch: std::env::consts::ARCH,
        uptime: state.start.elapsed().as_secs(),
        memory: memory_usage().await,
        pid: std::process::id(),
        build: BuildInfo {
            git_sha: state.version.git_sha.clone(),
            profile: state.version.profile.clone(),
            target: state.version.target.clone(),
        },
    };
    Json(Envelope::data(info))
}

async fn memory_usage() -> Option<MemoryUsage> {
    let status = tokio::fs::read_to_string(PROC_STATUS).await.ok()?;
    parse_proc_status(&status)
}

/// Extract resident and virtual size from `/proc/<pid>/status` text.
fn parse_proc_status(status: &str) -> Option<MemoryUsage> {
    let mut rss_kb = None;
    let mut virtual_kb = None;
    for line in status.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim().trim_end_matches(" kB").trim();
        match key.trim() {
            "VmRSS" => rss_kb = value.parse::<u64>().ok(),
            "VmSize" => virtual_kb = value.parse::<u64>().ok(),
            _ => {}
        }
    }
    Some(MemoryUsage {
        rss_mb: to_mb(rss_kb?),
        virtual_mb: to_mb(virtual_kb?),
    })
}

fn to_mb(kb: u64) -> f64 {
    (kb as f64 / 1024.0 * 10.0).round() / 10.0
}
