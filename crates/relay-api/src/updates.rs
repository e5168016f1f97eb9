//! ---
//! ra_section: "05-networking-external-interfaces"
//! ra_subsection: "module"
//! ra_type: "source"
//! ra_scope: "code"
//! ra_description: "Update check and execution handlers."
//! ra_version: "v0.1.0"
//! ra_owner: "tbd"
//! ---
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use tracing::{info, warn};

use relay_update::{CheckReport, UpdateOutcome};

use crate::error::ApiError;
use crate::{ApiState, Envelope};

#[derive(Debug, Default, Deserialize)]
pub struct CheckQuery {
    #[serde(default)]
    force: Option<String>,
}

impl CheckQuery {
    fn force(&self) -> bool {
        matches!(
            self.force.as_deref().map(str::trim),
            Some("true" | "1" | "yes" | "")
        )
    }
}

/// `GET /admin/check-updates[?force=true]`. Always answers with a success
/// envelope; upstream trouble shows up as `warning`/`error` in the report.
pub async fn check_updates(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<CheckQuery>,
) -> Json<Envelope<CheckReport>> {
    let verdict = state.updates().check(query.force()).await;
    if let Some(warning) = &verdict.warning {
        warn!(warning = %warning, cached = verdict.cached, "update check degraded");
    }
    Json(Envelope::data(verdict.report()))
}

/// `POST /admin/perform-update`.
pub async fn perform_update(
    State(state): State<Arc<ApiState>>,
) -> Result<Json<Envelope<UpdateOutcome>>, ApiError> {
    info!("update requested");
    let outcome = state.updates().execute().await?;
    let message = outcome.message.clone();
    Ok(Json(Envelope::data(outcome).with_message(message)))
}
