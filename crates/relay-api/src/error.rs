//! ---
//! ra_section: "05-networking-external-interfaces"
//! ra_subsection: "module"
//! ra_type: "source"
//! ra_scope: "code"
//! ra_description: "Error responses for the admin API."
//! ra_version: "v0.1.0"
//! ra_owner: "tbd"
//! ---
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use relay_common::StoreError;
use relay_update::{DeploymentMode, UpdateError};

#[derive(Debug, Serialize)]
struct ErrorResponse {
    success: bool,
    error: String,
    message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    hint: Vec<String>,
}

/// Handler error rendered as `{ success: false, error, message, hint? }`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    reason: String,
    message: String,
    hint: Vec<String>,
}

impl ApiError {
    pub fn new(status: StatusCode, reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            reason: reason.into(),
            message: message.into(),
            hint: Vec::new(),
        }
    }

    pub fn bad_request(reason: &str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, reason, message)
    }

    #[must_use]
    pub fn with_hint<I, S>(mut self, hint: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.hint = hint.into_iter().map(Into::into).collect();
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorResponse {
            success: false,
            error: self.reason,
            message: self.message,
            hint: self.hint,
        });
        (self.status, body).into_response()
    }
}

impl From<UpdateError> for ApiError {
    fn from(err: UpdateError) -> Self {
        let status = match &err {
            UpdateError::NotSourceControlled { .. } => StatusCode::BAD_REQUEST,
            UpdateError::InProgress => StatusCode::CONFLICT,
            UpdateError::SyncFailed(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let api = Self::new(status, err.reason(), err.to_string());
        match err {
            UpdateError::NotSourceControlled {
                mode: DeploymentMode::Managed,
            } => api.with_hint([
                "docker compose pull",
                "docker compose up -d",
            ]),
            _ => api,
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "store-unavailable",
            err.to_string(),
        )
    }
}
