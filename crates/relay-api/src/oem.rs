//! ---
//! ra_section: "05-networking-external-interfaces"
//! ra_subsection: "module"
//! ra_type: "source"
//! ra_scope: "code"
//! ra_description: "OEM branding settings persisted in the key-value store."
//! ra_version: "v0.1.0"
//! ra_owner: "tbd"
//! ---
use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use relay_common::{KeyValueStore, OemConfig};

use crate::error::ApiError;
use crate::{ApiState, Envelope};

pub const OEM_SETTINGS_KEY: &str = "oem:settings";

const MAX_SITE_NAME: usize = 100;
const MAX_ICON_DATA: usize = 500_000;
const MAX_NOTICE_TITLE: usize = 100;
const MAX_NOTICE_CONTENT: usize = 2_000;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ApiStatsNotice {
    pub enabled: bool,
    pub title: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OemSettings {
    pub site_name: String,
    pub site_icon: String,
    pub site_icon_data: String,
    pub show_admin_button: bool,
    pub api_stats_notice: ApiStatsNotice,
    pub updated_at: DateTime<Utc>,
}

impl OemSettings {
    pub fn defaults(config: &OemConfig) -> Self {
        Self {
            site_name: config.default_site_name.clone(),
            site_icon: String::new(),
            site_icon_data: String::new(),
            show_admin_button: true,
            api_stats_notice: ApiStatsNotice::default(),
            updated_at: Utc::now(),
        }
    }

    /// Overlay the top-level fields of a stored record on the defaults.
    fn merged(defaults: Self, stored: &str) -> Result<Self, serde_json::Error> {
        let mut base = serde_json::to_value(defaults)?;
        let overlay: Value = serde_json::from_str(stored)?;
        if let (Value::Object(base), Value::Object(overlay)) = (&mut base, overlay) {
            base.extend(overlay);
        }
        serde_json::from_value(base)
    }

    pub async fn load(store: &dyn KeyValueStore, config: &OemConfig) -> Result<Self, ApiError> {
        let defaults = Self::defaults(config);
        let Some(stored) = store.get(OEM_SETTINGS_KEY).await? else {
            return Ok(defaults);
        };
        match Self::merged(defaults.clone(), &stored) {
            Ok(settings) => Ok(settings),
            Err(err) => {
                warn!(error = %err, "stored OEM settings unreadable; serving defaults");
                Ok(defaults)
            }
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoticeUpdate {
    pub enabled: Option<bool>,
    pub title: Option<String>,
    pub content: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OemUpdate {
    pub site_name: Option<String>,
    pub site_icon: Option<String>,
    pub site_icon_data: Option<String>,
    pub show_admin_button: Option<bool>,
    pub api_stats_notice: Option<NoticeUpdate>,
}

impl OemUpdate {
    /// Validate and normalise into the stored shape.
    pub fn into_settings(self, now: DateTime<Utc>) -> Result<OemSettings, ApiError> {
        let site_name = self.site_name.unwrap_or_default();
        let site_name = site_name.trim();
        if site_name.is_empty() {
            return Err(ApiError::bad_request("invalid-oem-settings", "Site name is required"));
        }
        if site_name.chars().count() > MAX_SITE_NAME {
            return Err(ApiError::bad_request(
                "invalid-oem-settings",
                "Site name must be less than 100 characters",
            ));
        }

        let icon_data = self.site_icon_data.unwrap_or_default();
        if icon_data.len() > MAX_ICON_DATA {
            return Err(ApiError::bad_request(
                "invalid-oem-settings",
                "Icon file must be less than 350KB",
            ));
        }
        let icon = self.site_icon.unwrap_or_default();
        if !icon.is_empty() && icon_data.is_empty() && url::Url::parse(icon.trim()).is_err() {
            return Err(ApiError::bad_request(
                "invalid-oem-settings",
                "Invalid icon URL format",
            ));
        }

        let notice = self.api_stats_notice.unwrap_or_default();
        Ok(OemSettings {
            site_name: site_name.to_owned(),
            site_icon: icon.trim().to_owned(),
            site_icon_data: icon_data.trim().to_owned(),
            show_admin_button: self.show_admin_button.unwrap_or(true),
            api_stats_notice: ApiStatsNotice {
                enabled: notice.enabled.unwrap_or(false),
                title: truncate(notice.title.as_deref().unwrap_or_default().trim(), MAX_NOTICE_TITLE),
                content: truncate(
                    notice.content.as_deref().unwrap_or_default().trim(),
                    MAX_NOTICE_CONTENT,
                ),
            },
            updated_at: now,
        })
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicOemSettings {
    #[serde(flatten)]
    pub settings: OemSettings,
    pub ldap_enabled: bool,
}

/// `GET /admin/oem-settings`. Public; the login page renders from it.
pub async fn get_settings(
    State(state): State<Arc<ApiState>>,
) -> Result<Json<Envelope<PublicOemSettings>>, ApiError> {
    let settings = OemSettings::load(state.store(), &state.oem).await?;
    Ok(Json(Envelope::data(PublicOemSettings {
        settings,
        ldap_enabled: state.ldap_enabled,
    })))
}

/// `PUT /admin/oem-settings`.
pub async fn put_settings(
    State(state): State<Arc<ApiState>>,
    Json(update): Json<OemUpdate>,
) -> Result<Json<Envelope<OemSettings>>, ApiError> {
    let settings = update.into_settings(Utc::now())?;
    let encoded = serde_json::to_string(&settings).map_err(relay_common::StoreError::from)?;
    state.store().set(OEM_SETTINGS_KEY, encoded, None).await?;
    info!(site_name = %settings.site_name, "OEM settings updated");
    Ok(Json(
        Envelope::data(settings).with_message("OEM settings updated successfully"),
    ))
}
