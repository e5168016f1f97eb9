//! ---
//! ra_section: "01-core-functionality"
//! ra_subsection: "module"
//! ra_type: "source"
//! ra_scope: "code"
//! ra_description: "Shared primitives and utilities for the admin runtime."
//! ra_version: "v0.1.0"
//! ra_owner: "tbd"
//! ---
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSeconds};
use tracing::debug;

use crate::logging::LogFormat;

fn default_api_listen() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 3100))
}

fn default_metrics_listen() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 9898))
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::StructuredJson
}

fn default_project_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_version_file() -> PathBuf {
    PathBuf::from("VERSION")
}

fn default_baseline_version() -> String {
    "1.0.0".to_owned()
}

fn default_marker_file() -> PathBuf {
    PathBuf::from(".relay-admin/applied-revision.json")
}

fn default_container_markers() -> Vec<PathBuf> {
    vec![
        PathBuf::from("/.dockerenv"),
        PathBuf::from("/run/.containerenv"),
    ]
}

fn default_git_remote() -> String {
    "origin".to_owned()
}

fn default_git_branch() -> String {
    "main".to_owned()
}

fn default_github_api_url() -> String {
    "https://api.github.com".to_owned()
}

fn default_user_agent() -> String {
    concat!("relay-admin/", env!("CARGO_PKG_VERSION")).to_owned()
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_cache_ttl() -> Duration {
    Duration::from_secs(600)
}

fn default_stale_retention() -> Duration {
    Duration::from_secs(24 * 3600)
}

fn default_probe_timeout() -> Duration {
    Duration::from_secs(3)
}

fn default_sync_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_install_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_build_timeout() -> Duration {
    Duration::from_secs(600)
}

fn default_recent_change_limit() -> usize {
    20
}

fn default_dependency_manifests() -> Vec<String> {
    ["package.json", "package-lock.json", "yarn.lock", "pnpm-lock.yaml"]
        .into_iter()
        .map(str::to_owned)
        .collect()
}

fn default_asset_paths() -> Vec<String> {
    vec!["web/".to_owned()]
}

fn default_install_command() -> Vec<String> {
    vec!["npm".to_owned(), "install".to_owned()]
}

fn default_build_command() -> Vec<String> {
    ["npm", "run", "build:web"]
        .into_iter()
        .map(str::to_owned)
        .collect()
}

fn default_restart_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_site_name() -> String {
    "Relay Service".to_owned()
}

/// Primary configuration object for the admin service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub update: UpdateConfig,
    #[serde(default)]
    pub lifecycle: LifecycleConfig,
    #[serde(default)]
    pub oem: OemConfig,
    #[serde(default)]
    pub ldap: LdapConfig,
}

/// Metadata describing where an [`AppConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    pub config: AppConfig,
    /// `None` when no file was found and built-in defaults are in effect.
    pub source: Option<PathBuf>,
}

impl AppConfig {
    pub const ENV_CONFIG_PATH: &'static str = "RELAY_ADMIN_CONFIG";

    /// Load configuration from disk, respecting the `RELAY_ADMIN_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration together with the effective source path.
    ///
    /// An explicit `RELAY_ADMIN_CONFIG` path must exist. When none of the
    /// candidates exist the defaults are returned.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedAppConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: Some(path),
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: Some(path),
                });
            }
        }

        debug!(
            inspected = %candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", "),
            "no configuration file found; using defaults"
        );
        let config = Self::default();
        config.validate()?;
        Ok(LoadedAppConfig {
            config,
            source: None,
        })
    }

    fn from_path(path: &Path) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        let config = toml::from_str::<AppConfig>(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        self.update.validate()?;
        if self.lifecycle.restart_delay.is_zero() {
            return Err(anyhow!("lifecycle.restart_delay must be greater than zero"));
        }
        Ok(())
    }
}

impl std::str::FromStr for AppConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_api_listen")]
    pub listen: SocketAddr,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen: default_api_listen(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_prefix: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_metrics_listen")]
    pub listen: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen: default_metrics_listen(),
        }
    }
}

/// Settings for update detection and execution.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateConfig {
    /// Root of the deployed tree; relative paths below resolve against it.
    #[serde(default = "default_project_root")]
    pub project_root: PathBuf,
    #[serde(default = "default_version_file")]
    pub version_file: PathBuf,
    /// Label reported when the version file is missing.
    #[serde(default = "default_baseline_version")]
    pub baseline_version: String,
    /// Last-applied revision record for archive deployments.
    #[serde(default = "default_marker_file")]
    pub marker_file: PathBuf,
    #[serde(default = "default_container_markers")]
    pub container_markers: Vec<PathBuf>,
    #[serde(default = "default_git_remote")]
    pub git_remote: String,
    #[serde(default = "default_git_branch")]
    pub git_branch: String,
    #[serde(default)]
    pub github_owner: Option<String>,
    #[serde(default)]
    pub github_repo: Option<String>,
    /// Branch queried on the hosted API; defaults to `git_branch`.
    #[serde(default)]
    pub github_branch: Option<String>,
    #[serde(default = "default_github_api_url")]
    pub github_api_url: String,
    #[serde(default)]
    pub github_token: Option<String>,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_request_timeout")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub request_timeout: Duration,
    #[serde(default = "default_cache_ttl")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub cache_ttl: Duration,
    /// How long an expired verdict is kept for network-failure fallback.
    #[serde(default = "default_stale_retention")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub stale_retention: Duration,
    #[serde(default = "default_probe_timeout")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub probe_timeout: Duration,
    #[serde(default = "default_sync_timeout")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub sync_timeout: Duration,
    #[serde(default = "default_sync_timeout")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub advance_timeout: Duration,
    #[serde(default = "default_install_timeout")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub install_timeout: Duration,
    #[serde(default = "default_build_timeout")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub build_timeout: Duration,
    #[serde(default = "default_recent_change_limit")]
    pub recent_change_limit: usize,
    #[serde(default = "default_dependency_manifests")]
    pub dependency_manifests: Vec<String>,
    #[serde(default = "default_asset_paths")]
    pub asset_paths: Vec<String>,
    #[serde(default = "default_install_command")]
    pub install_command: Vec<String>,
    #[serde(default = "default_build_command")]
    pub build_command: Vec<String>,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            project_root: default_project_root(),
            version_file: default_version_file(),
            baseline_version: default_baseline_version(),
            marker_file: default_marker_file(),
            container_markers: default_container_markers(),
            git_remote: default_git_remote(),
            git_branch: default_git_branch(),
            github_owner: None,
            github_repo: None,
            github_branch: None,
            github_api_url: default_github_api_url(),
            github_token: None,
            user_agent: default_user_agent(),
            request_timeout: default_request_timeout(),
            cache_ttl: default_cache_ttl(),
            stale_retention: default_stale_retention(),
            probe_timeout: default_probe_timeout(),
            sync_timeout: default_sync_timeout(),
            advance_timeout: default_sync_timeout(),
            install_timeout: default_install_timeout(),
            build_timeout: default_build_timeout(),
            recent_change_limit: default_recent_change_limit(),
            dependency_manifests: default_dependency_manifests(),
            asset_paths: default_asset_paths(),
            install_command: default_install_command(),
            build_command: default_build_command(),
        }
    }
}

impl UpdateConfig {
    /// Hosted repository coordinates when both owner and repository are set.
    #[must_use]
    pub fn github(&self) -> Option<(&str, &str)> {
        self.github_owner
            .as_deref()
            .zip(self.github_repo.as_deref())
    }

    /// Branch tracked on the hosted API.
    #[must_use]
    pub fn github_branch(&self) -> &str {
        self.github_branch.as_deref().unwrap_or(&self.git_branch)
    }

    /// Resolve a possibly relative path against the project root.
    #[must_use]
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.project_root.join(path)
        }
    }

    pub fn version_path(&self) -> PathBuf {
        self.resolve(&self.version_file)
    }

    pub fn marker_path(&self) -> PathBuf {
        self.resolve(&self.marker_file)
    }

    pub fn validate(&self) -> Result<()> {
        if self.git_remote.trim().is_empty() {
            return Err(anyhow!("update.git_remote must not be empty"));
        }
        if self.git_branch.trim().is_empty() {
            return Err(anyhow!("update.git_branch must not be empty"));
        }
        for (name, timeout) in [
            ("request_timeout", self.request_timeout),
            ("cache_ttl", self.cache_ttl),
            ("probe_timeout", self.probe_timeout),
            ("sync_timeout", self.sync_timeout),
            ("advance_timeout", self.advance_timeout),
            ("install_timeout", self.install_timeout),
            ("build_timeout", self.build_timeout),
        ] {
            if timeout.is_zero() {
                return Err(anyhow!("update.{name} must be greater than zero"));
            }
        }
        if self.cache_ttl > self.stale_retention {
            return Err(anyhow!(
                "update.cache_ttl ({}s) must not exceed update.stale_retention ({}s)",
                self.cache_ttl.as_secs(),
                self.stale_retention.as_secs()
            ));
        }
        if self.install_command.is_empty() || self.build_command.is_empty() {
            return Err(anyhow!(
                "update.install_command and update.build_command must name a program"
            ));
        }
        Ok(())
    }
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleConfig {
    #[serde(default = "default_restart_delay")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub restart_delay: Duration,
    /// Exit code used for a requested restart; supervisors restart on it.
    #[serde(default)]
    pub restart_exit_code: i32,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            restart_delay: default_restart_delay(),
            restart_exit_code: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OemConfig {
    #[serde(default = "default_site_name")]
    pub default_site_name: String,
}

impl Default for OemConfig {
    fn default() -> Self {
        Self {
            default_site_name: default_site_name(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LdapConfig {
    #[serde(default)]
    pub enabled: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn defaults_validate() {
        let config = AppConfig::default();
        config.validate().unwrap();
        assert_eq!(config.update.cache_ttl, Duration::from_secs(600));
        assert_eq!(config.update.github_branch(), "main");
        assert!(config.update.github().is_none());
    }

    #[test]
    fn parses_durations_in_seconds() {
        let config = AppConfig::from_str(
            r#"
            [update]
            project_root = "/srv/relay"
            git_branch = "release"
            github_owner = "acme"
            github_repo = "relay"
            cache_ttl = 120
            sync_timeout = 45

            [lifecycle]
            restart_delay = 2
            restart_exit_code = 75
            "#,
        )
        .unwrap();
        assert_eq!(config.update.cache_ttl, Duration::from_secs(120));
        assert_eq!(config.update.sync_timeout, Duration::from_secs(45));
        assert_eq!(config.update.github(), Some(("acme", "relay")));
        assert_eq!(config.update.github_branch(), "release");
        assert_eq!(
            config.update.version_path(),
            PathBuf::from("/srv/relay/VERSION")
        );
        assert_eq!(config.lifecycle.restart_exit_code, 75);
    }

    #[test]
    fn rejects_ttl_longer_than_retention() {
        let err = AppConfig::from_str(
            r#"
            [update]
            cache_ttl = 7200
            stale_retention = 600
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("cache_ttl"));
    }

    #[test]
    fn rejects_zero_timeouts() {
        let err = AppConfig::from_str("[update]\nsync_timeout = 0\n").unwrap_err();
        assert!(err.to_string().contains("sync_timeout"));
    }

    #[test]
    fn missing_files_fall_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = AppConfig::load_with_source(&[dir.path().join("absent.toml")]).unwrap();
        assert!(loaded.source.is_none());
        assert_eq!(loaded.config.update.git_remote, "origin");
    }

    #[test]
    fn loads_first_existing_candidate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay-admin.toml");
        fs::write(&path, "[oem]\ndefault_site_name = \"Acme Relay\"\n").unwrap();
        let loaded =
            AppConfig::load_with_source(&[dir.path().join("absent.toml"), path.clone()]).unwrap();
        assert_eq!(loaded.source, Some(path));
        assert_eq!(loaded.config.oem.default_site_name, "Acme Relay");
    }
}
