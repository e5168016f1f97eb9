//! ---
//! ra_section: "11-test-harness"
//! ra_subsection: "module"
//! ra_type: "source"
//! ra_scope: "code"
//! ra_description: "Admin stack fixture with scripted git, hosted API and terminator."
//! ra_version: "v0.1.0"
//! ra_owner: "tbd"
//! ---
//! Test harness for the relay admin workspace.
//!
//! [`AdminFixture`] lays out a throwaway project root, wires the update
//! orchestrator to a [`FakeCheckout`] and a [`StaticRepository`], and serves
//! the admin router on an ephemeral port. Nothing here touches a real
//! repository, network or process exit.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use relay_api::{spawn_api_server, ApiServer, ApiState, ProcessLifecycle, Terminator};
use relay_common::{AppConfig, KeyValueStore, MemoryStore};
use relay_metrics::{new_registry, SharedRegistry, UpdateMetrics};
use relay_update::{RemoteRepository, UpdateService};
use reqwest::Client;
use serde_json::Value;
use tempfile::TempDir;
use tracing::debug;

pub use relay_update::testing::{release, FakeCheckout, StaticRepository};
pub use reqwest::{Method, StatusCode};

/// Terminator that records exit codes instead of exiting.
#[derive(Debug, Default)]
pub struct RecordingTerminator {
    codes: Mutex<Vec<i32>>,
}

impl RecordingTerminator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn exit_codes(&self) -> Vec<i32> {
        self.codes.lock().clone()
    }
}

impl Terminator for RecordingTerminator {
    fn terminate(&self, exit_code: i32) {
        debug!(exit_code, "recorded termination");
        self.codes.lock().push(exit_code);
    }
}

/// Knobs applied before the stack is assembled.
#[derive(Debug, Clone)]
pub struct FixtureOptions {
    pub head: String,
    pub version_label: Option<String>,
    pub restart_delay: Duration,
    pub restart_exit_code: i32,
    pub cache_ttl: Duration,
}

impl Default for FixtureOptions {
    fn default() -> Self {
        Self {
            head: "abc1234".to_owned(),
            version_label: Some("1.2.0".to_owned()),
            restart_delay: Duration::from_millis(50),
            restart_exit_code: 0,
            cache_ttl: Duration::from_secs(600),
        }
    }
}

/// A complete admin stack over scripted collaborators.
pub struct AdminFixture {
    root: TempDir,
    config: AppConfig,
    pub checkout: Arc<FakeCheckout>,
    pub remote: Arc<StaticRepository>,
    pub store: Arc<MemoryStore>,
    pub terminator: Arc<RecordingTerminator>,
    pub registry: SharedRegistry,
    pub updates: UpdateService,
    server: Option<ApiServer>,
    client: Client,
}

impl AdminFixture {
    pub fn new() -> Result<Self> {
        Self::with_options(FixtureOptions::default())
    }

    pub fn with_options(options: FixtureOptions) -> Result<Self> {
        let root = tempfile::tempdir().context("failed to create fixture root")?;
        if let Some(label) = &options.version_label {
            std::fs::write(root.path().join("VERSION"), format!("{label}\n"))
                .context("failed to write fixture VERSION")?;
        }

        let mut config = AppConfig::default();
        config.update.project_root = root.path().to_path_buf();
        config.update.container_markers = vec![root.path().join(".dockerenv")];
        config.update.cache_ttl = options.cache_ttl;
        config.lifecycle.restart_delay = options.restart_delay;
        config.lifecycle.restart_exit_code = options.restart_exit_code;
        config.validate().context("fixture configuration invalid")?;

        let checkout = Arc::new(FakeCheckout::new(&options.head));
        let remote = Arc::new(StaticRepository::new());
        let store = Arc::new(MemoryStore::new());
        let registry = new_registry();
        let updates = UpdateService::with_parts(
            config.update.clone(),
            store.clone(),
            checkout.clone(),
            Some(remote.clone() as Arc<dyn RemoteRepository>),
        )
        .with_metrics(UpdateMetrics::new(registry.clone())?);

        Ok(Self {
            root,
            config,
            checkout,
            remote,
            store,
            terminator: Arc::new(RecordingTerminator::new()),
            registry,
            updates,
            server: None,
            client: Client::new(),
        })
    }

    pub fn root(&self) -> &Path {
        self.root.path()
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn marker_path(&self) -> PathBuf {
        self.config.update.marker_path()
    }

    /// Make the deployment look like a container image.
    pub fn containerize(&self) -> Result<()> {
        std::fs::write(self.root().join(".dockerenv"), "").context("failed to write container marker")
    }

    /// Make the deployment look like an unpacked archive.
    pub fn unpack_archive(&self) {
        self.checkout.set_working_copy(false);
    }

    pub fn store(&self) -> &dyn KeyValueStore {
        self.store.as_ref()
    }

    /// Bind the admin router on an ephemeral port.
    pub fn serve(&mut self) -> Result<SocketAddr> {
        let lifecycle = ProcessLifecycle::new(&self.config.lifecycle, self.terminator.clone());
        let state = ApiState::new(
            &self.config,
            self.updates.clone(),
            self.store.clone(),
            lifecycle,
        )
        .with_registry(self.registry.clone());
        let addr: SocketAddr = "127.0.0.1:0".parse().context("invalid loopback address")?;
        let server = spawn_api_server(Arc::new(state), addr)?;
        let bound = server.addr();
        self.server = Some(server);
        Ok(bound)
    }

    pub fn url(&self, path: &str) -> Result<String> {
        let server = self.server.as_ref().context("fixture is not serving")?;
        Ok(format!("http://{}{path}", server.addr()))
    }

    /// Issue a request and decode the JSON body.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<(StatusCode, Value)> {
        let mut request = self.client.request(method, self.url(path)?);
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = request.send().await.context("request failed")?;
        let status = response.status();
        let body = response.json().await.context("response was not JSON")?;
        Ok((status, body))
    }

    pub async fn get(&self, path: &str) -> Result<(StatusCode, Value)> {
        self.request(Method::GET, path, None).await
    }

    pub async fn post(&self, path: &str) -> Result<(StatusCode, Value)> {
        self.request(Method::POST, path, None).await
    }

    pub async fn shutdown(mut self) -> Result<()> {
        match self.server.take() {
            Some(server) => server.shutdown().await,
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fixture_serves_system_info() {
        let mut fixture = AdminFixture::new().unwrap();
        fixture.serve().unwrap();
        let (status, body) = fixture.get("/admin/system-info").await.unwrap();
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["version"], "1.2.0");
        fixture.shutdown().await.unwrap();
    }

    #[test]
    fn recording_terminator_keeps_codes() {
        let terminator = RecordingTerminator::new();
        terminator.terminate(3);
        terminator.terminate(0);
        assert_eq!(terminator.exit_codes(), vec![3, 0]);
    }
}
