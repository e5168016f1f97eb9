//! ---
//! ra_section: "05-networking-external-interfaces"
//! ra_subsection: "module"
//! ra_type: "source"
//! ra_scope: "code"
//! ra_description: "Admin REST surface for relay deployments."
//! ra_version: "v0.1.0"
//! ra_owner: "tbd"
//! ---
//! axum router for the admin surface: update check and execution, restart,
//! system information, OEM branding and the client caches kept by the relay.

pub mod error;
pub mod headers;
pub mod lifecycle;
pub mod oem;
pub mod system;
pub mod updates;

use std::fmt;
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::Router;
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use relay_common::{AppConfig, KeyValueStore, OemConfig, VersionInfo};
use relay_metrics::{DaemonMetrics, SharedRegistry};
use relay_update::UpdateService;

pub use error::ApiError;
pub use lifecycle::{ProcessLifecycle, Terminator};

/// Success envelope shared by every admin handler.
#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl<T> Envelope<T> {
    pub fn data(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
        }
    }

    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

impl Envelope<()> {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            success: true,
            data: None,
            message: Some(message.into()),
        }
    }
}

/// Shared API state exposed to handlers.
pub struct ApiState {
    updates: UpdateService,
    store: Arc<dyn KeyValueStore>,
    lifecycle: ProcessLifecycle,
    oem: OemConfig,
    ldap_enabled: bool,
    version: VersionInfo,
    start: Instant,
    registry: Option<SharedRegistry>,
    daemon_metrics: Option<DaemonMetrics>,
}

impl ApiState {
    pub fn new(
        config: &AppConfig,
        updates: UpdateService,
        store: Arc<dyn KeyValueStore>,
        lifecycle: ProcessLifecycle,
    ) -> Self {
        Self {
            updates,
            store,
            lifecycle,
            oem: config.oem.clone(),
            ldap_enabled: config.ldap.enabled,
            version: VersionInfo::current(),
            start: Instant::now(),
            registry: None,
            daemon_metrics: None,
        }
    }

    /// Serve `registry` on `GET /metrics`.
    #[must_use]
    pub fn with_registry(mut self, registry: SharedRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    #[must_use]
    pub fn with_daemon_metrics(mut self, metrics: DaemonMetrics) -> Self {
        self.daemon_metrics = Some(metrics);
        self
    }

    pub fn updates(&self) -> &UpdateService {
        &self.updates
    }

    pub fn store(&self) -> &dyn KeyValueStore {
        self.store.as_ref()
    }

    pub fn lifecycle(&self) -> &ProcessLifecycle {
        &self.lifecycle
    }

    fn daemon_metrics(&self) -> Option<&DaemonMetrics> {
        self.daemon_metrics.as_ref()
    }
}

impl fmt::Debug for ApiState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiState")
            .field("version", &self.version)
            .field("project_root", &self.updates.config().project_root)
            .field("ldap_enabled", &self.ldap_enabled)
            .finish_non_exhaustive()
    }
}

/// Handle to the running API server.
#[derive(Debug)]
pub struct ApiServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<()>>,
}

impl ApiServer {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        match self.task.await {
            Ok(result) => result,
            Err(err) => Err(err.into()),
        }
    }
}

/// Admin routes nested under `/admin`, plus `/metrics`.
pub fn build_router(state: Arc<ApiState>) -> Router {
    let admin = Router::new()
        .route("/check-updates", get(updates::check_updates))
        .route("/perform-update", post(updates::perform_update))
        .route("/restart-service", post(system::restart_service))
        .route("/system-info", get(system::system_info))
        .route(
            "/oem-settings",
            get(oem::get_settings).put(oem::put_settings),
        )
        .route("/claude-code-headers", get(headers::list_headers))
        .route(
            "/claude-code-headers/:account_id",
            delete(headers::clear_headers),
        )
        .route("/claude-code-version", get(headers::user_agent_status))
        .route("/claude-code-version/clear", post(headers::clear_user_agent));

    Router::new()
        .nest("/admin", admin)
        .route("/metrics", get(metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind `addr` and serve the admin router until [`ApiServer::shutdown`].
pub fn spawn_api_server(state: Arc<ApiState>, addr: SocketAddr) -> Result<ApiServer> {
    let router = build_router(state);

    let listener = StdTcpListener::bind(addr)
        .with_context(|| format!("failed to bind API listener {addr}"))?;
    listener
        .set_nonblocking(true)
        .context("failed to configure API listener as non-blocking")?;
    let addr = listener
        .local_addr()
        .context("failed to read API listener address")?;
    let tcp_listener =
        TcpListener::from_std(listener).context("failed to create tokio listener")?;

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let handle: JoinHandle<Result<()>> = tokio::spawn(async move {
        info!(address = %addr, "admin api listening");
        if let Err(err) = axum::serve(tcp_listener, router)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await
        {
            error!(address = %addr, error = %err, "admin api exited with error");
            return Err(err.into());
        }
        Ok(())
    });

    Ok(ApiServer {
        addr,
        shutdown: Some(shutdown_tx),
        task: handle,
    })
}

async fn metrics(State(state): State<Arc<ApiState>>) -> Response {
    match &state.registry {
        Some(registry) => relay_metrics::render(registry),
        None => axum::http::StatusCode::NOT_FOUND.into_response(),
    }
}
