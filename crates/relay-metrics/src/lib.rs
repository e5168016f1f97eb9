//! ---
//! ra_section: "03-persistence-logging"
//! ra_subsection: "module"
//! ra_type: "source"
//! ra_scope: "code"
//! ra_description: "Metrics collection and export utilities."
//! ra_version: "v0.1.0"
//! ra_owner: "tbd"
//! ---
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::extract::State;
use axum::routing::get;
use axum::Router;
use prometheus::core::Collector;
use prometheus::{
    GaugeVec, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Shared registry type used across services.
pub type SharedRegistry = Arc<Registry>;

/// Produce a new shared registry.
pub fn new_registry() -> SharedRegistry {
    Arc::new(Registry::new())
}

/// Serve `registry` on `GET /metrics` at `addr`. Port 0 binds an ephemeral
/// port; [`MetricsServer::addr`] reports the one chosen.
pub fn spawn_http_server(registry: SharedRegistry, addr: SocketAddr) -> Result<MetricsServer> {
    let app = Router::new()
        .route("/metrics", get(scrape))
        .with_state(registry);

    let socket = StdTcpListener::bind(addr)
        .with_context(|| format!("metrics exporter could not bind {addr}"))?;
    socket
        .set_nonblocking(true)
        .context("metrics exporter socket rejected non-blocking mode")?;
    let bound = socket.local_addr().context("metrics exporter has no local address")?;
    let listener = TcpListener::from_std(socket).context("metrics exporter socket unusable by tokio")?;

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let task: JoinHandle<Result<()>> = tokio::spawn(async move {
        info!(address = %bound, "metrics exporter listening");
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                stop_rx.await.ok();
            })
            .await
            .context("metrics exporter stopped with an error")
    });

    Ok(MetricsServer {
        addr: bound,
        shutdown: Some(stop_tx),
        task,
    })
}

async fn scrape(State(registry): State<SharedRegistry>) -> Response {
    render(&registry)
}

/// Encode every family in `registry` using the Prometheus text format.
pub fn encode_text(registry: &Registry) -> Result<String> {
    TextEncoder::new()
        .encode_to_string(&registry.gather())
        .context("failed to encode metrics")
}

/// Prometheus scrape response, shared by the exporter and the admin router.
pub fn render(registry: &Registry) -> Response {
    match encode_text(registry) {
        Ok(body) => (
            StatusCode::OK,
            [(
                header::CONTENT_TYPE,
                HeaderValue::from_static(prometheus::TEXT_FORMAT),
            )],
            body,
        )
            .into_response(),
        Err(err) => {
            error!(error = %err, "metrics scrape failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics unavailable").into_response()
        }
    }
}

/// Handle to the running HTTP exporter.
#[derive(Debug)]
pub struct MetricsServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<()>>,
}

impl MetricsServer {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop accepting scrapes and wait for in-flight ones to finish.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(stop) = self.shutdown.take() {
            stop.send(()).ok();
        }
        self.task.await.context("metrics exporter task panicked")?
    }
}

/// Metrics recorded by the daemon process itself.
#[derive(Clone)]
pub struct DaemonMetrics {
    registry: SharedRegistry,
    starts_total: IntCounter,
    config_load_seconds: Histogram,
    build_info: GaugeVec,
    restarts_requested: IntCounter,
}

impl DaemonMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let starts_total = register(
            &registry,
            IntCounter::new(
                "relay_admind_starts_total",
                "Total number of times the admin daemon has initialised",
            )?,
        )?;
        let config_load_seconds = register(
            &registry,
            Histogram::with_opts(
                HistogramOpts::new(
                    "relay_admind_config_load_seconds",
                    "Time spent loading and validating configuration",
                )
                .buckets(prometheus::exponential_buckets(0.001, 2.0, 16)?),
            )?,
        )?;
        let build_info = register(
            &registry,
            GaugeVec::new(
                Opts::new(
                    "relay_admind_build_info",
                    "Build metadata for the running daemon binary",
                ),
                &["version", "git_sha", "profile"],
            )?,
        )?;
        let restarts_requested = register(
            &registry,
            IntCounter::new(
                "relay_admind_restart_requests_total",
                "Restart requests accepted through the admin API",
            )?,
        )?;

        Ok(Self {
            registry,
            starts_total,
            config_load_seconds,
            build_info,
            restarts_requested,
        })
    }

    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    pub fn inc_start(&self) {
        self.starts_total.inc();
    }

    pub fn observe_config_load(&self, seconds: f64) {
        self.config_load_seconds.observe(seconds);
    }

    pub fn set_build_info(&self, version: &str, git_sha: &str, profile: &str) {
        self.build_info
            .with_label_values(&[version, git_sha, profile])
            .set(1.0);
    }

    pub fn inc_restart_requested(&self) {
        self.restarts_requested.inc();
    }
}

/// Counters describing update checks and executions.
#[derive(Clone, Debug)]
pub struct UpdateMetrics {
    registry: SharedRegistry,
    checks: IntCounterVec,
    cache_hits: IntCounter,
    executes: IntCounterVec,
    step_failures: IntCounterVec,
    execute_seconds: Histogram,
}

impl UpdateMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let checks = register(
            &registry,
            IntCounterVec::new(
                Opts::new(
                    "relay_update_checks_total",
                    "Update checks by deployment method and outcome",
                ),
                &["method", "outcome"],
            )?,
        )?;
        let cache_hits = register(
            &registry,
            IntCounter::new(
                "relay_update_cache_hits_total",
                "Update checks answered from a fresh cached verdict",
            )?,
        )?;
        let executes = register(
            &registry,
            IntCounterVec::new(
                Opts::new("relay_update_executes_total", "Update executions by outcome"),
                &["outcome"],
            )?,
        )?;
        let step_failures = register(
            &registry,
            IntCounterVec::new(
                Opts::new(
                    "relay_update_step_failures_total",
                    "Failed update steps by step name",
                ),
                &["step"],
            )?,
        )?;
        let execute_seconds = register(
            &registry,
            Histogram::with_opts(
                HistogramOpts::new(
                    "relay_update_execute_seconds",
                    "Wall-clock duration of update executions",
                )
                .buckets(prometheus::exponential_buckets(0.05, 2.0, 14)?),
            )?,
        )?;

        Ok(Self {
            registry,
            checks,
            cache_hits,
            executes,
            step_failures,
            execute_seconds,
        })
    }

    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    pub fn record_check(&self, method: &str, outcome: &str) {
        self.checks.with_label_values(&[method, outcome]).inc();
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.inc();
    }

    pub fn record_execute(&self, outcome: &str, seconds: f64) {
        self.executes.with_label_values(&[outcome]).inc();
        self.execute_seconds.observe(seconds);
    }

    pub fn record_step_failure(&self, step: &str) {
        self.step_failures.with_label_values(&[step]).inc();
    }
}

fn register<C>(registry: &Registry, collector: C) -> Result<C>
where
    C: Collector + Clone + 'static,
{
    registry
        .register(Box::new(collector.clone()))
        .context("metric family already registered")?;
    Ok(collector)
}

pub use prometheus;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_metrics_are_encoded() {
        let registry = new_registry();
        let metrics = UpdateMetrics::new(registry.clone()).unwrap();
        metrics.record_check("source-controlled", "fresh");
        metrics.record_cache_hit();
        metrics.record_step_failure("dependency-refresh");
        let body = encode_text(&registry).unwrap();
        assert!(body.contains(
            "relay_update_checks_total{method=\"source-controlled\",outcome=\"fresh\"} 1"
        ));
        assert!(body.contains("relay_update_cache_hits_total 1"));
        assert!(body.contains("relay_update_step_failures_total{step=\"dependency-refresh\"} 1"));
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let registry = new_registry();
        DaemonMetrics::new(registry.clone()).unwrap();
        assert!(DaemonMetrics::new(registry).is_err());
    }

    #[tokio::test]
    async fn exporter_serves_registry() {
        let registry = new_registry();
        let daemon = DaemonMetrics::new(registry.clone()).unwrap();
        daemon.inc_start();
        let server = spawn_http_server(registry, "127.0.0.1:0".parse().unwrap()).unwrap();
        let url = format!("http://{}/metrics", server.addr());
        let body = reqwest::get(url).await.unwrap().text().await.unwrap();
        assert!(body.contains("relay_admind_starts_total 1"));
        server.shutdown().await.unwrap();
    }
}
