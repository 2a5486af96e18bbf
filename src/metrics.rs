//! Prometheus metrics exposition server.
//!
//! Exposes cluster-alertd metrics in Prometheus format on a configurable
//! port and keeps the uptime gauge current while it runs.

use anyhow::Result;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::info;

const UPTIME_TICK: Duration = Duration::from_secs(15);

/// Register all metric descriptions for Prometheus.
///
/// Call once at startup, after the recorder is installed.
pub fn register_metric_descriptions() {
    use metrics::{describe_counter, describe_gauge};

    describe_counter!(
        "alertd_alerts_produced_total",
        "Total number of alerts accepted into a cluster queue"
    );
    describe_counter!(
        "alertd_alerts_consumed_total",
        "Total number of alerts taken from a cluster queue by the consumer"
    );
    describe_counter!(
        "alertd_alerts_dropped_total",
        "Total number of queued alerts evicted because their cluster queue was full"
    );
    describe_counter!(
        "alertd_alerts_unroutable_total",
        "Total number of alerts rejected because no cluster id could be extracted"
    );
    describe_counter!(
        "alertd_handler_panics_total",
        "Total number of alert handler panics caught by the consumer"
    );
    describe_counter!(
        "alertd_job_attempts_total",
        "Total number of job attempts started, by job kind"
    );
    describe_counter!(
        "alertd_jobs_succeeded_total",
        "Total number of jobs that produced a conclusive result"
    );
    describe_counter!(
        "alertd_jobs_failed_total",
        "Total number of jobs that failed after all attempts"
    );
    describe_counter!(
        "alertd_notifications_sent_total",
        "Total number of notifications delivered to a device"
    );
    describe_counter!(
        "alertd_notifications_failed_total",
        "Total number of notifications that could not be delivered"
    );

    describe_gauge!(
        "alertd_queue_size",
        "Current number of alerts waiting in a cluster queue"
    );
    describe_gauge!("alertd_jobs_in_flight", "Number of background jobs running");
    describe_gauge!(
        "alertd_uptime_seconds",
        "Time in seconds since cluster-alertd started"
    );
    describe_gauge!(
        "alertd_build_info",
        "Build information with version label (always 1)"
    );
}

/// Metrics server for Prometheus exposition on `/metrics`.
pub struct MetricsServer {
    port: u16,
    started: Instant,
}

impl MetricsServer {
    /// Use port 0 to let the OS assign an available port.
    pub fn new(port: u16) -> Self {
        Self {
            port,
            started: Instant::now(),
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Install the global recorder and serve until cancelled.
    ///
    /// # Errors
    ///
    /// Returns an error if the exporter cannot be installed, for example
    /// because the port is taken or a recorder already exists.
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        let addr: SocketAddr = ([0, 0, 0, 0], self.port).into();

        // The recorder can only be installed once per process
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .map_err(|e| anyhow::anyhow!("Failed to install Prometheus exporter: {}", e))?;

        register_metric_descriptions();
        metrics::gauge!("alertd_build_info", "version" => env!("CARGO_PKG_VERSION")).set(1.0);

        info!(port = self.port, "Metrics server started on /metrics");

        let mut tick = tokio::time::interval(UPTIME_TICK);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tick.tick() => {
                    metrics::gauge!("alertd_uptime_seconds")
                        .set(self.started.elapsed().as_secs_f64());
                }
            }
        }

        info!("Metrics server shutting down");
        Ok(())
    }
}
