#[cfg(feature = "metrics-exporter")]
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// `RUST_LOG` wins over the CLI default.
pub fn init_tracing(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .compact()
        .init();
}

#[cfg(feature = "metrics-exporter")]
pub fn init_metrics(port: u16) {
    use metrics_exporter_prometheus::PrometheusBuilder;

    match PrometheusBuilder::new().with_http_listener(([0, 0, 0, 0], port)).install() {
        Ok(()) => {
            info!(port, "prometheus exporter listening on /metrics");
            metrics::gauge!("scanx_up").set(1.0);
        }
        // Metrics are optional; keep screening without them
        Err(e) => warn!(port, error = %e, "prometheus exporter install failed"),
    }
}

#[cfg(not(feature = "metrics-exporter"))]
pub fn init_metrics(port: u16) {
    let _ = port;
    tracing::debug!("built without metrics-exporter, metrics are not exported");
}
