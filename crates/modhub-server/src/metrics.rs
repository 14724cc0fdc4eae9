//! Prometheus metrics recorder and `/metrics` endpoint handler.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the `PrometheusHandle` used to render the `/metrics` endpoint.
/// Call once at server startup before any metrics are recorded.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render Prometheus text format from the installed recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

// Metric name constants to avoid typos across modules.

/// Inbound messages total (counter, labels: type).
pub const HUB_MESSAGES_TOTAL: &str = "hub_messages_total";
/// Failure responses total (counter, labels: reason).
pub const HUB_ERRORS_TOTAL: &str = "hub_errors_total";
/// Module connections opened total (counter).
pub const HUB_CONNECTIONS_TOTAL: &str = "hub_connections_total";
/// Module connections closed total (counter).
pub const HUB_DISCONNECTIONS_TOTAL: &str = "hub_disconnections_total";
/// Active module connections (gauge).
pub const HUB_CONNECTIONS_ACTIVE: &str = "hub_connections_active";
/// Frames dropped because a receiver queue was full or closed (counter).
pub const HUB_BROADCAST_DROPS_TOTAL: &str = "hub_broadcast_drops_total";
/// Dispatch duration seconds (histogram, labels: type).
pub const HUB_DISPATCH_DURATION_SECONDS: &str = "hub_dispatch_duration_seconds";
/// Connection lifetime seconds (histogram).
pub const HUB_CONNECTION_DURATION_SECONDS: &str = "hub_connection_duration_seconds";
