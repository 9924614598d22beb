//! Prometheus metrics for Twinport.
//!
//! The recorder is installed without a listener: the host serves the
//! rendered text itself on `/metrics`.
//!
//! # Standard Metrics
//!
//! | Metric | Type | Labels |
//! |--------|------|--------|
//! | `twinport_rpc_started_total` | Counter | `service`, `method` |
//! | `twinport_rpc_handled_total` | Counter | `service`, `method`, `code` |
//! | `twinport_rpc_handling_seconds` | Histogram | `service`, `method` |
//! | `twinport_rpc_in_flight` | Gauge | - |
//! | `twinport_http_requests_total` | Counter | `method`, `status` |
//! | `twinport_http_request_duration_seconds` | Histogram | `method` |

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use parking_lot::Mutex;

use crate::error::TelemetryError;
use crate::TelemetryResult;

/// RPC calls started.
pub const RPC_STARTED_TOTAL: &str = "twinport_rpc_started_total";
/// RPC calls completed, by status code.
pub const RPC_HANDLED_TOTAL: &str = "twinport_rpc_handled_total";
/// RPC handling latency.
pub const RPC_HANDLING_SECONDS: &str = "twinport_rpc_handling_seconds";
/// RPC calls currently running.
pub const RPC_IN_FLIGHT: &str = "twinport_rpc_in_flight";
/// HTTP requests served by the HTTP transport.
pub const HTTP_REQUESTS_TOTAL: &str = "twinport_http_requests_total";
/// HTTP request latency.
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "twinport_http_request_duration_seconds";

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();
static INIT_LOCK: Mutex<()> = Mutex::new(());

/// Metrics configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsConfig {
    /// Whether metrics are recorded.
    pub enabled: bool,

    /// Histogram buckets for latency metrics, in seconds.
    pub duration_buckets: Vec<f64>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            duration_buckets: vec![
                0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
            ],
        }
    }
}

/// Installs the global Prometheus recorder.
///
/// Safe to call more than once; later calls are no-ops.
///
/// # Errors
///
/// Returns `TelemetryError::Recorder` if the recorder cannot be built or
/// another recorder is already installed.
pub fn init_metrics(config: &MetricsConfig) -> TelemetryResult<()> {
    if !config.enabled {
        return Ok(());
    }

    let _guard = INIT_LOCK.lock();
    if METRICS_HANDLE.get().is_some() {
        return Ok(());
    }

    let mut builder = PrometheusBuilder::new();
    if !config.duration_buckets.is_empty() {
        for name in [RPC_HANDLING_SECONDS, HTTP_REQUEST_DURATION_SECONDS] {
            builder = builder
                .set_buckets_for_metric(Matcher::Full(name.to_string()), &config.duration_buckets)
                .map_err(|e| TelemetryError::Recorder(e.to_string()))?;
        }
    }

    let handle = builder
        .install_recorder()
        .map_err(|e| TelemetryError::Recorder(e.to_string()))?;

    let _ = METRICS_HANDLE.set(handle);
    register_metric_descriptions();

    Ok(())
}

/// Returns the global metrics handle if initialized.
pub fn metrics_handle() -> Option<&'static PrometheusHandle> {
    METRICS_HANDLE.get()
}

/// Renders metrics in Prometheus text format.
///
/// Returns `None` if metrics are not initialized.
#[must_use]
pub fn render_metrics() -> Option<String> {
    METRICS_HANDLE.get().map(PrometheusHandle::render)
}

fn register_metric_descriptions() {
    describe_counter!(RPC_STARTED_TOTAL, "Total number of RPCs started on the server");
    describe_counter!(
        RPC_HANDLED_TOTAL,
        "Total number of RPCs completed on the server, regardless of success or failure"
    );
    describe_histogram!(
        RPC_HANDLING_SECONDS,
        "Latency of RPCs handled by the server, in seconds"
    );
    describe_gauge!(RPC_IN_FLIGHT, "Number of RPCs currently being handled");
    describe_counter!(HTTP_REQUESTS_TOTAL, "Total number of HTTP requests served");
    describe_histogram!(
        HTTP_REQUEST_DURATION_SECONDS,
        "HTTP request duration in seconds"
    );
}

/// Records the start of an RPC.
pub fn record_rpc_started(service: &str, method: &str) {
    counter!(
        RPC_STARTED_TOTAL,
        "service" => service.to_string(),
        "method" => method.to_string()
    )
    .increment(1);
}

/// Records a completed RPC and its latency.
///
/// `code` is the gRPC status code name (e.g. `"OK"`, `"NotFound"`).
pub fn record_rpc_handled(service: &str, method: &str, code: &str, duration: Duration) {
    counter!(
        RPC_HANDLED_TOTAL,
        "service" => service.to_string(),
        "method" => method.to_string(),
        "code" => code.to_string()
    )
    .increment(1);

    histogram!(
        RPC_HANDLING_SECONDS,
        "service" => service.to_string(),
        "method" => method.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Records an HTTP request served by the host.
pub fn record_http_request(method: &str, status_code: u16, duration: Duration) {
    counter!(
        HTTP_REQUESTS_TOTAL,
        "method" => method.to_string(),
        "status" => status_code.to_string()
    )
    .increment(1);

    histogram!(
        HTTP_REQUEST_DURATION_SECONDS,
        "method" => method.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Keeps the in-flight RPC gauge raised while alive.
pub struct InFlightGuard {
    _private: (),
}

impl InFlightGuard {
    /// Creates a new guard and increments the gauge.
    #[must_use]
    pub fn new() -> Self {
        gauge!(RPC_IN_FLIGHT).increment(1.0);
        Self { _private: () }
    }
}

impl Default for InFlightGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        gauge!(RPC_IN_FLIGHT).decrement(1.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = MetricsConfig::default();
        assert!(config.enabled);
        assert_eq!(config.duration_buckets.len(), 12);
    }

    #[test]
    fn test_record_functions_dont_panic() {
        record_rpc_started("users.v1.Users", "GetUser");
        record_rpc_handled("users.v1.Users", "GetUser", "OK", Duration::from_millis(3));
        record_http_request("GET", 200, Duration::from_millis(1));
        let guard = InFlightGuard::new();
        drop(guard);
    }

    #[test]
    fn test_init_is_idempotent_and_renders() {
        init_metrics(&MetricsConfig::default()).expect("first init");
        init_metrics(&MetricsConfig::default()).expect("second init is a no-op");

        record_rpc_handled("users.v1.Users", "ListUsers", "NotFound", Duration::from_millis(2));

        let text = render_metrics().expect("metrics initialized");
        assert!(text.contains(RPC_HANDLED_TOTAL));
        assert!(text.contains("code=\"NotFound\""));
    }

    #[test]
    fn test_disabled_metrics_is_noop() {
        let config = MetricsConfig {
            enabled: false,
            ..Default::default()
        };
        assert!(init_metrics(&config).is_ok());
    }
}
