//! Prometheus metrics for monitoring the table pool.
//!
//! Metrics are exposed in Prometheus text format when `METRICS_BIND` is set.
//! Without an installed exporter every recording call is a no-op.
//!
//! # Metrics Categories
//!
//! - **HTTP Metrics**: request counts and durations
//! - **Engine Metrics**: joins by result, table transitions by kind
//! - **Sweeper Metrics**: folds, splits and abandoned groups
//!
//! # Example Usage
//!
//! ```rust,no_run
//! use tp_server::metrics;
//! use std::net::SocketAddr;
//!
//! let addr: SocketAddr = "127.0.0.1:9090".parse().unwrap();
//! metrics::init_metrics(addr).unwrap();
//!
//! metrics::joins_total("ok");
//! ```

use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use table_pool::{SweepReport, TableKind, Transition};

/// Initialize Prometheus metrics exporter.
///
/// Metrics will be available at `http://<addr>/metrics`.
pub fn init_metrics(addr: SocketAddr) -> Result<(), String> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {}", e))
}

// ============================================================================
// HTTP Metrics
// ============================================================================

/// Record HTTP request.
pub fn http_requests_total(method: &str, path: &str, status: u16) {
    metrics::counter!("http_requests_total",
        "method" => method.to_string(),
        "path" => path.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record HTTP request duration in milliseconds.
pub fn http_request_duration_ms(method: &str, path: &str, duration_ms: f64) {
    metrics::histogram!("http_request_duration_ms",
        "method" => method.to_string(),
        "path" => path.to_string()
    )
    .record(duration_ms);
}

// ============================================================================
// Engine Metrics
// ============================================================================

/// Count a join attempt by result label (`ok`, `table_full`, ...).
pub fn joins_total(result: &'static str) {
    metrics::counter!("table_joins_total", "result" => result).increment(1);
}

/// Count a finished table.
pub fn transitions_total(kind: TableKind, transition: &Transition) {
    let label = match transition {
        Transition::Open => return,
        Transition::Split(_) => "split",
        Transition::Settled(_) => "settled",
    };
    metrics::counter!("table_transitions_total",
        "kind" => kind.as_str(),
        "transition" => label
    )
    .increment(1);
}

/// Count a created table.
pub fn tables_created_total(kind: TableKind) {
    metrics::counter!("tables_created_total", "kind" => kind.as_str()).increment(1);
}

// ============================================================================
// Sweeper Metrics
// ============================================================================

/// Record the outcome of one sweep.
pub fn sweep_report(report: &SweepReport) {
    metrics::counter!("sweeper_runs_total").increment(1);
    metrics::counter!("sweeper_folds_total").increment(report.folds as u64);
    metrics::counter!("sweeper_splits_total").increment(report.splits as u64);
    metrics::counter!("sweeper_failed_groups_total").increment(report.failed_groups as u64);
    metrics::gauge!("sweeper_stale_tables").set(report.stale_tables as f64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_exporter_is_a_no_op() {
        http_requests_total("GET", "/health", 200);
        http_request_duration_ms("GET", "/health", 1.5);
        joins_total("ok");
        transitions_total(TableKind::Linear, &Transition::Open);
        tables_created_total(TableKind::Random);
        sweep_report(&SweepReport::default());
    }
}
