//! Metrics recording for record store operations.

use std::time::Instant;

/// Records operation metrics.
///
/// Two metrics are recorded per operation:
/// 1. `record_store_operations_total` - counter by backend, operation, status
/// 2. `record_store_operation_duration_ms` - latency histogram
///
/// `status` is `"success"` or `"error"`.
pub fn record_operation_metrics(
    backend: &'static str,
    operation: &'static str,
    start: Instant,
    status: &'static str,
) {
    metrics::counter!(
        "record_store_operations_total",
        "backend" => backend,
        "operation" => operation,
        "status" => status
    )
    .increment(1);
    metrics::histogram!(
        "record_store_operation_duration_ms",
        "backend" => backend,
        "operation" => operation,
        "status" => status
    )
    .record(start.elapsed().as_secs_f64() * 1000.0);
}
