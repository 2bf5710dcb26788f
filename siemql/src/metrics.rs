//! Query observability metrics
//!
//! Emitted through the `metrics` facade; installing an exporter is left to
//! the embedding application.

use std::time::Duration;

/// Record a completed storage round trip
pub fn record_query_duration(kind: &'static str, duration: Duration) {
    ::metrics::histogram!("siemql_query_duration_seconds", "kind" => kind)
        .record(duration.as_secs_f64());
}

/// Record rows (decoded groups or raw events) handed to the caller
pub fn record_rows(kind: &'static str, rows: usize) {
    ::metrics::counter!("siemql_rows_total", "kind" => kind).increment(rows as u64);
}

/// Record a partial or failed response detected by the validator
pub fn record_partial_result(reason: &'static str) {
    ::metrics::counter!("siemql_partial_results_total", "reason" => reason).increment(1);
}

/// Record a backend failure surfaced to the caller
pub fn record_backend_error(kind: &'static str) {
    ::metrics::counter!("siemql_backend_errors_total", "kind" => kind).increment(1);
}
