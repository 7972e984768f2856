//! Gateway counters
//!
//! Recorded through the `metrics` facade; an embedder installs whatever
//! recorder it likes. Without one these calls are no-ops.
//!
//! - `gateway_requests_total` (counter): label `outcome`
//! - `gateway_refresh_total` (counter): label `result`
//! - `gateway_queued_requests_total` (counter)

/// Record a finished gateway call.
pub fn record_request(outcome: &'static str) {
    metrics::counter!("gateway_requests_total", "outcome" => outcome).increment(1);
}

/// Record a completed refresh call.
pub fn record_refresh(result: &'static str) {
    metrics::counter!("gateway_refresh_total", "result" => result).increment(1);
}

/// Record a request parked behind an in-flight refresh.
pub fn record_queued() {
    metrics::counter!("gateway_queued_requests_total").increment(1);
}
