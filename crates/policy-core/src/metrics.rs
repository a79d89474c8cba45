//! Prometheus collectors for the resolver/proxy metrics named in SPEC_FULL §6.
//!
//! Pattern (lazy_static + register_*_vec! + a `/` text-exposition handler)
//! copied from the host project's `api-server::middleware::metrics`.

use lazy_static::lazy_static;
use prometheus::{
    register_gauge, register_histogram_vec, register_int_counter, register_int_counter_vec, Encoder,
    Gauge, HistogramVec, IntCounter, IntCounterVec, TextEncoder,
};

lazy_static! {
    pub static ref DNS_QUERIES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "resolver_dns_queries_total",
        "Total DNS queries served, by result and protocol",
        &["result", "protocol"]
    )
    .unwrap();
    pub static ref DNS_RATE_LIMITED_TOTAL: IntCounter = register_int_counter!(
        "resolver_dns_rate_limited_total",
        "Total DNS queries rejected by the rate limiter"
    )
    .unwrap();
    pub static ref PREMIUM_SESSIONS: Gauge =
        register_gauge!("resolver_premium_sessions", "Currently active premium unlock sessions").unwrap();
    pub static ref UPSTREAM_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "resolver_upstream_duration_seconds",
        "Upstream DNS exchange latency in seconds, by protocol",
        &["protocol"]
    )
    .unwrap();

    // Ambient HTTP-surface metrics, following the host project's own
    // middleware::metrics pattern, applied to DoH / control-RPC / metrics server.
    pub static ref HTTP_REQUEST_DURATION: HistogramVec = register_histogram_vec!(
        "http_request_duration_seconds",
        "HTTP request latencies in seconds",
        &["method", "endpoint", "status"]
    )
    .unwrap();
    pub static ref HTTP_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "http_requests_total",
        "Total HTTP requests",
        &["method", "endpoint", "status"]
    )
    .unwrap();
}

pub fn record_dns_query(result: &str, protocol: &str) {
    DNS_QUERIES_TOTAL.with_label_values(&[result, protocol]).inc();
}

pub fn record_rate_limited() {
    DNS_RATE_LIMITED_TOTAL.inc();
}

pub fn set_premium_sessions(count: f64) {
    PREMIUM_SESSIONS.set(count);
}

pub fn observe_upstream_duration(protocol: &str, seconds: f64) {
    UPSTREAM_DURATION_SECONDS.with_label_values(&[protocol]).observe(seconds);
}

/// Records one ambient HTTP request, applied to the DoH, control-RPC, and
/// metrics-server handlers (see the host project's own `metrics_middleware`).
pub fn observe_http_request(method: &str, endpoint: &str, status: &str, seconds: f64) {
    HTTP_REQUEST_DURATION.with_label_values(&[method, endpoint, status]).observe(seconds);
    HTTP_REQUESTS_TOTAL.with_label_values(&[method, endpoint, status]).inc();
}

/// Renders the current registry in Prometheus text exposition format.
pub fn encode_text() -> String {
    let encoder = TextEncoder::new();
    let families = prometheus::gather();
    let mut buffer = Vec::new();
    if encoder.encode(&families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_increment() {
        record_dns_query("allowed", "udp");
        record_rate_limited();
        set_premium_sessions(3.0);
        observe_upstream_duration("udp", 0.01);

        let text = encode_text();
        assert!(text.contains("resolver_dns_queries_total"));
        assert!(text.contains("resolver_premium_sessions 3"));
    }
}
