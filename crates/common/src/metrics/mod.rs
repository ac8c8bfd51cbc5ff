//! Metrics and observability utilities
//!
//! Prometheus metrics under the `lexdesk_` prefix. The gateway installs the
//! exporter; everything here only records.

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use std::time::Instant;

/// Metrics prefix for all LexDesk metrics
pub const METRICS_PREFIX: &str = "lexdesk";

/// Histogram buckets for request latency (in seconds)
pub const LATENCY_BUCKETS: &[f64] = &[
    0.005,  // 5ms
    0.010,  // 10ms
    0.025,  // 25ms
    0.050,  // 50ms
    0.100,  // 100ms
    0.250,  // 250ms
    0.500,  // 500ms
    1.000,  // 1s
    2.500,  // 2.5s
    5.000,  // 5s
    10.00,  // 10s
];

/// Buckets for extraction latency (documents take seconds)
pub const PROCESSING_BUCKETS: &[f64] = &[
    0.100,  // 100ms
    0.500,  // 500ms
    1.000,  // 1s
    2.500,  // 2.5s
    5.000,  // 5s
    10.00,  // 10s
    30.00,  // 30s
    60.00,  // 1m
    120.0,  // 2m
];

/// Register all metric descriptions
pub fn register_metrics() {
    describe_counter!(
        format!("{}_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total number of HTTP requests"
    );

    describe_histogram!(
        format!("{}_request_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "HTTP request latency in seconds"
    );

    describe_counter!(
        format!("{}_uploads_total", METRICS_PREFIX),
        Unit::Count,
        "Upload initializations by outcome"
    );

    describe_counter!(
        format!("{}_processing_total", METRICS_PREFIX),
        Unit::Count,
        "Processing runs by mode and outcome"
    );

    describe_histogram!(
        format!("{}_processing_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Extraction pipeline latency in seconds"
    );

    describe_counter!(
        format!("{}_questions_total", METRICS_PREFIX),
        Unit::Count,
        "Questions asked by kind and outcome"
    );

    describe_counter!(
        format!("{}_batch_jobs_total", METRICS_PREFIX),
        Unit::Count,
        "Finished batch jobs by final status"
    );

    describe_counter!(
        format!("{}_rate_limited_total", METRICS_PREFIX),
        Unit::Count,
        "Requests rejected by the rate limiter"
    );

    tracing::info!("Metrics registered");
}

/// Helper to record request metrics
pub struct RequestMetrics {
    start: Instant,
    endpoint: String,
    method: String,
}

impl RequestMetrics {
    /// Start tracking a request
    pub fn start(method: &str, endpoint: &str) -> Self {
        Self {
            start: Instant::now(),
            endpoint: endpoint.to_string(),
            method: method.to_string(),
        }
    }

    /// Record request completion
    pub fn finish(self, status: u16) {
        let duration = self.start.elapsed().as_secs_f64();

        counter!(
            format!("{}_requests_total", METRICS_PREFIX),
            "method" => self.method.clone(),
            "endpoint" => self.endpoint.clone(),
            "status" => status.to_string()
        )
        .increment(1);

        histogram!(
            format!("{}_request_duration_seconds", METRICS_PREFIX),
            "method" => self.method,
            "endpoint" => self.endpoint
        )
        .record(duration);
    }
}

fn outcome(success: bool) -> &'static str {
    if success {
        "success"
    } else {
        "error"
    }
}

pub fn record_upload(plan: &str, success: bool) {
    counter!(
        format!("{}_uploads_total", METRICS_PREFIX),
        "plan" => plan.to_string(),
        "outcome" => outcome(success)
    )
    .increment(1);
}

/// Record one pipeline run; `mode` is `initial`, `reanalysis` or `batch`
pub fn record_processing(duration_secs: f64, mode: &str, provider: &str, success: bool) {
    counter!(
        format!("{}_processing_total", METRICS_PREFIX),
        "mode" => mode.to_string(),
        "provider" => provider.to_string(),
        "outcome" => outcome(success)
    )
    .increment(1);

    histogram!(
        format!("{}_processing_duration_seconds", METRICS_PREFIX),
        "mode" => mode.to_string()
    )
    .record(duration_secs);
}

pub fn record_question(follow_up: bool, success: bool) {
    counter!(
        format!("{}_questions_total", METRICS_PREFIX),
        "kind" => if follow_up { "follow_up" } else { "ask" },
        "outcome" => outcome(success)
    )
    .increment(1);
}

pub fn record_batch(status: &str) {
    counter!(
        format!("{}_batch_jobs_total", METRICS_PREFIX),
        "status" => status.to_string()
    )
    .increment(1);
}

pub fn record_rate_limited(scope: &str) {
    counter!(
        format!("{}_rate_limited_total", METRICS_PREFIX),
        "scope" => scope.to_string()
    )
    .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buckets_sorted() {
        for buckets in [LATENCY_BUCKETS, PROCESSING_BUCKETS] {
            assert!(buckets.windows(2).all(|w| w[0] < w[1]));
        }
    }

    #[test]
    fn test_recorders_without_exporter() {
        // no recorder installed: calls are no-ops
        let metrics = RequestMetrics::start("GET", "/documents");
        metrics.finish(200);
        record_processing(0.5, "initial", "mock", true);
        record_question(false, true);
    }
}
