use axum::{http::StatusCode, response::IntoResponse, routing::get, Router};
use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Encoder, Gauge, HistogramOpts, HistogramVec, Opts, Registry,
    TextEncoder,
};
use std::time::Duration;

/// Metric name prefix for all pushboard metrics
const PREFIX: &str = "pushboard";

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // Store access
    pub static ref DB_QUERY_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_db_query_duration_seconds"),
            "Store query attempt duration in seconds"
        )
        .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0]),
        &["profile", "outcome"]
    ).expect("Failed to create db_query_duration_seconds metric");

    pub static ref CIRCUIT_BREAKER_STATUS: Gauge = Gauge::new(
        format!("{PREFIX}_circuit_breaker_status"),
        "Circuit breaker status (0 = closed, 1 = half-open, 2 = open)"
    ).expect("Failed to create circuit_breaker_status metric");

    pub static ref CIRCUIT_BREAKER_REJECTIONS_TOTAL: Counter = Counter::new(
        format!("{PREFIX}_circuit_breaker_rejections_total"),
        "Store calls rejected by the open circuit breaker"
    ).expect("Failed to create circuit_breaker_rejections_total metric");

    // Push delivery
    pub static ref PUSH_SENDS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_push_sends_total"), "Push send attempts by outcome"),
        &["outcome"]
    ).expect("Failed to create push_sends_total metric");

    pub static ref PUSH_SUBSCRIPTIONS_PRUNED_TOTAL: Counter = Counter::new(
        format!("{PREFIX}_push_subscriptions_pruned_total"),
        "Subscriptions removed after a permanent delivery failure"
    ).expect("Failed to create push_subscriptions_pruned_total metric");

    pub static ref PUSH_SUBSCRIPTIONS: Gauge = Gauge::new(
        format!("{PREFIX}_push_subscriptions"),
        "Subscriptions currently held in the cache"
    ).expect("Failed to create push_subscriptions metric");

    pub static ref DISPATCH_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_dispatch_duration_seconds"),
            "Duration of a full fan-out in seconds"
        )
        .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0]),
        &["target"]
    ).expect("Failed to create dispatch_duration_seconds metric");
}

/// Register all metrics with the Prometheus registry
pub fn init_metrics() {
    // Ignore errors if already registered (for tests)
    let _ = REGISTRY.register(Box::new(DB_QUERY_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(CIRCUIT_BREAKER_STATUS.clone()));
    let _ = REGISTRY.register(Box::new(CIRCUIT_BREAKER_REJECTIONS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(PUSH_SENDS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(PUSH_SUBSCRIPTIONS_PRUNED_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(PUSH_SUBSCRIPTIONS.clone()));
    let _ = REGISTRY.register(Box::new(DISPATCH_DURATION_SECONDS.clone()));

    tracing::info!("Metrics system initialized successfully");
}

pub fn record_db_query(profile: &str, outcome: &str, duration: Duration) {
    DB_QUERY_DURATION_SECONDS
        .with_label_values(&[profile, outcome])
        .observe(duration.as_secs_f64());
}

pub fn set_circuit_breaker_status(value: f64) {
    CIRCUIT_BREAKER_STATUS.set(value);
}

pub fn record_circuit_rejection() {
    CIRCUIT_BREAKER_REJECTIONS_TOTAL.inc();
}

pub fn record_push_send(outcome: &str) {
    PUSH_SENDS_TOTAL.with_label_values(&[outcome]).inc();
}

pub fn record_subscription_pruned() {
    PUSH_SUBSCRIPTIONS_PRUNED_TOTAL.inc();
}

pub fn set_subscription_count(count: usize) {
    PUSH_SUBSCRIPTIONS.set(count as f64);
}

pub fn record_dispatch(target: &str, duration: Duration) {
    DISPATCH_DURATION_SECONDS
        .with_label_values(&[target])
        .observe(duration.as_secs_f64());
}

/// Handler for the /metrics endpoint
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = vec![];
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => {
            let response = String::from_utf8(buffer).unwrap_or_default();
            (StatusCode::OK, response)
        }
        Err(e) => {
            tracing::error!("Failed to encode metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to encode metrics: {}", e),
            )
        }
    }
}

pub fn metrics_router() -> Router {
    Router::new().route("/metrics", get(metrics_handler))
}
