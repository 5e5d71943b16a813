//! Prometheus metrics registry and instruments.
//!
//! This module is framework-agnostic and can be used from any layer.

use lazy_static::lazy_static;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry};

lazy_static! {
    /// Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // Login Metrics
    pub static ref LOGINS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("usos_login_logins_total", "Total number of completed login attempts"),
        &["outcome"]
    ).expect("metric can be created");
    pub static ref USERS_CREATED_TOTAL: IntCounter = IntCounter::new(
        "usos_login_users_created_total",
        "Total number of users created on first login"
    ).expect("metric can be created");
    pub static ref USER_FIELD_UPDATES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("usos_login_user_field_updates_total", "Total number of user fields updated from USOS"),
        &["field"]
    ).expect("metric can be created");

    // Provider Metrics
    pub static ref PROVIDER_REQUESTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("usos_login_provider_requests_total", "Total number of requests sent to USOS"),
        &["endpoint", "status"]
    ).expect("metric can be created");
    pub static ref PROVIDER_REQUEST_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "usos_login_provider_request_duration_seconds",
            "USOS request duration in seconds"
        ).buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
        &["endpoint"]
    ).expect("metric can be created");

    // Database Metrics
    pub static ref DB_QUERIES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("usos_login_db_queries_total", "Total number of database queries"),
        &["operation", "table"]
    ).expect("metric can be created");
    pub static ref DB_QUERY_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "usos_login_db_query_duration_seconds",
            "Database query duration in seconds"
        ).buckets(vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0]),
        &["operation", "table"]
    ).expect("metric can be created");

    // Error Metrics
    pub static ref ERRORS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("usos_login_errors_total", "Total number of errors"),
        &["error_type"]
    ).expect("metric can be created");
}

/// Initialize metrics registry.
pub fn init_metrics() {
    REGISTRY
        .register(Box::new(LOGINS_TOTAL.clone()))
        .expect("LOGINS_TOTAL can be registered");
    REGISTRY
        .register(Box::new(USERS_CREATED_TOTAL.clone()))
        .expect("USERS_CREATED_TOTAL can be registered");
    REGISTRY
        .register(Box::new(USER_FIELD_UPDATES_TOTAL.clone()))
        .expect("USER_FIELD_UPDATES_TOTAL can be registered");
    REGISTRY
        .register(Box::new(PROVIDER_REQUESTS_TOTAL.clone()))
        .expect("PROVIDER_REQUESTS_TOTAL can be registered");
    REGISTRY
        .register(Box::new(PROVIDER_REQUEST_DURATION_SECONDS.clone()))
        .expect("PROVIDER_REQUEST_DURATION_SECONDS can be registered");
    REGISTRY
        .register(Box::new(DB_QUERIES_TOTAL.clone()))
        .expect("DB_QUERIES_TOTAL can be registered");
    REGISTRY
        .register(Box::new(DB_QUERY_DURATION_SECONDS.clone()))
        .expect("DB_QUERY_DURATION_SECONDS can be registered");
    REGISTRY
        .register(Box::new(ERRORS_TOTAL.clone()))
        .expect("ERRORS_TOTAL can be registered");

    tracing::info!("Metrics registry initialized");
}

/// Router exposing `GET /metrics` in the Prometheus text format
pub fn metrics_router<S>() -> axum::Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    axum::Router::new().route("/metrics", axum::routing::get(render_metrics))
}

async fn render_metrics() -> axum::response::Response {
    use axum::http::{StatusCode, header::CONTENT_TYPE};
    use axum::response::IntoResponse;
    use prometheus::Encoder as _;

    let encoder = prometheus::TextEncoder::new();
    match encoder.encode_to_string(&REGISTRY.gather()) {
        Ok(body) => (StatusCode::OK, [(CONTENT_TYPE, encoder.format_type())], body).into_response(),
        Err(error) => {
            tracing::error!(%error, "Failed to encode metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
