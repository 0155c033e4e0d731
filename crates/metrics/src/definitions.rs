//! Metric name and label definitions.
//!
//! This module defines all metric names and label keys the timetable service
//! exposes, plus [`declare_standard_metrics`] which registers them in a fixed
//! order. Keeping the declarations in one place keeps the exposition stable.

use crate::{
    error::Result,
    registry::{Metric, MetricsRegistry},
};

/// HTTP request metrics
pub mod http {
    /// Duration of HTTP requests in seconds
    pub const REQUEST_DURATION_SECONDS: &str = "http_request_duration_seconds";
    /// Total number of HTTP requests
    pub const REQUESTS_TOTAL: &str = "http_requests_total";
    /// HTTP request size in bytes
    pub const REQUEST_SIZE_BYTES: &str = "http_request_size_bytes";
    /// HTTP response size in bytes
    pub const RESPONSE_SIZE_BYTES: &str = "http_response_size_bytes";
}

/// Database metrics
pub mod db {
    pub const QUERY_DURATION_SECONDS: &str = "db_query_duration_seconds";
    pub const QUERIES_TOTAL: &str = "db_queries_total";
    pub const CONNECTIONS_ACTIVE: &str = "db_connections_active";
}

/// Cache metrics
pub mod cache {
    pub const HITS_TOTAL: &str = "cache_hits_total";
    pub const MISSES_TOTAL: &str = "cache_misses_total";
    pub const SIZE_BYTES: &str = "cache_size_bytes";
}

/// Business event metrics
pub mod business {
    pub const TIMELINES_CREATED_TOTAL: &str = "timelines_created_total";
    pub const TIMELINES_UPDATED_TOTAL: &str = "timelines_updated_total";
    pub const TIMELINES_DELETED_TOTAL: &str = "timelines_deleted_total";
    pub const CLASSES_CREATED_TOTAL: &str = "classes_created_total";
    pub const EVENTS_SCHEDULED_TOTAL: &str = "events_scheduled_total";
}

/// Error metrics
pub mod errors {
    pub const APPLICATION_ERRORS_TOTAL: &str = "application_errors_total";
    pub const VALIDATION_ERRORS_TOTAL: &str = "validation_errors_total";
}

/// Label keys used across metrics
pub mod labels {
    pub const METHOD: &str = "method";
    pub const ROUTE: &str = "route";
    pub const STATUS_CODE: &str = "status_code";
    pub const OPERATION: &str = "operation";
    pub const TABLE: &str = "table";
    pub const STATUS: &str = "status";
    pub const CACHE_NAME: &str = "cache_name";
    pub const TYPE: &str = "type";
    pub const ERROR_TYPE: &str = "error_type";
    pub const SEVERITY: &str = "severity";
    pub const FIELD: &str = "field";
    pub const RULE: &str = "rule";
}

/// Histogram buckets
pub mod buckets {
    /// Durations in seconds, 1ms to 5s
    pub const DURATION_SECONDS: [f64; 8] = [0.001, 0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0];

    /// Payload sizes in bytes, 100B to 100kB
    pub const SIZE_BYTES: [f64; 7] = [
        100.0, 500.0, 1_000.0, 5_000.0, 10_000.0, 50_000.0, 100_000.0,
    ];
}

/// Register every metric the service exposes, in exposition order.
///
/// # Errors
///
/// Fails with `DuplicateName` if any of these names is already registered.
pub fn declare_standard_metrics(registry: &mut MetricsRegistry) -> Result<()> {
    use self::labels::*;

    let declarations = [
        Metric::histogram(
            http::REQUEST_DURATION_SECONDS,
            "Duration of HTTP requests in seconds",
            &[METHOD, ROUTE, STATUS_CODE],
            &buckets::DURATION_SECONDS,
        )?,
        Metric::counter(
            http::REQUESTS_TOTAL,
            "Total number of HTTP requests",
            &[METHOD, ROUTE, STATUS_CODE],
        )?,
        Metric::histogram(
            http::REQUEST_SIZE_BYTES,
            "HTTP request size in bytes",
            &[METHOD, ROUTE],
            &buckets::SIZE_BYTES,
        )?,
        Metric::histogram(
            http::RESPONSE_SIZE_BYTES,
            "HTTP response size in bytes",
            &[METHOD, ROUTE, STATUS_CODE],
            &buckets::SIZE_BYTES,
        )?,
        Metric::histogram(
            db::QUERY_DURATION_SECONDS,
            "Database query duration in seconds",
            &[OPERATION, TABLE],
            &buckets::DURATION_SECONDS,
        )?,
        Metric::counter(db::QUERIES_TOTAL, "Total database queries", &[
            OPERATION, TABLE, STATUS,
        ])?,
        Metric::gauge(
            db::CONNECTIONS_ACTIVE,
            "Number of active database connections",
            &[],
        )?,
        Metric::counter(cache::HITS_TOTAL, "Total cache hits", &[CACHE_NAME])?,
        Metric::counter(cache::MISSES_TOTAL, "Total cache misses", &[CACHE_NAME])?,
        Metric::gauge(cache::SIZE_BYTES, "Cache size in bytes", &[CACHE_NAME])?,
        Metric::counter(
            business::TIMELINES_CREATED_TOTAL,
            "Total timelines created",
            &[STATUS],
        )?,
        Metric::counter(
            business::TIMELINES_UPDATED_TOTAL,
            "Total timelines updated",
            &[],
        )?,
        Metric::counter(
            business::TIMELINES_DELETED_TOTAL,
            "Total timelines deleted",
            &[],
        )?,
        Metric::counter(
            business::CLASSES_CREATED_TOTAL,
            "Total classes created",
            &[],
        )?,
        Metric::counter(
            business::EVENTS_SCHEDULED_TOTAL,
            "Total events scheduled",
            &[TYPE],
        )?,
        Metric::counter(
            errors::APPLICATION_ERRORS_TOTAL,
            "Total application errors",
            &[ERROR_TYPE, SEVERITY],
        )?,
        Metric::counter(
            errors::VALIDATION_ERRORS_TOTAL,
            "Total validation errors",
            &[FIELD, RULE],
        )?,
    ];

    for metric in declarations {
        registry.register(metric)?;
    }
    Ok(())
}
