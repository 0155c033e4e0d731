//! Metrics initialization and the recording facade used by the service.

use std::sync::Arc;

use tracing::{info, warn};

use crate::{
    definitions::{business, cache, db, declare_standard_metrics, errors, http, labels},
    error::Result,
    registry::MetricsRegistry,
    timing::TimedOperation,
};

/// Configuration for the metrics system.
#[derive(Debug, Clone)]
pub struct MetricsRecorderConfig {
    /// Whether metrics collection is enabled
    pub enabled: bool,
}

impl Default for MetricsRecorderConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Handle to the metrics system, shared by the middleware, the store and
/// the exposition endpoint.
#[derive(Clone)]
pub struct MetricsHandle {
    registry: Arc<MetricsRegistry>,
    enabled: bool,
}

/// Initialize the metrics system.
///
/// This should be called once at application startup, before the server
/// accepts traffic. When disabled, the registry stays empty and every
/// recording call is a no-op.
///
/// # Errors
///
/// Returns an error if two standard metrics share a name.
pub fn init_metrics(config: MetricsRecorderConfig) -> Result<MetricsHandle> {
    let mut registry = MetricsRegistry::new();
    if config.enabled {
        declare_standard_metrics(&mut registry)?;
        info!(metrics = registry.len(), "metrics registry initialized");
    } else {
        info!("Metrics collection is disabled");
    }
    Ok(MetricsHandle {
        registry: Arc::new(registry),
        enabled: config.enabled,
    })
}

impl MetricsHandle {
    /// Wrap an already populated registry.
    #[must_use]
    pub fn from_registry(registry: MetricsRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
            enabled: true,
        }
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    #[must_use]
    pub fn registry(&self) -> &MetricsRegistry {
        &self.registry
    }

    /// Render metrics in the text exposition format.
    #[must_use]
    pub fn render(&self) -> String {
        self.registry.render_all()
    }

    /// Timer for one query of `operation` against `table`.
    pub fn time_query(&self, operation: &str, table: &str) -> TimedOperation {
        if self.enabled {
            TimedOperation::new(Arc::clone(&self.registry), operation, table)
        } else {
            TimedOperation::disabled()
        }
    }

    #[must_use]
    pub fn events(&self) -> EventRecorder {
        EventRecorder {
            handle: self.clone(),
        }
    }

    /// Record one completed HTTP exchange.
    pub fn record_http(&self, exchange: &HttpExchange<'_>) {
        if !self.enabled {
            return;
        }
        let status = exchange.status.to_string();
        let with_status = [
            (labels::METHOD, exchange.method),
            (labels::ROUTE, exchange.route),
            (labels::STATUS_CODE, status.as_str()),
        ];
        let without_status = [
            (labels::METHOD, exchange.method),
            (labels::ROUTE, exchange.route),
        ];

        let r = &self.registry;
        let mut results = vec![
            r.histogram(http::REQUEST_DURATION_SECONDS)
                .and_then(|h| h.observe(&with_status, exchange.duration_seconds)),
            r.counter(http::REQUESTS_TOTAL)
                .and_then(|c| c.inc(&with_status)),
            r.histogram(http::REQUEST_SIZE_BYTES)
                .and_then(|h| h.observe(&without_status, exchange.request_bytes as f64)),
        ];
        if let Some(bytes) = exchange.response_bytes {
            results.push(
                r.histogram(http::RESPONSE_SIZE_BYTES)
                    .and_then(|h| h.observe(&with_status, bytes as f64)),
            );
        }
        for err in results.into_iter().filter_map(|r| r.err()) {
            warn!(route = exchange.route, error = %err, "failed to record http metrics");
        }
    }

    fn inc(&self, name: &str, label_pairs: &[(&str, &str)]) {
        if !self.enabled {
            return;
        }
        if let Err(e) = self.registry.counter(name).and_then(|c| c.inc(label_pairs)) {
            warn!(metric = name, error = %e, "failed to record metric");
        }
    }

    fn set(&self, name: &str, label_pairs: &[(&str, &str)], value: f64) {
        if !self.enabled {
            return;
        }
        if let Err(e) = self
            .registry
            .gauge(name)
            .and_then(|g| g.set(label_pairs, value))
        {
            warn!(metric = name, error = %e, "failed to record metric");
        }
    }
}

/// Everything the middleware knows about a finished request.
#[derive(Debug, Clone)]
pub struct HttpExchange<'a> {
    pub method: &'a str,
    pub route: &'a str,
    pub status: u16,
    pub duration_seconds: f64,
    pub request_bytes: u64,
    /// Serialized size of a JSON response body, `None` for other bodies.
    pub response_bytes: Option<u64>,
}

/// Severity label of `application_errors_total`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Severity {
    Warning,
    #[default]
    Error,
    Critical,
}

impl Severity {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
        }
    }
}

/// Domain events counted by the business metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusinessEvent<'a> {
    TimelineCreated { status: &'a str },
    TimelineUpdated,
    TimelineDeleted,
    ClassCreated,
    EventScheduled { kind: &'a str },
}

/// Recording facade for business, error, cache and pool events.
///
/// Every method is fail-open: a metric that cannot be updated is logged and
/// skipped, never reported to the caller.
#[derive(Clone)]
pub struct EventRecorder {
    handle: MetricsHandle,
}

impl EventRecorder {
    pub fn record_business(&self, event: BusinessEvent<'_>) {
        let h = &self.handle;
        match event {
            BusinessEvent::TimelineCreated { status } => {
                h.inc(business::TIMELINES_CREATED_TOTAL, &[(labels::STATUS, status)]);
            },
            BusinessEvent::TimelineUpdated => h.inc(business::TIMELINES_UPDATED_TOTAL, &[]),
            BusinessEvent::TimelineDeleted => h.inc(business::TIMELINES_DELETED_TOTAL, &[]),
            BusinessEvent::ClassCreated => h.inc(business::CLASSES_CREATED_TOTAL, &[]),
            BusinessEvent::EventScheduled { kind } => {
                h.inc(business::EVENTS_SCHEDULED_TOTAL, &[(labels::TYPE, kind)]);
            },
        }
    }

    /// Count an application error with the default `error` severity.
    pub fn record_error(&self, error_type: &str) {
        self.record_error_with_severity(error_type, Severity::default());
    }

    pub fn record_error_with_severity(&self, error_type: &str, severity: Severity) {
        self.handle.inc(errors::APPLICATION_ERRORS_TOTAL, &[
            (labels::ERROR_TYPE, error_type),
            (labels::SEVERITY, severity.as_str()),
        ]);
    }

    pub fn record_validation_error(&self, field: &str, rule: &str) {
        self.handle.inc(errors::VALIDATION_ERRORS_TOTAL, &[
            (labels::FIELD, field),
            (labels::RULE, rule),
        ]);
    }

    pub fn track_cache_access(&self, cache_name: &str, hit: bool) {
        let name = if hit {
            cache::HITS_TOTAL
        } else {
            cache::MISSES_TOTAL
        };
        self.handle.inc(name, &[(labels::CACHE_NAME, cache_name)]);
    }

    pub fn set_cache_size(&self, cache_name: &str, bytes: u64) {
        self.handle.set(
            cache::SIZE_BYTES,
            &[(labels::CACHE_NAME, cache_name)],
            bytes as f64,
        );
    }

    pub fn set_active_connections(&self, active: u32) {
        self.handle
            .set(db::CONNECTIONS_ACTIVE, &[], f64::from(active));
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn handle() -> MetricsHandle {
        init_metrics(MetricsRecorderConfig::default()).unwrap()
    }

    fn counter(handle: &MetricsHandle, name: &str, label_pairs: &[(&str, &str)]) -> f64 {
        handle
            .registry()
            .counter(name)
            .unwrap()
            .value(label_pairs)
            .unwrap()
    }

    #[test]
    fn test_init_disabled() {
        let config = MetricsRecorderConfig { enabled: false };
        let handle = init_metrics(config).unwrap();
        assert!(handle.registry().is_empty());
        assert_eq!(handle.render(), "");

        // Recording against a disabled handle is silently ignored.
        handle.events().record_error("database");
        handle.record_http(&HttpExchange {
            method: "GET",
            route: "/",
            status: 200,
            duration_seconds: 0.1,
            request_bytes: 0,
            response_bytes: None,
        });
    }

    #[test]
    fn business_events_hit_their_counters() {
        let handle = handle();
        let events = handle.events();
        events.record_business(BusinessEvent::TimelineCreated { status: "success" });
        events.record_business(BusinessEvent::TimelineCreated { status: "success" });
        events.record_business(BusinessEvent::TimelineUpdated);
        events.record_business(BusinessEvent::TimelineDeleted);
        events.record_business(BusinessEvent::ClassCreated);
        events.record_business(BusinessEvent::EventScheduled { kind: "lesson" });

        assert_eq!(
            counter(&handle, business::TIMELINES_CREATED_TOTAL, &[("status", "success")]),
            2.0
        );
        assert_eq!(counter(&handle, business::TIMELINES_UPDATED_TOTAL, &[]), 1.0);
        assert_eq!(counter(&handle, business::TIMELINES_DELETED_TOTAL, &[]), 1.0);
        assert_eq!(counter(&handle, business::CLASSES_CREATED_TOTAL, &[]), 1.0);
        assert_eq!(
            counter(&handle, business::EVENTS_SCHEDULED_TOTAL, &[("type", "lesson")]),
            1.0
        );
    }

    #[test]
    fn error_severity_defaults_to_error() {
        let handle = handle();
        let events = handle.events();
        events.record_error("InvalidSchedule");
        events.record_error_with_severity("InvalidSchedule", Severity::Warning);

        let value = |severity| {
            counter(&handle, errors::APPLICATION_ERRORS_TOTAL, &[
                ("error_type", "InvalidSchedule"),
                ("severity", severity),
            ])
        };
        assert_eq!(value("error"), 1.0);
        assert_eq!(value("warning"), 1.0);
        assert_eq!(value("critical"), 0.0);
    }

    #[test]
    fn validation_and_cache_events() {
        let handle = handle();
        let events = handle.events();
        events.record_validation_error("class_name", "required");
        for hit in [true, true, true, false, false] {
            events.track_cache_access("schedule_cache", hit);
        }
        events.set_cache_size("schedule_cache", 2048);
        events.set_active_connections(3);

        assert_eq!(
            counter(&handle, errors::VALIDATION_ERRORS_TOTAL, &[
                ("field", "class_name"),
                ("rule", "required")
            ]),
            1.0
        );
        let text = handle.render();
        assert!(text.contains("cache_hits_total{cache_name=\"schedule_cache\"} 3\n"));
        assert!(text.contains("cache_misses_total{cache_name=\"schedule_cache\"} 2\n"));
        assert!(text.contains("cache_size_bytes{cache_name=\"schedule_cache\"} 2048\n"));
        assert!(text.contains("db_connections_active 3\n"));
    }

    #[test]
    fn http_exchange_records_all_series() {
        let handle = handle();
        handle.record_http(&HttpExchange {
            method: "POST",
            route: "/api/timetable",
            status: 201,
            duration_seconds: 0.03,
            request_bytes: 120,
            response_bytes: Some(180),
        });
        handle.record_http(&HttpExchange {
            method: "DELETE",
            route: "/api/timetable/{id}",
            status: 204,
            duration_seconds: 0.01,
            request_bytes: 0,
            response_bytes: None,
        });

        let r = handle.registry();
        assert_eq!(
            counter(&handle, http::REQUESTS_TOTAL, &[
                ("method", "POST"),
                ("route", "/api/timetable"),
                ("status_code", "201"),
            ]),
            1.0
        );
        let response = r.histogram(http::RESPONSE_SIZE_BYTES).unwrap();
        let posted = response
            .snapshot(&[
                ("method", "POST"),
                ("route", "/api/timetable"),
                ("status_code", "201"),
            ])
            .unwrap()
            .unwrap();
        assert_eq!(posted.bucket(100.0), Some(0));
        assert_eq!(posted.bucket(500.0), Some(1));
        assert!(
            response
                .snapshot(&[
                    ("method", "DELETE"),
                    ("route", "/api/timetable/{id}"),
                    ("status_code", "204"),
                ])
                .unwrap()
                .is_none()
        );
        let request = r
            .histogram(http::REQUEST_SIZE_BYTES)
            .unwrap()
            .snapshot(&[("method", "DELETE"), ("route", "/api/timetable/{id}")])
            .unwrap()
            .unwrap();
        assert_eq!(request.count, 1);
    }
}
