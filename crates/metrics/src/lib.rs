//! Metrics collection and export for the timetable service.
//!
//! This crate owns an explicit [`MetricsRegistry`] of counters, gauges and
//! histograms, populated once at startup and shared through a
//! [`MetricsHandle`]. Instruments are `prometheus` vectors registered in a
//! private `prometheus::Registry`. Nothing here is global: the handle is
//! passed to the HTTP middleware, the database layer and the `/metrics`
//! endpoint.
//!
//! # Usage
//!
//! ```rust,ignore
//! use timetable_metrics::{BusinessEvent, MetricsRecorderConfig, init_metrics};
//!
//! let metrics = init_metrics(MetricsRecorderConfig::default())?;
//!
//! // Time a query; the query's own error is returned untouched.
//! let rows = metrics
//!     .time_query("SELECT", "timetable")
//!     .run(|| fetch_rows(&pool))
//!     .await?;
//!
//! metrics
//!     .events()
//!     .record_business(BusinessEvent::TimelineCreated { status: "success" });
//!
//! let body = metrics.render();
//! ```

mod definitions;
mod error;
mod exposition;
mod instruments;
mod recorder;
mod registry;
mod timing;

pub use {
    definitions::*,
    error::{Error, Result},
    exposition::CONTENT_TYPE,
    instruments::{Counter, Descriptor, Gauge, Histogram, HistogramSnapshot, Labels},
    recorder::{
        BusinessEvent, EventRecorder, HttpExchange, MetricsHandle, MetricsRecorderConfig,
        Severity, init_metrics,
    },
    registry::{Metric, MetricType, MetricsRegistry},
    timing::{QueryOutcome, TimedOperation},
};
