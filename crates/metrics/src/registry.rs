//! The metric registry.
//!
//! A registry is populated once at startup through `&mut self` and then shared
//! behind an `Arc`, so no metric can be declared once traffic is flowing. The
//! name index sits next to the `prometheus::Registry` so lookups are typed and
//! exposition keeps declaration order.

use std::{collections::HashMap, fmt};

use prometheus::{Registry, core::Collector, proto::MetricFamily};

use crate::{
    error::{Error, Result},
    exposition,
    instruments::{Counter, Descriptor, Gauge, Histogram},
};

/// Type of metric
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricType {
    Counter,
    Gauge,
    Histogram,
}

impl MetricType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Counter => "counter",
            Self::Gauge => "gauge",
            Self::Histogram => "histogram",
        }
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A registered instrument of any kind.
#[derive(Clone)]
pub enum Metric {
    Counter(Counter),
    Gauge(Gauge),
    Histogram(Histogram),
}

impl Metric {
    /// # Errors
    ///
    /// `InvalidArgument` when the name, help text or label names are rejected.
    pub fn counter(name: &str, help: &str, label_names: &[&str]) -> Result<Self> {
        Counter::new(Descriptor::new(name, help, label_names)).map(Self::Counter)
    }

    pub fn gauge(name: &str, help: &str, label_names: &[&str]) -> Result<Self> {
        Gauge::new(Descriptor::new(name, help, label_names)).map(Self::Gauge)
    }

    /// # Errors
    ///
    /// Fails when the bucket bounds are invalid (see [`Histogram::new`]).
    pub fn histogram(name: &str, help: &str, label_names: &[&str], buckets: &[f64]) -> Result<Self> {
        Histogram::new(Descriptor::new(name, help, label_names), buckets).map(Self::Histogram)
    }

    pub fn descriptor(&self) -> &Descriptor {
        match self {
            Self::Counter(c) => c.descriptor(),
            Self::Gauge(g) => g.descriptor(),
            Self::Histogram(h) => h.descriptor(),
        }
    }

    pub fn name(&self) -> &str {
        self.descriptor().name()
    }

    pub fn metric_type(&self) -> MetricType {
        match self {
            Self::Counter(_) => MetricType::Counter,
            Self::Gauge(_) => MetricType::Gauge,
            Self::Histogram(_) => MetricType::Histogram,
        }
    }

    fn collector(&self) -> Box<dyn Collector> {
        match self {
            Self::Counter(c) => c.collector(),
            Self::Gauge(g) => g.collector(),
            Self::Histogram(h) => h.collector(),
        }
    }
}

/// Uniquely named metrics in declaration order, backed by an owned
/// `prometheus` registry.
#[derive(Default)]
pub struct MetricsRegistry {
    inner: Registry,
    metrics: Vec<Metric>,
    index: HashMap<String, usize>,
}

impl MetricsRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a metric.
    ///
    /// # Errors
    ///
    /// `DuplicateName` if a metric with the same name is already registered.
    pub fn register(&mut self, metric: Metric) -> Result<()> {
        let name = metric.name().to_string();
        if self.index.contains_key(&name) {
            return Err(Error::DuplicateName { name });
        }
        self.inner
            .register(metric.collector())
            .map_err(|e| Error::from_prometheus(&name, e))?;
        self.index.insert(name, self.metrics.len());
        self.metrics.push(metric);
        Ok(())
    }

    /// Look up a metric by name.
    ///
    /// # Errors
    ///
    /// `NotFound` if no metric has that name.
    pub fn get(&self, name: &str) -> Result<&Metric> {
        self.index
            .get(name)
            .and_then(|&idx| self.metrics.get(idx))
            .ok_or_else(|| Error::NotFound {
                name: name.to_string(),
            })
    }

    pub fn counter(&self, name: &str) -> Result<&Counter> {
        match self.get(name)? {
            Metric::Counter(c) => Ok(c),
            other => Err(kind_mismatch(name, MetricType::Counter, other)),
        }
    }

    pub fn gauge(&self, name: &str) -> Result<&Gauge> {
        match self.get(name)? {
            Metric::Gauge(g) => Ok(g),
            other => Err(kind_mismatch(name, MetricType::Gauge, other)),
        }
    }

    pub fn histogram(&self, name: &str) -> Result<&Histogram> {
        match self.get(name)? {
            Metric::Histogram(h) => Ok(h),
            other => Err(kind_mismatch(name, MetricType::Histogram, other)),
        }
    }

    /// Metrics in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &Metric> {
        self.metrics.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    /// Gather every family with at least one series, in declaration order.
    pub(crate) fn gather(&self) -> Vec<MetricFamily> {
        let mut families = self.inner.gather();
        families.sort_by_key(|family| self.index.get(family.get_name()).copied());
        families
    }

    /// Render every metric in the text exposition format.
    #[must_use]
    pub fn render_all(&self) -> String {
        exposition::render(self)
    }
}

fn kind_mismatch(name: &str, expected: MetricType, actual: &Metric) -> Error {
    Error::KindMismatch {
        name: name.to_string(),
        expected,
        actual: actual.metric_type(),
    }
}
