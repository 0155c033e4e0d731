//! Counter, gauge and histogram instruments.
//!
//! Each instrument wraps a `prometheus` metric vector, one series per label
//! combination. Call sites pass label pairs by key; [`Descriptor::resolve`]
//! checks them against the declared label names and orders them for the
//! vector, so a mistyped key is an error instead of a new series.

use prometheus::{
    CounterVec, GaugeVec, HistogramOpts, HistogramVec, Opts,
    core::{Collector, MetricVec, MetricVecBuilder},
    proto,
};

use crate::error::{Error, Result};

/// Label key/value pairs supplied at an update site.
pub type Labels<'a> = [(&'a str, &'a str)];

/// Name, help text and declared label names shared by every instrument kind.
#[derive(Debug, Clone)]
pub struct Descriptor {
    name: String,
    help: String,
    label_names: Vec<String>,
}

impl Descriptor {
    pub fn new(name: impl Into<String>, help: impl Into<String>, label_names: &[&str]) -> Self {
        Self {
            name: name.into(),
            help: help.into(),
            label_names: label_names.iter().map(|l| (*l).to_string()).collect(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn help(&self) -> &str {
        &self.help
    }

    pub fn label_names(&self) -> &[String] {
        &self.label_names
    }

    fn opts(&self) -> Opts {
        Opts::new(self.name.as_str(), self.help.as_str())
    }

    fn label_refs(&self) -> Vec<&str> {
        self.label_names.iter().map(String::as_str).collect()
    }

    /// Resolve supplied labels into values ordered like `label_names`.
    ///
    /// Keys may be omitted (rendered as an empty string); unknown or repeated
    /// keys are rejected.
    pub fn resolve<'a>(&self, labels: &Labels<'a>) -> Result<Vec<&'a str>> {
        let mut values: Vec<Option<&'a str>> = vec![None; self.label_names.len()];
        for (key, value) in labels {
            let slot = self
                .label_names
                .iter()
                .position(|declared| declared == key)
                .and_then(|idx| values.get_mut(idx))
                .filter(|slot| slot.is_none())
                .ok_or_else(|| Error::LabelMismatch {
                    name: self.name.clone(),
                    label: (*key).to_string(),
                    declared: self.label_names.clone(),
                })?;
            *slot = Some(*value);
        }
        Ok(values.into_iter().map(|v| v.unwrap_or_default()).collect())
    }
}

/// Series of `vec` matching `values`, without creating it.
fn find_series<T: MetricVecBuilder>(
    vec: &MetricVec<T>,
    descriptor: &Descriptor,
    values: &[&str],
) -> Option<proto::Metric> {
    let matches = |metric: &proto::Metric| {
        descriptor
            .label_names
            .iter()
            .zip(values)
            .all(|(name, value)| {
                metric
                    .get_label()
                    .iter()
                    .any(|pair| pair.get_name() == name && pair.get_value() == *value)
            })
    };
    vec.collect()
        .iter()
        .flat_map(|family| family.get_metric())
        .find(|metric| matches(*metric))
        .cloned()
}

/// Unlabeled instruments get their single series up front so they render as
/// 0 before the first update.
fn touch_unlabeled<T: MetricVecBuilder>(vec: &MetricVec<T>, descriptor: &Descriptor) -> Result<()> {
    if descriptor.label_names.is_empty() {
        vec.get_metric_with_label_values(&[])
            .map_err(|e| Error::from_prometheus(&descriptor.name, e))?;
    }
    Ok(())
}

// ── Counter ─────────────────────────────────────────────────────────────────

/// Monotonically non-decreasing accumulated value per label combination.
#[derive(Clone)]
pub struct Counter {
    descriptor: Descriptor,
    vec: CounterVec,
}

impl Counter {
    /// # Errors
    ///
    /// `InvalidArgument` when the name, help text or label names are rejected.
    pub fn new(descriptor: Descriptor) -> Result<Self> {
        let vec = CounterVec::new(descriptor.opts(), &descriptor.label_refs())
            .map_err(|e| Error::from_prometheus(&descriptor.name, e))?;
        touch_unlabeled(&vec, &descriptor)?;
        Ok(Self { descriptor, vec })
    }

    pub fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    /// Add `amount` to the series selected by `labels`.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for a negative or NaN amount, `LabelMismatch` for an
    /// undeclared label key. The counter is left unchanged in both cases.
    pub fn increment(&self, labels: &Labels<'_>, amount: f64) -> Result<()> {
        if amount.is_nan() || amount < 0.0 {
            return Err(Error::invalid_argument(
                &self.descriptor.name,
                format!("counter increment must be >= 0, got {amount}"),
            ));
        }
        let values = self.descriptor.resolve(labels)?;
        self.vec
            .get_metric_with_label_values(&values)
            .map_err(|e| Error::from_prometheus(&self.descriptor.name, e))?
            .inc_by(amount);
        Ok(())
    }

    pub fn inc(&self, labels: &Labels<'_>) -> Result<()> {
        self.increment(labels, 1.0)
    }

    /// Current value, 0 when the combination was never incremented.
    pub fn value(&self, labels: &Labels<'_>) -> Result<f64> {
        let values = self.descriptor.resolve(labels)?;
        Ok(find_series(&self.vec, &self.descriptor, &values)
            .map_or(0.0, |m| m.get_counter().get_value()))
    }

    pub(crate) fn collector(&self) -> Box<dyn Collector> {
        Box::new(self.vec.clone())
    }
}

// ── Gauge ───────────────────────────────────────────────────────────────────

/// Point-in-time value per label combination, set absolutely.
#[derive(Clone)]
pub struct Gauge {
    descriptor: Descriptor,
    vec: GaugeVec,
}

impl Gauge {
    pub fn new(descriptor: Descriptor) -> Result<Self> {
        let vec = GaugeVec::new(descriptor.opts(), &descriptor.label_refs())
            .map_err(|e| Error::from_prometheus(&descriptor.name, e))?;
        touch_unlabeled(&vec, &descriptor)?;
        Ok(Self { descriptor, vec })
    }

    pub fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    pub fn set(&self, labels: &Labels<'_>, value: f64) -> Result<()> {
        let values = self.descriptor.resolve(labels)?;
        self.vec
            .get_metric_with_label_values(&values)
            .map_err(|e| Error::from_prometheus(&self.descriptor.name, e))?
            .set(value);
        Ok(())
    }

    pub fn value(&self, labels: &Labels<'_>) -> Result<f64> {
        let values = self.descriptor.resolve(labels)?;
        Ok(find_series(&self.vec, &self.descriptor, &values)
            .map_or(0.0, |m| m.get_gauge().get_value()))
    }

    pub(crate) fn collector(&self) -> Box<dyn Collector> {
        Box::new(self.vec.clone())
    }
}

// ── Histogram ───────────────────────────────────────────────────────────────

/// Consistent copy of one histogram series.
#[derive(Debug, Clone, PartialEq)]
pub struct HistogramSnapshot {
    /// `(upper bound, cumulative count)` in ascending bound order.
    pub buckets: Vec<(f64, u64)>,
    pub sum: f64,
    /// Equal to the implicit `+Inf` bucket.
    pub count: u64,
}

impl HistogramSnapshot {
    fn from_proto(histogram: &proto::Histogram) -> Self {
        Self {
            buckets: histogram
                .get_bucket()
                .iter()
                .map(|b| (b.get_upper_bound(), b.get_cumulative_count()))
                .collect(),
            sum: histogram.get_sample_sum(),
            count: histogram.get_sample_count(),
        }
    }

    /// Cumulative count of the bucket with exactly this upper bound.
    #[must_use]
    pub fn bucket(&self, bound: f64) -> Option<u64> {
        self.buckets
            .iter()
            .find(|(le, _)| *le == bound)
            .map(|(_, count)| *count)
    }
}

/// Distribution of observed values over fixed buckets.
#[derive(Clone)]
pub struct Histogram {
    descriptor: Descriptor,
    bounds: Vec<f64>,
    vec: HistogramVec,
}

impl Histogram {
    /// # Errors
    ///
    /// `InvalidArgument` when `bounds` is empty, not strictly ascending or
    /// contains a non-finite value, or when a label is named `le`.
    pub fn new(descriptor: Descriptor, bounds: &[f64]) -> Result<Self> {
        if bounds.is_empty() {
            return Err(Error::invalid_argument(
                &descriptor.name,
                "histogram needs at least one bucket",
            ));
        }
        if bounds.iter().any(|b| !b.is_finite()) || bounds.windows(2).any(|w| w[0] >= w[1]) {
            return Err(Error::invalid_argument(
                &descriptor.name,
                "histogram buckets must be finite and strictly ascending",
            ));
        }
        if descriptor.label_names.iter().any(|l| l == "le") {
            return Err(Error::invalid_argument(
                &descriptor.name,
                "`le` is reserved for histogram buckets",
            ));
        }
        let opts = HistogramOpts::from(descriptor.opts()).buckets(bounds.to_vec());
        let vec = HistogramVec::new(opts, &descriptor.label_refs())
            .map_err(|e| Error::from_prometheus(&descriptor.name, e))?;
        touch_unlabeled(&vec, &descriptor)?;
        Ok(Self {
            descriptor,
            bounds: bounds.to_vec(),
            vec,
        })
    }

    pub fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    pub fn bounds(&self) -> &[f64] {
        &self.bounds
    }

    /// Record one observation.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for a negative or NaN value, `LabelMismatch` for an
    /// undeclared label key.
    pub fn observe(&self, labels: &Labels<'_>, value: f64) -> Result<()> {
        if value.is_nan() || value < 0.0 {
            return Err(Error::invalid_argument(
                &self.descriptor.name,
                format!("observed value must be >= 0, got {value}"),
            ));
        }
        let values = self.descriptor.resolve(labels)?;
        self.vec
            .get_metric_with_label_values(&values)
            .map_err(|e| Error::from_prometheus(&self.descriptor.name, e))?
            .observe(value);
        Ok(())
    }

    /// Snapshot of one series, `None` when the combination has no series yet.
    pub fn snapshot(&self, labels: &Labels<'_>) -> Result<Option<HistogramSnapshot>> {
        let values = self.descriptor.resolve(labels)?;
        Ok(find_series(&self.vec, &self.descriptor, &values)
            .map(|m| HistogramSnapshot::from_proto(m.get_histogram())))
    }

    pub(crate) fn collector(&self) -> Box<dyn Collector> {
        Box::new(self.vec.clone())
    }
}
