use std::time::{SystemTime, UNIX_EPOCH};

use indexmap::IndexMap;

/// An insertion-ordered map of attribute keys to string values.
///
/// Used both for resource-level attributes and per-point attributes. Insertion order is
/// preserved for callers, but the encoder always sorts tags by key before rendering, so
/// the order attributes are added in never affects the wire format.
pub type Attributes = IndexMap<String, String>;

/// A batch of metrics, grouped by originating resource.
///
/// Batches are owned by the caller and handed to [`CarbonExporter::consume_metrics`] by
/// reference; the exporter never retains them beyond the call that encodes and sends
/// them.
///
/// [`CarbonExporter::consume_metrics`]: crate::CarbonExporter::consume_metrics
#[derive(Clone, Debug, Default)]
pub struct MetricBatch {
    /// Resource groups in the batch, in submission order.
    pub resource_groups: Vec<ResourceGroup>,
}

impl MetricBatch {
    /// Returns the total number of data points across all resource groups.
    pub fn point_count(&self) -> usize {
        self.resource_groups
            .iter()
            .flat_map(|group| group.metrics.iter())
            .map(|metric| metric.points.len())
            .sum()
    }
}

/// A set of metrics sharing one resource, such as the service they originate from.
#[derive(Clone, Debug, Default)]
pub struct ResourceGroup {
    /// Attributes describing the resource the metrics belong to.
    pub resource: Attributes,

    /// Metrics emitted by the resource, in submission order.
    pub metrics: Vec<Metric>,
}

/// The kind of a metric, which determines how its data points carry values.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MetricKind {
    /// An instantaneous measurement.
    Gauge,

    /// A cumulative or delta sum.
    Sum,

    /// A bucketed distribution of values.
    Histogram,

    /// A distribution summarized as quantile values.
    Summary,

    /// A distribution with exponentially-scaled buckets.
    ExponentialHistogram,
}

impl MetricKind {
    /// Returns `true` if data points of this kind carry a single scalar value.
    ///
    /// Only scalar kinds can be rendered in the Carbon plaintext protocol; points of
    /// other kinds are dropped during encoding.
    pub const fn is_scalar(self) -> bool {
        matches!(self, MetricKind::Gauge | MetricKind::Sum)
    }
}

/// A named metric and its data points.
#[derive(Clone, Debug)]
pub struct Metric {
    /// The metric name, emitted verbatim as the leading path component of each line.
    pub name: String,

    /// The kind of the metric.
    pub kind: MetricKind,

    /// Observed data points, in submission order.
    pub points: Vec<DataPoint>,
}

impl Metric {
    /// Creates an empty metric with the given name and kind.
    pub fn new<N>(name: N, kind: MetricKind) -> Self
    where
        N: Into<String>,
    {
        Self { name: name.into(), kind, points: Vec::new() }
    }

    /// Creates an empty gauge metric with the given name.
    pub fn gauge<N>(name: N) -> Self
    where
        N: Into<String>,
    {
        Self::new(name, MetricKind::Gauge)
    }

    /// Creates an empty sum metric with the given name.
    pub fn sum<N>(name: N) -> Self
    where
        N: Into<String>,
    {
        Self::new(name, MetricKind::Sum)
    }
}

/// The value carried by a single data point.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PointValue {
    /// An integer value, rendered in base 10 with no decimal point.
    Integer(i64),

    /// A floating-point value, rendered so that it round-trips losslessly in decimal.
    Float(f64),

    /// No scalar value.
    ///
    /// Data points of non-scalar kinds (histograms, summaries) carry this; they have no
    /// single-line representation and are dropped during encoding.
    Empty,
}

/// One observed sample of a metric at a specific time.
#[derive(Clone, Debug)]
pub struct DataPoint {
    /// Attributes specific to this point. On key collision with resource attributes,
    /// point attributes win.
    pub attributes: Attributes,

    /// Time of the observation, in nanoseconds since the Unix epoch. Exported with
    /// second precision, as the plaintext protocol requires.
    pub timestamp: u64,

    /// The observed value.
    pub value: PointValue,
}

impl DataPoint {
    /// Creates a data point with no attributes.
    pub fn new(timestamp: u64, value: PointValue) -> Self {
        Self { attributes: Attributes::new(), timestamp, value }
    }

    /// Creates a data point with no attributes, timestamped from a wall-clock time.
    ///
    /// Times before the Unix epoch are clamped to zero.
    pub fn at(time: SystemTime, value: PointValue) -> Self {
        let timestamp = time.duration_since(UNIX_EPOCH).map_or(0, |elapsed| {
            u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX)
        });
        Self::new(timestamp, value)
    }

    /// Adds an attribute to the point, replacing any existing value under the same key.
    #[must_use]
    pub fn with_attribute<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.attributes.insert(key.into(), value.into());
        self
    }
}
