// Copyright (c) Walrus Foundation
// SPDX-License-Identifier: Apache-2.0

//! Run-wide metrics shared by all virtual users.
//!
//! Metrics are identified by a [`MetricKey`], a name with an optional `{tag:value}` sub-series,
//! and come in three kinds: [`Counter`]s, [`Rate`]s of boolean observations, and [`Trend`]s of
//! numeric samples. All of them are mirrored into a Prometheus registry under the
//! [`NAMESPACE`] prefix so that a run can be scraped while it is in progress.

use std::{
    collections::{BTreeMap, HashMap},
    fmt::{self, Display},
    str::FromStr,
    sync::{Arc, Mutex, PoisonError, RwLock},
    time::Duration,
};

use prometheus::{
    Histogram,
    HistogramOpts,
    HistogramVec,
    IntCounter,
    IntCounterVec,
    Opts,
    Registry,
};
use serde::{Serialize, Serializer};

/// Prefix of every exported Prometheus metric.
pub const NAMESPACE: &str = "warehouse_load";

const TAG_LABEL: &str = "tag";
const OUTCOME_LABEL: &str = "outcome";
/// Trend samples are stored in the histogram with this many units per recorded unit.
const TREND_SCALE: f64 = 1_000.0;
const TREND_SIGNIFICANT_DIGITS: u8 = 3;

/// Errors returned when declaring or naming metrics.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    /// The metric was already declared with a different kind.
    #[error("metric {name} is a {declared}, not a {requested}")]
    KindMismatch {
        /// The metric name.
        name: String,
        /// The kind it was first declared with.
        declared: MetricKind,
        /// The kind requested now.
        requested: MetricKind,
    },
    /// A metric key could not be parsed.
    #[error("invalid metric key: {0}")]
    InvalidKey(String),
    /// The Prometheus registry refused the metric.
    #[error(transparent)]
    Prometheus(#[from] prometheus::Error),
    /// The sample histogram of a trend could not be created.
    #[error(transparent)]
    Histogram(#[from] hdrhistogram::CreationError),
}

/// The kind of a metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    /// A monotonic integer.
    Counter,
    /// The share of true observations.
    Rate,
    /// A distribution of numeric samples.
    Trend,
}

impl Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricKind::Counter => f.write_str("counter"),
            MetricKind::Rate => f.write_str("rate"),
            MetricKind::Trend => f.write_str("trend"),
        }
    }
}

/// Identifies a metric series: a name and an optional `{key:value}` tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MetricKey {
    name: String,
    tag: Option<(String, String)>,
}

impl MetricKey {
    /// An untagged series.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tag: None,
        }
    }

    /// The `{key:value}` sub-series of `name`.
    pub fn tagged(
        name: impl Into<String>,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            tag: Some((key.into(), value.into())),
        }
    }

    /// The metric name without the tag.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The tag, if any.
    pub fn tag(&self) -> Option<(&str, &str)> {
        self.tag
            .as_ref()
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }

    /// The same metric with the given tag.
    pub fn with_tag(&self, key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::tagged(self.name.clone(), key, value)
    }

    fn tag_label(&self) -> String {
        self.tag
            .as_ref()
            .map(|(key, value)| format!("{key}:{value}"))
            .unwrap_or_default()
    }
}

impl From<&str> for MetricKey {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl Display for MetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.tag {
            Some((key, value)) => write!(f, "{}{{{key}:{value}}}", self.name),
            None => f.write_str(&self.name),
        }
    }
}

impl FromStr for MetricKey {
    type Err = MetricsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || MetricsError::InvalidKey(s.to_owned());
        let s = s.trim();
        let (name, tag) = match s.split_once('{') {
            Some((name, rest)) => {
                let inner = rest.strip_suffix('}').ok_or_else(invalid)?;
                let (key, value) = inner.split_once(':').ok_or_else(invalid)?;
                let (key, value) = (key.trim(), value.trim());
                if key.is_empty() || value.is_empty() {
                    return Err(invalid());
                }
                (name, Some((key.to_owned(), value.to_owned())))
            }
            None => (s, None),
        };
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(invalid());
        }
        Ok(Self {
            name: name.to_owned(),
            tag,
        })
    }
}

impl Serialize for MetricKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// A monotonic counter.
#[derive(Debug, Clone)]
pub struct Counter {
    inner: IntCounter,
}

impl Counter {
    /// Adds `value`.
    pub fn add(&self, value: u64) {
        self.inner.inc_by(value);
    }

    /// Adds one.
    pub fn inc(&self) {
        self.inner.inc();
    }

    /// The current value.
    pub fn get(&self) -> u64 {
        self.inner.get()
    }
}

/// The share of true observations.
#[derive(Debug, Clone)]
pub struct Rate {
    passes: IntCounter,
    fails: IntCounter,
}

impl Rate {
    /// Records one observation.
    pub fn add(&self, value: bool) {
        if value {
            self.passes.inc();
        } else {
            self.fails.inc();
        }
    }
}

#[derive(Debug)]
struct TrendState {
    histogram: hdrhistogram::Histogram<u64>,
    count: u64,
    sum: f64,
    min: f64,
    max: f64,
}

impl TrendState {
    fn new() -> Result<Self, hdrhistogram::CreationError> {
        Ok(Self {
            histogram: hdrhistogram::Histogram::new(TREND_SIGNIFICANT_DIGITS)?,
            count: 0,
            sum: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        })
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn record(&mut self, value: f64) {
        self.histogram
            .saturating_record((value.max(0.0) * TREND_SCALE).round() as u64);
        self.count += 1;
        self.sum += value;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }
}

/// A distribution of numeric samples. Durations are recorded in milliseconds.
#[derive(Debug, Clone)]
pub struct Trend {
    state: Arc<Mutex<TrendState>>,
    exported: Histogram,
}

impl Trend {
    /// Records one sample; non-finite samples are ignored.
    pub fn add(&self, value: f64) {
        if !value.is_finite() {
            tracing::debug!(value, "ignoring non-finite trend sample");
            return;
        }
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .record(value);
        self.exported.observe(value);
    }

    /// Records a duration in milliseconds.
    pub fn add_duration(&self, duration: Duration) {
        self.add(duration.as_secs_f64() * 1_000.0);
    }

    fn summary(&self) -> TrendSummary {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        TrendSummary::from_state(&state)
    }
}

#[derive(Debug, Clone)]
enum MetricEntry {
    Counter(Counter),
    Rate(Rate),
    Trend(Trend),
}

impl MetricEntry {
    fn kind(&self) -> MetricKind {
        match self {
            MetricEntry::Counter(_) => MetricKind::Counter,
            MetricEntry::Rate(_) => MetricKind::Rate,
            MetricEntry::Trend(_) => MetricKind::Trend,
        }
    }

    fn summary(&self) -> MetricSummary {
        match self {
            MetricEntry::Counter(counter) => MetricSummary::Counter {
                count: counter.get(),
            },
            MetricEntry::Rate(rate) => {
                let passes = rate.passes.get();
                let fails = rate.fails.get();
                MetricSummary::Rate {
                    passes,
                    fails,
                    rate: ratio(passes, passes + fails),
                }
            }
            MetricEntry::Trend(trend) => MetricSummary::Trend(trend.summary()),
        }
    }
}

#[allow(clippy::cast_precision_loss)]
fn ratio(numerator: u64, denominator: u64) -> Option<f64> {
    (denominator > 0).then(|| numerator as f64 / denominator as f64)
}

#[derive(Debug, Clone)]
enum Family {
    Counter(IntCounterVec),
    Rate(IntCounterVec),
    Trend(HistogramVec),
}

impl Family {
    fn kind(&self) -> MetricKind {
        match self {
            Family::Counter(_) => MetricKind::Counter,
            Family::Rate(_) => MetricKind::Rate,
            Family::Trend(_) => MetricKind::Trend,
        }
    }

    fn register(name: &str, kind: MetricKind, registry: &Registry) -> Result<Self, MetricsError> {
        let help = format!("{kind} {name}");
        let family = match kind {
            MetricKind::Counter => Family::Counter(IntCounterVec::new(
                Opts::new(name, help).namespace(NAMESPACE),
                &[TAG_LABEL],
            )?),
            MetricKind::Rate => Family::Rate(IntCounterVec::new(
                Opts::new(name, help).namespace(NAMESPACE),
                &[TAG_LABEL, OUTCOME_LABEL],
            )?),
            MetricKind::Trend => Family::Trend(HistogramVec::new(
                HistogramOpts::new(name, help)
                    .namespace(NAMESPACE)
                    .buckets(warehouse_load_utils::metrics::default_buckets()),
                &[TAG_LABEL],
            )?),
        };
        match &family {
            Family::Counter(vec) | Family::Rate(vec) => registry.register(Box::new(vec.clone()))?,
            Family::Trend(vec) => registry.register(Box::new(vec.clone()))?,
        }
        Ok(family)
    }

    fn entry(&self, key: &MetricKey) -> Result<MetricEntry, MetricsError> {
        let label = key.tag_label();
        Ok(match self {
            Family::Counter(vec) => MetricEntry::Counter(Counter {
                inner: vec.get_metric_with_label_values(&[&label])?,
            }),
            Family::Rate(vec) => MetricEntry::Rate(Rate {
                passes: vec.get_metric_with_label_values(&[&label, "pass"])?,
                fails: vec.get_metric_with_label_values(&[&label, "fail"])?,
            }),
            Family::Trend(vec) => MetricEntry::Trend(Trend {
                state: Arc::new(Mutex::new(TrendState::new()?)),
                exported: vec.get_metric_with_label_values(&[&label])?,
            }),
        })
    }
}

#[derive(Debug, Default)]
struct SinkState {
    metrics: HashMap<MetricKey, MetricEntry>,
    families: HashMap<String, Family>,
}

/// The thread-safe store of all metrics of a run.
#[derive(Debug, Default)]
pub struct MetricsSink {
    state: RwLock<SinkState>,
    registry: Registry,
}

impl MetricsSink {
    /// Creates an empty sink with its own Prometheus registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The registry the metrics are mirrored into.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Returns the counter for `key`, declaring it on first use.
    pub fn counter(&self, key: impl Into<MetricKey>) -> Result<Counter, MetricsError> {
        match self.get_or_declare(key.into(), MetricKind::Counter)? {
            MetricEntry::Counter(counter) => Ok(counter),
            _ => unreachable!("get_or_declare checks the kind"),
        }
    }

    /// Returns the rate for `key`, declaring it on first use.
    pub fn rate(&self, key: impl Into<MetricKey>) -> Result<Rate, MetricsError> {
        match self.get_or_declare(key.into(), MetricKind::Rate)? {
            MetricEntry::Rate(rate) => Ok(rate),
            _ => unreachable!("get_or_declare checks the kind"),
        }
    }

    /// Returns the trend for `key`, declaring it on first use.
    pub fn trend(&self, key: impl Into<MetricKey>) -> Result<Trend, MetricsError> {
        match self.get_or_declare(key.into(), MetricKind::Trend)? {
            MetricEntry::Trend(trend) => Ok(trend),
            _ => unreachable!("get_or_declare checks the kind"),
        }
    }

    /// Records one observation in the rate for `key`, logging if the metric cannot be declared.
    pub fn record_rate(&self, key: impl Into<MetricKey>, value: bool) {
        let key = key.into();
        match self.rate(key.clone()) {
            Ok(rate) => rate.add(value),
            Err(error) => tracing::warn!(%key, ?error, "failed to record rate observation"),
        }
    }

    /// Records one sample in the trend for `key`, logging if the metric cannot be declared.
    pub fn record_trend(&self, key: impl Into<MetricKey>, value: f64) {
        let key = key.into();
        match self.trend(key.clone()) {
            Ok(trend) => trend.add(value),
            Err(error) => tracing::warn!(%key, ?error, "failed to record trend sample"),
        }
    }

    /// Adds `value` to the counter for `key`, logging if the metric cannot be declared.
    pub fn record_count(&self, key: impl Into<MetricKey>, value: u64) {
        let key = key.into();
        match self.counter(key.clone()) {
            Ok(counter) => counter.add(value),
            Err(error) => tracing::warn!(%key, ?error, "failed to record counter increment"),
        }
    }

    fn get_or_declare(&self, key: MetricKey, kind: MetricKind) -> Result<MetricEntry, MetricsError> {
        {
            let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(entry) = state.metrics.get(&key) {
                return Self::checked(&key, entry, kind);
            }
        }

        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(entry) = state.metrics.get(&key) {
            return Self::checked(&key, entry, kind);
        }

        let family = match state.families.get(key.name()) {
            Some(family) => family.clone(),
            None => {
                let family = Family::register(key.name(), kind, &self.registry)?;
                state
                    .families
                    .insert(key.name().to_owned(), family.clone());
                family
            }
        };
        if family.kind() != kind {
            return Err(MetricsError::KindMismatch {
                name: key.name().to_owned(),
                declared: family.kind(),
                requested: kind,
            });
        }

        let entry = family.entry(&key)?;
        tracing::trace!(%key, %kind, "declared metric");
        state.metrics.insert(key, entry.clone());
        Ok(entry)
    }

    fn checked(
        key: &MetricKey,
        entry: &MetricEntry,
        kind: MetricKind,
    ) -> Result<MetricEntry, MetricsError> {
        if entry.kind() == kind {
            Ok(entry.clone())
        } else {
            Err(MetricsError::KindMismatch {
                name: key.name().to_owned(),
                declared: entry.kind(),
                requested: kind,
            })
        }
    }

    /// Reads the current value of every declared metric.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        MetricsSnapshot {
            metrics: state
                .metrics
                .iter()
                .map(|(key, entry)| (key.clone(), entry.summary()))
                .collect(),
        }
    }
}

/// Summary statistics of a [`Trend`].
#[derive(Debug, Clone, Serialize)]
pub struct TrendSummary {
    /// Number of samples.
    pub count: u64,
    /// Mean of the samples.
    pub avg: Option<f64>,
    /// Smallest sample.
    pub min: Option<f64>,
    /// Median.
    pub med: Option<f64>,
    /// Largest sample.
    pub max: Option<f64>,
    /// 90th percentile.
    pub p90: Option<f64>,
    /// 95th percentile.
    pub p95: Option<f64>,
    /// 99th percentile.
    pub p99: Option<f64>,
    #[serde(skip)]
    histogram: Option<hdrhistogram::Histogram<u64>>,
}

impl TrendSummary {
    fn from_state(state: &TrendState) -> Self {
        let mut summary = Self {
            count: state.count,
            avg: None,
            min: None,
            med: None,
            max: None,
            p90: None,
            p95: None,
            p99: None,
            histogram: None,
        };
        if state.count == 0 {
            return summary;
        }
        summary.histogram = Some(state.histogram.clone());
        #[allow(clippy::cast_precision_loss)]
        let avg = state.sum / state.count as f64;
        summary.avg = Some(avg);
        summary.min = Some(state.min);
        summary.max = Some(state.max);
        summary.med = summary.percentile(50.0);
        summary.p90 = summary.percentile(90.0);
        summary.p95 = summary.percentile(95.0);
        summary.p99 = summary.percentile(99.0);
        summary
    }

    /// The `percentile`th percentile, or `None` without samples.
    #[allow(clippy::cast_precision_loss)]
    pub fn percentile(&self, percentile: f64) -> Option<f64> {
        let histogram = self.histogram.as_ref()?;
        let quantile = (percentile / 100.0).clamp(0.0, 1.0);
        Some(histogram.value_at_quantile(quantile) as f64 / TREND_SCALE)
    }
}

/// The value of one metric at the end of a run.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MetricSummary {
    /// A counter value.
    Counter {
        /// The value.
        count: u64,
    },
    /// A rate of boolean observations.
    Rate {
        /// True observations.
        passes: u64,
        /// False observations.
        fails: u64,
        /// `passes / (passes + fails)`, or `None` without observations.
        rate: Option<f64>,
    },
    /// A distribution of samples.
    Trend(TrendSummary),
}

impl MetricSummary {
    /// Whether the metric received any sample.
    pub fn has_data(&self) -> bool {
        match self {
            MetricSummary::Counter { count } => *count > 0,
            MetricSummary::Rate { passes, fails, .. } => passes + fails > 0,
            MetricSummary::Trend(trend) => trend.count > 0,
        }
    }

    /// The kind of the summarized metric.
    pub fn kind(&self) -> MetricKind {
        match self {
            MetricSummary::Counter { .. } => MetricKind::Counter,
            MetricSummary::Rate { .. } => MetricKind::Rate,
            MetricSummary::Trend(_) => MetricKind::Trend,
        }
    }
}

/// All metric values at one point in time.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(transparent)]
pub struct MetricsSnapshot {
    metrics: BTreeMap<MetricKey, MetricSummary>,
}

impl MetricsSnapshot {
    /// The summary of `key`, if the metric was declared.
    pub fn get(&self, key: &MetricKey) -> Option<&MetricSummary> {
        self.metrics.get(key)
    }

    /// All metrics, ordered by key.
    pub fn iter(&self) -> impl Iterator<Item = (&MetricKey, &MetricSummary)> {
        self.metrics.iter()
    }

    /// The rate of the untagged metric `name`.
    pub fn rate(&self, name: &str) -> Option<f64> {
        match self.get(&MetricKey::new(name))? {
            MetricSummary::Rate { rate, .. } => *rate,
            _ => None,
        }
    }

    /// The observation counts `(passes, fails)` of the untagged rate `name`.
    pub fn rate_counts(&self, name: &str) -> Option<(u64, u64)> {
        match self.get(&MetricKey::new(name))? {
            MetricSummary::Rate { passes, fails, .. } => Some((*passes, *fails)),
            _ => None,
        }
    }

    /// The value of the untagged counter `name`.
    pub fn counter(&self, name: &str) -> Option<u64> {
        match self.get(&MetricKey::new(name))? {
            MetricSummary::Counter { count } => Some(*count),
            _ => None,
        }
    }

    /// The summary of the trend `key`.
    pub fn trend(&self, key: &MetricKey) -> Option<&TrendSummary> {
        match self.get(key)? {
            MetricSummary::Trend(trend) => Some(trend),
            _ => None,
        }
    }
}
