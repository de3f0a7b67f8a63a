// Copyright (c) Walrus Foundation
// SPDX-License-Identifier: Apache-2.0

//! Pass/fail criteria evaluated against the final metrics.
//!
//! A threshold pairs a metric key, optionally with a `{tag:value}` sub-series, with an
//! expression `<aggregation><operator><value>` such as `p(95)<2000`, `rate<0.05` or
//! `count>50`.

use std::{
    collections::BTreeMap,
    fmt::{self, Display},
    str::FromStr,
};

use serde::{Serialize, Serializer};

use crate::metrics::{MetricKey, MetricKind, MetricSummary, MetricsSnapshot};

/// A static threshold table: metric key and its expressions.
pub type ThresholdTable = &'static [(&'static str, &'static [&'static str])];

/// Errors returned when parsing thresholds.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ThresholdParseError {
    /// The metric key is malformed.
    #[error("invalid metric key {0:?}")]
    InvalidMetric(String),
    /// The expression has no comparison operator.
    #[error("expression {0:?} has no comparison operator")]
    MissingOperator(String),
    /// The aggregation is not one of `p(N)`, `avg`, `min`, `max`, `med`, `rate`, `count`.
    #[error("unknown aggregation {0:?}")]
    UnknownAggregation(String),
    /// The threshold value is not a number.
    #[error("invalid threshold value {0:?}")]
    InvalidValue(String),
}

/// How a metric is reduced to one number.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Aggregation {
    /// A percentile of a trend, between 0 and 100.
    Percentile(f64),
    /// Mean of a trend.
    Avg,
    /// Minimum of a trend.
    Min,
    /// Maximum of a trend.
    Max,
    /// Median of a trend.
    Med,
    /// Share of true observations of a rate.
    Rate,
    /// Value of a counter.
    Count,
}

impl Aggregation {
    fn applies_to(&self, kind: MetricKind) -> bool {
        match self {
            Aggregation::Percentile(_)
            | Aggregation::Avg
            | Aggregation::Min
            | Aggregation::Max
            | Aggregation::Med => kind == MetricKind::Trend,
            Aggregation::Rate => kind == MetricKind::Rate,
            Aggregation::Count => kind == MetricKind::Counter,
        }
    }

    fn observe(&self, summary: &MetricSummary) -> Option<f64> {
        match (self, summary) {
            (Aggregation::Percentile(percentile), MetricSummary::Trend(trend)) => {
                trend.percentile(*percentile)
            }
            (Aggregation::Avg, MetricSummary::Trend(trend)) => trend.avg,
            (Aggregation::Min, MetricSummary::Trend(trend)) => trend.min,
            (Aggregation::Max, MetricSummary::Trend(trend)) => trend.max,
            (Aggregation::Med, MetricSummary::Trend(trend)) => trend.med,
            (Aggregation::Rate, MetricSummary::Rate { rate, .. }) => *rate,
            #[allow(clippy::cast_precision_loss)]
            (Aggregation::Count, MetricSummary::Counter { count }) => Some(*count as f64),
            _ => None,
        }
    }
}

impl Display for Aggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Aggregation::Percentile(percentile) => write!(f, "p({percentile})"),
            Aggregation::Avg => f.write_str("avg"),
            Aggregation::Min => f.write_str("min"),
            Aggregation::Max => f.write_str("max"),
            Aggregation::Med => f.write_str("med"),
            Aggregation::Rate => f.write_str("rate"),
            Aggregation::Count => f.write_str("count"),
        }
    }
}

impl FromStr for Aggregation {
    type Err = ThresholdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let unknown = || ThresholdParseError::UnknownAggregation(s.to_owned());
        match s {
            "avg" => Ok(Self::Avg),
            "min" => Ok(Self::Min),
            "max" => Ok(Self::Max),
            "med" => Ok(Self::Med),
            "rate" => Ok(Self::Rate),
            "count" => Ok(Self::Count),
            _ => {
                let percentile: f64 = s
                    .strip_prefix("p(")
                    .and_then(|rest| rest.strip_suffix(')'))
                    .and_then(|value| value.trim().parse().ok())
                    .ok_or_else(unknown)?;
                if !(0.0..=100.0).contains(&percentile) {
                    return Err(unknown());
                }
                Ok(Self::Percentile(percentile))
            }
        }
    }
}

/// A comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    /// `<`
    Less,
    /// `<=`
    LessOrEqual,
    /// `>`
    Greater,
    /// `>=`
    GreaterOrEqual,
    /// `==`
    Equal,
    /// `!=`
    NotEqual,
}

impl Comparison {
    // Two-character operators come first so that `<=` is not read as `<`.
    const TOKENS: [(&'static str, Comparison); 6] = [
        ("<=", Comparison::LessOrEqual),
        (">=", Comparison::GreaterOrEqual),
        ("==", Comparison::Equal),
        ("!=", Comparison::NotEqual),
        ("<", Comparison::Less),
        (">", Comparison::Greater),
    ];

    fn holds(&self, observed: f64, bound: f64) -> bool {
        match self {
            Comparison::Less => observed < bound,
            Comparison::LessOrEqual => observed <= bound,
            Comparison::Greater => observed > bound,
            Comparison::GreaterOrEqual => observed >= bound,
            Comparison::Equal => (observed - bound).abs() < f64::EPSILON,
            Comparison::NotEqual => (observed - bound).abs() >= f64::EPSILON,
        }
    }

    fn token(&self) -> &'static str {
        Self::TOKENS
            .iter()
            .find(|(_, comparison)| comparison == self)
            .map(|(token, _)| *token)
            .unwrap_or("?")
    }
}

/// `<aggregation><operator><value>`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThresholdExpr {
    /// The reduction applied to the metric.
    pub aggregation: Aggregation,
    /// The comparison.
    pub comparison: Comparison,
    /// The bound compared against.
    pub value: f64,
}

impl ThresholdExpr {
    /// Whether `observed` satisfies the expression.
    pub fn holds(&self, observed: f64) -> bool {
        self.comparison.holds(observed, self.value)
    }
}

impl Display for ThresholdExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{}",
            self.aggregation,
            self.comparison.token(),
            self.value
        )
    }
}

impl FromStr for ThresholdExpr {
    type Err = ThresholdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (position, token, comparison) = Comparison::TOKENS
            .iter()
            .filter_map(|(token, comparison)| {
                s.find(token).map(|position| (position, *token, *comparison))
            })
            .min_by_key(|(position, token, _)| (*position, std::cmp::Reverse(token.len())))
            .ok_or_else(|| ThresholdParseError::MissingOperator(s.to_owned()))?;

        let aggregation = s[..position].trim().parse()?;
        let raw_value = s[position + token.len()..].trim();
        let value: f64 = raw_value
            .parse()
            .ok()
            .filter(|value: &f64| value.is_finite())
            .ok_or_else(|| ThresholdParseError::InvalidValue(raw_value.to_owned()))?;
        Ok(Self {
            aggregation,
            comparison,
            value,
        })
    }
}

impl Serialize for ThresholdExpr {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// A criterion on one metric series.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Threshold {
    /// The metric series.
    pub metric: MetricKey,
    /// The criterion.
    pub expr: ThresholdExpr,
}

impl Threshold {
    /// Parses a metric key and an expression.
    pub fn parse(metric: &str, expr: &str) -> Result<Self, ThresholdParseError> {
        Ok(Self {
            metric: metric
                .parse()
                .map_err(|_| ThresholdParseError::InvalidMetric(metric.to_owned()))?,
            expr: expr.parse()?,
        })
    }
}

impl Display for Threshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.metric, self.expr)
    }
}

/// Parses a static threshold table.
pub fn from_table(table: ThresholdTable) -> Result<Vec<Threshold>, ThresholdParseError> {
    table
        .iter()
        .flat_map(|(metric, exprs)| exprs.iter().map(|expr| Threshold::parse(metric, expr)))
        .collect()
}

/// Replaces the thresholds of every metric named in `overrides` by the given expressions.
///
/// An empty list removes all thresholds of that metric.
pub fn apply_overrides(
    mut thresholds: Vec<Threshold>,
    overrides: &BTreeMap<String, Vec<String>>,
) -> Result<Vec<Threshold>, ThresholdParseError> {
    for (metric, exprs) in overrides {
        let key: MetricKey = metric
            .parse()
            .map_err(|_| ThresholdParseError::InvalidMetric(metric.clone()))?;
        thresholds.retain(|threshold| threshold.metric != key);
        for expr in exprs {
            thresholds.push(Threshold {
                metric: key.clone(),
                expr: expr.parse()?,
            });
        }
    }
    Ok(thresholds)
}

/// The result of evaluating one threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdStatus {
    /// The criterion held.
    Passed,
    /// The criterion did not hold.
    Failed,
    /// The metric received no samples.
    NoData,
    /// The aggregation does not apply to the metric's kind.
    Unsupported,
}

impl ThresholdStatus {
    /// Whether the status fails the run.
    pub fn is_failure(&self) -> bool {
        matches!(self, ThresholdStatus::Failed | ThresholdStatus::Unsupported)
    }
}

impl Display for ThresholdStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThresholdStatus::Passed => f.write_str("passed"),
            ThresholdStatus::Failed => f.write_str("FAILED"),
            ThresholdStatus::NoData => f.write_str("no data"),
            ThresholdStatus::Unsupported => f.write_str("unsupported"),
        }
    }
}

/// A threshold with its evaluation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThresholdOutcome {
    /// The threshold.
    #[serde(flatten)]
    pub threshold: Threshold,
    /// The evaluation.
    pub status: ThresholdStatus,
    /// The aggregated value, if any.
    pub observed: Option<f64>,
}

/// Evaluates every threshold against `snapshot`.
pub fn evaluate(thresholds: &[Threshold], snapshot: &MetricsSnapshot) -> Vec<ThresholdOutcome> {
    thresholds
        .iter()
        .map(|threshold| {
            let (status, observed) = match snapshot.get(&threshold.metric) {
                None => (ThresholdStatus::NoData, None),
                Some(summary) if !threshold.expr.aggregation.applies_to(summary.kind()) => {
                    (ThresholdStatus::Unsupported, None)
                }
                Some(summary) if !summary.has_data() => (ThresholdStatus::NoData, None),
                Some(summary) => match threshold.expr.aggregation.observe(summary) {
                    Some(observed) if threshold.expr.holds(observed) => {
                        (ThresholdStatus::Passed, Some(observed))
                    }
                    Some(observed) => (ThresholdStatus::Failed, Some(observed)),
                    None => (ThresholdStatus::NoData, None),
                },
            };
            ThresholdOutcome {
                threshold: threshold.clone(),
                status,
                observed,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::MetricsSink;

    #[test]
    fn parses_expressions() {
        let expr: ThresholdExpr = "p(95)<3000".parse().expect("valid");
        assert_eq!(expr.aggregation, Aggregation::Percentile(95.0));
        assert_eq!(expr.comparison, Comparison::Less);
        assert_eq!(expr.value, 3000.0);

        let expr: ThresholdExpr = "rate >= 0.95".parse().expect("valid");
        assert_eq!(expr.aggregation, Aggregation::Rate);
        assert_eq!(expr.comparison, Comparison::GreaterOrEqual);

        let expr: ThresholdExpr = "count>50".parse().expect("valid");
        assert_eq!(expr.to_string(), "count>50");
        assert_eq!(
            "p(99.9)!=1".parse::<ThresholdExpr>().map(|expr| expr.comparison),
            Ok(Comparison::NotEqual)
        );
    }

    #[test]
    fn rejects_malformed_expressions() {
        assert_eq!(
            "p(95)".parse::<ThresholdExpr>(),
            Err(ThresholdParseError::MissingOperator("p(95)".to_owned()))
        );
        assert_eq!(
            "p95<3".parse::<ThresholdExpr>(),
            Err(ThresholdParseError::UnknownAggregation("p95".to_owned()))
        );
        assert_eq!(
            "p(150)<3".parse::<ThresholdExpr>(),
            Err(ThresholdParseError::UnknownAggregation("p(150)".to_owned()))
        );
        assert_eq!(
            "avg<fast".parse::<ThresholdExpr>(),
            Err(ThresholdParseError::InvalidValue("fast".to_owned()))
        );
        assert!(Threshold::parse("http req", "avg<1").is_err());
    }

    fn sample_snapshot() -> MetricsSnapshot {
        let sink = MetricsSink::new();
        let duration = sink.trend("http_req_duration").expect("trend");
        for value in 1..=100 {
            duration.add(f64::from(value) * 10.0);
        }
        let failed = sink.rate("http_req_failed").expect("rate");
        for index in 0..100 {
            failed.add(index < 3);
        }
        sink.counter("packages_created_total").expect("counter").add(42);
        sink.rate("spike_errors").expect("rate");
        sink.snapshot()
    }

    #[test]
    fn evaluates_against_snapshot() {
        let snapshot = sample_snapshot();
        let thresholds = vec![
            Threshold::parse("http_req_duration", "p(95)<1000").expect("valid"),
            Threshold::parse("http_req_duration", "avg<500").expect("valid"),
            Threshold::parse("http_req_failed", "rate<0.02").expect("valid"),
            Threshold::parse("packages_created_total", "count>50").expect("valid"),
            Threshold::parse("spike_errors", "rate<0.25").expect("valid"),
            Threshold::parse("recovery_time", "p(95)<3000").expect("valid"),
            Threshold::parse("http_req_failed", "p(95)<1").expect("valid"),
        ];

        let statuses: Vec<ThresholdStatus> = evaluate(&thresholds, &snapshot)
            .into_iter()
            .map(|outcome| outcome.status)
            .collect();
        assert_eq!(
            statuses,
            vec![
                ThresholdStatus::Passed,
                ThresholdStatus::Failed,
                ThresholdStatus::Failed,
                ThresholdStatus::Failed,
                ThresholdStatus::NoData,
                ThresholdStatus::NoData,
                ThresholdStatus::Unsupported,
            ]
        );
        assert!(!ThresholdStatus::NoData.is_failure());
        assert!(ThresholdStatus::Unsupported.is_failure());
    }

    #[test]
    fn reports_the_observed_value() {
        let snapshot = sample_snapshot();
        let outcome = evaluate(
            &[Threshold::parse("http_req_failed", "rate<0.05").expect("valid")],
            &snapshot,
        )
        .remove(0);
        assert_eq!(outcome.status, ThresholdStatus::Passed);
        assert_eq!(outcome.observed, Some(0.03));
    }

    #[test]
    fn overrides_replace_per_metric() {
        const TABLE: ThresholdTable = &[
            ("http_req_duration", &["p(95)<2000", "p(99)<5000"]),
            ("http_req_failed", &["rate<0.02"]),
        ];
        let defaults = from_table(TABLE).expect("valid table");
        assert_eq!(defaults.len(), 3);

        let overrides = BTreeMap::from([
            ("http_req_duration".to_owned(), vec!["p(90)<100".to_owned()]),
            ("http_req_failed{endpoint:health}".to_owned(), vec!["rate<0.5".to_owned()]),
        ]);
        let merged = apply_overrides(defaults, &overrides).expect("valid overrides");
        let rendered: Vec<String> = merged.iter().map(ToString::to_string).collect();
        assert_eq!(
            rendered,
            vec![
                "http_req_failed: rate<0.02",
                "http_req_duration: p(90)<100",
                "http_req_failed{endpoint:health}: rate<0.5",
            ]
        );
    }
}
