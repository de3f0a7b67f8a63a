// Copyright (c) Walrus Foundation
// SPDX-License-Identifier: Apache-2.0

//! End-of-run summary: printed as tables and optionally exported as JSON.

use std::{fmt::Write as _, path::Path, time::Duration};

use anyhow::Context;
use colored::Colorize;
use prettytable::{Table, format, row};
use serde::Serialize;
use warehouse_load_utils::config::humantime_duration;

use crate::{
    THRESHOLD_FAILED_EXIT_CODE,
    environment::Environment,
    metrics::{MetricKey, MetricSummary, MetricsSnapshot},
    thresholds::{ThresholdOutcome, ThresholdStatus},
    workload::{Assessment, Grade, ProfileKind},
};

/// A headline metric of the profile.
#[derive(Debug, Clone, Serialize)]
pub struct Highlight {
    /// The metric name.
    pub metric: String,
    /// Its final value, or `None` if it was never recorded.
    pub summary: Option<MetricSummary>,
}

/// The teardown assessment together with its verdict.
#[derive(Debug, Clone, Serialize)]
pub struct GradedAssessment {
    /// The probes.
    #[serde(flatten)]
    pub assessment: Assessment,
    /// The verdict.
    pub grade: Grade,
}

/// Everything known at the end of a run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// The profile that ran.
    pub profile: ProfileKind,
    /// Name of the target environment.
    pub environment: String,
    /// Base URL of the target environment.
    pub base_url: String,
    /// Wall-clock duration of the virtual-user phase.
    #[serde(serialize_with = "humantime_duration::serialize")]
    pub duration: Duration,
    /// The profile's headline metrics.
    pub highlights: Vec<Highlight>,
    /// The outcome of every threshold.
    pub thresholds: Vec<ThresholdOutcome>,
    /// The teardown assessment, for profiles that have one.
    pub assessment: Option<GradedAssessment>,
    /// Every metric recorded during the run.
    pub metrics: MetricsSnapshot,
}

impl RunReport {
    /// Assembles the report of a finished run.
    pub fn new(
        profile: ProfileKind,
        environment: &Environment,
        duration: Duration,
        metrics: MetricsSnapshot,
        thresholds: Vec<ThresholdOutcome>,
        assessment: Option<Assessment>,
    ) -> Self {
        let highlights = profile
            .highlights()
            .iter()
            .map(|name| Highlight {
                metric: (*name).to_owned(),
                summary: metrics.get(&MetricKey::new(*name)).cloned(),
            })
            .collect();
        Self {
            profile,
            environment: environment.name.clone(),
            base_url: environment.base_url.clone(),
            duration,
            highlights,
            thresholds,
            assessment: assessment.map(|assessment| GradedAssessment {
                grade: assessment.grade(),
                assessment,
            }),
            metrics,
        }
    }

    /// Whether every threshold passed or had no data.
    pub fn passed(&self) -> bool {
        !self
            .thresholds
            .iter()
            .any(|outcome| outcome.status.is_failure())
    }

    /// The thresholds that failed.
    pub fn failed_thresholds(&self) -> impl Iterator<Item = &ThresholdOutcome> {
        self.thresholds
            .iter()
            .filter(|outcome| outcome.status.is_failure())
    }

    /// The process exit code for this report.
    pub fn exit_code(&self) -> i32 {
        if self.passed() {
            0
        } else {
            THRESHOLD_FAILED_EXIT_CODE
        }
    }

    /// Writes the report as pretty-printed JSON to `path`.
    pub fn write_json(&self, path: &Path) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self).context("failed to serialize the report")?;
        std::fs::write(path, json)
            .with_context(|| format!("failed to write the summary to {}", path.display()))?;
        tracing::info!(path = %path.display(), "summary exported");
        Ok(())
    }

    /// Renders the report for a terminal.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "\n{}",
            format!("{} test against {}", self.profile, self.environment)
                .bold()
                .green()
        );
        let _ = writeln!(out, "base URL: {}", self.base_url);
        let _ = writeln!(
            out,
            "duration: {}",
            humantime::format_duration(Duration::from_secs(self.duration.as_secs()))
        );

        let _ = writeln!(out, "\n{}", "Highlights".bold().yellow());
        let mut table = Table::new();
        table.set_format(default_table_format());
        table.set_titles(row![b->"Metric", b->"Value"]);
        for highlight in &self.highlights {
            let value = highlight
                .summary
                .as_ref()
                .map_or_else(|| "no data".to_owned(), format_summary);
            table.add_row(row![highlight.metric, value]);
        }
        let _ = write!(out, "{table}");

        let _ = writeln!(out, "\n{}", "Metrics".bold().yellow());
        let mut table = Table::new();
        table.set_format(default_table_format());
        table.set_titles(row![b->"Metric", b->"Type", b->"Value"]);
        for (key, summary) in self.metrics.iter() {
            table.add_row(row![key, summary.kind(), format_summary(summary)]);
        }
        let _ = write!(out, "{table}");

        let _ = writeln!(out, "\n{}", "Thresholds".bold().yellow());
        let mut table = Table::new();
        table.set_format(default_table_format());
        table.set_titles(row![b->"Metric", b->"Threshold", b->"Observed", b->"Status"]);
        for outcome in &self.thresholds {
            let observed = outcome
                .observed
                .map_or_else(|| "-".to_owned(), |value| format!("{value:.4}"));
            table.add_row(row![
                outcome.threshold.metric,
                outcome.threshold.expr,
                observed,
                colored_status(outcome.status),
            ]);
        }
        let _ = write!(out, "{table}");

        if let Some(graded) = &self.assessment {
            let _ = writeln!(out, "\n{}", graded.assessment.title.bold().yellow());
            let mut table = Table::new();
            table.set_format(default_table_format());
            table.set_titles(row![b->"Probe", b->"Result", b->"Detail"]);
            for probe in &graded.assessment.probes {
                let result = if probe.passed {
                    "WORKING".green()
                } else {
                    "FAILED".red()
                };
                table.add_row(row![probe.name, result, probe.detail]);
            }
            let _ = write!(out, "{table}");
            let grade = match graded.grade {
                Grade::Healthy => graded.grade.to_string().green(),
                Grade::Degraded => graded.grade.to_string().yellow(),
                Grade::NeedsAttention => graded.grade.to_string().red(),
            };
            let _ = writeln!(
                out,
                "assessment: {grade} ({} of {} probes passed)",
                graded.assessment.passed(),
                graded.assessment.probes.len()
            );
        }

        let verdict = if self.passed() {
            "all thresholds passed".bold().green()
        } else {
            "some thresholds failed".bold().red()
        };
        let _ = writeln!(out, "\n{verdict}");
        out
    }
}

fn colored_status(status: ThresholdStatus) -> colored::ColoredString {
    let text = status.to_string();
    match status {
        ThresholdStatus::Passed => text.green(),
        ThresholdStatus::Failed | ThresholdStatus::Unsupported => text.red(),
        ThresholdStatus::NoData => text.yellow(),
    }
}

/// One-line rendering of a metric value.
pub fn format_summary(summary: &MetricSummary) -> String {
    match summary {
        MetricSummary::Counter { count } => count.to_string(),
        MetricSummary::Rate {
            passes,
            fails,
            rate,
        } => match rate {
            Some(rate) => format!("{:.2}% ({passes} of {})", rate * 100.0, passes + fails),
            None => "no data".to_owned(),
        },
        MetricSummary::Trend(trend) => {
            if trend.count == 0 {
                return "no data".to_owned();
            }
            let value = |value: Option<f64>| value.map_or_else(|| "-".to_owned(), |v| format!("{v:.2}"));
            format!(
                "avg={} min={} med={} max={} p(90)={} p(95)={} p(99)={} count={}",
                value(trend.avg),
                value(trend.min),
                value(trend.med),
                value(trend.max),
                value(trend.p90),
                value(trend.p95),
                value(trend.p99),
                trend.count,
            )
        }
    }
}

/// Default style for tables printed to stdout.
fn default_table_format() -> format::TableFormat {
    format::FormatBuilder::new()
        .separators(
            &[
                format::LinePosition::Top,
                format::LinePosition::Bottom,
                format::LinePosition::Title,
            ],
            format::LineSeparator::new('-', '-', '-', '-'),
        )
        .padding(1, 1)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{metrics::MetricsSink, thresholds};

    fn report(sink: &MetricsSink, profile: ProfileKind) -> RunReport {
        let snapshot = sink.snapshot();
        let thresholds =
            thresholds::from_table(profile.default_thresholds()).expect("valid thresholds");
        let outcomes = thresholds::evaluate(&thresholds, &snapshot);
        let environment = Environment {
            name: "local".to_owned(),
            base_url: "http://localhost:8080".to_owned(),
            description: "Local development".to_owned(),
        };
        RunReport::new(
            profile,
            &environment,
            Duration::from_secs(90),
            snapshot,
            outcomes,
            None,
        )
    }

    #[test]
    fn failing_threshold_sets_the_exit_code() {
        let sink = MetricsSink::new();
        for _ in 0..9 {
            sink.record_rate("http_req_failed", false);
            sink.record_trend("http_req_duration", 120.0);
        }
        let passing = report(&sink, ProfileKind::Smoke);
        assert!(passing.passed());
        assert_eq!(passing.exit_code(), 0);

        sink.record_rate("http_req_failed", true);
        let failing = report(&sink, ProfileKind::Smoke);
        assert!(!failing.passed());
        assert_eq!(failing.exit_code(), THRESHOLD_FAILED_EXIT_CODE);
        assert_eq!(failing.failed_thresholds().count(), 1);
    }

    #[test]
    fn thresholds_without_data_do_not_fail_the_run() {
        let report = report(&MetricsSink::new(), ProfileKind::Load);
        assert!(report.passed());
        assert!(
            report
                .thresholds
                .iter()
                .all(|outcome| outcome.status == ThresholdStatus::NoData)
        );
        assert!(report.highlights.iter().all(|highlight| highlight.summary.is_none()));
    }

    #[test]
    fn renders_and_serializes_every_section() {
        colored::control::set_override(false);
        let sink = MetricsSink::new();
        sink.record_rate("package_creation_success", true);
        sink.record_rate("package_creation_success", false);
        sink.record_trend("api_response_time", 250.0);
        let mut report = report(&sink, ProfileKind::Load);
        let mut assessment = Assessment::new("post-run health");
        assessment.probe("health", true, "status 200 in 12ms");
        report.assessment = Some(GradedAssessment {
            grade: assessment.grade(),
            assessment,
        });

        let rendered = report.render();
        assert!(rendered.contains("load test against local"));
        assert!(rendered.contains("50.00% (1 of 2)"));
        assert!(rendered.contains("rate>0.95"));
        assert!(rendered.contains("EXCELLENT"));

        let json = serde_json::to_value(&report).expect("serializable report");
        assert_eq!(json["profile"], "load");
        assert_eq!(json["duration"], "1m 30s");
        assert_eq!(json["assessment"]["grade"], "healthy");
        assert_eq!(
            json["metrics"]["package_creation_success"]["type"],
            "rate"
        );
    }
}
