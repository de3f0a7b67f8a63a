// Copyright (c) Walrus Foundation
// SPDX-License-Identifier: Apache-2.0

//! Sudden traffic surges alternating with recovery periods.
//!
//! What an iteration does depends on the phase of the stage it starts in: aggressive bursts
//! during a spike, latency-sensitive probing during recovery and regular traffic otherwise.

use std::time::{Duration, Instant};

use super::{Assessment, VirtualUser, WorkloadContext, describe, duration_millis};
use crate::{
    client::{PHASE_TAG, RequestOptions},
    generator::{PoolCategory, generate_package_payload, random_element},
    metrics::MetricKey,
    stages::{Phase, Stage},
    thresholds::ThresholdTable,
    validator::{CheckResults, parse_health, responded_within},
};

/// Share of operations that failed their checks.
pub const SPIKE_ERRORS: &str = "spike_errors";
/// Duration of iterations, also recorded per phase.
pub const SPIKE_RESPONSE_TIME: &str = "spike_response_time";
/// Latency of successful health checks during recovery.
pub const RECOVERY_TIME: &str = "recovery_time";

const fn secs(value: u64) -> Duration {
    Duration::from_secs(value)
}

/// Default stages, labelled with their phase.
pub const STAGES: &[Stage] = &[
    Stage::new(secs(60), 5).in_phase(Phase::Baseline),
    Stage::new(secs(30), 5).in_phase(Phase::Baseline),
    Stage::new(secs(10), 100).in_phase(Phase::Spike),
    Stage::new(secs(60), 100).in_phase(Phase::Spike),
    Stage::new(secs(10), 5).in_phase(Phase::Recovery),
    Stage::new(secs(120), 5).in_phase(Phase::Recovery),
    Stage::new(secs(10), 150).in_phase(Phase::Spike),
    Stage::new(secs(30), 150).in_phase(Phase::Spike),
    Stage::new(secs(10), 5).in_phase(Phase::Recovery),
    Stage::new(secs(120), 5).in_phase(Phase::Recovery),
    Stage::new(secs(30), 0).in_phase(Phase::Baseline),
];

/// Default thresholds.
pub const THRESHOLDS: ThresholdTable = &[
    ("http_req_duration", &["p(95)<10000"]),
    ("http_req_failed", &["rate<0.20"]),
    (SPIKE_ERRORS, &["rate<0.25"]),
    ("http_req_duration{phase:recovery}", &["p(95)<3000"]),
    ("http_req_failed{phase:recovery}", &["rate<0.05"]),
];

/// Metrics shown at the top of the report.
pub const HIGHLIGHTS: &[&str] = &[SPIKE_ERRORS, SPIKE_RESPONSE_TIME, RECOVERY_TIME];

/// Think time after an iteration that ran in `phase`.
pub fn think_time(phase: Option<Phase>) -> (Duration, f64) {
    match phase.unwrap_or(Phase::Baseline) {
        Phase::Spike => (Duration::from_millis(200), 100.0),
        Phase::Recovery => (secs(1), 30.0),
        Phase::Baseline => (secs(2), 20.0),
    }
}

#[derive(Debug, Clone, Copy)]
enum SpikeOperation {
    CreatePackage,
    Health,
    Picker,
}

pub(crate) async fn iteration(context: &WorkloadContext, user: &mut VirtualUser) -> anyhow::Result<()> {
    let phase = user.phase().unwrap_or(Phase::Baseline);
    let start = Instant::now();

    let result = match phase {
        Phase::Spike => spike_phase(context, user).await,
        Phase::Recovery => recovery_phase(context, user).await,
        Phase::Baseline => baseline_phase(context, user).await,
    };

    let elapsed = duration_millis(start.elapsed());
    context.sink.record_trend(SPIKE_RESPONSE_TIME, elapsed);
    context.sink.record_trend(
        MetricKey::tagged(SPIKE_RESPONSE_TIME, PHASE_TAG, phase.as_str()),
        elapsed,
    );
    result
}

fn record_outcome(context: &WorkloadContext, success: bool) {
    context.sink.record_rate(SPIKE_ERRORS, !success);
}

async fn spike_phase(context: &WorkloadContext, user: &mut VirtualUser) -> anyhow::Result<()> {
    const OPERATIONS: [SpikeOperation; 3] = [
        SpikeOperation::CreatePackage,
        SpikeOperation::Health,
        SpikeOperation::Picker,
    ];
    let count = user.operation_count(2, 3);

    for index in 0..count {
        let mut checks = CheckResults::default();
        match *random_element(&OPERATIONS, user.rng())? {
            SpikeOperation::CreatePackage => {
                let payload = generate_package_payload(&context.test_data, user.rng())?;
                let response = context
                    .client
                    .create_package(&payload, user.options_with_timeout(secs(15)))
                    .await;
                checks.push(
                    "spike package creation - not timeout",
                    response.status.is_some(),
                );
                checks.push(
                    "spike package creation - server responsive",
                    not_server_error(response.status_code()),
                );
            }
            SpikeOperation::Health => {
                let response = context
                    .client
                    .health(user.options_with_timeout(secs(8)))
                    .await;
                checks.push(
                    "spike health - responsive",
                    response.is_status(200) || response.is_status(503),
                );
                checks.push("spike health - timely", responded_within(&response, secs(10)));
            }
            SpikeOperation::Picker => {
                let picker_id = context.test_data.pick(PoolCategory::PickerIds, user.rng())?;
                let response = context
                    .client
                    .pick_lists_for_picker(&picker_id, user.options_with_timeout(secs(10)))
                    .await;
                checks.push(
                    "spike picklist - not server error",
                    not_server_error(response.status_code()),
                );
                checks.push("spike picklist - response received", response.status.is_some());
            }
        }
        record_outcome(context, context.validator.check(checks));

        if index + 1 < count {
            context.pacer.pause(Duration::from_millis(50)).await;
        }
    }
    Ok(())
}

fn not_server_error(status: Option<u16>) -> bool {
    status.is_some_and(|status| status < 500 || status == 503)
}

async fn recovery_phase(context: &WorkloadContext, user: &mut VirtualUser) -> anyhow::Result<()> {
    let health = context
        .client
        .health(user.options_with_timeout(secs(10)))
        .await;
    let mut checks = CheckResults::default();
    checks.push("recovery health - status ok", health.is_status(200));
    checks.push(
        "recovery health - fast response",
        responded_within(&health, secs(3)),
    );
    checks.push(
        "recovery health - system up",
        parse_health(&health).is_ok_and(|body| body.status == "UP"),
    );
    let health_ok = context.validator.check(checks);
    if health_ok {
        context
            .sink
            .record_trend(RECOVERY_TIME, duration_millis(health.elapsed));
    }

    context
        .pacer
        .think(Duration::from_millis(500), 20.0, user.rng())
        .await;

    let payload = generate_package_payload(&context.test_data, user.rng())?;
    let package = context
        .client
        .create_package(&payload, user.options_with_timeout(secs(8)))
        .await;
    let mut checks = CheckResults::default();
    checks.push("recovery package - normal operation", package.is_status(200));
    checks.push(
        "recovery package - reasonable time",
        responded_within(&package, secs(5)),
    );
    let package_ok = context.validator.check(checks);

    record_outcome(context, health_ok && package_ok);
    Ok(())
}

async fn baseline_phase(context: &WorkloadContext, user: &mut VirtualUser) -> anyhow::Result<()> {
    let health = context
        .client
        .health(user.options_with_timeout(secs(5)))
        .await;
    context.validator.check_health_response(&health);

    context.pacer.think(secs(1), 20.0, user.rng()).await;

    let payload = generate_package_payload(&context.test_data, user.rng())?;
    let package = context
        .client
        .create_package(&payload, user.options_with_timeout(secs(5)))
        .await;
    let success = context.validator.check_package_creation_response(&package);
    record_outcome(context, success);
    Ok(())
}

/// Health, latency and functionality probes graded into an overall verdict.
pub(crate) async fn teardown(context: &WorkloadContext, user: &mut VirtualUser) -> Assessment {
    let mut assessment = Assessment::new("post-spike system assessment");

    let health = context
        .client
        .health(RequestOptions::default().timeout(secs(15)))
        .await;
    assessment.probe("health", health.is_status(200), describe(&health));

    context.pacer.pause(secs(2)).await;

    let info = context
        .client
        .info(RequestOptions::default().timeout(secs(10)))
        .await;
    assessment.probe(
        "response time",
        info.is_status(200) && info.elapsed < secs(2),
        describe(&info),
    );

    context.pacer.pause(secs(2)).await;

    match generate_package_payload(&context.test_data, user.rng()) {
        Ok(payload) => {
            let package = context
                .client
                .create_package(&payload, RequestOptions::default().timeout(secs(10)))
                .await;
            assessment.probe("functionality", package.is_status(200), describe(&package));
        }
        Err(error) => assessment.probe("functionality", false, error.to_string()),
    }

    assessment
}
