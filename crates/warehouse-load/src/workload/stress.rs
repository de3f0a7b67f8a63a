// Copyright (c) Walrus Foundation
// SPDX-License-Identifier: Apache-2.0

//! Ramps traffic far beyond normal capacity, tolerating degraded responses.

use std::time::Duration;

use super::{Assessment, VirtualUser, WorkloadContext, describe, duration_millis};
use crate::{
    client::{PickListStatus, RequestOptions},
    generator::{
        PoolCategory,
        epoch_millis,
        generate_package_payload,
        generate_pick_confirmation_payload,
        random_element,
    },
    selector::Scenario,
    stages::Stage,
    thresholds::ThresholdTable,
    validator::{CheckResults, responded_within},
};

/// Share of operations that failed their checks.
pub const ERRORS: &str = "errors";
/// Latency of package creations and health checks under stress.
pub const RESPONSE_TIME_P99: &str = "response_time_p99";
/// Number of iterations started, one per virtual user and iteration.
pub const CONCURRENT_USERS: &str = "concurrent_users";

/// Default stages.
pub const STAGES: &[Stage] = &[
    Stage::new(Duration::from_secs(2 * 60), 20),
    Stage::new(Duration::from_secs(3 * 60), 50),
    Stage::new(Duration::from_secs(3 * 60), 100),
    Stage::new(Duration::from_secs(5 * 60), 100),
    Stage::new(Duration::from_secs(3 * 60), 150),
    Stage::new(Duration::from_secs(5 * 60), 150),
    Stage::new(Duration::from_secs(2 * 60), 200),
    Stage::new(Duration::from_secs(3 * 60), 200),
    Stage::new(Duration::from_secs(3 * 60), 0),
];

/// Default thresholds.
pub const THRESHOLDS: ThresholdTable = &[
    ("http_req_duration", &["p(95)<5000", "p(99)<10000"]),
    ("http_req_failed", &["rate<0.10"]),
    (ERRORS, &["rate<0.15"]),
    ("http_req_duration{endpoint:health}", &["p(95)<2000"]),
    ("http_req_failed{endpoint:health}", &["rate<0.05"]),
];

/// Think time after each iteration.
pub const THINK_TIME: (Duration, f64) = (Duration::from_millis(500), 50.0);

/// Metrics shown at the top of the report.
pub const HIGHLIGHTS: &[&str] = &[ERRORS, CONCURRENT_USERS, RESPONSE_TIME_P99];

const PACKAGE_BURST: usize = 3;
const PACKAGE_TIMEOUT: Duration = Duration::from_secs(10);
const PACKAGE_ACCEPTABLE_LATENCY: Duration = Duration::from_secs(15);
const LOOKUP_TIMEOUT: Duration = Duration::from_secs(8);
const CONFIRM_TIMEOUT: Duration = Duration::from_secs(10);
const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);
const HEALTH_ACCEPTABLE_LATENCY: Duration = Duration::from_secs(3);
const RAPID_CREATE_TIMEOUT: Duration = Duration::from_secs(12);
const DEGRADED_LATENCY: Duration = Duration::from_secs(20);
const RAPID_FIRE_OPERATIONS: usize = 4;

const RECOVERY_ATTEMPTS: u32 = 5;
const RECOVERY_TIMEOUT: Duration = Duration::from_secs(15);
const RECOVERY_RETRY_DELAY: Duration = Duration::from_secs(10);

/// Scenarios of the stress profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StressScenario {
    /// Back-to-back package creations.
    IntensivePackage,
    /// Rapid pick-list lookups and confirmations.
    IntensivePicklist,
    /// A mix of operations with almost no delay.
    RapidFire,
}

impl Scenario for StressScenario {
    const DEFAULT_WEIGHTS: &'static [(Self, f64)] = &[
        (Self::IntensivePackage, 50.0),
        (Self::IntensivePicklist, 30.0),
        (Self::RapidFire, 20.0),
    ];

    fn name(&self) -> &'static str {
        match self {
            StressScenario::IntensivePackage => "intensive_package",
            StressScenario::IntensivePicklist => "intensive_picklist",
            StressScenario::RapidFire => "rapid_fire",
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum PicklistOperation {
    Picker,
    Status,
    Next,
    Confirm,
}

#[derive(Debug, Clone, Copy)]
enum RapidOperation {
    Health,
    CreatePackage,
    Picker,
}

pub(crate) async fn iteration(
    context: &WorkloadContext,
    user: &mut VirtualUser,
    scenario: StressScenario,
) -> anyhow::Result<()> {
    context.sink.record_count(CONCURRENT_USERS, 1);
    match scenario {
        StressScenario::IntensivePackage => intensive_package(context, user).await,
        StressScenario::IntensivePicklist => intensive_picklist(context, user).await,
        StressScenario::RapidFire => rapid_fire(context, user).await,
    }
}

fn record_outcome(context: &WorkloadContext, success: bool) {
    context.sink.record_rate(ERRORS, !success);
}

async fn intensive_package(context: &WorkloadContext, user: &mut VirtualUser) -> anyhow::Result<()> {
    for index in 0..PACKAGE_BURST {
        let payload = generate_package_payload(&context.test_data, user.rng())?;
        let response = context
            .client
            .create_package(&payload, user.options_with_timeout(PACKAGE_TIMEOUT))
            .await;
        context
            .sink
            .record_trend(RESPONSE_TIME_P99, duration_millis(response.elapsed));

        let mut checks = CheckResults::default();
        checks.push(
            "stress package creation",
            response.is_status(200) || response.is_status(201),
        );
        checks.push(
            "response time acceptable",
            responded_within(&response, PACKAGE_ACCEPTABLE_LATENCY),
        );
        record_outcome(context, context.validator.check(checks));

        if index + 1 < PACKAGE_BURST {
            context.pacer.pause(Duration::from_millis(100)).await;
        }
    }
    Ok(())
}

async fn intensive_picklist(context: &WorkloadContext, user: &mut VirtualUser) -> anyhow::Result<()> {
    const OPERATIONS: [PicklistOperation; 4] = [
        PicklistOperation::Picker,
        PicklistOperation::Status,
        PicklistOperation::Next,
        PicklistOperation::Confirm,
    ];
    let picker_id = context.test_data.pick(PoolCategory::PickerIds, user.rng())?;
    let count = user.operation_count(2, 4);

    for _ in 0..count {
        let operation = *random_element(&OPERATIONS, user.rng())?;
        let (response, name) = match operation {
            PicklistOperation::Picker => {
                let options = user.options_with_timeout(LOOKUP_TIMEOUT);
                let response = context.client.pick_lists_for_picker(&picker_id, options).await;
                (response, "picklist-picker")
            }
            PicklistOperation::Status => {
                let status = *random_element(&PickListStatus::ALL, user.rng())?;
                let options = user.options_with_timeout(LOOKUP_TIMEOUT);
                let response = context.client.pick_lists_by_status(status, options).await;
                (response, "picklist-status")
            }
            PicklistOperation::Next => {
                let options = user.options_with_timeout(LOOKUP_TIMEOUT);
                let response = context.client.next_pick_list(&picker_id, options).await;
                (response, "picklist-next")
            }
            PicklistOperation::Confirm => {
                let pick_list_id = format!("stress-test-{}", epoch_millis());
                let payload = generate_pick_confirmation_payload(&context.test_data, user.rng())?;
                let options = user.options_with_timeout(CONFIRM_TIMEOUT);
                let response = context
                    .client
                    .confirm_pick(&pick_list_id, &payload, options)
                    .await;
                (response, "pick-confirm")
            }
        };
        let success = context
            .validator
            .check_degraded_response(&response, name, DEGRADED_LATENCY);
        record_outcome(context, success);

        context.pacer.pause(Duration::from_millis(50)).await;
    }
    Ok(())
}

async fn rapid_fire(context: &WorkloadContext, user: &mut VirtualUser) -> anyhow::Result<()> {
    const OPERATIONS: [RapidOperation; 3] = [
        RapidOperation::Health,
        RapidOperation::CreatePackage,
        RapidOperation::Picker,
    ];

    for _ in 0..RAPID_FIRE_OPERATIONS {
        let success = match *random_element(&OPERATIONS, user.rng())? {
            RapidOperation::Health => {
                let response = context
                    .client
                    .health(user.options_with_timeout(HEALTH_TIMEOUT))
                    .await;
                context
                    .sink
                    .record_trend(RESPONSE_TIME_P99, duration_millis(response.elapsed));
                let mut checks = CheckResults::default();
                checks.push("health responsive under stress", response.is_status(200));
                checks.push(
                    "health fast under stress",
                    responded_within(&response, HEALTH_ACCEPTABLE_LATENCY),
                );
                context.validator.check(checks)
            }
            RapidOperation::CreatePackage => {
                let payload = generate_package_payload(&context.test_data, user.rng())?;
                let response = context
                    .client
                    .create_package(&payload, user.options_with_timeout(RAPID_CREATE_TIMEOUT))
                    .await;
                context
                    .validator
                    .check_degraded_response(&response, "rapid-package", DEGRADED_LATENCY)
            }
            RapidOperation::Picker => {
                let picker_id = context.test_data.pick(PoolCategory::PickerIds, user.rng())?;
                let response = context
                    .client
                    .pick_lists_for_picker(&picker_id, user.options_with_timeout(LOOKUP_TIMEOUT))
                    .await;
                context
                    .validator
                    .check_degraded_response(&response, "rapid-picklist", DEGRADED_LATENCY)
            }
        };
        record_outcome(context, success);

        context.pacer.pause(Duration::from_millis(20)).await;
    }
    Ok(())
}

/// Polls the health endpoint until the service has recovered or the attempts are exhausted.
pub(crate) async fn teardown(context: &WorkloadContext) -> Assessment {
    let mut assessment = Assessment::new("post-stress recovery");

    for attempt in 1..=RECOVERY_ATTEMPTS {
        let response = context
            .client
            .health(RequestOptions::default().timeout(RECOVERY_TIMEOUT))
            .await;
        if response.is_status(200) {
            assessment.probe(
                "post-stress health",
                true,
                format!("recovered on attempt {attempt}, {}", describe(&response)),
            );
            return assessment;
        }

        tracing::warn!(
            attempt,
            max_attempts = RECOVERY_ATTEMPTS,
            outcome = %describe(&response),
            "post-stress health check failed"
        );
        if attempt < RECOVERY_ATTEMPTS {
            context.pacer.pause(RECOVERY_RETRY_DELAY).await;
        }
    }

    assessment.probe(
        "post-stress health",
        false,
        format!("still unhealthy after {RECOVERY_ATTEMPTS} attempts"),
    );
    assessment
}
