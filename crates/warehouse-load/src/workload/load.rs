// Copyright (c) Walrus Foundation
// SPDX-License-Identifier: Apache-2.0

//! Normal expected traffic across all endpoints.

use std::time::Duration;

use super::{VirtualUser, WorkloadContext, duration_millis};
use crate::{
    client::PickListStatus,
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
    validator::parse_package_id,
};

/// Share of package creations that passed their checks.
pub const PACKAGE_CREATION_SUCCESS: &str = "package_creation_success";
/// Share of pick confirmations answered with a 200.
pub const PICK_CONFIRMATION_SUCCESS: &str = "pick_confirmation_success";
/// Latency of package creations and pick confirmations.
pub const API_RESPONSE_TIME: &str = "api_response_time";

/// Default stages.
pub const STAGES: &[Stage] = &[
    Stage::new(Duration::from_secs(2 * 60), 10),
    Stage::new(Duration::from_secs(5 * 60), 10),
    Stage::new(Duration::from_secs(2 * 60), 20),
    Stage::new(Duration::from_secs(5 * 60), 20),
    Stage::new(Duration::from_secs(2 * 60), 0),
];

/// Default thresholds.
pub const THRESHOLDS: ThresholdTable = &[
    ("http_req_duration", &["p(95)<2000"]),
    ("http_req_failed", &["rate<0.02"]),
    (PACKAGE_CREATION_SUCCESS, &["rate>0.95"]),
    (PICK_CONFIRMATION_SUCCESS, &["rate>0.90"]),
    (API_RESPONSE_TIME, &["p(95)<3000"]),
];

/// Think time after each iteration.
pub const THINK_TIME: (Duration, f64) = (Duration::from_secs(2), 30.0);

/// Metrics shown at the top of the report.
pub const HIGHLIGHTS: &[&str] = &[
    PACKAGE_CREATION_SUCCESS,
    PICK_CONFIRMATION_SUCCESS,
    API_RESPONSE_TIME,
];

/// Used when a created package carries no usable identifier.
const FALLBACK_PACKAGE_ID: &str = "test-package";

/// Scenarios of the load profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadScenario {
    /// Create, retrieve and confirm a package.
    PackageWorkflow,
    /// Fetch, inspect and confirm pick lists.
    PicklistWorkflow,
    /// Poll the actuator endpoints.
    MonitoringCheck,
    /// A few random operations.
    MixedOperations,
}

impl Scenario for LoadScenario {
    const DEFAULT_WEIGHTS: &'static [(Self, f64)] = &[
        (Self::PackageWorkflow, 40.0),
        (Self::PicklistWorkflow, 35.0),
        (Self::MonitoringCheck, 15.0),
        (Self::MixedOperations, 10.0),
    ];

    fn name(&self) -> &'static str {
        match self {
            LoadScenario::PackageWorkflow => "package_workflow",
            LoadScenario::PicklistWorkflow => "picklist_workflow",
            LoadScenario::MonitoringCheck => "monitoring_check",
            LoadScenario::MixedOperations => "mixed_operations",
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum MixedOperation {
    Health,
    CreatePackage,
    Picker,
}

pub(crate) async fn iteration(
    context: &WorkloadContext,
    user: &mut VirtualUser,
    scenario: LoadScenario,
) -> anyhow::Result<()> {
    match scenario {
        LoadScenario::PackageWorkflow => package_workflow(context, user).await,
        LoadScenario::PicklistWorkflow => picklist_workflow(context, user).await,
        LoadScenario::MonitoringCheck => monitoring_check(context, user).await,
        LoadScenario::MixedOperations => mixed_operations(context, user).await,
    }
}

async fn package_workflow(context: &WorkloadContext, user: &mut VirtualUser) -> anyhow::Result<()> {
    let payload = generate_package_payload(&context.test_data, user.rng())?;
    let created = context.client.create_package(&payload, user.options()).await;
    context
        .sink
        .record_trend(API_RESPONSE_TIME, duration_millis(created.elapsed));
    let created_ok = context.validator.check_package_creation_response(&created);
    context.sink.record_rate(PACKAGE_CREATION_SUCCESS, created_ok);
    if !created_ok || !created.is_status(200) {
        return Ok(());
    }

    context.pacer.think(Duration::from_secs(1), 20.0, user.rng()).await;

    let order_id = format!("test-order-{}", epoch_millis());
    let retrieved = context
        .client
        .package_by_order(&order_id, user.options())
        .await;
    context
        .validator
        .check_resource_response(&retrieved, "package-retrieve", [200, 404]);
    if !retrieved.is_status(200) {
        return Ok(());
    }

    context
        .pacer
        .think(Duration::from_millis(500), 20.0, user.rng())
        .await;

    let package_id = parse_package_id(&created).unwrap_or_else(|error| {
        tracing::debug!(%error, "created package without identifier");
        FALLBACK_PACKAGE_ID.to_owned()
    });
    let confirmed = context
        .client
        .confirm_package(&package_id, user.options())
        .await;
    context
        .validator
        .check_resource_response(&confirmed, "package-confirm", [200, 404]);
    Ok(())
}

async fn picklist_workflow(context: &WorkloadContext, user: &mut VirtualUser) -> anyhow::Result<()> {
    let picker_id = context.test_data.pick(PoolCategory::PickerIds, user.rng())?;

    let next = context.client.next_pick_list(&picker_id, user.options()).await;
    context
        .validator
        .check_resource_response(&next, "picklist-next", [200, 204, 404]);
    context.pacer.think(Duration::from_secs(1), 25.0, user.rng()).await;

    let status = *random_element(&PickListStatus::ALL, user.rng())?;
    let by_status = context
        .client
        .pick_lists_by_status(status, user.options())
        .await;
    context
        .validator
        .check_resource_response(&by_status, "picklist-status", [200, 404]);
    context
        .pacer
        .think(Duration::from_millis(500), 20.0, user.rng())
        .await;

    let by_picker = context
        .client
        .pick_lists_for_picker(&picker_id, user.options())
        .await;
    context
        .validator
        .check_resource_response(&by_picker, "picklist-picker", [200, 404]);
    context.pacer.think(Duration::from_secs(2), 30.0, user.rng()).await;

    let pick_list_id = format!("test-picklist-{}", epoch_millis());
    let payload = generate_pick_confirmation_payload(&context.test_data, user.rng())?;
    let confirmed = context
        .client
        .confirm_pick(&pick_list_id, &payload, user.options())
        .await;
    context
        .sink
        .record_trend(API_RESPONSE_TIME, duration_millis(confirmed.elapsed));
    context
        .sink
        .record_rate(PICK_CONFIRMATION_SUCCESS, confirmed.is_status(200));
    context
        .validator
        .check_resource_response(&confirmed, "pick-confirm", 200);
    Ok(())
}

async fn monitoring_check(context: &WorkloadContext, user: &mut VirtualUser) -> anyhow::Result<()> {
    let health = context.client.health(user.options()).await;
    context.validator.check_health_response(&health);
    context
        .pacer
        .think(Duration::from_millis(500), 15.0, user.rng())
        .await;

    let info = context.client.info(user.options()).await;
    context
        .validator
        .check_resource_response(&info, "info", [200, 404]);
    context
        .pacer
        .think(Duration::from_millis(500), 15.0, user.rng())
        .await;

    let metrics = context.client.actuator_metrics(user.options()).await;
    context
        .validator
        .check_resource_response(&metrics, "metrics", [200, 404]);
    Ok(())
}

async fn mixed_operations(context: &WorkloadContext, user: &mut VirtualUser) -> anyhow::Result<()> {
    const OPERATIONS: [MixedOperation; 3] = [
        MixedOperation::Health,
        MixedOperation::CreatePackage,
        MixedOperation::Picker,
    ];
    let count = user.operation_count(2, 3);

    for index in 0..count {
        match *random_element(&OPERATIONS, user.rng())? {
            MixedOperation::Health => {
                let health = context.client.health(user.options()).await;
                context.validator.check_health_response(&health);
            }
            MixedOperation::CreatePackage => {
                let payload = generate_package_payload(&context.test_data, user.rng())?;
                let created = context.client.create_package(&payload, user.options()).await;
                let success = context.validator.check_package_creation_response(&created);
                context.sink.record_rate(PACKAGE_CREATION_SUCCESS, success);
            }
            MixedOperation::Picker => {
                let picker_id = context.test_data.pick(PoolCategory::PickerIds, user.rng())?;
                let response = context
                    .client
                    .pick_lists_for_picker(&picker_id, user.options())
                    .await;
                context
                    .validator
                    .check_resource_response(&response, "picklist-picker", [200, 404]);
            }
        }

        if index + 1 < count {
            context
                .pacer
                .think(Duration::from_millis(800), 25.0, user.rng())
                .await;
        }
    }
    Ok(())
}
