// Copyright (c) Walrus Foundation
// SPDX-License-Identifier: Apache-2.0

//! Traffic focused on the pick-list endpoints: picker workflows, dashboards polling by status and
//! bursts of pick confirmations.

use std::time::{Duration, Instant};

use super::{Assessment, VirtualUser, WorkloadContext, describe, duration_millis, load};
use crate::{
    client::{PickListStatus, RequestOptions},
    generator::{PoolCategory, epoch_millis, generate_pick_confirmation_payload},
    selector::Scenario,
    stages::Stage,
    thresholds::ThresholdTable,
};

/// Share of pick-list lookups that passed their checks.
pub const PICKLIST_RETRIEVAL_SUCCESS: &str = "picklist_retrieval_success";
/// Share of pick confirmations that passed their checks.
pub const PICK_CONFIRMATION_SUCCESS: &str = load::PICK_CONFIRMATION_SUCCESS;
/// Duration of iterations, think time excluded.
pub const PICKLIST_RESPONSE_TIME: &str = "picklist_response_time";
/// Number of iterations started.
pub const PICKLIST_OPERATIONS_TOTAL: &str = "picklist_operations_total";

/// Default stages.
pub const STAGES: &[Stage] = &[
    Stage::new(Duration::from_secs(60), 5),
    Stage::new(Duration::from_secs(3 * 60), 15),
    Stage::new(Duration::from_secs(5 * 60), 25),
    Stage::new(Duration::from_secs(3 * 60), 15),
    Stage::new(Duration::from_secs(2 * 60), 0),
];

/// Default thresholds.
pub const THRESHOLDS: ThresholdTable = &[
    ("http_req_duration", &["p(95)<3000"]),
    ("http_req_failed", &["rate<0.05"]),
    (PICKLIST_RETRIEVAL_SUCCESS, &["rate>0.90"]),
    (PICK_CONFIRMATION_SUCCESS, &["rate>0.85"]),
    (PICKLIST_RESPONSE_TIME, &["p(95)<2500"]),
];

/// Think time after each iteration.
pub const THINK_TIME: (Duration, f64) = (Duration::from_secs(3), 40.0);

/// Metrics shown at the top of the report.
pub const HIGHLIGHTS: &[&str] = &[
    PICKLIST_RETRIEVAL_SUCCESS,
    PICK_CONFIRMATION_SUCCESS,
    PICKLIST_OPERATIONS_TOTAL,
];

/// How many pickers the status monitoring scenario watches.
const MONITORED_PICKERS: usize = 3;
/// Probability that a confirmation is a partial pick.
const PARTIAL_PICK_PROBABILITY: f64 = 0.1;
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Scenarios of the picklist profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PicklistScenario {
    /// Fetch the next task, review assignments, confirm picks and poll again.
    PickerWorkflow,
    /// Query every status, then the workload of a few pickers.
    StatusMonitoring,
    /// Several confirmations in a row, some of them partial.
    PickConfirmation,
    /// Poll for the next task repeatedly.
    NextTaskPolling,
    /// Dashboard-style queries over statuses and all pickers.
    BulkQueries,
}

impl Scenario for PicklistScenario {
    const DEFAULT_WEIGHTS: &'static [(Self, f64)] = &[
        (Self::PickerWorkflow, 35.0),
        (Self::StatusMonitoring, 25.0),
        (Self::PickConfirmation, 20.0),
        (Self::NextTaskPolling, 15.0),
        (Self::BulkQueries, 5.0),
    ];

    fn name(&self) -> &'static str {
        match self {
            PicklistScenario::PickerWorkflow => "picker_workflow",
            PicklistScenario::StatusMonitoring => "status_monitoring",
            PicklistScenario::PickConfirmation => "pick_confirmation",
            PicklistScenario::NextTaskPolling => "next_task_polling",
            PicklistScenario::BulkQueries => "bulk_queries",
        }
    }
}

pub(crate) async fn iteration(
    context: &WorkloadContext,
    user: &mut VirtualUser,
    scenario: PicklistScenario,
) -> anyhow::Result<()> {
    context.sink.record_count(PICKLIST_OPERATIONS_TOTAL, 1);
    let start = Instant::now();
    let result = match scenario {
        PicklistScenario::PickerWorkflow => picker_workflow(context, user).await,
        PicklistScenario::StatusMonitoring => status_monitoring(context, user).await,
        PicklistScenario::PickConfirmation => pick_confirmation(context, user).await,
        PicklistScenario::NextTaskPolling => next_task_polling(context, user).await,
        PicklistScenario::BulkQueries => bulk_queries(context, user).await,
    };
    context
        .sink
        .record_trend(PICKLIST_RESPONSE_TIME, duration_millis(start.elapsed()));
    result
}

async fn next_task(context: &WorkloadContext, user: &VirtualUser, picker_id: &str, check: &str) {
    let response = context.client.next_pick_list(picker_id, user.options()).await;
    let success = context
        .validator
        .check_resource_response(&response, check, [200, 204, 404]);
    context.sink.record_rate(PICKLIST_RETRIEVAL_SUCCESS, success);
}

async fn assignments(context: &WorkloadContext, user: &VirtualUser, picker_id: &str, check: &str) {
    let response = context
        .client
        .pick_lists_for_picker(picker_id, user.options())
        .await;
    let success = context
        .validator
        .check_resource_response(&response, check, [200, 404]);
    context.sink.record_rate(PICKLIST_RETRIEVAL_SUCCESS, success);
}

async fn by_status(
    context: &WorkloadContext,
    user: &VirtualUser,
    status: PickListStatus,
    check: &str,
) {
    let response = context
        .client
        .pick_lists_by_status(status, user.options())
        .await;
    let success = context
        .validator
        .check_resource_response(&response, check, [200, 404]);
    context.sink.record_rate(PICKLIST_RETRIEVAL_SUCCESS, success);
}

async fn confirm(
    context: &WorkloadContext,
    user: &mut VirtualUser,
    pick_list_id: &str,
    partial: bool,
    check: &str,
) -> anyhow::Result<()> {
    let mut payload = generate_pick_confirmation_payload(&context.test_data, user.rng())?;
    if partial {
        payload = payload.into_partial();
    }
    let response = context
        .client
        .confirm_pick(pick_list_id, &payload, user.options())
        .await;
    let success = context
        .validator
        .check_resource_response(&response, check, 200);
    context.sink.record_rate(PICK_CONFIRMATION_SUCCESS, success);
    Ok(())
}

async fn picker_workflow(context: &WorkloadContext, user: &mut VirtualUser) -> anyhow::Result<()> {
    let picker_id = context.test_data.pick(PoolCategory::PickerIds, user.rng())?;

    next_task(context, user, &picker_id, "next-task").await;
    context.pacer.think(Duration::from_secs(2), 30.0, user.rng()).await;

    assignments(context, user, &picker_id, "assigned-picklists").await;
    context.pacer.think(Duration::from_secs(5), 25.0, user.rng()).await;

    let picks = user.operation_count(1, 3);
    for index in 0..picks {
        let pick_list_id = format!("workflow-test-{}-{index}", epoch_millis());
        confirm(context, user, &pick_list_id, false, "pick-confirmation").await?;
        if index + 1 < picks {
            context
                .pacer
                .think(Duration::from_millis(1500), 30.0, user.rng())
                .await;
        }
    }
    context.pacer.think(Duration::from_secs(1), 20.0, user.rng()).await;

    next_task(context, user, &picker_id, "next-task-check").await;
    Ok(())
}

async fn status_monitoring(context: &WorkloadContext, user: &mut VirtualUser) -> anyhow::Result<()> {
    for status in PickListStatus::ALL {
        let check = format!("status-{}", status.as_str().to_lowercase());
        by_status(context, user, status, &check).await;
        context
            .pacer
            .think(Duration::from_millis(500), 25.0, user.rng())
            .await;
    }

    let pickers = context.test_data.picker_ids();
    for picker_id in pickers.iter().take(MONITORED_PICKERS) {
        assignments(context, user, picker_id, &format!("monitor-picker-{picker_id}")).await;
        context
            .pacer
            .think(Duration::from_millis(300), 20.0, user.rng())
            .await;
    }
    Ok(())
}

async fn pick_confirmation(context: &WorkloadContext, user: &mut VirtualUser) -> anyhow::Result<()> {
    let confirmations = user.operation_count(2, 5);
    for index in 0..confirmations {
        let pick_list_id = format!("confirmation-test-{}-{index}", epoch_millis());
        let partial = user.chance(PARTIAL_PICK_PROBABILITY);
        confirm(context, user, &pick_list_id, partial, "bulk-pick-confirmation").await?;

        if index + 1 < confirmations {
            context.pacer.think(Duration::from_secs(2), 40.0, user.rng()).await;
        }
    }
    Ok(())
}

async fn next_task_polling(context: &WorkloadContext, user: &mut VirtualUser) -> anyhow::Result<()> {
    let picker_id = context.test_data.pick(PoolCategory::PickerIds, user.rng())?;
    let polls = user.operation_count(3, 5);

    for index in 0..polls {
        let response = context.client.next_pick_list(&picker_id, user.options()).await;
        let success = context
            .validator
            .check_resource_response(&response, "frequent-poll", [200, 204, 404]);
        context.sink.record_rate(PICKLIST_RETRIEVAL_SUCCESS, success);

        if response.is_status(200) && response.has_body() {
            tracing::debug!(user = user.id(), %picker_id, "picker found an available task");
            context
                .pacer
                .think(Duration::from_millis(500), 20.0, user.rng())
                .await;
            assignments(context, user, &picker_id, "workload-check").await;
        }

        if index + 1 < polls {
            context.pacer.think(Duration::from_secs(4), 30.0, user.rng()).await;
        }
    }
    Ok(())
}

async fn bulk_queries(context: &WorkloadContext, user: &mut VirtualUser) -> anyhow::Result<()> {
    let start = Instant::now();

    by_status(context, user, PickListStatus::Pending, "bulk-pending").await;
    context
        .pacer
        .think(Duration::from_millis(200), 15.0, user.rng())
        .await;

    by_status(context, user, PickListStatus::InProgress, "bulk-in-progress").await;
    context
        .pacer
        .think(Duration::from_millis(200), 15.0, user.rng())
        .await;

    for picker_id in context.test_data.picker_ids() {
        assignments(context, user, picker_id, &format!("bulk-picker-{picker_id}")).await;
        context.pacer.pause(Duration::from_millis(100)).await;
    }

    tracing::debug!(
        user = user.id(),
        elapsed_ms = duration_millis(start.elapsed()),
        "bulk queries completed"
    );
    Ok(())
}

/// Status, picker and next-task probes.
pub(crate) async fn teardown(context: &WorkloadContext) -> Assessment {
    let mut assessment = Assessment::new("pick-list system health");
    let options = || RequestOptions::default().timeout(PROBE_TIMEOUT);

    let by_status = context
        .client
        .pick_lists_by_status(PickListStatus::Pending, options())
        .await;
    assessment.probe(
        "status queries",
        by_status.is_status(200) || by_status.is_status(404),
        describe(&by_status),
    );

    let Some(picker_id) = context.test_data.picker_ids().first() else {
        assessment.probe("picker queries", false, "no picker identifiers configured");
        assessment.probe("next task queries", false, "no picker identifiers configured");
        return assessment;
    };

    let assigned = context
        .client
        .pick_lists_for_picker(picker_id, options())
        .await;
    assessment.probe(
        "picker queries",
        assigned.is_status(200) || assigned.is_status(404),
        describe(&assigned),
    );

    let next = context.client.next_pick_list(picker_id, options()).await;
    assessment.probe(
        "next task queries",
        [200, 204, 404].iter().any(|status| next.is_status(*status)),
        describe(&next),
    );

    assessment
}
