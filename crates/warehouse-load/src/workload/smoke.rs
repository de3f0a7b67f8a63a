// Copyright (c) Walrus Foundation
// SPDX-License-Identifier: Apache-2.0

//! Minimal traffic touching every endpoint once per iteration.

use std::time::Duration;

use super::{VirtualUser, WorkloadContext};
use crate::{
    client::PickListStatus,
    generator::{PoolCategory, generate_package_payload},
    stages::Stage,
    thresholds::ThresholdTable,
};

/// Default stages.
pub const STAGES: &[Stage] = &[
    Stage::new(Duration::from_secs(30), 1),
    Stage::new(Duration::from_secs(60), 1),
    Stage::new(Duration::from_secs(30), 0),
];

/// Default thresholds.
pub const THRESHOLDS: ThresholdTable = &[
    ("http_req_duration", &["p(95)<3000"]),
    ("http_req_failed", &["rate<0.05"]),
];

/// Think time after each iteration: none, the iteration pauses between its steps.
pub const THINK_TIME: (Duration, f64) = (Duration::ZERO, 0.0);

const STEP_PAUSE: Duration = Duration::from_secs(1);
const RETRIEVAL_PAUSE: Duration = Duration::from_millis(500);

pub(crate) async fn iteration(context: &WorkloadContext, user: &mut VirtualUser) -> anyhow::Result<()> {
    let client = &context.client;
    let validator = &context.validator;

    let health = client.health(user.options()).await;
    validator.check_health_response(&health);
    context.pacer.pause(STEP_PAUSE).await;

    let payload = generate_package_payload(&context.test_data, user.rng())?;
    let created = client.create_package(&payload, user.options()).await;
    if validator.check_api_response(&created, "package-creation", 200) {
        context.pacer.pause(RETRIEVAL_PAUSE).await;
        let retrieved = client.package_by_order("test-order", user.options()).await;
        validator.check_api_response(&retrieved, "package-retrieval", [200, 404]);
    }
    context.pacer.pause(STEP_PAUSE).await;

    let by_status = client
        .pick_lists_by_status(PickListStatus::Pending, user.options())
        .await;
    validator.check_api_response(&by_status, "picklist-status", [200, 404]);
    let picker_id = context.test_data.pick(PoolCategory::PickerIds, user.rng())?;
    let by_picker = client.pick_lists_for_picker(&picker_id, user.options()).await;
    validator.check_api_response(&by_picker, "picklist-picker", [200, 404]);
    let next = client.next_pick_list(&picker_id, user.options()).await;
    validator.check_api_response(&next, "picklist-next", [200, 204, 404]);
    context.pacer.pause(STEP_PAUSE).await;

    let info = client.info(user.options()).await;
    validator.check_api_response(&info, "info", [200, 404]);
    let metrics = client.actuator_metrics(user.options()).await;
    validator.check_api_response(&metrics, "metrics", [200, 404]);

    tracing::debug!(user = user.id(), "smoke iteration completed");
    Ok(())
}
