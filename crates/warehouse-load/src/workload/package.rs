// Copyright (c) Walrus Foundation
// SPDX-License-Identifier: Apache-2.0

//! Traffic focused on the package endpoints.
//!
//! Virtual users remember the orders they created and look them up again in later iterations.

use std::time::{Duration, Instant};

use super::{Assessment, VirtualUser, WorkloadContext, describe, duration_millis, load};
use crate::{
    client::{ApiResponse, RequestOptions},
    generator::{
        PackagePayload,
        add_extra_items,
        epoch_millis,
        generate_order_id,
        generate_package_payload,
        random_element,
    },
    selector::Scenario,
    stages::Stage,
    thresholds::ThresholdTable,
    validator::parse_package_id,
};

/// Share of package creations that passed their checks.
pub const PACKAGE_CREATION_SUCCESS: &str = load::PACKAGE_CREATION_SUCCESS;
/// Share of lookups by order that found a package.
pub const PACKAGE_RETRIEVAL_SUCCESS: &str = "package_retrieval_success";
/// Share of confirmations answered with a 200.
pub const PACKAGE_CONFIRMATION_SUCCESS: &str = "package_confirmation_success";
/// Duration of iterations, think time excluded.
pub const PACKAGE_RESPONSE_TIME: &str = "package_response_time";
/// Number of items of created packages.
pub const AVERAGE_ITEMS_PER_PACKAGE: &str = "average_items_per_package";
/// Number of packages created.
pub const PACKAGES_CREATED_TOTAL: &str = "packages_created_total";

/// Default stages.
pub const STAGES: &[Stage] = &[
    Stage::new(Duration::from_secs(60), 8),
    Stage::new(Duration::from_secs(4 * 60), 20),
    Stage::new(Duration::from_secs(6 * 60), 35),
    Stage::new(Duration::from_secs(4 * 60), 20),
    Stage::new(Duration::from_secs(2 * 60), 0),
];

/// Default thresholds.
pub const THRESHOLDS: ThresholdTable = &[
    ("http_req_duration", &["p(95)<4000"]),
    ("http_req_failed", &["rate<0.03"]),
    (PACKAGE_CREATION_SUCCESS, &["rate>0.95"]),
    (PACKAGE_RETRIEVAL_SUCCESS, &["rate>0.80"]),
    (PACKAGE_CONFIRMATION_SUCCESS, &["rate>0.70"]),
    (PACKAGE_RESPONSE_TIME, &["p(95)<3500"]),
    (PACKAGES_CREATED_TOTAL, &["count>50"]),
];

/// Think time after each iteration.
pub const THINK_TIME: (Duration, f64) = (Duration::from_secs(4), 35.0);

/// Metrics shown at the top of the report.
pub const HIGHLIGHTS: &[&str] = &[
    PACKAGE_CREATION_SUCCESS,
    PACKAGE_RETRIEVAL_SUCCESS,
    PACKAGE_CONFIRMATION_SUCCESS,
    PACKAGES_CREATED_TOTAL,
    AVERAGE_ITEMS_PER_PACKAGE,
];

/// Order identifiers in formats the service may have seen before.
const ORDER_PATTERNS: [&str; 4] = ["ord-001", "order-12345", "ORD-2024-001", "test-order-001"];
/// Probability that a burst creation carries extra items.
const EXTRA_ITEMS_PROBABILITY: f64 = 0.3;

/// Scenarios of the package profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageScenario {
    /// Create a package, look it up and confirm it.
    FullPackageWorkflow,
    /// Several creations in quick succession.
    PackageCreationBurst,
    /// Lookups by random, remembered and well-known order identifiers.
    PackageRetrieval,
    /// Creations confirmed immediately, and a confirmation of an unknown package.
    PackageConfirmation,
}

impl Scenario for PackageScenario {
    const DEFAULT_WEIGHTS: &'static [(Self, f64)] = &[
        (Self::FullPackageWorkflow, 40.0),
        (Self::PackageCreationBurst, 30.0),
        (Self::PackageRetrieval, 20.0),
        (Self::PackageConfirmation, 10.0),
    ];

    fn name(&self) -> &'static str {
        match self {
            PackageScenario::FullPackageWorkflow => "full_package_workflow",
            PackageScenario::PackageCreationBurst => "package_creation_burst",
            PackageScenario::PackageRetrieval => "package_retrieval",
            PackageScenario::PackageConfirmation => "package_confirmation",
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum RetrievalKind {
    Random,
    Existing,
    Pattern,
}

pub(crate) async fn iteration(
    context: &WorkloadContext,
    user: &mut VirtualUser,
    scenario: PackageScenario,
) -> anyhow::Result<()> {
    let start = Instant::now();
    let result = match scenario {
        PackageScenario::FullPackageWorkflow => full_workflow(context, user).await,
        PackageScenario::PackageCreationBurst => creation_burst(context, user).await,
        PackageScenario::PackageRetrieval => retrieval(context, user).await,
        PackageScenario::PackageConfirmation => confirmation(context, user).await,
    };
    context
        .sink
        .record_trend(PACKAGE_RESPONSE_TIME, duration_millis(start.elapsed()));
    result
}

/// Creates `payload`, recording the creation metrics; returns the response and whether it
/// passed its checks with a 200.
async fn create(
    context: &WorkloadContext,
    user: &VirtualUser,
    payload: &PackagePayload,
) -> (ApiResponse, bool) {
    context
        .sink
        .record_trend(AVERAGE_ITEMS_PER_PACKAGE, payload.items.len() as f64);
    let response = context.client.create_package(payload, user.options()).await;
    let success = context.validator.check_package_creation_response(&response);
    context.sink.record_rate(PACKAGE_CREATION_SUCCESS, success);
    let created = success && response.is_status(200);
    if created {
        context.sink.record_count(PACKAGES_CREATED_TOTAL, 1);
    }
    (response, created)
}

async fn retrieve(context: &WorkloadContext, user: &VirtualUser, order_id: &str, check: &str) {
    let response = context.client.package_by_order(order_id, user.options()).await;
    let success = context
        .validator
        .check_resource_response(&response, check, [200, 404]);
    context
        .sink
        .record_rate(PACKAGE_RETRIEVAL_SUCCESS, success && response.is_status(200));
}

async fn full_workflow(context: &WorkloadContext, user: &mut VirtualUser) -> anyhow::Result<()> {
    let payload = generate_package_payload(&context.test_data, user.rng())?;
    let (response, created) = create(context, user, &payload).await;
    if !created {
        return Ok(());
    }

    let package_id = parse_package_id(&response)?;
    let order_id = generate_order_id(user.rng());
    user.remember_order(order_id.clone());
    tracing::debug!(user = user.id(), %package_id, %order_id, "package created");

    context.pacer.think(Duration::from_secs(8), 30.0, user.rng()).await;
    retrieve(context, user, &order_id, "package-retrieval").await;

    context.pacer.think(Duration::from_secs(2), 25.0, user.rng()).await;
    let confirmed = context
        .client
        .confirm_package(&package_id, user.options())
        .await;
    let success = context
        .validator
        .check_resource_response(&confirmed, "package-confirmation", [200, 404]);
    context.sink.record_rate(
        PACKAGE_CONFIRMATION_SUCCESS,
        success && confirmed.is_status(200),
    );
    Ok(())
}

async fn creation_burst(context: &WorkloadContext, user: &mut VirtualUser) -> anyhow::Result<()> {
    let count = user.operation_count(2, 4);
    for index in 0..count {
        let mut payload = generate_package_payload(&context.test_data, user.rng())?;
        if user.chance(EXTRA_ITEMS_PROBABILITY) {
            add_extra_items(&mut payload, &context.test_data, user.rng())?;
        }
        create(context, user, &payload).await;

        if index + 1 < count {
            context.pacer.think(Duration::from_secs(1), 40.0, user.rng()).await;
        }
    }
    Ok(())
}

async fn retrieval(context: &WorkloadContext, user: &mut VirtualUser) -> anyhow::Result<()> {
    const KINDS: [RetrievalKind; 3] = [
        RetrievalKind::Random,
        RetrievalKind::Existing,
        RetrievalKind::Pattern,
    ];
    let count = user.operation_count(2, 4);

    for index in 0..count {
        match *random_element(&KINDS, user.rng())? {
            RetrievalKind::Random => {
                let order_id = generate_order_id(user.rng());
                retrieve(context, user, &order_id, "random-package-retrieval").await;
            }
            RetrievalKind::Existing => match user.remembered_order() {
                Some(order_id) => {
                    retrieve(context, user, &order_id, "existing-package-retrieval").await;
                }
                None => {
                    let order_id = format!("existing-{}", epoch_millis());
                    retrieve(context, user, &order_id, "fallback-package-retrieval").await;
                }
            },
            RetrievalKind::Pattern => {
                let order_id = *random_element(&ORDER_PATTERNS, user.rng())?;
                retrieve(context, user, order_id, "pattern-package-retrieval").await;
            }
        }

        if index + 1 < count {
            context.pacer.think(Duration::from_secs(1), 30.0, user.rng()).await;
        }
    }
    Ok(())
}

async fn confirmation(context: &WorkloadContext, user: &mut VirtualUser) -> anyhow::Result<()> {
    let rounds = user.operation_count(2, 3);
    for index in 0..rounds {
        let payload = generate_package_payload(&context.test_data, user.rng())?;
        let (response, created) = create(context, user, &payload).await;
        if created {
            let package_id = parse_package_id(&response)?;
            context.pacer.think(Duration::from_secs(3), 25.0, user.rng()).await;
            confirm(context, user, &package_id, "immediate-package-confirmation").await;
        }

        if index + 1 < rounds {
            context.pacer.think(Duration::from_secs(2), 30.0, user.rng()).await;
        }
    }

    let package_id = format!("random-pkg-{}", epoch_millis());
    confirm(context, user, &package_id, "random-package-confirmation").await;
    Ok(())
}

async fn confirm(context: &WorkloadContext, user: &VirtualUser, package_id: &str, check: &str) {
    let response = context
        .client
        .confirm_package(package_id, user.options())
        .await;
    let success = context
        .validator
        .check_resource_response(&response, check, [200, 404, 500]);
    context.sink.record_rate(
        PACKAGE_CONFIRMATION_SUCCESS,
        success && response.is_status(200),
    );
}

/// Creation, retrieval and latency probes.
pub(crate) async fn teardown(context: &WorkloadContext, user: &mut VirtualUser) -> Assessment {
    let mut assessment = Assessment::new("package system health");

    match generate_package_payload(&context.test_data, user.rng()) {
        Ok(payload) => {
            let created = context
                .client
                .create_package(&payload, RequestOptions::default().timeout(Duration::from_secs(10)))
                .await;
            if created.is_status(200) {
                context.sink.record_count(PACKAGES_CREATED_TOTAL, 1);
            }
            assessment.probe("package creation", created.is_status(200), describe(&created));
        }
        Err(error) => assessment.probe("package creation", false, error.to_string()),
    }

    let order_id = format!("health-check-{}", epoch_millis());
    let retrieved = context
        .client
        .package_by_order(&order_id, RequestOptions::default().timeout(Duration::from_secs(5)))
        .await;
    assessment.probe(
        "package retrieval",
        retrieved.is_status(200) || retrieved.is_status(404),
        describe(&retrieved),
    );

    let health = context
        .client
        .health(RequestOptions::default().timeout(Duration::from_secs(5)))
        .await;
    assessment.probe(
        "response time",
        health.is_status(200) && health.elapsed < Duration::from_secs(3),
        describe(&health),
    );

    assessment
}
