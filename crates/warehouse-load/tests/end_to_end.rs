// Copyright (c) Walrus Foundation
// SPDX-License-Identifier: Apache-2.0

//! Runs the client, validator and runner against a mock warehouse service.

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use rand::{SeedableRng, rngs::StdRng};
use serde_json::json;
use warehouse_load::{
    client::{RequestOptions, WarehouseClient},
    config::RunSettings,
    environment::Environment,
    generator::{PickConfirmationPayload, TestDataPool, generate_package_payload},
    metrics::MetricsSink,
    runner::{LoadTest, SetupError},
    stages::{Stage, StageSchedule},
    validator::{self, CHECKS, ResponseValidator, ValidationOptions},
    workload::{Grade, ProfileKind, load::PICK_CONFIRMATION_SUCCESS},
};
use wiremock::{
    Mock,
    MockServer,
    ResponseTemplate,
    matchers::{method, path, path_regex},
};

fn mock_environment(server: &MockServer) -> Environment {
    Environment {
        name: "mock".to_owned(),
        base_url: server.uri(),
        description: "Mock warehouse service".to_owned(),
    }
}

fn client_for(server: &MockServer, sink: &MetricsSink) -> WarehouseClient {
    WarehouseClient::new(mock_environment(server), Duration::from_secs(5), sink)
        .expect("client builds")
}

fn short_run(server: &MockServer, profile: ProfileKind) -> RunSettings {
    let mut settings =
        RunSettings::for_profile(profile, mock_environment(server)).expect("default settings");
    settings.stages = StageSchedule::new(vec![
        Stage::new(Duration::from_millis(100), 2),
        Stage::new(Duration::from_millis(600), 2),
    ])
    .expect("non-empty schedule");
    settings.think_time_scale = 0.0;
    settings.graceful_stop = Duration::from_secs(5);
    settings.seed = Some(17);
    settings
}

async fn mount_healthy_service(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/actuator/health"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "UP" })))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex("^/actuator/(info|metrics)$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "app": "warehouse" })))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/packages"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "packageId": "pkg-1", "status": "PENDING" })),
        )
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex("^/api/(packages|picklists)/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(server)
        .await;
}

#[tokio::test]
async fn healthy_service_passes_health_checks() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/actuator/health"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "UP" })))
        .mount(&server)
        .await;

    let sink = Arc::new(MetricsSink::new());
    let client = client_for(&server, &sink);
    let checker = ResponseValidator::new(sink.clone(), ValidationOptions::default());

    let response = client.health(RequestOptions::default()).await;
    assert!(checker.check_health_response(&response));

    let snapshot = sink.snapshot();
    assert_eq!(snapshot.rate(CHECKS), Some(1.0));
    assert_eq!(snapshot.counter("http_reqs"), Some(1));
    assert_eq!(snapshot.rate("http_req_failed"), Some(0.0));
}

#[tokio::test]
async fn service_reporting_down_fails_health_checks() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/actuator/health"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "status": "DOWN" }))
                .set_delay(Duration::from_millis(250)),
        )
        .mount(&server)
        .await;

    let sink = MetricsSink::new();
    let response = client_for(&server, &sink)
        .health(RequestOptions::default())
        .await;

    let checks = validator::health_checks(&response, Duration::from_secs(1));
    assert!(!checks.all_passed());
    assert_eq!(checks.passed("health - status is 200"), Some(true));
    assert_eq!(checks.passed("health - status is UP"), Some(false));
}

#[tokio::test]
async fn slow_health_response_fails_the_latency_check() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/actuator/health"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "status": "UP" }))
                .set_delay(Duration::from_millis(1100)),
        )
        .mount(&server)
        .await;

    let sink = MetricsSink::new();
    let response = client_for(&server, &sink)
        .health(RequestOptions::default())
        .await;

    let checks = validator::health_checks(&response, Duration::from_secs(1));
    assert!(!checks.all_passed());
    assert_eq!(checks.passed("health - status is 200"), Some(true));
    assert_eq!(checks.passed("health - status is UP"), Some(true));
}

#[tokio::test]
async fn package_creation_requires_a_known_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/packages"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "UNKNOWN" })))
        .mount(&server)
        .await;

    let sink = Arc::new(MetricsSink::new());
    let client = client_for(&server, &sink);
    let checker = ResponseValidator::new(sink.clone(), ValidationOptions::default());
    let payload = generate_package_payload(&TestDataPool::default(), &mut StdRng::seed_from_u64(3))
        .expect("default pool is not empty");

    let response = client
        .create_package(&payload, RequestOptions::default())
        .await;
    assert!(!checker.check_package_creation_response(&response));

    let checks = validator::package_creation_checks(&response, &ValidationOptions::default());
    assert_eq!(checks.passed("package-creation - status is 200"), Some(true));
    assert_eq!(checks.passed("package-creation - has packageId"), Some(false));
    assert_eq!(checks.passed("package-creation - has status"), Some(false));
}

#[tokio::test]
async fn missing_pick_list_fails_the_confirmation() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/actuator/health"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "UP" })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex("^/api/picklists/picker/[^/]+/next$"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex("^/api/picklists/"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path_regex("^/api/picklists/[^/]+/confirm-pick$"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1..)
        .mount(&server)
        .await;

    let mut settings = short_run(&server, ProfileKind::Load);
    settings.scenario_weights = BTreeMap::from([
        ("package_workflow".to_owned(), 0.0),
        ("monitoring_check".to_owned(), 0.0),
        ("mixed_operations".to_owned(), 0.0),
    ]);
    let report = LoadTest::new(settings)
        .expect("valid settings")
        .run()
        .await
        .expect("setup succeeds");

    let (passes, fails) = report
        .metrics
        .rate_counts(PICK_CONFIRMATION_SUCCESS)
        .expect("confirmations were recorded");
    assert_eq!(passes, 0);
    assert!(fails > 0);
    assert!(!report.passed());

    let requests = server.received_requests().await.expect("recording enabled");
    let confirmation = requests
        .iter()
        .find(|request| request.url.path().ends_with("/confirm-pick"))
        .expect("a confirmation was sent");
    let payload: PickConfirmationPayload =
        serde_json::from_slice(&confirmation.body).expect("confirmation payload");
    assert!((1..=3).contains(&payload.quantity));
}

#[tokio::test]
async fn unhealthy_service_fails_setup_without_traffic() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/actuator/health"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/packages"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let load_test = LoadTest::new(short_run(&server, ProfileKind::Smoke)).expect("valid settings");
    let error = load_test.run().await.expect_err("setup must fail");
    assert!(matches!(
        error.downcast_ref::<SetupError>(),
        Some(SetupError::Unhealthy { status: 503, .. })
    ));
}

#[tokio::test]
async fn short_smoke_run_meets_its_thresholds() {
    let server = MockServer::start().await;
    mount_healthy_service(&server).await;

    let report = LoadTest::new(short_run(&server, ProfileKind::Smoke))
        .expect("valid settings")
        .run()
        .await
        .expect("run completes");

    assert!(report.passed(), "{:?}", report.thresholds);
    assert_eq!(report.exit_code(), 0);
    assert!(report.assessment.is_none());
    assert!(report.metrics.counter("iterations").is_some_and(|count| count > 0));
    assert_eq!(report.metrics.rate(CHECKS), Some(1.0));
}

#[tokio::test]
async fn failing_service_breaches_thresholds() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/actuator/health"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "UP" })))
        .mount(&server)
        .await;
    Mock::given(path_regex("^/api/"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    Mock::given(path_regex("^/actuator/(info|metrics)$"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let report = LoadTest::new(short_run(&server, ProfileKind::Package))
        .expect("valid settings")
        .run()
        .await
        .expect("run completes");

    assert!(!report.passed());
    assert_eq!(
        report.exit_code(),
        warehouse_load::THRESHOLD_FAILED_EXIT_CODE
    );
    // Only the health probe passes.
    let assessment = report.assessment.expect("the package profile has a teardown");
    assert_eq!(assessment.assessment.passed(), 1);
    assert_eq!(assessment.grade, Grade::NeedsAttention);
}
