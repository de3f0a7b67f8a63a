// Copyright (c) Walrus Foundation
// SPDX-License-Identifier: Apache-2.0

//! Named checks over API responses.
//!
//! The `*_checks` functions are pure: they evaluate a response into a list of named boolean
//! [`Check`]s. The [`ResponseValidator`] runs them, reports every check into the metrics sink and
//! returns whether all of them passed.

use std::{
    fmt::{self, Display},
    sync::Arc,
    time::Duration,
};

use serde::{Deserialize, Serialize};
use warehouse_load_utils::config::humantime_duration;

use crate::{
    client::ApiResponse,
    metrics::{MetricKey, MetricsSink},
};

/// Name of the rate every check is recorded in.
pub const CHECKS: &str = "checks";
/// Tag key of the per-check sub-series of [`CHECKS`].
pub const CHECK_TAG: &str = "check";

const JSON_CONTENT_TYPE: &str = "application/json";
const CREATED_PACKAGE_STATUSES: [&str; 2] = ["PENDING", "CONFIRMED"];

/// Ways a response body can fail to have the expected shape.
#[derive(Debug, thiserror::Error)]
pub enum BodyShapeError {
    /// The response has no body.
    #[error("the response has no body")]
    Missing,
    /// The body is not valid JSON of the expected shape.
    #[error("malformed body: {0}")]
    Malformed(#[from] serde_json::Error),
    /// The body is JSON `null`.
    #[error("the body is null")]
    Null,
    /// A required field is absent or empty.
    #[error("field {0} is missing or empty")]
    MissingField(&'static str),
    /// A field has a value outside the accepted set.
    #[error("field {field} has unexpected value {value:?}")]
    UnexpectedValue {
        /// The field name.
        field: &'static str,
        /// The value found.
        value: String,
    },
}

/// The HTTP statuses a step accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusSet(Vec<u16>);

impl StatusSet {
    /// Whether `status` is accepted.
    pub fn contains(&self, status: u16) -> bool {
        self.0.contains(&status)
    }

    /// Whether the set accepts exactly `status` and nothing else.
    pub fn is_exactly(&self, status: u16) -> bool {
        self.0 == [status]
    }
}

impl From<u16> for StatusSet {
    fn from(status: u16) -> Self {
        Self(vec![status])
    }
}

impl<const N: usize> From<[u16; N]> for StatusSet {
    fn from(statuses: [u16; N]) -> Self {
        Self(statuses.to_vec())
    }
}

impl From<&[u16]> for StatusSet {
    fn from(statuses: &[u16]) -> Self {
        Self(statuses.to_vec())
    }
}

impl Display for StatusSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let statuses: Vec<String> = self.0.iter().map(u16::to_string).collect();
        f.write_str(&statuses.join(","))
    }
}

/// One named boolean predicate over a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Check {
    /// The name the check is reported under.
    pub name: String,
    /// Whether the predicate held.
    pub passed: bool,
}

/// The checks evaluated for one response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckResults {
    checks: Vec<Check>,
}

impl CheckResults {
    /// Adds a check.
    pub fn push(&mut self, name: impl Into<String>, passed: bool) {
        self.checks.push(Check {
            name: name.into(),
            passed,
        });
    }

    /// Whether every check passed.
    pub fn all_passed(&self) -> bool {
        self.checks.iter().all(|check| check.passed)
    }

    /// The checks in evaluation order.
    pub fn iter(&self) -> impl Iterator<Item = &Check> {
        self.checks.iter()
    }

    /// Whether the check `name` was evaluated and passed.
    pub fn passed(&self, name: &str) -> Option<bool> {
        self.checks
            .iter()
            .find(|check| check.name == name)
            .map(|check| check.passed)
    }
}

/// Latency bounds applied by the validator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct ValidationOptions {
    /// Upper bound for the response time of API calls.
    #[serde(with = "humantime_duration")]
    pub max_latency: Duration,
    /// Upper bound for the response time of health checks.
    #[serde(with = "humantime_duration")]
    pub health_max_latency: Duration,
}

impl Default for ValidationOptions {
    fn default() -> Self {
        Self {
            max_latency: Duration::from_secs(5),
            health_max_latency: Duration::from_secs(1),
        }
    }
}

/// Body of the health endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HealthStatus {
    /// `UP` when the service is healthy.
    pub status: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PackageCreationBody {
    package_id: Option<String>,
    status: Option<String>,
}

/// A package the service reports as created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedPackage {
    /// Identifier assigned by the service.
    pub package_id: String,
    /// Initial status, `PENDING` or `CONFIRMED`.
    pub status: String,
}

/// Parses the body of a health response.
pub fn parse_health(response: &ApiResponse) -> Result<HealthStatus, BodyShapeError> {
    response.json()
}

/// Parses the id of a created package, without checking its status.
pub fn parse_package_id(response: &ApiResponse) -> Result<String, BodyShapeError> {
    let body: PackageCreationBody = response.json()?;
    non_empty_package_id(body.package_id)
}

fn non_empty_package_id(package_id: Option<String>) -> Result<String, BodyShapeError> {
    package_id
        .filter(|id| !id.is_empty())
        .ok_or(BodyShapeError::MissingField("packageId"))
}

/// Parses and validates the body of a package creation response.
pub fn parse_created_package(response: &ApiResponse) -> Result<CreatedPackage, BodyShapeError> {
    let body: PackageCreationBody = response.json()?;
    let package_id = non_empty_package_id(body.package_id)?;
    let status = body.status.ok_or(BodyShapeError::MissingField("status"))?;
    if !CREATED_PACKAGE_STATUSES.contains(&status.as_str()) {
        return Err(BodyShapeError::UnexpectedValue {
            field: "status",
            value: status,
        });
    }
    Ok(CreatedPackage { package_id, status })
}

/// Parses a list or detail body, which must not be `null`.
pub fn parse_resource(response: &ApiResponse) -> Result<serde_json::Value, BodyShapeError> {
    match response.json()? {
        serde_json::Value::Null => Err(BodyShapeError::Null),
        value => Ok(value),
    }
}

fn latency_label(bound: Duration) -> humantime::FormattedDuration {
    humantime::format_duration(bound)
}

/// Whether a response arrived in less than `bound`.
pub fn responded_within(response: &ApiResponse, bound: Duration) -> bool {
    response.status.is_some() && response.elapsed < bound
}

/// The base checks of an API call: status, latency and, for plain 200 responses that declare a
/// content type, JSON content.
pub fn api_checks(
    endpoint: &str,
    response: &ApiResponse,
    expected: &StatusSet,
    max_latency: Duration,
) -> CheckResults {
    let mut results = CheckResults::default();
    results.push(
        format!("{endpoint} - status is {expected}"),
        response
            .status_code()
            .is_some_and(|status| expected.contains(status)),
    );
    results.push(
        format!("{endpoint} - response time < {}", latency_label(max_latency)),
        responded_within(response, max_latency),
    );
    if expected.is_exactly(200) {
        if let Some(content_type) = &response.content_type {
            results.push(
                format!("{endpoint} - content type is JSON"),
                content_type.contains(JSON_CONTENT_TYPE),
            );
        }
    }
    results
}

/// Checks of the health endpoint: status 200, latency and an `UP` status in the body.
pub fn health_checks(response: &ApiResponse, max_latency: Duration) -> CheckResults {
    let mut results = CheckResults::default();
    results.push("health - status is 200", response.is_status(200));
    results.push(
        format!("health - response time < {}", latency_label(max_latency)),
        responded_within(response, max_latency),
    );
    results.push(
        "health - status is UP",
        parse_health(response).is_ok_and(|health| health.status == "UP"),
    );
    results
}

/// The base checks for a 200 plus, on a 200, the shape of the created package.
pub fn package_creation_checks(
    response: &ApiResponse,
    options: &ValidationOptions,
) -> CheckResults {
    let mut results = api_checks(
        "package-creation",
        response,
        &StatusSet::from(200),
        options.max_latency,
    );
    if response.is_status(200) {
        let body: Result<PackageCreationBody, _> = response.json();
        let body = body.as_ref().ok();
        results.push(
            "package-creation - has packageId",
            body.and_then(|body| body.package_id.as_deref())
                .is_some_and(|id| !id.is_empty()),
        );
        results.push(
            "package-creation - has status",
            body.and_then(|body| body.status.as_deref())
                .is_some_and(|status| CREATED_PACKAGE_STATUSES.contains(&status)),
        );
    }
    results
}

/// The base checks for a list or detail lookup plus, on a 200, a non-null JSON body.
pub fn resource_checks(
    endpoint: &str,
    response: &ApiResponse,
    expected: &StatusSet,
    options: &ValidationOptions,
) -> CheckResults {
    let mut results = api_checks(endpoint, response, expected, options.max_latency);
    if response.is_status(200) {
        results.push(
            format!("{endpoint} - response is valid"),
            parse_resource(response).is_ok(),
        );
    }
    results
}

/// Checks tolerated by a service under extreme load: no server error other than 503, a response
/// at all, and a response within `bound`.
pub fn degraded_checks(operation: &str, response: &ApiResponse, bound: Duration) -> CheckResults {
    let mut results = CheckResults::default();
    results.push(
        format!("{operation} - not server error"),
        response
            .status_code()
            .is_some_and(|status| status < 500 || status == 503),
    );
    results.push(
        format!("{operation} - response received"),
        response.status.is_some(),
    );
    results.push(
        format!("{operation} - reasonable timeout"),
        responded_within(response, bound),
    );
    results
}

/// Evaluates checks and reports them into the metrics sink.
#[derive(Debug, Clone)]
pub struct ResponseValidator {
    sink: Arc<MetricsSink>,
    options: ValidationOptions,
}

impl ResponseValidator {
    /// Creates a validator reporting into `sink`.
    pub fn new(sink: Arc<MetricsSink>, options: ValidationOptions) -> Self {
        Self { sink, options }
    }

    /// The latency bounds in use.
    pub fn options(&self) -> &ValidationOptions {
        &self.options
    }

    /// Reports every check of `results` and returns whether all passed.
    pub fn check(&self, results: CheckResults) -> bool {
        for check in results.iter() {
            self.sink.record_rate(CHECKS, check.passed);
            self.sink.record_rate(
                MetricKey::tagged(CHECKS, CHECK_TAG, check.name.as_str()),
                check.passed,
            );
            if !check.passed {
                tracing::debug!(check = %check.name, "check failed");
            }
        }
        results.all_passed()
    }

    /// See [`api_checks`].
    pub fn check_api_response(
        &self,
        response: &ApiResponse,
        endpoint: &str,
        expected: impl Into<StatusSet>,
    ) -> bool {
        self.check(api_checks(
            endpoint,
            response,
            &expected.into(),
            self.options.max_latency,
        ))
    }

    /// See [`health_checks`].
    pub fn check_health_response(&self, response: &ApiResponse) -> bool {
        self.check(health_checks(response, self.options.health_max_latency))
    }

    /// See [`package_creation_checks`].
    pub fn check_package_creation_response(&self, response: &ApiResponse) -> bool {
        self.check(package_creation_checks(response, &self.options))
    }

    /// See [`resource_checks`].
    pub fn check_resource_response(
        &self,
        response: &ApiResponse,
        endpoint: &str,
        expected: impl Into<StatusSet>,
    ) -> bool {
        self.check(resource_checks(
            endpoint,
            response,
            &expected.into(),
            &self.options,
        ))
    }

    /// See [`degraded_checks`].
    pub fn check_degraded_response(
        &self,
        response: &ApiResponse,
        operation: &str,
        bound: Duration,
    ) -> bool {
        self.check(degraded_checks(operation, response, bound))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Endpoint;

    fn ok_json(body: &str) -> ApiResponse {
        ApiResponse::with_status(Endpoint::Packages, 200, Duration::from_millis(120))
            .with_content_type("application/json")
            .with_body(body)
    }

    #[test]
    fn status_sets_display_like_their_check_names() {
        assert_eq!(StatusSet::from(200).to_string(), "200");
        assert_eq!(StatusSet::from([200, 204, 404]).to_string(), "200,204,404");
        assert!(StatusSet::from(200).is_exactly(200));
        assert!(!StatusSet::from([200, 404]).is_exactly(200));
    }

    #[test]
    fn not_found_passes_when_enumerated() {
        let response = ApiResponse::with_status(Endpoint::Packages, 404, Duration::from_millis(30));
        let results = api_checks(
            "package-retrieval",
            &response,
            &StatusSet::from([200, 404]),
            Duration::from_secs(5),
        );
        assert!(results.all_passed());
        assert_eq!(
            results.passed("package-retrieval - status is 200,404"),
            Some(true)
        );
        assert_eq!(results.iter().count(), 2);
    }

    #[test]
    fn content_type_is_only_checked_for_plain_ok_with_header() {
        let without_header =
            ApiResponse::with_status(Endpoint::Info, 200, Duration::from_millis(10));
        let results = api_checks(
            "info",
            &without_header,
            &StatusSet::from(200),
            Duration::from_secs(5),
        );
        assert!(results.all_passed());
        assert_eq!(results.passed("info - content type is JSON"), None);

        let html = without_header.clone().with_content_type("text/html");
        let results = api_checks("info", &html, &StatusSet::from(200), Duration::from_secs(5));
        assert_eq!(results.passed("info - content type is JSON"), Some(false));

        let widened = api_checks(
            "info",
            &html,
            &StatusSet::from([200, 404]),
            Duration::from_secs(5),
        );
        assert!(widened.all_passed());
    }

    #[test]
    fn slow_responses_fail_the_latency_check() {
        let slow = ApiResponse::with_status(Endpoint::Packages, 200, Duration::from_millis(5_200));
        let results = api_checks(
            "package-creation",
            &slow,
            &StatusSet::from(200),
            Duration::from_secs(5),
        );
        assert_eq!(
            results.passed("package-creation - response time < 5s"),
            Some(false)
        );
    }

    #[test]
    fn health_up_passes_and_down_fails() {
        let up = ApiResponse::with_status(Endpoint::Health, 200, Duration::from_millis(40))
            .with_body(r#"{"status":"UP"}"#);
        assert!(health_checks(&up, Duration::from_secs(1)).all_passed());

        let down = ApiResponse::with_status(Endpoint::Health, 200, Duration::from_millis(250))
            .with_body(r#"{"status":"DOWN"}"#);
        let results = health_checks(&down, Duration::from_secs(1));
        assert_eq!(results.passed("health - status is 200"), Some(true));
        assert_eq!(results.passed("health - response time < 1s"), Some(true));
        assert_eq!(results.passed("health - status is UP"), Some(false));
        assert!(!results.all_passed());
    }

    #[test]
    fn package_creation_requires_id_and_known_status() {
        let options = ValidationOptions::default();

        let created = ok_json(r#"{"packageId":"pkg-1","status":"PENDING"}"#);
        assert!(package_creation_checks(&created, &options).all_passed());
        let package = parse_created_package(&created).expect("valid body");
        assert_eq!(package.package_id, "pkg-1");
        assert_eq!(package.status, "PENDING");

        let unknown = ok_json(r#"{"status":"UNKNOWN"}"#);
        let results = package_creation_checks(&unknown, &options);
        assert_eq!(
            results.passed("package-creation - has packageId"),
            Some(false)
        );
        assert_eq!(results.passed("package-creation - has status"), Some(false));
        assert!(!results.all_passed());

        let empty_id = ok_json(r#"{"packageId":"","status":"CONFIRMED"}"#);
        assert!(!package_creation_checks(&empty_id, &options).all_passed());
    }

    #[test]
    fn unparsable_bodies_fail_without_panicking() {
        let options = ValidationOptions::default();
        let garbage = ok_json("<html>oops</html>");
        assert!(!package_creation_checks(&garbage, &options).all_passed());
        assert!(matches!(
            parse_created_package(&garbage),
            Err(BodyShapeError::Malformed(_))
        ));

        let empty = ApiResponse::with_status(Endpoint::Health, 200, Duration::from_millis(5));
        assert!(matches!(parse_health(&empty), Err(BodyShapeError::Missing)));
        assert!(!health_checks(&empty, Duration::from_secs(1)).all_passed());
    }

    #[test]
    fn package_checks_skip_body_when_not_ok() {
        let rejected = ApiResponse::with_status(Endpoint::Packages, 400, Duration::from_millis(5));
        let results = package_creation_checks(&rejected, &ValidationOptions::default());
        assert_eq!(results.passed("package-creation - has packageId"), None);
        assert!(!results.all_passed());
    }

    #[test]
    fn resource_bodies_must_not_be_null() {
        let options = ValidationOptions::default();
        let expected = StatusSet::from([200, 404]);

        let list = ok_json("[]");
        assert!(resource_checks("picklist-status", &list, &expected, &options).all_passed());

        let null = ok_json("null");
        let results = resource_checks("picklist-status", &null, &expected, &options);
        assert_eq!(
            results.passed("picklist-status - response is valid"),
            Some(false)
        );
        assert!(matches!(parse_resource(&null), Err(BodyShapeError::Null)));
    }

    #[test]
    fn degraded_checks_tolerate_unavailable() {
        let bound = Duration::from_secs(20);
        let unavailable =
            ApiResponse::with_status(Endpoint::Packages, 503, Duration::from_millis(900));
        assert!(degraded_checks("stress-create", &unavailable, bound).all_passed());

        let internal = ApiResponse::with_status(Endpoint::Packages, 500, Duration::from_millis(900));
        let results = degraded_checks("stress-create", &internal, bound);
        assert_eq!(
            results.passed("stress-create - not server error"),
            Some(false)
        );
        assert_eq!(results.passed("stress-create - response received"), Some(true));

        let timed_out =
            ApiResponse::no_response(Endpoint::Packages, Duration::from_secs(20), "timed out");
        let results = degraded_checks("stress-create", &timed_out, bound);
        assert_eq!(
            results.passed("stress-create - response received"),
            Some(false)
        );
        assert_eq!(
            results.passed("stress-create - reasonable timeout"),
            Some(false)
        );
    }

    #[test]
    fn validator_reports_each_check() {
        let sink = Arc::new(MetricsSink::new());
        let validator = ResponseValidator::new(sink.clone(), ValidationOptions::default());

        let down = ApiResponse::with_status(Endpoint::Health, 200, Duration::from_millis(10))
            .with_body(r#"{"status":"DOWN"}"#);
        assert!(!validator.check_health_response(&down));

        let snapshot = sink.snapshot();
        assert_eq!(snapshot.rate_counts(CHECKS), Some((2, 1)));
        let up_check = MetricKey::tagged(CHECKS, CHECK_TAG, "health - status is UP");
        assert!(matches!(
            snapshot.get(&up_check),
            Some(crate::metrics::MetricSummary::Rate {
                passes: 0,
                fails: 1,
                ..
            })
        ));
    }
}
