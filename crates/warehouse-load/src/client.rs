// Copyright (c) Walrus Foundation
// SPDX-License-Identifier: Apache-2.0

//! HTTP client for the warehouse-operations API.

use std::{
    collections::HashMap,
    fmt::{self, Display},
    sync::Arc,
    time::{Duration, Instant},
};

use anyhow::Context;
use reqwest::{
    Method,
    RequestBuilder,
    StatusCode,
    header::{self, HeaderMap, HeaderValue},
};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::{
    environment::Environment,
    generator::{PackagePayload, PickConfirmationPayload},
    metrics::{Counter, MetricKey, MetricsError, MetricsSink, Rate, Trend},
    stages::Phase,
    validator::BodyShapeError,
};

/// The user agent sent with every request.
pub const USER_AGENT: &str = concat!("warehouse-load/", env!("CARGO_PKG_VERSION"));
/// Timeout of requests without a per-call override.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Number of requests issued.
pub const HTTP_REQS: &str = "http_reqs";
/// Duration of requests in milliseconds.
pub const HTTP_REQ_DURATION: &str = "http_req_duration";
/// Share of requests without a response or with a status of 400 or above.
pub const HTTP_REQ_FAILED: &str = "http_req_failed";
/// Tag key of the per-endpoint request series.
pub const ENDPOINT_TAG: &str = "endpoint";
/// Tag key of the per-phase request series.
pub const PHASE_TAG: &str = "phase";

/// The endpoint groups requests are tagged with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// `/actuator/health`.
    Health,
    /// `/actuator/info`.
    Info,
    /// `/actuator/metrics`.
    Metrics,
    /// `/api/packages/**`.
    Packages,
    /// `/api/picklists/**`.
    Picklists,
}

impl Endpoint {
    /// All endpoint groups.
    pub const ALL: [Endpoint; 5] = [
        Self::Health,
        Self::Info,
        Self::Metrics,
        Self::Packages,
        Self::Picklists,
    ];

    /// The tag value of the endpoint group.
    pub fn as_str(&self) -> &'static str {
        match self {
            Endpoint::Health => "health",
            Endpoint::Info => "info",
            Endpoint::Metrics => "metrics",
            Endpoint::Packages => "packages",
            Endpoint::Picklists => "picklists",
        }
    }
}

impl Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pick-list statuses that can be queried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PickListStatus {
    /// Not yet started.
    Pending,
    /// Being picked.
    InProgress,
    /// Fully picked.
    Completed,
}

impl PickListStatus {
    /// All statuses.
    pub const ALL: [PickListStatus; 3] = [Self::Pending, Self::InProgress, Self::Completed];

    /// The path segment of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            PickListStatus::Pending => "PENDING",
            PickListStatus::InProgress => "IN_PROGRESS",
            PickListStatus::Completed => "COMPLETED",
        }
    }
}

impl Display for PickListStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The outcome of one request. Transport failures and timeouts are represented as a response
/// without status.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    /// The endpoint group of the request.
    pub endpoint: Endpoint,
    /// The HTTP status, if a response arrived.
    pub status: Option<StatusCode>,
    /// Time from sending the request to receiving the full body.
    pub elapsed: Duration,
    /// The declared content type.
    pub content_type: Option<String>,
    /// The response body.
    pub body: Option<String>,
    /// Why no (complete) response was received.
    pub error: Option<String>,
}

impl ApiResponse {
    /// A response with the given status and no body.
    pub fn with_status(endpoint: Endpoint, status: u16, elapsed: Duration) -> Self {
        Self {
            endpoint,
            status: StatusCode::from_u16(status).ok(),
            elapsed,
            content_type: None,
            body: None,
            error: None,
        }
    }

    /// A request that failed before a response arrived.
    pub fn no_response(endpoint: Endpoint, elapsed: Duration, error: impl Into<String>) -> Self {
        Self {
            endpoint,
            status: None,
            elapsed,
            content_type: None,
            body: None,
            error: Some(error.into()),
        }
    }

    /// Sets the body.
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Sets the content type.
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// The numeric status, if a response arrived.
    pub fn status_code(&self) -> Option<u16> {
        self.status.map(|status| status.as_u16())
    }

    /// Whether the response has exactly `status`.
    pub fn is_status(&self, status: u16) -> bool {
        self.status_code() == Some(status)
    }

    /// Whether the request counts as failed: no response or a status of 400 or above.
    pub fn is_failed(&self) -> bool {
        self.status_code().is_none_or(|status| status >= 400)
    }

    /// Whether a non-empty body was received.
    pub fn has_body(&self) -> bool {
        self.body.as_deref().is_some_and(|body| !body.is_empty())
    }

    /// Deserializes the JSON body.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, BodyShapeError> {
        let body = self.body.as_deref().ok_or(BodyShapeError::Missing)?;
        Ok(serde_json::from_str(body)?)
    }
}

/// Per-call request options.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestOptions {
    timeout: Option<Duration>,
    phase: Option<Phase>,
}

impl RequestOptions {
    /// Overrides the client's default timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Records the request under the given phase in addition to the overall series.
    pub fn phase(mut self, phase: Option<Phase>) -> Self {
        self.phase = phase;
        self
    }
}

#[derive(Debug, Clone)]
struct RequestSeries {
    reqs: Counter,
    duration: Trend,
    failed: Rate,
}

impl RequestSeries {
    fn declare(sink: &MetricsSink, tag: Option<(&str, &str)>) -> Result<Self, MetricsError> {
        let key = |name: &str| match tag {
            Some((tag, value)) => MetricKey::tagged(name, tag, value),
            None => MetricKey::new(name),
        };
        Ok(Self {
            reqs: sink.counter(key(HTTP_REQS))?,
            duration: sink.trend(key(HTTP_REQ_DURATION))?,
            failed: sink.rate(key(HTTP_REQ_FAILED))?,
        })
    }

    fn record(&self, response: &ApiResponse) {
        self.reqs.inc();
        self.duration.add_duration(response.elapsed);
        self.failed.add(response.is_failed());
    }
}

/// The built-in request metrics, recorded for every call.
#[derive(Debug, Clone)]
pub struct RequestMetrics {
    overall: RequestSeries,
    by_endpoint: HashMap<Endpoint, RequestSeries>,
    by_phase: HashMap<Phase, RequestSeries>,
}

impl RequestMetrics {
    /// Declares the overall, per-endpoint and per-phase request series in `sink`.
    pub fn new(sink: &MetricsSink) -> Result<Self, MetricsError> {
        let by_endpoint = Endpoint::ALL
            .into_iter()
            .map(|endpoint| {
                RequestSeries::declare(sink, Some((ENDPOINT_TAG, endpoint.as_str())))
                    .map(|series| (endpoint, series))
            })
            .collect::<Result<_, _>>()?;
        let by_phase = Phase::ALL
            .into_iter()
            .map(|phase| {
                RequestSeries::declare(sink, Some((PHASE_TAG, phase.as_str())))
                    .map(|series| (phase, series))
            })
            .collect::<Result<_, _>>()?;
        Ok(Self {
            overall: RequestSeries::declare(sink, None)?,
            by_endpoint,
            by_phase,
        })
    }

    fn record(&self, response: &ApiResponse, phase: Option<Phase>) {
        self.overall.record(response);
        if let Some(series) = self.by_endpoint.get(&response.endpoint) {
            series.record(response);
        }
        if let Some(series) = phase.and_then(|phase| self.by_phase.get(&phase)) {
            series.record(response);
        }
    }
}

/// Client for the warehouse-operations API of one environment.
#[derive(Debug, Clone)]
pub struct WarehouseClient {
    http: reqwest::Client,
    environment: Arc<Environment>,
    metrics: RequestMetrics,
}

impl WarehouseClient {
    /// Creates a client for `environment` recording request metrics into `sink`.
    #[tracing::instrument(err, skip_all, fields(base_url = %environment.base_url))]
    pub fn new(
        environment: Environment,
        timeout: Duration,
        sink: &MetricsSink,
    ) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        headers.insert(header::ACCEPT, HeaderValue::from_static("application/json"));

        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .context("failed to build the HTTP client")?;

        Ok(Self {
            http,
            environment: Arc::new(environment),
            metrics: RequestMetrics::new(sink).context("failed to declare request metrics")?,
        })
    }

    /// The environment requests are sent to.
    pub fn environment(&self) -> &Environment {
        &self.environment
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http.request(method, self.environment.url(path))
    }

    /// `GET /actuator/health`.
    pub async fn health(&self, options: RequestOptions) -> ApiResponse {
        let request = self.request(Method::GET, "/actuator/health");
        self.execute(request, Endpoint::Health, options).await
    }

    /// `GET /actuator/info`.
    pub async fn info(&self, options: RequestOptions) -> ApiResponse {
        let request = self.request(Method::GET, "/actuator/info");
        self.execute(request, Endpoint::Info, options).await
    }

    /// `GET /actuator/metrics`.
    pub async fn actuator_metrics(&self, options: RequestOptions) -> ApiResponse {
        let request = self.request(Method::GET, "/actuator/metrics");
        self.execute(request, Endpoint::Metrics, options).await
    }

    /// `POST /api/packages`.
    pub async fn create_package(
        &self,
        payload: &PackagePayload,
        options: RequestOptions,
    ) -> ApiResponse {
        let request = self.request(Method::POST, "/api/packages").json(payload);
        self.execute(request, Endpoint::Packages, options).await
    }

    /// `GET /api/packages/order/{order_id}`.
    pub async fn package_by_order(&self, order_id: &str, options: RequestOptions) -> ApiResponse {
        let path = format!("/api/packages/order/{}", urlencoding::encode(order_id));
        let request = self.request(Method::GET, &path);
        self.execute(request, Endpoint::Packages, options).await
    }

    /// `PATCH /api/packages/{package_id}/confirm`.
    pub async fn confirm_package(&self, package_id: &str, options: RequestOptions) -> ApiResponse {
        let path = format!("/api/packages/{}/confirm", urlencoding::encode(package_id));
        let request = self.request(Method::PATCH, &path);
        self.execute(request, Endpoint::Packages, options).await
    }

    /// `GET /api/picklists/picker/{picker_id}/next`.
    pub async fn next_pick_list(&self, picker_id: &str, options: RequestOptions) -> ApiResponse {
        let path = format!("/api/picklists/picker/{}/next", urlencoding::encode(picker_id));
        let request = self.request(Method::GET, &path);
        self.execute(request, Endpoint::Picklists, options).await
    }

    /// `GET /api/picklists/picker/{picker_id}`.
    pub async fn pick_lists_for_picker(
        &self,
        picker_id: &str,
        options: RequestOptions,
    ) -> ApiResponse {
        let path = format!("/api/picklists/picker/{}", urlencoding::encode(picker_id));
        let request = self.request(Method::GET, &path);
        self.execute(request, Endpoint::Picklists, options).await
    }

    /// `GET /api/picklists/status/{status}`.
    pub async fn pick_lists_by_status(
        &self,
        status: PickListStatus,
        options: RequestOptions,
    ) -> ApiResponse {
        let path = format!("/api/picklists/status/{status}");
        let request = self.request(Method::GET, &path);
        self.execute(request, Endpoint::Picklists, options).await
    }

    /// `POST /api/picklists/{pick_list_id}/confirm-pick`.
    pub async fn confirm_pick(
        &self,
        pick_list_id: &str,
        payload: &PickConfirmationPayload,
        options: RequestOptions,
    ) -> ApiResponse {
        let path = format!(
            "/api/picklists/{}/confirm-pick",
            urlencoding::encode(pick_list_id)
        );
        let request = self.request(Method::POST, &path).json(payload);
        self.execute(request, Endpoint::Picklists, options).await
    }

    async fn execute(
        &self,
        request: RequestBuilder,
        endpoint: Endpoint,
        options: RequestOptions,
    ) -> ApiResponse {
        let request = match options.timeout {
            Some(timeout) => request.timeout(timeout),
            None => request,
        };

        let start = Instant::now();
        let response = match request.send().await {
            Ok(response) => {
                let status = response.status();
                let content_type = response
                    .headers()
                    .get(header::CONTENT_TYPE)
                    .and_then(|value| value.to_str().ok())
                    .map(str::to_owned);
                let (body, error) = match response.text().await {
                    Ok(body) => (Some(body), None),
                    Err(error) => (None, Some(error.to_string())),
                };
                ApiResponse {
                    endpoint,
                    status: Some(status),
                    elapsed: start.elapsed(),
                    content_type,
                    body,
                    error,
                }
            }
            Err(error) => ApiResponse::no_response(endpoint, start.elapsed(), error.to_string()),
        };

        self.metrics.record(&response, options.phase);
        match &response.error {
            None => tracing::debug!(
                %endpoint,
                status = ?response.status_code(),
                elapsed = ?response.elapsed,
                "request completed"
            ),
            Some(error) => tracing::debug!(
                %endpoint,
                status = ?response.status_code(),
                elapsed = ?response.elapsed,
                %error,
                "request failed"
            ),
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use wiremock::{
        Mock,
        MockServer,
        ResponseTemplate,
        matchers::{body_json, header, method, path},
    };

    use super::*;
    use crate::environment::EnvironmentRegistry;

    fn client_for(server: &MockServer, sink: &MetricsSink) -> WarehouseClient {
        let environment = EnvironmentRegistry::default()
            .resolve(None)
            .with_base_url(&server.uri());
        WarehouseClient::new(environment, DEFAULT_REQUEST_TIMEOUT, sink).expect("valid client")
    }

    #[test]
    fn failed_means_no_response_or_client_or_server_error() {
        let elapsed = Duration::from_millis(1);
        assert!(!ApiResponse::with_status(Endpoint::Health, 200, elapsed).is_failed());
        assert!(!ApiResponse::with_status(Endpoint::Picklists, 204, elapsed).is_failed());
        assert!(ApiResponse::with_status(Endpoint::Picklists, 404, elapsed).is_failed());
        assert!(ApiResponse::with_status(Endpoint::Packages, 503, elapsed).is_failed());
        assert!(ApiResponse::no_response(Endpoint::Packages, elapsed, "refused").is_failed());
    }

    #[tokio::test]
    async fn sends_json_headers_and_payload() {
        let server = MockServer::start().await;
        let payload = PickConfirmationPayload {
            sku_code: "SKU-002".to_owned(),
            quantity: 2,
            bin_location: "A-01-01".to_owned(),
        };
        Mock::given(method("POST"))
            .and(path("/api/picklists/pl-1/confirm-pick"))
            .and(header("accept", "application/json"))
            .and(header("user-agent", USER_AGENT))
            .and(body_json(serde_json::json!({
                "skuCode": "SKU-002",
                "quantity": 2,
                "binLocation": "A-01-01"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let sink = MetricsSink::new();
        let response = client_for(&server, &sink)
            .confirm_pick("pl-1", &payload, RequestOptions::default())
            .await;
        assert!(response.is_status(200));
        assert!(
            response
                .content_type
                .as_deref()
                .is_some_and(|value| value.contains("application/json"))
        );
    }

    #[tokio::test]
    async fn path_segments_are_encoded() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/packages/order/ord%201"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let sink = MetricsSink::new();
        let response = client_for(&server, &sink)
            .package_by_order("ord 1", RequestOptions::default())
            .await;
        assert!(response.is_status(404));
    }

    #[tokio::test]
    async fn records_request_metrics_per_endpoint_and_phase() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/actuator/health"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "UP"
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/picklists/status/IN_PROGRESS"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let sink = MetricsSink::new();
        let client = client_for(&server, &sink);
        client.health(RequestOptions::default()).await;
        client
            .pick_lists_by_status(
                PickListStatus::InProgress,
                RequestOptions::default().phase(Some(Phase::Spike)),
            )
            .await;

        let snapshot = sink.snapshot();
        assert_eq!(snapshot.counter(HTTP_REQS), Some(2));
        assert_eq!(snapshot.rate(HTTP_REQ_FAILED), Some(0.5));
        assert!(matches!(
            snapshot.get(&MetricKey::tagged(HTTP_REQ_FAILED, PHASE_TAG, "spike")),
            Some(crate::metrics::MetricSummary::Rate { passes: 1, fails: 0, .. })
        ));
        assert!(matches!(
            snapshot.get(&MetricKey::tagged(HTTP_REQ_FAILED, ENDPOINT_TAG, "health")),
            Some(crate::metrics::MetricSummary::Rate { passes: 0, fails: 1, .. })
        ));
        let health_duration = snapshot
            .trend(&MetricKey::tagged(HTTP_REQ_DURATION, ENDPOINT_TAG, "health"))
            .expect("declared");
        assert_eq!(health_duration.count, 1);
    }

    #[tokio::test]
    async fn timeouts_become_failed_responses() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/actuator/info"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&server)
            .await;

        let sink = MetricsSink::new();
        let response = client_for(&server, &sink)
            .info(RequestOptions::default().timeout(Duration::from_millis(50)))
            .await;
        assert_eq!(response.status, None);
        assert!(response.error.is_some());
        assert!(response.is_failed());
        assert_eq!(sink.snapshot().rate(HTTP_REQ_FAILED), Some(1.0));
    }
}
