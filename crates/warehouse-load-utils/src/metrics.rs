// Copyright (c) Walrus Foundation
// SPDX-License-Identifier: Apache-2.0

//! Serving a Prometheus registry over HTTP.

use axum::{
    Router,
    extract::State,
    http::{StatusCode, header},
    response::IntoResponse,
    routing::get,
};
use prometheus::{Encoder, Registry, TextEncoder};
use tokio::{net::TcpListener, task::JoinHandle};
use tokio_util::sync::CancellationToken;

/// The path on which metrics are exposed.
pub const METRICS_ROUTE: &str = "/metrics";

/// Histogram buckets for latencies recorded in milliseconds: 1ms doubling up to roughly 33s.
pub fn default_buckets() -> Vec<f64> {
    prometheus::exponential_buckets(1.0, 2.0, 16)
        .unwrap_or_else(|_| vec![1.0, 10.0, 100.0, 1_000.0, 10_000.0])
}

/// Serves the text exposition of `registry` at [`METRICS_ROUTE`] on the given listener until
/// `cancel` fires.
pub fn start_prometheus_server(
    listener: TcpListener,
    registry: Registry,
    cancel: CancellationToken,
) -> JoinHandle<std::io::Result<()>> {
    let app = Router::new()
        .route(METRICS_ROUTE, get(serve_metrics))
        .with_state(registry);

    if let Ok(address) = listener.local_addr() {
        tracing::info!(%address, "starting metrics server");
    }

    tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { cancel.cancelled().await })
            .await
    })
}

async fn serve_metrics(State(registry): State<Registry>) -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    match encoder.encode(&registry.gather(), &mut buffer) {
        Ok(()) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, encoder.format_type().to_owned())],
            buffer,
        )
            .into_response(),
        Err(error) => {
            tracing::warn!(?error, "failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, error.to_string()).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use prometheus::{IntCounter, Opts};

    use super::*;

    #[test]
    fn buckets_are_increasing() {
        let buckets = default_buckets();
        assert_eq!(buckets.len(), 16);
        assert!(buckets.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[tokio::test]
    async fn exposes_registered_metrics() -> anyhow::Result<()> {
        let registry = Registry::new();
        let counter = IntCounter::with_opts(Opts::new("probe_total", "Probe counter"))?;
        registry.register(Box::new(counter.clone()))?;
        counter.inc_by(3);

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let address = listener.local_addr()?;
        let cancel = CancellationToken::new();
        let handle = start_prometheus_server(listener, registry, cancel.clone());

        let body = reqwest::get(format!("http://{address}{METRICS_ROUTE}"))
            .await?
            .text()
            .await?;
        assert!(body.contains("probe_total 3"));

        cancel.cancel();
        handle.await??;
        Ok(())
    }
}
