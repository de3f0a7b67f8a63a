// Copyright (c) Walrus Foundation
// SPDX-License-Identifier: Apache-2.0

//! Drives a run: pre-flight health check, virtual users following the stage schedule, teardown
//! assessment and threshold evaluation.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use anyhow::Context;
use futures::future::join_all;
use tokio::{
    net::TcpListener,
    sync::watch,
    task::JoinHandle,
    time::{MissedTickBehavior, interval},
};
use tokio_util::sync::CancellationToken;
use warehouse_load_utils::metrics::start_prometheus_server;

use crate::{
    client::{RequestOptions, WarehouseClient},
    config::RunSettings,
    metrics::MetricsSink,
    pacing::Pacer,
    report::RunReport,
    stages::Phase,
    thresholds,
    validator::ResponseValidator,
    workload::{VirtualUser, Workload, WorkloadContext},
};

/// Timeout of the pre-flight health check.
pub const SETUP_TIMEOUT: Duration = Duration::from_secs(10);

/// How often the driver re-evaluates the stage schedule.
const SCHEDULER_TICK: Duration = Duration::from_millis(100);

/// Why a run could not start.
#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    /// The health endpoint answered with something other than a 200.
    #[error("service at {base_url} is not healthy: health check returned status {status}")]
    Unhealthy {
        /// The base URL of the service.
        base_url: String,
        /// The status returned.
        status: u16,
    },
    /// The health endpoint did not answer.
    #[error("service at {base_url} is unreachable: {reason}")]
    Unreachable {
        /// The base URL of the service.
        base_url: String,
        /// The transport error.
        reason: String,
    },
}

struct ActiveUser {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

struct RetiringUser {
    since: Instant,
    handle: JoinHandle<()>,
}

/// A configured run.
#[derive(Debug)]
pub struct LoadTest {
    settings: RunSettings,
    sink: Arc<MetricsSink>,
    workload: Arc<Workload>,
}

impl LoadTest {
    /// Builds the client, validator and workload of a run.
    pub fn new(settings: RunSettings) -> anyhow::Result<Self> {
        let sink = Arc::new(MetricsSink::new());
        let client = WarehouseClient::new(
            settings.environment.clone(),
            settings.request_timeout,
            &sink,
        )?;
        let validator = ResponseValidator::new(sink.clone(), settings.validation);
        let context = WorkloadContext {
            client,
            validator,
            test_data: Arc::new(settings.test_data.clone()),
            pacer: Pacer::new(settings.think_time_scale),
            sink: sink.clone(),
        };
        let workload = Workload::new(settings.profile, &settings.scenario_weights, context)
            .with_context(|| format!("invalid scenario weights for the {} profile", settings.profile))?;

        Ok(Self {
            settings,
            sink,
            workload: Arc::new(workload),
        })
    }

    /// The resolved settings.
    pub fn settings(&self) -> &RunSettings {
        &self.settings
    }

    /// The metrics sink of the run.
    pub fn sink(&self) -> &Arc<MetricsSink> {
        &self.sink
    }

    /// Verifies the service answers its health check with a 200.
    #[tracing::instrument(err, skip_all, fields(base_url = %self.settings.environment.base_url))]
    pub async fn setup(&self) -> Result<(), SetupError> {
        let base_url = self.settings.environment.base_url.clone();
        let response = self
            .workload
            .context()
            .client
            .health(RequestOptions::default().timeout(SETUP_TIMEOUT))
            .await;

        match response.status_code() {
            Some(200) => {
                tracing::info!(
                    environment = %self.settings.environment.name,
                    description = %self.settings.environment.description,
                    "service is healthy"
                );
                Ok(())
            }
            Some(status) => Err(SetupError::Unhealthy { base_url, status }),
            None => Err(SetupError::Unreachable {
                base_url,
                reason: response
                    .error
                    .unwrap_or_else(|| "no response".to_owned()),
            }),
        }
    }

    /// Runs the whole test and returns its report.
    ///
    /// Fails only if the service is not healthy before the first iteration or the metrics
    /// endpoint cannot be bound; failures during the run are recorded in the metrics.
    pub async fn run(self) -> anyhow::Result<RunReport> {
        let settings = &self.settings;
        tracing::info!(
            profile = %settings.profile,
            base_url = %settings.environment.base_url,
            duration = %humantime::format_duration(settings.stages.total_duration()),
            peak_users = settings.stages.peak(),
            "starting load test"
        );

        self.setup().await?;

        let cancel_metrics = CancellationToken::new();
        let metrics_server = match settings.metrics_address {
            Some(address) => {
                let listener = TcpListener::bind(address)
                    .await
                    .with_context(|| format!("failed to bind the metrics endpoint to {address}"))?;
                tracing::info!(%address, "serving metrics");
                Some(start_prometheus_server(
                    listener,
                    self.sink.registry().clone(),
                    cancel_metrics.clone(),
                ))
            }
            None => None,
        };

        let start = Instant::now();
        self.drive().await;
        let duration = start.elapsed();
        tracing::info!(
            duration = %humantime::format_duration(Duration::from_secs(duration.as_secs())),
            "all virtual users stopped"
        );

        let assessment = self.workload.teardown(settings.seed).await;

        cancel_metrics.cancel();
        if let Some(server) = metrics_server {
            match server.await {
                Ok(Ok(())) => (),
                Ok(Err(error)) => tracing::warn!(?error, "metrics endpoint failed"),
                Err(error) => tracing::warn!(?error, "metrics endpoint task panicked"),
            }
        }

        let snapshot = self.sink.snapshot();
        let outcomes = thresholds::evaluate(&settings.thresholds, &snapshot);
        Ok(RunReport::new(
            settings.profile,
            &settings.environment,
            duration,
            snapshot,
            outcomes,
            assessment,
        ))
    }

    /// Spawns and retires virtual users following the stage schedule until it ends, then waits
    /// up to the graceful-stop window for the remaining users.
    async fn drive(&self) {
        let schedule = &self.settings.stages;
        let graceful_stop = self.settings.graceful_stop;
        let (phase_sender, _) = watch::channel(None::<Phase>);

        let mut active: Vec<ActiveUser> = Vec::new();
        let mut retiring: Vec<RetiringUser> = Vec::new();
        let mut next_id = 0u32;
        let mut current_stage = None;

        let mut ticker = interval(SCHEDULER_TICK);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let start = Instant::now();

        loop {
            ticker.tick().await;
            let Some(position) = schedule.position(start.elapsed()) else {
                break;
            };

            if current_stage != Some(position.index) {
                current_stage = Some(position.index);
                let stage = &schedule.stages()[position.index];
                tracing::info!(
                    stage = position.index + 1,
                    of = schedule.stages().len(),
                    target = stage.target,
                    duration = %humantime::format_duration(stage.duration),
                    phase = position.phase.map(|phase| phase.as_str()),
                    "entering stage"
                );
            }
            phase_sender.send_if_modified(|phase| {
                let changed = *phase != position.phase;
                *phase = position.phase;
                changed
            });

            let target = usize::try_from(position.target).unwrap_or(usize::MAX);
            while active.len() < target {
                let cancel = CancellationToken::new();
                let user = VirtualUser::new(next_id, self.settings.seed);
                next_id = next_id.wrapping_add(1);
                let handle = tokio::spawn(run_virtual_user(
                    self.workload.clone(),
                    user,
                    phase_sender.subscribe(),
                    cancel.clone(),
                ));
                active.push(ActiveUser { cancel, handle });
            }
            while active.len() > target {
                let Some(user) = active.pop() else {
                    break;
                };
                user.cancel.cancel();
                retiring.push(RetiringUser {
                    since: Instant::now(),
                    handle: user.handle,
                });
            }

            retiring.retain(|user| {
                if user.handle.is_finished() {
                    return false;
                }
                if user.since.elapsed() >= graceful_stop {
                    user.handle.abort();
                    return false;
                }
                true
            });
        }

        let mut remaining: Vec<JoinHandle<()>> = retiring.into_iter().map(|user| user.handle).collect();
        for user in active {
            user.cancel.cancel();
            remaining.push(user.handle);
        }
        tracing::info!(
            users = remaining.len(),
            graceful_stop = %humantime::format_duration(graceful_stop),
            "schedule finished, waiting for virtual users"
        );

        if tokio::time::timeout(graceful_stop, join_all(remaining.iter_mut()))
            .await
            .is_err()
        {
            let unfinished = remaining.iter().filter(|handle| !handle.is_finished()).count();
            tracing::warn!(unfinished, "graceful stop expired, aborting virtual users");
            for handle in &remaining {
                handle.abort();
            }
        }
    }
}

async fn run_virtual_user(
    workload: Arc<Workload>,
    mut user: VirtualUser,
    phase: watch::Receiver<Option<Phase>>,
    cancel: CancellationToken,
) {
    tracing::debug!(user = user.id(), "virtual user started");
    while !cancel.is_cancelled() {
        let current_phase = *phase.borrow();
        user.set_phase(current_phase);
        workload.iteration(&mut user).await;
    }
    tracing::debug!(user = user.id(), "virtual user stopped");
}
