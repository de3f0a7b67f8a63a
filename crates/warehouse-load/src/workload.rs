// Copyright (c) Walrus Foundation
// SPDX-License-Identifier: Apache-2.0

//! Traffic profiles: what a virtual user does in each iteration.
//!
//! Every profile defines its default stages and thresholds, the scenarios an iteration picks
//! from, the think time after each iteration, and an optional health assessment run once all
//! virtual users have stopped.

use std::{
    collections::BTreeMap,
    fmt::{self, Display},
    str::FromStr,
    sync::Arc,
    time::{Duration, Instant},
};

use rand::{Rng, SeedableRng, rngs::StdRng, seq::SliceRandom};
use serde::{Deserialize, Serialize};

use crate::{
    client::{RequestOptions, WarehouseClient},
    generator::TestDataPool,
    metrics::MetricsSink,
    pacing::Pacer,
    selector::{Scenario, SelectorError, WeightedSelector},
    stages::{Phase, Stage},
    thresholds::ThresholdTable,
    validator::ResponseValidator,
};

pub mod load;
pub mod package;
pub mod picklist;
pub mod smoke;
pub mod spike;
pub mod stress;

/// Number of completed iterations.
pub const ITERATIONS: &str = "iterations";
/// Wall-clock duration of iterations, think time excluded.
pub const ITERATION_DURATION: &str = "iteration_duration";
/// Share of iterations that ended with an error.
pub const ITERATION_ERRORS: &str = "iteration_errors";

/// How many created orders a virtual user remembers for later lookups.
const MAX_REMEMBERED_ORDERS: usize = 100;

/// The traffic profiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileKind {
    /// Minimal traffic verifying every endpoint once per iteration.
    Smoke,
    /// Normal expected traffic.
    Load,
    /// Traffic ramped beyond normal capacity.
    Stress,
    /// Sudden surges alternating with recovery periods.
    Spike,
    /// Traffic focused on the package endpoints.
    Package,
    /// Traffic focused on the pick-list endpoints.
    Picklist,
}

impl ProfileKind {
    /// All profiles.
    pub const ALL: [ProfileKind; 6] = [
        Self::Smoke,
        Self::Load,
        Self::Stress,
        Self::Spike,
        Self::Package,
        Self::Picklist,
    ];

    /// The profile name used on the command line and in configuration files.
    pub fn as_str(&self) -> &'static str {
        match self {
            ProfileKind::Smoke => "smoke",
            ProfileKind::Load => "load",
            ProfileKind::Stress => "stress",
            ProfileKind::Spike => "spike",
            ProfileKind::Package => "package",
            ProfileKind::Picklist => "picklist",
        }
    }

    /// The stage schedule used unless overridden.
    pub fn default_stages(&self) -> Vec<Stage> {
        let stages = match self {
            ProfileKind::Smoke => smoke::STAGES,
            ProfileKind::Load => load::STAGES,
            ProfileKind::Stress => stress::STAGES,
            ProfileKind::Spike => spike::STAGES,
            ProfileKind::Package => package::STAGES,
            ProfileKind::Picklist => picklist::STAGES,
        };
        stages.to_vec()
    }

    /// The thresholds used unless overridden.
    pub fn default_thresholds(&self) -> ThresholdTable {
        match self {
            ProfileKind::Smoke => smoke::THRESHOLDS,
            ProfileKind::Load => load::THRESHOLDS,
            ProfileKind::Stress => stress::THRESHOLDS,
            ProfileKind::Spike => spike::THRESHOLDS,
            ProfileKind::Package => package::THRESHOLDS,
            ProfileKind::Picklist => picklist::THRESHOLDS,
        }
    }

    /// The metrics summarized at the top of the report.
    pub fn highlights(&self) -> &'static [&'static str] {
        match self {
            ProfileKind::Smoke => &[crate::validator::CHECKS],
            ProfileKind::Load => load::HIGHLIGHTS,
            ProfileKind::Stress => stress::HIGHLIGHTS,
            ProfileKind::Spike => spike::HIGHLIGHTS,
            ProfileKind::Package => package::HIGHLIGHTS,
            ProfileKind::Picklist => picklist::HIGHLIGHTS,
        }
    }

    /// The profile's own error rate, recorded in addition to [`ITERATION_ERRORS`].
    pub fn error_rate(&self) -> Option<&'static str> {
        match self {
            ProfileKind::Stress => Some(stress::ERRORS),
            ProfileKind::Spike => Some(spike::SPIKE_ERRORS),
            _ => None,
        }
    }
}

impl Display for ProfileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProfileKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|profile| profile.as_str() == s)
            .ok_or_else(|| format!("unknown profile: {s}"))
    }
}

/// Everything the iterations of a run share.
#[derive(Debug, Clone)]
pub struct WorkloadContext {
    /// The API client.
    pub client: WarehouseClient,
    /// The response validator.
    pub validator: ResponseValidator,
    /// The values test data is drawn from.
    pub test_data: Arc<TestDataPool>,
    /// Suspends virtual users between operations.
    pub pacer: Pacer,
    /// The metrics sink.
    pub sink: Arc<MetricsSink>,
}

/// The state of one virtual user.
#[derive(Debug)]
pub struct VirtualUser {
    id: u32,
    rng: StdRng,
    phase: Option<Phase>,
    created_orders: Vec<String>,
}

impl VirtualUser {
    /// Creates virtual user `id`; with a seed, its random choices are reproducible.
    pub fn new(id: u32, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed ^ u64::from(id)),
            None => StdRng::from_entropy(),
        };
        Self {
            id,
            rng,
            phase: None,
            created_orders: Vec::new(),
        }
    }

    /// The identifier of the virtual user.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// The phase of the stage the current iteration started in.
    pub fn phase(&self) -> Option<Phase> {
        self.phase
    }

    /// Sets the phase for the next iteration.
    pub fn set_phase(&mut self, phase: Option<Phase>) {
        self.phase = phase;
    }

    /// The random number generator of the virtual user.
    pub fn rng(&mut self) -> &mut StdRng {
        &mut self.rng
    }

    /// Request options tagging requests with the current phase.
    pub fn options(&self) -> RequestOptions {
        RequestOptions::default().phase(self.phase)
    }

    /// Request options with the current phase and `timeout`.
    pub fn options_with_timeout(&self, timeout: Duration) -> RequestOptions {
        self.options().timeout(timeout)
    }

    /// Remembers an order created by this virtual user, forgetting the oldest beyond a bound.
    pub fn remember_order(&mut self, order_id: String) {
        if self.created_orders.len() == MAX_REMEMBERED_ORDERS {
            self.created_orders.remove(0);
        }
        self.created_orders.push(order_id);
    }

    /// A random order previously created by this virtual user.
    pub fn remembered_order(&mut self) -> Option<String> {
        self.created_orders.choose(&mut self.rng).cloned()
    }

    /// Draws the number of operations of a multi-step scenario, between `min` and `max`.
    pub fn operation_count(&mut self, min: usize, max: usize) -> usize {
        self.rng.gen_range(min..=max.max(min))
    }

    /// Whether an event with probability `probability` happens.
    pub fn chance(&mut self, probability: f64) -> bool {
        self.rng.gen_bool(probability.clamp(0.0, 1.0))
    }
}

/// How a profile decides what an iteration does.
#[derive(Debug, Clone)]
enum Scenarios {
    Smoke,
    Load(WeightedSelector<load::LoadScenario>),
    Stress(WeightedSelector<stress::StressScenario>),
    Spike,
    Package(WeightedSelector<package::PackageScenario>),
    Picklist(WeightedSelector<picklist::PicklistScenario>),
}

/// A profile ready to drive virtual users.
#[derive(Debug, Clone)]
pub struct Workload {
    kind: ProfileKind,
    scenarios: Scenarios,
    context: WorkloadContext,
}

impl Workload {
    /// Creates the workload of `kind`, applying scenario weight overrides by name.
    pub fn new(
        kind: ProfileKind,
        scenario_weights: &BTreeMap<String, f64>,
        context: WorkloadContext,
    ) -> Result<Self, SelectorError> {
        let scenarios = match kind {
            ProfileKind::Smoke | ProfileKind::Spike => {
                if let Some(name) = scenario_weights.keys().next() {
                    return Err(SelectorError::UnknownScenario(name.clone()));
                }
                if kind == ProfileKind::Smoke {
                    Scenarios::Smoke
                } else {
                    Scenarios::Spike
                }
            }
            ProfileKind::Load => Scenarios::Load(WeightedSelector::for_scenarios(scenario_weights)?),
            ProfileKind::Stress => {
                Scenarios::Stress(WeightedSelector::for_scenarios(scenario_weights)?)
            }
            ProfileKind::Package => {
                Scenarios::Package(WeightedSelector::for_scenarios(scenario_weights)?)
            }
            ProfileKind::Picklist => {
                Scenarios::Picklist(WeightedSelector::for_scenarios(scenario_weights)?)
            }
        };
        Ok(Self {
            kind,
            scenarios,
            context,
        })
    }

    /// The profile.
    pub fn kind(&self) -> ProfileKind {
        self.kind
    }

    /// The shared context.
    pub fn context(&self) -> &WorkloadContext {
        &self.context
    }

    /// Runs one iteration followed by the profile's think time.
    ///
    /// Errors raised inside the iteration are logged and recorded; they never stop the virtual
    /// user.
    pub async fn iteration(&self, user: &mut VirtualUser) {
        let sink = &self.context.sink;
        let start = Instant::now();

        let result = self.run_scenario(user).await;

        sink.record_trend(ITERATION_DURATION, duration_millis(start.elapsed()));
        sink.record_count(ITERATIONS, 1);
        sink.record_rate(ITERATION_ERRORS, result.is_err());
        if let Err(error) = result {
            tracing::warn!(
                profile = %self.kind,
                user = user.id(),
                ?error,
                "iteration failed"
            );
            if let Some(errors) = self.kind.error_rate() {
                sink.record_rate(errors, true);
            }
        }

        let (base, jitter_percent) = self.think_time(user.phase());
        if !base.is_zero() {
            self.context
                .pacer
                .think(base, jitter_percent, user.rng())
                .await;
        }
    }

    async fn run_scenario(&self, user: &mut VirtualUser) -> anyhow::Result<()> {
        let context = &self.context;
        match &self.scenarios {
            Scenarios::Smoke => smoke::iteration(context, user).await,
            Scenarios::Load(selector) => {
                let scenario = selector.select(user.rng());
                log_scenario(self.kind, user, scenario);
                load::iteration(context, user, scenario).await
            }
            Scenarios::Stress(selector) => {
                let scenario = selector.select(user.rng());
                log_scenario(self.kind, user, scenario);
                stress::iteration(context, user, scenario).await
            }
            Scenarios::Spike => spike::iteration(context, user).await,
            Scenarios::Package(selector) => {
                let scenario = selector.select(user.rng());
                log_scenario(self.kind, user, scenario);
                package::iteration(context, user, scenario).await
            }
            Scenarios::Picklist(selector) => {
                let scenario = selector.select(user.rng());
                log_scenario(self.kind, user, scenario);
                picklist::iteration(context, user, scenario).await
            }
        }
    }

    /// Base think time and jitter percentage after an iteration that ran in `phase`.
    pub fn think_time(&self, phase: Option<Phase>) -> (Duration, f64) {
        match self.kind {
            ProfileKind::Smoke => smoke::THINK_TIME,
            ProfileKind::Load => load::THINK_TIME,
            ProfileKind::Stress => stress::THINK_TIME,
            ProfileKind::Spike => spike::think_time(phase),
            ProfileKind::Package => package::THINK_TIME,
            ProfileKind::Picklist => picklist::THINK_TIME,
        }
    }

    /// Probes the service after the run, if the profile defines an assessment.
    pub async fn teardown(&self, seed: Option<u64>) -> Option<Assessment> {
        let context = &self.context;
        // The teardown user never collides with a virtual user id.
        let mut user = VirtualUser::new(u32::MAX, seed);
        match self.kind {
            ProfileKind::Smoke | ProfileKind::Load => None,
            ProfileKind::Stress => Some(stress::teardown(context).await),
            ProfileKind::Spike => Some(spike::teardown(context, &mut user).await),
            ProfileKind::Package => Some(package::teardown(context, &mut user).await),
            ProfileKind::Picklist => Some(picklist::teardown(context).await),
        }
    }
}

fn log_scenario<S: Scenario>(kind: ProfileKind, user: &VirtualUser, scenario: S) {
    tracing::debug!(
        profile = %kind,
        user = user.id(),
        scenario = scenario.name(),
        "starting iteration"
    );
}

/// Milliseconds as recorded by trends.
pub fn duration_millis(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}

/// One post-run health probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Probe {
    /// What was probed.
    pub name: String,
    /// Whether the probe succeeded.
    pub passed: bool,
    /// What was observed.
    pub detail: String,
}

/// The overall verdict of an assessment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Grade {
    /// Every probe succeeded.
    Healthy,
    /// At least two thirds of the probes succeeded.
    Degraded,
    /// Fewer than two thirds of the probes succeeded.
    NeedsAttention,
}

impl Display for Grade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Grade::Healthy => f.write_str("EXCELLENT"),
            Grade::Degraded => f.write_str("GOOD"),
            Grade::NeedsAttention => f.write_str("NEEDS ATTENTION"),
        }
    }
}

/// Probes run against the service after all virtual users stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Assessment {
    /// What the assessment evaluates.
    pub title: String,
    /// The probes in the order they ran.
    pub probes: Vec<Probe>,
}

impl Assessment {
    /// An assessment without probes.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            probes: Vec::new(),
        }
    }

    /// Records a probe and logs its outcome.
    pub fn probe(&mut self, name: impl Into<String>, passed: bool, detail: impl Into<String>) {
        let probe = Probe {
            name: name.into(),
            passed,
            detail: detail.into(),
        };
        if probe.passed {
            tracing::info!(probe = %probe.name, detail = %probe.detail, "teardown probe passed");
        } else {
            tracing::warn!(probe = %probe.name, detail = %probe.detail, "teardown probe failed");
        }
        self.probes.push(probe);
    }

    /// The number of successful probes.
    pub fn passed(&self) -> usize {
        self.probes.iter().filter(|probe| probe.passed).count()
    }

    /// The verdict.
    pub fn grade(&self) -> Grade {
        let passed = self.passed();
        let total = self.probes.len();
        if passed == total {
            Grade::Healthy
        } else if passed * 3 >= total * 2 {
            Grade::Degraded
        } else {
            Grade::NeedsAttention
        }
    }
}

/// Describes the outcome of a probe request for the report.
pub(crate) fn describe(response: &crate::client::ApiResponse) -> String {
    let elapsed = duration_millis(response.elapsed);
    match (response.status_code(), &response.error) {
        (Some(status), _) => format!("status {status} in {elapsed:.0}ms"),
        (None, Some(error)) => format!("no response after {elapsed:.0}ms: {error}"),
        (None, None) => format!("no response after {elapsed:.0}ms"),
    }
}
