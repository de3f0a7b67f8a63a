// Copyright (c) Walrus Foundation
// SPDX-License-Identifier: Apache-2.0

//! Configuration of a load-test run.
//!
//! Settings come from three layers: command-line overrides take precedence over the optional
//! YAML file, which takes precedence over the built-in profile defaults.

use std::{collections::BTreeMap, net::SocketAddr, path::Path, time::Duration};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use warehouse_load_utils::{config::humantime_duration, load_from_yaml};

use crate::{
    client::DEFAULT_REQUEST_TIMEOUT,
    environment::{Environment, EnvironmentRecord, EnvironmentRegistry},
    generator::TestDataPool,
    stages::{Stage, StageSchedule},
    thresholds::{self, Threshold},
    validator::ValidationOptions,
    workload::ProfileKind,
};

/// How long retiring virtual users may take to finish their iteration by default.
pub const DEFAULT_GRACEFUL_STOP: Duration = Duration::from_secs(30);

/// Per-profile overrides from the configuration file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct ProfileOverrides {
    /// Replaces the profile's stage schedule.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stages: Option<Vec<Stage>>,
    /// Replaces the thresholds of each named metric.
    pub thresholds: BTreeMap<String, Vec<String>>,
    /// Replaces the weights of the named scenarios.
    pub scenario_weights: BTreeMap<String, f64>,
}

/// The contents of a configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct LoadTestConfig {
    /// Additional environments, or replacements for the built-in ones.
    pub environments: BTreeMap<String, EnvironmentRecord>,
    /// The values test data is drawn from.
    pub test_data: TestDataPool,
    /// Timeout of requests without a per-call override.
    #[serde(with = "humantime_duration")]
    pub request_timeout: Duration,
    /// Latency bounds of the response checks.
    pub validation: ValidationOptions,
    /// Factor applied to every think time and pause.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub think_time_scale: Option<f64>,
    /// How long retiring virtual users may take to finish their iteration.
    #[serde(with = "humantime_duration")]
    pub graceful_stop: Duration,
    /// Overrides per profile.
    pub profiles: BTreeMap<ProfileKind, ProfileOverrides>,
}

impl Default for LoadTestConfig {
    fn default() -> Self {
        Self {
            environments: BTreeMap::new(),
            test_data: TestDataPool::default(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            validation: ValidationOptions::default(),
            think_time_scale: None,
            graceful_stop: DEFAULT_GRACEFUL_STOP,
            profiles: BTreeMap::new(),
        }
    }
}

impl LoadTestConfig {
    /// Loads the configuration from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        load_from_yaml(path)
    }

    /// Loads the configuration from `path`, or returns the defaults without a path.
    pub fn load_or_default(path: Option<&Path>) -> anyhow::Result<Self> {
        path.map_or_else(|| Ok(Self::default()), Self::load)
    }

    /// The environments known to this configuration.
    pub fn environment_registry(&self) -> EnvironmentRegistry {
        EnvironmentRegistry::default().with_overrides(self.environments.clone())
    }

    /// Combines this configuration with the command-line overrides into the settings of a run.
    pub fn resolve(&self, profile: ProfileKind, cli: CliOverrides) -> anyhow::Result<RunSettings> {
        let overrides = self.profiles.get(&profile).cloned().unwrap_or_default();

        let mut environment = self
            .environment_registry()
            .resolve(cli.environment.as_deref());
        if let Some(base_url) = &cli.base_url {
            environment = environment.with_base_url(base_url);
        }

        let stages = if !cli.stages.is_empty() {
            cli.stages
        } else if let Some(stages) = overrides.stages {
            stages
        } else {
            profile.default_stages()
        };
        let stages = StageSchedule::new(stages).context("invalid stage schedule")?;

        let thresholds = thresholds::from_table(profile.default_thresholds())
            .context("invalid built-in thresholds")?;
        let thresholds = thresholds::apply_overrides(thresholds, &overrides.thresholds)
            .with_context(|| format!("invalid thresholds for the {profile} profile"))?;

        Ok(RunSettings {
            profile,
            environment,
            stages,
            thresholds,
            scenario_weights: overrides.scenario_weights,
            test_data: self.test_data.clone(),
            request_timeout: cli.request_timeout.unwrap_or(self.request_timeout),
            validation: self.validation,
            think_time_scale: cli.think_time_scale.or(self.think_time_scale).unwrap_or(1.0),
            graceful_stop: self.graceful_stop,
            seed: cli.seed,
            metrics_address: cli.metrics_address,
        })
    }
}

/// Settings given on the command line. `None` and empty values defer to the lower layers.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    /// Name of the target environment.
    pub environment: Option<String>,
    /// Replaces the base URL of the resolved environment.
    pub base_url: Option<String>,
    /// Replaces the stage schedule.
    pub stages: Vec<Stage>,
    /// Factor applied to every think time and pause.
    pub think_time_scale: Option<f64>,
    /// Timeout of requests without a per-call override.
    pub request_timeout: Option<Duration>,
    /// Seed of the random number generators.
    pub seed: Option<u64>,
    /// Address of the Prometheus endpoint.
    pub metrics_address: Option<SocketAddr>,
}

/// The fully resolved settings of a run.
#[derive(Debug, Clone)]
pub struct RunSettings {
    /// The traffic profile.
    pub profile: ProfileKind,
    /// The target environment.
    pub environment: Environment,
    /// The virtual-user schedule.
    pub stages: StageSchedule,
    /// The pass/fail criteria.
    pub thresholds: Vec<Threshold>,
    /// Scenario weight overrides, by scenario name.
    pub scenario_weights: BTreeMap<String, f64>,
    /// The values test data is drawn from.
    pub test_data: TestDataPool,
    /// Timeout of requests without a per-call override.
    pub request_timeout: Duration,
    /// Latency bounds of the response checks.
    pub validation: ValidationOptions,
    /// Factor applied to every think time and pause.
    pub think_time_scale: f64,
    /// How long retiring virtual users may take to finish their iteration.
    pub graceful_stop: Duration,
    /// Seed of the random number generators, or `None` for entropy.
    pub seed: Option<u64>,
    /// Address of the Prometheus endpoint, if any.
    pub metrics_address: Option<SocketAddr>,
}

impl RunSettings {
    /// Default settings for `profile` against `environment`.
    pub fn for_profile(profile: ProfileKind, environment: Environment) -> anyhow::Result<Self> {
        let mut settings = LoadTestConfig::default().resolve(profile, CliOverrides::default())?;
        settings.environment = environment;
        Ok(settings)
    }
}
