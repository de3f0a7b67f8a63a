// Copyright (c) Walrus Foundation
// SPDX-License-Identifier: Apache-2.0

//! Command-line arguments of the `warehouse-load` binary.

use std::{net::SocketAddr, path::PathBuf, time::Duration};

use clap::{Args as ClapArgs, Parser, Subcommand};
use warehouse_load::{config::CliOverrides, stages::Stage, workload::ProfileKind};

#[derive(Parser, Debug, Clone)]
#[command(
    author,
    version,
    about = "Load generator for the warehouse-operations API",
    long_about = None,
    rename_all = "kebab-case"
)]
pub(crate) struct Args {
    /// The traffic profile to run.
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
#[command(rename_all = "kebab-case")]
pub(crate) enum Command {
    /// Minimal traffic verifying every endpoint.
    Smoke(RunArgs),
    /// Normal expected traffic.
    Load(RunArgs),
    /// Traffic ramped far beyond normal capacity.
    Stress(RunArgs),
    /// Sudden surges alternating with recovery periods.
    Spike(RunArgs),
    /// Traffic focused on the package endpoints.
    Package(RunArgs),
    /// Traffic focused on the pick-list endpoints.
    Picklist(RunArgs),
}

impl Command {
    /// The selected profile and its options.
    pub fn into_parts(self) -> (ProfileKind, RunArgs) {
        match self {
            Command::Smoke(args) => (ProfileKind::Smoke, args),
            Command::Load(args) => (ProfileKind::Load, args),
            Command::Stress(args) => (ProfileKind::Stress, args),
            Command::Spike(args) => (ProfileKind::Spike, args),
            Command::Package(args) => (ProfileKind::Package, args),
            Command::Picklist(args) => (ProfileKind::Picklist, args),
        }
    }
}

/// Options shared by every profile.
#[derive(ClapArgs, Debug, Clone)]
#[command(rename_all = "kebab-case")]
pub(crate) struct RunArgs {
    /// The target environment: `local`, `staging`, `production` or one defined in the config.
    #[arg(long, env = "ENVIRONMENT")]
    pub environment: Option<String>,
    /// Overrides the base URL of the target environment.
    #[arg(long, env = "BASE_URL")]
    pub base_url: Option<String>,
    /// YAML configuration file.
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Replaces the stage schedule; repeat for several stages, e.g. `--stage 30s:5 --stage 1m:0`.
    /// A third component labels the phase (`baseline`, `spike` or `recovery`).
    #[arg(long = "stage", value_name = "DURATION:TARGET[:PHASE]")]
    pub stages: Vec<Stage>,
    /// Factor applied to every think time and pause; `0` disables them.
    #[arg(long)]
    pub think_time_scale: Option<f64>,
    /// Timeout of requests without a per-call override, e.g. `30s`.
    #[arg(long, value_parser = humantime::parse_duration)]
    pub request_timeout: Option<Duration>,
    /// Serve the metrics in the Prometheus format on this address during the run.
    #[arg(long)]
    pub metrics_address: Option<SocketAddr>,
    /// Write the end-of-run summary as JSON to this file.
    #[arg(long)]
    pub summary_export: Option<PathBuf>,
    /// Seed of the random number generators, for reproducible traffic.
    #[arg(long)]
    pub seed: Option<u64>,
}

impl RunArgs {
    /// The settings that take precedence over the configuration file.
    pub fn overrides(&self) -> CliOverrides {
        CliOverrides {
            environment: self.environment.clone(),
            base_url: self.base_url.clone(),
            stages: self.stages.clone(),
            think_time_scale: self.think_time_scale,
            request_timeout: self.request_timeout,
            seed: self.seed,
            metrics_address: self.metrics_address,
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn verify_cli() {
        Args::command().debug_assert();
    }

    #[test]
    fn parses_profile_and_shared_options() {
        let args = Args::try_parse_from([
            "warehouse-load",
            "spike",
            "--environment",
            "staging",
            "--stage",
            "10s:5:baseline",
            "--stage",
            "5s:50:spike",
            "--think-time-scale",
            "0",
            "--request-timeout",
            "2s",
            "--seed",
            "7",
        ])
        .expect("valid arguments");

        let (profile, run) = args.command.into_parts();
        assert_eq!(profile, ProfileKind::Spike);
        let overrides = run.overrides();
        assert_eq!(overrides.environment.as_deref(), Some("staging"));
        assert_eq!(overrides.stages.len(), 2);
        assert_eq!(overrides.stages[1].target, 50);
        assert_eq!(overrides.think_time_scale, Some(0.0));
        assert_eq!(overrides.request_timeout, Some(Duration::from_secs(2)));
        assert_eq!(overrides.seed, Some(7));
    }

    #[test]
    fn rejects_malformed_stages() {
        assert!(Args::try_parse_from(["warehouse-load", "load", "--stage", "soon:5"]).is_err());
        assert!(Args::try_parse_from(["warehouse-load", "soak"]).is_err());
    }
}
