// Copyright (c) Walrus Foundation
// SPDX-License-Identifier: Apache-2.0

//! Load generator for the warehouse-operations API.

use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;
use warehouse_load::{config::LoadTestConfig, runner::LoadTest};

use crate::args::Args;

mod args;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    match run(args).await {
        Ok(code) => ExitCode::from(code),
        Err(error) => {
            tracing::error!("{error:?}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> anyhow::Result<u8> {
    let (profile, run_args) = args.command.into_parts();
    let config = LoadTestConfig::load_or_default(run_args.config.as_deref())?;
    let settings = config.resolve(profile, run_args.overrides())?;
    let load_test = LoadTest::new(settings)?;

    let report = tokio::select! {
        report = load_test.run() => report?,
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for the interrupt signal")?;
            anyhow::bail!("interrupted before the run completed");
        }
    };

    println!("{}", report.render());
    if let Some(path) = &run_args.summary_export {
        report.write_json(path)?;
    }
    for outcome in report.failed_thresholds() {
        tracing::warn!(threshold = %outcome.threshold, status = %outcome.status, "threshold not met");
    }
    Ok(u8::try_from(report.exit_code()).unwrap_or(1))
}
