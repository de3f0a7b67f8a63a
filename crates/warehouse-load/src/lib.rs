// Copyright (c) Walrus Foundation
// SPDX-License-Identifier: Apache-2.0

//! Load generator for the warehouse-operations API.
//!
//! A run resolves an [`environment::Environment`], verifies the service is healthy, and then drives
//! virtual users through the weighted scenarios of one [`workload::ProfileKind`] following a
//! [`stages::StageSchedule`]. Every response is checked by the [`validator::ResponseValidator`] and
//! recorded in a shared [`metrics::MetricsSink`], whose final snapshot is evaluated against the
//! profile's [`thresholds`] and rendered by [`report::RunReport`].

pub mod client;
pub mod config;
pub mod environment;
pub mod generator;
pub mod metrics;
pub mod pacing;
pub mod report;
pub mod runner;
pub mod selector;
pub mod stages;
pub mod thresholds;
pub mod validator;
pub mod workload;

/// Process exit code used when at least one threshold failed.
pub const THRESHOLD_FAILED_EXIT_CODE: i32 = 99;
