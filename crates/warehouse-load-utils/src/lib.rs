// Copyright (c) Walrus Foundation
// SPDX-License-Identifier: Apache-2.0

//! Shared helpers for the warehouse load tester.

#[cfg(feature = "config")]
pub mod config;

#[cfg(feature = "metrics")]
pub mod metrics;

#[cfg(feature = "config")]
pub use config::load_from_yaml;
