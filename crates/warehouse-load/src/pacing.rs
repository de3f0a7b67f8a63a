// Copyright (c) Walrus Foundation
// SPDX-License-Identifier: Apache-2.0

//! Think time between the operations of a virtual user.

use std::time::Duration;

use rand::Rng;

/// The shortest think time [`pace`] returns.
pub const MIN_PACE: Duration = Duration::from_millis(100);

/// Returns `base` moved by a uniformly drawn offset of at most `jitter_percent` percent of `base`
/// in either direction, and never less than [`MIN_PACE`].
pub fn pace<R: Rng + ?Sized>(base: Duration, jitter_percent: f64, rng: &mut R) -> Duration {
    let jitter_percent = if jitter_percent.is_finite() {
        jitter_percent.abs()
    } else {
        0.0
    };
    let base_secs = base.as_secs_f64();
    let jitter = base_secs * jitter_percent / 100.0;
    let offset = (rng.r#gen::<f64>() - 0.5) * 2.0 * jitter;

    Duration::try_from_secs_f64(base_secs + offset)
        .unwrap_or(Duration::ZERO)
        .max(MIN_PACE)
}

/// Suspends the calling virtual user, scaling every pause by a run-wide factor.
#[derive(Debug, Clone, Copy)]
pub struct Pacer {
    scale: f64,
}

impl Default for Pacer {
    fn default() -> Self {
        Self { scale: 1.0 }
    }
}

impl Pacer {
    /// Creates a pacer; negative or non-finite factors are treated as zero.
    pub fn new(scale: f64) -> Self {
        let scale = if scale.is_finite() { scale.max(0.0) } else { 0.0 };
        Self { scale }
    }

    /// The scaling factor.
    pub fn scale(&self) -> f64 {
        self.scale
    }

    /// The duration actually slept for a pause of `duration`.
    pub fn scaled(&self, duration: Duration) -> Duration {
        Duration::try_from_secs_f64(duration.as_secs_f64() * self.scale).unwrap_or(Duration::MAX)
    }

    /// Sleeps for the scaled `duration`.
    pub async fn pause(&self, duration: Duration) {
        let duration = self.scaled(duration);
        if !duration.is_zero() {
            tokio::time::sleep(duration).await;
        }
    }

    /// Sleeps for a jittered think time around `base`.
    pub async fn think<R: Rng + ?Sized>(&self, base: Duration, jitter_percent: f64, rng: &mut R) {
        let duration = pace(base, jitter_percent, rng);
        self.pause(duration).await;
    }
}
