// Copyright (c) Walrus Foundation
// SPDX-License-Identifier: Apache-2.0

//! Stage schedules: how many virtual users run at each point of a test.

use std::{
    fmt::{self, Display},
    str::FromStr,
    time::Duration,
};

use serde::{Deserialize, Serialize};
use warehouse_load_utils::config::humantime_duration;

/// Errors returned when building stage schedules.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum StageError {
    /// The schedule has no stages.
    #[error("a stage schedule needs at least one stage")]
    Empty,
    /// A stage could not be parsed.
    #[error("invalid stage {0:?}, expected <duration>:<target>[:<phase>]")]
    Invalid(String),
}

/// The phase of a test that alternates between normal and extreme traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Normal traffic before or between spikes.
    Baseline,
    /// A sudden surge of virtual users.
    Spike,
    /// The return to normal traffic after a spike.
    Recovery,
}

impl Phase {
    /// All phases.
    pub const ALL: [Phase; 3] = [Self::Baseline, Self::Spike, Self::Recovery];

    /// The name used in metric tags.
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Baseline => "baseline",
            Phase::Spike => "spike",
            Phase::Recovery => "recovery",
        }
    }
}

impl Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|phase| phase.as_str() == s)
            .ok_or_else(|| format!("unknown phase: {s}"))
    }
}

/// Ramps the number of virtual users to `target` over `duration`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    /// How long the ramp lasts.
    #[serde(with = "humantime_duration")]
    pub duration: Duration,
    /// Number of virtual users at the end of the stage.
    pub target: u32,
    /// Phase label handed to every iteration that starts during the stage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<Phase>,
}

impl Stage {
    /// A stage without a phase label.
    pub const fn new(duration: Duration, target: u32) -> Self {
        Self {
            duration,
            target,
            phase: None,
        }
    }

    /// The same stage labelled with `phase`.
    pub const fn in_phase(mut self, phase: Phase) -> Self {
        self.phase = Some(phase);
        self
    }
}

impl FromStr for Stage {
    type Err = StageError;

    /// Parses `<duration>:<target>[:<phase>]`, e.g. `30s:5` or `1m:100:spike`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || StageError::Invalid(s.to_owned());
        let mut parts = s.split(':');
        let duration = parts
            .next()
            .and_then(|value| humantime::parse_duration(value.trim()).ok())
            .ok_or_else(invalid)?;
        let target = parts
            .next()
            .and_then(|value| value.trim().parse().ok())
            .ok_or_else(invalid)?;
        let phase = parts
            .next()
            .map(|value| value.trim().parse::<Phase>())
            .transpose()
            .map_err(|_| invalid())?;
        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(Self {
            duration,
            target,
            phase,
        })
    }
}

impl Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}",
            humantime::format_duration(self.duration),
            self.target
        )?;
        if let Some(phase) = self.phase {
            write!(f, ":{phase}")?;
        }
        Ok(())
    }
}

/// Where in the schedule a point in time falls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StagePosition {
    /// Index of the active stage.
    pub index: usize,
    /// Number of virtual users that should be running.
    pub target: u32,
    /// Phase of the active stage.
    pub phase: Option<Phase>,
}

/// An ordered, non-empty list of stages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct StageSchedule {
    stages: Vec<Stage>,
}

impl StageSchedule {
    /// Creates a schedule, rejecting an empty list.
    pub fn new(stages: Vec<Stage>) -> Result<Self, StageError> {
        if stages.is_empty() {
            return Err(StageError::Empty);
        }
        Ok(Self { stages })
    }

    /// The stages in order.
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// The sum of all stage durations.
    pub fn total_duration(&self) -> Duration {
        self.stages.iter().map(|stage| stage.duration).sum()
    }

    /// The highest target of any stage.
    pub fn peak(&self) -> u32 {
        self.stages
            .iter()
            .map(|stage| stage.target)
            .max()
            .unwrap_or_default()
    }

    /// The position at `elapsed` since the start of the run, or `None` once the schedule is over.
    ///
    /// Within a stage the target moves linearly from the previous stage's target (zero for the
    /// first stage), rounded down.
    pub fn position(&self, elapsed: Duration) -> Option<StagePosition> {
        let mut stage_start = Duration::ZERO;
        let mut previous_target = 0;

        for (index, stage) in self.stages.iter().enumerate() {
            let stage_end = stage_start + stage.duration;
            if elapsed < stage_end {
                let progress = (elapsed - stage_start).as_secs_f64() / stage.duration.as_secs_f64();
                return Some(StagePosition {
                    index,
                    target: interpolate(previous_target, stage.target, progress),
                    phase: stage.phase,
                });
            }
            stage_start = stage_end;
            previous_target = stage.target;
        }
        None
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn interpolate(from: u32, to: u32, progress: f64) -> u32 {
    let value = f64::from(from) + (f64::from(to) - f64::from(from)) * progress.clamp(0.0, 1.0);
    value.floor().clamp(0.0, f64::from(u32::MAX)) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(value: u64) -> Duration {
        Duration::from_secs(value)
    }

    #[test]
    fn parses_stages_with_and_without_phase() {
        assert_eq!("30s:5".parse(), Ok(Stage::new(secs(30), 5)));
        assert_eq!(
            "1m:100:spike".parse(),
            Ok(Stage::new(secs(60), 100).in_phase(Phase::Spike))
        );
        assert_eq!(
            "2m 30s:0".parse::<Stage>().map(|stage| stage.duration),
            Ok(secs(150))
        );
        for invalid in ["", "30s", "abc:5", "30s:-1", "30s:5:burst", "30s:5:spike:x"] {
            assert!(invalid.parse::<Stage>().is_err(), "{invalid}");
        }
    }

    #[test]
    fn empty_schedule_is_rejected() {
        assert_eq!(StageSchedule::new(vec![]), Err(StageError::Empty));
    }

    #[test]
    fn ramps_linearly_between_targets() {
        let schedule = StageSchedule::new(vec![
            Stage::new(secs(10), 10),
            Stage::new(secs(20), 10),
            Stage::new(secs(10), 0),
        ])
        .expect("non-empty");

        assert_eq!(schedule.total_duration(), secs(40));
        assert_eq!(schedule.peak(), 10);

        let target = |elapsed| schedule.position(elapsed).map(|position| position.target);
        assert_eq!(target(secs(0)), Some(0));
        assert_eq!(target(secs(5)), Some(5));
        assert_eq!(target(Duration::from_millis(9_990)), Some(9));
        assert_eq!(target(secs(10)), Some(10));
        assert_eq!(target(secs(29)), Some(10));
        assert_eq!(target(secs(35)), Some(5));
        assert_eq!(target(secs(40)), None);
    }

    #[test]
    fn positions_carry_the_stage_phase() {
        let schedule = StageSchedule::new(vec![
            Stage::new(secs(10), 5).in_phase(Phase::Baseline),
            Stage::new(secs(5), 100).in_phase(Phase::Spike),
            Stage::new(secs(10), 5).in_phase(Phase::Recovery),
        ])
        .expect("non-empty");

        let phase = |elapsed| schedule.position(elapsed).and_then(|position| position.phase);
        assert_eq!(phase(secs(3)), Some(Phase::Baseline));
        assert_eq!(phase(secs(12)), Some(Phase::Spike));
        assert_eq!(phase(secs(15)), Some(Phase::Recovery));
    }

    #[test]
    fn zero_length_stages_are_skipped() {
        let schedule =
            StageSchedule::new(vec![Stage::new(Duration::ZERO, 50), Stage::new(secs(10), 50)])
                .expect("non-empty");
        assert_eq!(
            schedule.position(secs(1)),
            Some(StagePosition {
                index: 1,
                target: 50,
                phase: None
            })
        );
    }

    #[test]
    fn stages_deserialize_from_yaml() {
        let stages: Vec<Stage> = serde_yaml::from_str(
            "- duration: 10s\n  target: 5\n- duration: 1m\n  target: 100\n  phase: spike\n",
        )
        .expect("valid yaml");
        assert_eq!(
            stages,
            vec![
                Stage::new(secs(10), 5),
                Stage::new(secs(60), 100).in_phase(Phase::Spike)
            ]
        );
    }
}
