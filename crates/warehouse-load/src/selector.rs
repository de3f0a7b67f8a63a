// Copyright (c) Walrus Foundation
// SPDX-License-Identifier: Apache-2.0

//! Weighted selection of the scenario each iteration runs.

use std::{collections::BTreeMap, fmt::Debug};

use rand::Rng;

/// Errors returned when building a [`WeightedSelector`].
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum SelectorError {
    /// No entries were given.
    #[error("at least one scenario is required")]
    Empty,
    /// A weight is negative, NaN or infinite.
    #[error("scenario {index} has invalid weight {weight}")]
    InvalidWeight {
        /// Position of the offending entry.
        index: usize,
        /// The offending weight.
        weight: f64,
    },
    /// A weight override names a scenario the profile does not have.
    #[error("unknown scenario: {0}")]
    UnknownScenario(String),
}

/// A scenario of a traffic profile.
pub trait Scenario: Copy + Debug + Send + Sync + 'static {
    /// Scenarios of the profile with their default relative weights.
    const DEFAULT_WEIGHTS: &'static [(Self, f64)];

    /// The name used in logs, metric tags and configuration.
    fn name(&self) -> &'static str;
}

/// Picks entries with probability proportional to their weight.
#[derive(Debug, Clone)]
pub struct WeightedSelector<T> {
    entries: Vec<(T, f64)>,
    total_weight: f64,
}

impl<T: Clone> WeightedSelector<T> {
    /// Creates a selector, rejecting empty lists and negative or non-finite weights.
    ///
    /// Zero weights are accepted and never selected.
    pub fn new(entries: Vec<(T, f64)>) -> Result<Self, SelectorError> {
        if entries.is_empty() {
            return Err(SelectorError::Empty);
        }
        if let Some((index, (_, weight))) = entries
            .iter()
            .enumerate()
            .find(|(_, (_, weight))| !weight.is_finite() || *weight < 0.0)
        {
            return Err(SelectorError::InvalidWeight {
                index,
                weight: *weight,
            });
        }
        let total_weight = entries.iter().map(|(_, weight)| weight).sum();
        Ok(Self {
            entries,
            total_weight,
        })
    }

    /// The sum of all weights.
    pub fn total_weight(&self) -> f64 {
        self.total_weight
    }

    /// The share of draws expected to select each entry.
    pub fn ratios(&self) -> impl Iterator<Item = (&T, f64)> {
        self.entries.iter().map(|(entry, weight)| {
            let ratio = if self.total_weight > 0.0 {
                weight / self.total_weight
            } else {
                0.0
            };
            (entry, ratio)
        })
    }

    /// Draws one entry.
    ///
    /// If floating-point drift exhausts the list, or all weights are zero, the last entry is
    /// returned.
    pub fn select<R: Rng + ?Sized>(&self, rng: &mut R) -> T {
        let mut remaining = rng.r#gen::<f64>() * self.total_weight;
        for (entry, weight) in &self.entries {
            if *weight <= 0.0 {
                continue;
            }
            remaining -= weight;
            if remaining <= 0.0 {
                return entry.clone();
            }
        }
        self.entries
            .last()
            .map(|(entry, _)| entry.clone())
            .expect("the selector is never empty")
    }
}

impl<S: Scenario> WeightedSelector<S> {
    /// A selector over the scenario's default weights, with `overrides` applied by name.
    pub fn for_scenarios(overrides: &BTreeMap<String, f64>) -> Result<Self, SelectorError> {
        if let Some(unknown) = overrides.keys().find(|name| {
            !S::DEFAULT_WEIGHTS
                .iter()
                .any(|(scenario, _)| scenario.name() == name.as_str())
        }) {
            return Err(SelectorError::UnknownScenario(unknown.clone()));
        }

        Self::new(
            S::DEFAULT_WEIGHTS
                .iter()
                .map(|(scenario, weight)| {
                    let weight = overrides.get(scenario.name()).copied().unwrap_or(*weight);
                    (*scenario, weight)
                })
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use rand::{SeedableRng, rngs::StdRng, rngs::mock::StepRng};

    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
    enum Flow {
        Create,
        Pick,
        Monitor,
    }

    impl Scenario for Flow {
        const DEFAULT_WEIGHTS: &'static [(Self, f64)] =
            &[(Flow::Create, 50.0), (Flow::Pick, 30.0), (Flow::Monitor, 20.0)];

        fn name(&self) -> &'static str {
            match self {
                Flow::Create => "create",
                Flow::Pick => "pick",
                Flow::Monitor => "monitor",
            }
        }
    }

    #[test]
    fn selection_converges_to_weight_ratios() {
        let selector =
            WeightedSelector::<Flow>::for_scenarios(&BTreeMap::new()).expect("valid weights");
        let mut rng = StdRng::seed_from_u64(7);
        let draws = 100_000;

        let mut counts = BTreeMap::new();
        for _ in 0..draws {
            *counts.entry(selector.select(&mut rng)).or_insert(0u32) += 1;
        }

        for (flow, expected) in selector.ratios() {
            let observed = f64::from(counts[flow]) / f64::from(draws);
            assert!(
                (observed - expected).abs() < 0.01,
                "{flow:?}: observed {observed}, expected {expected}"
            );
        }
    }

    #[test]
    fn zero_weight_is_never_selected() {
        let selector =
            WeightedSelector::new(vec![("a", 1.0), ("never", 0.0), ("b", 1.0)]).expect("valid");
        let mut rng = StdRng::seed_from_u64(1);
        assert!((0..10_000).all(|_| selector.select(&mut rng) != "never"));
    }

    #[test]
    fn all_zero_weights_return_the_last_entry() {
        let selector = WeightedSelector::new(vec![("a", 0.0), ("b", 0.0)]).expect("valid");
        let mut rng = StdRng::seed_from_u64(3);
        assert_eq!(selector.select(&mut rng), "b");
    }

    #[test]
    fn exhausted_list_falls_back_to_last_entry() {
        // A draw just below 1.0 may leave a tiny positive remainder after the last positive weight.
        let selector =
            WeightedSelector::new(vec![("a", 0.1), ("b", 0.2), ("c", 0.0)]).expect("valid");
        let mut rng = StepRng::new(u64::MAX, 0);
        let selected = selector.select(&mut rng);
        assert!(selected == "b" || selected == "c");

        let draw_max = WeightedSelector::new(vec![("x", 1.0)]).expect("valid");
        assert_eq!(draw_max.select(&mut rng), "x");
    }

    #[test]
    fn invalid_weights_are_rejected() {
        assert_eq!(
            WeightedSelector::<&str>::new(vec![]).unwrap_err(),
            SelectorError::Empty
        );
        assert!(matches!(
            WeightedSelector::new(vec![("a", 1.0), ("b", -2.0)]),
            Err(SelectorError::InvalidWeight { index: 1, .. })
        ));
        assert!(matches!(
            WeightedSelector::new(vec![("a", f64::NAN)]),
            Err(SelectorError::InvalidWeight { index: 0, .. })
        ));
        assert!(matches!(
            WeightedSelector::new(vec![("a", f64::INFINITY)]),
            Err(SelectorError::InvalidWeight { index: 0, .. })
        ));
    }

    #[test]
    fn overrides_replace_weights_by_name() {
        let overrides = BTreeMap::from([("pick".to_owned(), 0.0), ("monitor".to_owned(), 0.0)]);
        let selector = WeightedSelector::<Flow>::for_scenarios(&overrides).expect("valid");
        assert_eq!(selector.total_weight(), 50.0);
        let mut rng = StdRng::seed_from_u64(11);
        assert!((0..1_000).all(|_| selector.select(&mut rng) == Flow::Create));

        let unknown = BTreeMap::from([("bulk".to_owned(), 1.0)]);
        assert_eq!(
            WeightedSelector::<Flow>::for_scenarios(&unknown).unwrap_err(),
            SelectorError::UnknownScenario("bulk".to_owned())
        );
    }
}
