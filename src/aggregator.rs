//! Turns window readings into one final result per session.

use crate::classifier::LineReading;
use crate::config::{AggregationMode, CaptureConfig};
use log::{debug, info};
use serde::Serialize;

/// Final control/test outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct InterpretationResult {
    pub control: bool,
    pub test_a: bool,
    pub test_b: bool,
    /// Readings that contributed
    pub sample_count: usize,
    /// Readings the policy asks for
    pub required_sample_count: usize,
}

/// How readings are combined
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregationPolicy {
    /// First reading is the result
    SingleShot,
    /// Majority over exactly `samples` readings
    Voting { samples: usize },
}

impl AggregationPolicy {
    #[must_use]
    pub fn from_config(config: &CaptureConfig) -> Self {
        match config.aggregation {
            AggregationMode::SingleShot => Self::SingleShot,
            AggregationMode::Voting => Self::Voting {
                samples: config.vote_samples.max(1),
            },
        }
    }

    /// Readings needed before a result is produced
    #[must_use]
    pub const fn required_samples(self) -> usize {
        match self {
            Self::SingleShot => 1,
            Self::Voting { samples } => samples,
        }
    }
}

/// Collects readings and finalizes at most once
#[derive(Debug, Clone)]
pub struct InterpretationAggregator {
    policy: AggregationPolicy,
    readings: Vec<LineReading>,
    result: Option<InterpretationResult>,
}

impl InterpretationAggregator {
    #[must_use]
    pub fn new(policy: AggregationPolicy) -> Self {
        Self {
            policy,
            readings: Vec::with_capacity(policy.required_samples()),
            result: None,
        }
    }

    #[must_use]
    pub const fn policy(&self) -> AggregationPolicy {
        self.policy
    }

    /// Add a reading; returns the result only on the call that finalizes.
    ///
    /// Readings after finalization are ignored.
    pub fn add(&mut self, reading: LineReading) -> Option<InterpretationResult> {
        if self.result.is_some() {
            debug!("Result already delivered, ignoring reading");
            return None;
        }
        self.readings.push(reading);

        let required = self.policy.required_samples();
        if self.readings.len() < required {
            debug!("Collected {}/{required} readings", self.readings.len());
            return None;
        }

        let result = self.majority();
        info!(
            "Interpretation finalized: control={} test_a={} test_b={} ({} readings)",
            result.control, result.test_a, result.test_b, result.sample_count
        );
        self.result = Some(result);
        self.result
    }

    /// Delivered result, if any
    #[must_use]
    pub const fn result(&self) -> Option<InterpretationResult> {
        self.result
    }

    #[must_use]
    pub const fn is_finalized(&self) -> bool {
        self.result.is_some()
    }

    #[must_use]
    pub fn sample_count(&self) -> usize {
        self.readings.len()
    }

    /// Start over for a new session
    pub fn reset(&mut self) {
        self.readings.clear();
        self.result = None;
    }

    // A flag is set when at least half of the readings (rounded down, never zero) have it
    fn majority(&self) -> InterpretationResult {
        let n = self.readings.len();
        let quorum = (n / 2).max(1);
        let votes = |flag: fn(&LineReading) -> bool| self.readings.iter().filter(|r| flag(r)).count() >= quorum;
        InterpretationResult {
            control: votes(|r| r.control),
            test_a: votes(|r| r.test_a),
            test_b: votes(|r| r.test_b),
            sample_count: n,
            required_sample_count: self.policy.required_samples(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const fn reading(control: bool, test_a: bool, test_b: bool) -> LineReading {
        LineReading { control, test_a, test_b }
    }

    #[test]
    fn test_single_shot_finalizes_immediately() {
        let mut aggregator = InterpretationAggregator::new(AggregationPolicy::SingleShot);
        let result = aggregator.add(reading(true, false, true)).unwrap();
        assert!(result.control && !result.test_a && result.test_b);
        assert_eq!(result.sample_count, 1);
        assert!(aggregator.add(reading(false, false, false)).is_none());
        assert_eq!(aggregator.result(), Some(result));
    }

    #[test]
    fn test_voting_waits_for_all_samples() {
        let mut aggregator = InterpretationAggregator::new(AggregationPolicy::Voting { samples: 4 });
        assert!(aggregator.add(reading(true, true, false)).is_none());
        assert!(aggregator.add(reading(true, false, false)).is_none());
        assert!(aggregator.add(reading(true, false, false)).is_none());
        let result = aggregator.add(reading(false, true, false)).unwrap();

        // 3/4 control, 2/4 test A, 0/4 test B with quorum 2
        assert!(result.control);
        assert!(result.test_a);
        assert!(!result.test_b);
        assert_eq!(result.sample_count, 4);
        assert_eq!(result.required_sample_count, 4);
    }

    #[test]
    fn test_reset_allows_new_result() {
        let mut aggregator = InterpretationAggregator::new(AggregationPolicy::SingleShot);
        aggregator.add(reading(true, false, false));
        aggregator.reset();
        assert!(!aggregator.is_finalized());
        assert_eq!(aggregator.sample_count(), 0);
        assert!(aggregator.add(reading(false, false, false)).is_some());
    }

    #[test]
    fn test_policy_from_config() {
        let mut config = CaptureConfig::default();
        assert_eq!(AggregationPolicy::from_config(&config), AggregationPolicy::SingleShot);
        config.aggregation = AggregationMode::Voting;
        config.vote_samples = 0;
        assert_eq!(AggregationPolicy::from_config(&config).required_samples(), 1);
    }

    proptest! {
        #[test]
        fn test_finalizes_exactly_once(
            samples in 1usize..8,
            flags in prop::collection::vec((any::<bool>(), any::<bool>(), any::<bool>()), 1..24),
        ) {
            let mut aggregator = InterpretationAggregator::new(AggregationPolicy::Voting { samples });
            let mut delivered = Vec::new();
            for (c, a, b) in &flags {
                if let Some(result) = aggregator.add(reading(*c, *a, *b)) {
                    delivered.push(result);
                }
            }
            prop_assert_eq!(delivered.len(), usize::from(flags.len() >= samples));
            if let Some(first) = delivered.first() {
                prop_assert_eq!(first.sample_count, samples);
                prop_assert_eq!(aggregator.result(), Some(*first));
            }
        }
    }
}
