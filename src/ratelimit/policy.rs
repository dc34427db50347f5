//! Rate limit policy: one global limit over one trailing timespan.

use std::time::Duration;

use chrono::Duration as ChronoDuration;
use serde::{Deserialize, Serialize};

use crate::error::{GateError, Result};

/// How the engine pairs the count with the write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Consistency {
    /// Count, then append in a separate round trip.
    ///
    /// Concurrent evaluations for the same identity can all observe room
    /// and all write, overshooting the limit by the number of racers.
    #[default]
    CountThenInsert,
    /// Count and append as one atomic store operation. Requires a store
    /// that supports it.
    Atomic,
}

/// Immutable limit/timespan pair shared by every evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Policy {
    limit: u64,
    timespan: Duration,
    window: ChronoDuration,
    consistency: Consistency,
}

impl Policy {
    /// Create a policy. Both `limit` and `timespan` must be non-zero.
    pub fn new(limit: u64, timespan: Duration) -> Result<Self> {
        if limit == 0 {
            return Err(GateError::Config("limit must be a positive integer".to_string()));
        }
        if timespan.is_zero() {
            return Err(GateError::Config("timespan must be a positive duration".to_string()));
        }
        let window = ChronoDuration::from_std(timespan)
            .map_err(|_| GateError::Config(format!("timespan {:?} is out of range", timespan)))?;

        Ok(Self {
            limit,
            timespan,
            window,
            consistency: Consistency::default(),
        })
    }

    /// Use the given consistency mode.
    pub fn with_consistency(mut self, consistency: Consistency) -> Self {
        self.consistency = consistency;
        self
    }

    /// Maximum admitted accesses per window.
    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Length of the trailing window.
    pub fn timespan(&self) -> Duration {
        self.timespan
    }

    /// The timespan as a calendar duration, for timestamp arithmetic.
    pub fn window(&self) -> ChronoDuration {
        self.window
    }

    /// How counting and recording are paired.
    pub fn consistency(&self) -> Consistency {
        self.consistency
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_accepts_positive_values() {
        let policy = Policy::new(3, Duration::from_secs(60)).unwrap();
        assert_eq!(policy.limit(), 3);
        assert_eq!(policy.timespan(), Duration::from_secs(60));
        assert_eq!(policy.window(), ChronoDuration::seconds(60));
        assert_eq!(policy.consistency(), Consistency::CountThenInsert);
    }

    #[test]
    fn test_policy_rejects_zero_limit() {
        assert!(matches!(
            Policy::new(0, Duration::from_secs(60)),
            Err(GateError::Config(_))
        ));
    }

    #[test]
    fn test_policy_rejects_zero_timespan() {
        assert!(matches!(Policy::new(3, Duration::ZERO), Err(GateError::Config(_))));
    }

    #[test]
    fn test_policy_rejects_unrepresentable_timespan() {
        assert!(Policy::new(3, Duration::MAX).is_err());
    }

    #[test]
    fn test_consistency_parses_snake_case() {
        let mode: Consistency = serde_yaml::from_str("atomic").unwrap();
        assert_eq!(mode, Consistency::Atomic);
        let mode: Consistency = serde_yaml::from_str("count_then_insert").unwrap();
        assert_eq!(mode, Consistency::CountThenInsert);
    }
}
