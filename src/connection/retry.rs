//! Reconnect burst and backoff settings.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Burst size substituted when a burst of zero is configured.
pub const DEFAULT_BURST: u32 = 5;

/// Retry discipline for the connection manager.
///
/// Attempts come in bursts of `burst` tries spaced `attempt_interval_ms`
/// apart. After a failed burst the manager sleeps for
/// `burst * rand[0, backoff_max_factor) * backoff_unit_ms` and starts over.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Connection attempts per burst
    #[serde(default = "default_burst")]
    pub burst: u32,

    /// Pause between attempts inside a burst, in milliseconds
    #[serde(default = "default_attempt_interval")]
    pub attempt_interval_ms: u64,

    /// Backoff unit between bursts, in milliseconds
    #[serde(default = "default_backoff_unit")]
    pub backoff_unit_ms: u64,

    /// Exclusive upper bound of the random backoff multiplier
    #[serde(default = "default_backoff_max_factor")]
    pub backoff_max_factor: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            burst: default_burst(),
            attempt_interval_ms: default_attempt_interval(),
            backoff_unit_ms: default_backoff_unit(),
            backoff_max_factor: default_backoff_max_factor(),
        }
    }
}

fn default_burst() -> u32 {
    1
}

fn default_attempt_interval() -> u64 {
    1000
}

fn default_backoff_unit() -> u64 {
    1000
}

fn default_backoff_max_factor() -> u32 {
    10
}

impl RetryConfig {
    /// Return a copy with a zero burst replaced by [`DEFAULT_BURST`].
    ///
    /// Zero attempts per burst would mean never connecting, which is not a
    /// meaningful setting.
    pub fn normalized(&self) -> Self {
        let mut config = self.clone();
        if config.burst == 0 {
            warn!(
                default = DEFAULT_BURST,
                "Retry burst of zero is not usable, falling back to default"
            );
            config.burst = DEFAULT_BURST;
        }
        config
    }

    /// Pause between two attempts of the same burst.
    pub fn attempt_interval(&self) -> Duration {
        Duration::from_millis(self.attempt_interval_ms)
    }

    /// Randomized pause after an exhausted burst.
    pub fn backoff(&self) -> Duration {
        self.backoff_with_rng(&mut rand::thread_rng())
    }

    /// Randomized pause using a caller-provided RNG.
    pub fn backoff_with_rng<R: Rng>(&self, rng: &mut R) -> Duration {
        let factor = if self.backoff_max_factor == 0 {
            0
        } else {
            rng.gen_range(0..self.backoff_max_factor)
        };
        let units = u64::from(self.burst).saturating_mul(u64::from(factor));
        Duration::from_millis(units.saturating_mul(self.backoff_unit_ms))
    }

    /// Largest pause [`RetryConfig::backoff`] can return.
    pub fn max_backoff(&self) -> Duration {
        let factor = u64::from(self.backoff_max_factor.saturating_sub(1));
        Duration::from_millis(
            u64::from(self.burst)
                .saturating_mul(factor)
                .saturating_mul(self.backoff_unit_ms),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_zero_burst_is_corrected() {
        let config = RetryConfig {
            burst: 0,
            ..Default::default()
        };
        assert_eq!(config.normalized().burst, DEFAULT_BURST);
    }

    #[test]
    fn test_nonzero_burst_is_kept() {
        let config = RetryConfig {
            burst: 3,
            ..Default::default()
        };
        assert_eq!(config.normalized().burst, 3);
    }

    #[test]
    fn test_backoff_is_bounded_and_proportional() {
        let config = RetryConfig {
            burst: 3,
            attempt_interval_ms: 10,
            backoff_unit_ms: 100,
            backoff_max_factor: 10,
        };
        let mut rng = StdRng::seed_from_u64(7);

        for _ in 0..200 {
            let backoff = config.backoff_with_rng(&mut rng);
            assert!(backoff <= config.max_backoff());
            // Always a whole number of burst-sized units.
            assert_eq!(backoff.as_millis() % 300, 0);
        }
        assert_eq!(config.max_backoff(), Duration::from_millis(2700));
    }

    #[test]
    fn test_zero_factor_means_no_backoff() {
        let config = RetryConfig {
            backoff_max_factor: 0,
            ..Default::default()
        };
        assert_eq!(config.backoff(), Duration::ZERO);
        assert_eq!(config.max_backoff(), Duration::ZERO);
    }
}
