//! Exponential backoff between same-node retries.

use std::time::Duration;

use thiserror::Error;

/// Backoff configuration errors.
#[derive(Debug, Error, Clone, Copy, Eq, PartialEq)]
pub enum BackoffError {
    /// Minimum delay exceeds maximum delay.
    #[error("min backoff {min:?} exceeds max backoff {max:?}")]
    MinExceedsMax {
        /// Requested minimum.
        min: Duration,
        /// Requested maximum.
        max: Duration,
    },
}

/// Doubling delay schedule bounded by `[min, max]`.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct BackoffPolicy {
    /// Delay before the first same-node retry is doubled.
    min: Duration,
    /// Upper bound on any delay.
    max: Duration,
}

impl BackoffPolicy {
    /// Default minimum delay.
    pub const DEFAULT_MIN: Duration = Duration::from_millis(250);
    /// Default maximum delay.
    pub const DEFAULT_MAX: Duration = Duration::from_secs(8);

    /// Creates a policy.
    ///
    /// # Errors
    ///
    /// Returns [`BackoffError::MinExceedsMax`] when `min > max`.
    pub fn new(min: Duration, max: Duration) -> Result<Self, BackoffError> {
        if min > max {
            return Err(BackoffError::MinExceedsMax { min, max });
        }
        Ok(Self { min, max })
    }

    /// Returns the minimum delay.
    #[must_use]
    pub const fn min(&self) -> Duration {
        self.min
    }

    /// Returns the maximum delay.
    #[must_use]
    pub const fn max(&self) -> Duration {
        self.max
    }

    /// Returns `min(max, min * 2^consecutive_failures)`.
    #[must_use]
    pub fn delay_for(&self, consecutive_failures: u32) -> Duration {
        1_u32
            .checked_shl(consecutive_failures)
            .and_then(|factor| self.min.checked_mul(factor))
            .map_or(self.max, |delay| delay.min(self.max))
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            min: Self::DEFAULT_MIN,
            max: Self::DEFAULT_MAX,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn min_above_max_is_rejected_at_construction() {
        let result = BackoffPolicy::new(Duration::from_secs(2), Duration::from_secs(1));
        assert_eq!(
            result,
            Err(BackoffError::MinExceedsMax {
                min: Duration::from_secs(2),
                max: Duration::from_secs(1),
            })
        );
        assert!(BackoffPolicy::new(Duration::from_secs(1), Duration::from_secs(1)).is_ok());
    }

    #[test]
    fn delay_doubles_then_caps() {
        let policy = BackoffPolicy::new(Duration::from_millis(100), Duration::from_millis(1_000));
        assert!(policy.is_ok());
        if let Ok(policy) = policy {
            for failures in 0..40_u32 {
                let expected = (0..failures)
                    .try_fold(Duration::from_millis(100), |delay, _| delay.checked_mul(2))
                    .map_or(policy.max(), |delay| delay.min(policy.max()));
                assert_eq!(policy.delay_for(failures), expected, "failures={failures}");
            }
            assert_eq!(policy.delay_for(3), Duration::from_millis(800));
            assert_eq!(policy.delay_for(4), Duration::from_millis(1_000));
            assert_eq!(policy.delay_for(u32::MAX), Duration::from_millis(1_000));
        }
    }

    #[test]
    fn zero_minimum_never_delays() {
        let policy = BackoffPolicy::new(Duration::ZERO, Duration::from_secs(1));
        assert!(matches!(policy, Ok(policy) if policy.delay_for(10) == Duration::ZERO));
    }
}
