//! Coordinator and poller configuration.

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use triggerhost_core::LeaseId;

/// Rejected configuration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error(
        "lease renewal interval {renewal:?} must be less than half the lease duration {duration:?}"
    )]
    RenewalTooSlow { renewal: Duration, duration: Duration },

    #[error("{name}: minimum {min:?} exceeds maximum {max:?}")]
    Range {
        name: &'static str,
        min: Duration,
        max: Duration,
    },

    #[error("max dequeue count must be at least 1")]
    DequeueCount,

    #[error(
        "visibility timeout {visibility:?} must be at least twice the minimum renewal interval {min_renewal:?}"
    )]
    VisibilityTooShort {
        visibility: Duration,
        min_renewal: Duration,
    },
}

/// Lease coordinator settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeaseConfig {
    /// Identity the lease is acquired under.
    pub holder_id: LeaseId,
    pub lease_duration: Duration,
    /// Cadence of acquire attempts while unheld and renewals while held.
    pub renewal_interval: Duration,
    /// Floor for the renewal interval after failed renewals.
    pub min_retry_interval: Duration,
    /// How long shutdown waits for an in-flight step.
    pub stop_timeout: Duration,
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            holder_id: LeaseId::new(),
            lease_duration: Duration::from_secs(15),
            renewal_interval: Duration::from_secs(5),
            min_retry_interval: Duration::from_secs(1),
            stop_timeout: Duration::from_secs(30),
        }
    }
}

impl LeaseConfig {
    pub fn with_holder_id(mut self, holder_id: LeaseId) -> Self {
        self.holder_id = holder_id;
        self
    }

    pub fn with_lease_duration(mut self, duration: Duration) -> Self {
        self.lease_duration = duration;
        self
    }

    pub fn with_renewal_interval(mut self, interval: Duration) -> Self {
        self.renewal_interval = interval;
        self
    }

    pub fn with_min_retry_interval(mut self, interval: Duration) -> Self {
        self.min_retry_interval = interval;
        self
    }

    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    /// A renewal must fit twice into the lease so one failed attempt can be
    /// retried before expiry.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.lease_duration.is_zero() {
            return Err(ConfigError::Zero("lease duration"));
        }
        if self.renewal_interval.is_zero() {
            return Err(ConfigError::Zero("lease renewal interval"));
        }
        if self.min_retry_interval.is_zero() {
            return Err(ConfigError::Zero("lease minimum retry interval"));
        }
        if self
            .renewal_interval
            .checked_mul(2)
            .is_none_or(|twice| twice >= self.lease_duration)
        {
            return Err(ConfigError::RenewalTooSlow {
                renewal: self.renewal_interval,
                duration: self.lease_duration,
            });
        }
        if self.min_retry_interval > self.renewal_interval {
            return Err(ConfigError::Range {
                name: "lease retry interval",
                min: self.min_retry_interval,
                max: self.renewal_interval,
            });
        }
        Ok(())
    }
}

/// Queue poller settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueuePollerConfig {
    /// How long a dequeued message stays hidden from other consumers.
    pub visibility_timeout: Duration,
    /// Failed messages dequeued this many times are quarantined.
    pub max_dequeue_count: u32,
    pub min_polling_interval: Duration,
    pub max_polling_interval: Duration,
    /// Cap on the visibility renewal cadence.
    pub max_renewal_interval: Duration,
    /// Floor for the renewal cadence after failed renewals.
    pub min_renewal_interval: Duration,
    pub stop_timeout: Duration,
}

impl Default for QueuePollerConfig {
    fn default() -> Self {
        Self {
            visibility_timeout: Duration::from_secs(10 * 60),
            max_dequeue_count: 5,
            min_polling_interval: Duration::from_millis(100),
            max_polling_interval: Duration::from_secs(60),
            max_renewal_interval: Duration::from_secs(60),
            min_renewal_interval: Duration::from_secs(1),
            stop_timeout: Duration::from_secs(30),
        }
    }
}

impl QueuePollerConfig {
    pub fn with_visibility_timeout(mut self, timeout: Duration) -> Self {
        self.visibility_timeout = timeout;
        self
    }

    pub fn with_max_dequeue_count(mut self, count: u32) -> Self {
        self.max_dequeue_count = count;
        self
    }

    pub fn with_polling_range(mut self, min: Duration, max: Duration) -> Self {
        self.min_polling_interval = min;
        self.max_polling_interval = max;
        self
    }

    pub fn with_renewal_range(mut self, min: Duration, max: Duration) -> Self {
        self.min_renewal_interval = min;
        self.max_renewal_interval = max;
        self
    }

    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    /// Visibility renewal cadence: half the window, capped, never below the
    /// renewal floor.
    pub fn renewal_interval(&self) -> Duration {
        (self.visibility_timeout / 2)
            .min(self.max_renewal_interval)
            .max(self.min_renewal_interval)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.visibility_timeout.is_zero() {
            return Err(ConfigError::Zero("visibility timeout"));
        }
        if self.max_dequeue_count == 0 {
            return Err(ConfigError::DequeueCount);
        }
        if self.min_polling_interval.is_zero() {
            return Err(ConfigError::Zero("minimum polling interval"));
        }
        if self.min_polling_interval > self.max_polling_interval {
            return Err(ConfigError::Range {
                name: "polling interval",
                min: self.min_polling_interval,
                max: self.max_polling_interval,
            });
        }
        if self.min_renewal_interval.is_zero() {
            return Err(ConfigError::Zero("minimum renewal interval"));
        }
        if self.min_renewal_interval > self.max_renewal_interval {
            return Err(ConfigError::Range {
                name: "renewal interval",
                min: self.min_renewal_interval,
                max: self.max_renewal_interval,
            });
        }
        if self
            .min_renewal_interval
            .checked_mul(2)
            .is_none_or(|twice| self.visibility_timeout < twice)
        {
            return Err(ConfigError::VisibilityTooShort {
                visibility: self.visibility_timeout,
                min_renewal: self.min_renewal_interval,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert_eq!(LeaseConfig::default().validate(), Ok(()));
        assert_eq!(QueuePollerConfig::default().validate(), Ok(()));
    }

    #[test]
    fn renewal_must_be_strictly_below_half_the_lease() {
        let config = LeaseConfig::default()
            .with_lease_duration(Duration::from_secs(10))
            .with_renewal_interval(Duration::from_secs(5));

        assert!(matches!(config.validate(), Err(ConfigError::RenewalTooSlow { .. })));
        assert_eq!(
            config
                .with_renewal_interval(Duration::from_millis(4999))
                .validate(),
            Ok(())
        );
    }

    #[test]
    fn zero_durations_are_rejected() {
        let config = LeaseConfig::default().with_renewal_interval(Duration::ZERO);
        assert_eq!(config.validate(), Err(ConfigError::Zero("lease renewal interval")));

        let config = QueuePollerConfig::default().with_visibility_timeout(Duration::ZERO);
        assert_eq!(config.validate(), Err(ConfigError::Zero("visibility timeout")));
    }

    #[test]
    fn inverted_ranges_are_rejected() {
        let config = QueuePollerConfig::default()
            .with_polling_range(Duration::from_secs(10), Duration::from_secs(1));
        assert!(matches!(config.validate(), Err(ConfigError::Range { name: "polling interval", .. })));

        let config = QueuePollerConfig::default().with_max_dequeue_count(0);
        assert_eq!(config.validate(), Err(ConfigError::DequeueCount));
    }

    #[test]
    fn renewal_interval_is_half_the_window_up_to_the_cap() {
        let config = QueuePollerConfig::default().with_visibility_timeout(Duration::from_secs(30));
        assert_eq!(config.renewal_interval(), Duration::from_secs(15));

        // 10 minute default window is capped at one minute.
        assert_eq!(QueuePollerConfig::default().renewal_interval(), Duration::from_secs(60));
    }

    #[test]
    fn oversized_renewal_interval_is_rejected_not_overflowed() {
        let config = LeaseConfig::default().with_renewal_interval(Duration::MAX);
        assert!(matches!(config.validate(), Err(ConfigError::RenewalTooSlow { .. })));

        let config = LeaseConfig::default()
            .with_lease_duration(Duration::MAX)
            .with_renewal_interval(Duration::from_secs(u64::MAX));
        assert!(matches!(config.validate(), Err(ConfigError::RenewalTooSlow { .. })));
    }

    #[test]
    fn visibility_must_cover_two_renewals() {
        let config = QueuePollerConfig::default().with_visibility_timeout(Duration::from_nanos(3));
        assert_eq!(
            config.validate(),
            Err(ConfigError::VisibilityTooShort {
                visibility: Duration::from_nanos(3),
                min_renewal: Duration::from_secs(1),
            })
        );

        let config = QueuePollerConfig::default()
            .with_visibility_timeout(Duration::from_secs(2))
            .with_renewal_range(Duration::from_secs(1), Duration::from_secs(60));
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn renewal_interval_never_drops_below_the_floor() {
        let config = QueuePollerConfig::default()
            .with_visibility_timeout(Duration::from_nanos(3))
            .with_renewal_range(Duration::from_millis(250), Duration::from_secs(60));
        assert_eq!(config.renewal_interval(), Duration::from_millis(250));
    }
}
