//! Host configuration from the environment.

use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use triggerhost_core::LeaseId;
use triggerhost_infra::{ConfigError, LeaseConfig, QueuePollerConfig};

pub const HOST_ID: &str = "TRIGGERHOST_HOST_ID";
pub const LEASE_NAME: &str = "TRIGGERHOST_LEASE_NAME";
pub const QUEUE_NAME: &str = "TRIGGERHOST_QUEUE_NAME";
pub const SINGLETON: &str = "TRIGGERHOST_SINGLETON";
pub const POISON_QUEUE: &str = "TRIGGERHOST_POISON_QUEUE";
pub const LEASE_DURATION_SECS: &str = "TRIGGERHOST_LEASE_DURATION_SECS";
pub const LEASE_RENEWAL_SECS: &str = "TRIGGERHOST_LEASE_RENEWAL_SECS";
pub const VISIBILITY_TIMEOUT_SECS: &str = "TRIGGERHOST_VISIBILITY_TIMEOUT_SECS";
pub const MAX_DEQUEUE_COUNT: &str = "TRIGGERHOST_MAX_DEQUEUE_COUNT";
pub const MAX_POLLING_INTERVAL_SECS: &str = "TRIGGERHOST_MAX_POLLING_INTERVAL_SECS";
pub const SEED_MESSAGES: &str = "TRIGGERHOST_SEED_MESSAGES";
pub const REDIS_URL: &str = "REDIS_URL";

/// Everything the `triggerhost` binary needs to start.
#[derive(Debug, Clone)]
pub struct HostConfig {
    pub lease_name: String,
    pub queue_name: String,
    /// Listen only while holding the lease.
    pub singleton: bool,
    /// Quarantine repeatedly failing messages into `{queue}-poison`.
    pub poison_queue: bool,
    pub lease: LeaseConfig,
    pub poller: QueuePollerConfig,
    /// Lease storage; in-memory when unset.
    pub redis_url: Option<String>,
    /// Bodies enqueued into the in-process queue at startup.
    pub seed_messages: Vec<String>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            lease_name: "triggerhost-singleton".to_string(),
            queue_name: "triggers".to_string(),
            singleton: true,
            poison_queue: true,
            lease: LeaseConfig::default(),
            poller: QueuePollerConfig::default(),
            redis_url: None,
            seed_messages: Vec::new(),
        }
    }
}

impl HostConfig {
    /// Read `TRIGGERHOST_*` variables (and `REDIS_URL`).
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Unset keys keep their defaults;
    /// malformed values are logged and ignored.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        let lookup = &lookup;

        if let Some(host_id) = parsed::<LeaseId>(lookup, HOST_ID) {
            config.lease.holder_id = host_id;
        }
        if let Some(name) = lookup(LEASE_NAME).filter(|name| !name.trim().is_empty()) {
            config.lease_name = name;
        }
        if let Some(name) = lookup(QUEUE_NAME).filter(|name| !name.trim().is_empty()) {
            config.queue_name = name;
        }
        if let Some(Flag(singleton)) = parsed(lookup, SINGLETON) {
            config.singleton = singleton;
        }
        if let Some(Flag(poison)) = parsed(lookup, POISON_QUEUE) {
            config.poison_queue = poison;
        }
        if let Some(secs) = parsed(lookup, LEASE_DURATION_SECS) {
            config.lease.lease_duration = Duration::from_secs(secs);
        }
        if let Some(secs) = parsed(lookup, LEASE_RENEWAL_SECS) {
            config.lease.renewal_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = parsed(lookup, VISIBILITY_TIMEOUT_SECS) {
            config.poller.visibility_timeout = Duration::from_secs(secs);
        }
        if let Some(count) = parsed(lookup, MAX_DEQUEUE_COUNT) {
            config.poller.max_dequeue_count = count;
        }
        if let Some(secs) = parsed(lookup, MAX_POLLING_INTERVAL_SECS) {
            config.poller.max_polling_interval = Duration::from_secs(secs);
        }
        config.redis_url = lookup(REDIS_URL).filter(|url| !url.trim().is_empty());
        if let Some(seeds) = lookup(SEED_MESSAGES) {
            config.seed_messages = seeds
                .split(',')
                .map(str::trim)
                .filter(|body| !body.is_empty())
                .map(str::to_string)
                .collect();
        }

        config
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.lease.validate()?;
        self.poller.validate()
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(key, value = %raw, "ignoring malformed configuration value; using default");
            None
        }
    }
}

/// Boolean accepting the usual spellings.
struct Flag(bool);

impl FromStr for Flag {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(Flag(true)),
            "0" | "false" | "no" | "off" => Ok(Flag(false)),
            _ => Err(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> HostConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        HostConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let config = config(&[]);
        assert_eq!(config.queue_name, "triggers");
        assert!(config.singleton);
        assert!(config.poison_queue);
        assert!(config.redis_url.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn reads_every_known_variable() {
        let id = LeaseId::new();
        let id_text = id.to_string();
        let config = config(&[
            (HOST_ID, id_text.as_str()),
            (LEASE_NAME, "jobs-lock"),
            (QUEUE_NAME, "jobs"),
            (SINGLETON, "false"),
            (POISON_QUEUE, "off"),
            (LEASE_DURATION_SECS, "30"),
            (LEASE_RENEWAL_SECS, "10"),
            (VISIBILITY_TIMEOUT_SECS, "120"),
            (MAX_DEQUEUE_COUNT, "3"),
            (MAX_POLLING_INTERVAL_SECS, "5"),
            (REDIS_URL, "redis://cache:6379"),
            (SEED_MESSAGES, "build, ,deploy"),
        ]);

        assert_eq!(config.lease.holder_id, id);
        assert_eq!(config.lease_name, "jobs-lock");
        assert_eq!(config.queue_name, "jobs");
        assert!(!config.singleton);
        assert!(!config.poison_queue);
        assert_eq!(config.lease.lease_duration, Duration::from_secs(30));
        assert_eq!(config.lease.renewal_interval, Duration::from_secs(10));
        assert_eq!(config.poller.visibility_timeout, Duration::from_secs(120));
        assert_eq!(config.poller.max_dequeue_count, 3);
        assert_eq!(config.poller.max_polling_interval, Duration::from_secs(5));
        assert_eq!(config.redis_url.as_deref(), Some("redis://cache:6379"));
        assert_eq!(config.seed_messages, ["build", "deploy"]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn malformed_values_fall_back_to_defaults() {
        let config = config(&[
            (HOST_ID, "not-a-uuid"),
            (SINGLETON, "maybe"),
            (LEASE_DURATION_SECS, "-3"),
            (QUEUE_NAME, "   "),
        ]);
        let defaults = HostConfig::default();

        assert!(config.singleton);
        assert_eq!(config.lease.lease_duration, defaults.lease.lease_duration);
        assert_eq!(config.queue_name, defaults.queue_name);
    }

    #[test]
    fn inconsistent_values_fail_validation() {
        let config = config(&[(LEASE_DURATION_SECS, "8"), (LEASE_RENEWAL_SECS, "4")]);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::RenewalTooSlow { .. })
        ));
    }

    #[test]
    fn oversized_durations_fail_validation_instead_of_panicking() {
        let max = u64::MAX.to_string();
        let renewal = config(&[(LEASE_RENEWAL_SECS, max.as_str())]);
        assert!(matches!(
            renewal.validate(),
            Err(ConfigError::RenewalTooSlow { .. })
        ));

        // An effectively unbounded lease or visibility window is accepted.
        let windows = config(&[
            (LEASE_DURATION_SECS, max.as_str()),
            (VISIBILITY_TIMEOUT_SECS, max.as_str()),
        ]);
        assert!(windows.validate().is_ok());
    }
}
