//! Outbox configuration loaded from `HERALD_*` environment variables.

use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Longest accepted retention window.
pub const MAX_RETENTION_DAYS: i64 = 36_500;
/// Longest accepted stale-processing grace period.
pub const MAX_STALE_GRACE_SECS: i64 = 30 * 24 * 60 * 60;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{key} has an invalid value '{value}'")]
    Invalid { key: &'static str, value: String },
}

/// Configuration of the whole outbox host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboxConfig {
    pub processor: ProcessorOptions,
    pub scheduler: SchedulerOptions,
    pub retention: RetentionOptions,
    pub reaper: ReaperOptions,
}

/// Batch processor settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessorOptions {
    /// Envelopes claimed per tick
    pub batch_size: usize,
    /// How long to wait for a per-message lock; zero means try once
    pub lock_timeout: Duration,
    /// Identifier recorded in `processed_by_machine`
    pub node_id: String,
    /// Max characters of an error kept in the batch report
    pub error_snippet_chars: usize,
}

/// Poll timer settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerOptions {
    pub polling_interval: Duration,
}

/// Retention sweep settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionOptions {
    pub interval: Duration,
    /// `Processed` envelopes older than this are hard-deleted
    pub window: chrono::Duration,
    /// Rows deleted per statement
    pub delete_batch_size: usize,
}

/// Stale-processing reaper settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReaperOptions {
    pub enabled: bool,
    pub interval: Duration,
    /// How long an envelope may sit in `Processing` before it is requeued
    pub stale_after: chrono::Duration,
    pub batch_size: usize,
}

impl Default for ProcessorOptions {
    fn default() -> Self {
        Self {
            batch_size: 20,
            lock_timeout: Duration::ZERO,
            node_id: default_node_id(),
            error_snippet_chars: 200,
        }
    }
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            polling_interval: Duration::from_secs(5),
        }
    }
}

impl Default for RetentionOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(24 * 60 * 60),
            window: chrono::Duration::days(30),
            delete_batch_size: 500,
        }
    }
}

impl Default for ReaperOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(60),
            stale_after: chrono::Duration::minutes(10),
            batch_size: 100,
        }
    }
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            processor: ProcessorOptions::default(),
            scheduler: SchedulerOptions::default(),
            retention: RetentionOptions::default(),
            reaper: ReaperOptions::default(),
        }
    }
}

impl OutboxConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through `lookup`; unset keys keep their default.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let vars = Vars { lookup: &lookup };

        Self {
            processor: ProcessorOptions {
                batch_size: vars.parse("HERALD_BATCH_SIZE", defaults.processor.batch_size)?,
                lock_timeout: Duration::from_millis(
                    vars.parse("HERALD_LOCK_TIMEOUT_MS", defaults.processor.lock_timeout.as_millis() as u64)?,
                ),
                node_id: vars.get("HERALD_NODE_ID").unwrap_or(defaults.processor.node_id),
                error_snippet_chars: defaults.processor.error_snippet_chars,
            },
            scheduler: SchedulerOptions {
                polling_interval: Duration::from_millis(vars.parse(
                    "HERALD_POLL_INTERVAL_MS",
                    defaults.scheduler.polling_interval.as_millis() as u64,
                )?),
            },
            retention: RetentionOptions {
                interval: Duration::from_secs(vars.parse(
                    "HERALD_RETENTION_INTERVAL_SECS",
                    defaults.retention.interval.as_secs(),
                )?),
                window: vars.parse_span(
                    "HERALD_RETENTION_DAYS",
                    defaults.retention.window,
                    chrono::Duration::try_days,
                )?,
                delete_batch_size: vars.parse(
                    "HERALD_RETENTION_BATCH_SIZE",
                    defaults.retention.delete_batch_size,
                )?,
            },
            reaper: ReaperOptions {
                enabled: vars.parse_bool("HERALD_REAPER_ENABLED", defaults.reaper.enabled)?,
                interval: Duration::from_secs(
                    vars.parse("HERALD_REAPER_INTERVAL_SECS", defaults.reaper.interval.as_secs())?,
                ),
                stale_after: vars.parse_span(
                    "HERALD_STALE_GRACE_SECS",
                    defaults.reaper.stale_after,
                    chrono::Duration::try_seconds,
                )?,
                batch_size: vars.parse("HERALD_REAPER_BATCH_SIZE", defaults.reaper.batch_size)?,
            },
        }
        .validated()
    }

    fn validated(self) -> Result<Self, ConfigError> {
        let positive = [
            ("HERALD_BATCH_SIZE", self.processor.batch_size as u128),
            ("HERALD_POLL_INTERVAL_MS", self.scheduler.polling_interval.as_millis()),
            ("HERALD_RETENTION_INTERVAL_SECS", self.retention.interval.as_millis()),
            ("HERALD_RETENTION_BATCH_SIZE", self.retention.delete_batch_size as u128),
            ("HERALD_REAPER_INTERVAL_SECS", self.reaper.interval.as_millis()),
            ("HERALD_REAPER_BATCH_SIZE", self.reaper.batch_size as u128),
        ];
        if let Some((key, _)) = positive.into_iter().find(|(_, v)| *v == 0) {
            return Err(ConfigError::Invalid {
                key,
                value: "0".to_string(),
            });
        }
        if self.retention.window <= chrono::Duration::zero()
            || self.retention.window > chrono::Duration::days(MAX_RETENTION_DAYS)
        {
            return Err(ConfigError::Invalid {
                key: "HERALD_RETENTION_DAYS",
                value: self.retention.window.num_days().to_string(),
            });
        }
        if self.reaper.stale_after <= chrono::Duration::zero()
            || self.reaper.stale_after > chrono::Duration::seconds(MAX_STALE_GRACE_SECS)
        {
            return Err(ConfigError::Invalid {
                key: "HERALD_STALE_GRACE_SECS",
                value: self.reaper.stale_after.num_seconds().to_string(),
            });
        }
        Ok(self)
    }
}

struct Vars<'a, F> {
    lookup: &'a F,
}

impl<F: Fn(&str) -> Option<String>> Vars<'_, F> {
    fn get(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T: FromStr>(&self, key: &'static str, default: T) -> Result<T, ConfigError> {
        match self.get(key) {
            None => Ok(default),
            Some(value) => value.parse().map_err(|_| ConfigError::Invalid { key, value }),
        }
    }

    fn parse_span(
        &self,
        key: &'static str,
        default: chrono::Duration,
        unit: fn(i64) -> Option<chrono::Duration>,
    ) -> Result<chrono::Duration, ConfigError> {
        match self.get(key) {
            None => Ok(default),
            Some(value) => value
                .parse()
                .ok()
                .and_then(unit)
                .ok_or(ConfigError::Invalid { key, value }),
        }
    }

    fn parse_bool(&self, key: &'static str, default: bool) -> Result<bool, ConfigError> {
        match self.get(key) {
            None => Ok(default),
            Some(value) => match value.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Ok(true),
                "0" | "false" | "no" | "off" => Ok(false),
                _ => Err(ConfigError::Invalid { key, value }),
            },
        }
    }
}

/// `HOSTNAME` when set, otherwise `node-{pid}`.
pub fn default_node_id() -> String {
    env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.trim().is_empty())
        .unwrap_or_else(|| format!("node-{}", std::process::id()))
}
