use std::time::Duration;

use chrono::{FixedOffset, Offset, Utc};
use uuid::Uuid;

use crate::error::AppError;

/// Tuning for the ingestion worker.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Delay enforced between two consecutive records.
    pub throttle: Duration,
    /// How many leading records the descriptor sanity check inspects.
    pub sanity_sample: usize,
    /// Oldest accepted punch, in days, for single-value files.
    pub single_horizon_days: i64,
    /// Oldest accepted punch, in days, for multi-punch files.
    pub multi_horizon_days: i64,
    /// Offset of the wall-clock times written by the devices.
    pub device_offset: FixedOffset,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            throttle: Duration::from_secs(3),
            sanity_sample: 10,
            single_horizon_days: 31,
            multi_horizon_days: 60,
            device_offset: Utc.fix(),
        }
    }
}

impl IngestConfig {
    /// Read configuration from environment variables.
    ///
    /// - `PUNCHCARD_THROTTLE_MS` (optional, defaults to 3000)
    /// - `PUNCHCARD_SANITY_SAMPLE` (optional, defaults to 10)
    /// - `PUNCHCARD_DEVICE_UTC_OFFSET_MINUTES` (optional, defaults to 0)
    pub fn from_env() -> Result<Self, AppError> {
        let mut config = Self::default();
        if let Some(ms) = env_parse::<u64>("PUNCHCARD_THROTTLE_MS")? {
            config.throttle = Duration::from_millis(ms);
        }
        if let Some(sample) = env_parse::<usize>("PUNCHCARD_SANITY_SAMPLE")? {
            if sample == 0 {
                return Err(AppError::ConfigError(
                    "PUNCHCARD_SANITY_SAMPLE must be at least 1".into(),
                ));
            }
            config.sanity_sample = sample;
        }
        if let Some(minutes) = env_parse::<i32>("PUNCHCARD_DEVICE_UTC_OFFSET_MINUTES")? {
            config.device_offset = FixedOffset::east_opt(minutes * 60).ok_or_else(|| {
                AppError::ConfigError(format!(
                    "Invalid PUNCHCARD_DEVICE_UTC_OFFSET_MINUTES '{minutes}': out of range"
                ))
            })?;
        }
        Ok(config)
    }

    pub fn with_throttle(mut self, throttle: Duration) -> Self {
        self.throttle = throttle;
        self
    }

    pub fn with_sanity_sample(mut self, sample: usize) -> Self {
        self.sanity_sample = sample;
        self
    }
}

/// Configuration for the durable queue consumer.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub consumer_id: String,
    pub poll_interval: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            consumer_id: format!("consumer-{}", &Uuid::new_v4().to_string()[..8]),
            poll_interval: Duration::from_secs(2),
        }
    }
}

impl ConsumerConfig {
    /// Read configuration from environment variables.
    ///
    /// - `PUNCHCARD_POLL_INTERVAL_MS` (optional, defaults to 2000)
    pub fn from_env() -> Result<Self, AppError> {
        let mut config = Self::default();
        if let Some(ms) = env_parse::<u64>("PUNCHCARD_POLL_INTERVAL_MS")? {
            config.poll_interval = Duration::from_millis(ms);
        }
        Ok(config)
    }

    pub fn with_consumer_id(mut self, id: impl Into<String>) -> Self {
        self.consumer_id = id.into();
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Result<Option<T>, AppError> {
    match std::env::var(name) {
        Err(_) => Ok(None),
        Ok(raw) => raw.trim().parse().map(Some).map_err(|_| {
            AppError::ConfigError(format!("Invalid {name} '{raw}': expected a number"))
        }),
    }
}
