//! JSON configuration for the simulators and their sessions.
//!
//! Every field is optional; missing fields take the defaults of the
//! corresponding model.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cache::{self, CacheLeakageModel};
use crate::error::{ensure_non_negative, Error, Result};
use crate::leakage::ModelKind;
use crate::power::{self, PowerLeakageModel};
use crate::recover::DEFAULT_THRESHOLD;
use crate::timing::{self, TimingLeakageModel};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub cache: CacheConfig,
    pub power: PowerConfig,
    pub timing: TimingConfig,
    pub session: SessionSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    pub hit_latency: f64,
    pub miss_latency: f64,
    pub noise_std: f64,
    pub monitored_index: u8,
    pub secret: u8,
    pub threshold: f64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            hit_latency: cache::HIT_LATENCY,
            miss_latency: cache::MISS_LATENCY,
            noise_std: cache::NOISE_STD,
            monitored_index: cache::MONITORED_INDEX,
            secret: cache::SECRET,
            threshold: DEFAULT_THRESHOLD,
        }
    }
}

impl CacheConfig {
    pub fn build(&self) -> Result<CacheLeakageModel> {
        CacheLeakageModel::new(
            self.hit_latency,
            self.miss_latency,
            self.noise_std,
            self.monitored_index,
            self.secret,
        )?
        .with_threshold(self.threshold)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PowerConfig {
    pub bit_width: u32,
    pub base_power: f64,
    pub transition_power: f64,
    pub leakage_power: f64,
}

impl Default for PowerConfig {
    fn default() -> Self {
        Self {
            bit_width: power::BIT_WIDTH,
            base_power: power::BASE_POWER,
            transition_power: power::TRANSITION_POWER,
            leakage_power: power::LEAKAGE_POWER,
        }
    }
}

impl PowerConfig {
    pub fn build(&self) -> Result<PowerLeakageModel> {
        PowerLeakageModel::new(
            self.bit_width,
            self.base_power,
            self.transition_power,
            self.leakage_power,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TimingConfig {
    pub base_time: f64,
    pub char_delay: f64,
    pub jitter_std: f64,
    pub secret: String,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            base_time: timing::BASE_TIME,
            char_delay: timing::CHAR_DELAY,
            jitter_std: timing::JITTER_STD,
            secret: timing::SECRET.to_string(),
        }
    }
}

impl TimingConfig {
    pub fn build(&self) -> Result<TimingLeakageModel> {
        TimingLeakageModel::new(
            self.base_time,
            self.char_delay,
            self.jitter_std,
            self.secret.clone(),
        )
    }
}

/// Session parameters as written in the file. Unset sizes fall back to the
/// per-channel defaults of [`ModelKind`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionSettings {
    pub batch_size: Option<usize>,
    pub duration_secs: f64,
    pub window: Option<usize>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            batch_size: None,
            duration_secs: 10.0,
            window: None,
        }
    }
}

/// Validated session parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    pub batch_size: usize,
    pub duration: Duration,
    pub window: usize,
}

impl SessionConfig {
    pub fn new(batch_size: usize, duration: Duration, window: usize) -> Result<Self> {
        if batch_size == 0 {
            return Err(Error::config("batch_size", "must be at least 1"));
        }
        if window == 0 {
            return Err(Error::config("window", "must be at least 1"));
        }
        Ok(Self {
            batch_size,
            duration,
            window,
        })
    }

    pub fn for_kind(kind: ModelKind, duration: Duration) -> Self {
        Self {
            batch_size: kind.default_batch_size(),
            duration,
            window: kind.default_window(),
        }
    }
}

impl Config {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }

    pub fn session_for(&self, kind: ModelKind) -> Result<SessionConfig> {
        let settings = &self.session;
        ensure_non_negative("duration_secs", settings.duration_secs)?;
        let duration = Duration::try_from_secs_f64(settings.duration_secs)
            .map_err(|e| Error::config("duration_secs", e.to_string()))?;
        SessionConfig::new(
            settings.batch_size.unwrap_or_else(|| kind.default_batch_size()),
            duration,
            settings.window.unwrap_or_else(|| kind.default_window()),
        )
    }

    /// Builds every model once so a bad file fails before anything runs.
    pub fn validate(&self) -> Result<()> {
        self.cache.build()?;
        self.power.build()?;
        self.timing.build()?;
        for kind in [ModelKind::Cache, ModelKind::Power, ModelKind::Timing] {
            self.session_for(kind)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_gives_defaults() {
        let config = Config::from_json_str("{}").unwrap();
        assert_eq!(config, Config::default());
        assert!(config.validate().is_ok());
        let session = config.session_for(ModelKind::Cache).unwrap();
        assert_eq!(session.batch_size, 50);
        assert_eq!(session.window, 100);
        assert_eq!(session.duration, Duration::from_secs(10));
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = Config::from_json_str(
            r#"{ "cache": { "secret": 17, "noise_std": 0.0 },
                 "timing": { "secret": "hunter2" },
                 "session": { "batch_size": 7 } }"#,
        )
        .unwrap();
        assert_eq!(config.cache.secret, 17);
        assert_eq!(config.cache.hit_latency, cache::HIT_LATENCY);
        assert_eq!(config.timing.build().unwrap().secret_len(), 7);
        assert_eq!(config.session_for(ModelKind::Timing).unwrap().batch_size, 7);
        assert_eq!(config.session_for(ModelKind::Timing).unwrap().window, 200);
    }

    #[test]
    fn invalid_values_fail_validation() {
        let negative = Config::from_json_str(r#"{ "cache": { "noise_std": -2.0 } }"#).unwrap();
        assert!(matches!(
            negative.validate(),
            Err(Error::InvalidConfig { field: "noise_std", .. })
        ));

        let empty = Config::from_json_str(r#"{ "timing": { "secret": "" } }"#).unwrap();
        assert!(empty.validate().is_err());

        let zero = Config::from_json_str(r#"{ "session": { "batch_size": 0 } }"#).unwrap();
        assert!(matches!(
            zero.session_for(ModelKind::Power),
            Err(Error::InvalidConfig { field: "batch_size", .. })
        ));

        let duration = Config::from_json_str(r#"{ "session": { "duration_secs": -1 } }"#).unwrap();
        assert!(duration.validate().is_err());
    }

    #[test]
    fn unknown_fields_are_rejected() {
        assert!(matches!(
            Config::from_json_str(r#"{ "cache": { "hit": 1.0 } }"#),
            Err(Error::Json(_))
        ));
    }
}
