use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{Result, TrackerError};
use crate::types::ActivityType;

/// Position filter tuning. Distances in meters, speeds in m/s.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Samples reporting worse accuracy than this are dropped outright.
    pub min_acceptable_accuracy_m: f64,
    /// At or below this accuracy, small movements are trusted.
    pub good_accuracy_m: f64,
    pub min_movement_m: f64,
    pub warmup_samples: u32,
    /// Growth of the estimate error per step.
    pub process_noise_m: f64,
    pub max_speed_walking_ms: f64,
    pub max_speed_running_ms: f64,
    pub max_speed_cycling_ms: f64,
    pub max_speed_other_ms: f64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            min_acceptable_accuracy_m: 25.0,
            good_accuracy_m: 10.0,
            min_movement_m: 2.0,
            warmup_samples: 3,
            process_noise_m: 3.0,
            max_speed_walking_ms: 3.0,
            max_speed_running_ms: 12.0,
            max_speed_cycling_ms: 50.0,
            max_speed_other_ms: 50.0,
        }
    }
}

impl FilterConfig {
    pub fn max_speed_ms(&self, activity: ActivityType) -> f64 {
        match activity {
            ActivityType::Walking => self.max_speed_walking_ms,
            ActivityType::Running => self.max_speed_running_ms,
            ActivityType::Cycling => self.max_speed_cycling_ms,
            ActivityType::Other => self.max_speed_other_ms,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub tick_interval_ms: u64,
    pub initial_fix_timeout_secs: u64,
    /// Minimum spacing between two current-speed samples.
    pub min_speed_window_ms: u64,
    pub split_unit_km: f64,
    /// Append one split per crossed unit instead of one per update.
    pub backfill_splits: bool,
    pub route_jitter_threshold_m: f64,
    /// Latest sample older than this reads as a weak signal.
    pub signal_stale_secs: u64,
    /// No sample for this long reads as a lost signal.
    pub signal_lost_secs: u64,
    pub filter: FilterConfig,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1000,
            initial_fix_timeout_secs: 15,
            min_speed_window_ms: 1000,
            split_unit_km: 1.0,
            backfill_splits: false,
            route_jitter_threshold_m: crate::geo_math::ROUTE_JITTER_THRESHOLD_M,
            signal_stale_secs: 5,
            signal_lost_secs: 10,
            filter: FilterConfig::default(),
        }
    }
}

impl TrackerConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            TrackerError::ConfigError(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config: TrackerConfig = serde_json::from_str(&text)
            .map_err(|e| TrackerError::ConfigError(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.tick_interval_ms == 0 {
            return Err(TrackerError::ConfigError(
                "tick_interval_ms must be positive".to_string(),
            ));
        }
        if self.split_unit_km.is_nan() || self.split_unit_km <= 0.0 {
            return Err(TrackerError::ConfigError(
                "split_unit_km must be positive".to_string(),
            ));
        }
        if self.filter.min_acceptable_accuracy_m <= 0.0 || self.filter.process_noise_m <= 0.0 {
            return Err(TrackerError::ConfigError(
                "filter accuracy and process noise must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn initial_fix_timeout(&self) -> Duration {
        Duration::from_secs(self.initial_fix_timeout_secs)
    }

    pub fn min_speed_window(&self) -> Duration {
        Duration::from_millis(self.min_speed_window_ms)
    }
}
