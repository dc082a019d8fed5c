//! GPS position filter.
//!
//! Turns raw location fixes into a stream of positions that are safe to
//! accumulate distance over. Each sample passes four gates in order:
//!
//! 1. accuracy: fixes reporting worse than `min_acceptable_accuracy_m` are
//!    dropped before touching any state
//! 2. smoothing: latitude and longitude each run through an [`AxisFilter`]
//! 3. plausibility: micro-jitter and physically impossible jumps are dropped;
//!    an impossible jump also snaps both axes back onto the raw fix
//! 4. warm-up: the first `warmup_samples` accepted positions are recorded but
//!    not emitted
//!
//! Rejections are ordinary outcomes, never errors.

use chrono::{DateTime, Utc};
use log::debug;

use super::kalman::AxisFilter;
use crate::config::FilterConfig;
use crate::geo_math;
use crate::types::{ActivityType, Coordinate, RawSample, SmoothedPosition};

const METERS_PER_DEGREE: f64 = 111_320.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterPhase {
    Idle,
    WarmingUp,
    Active,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Rejection {
    /// Filter not started
    Stopped,
    LowAccuracy,
    Jitter,
    ImplausibleSpeed,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum FilterOutcome {
    Rejected(Rejection),
    /// Accepted but held back while the estimator settles
    WarmingUp,
    Emitted(SmoothedPosition),
}

impl FilterOutcome {
    pub fn emitted(&self) -> Option<SmoothedPosition> {
        match self {
            FilterOutcome::Emitted(pos) => Some(*pos),
            _ => None,
        }
    }
}

/// Per-axis smoothing state, lazily created on the first usable sample.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FilterState {
    pub lat: AxisFilter,
    pub lng: AxisFilter,
}

pub struct PositionFilter {
    config: FilterConfig,
    activity_type: ActivityType,
    running: bool,
    sample_count: u32,
    state: Option<FilterState>,
    last_valid: Option<SmoothedPosition>,
}

impl PositionFilter {
    pub fn new(config: FilterConfig) -> Self {
        Self {
            config,
            activity_type: ActivityType::Other,
            running: false,
            sample_count: 0,
            state: None,
            last_valid: None,
        }
    }

    /// Begin a fresh tracking run.
    pub fn start(&mut self) {
        self.running = true;
        self.sample_count = 0;
        self.state = None;
        self.last_valid = None;
    }

    pub fn stop(&mut self) {
        self.running = false;
        self.sample_count = 0;
        self.state = None;
        self.last_valid = None;
    }

    pub fn set_activity_type(&mut self, activity_type: ActivityType) {
        self.activity_type = activity_type;
    }

    pub fn activity_type(&self) -> ActivityType {
        self.activity_type
    }

    pub fn phase(&self) -> FilterPhase {
        if !self.running {
            FilterPhase::Idle
        } else if self.sample_count < self.config.warmup_samples {
            FilterPhase::WarmingUp
        } else {
            FilterPhase::Active
        }
    }

    pub fn sample_count(&self) -> u32 {
        self.sample_count
    }

    pub fn state(&self) -> Option<&FilterState> {
        self.state.as_ref()
    }

    pub fn last_valid(&self) -> Option<&SmoothedPosition> {
        self.last_valid.as_ref()
    }

    pub fn process(&mut self, sample: &RawSample) -> FilterOutcome {
        if !self.running {
            return FilterOutcome::Rejected(Rejection::Stopped);
        }

        let accuracy = sample.accuracy_m;
        if !accuracy.is_finite() || accuracy > self.config.min_acceptable_accuracy_m {
            debug!("[filter] dropped fix with accuracy {:.1}m", accuracy);
            return FilterOutcome::Rejected(Rejection::LowAccuracy);
        }

        let raw = sample.coordinate;
        let (lat_err, lng_err) = degrees_error(accuracy, raw.lat);
        let smoothed = self.smooth(raw, lat_err, lng_err);

        if let Some(last) = self.last_valid {
            let distance_m = geo_math::distance_m(last.coordinate, smoothed);

            if distance_m < self.config.min_movement_m && accuracy > self.config.good_accuracy_m {
                debug!("[filter] jitter {:.2}m at accuracy {:.1}m", distance_m, accuracy);
                return FilterOutcome::Rejected(Rejection::Jitter);
            }

            let speed = implied_speed_ms(
                distance_m,
                last.timestamp,
                sample.timestamp,
                self.config.min_movement_m,
            );
            let max_speed = self.config.max_speed_ms(self.activity_type);
            if speed > max_speed {
                debug!(
                    "[filter] implausible {:.1} m/s (max {:.1} for {}), resetting estimate",
                    speed, max_speed, self.activity_type
                );
                if let Some(state) = self.state.as_mut() {
                    state.lat.reset(raw.lat, lat_err);
                    state.lng.reset(raw.lng, lng_err);
                }
                return FilterOutcome::Rejected(Rejection::ImplausibleSpeed);
            }
        }

        let position = SmoothedPosition {
            coordinate: smoothed,
            timestamp: sample.timestamp,
        };
        self.last_valid = Some(position);
        self.sample_count += 1;

        if self.sample_count <= self.config.warmup_samples {
            debug!(
                "[filter] warm-up {}/{}",
                self.sample_count, self.config.warmup_samples
            );
            return FilterOutcome::WarmingUp;
        }

        FilterOutcome::Emitted(position)
    }

    fn smooth(&mut self, raw: Coordinate, lat_err: f64, lng_err: f64) -> Coordinate {
        match self.state.as_mut() {
            Some(state) => {
                let lat = state.lat.update(raw.lat, lat_err);
                let lng = state.lng.update(raw.lng, lng_err);
                Coordinate::new(lat, lng)
            }
            None => {
                let (q_lat, q_lng) = degrees_error(self.config.process_noise_m, raw.lat);
                self.state = Some(FilterState {
                    lat: AxisFilter::new(raw.lat, lat_err, q_lat),
                    lng: AxisFilter::new(raw.lng, lng_err, q_lng),
                });
                raw
            }
        }
    }
}

/// Convert a distance in meters to (latitude, longitude) degrees at `lat`.
fn degrees_error(meters: f64, lat: f64) -> (f64, f64) {
    let lat_deg = meters / METERS_PER_DEGREE;
    // Meridians converge toward the poles; clamp so the divisor stays positive.
    let cos_lat = lat.to_radians().cos().abs().max(1e-6);
    (lat_deg, lat_deg / cos_lat)
}

/// Speed from the last accepted fix. A non-positive time delta with real
/// movement is treated as infinitely fast.
fn implied_speed_ms(
    distance_m: f64,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    min_movement_m: f64,
) -> f64 {
    let elapsed = (to - from).num_milliseconds() as f64 / 1000.0;
    if elapsed > 0.0 {
        distance_m / elapsed
    } else if distance_m < min_movement_m {
        0.0
    } else {
        f64::INFINITY
    }
}
