use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// WGS84 coordinate in degrees.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinate {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }
}

impl From<Coordinate> for geo::Point<f64> {
    fn from(c: Coordinate) -> Self {
        geo::Point::new(c.lng, c.lat)
    }
}

/// GPS fix as delivered by the OS location provider
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawSample {
    pub coordinate: Coordinate,
    pub accuracy_m: f64,
    pub timestamp: DateTime<Utc>,
}

impl RawSample {
    pub fn new(lat: f64, lng: f64, accuracy_m: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            coordinate: Coordinate::new(lat, lng),
            accuracy_m,
            timestamp,
        }
    }
}

/// Filtered position emitted by the position filter
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SmoothedPosition {
    pub coordinate: Coordinate,
    pub timestamp: DateTime<Utc>,
}

/// Kind of workout. Drives the plausible-speed gate of the position filter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActivityType {
    Running,
    Cycling,
    Walking,
    Other,
}

impl ActivityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityType::Running => "Running",
            ActivityType::Cycling => "Cycling",
            ActivityType::Walking => "Walking",
            ActivityType::Other => "Other",
        }
    }
}

impl fmt::Display for ActivityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Case-insensitive. Anything unrecognized maps to `Other`, which carries the
/// most permissive speed threshold.
impl FromStr for ActivityType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "running" | "run" => ActivityType::Running,
            "cycling" | "ride" | "bike" => ActivityType::Cycling,
            "walking" | "walk" => ActivityType::Walking,
            _ => ActivityType::Other,
        })
    }
}
