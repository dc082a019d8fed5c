use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::error::Result;
use crate::types::{ActivityType, Coordinate};

/// Process-wide suffix so sessions started in the same millisecond get distinct ids.
static SESSION_SEQ: AtomicU64 = AtomicU64::new(0);

/// Session lifecycle. "No session" is represented by the tracker holding `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Paused,
    Completed,
}

/// A single workout.
///
/// Values are replaced wholesale by the tracker on every mutation, so a
/// snapshot handed to an observer never changes underneath it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub user_id: String,
    pub activity_type: ActivityType,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    #[serde(rename = "durationSeconds")]
    pub elapsed_seconds: u64,
    #[serde(rename = "distanceKm")]
    pub total_distance_km: f64,
    /// Arrival order
    pub route_points: Vec<Coordinate>,
    /// Seconds per completed distance unit
    pub splits: Vec<u64>,
    pub heart_rate: Option<f64>,
    pub status: SessionStatus,
    /// Only meaningful while active; never persisted.
    #[serde(skip)]
    pub current_speed_kmh: Option<f64>,
}

impl Session {
    pub fn new(
        user_id: &str,
        activity_type: ActivityType,
        start_time: DateTime<Utc>,
        seed: Option<Coordinate>,
    ) -> Self {
        Self {
            id: format!(
                "session_{}_{}",
                start_time.timestamp_millis(),
                SESSION_SEQ.fetch_add(1, Ordering::Relaxed)
            ),
            user_id: user_id.to_string(),
            activity_type,
            start_time,
            end_time: None,
            elapsed_seconds: 0,
            total_distance_km: 0.0,
            route_points: seed.into_iter().collect(),
            splits: Vec::new(),
            heart_rate: None,
            status: SessionStatus::Active,
            current_speed_kmh: None,
        }
    }

    pub fn elapsed(&self) -> Duration {
        Duration::from_secs(self.elapsed_seconds)
    }

    pub fn is_in_progress(&self) -> bool {
        matches!(self.status, SessionStatus::Active | SessionStatus::Paused)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
