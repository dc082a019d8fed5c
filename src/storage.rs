use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::{Result, TrackerError};
use crate::geo_math;
use crate::session::Session;

/// Lifetime totals for one user. Only ever grows.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserAggregateStats {
    pub total_distance_km: f64,
    pub total_workouts: u32,
    #[serde(rename = "totalTime")]
    pub total_time_secs: u64,
}

impl UserAggregateStats {
    /// What a completed session adds to the totals.
    pub fn contribution(session: &Session) -> Self {
        Self {
            total_distance_km: session.total_distance_km,
            total_workouts: 1,
            total_time_secs: session.elapsed_seconds,
        }
    }

    pub fn add(&mut self, other: &UserAggregateStats) {
        self.total_distance_km += other.total_distance_km;
        self.total_workouts += other.total_workouts;
        self.total_time_secs += other.total_time_secs;
    }
}

/// Destination for completed sessions. Called once per completed session;
/// the tracker logs failures and moves on.
pub trait SessionStore: Send + Sync {
    fn save_session(&self, session: &Session) -> Result<()>;

    fn increment_user_stats(&self, user_id: &str, contribution: &UserAggregateStats)
        -> Result<()>;
}

/// In-process store, used by tests and embedders that persist elsewhere.
#[derive(Default)]
pub struct MemoryStore {
    sessions: Mutex<Vec<Session>>,
    stats: Mutex<HashMap<String, UserAggregateStats>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sessions(&self) -> Vec<Session> {
        self.sessions.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn user_stats(&self, user_id: &str) -> Option<UserAggregateStats> {
        self.stats
            .lock()
            .ok()
            .and_then(|s| s.get(user_id).cloned())
    }
}

impl SessionStore for MemoryStore {
    fn save_session(&self, session: &Session) -> Result<()> {
        self.sessions
            .lock()
            .map_err(|_| TrackerError::lock("session store"))?
            .push(session.clone());
        Ok(())
    }

    fn increment_user_stats(
        &self,
        user_id: &str,
        contribution: &UserAggregateStats,
    ) -> Result<()> {
        self.stats
            .lock()
            .map_err(|_| TrackerError::lock("stats store"))?
            .entry(user_id.to_string())
            .or_default()
            .add(contribution);
        Ok(())
    }
}

/// Writes `session_<id>.json` and `user_stats_<user>.json` into a directory.
pub struct JsonFileStore {
    dir: PathBuf,
    stats_lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            stats_lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn session_path(&self, session_id: &str) -> PathBuf {
        self.dir
            .join(format!("session_{}.json", file_safe(session_id.trim_start_matches("session_"))))
    }

    pub fn stats_path(&self, user_id: &str) -> PathBuf {
        self.dir.join(format!("user_stats_{}.json", file_safe(user_id)))
    }

    pub fn load_session(&self, session_id: &str) -> Result<Session> {
        let text = fs::read_to_string(self.session_path(session_id))?;
        Session::from_json(&text)
    }

    pub fn load_user_stats(&self, user_id: &str) -> Result<UserAggregateStats> {
        let path = self.stats_path(user_id);
        if !path.exists() {
            return Ok(UserAggregateStats::default());
        }
        let text = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}

impl SessionStore for JsonFileStore {
    fn save_session(&self, session: &Session) -> Result<()> {
        let path = self.session_path(&session.id);
        fs::write(&path, session.to_json()?).map_err(|e| {
            TrackerError::StorageError(format!("write {}: {}", path.display(), e))
        })?;
        Ok(())
    }

    fn increment_user_stats(
        &self,
        user_id: &str,
        contribution: &UserAggregateStats,
    ) -> Result<()> {
        let _guard = self
            .stats_lock
            .lock()
            .map_err(|_| TrackerError::lock("stats file"))?;

        let mut stats = self.load_user_stats(user_id)?;
        stats.add(contribution);

        let path = self.stats_path(user_id);
        let json = serde_json::to_string_pretty(&stats)?;
        fs::write(&path, json).map_err(|e| {
            TrackerError::StorageError(format!("write {}: {}", path.display(), e))
        })?;
        Ok(())
    }
}

fn file_safe(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

/// Session statistics for display
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub duration_seconds: u64,
    pub distance_km: f64,
    pub avg_speed_kmh: f64,
    pub avg_pace_min_per_km: f64,
    pub split_count: usize,
    pub fastest_split_secs: Option<u64>,
    pub slowest_split_secs: Option<u64>,
}

impl SessionSummary {
    pub fn from_session(session: &Session) -> Self {
        SessionSummary {
            duration_seconds: session.elapsed_seconds,
            distance_km: session.total_distance_km,
            avg_speed_kmh: geo_math::average_speed_kmh(
                session.total_distance_km,
                session.elapsed(),
            ),
            avg_pace_min_per_km: geo_math::pace_min_per_km(
                session.total_distance_km,
                session.elapsed(),
            ),
            split_count: session.splits.len(),
            fastest_split_secs: session.splits.iter().copied().min(),
            slowest_split_secs: session.splits.iter().copied().max(),
        }
    }
}

/// GPX track format for mapping applications
#[derive(Debug, Serialize)]
pub struct GpxTrack {
    pub name: String,
    pub description: String,
    pub track_points: Vec<GpxPoint>,
}

#[derive(Debug, Serialize)]
pub struct GpxPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GpxTrack {
    pub fn from_session(session: &Session) -> Self {
        GpxTrack {
            name: format!(
                "{} {}",
                session.activity_type,
                session.start_time.format("%Y-%m-%d %H:%M")
            ),
            description: format!(
                "{:.2} km in {}s ({})",
                session.total_distance_km, session.elapsed_seconds, session.id
            ),
            track_points: session
                .route_points
                .iter()
                .map(|c| GpxPoint {
                    lat: c.lat,
                    lon: c.lng,
                })
                .collect(),
        }
    }

    /// Generate GPX document XML string
    pub fn to_gpx_xml(&self) -> String {
        let mut xml = String::new();
        xml.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
        xml.push_str("<gpx version=\"1.1\" creator=\"WorkoutTracker\">\n");
        xml.push_str("  <metadata>\n");
        xml.push_str(&format!("    <name>{}</name>\n", xml_escape(&self.name)));
        xml.push_str(&format!("    <desc>{}</desc>\n", xml_escape(&self.description)));
        xml.push_str("  </metadata>\n");
        xml.push_str("  <trk>\n");
        xml.push_str(&format!("    <name>{}</name>\n", xml_escape(&self.name)));
        xml.push_str("    <trkseg>\n");

        for point in &self.track_points {
            xml.push_str(&format!(
                "      <trkpt lat=\"{}\" lon=\"{}\"></trkpt>\n",
                point.lat, point.lon
            ));
        }

        xml.push_str("    </trkseg>\n");
        xml.push_str("  </trk>\n");
        xml.push_str("</gpx>\n");

        xml
    }
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
