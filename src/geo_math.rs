//! Distance, speed and pace over WGS84 coordinates.
//!
//! Distances use the haversine great-circle formula on a mean-radius sphere
//! (via `geo`), which is symmetric and exactly zero for identical points.

use geo::HaversineDistance;
use std::time::Duration;

use crate::types::Coordinate;

/// Segments shorter than this are treated as residual jitter in route sums.
pub const ROUTE_JITTER_THRESHOLD_M: f64 = 1.0;

/// Great-circle distance in meters.
pub fn distance_m(a: Coordinate, b: Coordinate) -> f64 {
    let pa: geo::Point<f64> = a.into();
    let pb: geo::Point<f64> = b.into();
    pa.haversine_distance(&pb)
}

/// Great-circle distance in kilometers.
pub fn distance_km(a: Coordinate, b: Coordinate) -> f64 {
    distance_m(a, b) / 1000.0
}

/// Sum of consecutive segment distances, skipping segments under 1 m.
pub fn route_distance_km(points: &[Coordinate]) -> f64 {
    route_distance_km_with_threshold(points, ROUTE_JITTER_THRESHOLD_M)
}

pub fn route_distance_km_with_threshold(points: &[Coordinate], min_segment_m: f64) -> f64 {
    if points.len() < 2 {
        return 0.0;
    }
    points
        .windows(2)
        .map(|w| distance_m(w[0], w[1]))
        .filter(|&d| d >= min_segment_m)
        .sum::<f64>()
        / 1000.0
}

/// Average speed between two fixes. Zero when `elapsed` is zero.
pub fn speed_kmh(a: Coordinate, b: Coordinate, elapsed: Duration) -> f64 {
    average_speed_kmh(distance_km(a, b), elapsed)
}

/// Average speed over a distance. Zero when `elapsed` is zero.
pub fn average_speed_kmh(distance_km: f64, elapsed: Duration) -> f64 {
    let hours = elapsed.as_secs_f64() / 3600.0;
    if hours <= 0.0 {
        return 0.0;
    }
    distance_km / hours
}

/// Minutes per kilometer. Zero when no distance was covered.
pub fn pace_min_per_km(distance_km: f64, elapsed: Duration) -> f64 {
    if distance_km <= 0.0 {
        return 0.0;
    }
    (elapsed.as_secs_f64() / 60.0) / distance_km
}
