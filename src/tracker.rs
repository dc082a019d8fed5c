//! Workout session state machine.
//!
//! ```text
//! Idle --start--> Active <--pause/resume--> Paused
//!                   |                          |
//!                   +--stop--> Completed <-----+      (persisted)
//!                   +--discard--> Idle <-------+      (dropped)
//! ```
//!
//! The tracker is synchronous and takes wall-clock instants from the caller,
//! so every transition is deterministic. [`crate::service::TrackerService`]
//! drives it from the location stream and a periodic tick. Invalid
//! transitions are no-ops that return `false`/`None`.

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::config::TrackerConfig;
use crate::filters::position::{FilterOutcome, PositionFilter};
use crate::geo_math;
use crate::session::{Session, SessionStatus};
use crate::storage::{SessionStore, UserAggregateStats};
use crate::types::{ActivityType, Coordinate, RawSample, SmoothedPosition};

pub struct SessionTracker {
    config: TrackerConfig,
    filter: PositionFilter,
    store: Arc<dyn SessionStore>,
    session: Option<Session>,
    updates: watch::Sender<Option<Session>>,
    /// Wall-clock time of the last tick; `None` while the clock is stopped.
    last_tick: Option<DateTime<Utc>>,
    /// Sub-second precision behind `Session::elapsed_seconds`.
    accrued: Duration,
    last_split_secs: u64,
    speed_anchor: Option<(Coordinate, DateTime<Utc>)>,
}

impl SessionTracker {
    pub fn new(config: TrackerConfig, store: Arc<dyn SessionStore>) -> Self {
        let (updates, _) = watch::channel(None);
        let filter = PositionFilter::new(config.filter.clone());
        Self {
            config,
            filter,
            store,
            session: None,
            updates,
            last_tick: None,
            accrued: Duration::ZERO,
            last_split_secs: 0,
            speed_anchor: None,
        }
    }

    /// Snapshots are published on every mutation. After `stop` the last
    /// value is the completed session; after `discard` it is `None`.
    pub fn subscribe(&self) -> watch::Receiver<Option<Session>> {
        self.updates.subscribe()
    }

    pub fn current(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn status(&self) -> Option<SessionStatus> {
        self.session.as_ref().map(|s| s.status)
    }

    pub fn is_idle(&self) -> bool {
        self.session.is_none()
    }

    pub fn filter(&self) -> &PositionFilter {
        &self.filter
    }

    pub fn start(
        &mut self,
        user_id: &str,
        activity_type: ActivityType,
        seed: Option<Coordinate>,
        now: DateTime<Utc>,
    ) -> bool {
        if let Some(existing) = &self.session {
            warn!(
                "[session] start ignored, {} already {:?}",
                existing.id, existing.status
            );
            return false;
        }

        self.reset_bookkeeping();
        self.filter.set_activity_type(activity_type);
        self.filter.start();
        self.last_tick = Some(now);

        let session = Session::new(user_id, activity_type, now, seed);
        info!(
            "[session] {} started ({}, seed fix: {})",
            session.id,
            activity_type,
            if seed.is_some() { "yes" } else { "no" }
        );
        self.replace(session);
        true
    }

    /// Run a raw fix through the position filter and apply it if emitted.
    pub fn handle_sample(&mut self, sample: &RawSample) -> FilterOutcome {
        let outcome = self.filter.process(sample);
        if let FilterOutcome::Emitted(position) = outcome {
            self.handle_position(position);
        }
        outcome
    }

    /// Apply a filtered position. Ignored unless the session is active.
    pub fn handle_position(&mut self, position: SmoothedPosition) -> bool {
        let Some(current) = self.active_session() else {
            return false;
        };

        let mut next = current.clone();
        next.route_points.push(position.coordinate);
        // Full recompute keeps the total equal to the route, jitter rule included.
        next.total_distance_km = geo_math::route_distance_km_with_threshold(
            &next.route_points,
            self.config.route_jitter_threshold_m,
        );

        self.update_speed(&mut next, position);
        self.evaluate_splits(&mut next);
        self.replace(next);
        true
    }

    /// Accrue wall-clock time. Ignored unless the session is active.
    pub fn tick(&mut self, now: DateTime<Utc>) -> bool {
        let Some(mut next) = self.active_session().cloned() else {
            return false;
        };

        let delta = match self.last_tick {
            Some(last) => (now - last).to_std().unwrap_or_default(),
            None => Duration::ZERO,
        };
        self.last_tick = Some(now);
        self.accrued += delta;
        next.elapsed_seconds = self.accrued.as_secs();
        self.replace(next);
        true
    }

    pub fn pause(&mut self) -> bool {
        let Some(current) = self.active_session() else {
            debug!("[session] pause ignored, not active");
            return false;
        };

        let mut next = current.clone();
        next.status = SessionStatus::Paused;
        next.current_speed_kmh = Some(0.0);
        self.speed_anchor = None;
        self.last_tick = None;

        info!("[session] {} paused at {}s", next.id, next.elapsed_seconds);
        self.replace(next);
        true
    }

    pub fn resume(&mut self, now: DateTime<Utc>) -> bool {
        let Some(current) = self.session.as_ref().filter(|s| s.status == SessionStatus::Paused)
        else {
            debug!("[session] resume ignored, not paused");
            return false;
        };

        let mut next = current.clone();
        next.status = SessionStatus::Active;
        self.last_tick = Some(now);
        // Fix timestamps may lag the wall clock, so the next fix sets the anchor.
        self.speed_anchor = None;

        info!("[session] {} resumed", next.id);
        self.replace(next);
        true
    }

    /// Finalize and persist. Returns the completed session.
    pub fn stop(&mut self, now: DateTime<Utc>) -> Option<Session> {
        let current = self.session.as_ref().filter(|s| s.is_in_progress())?;

        let mut completed = current.clone();
        completed.status = SessionStatus::Completed;
        completed.end_time = Some(now);
        completed.current_speed_kmh = None;

        self.filter.stop();
        self.reset_bookkeeping();
        self.session = None;

        info!(
            "[session] {} completed: {:.3} km in {}s, {} splits",
            completed.id,
            completed.total_distance_km,
            completed.elapsed_seconds,
            completed.splits.len()
        );

        if let Err(e) = self.store.save_session(&completed) {
            warn!("[session] failed to save {}: {}", completed.id, e);
        }
        let contribution = UserAggregateStats::contribution(&completed);
        if let Err(e) = self
            .store
            .increment_user_stats(&completed.user_id, &contribution)
        {
            warn!(
                "[session] failed to update stats for {}: {}",
                completed.user_id, e
            );
        }

        self.updates.send_replace(Some(completed.clone()));
        Some(completed)
    }

    /// Drop the in-progress session without persisting it.
    pub fn discard(&mut self) -> bool {
        let Some(current) = self.session.as_ref().filter(|s| s.is_in_progress()) else {
            return false;
        };
        info!("[session] {} discarded", current.id);

        self.filter.stop();
        self.reset_bookkeeping();
        self.session = None;
        self.updates.send_replace(None);
        true
    }

    fn active_session(&self) -> Option<&Session> {
        self.session
            .as_ref()
            .filter(|s| s.status == SessionStatus::Active)
    }

    fn replace(&mut self, next: Session) {
        self.session = Some(next.clone());
        self.updates.send_replace(Some(next));
    }

    fn reset_bookkeeping(&mut self) {
        self.last_tick = None;
        self.accrued = Duration::ZERO;
        self.last_split_secs = 0;
        self.speed_anchor = None;
    }

    fn update_speed(&mut self, next: &mut Session, position: SmoothedPosition) {
        let Some((anchor, anchor_time)) = self.speed_anchor else {
            self.speed_anchor = Some((position.coordinate, position.timestamp));
            return;
        };

        let Ok(window) = (position.timestamp - anchor_time).to_std() else {
            self.speed_anchor = Some((position.coordinate, position.timestamp));
            return;
        };
        if window < self.config.min_speed_window() {
            return;
        }

        next.current_speed_kmh = Some(geo_math::speed_kmh(anchor, position.coordinate, window));
        self.speed_anchor = Some((position.coordinate, position.timestamp));
    }

    fn evaluate_splits(&mut self, next: &mut Session) {
        let whole_units = (next.total_distance_km / self.config.split_unit_km).floor() as usize;
        if whole_units <= next.splits.len() || next.elapsed_seconds == 0 {
            return;
        }

        let delta = next.elapsed_seconds.saturating_sub(self.last_split_secs);
        let crossed = whole_units - next.splits.len();

        if self.config.backfill_splits && crossed > 1 {
            // Spread the gap evenly; the last split absorbs the remainder.
            let share = delta / crossed as u64;
            let remainder = delta % crossed as u64;
            for i in 0..crossed {
                let extra = if i + 1 == crossed { remainder } else { 0 };
                next.splits.push(share + extra);
            }
        } else {
            if crossed > 1 {
                debug!(
                    "[session] {} units crossed in one update, recording one split",
                    crossed
                );
            }
            next.splits.push(delta);
        }
        self.last_split_secs = next.elapsed_seconds;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Result, TrackerError};
    use crate::storage::MemoryStore;
    use chrono::TimeZone;

    /// Kilometers of latitude per degree on the haversine sphere.
    const KM_PER_DEG: f64 = 111.19508;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 7, 0, 0).unwrap() + chrono::Duration::seconds(secs)
    }

    fn tracker_with(config: TrackerConfig) -> (SessionTracker, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        (SessionTracker::new(config, store.clone()), store)
    }

    fn tracker() -> (SessionTracker, Arc<MemoryStore>) {
        tracker_with(TrackerConfig::default())
    }

    fn at_km(km: f64, secs: i64) -> SmoothedPosition {
        SmoothedPosition {
            coordinate: Coordinate::new(km / KM_PER_DEG, 0.0),
            timestamp: t(secs),
        }
    }

    struct FailingStore;

    impl SessionStore for FailingStore {
        fn save_session(&self, _: &Session) -> Result<()> {
            Err(TrackerError::StorageError("disk full".to_string()))
        }

        fn increment_user_stats(&self, _: &str, _: &UserAggregateStats) -> Result<()> {
            Err(TrackerError::StorageError("offline".to_string()))
        }
    }

    #[test]
    fn test_start_only_from_idle() {
        let (mut tracker, _) = tracker();
        assert!(tracker.is_idle());
        assert!(tracker.start("u", ActivityType::Running, None, t(0)));
        let id = tracker.current().unwrap().id.clone();

        assert!(!tracker.start("u", ActivityType::Cycling, None, t(5)));
        assert_eq!(tracker.current().unwrap().id, id);
        assert_eq!(tracker.current().unwrap().activity_type, ActivityType::Running);
    }

    #[test]
    fn test_seed_fix_starts_route() {
        let (mut tracker, _) = tracker();
        tracker.start("u", ActivityType::Running, Some(Coordinate::new(0.0, 0.0)), t(0));
        let session = tracker.current().unwrap();
        assert_eq!(session.route_points, vec![Coordinate::new(0.0, 0.0)]);
        assert_eq!(session.status, SessionStatus::Active);
        assert_eq!(session.start_time, t(0));
    }

    #[test]
    fn test_ticks_accrue_only_while_active() {
        let (mut tracker, _) = tracker();
        assert!(!tracker.tick(t(1)));

        tracker.start("u", ActivityType::Running, None, t(0));
        tracker.tick(t(1));
        tracker.tick(t(2));
        assert_eq!(tracker.current().unwrap().elapsed_seconds, 2);

        tracker.pause();
        assert!(!tracker.tick(t(30)));
        assert_eq!(tracker.current().unwrap().elapsed_seconds, 2);

        tracker.resume(t(60));
        tracker.tick(t(61));
        assert_eq!(tracker.current().unwrap().elapsed_seconds, 3);
    }

    #[test]
    fn test_sub_second_ticks_accumulate() {
        let (mut tracker, _) = tracker();
        let start = t(0);
        tracker.start("u", ActivityType::Running, None, start);
        for i in 1..=5 {
            tracker.tick(start + chrono::Duration::milliseconds(300 * i));
        }
        assert_eq!(tracker.current().unwrap().elapsed_seconds, 1);
    }

    #[test]
    fn test_positions_ignored_while_paused() {
        let (mut tracker, _) = tracker();
        tracker.start("u", ActivityType::Running, Some(Coordinate::new(0.0, 0.0)), t(0));
        tracker.pause();
        assert!(!tracker.handle_position(at_km(0.1, 10)));
        assert_eq!(tracker.current().unwrap().route_points.len(), 1);
    }

    #[test]
    fn test_distance_recomputed_from_route() {
        let (mut tracker, _) = tracker();
        tracker.start("u", ActivityType::Running, Some(Coordinate::new(0.0, 0.0)), t(0));
        tracker.handle_position(at_km(0.05, 10));
        tracker.handle_position(at_km(0.0502, 11)); // ~0.2 m, below jitter threshold
        tracker.handle_position(at_km(0.1, 20));

        let session = tracker.current().unwrap();
        assert_eq!(session.route_points.len(), 4);
        assert_eq!(
            session.total_distance_km,
            geo_math::route_distance_km(&session.route_points)
        );
        assert!((session.total_distance_km - 0.1).abs() < 0.001);
    }

    #[test]
    fn test_splits_track_unit_boundaries() {
        let (mut tracker, _) = tracker();
        tracker.start("u", ActivityType::Running, Some(Coordinate::new(0.0, 0.0)), t(0));

        for (secs, km) in [(300, 1.05), (620, 2.05), (900, 3.05)] {
            tracker.tick(t(secs));
            tracker.handle_position(at_km(km, secs));
        }

        assert_eq!(tracker.current().unwrap().splits, vec![300, 320, 280]);
    }

    #[test]
    fn test_no_split_before_clock_runs() {
        let (mut tracker, _) = tracker();
        tracker.start("u", ActivityType::Cycling, Some(Coordinate::new(0.0, 0.0)), t(0));
        tracker.handle_position(at_km(1.5, 0));
        assert!(tracker.current().unwrap().splits.is_empty());
    }

    #[test]
    fn test_multi_unit_jump_records_one_split_by_default() {
        let (mut tracker, _) = tracker();
        tracker.start("u", ActivityType::Cycling, Some(Coordinate::new(0.0, 0.0)), t(0));
        tracker.tick(t(200));
        tracker.handle_position(at_km(0.9, 200));
        tracker.tick(t(400));
        tracker.handle_position(at_km(2.3, 400));
        assert_eq!(tracker.current().unwrap().splits, vec![400]);

        // The next update catches up on the missed boundary.
        tracker.tick(t(410));
        tracker.handle_position(at_km(2.4, 410));
        assert_eq!(tracker.current().unwrap().splits, vec![400, 10]);
    }

    #[test]
    fn test_multi_unit_jump_backfills_when_enabled() {
        let config = TrackerConfig {
            backfill_splits: true,
            ..TrackerConfig::default()
        };
        let (mut tracker, _) = tracker_with(config);
        tracker.start("u", ActivityType::Cycling, Some(Coordinate::new(0.0, 0.0)), t(0));
        tracker.tick(t(401));
        tracker.handle_position(at_km(2.3, 401));
        assert_eq!(tracker.current().unwrap().splits, vec![200, 201]);
    }

    #[test]
    fn test_current_speed_sampling() {
        let (mut tracker, _) = tracker();
        tracker.start("u", ActivityType::Running, Some(Coordinate::new(0.0, 0.0)), t(0));

        tracker.handle_position(at_km(0.010, 10));
        assert_eq!(tracker.current().unwrap().current_speed_kmh, None);

        // 10 m in 2 s -> 18 km/h
        tracker.handle_position(at_km(0.020, 12));
        let speed = tracker.current().unwrap().current_speed_kmh.unwrap();
        assert!((speed - 18.0).abs() < 0.1, "speed {}", speed);

        // Same second: not resampled
        let position = SmoothedPosition {
            coordinate: Coordinate::new(0.030 / KM_PER_DEG, 0.0),
            timestamp: t(12) + chrono::Duration::milliseconds(500),
        };
        tracker.handle_position(position);
        assert_eq!(tracker.current().unwrap().current_speed_kmh, Some(speed));
    }

    #[test]
    fn test_pause_twice_is_idempotent() {
        let (mut tracker, _) = tracker();
        tracker.start("u", ActivityType::Running, Some(Coordinate::new(0.0, 0.0)), t(0));
        tracker.handle_position(at_km(0.01, 1));
        tracker.handle_position(at_km(0.02, 3));

        assert!(tracker.pause());
        let after_first = tracker.current().unwrap().clone();
        assert!(!tracker.pause());
        assert_eq!(tracker.current().unwrap(), &after_first);
        assert_eq!(after_first.status, SessionStatus::Paused);
        assert_eq!(after_first.current_speed_kmh, Some(0.0));
    }

    #[test]
    fn test_resume_reanchors_speed() {
        let (mut tracker, _) = tracker();
        tracker.start("u", ActivityType::Running, Some(Coordinate::new(0.0, 0.0)), t(0));
        tracker.handle_position(at_km(0.01, 1));
        tracker.pause();
        tracker.resume(t(600));

        // First fix after resume only anchors; the 500 m walked while paused
        // is not read as speed.
        tracker.handle_position(at_km(0.51, 602));
        assert_eq!(tracker.current().unwrap().current_speed_kmh, Some(0.0));

        // 10 m over 2 s
        tracker.handle_position(at_km(0.52, 604));
        let speed = tracker.current().unwrap().current_speed_kmh.unwrap();
        assert!((speed - 18.0).abs() < 0.1, "speed {}", speed);
    }

    #[test]
    fn test_speed_recovers_when_fix_clock_lags() {
        let (mut tracker, _) = tracker();
        tracker.start("u", ActivityType::Running, Some(Coordinate::new(0.0, 0.0)), t(0));
        tracker.handle_position(at_km(0.005, 2));
        tracker.handle_position(at_km(0.010, 4));
        tracker.pause();
        // Wall clock well ahead of the fix timestamps
        tracker.resume(t(1000));

        for i in 0..20 {
            tracker.handle_position(at_km(0.015 + 0.005 * i as f64, 10 + 2 * i));
        }
        // 5 m every 2 s -> 9 km/h
        let speed = tracker.current().unwrap().current_speed_kmh.unwrap();
        assert!((speed - 9.0).abs() < 0.1, "speed {}", speed);
    }

    #[test]
    fn test_backwards_fix_time_reanchors() {
        let (mut tracker, _) = tracker();
        tracker.start("u", ActivityType::Running, None, t(0));
        tracker.handle_position(at_km(0.000, 100));
        tracker.handle_position(at_km(0.005, 50));
        assert_eq!(tracker.current().unwrap().current_speed_kmh, None);

        tracker.handle_position(at_km(0.010, 52));
        let speed = tracker.current().unwrap().current_speed_kmh.unwrap();
        assert!((speed - 9.0).abs() < 0.1, "speed {}", speed);
    }

    #[test]
    fn test_invalid_transitions_are_noops() {
        let (mut tracker, store) = tracker();
        assert!(!tracker.pause());
        assert!(!tracker.resume(t(0)));
        assert!(tracker.stop(t(0)).is_none());
        assert!(!tracker.discard());

        tracker.start("u", ActivityType::Running, None, t(0));
        assert!(!tracker.resume(t(1)));
        assert!(store.sessions().is_empty());
    }

    #[test]
    fn test_full_lifecycle_persists() {
        let (mut tracker, store) = tracker();
        let mut rx = tracker.subscribe();

        tracker.start("user-1", ActivityType::Running, Some(Coordinate::new(0.0, 0.0)), t(0));
        tracker.tick(t(60));
        tracker.handle_position(at_km(0.2, 60));
        tracker.pause();
        tracker.resume(t(120));
        tracker.tick(t(150));

        let completed = tracker.stop(t(151)).unwrap();
        assert_eq!(completed.status, SessionStatus::Completed);
        assert_eq!(completed.end_time, Some(t(151)));
        assert_eq!(completed.current_speed_kmh, None);
        assert_eq!(completed.elapsed_seconds, 90);
        assert!(tracker.is_idle());
        assert_eq!(tracker.filter().phase(), crate::filters::position::FilterPhase::Idle);

        assert_eq!(store.sessions(), vec![completed.clone()]);
        let stats = store.user_stats("user-1").unwrap();
        assert_eq!(stats.total_workouts, 1);
        assert_eq!(stats.total_time_secs, 90);
        assert_eq!(stats.total_distance_km, completed.total_distance_km);

        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().as_ref(), Some(&completed));
    }

    #[test]
    fn test_discard_never_persists() {
        let (mut tracker, store) = tracker();
        let rx = tracker.subscribe();
        tracker.start("u", ActivityType::Walking, Some(Coordinate::new(0.0, 0.0)), t(0));
        tracker.tick(t(30));
        tracker.handle_position(at_km(0.05, 30));
        tracker.pause();

        assert!(tracker.discard());
        assert!(tracker.is_idle());
        assert!(store.sessions().is_empty());
        assert!(store.user_stats("u").is_none());
        assert!(rx.borrow().is_none());

        // Fresh session starts from zero
        tracker.start("u", ActivityType::Walking, None, t(100));
        tracker.tick(t(101));
        assert_eq!(tracker.current().unwrap().elapsed_seconds, 1);
        assert!(tracker.current().unwrap().splits.is_empty());
    }

    #[test]
    fn test_storage_failure_still_completes() {
        let mut tracker = SessionTracker::new(TrackerConfig::default(), Arc::new(FailingStore));
        tracker.start("u", ActivityType::Running, None, t(0));
        let completed = tracker.stop(t(10)).unwrap();
        assert_eq!(completed.status, SessionStatus::Completed);
        assert!(tracker.is_idle());
    }

    #[test]
    fn test_raw_samples_flow_through_filter() {
        let (mut tracker, _) = tracker();
        tracker.start("u", ActivityType::Running, Some(Coordinate::new(0.0, 0.0)), t(0));

        let mut emitted = 0;
        for i in 1..=4 {
            let sample = RawSample::new(0.0001 * i as f64, 0.0, 5.0, t(i));
            let outcome = tracker.handle_sample(&sample);
            if i <= 3 {
                assert_eq!(outcome, FilterOutcome::WarmingUp);
            } else {
                assert!(outcome.emitted().is_some());
                emitted += 1;
            }
        }
        assert_eq!(emitted, 1);

        let session = tracker.current().unwrap();
        assert_eq!(session.route_points.len(), 2);
        assert!(session.total_distance_km > 0.0);
        assert!(session.total_distance_km < 0.05);
        assert_eq!(
            session.total_distance_km,
            geo_math::route_distance_km(&session.route_points)
        );
    }

    #[test]
    fn test_samples_rejected_after_stop() {
        let (mut tracker, _) = tracker();
        tracker.start("u", ActivityType::Running, None, t(0));
        tracker.stop(t(1));
        let outcome = tracker.handle_sample(&RawSample::new(0.0, 0.0, 5.0, t(2)));
        assert_eq!(
            outcome,
            FilterOutcome::Rejected(crate::filters::position::Rejection::Stopped)
        );
    }
}
