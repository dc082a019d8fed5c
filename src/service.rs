//! Runtime wiring around [`SessionTracker`].
//!
//! Two tasks feed one tracker: the location stream and a periodic tick.
//! Both lock the same mutex for every mutation. `stop`/`discard` take that
//! lock before tearing the tasks down, so once teardown starts any update
//! still in flight finds the tracker idle and is ignored.

use chrono::Utc;
use log::{debug, error, info, warn};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, Duration, MissedTickBehavior};

use crate::config::TrackerConfig;
use crate::error::{Result, TrackerError};
use crate::filters::position::FilterOutcome;
use crate::sensors::{LocationProvider, ProviderEvent, SubscriptionHandle};
use crate::session::Session;
use crate::signal::{SignalMonitor, SignalQuality};
use crate::storage::SessionStore;
use crate::tracker::SessionTracker;
use crate::types::{ActivityType, SmoothedPosition};

const POSITION_CHANNEL_CAPACITY: usize = 256;

struct SessionTasks {
    subscription: Option<SubscriptionHandle>,
    sampler: Option<JoinHandle<()>>,
    ticker: JoinHandle<()>,
}

pub struct TrackerService<P: LocationProvider> {
    provider: Arc<P>,
    config: TrackerConfig,
    tracker: Arc<Mutex<SessionTracker>>,
    signal: Arc<SignalMonitor>,
    positions: broadcast::Sender<SmoothedPosition>,
    tasks: Mutex<Option<SessionTasks>>,
}

impl<P: LocationProvider> TrackerService<P> {
    pub fn new(provider: Arc<P>, config: TrackerConfig, store: Arc<dyn SessionStore>) -> Self {
        let tracker = SessionTracker::new(config.clone(), store);
        let signal = SignalMonitor::from_config(&config);
        let (positions, _) = broadcast::channel(POSITION_CHANNEL_CAPACITY);
        Self {
            provider,
            config,
            tracker: Arc::new(Mutex::new(tracker)),
            signal: Arc::new(signal),
            positions,
            tasks: Mutex::new(None),
        }
    }

    /// Begin a workout. Returns `Ok(false)` if one is already in progress.
    ///
    /// Waits for at most the configured fix timeout to seed the route;
    /// a missing fix or denied permission does not prevent tracking.
    pub async fn start(&self, user_id: &str, activity_type: ActivityType) -> Result<bool> {
        if !self.lock_tracker()?.is_idle() {
            warn!("[service] start ignored, a session is already in progress");
            return Ok(false);
        }

        if !self.provider.request_permission() {
            warn!("[service] location permission denied, tracking without a seed fix");
        }

        let seed = match timeout(self.config.initial_fix_timeout(), self.provider.current_fix()).await
        {
            Ok(Ok(fix)) => Some(fix),
            Ok(Err(e)) => {
                warn!("[service] initial fix unavailable: {}", e);
                None
            }
            Err(_) => {
                warn!(
                    "[service] initial fix timed out after {}s",
                    self.config.initial_fix_timeout_secs
                );
                None
            }
        };

        let mut tracker = self.lock_tracker()?;
        if !tracker.start(user_id, activity_type, seed, Utc::now()) {
            return Ok(false);
        }
        self.signal.reset();

        let (subscription, sampler) = match self.provider.subscribe() {
            Ok(sub) => {
                let sampler = tokio::spawn(sample_loop(
                    sub.samples,
                    self.tracker.clone(),
                    self.signal.clone(),
                    self.positions.clone(),
                ));
                (Some(sub.handle), Some(sampler))
            }
            Err(e) => {
                warn!("[service] location subscription failed: {}", e);
                (None, None)
            }
        };
        let ticker = tokio::spawn(tick_loop(self.config.tick_interval(), self.tracker.clone()));

        *self.lock_tasks()? = Some(SessionTasks {
            subscription,
            sampler,
            ticker,
        });
        drop(tracker);

        info!("[service] tracking {} for {}", activity_type, user_id);
        Ok(true)
    }

    pub fn pause(&self) -> Result<bool> {
        Ok(self.lock_tracker()?.pause())
    }

    pub fn resume(&self) -> Result<bool> {
        Ok(self.lock_tracker()?.resume(Utc::now()))
    }

    /// Finish, persist and return the session. `Ok(None)` when idle.
    pub fn stop(&self) -> Result<Option<Session>> {
        let mut tracker = self.lock_tracker()?;
        if tracker.is_idle() {
            return Ok(None);
        }
        self.teardown()?;
        Ok(tracker.stop(Utc::now()))
    }

    /// Drop the in-progress session without persisting. `Ok(false)` when idle.
    pub fn discard(&self) -> Result<bool> {
        let mut tracker = self.lock_tracker()?;
        if tracker.is_idle() {
            return Ok(false);
        }
        self.teardown()?;
        Ok(tracker.discard())
    }

    pub fn snapshot(&self) -> Result<Option<Session>> {
        Ok(self.lock_tracker()?.current().cloned())
    }

    pub fn subscribe(&self) -> Result<watch::Receiver<Option<Session>>> {
        Ok(self.lock_tracker()?.subscribe())
    }

    /// Every position the filter emits while a session runs.
    pub fn positions(&self) -> broadcast::Receiver<SmoothedPosition> {
        self.positions.subscribe()
    }

    pub fn signal_quality(&self) -> SignalQuality {
        self.signal.quality()
    }

    pub fn signal_status(&self) -> String {
        self.signal.format_status()
    }

    /// Caller must hold the tracker lock.
    fn teardown(&self) -> Result<()> {
        let Some(tasks) = self.lock_tasks()?.take() else {
            return Ok(());
        };
        tasks.ticker.abort();
        if let Some(sampler) = tasks.sampler {
            sampler.abort();
        }
        if let Some(handle) = tasks.subscription {
            self.provider.unsubscribe(handle);
        }
        debug!("[service] session tasks torn down");
        Ok(())
    }

    fn lock_tracker(&self) -> Result<MutexGuard<'_, SessionTracker>> {
        self.tracker.lock().map_err(|_| TrackerError::lock("tracker"))
    }

    fn lock_tasks(&self) -> Result<MutexGuard<'_, Option<SessionTasks>>> {
        self.tasks.lock().map_err(|_| TrackerError::lock("task"))
    }
}

impl<P: LocationProvider> Drop for TrackerService<P> {
    fn drop(&mut self) {
        if let Ok(mut tasks) = self.tasks.lock() {
            if let Some(tasks) = tasks.take() {
                tasks.ticker.abort();
                if let Some(sampler) = tasks.sampler {
                    sampler.abort();
                }
                if let Some(handle) = tasks.subscription {
                    self.provider.unsubscribe(handle);
                }
            }
        }
    }
}

async fn sample_loop(
    mut samples: mpsc::Receiver<ProviderEvent>,
    tracker: Arc<Mutex<SessionTracker>>,
    signal: Arc<SignalMonitor>,
    positions: broadcast::Sender<SmoothedPosition>,
) {
    let mut received = 0u64;

    while let Some(event) = samples.recv().await {
        let sample = match event {
            Ok(sample) => sample,
            Err(e) => {
                warn!("[gps] provider stream error: {}", e);
                continue;
            }
        };
        received += 1;
        signal.record(&sample);

        let outcome = match tracker.lock() {
            Ok(mut tracker) => tracker.handle_sample(&sample),
            Err(_) => {
                error!("[gps] tracker lock poisoned, stopping sample loop");
                break;
            }
        };
        if let FilterOutcome::Emitted(position) = outcome {
            let _ = positions.send(position);
        }
    }

    debug!("[gps] sample stream closed after {} fixes", received);
}

async fn tick_loop(period: Duration, tracker: Arc<Mutex<SessionTracker>>) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // First tick completes immediately.
    ticker.tick().await;

    loop {
        ticker.tick().await;
        let Ok(mut guard) = tracker.lock() else {
            error!("[clock] tracker lock poisoned, stopping tick loop");
            break;
        };
        guard.tick(Utc::now());
    }
}
