use chrono::Utc;
use log::{debug, warn};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration};

use crate::error::{Result, TrackerError};
use crate::types::{ActivityType, Coordinate, RawSample};

/// One item of a location stream: a fix, or a provider-side failure.
pub type ProviderEvent = Result<RawSample>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(pub u64);

pub struct Subscription {
    pub handle: SubscriptionHandle,
    pub samples: mpsc::Receiver<ProviderEvent>,
}

/// OS location service as seen by the tracker.
pub trait LocationProvider: Send + Sync + 'static {
    fn request_permission(&self) -> bool;

    /// One high-accuracy fix. Callers bound this with their own timeout.
    fn current_fix(&self) -> impl Future<Output = Result<Coordinate>> + Send;

    fn subscribe(&self) -> Result<Subscription>;

    fn unsubscribe(&self, handle: SubscriptionHandle);
}

const CHANNEL_CAPACITY: usize = 100;

/// Provider fed by hand. Used for replaying recorded logs and in tests.
pub struct ScriptedProvider {
    permission: bool,
    fix: Option<Coordinate>,
    next_id: AtomicU64,
    active: Mutex<Option<(SubscriptionHandle, mpsc::Sender<ProviderEvent>)>>,
}

impl ScriptedProvider {
    pub fn new(fix: Option<Coordinate>) -> Self {
        Self {
            permission: true,
            fix,
            next_id: AtomicU64::new(1),
            active: Mutex::new(None),
        }
    }

    pub fn denied() -> Self {
        Self {
            permission: false,
            ..Self::new(None)
        }
    }

    pub fn is_subscribed(&self) -> bool {
        self.active.lock().map(|a| a.is_some()).unwrap_or(false)
    }

    /// Deliver a fix to the current subscriber. Returns false if nobody listens.
    pub async fn push(&self, sample: RawSample) -> bool {
        self.deliver(Ok(sample)).await
    }

    pub async fn push_error(&self, message: &str) -> bool {
        self.deliver(Err(TrackerError::SensorFailed(message.to_string())))
            .await
    }

    async fn deliver(&self, event: ProviderEvent) -> bool {
        let sender = match self.active.lock() {
            Ok(active) => active.as_ref().map(|(_, tx)| tx.clone()),
            Err(_) => None,
        };
        match sender {
            Some(tx) => tx.send(event).await.is_ok(),
            None => false,
        }
    }
}

impl LocationProvider for ScriptedProvider {
    fn request_permission(&self) -> bool {
        self.permission
    }

    fn current_fix(&self) -> impl Future<Output = Result<Coordinate>> + Send {
        let fix = if self.permission { self.fix } else { None };
        async move { fix.ok_or_else(|| TrackerError::SensorFailed("no fix available".to_string())) }
    }

    fn subscribe(&self) -> Result<Subscription> {
        let handle = SubscriptionHandle(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let mut active = self
            .active
            .lock()
            .map_err(|_| TrackerError::lock("provider"))?;
        *active = Some((handle, tx));
        Ok(Subscription {
            handle,
            samples: rx,
        })
    }

    fn unsubscribe(&self, handle: SubscriptionHandle) {
        if let Ok(mut active) = self.active.lock() {
            if active.as_ref().map(|(h, _)| *h) == Some(handle) {
                *active = None;
            }
        }
    }
}

/// Synthetic GPS for demo runs: moves north-east at a steady pace with
/// accuracy wobble, periodic bad fixes and a one-off multipath jump.
///
/// `subscribe` spawns onto the current tokio runtime.
pub struct SimulatedProvider {
    origin: Coordinate,
    speed_ms: f64,
    period: Duration,
    next_id: AtomicU64,
    tasks: Mutex<HashMap<SubscriptionHandle, JoinHandle<()>>>,
}

impl SimulatedProvider {
    pub fn new(origin: Coordinate, speed_ms: f64, period: Duration) -> Self {
        Self {
            origin,
            speed_ms,
            period,
            next_id: AtomicU64::new(1),
            tasks: Mutex::new(HashMap::new()),
        }
    }

    /// Typical pace for the activity, one fix per second.
    pub fn for_activity(origin: Coordinate, activity: ActivityType) -> Self {
        let speed_ms = match activity {
            ActivityType::Walking => 1.4,
            ActivityType::Running => 3.3,
            ActivityType::Cycling => 7.5,
            ActivityType::Other => 2.0,
        };
        Self::new(origin, speed_ms, Duration::from_secs(1))
    }
}

impl LocationProvider for SimulatedProvider {
    fn request_permission(&self) -> bool {
        true
    }

    fn current_fix(&self) -> impl Future<Output = Result<Coordinate>> + Send {
        let origin = self.origin;
        async move { Ok(origin) }
    }

    fn subscribe(&self) -> Result<Subscription> {
        let handle = SubscriptionHandle(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let task = tokio::spawn(simulated_gps_loop(
            tx,
            self.origin,
            self.speed_ms,
            self.period,
        ));
        self.tasks
            .lock()
            .map_err(|_| TrackerError::lock("simulator"))?
            .insert(handle, task);
        Ok(Subscription {
            handle,
            samples: rx,
        })
    }

    fn unsubscribe(&self, handle: SubscriptionHandle) {
        if let Ok(mut tasks) = self.tasks.lock() {
            if let Some(task) = tasks.remove(&handle) {
                task.abort();
            }
        }
    }
}

async fn simulated_gps_loop(
    tx: mpsc::Sender<ProviderEvent>,
    origin: Coordinate,
    speed_ms: f64,
    period: Duration,
) {
    let mut ticker = interval(period);
    let mut seq = 0u64;

    loop {
        ticker.tick().await;
        seq += 1;

        let event = if seq % 97 == 0 {
            Err(TrackerError::SensorFailed("simulated GNSS dropout".to_string()))
        } else {
            Ok(mock_gps_sample(origin, speed_ms, period, seq))
        };

        match tx.try_send(event) {
            Ok(_) => {
                if seq % 60 == 0 {
                    debug!("[gps] {} simulated fixes", seq);
                }
            }
            Err(TrySendError::Closed(_)) => {
                debug!("[gps] channel closed after {} fixes", seq);
                break;
            }
            Err(TrySendError::Full(_)) => {
                warn!("[gps] channel full, dropping fix {}", seq);
            }
        }
    }
}

fn mock_gps_sample(origin: Coordinate, speed_ms: f64, period: Duration, seq: u64) -> RawSample {
    let t = seq as f64 * period.as_secs_f64();
    let meters = speed_ms * t;
    // Equal north and east components.
    let step_deg = meters / std::f64::consts::SQRT_2 / 111_320.0;
    let cos_lat = origin.lat.to_radians().cos().max(1e-6);

    let noise = (t * 0.7).sin() * 1.5e-5;
    let mut lat = origin.lat + step_deg + noise;
    let lng = origin.lng + step_deg / cos_lat + (t * 1.3).cos() * 1.5e-5;

    let mut accuracy = 5.0 + (t * 0.1).sin() * 2.0;
    if seq % 23 == 0 {
        accuracy = 40.0;
    }
    if seq == 45 {
        lat += 0.01;
    }

    RawSample::new(lat, lng, accuracy, Utc::now())
}
