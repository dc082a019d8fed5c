use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::config::TrackerConfig;
use crate::types::RawSample;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SignalQuality {
    Good,
    /// Recent fixes are inaccurate or a little stale
    Weak,
    /// Nothing heard from the provider for a while
    Lost,
}

#[derive(Clone, Copy, Debug)]
struct LastFix {
    at: Instant,
    accuracy_m: f64,
}

/// Tracks GPS freshness and accuracy for the "weak signal" indicator.
pub struct SignalMonitor {
    since: Mutex<Instant>,
    last_fix: Mutex<Option<LastFix>>,
    stale_threshold: Duration,
    lost_threshold: Duration,
    max_accuracy_m: f64,
}

impl SignalMonitor {
    pub fn new(stale_threshold: Duration, lost_threshold: Duration, max_accuracy_m: f64) -> Self {
        SignalMonitor {
            since: Mutex::new(Instant::now()),
            last_fix: Mutex::new(None),
            stale_threshold,
            lost_threshold,
            max_accuracy_m,
        }
    }

    pub fn from_config(config: &TrackerConfig) -> Self {
        Self::new(
            Duration::from_secs(config.signal_stale_secs),
            Duration::from_secs(config.signal_lost_secs),
            config.filter.min_acceptable_accuracy_m,
        )
    }

    pub fn record(&self, sample: &RawSample) {
        self.record_at(sample.accuracy_m, Instant::now());
    }

    pub fn record_at(&self, accuracy_m: f64, at: Instant) {
        if let Ok(mut last) = self.last_fix.lock() {
            *last = Some(LastFix { at, accuracy_m });
        }
    }

    /// Forget previous fixes; silence is measured from now.
    pub fn reset(&self) {
        self.reset_at(Instant::now());
    }

    pub fn reset_at(&self, at: Instant) {
        if let Ok(mut since) = self.since.lock() {
            *since = at;
        }
        if let Ok(mut last) = self.last_fix.lock() {
            *last = None;
        }
    }

    pub fn quality(&self) -> SignalQuality {
        self.quality_at(Instant::now())
    }

    pub fn quality_at(&self, now: Instant) -> SignalQuality {
        let last = self.last_fix.lock().ok().and_then(|l| *l);
        match last {
            None => {
                let waited = self
                    .since
                    .lock()
                    .ok()
                    .map(|s| now.saturating_duration_since(*s))
                    .unwrap_or_default();
                if waited > self.lost_threshold {
                    SignalQuality::Lost
                } else {
                    SignalQuality::Weak
                }
            }
            Some(fix) => {
                let age = now.saturating_duration_since(fix.at);
                if age > self.lost_threshold {
                    SignalQuality::Lost
                } else if age > self.stale_threshold || fix.accuracy_m > self.max_accuracy_m {
                    SignalQuality::Weak
                } else {
                    SignalQuality::Good
                }
            }
        }
    }

    /// Format signal status for logging
    pub fn format_status(&self) -> String {
        let last = self.last_fix.lock().ok().and_then(|l| *l);
        match (self.quality(), last) {
            (SignalQuality::Good, Some(fix)) => format!("GPS ✓ ({:.0}m)", fix.accuracy_m),
            (SignalQuality::Weak, Some(fix)) => format!(
                "GPS ⚠ weak ({:.0}m, {:.1}s ago)",
                fix.accuracy_m,
                fix.at.elapsed().as_secs_f64()
            ),
            (SignalQuality::Weak, None) => "GPS ⚠ acquiring".to_string(),
            _ => "GPS ✗ lost".to_string(),
        }
    }
}
