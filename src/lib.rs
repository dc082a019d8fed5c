//! Real-time GPS track processing for workout tracking.
//!
//! Raw fixes from a [`LocationProvider`] pass through the [`PositionFilter`]
//! into a [`SessionTracker`], which owns the workout [`Session`] and its
//! lifecycle. [`TrackerService`] runs the whole pipeline on tokio.

pub mod config;
pub mod error;
pub mod filters;
pub mod geo_math;
pub mod replay;
pub mod sensors;
pub mod service;
pub mod session;
pub mod signal;
pub mod storage;
pub mod tracker;
pub mod types;

pub use config::{FilterConfig, TrackerConfig};
pub use error::{Result, TrackerError};
pub use filters::{FilterOutcome, PositionFilter};
pub use sensors::{LocationProvider, ScriptedProvider, SimulatedProvider};
pub use service::TrackerService;
pub use session::{Session, SessionStatus};
pub use signal::SignalQuality;
pub use storage::{JsonFileStore, MemoryStore, SessionStore, UserAggregateStats};
pub use tracker::SessionTracker;
pub use types::{ActivityType, Coordinate, RawSample, SmoothedPosition};
