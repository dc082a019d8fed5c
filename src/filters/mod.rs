pub mod kalman;
pub mod position;

pub use kalman::AxisFilter;
pub use position::{FilterOutcome, FilterPhase, FilterState, PositionFilter, Rejection};
