use serde::{Deserialize, Serialize};

/// Scalar predict-then-correct estimator for one coordinate axis.
///
/// All quantities share the measurement's unit (degrees for lat/lon).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct AxisFilter {
    pub estimate: f64,
    pub estimate_error: f64,
    pub measurement_error: f64,
    pub process_noise: f64,
}

impl AxisFilter {
    /// Seed the axis with a first measurement.
    pub fn new(measurement: f64, measurement_error: f64, process_noise: f64) -> Self {
        Self {
            estimate: measurement,
            estimate_error: measurement_error,
            measurement_error,
            process_noise,
        }
    }

    /// Blend a measurement into the estimate and return the new estimate.
    pub fn update(&mut self, measurement: f64, measurement_error: f64) -> f64 {
        self.measurement_error = measurement_error;

        // Predict
        self.estimate_error += self.process_noise;

        // Correct
        let gain = self.gain();
        self.estimate += gain * (measurement - self.estimate);
        self.estimate_error *= 1.0 - gain;

        self.estimate
    }

    /// Snap the estimate back onto a raw measurement.
    pub fn reset(&mut self, measurement: f64, measurement_error: f64) {
        self.estimate = measurement;
        self.estimate_error = measurement_error;
        self.measurement_error = measurement_error;
    }

    fn gain(&self) -> f64 {
        let denom = self.estimate_error + self.measurement_error;
        if denom <= 0.0 {
            return 1.0;
        }
        self.estimate_error / denom
    }
}
