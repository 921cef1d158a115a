//! Per-session glucose estimator.
//!
//! Wraps [`kalman::KalmanFilter`] with the session-scoped state the
//! pipeline needs: the current [`kalman::EstimatorState`], the filtered
//! value for every accepted sample, and the append-only prediction history
//! used for display.  Owned solely by the pipeline thread.

pub mod kalman;

use serde::{Deserialize, Serialize};

use crate::config::MonitorConfig;
use crate::sensors::{Sample, Timestamp};
use kalman::{EstimatorState, Forecast, KalmanFilter};

/// One `(predicted_time, predicted_value)` entry of the prediction trail.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PredictionPoint {
    pub time: Timestamp,
    pub value: f64,
}

/// Result of feeding one accepted sample through the estimator.
#[derive(Debug, Clone, PartialEq)]
pub struct Estimate {
    pub filtered: f64,
    pub forecast: Forecast,
}

pub struct GlucoseEstimator {
    filter: KalmanFilter,
    horizon_steps: usize,
    interval_minutes: u32,
    state: Option<EstimatorState>,
    filtered: Vec<f64>,
    predictions: Vec<PredictionPoint>,
}

impl GlucoseEstimator {
    pub fn new(config: &MonitorConfig) -> Self {
        Self {
            filter: KalmanFilter::new(config.filter, config.sample_interval_minutes),
            horizon_steps: config.predict_steps,
            interval_minutes: config.sample_interval_minutes,
            state: None,
            filtered: Vec::new(),
            predictions: Vec::new(),
        }
    }

    /// Filter `sample` and forecast from the corrected state.
    ///
    /// The caller is responsible for ordering; see
    /// [`SampleGate`](crate::sensors::glucose::SampleGate).
    pub fn update(&mut self, sample: &Sample) -> Estimate {
        let (state, filtered) = match &self.state {
            None => (self.filter.initialize(sample.glucose), sample.glucose),
            Some(prev) => self.filter.step(prev, sample.glucose),
        };
        self.state = Some(state);
        self.filtered.push(filtered);

        let forecast = self.filter.forecast(
            &state,
            sample.timestamp,
            self.horizon_steps,
            self.interval_minutes,
        );
        self.predictions.extend(
            forecast
                .points()
                .map(|(time, value)| PredictionPoint { time, value }),
        );

        Estimate { filtered, forecast }
    }

    /// Current estimator state, `None` before the first sample.
    pub fn state(&self) -> Option<&EstimatorState> {
        self.state.as_ref()
    }

    /// Filtered value for every accepted sample of the session.
    pub fn filtered(&self) -> &[f64] {
        &self.filtered
    }

    /// Every forecast point produced this session, in production order.
    pub fn prediction_history(&self) -> &[PredictionPoint] {
        &self.predictions
    }

    /// Drop all session state.
    pub fn reset(&mut self) {
        self.state = None;
        self.filtered.clear();
        self.predictions.clear();
    }
}
