//! Constant-velocity Kalman filter for glucose trend estimation
//!
//! State is `[position, velocity]` in mg/dL and mg/dL per minute.  Only
//! position is observed.  The transition matrix carries the sampling
//! interval, so a forecast step of `Δt` minutes moves position by
//! `velocity * Δt`.

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};

use crate::config::{FilterTuning, MAX_PREDICT_STEPS};
use crate::sensors::Timestamp;

type Mat2 = [[f64; 2]; 2];

const IDENTITY: Mat2 = [[1.0, 0.0], [0.0, 1.0]];

/// Running position/velocity estimate and its covariance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EstimatorState {
    pub position: f64,
    pub velocity: f64,
    pub covariance: [[f64; 2]; 2],
}

/// N-step-ahead extrapolation from the latest corrected state.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Forecast {
    pub origin_time: Option<Timestamp>,
    pub horizon_minutes: Vec<u32>,
    pub predicted_values: Vec<f64>,
}

impl Forecast {
    pub fn is_empty(&self) -> bool {
        self.predicted_values.is_empty()
    }

    /// `(predicted_time, predicted_value)` pairs in horizon order.
    pub fn points(&self) -> impl Iterator<Item = (Timestamp, f64)> + '_ {
        self.origin_time.into_iter().flat_map(move |origin| {
            self.horizon_minutes
                .iter()
                .zip(&self.predicted_values)
                .filter_map(move |(&m, &v)| {
                    let at = origin.checked_add_signed(TimeDelta::minutes(i64::from(m)))?;
                    Some((at, v))
                })
        })
    }

    /// First (nearest) predicted value, if any.
    pub fn first(&self) -> Option<f64> {
        self.predicted_values.first().copied()
    }
}

/// Linear Kalman filter with a fixed tuning.
#[derive(Debug, Clone, Copy)]
pub struct KalmanFilter {
    tuning: FilterTuning,
    dt_minutes: f64,
}

impl KalmanFilter {
    pub fn new(tuning: FilterTuning, dt_minutes: u32) -> Self {
        Self {
            tuning,
            dt_minutes: f64::from(dt_minutes),
        }
    }

    /// State for the first sample of a session: position is the reading,
    /// velocity is zero, covariance is `diag(P0, Q)`.
    pub fn initialize(&self, glucose: f64) -> EstimatorState {
        EstimatorState {
            position: glucose,
            velocity: 0.0,
            covariance: [[self.tuning.p0, 0.0], [0.0, self.tuning.q]],
        }
    }

    /// One predict/correct cycle.  Returns the corrected state and its
    /// position component (the filtered value for this sample).
    pub fn step(&self, state: &EstimatorState, glucose: f64) -> (EstimatorState, f64) {
        let q = self.tuning.q;
        let a = transition(self.dt_minutes);

        // Predict
        let (pos, vel) = apply(&a, state.position, state.velocity);
        let mut p = mul(&mul(&a, &state.covariance), &transpose(&a));
        p[0][0] += q;
        p[1][1] += q;

        // Correct (H = [1, 0])
        let innovation = glucose - pos;
        let s = p[0][0] + self.tuning.r;
        let k = [p[0][0] / s, p[1][0] / s];
        let position = pos + k[0] * innovation;
        let velocity = vel + k[1] * innovation;

        // P = (I - K H) P
        let kh: Mat2 = [[k[0], 0.0], [k[1], 0.0]];
        let covariance = mul(&sub(&IDENTITY, &kh), &p);

        let next = EstimatorState {
            position,
            velocity,
            covariance,
        };
        (next, position)
    }

    /// Extrapolate `horizon_steps` intervals of `interval_minutes` from
    /// `state` without correction.  `state` is not modified.
    ///
    /// Horizon offsets saturate at `u32::MAX` minutes.  Callers bound
    /// `horizon_steps` through
    /// [`MonitorConfig::validate`](crate::config::MonitorConfig::validate).
    pub fn forecast(
        &self,
        state: &EstimatorState,
        origin_time: Timestamp,
        horizon_steps: usize,
        interval_minutes: u32,
    ) -> Forecast {
        let a = transition(f64::from(interval_minutes));
        let capacity = horizon_steps.min(MAX_PREDICT_STEPS);
        let mut horizon_minutes = Vec::with_capacity(capacity);
        let mut predicted_values = Vec::with_capacity(capacity);

        let (mut pos, mut vel) = (state.position, state.velocity);
        let mut minutes = 0u32;
        for _ in 0..horizon_steps {
            (pos, vel) = apply(&a, pos, vel);
            minutes = minutes.saturating_add(interval_minutes);
            predicted_values.push(pos);
            horizon_minutes.push(minutes);
        }

        Forecast {
            origin_time: Some(origin_time),
            horizon_minutes,
            predicted_values,
        }
    }

    /// Filter a whole series from a fresh initialization.  Index 0 is the
    /// raw first measurement; an empty series yields an empty result.
    pub fn filter_series(&self, measurements: &[f64]) -> Vec<f64> {
        let Some((&first, rest)) = measurements.split_first() else {
            return Vec::new();
        };
        let mut state = self.initialize(first);
        let mut out = Vec::with_capacity(measurements.len());
        out.push(first);
        for &z in rest {
            let (next, filtered) = self.step(&state, z);
            state = next;
            out.push(filtered);
        }
        out
    }
}

fn transition(dt: f64) -> Mat2 {
    [[1.0, dt], [0.0, 1.0]]
}

fn apply(a: &Mat2, pos: f64, vel: f64) -> (f64, f64) {
    (a[0][0] * pos + a[0][1] * vel, a[1][0] * pos + a[1][1] * vel)
}

fn mul(x: &Mat2, y: &Mat2) -> Mat2 {
    let mut out = [[0.0; 2]; 2];
    for (i, row) in out.iter_mut().enumerate() {
        for (j, cell) in row.iter_mut().enumerate() {
            *cell = x[i][0] * y[0][j] + x[i][1] * y[1][j];
        }
    }
    out
}

fn transpose(x: &Mat2) -> Mat2 {
    [[x[0][0], x[1][0]], [x[0][1], x[1][1]]]
}

fn sub(x: &Mat2, y: &Mat2) -> Mat2 {
    [
        [x[0][0] - y[0][0], x[0][1] - y[0][1]],
        [x[1][0] - y[1][0], x[1][1] - y[1][1]],
    ]
}
