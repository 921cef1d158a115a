//! Sample gate and trailing-hour metrics.
//!
//! The gate enforces strict timestamp ordering (duplicates and late samples
//! are rejected, never reordered) and finiteness.  Accepted samples feed a
//! fixed-capacity window used for the hourly mean and GMI.

use chrono::TimeDelta;
use heapless::Deque;
use serde::{Deserialize, Serialize};

use super::{Sample, Timestamp};
use crate::error::InputError;

/// Capacity of the trailing-hour window.  At the nominal 5-minute cadence an
/// hour is 13 samples; the headroom covers faster live feeds.
const WINDOW_CAP: usize = 64;

/// Glucose Management Indicator: `3.31 + 0.02392 * mean_mg_dl`.
const GMI_INTERCEPT: f64 = 3.31;
const GMI_SLOPE: f64 = 0.023_92;

/// Mean glucose and GMI over the trailing hour.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HourlyMetrics {
    pub mean_glucose: f64,
    pub gmi_percent: f64,
    pub samples: usize,
}

pub struct SampleGate {
    last: Option<Timestamp>,
    window: Deque<Sample, WINDOW_CAP>,
    accepted: u64,
    rejected: u64,
}

impl Default for SampleGate {
    fn default() -> Self {
        Self::new()
    }
}

impl SampleGate {
    pub fn new() -> Self {
        Self {
            last: None,
            window: Deque::new(),
            accepted: 0,
            rejected: 0,
        }
    }

    /// Accept `sample` if it is finite and strictly newer than the last
    /// accepted sample.  A rejected sample leaves the gate untouched.
    pub fn admit(&mut self, sample: &Sample) -> Result<(), InputError> {
        if !sample.glucose.is_finite() {
            self.rejected += 1;
            return Err(InputError::NonFiniteGlucose);
        }
        if let Some(previous) = self.last {
            if sample.timestamp <= previous {
                self.rejected += 1;
                return Err(InputError::OutOfOrder {
                    previous,
                    received: sample.timestamp,
                });
            }
        }

        self.last = Some(sample.timestamp);
        self.accepted += 1;
        self.push_window(*sample);
        Ok(())
    }

    /// Mean glucose and GMI over samples no older than one hour before the
    /// latest accepted sample.  `None` before the first sample.
    pub fn hourly_metrics(&self) -> Option<HourlyMetrics> {
        let latest = self.last?;
        let cutoff = latest - TimeDelta::hours(1);
        let (sum, n) = self
            .window
            .iter()
            .filter(|s| s.timestamp >= cutoff)
            .fold((0.0, 0usize), |(sum, n), s| (sum + s.glucose, n + 1));
        if n == 0 {
            return None;
        }
        let mean = sum / n as f64;
        Some(HourlyMetrics {
            mean_glucose: mean,
            gmi_percent: GMI_INTERCEPT + GMI_SLOPE * mean,
            samples: n,
        })
    }

    /// Timestamp of the last accepted sample.
    pub fn last_timestamp(&self) -> Option<Timestamp> {
        self.last
    }

    pub fn accepted(&self) -> u64 {
        self.accepted
    }

    pub fn rejected(&self) -> u64 {
        self.rejected
    }

    /// Forget everything (new session).
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    fn push_window(&mut self, sample: Sample) {
        let cutoff = sample.timestamp - TimeDelta::hours(1);
        while self.window.front().is_some_and(|s| s.timestamp < cutoff) {
            self.window.pop_front();
        }
        if self.window.is_full() {
            self.window.pop_front();
        }
        // Cannot fail: a slot was freed above if the deque was full.
        let _ = self.window.push_back(sample);
    }
}
