//! Monitoring configuration parameters
//!
//! All tunable parameters for the glucose monitor.
//! Values can be overridden from a JSON settings file or a settings screen.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::app::ports::ThresholdProvider;
use crate::error::{ConfigError, InputError};
use crate::fsm::ProtocolKind;

/// Longest forecast horizon: one day of 5-minute steps.
pub const MAX_PREDICT_STEPS: usize = 288;

/// Longest sample interval: one day.
pub const MAX_SAMPLE_INTERVAL_MINUTES: u32 = 24 * 60;

/// Longest alarm any protocol may sound.
pub const MAX_ALARM_SECS: u64 = 60 * 60;

/// Longest manual pump run.
pub const MAX_DOSE_RUN_SECS: u64 = 5 * 60;

/// Glucose boundaries in mg/dL used by the classifier and the protocols.
///
/// Callers are expected to keep `severe_hypo <= mild_hypo < hyper`, but
/// nothing here enforces it; see [`ThresholdConfig::is_ordered`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdConfig {
    pub severe_hypo: f64,
    pub mild_hypo: f64,
    pub hyper: f64,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            severe_hypo: 54.0,
            mild_hypo: 69.0,
            hyper: 181.0,
        }
    }
}

impl ThresholdConfig {
    /// Parse thresholds from user-editable text fields.
    ///
    /// Accepts integers or decimals with surrounding whitespace.
    pub fn from_fields(severe: &str, mild: &str, hyper: &str) -> Result<Self, InputError> {
        Ok(Self {
            severe_hypo: parse_field(severe, "severe_hypo")?,
            mild_hypo: parse_field(mild, "mild_hypo")?,
            hyper: parse_field(hyper, "hyper")?,
        })
    }

    /// `true` when `severe_hypo <= mild_hypo < hyper`.
    pub fn is_ordered(&self) -> bool {
        self.severe_hypo <= self.mild_hypo && self.mild_hypo < self.hyper
    }
}

fn parse_field(text: &str, field: &'static str) -> Result<f64, InputError> {
    match text.trim().parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => Err(InputError::MalformedThreshold(field)),
    }
}

/// Physically plausible sensor range; readings outside are `Invalid`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValidRange {
    pub min: f64,
    pub max: f64,
}

impl Default for ValidRange {
    fn default() -> Self {
        Self {
            min: 40.0,
            max: 400.0,
        }
    }
}

impl ValidRange {
    pub fn contains(&self, glucose: f64) -> bool {
        (self.min..=self.max).contains(&glucose)
    }
}

/// Kalman filter tuning constants (grid-searched defaults).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FilterTuning {
    /// Process noise variance.
    pub q: f64,
    /// Measurement noise variance.
    pub r: f64,
    /// Initial position covariance.
    pub p0: f64,
}

impl Default for FilterTuning {
    fn default() -> Self {
        Self {
            q: 1.0,
            r: 0.051_794_746_792_312_1,
            p0: 5.0,
        }
    }
}

/// Core monitoring configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    // --- Classification ---
    pub thresholds: ThresholdConfig,
    pub valid_range: ValidRange,

    // --- Estimation ---
    pub filter: FilterTuning,
    /// Nominal minutes between samples; also the forecast step.
    pub sample_interval_minutes: u32,
    /// Forecast horizon in sample intervals.
    pub predict_steps: usize,

    // --- Alarms (seconds) ---
    pub severe_alarm_secs: u64,
    pub mild_alarm_secs: u64,
    pub hyper_alarm_secs: u64,

    // --- Notification ---
    /// Identifier placed in caregiver alerts.
    pub patient_id: String,

    // --- Manual glucagon delivery ---
    /// Dose in mL (5 mg/mL solution) reported for a manual delivery.
    pub glucagon_dose_ml: f64,
    /// Seconds the pump motor runs before it is switched off.
    pub dose_run_secs: u64,

    // --- Dispatch ---
    /// Run alarm, notification and actuator calls on a dedicated worker
    /// thread instead of the pipeline thread.
    pub effect_worker: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            thresholds: ThresholdConfig::default(),
            valid_range: ValidRange::default(),

            filter: FilterTuning::default(),
            sample_interval_minutes: 5,
            predict_steps: 1,

            severe_alarm_secs: 15 * 60,
            mild_alarm_secs: 5 * 60,
            hyper_alarm_secs: 5 * 60,

            patient_id: "Patient".to_string(),

            glucagon_dose_ml: 0.5,
            dose_run_secs: 5,

            effect_worker: true,
        }
    }
}

impl MonitorConfig {
    /// Reject values the estimator or timers cannot work with.
    ///
    /// Threshold ordering is not checked here; see [`ThresholdConfig::is_ordered`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        let t = &self.thresholds;
        for (value, field) in [
            (t.severe_hypo, "thresholds.severe_hypo"),
            (t.mild_hypo, "thresholds.mild_hypo"),
            (t.hyper, "thresholds.hyper"),
            (self.valid_range.min, "valid_range.min"),
            (self.valid_range.max, "valid_range.max"),
        ] {
            if !value.is_finite() {
                return Err(ConfigError::NonFinite(field));
            }
        }
        if self.valid_range.min >= self.valid_range.max {
            return Err(ConfigError::InvertedRange);
        }
        for (value, field) in [
            (self.filter.q, "filter.q"),
            (self.filter.r, "filter.r"),
            (self.filter.p0, "filter.p0"),
            (self.glucagon_dose_ml, "glucagon_dose_ml"),
        ] {
            if !value.is_finite() {
                return Err(ConfigError::NonFinite(field));
            }
            if value <= 0.0 {
                return Err(ConfigError::NonPositive(field));
            }
        }
        if self.sample_interval_minutes == 0 {
            return Err(ConfigError::NonPositive("sample_interval_minutes"));
        }
        if self.sample_interval_minutes > MAX_SAMPLE_INTERVAL_MINUTES {
            return Err(ConfigError::OutOfRange("sample_interval_minutes"));
        }
        if self.predict_steps > MAX_PREDICT_STEPS {
            return Err(ConfigError::OutOfRange("predict_steps"));
        }
        for (secs, field) in [
            (self.severe_alarm_secs, "severe_alarm_secs"),
            (self.mild_alarm_secs, "mild_alarm_secs"),
            (self.hyper_alarm_secs, "hyper_alarm_secs"),
        ] {
            if secs > MAX_ALARM_SECS {
                return Err(ConfigError::OutOfRange(field));
            }
        }
        if self.dose_run_secs == 0 {
            return Err(ConfigError::NonPositive("dose_run_secs"));
        }
        if self.dose_run_secs > MAX_DOSE_RUN_SECS {
            return Err(ConfigError::OutOfRange("dose_run_secs"));
        }
        Ok(())
    }

    pub fn dose_run(&self) -> Duration {
        Duration::from_secs(self.dose_run_secs)
    }

    /// Alarm duration for a protocol kind.
    pub fn alarm_duration(&self, kind: ProtocolKind) -> Duration {
        let secs = match kind {
            ProtocolKind::Severe => self.severe_alarm_secs,
            ProtocolKind::Mild => self.mild_alarm_secs,
            ProtocolKind::Hyper => self.hyper_alarm_secs,
        };
        Duration::from_secs(secs)
    }
}

// ---------------------------------------------------------------------------
// Shared threshold provider
// ---------------------------------------------------------------------------

/// Thresholds shared between a settings writer and the sample pipeline.
///
/// Readers copy the whole struct under the lock, so a cycle never sees a
/// half-applied update.
#[derive(Debug, Clone, Default)]
pub struct SharedThresholds {
    inner: Arc<RwLock<ThresholdConfig>>,
}

impl SharedThresholds {
    pub fn new(thresholds: ThresholdConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(thresholds)),
        }
    }

    /// Replace all thresholds at once.
    pub fn update(&self, thresholds: ThresholdConfig) {
        *self.inner.write() = thresholds;
    }
}

impl ThresholdProvider for SharedThresholds {
    fn thresholds(&self) -> ThresholdConfig {
        *self.inner.read()
    }
}
