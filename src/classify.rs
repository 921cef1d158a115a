//! Threshold classifier.
//!
//! Maps a glucose value to one of five discrete states.  The checks run in
//! a fixed order and the first match wins, so the result is deterministic
//! even when the thresholds overlap or are inverted:
//!
//! 1. outside the valid range → `Invalid`
//! 2. `<= severe_hypo`        → `SevereHypo`
//! 3. `<= mild_hypo`          → `MildHypo`
//! 4. `>= hyper`              → `Hyper`
//! 5. otherwise               → `Safe`

use core::fmt;

use serde::{Deserialize, Serialize};

use crate::config::{ThresholdConfig, ValidRange};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GlucoseState {
    Invalid,
    SevereHypo,
    MildHypo,
    Hyper,
    Safe,
}

impl GlucoseState {
    /// Display label.
    pub fn label(self) -> &'static str {
        match self {
            Self::Invalid => "Invalid",
            Self::SevereHypo => "Severe Hypoglycemia",
            Self::MildHypo => "Mild Hypoglycemia",
            Self::Hyper => "Hyperglycemia",
            Self::Safe => "Safe Range",
        }
    }
}

impl fmt::Display for GlucoseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

pub fn classify(glucose: f64, thresholds: &ThresholdConfig, valid: ValidRange) -> GlucoseState {
    if !valid.contains(glucose) {
        GlucoseState::Invalid
    } else if glucose <= thresholds.severe_hypo {
        GlucoseState::SevereHypo
    } else if glucose <= thresholds.mild_hypo {
        GlucoseState::MildHypo
    } else if glucose >= thresholds.hyper {
        GlucoseState::Hyper
    } else {
        GlucoseState::Safe
    }
}
