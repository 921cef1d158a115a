//! Glucose sample ingestion.
//!
//! A [`Sample`] is one `(timestamp, glucose)` reading from the live sensor
//! feed or a replayed dataset.  [`glucose::SampleGate`] sits in front of the
//! estimator and rejects anything that is not strictly newer than the last
//! accepted sample.

pub mod glucose;

use serde::{Deserialize, Serialize};

/// Wall-clock time of a reading as reported by the sensor.
pub type Timestamp = chrono::NaiveDateTime;

/// One glucose measurement in mg/dL.  Immutable once created.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub timestamp: Timestamp,
    pub glucose: f64,
}

impl Sample {
    pub fn new(timestamp: Timestamp, glucose: f64) -> Self {
        Self { timestamp, glucose }
    }
}
