//! Outbound application events.
//!
//! The [`MonitorService`](super::service::MonitorService) emits these
//! through the [`EventSink`](super::ports::EventSink) port.  Adapters on
//! the other side decide what to do with them: log them, persist the
//! reading records, refresh a display.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::orchestrator::CycleOutcomes;
use crate::classify::GlucoseState;
use crate::error::{DoseError, InputError, PortFailure};
use crate::estimator::kalman::Forecast;
use crate::fsm::ProtocolKind;
use crate::sensors::glucose::HourlyMetrics;
use crate::sensors::{Sample, Timestamp};

/// Why a protocol went back to `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeactivationReason {
    Acknowledged,
    /// Mild episode replaced by a severe one.
    Escalated,
    SessionStopped,
}

/// Structured events emitted by the monitoring core.
#[derive(Debug, Clone)]
pub enum AppEvent {
    SessionStarted,
    SessionStopped { accepted: u64, rejected: u64 },
    /// A sample was refused; the pipeline state is unchanged.
    SampleRejected(InputError),
    /// One pipeline cycle completed.
    Cycle(Box<CycleReport>),
    ProtocolActivated {
        kind: ProtocolKind,
        predicted_value: f64,
        at: Timestamp,
    },
    ProtocolDeactivated {
        kind: ProtocolKind,
        reason: DeactivationReason,
    },
    /// A side effect failed.  The transition that caused it stands.
    PortFailed(PortFailure),
    /// Thresholds are not `severe <= mild < hyper`; classification stays
    /// deterministic but clinically meaningless.
    ThresholdsInverted,
    /// Manual glucagon delivery started; the pump stops after `run`.
    DoseStarted { dose_ml: f64, run: Duration },
    DoseRefused(DoseError),
}

/// Everything one cycle produced.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub sample: Sample,
    pub filtered: f64,
    pub forecast: Forecast,
    /// Classification of the current (measured) value.
    pub state: GlucoseState,
    pub outcomes: CycleOutcomes,
    /// Port failures reported since the previous cycle.
    pub failures: Vec<PortFailure>,
    pub metrics: Option<HourlyMetrics>,
    /// Any protocol active after this cycle.
    pub protocol_active: bool,
}

impl CycleReport {
    /// Row handed to the persistence collaborator.
    pub fn record(&self) -> ReadingRecord {
        ReadingRecord {
            timestamp: self.sample.timestamp,
            glucose: self.sample.glucose,
            filtered: self.filtered,
            prediction: self.forecast.first(),
            state: self.state.label().to_string(),
            protocol_active: self.protocol_active,
        }
    }
}

/// One persisted reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadingRecord {
    pub timestamp: Timestamp,
    pub glucose: f64,
    pub filtered: f64,
    pub prediction: Option<f64>,
    pub state: String,
    pub protocol_active: bool,
}
