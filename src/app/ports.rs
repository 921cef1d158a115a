//! Port traits: the hexagonal boundary between the monitoring core and the
//! outside world.
//!
//! ```text
//!   SampleSource ──▶ ┌────────────────┐ ──▶ NotificationPort
//! ThresholdProvider ▶│ MonitorService │ ──▶ AlarmPort
//!                    │                │ ──▶ ActuatorPort (optional)
//!                    └────────────────┘ ──▶ EventSink
//! ```
//!
//! Driven adapters implement these traits.  The effect ports are shared
//! with the effect worker and the alarm timers, so they take `&self` and
//! must be `Send + Sync`; implementations use interior mutability.

use core::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::{MonitorConfig, ThresholdConfig};
use crate::error::{ConfigError, PortError};
use crate::fsm::ProtocolKind;
use crate::sensors::{Sample, Timestamp};

// ───────────────────────────────────────────────────────────────
// Sample feed (driven adapter: sensor / dataset → core)
// ───────────────────────────────────────────────────────────────

/// Time-ordered glucose samples.  `None` is end of stream.
pub trait SampleSource {
    fn next_sample(&mut self) -> Option<Sample>;
}

// ───────────────────────────────────────────────────────────────
// Threshold provider (settings screen → core)
// ───────────────────────────────────────────────────────────────

/// Read once per cycle; the returned copy is used for the whole cycle.
pub trait ThresholdProvider: Send + Sync {
    fn thresholds(&self) -> ThresholdConfig;
}

impl ThresholdProvider for ThresholdConfig {
    fn thresholds(&self) -> ThresholdConfig {
        *self
    }
}

// ───────────────────────────────────────────────────────────────
// Caregiver notification
// ───────────────────────────────────────────────────────────────

/// Everything a caregiver message carries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaregiverAlert {
    pub kind: ProtocolKind,
    pub predicted_value: f64,
    pub patient_id: String,
    pub timestamp: Timestamp,
}

impl CaregiverAlert {
    /// Rendered message text, e.g. for an SMS gateway.
    pub fn message(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for CaregiverAlert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let at = self.timestamp.format("%I:%M %p");
        let (v, who) = (self.predicted_value, &self.patient_id);
        match self.kind {
            ProtocolKind::Severe => write!(
                f,
                "URGENT ALERT: {who} has a predicted severe hypoglycemia event. \
                 Glucose value: {v:.0} mg/dL at {at}. Emergency assistance may be needed."
            ),
            ProtocolKind::Mild => write!(
                f,
                "ALERT: {who} has a predicted mild hypoglycemia event. \
                 Glucose value: {v:.0} mg/dL at {at}. Recommend 15g carbohydrates."
            ),
            ProtocolKind::Hyper => write!(
                f,
                "ALERT: {who} has a predicted hyperglycemia event. \
                 Glucose value: {v:.0} mg/dL at {at}."
            ),
        }
    }
}

pub trait NotificationPort: Send + Sync {
    fn notify(&self, alert: &CaregiverAlert) -> Result<(), PortError>;
}

// ───────────────────────────────────────────────────────────────
// Drug-delivery actuator
// ───────────────────────────────────────────────────────────────

/// May be absent entirely; see [`Ports::actuator`].
pub trait ActuatorPort: Send + Sync {
    fn set_motor(&self, active: bool) -> Result<(), PortError>;
}

// ───────────────────────────────────────────────────────────────
// Alarm tone device
// ───────────────────────────────────────────────────────────────

/// Opaque identifier for one sounding alarm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AlarmHandle(pub u64);

pub trait AlarmPort: Send + Sync {
    /// Start the tone.  The core stops it via [`cancel`](Self::cancel) on
    /// acknowledgment or when `duration` elapses.
    fn sound(&self, duration: Duration, kind: ProtocolKind) -> Result<AlarmHandle, PortError>;

    /// Stop the tone.  Must tolerate handles that already stopped.
    fn cancel(&self, handle: AlarmHandle);
}

/// The effect ports one service drives.
#[derive(Clone)]
pub struct Ports {
    pub notifier: Arc<dyn NotificationPort>,
    pub alarm: Arc<dyn AlarmPort>,
    /// `None` when no drug-delivery device is attached.
    pub actuator: Option<Arc<dyn ActuatorPort>>,
}

// ───────────────────────────────────────────────────────────────
// Event sink (core → logging / persistence)
// ───────────────────────────────────────────────────────────────

/// The core emits structured [`AppEvent`](super::events::AppEvent)s
/// through this port.
pub trait EventSink {
    fn emit(&mut self, event: &super::events::AppEvent);
}

// ───────────────────────────────────────────────────────────────
// Configuration port
// ───────────────────────────────────────────────────────────────

/// Loads and persists monitor configuration.
///
/// Implementations validate before persisting and return
/// [`MonitorConfig::default()`] when nothing is stored yet.
pub trait ConfigPort {
    fn load(&self) -> Result<MonitorConfig, ConfigError>;

    fn save(&self, config: &MonitorConfig) -> Result<(), ConfigError>;
}
