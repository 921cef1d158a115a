//! Per-protocol mutable state.
//!
//! `ProtocolState` lives behind its protocol's own lock.  Everything the
//! orchestrator, the alarm timer, and an acknowledgment touch is here; the
//! episode counter lets a late side-effect completion recognise that the
//! episode it belonged to has already ended.

use serde::{Deserialize, Serialize};

use super::ProtocolKind;
use crate::alarm::AlarmTimer;
use crate::app::ports::AlarmHandle;
use crate::sensors::Timestamp;

#[derive(Debug, Default)]
pub struct ProtocolState {
    pub active: bool,
    pub predicted_value: Option<f64>,
    pub activated_at: Option<Timestamp>,
    pub notification_sent: bool,
    /// One-shot session debounce flag (consulted for hyperglycemia only).
    pub initial_check_done: bool,
    /// Drug-delivery motor last commanded on and not yet stopped.
    pub actuator_engaged: bool,

    /// Monotonic activation counter; survives session resets.
    pub(crate) episode: u64,
    pub(crate) alarm: Option<AlarmHandle>,
    pub(crate) timer: Option<AlarmTimer>,
}

impl ProtocolState {
    pub fn snapshot(&self, kind: ProtocolKind) -> ProtocolSnapshot {
        ProtocolSnapshot {
            kind,
            active: self.active,
            predicted_value: self.predicted_value,
            activated_at: self.activated_at,
            notification_sent: self.notification_sent,
            alarm_sounding: self.alarm.is_some(),
            actuator_engaged: self.actuator_engaged,
        }
    }

    /// Back to initial values for a new session, keeping the episode
    /// counter so stale completions stay recognisable.
    pub(crate) fn reset_for_session(&mut self) {
        let episode = self.episode;
        if let Some(timer) = self.timer.take() {
            timer.cancel();
        }
        *self = Self {
            episode,
            ..Self::default()
        };
    }
}

/// Read-only view of one protocol for display.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProtocolSnapshot {
    pub kind: ProtocolKind,
    pub active: bool,
    pub predicted_value: Option<f64>,
    pub activated_at: Option<Timestamp>,
    pub notification_sent: bool,
    pub alarm_sounding: bool,
    pub actuator_engaged: bool,
}
