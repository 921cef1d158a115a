//! Per-kind protocol descriptors and table builder.
//!
//! Each protocol is defined by plain `fn` pointers that describe the side
//! effects of entering and leaving `Active`.  The handlers only *plan*
//! effects; [`EffectBatch::execute`](super::EffectBatch::execute) runs them
//! after the protocol lock has been released.
//!
//! ```text
//!            activate(predicted)               [already Active: no-op]
//!  IDLE ──────────────────────────▶ ACTIVE ◀───────────────────────────┐
//!    ▲   alarm + caregiver alert      │  └────────────────────────────┘
//!    │   (+ motor start: severe)      │
//!    └────────── acknowledge ─────────┘
//!          alarm stop (+ motor stop: severe)
//! ```

use std::time::Duration;

use super::{Effect, EffectPlan, ProtocolKind};
use crate::app::ports::CaregiverAlert;
use crate::sensors::Timestamp;

/// Inputs available to an activation handler.
pub struct ActivationInput<'a> {
    pub kind: ProtocolKind,
    pub predicted_value: f64,
    pub at: Timestamp,
    pub alarm: Duration,
    pub patient_id: &'a str,
    /// `false` once this episode's caregiver alert has gone out.
    pub notify: bool,
}

/// Plans the effects of `Idle -> Active`.
pub type ActivateFn = fn(&ActivationInput<'_>, &mut EffectPlan);

/// Plans the kind-specific effects of `Active -> Idle`.  Stopping the alarm
/// is common to every kind and is planned by the engine.
pub type DeactivateFn = fn(&mut EffectPlan);

/// Static descriptor for one protocol kind.
#[derive(Clone, Copy)]
pub struct ProtocolDescriptor {
    pub kind: ProtocolKind,
    pub name: &'static str,
    /// Whether this protocol owns the drug-delivery actuator.
    pub drives_actuator: bool,
    pub on_activate: ActivateFn,
    pub on_deactivate: DeactivateFn,
}

// ═══════════════════════════════════════════════════════════════════════════
//  Table builder
// ═══════════════════════════════════════════════════════════════════════════

/// Build the protocol table in priority order.
pub fn build_protocol_table() -> [ProtocolDescriptor; ProtocolKind::COUNT] {
    [
        // Index 0: Severe hypoglycemia
        ProtocolDescriptor {
            kind: ProtocolKind::Severe,
            name: "SEVERE",
            drives_actuator: true,
            on_activate: severe_activate,
            on_deactivate: severe_deactivate,
        },
        // Index 1: Mild hypoglycemia
        ProtocolDescriptor {
            kind: ProtocolKind::Mild,
            name: "MILD",
            drives_actuator: false,
            on_activate: alarm_and_alert,
            on_deactivate: no_extra_effects,
        },
        // Index 2: Hyperglycemia
        ProtocolDescriptor {
            kind: ProtocolKind::Hyper,
            name: "HYPER",
            drives_actuator: false,
            on_activate: alarm_and_alert,
            on_deactivate: no_extra_effects,
        },
    ]
}

// ═══════════════════════════════════════════════════════════════════════════
//  Shared handlers
// ═══════════════════════════════════════════════════════════════════════════

fn alarm_and_alert(input: &ActivationInput<'_>, plan: &mut EffectPlan) {
    let _ = plan.push(Effect::SoundAlarm(input.alarm));
    if input.notify {
        let _ = plan.push(Effect::Notify(CaregiverAlert {
            kind: input.kind,
            predicted_value: input.predicted_value,
            patient_id: input.patient_id.to_string(),
            timestamp: input.at,
        }));
    }
}

fn no_extra_effects(_plan: &mut EffectPlan) {}

// ═══════════════════════════════════════════════════════════════════════════
//  SEVERE: alarm and caregiver alert plus drug delivery
// ═══════════════════════════════════════════════════════════════════════════

fn severe_activate(input: &ActivationInput<'_>, plan: &mut EffectPlan) {
    alarm_and_alert(input, plan);
    let _ = plan.push(Effect::Motor(true));
}

fn severe_deactivate(plan: &mut EffectPlan) {
    let _ = plan.push(Effect::Motor(false));
}
