//! Protocol orchestrator.
//!
//! Runs once per accepted sample and decides which protocols a fresh
//! forecast activates.  Evaluation order is fixed and sequential:
//!
//! 1. severe active → skip severe and mild entirely
//! 2. first prediction `<= severe_hypo` → activate severe, skip mild
//! 3. first prediction in `(severe_hypo, mild_hypo]` → activate mild
//! 4. hyper, independently: session debounce, current-value suppression,
//!    then first prediction `>= hyper`
//!
//! Threshold comparisons are made on raw values, so a forecast that
//! overshoots the valid sensor range still triggers.

use heapless::Vec;
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::config::{MonitorConfig, ThresholdConfig};
use crate::fsm::{Activation, EffectBatch, ProtocolKind, ProtocolSet};
use crate::sensors::Timestamp;

/// Per-protocol result of one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ProtocolOutcome {
    Activated { predicted_value: f64 },
    AlreadyActive,
    NotTriggered,
}

impl ProtocolOutcome {
    pub fn is_activated(self) -> bool {
        matches!(self, Self::Activated { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CycleOutcomes {
    pub severe: ProtocolOutcome,
    pub mild: ProtocolOutcome,
    pub hyper: ProtocolOutcome,
}

impl Default for CycleOutcomes {
    fn default() -> Self {
        Self {
            severe: ProtocolOutcome::NotTriggered,
            mild: ProtocolOutcome::NotTriggered,
            hyper: ProtocolOutcome::NotTriggered,
        }
    }
}

impl CycleOutcomes {
    pub fn get(&self, kind: ProtocolKind) -> ProtocolOutcome {
        match kind {
            ProtocolKind::Severe => self.severe,
            ProtocolKind::Mild => self.mild,
            ProtocolKind::Hyper => self.hyper,
        }
    }

    fn set(&mut self, kind: ProtocolKind, outcome: ProtocolOutcome) {
        match kind {
            ProtocolKind::Severe => self.severe = outcome,
            ProtocolKind::Mild => self.mild = outcome,
            ProtocolKind::Hyper => self.hyper = outcome,
        }
    }

    /// Kinds activated this cycle, in priority order.
    pub fn activated(&self) -> impl Iterator<Item = (ProtocolKind, f64)> + '_ {
        ProtocolKind::ALL
            .into_iter()
            .filter_map(|kind| match self.get(kind) {
                ProtocolOutcome::Activated { predicted_value } => Some((kind, predicted_value)),
                _ => None,
            })
    }
}

/// Decisions of one cycle plus the side effects they still owe.
pub struct Evaluation {
    pub outcomes: CycleOutcomes,
    /// Mild episode ended because severe took over this cycle.
    pub superseded: Option<EffectBatch>,
    pub batches: Vec<EffectBatch, { ProtocolKind::COUNT }>,
}

/// Cycle-wide inputs that do not come from the forecast.
pub struct CycleInput<'a> {
    pub at: Timestamp,
    pub current_glucose: Option<f64>,
    pub thresholds: &'a ThresholdConfig,
    pub config: &'a MonitorConfig,
}

/// Evaluate the three protocols against `predictions` (horizon order).
///
/// Transitions are applied before this returns; their side effects are
/// returned in [`Evaluation::batches`] for the dispatcher.
pub fn evaluate(
    protocols: &ProtocolSet,
    predictions: &[f64],
    input: &CycleInput<'_>,
) -> Evaluation {
    let t = input.thresholds;
    let mut eval = Evaluation {
        outcomes: CycleOutcomes::default(),
        superseded: None,
        batches: Vec::new(),
    };

    // ── Hypoglycemia: severe first, mild only if severe stayed idle ──
    let severe = protocols.get(ProtocolKind::Severe);
    let mild = protocols.get(ProtocolKind::Mild);
    if severe.is_active() {
        eval.outcomes.severe = ProtocolOutcome::AlreadyActive;
        debug!("SEVERE active, mild check skipped");
    } else if let Some(v) = predictions.iter().copied().find(|&v| v <= t.severe_hypo) {
        if mild.is_active() {
            info!("MILD superseded by SEVERE");
            eval.superseded = mild.deactivate();
        }
        activate(&mut eval, protocols, ProtocolKind::Severe, v, input);
    } else if mild.is_active() {
        eval.outcomes.mild = ProtocolOutcome::AlreadyActive;
    } else if let Some(v) = predictions
        .iter()
        .copied()
        .find(|&v| v > t.severe_hypo && v <= t.mild_hypo)
    {
        activate(&mut eval, protocols, ProtocolKind::Mild, v, input);
    }

    // ── Hyperglycemia, independent of the above ──
    let hyper = protocols.get(ProtocolKind::Hyper);
    if hyper.take_initial_check() {
        debug!("HYPER initial check of session, not triggering");
        if hyper.is_active() {
            eval.outcomes.hyper = ProtocolOutcome::AlreadyActive;
        }
    } else if hyper.is_active() {
        eval.outcomes.hyper = ProtocolOutcome::AlreadyActive;
    } else if input.current_glucose.is_some_and(|g| g >= t.hyper) {
        debug!("HYPER current reading already above threshold, not triggering");
    } else if let Some(v) = predictions.iter().copied().find(|&v| v >= t.hyper) {
        activate(&mut eval, protocols, ProtocolKind::Hyper, v, input);
    }

    eval
}

fn activate(
    eval: &mut Evaluation,
    protocols: &ProtocolSet,
    kind: ProtocolKind,
    predicted_value: f64,
    input: &CycleInput<'_>,
) {
    let outcome = match protocols.get(kind).activate(
        predicted_value,
        input.at,
        input.config.alarm_duration(kind),
        &input.config.patient_id,
    ) {
        Activation::Activated(batch) => {
            let _ = eval.batches.push(batch);
            ProtocolOutcome::Activated { predicted_value }
        }
        Activation::AlreadyActive => ProtocolOutcome::AlreadyActive,
    };
    eval.outcomes.set(kind, outcome);
}
