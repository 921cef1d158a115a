//! Log-based event sink adapter.
//!
//! Implements [`EventSink`] by writing each application event as one
//! structured line through the `log` facade.  Cycle lines go out at
//! `info`, rejections and port failures at `warn`.

use log::{info, warn};

use crate::app::events::AppEvent;
use crate::app::orchestrator::ProtocolOutcome;
use crate::app::ports::EventSink;

/// Adapter that logs every [`AppEvent`].
#[derive(Debug, Default)]
pub struct LogEventSink;

impl LogEventSink {
    pub fn new() -> Self {
        Self
    }
}

fn outcome_tag(o: ProtocolOutcome) -> &'static str {
    match o {
        ProtocolOutcome::Activated { .. } => "NEW",
        ProtocolOutcome::AlreadyActive => "on",
        ProtocolOutcome::NotTriggered => "-",
    }
}

impl EventSink for LogEventSink {
    fn emit(&mut self, event: &AppEvent) {
        match event {
            AppEvent::Cycle(r) => {
                let forecast = r
                    .forecast
                    .first()
                    .map_or_else(|| "n/a".to_string(), |v| format!("{v:.1}"));
                info!(
                    "CYCLE | t={} | glucose={:.1} filtered={:.1} next={} | {} | \
                     severe={} mild={} hyper={}",
                    r.sample.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    r.sample.glucose,
                    r.filtered,
                    forecast,
                    r.state,
                    outcome_tag(r.outcomes.severe),
                    outcome_tag(r.outcomes.mild),
                    outcome_tag(r.outcomes.hyper),
                );
                if let Some(m) = r.metrics {
                    info!(
                        "HOURLY | mean={:.1}mg/dL gmi={:.2}% n={}",
                        m.mean_glucose, m.gmi_percent, m.samples
                    );
                }
            }
            AppEvent::ProtocolActivated {
                kind,
                predicted_value,
                at,
            } => {
                warn!("PROTOCOL | {kind} activated, predicted {predicted_value:.1} mg/dL at {at}");
            }
            AppEvent::ProtocolDeactivated { kind, reason } => {
                info!("PROTOCOL | {kind} deactivated ({reason:?})");
            }
            AppEvent::PortFailed(failure) => {
                warn!("PORT | {failure}");
            }
            AppEvent::SampleRejected(e) => {
                warn!("REJECT | {e}");
            }
            AppEvent::ThresholdsInverted => {
                warn!("CONFIG | thresholds not ordered severe <= mild < hyper");
            }
            AppEvent::SessionStarted => {
                info!("SESSION | started");
            }
            AppEvent::SessionStopped { accepted, rejected } => {
                info!("SESSION | stopped, accepted={accepted} rejected={rejected}");
            }
            AppEvent::DoseStarted { dose_ml, run } => {
                warn!("DOSE | {dose_ml} mL glucagon, pump running for {}s", run.as_secs());
            }
            AppEvent::DoseRefused(e) => {
                warn!("DOSE | refused: {e}");
            }
        }
    }
}
