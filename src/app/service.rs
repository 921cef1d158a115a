//! Application service: the hexagonal core.
//!
//! [`MonitorService`] owns the sample pipeline (gate, estimator,
//! classifier, orchestrator) and shares the protocol set with the effect
//! dispatcher, the alarm timers, and any [`Acknowledger`] handed out to
//! other threads.
//!
//! ```text
//!  SampleSource ──▶ ┌───────────────────────────────┐ ──▶ EventSink
//!                   │         MonitorService        │
//!  Acknowledger ──▶ │ gate · estimator · classifier │ ──▶ Dispatcher ──▶ ports
//!                   │   orchestrator · protocols    │         ▲
//!                   │         DoseDelivery ─────────┼─────────┘
//!                   └───────────────────────────────┘
//! ```

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};

use crate::alarm::CancelToken;
use crate::classify::classify;
use crate::config::MonitorConfig;
use crate::error::{ConfigError, DoseError, InputError, PortFailure};
use crate::estimator::GlucoseEstimator;
use crate::fsm::context::ProtocolSnapshot;
use crate::fsm::{ProtocolKind, ProtocolSet};
use crate::sensors::Sample;
use crate::sensors::glucose::SampleGate;

use super::commands::AppCommand;
use super::dispatch::Dispatcher;
use super::dose::DoseDelivery;
use super::events::{AppEvent, CycleReport, DeactivationReason};
use super::orchestrator::{self, CycleInput};
use super::ports::{EventSink, SampleSource, ThresholdProvider};

// ───────────────────────────────────────────────────────────────
// Acknowledger
// ───────────────────────────────────────────────────────────────

/// Thread-safe handle for the alert and pump buttons.  Nothing here waits
/// for the pipeline.
#[derive(Clone)]
pub struct Acknowledger {
    protocols: ProtocolSet,
    dispatcher: Arc<Dispatcher>,
    dose: Arc<DoseDelivery>,
}

impl Acknowledger {
    /// `Active -> Idle` for `kind`.  Returns `false` if it was idle.
    pub fn acknowledge(&self, kind: ProtocolKind) -> bool {
        match self.protocols.get(kind).deactivate() {
            Some(batch) => {
                self.dispatcher.submit(batch);
                true
            }
            None => {
                debug!("{kind} not active, nothing to acknowledge");
                false
            }
        }
    }

    /// Acknowledge the highest-priority active protocol.
    pub fn dismiss(&self) -> Option<ProtocolKind> {
        let kind = self.protocols.first_active()?;
        self.acknowledge(kind).then_some(kind)
    }

    /// Stop the drug-delivery motor; the severe episode stays active.
    /// A running manual delivery is cut short as well.
    pub fn stop_actuator(&self) {
        let severe = self.protocols.get(ProtocolKind::Severe);
        if self.dose.abort() && !severe.snapshot().actuator_engaged {
            return;
        }
        if let Some(batch) = severe.stop_actuator() {
            self.dispatcher.submit(batch);
        }
    }

    /// Run the pump for one configured glucagon dose.  Refused while the
    /// severe protocol is active or another delivery is running.
    pub fn deliver_dose(&self) -> Result<f64, DoseError> {
        self.dose.deliver()
    }

    pub fn dose_in_flight(&self) -> bool {
        self.dose.is_in_flight()
    }

    pub fn snapshots(&self) -> [ProtocolSnapshot; ProtocolKind::COUNT] {
        self.protocols.snapshots()
    }
}

// ───────────────────────────────────────────────────────────────
// MonitorService
// ───────────────────────────────────────────────────────────────

/// Counters for one [`MonitorService::run`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub cycles: u64,
    pub rejected: u64,
}

pub struct MonitorService {
    config: MonitorConfig,
    thresholds: Arc<dyn ThresholdProvider>,
    protocols: ProtocolSet,
    dispatcher: Arc<Dispatcher>,
    dose: Arc<DoseDelivery>,
    gate: SampleGate,
    estimator: GlucoseEstimator,
    session_active: bool,
}

impl MonitorService {
    /// Construct the service.  No session is running until
    /// [`start_session`](Self::start_session).
    pub fn new(
        config: MonitorConfig,
        thresholds: Arc<dyn ThresholdProvider>,
        dispatcher: Dispatcher,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        info!(
            "MonitorService: interval={}min horizon={} steps, effects {}",
            config.sample_interval_minutes,
            config.predict_steps,
            if dispatcher.is_threaded() { "threaded" } else { "inline" },
        );
        let protocols = ProtocolSet::new();
        let dispatcher = Arc::new(dispatcher);
        let dose = Arc::new(DoseDelivery::new(
            config.glucagon_dose_ml,
            config.dose_run(),
            protocols.get(ProtocolKind::Severe).clone(),
            Arc::clone(&dispatcher),
        ));
        Ok(Self {
            estimator: GlucoseEstimator::new(&config),
            config,
            thresholds,
            protocols,
            dispatcher,
            dose,
            gate: SampleGate::new(),
            session_active: false,
        })
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn is_session_active(&self) -> bool {
        self.session_active
    }

    pub fn acknowledger(&self) -> Acknowledger {
        Acknowledger {
            protocols: self.protocols.clone(),
            dispatcher: Arc::clone(&self.dispatcher),
            dose: Arc::clone(&self.dose),
        }
    }

    pub fn snapshots(&self) -> [ProtocolSnapshot; ProtocolKind::COUNT] {
        self.protocols.snapshots()
    }

    pub fn estimator(&self) -> &GlucoseEstimator {
        &self.estimator
    }

    /// Block until every side effect submitted so far has run.
    pub fn flush_effects(&self) {
        self.dispatcher.flush();
    }

    // ── Session lifecycle ─────────────────────────────────────

    /// Reset estimator, gate and protocols and start accepting samples.
    /// A running session is stopped first.
    pub fn start_session(&mut self, sink: &mut impl EventSink) {
        if self.session_active {
            self.stop_session(sink);
        } else {
            self.reset();
        }
        self.session_active = true;

        if !self.thresholds.thresholds().is_ordered() {
            warn!("Thresholds are not ordered severe <= mild < hyper");
            sink.emit(&AppEvent::ThresholdsInverted);
        }
        info!("Session started");
        sink.emit(&AppEvent::SessionStarted);
    }

    /// Deactivate every protocol (running its normal side effects), cut
    /// short any manual delivery, wait for those effects, then reset all
    /// session state.
    pub fn stop_session(&mut self, sink: &mut impl EventSink) {
        self.dose.abort();
        for protocol in self.protocols.iter() {
            if let Some(batch) = protocol.deactivate() {
                self.dispatcher.submit(batch);
                sink.emit(&AppEvent::ProtocolDeactivated {
                    kind: protocol.kind(),
                    reason: DeactivationReason::SessionStopped,
                });
            }
        }
        self.dispatcher.flush();
        self.report_failures(sink);

        let (accepted, rejected) = (self.gate.accepted(), self.gate.rejected());
        self.reset();
        self.session_active = false;
        info!("Session stopped ({accepted} accepted, {rejected} rejected)");
        sink.emit(&AppEvent::SessionStopped { accepted, rejected });
    }

    fn reset(&mut self) {
        self.estimator.reset();
        self.gate.reset();
        for protocol in self.protocols.iter() {
            protocol.reset_session();
        }
    }

    // ── Per-sample pipeline ───────────────────────────────────

    /// Run one full cycle: gate → estimator → classifier → orchestrator.
    ///
    /// A rejected sample leaves every piece of state untouched.
    pub fn process_sample(
        &mut self,
        sample: Sample,
        sink: &mut impl EventSink,
    ) -> Result<CycleReport, InputError> {
        if !self.session_active {
            return Err(self.reject(InputError::NoActiveSession, sink));
        }
        if let Err(e) = self.gate.admit(&sample) {
            return Err(self.reject(e, sink));
        }

        let estimate = self.estimator.update(&sample);
        let thresholds = self.thresholds.thresholds();
        let state = classify(sample.glucose, &thresholds, self.config.valid_range);

        let eval = orchestrator::evaluate(
            &self.protocols,
            &estimate.forecast.predicted_values,
            &CycleInput {
                at: sample.timestamp,
                current_glucose: Some(sample.glucose),
                thresholds: &thresholds,
                config: &self.config,
            },
        );
        if let Some(batch) = eval.superseded {
            self.dispatcher.submit(batch);
            sink.emit(&AppEvent::ProtocolDeactivated {
                kind: ProtocolKind::Mild,
                reason: DeactivationReason::Escalated,
            });
        }
        for batch in eval.batches {
            self.dispatcher.submit(batch);
        }
        for (kind, predicted_value) in eval.outcomes.activated() {
            sink.emit(&AppEvent::ProtocolActivated {
                kind,
                predicted_value,
                at: sample.timestamp,
            });
        }
        let failures = self.report_failures(sink);

        let report = CycleReport {
            sample,
            filtered: estimate.filtered,
            forecast: estimate.forecast,
            state,
            outcomes: eval.outcomes,
            failures,
            metrics: self.gate.hourly_metrics(),
            protocol_active: self.protocols.first_active().is_some(),
        };
        sink.emit(&AppEvent::Cycle(Box::new(report.clone())));
        Ok(report)
    }

    fn reject(&self, error: InputError, sink: &mut impl EventSink) -> InputError {
        warn!("Sample rejected: {error}");
        sink.emit(&AppEvent::SampleRejected(error));
        error
    }

    fn report_failures(&self, sink: &mut impl EventSink) -> Vec<PortFailure> {
        let failures = self.dispatcher.take_failures();
        for failure in &failures {
            sink.emit(&AppEvent::PortFailed(*failure));
        }
        failures
    }

    /// Pull samples until the source ends or `stop` is cancelled, waiting
    /// `pace` between samples.
    pub fn run(
        &mut self,
        source: &mut impl SampleSource,
        sink: &mut impl EventSink,
        stop: &CancelToken,
        pace: Duration,
    ) -> RunSummary {
        let mut summary = RunSummary::default();
        while !stop.is_cancelled() {
            let Some(sample) = source.next_sample() else {
                info!("Sample source exhausted");
                break;
            };
            match self.process_sample(sample, sink) {
                Ok(_) => summary.cycles += 1,
                Err(_) => summary.rejected += 1,
            }
            if !pace.is_zero() && stop.wait_timeout(pace) {
                break;
            }
        }
        if stop.is_cancelled() {
            info!("Pipeline halted on request");
        }
        summary
    }

    // ── Command handling ──────────────────────────────────────

    /// `Active -> Idle` for `kind` from the pipeline thread.
    pub fn acknowledge(&self, kind: ProtocolKind, sink: &mut impl EventSink) -> bool {
        let done = self.acknowledger().acknowledge(kind);
        if done {
            sink.emit(&AppEvent::ProtocolDeactivated {
                kind,
                reason: DeactivationReason::Acknowledged,
            });
        }
        done
    }

    pub fn handle_command(&mut self, cmd: AppCommand, sink: &mut impl EventSink) {
        match cmd {
            AppCommand::StartSession => self.start_session(sink),
            AppCommand::StopSession => self.stop_session(sink),
            AppCommand::Acknowledge(kind) => {
                let _ = self.acknowledge(kind, sink);
            }
            AppCommand::DismissAlert => {
                if let Some(kind) = self.acknowledger().dismiss() {
                    sink.emit(&AppEvent::ProtocolDeactivated {
                        kind,
                        reason: DeactivationReason::Acknowledged,
                    });
                } else {
                    debug!("No active alert to dismiss");
                }
            }
            AppCommand::StopActuator => self.acknowledger().stop_actuator(),
            AppCommand::DeliverDose => self.deliver_dose(sink),
        }
    }

    fn deliver_dose(&self, sink: &mut impl EventSink) {
        match self.dose.deliver() {
            Ok(dose_ml) => sink.emit(&AppEvent::DoseStarted {
                dose_ml,
                run: self.dose.run_time(),
            }),
            Err(error) => {
                warn!("Manual dose refused: {error}");
                if let DoseError::Actuator(failure) = error {
                    sink.emit(&AppEvent::PortFailed(failure));
                }
                sink.emit(&AppEvent::DoseRefused(error));
            }
        }
    }
}
