//! Manual glucagon delivery.
//!
//! A caregiver can run the pump outside any protocol.  The motor is started
//! on the caller's thread and switched off again by an [`AlarmTimer`] after
//! the configured run time.
//!
//! ```text
//!  deliver() ──▶ set_motor(true) ──▶ AlarmTimer::start(run)
//!                                          │
//!                     ┌────────────────────┴───────────────┐
//!               [timeout]                              [abort()]
//!                     ▼                                    ▼
//!        set_motor(false) unless severe           set_motor(false)
//!        holds the pump; clear in-flight          clear in-flight
//! ```
//!
//! Only one delivery runs at a time, and none starts while the severe
//! protocol is active.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use log::{debug, info, warn};
use parking_lot::Mutex;

use super::dispatch::Dispatcher;
use crate::alarm::AlarmTimer;
use crate::error::{DoseError, PortError, PortFailure, PortKind};
use crate::fsm::{Protocol, ProtocolKind};

pub struct DoseDelivery {
    dose_ml: f64,
    run: Duration,
    severe: Protocol,
    dispatcher: Arc<Dispatcher>,
    in_flight: Arc<AtomicBool>,
    /// Held for the whole of `deliver` and `abort`.
    timer: Mutex<Option<AlarmTimer>>,
}

impl DoseDelivery {
    pub fn new(
        dose_ml: f64,
        run: Duration,
        severe: Protocol,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        Self {
            dose_ml,
            run,
            severe,
            dispatcher,
            in_flight: Arc::new(AtomicBool::new(false)),
            timer: Mutex::new(None),
        }
    }

    pub fn run_time(&self) -> Duration {
        self.run
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Start the pump and arm its auto-stop.  Returns the dose in mL.
    pub fn deliver(&self) -> Result<f64, DoseError> {
        let mut slot = self.timer.lock();

        if self.severe.is_active() {
            return Err(DoseError::ProtocolActive);
        }
        let Some(actuator) = self.dispatcher.ports().actuator.clone() else {
            return Err(DoseError::NoActuator);
        };
        if self.in_flight.swap(true, Ordering::AcqRel) {
            return Err(DoseError::InFlight);
        }

        if let Err(error) = actuator.set_motor(true) {
            self.in_flight.store(false, Ordering::Release);
            return Err(DoseError::Actuator(actuator_failure(error)));
        }
        info!("DOSE | delivering {} mL over {:?}", self.dose_ml, self.run);

        let timer = {
            let actuator = Arc::clone(&actuator);
            let severe = self.severe.clone();
            let dispatcher = Arc::clone(&self.dispatcher);
            let in_flight = Arc::clone(&self.in_flight);
            let dose_ml = self.dose_ml;
            AlarmTimer::start("dose", self.run, move || {
                if severe.snapshot().actuator_engaged {
                    debug!("DOSE | severe protocol holds the pump, leaving motor on");
                } else if let Err(error) = actuator.set_motor(false) {
                    dispatcher.report(actuator_failure(error));
                }
                in_flight.store(false, Ordering::Release);
                info!("DOSE | delivered {dose_ml} mL");
            })
        };
        match timer {
            Ok(timer) => {
                *slot = Some(timer);
                Ok(self.dose_ml)
            }
            Err(e) => {
                warn!("DOSE | cannot start delivery timer: {e}");
                if let Err(error) = actuator.set_motor(false) {
                    self.dispatcher.report(actuator_failure(error));
                }
                self.in_flight.store(false, Ordering::Release);
                Err(DoseError::Timer)
            }
        }
    }

    /// Stop a running delivery early.  Returns `false` if none was running.
    pub fn abort(&self) -> bool {
        let mut slot = self.timer.lock();
        let Some(timer) = slot.take() else {
            return false;
        };
        timer.cancel();
        timer.join();
        if !self.in_flight.swap(false, Ordering::AcqRel) {
            return false;
        }
        if let Some(actuator) = &self.dispatcher.ports().actuator {
            if let Err(error) = actuator.set_motor(false) {
                self.dispatcher.report(actuator_failure(error));
            }
        }
        info!("DOSE | delivery aborted");
        true
    }
}

fn actuator_failure(error: PortError) -> PortFailure {
    PortFailure {
        port: PortKind::Actuator,
        protocol: ProtocolKind::Severe,
        error,
    }
}
