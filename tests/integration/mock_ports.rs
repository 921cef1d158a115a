//! Mock effect ports for integration tests.
//!
//! Records every notification, alarm and actuator call in one ordered log
//! so tests can assert on the full side-effect history without a terminal
//! bell, an SMS gateway or a pump controller.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use chrono::{NaiveDate, NaiveDateTime, TimeDelta};
use parking_lot::Mutex;

use glucoguard::app::dispatch::Dispatcher;
use glucoguard::app::events::AppEvent;
use glucoguard::app::ports::{
    ActuatorPort, AlarmHandle, AlarmPort, CaregiverAlert, EventSink, NotificationPort, Ports,
    SampleSource,
};
use glucoguard::app::service::MonitorService;
use glucoguard::config::{MonitorConfig, SharedThresholds};
use glucoguard::error::PortError;
use glucoguard::fsm::ProtocolKind;
use glucoguard::sensors::Sample;

// ── Port call record ──────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum PortCall {
    Notify { kind: ProtocolKind, predicted_value: f64 },
    Sound { kind: ProtocolKind, handle: u64, duration: Duration },
    CancelAlarm(u64),
    Motor(bool),
}

// ── MockPorts ─────────────────────────────────────────────────

#[derive(Default)]
pub struct MockPorts {
    pub calls: Mutex<Vec<PortCall>>,
    next_handle: AtomicU64,
    pub fail_notify: AtomicBool,
    pub fail_motor: AtomicBool,
    pub fail_alarm: AtomicBool,
}

#[allow(dead_code)]
impl MockPorts {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn ports(self: &Arc<Self>, with_actuator: bool) -> Ports {
        Ports {
            notifier: self.clone(),
            alarm: self.clone(),
            actuator: with_actuator.then(|| self.clone() as Arc<dyn ActuatorPort>),
        }
    }

    pub fn calls(&self) -> Vec<PortCall> {
        self.calls.lock().clone()
    }

    pub fn notifications(&self) -> Vec<ProtocolKind> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                PortCall::Notify { kind, .. } => Some(kind),
                _ => None,
            })
            .collect()
    }

    pub fn motor_commands(&self) -> Vec<bool> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                PortCall::Motor(on) => Some(on),
                _ => None,
            })
            .collect()
    }

    pub fn sounded(&self, kind: ProtocolKind) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, PortCall::Sound { kind: k, .. } if *k == kind))
            .count()
    }

    pub fn cancelled(&self) -> Vec<u64> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                PortCall::CancelAlarm(h) => Some(h),
                _ => None,
            })
            .collect()
    }
}

impl NotificationPort for MockPorts {
    fn notify(&self, alert: &CaregiverAlert) -> Result<(), PortError> {
        if self.fail_notify.load(Ordering::SeqCst) {
            return Err(PortError::Unavailable);
        }
        self.calls.lock().push(PortCall::Notify {
            kind: alert.kind,
            predicted_value: alert.predicted_value,
        });
        Ok(())
    }
}

impl AlarmPort for MockPorts {
    fn sound(&self, duration: Duration, kind: ProtocolKind) -> Result<AlarmHandle, PortError> {
        if self.fail_alarm.load(Ordering::SeqCst) {
            return Err(PortError::Failed("speaker"));
        }
        let handle = self.next_handle.fetch_add(1, Ordering::SeqCst);
        self.calls.lock().push(PortCall::Sound {
            kind,
            handle,
            duration,
        });
        Ok(AlarmHandle(handle))
    }

    fn cancel(&self, handle: AlarmHandle) {
        self.calls.lock().push(PortCall::CancelAlarm(handle.0));
    }
}

impl ActuatorPort for MockPorts {
    fn set_motor(&self, active: bool) -> Result<(), PortError> {
        if self.fail_motor.load(Ordering::SeqCst) {
            return Err(PortError::Failed("serial"));
        }
        self.calls.lock().push(PortCall::Motor(active));
        Ok(())
    }
}

// ── Event capture ─────────────────────────────────────────────

#[derive(Default)]
pub struct CaptureSink {
    pub events: Vec<AppEvent>,
}

#[allow(dead_code)]
impl CaptureSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self, pred: impl Fn(&AppEvent) -> bool) -> usize {
        self.events.iter().filter(|e| pred(e)).count()
    }
}

impl EventSink for CaptureSink {
    fn emit(&mut self, event: &AppEvent) {
        self.events.push(event.clone());
    }
}

// ── Sample helpers ────────────────────────────────────────────

pub fn t(minutes: i64) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 3, 1)
        .unwrap()
        .and_hms_opt(22, 0, 0)
        .unwrap()
        + TimeDelta::minutes(minutes)
}

/// Samples every five minutes starting at `t(0)`.
pub fn series(values: &[f64]) -> Vec<Sample> {
    values
        .iter()
        .enumerate()
        .map(|(i, &g)| Sample::new(t(i as i64 * 5), g))
        .collect()
}

pub struct VecSource(pub std::vec::IntoIter<Sample>);

impl SampleSource for VecSource {
    fn next_sample(&mut self) -> Option<Sample> {
        self.0.next()
    }
}

// ── Service fixture ───────────────────────────────────────────

pub struct Fixture {
    pub service: MonitorService,
    pub mock: Arc<MockPorts>,
    pub thresholds: SharedThresholds,
    pub sink: CaptureSink,
}

/// Service with inline effects, an actuator, and a started session.
pub fn fixture() -> Fixture {
    fixture_with(MonitorConfig::default(), true, false)
}

pub fn fixture_with(config: MonitorConfig, with_actuator: bool, threaded: bool) -> Fixture {
    let mock = MockPorts::new();
    let ports = mock.ports(with_actuator);
    let dispatcher = if threaded {
        Dispatcher::spawn_worker(ports).unwrap()
    } else {
        Dispatcher::inline(ports)
    };
    let thresholds = SharedThresholds::new(config.thresholds);
    let mut service =
        MonitorService::new(config, Arc::new(thresholds.clone()), dispatcher).unwrap();
    let mut sink = CaptureSink::new();
    service.start_session(&mut sink);
    Fixture {
        service,
        mock,
        thresholds,
        sink,
    }
}
