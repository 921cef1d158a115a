//! Emergency protocol state machines.
//!
//! Three independent two-state machines, one per [`ProtocolKind`]:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  ProtocolTable                                               │
//! │  ┌────────┬──────────────┬───────────────┬────────────────┐  │
//! │  │ Kind   │ on_activate  │ on_deactivate │ drives_motor   │  │
//! │  ├────────┼──────────────┼───────────────┼────────────────┤  │
//! │  │ Severe │ fn(in, plan) │ fn(plan)      │ yes            │  │
//! │  │ Mild   │ fn(in, plan) │ fn(plan)      │ no             │  │
//! │  │ Hyper  │ fn(in, plan) │ fn(plan)      │ no             │  │
//! │  └────────┴──────────────┴───────────────┴────────────────┘  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Each [`Protocol`] guards its [`ProtocolState`] with its own lock.  A
//! transition updates the state under the lock, asks the descriptor for an
//! [`EffectPlan`], and returns an [`EffectBatch`].  The batch performs port
//! I/O only after the lock is gone; completions re-lock and check the
//! episode counter so an acknowledgment that raced ahead wins.

pub mod context;
pub mod states;

use core::fmt;
use core::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::alarm::AlarmTimer;
use crate::app::ports::{AlarmHandle, AlarmPort, CaregiverAlert, Ports};
use crate::error::{PortError, PortFailure, PortKind};
use crate::sensors::Timestamp;
use context::{ProtocolSnapshot, ProtocolState};
use states::{ActivationInput, ProtocolDescriptor, build_protocol_table};

// ---------------------------------------------------------------------------
// Protocol identity
// ---------------------------------------------------------------------------

/// Emergency protocol kinds, in evaluation priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum ProtocolKind {
    Severe = 0,
    Mild = 1,
    Hyper = 2,
}

impl ProtocolKind {
    pub const COUNT: usize = 3;

    pub const ALL: [Self; Self::COUNT] = [Self::Severe, Self::Mild, Self::Hyper];

    pub fn from_index(idx: usize) -> Option<Self> {
        Self::ALL.get(idx).copied()
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Severe => "severe hypoglycemia",
            Self::Mild => "mild hypoglycemia",
            Self::Hyper => "hyperglycemia",
        }
    }

    /// Short lowercase tag used on the command line and in thread names.
    pub fn tag(self) -> &'static str {
        match self {
            Self::Severe => "severe",
            Self::Mild => "mild",
            Self::Hyper => "hyper",
        }
    }
}

impl fmt::Display for ProtocolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ProtocolKind {
    type Err = UnknownProtocol;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|k| k.tag().eq_ignore_ascii_case(s.trim()))
            .ok_or(UnknownProtocol)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnknownProtocol;

impl fmt::Display for UnknownProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("unknown protocol (expected severe, mild or hyper)")
    }
}

impl std::error::Error for UnknownProtocol {}

// ---------------------------------------------------------------------------
// Effects
// ---------------------------------------------------------------------------

/// A side effect planned by a transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    SoundAlarm(Duration),
    StopAlarm(AlarmHandle),
    Notify(CaregiverAlert),
    Motor(bool),
}

/// Effects of one transition.  Four slots cover the largest plan.
pub type EffectPlan = heapless::Vec<Effect, 4>;

/// Port failures collected while executing one batch.
pub type FailureList = heapless::Vec<PortFailure, 4>;

/// Planned effects bound to the protocol and episode that produced them.
pub struct EffectBatch {
    protocol: Protocol,
    episode: u64,
    plan: EffectPlan,
}

impl EffectBatch {
    pub fn kind(&self) -> ProtocolKind {
        self.protocol.kind()
    }

    pub fn effects(&self) -> &[Effect] {
        &self.plan
    }

    /// Perform every planned effect through `ports`.
    ///
    /// A failing port never aborts the rest of the plan.  Must not be called
    /// while holding any protocol lock.
    pub fn execute(self, ports: &Ports) -> FailureList {
        let Self {
            protocol,
            episode,
            plan,
        } = self;
        let kind = protocol.kind();
        let mut failures = FailureList::new();

        for effect in plan {
            let result = match effect {
                Effect::SoundAlarm(duration) => protocol
                    .start_alarm(episode, duration, ports)
                    .map_err(|e| (PortKind::Alarm, e)),
                Effect::StopAlarm(handle) => {
                    ports.alarm.cancel(handle);
                    Ok(())
                }
                Effect::Notify(alert) => protocol
                    .send_notification(episode, &alert, ports)
                    .map_err(|e| (PortKind::Notification, e)),
                Effect::Motor(on) => protocol
                    .drive_actuator(episode, on, ports)
                    .map_err(|e| (PortKind::Actuator, e)),
            };
            if let Err((port, error)) = result {
                let failure = PortFailure {
                    port,
                    protocol: kind,
                    error,
                };
                warn!("{}: {failure}", protocol.name());
                let _ = failures.push(failure);
            }
        }
        failures
    }
}

/// Outcome of [`Protocol::activate`].
pub enum Activation {
    /// `Idle -> Active`; the batch still has to be executed.
    Activated(EffectBatch),
    /// Already active; nothing changed.
    AlreadyActive,
}

// ---------------------------------------------------------------------------
// Protocol
// ---------------------------------------------------------------------------

struct ProtocolInner {
    descriptor: ProtocolDescriptor,
    state: Mutex<ProtocolState>,
}

/// One emergency protocol.  Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Protocol {
    inner: Arc<ProtocolInner>,
}

impl Protocol {
    pub fn new(descriptor: ProtocolDescriptor) -> Self {
        Self {
            inner: Arc::new(ProtocolInner {
                descriptor,
                state: Mutex::new(ProtocolState::default()),
            }),
        }
    }

    pub fn kind(&self) -> ProtocolKind {
        self.inner.descriptor.kind
    }

    pub fn name(&self) -> &'static str {
        self.inner.descriptor.name
    }

    pub fn is_active(&self) -> bool {
        self.inner.state.lock().active
    }

    pub fn snapshot(&self) -> ProtocolSnapshot {
        self.inner.state.lock().snapshot(self.kind())
    }

    /// `Idle -> Active`.  No-op when already active.
    pub fn activate(
        &self,
        predicted_value: f64,
        at: Timestamp,
        alarm: Duration,
        patient_id: &str,
    ) -> Activation {
        let descriptor = &self.inner.descriptor;
        let (episode, notify) = {
            let mut state = self.inner.state.lock();
            if state.active {
                debug!("{}: already active", descriptor.name);
                return Activation::AlreadyActive;
            }
            state.active = true;
            state.predicted_value = Some(predicted_value);
            state.activated_at = Some(at);
            state.episode = state.episode.wrapping_add(1);
            (state.episode, !state.notification_sent)
        };

        let input = ActivationInput {
            kind: descriptor.kind,
            predicted_value,
            at,
            alarm,
            patient_id,
            notify,
        };
        let mut plan = EffectPlan::new();
        (descriptor.on_activate)(&input, &mut plan);

        info!(
            "{}: Idle -> Active (predicted {predicted_value:.1} mg/dL at {at})",
            descriptor.name
        );
        Activation::Activated(EffectBatch {
            protocol: self.clone(),
            episode,
            plan,
        })
    }

    /// `Active -> Idle`.  Returns `None` when already idle.
    ///
    /// The alarm timer is cancelled before this returns; the alarm port and
    /// actuator are driven by the returned batch.
    pub fn deactivate(&self) -> Option<EffectBatch> {
        let descriptor = &self.inner.descriptor;
        let (episode, alarm, timer) = {
            let mut state = self.inner.state.lock();
            if !state.active {
                return None;
            }
            state.active = false;
            state.predicted_value = None;
            state.notification_sent = false;
            (state.episode, state.alarm.take(), state.timer.take())
        };
        if let Some(timer) = timer {
            timer.cancel();
        }

        let mut plan = EffectPlan::new();
        if let Some(handle) = alarm {
            let _ = plan.push(Effect::StopAlarm(handle));
        }
        (descriptor.on_deactivate)(&mut plan);

        info!("{}: Active -> Idle (acknowledged)", descriptor.name);
        Some(EffectBatch {
            protocol: self.clone(),
            episode,
            plan,
        })
    }

    /// Manual actuator stop, independent of the protocol state.  `None` for
    /// protocols that do not own the actuator.
    pub fn stop_actuator(&self) -> Option<EffectBatch> {
        if !self.inner.descriptor.drives_actuator {
            return None;
        }
        let episode = self.inner.state.lock().episode;
        let mut plan = EffectPlan::new();
        let _ = plan.push(Effect::Motor(false));
        info!("{}: manual actuator stop", self.name());
        Some(EffectBatch {
            protocol: self.clone(),
            episode,
            plan,
        })
    }

    /// Consume the one-shot session debounce.  Returns `true` exactly once
    /// per session.
    pub fn take_initial_check(&self) -> bool {
        let mut state = self.inner.state.lock();
        let first = !state.initial_check_done;
        state.initial_check_done = true;
        first
    }

    /// Back to initial values for a new session.  Call after
    /// [`deactivate`](Self::deactivate) so the alarm and actuator are
    /// released through the ports first.
    pub fn reset_session(&self) {
        self.inner.state.lock().reset_for_session();
    }

    // ── Effect execution (lock released) ─────────────────────

    fn is_current(&self, episode: u64) -> bool {
        let state = self.inner.state.lock();
        state.active && state.episode == episode
    }

    fn start_alarm(
        &self,
        episode: u64,
        duration: Duration,
        ports: &Ports,
    ) -> Result<(), PortError> {
        if !self.is_current(episode) {
            debug!("{}: episode {episode} ended before alarm", self.name());
            return Ok(());
        }
        let handle = ports.alarm.sound(duration, self.kind())?;

        {
            let mut state = self.inner.state.lock();
            if !(state.active && state.episode == episode) {
                drop(state);
                ports.alarm.cancel(handle);
                return Ok(());
            }
            state.alarm = Some(handle);
        }

        let expiry = {
            let protocol = self.clone();
            let alarm = Arc::clone(&ports.alarm);
            move || protocol.expire_alarm(episode, alarm.as_ref())
        };
        let timer = match AlarmTimer::start(self.kind().tag(), duration, expiry) {
            Ok(timer) => timer,
            Err(e) => {
                warn!("{}: cannot start alarm timer: {e}", self.name());
                return Err(PortError::Failed("alarm timer unavailable"));
            }
        };

        let mut state = self.inner.state.lock();
        if state.active && state.episode == episode {
            state.timer = Some(timer);
        } else {
            drop(state);
            timer.cancel();
        }
        Ok(())
    }

    fn expire_alarm(&self, episode: u64, alarm: &dyn AlarmPort) {
        let handle = {
            let mut state = self.inner.state.lock();
            if state.episode != episode {
                return;
            }
            state.timer = None;
            state.alarm.take()
        };
        if let Some(handle) = handle {
            alarm.cancel(handle);
            info!(
                "{}: alarm period elapsed, protocol stays active until acknowledged",
                self.name()
            );
        }
    }

    fn send_notification(
        &self,
        episode: u64,
        alert: &CaregiverAlert,
        ports: &Ports,
    ) -> Result<(), PortError> {
        if !self.is_current(episode) {
            debug!("{}: episode {episode} ended before alert", self.name());
            return Ok(());
        }
        ports.notifier.notify(alert)?;
        let mut state = self.inner.state.lock();
        if state.active && state.episode == episode {
            state.notification_sent = true;
        }
        Ok(())
    }

    fn drive_actuator(&self, episode: u64, on: bool, ports: &Ports) -> Result<(), PortError> {
        if on && !self.is_current(episode) {
            debug!("{}: episode {episode} ended before motor start", self.name());
            return Ok(());
        }
        let Some(actuator) = &ports.actuator else {
            info!("{}: no actuator attached, skipping motor {}", self.name(), on_off(on));
            return Ok(());
        };
        actuator.set_motor(on)?;
        self.inner.state.lock().actuator_engaged = on;
        Ok(())
    }
}

fn on_off(on: bool) -> &'static str {
    if on { "start" } else { "stop" }
}

// ---------------------------------------------------------------------------
// Protocol set
// ---------------------------------------------------------------------------

/// All three protocols, indexed by [`ProtocolKind`].
#[derive(Clone)]
pub struct ProtocolSet {
    protocols: [Protocol; ProtocolKind::COUNT],
}

impl ProtocolSet {
    pub fn new() -> Self {
        let table = build_protocol_table();
        debug_assert!(
            table
                .iter()
                .enumerate()
                .all(|(i, d)| d.kind as usize == i)
        );
        Self {
            protocols: table.map(Protocol::new),
        }
    }

    pub fn get(&self, kind: ProtocolKind) -> &Protocol {
        &self.protocols[kind as usize]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Protocol> {
        self.protocols.iter()
    }

    pub fn snapshots(&self) -> [ProtocolSnapshot; ProtocolKind::COUNT] {
        self.protocols.each_ref().map(Protocol::snapshot)
    }

    /// Highest-priority active protocol, if any.
    pub fn first_active(&self) -> Option<ProtocolKind> {
        self.iter().find(|p| p.is_active()).map(Protocol::kind)
    }
}

impl Default for ProtocolSet {
    fn default() -> Self {
        Self::new()
    }
}
