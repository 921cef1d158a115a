//! Console and line-protocol effect adapters.
//!
//! | Adapter        | Implements        | Output                          |
//! |----------------|-------------------|---------------------------------|
//! | `LogNotifier`  | NotificationPort  | caregiver text on the log       |
//! | `BellAlarm`    | AlarmPort         | terminal bell, 500 ms cadence   |
//! | `LineActuator` | ActuatorPort      | `START_MOTOR` / `STOP_MOTOR`    |
//!
//! `LineActuator` speaks the pump controller's serial protocol over any
//! writer, so a serial device node, a file, or a test buffer all work.

use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use log::{info, warn};
use parking_lot::Mutex;

use crate::alarm::CancelToken;
use crate::app::ports::{ActuatorPort, AlarmHandle, AlarmPort, CaregiverAlert, NotificationPort};
use crate::error::PortError;
use crate::fsm::ProtocolKind;

// ───────────────────────────────────────────────────────────────
// Caregiver notification
// ───────────────────────────────────────────────────────────────

/// Writes caregiver alerts to the `caregiver` log target.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl NotificationPort for LogNotifier {
    fn notify(&self, alert: &CaregiverAlert) -> Result<(), PortError> {
        warn!(target: "caregiver", "{alert}");
        Ok(())
    }
}

// ───────────────────────────────────────────────────────────────
// Alarm
// ───────────────────────────────────────────────────────────────

const BELL_INTERVAL: Duration = Duration::from_millis(500);

type SharedWriter = Arc<Mutex<Box<dyn Write + Send>>>;

/// Rings `BEL` on a writer until the alarm is cancelled or its duration
/// runs out.
pub struct BellAlarm {
    out: SharedWriter,
    interval: Duration,
    next: AtomicU64,
    ringing: Arc<Mutex<HashMap<u64, CancelToken>>>,
}

impl BellAlarm {
    pub fn new(out: Box<dyn Write + Send>, interval: Duration) -> Self {
        Self {
            out: Arc::new(Mutex::new(out)),
            interval,
            next: AtomicU64::new(1),
            ringing: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn stderr() -> Self {
        Self::new(Box::new(std::io::stderr()), BELL_INTERVAL)
    }

    /// Alarms started and not yet cancelled.
    pub fn ringing(&self) -> usize {
        self.ringing.lock().len()
    }
}

impl AlarmPort for BellAlarm {
    fn sound(&self, duration: Duration, kind: ProtocolKind) -> Result<AlarmHandle, PortError> {
        let id = self.next.fetch_add(1, Ordering::Relaxed);
        let token = CancelToken::new();
        let (out, interval, waiter) = (Arc::clone(&self.out), self.interval, token.clone());

        std::thread::Builder::new()
            .name(format!("bell-{}", kind.tag()))
            .spawn(move || {
                let deadline = Instant::now().checked_add(duration);
                loop {
                    {
                        let mut out = out.lock();
                        if out.write_all(b"\x07").and_then(|()| out.flush()).is_err() {
                            break;
                        }
                    }
                    let left = deadline.map_or(interval, |d| {
                        d.saturating_duration_since(Instant::now())
                    });
                    if left.is_zero() || waiter.wait_timeout(interval.min(left)) {
                        break;
                    }
                }
            })
            .map_err(|_| PortError::Failed("cannot start alarm thread"))?;

        self.ringing.lock().insert(id, token);
        info!("ALARM | {kind} sounding for {}s", duration.as_secs());
        Ok(AlarmHandle(id))
    }

    fn cancel(&self, handle: AlarmHandle) {
        if let Some(token) = self.ringing.lock().remove(&handle.0) {
            token.cancel();
            info!("ALARM | #{} stopped", handle.0);
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Actuator
// ───────────────────────────────────────────────────────────────

/// Line-oriented motor controller: one command per line.
pub struct LineActuator<W> {
    out: Mutex<W>,
}

impl<W: Write + Send> LineActuator<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    pub fn into_inner(self) -> W {
        self.out.into_inner()
    }
}

impl<W: Write + Send> ActuatorPort for LineActuator<W> {
    fn set_motor(&self, active: bool) -> Result<(), PortError> {
        let line: &[u8] = if active {
            b"START_MOTOR\n"
        } else {
            b"STOP_MOTOR\n"
        };
        let mut out = self.out.lock();
        out.write_all(line)
            .and_then(|()| out.flush())
            .map_err(|_| PortError::Failed("motor write failed"))?;
        info!("MOTOR | {}", if active { "started" } else { "stopped" });
        Ok(())
    }
}
