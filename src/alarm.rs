//! Cancellable alarm timer.
//!
//! Each protocol activation sounds its alarm through the
//! [`AlarmPort`](crate::app::ports::AlarmPort) and starts an [`AlarmTimer`]
//! bounded by the protocol's alarm duration.  The timer thread sleeps on a
//! [`CancelToken`]; acknowledgment cancels the token and the thread exits
//! immediately without running its expiry action.
//!
//! ```text
//!  activate ──▶ sound() ──▶ AlarmTimer::start(duration)
//!                                │
//!              ┌─────────────────┴────────────────┐
//!        [timeout]                           [cancel()]
//!              ▼                                  ▼
//!      on_expire(): stop tone              thread exits, caller
//!                                          stops the tone itself
//! ```

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use log::debug;
use parking_lot::{Condvar, Mutex};

/// One-shot cancellation flag that sleeping threads can wait on.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel and wake every waiter.  Idempotent.
    pub fn cancel(&self) {
        let (flag, cvar) = &*self.inner;
        *flag.lock() = true;
        cvar.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        *self.inner.0.lock()
    }

    /// Block for at most `timeout`.  Returns `true` if cancelled.
    ///
    /// A timeout past the end of the clock waits for cancellation only.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (flag, cvar) = &*self.inner;
        let deadline = Instant::now().checked_add(timeout);
        let mut cancelled = flag.lock();
        while !*cancelled {
            match deadline {
                Some(deadline) => {
                    if cvar.wait_until(&mut cancelled, deadline).timed_out() {
                        break;
                    }
                }
                None => cvar.wait(&mut cancelled),
            }
        }
        *cancelled
    }
}

/// Background timer that runs `on_expire` unless cancelled first.
#[derive(Debug)]
pub struct AlarmTimer {
    token: CancelToken,
    thread: Option<JoinHandle<()>>,
}

impl AlarmTimer {
    /// Spawn the timer thread.
    pub fn start(
        name: &str,
        duration: Duration,
        on_expire: impl FnOnce() + Send + 'static,
    ) -> std::io::Result<Self> {
        let token = CancelToken::new();
        let waiter = token.clone();
        let label = name.to_string();
        let thread = std::thread::Builder::new()
            .name(format!("alarm-{name}"))
            .spawn(move || {
                if waiter.wait_timeout(duration) {
                    debug!("{label}: alarm timer cancelled");
                } else {
                    debug!("{label}: alarm timer expired after {duration:?}");
                    on_expire();
                }
            })?;
        Ok(Self {
            token,
            thread: Some(thread),
        })
    }

    /// Stop the timer without running the expiry action.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Wait for the timer thread to exit.
    pub fn join(mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}
