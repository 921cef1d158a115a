//! Side-effect dispatcher.
//!
//! Protocol transitions produce [`EffectBatch`]es; the dispatcher runs them
//! against the [`Ports`] either inline on the caller's thread or on a
//! dedicated worker thread so slow ports never hold up the next sample.
//!
//! ```text
//! ┌──────────────┐  Job::Run   ┌───────────────┐
//! │   Pipeline   │────────────▶│ Effect worker │──▶ ports
//! │  / ack calls │◀────────────│  (block_on)   │
//! └──────────────┘ PortFailure └───────────────┘
//! ```
//!
//! Port failures from either mode land on the same bounded channel and are
//! drained by the service once per cycle.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::{Channel, TrySendError};
use futures_lite::future;
use log::{debug, info, warn};

use super::ports::Ports;
use crate::alarm::CancelToken;
use crate::error::PortFailure;
use crate::fsm::EffectBatch;

/// Pending batches for the worker.
const JOB_DEPTH: usize = 16;

/// Failures waiting to be reported.
const FAILURE_DEPTH: usize = 32;

/// Upper bound on [`Dispatcher::flush`].
const FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

type FailureChannel = Channel<CriticalSectionRawMutex, PortFailure, FAILURE_DEPTH>;

enum Job {
    Run(EffectBatch),
    /// Cancelled by the worker once every earlier job has run.
    Flush(CancelToken),
    Shutdown,
}

type JobChannel = Channel<CriticalSectionRawMutex, Job, JOB_DEPTH>;

struct Worker {
    jobs: Arc<JobChannel>,
    thread: Option<JoinHandle<()>>,
}

pub struct Dispatcher {
    ports: Ports,
    failures: Arc<FailureChannel>,
    worker: Option<Worker>,
}

impl Dispatcher {
    /// Run every batch on the submitting thread.
    pub fn inline(ports: Ports) -> Self {
        Self {
            ports,
            failures: Arc::new(Channel::new()),
            worker: None,
        }
    }

    /// Run batches on a dedicated `effects` thread.
    pub fn spawn_worker(ports: Ports) -> std::io::Result<Self> {
        let failures: Arc<FailureChannel> = Arc::new(Channel::new());
        let jobs: Arc<JobChannel> = Arc::new(Channel::new());

        let thread = {
            let jobs = Arc::clone(&jobs);
            let failures = Arc::clone(&failures);
            let ports = ports.clone();
            std::thread::Builder::new()
                .name("effects".into())
                .spawn(move || future::block_on(worker_loop(&jobs, &failures, &ports)))?
        };
        info!("Effect worker started");

        Ok(Self {
            ports,
            failures,
            worker: Some(Worker {
                jobs,
                thread: Some(thread),
            }),
        })
    }

    pub fn ports(&self) -> &Ports {
        &self.ports
    }

    pub fn is_threaded(&self) -> bool {
        self.worker.is_some()
    }

    /// Hand a batch over for execution.  Never blocks on a full queue: the
    /// batch then runs inline instead of being dropped.
    pub fn submit(&self, batch: EffectBatch) {
        let batch = match &self.worker {
            None => batch,
            Some(worker) => match worker.jobs.try_send(Job::Run(batch)) {
                Ok(()) => return,
                Err(TrySendError::Full(Job::Run(batch))) => {
                    warn!("Effect queue full, running {} effects inline", batch.kind());
                    batch
                }
                Err(TrySendError::Full(_)) => return,
            },
        };
        run(batch, &self.ports, &self.failures);
    }

    /// Wait until every batch submitted so far has run.
    pub fn flush(&self) {
        let Some(worker) = &self.worker else { return };
        let done = CancelToken::new();
        future::block_on(worker.jobs.send(Job::Flush(done.clone())));
        if !done.wait_timeout(FLUSH_TIMEOUT) {
            warn!("Effect worker did not drain within {FLUSH_TIMEOUT:?}");
        }
    }

    /// Queue a failure from outside an effect batch.
    pub fn report(&self, failure: PortFailure) {
        push_failure(&self.failures, failure);
    }

    /// Drain port failures reported since the last call.
    pub fn take_failures(&self) -> Vec<PortFailure> {
        let mut out = Vec::new();
        while let Ok(failure) = self.failures.try_receive() {
            out.push(failure);
        }
        out
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        if let Some(mut worker) = self.worker.take() {
            future::block_on(worker.jobs.send(Job::Shutdown));
            if let Some(thread) = worker.thread.take() {
                let _ = thread.join();
            }
            debug!("Effect worker stopped");
        }
    }
}

async fn worker_loop(jobs: &JobChannel, failures: &FailureChannel, ports: &Ports) {
    loop {
        match jobs.receive().await {
            Job::Run(batch) => run(batch, ports, failures),
            Job::Flush(done) => done.cancel(),
            Job::Shutdown => break,
        }
    }
}

fn run(batch: EffectBatch, ports: &Ports, failures: &FailureChannel) {
    for failure in batch.execute(ports) {
        push_failure(failures, failure);
    }
}

fn push_failure(failures: &FailureChannel, failure: PortFailure) {
    if failures.try_send(failure).is_err() {
        warn!("Failure queue full, dropping report: {failure}");
    }
}
