//! GlucoGuard replay runner.
//!
//! Replays a recorded CSV night through the monitoring core with console
//! adapters wired to every port.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                      Adapters (outer ring)                     │
//! │                                                                │
//! │  ReplaySource   LogNotifier   BellAlarm   LineActuator         │
//! │  (SampleSource) (Notify)      (Alarm)     (Actuator, optional) │
//! │  JsonConfigFile LogEventSink  JsonLinesRecorder                │
//! │                                                                │
//! │  ──────────────── Port Trait Boundary ───────────────────      │
//! │                                                                │
//! │  ┌────────────────────────────────────────────────────────┐    │
//! │  │         MonitorService  (thread "pipeline")            │    │
//! │  │  gate · Kalman estimator · classifier · orchestrator   │    │
//! │  └────────────────────────────────────────────────────────┘    │
//! │                                                                │
//! │  Dispatcher (thread "effects") · console (thread "console")    │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Console commands on stdin: `ack <severe|mild|hyper>`, `dismiss`,
//! `motor-off`, `deliver`, `stop`, `status`,
//! `thresholds <severe>,<mild>,<hyper>`.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufWriter};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use chrono::NaiveDate;
use clap::Parser;
use log::{info, warn};

use glucoguard::adapters::config_file::JsonConfigFile;
use glucoguard::adapters::console::{BellAlarm, LineActuator, LogNotifier};
use glucoguard::adapters::log_sink::LogEventSink;
use glucoguard::adapters::record_log::JsonLinesRecorder;
use glucoguard::adapters::replay::ReplaySource;
use glucoguard::alarm::CancelToken;
use glucoguard::app::commands::AppCommand;
use glucoguard::app::dispatch::Dispatcher;
use glucoguard::app::events::AppEvent;
use glucoguard::app::ports::{ActuatorPort, ConfigPort, EventSink, Ports};
use glucoguard::app::service::{Acknowledger, MonitorService};
use glucoguard::config::{MonitorConfig, SharedThresholds, ThresholdConfig};

/// How often the idle wait re-checks for outstanding alerts.
const ALERT_POLL: Duration = Duration::from_millis(500);

#[derive(Parser, Debug)]
#[command(
    name = "glucoguard",
    version,
    about = "Replay a glucose recording through the forecasting and emergency-protocol engine"
)]
struct Cli {
    /// CSV recording (`timestamp,glucose` or `id,glucose,time`).
    dataset: PathBuf,

    /// JSON settings file; defaults are used when it does not exist.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Write the effective settings back to `--config`.
    #[arg(long, requires = "config")]
    save_config: bool,

    /// Date placed on time-of-day timestamps (default: today).
    #[arg(long)]
    date: Option<NaiveDate>,

    /// Delay between samples, in milliseconds.
    #[arg(long, default_value_t = 0)]
    pace_ms: u64,

    /// Thresholds as `severe,mild,hyper` in mg/dL.
    #[arg(long)]
    thresholds: Option<String>,

    /// Forecast horizon in sample intervals (at most 288).
    #[arg(long)]
    predict_steps: Option<usize>,

    /// Patient name used in caregiver alerts.
    #[arg(long)]
    patient: Option<String>,

    /// Device or file receiving `START_MOTOR` / `STOP_MOTOR` lines.
    #[arg(long)]
    motor_device: Option<PathBuf>,

    /// Append one JSON reading record per cycle to this file.
    #[arg(long)]
    records: Option<PathBuf>,

    /// Run side effects on the pipeline thread.
    #[arg(long)]
    inline_effects: bool,
}

// ── Event fan-out ─────────────────────────────────────────────

struct Sinks {
    log: LogEventSink,
    records: Option<JsonLinesRecorder<BufWriter<File>>>,
}

impl EventSink for Sinks {
    fn emit(&mut self, event: &AppEvent) {
        self.log.emit(event);
        if let Some(records) = &mut self.records {
            records.emit(event);
        }
    }
}

// ── Configuration ─────────────────────────────────────────────

fn parse_thresholds(text: &str) -> Result<ThresholdConfig> {
    let fields: Vec<&str> = text.split(',').collect();
    let [severe, mild, hyper] = fields.as_slice() else {
        bail!("--thresholds expects three comma-separated values, got {text:?}");
    };
    Ok(ThresholdConfig::from_fields(severe, mild, hyper)?)
}

fn load_config(cli: &Cli) -> Result<MonitorConfig> {
    let mut config = match &cli.config {
        Some(path) => JsonConfigFile::new(path)
            .load()
            .with_context(|| format!("loading settings from {}", path.display()))?,
        None => MonitorConfig::default(),
    };
    if let Some(text) = &cli.thresholds {
        config.thresholds = parse_thresholds(text)?;
    }
    if let Some(steps) = cli.predict_steps {
        config.predict_steps = steps;
    }
    if let Some(patient) = &cli.patient {
        config.patient_id.clone_from(patient);
    }
    if cli.inline_effects {
        config.effect_worker = false;
    }
    config.validate().context("invalid settings")?;

    if cli.save_config {
        if let Some(path) = &cli.config {
            JsonConfigFile::new(path)
                .save(&config)
                .with_context(|| format!("saving settings to {}", path.display()))?;
        }
    }
    Ok(config)
}

fn build_ports(cli: &Cli) -> Result<Ports> {
    let actuator = match &cli.motor_device {
        Some(path) => {
            let device = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("opening motor device {}", path.display()))?;
            info!("Motor commands go to {}", path.display());
            Some(Arc::new(LineActuator::new(device)) as Arc<dyn ActuatorPort>)
        }
        None => {
            info!("No motor device attached; actuator commands are skipped");
            None
        }
    };
    Ok(Ports {
        notifier: Arc::new(LogNotifier),
        alarm: Arc::new(BellAlarm::stderr()),
        actuator,
    })
}

// ── Console ───────────────────────────────────────────────────

fn spawn_console(acks: Acknowledger, thresholds: SharedThresholds, stop: CancelToken) -> Result<()> {
    std::thread::Builder::new()
        .name("console".into())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if line == "status" {
                    for snap in acks.snapshots() {
                        info!(
                            "STATUS | {} active={} predicted={:?} alarm={} motor={}",
                            snap.kind,
                            snap.active,
                            snap.predicted_value,
                            snap.alarm_sounding,
                            snap.actuator_engaged
                        );
                    }
                    continue;
                }
                if let Some(text) = line.strip_prefix("thresholds ") {
                    match parse_thresholds(text) {
                        Ok(t) => {
                            thresholds.update(t);
                            info!("Thresholds updated: {t:?}");
                        }
                        Err(e) => warn!("{e}"),
                    }
                    continue;
                }
                match line.parse::<AppCommand>() {
                    Ok(AppCommand::Acknowledge(kind)) => {
                        if !acks.acknowledge(kind) {
                            info!("{kind} is not active");
                        }
                    }
                    Ok(AppCommand::DismissAlert) => match acks.dismiss() {
                        Some(kind) => info!("Dismissed {kind}"),
                        None => info!("No active alert"),
                    },
                    Ok(AppCommand::StopActuator) => acks.stop_actuator(),
                    Ok(AppCommand::DeliverDose) => match acks.deliver_dose() {
                        Ok(dose_ml) => info!("Delivering {dose_ml} mL glucagon"),
                        Err(e) => warn!("Cannot deliver glucagon: {e}"),
                    },
                    Ok(AppCommand::StopSession) => {
                        stop.cancel();
                        break;
                    }
                    Ok(AppCommand::StartSession) => warn!("A session is already running"),
                    Err(e) => warn!("{e}"),
                }
            }
        })
        .context("spawning console thread")?;
    Ok(())
}

// ── Entry point ───────────────────────────────────────────────

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let config = load_config(&cli)?;
    let base_date = cli
        .date
        .unwrap_or_else(|| chrono::Local::now().date_naive());
    let (mut source, dataset) = ReplaySource::from_path(&cli.dataset, base_date)
        .with_context(|| format!("reading dataset {}", cli.dataset.display()))?;
    if dataset.samples.is_empty() {
        bail!("{} contains no usable samples", cli.dataset.display());
    }

    let ports = build_ports(&cli)?;
    let dispatcher = if config.effect_worker {
        Dispatcher::spawn_worker(ports).context("starting effect worker")?
    } else {
        Dispatcher::inline(ports)
    };
    let thresholds = SharedThresholds::new(config.thresholds);
    let mut service = MonitorService::new(config, Arc::new(thresholds.clone()), dispatcher)?;

    let records = match &cli.records {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("opening records file {}", path.display()))?;
            Some(JsonLinesRecorder::new(BufWriter::new(file)))
        }
        None => None,
    };
    let mut sinks = Sinks {
        log: LogEventSink::new(),
        records,
    };

    let stop = CancelToken::new();
    let acks = service.acknowledger();
    spawn_console(acks.clone(), thresholds, stop.clone())?;

    let pace = Duration::from_millis(cli.pace_ms);
    let pipeline = std::thread::Builder::new()
        .name("pipeline".into())
        .spawn(move || {
            service.start_session(&mut sinks);
            let summary = service.run(&mut source, &mut sinks, &stop, pace);

            if !stop.is_cancelled() && acks.snapshots().iter().any(|s| s.active) {
                info!("Replay finished with alerts outstanding; waiting for ack/dismiss/stop");
                while acks.snapshots().iter().any(|s| s.active) && !stop.wait_timeout(ALERT_POLL) {}
            }
            service.stop_session(&mut sinks);
            (summary, sinks.records.map_or(0, |r| r.written()))
        })
        .context("spawning pipeline thread")?;

    let (summary, written) = pipeline
        .join()
        .map_err(|_| anyhow!("pipeline thread panicked"))?;
    info!(
        "Done: {} cycles, {} rejected samples, {} unparsable lines, {} records written",
        summary.cycles, summary.rejected, dataset.skipped, written
    );
    Ok(())
}
