//! End-to-end runs: replayed dataset → service → recorder.

use std::time::Duration;

use chrono::NaiveDate;

use glucoguard::adapters::record_log::JsonLinesRecorder;
use glucoguard::adapters::replay::{ReplaySource, parse_dataset};
use glucoguard::alarm::CancelToken;
use glucoguard::app::events::{AppEvent, ReadingRecord};
use glucoguard::app::ports::EventSink;
use glucoguard::config::MonitorConfig;
use glucoguard::fsm::ProtocolKind;

use crate::mock_ports::{CaptureSink, VecSource, fixture, fixture_with, series};

const OVERNIGHT: &str = "\
id,glucose,time
1,150,11:50:00 PM
2,120,11:55:00 PM
3,80,00:00:00 AM
4,60,00:05:00 AM
";

/// Sends every event to both sinks.
struct Tee<'a, A, B>(&'a mut A, &'a mut B);

impl<A: EventSink, B: EventSink> EventSink for Tee<'_, A, B> {
    fn emit(&mut self, event: &AppEvent) {
        self.0.emit(event);
        self.1.emit(event);
    }
}

#[test]
fn overnight_replay_crosses_midnight_and_triggers_severe() {
    let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
    let dataset = parse_dataset(OVERNIGHT, date);
    assert_eq!(dataset.samples.len(), 4);
    assert_eq!(dataset.skipped, 0);
    assert_eq!(
        dataset.samples[2].timestamp.date(),
        NaiveDate::from_ymd_opt(2024, 3, 2).unwrap()
    );

    let mut fx = fixture();
    let mut source = ReplaySource::new(dataset.samples);
    let mut recorder = JsonLinesRecorder::new(Vec::new());
    let summary = fx.service.run(
        &mut source,
        &mut Tee(&mut fx.sink, &mut recorder),
        &CancelToken::new(),
        Duration::ZERO,
    );

    assert_eq!(summary.cycles, 4);
    assert_eq!(summary.rejected, 0);
    assert_eq!(source.remaining(), 0);
    assert!(fx.service.snapshots()[ProtocolKind::Severe as usize].active);
    assert_eq!(
        fx.sink.count(|e| matches!(
            e,
            AppEvent::ProtocolActivated {
                kind: ProtocolKind::Severe,
                ..
            }
        )),
        1
    );

    assert_eq!(recorder.written(), 4);
    let text = String::from_utf8(recorder.into_inner()).unwrap();
    let records: Vec<ReadingRecord> = text
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(records[0].glucose, 150.0);
    assert_eq!(records[0].prediction, Some(150.0));
    assert_eq!(records[0].state, "Safe Range");
    assert!(!records[1].protocol_active);
    assert!(records[2].protocol_active);
    assert!((records[2].prediction.unwrap() - 40.5626).abs() < 1e-3);
    assert_eq!(records[3].state, "Mild Hypoglycemia");

    fx.service.stop_session(&mut fx.sink);
}

#[test]
fn run_counts_rejected_samples() {
    let mut fx = fixture();
    let mut samples = series(&[120.0, 118.0, 116.0]);
    samples.insert(2, samples[0]);
    let summary = fx.service.run(
        &mut VecSource(samples.into_iter()),
        &mut fx.sink,
        &CancelToken::new(),
        Duration::ZERO,
    );
    assert_eq!(summary.cycles, 3);
    assert_eq!(summary.rejected, 1);
}

#[test]
fn cancelled_run_processes_nothing() {
    let mut fx = fixture();
    let stop = CancelToken::new();
    stop.cancel();
    let summary = fx.service.run(
        &mut VecSource(series(&[120.0, 118.0]).into_iter()),
        &mut fx.sink,
        &stop,
        Duration::ZERO,
    );
    assert_eq!(summary.cycles, 0);
    assert!(fx.service.estimator().filtered().is_empty());
}

#[test]
fn multi_step_forecast_feeds_prediction_history() {
    let config = MonitorConfig {
        predict_steps: 3,
        ..MonitorConfig::default()
    };
    let mut fx = fixture_with(config, true, false);
    let mut last = None;
    for s in series(&[120.0, 118.0, 116.0, 114.0]) {
        last = Some(fx.service.process_sample(s, &mut fx.sink).unwrap());
    }
    let report = last.unwrap();

    assert_eq!(report.forecast.horizon_minutes, vec![5, 10, 15]);
    let expected = [112.0, 110.0, 108.0];
    for (got, want) in report.forecast.predicted_values.iter().zip(expected) {
        assert!((got - want).abs() < 1e-2, "{got} vs {want}");
    }
    assert_eq!(fx.service.estimator().prediction_history().len(), 12);
    let points: Vec<_> = report.forecast.points().collect();
    assert_eq!(
        points[2].0,
        report.sample.timestamp + chrono::TimeDelta::minutes(15)
    );
}

#[test]
fn cycle_report_carries_hourly_metrics() {
    let mut fx = fixture();
    let mut last = None;
    for s in series(&[100.0, 110.0, 120.0]) {
        last = Some(fx.service.process_sample(s, &mut fx.sink).unwrap());
    }
    let metrics = last.unwrap().metrics.unwrap();
    assert_eq!(metrics.samples, 3);
    assert!((metrics.mean_glucose - 110.0).abs() < 1e-9);
    assert!((metrics.gmi_percent - (3.31 + 0.023_92 * 110.0)).abs() < 1e-9);
}

#[test]
fn every_cycle_emits_one_report_event() {
    let mut fx = fixture();
    let mut sink = CaptureSink::new();
    for s in series(&[100.0, 101.0, 102.0]) {
        fx.service.process_sample(s, &mut sink).unwrap();
    }
    assert_eq!(sink.count(|e| matches!(e, AppEvent::Cycle(_))), 3);
}
