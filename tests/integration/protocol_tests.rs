//! Protocol activation scenarios driven through `MonitorService`.
//!
//! Expected forecasts come from the constant-velocity filter with the
//! default tuning (Δt = 5 min, Q = 1, R ≈ 0.0518, P0 = 5).

use std::sync::atomic::Ordering;
use std::time::Duration;

use glucoguard::app::events::{AppEvent, DeactivationReason};
use glucoguard::app::orchestrator::ProtocolOutcome;
use glucoguard::config::MonitorConfig;
use glucoguard::fsm::ProtocolKind;

use crate::mock_ports::{PortCall, fixture, fixture_with, series};

fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < 1e-3,
        "expected {expected}, got {actual}"
    );
}

fn activated_value(outcome: ProtocolOutcome) -> f64 {
    match outcome {
        ProtocolOutcome::Activated { predicted_value } => predicted_value,
        other => panic!("expected activation, got {other:?}"),
    }
}

// ── Severe hypoglycemia ───────────────────────────────────────

#[test]
fn falling_night_triggers_severe_once() {
    let mut fx = fixture();
    let samples = series(&[150.0, 120.0, 80.0, 60.0]);

    let mut reports = Vec::new();
    for s in samples {
        reports.push(fx.service.process_sample(s, &mut fx.sink).unwrap());
    }

    assert_close(reports[0].filtered, 150.0);
    assert_close(reports[1].filtered, 120.05);
    assert_close(reports[2].filtered, 80.0265);
    assert_close(reports[3].filtered, 59.9631);

    assert_eq!(reports[0].outcomes.severe, ProtocolOutcome::NotTriggered);
    assert_eq!(reports[1].outcomes.severe, ProtocolOutcome::NotTriggered);
    assert_close(activated_value(reports[2].outcomes.severe), 40.5626);
    assert_eq!(reports[3].outcomes.severe, ProtocolOutcome::AlreadyActive);

    // Severe active suppresses the mild check entirely.
    for r in &reports {
        assert!(!r.outcomes.mild.is_activated());
    }
    assert_eq!(reports[3].outcomes.mild, ProtocolOutcome::NotTriggered);

    assert_eq!(fx.mock.notifications(), vec![ProtocolKind::Severe]);
    assert_eq!(fx.mock.sounded(ProtocolKind::Severe), 1);
    assert_eq!(fx.mock.motor_commands(), vec![true]);

    let snap = fx.service.snapshots()[ProtocolKind::Severe as usize];
    assert!(snap.active);
    assert!(snap.notification_sent);
    assert!(snap.alarm_sounding);
    assert!(snap.actuator_engaged);
    assert_close(snap.predicted_value.unwrap(), 40.5626);
    assert_eq!(snap.activated_at, Some(reports[2].sample.timestamp));

    fx.service.stop_session(&mut fx.sink);
}

#[test]
fn steep_drop_triggers_severe_on_second_sample() {
    let mut fx = fixture();
    let mut out = Vec::new();
    for s in series(&[200.0, 50.0]) {
        out.push(fx.service.process_sample(s, &mut fx.sink).unwrap());
    }
    assert_close(out[1].filtered, 50.2502);
    // Negative forecasts are compared raw and still trigger.
    assert_close(activated_value(out[1].outcomes.severe), -70.5158);
    assert_eq!(out[1].outcomes.mild, ProtocolOutcome::NotTriggered);
    fx.service.stop_session(&mut fx.sink);
}

#[test]
fn severe_alarm_uses_configured_duration_and_effect_order() {
    let mut fx = fixture();
    for s in series(&[150.0, 120.0, 80.0]) {
        fx.service.process_sample(s, &mut fx.sink).unwrap();
    }
    let calls = fx.mock.calls();
    assert!(matches!(
        calls[0],
        PortCall::Sound { kind: ProtocolKind::Severe, duration, .. }
            if duration == Duration::from_secs(900)
    ));
    assert!(matches!(calls[1], PortCall::Notify { kind: ProtocolKind::Severe, .. }));
    assert_eq!(calls[2], PortCall::Motor(true));
    fx.service.stop_session(&mut fx.sink);
}

// ── Mild hypoglycemia ─────────────────────────────────────────

#[test]
fn gentle_decline_triggers_mild_without_actuator() {
    let mut fx = fixture();
    let mut out = Vec::new();
    for s in series(&[100.0, 95.0, 90.0, 85.0, 80.0, 75.0, 72.0]) {
        out.push(fx.service.process_sample(s, &mut fx.sink).unwrap());
    }

    // 69.99999... is above the 69 mg/dL threshold.
    assert_eq!(out[5].outcomes.mild, ProtocolOutcome::NotTriggered);
    assert_close(activated_value(out[6].outcomes.mild), 68.9116);
    assert_eq!(out[6].outcomes.severe, ProtocolOutcome::NotTriggered);

    assert_eq!(fx.mock.notifications(), vec![ProtocolKind::Mild]);
    assert_eq!(fx.mock.sounded(ProtocolKind::Mild), 1);
    assert!(fx.mock.motor_commands().is_empty());
    fx.service.stop_session(&mut fx.sink);
}

#[test]
fn severe_forecast_escalates_active_mild() {
    let mut fx = fixture();
    let mut out = Vec::new();
    for s in series(&[100.0, 95.0, 90.0, 85.0, 80.0, 75.0, 72.0, 40.0]) {
        out.push(fx.service.process_sample(s, &mut fx.sink).unwrap());
    }

    assert!(out[6].outcomes.mild.is_activated());
    assert_close(activated_value(out[7].outcomes.severe), 9.2818);

    let snaps = fx.service.snapshots();
    assert!(snaps[ProtocolKind::Severe as usize].active);
    assert!(!snaps[ProtocolKind::Mild as usize].active);
    assert_eq!(
        fx.sink.count(|e| matches!(
            e,
            AppEvent::ProtocolDeactivated {
                kind: ProtocolKind::Mild,
                reason: DeactivationReason::Escalated
            }
        )),
        1
    );
    // The mild alarm is silenced before the severe one rings.
    let mild_handle = fx
        .mock
        .calls()
        .iter()
        .find_map(|c| match c {
            PortCall::Sound { kind: ProtocolKind::Mild, handle, .. } => Some(*handle),
            _ => None,
        })
        .unwrap();
    assert!(fx.mock.cancelled().contains(&mild_handle));
    fx.service.stop_session(&mut fx.sink);
}

// ── Hyperglycemia ─────────────────────────────────────────────

#[test]
fn rising_trend_triggers_hyper() {
    let mut fx = fixture();
    let mut out = Vec::new();
    for s in series(&[150.0, 160.0, 170.0, 180.0]) {
        out.push(fx.service.process_sample(s, &mut fx.sink).unwrap());
    }
    assert_eq!(out[2].outcomes.hyper, ProtocolOutcome::NotTriggered);
    assert_close(activated_value(out[3].outcomes.hyper), 190.0007);
    assert_eq!(fx.mock.notifications(), vec![ProtocolKind::Hyper]);
    fx.service.stop_session(&mut fx.sink);
}

#[test]
fn hyper_is_debounced_while_already_high() {
    let mut fx = fixture();
    let values = [
        250.0, 240.0, 230.0, 220.0, 200.0, 185.0, 175.0, 170.0, 172.0, 180.0, 190.0,
    ];
    let mut out = Vec::new();
    for s in series(&values) {
        out.push(fx.service.process_sample(s, &mut fx.sink).unwrap());
    }

    // First check of the session and every sample at or above the
    // threshold are suppressed; the first rise from below fires.
    for r in &out[..9] {
        assert_eq!(r.outcomes.hyper, ProtocolOutcome::NotTriggered);
    }
    assert_close(activated_value(out[9].outcomes.hyper), 187.7348);
    assert_eq!(out[10].outcomes.hyper, ProtocolOutcome::AlreadyActive);
    assert_eq!(fx.mock.sounded(ProtocolKind::Hyper), 1);
    fx.service.stop_session(&mut fx.sink);
}

// ── Acknowledge / re-trigger ──────────────────────────────────

#[test]
fn acknowledged_protocol_can_retrigger() {
    let mut fx = fixture();
    let samples = series(&[150.0, 120.0, 80.0, 60.0]);
    for s in &samples[..3] {
        fx.service.process_sample(*s, &mut fx.sink).unwrap();
    }

    assert!(fx.service.acknowledge(ProtocolKind::Severe, &mut fx.sink));
    assert!(!fx.service.acknowledge(ProtocolKind::Severe, &mut fx.sink));
    let snap = fx.service.snapshots()[ProtocolKind::Severe as usize];
    assert!(!snap.active);
    assert!(!snap.alarm_sounding);
    assert!(!snap.notification_sent);
    assert!(!snap.actuator_engaged);
    assert_eq!(fx.mock.motor_commands(), vec![true, false]);
    assert_eq!(fx.mock.cancelled().len(), 1);

    let r = fx.service.process_sample(samples[3], &mut fx.sink).unwrap();
    assert_close(activated_value(r.outcomes.severe), 39.1143);
    assert_eq!(
        fx.mock.notifications(),
        vec![ProtocolKind::Severe, ProtocolKind::Severe]
    );
    fx.service.stop_session(&mut fx.sink);
}

#[test]
fn acknowledging_idle_protocol_changes_nothing() {
    let mut fx = fixture();
    assert!(!fx.service.acknowledge(ProtocolKind::Mild, &mut fx.sink));
    assert!(fx.mock.calls().is_empty());
    assert_eq!(
        fx.sink
            .count(|e| matches!(e, AppEvent::ProtocolDeactivated { .. })),
        0
    );
}

// ── Port failures ─────────────────────────────────────────────

#[test]
fn failing_ports_do_not_block_activation() {
    let mut fx = fixture();
    fx.mock.fail_notify.store(true, Ordering::SeqCst);
    fx.mock.fail_motor.store(true, Ordering::SeqCst);

    let mut last = None;
    for s in series(&[150.0, 120.0, 80.0]) {
        last = Some(fx.service.process_sample(s, &mut fx.sink).unwrap());
    }
    let report = last.unwrap();

    assert!(report.outcomes.severe.is_activated());
    assert_eq!(report.failures.len(), 2);
    let snap = fx.service.snapshots()[ProtocolKind::Severe as usize];
    assert!(snap.active);
    assert!(!snap.notification_sent);
    assert!(!snap.actuator_engaged);
    assert!(snap.alarm_sounding);
    assert_eq!(
        fx.sink.count(|e| matches!(e, AppEvent::PortFailed(_))),
        2
    );
    fx.service.stop_session(&mut fx.sink);
}

#[test]
fn missing_actuator_is_skipped() {
    let mut fx = fixture_with(MonitorConfig::default(), false, false);
    let mut last = None;
    for s in series(&[150.0, 120.0, 80.0]) {
        last = Some(fx.service.process_sample(s, &mut fx.sink).unwrap());
    }
    let report = last.unwrap();
    assert!(report.outcomes.severe.is_activated());
    assert!(report.failures.is_empty());
    assert!(fx.mock.motor_commands().is_empty());
    assert!(!fx.service.snapshots()[ProtocolKind::Severe as usize].actuator_engaged);
    fx.service.stop_session(&mut fx.sink);
}
