//! Manual glucagon delivery through the service and the acknowledger.

use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use glucoguard::app::commands::AppCommand;
use glucoguard::app::events::AppEvent;
use glucoguard::app::service::Acknowledger;
use glucoguard::config::MonitorConfig;
use glucoguard::error::{DoseError, PortKind};
use glucoguard::fsm::ProtocolKind;

use crate::mock_ports::{fixture, fixture_with, series};

fn quick_dose() -> MonitorConfig {
    MonitorConfig {
        dose_run_secs: 1,
        glucagon_dose_ml: 1.0,
        ..MonitorConfig::default()
    }
}

/// Poll until the delivery timer has finished.
fn wait_for_delivery(acks: &Acknowledger) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while acks.dose_in_flight() {
        if Instant::now() > deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    true
}

#[test]
fn delivery_stops_the_pump_after_run_time() {
    let mut fx = fixture_with(quick_dose(), true, false);
    let acks = fx.service.acknowledger();

    let start = Instant::now();
    fx.service
        .handle_command(AppCommand::DeliverDose, &mut fx.sink);
    assert!(matches!(
        fx.sink.events.last(),
        Some(AppEvent::DoseStarted { dose_ml, run })
            if *dose_ml == 1.0 && *run == Duration::from_secs(1)
    ));
    assert_eq!(fx.mock.motor_commands(), vec![true]);
    assert!(acks.dose_in_flight());

    assert!(wait_for_delivery(&acks));
    assert!(start.elapsed() >= Duration::from_secs(1));
    assert_eq!(fx.mock.motor_commands(), vec![true, false]);

    // Ready for the next one.
    assert_eq!(acks.deliver_dose(), Ok(1.0));
    fx.service.stop_session(&mut fx.sink);
    assert_eq!(fx.mock.motor_commands(), vec![true, false, true, false]);
}

#[test]
fn delivery_is_refused_while_severe_is_active() {
    let mut fx = fixture();
    for s in series(&[150.0, 120.0, 80.0]) {
        fx.service.process_sample(s, &mut fx.sink).unwrap();
    }
    assert!(fx.service.snapshots()[ProtocolKind::Severe as usize].active);

    let acks = fx.service.acknowledger();
    assert_eq!(acks.deliver_dose(), Err(DoseError::ProtocolActive));
    fx.service
        .handle_command(AppCommand::DeliverDose, &mut fx.sink);
    assert!(matches!(
        fx.sink.events.last(),
        Some(AppEvent::DoseRefused(DoseError::ProtocolActive))
    ));
    assert!(!acks.dose_in_flight());
    assert_eq!(fx.mock.motor_commands(), vec![true]);

    // Once acknowledged the pump is free again.
    assert!(acks.acknowledge(ProtocolKind::Severe));
    assert_eq!(acks.deliver_dose(), Ok(0.5));
    fx.service.stop_session(&mut fx.sink);
}

#[test]
fn second_delivery_is_refused_while_first_runs() {
    let mut fx = fixture();
    let acks = fx.service.acknowledger();

    assert_eq!(acks.deliver_dose(), Ok(0.5));
    assert_eq!(acks.deliver_dose(), Err(DoseError::InFlight));
    fx.service
        .handle_command(AppCommand::DeliverDose, &mut fx.sink);
    assert!(matches!(
        fx.sink.events.last(),
        Some(AppEvent::DoseRefused(DoseError::InFlight))
    ));
    assert_eq!(fx.mock.motor_commands(), vec![true]);

    // Motor-off cuts the delivery short.
    fx.service
        .handle_command(AppCommand::StopActuator, &mut fx.sink);
    assert!(!acks.dose_in_flight());
    assert_eq!(fx.mock.motor_commands(), vec![true, false]);
    assert_eq!(acks.deliver_dose(), Ok(0.5));
    fx.service.stop_session(&mut fx.sink);
}

#[test]
fn concurrent_requests_start_one_delivery() {
    let mut fx = fixture();
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let acks = fx.service.acknowledger();
            std::thread::spawn(move || acks.deliver_dose())
        })
        .collect();
    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(
        results
            .iter()
            .filter(|r| r.is_err())
            .all(|r| *r == Err(DoseError::InFlight))
    );
    assert_eq!(fx.mock.motor_commands(), vec![true]);
    fx.service.stop_session(&mut fx.sink);
    assert_eq!(fx.mock.motor_commands(), vec![true, false]);
}

#[test]
fn delivery_without_pump_is_refused() {
    let fx = fixture_with(MonitorConfig::default(), false, false);
    assert_eq!(
        fx.service.acknowledger().deliver_dose(),
        Err(DoseError::NoActuator)
    );
}

#[test]
fn pump_failure_is_reported_and_clears_the_guard() {
    let mut fx = fixture();
    fx.mock.fail_motor.store(true, Ordering::SeqCst);
    fx.service
        .handle_command(AppCommand::DeliverDose, &mut fx.sink);

    assert_eq!(
        fx.sink.count(|e| matches!(
            e,
            AppEvent::PortFailed(f) if f.port == PortKind::Actuator
        )),
        1
    );
    assert!(matches!(
        fx.sink.events.last(),
        Some(AppEvent::DoseRefused(DoseError::Actuator(_)))
    ));
    let acks = fx.service.acknowledger();
    assert!(!acks.dose_in_flight());

    fx.mock.fail_motor.store(false, Ordering::SeqCst);
    assert_eq!(acks.deliver_dose(), Ok(0.5));
    fx.service.stop_session(&mut fx.sink);
}

#[test]
fn severe_activation_keeps_the_pump_running_past_the_dose() {
    let mut fx = fixture_with(quick_dose(), true, false);
    let acks = fx.service.acknowledger();
    assert_eq!(acks.deliver_dose(), Ok(1.0));

    for s in series(&[150.0, 120.0, 80.0]) {
        fx.service.process_sample(s, &mut fx.sink).unwrap();
    }
    assert!(fx.service.snapshots()[ProtocolKind::Severe as usize].actuator_engaged);

    assert!(wait_for_delivery(&acks));
    assert_eq!(fx.mock.motor_commands(), vec![true, true]);

    fx.service.stop_session(&mut fx.sink);
    assert_eq!(fx.mock.motor_commands(), vec![true, true, false]);
}
