//! Full rotation cycles and the rotation loop
//!
//! # Test Scenarios
//!
//! 1. **Rotation due**: keys generated, rendered and committed; success
//! 2. **Steady state**: the following cycle finds keys staged; success
//! 3. **Active slot 0** (D): every slot 1..=31 written, slot 0 untouched
//! 4. **Aborted cycles**: error outcomes, no key material leaves the core
//! 5. **Loop**: cycles repeat on the period and stop on shutdown

use crate::test_utils::*;
use keyserver_core::{LastOutcome, Outcome, OutcomeSink, Slot};
use keyserver_rotation::{CycleAction, KeyServer};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;

/// Keeps every recorded outcome
#[derive(Default)]
struct RecordingSink(Mutex<Vec<Outcome>>);

impl OutcomeSink for RecordingSink {
    fn record_outcome(&self, outcome: Outcome) {
        self.0.lock().unwrap().push(outcome);
    }
}

fn ready_fleet(addresses: &[&str], slot: Slot) -> ScriptedFleet {
    addresses.iter().fold(ScriptedFleet::new(), |fleet, address| {
        fleet.with_device(address, DeviceScript::ready(slot))
    })
}

#[test]
fn test_rotation_cycle_commits_and_records_success() {
    init_tracing();
    let fleet = ready_fleet(&["r1", "r2", "r3"], 5);
    let sink = Arc::new(LastOutcome::new());
    let server = KeyServer::new(
        fleet_config(&["r1", "r2", "r3"]),
        fleet.clone(),
        Arc::clone(&sink),
    );

    let report = server.run_cycle();

    assert_eq!(report.outcome, Outcome::Success);
    assert_eq!(
        report.action,
        CycleAction::Rotated {
            active_slot: 5,
            devices: vec!["r1".to_string(), "r2".to_string(), "r3".to_string()],
        }
    );
    assert!(report.error.is_none());
    assert_eq!(sink.get(), Some(1.0));
    assert_eq!(fleet.committed_devices(), ["r1", "r2", "r3"]);

    // one batch, identical on every device
    let first = fleet.applied_lines("r1").unwrap();
    assert_eq!(first.len(), 93);
    assert_eq!(fleet.applied_lines("r2").unwrap(), first);
    assert_eq!(fleet.applied_lines("r3").unwrap(), first);
}

#[test]
fn test_next_cycle_finds_keys_staged() {
    let fleet = ready_fleet(&["r1", "r2"], 7);
    let sink = Arc::new(RecordingSink::default());
    let server = KeyServer::new(fleet_config(&["r1", "r2"]), fleet.clone(), Arc::clone(&sink));

    assert!(matches!(server.run_cycle().action, CycleAction::Rotated { .. }));
    let second = server.run_cycle();

    assert_eq!(second.action, CycleAction::NoRotationDue { active_slot: 7 });
    assert_eq!(second.outcome, Outcome::Success);
    assert_eq!(*sink.0.lock().unwrap(), [Outcome::Success, Outcome::Success]);
    // only the first cycle wrote anything
    assert_eq!(fleet.committed_devices(), ["r1", "r2"]);
}

#[test]
fn test_scenario_d_active_slot_zero() {
    let fleet = ready_fleet(&["r1"], 0);
    let server = KeyServer::new(fleet_config(&["r1"]), fleet.clone(), LastOutcome::new());

    server.run_cycle();

    let slots: BTreeSet<Slot> = fleet
        .applied_lines("r1")
        .unwrap()
        .iter()
        .map(|line| line_slot(line))
        .collect();
    assert_eq!(slots, (1..=31).collect::<BTreeSet<Slot>>());
}

#[test]
fn test_activation_times_increase_across_slots() {
    let fleet = ready_fleet(&["r1"], 10);
    let server = KeyServer::new(fleet_config(&["r1"]), fleet.clone(), LastOutcome::new());
    server.run_cycle();

    let times: Vec<String> = fleet
        .applied_lines("r1")
        .unwrap()
        .iter()
        .filter(|line| line.contains(" start-time "))
        .map(|line| line.rsplit(' ').next().unwrap().to_string())
        .collect();
    assert_eq!(times.len(), 31);
    // the timestamp format sorts lexically
    assert!(times.windows(2).all(|pair| pair[0] < pair[1]));
}

#[test]
fn test_unsynchronized_fleet_records_error_and_writes_nothing() {
    let fleet = ScriptedFleet::new()
        .with_device("r1", DeviceScript::ready(5))
        .with_device("r2", DeviceScript::ready(5))
        .with_device("r3", DeviceScript::ready(6));
    let sink = Arc::new(LastOutcome::new());
    let server = KeyServer::new(
        fleet_config(&["r1", "r2", "r3"]),
        fleet.clone(),
        Arc::clone(&sink),
    );

    let report = server.run_cycle();

    assert_eq!(report.outcome, Outcome::Error);
    assert_eq!(report.action, CycleAction::Aborted);
    assert!(report.error.unwrap().contains("unsynchronized"));
    assert_eq!(sink.get(), Some(0.0));
    assert!(fleet.probed_devices().is_empty());
}

#[test]
fn test_apply_failure_cycle_reports_error_after_rollback() {
    let fleet = ScriptedFleet::new()
        .with_device("r1", DeviceScript::ready(5))
        .with_device("r2", DeviceScript::ready(5))
        .with_device(
            "r3",
            DeviceScript::ready(5).with_apply(Response::fail("commit failed")),
        );
    let sink = Arc::new(LastOutcome::new());
    let server = KeyServer::new(
        fleet_config(&["r1", "r2", "r3"]),
        fleet.clone(),
        Arc::clone(&sink),
    );

    let report = server.run_cycle();

    assert_eq!(report.outcome, Outcome::Error);
    assert_eq!(sink.get(), Some(0.0));
    assert_eq!(fleet.reverted_devices(), ["r1", "r2"]);

    // reverted devices are ready again, so the next cycle retries from scratch
    let second = server.run_cycle();
    assert_eq!(second.outcome, Outcome::Error);
    assert_eq!(fleet.reverted_devices(), ["r1", "r2", "r1", "r2"]);
}

#[test]
fn test_error_report_never_carries_key_material() {
    let fleet = ScriptedFleet::new()
        .with_device("r1", DeviceScript::ready(5))
        .with_device(
            "r2",
            DeviceScript::ready(5).with_probe(Response::fail("bad secret")),
        );
    let server = KeyServer::new(fleet_config(&["r1", "r2"]), fleet.clone(), LastOutcome::new());

    let report = server.run_cycle();
    let rendered = format!("{report:?}");

    assert_eq!(report.outcome, Outcome::Error);
    assert!(!rendered.contains("authentication-key-chains"));
    assert!(fleet.committed_devices().is_empty());
}

#[tokio::test]
async fn test_loop_repeats_until_shutdown() {
    let fleet = ready_fleet(&["r1", "r2"], 3);
    let sink = Arc::new(RecordingSink::default());
    let server = Arc::new(
        KeyServer::new(fleet_config(&["r1", "r2"]), fleet.clone(), Arc::clone(&sink))
            .with_cycle_period(Duration::from_millis(20)),
    );
    let (tx, rx) = watch::channel(false);

    let handle = tokio::spawn(server.run(rx));
    tokio::time::sleep(Duration::from_millis(90)).await;
    tx.send(true).unwrap();
    let cycles = handle.await.unwrap();

    let outcomes = sink.0.lock().unwrap().clone();
    assert!(cycles >= 2, "only {cycles} cycles ran");
    assert_eq!(outcomes.len() as u64, cycles);
    assert!(outcomes.iter().all(|o| *o == Outcome::Success));
    // rotated once, then found keys staged
    assert_eq!(fleet.committed_devices(), ["r1", "r2"]);
}

#[tokio::test]
async fn test_shutdown_interrupts_sleep() {
    let fleet = ready_fleet(&["r1"], 3);
    let server = Arc::new(
        KeyServer::new(fleet_config(&["r1"]), fleet, LastOutcome::new())
            .with_cycle_period(Duration::from_secs(24 * 3600)),
    );
    let (tx, rx) = watch::channel(false);

    let handle = tokio::spawn(server.run(rx));
    tokio::time::sleep(Duration::from_millis(50)).await;
    tx.send(true).unwrap();

    let cycles = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("loop did not stop on shutdown")
        .unwrap();
    assert_eq!(cycles, 1);
}
