//! Two-phase apply and rollback
//!
//! # Test Scenarios
//!
//! 1. **Clean apply**: every device probed, then committed in order
//! 2. **Probe rejection**: no device is committed
//! 3. **Apply failure on device 3 of 3** (E): rollback on r1 then r2
//! 4. **Envelope quirk** (F): counted as committed and reported apart
//! 5. **Rollback failure**: stops at the first device that cannot revert

use crate::test_utils::*;
use keyserver_core::{Slot, KEYCHAIN_SLOTS};
use keyserver_crypto::KeyRing;
use keyserver_device::LoadAction;
use keyserver_rotation::{CommandList, ConfigRenderer, FleetCommitter, RotationError};

fn commands(active: Slot) -> CommandList {
    let ring = KeyRing::generate(active, 24).unwrap();
    ConfigRenderer::new(KEYCHAIN).render(&ring, active).unwrap()
}

fn fleet_of(scripts: Vec<(&str, DeviceScript)>) -> ScriptedFleet {
    scripts
        .into_iter()
        .fold(ScriptedFleet::new(), |fleet, (address, script)| {
            fleet.with_device(address, script)
        })
}

#[test]
fn test_clean_apply_probes_then_commits_in_order() {
    init_tracing();
    let config = fleet_config(&["r1", "r2", "r3"]);
    let fleet = fleet_of(vec![
        ("r1", DeviceScript::ready(5)),
        ("r2", DeviceScript::ready(5)),
        ("r3", DeviceScript::ready(5)),
    ]);
    let batch = commands(5);

    let report = FleetCommitter::new(&config, &fleet).apply(&batch).unwrap();

    assert_eq!(report.committed, ["r1", "r2", "r3"]);
    assert!(report.quirk_acknowledged.is_empty());
    assert_eq!(fleet.probed_devices(), ["r1", "r2", "r3"]);
    assert_eq!(fleet.committed_devices(), ["r1", "r2", "r3"]);
    assert!(fleet.reverted_devices().is_empty());
    assert_eq!(fleet.open_sessions(), 0);

    // every probe happens before the first commit
    let calls = fleet.calls();
    let last_probe = calls
        .iter()
        .rposition(|(_, c)| matches!(c, Call::CommitCheck { .. }))
        .unwrap();
    let first_commit = calls
        .iter()
        .position(|(_, c)| matches!(c, Call::Apply { .. }))
        .unwrap();
    assert!(last_probe < first_commit);
}

#[test]
fn test_applied_batch_is_set_statements_committed() {
    let config = fleet_config(&["r1"]);
    let fleet = fleet_of(vec![("r1", DeviceScript::ready(5))]);
    let batch = commands(5);

    FleetCommitter::new(&config, &fleet).apply(&batch).unwrap();

    let apply = fleet
        .calls_for("r1")
        .into_iter()
        .find(|call| matches!(call, Call::Apply { .. }))
        .unwrap();
    match apply {
        Call::Apply {
            lines,
            action,
            commit,
        } => {
            assert_eq!(lines, *batch.lines());
            assert_eq!(action, LoadAction::Set);
            assert!(commit);
        }
        _ => unreachable!(),
    }
    assert!(fleet
        .calls_for("r1")
        .contains(&Call::CommitCheck { lines: batch.len() }));
}

#[test]
fn test_active_slot_never_written() {
    for active in [0, 5, KEYCHAIN_SLOTS - 1] {
        let config = fleet_config(&["r1"]);
        let fleet = fleet_of(vec![("r1", DeviceScript::ready(active))]);

        FleetCommitter::new(&config, &fleet)
            .apply(&commands(active))
            .unwrap();

        let lines = fleet.applied_lines("r1").unwrap();
        assert!(lines.iter().all(|line| line_slot(line) != active));
    }
}

#[test]
fn test_probe_rejection_changes_nothing() {
    let config = fleet_config(&["r1", "r2", "r3"]);
    let fleet = fleet_of(vec![
        ("r1", DeviceScript::ready(5)),
        (
            "r2",
            DeviceScript::ready(5).with_probe(Response::fail("syntax error")),
        ),
        ("r3", DeviceScript::ready(5)),
    ]);

    let err = FleetCommitter::new(&config, &fleet)
        .apply(&commands(5))
        .unwrap_err();

    assert!(matches!(err, RotationError::Probe { ref device, .. } if device == "r2"));
    assert_eq!(fleet.probed_devices(), ["r1", "r2"]);
    assert!(fleet.committed_devices().is_empty());
    assert!(fleet.reverted_devices().is_empty());
}

#[test]
fn test_probe_quirk_is_accepted() {
    let config = fleet_config(&["r1", "r2"]);
    let fleet = fleet_of(vec![
        ("r1", DeviceScript::ready(5).with_probe(Response::EnvelopeQuirk)),
        ("r2", DeviceScript::ready(5)),
    ]);

    let report = FleetCommitter::new(&config, &fleet)
        .apply(&commands(5))
        .unwrap();
    assert_eq!(report.committed, ["r1", "r2"]);
}

#[test]
fn test_scenario_e_apply_failure_rolls_back_in_commit_order() {
    let config = fleet_config(&["r1", "r2", "r3"]);
    let fleet = fleet_of(vec![
        ("r1", DeviceScript::ready(5)),
        ("r2", DeviceScript::ready(5)),
        (
            "r3",
            DeviceScript::ready(5).with_apply(Response::fail("configuration database locked")),
        ),
    ]);

    let err = FleetCommitter::new(&config, &fleet)
        .apply(&commands(5))
        .unwrap_err();

    match &err {
        RotationError::Apply {
            device,
            rolled_back,
            ..
        } => {
            assert_eq!(device, "r3");
            assert_eq!(rolled_back, &["r1", "r2"]);
        }
        other => panic!("expected apply failure, got {other}"),
    }
    assert_eq!(err.outcome(), keyserver_core::Outcome::Error);
    assert_eq!(fleet.reverted_devices(), ["r1", "r2"]);
    assert!(fleet.calls_for("r3").iter().all(|c| *c != Call::RevertLast));
    assert_eq!(fleet.open_sessions(), 0);
}

#[test]
fn test_apply_failure_on_first_device_rolls_back_nothing() {
    let config = fleet_config(&["r1", "r2"]);
    let fleet = fleet_of(vec![
        ("r1", DeviceScript::ready(5).with_apply(Response::fail("commit failed"))),
        ("r2", DeviceScript::ready(5)),
    ]);

    let err = FleetCommitter::new(&config, &fleet)
        .apply(&commands(5))
        .unwrap_err();
    assert!(matches!(err, RotationError::Apply { ref rolled_back, .. } if rolled_back.is_empty()));
    assert!(fleet.reverted_devices().is_empty());
    assert_eq!(fleet.committed_devices(), ["r1"]);
}

#[test]
fn test_apply_failure_after_k_minus_one_commits() {
    for failing in 1..=4usize {
        let addresses = ["r1", "r2", "r3", "r4"];
        let config = fleet_config(&addresses);
        let fleet = fleet_of(
            addresses
                .iter()
                .enumerate()
                .map(|(i, address)| {
                    let script = DeviceScript::ready(9);
                    let script = if i + 1 == failing {
                        script.with_apply(Response::fail("commit failed"))
                    } else {
                        script
                    };
                    (*address, script)
                })
                .collect(),
        );

        FleetCommitter::new(&config, &fleet)
            .apply(&commands(9))
            .unwrap_err();

        let expected: Vec<String> = addresses[..failing - 1]
            .iter()
            .map(|a| a.to_string())
            .collect();
        assert_eq!(fleet.reverted_devices(), expected, "failing device {failing}");
    }
}

#[test]
fn test_scenario_f_envelope_quirk_counts_as_committed() {
    let config = fleet_config(&["r1", "r2"]);
    let fleet = fleet_of(vec![
        ("r1", DeviceScript::ready(5).with_apply(Response::EnvelopeQuirk)),
        ("r2", DeviceScript::ready(5)),
    ]);

    let report = FleetCommitter::new(&config, &fleet)
        .apply(&commands(5))
        .unwrap();

    assert_eq!(report.committed, ["r1", "r2"]);
    assert_eq!(report.quirk_acknowledged, ["r1"]);
    assert!(fleet.reverted_devices().is_empty());
}

#[test]
fn test_quirked_device_is_rolled_back_on_later_failure() {
    let config = fleet_config(&["r1", "r2"]);
    let fleet = fleet_of(vec![
        ("r1", DeviceScript::ready(5).with_apply(Response::EnvelopeQuirk)),
        ("r2", DeviceScript::ready(5).with_apply(Response::fail("commit failed"))),
    ]);

    let err = FleetCommitter::new(&config, &fleet)
        .apply(&commands(5))
        .unwrap_err();
    assert!(matches!(err, RotationError::Apply { .. }));
    assert_eq!(fleet.reverted_devices(), ["r1"]);
}

#[test]
fn test_rollback_failure_is_combined_and_stops() {
    let config = fleet_config(&["r1", "r2", "r3", "r4"]);
    let fleet = fleet_of(vec![
        ("r1", DeviceScript::ready(5)),
        ("r2", DeviceScript::ready(5).with_revert(Response::fail("rollback 1 missing"))),
        ("r3", DeviceScript::ready(5)),
        ("r4", DeviceScript::ready(5).with_apply(Response::fail("commit failed"))),
    ]);

    let err = FleetCommitter::new(&config, &fleet)
        .apply(&commands(5))
        .unwrap_err();

    match &err {
        RotationError::ApplyRollbackFailed {
            device,
            rollback_device,
            rolled_back,
            ..
        } => {
            assert_eq!(device, "r4");
            assert_eq!(rollback_device, "r2");
            assert_eq!(rolled_back, &["r1"]);
        }
        other => panic!("expected combined failure, got {other}"),
    }
    assert!(err.requires_manual_recovery());
    let message = err.to_string();
    assert!(message.contains("commit failed"));
    assert!(message.contains("rollback 1 missing"));

    // no attempt beyond the first rollback failure
    assert_eq!(fleet.reverted_devices(), ["r1", "r2"]);
}

#[test]
fn test_standalone_rollback() {
    let config = fleet_config(&["r1", "r2", "r3"]);
    let fleet = fleet_of(vec![
        ("r1", DeviceScript::staged(5)),
        ("r2", DeviceScript::staged(5).with_revert(Response::EnvelopeQuirk)),
        ("r3", DeviceScript::staged(5)),
    ]);
    let committer = FleetCommitter::new(&config, &fleet);

    committer
        .rollback(&["r2".to_string(), "r1".to_string()])
        .unwrap();
    assert_eq!(fleet.reverted_devices(), ["r2", "r1"]);
    assert!(fleet.calls_for("r3").is_empty());
}

#[test]
fn test_standalone_rollback_failure() {
    let config = fleet_config(&["r1", "r2"]);
    let fleet = fleet_of(vec![
        ("r1", DeviceScript::unreachable()),
        ("r2", DeviceScript::staged(5)),
    ]);

    let err = FleetCommitter::new(&config, &fleet)
        .rollback(&["r1".to_string(), "r2".to_string()])
        .unwrap_err();
    match err {
        RotationError::Rollback {
            device,
            rolled_back,
            ..
        } => {
            assert_eq!(device, "r1");
            assert!(rolled_back.is_empty());
        }
        other => panic!("expected rollback failure, got {other}"),
    }
    assert!(fleet.calls_for("r2").is_empty());
}
