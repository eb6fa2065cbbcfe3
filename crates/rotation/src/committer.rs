//! Two-phase fleet update with ordered rollback
//!
//! The probe pass dry-runs the batch on every device; a probe failure
//! aborts before any device is changed. The apply pass commits device by
//! device in configured order, and a failure reverts the devices already
//! committed, in the order they were committed. Rollback stops at the first
//! device that cannot be reverted and never retries.

use crate::error::RotationError;
use crate::renderer::CommandList;
use crate::session::with_session;
use keyserver_core::FleetConfig;
use keyserver_device::{DeviceConnector, DeviceError, DeviceResult, DeviceSession, LoadAction};
use serde::Serialize;

/// Whether `error` is the envelope mismatch some devices send after a
/// successful commit: `<ok/>` where `<commit-results>` is expected.
pub fn is_benign_apply_quirk(error: &DeviceError) -> bool {
    matches!(
        error,
        DeviceError::UnexpectedEnvelope { expected, found }
            if expected == "commit-results" && found == "ok"
    )
}

/// How a device acknowledged an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ack {
    Clean,
    /// Accepted, but with the benign envelope mismatch
    EnvelopeQuirk,
}

fn acknowledge(result: DeviceResult<()>) -> DeviceResult<Ack> {
    match result {
        Ok(()) => Ok(Ack::Clean),
        Err(e) if is_benign_apply_quirk(&e) => Ok(Ack::EnvelopeQuirk),
        Err(e) => Err(e),
    }
}

fn log_ack(device: &str, stage: &'static str, ack: Ack) {
    match ack {
        Ack::Clean => tracing::info!(device = %device, stage, "device acknowledged"),
        Ack::EnvelopeQuirk => tracing::warn!(
            device = %device,
            stage,
            quirk = true,
            "device acknowledged with unexpected reply envelope, treating as success"
        ),
    }
}

/// Devices committed so far in one apply pass, in commit order.
#[derive(Debug, Default)]
pub struct CommitProgress {
    committed: Vec<String>,
    quirked: Vec<String>,
}

impl CommitProgress {
    pub fn record(&mut self, device: &str, ack: Ack) {
        self.committed.push(device.to_string());
        if ack == Ack::EnvelopeQuirk {
            self.quirked.push(device.to_string());
        }
    }

    pub fn committed(&self) -> &[String] {
        &self.committed
    }

    pub fn into_report(self) -> CommitReport {
        CommitReport {
            committed: self.committed,
            quirk_acknowledged: self.quirked,
        }
    }
}

/// Result of a completed apply pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CommitReport {
    pub committed: Vec<String>,
    /// Subset of `committed` acknowledged through the envelope quirk
    pub quirk_acknowledged: Vec<String>,
}

struct RollbackFailure {
    device: String,
    source: DeviceError,
    rolled_back: Vec<String>,
}

/// Applies command batches across the configured fleet.
pub struct FleetCommitter<'a, C> {
    config: &'a FleetConfig,
    connector: &'a C,
}

impl<'a, C: DeviceConnector> FleetCommitter<'a, C> {
    pub fn new(config: &'a FleetConfig, connector: &'a C) -> Self {
        Self { config, connector }
    }

    /// Probe every device, then commit `commands` on every device.
    pub fn apply(&self, commands: &CommandList) -> Result<CommitReport, RotationError> {
        let lines = commands.lines();

        for device in &self.config.devices {
            let ack = self.probe(device, &lines).map_err(|source| {
                tracing::error!(
                    device = %device,
                    stage = "probe",
                    error = %source,
                    "commit check failed, no device changed"
                );
                RotationError::Probe {
                    device: device.clone(),
                    source,
                }
            })?;
            log_ack(device, "probe", ack);
        }

        let mut progress = CommitProgress::default();
        for device in &self.config.devices {
            match self.commit(device, &lines) {
                Ok(ack) => {
                    log_ack(device, "apply", ack);
                    progress.record(device, ack);
                }
                Err(source) => {
                    tracing::error!(
                        device = %device,
                        stage = "apply",
                        error = %source,
                        committed = progress.committed().len(),
                        "apply failed, rolling back committed devices"
                    );
                    return Err(match self.revert_all(progress.committed()) {
                        Ok(rolled_back) => RotationError::Apply {
                            device: device.clone(),
                            source,
                            rolled_back,
                        },
                        Err(failure) => RotationError::ApplyRollbackFailed {
                            device: device.clone(),
                            source,
                            rollback_device: failure.device,
                            rollback_source: failure.source,
                            rolled_back: failure.rolled_back,
                        },
                    });
                }
            }
        }

        let report = progress.into_report();
        tracing::info!(
            devices = report.committed.len(),
            quirks = report.quirk_acknowledged.len(),
            statements = commands.len(),
            "batch committed on all devices"
        );
        Ok(report)
    }

    /// Revert the last commit on each of `devices`, in order.
    pub fn rollback(&self, devices: &[String]) -> Result<(), RotationError> {
        self.revert_all(devices)
            .map(|_| ())
            .map_err(|failure| RotationError::Rollback {
                device: failure.device,
                source: failure.source,
                rolled_back: failure.rolled_back,
            })
    }

    fn revert_all(&self, devices: &[String]) -> Result<Vec<String>, RollbackFailure> {
        let mut rolled_back = Vec::with_capacity(devices.len());
        for device in devices {
            match self.revert(device) {
                Ok(ack) => {
                    log_ack(device, "rollback", ack);
                    rolled_back.push(device.clone());
                }
                Err(source) => {
                    tracing::error!(
                        device = %device,
                        stage = "rollback",
                        error = %source,
                        rolled_back = rolled_back.len(),
                        "rollback failed, fleet requires manual recovery"
                    );
                    return Err(RollbackFailure {
                        device: device.clone(),
                        source,
                        rolled_back,
                    });
                }
            }
        }
        Ok(rolled_back)
    }

    fn probe(&self, device: &str, lines: &[String]) -> DeviceResult<Ack> {
        with_session(self.connector, device, |e| e, |session| {
            acknowledge(session.commit_check(lines))
        })
    }

    fn commit(&self, device: &str, lines: &[String]) -> DeviceResult<Ack> {
        with_session(self.connector, device, |e| e, |session| {
            acknowledge(session.apply_config(lines, LoadAction::Set, true))
        })
    }

    fn revert(&self, device: &str) -> DeviceResult<Ack> {
        with_session(self.connector, device, |e| e, |session| {
            acknowledge(session.revert_last())
        })
    }
}
