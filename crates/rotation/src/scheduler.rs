//! Rotation loop
//!
//! One cycle reads the fleet, and when every device is ready generates,
//! renders and applies a new key ring. Each cycle records exactly one
//! [`Outcome`]. Cycles never overlap: the next one starts only after the
//! previous one finished and the cycle period elapsed.
//!
//! Device I/O is blocking, so [`KeyServer::run`] executes each cycle on
//! tokio's blocking pool and only waits on the async side. Shutdown is
//! checked between cycles; a cycle that already started always runs to the
//! end so an apply pass is never cut short before its rollback.

use crate::aggregator::StatusAggregator;
use crate::committer::FleetCommitter;
use crate::error::RotationError;
use crate::renderer::ConfigRenderer;
use keyserver_core::{FleetConfig, Outcome, OutcomeSink, Slot};
use keyserver_crypto::KeyRing;
use keyserver_device::DeviceConnector;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// What a cycle did
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum CycleAction {
    /// Keys already staged on every device
    NoRotationDue { active_slot: Slot },
    /// New ring committed on every device
    Rotated {
        active_slot: Slot,
        devices: Vec<String>,
    },
    /// Cycle stopped on an error before completing
    Aborted,
}

/// Summary of one cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub outcome: Outcome,
    pub action: CycleAction,
    pub error: Option<String>,
}

/// Periodic key rotation over one fleet.
pub struct KeyServer<C, S> {
    config: FleetConfig,
    connector: C,
    sink: S,
    cycle_period: Duration,
}

impl<C, S> KeyServer<C, S>
where
    C: DeviceConnector,
    S: OutcomeSink,
{
    pub fn new(config: FleetConfig, connector: C, sink: S) -> Self {
        let cycle_period = config.cycle_period();
        Self {
            config,
            connector,
            sink,
            cycle_period,
        }
    }

    /// Override the sleep between cycles
    pub fn with_cycle_period(mut self, period: Duration) -> Self {
        self.cycle_period = period;
        self
    }

    pub fn cycle_period(&self) -> Duration {
        self.cycle_period
    }

    /// Run one cycle to completion and record its outcome.
    pub fn run_cycle(&self) -> CycleReport {
        let report = match self.rotate() {
            Ok(action) => CycleReport {
                outcome: Outcome::Success,
                action,
                error: None,
            },
            Err(e) => {
                let outcome = e.outcome();
                if e.requires_manual_recovery() {
                    tracing::error!(
                        stage = e.stage(),
                        device = e.device().unwrap_or("-"),
                        error = %e,
                        "rotation aborted, fleet requires manual recovery"
                    );
                } else if outcome == Outcome::Warning {
                    tracing::warn!(
                        stage = e.stage(),
                        device = e.device().unwrap_or("-"),
                        error = %e,
                        "rotation cycle aborted"
                    );
                } else {
                    tracing::error!(
                        stage = e.stage(),
                        device = e.device().unwrap_or("-"),
                        error = %e,
                        "rotation cycle aborted"
                    );
                }
                CycleReport {
                    outcome,
                    action: CycleAction::Aborted,
                    error: Some(e.to_string()),
                }
            }
        };

        self.sink.record_outcome(report.outcome);
        tracing::info!(outcome = %report.outcome, "rotation cycle finished");
        report
    }

    fn rotate(&self) -> Result<CycleAction, RotationError> {
        let status = StatusAggregator::new(&self.config, &self.connector).get_fleet_status()?;
        let active_slot = status.verdict.active_slot;

        if !status.verdict.needs_rotation {
            tracing::info!(active_slot, "keys already staged, no rotation due");
            return Ok(CycleAction::NoRotationDue { active_slot });
        }

        let ring = KeyRing::generate(active_slot, self.config.interval)?;
        let commands =
            ConfigRenderer::new(self.config.keychain.as_str()).render(&ring, active_slot)?;
        drop(ring);

        let report = FleetCommitter::new(&self.config, &self.connector).apply(&commands)?;
        tracing::info!(
            active_slot,
            devices = report.committed.len(),
            "rotation applied"
        );

        Ok(CycleAction::Rotated {
            active_slot,
            devices: report.committed,
        })
    }
}

impl<C, S> KeyServer<C, S>
where
    C: DeviceConnector + 'static,
    S: OutcomeSink + 'static,
{
    /// Run cycles until `shutdown` turns true or its sender is dropped.
    /// The first cycle starts immediately. Returns the number of cycles run.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> u64 {
        tracing::info!(
            devices = self.config.device_count(),
            keychain = %self.config.keychain,
            period_secs = self.cycle_period.as_secs(),
            activation_interval_secs = self.config.rotation_interval().as_secs(),
            "rotation loop started"
        );

        let mut cycles = 0u64;
        while !*shutdown.borrow() {
            let server = Arc::clone(&self);
            if let Err(e) = tokio::task::spawn_blocking(move || server.run_cycle()).await {
                tracing::error!(error = %e, "rotation cycle task failed");
                self.sink.record_outcome(Outcome::Error);
            }
            cycles += 1;

            tokio::select! {
                _ = tokio::time::sleep(self.cycle_period) => {}
                _ = wait_for_shutdown(&mut shutdown) => break,
            }
        }

        tracing::info!(cycles, "rotation loop stopped");
        cycles
    }
}

async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}
