//! Rotation error taxonomy
//!
//! Every variant aborts the cycle it occurs in. [`RotationError::outcome`]
//! decides whether the cycle is reported as an error or a warning.

#![warn(missing_docs)]

use crate::renderer::RenderError;
use keyserver_core::{Outcome, Slot};
use keyserver_crypto::RingError;
use keyserver_device::DeviceError;
use thiserror::Error;

/// Fleet state that rules out a rotation decision
#[derive(Debug, Error)]
pub enum ConsistencyError {
    /// One device reports different send and receive keys
    #[error("differing send ({send}) and receive ({receive}) keys on {device}")]
    SendReceiveMismatch {
        /// Device address
        device: String,
        /// Active send key as reported
        send: String,
        /// Active receive key as reported
        receive: String,
    },

    /// Devices disagree on the active slot
    #[error("keychains unsynchronized: active slots {}", format_slots(.slots))]
    Unsynchronized {
        /// Active slot per device, in configured order
        slots: Vec<(String, Slot)>,
    },

    /// Some but not all devices have no key staged
    #[error("not all devices ready for new keys: {} of {total} ready", .ready.len())]
    NotAllReady {
        /// Devices that are ready
        ready: Vec<String>,
        /// Devices that answered
        total: usize,
    },
}

fn format_slots(slots: &[(String, Slot)]) -> String {
    slots
        .iter()
        .map(|(device, slot)| format!("{device}={slot}"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Errors that abort a rotation cycle
#[derive(Debug, Error)]
pub enum RotationError {
    /// Device unreachable or a status query failed in transit
    #[error("{stage} failed on {device}: {source}")]
    Connection {
        /// Device address
        device: String,
        /// Step that failed
        stage: &'static str,
        /// Client error
        source: DeviceError,
    },

    /// Device violates a precondition for trusting its state
    #[error("precondition failed on {device}: {reason}")]
    Precondition {
        /// Device address
        device: String,
        /// What was violated
        reason: String,
    },

    /// Status reply missing a field or holding a malformed one
    #[error("status parse error on {device}: {reason}")]
    Parse {
        /// Device address
        device: String,
        /// What could not be read
        reason: String,
    },

    /// Fleet state is ambiguous
    #[error(transparent)]
    Consistency(#[from] ConsistencyError),

    /// Fewer replies than configured devices
    #[error("didn't get a reply from all devices: {got} of {expected}")]
    PartialResponse {
        /// Configured device count
        expected: usize,
        /// Devices that answered
        got: usize,
    },

    /// Key material could not be generated
    #[error("key generation failed: {0}")]
    Generation(#[from] RingError),

    /// Key material could not be rendered into statements
    #[error("rendering failed: {0}")]
    Render(#[from] RenderError),

    /// Dry-run validation rejected the batch; no device was changed
    #[error("commit check failed on {device}: {source}")]
    Probe {
        /// Device address
        device: String,
        /// Client error
        source: DeviceError,
    },

    /// Apply failed and every committed device was rolled back
    #[error("apply failed on {device}: {source}")]
    Apply {
        /// Device that failed
        device: String,
        /// Client error
        source: DeviceError,
        /// Devices reverted, in commit order
        rolled_back: Vec<String>,
    },

    /// Apply failed and the rollback failed too; manual recovery required
    #[error(
        "apply failed on {device}: {source}; rollback failed on {rollback_device}: \
         {rollback_source}; fleet requires manual recovery"
    )]
    ApplyRollbackFailed {
        /// Device that failed to apply
        device: String,
        /// Apply error
        source: DeviceError,
        /// Device that failed to revert
        rollback_device: String,
        /// Revert error
        rollback_source: DeviceError,
        /// Devices reverted before the rollback failure
        rolled_back: Vec<String>,
    },

    /// A standalone rollback failed
    #[error("rollback failed on {device}: {source}")]
    Rollback {
        /// Device that failed to revert
        device: String,
        /// Client error
        source: DeviceError,
        /// Devices reverted before the failure
        rolled_back: Vec<String>,
    },
}

impl RotationError {
    /// Outcome a cycle aborted by this error reports
    pub fn outcome(&self) -> Outcome {
        match self {
            RotationError::PartialResponse { .. }
            | RotationError::Generation(_)
            | RotationError::Render(_) => Outcome::Warning,
            _ => Outcome::Error,
        }
    }

    /// Cycle stage the error belongs to, for log fields
    pub fn stage(&self) -> &'static str {
        match self {
            RotationError::Connection { .. }
            | RotationError::Precondition { .. }
            | RotationError::Parse { .. }
            | RotationError::Consistency(_)
            | RotationError::PartialResponse { .. } => "status",
            RotationError::Generation(_) => "generate",
            RotationError::Render(_) => "render",
            RotationError::Probe { .. } => "probe",
            RotationError::Apply { .. } | RotationError::ApplyRollbackFailed { .. } => "apply",
            RotationError::Rollback { .. } => "rollback",
        }
    }

    /// Device the error is attributed to, if any
    pub fn device(&self) -> Option<&str> {
        match self {
            RotationError::Connection { device, .. }
            | RotationError::Precondition { device, .. }
            | RotationError::Parse { device, .. }
            | RotationError::Probe { device, .. }
            | RotationError::Apply { device, .. }
            | RotationError::ApplyRollbackFailed { device, .. }
            | RotationError::Rollback { device, .. } => Some(device),
            RotationError::Consistency(ConsistencyError::SendReceiveMismatch { device, .. }) => {
                Some(device)
            }
            _ => None,
        }
    }

    /// True when the fleet may be left inconsistent
    pub fn requires_manual_recovery(&self) -> bool {
        matches!(
            self,
            RotationError::ApplyRollbackFailed { .. } | RotationError::Rollback { .. }
        )
    }
}
