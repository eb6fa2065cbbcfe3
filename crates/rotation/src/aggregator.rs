//! Fleet status aggregation
//!
//! Every device is read in configured order and reduced to a
//! [`DeviceKeyState`]. The rotation decision is then a pure fold over those
//! states ([`evaluate_fleet`]), so the fleet rules can be tested without a
//! network.
//!
//! Any single device failure aborts the whole read: a rotation decision is
//! never made on a partial or ambiguous view of the fleet.

use crate::error::{ConsistencyError, RotationError};
use crate::session::with_session;
use keyserver_core::{FleetConfig, Slot, KEYCHAIN_SLOTS};
use keyserver_device::{
    DeviceConnector, DeviceSession, KeychainStatus, TimeSource, KEYCHAIN_COMMAND, UPTIME_COMMAND,
};
use serde::Serialize;

/// Value a device reports for a "next" field when nothing is staged.
/// Compared case-insensitively after trimming, so `none` and `NONE` also
/// read as unstaged.
const NONE_SENTINEL: &str = "none";

/// Key-chain state of one device for one cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceKeyState {
    pub address: String,
    /// Agreed active send and receive slot
    pub active_slot: Slot,
    /// Staged next send key, `None` for the sentinel
    pub next_send: Option<String>,
    pub next_receive: Option<String>,
    pub next_key_time: Option<String>,
}

impl DeviceKeyState {
    /// Validate raw key-chain fields reported by `address`.
    pub fn from_status(address: &str, status: KeychainStatus) -> Result<Self, RotationError> {
        let missing = |field: &str| RotationError::Parse {
            device: address.to_string(),
            reason: format!("key-chain {} has no {field}", status.name),
        };

        let send = status
            .active_send_key
            .clone()
            .ok_or_else(|| missing("active send key"))?;
        let receive = status
            .active_receive_key
            .clone()
            .ok_or_else(|| missing("active receive key"))?;
        let next_send = status
            .next_send_key
            .clone()
            .ok_or_else(|| missing("next send key"))?;
        let next_receive = status
            .next_receive_key
            .clone()
            .ok_or_else(|| missing("next receive key"))?;
        let next_key_time = status
            .next_key_time
            .clone()
            .ok_or_else(|| missing("next key time"))?;

        if send != receive {
            return Err(ConsistencyError::SendReceiveMismatch {
                device: address.to_string(),
                send,
                receive,
            }
            .into());
        }

        let active_slot = send
            .parse::<Slot>()
            .ok()
            .filter(|slot| *slot < KEYCHAIN_SLOTS)
            .ok_or_else(|| RotationError::Parse {
                device: address.to_string(),
                reason: format!("active key {send:?} is not a slot in 0..{KEYCHAIN_SLOTS}"),
            })?;

        Ok(Self {
            address: address.to_string(),
            active_slot,
            next_send: staged(next_send),
            next_receive: staged(next_receive),
            next_key_time: staged(next_key_time),
        })
    }

    /// Ready for new keys: nothing is staged in any "next" field
    pub fn is_ready(&self) -> bool {
        self.next_send.is_none() && self.next_receive.is_none() && self.next_key_time.is_none()
    }
}

fn staged(value: String) -> Option<String> {
    if value.eq_ignore_ascii_case(NONE_SENTINEL) {
        None
    } else {
        Some(value)
    }
}

/// Fleet-wide rotation decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FleetVerdict {
    pub needs_rotation: bool,
    /// Active slot every device agrees on
    pub active_slot: Slot,
    pub responding_devices: usize,
}

/// Verdict together with the per-device states it was derived from.
#[derive(Debug, Clone, Serialize)]
pub struct FleetStatus {
    pub verdict: FleetVerdict,
    pub devices: Vec<DeviceKeyState>,
}

/// Decide whether the fleet needs a rotation.
///
/// Checks run in order: every device on the same active slot, one state
/// per configured device, then uniform readiness.
pub fn evaluate_fleet(
    expected: usize,
    states: &[DeviceKeyState],
) -> Result<FleetVerdict, RotationError> {
    let first = states.first().ok_or(RotationError::PartialResponse { expected, got: 0 })?;

    if states.iter().any(|state| state.active_slot != first.active_slot) {
        return Err(ConsistencyError::Unsynchronized {
            slots: states
                .iter()
                .map(|state| (state.address.clone(), state.active_slot))
                .collect(),
        }
        .into());
    }

    if states.len() != expected {
        return Err(RotationError::PartialResponse {
            expected,
            got: states.len(),
        });
    }

    let ready: Vec<String> = states
        .iter()
        .filter(|state| state.is_ready())
        .map(|state| state.address.clone())
        .collect();

    let needs_rotation = if ready.is_empty() {
        false
    } else if ready.len() == states.len() {
        true
    } else {
        return Err(ConsistencyError::NotAllReady {
            ready,
            total: states.len(),
        }
        .into());
    };

    Ok(FleetVerdict {
        needs_rotation,
        active_slot: first.active_slot,
        responding_devices: states.len(),
    })
}

/// Reads key-chain state from every configured device.
pub struct StatusAggregator<'a, C> {
    config: &'a FleetConfig,
    connector: &'a C,
}

impl<'a, C: DeviceConnector> StatusAggregator<'a, C> {
    pub fn new(config: &'a FleetConfig, connector: &'a C) -> Self {
        Self { config, connector }
    }

    /// Read the whole fleet and decide whether a rotation is due.
    pub fn get_fleet_status(&self) -> Result<FleetStatus, RotationError> {
        let devices = self
            .config
            .devices
            .iter()
            .map(|address| self.read_device(address))
            .collect::<Result<Vec<_>, _>>()?;

        let verdict = evaluate_fleet(self.config.device_count(), &devices)?;

        tracing::info!(
            needs_rotation = verdict.needs_rotation,
            active_slot = verdict.active_slot,
            responding = verdict.responding_devices,
            "fleet status evaluated"
        );

        Ok(FleetStatus { verdict, devices })
    }

    /// Read and validate the key-chain state of one device.
    pub fn read_device(&self, address: &str) -> Result<DeviceKeyState, RotationError> {
        let keychain = self.config.keychain.as_str();

        let state = with_session(
            self.connector,
            address,
            |source| RotationError::Connection {
                device: address.to_string(),
                stage: "connect",
                source,
            },
            |session| {
                if self.config.ntp {
                    check_time_source(session, address)?;
                }

                let reply = session
                    .query(KEYCHAIN_COMMAND)
                    .map_err(|source| RotationError::Connection {
                        device: address.to_string(),
                        stage: "keychain query",
                        source,
                    })?;

                let status = KeychainStatus::from_reply(&reply, keychain).ok_or_else(|| {
                    RotationError::Parse {
                        device: address.to_string(),
                        reason: format!("device reports no key-chain named {keychain}"),
                    }
                })?;

                DeviceKeyState::from_status(address, status)
            },
        )?;

        tracing::debug!(
            device = %address,
            active_slot = state.active_slot,
            ready = state.is_ready(),
            "read device key-chain"
        );

        Ok(state)
    }
}

fn check_time_source<S: DeviceSession>(session: &mut S, address: &str) -> Result<(), RotationError> {
    let reply = session
        .query(UPTIME_COMMAND)
        .map_err(|source| RotationError::Connection {
            device: address.to_string(),
            stage: "time-source query",
            source,
        })?;

    match TimeSource::from_reply(&reply) {
        Some(source) if source.is_ntp() => Ok(()),
        Some(source) => Err(RotationError::Precondition {
            device: address.to_string(),
            reason: format!("time source is {}, NTP synchronization required", source.label),
        }),
        // an absent time-source is never taken as NTP being in sync
        None => Err(RotationError::Precondition {
            device: address.to_string(),
            reason: "no time source reported, NTP synchronization cannot be confirmed"
                .to_string(),
        }),
    }
}
