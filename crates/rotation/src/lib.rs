//! Key-chain rotation orchestration.
//!
//! A cycle flows through four stages:
//!
//! - [`aggregator`]: read every device and decide whether rotation is due
//! - [`KeyRing`](keyserver_crypto::KeyRing) generation (in `keyserver-crypto`)
//! - [`renderer`]: map ring entries onto every slot except the active one
//! - [`committer`]: probe, then apply with ordered rollback
//!
//! [`scheduler::KeyServer`] ties them together and records one
//! [`Outcome`](keyserver_core::Outcome) per cycle.

pub mod aggregator;
pub mod committer;
pub mod error;
pub mod renderer;
pub mod scheduler;
mod session;

pub use aggregator::{
    evaluate_fleet, DeviceKeyState, FleetStatus, FleetVerdict, StatusAggregator,
};
pub use committer::{is_benign_apply_quirk, Ack, CommitProgress, CommitReport, FleetCommitter};
pub use error::{ConsistencyError, RotationError};
pub use renderer::{
    slot_for_position, CommandList, ConfigRenderer, KeyAttribute, RenderError, Statement,
};
pub use scheduler::{CycleAction, CycleReport, KeyServer};
