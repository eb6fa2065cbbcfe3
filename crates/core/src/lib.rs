//! Core functionality for the keyserver key-chain rotation system.
//!
//! This crate provides the configuration, error, logging and outcome types
//! shared by the device client, the rotation orchestrator and the node
//! binary.

pub mod config;
pub mod error;
pub mod logging;
pub mod outcome;
pub mod types;

pub use config::{FleetConfig, LogConfig, LogFormat};
pub use error::{ConfigError, LoggingError, Result};
pub use outcome::{LastOutcome, Outcome, OutcomeSink};
pub use types::{Slot, KEYCHAIN_SLOTS, RING_LEN};
