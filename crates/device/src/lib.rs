//! Device access for the keyserver.
//!
//! This crate defines the session boundary the rotation core depends on
//! ([`DeviceConnector`], [`DeviceSession`]) and ships the production
//! implementation: NETCONF over SSH, speaking the Junos dialect.
//!
//! # Components
//!
//! - [`client`]: boundary traits and [`StructuredReply`]
//! - [`status`]: key-chain and time-source field extraction
//! - [`netconf`]: framing, RPC construction and reply classification
//! - [`ssh`]: `ssh2` transport and [`SshConnector`]

pub mod client;
pub mod error;
pub mod netconf;
pub mod ssh;
pub mod status;

pub use client::{DeviceConnector, DeviceSession, LoadAction, StructuredReply};
pub use error::{DeviceError, DeviceResult};
pub use netconf::{NetconfSession, NetconfTransport};
pub use ssh::{SshConnector, SshTransport};
pub use status::{KeychainStatus, TimeSource, KEYCHAIN_COMMAND, UPTIME_COMMAND};
