//! Key material generation for the keyserver.
//!
//! This crate produces the secret material that is pushed into device
//! key-chains during a rotation.
//!
//! # Security Principles
//!
//! - Never roll custom cryptographic primitives
//! - Draw only from a cryptographically secure RNG, never fall back
//! - Secrets must never be logged or hardcoded
//! - Key material is zeroized when dropped

pub mod ring;

pub use ring::{KeyMaterial, KeyRing, RingError, RingResult, SECRET_LEN, START_TIME_FORMAT};
