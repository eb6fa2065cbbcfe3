//! Key ring generation for key-chain rotation.
//!
//! A rotation replaces every key-chain slot except the active one, so a
//! ring holds exactly [`RING_LEN`] entries. Each entry carries:
//!
//! - a secret: 32 bytes from the OS CSPRNG, hex-encoded
//! - a key name: a second, independent 32-byte draw, hex-encoded
//! - an activation time: `now + (i + 1) * interval`
//!
//! The activation schedule is strictly increasing: the first new key
//! activates one interval from now and each further key one interval
//! after its predecessor.
//!
//! # Entropy
//!
//! Generation draws exclusively from a [`CryptoRng`]. A failed draw aborts
//! the whole ring; there is no fallback to a weaker source.

use chrono::{Local, NaiveDateTime, TimeDelta};
use keyserver_core::{Slot, RING_LEN};
use rand::rngs::OsRng;
use rand::{CryptoRng, RngCore};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Raw length of one secret or key name, in bytes.
pub const SECRET_LEN: usize = 32;

/// Activation time format understood by the key-chain `start-time` attribute.
pub const START_TIME_FORMAT: &str = "%Y-%m-%d.%H:%M:%S";

/// Key ring generation errors.
#[derive(Debug, thiserror::Error)]
pub enum RingError {
    #[error("Entropy source unavailable: {0}")]
    EntropyUnavailable(String),

    #[error("Invalid rotation interval: {0}")]
    InvalidInterval(String),

    #[error("Activation schedule overflows the calendar range")]
    ScheduleOverflow,
}

/// Result type for ring generation.
pub type RingResult<T> = Result<T, RingError>;

/// Hex-encoded key material, zeroized on drop.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct KeyMaterial(String);

impl KeyMaterial {
    /// Draw [`SECRET_LEN`] fresh bytes from `rng`.
    pub fn random<R: RngCore + CryptoRng>(rng: &mut R) -> RingResult<Self> {
        let mut bytes = [0u8; SECRET_LEN];
        let drawn = rng
            .try_fill_bytes(&mut bytes)
            .map_err(|e| RingError::EntropyUnavailable(e.to_string()));
        let material = drawn.map(|()| Self(hex::encode(bytes)));
        bytes.zeroize();
        material
    }

    /// The hex string. Callers must not log it.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("KeyMaterial(<redacted>)")
    }
}

/// Freshly generated rotation material for one cycle.
///
/// The three sequences are index-aligned and always [`RING_LEN`] long.
#[derive(Debug, Clone)]
pub struct KeyRing {
    active_slot: Slot,
    secrets: Vec<KeyMaterial>,
    names: Vec<KeyMaterial>,
    activations: Vec<NaiveDateTime>,
}

impl KeyRing {
    /// Generate a ring around `active_slot` from the OS RNG, scheduled
    /// relative to the local wall clock.
    pub fn generate(active_slot: Slot, interval_hours: u32) -> RingResult<Self> {
        Self::generate_with(
            &mut OsRng,
            Local::now().naive_local(),
            active_slot,
            interval_hours,
        )
    }

    /// Generate with an explicit RNG and start instant.
    pub fn generate_with<R: RngCore + CryptoRng>(
        rng: &mut R,
        now: NaiveDateTime,
        active_slot: Slot,
        interval_hours: u32,
    ) -> RingResult<Self> {
        if interval_hours == 0 {
            return Err(RingError::InvalidInterval(
                "interval must be at least one hour".to_string(),
            ));
        }
        let step = TimeDelta::try_hours(i64::from(interval_hours))
            .ok_or(RingError::ScheduleOverflow)?;

        let mut secrets = Vec::with_capacity(RING_LEN);
        let mut names = Vec::with_capacity(RING_LEN);
        let mut activations = Vec::with_capacity(RING_LEN);

        let mut next = now;
        for _ in 0..RING_LEN {
            secrets.push(KeyMaterial::random(rng)?);
            names.push(KeyMaterial::random(rng)?);

            next = next
                .checked_add_signed(step)
                .ok_or(RingError::ScheduleOverflow)?;
            activations.push(next);
        }

        tracing::debug!(
            active_slot,
            entries = RING_LEN,
            first_activation = %activations[0],
            "generated key ring"
        );

        Ok(Self {
            active_slot,
            secrets,
            names,
            activations,
        })
    }

    /// Slot that was active when the ring was generated
    pub fn active_slot(&self) -> Slot {
        self.active_slot
    }

    pub fn len(&self) -> usize {
        self.secrets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.secrets.is_empty()
    }

    pub fn secrets(&self) -> &[KeyMaterial] {
        &self.secrets
    }

    pub fn names(&self) -> &[KeyMaterial] {
        &self.names
    }

    pub fn activations(&self) -> &[NaiveDateTime] {
        &self.activations
    }

    /// Activation time of ring position `index` in [`START_TIME_FORMAT`]
    pub fn activation_string(&self, index: usize) -> Option<String> {
        self.activations
            .get(index)
            .map(|at| at.format(START_TIME_FORMAT).to_string())
    }
}
