//! Key ring to configuration statements
//!
//! A key-chain has [`KEYCHAIN_SLOTS`] slots. One is active and must not be
//! touched; the ring's [`RING_LEN`] entries fill all the others. Ring
//! position `i` lands in slot `i` below the active slot and in slot `i + 1`
//! from the active slot upwards, so the mapping skips exactly the active
//! slot whatever its value.

use keyserver_core::{Slot, KEYCHAIN_SLOTS, RING_LEN};
use keyserver_crypto::KeyRing;
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;
use zeroize::Zeroizing;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RenderError {
    #[error("active slot {0} outside 0..{KEYCHAIN_SLOTS}")]
    ActiveSlotOutOfRange(Slot),

    #[error("key ring has {got} entries, expected {expected}")]
    RingLength { expected: usize, got: usize },

    #[error("key ring was generated for active slot {ring}, asked to render around {requested}")]
    SlotMismatch { ring: Slot, requested: Slot },
}

/// Device slot receiving ring position `position` when `active` is live.
///
/// `position` must be below [`RING_LEN`].
pub fn slot_for_position(position: usize, active: Slot) -> Slot {
    debug_assert!(position < RING_LEN);
    if position < usize::from(active) {
        position as Slot
    } else {
        (position + 1) as Slot
    }
}

/// Per-slot key attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum KeyAttribute {
    Secret,
    KeyName,
    StartTime,
}

impl KeyAttribute {
    pub fn as_str(self) -> &'static str {
        match self {
            KeyAttribute::Secret => "secret",
            KeyAttribute::KeyName => "key-name",
            KeyAttribute::StartTime => "start-time",
        }
    }
}

/// One attribute assignment for one slot.
#[derive(Clone, PartialEq, Eq)]
pub struct Statement {
    slot: Slot,
    attribute: KeyAttribute,
    value: Zeroizing<String>,
}

impl Statement {
    pub fn slot(&self) -> Slot {
        self.slot
    }

    pub fn attribute(&self) -> KeyAttribute {
        self.attribute
    }

    /// Configuration line setting this attribute on `keychain`
    pub fn line(&self, keychain: &str) -> String {
        format!(
            "set security authentication-key-chains key-chain {keychain} key {} {} {}",
            self.slot,
            self.attribute.as_str(),
            self.value.as_str()
        )
    }
}

impl fmt::Debug for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self.attribute {
            KeyAttribute::Secret => "<redacted>",
            _ => self.value.as_str(),
        };
        f.debug_struct("Statement")
            .field("slot", &self.slot)
            .field("attribute", &self.attribute)
            .field("value", &value)
            .finish()
    }
}

/// Ordered statements for one rotation, applied as one batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandList {
    keychain: String,
    statements: Vec<Statement>,
}

impl CommandList {
    pub fn statements(&self) -> &[Statement] {
        &self.statements
    }

    pub fn len(&self) -> usize {
        self.statements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    /// Configuration lines in statement order. The buffer is wiped on drop
    /// because it carries secrets.
    pub fn lines(&self) -> Zeroizing<Vec<String>> {
        Zeroizing::new(
            self.statements
                .iter()
                .map(|statement| statement.line(&self.keychain))
                .filter(|line| !line.trim().is_empty())
                .collect(),
        )
    }

    /// Distinct slots written by this batch
    pub fn slots(&self) -> BTreeSet<Slot> {
        self.statements.iter().map(Statement::slot).collect()
    }
}

/// Renders key rings for one key-chain.
#[derive(Debug, Clone)]
pub struct ConfigRenderer {
    keychain: String,
}

impl ConfigRenderer {
    pub fn new(keychain: impl Into<String>) -> Self {
        Self {
            keychain: keychain.into(),
        }
    }

    pub fn render(&self, ring: &KeyRing, active_slot: Slot) -> Result<CommandList, RenderError> {
        if active_slot >= KEYCHAIN_SLOTS {
            return Err(RenderError::ActiveSlotOutOfRange(active_slot));
        }
        if ring.len() != RING_LEN {
            return Err(RenderError::RingLength {
                expected: RING_LEN,
                got: ring.len(),
            });
        }
        if ring.active_slot() != active_slot {
            return Err(RenderError::SlotMismatch {
                ring: ring.active_slot(),
                requested: active_slot,
            });
        }

        let mut statements = Vec::with_capacity(RING_LEN * 3);
        for position in 0..ring.len() {
            let slot = slot_for_position(position, active_slot);
            let values = [
                (KeyAttribute::Secret, ring.secrets()[position].expose().to_string()),
                (KeyAttribute::KeyName, ring.names()[position].expose().to_string()),
                (
                    KeyAttribute::StartTime,
                    ring.activation_string(position).unwrap_or_default(),
                ),
            ];
            for (attribute, value) in values {
                let value = Zeroizing::new(value);
                if value.trim().is_empty() {
                    continue;
                }
                statements.push(Statement {
                    slot,
                    attribute,
                    value,
                });
            }
        }

        tracing::debug!(
            keychain = %self.keychain,
            active_slot,
            statements = statements.len(),
            "rendered key ring"
        );

        Ok(CommandList {
            keychain: self.keychain.clone(),
            statements,
        })
    }
}
