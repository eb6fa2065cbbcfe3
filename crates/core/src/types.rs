//! Key-chain geometry shared across the workspace

/// Addressable slots in a device key-chain (0..=31)
pub const KEYCHAIN_SLOTS: u8 = 32;

/// Entries generated per rotation: every slot except the active one
pub const RING_LEN: usize = KEYCHAIN_SLOTS as usize - 1;

/// Key-chain slot number
pub type Slot = u8;
