//! 32-byte hash primitive.

use sbor::prelude::BasicSbor;
use sha2::{Digest, Sha256};
use std::fmt;
use thiserror::Error;

/// A 32-byte SHA-256 hash.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, BasicSbor)]
pub struct Hash([u8; 32]);

/// Errors from parsing a hash out of hex.
#[derive(Debug, Error)]
pub enum HexError {
    #[error("invalid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),
    #[error("expected 32 bytes, got {0}")]
    WrongLength(usize),
}

impl Hash {
    /// The all-zero hash. Used as "absent" in optional hash fields.
    pub const ZERO: Hash = Hash([0u8; 32]);

    /// Hash arbitrary bytes with SHA-256.
    pub fn of(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        Hash(hasher.finalize().into())
    }

    /// Wrap raw hash bytes without hashing.
    pub fn from_hash_bytes(bytes: [u8; 32]) -> Self {
        Hash(bytes)
    }

    /// Parse from a 64-character hex string.
    pub fn from_hex(s: &str) -> Result<Self, HexError> {
        let bytes = hex::decode(s)?;
        let arr: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| HexError::WrongLength(bytes.len()))?;
        Ok(Hash(arr))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        *self == Hash::ZERO
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form keeps log lines readable.
        write!(f, "Hash({}..)", hex::encode(&self.0[..4]))
    }
}

impl AsRef<[u8]> for Hash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}
