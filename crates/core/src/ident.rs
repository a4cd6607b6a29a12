//! Identifier hashing for tables and columns.
//!
//! An `Ident` is a 64-bit value derived from a human-readable name. Tables and
//! columns are addressed by `Ident` so hot paths never compare strings.

use serde::{Deserialize, Serialize};

/// Hash a name into a 64-bit identifier.
///
/// Takes the first 8 bytes (little-endian) of the BLAKE3 digest of the UTF-8
/// name. Pure and deterministic across platforms and runs.
pub fn hash_name(name: &str) -> u64 {
    let digest = blake3::hash(name.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest.as_bytes()[..8]);
    u64::from_le_bytes(bytes)
}

/// Identifier of a table or column.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Ident(pub u64);

impl Ident {
    /// Identifier for a name.
    #[inline]
    pub fn of(name: &str) -> Self {
        Self(hash_name(name))
    }

    /// Wrap an identifier computed elsewhere (e.g. by a client).
    #[inline]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl From<&str> for Ident {
    fn from(name: &str) -> Self {
        Self::of(name)
    }
}

impl std::fmt::Display for Ident {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{:016x}", self.0)
    }
}
