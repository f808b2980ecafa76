// ============================================
// File: crates/nextun-common/src/types.rs
// ============================================
//! # Core Type Definitions
//!
//! ## Main Functionality
//! - `UserId`: numeric identity of a logged-in user, carried in the data
//!   channel `Hello` frame and used as the key of the user store
//!
//! ## Last Modified
//! v0.1.0 - Initial type definitions

use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Size of a `UserId` on the wire, in bytes.
pub const USER_ID_SIZE: usize = 4;

/// Identifier of a user known to the server.
///
/// # Wire Format
/// ```text
/// ┌──────────────────────────┐
/// │  User ID (u32, BE)       │
/// └──────────────────────────┘
/// ```
///
/// # Example
/// ```
/// use nextun_common::types::UserId;
///
/// let id = UserId::new(7);
/// assert_eq!(UserId::from_bytes(id.to_bytes()), id);
/// assert_eq!(id.to_string(), "7");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(u32);

impl UserId {
    /// Creates a `UserId` from its raw value.
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn value(&self) -> u32 {
        self.0
    }

    /// Encodes as big-endian bytes.
    #[must_use]
    pub const fn to_bytes(&self) -> [u8; USER_ID_SIZE] {
        self.0.to_be_bytes()
    }

    /// Decodes from big-endian bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; USER_ID_SIZE]) -> Self {
        Self(u32::from_be_bytes(bytes))
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for UserId {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(Self)
    }
}

impl From<u32> for UserId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

impl From<UserId> for u32 {
    fn from(id: UserId) -> Self {
        id.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_id_bytes() {
        let id = UserId::new(0x0102_0304);
        assert_eq!(id.to_bytes(), [1, 2, 3, 4]);
        assert_eq!(UserId::from_bytes([1, 2, 3, 4]), id);
    }

    #[test]
    fn test_user_id_text() {
        let id: UserId = "42".parse().unwrap();
        assert_eq!(id.value(), 42);
        assert!("x".parse::<UserId>().is_err());
        assert_eq!(serde_json::to_string(&id).unwrap(), "42");
    }
}
