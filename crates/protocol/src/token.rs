//! Console tokens
//!
//! A console token is an opaque 128-bit random value handed to a viewer by an
//! administrator. It travels as lowercase hex in the `token` query parameter
//! and in the `{"token": ...}` issuance response.

use crate::error::{ProtocolError, Result};
use rand::Rng;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Length of a console token in bytes
pub const TOKEN_LEN: usize = 16;

/// Opaque, unguessable console credential
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConsoleToken([u8; TOKEN_LEN]);

impl ConsoleToken {
    /// Generate a fresh token from the thread-local CSPRNG
    pub fn generate() -> Self {
        let mut bytes = [0u8; TOKEN_LEN];
        rand::rng().fill(&mut bytes);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; TOKEN_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; TOKEN_LEN] {
        &self.0
    }
}

impl fmt::Display for ConsoleToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

// Only a short prefix is shown so tokens can be correlated in logs without
// being replayable from them.
impl fmt::Debug for ConsoleToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConsoleToken({}..)", hex::encode(&self.0[..3]))
    }
}

impl FromStr for ConsoleToken {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self> {
        let decoded = hex::decode(s.trim())
            .map_err(|e| ProtocolError::InvalidToken(e.to_string()))?;
        let bytes: [u8; TOKEN_LEN] = decoded.try_into().map_err(|v: Vec<u8>| {
            ProtocolError::InvalidToken(format!(
                "expected {} bytes, got {}",
                TOKEN_LEN,
                v.len()
            ))
        })?;
        Ok(Self(bytes))
    }
}

impl Serialize for ConsoleToken {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ConsoleToken {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
