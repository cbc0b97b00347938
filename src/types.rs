//! Basic type definitions for the chat relay
//!
//! Provides the `ClientId` newtype, an anonymous peer's opaque identity.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Number of random bytes behind every generated identity (128 bits)
pub const CLIENT_ID_BYTES: usize = 16;

/// Opaque client identifier (newtype pattern)
///
/// Generated from the OS random source and encoded with the URL-safe
/// base64 alphabet, without padding. Purely bookkeeping: it carries no
/// security guarantee. Serializes as a bare string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(String);

impl ClientId {
    /// Generate a new random client ID
    ///
    /// Fails only when the OS random source is unavailable; callers must
    /// not admit a peer without an identity.
    pub fn generate() -> Result<Self, AppError> {
        let mut buf = [0u8; CLIENT_ID_BYTES];
        OsRng.try_fill_bytes(&mut buf)?;
        Ok(Self(URL_SAFE_NO_PAD.encode(buf)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for ClientId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for ClientId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
