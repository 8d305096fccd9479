//! Identity id encoding: URL-safe base64 of a 32-byte public-key routing
//! hash, 43 characters without padding (spec §6).

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::error::WotError;

pub const ID_LEN: usize = 43;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentityId(String);

impl IdentityId {
    /// Validate and wrap a caller-supplied id string.
    pub fn parse(s: impl Into<String>) -> Result<Self, WotError> {
        let s = s.into();
        if s.len() != ID_LEN {
            return Err(WotError::InvalidParameter(format!(
                "identity id must be {ID_LEN} chars, got {}",
                s.len()
            )));
        }
        if URL_SAFE_NO_PAD.decode(&s).is_err() {
            return Err(WotError::InvalidParameter(format!(
                "identity id {s:?} is not valid URL-safe base64"
            )));
        }
        Ok(IdentityId(s))
    }

    /// Derive an id from a public-key-like byte string (test/dev helper;
    /// real key generation is delegated to the transport per spec §1).
    pub fn from_public_bytes(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        let digest = hasher.finalize();
        IdentityId(URL_SAFE_NO_PAD.encode(digest))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdentityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_from_public_bytes() {
        let id = IdentityId::from_public_bytes(b"some-public-key-bytes");
        assert_eq!(id.as_str().len(), ID_LEN);
        assert!(IdentityId::parse(id.as_str().to_string()).is_ok());
    }

    #[test]
    fn rejects_wrong_length() {
        assert!(IdentityId::parse("too-short").is_err());
    }
}
