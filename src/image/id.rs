//! Content-addressed image identifiers

use crate::error::{Result, StoreError};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;

/// Length of the abbreviated id shown in listings
pub const SHORT_ID_LEN: usize = 12;

const DIGEST_PREFIX: &str = "sha256:";

/// Immutable identifier of an image's content (64 lowercase hex characters)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentId(String);

impl ContentId {
    /// Derive an id from the canonical bytes of an image's metadata
    pub fn from_content(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        Self(format!("{:x}", hasher.finalize()))
    }

    /// Parse a full id, with or without the `sha256:` prefix
    pub fn parse(input: &str) -> Result<Self> {
        let hex = input.strip_prefix(DIGEST_PREFIX).unwrap_or(input);
        if hex.len() != 64 || !is_lower_hex(hex) {
            return Err(StoreError::InvalidReference(format!(
                "{}: not a full image id",
                input
            )));
        }
        Ok(Self(hex.to_string()))
    }

    /// Abbreviated form used in listings
    pub fn short(&self) -> &str {
        &self.0[..SHORT_ID_LEN]
    }

    /// Full hex form
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether `prefix` (optionally `sha256:`-qualified) abbreviates this id
    pub fn matches_prefix(&self, prefix: &str) -> bool {
        let hex = prefix.strip_prefix(DIGEST_PREFIX).unwrap_or(prefix);
        !hex.is_empty() && self.0.starts_with(hex)
    }
}

/// Whether `input` could abbreviate an id at all
pub fn looks_like_id(input: &str) -> bool {
    let hex = input.strip_prefix(DIGEST_PREFIX).unwrap_or(input);
    !hex.is_empty() && hex.len() <= 64 && is_lower_hex(hex)
}

fn is_lower_hex(s: &str) -> bool {
    s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for ContentId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for ContentId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}
