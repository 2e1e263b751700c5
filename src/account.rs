//! Participant identifiers.
//!
//! An [`Account`] is an opaque 32-byte identifier. Operators derive theirs
//! from an ed25519 verifying key; tests and local tooling derive them from a
//! label hashed with SHA-256. The all-zero value is reserved as the null
//! account and is never a valid referrer, referee or payout destination.

use std::{fmt, str::FromStr};

use ed25519_dalek::VerifyingKey;
use serde::{de::Error, Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Account([u8; 32]);

impl Account {
    pub const NULL: Account = Account([0u8; 32]);

    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Deterministic account for a human-readable label.
    pub fn derive(label: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(b"referral-engine/account");
        hasher.update(label.as_bytes());
        Self(hasher.finalize().into())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_null(&self) -> bool {
        self.0 == [0u8; 32]
    }

    /// Abbreviated form used in CLI summaries.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl From<VerifyingKey> for Account {
    fn from(key: VerifyingKey) -> Self {
        Self(key.to_bytes())
    }
}

impl fmt::Display for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Account({})", self.short())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ParseAccountError {
    #[error("invalid hex: {0}")]
    Hex(#[from] hex::FromHexError),
    #[error("account must be 32 bytes, got {0}")]
    Length(usize),
}

impl FromStr for Account {
    type Err = ParseAccountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let s = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(s)?;
        let arr: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| ParseAccountError::Length(bytes.len()))?;
        Ok(Self(arr))
    }
}

impl Serialize for Account {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(self.0))
    }
}

impl<'de> Deserialize<'de> for Account {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        encoded.parse().map_err(D::Error::custom)
    }
}
