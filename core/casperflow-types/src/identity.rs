//! Wallet identities.
//!
//! An identity is a public key prefixed with a one-byte algorithm tag and
//! rendered as lowercase hex, the way Casper encodes account keys:
//! `01` + 32 bytes for Ed25519, `02` + 33 bytes for secp256k1.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Signature scheme of a wallet key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyAlgorithm {
    Ed25519,
    Secp256k1,
}

impl KeyAlgorithm {
    /// The tag byte that prefixes encoded keys and signatures.
    #[must_use]
    pub const fn tag(&self) -> u8 {
        match self {
            Self::Ed25519 => 0x01,
            Self::Secp256k1 => 0x02,
        }
    }

    /// Length of the raw public key (without tag).
    #[must_use]
    pub const fn key_len(&self) -> usize {
        match self {
            Self::Ed25519 => 32,
            Self::Secp256k1 => 33,
        }
    }

    /// Looks up the algorithm for a tag byte.
    #[must_use]
    pub const fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0x01 => Some(Self::Ed25519),
            0x02 => Some(Self::Secp256k1),
            _ => None,
        }
    }
}

impl fmt::Display for KeyAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ed25519 => f.write_str("ed25519"),
            Self::Secp256k1 => f.write_str("secp256k1"),
        }
    }
}

/// Public key identifying a wallet. Owned by the wallet software; we only
/// ever hold it by value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Identity {
    algorithm: KeyAlgorithm,
    key: Vec<u8>,
}

impl Identity {
    /// Creates an Ed25519 identity from raw verifying-key bytes.
    #[must_use]
    pub fn from_ed25519(key: [u8; 32]) -> Self {
        Self {
            algorithm: KeyAlgorithm::Ed25519,
            key: key.to_vec(),
        }
    }

    /// Creates an identity from an algorithm and raw key bytes.
    pub fn from_parts(algorithm: KeyAlgorithm, key: &[u8]) -> Result<Self> {
        if key.len() != algorithm.key_len() {
            return Err(Error::InvalidIdentity(format!(
                "{algorithm} key must be {} bytes, got {}",
                algorithm.key_len(),
                key.len()
            )));
        }
        Ok(Self {
            algorithm,
            key: key.to_vec(),
        })
    }

    /// Parses a tagged hex identity (`01…` or `02…`).
    pub fn parse(s: &str) -> Result<Self> {
        let bytes = hex::decode(s)
            .map_err(|e| Error::InvalidIdentity(format!("not hex: {e}")))?;
        let (&tag, key) = bytes
            .split_first()
            .ok_or_else(|| Error::InvalidIdentity("empty key".to_string()))?;
        let algorithm = KeyAlgorithm::from_tag(tag)
            .ok_or_else(|| Error::InvalidIdentity(format!("unknown key tag {tag:#04x}")))?;
        Self::from_parts(algorithm, key)
    }

    /// Returns the signature scheme.
    #[must_use]
    pub const fn algorithm(&self) -> KeyAlgorithm {
        self.algorithm
    }

    /// Returns the raw key bytes (without tag).
    #[must_use]
    pub fn key_bytes(&self) -> &[u8] {
        &self.key
    }

    /// Returns the tag byte followed by the key bytes.
    #[must_use]
    pub fn to_tagged_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + self.key.len());
        out.push(self.algorithm.tag());
        out.extend_from_slice(&self.key);
        out
    }

    /// Returns the tagged lowercase hex encoding.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.to_tagged_bytes())
    }

    /// Shortened form for display, e.g. `01abcd...ef12`.
    #[must_use]
    pub fn short(&self, chars: usize) -> String {
        let full = self.to_hex();
        if full.len() <= chars * 2 + 3 {
            return full;
        }
        format!("{}...{}", &full[..chars + 2], &full[full.len() - chars..])
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for Identity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Identity {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

impl From<Identity> for String {
    fn from(id: Identity) -> Self {
        id.to_hex()
    }
}
