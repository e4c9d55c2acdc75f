//! API key issuance and parsing.
//!
//! Keys use the format: `<prefix><hex(random)>`
//!
//! The random part is 24 bytes from the OS RNG (192 bits), hex encoded to
//! 48 characters. Parsing checks prefix, then length, then alphabet, and
//! never touches storage.

use crate::error::{CredentialError, CredentialResult};
use casperflow_types::{Identity, PlanId};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use tracing::debug;

/// Random bytes per key.
pub const KEY_RANDOM_BYTES: usize = 24;

/// Length of the hex-encoded random part.
pub const KEY_RANDOM_HEX_LEN: usize = KEY_RANDOM_BYTES * 2;

/// How many characters of the random part survive redaction.
const REDACTED_VISIBLE: usize = 4;

/// The credential class encoded in the key prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyClass {
    /// Secret key, used by merchant backends to verify entitlement.
    Secret,
    /// Publishable key, safe to embed client-side.
    Publishable,
}

impl KeyClass {
    /// Returns the literal prefix for this class.
    #[must_use]
    pub const fn prefix(&self) -> &'static str {
        match self {
            Self::Secret => "cf_sk_",
            Self::Publishable => "cf_pk_",
        }
    }

    fn from_token(token: &str) -> Option<Self> {
        [Self::Secret, Self::Publishable]
            .into_iter()
            .find(|class| token.starts_with(class.prefix()))
    }
}

/// An issued API key.
///
/// `Display` and `Debug` are redacted; call [`ApiKey::as_str`] to get the
/// token for handing back to the subscriber or storing.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ApiKey(String);

impl ApiKey {
    /// Issues a new secret key for a subscriber's plan.
    ///
    /// The key itself carries no identity; the binding is recorded by the
    /// caller in the subscription store.
    ///
    /// # Errors
    ///
    /// Returns an error if the OS random source is unavailable.
    pub fn issue(subscriber: &Identity, plan_id: &PlanId) -> CredentialResult<Self> {
        let key = Self::issue_with_class(KeyClass::Secret)?;
        debug!(
            subscriber = %subscriber.short(4),
            plan = %plan_id,
            key = %key.redacted(),
            "issued api key"
        );
        Ok(key)
    }

    /// Issues a new key of the given class.
    pub fn issue_with_class(class: KeyClass) -> CredentialResult<Self> {
        let mut bytes = [0u8; KEY_RANDOM_BYTES];
        OsRng
            .try_fill_bytes(&mut bytes)
            .map_err(|e| CredentialError::Entropy(e.to_string()))?;
        Ok(Self(format!("{}{}", class.prefix(), hex::encode(bytes))))
    }

    /// Returns the full token.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consumes the key, returning the full token.
    #[must_use]
    pub fn into_string(self) -> String {
        self.0
    }

    /// Returns the credential class.
    #[must_use]
    pub fn class(&self) -> KeyClass {
        KeyClass::from_token(&self.0).unwrap_or(KeyClass::Secret)
    }

    /// Short SHA-256 fingerprint, stable across processes, for correlating
    /// log lines without revealing the key.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        fingerprint(&self.0)
    }

    /// Prefix plus the first few random characters, e.g. `cf_sk_1a2b…`.
    #[must_use]
    pub fn redacted(&self) -> String {
        redact(&self.0)
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ApiKey").field(&self.redacted()).finish()
    }
}

impl fmt::Display for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.redacted())
    }
}

/// A token that passed format validation.
#[derive(Clone, PartialEq, Eq)]
pub struct ParsedKey {
    class: KeyClass,
    raw: String,
}

impl ParsedKey {
    /// Validates a token's prefix, length, and alphabet.
    ///
    /// # Errors
    ///
    /// Returns `MalformedKey` if any check fails. No storage is consulted.
    pub fn parse(token: &str) -> CredentialResult<Self> {
        let class = KeyClass::from_token(token).ok_or_else(|| {
            CredentialError::MalformedKey("unknown key prefix".to_string())
        })?;

        let random = &token[class.prefix().len()..];
        if random.len() != KEY_RANDOM_HEX_LEN {
            return Err(CredentialError::MalformedKey(format!(
                "expected {KEY_RANDOM_HEX_LEN} characters after prefix, got {}",
                random.len()
            )));
        }
        if !random.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
            return Err(CredentialError::MalformedKey(
                "key must be lowercase hex after prefix".to_string(),
            ));
        }

        Ok(Self {
            class,
            raw: token.to_string(),
        })
    }

    /// Returns the credential class.
    #[must_use]
    pub fn class(&self) -> KeyClass {
        self.class
    }

    /// Returns the full token for exact-match lookup.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    #[must_use]
    pub fn fingerprint(&self) -> String {
        fingerprint(&self.raw)
    }

    #[must_use]
    pub fn redacted(&self) -> String {
        redact(&self.raw)
    }
}

impl fmt::Debug for ParsedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParsedKey")
            .field("class", &self.class)
            .field("key", &self.redacted())
            .finish()
    }
}

impl From<ParsedKey> for ApiKey {
    fn from(parsed: ParsedKey) -> Self {
        Self(parsed.raw)
    }
}

fn fingerprint(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    hex::encode(&digest[..8])
}

fn redact(token: &str) -> String {
    let prefix_len = KeyClass::from_token(token).map_or(0, |c| c.prefix().len());
    let visible: String = token.chars().take(prefix_len + REDACTED_VISIBLE).collect();
    format!("{visible}…")
}
