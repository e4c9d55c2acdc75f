//! API credentials for CasperFlow subscriptions.
//!
//! This crate owns everything about the opaque API keys handed to
//! subscribers:
//! - Issuing keys with at least 128 bits of OS entropy
//! - Parsing and validating tokens before any store lookup
//! - Redacted rendering so keys never reach logs in full
//!
//! # Key Format
//!
//! Keys are formatted as: `<prefix><48 lowercase hex chars>`
//!
//! - `cf_sk_` marks a secret key (server-side verification)
//! - `cf_pk_` marks a publishable key (safe to embed in a widget)
//!
//! A key carries no payload. Its binding to a subscriber and plan lives in
//! the subscription store, keyed by exact match on the full token.

mod error;
mod key;

pub use error::{CredentialError, CredentialResult};
pub use key::{ApiKey, KeyClass, ParsedKey, KEY_RANDOM_BYTES, KEY_RANDOM_HEX_LEN};
