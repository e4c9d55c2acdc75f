//! On-chain amounts.

use crate::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Number of motes in one CSPR.
pub const MOTES_PER_CSPR: u64 = 1_000_000_000;

const CSPR_DECIMALS: usize = 9;

/// An amount of motes, the ledger's smallest unit.
///
/// Serialized as a decimal string, matching how the ledger encodes U512
/// values in JSON. Deserialization also accepts a bare JSON number.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Motes(u64);

impl Motes {
    pub const ZERO: Self = Self(0);

    #[must_use]
    pub const fn new(motes: u64) -> Self {
        Self(motes)
    }

    /// Whole CSPR to motes. Returns `None` on overflow.
    #[must_use]
    pub const fn from_cspr(cspr: u64) -> Option<Self> {
        match cspr.checked_mul(MOTES_PER_CSPR) {
            Some(m) => Some(Self(m)),
            None => None,
        }
    }

    /// Parses a decimal CSPR amount such as `"10"` or `"0.25"` exactly.
    pub fn parse_cspr(s: &str) -> Result<Self> {
        let s = s.trim();
        let (whole, frac) = match s.split_once('.') {
            Some((w, f)) => (w, f),
            None => (s, ""),
        };
        if whole.is_empty() && frac.is_empty() {
            return Err(Error::InvalidAmount("empty amount".to_string()));
        }
        if !whole.bytes().all(|b| b.is_ascii_digit()) || !frac.bytes().all(|b| b.is_ascii_digit()) {
            return Err(Error::InvalidAmount(format!("not a decimal amount: {s}")));
        }
        if frac.len() > CSPR_DECIMALS {
            return Err(Error::InvalidAmount(format!(
                "more than {CSPR_DECIMALS} fractional digits: {s}"
            )));
        }

        let whole: u64 = if whole.is_empty() {
            0
        } else {
            whole
                .parse()
                .map_err(|_| Error::InvalidAmount(format!("amount too large: {s}")))?
        };
        let frac_motes: u64 = if frac.is_empty() {
            0
        } else {
            let padded = format!("{:0<width$}", frac, width = CSPR_DECIMALS);
            padded
                .parse()
                .map_err(|_| Error::InvalidAmount(format!("bad fraction: {s}")))?
        };

        whole
            .checked_mul(MOTES_PER_CSPR)
            .and_then(|m| m.checked_add(frac_motes))
            .map(Self)
            .ok_or_else(|| Error::InvalidAmount(format!("amount too large: {s}")))
    }

    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    #[must_use]
    pub fn checked_add(self, other: Self) -> Option<Self> {
        self.0.checked_add(other.0).map(Self)
    }

    #[must_use]
    pub fn checked_mul(self, units: u64) -> Option<Self> {
        self.0.checked_mul(units).map(Self)
    }

    /// Formats as CSPR with the given number of decimals, e.g. `10.50 CSPR`.
    #[must_use]
    pub fn format_cspr(&self, decimals: usize) -> String {
        let whole = self.0 / MOTES_PER_CSPR;
        let frac = self.0 % MOTES_PER_CSPR;
        if decimals == 0 {
            return format!("{whole} CSPR");
        }
        let frac = format!("{frac:09}");
        let shown = &frac[..decimals.min(CSPR_DECIMALS)];
        format!("{whole}.{shown} CSPR")
    }
}

impl fmt::Display for Motes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Motes {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        s.parse::<u64>()
            .map(Self)
            .map_err(|e| Error::InvalidAmount(format!("{s}: {e}")))
    }
}

impl Serialize for Motes {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Motes {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Text(String),
            Number(u64),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Number(n) => Ok(Self(n)),
            Repr::Text(s) => s.parse().map_err(serde::de::Error::custom),
        }
    }
}
