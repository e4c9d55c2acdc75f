//! Subscription plans.

use crate::{Error, Identity, Motes, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Seconds in one day.
pub const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

const MAX_PLAN_ID_LEN: usize = 64;

/// Identifier of a plan. Generated ids look like `plan_<uuid v7>`; ids from
/// external catalogs are accepted as long as they are short and URL-safe.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PlanId(String);

impl PlanId {
    /// Creates a new time-ordered plan ID.
    #[must_use]
    pub fn new() -> Self {
        Self(format!("plan_{}", Uuid::now_v7().simple()))
    }

    /// Parses a plan ID, rejecting empty, overlong, or non URL-safe input.
    pub fn parse(s: &str) -> Result<Self> {
        if s.is_empty() || s.len() > MAX_PLAN_ID_LEN {
            return Err(Error::InvalidPlan(format!(
                "plan id must be 1..={MAX_PLAN_ID_LEN} characters"
            )));
        }
        if !s.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-') {
            return Err(Error::InvalidPlan(format!("plan id has invalid characters: {s}")));
        }
        Ok(Self(s.to_string()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for PlanId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PlanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for PlanId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for PlanId {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

impl From<PlanId> for String {
    fn from(id: PlanId) -> Self {
        id.0
    }
}

/// Length of one billing cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BillingPeriod {
    Weekly,
    Monthly,
    Yearly,
    Seconds(u64),
}

impl BillingPeriod {
    /// Returns the period length in seconds.
    #[must_use]
    pub const fn as_secs(&self) -> u64 {
        match self {
            Self::Weekly => 7 * SECONDS_PER_DAY,
            Self::Monthly => 30 * SECONDS_PER_DAY,
            Self::Yearly => 365 * SECONDS_PER_DAY,
            Self::Seconds(s) => *s,
        }
    }

    /// Human label used by the plan catalog (`weekly`, `monthly`, ...).
    #[must_use]
    pub fn label(&self) -> String {
        match self {
            Self::Weekly => "weekly".to_string(),
            Self::Monthly => "monthly".to_string(),
            Self::Yearly => "yearly".to_string(),
            Self::Seconds(s) => format!("{s}s"),
        }
    }

    /// Maps a length in seconds back to a named period where one matches.
    #[must_use]
    pub const fn from_secs(secs: u64) -> Self {
        match secs {
            s if s == 7 * SECONDS_PER_DAY => Self::Weekly,
            s if s == 30 * SECONDS_PER_DAY => Self::Monthly,
            s if s == 365 * SECONDS_PER_DAY => Self::Yearly,
            s => Self::Seconds(s),
        }
    }
}

impl FromStr for BillingPeriod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "weekly" => Ok(Self::Weekly),
            "monthly" => Ok(Self::Monthly),
            "yearly" => Ok(Self::Yearly),
            other => other
                .trim_end_matches('s')
                .parse::<u64>()
                .map(Self::Seconds)
                .map_err(|_| Error::InvalidPlan(format!("unknown billing period: {other}"))),
        }
    }
}

/// Merchant input for creating a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPlan {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub base_price: Motes,
    #[serde(default)]
    pub usage_price: Motes,
    pub billing_period: BillingPeriod,
    #[serde(default)]
    pub trial_days: u32,
}

/// A subscription plan. Immutable after creation except for `deprecated`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    pub id: PlanId,
    pub merchant: Identity,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub base_price: Motes,
    pub usage_price: Motes,
    pub billing_period_secs: u64,
    pub trial_days: u32,
    #[serde(default)]
    pub deprecated: bool,
    pub created_at: DateTime<Utc>,
}

impl Plan {
    /// Validates merchant input and builds a plan.
    pub fn create(
        id: PlanId,
        merchant: Identity,
        input: NewPlan,
        created_at: DateTime<Utc>,
    ) -> Result<Self> {
        if input.name.trim().is_empty() {
            return Err(Error::InvalidPlan("plan name must not be empty".to_string()));
        }
        let billing_period_secs = input.billing_period.as_secs();
        if billing_period_secs == 0 {
            return Err(Error::InvalidPlan("billing period must be positive".to_string()));
        }
        if i64::try_from(billing_period_secs).is_err() {
            return Err(Error::InvalidPlan("billing period too long".to_string()));
        }

        Ok(Self {
            id,
            merchant,
            name: input.name,
            description: input.description,
            base_price: input.base_price,
            usage_price: input.usage_price,
            billing_period_secs,
            trial_days: input.trial_days,
            deprecated: false,
            created_at,
        })
    }

    /// The billing cycle as a duration.
    #[must_use]
    pub fn billing_period(&self) -> Duration {
        Duration::seconds(i64::try_from(self.billing_period_secs).unwrap_or(i64::MAX))
    }

    /// The trial as a duration (zero when the plan has no trial).
    #[must_use]
    pub fn trial(&self) -> Duration {
        Duration::days(i64::from(self.trial_days))
    }

    /// Total charge for one cycle with `usage_units` of metered usage.
    /// Returns `None` on overflow.
    #[must_use]
    pub fn bill(&self, usage_units: u64) -> Option<Motes> {
        self.usage_price
            .checked_mul(usage_units)
            .and_then(|usage| self.base_price.checked_add(usage))
    }

    /// Whether the plan still accepts new subscriptions.
    #[must_use]
    pub const fn accepts_subscriptions(&self) -> bool {
        !self.deprecated
    }
}
