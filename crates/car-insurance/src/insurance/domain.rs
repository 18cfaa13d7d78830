use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize, Serializer};

macro_rules! numeric_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

numeric_id!(
    /// Primary key of a registered car.
    CarId
);
numeric_id!(
    /// Primary key of an insurance policy.
    PolicyId
);
numeric_id!(
    /// Primary key of a claim.
    ClaimId
);
numeric_id!(
    /// Primary key of an expiry log row.
    ExpiryLogId
);

/// A registered vehicle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Car {
    pub id: CarId,
    pub vin: String,
    pub make: String,
    pub model: String,
    pub year_of_manufacture: u32,
    pub created_at: DateTime<Utc>,
}

/// Car fields ready to be stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewCar {
    pub vin: String,
    pub make: String,
    pub model: String,
    pub year_of_manufacture: u32,
}

impl From<&Car> for NewCar {
    fn from(car: &Car) -> Self {
        Self {
            vin: car.vin.clone(),
            make: car.make.clone(),
            model: car.model.clone(),
            year_of_manufacture: car.year_of_manufacture,
        }
    }
}

/// Coverage window for a single car. Both bounds are inclusive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InsurancePolicy {
    pub id: PolicyId,
    pub car: CarId,
    pub provider: Option<String>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub logged_expiry_at: Option<DateTime<Utc>>,
}

impl InsurancePolicy {
    pub fn covers(&self, date: NaiveDate) -> bool {
        self.start_date <= date && date <= self.end_date
    }

    /// True from the last covered day onwards.
    pub fn has_expired(&self, today: NaiveDate) -> bool {
        self.end_date <= today
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewPolicy {
    pub provider: Option<String>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

impl From<&InsurancePolicy> for NewPolicy {
    fn from(policy: &InsurancePolicy) -> Self {
        Self {
            provider: policy.provider.clone(),
            start_date: policy.start_date,
            end_date: policy.end_date,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Claim {
    pub id: ClaimId,
    pub car: CarId,
    pub claim_date: NaiveDate,
    pub description: String,
    pub amount: Amount,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewClaim {
    pub claim_date: NaiveDate,
    pub description: String,
    pub amount: Amount,
}

impl From<&Claim> for NewClaim {
    fn from(claim: &Claim) -> Self {
        Self {
            claim_date: claim.claim_date,
            description: claim.description.clone(),
            amount: claim.amount,
        }
    }
}

/// One row per policy, written by the expiry job the first time the policy is seen expired.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExpiryLogEntry {
    pub id: ExpiryLogId,
    pub policy: PolicyId,
    pub car: CarId,
    pub logged_at: DateTime<Utc>,
}

/// Answer to "was this car insured on a given day".
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InsuranceValidity {
    pub car_id: CarId,
    pub date: NaiveDate,
    pub valid: bool,
}

/// Timeline entry combining policies and claims for a car.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type")]
pub enum HistoryEntry {
    #[serde(rename = "POLICY", rename_all = "camelCase")]
    Policy {
        policy_id: PolicyId,
        start_date: NaiveDate,
        end_date: NaiveDate,
        provider: Option<String>,
    },
    #[serde(rename = "CLAIM", rename_all = "camelCase")]
    Claim {
        claim_id: ClaimId,
        claim_date: NaiveDate,
        amount: Amount,
        description: String,
    },
}

impl HistoryEntry {
    pub fn date(&self) -> NaiveDate {
        match self {
            HistoryEntry::Policy { start_date, .. } => *start_date,
            HistoryEntry::Claim { claim_date, .. } => *claim_date,
        }
    }
}

impl From<&InsurancePolicy> for HistoryEntry {
    fn from(policy: &InsurancePolicy) -> Self {
        HistoryEntry::Policy {
            policy_id: policy.id,
            start_date: policy.start_date,
            end_date: policy.end_date,
            provider: policy.provider.clone(),
        }
    }
}

impl From<&Claim> for HistoryEntry {
    fn from(claim: &Claim) -> Self {
        HistoryEntry::Claim {
            claim_id: claim.id,
            claim_date: claim.claim_date,
            amount: claim.amount,
            description: claim.description.clone(),
        }
    }
}

/// Monetary value with two decimal places, held as integer cents.
///
/// Serialized as a plain JSON number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Amount {
    cents: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AmountParseError {
    #[error("A valid number is required.")]
    Invalid,
    #[error("Ensure that there are no more than 2 decimal places.")]
    TooPrecise,
    #[error("Ensure that there are no more than 10 digits in total.")]
    TooLarge,
}

impl Amount {
    /// Ten significant digits, two of them fractional.
    pub const MAX_CENTS: i64 = 9_999_999_999;
    const MAX_WHOLE_DIGITS: usize = 16;

    pub const fn from_cents(cents: i64) -> Self {
        Self { cents }
    }

    pub const fn cents(&self) -> i64 {
        self.cents
    }

    pub fn as_f64(&self) -> f64 {
        self.cents as f64 / 100.0
    }

    pub fn is_positive(&self) -> bool {
        self.cents > 0
    }

    pub fn parse(raw: &str) -> Result<Self, AmountParseError> {
        let raw = raw.trim();
        let (negative, digits) = match raw.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, raw.strip_prefix('+').unwrap_or(raw)),
        };

        let (whole, fraction) = match digits.split_once('.') {
            Some((whole, fraction)) => (whole, fraction),
            None => (digits, ""),
        };

        if whole.is_empty() && fraction.is_empty() {
            return Err(AmountParseError::Invalid);
        }
        if !whole.chars().all(|c| c.is_ascii_digit())
            || !fraction.chars().all(|c| c.is_ascii_digit())
        {
            return Err(AmountParseError::Invalid);
        }

        let fraction = fraction.trim_end_matches('0');
        if fraction.len() > 2 {
            return Err(AmountParseError::TooPrecise);
        }

        // Anything longer cannot be held as cents; the ten digit bound is a validation rule.
        let whole = whole.trim_start_matches('0');
        if whole.len() > Self::MAX_WHOLE_DIGITS {
            return Err(AmountParseError::TooLarge);
        }

        let whole_value: i64 = if whole.is_empty() {
            0
        } else {
            whole.parse().map_err(|_| AmountParseError::Invalid)?
        };
        let fraction_value: i64 = match fraction.len() {
            0 => 0,
            1 => fraction.parse::<i64>().map_err(|_| AmountParseError::Invalid)? * 10,
            _ => fraction.parse().map_err(|_| AmountParseError::Invalid)?,
        };

        let cents = whole_value * 100 + fraction_value;
        Ok(Self {
            cents: if negative { -cents } else { cents },
        })
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.cents < 0 { "-" } else { "" };
        let abs = self.cents.unsigned_abs();
        write!(f, "{sign}{}.{:02}", abs / 100, abs % 100)
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.as_f64())
    }
}
