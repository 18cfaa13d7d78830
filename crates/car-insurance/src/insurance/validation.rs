use std::collections::BTreeMap;
use std::fmt;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use super::domain::{Amount, AmountParseError, NewCar, NewClaim, NewPolicy};

pub const MIN_YEAR: i32 = 1900;
pub const MAX_YEAR: i32 = 2100;
pub const FIRST_CAR_YEAR: u32 = 1886;

pub const VIN_MAX_LEN: usize = 17;
pub const MAKE_MAX_LEN: usize = 50;
pub const MODEL_MAX_LEN: usize = 50;
pub const PROVIDER_MAX_LEN: usize = 100;

const DATE_OUT_OF_RANGE: &str = "Date out of valid range (1900-2100).";

/// Field-keyed validation failures collected before anything is persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationErrors {
    errors: BTreeMap<String, Vec<String>>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(field: &str, message: impl Into<String>) -> Self {
        let mut errors = Self::new();
        errors.add(field, message);
        errors
    }

    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        self.errors
            .entry(field.to_string())
            .or_default()
            .push(message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn field(&self, field: &str) -> Option<&[String]> {
        self.errors.get(field).map(Vec::as_slice)
    }

    pub fn errors(&self) -> &BTreeMap<String, Vec<String>> {
        &self.errors
    }

    /// Human readable summary: the message itself when only one was recorded.
    pub fn detail(&self) -> String {
        let mut messages = self.errors.values().flatten();
        match (messages.next(), messages.next()) {
            (Some(only), None) => only.clone(),
            _ => "Invalid input.".to_string(),
        }
    }

    fn into_result<T>(self, value: T) -> Result<T, ValidationErrors> {
        if self.is_empty() {
            Ok(value)
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.detail())
    }
}

impl std::error::Error for ValidationErrors {}

pub fn parse_date(raw: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|err| format!("failed to parse '{raw}' as YYYY-MM-DD ({err})"))
}

fn year_in_range(date: NaiveDate) -> bool {
    (MIN_YEAR..=MAX_YEAR).contains(&date.year())
}

const REQUIRED: &str = "This field is required.";
const NOT_NULL: &str = "This field may not be null.";
const BLANK: &str = "This field may not be blank.";
const NOT_A_STRING: &str = "Not a valid string.";
const NOT_AN_INTEGER: &str = "A valid integer is required.";
const DATE_FORMAT: &str = "Date has wrong format. Use one of these formats instead: YYYY-MM-DD.";

// Distinguishes an explicit `null` from a missing field.
fn present<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Value>, D::Error> {
    Value::deserialize(deserializer).map(Some)
}

/// Car request body as received. Every field is optional so missing or
/// mistyped values surface as field errors.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CarInput {
    #[serde(default, deserialize_with = "present")]
    pub vin: Option<Value>,
    #[serde(default, deserialize_with = "present")]
    pub make: Option<Value>,
    #[serde(default, deserialize_with = "present")]
    pub model: Option<Value>,
    #[serde(default, deserialize_with = "present")]
    pub year_of_manufacture: Option<Value>,
}

impl From<NewCar> for CarInput {
    fn from(car: NewCar) -> Self {
        Self {
            vin: Some(car.vin.into()),
            make: Some(car.make.into()),
            model: Some(car.model.into()),
            year_of_manufacture: Some(car.year_of_manufacture.into()),
        }
    }
}

/// Policy request body. The owning car comes from the URL and cannot be changed.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PolicyInput {
    #[serde(default, deserialize_with = "present")]
    pub provider: Option<Value>,
    #[serde(default, deserialize_with = "present")]
    pub start_date: Option<Value>,
    #[serde(default, deserialize_with = "present")]
    pub end_date: Option<Value>,
}

impl From<NewPolicy> for PolicyInput {
    fn from(policy: NewPolicy) -> Self {
        Self {
            provider: Some(policy.provider.map(Value::from).unwrap_or(Value::Null)),
            start_date: Some(policy.start_date.to_string().into()),
            end_date: Some(policy.end_date.to_string().into()),
        }
    }
}

/// Claim request body; `amount` may be a JSON number or a decimal string.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClaimInput {
    #[serde(default, deserialize_with = "present")]
    pub claim_date: Option<Value>,
    #[serde(default, deserialize_with = "present")]
    pub description: Option<Value>,
    #[serde(default, deserialize_with = "present")]
    pub amount: Option<Value>,
}

impl From<NewClaim> for ClaimInput {
    fn from(claim: NewClaim) -> Self {
        Self {
            claim_date: Some(claim.claim_date.to_string().into()),
            description: Some(claim.description.into()),
            amount: Some(claim.amount.to_string().into()),
        }
    }
}

/// Collects per-field failures while reading an input.
#[derive(Default)]
struct FieldReader {
    errors: ValidationErrors,
}

impl FieldReader {
    /// Reads a required field. A missing field falls back to `current`, which
    /// is only set for partial updates.
    fn required<T>(
        &mut self,
        field: &str,
        raw: Option<Value>,
        current: Option<T>,
        parse: impl FnOnce(Value) -> Result<T, String>,
    ) -> Option<T> {
        match raw {
            None => {
                if current.is_none() {
                    self.errors.add(field, REQUIRED);
                }
                current
            }
            Some(Value::Null) => {
                self.errors.add(field, NOT_NULL);
                None
            }
            Some(value) => match parse(value) {
                Ok(parsed) => Some(parsed),
                Err(message) => {
                    self.errors.add(field, message);
                    None
                }
            },
        }
    }
}

fn text(value: Value) -> Result<String, String> {
    match value {
        Value::String(text) => Ok(text.trim().to_string()),
        Value::Number(number) => Ok(number.to_string()),
        _ => Err(NOT_A_STRING.to_string()),
    }
}

fn bounded_text(value: Value, max_len: usize) -> Result<String, String> {
    let text = text(value)?;
    if text.is_empty() {
        Err(BLANK.to_string())
    } else if text.chars().count() > max_len {
        Err(format!(
            "Ensure this field has no more than {max_len} characters."
        ))
    } else {
        Ok(text)
    }
}

fn manufacture_year(value: Value) -> Result<u32, String> {
    let year = match &value {
        Value::Number(number) => number.as_i64(),
        Value::String(text) => text.trim().parse::<i64>().ok(),
        _ => None,
    }
    .ok_or_else(|| NOT_AN_INTEGER.to_string())?;

    let max_year = MAX_YEAR as u32;
    u32::try_from(year)
        .ok()
        .filter(|year| (FIRST_CAR_YEAR..=max_year).contains(year))
        .ok_or_else(|| format!("Year must be between {FIRST_CAR_YEAR} and {max_year}."))
}

fn calendar_date(value: Value) -> Result<NaiveDate, String> {
    let date = match &value {
        Value::String(text) => NaiveDate::parse_from_str(text.trim(), "%Y-%m-%d").ok(),
        _ => None,
    }
    .ok_or_else(|| DATE_FORMAT.to_string())?;

    if year_in_range(date) {
        Ok(date)
    } else {
        Err(DATE_OUT_OF_RANGE.to_string())
    }
}

fn claim_amount(value: Value) -> Result<Amount, String> {
    let amount = match &value {
        Value::Number(number) => Amount::parse(&number.to_string()),
        Value::String(text) => Amount::parse(text),
        _ => Err(AmountParseError::Invalid),
    }
    .map_err(|err| err.to_string())?;

    if !amount.is_positive() {
        Err("Amount must be greater than 0.".to_string())
    } else if amount.cents() > Amount::MAX_CENTS {
        Err(AmountParseError::TooLarge.to_string())
    } else {
        Ok(amount)
    }
}

fn claim_description(value: Value) -> Result<String, String> {
    let text = text(value)?;
    if text.is_empty() {
        Err("Description cannot be empty.".to_string())
    } else {
        Ok(text)
    }
}

/// Validates a car body. With `current` set, missing fields keep their stored values.
pub fn validate_car(input: CarInput, current: Option<&NewCar>) -> Result<NewCar, ValidationErrors> {
    let mut reader = FieldReader::default();
    let vin = reader.required(
        "vin",
        input.vin,
        current.map(|car| car.vin.clone()),
        |value| bounded_text(value, VIN_MAX_LEN),
    );
    let make = reader.required(
        "make",
        input.make,
        current.map(|car| car.make.clone()),
        |value| bounded_text(value, MAKE_MAX_LEN),
    );
    let model = reader.required(
        "model",
        input.model,
        current.map(|car| car.model.clone()),
        |value| bounded_text(value, MODEL_MAX_LEN),
    );
    let year_of_manufacture = reader.required(
        "year_of_manufacture",
        input.year_of_manufacture,
        current.map(|car| car.year_of_manufacture),
        manufacture_year,
    );

    match (vin, make, model, year_of_manufacture) {
        (Some(vin), Some(make), Some(model), Some(year_of_manufacture))
            if reader.errors.is_empty() =>
        {
            Ok(NewCar {
                vin,
                make,
                model,
                year_of_manufacture,
            })
        }
        _ => Err(reader.errors),
    }
}

/// Validates a policy body. A blank or `null` provider is stored as none.
pub fn validate_policy(
    input: PolicyInput,
    current: Option<&NewPolicy>,
) -> Result<NewPolicy, ValidationErrors> {
    let mut reader = FieldReader::default();
    let provider = match input.provider {
        None => current.and_then(|policy| policy.provider.clone()),
        Some(Value::Null) => None,
        Some(value) => match text(value) {
            Ok(provider) if provider.chars().count() > PROVIDER_MAX_LEN => {
                reader.errors.add(
                    "provider",
                    format!("Ensure this field has no more than {PROVIDER_MAX_LEN} characters."),
                );
                None
            }
            Ok(provider) => Some(provider).filter(|provider| !provider.is_empty()),
            Err(message) => {
                reader.errors.add("provider", message);
                None
            }
        },
    };
    let start_date = reader.required(
        "start_date",
        input.start_date,
        current.map(|policy| policy.start_date),
        calendar_date,
    );
    let end_date = reader.required(
        "end_date",
        input.end_date,
        current.map(|policy| policy.end_date),
        calendar_date,
    );

    if let (Some(start), Some(end)) = (start_date, end_date) {
        if end < start {
            reader
                .errors
                .add("non_field_errors", "End date must be after start date.");
        }
    }

    match (start_date, end_date) {
        (Some(start_date), Some(end_date)) if reader.errors.is_empty() => Ok(NewPolicy {
            provider,
            start_date,
            end_date,
        }),
        _ => Err(reader.errors),
    }
}

/// Validates a claim body, including the positive amount and ten digit bound.
pub fn validate_claim(
    input: ClaimInput,
    current: Option<&NewClaim>,
) -> Result<NewClaim, ValidationErrors> {
    let mut reader = FieldReader::default();
    let claim_date = reader.required(
        "claim_date",
        input.claim_date,
        current.map(|claim| claim.claim_date),
        calendar_date,
    );
    let description = reader.required(
        "description",
        input.description,
        current.map(|claim| claim.description.clone()),
        claim_description,
    );
    let amount = reader.required(
        "amount",
        input.amount,
        current.map(|claim| claim.amount),
        claim_amount,
    );

    match (claim_date, description, amount) {
        (Some(claim_date), Some(description), Some(amount)) if reader.errors.is_empty() => {
            Ok(NewClaim {
                claim_date,
                description,
                amount,
            })
        }
        _ => Err(reader.errors),
    }
}

/// Validates the `date` query parameter of the insurance validity check.
pub fn parse_validity_date(raw: Option<&str>) -> Result<NaiveDate, ValidationErrors> {
    let raw = match raw.map(str::trim) {
        Some(value) if !value.is_empty() => value,
        _ => {
            return Err(ValidationErrors::single(
                "date",
                "Missing required query parameter: date",
            ))
        }
    };

    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| {
        ValidationErrors::single("date", "Invalid date format. Expected YYYY-MM-DD.")
    })?;

    if !year_in_range(date) {
        return Err(ValidationErrors::single("date", DATE_OUT_OF_RANGE));
    }

    Ok(date)
}
