//! Single-condition evaluation.
//!
//! Text predicates compare lowercased strings. Date predicates on
//! `received_date` compare against `now - value * unit`:
//! - `less_than N` → received more recently than N units ago
//! - `greater_than N` → received longer ago than N units
//!
//! Anything the evaluator does not recognize is a non-match, never an error.
//! The only error is a non-numeric value on a date predicate.

use std::borrow::Cow;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;

use super::model::{Condition, DateUnit, EmailRecord, Field, Predicate};
use crate::error::RuleError;

const SECONDS_PER_DAY: i64 = 86_400;
const DAYS_PER_MONTH: i64 = 30;

/// Resolved value of the field a condition inspects.
enum FieldValue<'a> {
    Text(&'a str),
    Date(DateTime<Utc>),
}

impl FieldValue<'_> {
    fn as_text(&self) -> Cow<'_, str> {
        match self {
            FieldValue::Text(s) => Cow::Borrowed(*s),
            FieldValue::Date(dt) => Cow::Owned(render_date(dt)),
        }
    }
}

/// `YYYY-MM-DD HH:MM:SS`, with `.ffffff` appended only when there are
/// sub-second microseconds.
fn render_date(dt: &DateTime<Utc>) -> String {
    if dt.timestamp_subsec_micros() == 0 {
        dt.format("%Y-%m-%d %H:%M:%S").to_string()
    } else {
        dt.format("%Y-%m-%d %H:%M:%S%.6f").to_string()
    }
}

fn resolve_field<'a>(
    field: Field,
    email: &'a EmailRecord,
    now: DateTime<Utc>,
) -> Option<FieldValue<'a>> {
    match field {
        Field::From => Some(FieldValue::Text(email.from.as_deref().unwrap_or(""))),
        Field::Subject => Some(FieldValue::Text(email.subject.as_deref().unwrap_or(""))),
        Field::Message => Some(FieldValue::Text(email.message.as_deref().unwrap_or(""))),
        Field::ReceivedDate => Some(FieldValue::Date(email.received_date.unwrap_or(now))),
        Field::Unknown => None,
    }
}

/// Evaluate one condition against one email at the instant `now`.
pub fn evaluate(
    condition: &Condition,
    email: &EmailRecord,
    now: DateTime<Utc>,
) -> Result<bool, RuleError> {
    let Some(field_value) = resolve_field(condition.field, email, now) else {
        return Ok(false);
    };

    match condition.predicate {
        Predicate::Contains => Ok(contains(&field_value.as_text(), &condition.value)),
        Predicate::DoesNotContain => Ok(!contains(&field_value.as_text(), &condition.value)),
        Predicate::Equals => Ok(equals(&field_value.as_text(), &condition.value)),
        Predicate::DoesNotEqual => Ok(!equals(&field_value.as_text(), &condition.value)),
        Predicate::LessThan | Predicate::GreaterThan => match field_value {
            FieldValue::Date(received) => compare_date(condition, received, now),
            FieldValue::Text(_) => Ok(false),
        },
        Predicate::Unknown => Ok(false),
    }
}

fn contains(field: &str, value: &str) -> bool {
    field.to_lowercase().contains(&value.to_lowercase())
}

fn equals(field: &str, value: &str) -> bool {
    field.to_lowercase() == value.to_lowercase()
}

fn compare_date(
    condition: &Condition,
    received: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<bool, RuleError> {
    let amount = parse_amount(&condition.value)?;
    let Some(window) = window(amount, condition.unit.unwrap_or_default(), &condition.value)?
    else {
        return Ok(false);
    };
    let threshold = now
        .checked_sub_signed(window)
        .ok_or_else(|| out_of_range(&condition.value))?;

    Ok(match condition.predicate {
        Predicate::LessThan => received > threshold,
        _ => received < threshold,
    })
}

/// Parse the numeric part of a date condition. Fractions are allowed.
pub fn parse_amount(value: &str) -> Result<Decimal, RuleError> {
    Decimal::from_str(value.trim()).map_err(|e| RuleError::InvalidValue {
        value: value.to_string(),
        reason: e.to_string(),
    })
}

/// Length of the look-back window, or `None` for an unrecognized unit.
fn window(amount: Decimal, unit: DateUnit, raw: &str) -> Result<Option<Duration>, RuleError> {
    let days = match unit {
        DateUnit::Days => amount,
        DateUnit::Months => amount
            .checked_mul(Decimal::from(DAYS_PER_MONTH))
            .ok_or_else(|| out_of_range(raw))?,
        DateUnit::Unknown => return Ok(None),
    };

    let millis = days
        .checked_mul(Decimal::from(SECONDS_PER_DAY * 1000))
        .and_then(|ms| ms.trunc().to_i64())
        .ok_or_else(|| out_of_range(raw))?;

    Duration::try_milliseconds(millis)
        .map(Some)
        .ok_or_else(|| out_of_range(raw))
}

fn out_of_range(raw: &str) -> RuleError {
    RuleError::InvalidValue {
        value: raw.to_string(),
        reason: "duration out of range".to_string(),
    }
}
