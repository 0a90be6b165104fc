//! Rule, condition, action and email types consumed by the engine.
//!
//! Rules own their conditions and actions outright; evaluation only ever
//! walks rule → conditions/actions, so there are no back-references.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

// ── Conditions ──────────────────────────────────────────────────────

/// Email field a condition inspects.
///
/// `Unknown` absorbs field names written by a newer version of the service;
/// conditions on it never match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    From,
    Subject,
    Message,
    ReceivedDate,
    #[serde(other)]
    Unknown,
}

impl Field {
    pub fn as_str(&self) -> &'static str {
        match self {
            Field::From => "from",
            Field::Subject => "subject",
            Field::Message => "message",
            Field::ReceivedDate => "received_date",
            Field::Unknown => "unknown",
        }
    }

    /// Lenient parse used when reading stored rows.
    pub fn parse_lenient(s: &str) -> Self {
        match s {
            "from" => Field::From,
            "subject" => Field::Subject,
            "message" => Field::Message,
            "received_date" => Field::ReceivedDate,
            _ => Field::Unknown,
        }
    }
}

/// Comparison applied by a condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Predicate {
    Contains,
    DoesNotContain,
    Equals,
    DoesNotEqual,
    LessThan,
    GreaterThan,
    #[serde(other)]
    Unknown,
}

impl Predicate {
    pub fn as_str(&self) -> &'static str {
        match self {
            Predicate::Contains => "contains",
            Predicate::DoesNotContain => "does_not_contain",
            Predicate::Equals => "equals",
            Predicate::DoesNotEqual => "does_not_equal",
            Predicate::LessThan => "less_than",
            Predicate::GreaterThan => "greater_than",
            Predicate::Unknown => "unknown",
        }
    }

    pub fn parse_lenient(s: &str) -> Self {
        match s {
            "contains" => Predicate::Contains,
            "does_not_contain" => Predicate::DoesNotContain,
            "equals" => Predicate::Equals,
            "does_not_equal" => Predicate::DoesNotEqual,
            "less_than" => Predicate::LessThan,
            "greater_than" => Predicate::GreaterThan,
            _ => Predicate::Unknown,
        }
    }

    /// `less_than` / `greater_than` only apply to `received_date`.
    pub fn is_date_comparison(&self) -> bool {
        matches!(self, Predicate::LessThan | Predicate::GreaterThan)
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unit for date comparisons. Months are approximated as 30 days.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DateUnit {
    #[default]
    Days,
    Months,
    #[serde(other)]
    Unknown,
}

impl DateUnit {
    pub fn as_str(&self) -> &'static str {
        match self {
            DateUnit::Days => "days",
            DateUnit::Months => "months",
            DateUnit::Unknown => "unknown",
        }
    }

    pub fn parse_lenient(s: &str) -> Self {
        match s {
            "days" => DateUnit::Days,
            "months" => DateUnit::Months,
            _ => DateUnit::Unknown,
        }
    }
}

/// A single predicate test against one email field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
    pub field: Field,
    pub predicate: Predicate,
    pub value: String,
    /// Only meaningful for date predicates; `None` means days.
    #[serde(default)]
    pub unit: Option<DateUnit>,
}

impl Condition {
    pub fn new(field: Field, predicate: Predicate, value: impl Into<String>) -> Self {
        Self {
            field,
            predicate,
            value: value.into(),
            unit: None,
        }
    }

    pub fn with_unit(mut self, unit: DateUnit) -> Self {
        self.unit = Some(unit);
        self
    }
}

// ── Actions ─────────────────────────────────────────────────────────

/// Effect requested by a matching rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    MarkAsRead,
    MarkAsUnread,
    MoveMessage,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::MarkAsRead => "mark_as_read",
            ActionType::MarkAsUnread => "mark_as_unread",
            ActionType::MoveMessage => "move_message",
        }
    }
}

impl FromStr for ActionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mark_as_read" => Ok(ActionType::MarkAsRead),
            "mark_as_unread" => Ok(ActionType::MarkAsUnread),
            "move_message" => Ok(ActionType::MoveMessage),
            other => Err(format!("unknown action type: {other}")),
        }
    }
}

/// An action to apply to an email. `target` names the destination folder or
/// label for `move_message`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    #[serde(rename = "type")]
    pub action_type: ActionType,
    #[serde(default)]
    pub target: Option<String>,
}

impl Action {
    pub fn mark_as_read() -> Self {
        Self {
            action_type: ActionType::MarkAsRead,
            target: None,
        }
    }

    pub fn mark_as_unread() -> Self {
        Self {
            action_type: ActionType::MarkAsUnread,
            target: None,
        }
    }

    pub fn move_message(target: impl Into<String>) -> Self {
        Self {
            action_type: ActionType::MoveMessage,
            target: Some(target.into()),
        }
    }
}

// ── Rules ───────────────────────────────────────────────────────────

/// How a rule combines its condition results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    All,
    Any,
}

impl MatchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchType::All => "all",
            MatchType::Any => "any",
        }
    }
}

impl FromStr for MatchType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all" => Ok(MatchType::All),
            "any" => Ok(MatchType::Any),
            other => Err(format!("unknown match type: {other}")),
        }
    }
}

/// A persisted rule: match policy, ordered conditions, ordered actions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub id: Uuid,
    pub name: String,
    pub match_type: MatchType,
    pub conditions: Vec<Condition>,
    pub actions: Vec<Action>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Rule {
    /// Build an unsaved rule with a fresh id.
    pub fn new(
        name: impl Into<String>,
        match_type: MatchType,
        conditions: Vec<Condition>,
        actions: Vec<Action>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            match_type,
            conditions,
            actions,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Payload for creating a rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRule {
    pub name: String,
    pub match_type: MatchType,
    pub conditions: Vec<Condition>,
    pub actions: Vec<Action>,
}

/// Partial update. Condition and action sets are replaced wholesale when present.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub match_type: Option<MatchType>,
    #[serde(default)]
    pub conditions: Option<Vec<Condition>>,
    #[serde(default)]
    pub actions: Option<Vec<Action>>,
}

// ── Email ───────────────────────────────────────────────────────────

/// The email shape the engine evaluates. Missing text fields read as empty
/// strings; a missing `received_date` reads as the evaluation instant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailRecord {
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default, deserialize_with = "lenient_datetime")]
    pub received_date: Option<DateTime<Utc>>,
}

impl EmailRecord {
    pub fn new(from: &str, subject: &str, message: &str) -> Self {
        Self {
            from: Some(from.to_string()),
            to: None,
            subject: Some(subject.to_string()),
            message: Some(message.to_string()),
            received_date: None,
        }
    }

    pub fn received_at(mut self, received_date: DateTime<Utc>) -> Self {
        self.received_date = Some(received_date);
        self
    }
}

/// Parse a timestamp from RFC 3339 or a naive ISO 8601 string (taken as UTC).
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(ndt) = NaiveDateTime::parse_from_str(s, format) {
            return Some(ndt.and_utc());
        }
    }
    None
}

/// Unparsable or non-string dates deserialize as `None` rather than failing.
fn lenient_datetime<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match raw {
        Some(serde_json::Value::String(s)) => parse_timestamp(&s),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn condition_deserializes_snake_case() {
        let json = r#"{"field":"received_date","predicate":"less_than","value":"2","unit":"months"}"#;
        let c: Condition = serde_json::from_str(json).unwrap();
        assert_eq!(c.field, Field::ReceivedDate);
        assert_eq!(c.predicate, Predicate::LessThan);
        assert_eq!(c.unit, Some(DateUnit::Months));
    }

    #[test]
    fn unrecognized_names_become_unknown() {
        let json = r#"{"field":"cc","predicate":"matches_regex","value":"x","unit":"weeks"}"#;
        let c: Condition = serde_json::from_str(json).unwrap();
        assert_eq!(c.field, Field::Unknown);
        assert_eq!(c.predicate, Predicate::Unknown);
        assert_eq!(c.unit, Some(DateUnit::Unknown));
    }

    #[test]
    fn unit_is_optional() {
        let json = r#"{"field":"subject","predicate":"contains","value":"x"}"#;
        let c: Condition = serde_json::from_str(json).unwrap();
        assert_eq!(c.unit, None);
    }

    #[test]
    fn action_serializes_type_and_null_target() {
        let json = serde_json::to_value(Action::mark_as_read()).unwrap();
        assert_eq!(json, serde_json::json!({"type": "mark_as_read", "target": null}));

        let json = serde_json::to_value(Action::move_message("Inbox")).unwrap();
        assert_eq!(json, serde_json::json!({"type": "move_message", "target": "Inbox"}));
    }

    #[test]
    fn invalid_match_type_is_rejected() {
        let json = r#"{"name":"r","match_type":"some","conditions":[],"actions":[]}"#;
        assert!(serde_json::from_str::<NewRule>(json).is_err());
        assert_eq!("any".parse::<MatchType>(), Ok(MatchType::Any));
        assert!("most".parse::<MatchType>().is_err());
    }

    #[test]
    fn email_accepts_naive_and_rfc3339_dates() {
        let naive: EmailRecord =
            serde_json::from_str(r#"{"from":"a@b.c","received_date":"2023-11-01T12:00:00"}"#)
                .unwrap();
        assert_eq!(
            naive.received_date,
            Some(Utc.with_ymd_and_hms(2023, 11, 1, 12, 0, 0).unwrap())
        );

        let zoned: EmailRecord =
            serde_json::from_str(r#"{"received_date":"2023-11-01T14:00:00+02:00"}"#).unwrap();
        assert_eq!(zoned.received_date, naive.received_date);
    }

    #[test]
    fn email_with_garbage_date_falls_back_to_none() {
        let email: EmailRecord =
            serde_json::from_str(r#"{"subject":"hi","received_date":"yesterday-ish"}"#).unwrap();
        assert_eq!(email.received_date, None);
        assert_eq!(email.subject.as_deref(), Some("hi"));

        let email: EmailRecord = serde_json::from_str(r#"{"received_date":12345}"#).unwrap();
        assert_eq!(email.received_date, None);
    }

    #[test]
    fn lenient_parsers_roundtrip_known_names() {
        for field in [Field::From, Field::Subject, Field::Message, Field::ReceivedDate] {
            assert_eq!(Field::parse_lenient(field.as_str()), field);
        }
        for unit in [DateUnit::Days, DateUnit::Months] {
            assert_eq!(DateUnit::parse_lenient(unit.as_str()), unit);
        }
        assert_eq!(Predicate::parse_lenient("does_not_equal"), Predicate::DoesNotEqual);
        assert_eq!(Predicate::parse_lenient("starts_with"), Predicate::Unknown);
    }
}
