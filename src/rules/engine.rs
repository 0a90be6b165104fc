//! Rules engine: evaluates stored rules against an email and collects the
//! actions of every rule that matches.
//!
//! Evaluation is pure apart from the clock, which is read once per
//! condition. Rules are visited in the order the caller supplies and actions
//! are appended in each rule's own order. Nothing is deduplicated: two
//! matching rules that both mark as read yield two `mark_as_read` entries.

use std::sync::Arc;

use tracing::debug;

use super::clock::{Clock, SystemClock};
use super::condition;
use super::model::{Action, Condition, EmailRecord, MatchType, Rule};
use crate::error::RuleError;

/// Evaluates rules using an injectable clock.
#[derive(Clone)]
pub struct RulesEngine {
    clock: Arc<dyn Clock>,
}

impl Default for RulesEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl RulesEngine {
    /// Engine backed by the system clock.
    pub fn new() -> Self {
        Self {
            clock: Arc::new(SystemClock),
        }
    }

    /// Engine with a custom clock (tests use `FixedClock`).
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    /// Evaluate a single condition at the current instant.
    pub fn evaluate_condition(
        &self,
        condition: &Condition,
        email: &EmailRecord,
    ) -> Result<bool, RuleError> {
        condition::evaluate(condition, email, self.clock.now())
    }

    /// Whether a rule matches. A rule without conditions never matches.
    pub fn evaluate_rule(&self, rule: &Rule, email: &EmailRecord) -> Result<bool, RuleError> {
        if rule.conditions.is_empty() {
            return Ok(false);
        }

        match rule.match_type {
            MatchType::All => {
                for condition in &rule.conditions {
                    if !self.evaluate_condition(condition, email)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            MatchType::Any => {
                for condition in &rule.conditions {
                    if self.evaluate_condition(condition, email)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
        }
    }

    /// Collect the actions of every matching rule, in rule order.
    pub fn process_email(
        &self,
        rules: &[Rule],
        email: &EmailRecord,
    ) -> Result<Vec<Action>, RuleError> {
        let mut actions = Vec::new();

        for rule in rules {
            let matched = self
                .evaluate_rule(rule, email)
                .map_err(|e| e.in_rule(&rule.name))?;

            if matched {
                debug!(
                    rule = %rule.name,
                    actions = rule.actions.len(),
                    "Email matched rule"
                );
                actions.extend(rule.actions.iter().cloned());
            }
        }

        Ok(actions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::clock::FixedClock;
    use crate::rules::model::{DateUnit, Field, Predicate};
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use pretty_assertions::assert_eq;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 9, 30, 0).unwrap()
    }

    fn engine() -> RulesEngine {
        RulesEngine::with_clock(Arc::new(FixedClock(now())))
    }

    fn make_email(from: &str, subject: &str) -> EmailRecord {
        EmailRecord::new(from, subject, "Please find the details below.").received_at(now())
    }

    fn make_rule(name: &str, match_type: MatchType, conditions: Vec<Condition>) -> Rule {
        Rule::new(name, match_type, conditions, vec![Action::mark_as_read()])
    }

    fn from_contains(value: &str) -> Condition {
        Condition::new(Field::From, Predicate::Contains, value)
    }

    fn subject_contains(value: &str) -> Condition {
        Condition::new(Field::Subject, Predicate::Contains, value)
    }

    fn tenmiles_rule() -> Rule {
        Rule::new(
            "Tenmiles interviews",
            MatchType::All,
            vec![from_contains("tenmiles.com"), subject_contains("Interview")],
            vec![Action::move_message("Inbox"), Action::mark_as_read()],
        )
    }

    #[test]
    fn empty_conditions_never_match() {
        let email = make_email("x@tenmiles.com", "Interview");
        for match_type in [MatchType::All, MatchType::Any] {
            let rule = make_rule("empty", match_type, vec![]);
            assert!(!engine().evaluate_rule(&rule, &email).unwrap());
        }
    }

    #[test]
    fn all_fails_on_a_single_failing_condition() {
        let email = make_email("x@tenmiles.com", "Interview Invitation");
        let rule = make_rule(
            "all",
            MatchType::All,
            vec![
                from_contains("tenmiles"),
                subject_contains("interview"),
                subject_contains("invitation"),
                subject_contains("rejection"),
            ],
        );
        assert!(!engine().evaluate_rule(&rule, &email).unwrap());
    }

    #[test]
    fn all_matches_when_every_condition_passes() {
        let email = make_email("x@tenmiles.com", "Interview Invitation");
        let rule = make_rule(
            "all",
            MatchType::All,
            vec![from_contains("tenmiles"), subject_contains("invitation")],
        );
        assert!(engine().evaluate_rule(&rule, &email).unwrap());
    }

    #[test]
    fn any_matches_on_a_single_passing_condition() {
        let email = make_email("x@tenmiles.com", "Lunch?");
        let rule = make_rule(
            "any",
            MatchType::Any,
            vec![
                subject_contains("invoice"),
                subject_contains("interview"),
                from_contains("tenmiles"),
            ],
        );
        assert!(engine().evaluate_rule(&rule, &email).unwrap());
    }

    #[test]
    fn any_fails_when_nothing_passes() {
        let email = make_email("x@example.com", "Lunch?");
        let rule = make_rule(
            "any",
            MatchType::Any,
            vec![subject_contains("invoice"), from_contains("tenmiles")],
        );
        assert!(!engine().evaluate_rule(&rule, &email).unwrap());
    }

    #[test]
    fn no_rules_yield_no_actions() {
        let email = make_email("x@tenmiles.com", "Interview");
        assert!(engine().process_email(&[], &email).unwrap().is_empty());
    }

    #[test]
    fn tenmiles_scenario() {
        let rules = vec![tenmiles_rule()];

        let matching = make_email("x@tenmiles.com", "Interview Invitation");
        assert_eq!(
            engine().process_email(&rules, &matching).unwrap(),
            vec![Action::move_message("Inbox"), Action::mark_as_read()]
        );

        let other = make_email("x@example.com", "Interview Invitation");
        assert!(engine().process_email(&rules, &other).unwrap().is_empty());
    }

    #[test]
    fn matching_rules_concatenate_in_order_with_duplicates() {
        let email = make_email("x@tenmiles.com", "Interview Invitation");
        let second = Rule::new(
            "Everything from tenmiles",
            MatchType::Any,
            vec![from_contains("tenmiles")],
            vec![Action::mark_as_read(), Action::move_message("Recruiting")],
        );
        let skipped = make_rule("never", MatchType::All, vec![from_contains("nobody")]);
        let rules = vec![tenmiles_rule(), skipped, second];

        assert_eq!(
            engine().process_email(&rules, &email).unwrap(),
            vec![
                Action::move_message("Inbox"),
                Action::mark_as_read(),
                Action::mark_as_read(),
                Action::move_message("Recruiting"),
            ]
        );
    }

    #[test]
    fn date_conditions_use_the_injected_clock() {
        let email = make_email("x@tenmiles.com", "Old news").received_at(now() - Duration::hours(12));
        let recent = Condition::new(Field::ReceivedDate, Predicate::LessThan, "1")
            .with_unit(DateUnit::Days);
        let very_recent = Condition::new(Field::ReceivedDate, Predicate::LessThan, "0.01")
            .with_unit(DateUnit::Days);

        assert!(engine().evaluate_condition(&recent, &email).unwrap());
        assert!(!engine().evaluate_condition(&very_recent, &email).unwrap());

        // A day later the same email is no longer "less than one day" old.
        let later = RulesEngine::with_clock(Arc::new(FixedClock(now() + Duration::days(1))));
        assert!(!later.evaluate_condition(&recent, &email).unwrap());
    }

    #[test]
    fn invalid_date_value_names_the_rule() {
        let email = make_email("x@tenmiles.com", "Interview");
        let bad = Rule::new(
            "Stale mail",
            MatchType::All,
            vec![Condition::new(Field::ReceivedDate, Predicate::GreaterThan, "a week")],
            vec![Action::mark_as_read()],
        );
        let rules = vec![tenmiles_rule(), bad];

        let err = engine().process_email(&rules, &email).unwrap_err();
        match err {
            RuleError::InRule { rule, source } => {
                assert_eq!(rule, "Stale mail");
                assert!(matches!(*source, RuleError::InvalidValue { .. }));
            }
            other => panic!("Expected InRule, got {other:?}"),
        }
    }

    #[test]
    fn unknown_condition_parts_never_match() {
        let email = make_email("x@tenmiles.com", "Interview");
        let rule = make_rule(
            "future",
            MatchType::Any,
            vec![
                Condition::new(Field::Unknown, Predicate::Contains, "x"),
                Condition::new(Field::Subject, Predicate::Unknown, "Interview"),
            ],
        );
        assert!(!engine().evaluate_rule(&rule, &email).unwrap());
    }

    #[test]
    fn subject_equals_is_case_insensitive() {
        let email = make_email("x@tenmiles.com", "test");
        let rule = make_rule(
            "eq",
            MatchType::All,
            vec![Condition::new(Field::Subject, Predicate::Equals, "TEST")],
        );
        assert!(engine().evaluate_rule(&rule, &email).unwrap());
    }
}
