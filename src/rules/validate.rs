//! Boundary checks for rule payloads.
//!
//! The engine tolerates unrecognized fields and predicates (they never match)
//! so that rows written by newer versions keep loading. New rules coming in
//! over the API are held to the stricter shape here.

use super::condition::parse_amount;
use super::model::{Action, ActionType, Condition, DateUnit, Field, NewRule, Predicate, RuleUpdate};
use crate::error::ValidationError;

impl NewRule {
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_name(&self.name)?;
        validate_conditions(&self.conditions)?;
        validate_actions(&self.actions)
    }
}

impl RuleUpdate {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if let Some(name) = &self.name {
            validate_name(name)?;
        }
        if let Some(conditions) = &self.conditions {
            validate_conditions(conditions)?;
        }
        if let Some(actions) = &self.actions {
            validate_actions(actions)?;
        }
        Ok(())
    }
}

fn validate_name(name: &str) -> Result<(), ValidationError> {
    if name.trim().is_empty() {
        return Err(ValidationError::EmptyName);
    }
    Ok(())
}

fn validate_conditions(conditions: &[Condition]) -> Result<(), ValidationError> {
    for (index, condition) in conditions.iter().enumerate() {
        if condition.field == Field::Unknown {
            return Err(ValidationError::UnknownField { index });
        }
        if condition.predicate == Predicate::Unknown {
            return Err(ValidationError::UnknownPredicate { index });
        }
        if condition.unit == Some(DateUnit::Unknown) {
            return Err(ValidationError::UnknownUnit { index });
        }
        if condition.predicate.is_date_comparison() {
            if condition.field != Field::ReceivedDate {
                return Err(ValidationError::DateOnlyPredicate {
                    index,
                    predicate: condition.predicate.to_string(),
                });
            }
            if parse_amount(&condition.value).is_err() {
                return Err(ValidationError::NonNumericValue {
                    index,
                    value: condition.value.clone(),
                });
            }
        }
    }
    Ok(())
}

fn validate_actions(actions: &[Action]) -> Result<(), ValidationError> {
    for (index, action) in actions.iter().enumerate() {
        let has_target = action.target.as_deref().is_some_and(|t| !t.trim().is_empty());
        if action.action_type == ActionType::MoveMessage && !has_target {
            return Err(ValidationError::MissingTarget { index });
        }
    }
    Ok(())
}
