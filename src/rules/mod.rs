//! Declarative email rules and the engine that evaluates them.

pub mod clock;
pub mod condition;
pub mod engine;
pub mod model;
mod validate;

pub use clock::{Clock, FixedClock, SystemClock};
pub use engine::RulesEngine;
pub use model::{
    Action, ActionType, Condition, DateUnit, EmailRecord, Field, MatchType, NewRule, Predicate,
    Rule, RuleUpdate,
};
