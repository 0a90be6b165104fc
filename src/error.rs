//! Error types for Mail Rules.

/// Top-level error type for the service.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Mail provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Rule evaluation error: {0}")]
    Rule(#[from] RuleError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Mail provider errors.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("No mail provider configured")]
    NotConfigured,

    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Authentication failed for provider {provider}: {reason}")]
    AuthFailed { provider: String, reason: String },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Failed to read credentials: {0}")]
    Credentials(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while evaluating rules against an email.
///
/// Unknown fields, predicates and units are not errors (they never match);
/// only malformed values that the caller supplied end up here.
#[derive(Debug, thiserror::Error)]
pub enum RuleError {
    #[error("Invalid value '{value}' for date condition: {reason}")]
    InvalidValue { value: String, reason: String },

    #[error("Rule '{rule}' failed: {source}")]
    InRule {
        rule: String,
        #[source]
        source: Box<RuleError>,
    },
}

impl RuleError {
    /// Attach the name of the rule that was being evaluated.
    pub fn in_rule(self, rule: &str) -> Self {
        match self {
            already @ RuleError::InRule { .. } => already,
            other => RuleError::InRule {
                rule: rule.to_string(),
                source: Box::new(other),
            },
        }
    }
}

/// Rule definitions rejected at the API boundary.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Rule name must not be empty")]
    EmptyName,

    #[error("Condition {index}: unrecognized field")]
    UnknownField { index: usize },

    #[error("Condition {index}: unrecognized predicate")]
    UnknownPredicate { index: usize },

    #[error("Condition {index}: unrecognized unit (expected days or months)")]
    UnknownUnit { index: usize },

    #[error("Condition {index}: {predicate} is only valid for received_date")]
    DateOnlyPredicate { index: usize, predicate: String },

    #[error("Condition {index}: value '{value}' is not a number")]
    NonNumericValue { index: usize, value: String },

    #[error("Action {index}: move_message requires a target")]
    MissingTarget { index: usize },
}

/// Result type alias for the service.
pub type Result<T> = std::result::Result<T, Error>;
