//! `Database` trait: single async interface for rule and email persistence.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::provider::FetchedEmail;
use crate::rules::{EmailRecord, NewRule, Rule, RuleUpdate};

/// A persisted email fetched from a provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEmail {
    pub id: Uuid,
    pub provider_id: String,
    pub thread_id: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub subject: Option<String>,
    pub message: Option<String>,
    pub snippet: Option<String>,
    pub received_date: DateTime<Utc>,
    pub label_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StoredEmail {
    pub fn to_record(&self) -> EmailRecord {
        EmailRecord {
            from: self.from.clone(),
            to: self.to.clone(),
            subject: self.subject.clone(),
            message: self.message.clone(),
            received_date: Some(self.received_date),
        }
    }
}

/// Backend-agnostic database trait covering rules and emails.
#[async_trait]
pub trait Database: Send + Sync {
    /// Run all pending schema migrations.
    async fn init_schema(&self) -> Result<(), DatabaseError>;

    // ── Rules ───────────────────────────────────────────────────────

    /// Rules in creation order, each with its conditions and actions.
    async fn list_rules(&self, skip: u32, limit: u32) -> Result<Vec<Rule>, DatabaseError>;

    async fn get_rule(&self, id: Uuid) -> Result<Option<Rule>, DatabaseError>;

    /// Insert a rule with its full condition and action sets.
    async fn create_rule(&self, rule: &NewRule) -> Result<Rule, DatabaseError>;

    /// Patch name/match type and replace condition/action sets that are
    /// present in `update`. Returns `None` if the rule does not exist.
    async fn update_rule(
        &self,
        id: Uuid,
        update: &RuleUpdate,
    ) -> Result<Option<Rule>, DatabaseError>;

    /// Delete a rule and its children. Returns whether a rule was deleted.
    async fn delete_rule(&self, id: Uuid) -> Result<bool, DatabaseError>;

    // ── Emails ──────────────────────────────────────────────────────

    /// Store a fetched email unless its provider id is already known.
    /// Either way, returns the stored record.
    async fn insert_email_if_absent(
        &self,
        email: &FetchedEmail,
    ) -> Result<StoredEmail, DatabaseError>;

    /// Stored emails, newest first.
    async fn list_emails(&self, skip: u32, limit: u32) -> Result<Vec<StoredEmail>, DatabaseError>;

    async fn get_email(&self, id: Uuid) -> Result<Option<StoredEmail>, DatabaseError>;

    async fn get_email_by_provider_id(
        &self,
        provider_id: &str,
    ) -> Result<Option<StoredEmail>, DatabaseError>;

    async fn delete_email(&self, id: Uuid) -> Result<bool, DatabaseError>;
}
