//! Mail providers: where emails come from.

pub mod gmail;
pub mod token;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ProviderError;
use crate::rules::EmailRecord;

pub use gmail::GmailClient;

/// A message as returned by a provider, before it is stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchedEmail {
    /// Provider-assigned unique id (Gmail message id).
    pub provider_id: String,
    pub thread_id: Option<String>,
    #[serde(default)]
    pub label_ids: Vec<String>,
    pub snippet: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub subject: Option<String>,
    pub message: Option<String>,
    pub received_date: DateTime<Utc>,
}

const SNIPPET_CHARS: usize = 100;

impl FetchedEmail {
    /// A locally created message (not from any provider), received now.
    pub fn synthetic(from: &str, to: &str, subject: &str, body: &str) -> Self {
        let snippet = if body.chars().count() > SNIPPET_CHARS {
            format!("{}...", body.chars().take(SNIPPET_CHARS).collect::<String>())
        } else {
            body.to_string()
        };

        Self {
            provider_id: Uuid::new_v4().to_string(),
            thread_id: Some(Uuid::new_v4().to_string()),
            label_ids: vec!["INBOX".to_string()],
            snippet: Some(snippet),
            from: Some(from.to_string()),
            to: Some(to.to_string()),
            subject: Some(subject.to_string()),
            message: Some(body.to_string()),
            received_date: Utc::now(),
        }
    }

    /// The shape the rules engine evaluates.
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

/// Lists recent messages matching a provider query.
#[async_trait]
pub trait MailProvider: Send + Sync {
    /// Provider name for logs and error messages.
    fn name(&self) -> &str;

    /// Fetch up to `max_results` messages matching `query`, newest first.
    async fn fetch_messages(
        &self,
        query: &str,
        max_results: u32,
    ) -> Result<Vec<FetchedEmail>, ProviderError>;
}
