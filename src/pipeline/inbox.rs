//! Fetch → evaluate and fetch → store.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use crate::error::Error;
use crate::provider::{FetchedEmail, MailProvider};
use crate::rules::{Action, EmailRecord, Rule, RulesEngine};
use crate::store::{Database, StoredEmail};

/// Every stored rule, in creation order.
async fn all_rules(db: &dyn Database) -> Result<Vec<Rule>, Error> {
    Ok(db.list_rules(0, u32::MAX).await?)
}

/// Evaluate one email against every stored rule.
pub async fn actions_for(
    db: &dyn Database,
    engine: &RulesEngine,
    email: &EmailRecord,
) -> Result<Vec<Action>, Error> {
    let rules = all_rules(db).await?;
    Ok(engine.process_email(&rules, email)?)
}

/// A fetched email together with the actions its matching rules request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessedEmail {
    #[serde(flatten)]
    pub email: FetchedEmail,
    pub actions: Vec<Action>,
}

/// Connects a mail provider to the rule store and engine.
pub struct InboxProcessor {
    db: Arc<dyn Database>,
    provider: Arc<dyn MailProvider>,
    engine: Arc<RulesEngine>,
}

impl InboxProcessor {
    pub fn new(
        db: Arc<dyn Database>,
        provider: Arc<dyn MailProvider>,
        engine: Arc<RulesEngine>,
    ) -> Self {
        Self {
            db,
            provider,
            engine,
        }
    }

    /// Fetch messages and evaluate each against the stored rules.
    ///
    /// Rules are loaded once so every message in the batch sees the same set.
    pub async fn preview(
        &self,
        query: &str,
        max_results: u32,
    ) -> Result<Vec<ProcessedEmail>, Error> {
        let emails = self.provider.fetch_messages(query, max_results).await?;
        let rules = all_rules(self.db.as_ref()).await?;

        let mut processed = Vec::with_capacity(emails.len());
        for email in emails {
            let actions = self.engine.process_email(&rules, &email.to_record())?;
            debug!(
                provider_id = %email.provider_id,
                actions = actions.len(),
                "Evaluated fetched email"
            );
            processed.push(ProcessedEmail { email, actions });
        }

        info!(
            provider = self.provider.name(),
            count = processed.len(),
            rules = rules.len(),
            "Previewed inbox"
        );
        Ok(processed)
    }

    /// Fetch messages and store the ones not seen before.
    ///
    /// Returns the stored record for every fetched message, new or not.
    pub async fn sync(&self, query: &str, max_results: u32) -> Result<Vec<StoredEmail>, Error> {
        let emails = self.provider.fetch_messages(query, max_results).await?;

        let mut stored = Vec::with_capacity(emails.len());
        for email in &emails {
            stored.push(self.db.insert_email_if_absent(email).await?);
        }

        info!(
            provider = self.provider.name(),
            count = stored.len(),
            "Synced inbox"
        );
        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ProviderError, RuleError};
    use crate::rules::{Condition, Field, MatchType, NewRule, Predicate};
    use crate::store::LibSqlBackend;
    use async_trait::async_trait;
    use chrono::Utc;
    use pretty_assertions::assert_eq;

    struct StubProvider {
        emails: Vec<FetchedEmail>,
    }

    #[async_trait]
    impl MailProvider for StubProvider {
        fn name(&self) -> &str {
            "stub"
        }

        async fn fetch_messages(
            &self,
            _query: &str,
            max_results: u32,
        ) -> Result<Vec<FetchedEmail>, ProviderError> {
            Ok(self.emails.iter().take(max_results as usize).cloned().collect())
        }
    }

    struct FailingProvider;

    #[async_trait]
    impl MailProvider for FailingProvider {
        fn name(&self) -> &str {
            "failing"
        }

        async fn fetch_messages(
            &self,
            _query: &str,
            _max_results: u32,
        ) -> Result<Vec<FetchedEmail>, ProviderError> {
            Err(ProviderError::AuthFailed {
                provider: "failing".into(),
                reason: "expired".into(),
            })
        }
    }

    fn fetched(id: &str, from: &str, subject: &str) -> FetchedEmail {
        FetchedEmail {
            provider_id: id.to_string(),
            thread_id: None,
            label_ids: vec!["INBOX".into()],
            snippet: None,
            from: Some(from.to_string()),
            to: None,
            subject: Some(subject.to_string()),
            message: Some("Body".into()),
            received_date: Utc::now(),
        }
    }

    fn tenmiles_rule() -> NewRule {
        NewRule {
            name: "Tenmiles".into(),
            match_type: MatchType::All,
            conditions: vec![
                Condition::new(Field::From, Predicate::Contains, "tenmiles.com"),
                Condition::new(Field::Subject, Predicate::Contains, "Interview"),
            ],
            actions: vec![Action::move_message("Inbox"), Action::mark_as_read()],
        }
    }

    async fn setup(provider: Arc<dyn MailProvider>) -> (Arc<dyn Database>, InboxProcessor) {
        let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        db.create_rule(&tenmiles_rule()).await.unwrap();
        let processor = InboxProcessor::new(Arc::clone(&db), provider, Arc::new(RulesEngine::new()));
        (db, processor)
    }

    fn stub() -> Arc<dyn MailProvider> {
        Arc::new(StubProvider {
            emails: vec![
                fetched("m1", "x@tenmiles.com", "Interview Invitation"),
                fetched("m2", "x@example.com", "Interview Invitation"),
                fetched("m3", "y@tenmiles.com", "Lunch"),
            ],
        })
    }

    #[tokio::test]
    async fn preview_attaches_actions_per_message() {
        let (_db, processor) = setup(stub()).await;
        let processed = processor.preview("in:inbox", 10).await.unwrap();

        assert_eq!(processed.len(), 3);
        assert_eq!(
            processed[0].actions,
            vec![Action::move_message("Inbox"), Action::mark_as_read()]
        );
        assert!(processed[1].actions.is_empty());
        assert!(processed[2].actions.is_empty());
    }

    #[tokio::test]
    async fn preview_serializes_flat() {
        let (_db, processor) = setup(stub()).await;
        let processed = processor.preview("in:inbox", 1).await.unwrap();
        let json = serde_json::to_value(&processed[0]).unwrap();
        assert_eq!(json["provider_id"], "m1");
        assert_eq!(json["actions"][0]["type"], "move_message");
    }

    #[tokio::test]
    async fn sync_stores_each_message_once() {
        let (db, processor) = setup(stub()).await;

        let first = processor.sync("in:inbox", 2).await.unwrap();
        assert_eq!(first.len(), 2);
        let again = processor.sync("in:inbox", 3).await.unwrap();
        assert_eq!(again.len(), 3);
        assert_eq!(again[0].id, first[0].id);

        assert_eq!(db.list_emails(0, 100).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn provider_errors_propagate() {
        let (_db, processor) = setup(Arc::new(FailingProvider)).await;
        let err = processor.preview("in:inbox", 10).await.unwrap_err();
        assert!(matches!(err, Error::Provider(ProviderError::AuthFailed { .. })));
    }

    #[tokio::test]
    async fn actions_for_uses_stored_rules() {
        let db = LibSqlBackend::new_memory().await.unwrap();
        let engine = RulesEngine::new();
        let email = EmailRecord::new("x@tenmiles.com", "Interview Invitation", "...");

        assert!(actions_for(&db, &engine, &email).await.unwrap().is_empty());

        db.create_rule(&tenmiles_rule()).await.unwrap();
        db.create_rule(&NewRule {
            name: "Broken".into(),
            match_type: MatchType::All,
            conditions: vec![Condition::new(Field::ReceivedDate, Predicate::LessThan, "soon")],
            actions: vec![Action::mark_as_unread()],
        })
        .await
        .unwrap();

        let err = actions_for(&db, &engine, &email).await.unwrap_err();
        assert!(matches!(err, Error::Rule(RuleError::InRule { .. })));
    }
}
