//! libSQL backend: async `Database` trait implementation.
//!
//! Supports local file and in-memory databases. Rule writes touch three
//! tables and always run inside a transaction.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::provider::FetchedEmail;
use crate::rules::model::parse_timestamp;
use crate::rules::{Action, ActionType, Condition, DateUnit, Field, MatchType, NewRule, Predicate, Rule, RuleUpdate};
use crate::store::migrations;
use crate::store::traits::{Database, StoredEmail};

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    /// Owns the database handle that `conn` was opened from.
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let backend = Self::from_database(db)?;
        backend.init_schema().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let backend = Self::from_database(db)?;
        backend.init_schema().await?;
        Ok(backend)
    }

    fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;
        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Load conditions and actions for a rule header.
    async fn hydrate(&self, header: RuleHeader) -> Result<Rule, DatabaseError> {
        let id = header.id.to_string();
        let conn = self.conn();

        let mut rows = conn
            .query(
                "SELECT field, predicate, value, unit FROM conditions WHERE rule_id = ?1 ORDER BY position",
                params![id.as_str()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("load_conditions: {e}")))?;

        let mut conditions = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_condition(&row) {
                Ok(condition) => conditions.push(condition),
                Err(e) => tracing::warn!(rule_id = %id, "Skipping condition row: {e}"),
            }
        }

        let mut rows = conn
            .query(
                "SELECT action_type, target FROM actions WHERE rule_id = ?1 ORDER BY position",
                params![id.as_str()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("load_actions: {e}")))?;

        let mut actions = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_action(&row) {
                Ok(action) => actions.push(action),
                Err(e) => tracing::warn!(rule_id = %id, "Skipping action row: {e}"),
            }
        }

        Ok(Rule {
            id: header.id,
            name: header.name,
            match_type: header.match_type,
            conditions,
            actions,
            created_at: header.created_at,
            updated_at: header.updated_at,
        })
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Canonical write format. Fixed width so that text order is time order.
fn timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, DatabaseError> {
    parse_timestamp(s).ok_or_else(|| DatabaseError::Serialization(format!("bad timestamp: {s}")))
}

fn parse_uuid(s: &str) -> Result<Uuid, DatabaseError> {
    Uuid::parse_str(s).map_err(|e| DatabaseError::Serialization(format!("bad id {s}: {e}")))
}

fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

fn column(row: &libsql::Row, idx: i32) -> Result<String, DatabaseError> {
    row.get::<String>(idx)
        .map_err(|e| DatabaseError::Serialization(format!("column {idx}: {e}")))
}

/// Nullable text column.
fn opt_column(row: &libsql::Row, idx: i32) -> Option<String> {
    row.get::<String>(idx).ok()
}

struct RuleHeader {
    id: Uuid,
    name: String,
    match_type: MatchType,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

const RULE_COLUMNS: &str = "id, name, match_type, created_at, updated_at";

fn row_to_header(row: &libsql::Row) -> Result<RuleHeader, DatabaseError> {
    let id: String = column(row, 0)?;
    let match_type: String = column(row, 2)?;
    let created_at: String = column(row, 3)?;
    let updated_at: String = column(row, 4)?;

    Ok(RuleHeader {
        id: parse_uuid(&id)?,
        name: column(row, 1)?,
        match_type: match_type.parse().map_err(DatabaseError::Serialization)?,
        created_at: parse_datetime(&created_at)?,
        updated_at: parse_datetime(&updated_at)?,
    })
}

fn row_to_condition(row: &libsql::Row) -> Result<Condition, DatabaseError> {
    let field: String = column(row, 0)?;
    let predicate: String = column(row, 1)?;
    Ok(Condition {
        field: Field::parse_lenient(&field),
        predicate: Predicate::parse_lenient(&predicate),
        value: column(row, 2)?,
        unit: opt_column(row, 3).map(|u| DateUnit::parse_lenient(&u)),
    })
}

fn row_to_action(row: &libsql::Row) -> Result<Action, DatabaseError> {
    let action_type: String = column(row, 0)?;
    Ok(Action {
        action_type: action_type
            .parse::<ActionType>()
            .map_err(DatabaseError::Serialization)?,
        target: opt_column(row, 1),
    })
}

const EMAIL_COLUMNS: &str = "id, provider_id, thread_id, sender, recipient, subject, message, snippet, received_date, label_ids, created_at, updated_at";

fn row_to_email(row: &libsql::Row) -> Result<StoredEmail, DatabaseError> {
    let id: String = column(row, 0)?;
    let received_date: String = column(row, 8)?;
    let label_ids: String = column(row, 9)?;
    let created_at: String = column(row, 10)?;
    let updated_at: String = column(row, 11)?;

    Ok(StoredEmail {
        id: parse_uuid(&id)?,
        provider_id: column(row, 1)?,
        thread_id: opt_column(row, 2),
        from: opt_column(row, 3),
        to: opt_column(row, 4),
        subject: opt_column(row, 5),
        message: opt_column(row, 6),
        snippet: opt_column(row, 7),
        received_date: parse_datetime(&received_date)?,
        label_ids: serde_json::from_str(&label_ids)
            .map_err(|e| DatabaseError::Serialization(format!("label_ids: {e}")))?,
        created_at: parse_datetime(&created_at)?,
        updated_at: parse_datetime(&updated_at)?,
    })
}

/// Write a rule's conditions and actions with their positions.
async fn insert_children(
    conn: &Connection,
    rule_id: &str,
    conditions: Option<&[Condition]>,
    actions: Option<&[Action]>,
) -> Result<(), DatabaseError> {
    if let Some(conditions) = conditions {
        for (position, c) in conditions.iter().enumerate() {
            conn.execute(
                "INSERT INTO conditions (rule_id, position, field, predicate, value, unit) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    rule_id,
                    position as i64,
                    c.field.as_str(),
                    c.predicate.as_str(),
                    c.value.as_str(),
                    opt_text(c.unit.as_ref().map(DateUnit::as_str)),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_condition: {e}")))?;
        }
    }

    if let Some(actions) = actions {
        for (position, a) in actions.iter().enumerate() {
            conn.execute(
                "INSERT INTO actions (rule_id, position, action_type, target) VALUES (?1, ?2, ?3, ?4)",
                params![
                    rule_id,
                    position as i64,
                    a.action_type.as_str(),
                    opt_text(a.target.as_deref()),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_action: {e}")))?;
        }
    }
    Ok(())
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl Database for LibSqlBackend {
    async fn init_schema(&self) -> Result<(), DatabaseError> {
        self.conn()
            .execute_batch("PRAGMA foreign_keys = ON;")
            .await
            .map_err(|e| DatabaseError::Migration(format!("enable foreign keys: {e}")))?;
        migrations::run_migrations(self.conn()).await
    }

    // ── Rules ───────────────────────────────────────────────────────

    async fn list_rules(&self, skip: u32, limit: u32) -> Result<Vec<Rule>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {RULE_COLUMNS} FROM rules ORDER BY created_at ASC, rowid ASC LIMIT ?1 OFFSET ?2"
                ),
                params![i64::from(limit), i64::from(skip)],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_rules: {e}")))?;

        let mut headers = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_header(&row) {
                Ok(header) => headers.push(header),
                Err(e) => tracing::warn!("Skipping rule row: {e}"),
            }
        }

        let mut rules = Vec::with_capacity(headers.len());
        for header in headers {
            rules.push(self.hydrate(header).await?);
        }
        Ok(rules)
    }

    async fn get_rule(&self, id: Uuid) -> Result<Option<Rule>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {RULE_COLUMNS} FROM rules WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_rule: {e}")))?;

        let header = match rows.next().await {
            Ok(Some(row)) => row_to_header(&row)?,
            Ok(None) => return Ok(None),
            Err(e) => return Err(DatabaseError::Query(format!("get_rule: {e}"))),
        };
        self.hydrate(header).await.map(Some)
    }

    async fn create_rule(&self, new_rule: &NewRule) -> Result<Rule, DatabaseError> {
        let rule = Rule::new(
            new_rule.name.trim(),
            new_rule.match_type,
            new_rule.conditions.clone(),
            new_rule.actions.clone(),
        );
        let id = rule.id.to_string();

        let tx = self
            .conn()
            .transaction()
            .await
            .map_err(|e| DatabaseError::Query(format!("create_rule begin: {e}")))?;

        tx.execute(
            "INSERT INTO rules (id, name, match_type, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                id.as_str(),
                rule.name.as_str(),
                rule.match_type.as_str(),
                timestamp(&rule.created_at),
                timestamp(&rule.updated_at),
            ],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("create_rule: {e}")))?;

        insert_children(&tx, &id, Some(&rule.conditions), Some(&rule.actions)).await?;

        tx.commit()
            .await
            .map_err(|e| DatabaseError::Query(format!("create_rule commit: {e}")))?;

        debug!(rule_id = %rule.id, name = %rule.name, "Rule created");
        self.get_rule(rule.id).await?.ok_or_else(|| DatabaseError::NotFound {
            entity: "rule".into(),
            id,
        })
    }

    async fn update_rule(
        &self,
        id: Uuid,
        update: &RuleUpdate,
    ) -> Result<Option<Rule>, DatabaseError> {
        let rule_id = id.to_string();
        let tx = self
            .conn()
            .transaction()
            .await
            .map_err(|e| DatabaseError::Query(format!("update_rule begin: {e}")))?;

        let mut rows = tx
            .query(
                "SELECT name, match_type FROM rules WHERE id = ?1",
                params![rule_id.as_str()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("update_rule: {e}")))?;
        let (name, match_type): (String, String) = match rows.next().await {
            Ok(Some(row)) => (column(&row, 0)?, column(&row, 1)?),
            Ok(None) => {
                drop(rows);
                tx.rollback()
                    .await
                    .map_err(|e| DatabaseError::Query(format!("update_rule rollback: {e}")))?;
                return Ok(None);
            }
            Err(e) => return Err(DatabaseError::Query(format!("update_rule: {e}"))),
        };
        drop(rows);

        let name = update.name.as_deref().map(str::trim).unwrap_or(name.as_str());
        let match_type = update
            .match_type
            .map(|m| m.as_str())
            .unwrap_or(match_type.as_str());

        tx.execute(
            "UPDATE rules SET name = ?1, match_type = ?2, updated_at = ?3 WHERE id = ?4",
            params![name, match_type, timestamp(&Utc::now()), rule_id.as_str()],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("update_rule: {e}")))?;

        if update.conditions.is_some() {
            tx.execute(
                "DELETE FROM conditions WHERE rule_id = ?1",
                params![rule_id.as_str()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("update_rule conditions: {e}")))?;
        }
        if update.actions.is_some() {
            tx.execute(
                "DELETE FROM actions WHERE rule_id = ?1",
                params![rule_id.as_str()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("update_rule actions: {e}")))?;
        }
        insert_children(
            &tx,
            &rule_id,
            update.conditions.as_deref(),
            update.actions.as_deref(),
        )
        .await?;

        tx.commit()
            .await
            .map_err(|e| DatabaseError::Query(format!("update_rule commit: {e}")))?;

        debug!(rule_id = %id, "Rule updated");
        self.get_rule(id).await
    }

    async fn delete_rule(&self, id: Uuid) -> Result<bool, DatabaseError> {
        let rule_id = id.to_string();
        let tx = self
            .conn()
            .transaction()
            .await
            .map_err(|e| DatabaseError::Query(format!("delete_rule begin: {e}")))?;

        for table in ["conditions", "actions"] {
            tx.execute(
                &format!("DELETE FROM {table} WHERE rule_id = ?1"),
                params![rule_id.as_str()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("delete_rule {table}: {e}")))?;
        }
        let deleted = tx
            .execute("DELETE FROM rules WHERE id = ?1", params![rule_id.as_str()])
            .await
            .map_err(|e| DatabaseError::Query(format!("delete_rule: {e}")))?;

        tx.commit()
            .await
            .map_err(|e| DatabaseError::Query(format!("delete_rule commit: {e}")))?;

        debug!(rule_id = %id, deleted, "Rule delete");
        Ok(deleted > 0)
    }

    // ── Emails ──────────────────────────────────────────────────────

    async fn insert_email_if_absent(
        &self,
        email: &FetchedEmail,
    ) -> Result<StoredEmail, DatabaseError> {
        let now = timestamp(&Utc::now());
        let label_ids = serde_json::to_string(&email.label_ids)
            .map_err(|e| DatabaseError::Serialization(format!("label_ids: {e}")))?;

        let inserted = self
            .conn()
            .execute(
                &format!(
                    "INSERT OR IGNORE INTO emails ({EMAIL_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"
                ),
                params![
                    Uuid::new_v4().to_string(),
                    email.provider_id.as_str(),
                    opt_text(email.thread_id.as_deref()),
                    opt_text(email.from.as_deref()),
                    opt_text(email.to.as_deref()),
                    opt_text(email.subject.as_deref()),
                    opt_text(email.message.as_deref()),
                    opt_text(email.snippet.as_deref()),
                    timestamp(&email.received_date),
                    label_ids,
                    now.as_str(),
                    now.as_str(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_email_if_absent: {e}")))?;

        if inserted > 0 {
            debug!(provider_id = %email.provider_id, "Email stored");
        }

        self.get_email_by_provider_id(&email.provider_id)
            .await?
            .ok_or_else(|| DatabaseError::NotFound {
                entity: "email".into(),
                id: email.provider_id.clone(),
            })
    }

    async fn list_emails(&self, skip: u32, limit: u32) -> Result<Vec<StoredEmail>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {EMAIL_COLUMNS} FROM emails ORDER BY received_date DESC, rowid DESC LIMIT ?1 OFFSET ?2"
                ),
                params![i64::from(limit), i64::from(skip)],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_emails: {e}")))?;

        let mut emails = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_email(&row) {
                Ok(email) => emails.push(email),
                Err(e) => tracing::warn!("Skipping email row: {e}"),
            }
        }
        Ok(emails)
    }

    async fn get_email(&self, id: Uuid) -> Result<Option<StoredEmail>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {EMAIL_COLUMNS} FROM emails WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_email: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => row_to_email(&row).map(Some),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_email: {e}"))),
        }
    }

    async fn get_email_by_provider_id(
        &self,
        provider_id: &str,
    ) -> Result<Option<StoredEmail>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {EMAIL_COLUMNS} FROM emails WHERE provider_id = ?1"),
                params![provider_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_email_by_provider_id: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => row_to_email(&row).map(Some),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_email_by_provider_id: {e}"))),
        }
    }

    async fn delete_email(&self, id: Uuid) -> Result<bool, DatabaseError> {
        let deleted = self
            .conn()
            .execute("DELETE FROM emails WHERE id = ?1", params![id.to_string()])
            .await
            .map_err(|e| DatabaseError::Query(format!("delete_email: {e}")))?;
        Ok(deleted > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use pretty_assertions::assert_eq;

    async fn test_db() -> LibSqlBackend {
        LibSqlBackend::new_memory().await.unwrap()
    }

    fn make_rule(name: &str) -> NewRule {
        NewRule {
            name: name.to_string(),
            match_type: MatchType::All,
            conditions: vec![
                Condition::new(Field::From, Predicate::Contains, "tenmiles.com"),
                Condition::new(Field::ReceivedDate, Predicate::LessThan, "2")
                    .with_unit(DateUnit::Months),
            ],
            actions: vec![Action::move_message("Inbox"), Action::mark_as_read()],
        }
    }

    fn make_email(provider_id: &str, hours_ago: i64) -> FetchedEmail {
        FetchedEmail {
            provider_id: provider_id.to_string(),
            thread_id: Some(format!("thread-{provider_id}")),
            label_ids: vec!["INBOX".into(), "UNREAD".into()],
            snippet: Some("Hello there".into()),
            from: Some("Alice <alice@tenmiles.com>".into()),
            to: Some("me@example.com".into()),
            subject: Some("Interview".into()),
            message: Some("Hello there, are you free?".into()),
            received_date: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
                - Duration::hours(hours_ago),
        }
    }

    async fn count(db: &LibSqlBackend, table: &str) -> i64 {
        let mut rows = db
            .conn()
            .query(&format!("SELECT COUNT(*) FROM {table}"), ())
            .await
            .unwrap();
        rows.next().await.unwrap().unwrap().get(0).unwrap()
    }

    // ── Rule tests ──────────────────────────────────────────────────

    #[tokio::test]
    async fn create_and_get_rule() {
        let db = test_db().await;
        let created = db.create_rule(&make_rule("Recruiting")).await.unwrap();

        let fetched = db.get_rule(created.id).await.unwrap().unwrap();
        assert_eq!(fetched, created);
        assert_eq!(fetched.name, "Recruiting");
        assert_eq!(fetched.conditions, make_rule("Recruiting").conditions);
        assert_eq!(
            fetched.actions,
            vec![Action::move_message("Inbox"), Action::mark_as_read()]
        );
    }

    #[tokio::test]
    async fn get_missing_rule_is_none() {
        let db = test_db().await;
        assert!(db.get_rule(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn rules_list_in_creation_order() {
        let db = test_db().await;
        for name in ["first", "second", "third"] {
            db.create_rule(&make_rule(name)).await.unwrap();
        }

        let names: Vec<String> = db
            .list_rules(0, 100)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.name)
            .collect();
        assert_eq!(names, vec!["first", "second", "third"]);

        let page = db.list_rules(1, 1).await.unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].name, "second");
    }

    #[tokio::test]
    async fn update_patches_name_and_replaces_children() {
        let db = test_db().await;
        let created = db.create_rule(&make_rule("Old name")).await.unwrap();

        let update = RuleUpdate {
            name: Some("New name".into()),
            match_type: Some(MatchType::Any),
            conditions: Some(vec![Condition::new(
                Field::Subject,
                Predicate::Equals,
                "hello",
            )]),
            actions: None,
        };
        let updated = db.update_rule(created.id, &update).await.unwrap().unwrap();

        assert_eq!(updated.name, "New name");
        assert_eq!(updated.match_type, MatchType::Any);
        assert_eq!(
            updated.conditions,
            vec![Condition::new(Field::Subject, Predicate::Equals, "hello")]
        );
        // Actions untouched when absent from the update.
        assert_eq!(updated.actions, created.actions);
        assert_eq!(updated.created_at, created.created_at);
        assert!(updated.updated_at >= created.updated_at);
        assert_eq!(count(&db, "conditions").await, 1);
    }

    #[tokio::test]
    async fn update_can_clear_actions() {
        let db = test_db().await;
        let created = db.create_rule(&make_rule("r")).await.unwrap();
        let update = RuleUpdate {
            actions: Some(vec![]),
            ..Default::default()
        };
        let updated = db.update_rule(created.id, &update).await.unwrap().unwrap();
        assert!(updated.actions.is_empty());
        assert_eq!(updated.conditions.len(), 2);
    }

    #[tokio::test]
    async fn update_missing_rule_is_none() {
        let db = test_db().await;
        let update = RuleUpdate {
            name: Some("x".into()),
            ..Default::default()
        };
        assert!(db.update_rule(Uuid::new_v4(), &update).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_rule_cascades() {
        let db = test_db().await;
        let keep = db.create_rule(&make_rule("keep")).await.unwrap();
        let gone = db.create_rule(&make_rule("gone")).await.unwrap();

        assert!(db.delete_rule(gone.id).await.unwrap());
        assert!(!db.delete_rule(gone.id).await.unwrap());

        assert!(db.get_rule(gone.id).await.unwrap().is_none());
        assert_eq!(db.list_rules(0, 10).await.unwrap(), vec![keep]);
        assert_eq!(count(&db, "conditions").await, 2);
        assert_eq!(count(&db, "actions").await, 2);
    }

    #[tokio::test]
    async fn unrecognized_stored_names_load_as_unknown() {
        let db = test_db().await;
        let created = db.create_rule(&make_rule("legacy")).await.unwrap();
        db.conn()
            .execute(
                "UPDATE conditions SET field = 'cc', predicate = 'matches_regex' WHERE position = 0",
                (),
            )
            .await
            .unwrap();

        let rule = db.get_rule(created.id).await.unwrap().unwrap();
        assert_eq!(rule.conditions[0].field, Field::Unknown);
        assert_eq!(rule.conditions[0].predicate, Predicate::Unknown);
        assert_eq!(rule.conditions[1].field, Field::ReceivedDate);
    }

    // ── Email tests ─────────────────────────────────────────────────

    #[tokio::test]
    async fn insert_email_is_idempotent_by_provider_id() {
        let db = test_db().await;
        let first = db.insert_email_if_absent(&make_email("m1", 0)).await.unwrap();

        let mut changed = make_email("m1", 5);
        changed.subject = Some("Different".into());
        let second = db.insert_email_if_absent(&changed).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(second.subject.as_deref(), Some("Interview"));
        assert_eq!(count(&db, "emails").await, 1);
    }

    #[tokio::test]
    async fn stored_email_round_trips_fields() {
        let db = test_db().await;
        let fetched = make_email("m1", 3);
        let stored = db.insert_email_if_absent(&fetched).await.unwrap();

        assert_eq!(stored.provider_id, "m1");
        assert_eq!(stored.thread_id.as_deref(), Some("thread-m1"));
        assert_eq!(stored.label_ids, vec!["INBOX", "UNREAD"]);
        assert_eq!(stored.received_date, fetched.received_date);
        assert_eq!(stored.to_record(), fetched.to_record());

        let by_id = db.get_email(stored.id).await.unwrap().unwrap();
        assert_eq!(by_id, stored);
        let by_provider = db.get_email_by_provider_id("m1").await.unwrap().unwrap();
        assert_eq!(by_provider, stored);
    }

    #[tokio::test]
    async fn emails_list_newest_first() {
        let db = test_db().await;
        db.insert_email_if_absent(&make_email("old", 48)).await.unwrap();
        db.insert_email_if_absent(&make_email("new", 1)).await.unwrap();
        db.insert_email_if_absent(&make_email("mid", 10)).await.unwrap();

        let ids: Vec<String> = db
            .list_emails(0, 10)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.provider_id)
            .collect();
        assert_eq!(ids, vec!["new", "mid", "old"]);

        let page = db.list_emails(2, 10).await.unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].provider_id, "old");
    }

    #[tokio::test]
    async fn delete_email_reports_presence() {
        let db = test_db().await;
        let stored = db.insert_email_if_absent(&make_email("m1", 0)).await.unwrap();

        assert!(db.delete_email(stored.id).await.unwrap());
        assert!(!db.delete_email(stored.id).await.unwrap());
        assert!(db.get_email(stored.id).await.unwrap().is_none());
    }

    // ── Migration tests ─────────────────────────────────────────────

    #[tokio::test]
    async fn migrations_are_idempotent() {
        let db = test_db().await;
        // init_schema already ran in new_memory. Running again should be fine.
        db.init_schema().await.unwrap();
    }

    #[tokio::test]
    async fn local_file_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("rules.db");

        let id = {
            let db = LibSqlBackend::new_local(&path).await.unwrap();
            db.create_rule(&make_rule("durable")).await.unwrap().id
        };

        let db = LibSqlBackend::new_local(&path).await.unwrap();
        let rule = db.get_rule(id).await.unwrap().unwrap();
        assert_eq!(rule.name, "durable");
        assert_eq!(rule.actions.len(), 2);
    }
}
