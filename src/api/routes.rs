use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::info;
use uuid::Uuid;

use super::{ApiError, AppState};
use crate::error::ProviderError;
use crate::pipeline::{InboxProcessor, ProcessedEmail, actions_for};
use crate::provider::FetchedEmail;
use crate::rules::{Action, EmailRecord, NewRule, Rule, RuleUpdate};
use crate::store::StoredEmail;

/// Build the REST routes.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/api/rules", get(list_rules).post(create_rule))
        .route(
            "/api/rules/{id}",
            get(get_rule).put(update_rule).delete(delete_rule),
        )
        .route("/api/process-email", post(process_email))
        .route("/api/test/email", post(create_test_email))
        .route("/api/test/process-email", post(test_process_email))
        .route("/api/gmail/messages", get(fetch_messages))
        .route("/api/gmail/fetch", get(fetch_messages))
        .route("/api/gmail/sync", post(sync_messages))
        .route("/api/emails", get(list_emails))
        .route("/api/emails/{id}", get(get_email).delete(delete_email))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct Pagination {
    #[serde(default)]
    skip: u32,
    #[serde(default = "default_limit")]
    limit: u32,
}

fn default_limit() -> u32 {
    100
}

#[derive(Debug, Deserialize)]
struct FetchParams {
    #[serde(default = "default_max_results")]
    max_results: u32,
    #[serde(default = "default_query")]
    query: String,
}

fn default_max_results() -> u32 {
    10
}

fn default_query() -> String {
    "in:inbox".to_string()
}

fn parse_id(raw: &str, entity: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| ApiError::BadRequest(format!("Invalid {entity} ID")))
}

// ── Health ──────────────────────────────────────────────────────────────

async fn root() -> impl IntoResponse {
    Json(serde_json::json!({
        "message": "Welcome to the Mail Rules API",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "mail-rules"
    }))
}

// ── Rules ───────────────────────────────────────────────────────────────

async fn list_rules(
    State(state): State<AppState>,
    Query(page): Query<Pagination>,
) -> Result<Json<Vec<Rule>>, ApiError> {
    Ok(Json(state.db.list_rules(page.skip, page.limit).await?))
}

async fn get_rule(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Rule>, ApiError> {
    let id = parse_id(&id, "rule")?;
    match state.db.get_rule(id).await? {
        Some(rule) => Ok(Json(rule)),
        None => Err(ApiError::not_found("rule", id)),
    }
}

async fn create_rule(
    State(state): State<AppState>,
    Json(new_rule): Json<NewRule>,
) -> Result<(StatusCode, Json<Rule>), ApiError> {
    new_rule.validate()?;
    let rule = state.db.create_rule(&new_rule).await?;
    info!(rule_id = %rule.id, name = %rule.name, "Rule created");
    Ok((StatusCode::CREATED, Json(rule)))
}

async fn update_rule(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(update): Json<RuleUpdate>,
) -> Result<Json<Rule>, ApiError> {
    let id = parse_id(&id, "rule")?;
    update.validate()?;
    match state.db.update_rule(id, &update).await? {
        Some(rule) => {
            info!(rule_id = %rule.id, "Rule updated");
            Ok(Json(rule))
        }
        None => Err(ApiError::not_found("rule", id)),
    }
}

async fn delete_rule(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let id = parse_id(&id, "rule")?;
    if state.db.delete_rule(id).await? {
        info!(rule_id = %id, "Rule deleted");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found("rule", id))
    }
}

// ── Evaluation ──────────────────────────────────────────────────────────

async fn process_email(
    State(state): State<AppState>,
    Json(email): Json<EmailRecord>,
) -> Result<Json<Vec<Action>>, ApiError> {
    let actions = actions_for(state.db.as_ref(), &state.engine, &email).await?;
    Ok(Json(actions))
}

#[derive(Debug, Deserialize)]
struct TestEmailParams {
    from_email: String,
    to_email: String,
    subject: String,
    body: String,
}

/// A stored email with the actions its matching rules request.
#[derive(Debug, Serialize)]
struct EvaluatedEmail {
    #[serde(flatten)]
    email: StoredEmail,
    actions: Vec<Action>,
}

/// Store a locally created email, then evaluate it.
async fn create_test_email(
    State(state): State<AppState>,
    Query(params): Query<TestEmailParams>,
) -> Result<(StatusCode, Json<EvaluatedEmail>), ApiError> {
    let fetched = FetchedEmail::synthetic(
        &params.from_email,
        &params.to_email,
        &params.subject,
        &params.body,
    );
    let email = state.db.insert_email_if_absent(&fetched).await?;
    let actions = actions_for(state.db.as_ref(), &state.engine, &email.to_record()).await?;

    info!(email_id = %email.id, actions = actions.len(), "Test email stored");
    Ok((StatusCode::CREATED, Json(EvaluatedEmail { email, actions })))
}

const REQUIRED_EMAIL_FIELDS: [&str; 3] = ["from", "subject", "message"];

/// The submitted email, echoed back with its actions.
#[derive(Debug, Serialize)]
struct EchoedEmail {
    #[serde(flatten)]
    email: Map<String, Value>,
    actions: Vec<Action>,
}

/// Evaluate an email without storing it. `from`, `subject` and `message`
/// must be present; `received_date` defaults to now.
async fn test_process_email(
    State(state): State<AppState>,
    Json(mut email): Json<Map<String, Value>>,
) -> Result<Json<EchoedEmail>, ApiError> {
    if let Some(missing) = REQUIRED_EMAIL_FIELDS
        .iter()
        .find(|field| !email.contains_key(**field))
    {
        return Err(ApiError::BadRequest(format!(
            "Missing required field: {missing}"
        )));
    }

    email.remove("actions");
    email.entry("received_date").or_insert_with(|| {
        Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true))
    });

    let record: EmailRecord = serde_json::from_value(Value::Object(email.clone()))
        .map_err(|e| ApiError::BadRequest(format!("Invalid email: {e}")))?;
    let actions = actions_for(state.db.as_ref(), &state.engine, &record).await?;
    Ok(Json(EchoedEmail { email, actions }))
}

// ── Provider ────────────────────────────────────────────────────────────

fn inbox(state: &AppState) -> Result<InboxProcessor, ApiError> {
    let provider = state.provider.clone().ok_or(ProviderError::NotConfigured)?;
    Ok(InboxProcessor::new(
        Arc::clone(&state.db),
        provider,
        Arc::clone(&state.engine),
    ))
}

async fn fetch_messages(
    State(state): State<AppState>,
    Query(params): Query<FetchParams>,
) -> Result<Json<Vec<ProcessedEmail>>, ApiError> {
    let processed = inbox(&state)?
        .preview(&params.query, params.max_results)
        .await?;
    Ok(Json(processed))
}

async fn sync_messages(
    State(state): State<AppState>,
    Query(params): Query<FetchParams>,
) -> Result<Json<Vec<StoredEmail>>, ApiError> {
    let stored = inbox(&state)?
        .sync(&params.query, params.max_results)
        .await?;
    Ok(Json(stored))
}

// ── Stored emails ───────────────────────────────────────────────────────

async fn list_emails(
    State(state): State<AppState>,
    Query(page): Query<Pagination>,
) -> Result<Json<Vec<StoredEmail>>, ApiError> {
    Ok(Json(state.db.list_emails(page.skip, page.limit).await?))
}

async fn get_email(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<StoredEmail>, ApiError> {
    let id = parse_id(&id, "email")?;
    match state.db.get_email(id).await? {
        Some(email) => Ok(Json(email)),
        None => Err(ApiError::not_found("email", id)),
    }
}

async fn delete_email(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let id = parse_id(&id, "email")?;
    if state.db.delete_email(id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found("email", id))
    }
}
