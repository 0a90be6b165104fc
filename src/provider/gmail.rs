//! Gmail REST API client.
//!
//! Lists message ids matching a search query, then fetches each message in
//! `raw` format and parses the RFC 822 source with `mail-parser`.

use async_trait::async_trait;
use base64::Engine;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use mail_parser::{Addr, Address, MessageParser};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use super::token::TokenStore;
use super::{FetchedEmail, MailProvider};
use crate::config::GmailConfig;
use crate::error::ProviderError;

const PROVIDER: &str = "gmail";

/// Gmail emits URL-safe base64, sometimes padded and sometimes not.
const RAW_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

#[derive(Debug, Deserialize)]
struct ListResponse {
    #[serde(default)]
    messages: Vec<MessageRef>,
}

#[derive(Debug, Deserialize)]
struct MessageRef {
    id: String,
}

/// `users.messages.get` response with `format=raw`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawMessage {
    pub id: String,
    #[serde(default)]
    pub thread_id: Option<String>,
    #[serde(default)]
    pub label_ids: Vec<String>,
    #[serde(default)]
    pub snippet: Option<String>,
    pub raw: String,
}

pub struct GmailClient {
    http: reqwest::Client,
    base_url: String,
    user_id: String,
    tokens: TokenStore,
}

impl GmailClient {
    pub fn new(tokens: TokenStore, base_url: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            user_id: user_id.into(),
            tokens,
        }
    }

    /// Build a client from the token file named in `config`.
    pub async fn from_config(config: &GmailConfig) -> Result<Self, ProviderError> {
        let tokens = TokenStore::from_file(&config.token_path).await?;
        Ok(Self::new(tokens, &config.api_base, &config.user_id))
    }

    fn messages_url(&self) -> String {
        format!("{}/gmail/v1/users/{}/messages", self.base_url, self.user_id)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T, ProviderError> {
        let token = self.tokens.bearer_token().await?;
        let response = self
            .http
            .get(url)
            .bearer_auth(token)
            .query(query)
            .send()
            .await
            .map_err(|e| ProviderError::RequestFailed {
                provider: PROVIDER.into(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(ProviderError::AuthFailed {
                provider: PROVIDER.into(),
                reason: "access token rejected".into(),
            });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::RequestFailed {
                provider: PROVIDER.into(),
                reason: format!("{status}: {body}"),
            });
        }

        response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse {
                provider: PROVIDER.into(),
                reason: e.to_string(),
            })
    }

    async fn get_raw(&self, id: &str) -> Result<RawMessage, ProviderError> {
        let url = format!("{}/{id}", self.messages_url());
        self.get_json(&url, &[("format", "raw".to_string())]).await
    }
}

#[async_trait]
impl MailProvider for GmailClient {
    fn name(&self) -> &str {
        PROVIDER
    }

    async fn fetch_messages(
        &self,
        query: &str,
        max_results: u32,
    ) -> Result<Vec<FetchedEmail>, ProviderError> {
        let list: ListResponse = self
            .get_json(
                &self.messages_url(),
                &[
                    ("q", query.to_string()),
                    ("maxResults", max_results.to_string()),
                ],
            )
            .await?;

        debug!(count = list.messages.len(), query, "Listed Gmail messages");

        let raws = try_join_all(list.messages.iter().map(|m| self.get_raw(&m.id))).await?;
        let now = Utc::now();
        let emails = raws
            .into_iter()
            .map(|raw| parse_raw_message(raw, now))
            .collect::<Result<Vec<_>, _>>()?;

        info!(count = emails.len(), query, "Fetched Gmail messages");
        Ok(emails)
    }
}

/// Decode a `format=raw` message. `fallback_date` is used when the message
/// has no parsable `Date` header.
pub fn parse_raw_message(
    raw: RawMessage,
    fallback_date: DateTime<Utc>,
) -> Result<FetchedEmail, ProviderError> {
    let bytes = RAW_ENGINE
        .decode(raw.raw.trim())
        .map_err(|e| ProviderError::InvalidResponse {
            provider: PROVIDER.into(),
            reason: format!("message {}: bad base64: {e}", raw.id),
        })?;

    let parsed = MessageParser::default()
        .parse(bytes.as_slice())
        .ok_or_else(|| ProviderError::InvalidResponse {
            provider: PROVIDER.into(),
            reason: format!("message {}: not an RFC 822 message", raw.id),
        })?;

    let received_date = parsed
        .date()
        .and_then(|d| DateTime::from_timestamp(d.to_timestamp(), 0))
        .unwrap_or(fallback_date);

    Ok(FetchedEmail {
        provider_id: raw.id,
        thread_id: raw.thread_id,
        label_ids: raw.label_ids,
        snippet: raw.snippet,
        from: format_addresses(parsed.from()),
        to: format_addresses(parsed.to()),
        subject: parsed.subject().map(str::to_string),
        message: parsed.body_text(0).map(|b| b.into_owned()),
        received_date,
    })
}

/// Render an address header as `Name <addr>, addr2`.
fn format_addresses(addr: Option<&Address>) -> Option<String> {
    let addrs: Vec<&Addr> = match addr? {
        Address::List(addrs) => addrs.iter().collect(),
        Address::Group(groups) => groups.iter().flat_map(|g| g.addresses.iter()).collect(),
    };

    let rendered: Vec<String> = addrs
        .into_iter()
        .filter_map(|a| {
            let address = a.address.as_deref()?;
            Some(match a.name.as_deref() {
                Some(name) => format!("{name} <{address}>"),
                None => address.to_string(),
            })
        })
        .collect();

    if rendered.is_empty() {
        None
    } else {
        Some(rendered.join(", "))
    }
}
