//! OAuth token handling for the Gmail client.
//!
//! Reads an authorized-user token file (the JSON written by Google's client
//! libraries after consent) and hands out bearer tokens. When the cached
//! access token is missing or expired and a refresh token is available, a new
//! access token is fetched from `token_uri` and written back to the file.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::ProviderError;

const PROVIDER: &str = "gmail";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// Tokens this close to expiry are refreshed early.
const EXPIRY_SLACK_SECS: i64 = 60;

/// On-disk token file layout.
#[derive(Debug, Default, Serialize, Deserialize)]
struct TokenFile {
    #[serde(default, alias = "access_token", skip_serializing_if = "Option::is_none")]
    token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    client_secret: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    token_uri: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    scopes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expiry: Option<String>,
}

/// Response body of the OAuth token endpoint.
#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

/// Long-lived client credentials from the token file.
pub struct OAuthCredentials {
    pub client_id: Option<String>,
    pub client_secret: Option<SecretString>,
    pub refresh_token: Option<SecretString>,
    pub token_uri: String,
    pub scopes: Vec<String>,
}

impl std::fmt::Debug for OAuthCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthCredentials")
            .field("client_id", &self.client_id)
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("token_uri", &self.token_uri)
            .finish()
    }
}

struct CachedToken {
    value: SecretString,
    expires_at: Option<DateTime<Utc>>,
}

impl CachedToken {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expires_at) => expires_at - Duration::seconds(EXPIRY_SLACK_SECS) > now,
            None => true,
        }
    }
}

/// Source of bearer tokens for Gmail requests.
pub struct TokenStore {
    credentials: OAuthCredentials,
    cached: Mutex<Option<CachedToken>>,
    /// Where refreshed tokens are written back, if anywhere.
    path: Option<PathBuf>,
    http: reqwest::Client,
}

impl std::fmt::Debug for TokenStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenStore")
            .field("credentials", &self.credentials)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl TokenStore {
    /// Load a token file from disk.
    pub async fn from_file(path: &Path) -> Result<Self, ProviderError> {
        let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
            ProviderError::Credentials(format!("{}: {e}", path.display()))
        })?;
        let mut store = Self::from_json(&raw)?;
        store.path = Some(path.to_path_buf());
        info!(path = %path.display(), "Loaded Gmail token file");
        Ok(store)
    }

    /// Parse token file contents. Refreshed tokens are kept in memory only.
    pub fn from_json(raw: &str) -> Result<Self, ProviderError> {
        let file: TokenFile = serde_json::from_str(raw)?;

        let cached = file.token.map(|token| CachedToken {
            value: SecretString::from(token),
            expires_at: file.expiry.as_deref().and_then(parse_expiry),
        });
        if cached.is_none() && file.refresh_token.is_none() {
            return Err(ProviderError::Credentials(
                "token file has neither an access token nor a refresh token".into(),
            ));
        }

        Ok(Self {
            credentials: OAuthCredentials {
                client_id: file.client_id,
                client_secret: file.client_secret.map(SecretString::from),
                refresh_token: file.refresh_token.map(SecretString::from),
                token_uri: file.token_uri.unwrap_or_else(|| DEFAULT_TOKEN_URI.to_string()),
                scopes: file.scopes,
            },
            cached: Mutex::new(cached),
            path: None,
            http: reqwest::Client::new(),
        })
    }

    pub fn credentials(&self) -> &OAuthCredentials {
        &self.credentials
    }

    /// A valid access token, refreshing it first if needed.
    pub async fn bearer_token(&self) -> Result<String, ProviderError> {
        let mut cached = self.cached.lock().await;

        if let Some(token) = cached.as_ref().filter(|t| t.is_fresh(Utc::now())) {
            return Ok(token.value.expose_secret().to_string());
        }

        let Some(refresh_token) = &self.credentials.refresh_token else {
            return Err(ProviderError::AuthFailed {
                provider: PROVIDER.into(),
                reason: "access token expired and no refresh token is available".into(),
            });
        };

        let refreshed = self.refresh(refresh_token).await?;
        let bearer = refreshed.value.expose_secret().to_string();
        *cached = Some(refreshed);

        if let Some(path) = &self.path {
            if let Err(e) = self.save(path, cached.as_ref()).await {
                warn!(path = %path.display(), "Failed to persist refreshed token: {e}");
            }
        }
        Ok(bearer)
    }

    async fn refresh(&self, refresh_token: &SecretString) -> Result<CachedToken, ProviderError> {
        debug!(token_uri = %self.credentials.token_uri, "Refreshing Gmail access token");

        let mut form = vec![
            ("grant_type", "refresh_token".to_string()),
            ("refresh_token", refresh_token.expose_secret().to_string()),
        ];
        if let Some(client_id) = &self.credentials.client_id {
            form.push(("client_id", client_id.clone()));
        }
        if let Some(secret) = &self.credentials.client_secret {
            form.push(("client_secret", secret.expose_secret().to_string()));
        }

        let response = self
            .http
            .post(&self.credentials.token_uri)
            .form(&form)
            .send()
            .await
            .map_err(|e| ProviderError::RequestFailed {
                provider: PROVIDER.into(),
                reason: format!("token refresh: {e}"),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::AuthFailed {
                provider: PROVIDER.into(),
                reason: format!("token refresh returned {status}: {body}"),
            });
        }

        let body: RefreshResponse =
            response
                .json()
                .await
                .map_err(|e| ProviderError::InvalidResponse {
                    provider: PROVIDER.into(),
                    reason: format!("token refresh body: {e}"),
                })?;

        Ok(CachedToken {
            value: SecretString::from(body.access_token),
            expires_at: body
                .expires_in
                .map(|secs| Utc::now() + Duration::seconds(secs)),
        })
    }

    async fn save(&self, path: &Path, cached: Option<&CachedToken>) -> Result<(), ProviderError> {
        let creds = &self.credentials;
        let file = TokenFile {
            token: cached.map(|t| t.value.expose_secret().to_string()),
            refresh_token: creds
                .refresh_token
                .as_ref()
                .map(|s| s.expose_secret().to_string()),
            client_id: creds.client_id.clone(),
            client_secret: creds
                .client_secret
                .as_ref()
                .map(|s| s.expose_secret().to_string()),
            token_uri: Some(creds.token_uri.clone()),
            scopes: creds.scopes.clone(),
            expiry: cached
                .and_then(|t| t.expires_at)
                .map(|dt| dt.to_rfc3339()),
        };
        let json = serde_json::to_string_pretty(&file)?;
        tokio::fs::write(path, json).await?;
        Ok(())
    }
}

/// Google writes `expiry` as naive UTC (`2024-01-01T00:00:00.123456Z` or
/// without the `Z`).
fn parse_expiry(s: &str) -> Option<DateTime<Utc>> {
    crate::rules::model::parse_timestamp(s.trim_end_matches('Z'))
        .or_else(|| crate::rules::model::parse_timestamp(s))
}
