//! Configuration types, read from the environment.

use std::path::{Path, PathBuf};

use crate::error::ConfigError;

/// Server configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    /// libSQL database file.
    pub db_path: PathBuf,
    pub host: String,
    pub port: u16,
    /// Allowed CORS origins; `*` allows any.
    pub cors_origins: Vec<String>,
    /// When set, logs are also written to a daily-rolling file here.
    pub log_dir: Option<PathBuf>,
    pub gmail: GmailConfig,
}

/// Gmail provider configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct GmailConfig {
    pub token_path: PathBuf,
    pub user_id: String,
    pub api_base: String,
}

impl GmailConfig {
    /// The provider is only enabled when the token file exists.
    pub fn is_available(&self) -> bool {
        self.token_path.is_file()
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (the environment in production).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let port = match lookup("MAIL_RULES_PORT") {
            Some(raw) => raw.trim().parse().map_err(|e| ConfigError::InvalidValue {
                key: "MAIL_RULES_PORT".into(),
                message: format!("{raw:?}: {e}"),
            })?,
            None => 8000,
        };

        let cors_origins: Vec<String> = lookup("MAIL_RULES_CORS_ORIGINS")
            .unwrap_or_else(|| "*".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(Self {
            db_path: lookup("MAIL_RULES_DB_PATH")
                .unwrap_or_else(|| "./data/mail-rules.db".to_string())
                .into(),
            host: lookup("MAIL_RULES_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port,
            cors_origins,
            log_dir: lookup("MAIL_RULES_LOG_DIR")
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from),
            gmail: GmailConfig {
                token_path: lookup("GMAIL_TOKEN_PATH")
                    .unwrap_or_else(|| "token.json".to_string())
                    .into(),
                user_id: lookup("GMAIL_USER_ID").unwrap_or_else(|| "me".to_string()),
                api_base: lookup("GMAIL_API_BASE")
                    .unwrap_or_else(|| "https://gmail.googleapis.com".to_string()),
            },
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn allows_any_origin(&self) -> bool {
        self.cors_origins.iter().any(|o| o == "*")
    }
}

/// Load `.env` from the working directory or a parent.
///
/// A missing file is fine; an unreadable or malformed one is an error.
pub fn load_dotenv() -> Result<Option<PathBuf>, ConfigError> {
    match dotenvy::dotenv() {
        Ok(path) => Ok(Some(path)),
        Err(e) if e.not_found() => Ok(None),
        Err(e) => Err(dotenv_error(e)),
    }
}

/// Load a specific env file. Returns `false` when it does not exist.
pub fn load_dotenv_from(path: &Path) -> Result<bool, ConfigError> {
    match dotenvy::from_path(path) {
        Ok(()) => Ok(true),
        Err(e) if e.not_found() => Ok(false),
        Err(e) => Err(dotenv_error(e)),
    }
}

fn dotenv_error(err: dotenvy::Error) -> ConfigError {
    match err {
        dotenvy::Error::Io(e) => ConfigError::Io(e),
        other => ConfigError::ParseError(other.to_string()),
    }
}
