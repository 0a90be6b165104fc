use std::sync::Arc;

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use mail_rules::api::{self, AppState};
use mail_rules::config::{AppConfig, load_dotenv};
use mail_rules::provider::{GmailClient, MailProvider};
use mail_rules::store::{Database, LibSqlBackend};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let env_file = load_dotenv()?;
    let config = AppConfig::from_env()?;

    // Initialize tracing; the guard flushes the file writer on exit
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let (file_layer, _log_guard) = match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "mail-rules.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(file_layer)
        .init();

    eprintln!("📬 Mail Rules v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   API: http://{}/api/rules", config.bind_addr());
    if let Some(path) = &env_file {
        eprintln!("   Env file: {}", path.display());
    }

    // ── Database ─────────────────────────────────────────────────────────
    let db: Arc<dyn Database> = Arc::new(
        LibSqlBackend::new_local(&config.db_path)
            .await
            .map_err(|e| format!("Failed to open database at {}: {e}", config.db_path.display()))?,
    );
    eprintln!("   Database: {}", config.db_path.display());

    // ── Mail provider ────────────────────────────────────────────────────
    let provider: Option<Arc<dyn MailProvider>> = if config.gmail.is_available() {
        match GmailClient::from_config(&config.gmail).await {
            Ok(client) => {
                eprintln!("   Gmail: enabled ({})", config.gmail.token_path.display());
                Some(Arc::new(client))
            }
            Err(e) => {
                tracing::warn!("Gmail disabled: {e}");
                eprintln!("   Gmail: disabled (bad token file)");
                None
            }
        }
    } else {
        eprintln!(
            "   Gmail: disabled (no token at {})",
            config.gmail.token_path.display()
        );
        None
    };

    let app = api::app(AppState::new(db, provider), &config.cors_origins);

    let listener = tokio::net::TcpListener::bind(config.bind_addr()).await?;
    tracing::info!(addr = %config.bind_addr(), "Mail Rules server started");
    axum::serve(listener, app).await?;

    Ok(())
}
