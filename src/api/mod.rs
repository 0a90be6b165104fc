//! HTTP API: rule CRUD, ad-hoc evaluation, provider fetch/sync, stored emails.

mod error;
mod routes;

use std::sync::Arc;

use axum::Router;
use axum::http::HeaderValue;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::provider::MailProvider;
use crate::rules::RulesEngine;
use crate::store::Database;

pub use error::ApiError;
pub use routes::router;

/// Shared state for every route.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<dyn Database>,
    /// `None` when no provider credentials are configured.
    pub provider: Option<Arc<dyn MailProvider>>,
    pub engine: Arc<RulesEngine>,
}

impl AppState {
    pub fn new(db: Arc<dyn Database>, provider: Option<Arc<dyn MailProvider>>) -> Self {
        Self {
            db,
            provider,
            engine: Arc::new(RulesEngine::new()),
        }
    }
}

/// CORS for the configured origins. An empty list or `*` allows any origin.
pub fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() || origins.iter().any(|o| o == "*") {
        return layer.allow_origin(Any);
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(origin = %origin, "Ignoring invalid CORS origin: {e}");
                None
            }
        })
        .collect();
    layer.allow_origin(allowed)
}

/// The full application: routes plus request tracing and CORS.
pub fn app(state: AppState, cors_origins: &[String]) -> Router {
    router(state).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(cors_layer(cors_origins)),
    )
}
