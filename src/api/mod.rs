use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    http::StatusCode,
    middleware,
    routing::{delete, get, post, put},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::auth::{Authenticator, LoginAttempts, TokenLedger};
use crate::config::Config;
use crate::middleware::gate::{gate_middleware, RequestGate};
use crate::middleware::headers;
use crate::registry::AssignmentRegistry;
use crate::store::Stores;

pub mod handlers;

/// Shared application state passed to handlers.
pub struct AppState {
    pub config: Config,
    pub authenticator: Arc<Authenticator>,
    pub ledger: Arc<TokenLedger>,
    pub registry: Arc<AssignmentRegistry>,
    pub attempts: Arc<LoginAttempts>,
    pub gate: Arc<RequestGate>,
}

impl AppState {
    /// Wire the components over one set of stores.
    pub fn new(config: Config, stores: Stores) -> Self {
        let authenticator = Arc::new(Authenticator::with_sha256(stores.credentials.clone()));
        let ledger = Arc::new(TokenLedger::new(
            stores.tokens.clone(),
            stores.credentials.clone(),
        ));
        let registry = Arc::new(AssignmentRegistry::new(stores.assignments.clone()));
        let attempts = Arc::new(LoginAttempts::new(
            config.login_max_attempts,
            config.login_block,
        ));
        let gate = Arc::new(RequestGate::new(
            authenticator.clone(),
            ledger.clone(),
            attempts.clone(),
            config.auth_mode,
            config.auth_exempt_paths.iter().cloned(),
            config.auth_timeout,
        ));

        Self {
            config,
            authenticator,
            ledger,
            registry,
            attempts,
            gate,
        }
    }
}

/// Build the HTTP router. Every route, the fallback included, sits behind
/// the request gate; only the configured exempt paths skip it.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route("/readyz", get(readiness_check))
        .route("/user/login", get(handlers::login))
        .route("/user/logout", post(handlers::logout))
        .route("/user/session", delete(handlers::end_session))
        .route("/user/tokens", get(handlers::list_tokens))
        .route("/user/change-login", put(handlers::change_login))
        .route(
            "/trainee/:username/trainers",
            get(handlers::get_trainers).put(handlers::replace_trainers),
        )
        .fallback(fallback_404)
        .with_state(state.clone())
        .layer(middleware::from_fn_with_state(
            state.gate.clone(),
            gate_middleware,
        ))
        .layer(DefaultBodyLimit::max(1024 * 1024))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(headers::request_id))
        .layer(middleware::from_fn(headers::security_headers))
}

async fn fallback_404() -> StatusCode {
    StatusCode::NOT_FOUND
}

async fn readiness_check() -> &'static str {
    "ok"
}
