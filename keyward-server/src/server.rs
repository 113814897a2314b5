//! Axum router setup and shared application state.

use crate::auth::auth_middleware;
use crate::config::ServerConfig;
use crate::handlers::{entries, gate};
use crate::rate_limit::RateLimiter;
use crate::storage::ServerStorage;
use axum::middleware;
use axum::routing::{delete, get, post};
use axum::Router;
use keyward_core::token::TokenIssuer;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

/// State shared across handlers. The signing secret inside the issuer is
/// read-only after initialization.
#[derive(Clone)]
pub struct AppState {
    pub storage: ServerStorage,
    pub issuer: Arc<TokenIssuer>,
    pub limiter: RateLimiter,
    pub token_ttl_secs: i64,
    pub pending_login_ttl_secs: i64,
    pub totp_issuer: String,
    pub totp_tolerance_steps: i64,
}

impl AppState {
    pub fn new(storage: ServerStorage, issuer: TokenIssuer, config: &ServerConfig) -> Self {
        Self {
            storage,
            issuer: Arc::new(issuer),
            limiter: RateLimiter::new(config.login_attempts_per_minute),
            token_ttl_secs: config.token_ttl_secs,
            pending_login_ttl_secs: config.pending_login_ttl_secs,
            totp_issuer: config.totp_issuer.clone(),
            totp_tolerance_steps: config.totp_tolerance_steps,
        }
    }
}

pub fn build_router(state: AppState, config: &ServerConfig) -> Router {
    // Vault routes: bearer token required.
    let authenticated = Router::new()
        .route("/api/v1/entries", get(entries::list).put(entries::upsert))
        .route("/api/v1/entries/{label}", delete(entries::remove))
        .route("/api/v1/logout", post(gate::logout))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    // Admission routes: no token yet.
    let public = Router::new()
        .route("/api/v1/register", post(gate::register))
        .route("/api/v1/login", post(gate::password_step))
        .route("/api/v1/login/verify", post(gate::totp_step))
        .route("/health", get(health));

    Router::new()
        .merge(authenticated)
        .merge(public)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .layer(RequestBodyLimitLayer::new(config.max_payload_size))
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}
