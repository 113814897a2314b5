//! Auth gate: registration → password step → TOTP step → token issuance.
//!
//! The two login steps are linked by a server-issued pending-login marker
//! with a short expiry; the client never carries identity continuity
//! itself. A bearer token exists only after both factors verified against
//! the same marker.
//!
//! TOTP secrets follow confirmed-only persistence: a freshly generated
//! secret lives on the pending row and reaches the principal record only
//! on first successful verification. An abandoned enrollment expires with
//! its marker.

use crate::auth::BearerToken;
use crate::error::ApiError;
use crate::server::AppState;
use axum::extract::State;
use axum::{Extension, Json};
use chrono::Utc;
use keyward_core::crypto::password::{hash_password, verify_password};
use keyward_core::totp;
use serde::{Deserialize, Serialize};

const USERNAME_MAX_LEN: usize = 80;
const PASSWORD_MIN_LEN: usize = 8;
const PASSWORD_MAX_LEN: usize = 512;

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// Password-step response: always a pending marker, plus a provisioning
/// bundle when the principal has no confirmed TOTP secret yet.
#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub pending: String,
    pub expires_at: i64,
    pub mfa_required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct VerifyRequest {
    pub pending: String,
    pub code: String,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub token: String,
    pub expires_at: i64,
}

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let username = validate_username(&req.username)?;
    validate_master_password(&req.password)?;

    let password_hash = hash_password(&req.password)?;
    let principal_id = state.storage.create_principal(&username, &password_hash)?;

    tracing::info!(%principal_id, "principal registered");
    Ok(Json(serde_json::json!({ "status": "registered" })))
}

/// First factor. Success mints a pending-login marker; it never mints a
/// token. Unknown usernames and wrong passwords are indistinguishable.
pub async fn password_step(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let username = validate_username(&req.username)?;

    if !state.limiter.check(&username) {
        return Err(ApiError::RateLimited);
    }

    let principal = state
        .storage
        .principal_by_username(&username)?
        .ok_or(ApiError::AuthenticationFailed)?;

    if !verify_password(&principal.password_hash, &req.password)? {
        return Err(ApiError::AuthenticationFailed);
    }

    let response = match principal.totp_secret {
        Some(_) => {
            let pending = state.storage.create_pending_login(
                &principal.principal_id,
                None,
                state.pending_login_ttl_secs,
            )?;
            LoginResponse {
                pending: pending.marker,
                expires_at: pending.expires_at,
                mfa_required: true,
                secret: None,
                uri: None,
            }
        }
        None => {
            // First login: hand out a fresh secret for enrollment. It is
            // held only on the pending row until the code verifies.
            let secret = totp::generate_secret();
            let uri = totp::provisioning_uri(&secret, &username, &state.totp_issuer)
                .map_err(|e| ApiError::Internal(e.to_string()))?;
            let pending = state.storage.create_pending_login(
                &principal.principal_id,
                Some(&secret),
                state.pending_login_ttl_secs,
            )?;
            LoginResponse {
                pending: pending.marker,
                expires_at: pending.expires_at,
                mfa_required: false,
                secret: Some(secret),
                uri: Some(uri),
            }
        }
    };

    tracing::info!(principal_id = %principal.principal_id, enrolling = response.secret.is_some(), "password step passed");
    Ok(Json(response))
}

/// Second factor. Consumes the pending marker and issues the bearer token;
/// a wrong code issues nothing and leaves the marker live for a retry.
pub async fn totp_step(
    State(state): State<AppState>,
    Json(req): Json<VerifyRequest>,
) -> Result<Json<TokenResponse>, ApiError> {
    let pending = state
        .storage
        .fetch_pending_login(&req.pending)?
        .ok_or_else(|| {
            ApiError::Unauthorized("Pending login not found or expired".to_string())
        })?;

    let principal = state
        .storage
        .principal_by_id(&pending.principal_id)?
        .ok_or_else(|| ApiError::Unauthorized("Principal no longer exists".to_string()))?;

    // A confirmed secret always wins; the provisional one only applies to
    // a principal that has not completed enrollment.
    let (secret, newly_confirmed) = match (&principal.totp_secret, &pending.provisional_secret) {
        (Some(stored), _) => (stored.clone(), false),
        (None, Some(provisional)) => (provisional.clone(), true),
        (None, None) => {
            return Err(ApiError::Unauthorized(
                "Login sequence carries no MFA secret".to_string(),
            ))
        }
    };

    let accepted = totp::verify(&secret, &req.code, state.totp_tolerance_steps)
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    if !accepted {
        return Err(ApiError::MfaCodeInvalid);
    }

    if newly_confirmed {
        state
            .storage
            .confirm_totp_secret(&principal.principal_id, &secret)?;
    }
    state.storage.consume_pending_login(&pending.marker)?;

    let issued = state
        .issuer
        .issue(&principal.principal_id, state.token_ttl_secs)
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    tracing::info!(principal_id = %principal.principal_id, "MFA verified, token issued");
    Ok(Json(TokenResponse {
        token: issued.token,
        expires_at: issued.expires_at,
    }))
}

/// Revoke the presented token until its natural expiry.
pub async fn logout(
    State(state): State<AppState>,
    Extension(token): Extension<BearerToken>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let now = Utc::now().timestamp();
    state.storage.deny_token(&token.0, now + state.token_ttl_secs)?;
    Ok(Json(serde_json::json!({ "status": "logged_out" })))
}

fn validate_username(username: &str) -> Result<String, ApiError> {
    let username = username.trim();
    if username.is_empty() || username.len() > USERNAME_MAX_LEN {
        return Err(ApiError::Validation(format!(
            "Username must be 1-{} characters",
            USERNAME_MAX_LEN
        )));
    }
    if username.chars().any(char::is_whitespace) {
        return Err(ApiError::Validation(
            "Username cannot contain whitespace".to_string(),
        ));
    }
    Ok(username.to_string())
}

fn validate_master_password(password: &str) -> Result<(), ApiError> {
    if password.len() < PASSWORD_MIN_LEN || password.len() > PASSWORD_MAX_LEN {
        return Err(ApiError::Validation(format!(
            "Password must be {}-{} characters",
            PASSWORD_MIN_LEN, PASSWORD_MAX_LEN
        )));
    }
    Ok(())
}
