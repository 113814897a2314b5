//! Server error types mapped to HTTP status codes.
//!
//! Responses carry the error kind and a correlation id; logs carry the
//! same pair. Secret material, plaintext, and key bytes never appear in
//! either.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use keyward_core::crypto::CryptoError;
use keyward_core::store::StoreError;
use keyward_core::token::TokenError;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum ApiError {
    /// Malformed input, rejected before any expensive work.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Wrong password or tampered ciphertext; never distinguished further.
    #[error("Authentication failed")]
    AuthenticationFailed,

    /// Wrong or expired one-time code. Distinct from `AuthenticationFailed`
    /// since it does not imply password compromise.
    #[error("One-time code invalid")]
    MfaCodeInvalid,

    #[error("Token expired")]
    TokenExpired,

    #[error("Token signature invalid")]
    TokenInvalidSignature,

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Rate limited")]
    RateLimited,

    /// Transient backend failure; the caller may retry.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::AuthenticationFailed
            | Self::MfaCodeInvalid
            | Self::TokenExpired
            | Self::TokenInvalidSignature
            | Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Database(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable kind for clients and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::AuthenticationFailed => "authentication_failed",
            Self::MfaCodeInvalid => "mfa_code_invalid",
            Self::TokenExpired => "token_expired",
            Self::TokenInvalidSignature => "token_invalid_signature",
            Self::Unauthorized(_) => "unauthorized",
            Self::Conflict(_) => "conflict",
            Self::NotFound(_) => "not_found",
            Self::RateLimited => "rate_limited",
            Self::StoreUnavailable(_) => "store_unavailable",
            Self::Database(_) => "database",
            Self::Internal(_) => "internal",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let correlation_id = Uuid::new_v4();

        // Internal detail stays in the log; the wire sees only the kind.
        let message = match &self {
            Self::Database(_) | Self::Internal(_) => "Internal server error".to_string(),
            other => other.to_string(),
        };

        tracing::warn!(
            kind = self.kind(),
            %correlation_id,
            status = status.as_u16(),
            "request failed"
        );

        let body = serde_json::json!({
            "error": message,
            "kind": self.kind(),
            "correlation_id": correlation_id.to_string(),
        });
        (status, axum::Json(body)).into_response()
    }
}

impl From<rusqlite::Error> for ApiError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Database(e.to_string())
    }
}

impl From<TokenError> for ApiError {
    fn from(e: TokenError) -> Self {
        match e {
            TokenError::Expired => Self::TokenExpired,
            TokenError::InvalidSignature => Self::TokenInvalidSignature,
            TokenError::Malformed(m) => Self::Unauthorized(format!("Malformed token: {}", m)),
            TokenError::WeakSecret(m) => Self::Internal(m),
        }
    }
}

impl From<CryptoError> for ApiError {
    fn from(e: CryptoError) -> Self {
        match e {
            CryptoError::AuthenticationFailed => Self::AuthenticationFailed,
            other if other.is_validation() => Self::Validation(other.to_string()),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Unavailable(m) => Self::StoreUnavailable(m),
            StoreError::NotFound(m) => Self::NotFound(m),
            StoreError::Backend(m) => Self::Database(m),
        }
    }
}
