//! Bearer-token middleware for vault routes.
//!
//! Every authenticated request must present `Authorization: Bearer <token>`
//! where the token was minted by the auth gate after both factors
//! verified. Revoked tokens are rejected before signature verification.

use crate::error::ApiError;
use crate::server::AppState;
use axum::body::Body;
use axum::extract::State;
use axum::http::{header, Request};
use axum::middleware::Next;
use axum::response::Response;

/// Principal id asserted by a verified bearer token, injected into request
/// extensions.
#[derive(Debug, Clone)]
pub struct AuthPrincipal(pub String);

/// The raw presented token, kept for logout-time revocation.
#[derive(Debug, Clone)]
pub struct BearerToken(pub String);

pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let header_value = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::Unauthorized("Missing Authorization header".to_string()))?;

    let token = header_value
        .strip_prefix("Bearer ")
        .ok_or_else(|| ApiError::Unauthorized("Invalid authorization scheme".to_string()))?
        .trim()
        .to_string();

    if token.is_empty() {
        return Err(ApiError::Unauthorized("Empty bearer token".to_string()));
    }

    if state.storage.is_token_denied(&token)? {
        return Err(ApiError::Unauthorized("Token revoked".to_string()));
    }

    // Expired and invalid-signature verdicts stay distinct in the response
    // kind; both mean re-authenticate.
    let principal_id = state.issuer.verify(&token)?;

    request.extensions_mut().insert(AuthPrincipal(principal_id));
    request.extensions_mut().insert(BearerToken(token));

    Ok(next.run(request).await)
}
