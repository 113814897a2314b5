//! Blind vault-entry handlers.
//!
//! Entry payloads carry the opaque envelope blob only; the server checks
//! its shape at admission (version byte, field lengths) but never holds a
//! key to open it.

use crate::auth::AuthPrincipal;
use crate::error::ApiError;
use crate::server::AppState;
use axum::extract::{Path, State};
use axum::{Extension, Json};
use keyward_core::crypto::Envelope;
use keyward_core::store::EntryStore;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub struct EntryPayload {
    pub label: String,
    pub username: String,
    pub blob: String,
}

pub async fn list(
    State(state): State<AppState>,
    Extension(principal): Extension<AuthPrincipal>,
) -> Result<Json<Vec<EntryPayload>>, ApiError> {
    let entries = state.storage.get_all(&principal.0)?;
    Ok(Json(
        entries
            .into_iter()
            .map(|e| EntryPayload {
                label: e.label,
                username: e.username,
                blob: e.blob,
            })
            .collect(),
    ))
}

pub async fn upsert(
    State(state): State<AppState>,
    Extension(principal): Extension<AuthPrincipal>,
    Json(req): Json<EntryPayload>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if req.label.trim().is_empty() {
        return Err(ApiError::Validation("Entry label cannot be empty".to_string()));
    }

    // Shape check only: the blob must parse as a versioned envelope. No
    // decryption happens server-side.
    Envelope::decode(&req.blob)
        .map_err(|e| ApiError::Validation(format!("Blob rejected: {}", e)))?;

    state
        .storage
        .upsert(&principal.0, &req.label, &req.username, &req.blob)?;

    Ok(Json(serde_json::json!({ "status": "upserted" })))
}

pub async fn remove(
    State(state): State<AppState>,
    Extension(principal): Extension<AuthPrincipal>,
    Path(label): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.storage.delete(&principal.0, &label)?;
    Ok(Json(serde_json::json!({ "status": "deleted" })))
}
