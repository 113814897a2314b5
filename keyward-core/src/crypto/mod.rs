//! Cryptographic primitives for the vault.
//!
//! This module provides:
//! - Argon2id key derivation from the master password
//! - AES-256-GCM authenticated envelopes for vault entries
//! - Argon2id PHC-string hashing for server-side password verification

pub mod envelope;
pub mod kdf;
pub mod password;

pub use envelope::{decrypt, encrypt, validate, BatchItem, BatchOutcome, Envelope};
pub use kdf::{derive_vault_key, KdfParams, VaultKey};
pub use password::{hash_password, verify_password};

use thiserror::Error;

/// Errors that can occur in cryptographic operations.
///
/// `AuthenticationFailed` deliberately carries no detail: a wrong master
/// password and a tampered ciphertext must be indistinguishable to callers.
#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Key derivation failed: {0}")]
    KdfFailed(String),

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),

    #[error("Unsupported envelope version: {0}")]
    UnsupportedVersion(u8),

    #[error("Authentication failed")]
    AuthenticationFailed,

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl CryptoError {
    /// True when the error is a structural/validation problem rather than
    /// a failed tag check.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::MalformedEnvelope(_) | Self::UnsupportedVersion(_) | Self::InvalidInput(_)
        )
    }
}

/// Result type for crypto operations.
pub type Result<T> = std::result::Result<T, CryptoError>;
