//! Keyward core library.
//!
//! Zero-knowledge credential vault primitives: Argon2id key derivation,
//! AES-256-GCM authenticated envelopes, the client-side vault session,
//! TOTP codes, and signed bearer tokens. Servers consume this crate and
//! add transport; they never see plaintext credentials or derived keys.

pub mod crypto;
pub mod session;
pub mod store;
pub mod token;
pub mod totp;

pub use crypto::{
    decrypt, derive_vault_key, encrypt, hash_password, validate, verify_password, CryptoError,
    Envelope, KdfParams, VaultKey,
};
pub use session::{DecryptedEntry, EntryOutcome, SessionState, VaultSession};
pub use store::{EntryStore, StoreError, StoredEntry};
pub use token::{Claims, IssuedToken, SigningSecret, TokenError, TokenIssuer};

use thiserror::Error;

/// Result type for vault operations.
pub type Result<T> = std::result::Result<T, KeywardError>;

/// General error type for vault operations.
#[derive(Error, Debug)]
pub enum KeywardError {
    #[error("Crypto error: {0}")]
    Crypto(#[from] crypto::CryptoError),

    #[error("Token error: {0}")]
    Token(#[from] token::TokenError),

    #[error("Store error: {0}")]
    Store(#[from] store::StoreError),

    #[error("Vault is locked")]
    VaultLocked,

    #[error("Incorrect master password")]
    IncorrectPassword,

    #[error("Vault integrity check failed: re-authentication required")]
    VaultIntegrity,

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Background task failed: {0}")]
    Task(String),
}
