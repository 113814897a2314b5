//! Argon2id password hashing for server-side verification.
//!
//! This is the verification-hash side of the house: the stored PHC string
//! proves knowledge of the master password without being reversible. Key
//! derivation for envelopes is a separate primitive (see [`crate::crypto::kdf`]);
//! both are deliberately slow.

use crate::crypto::{CryptoError, Result};
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};

/// Hash a password for storage, producing a PHC-format string that embeds
/// algorithm, parameters, and salt.
pub fn hash_password(password: &str) -> Result<String> {
    if password.is_empty() {
        return Err(CryptoError::InvalidInput(
            "Password cannot be empty".to_string(),
        ));
    }

    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| CryptoError::KdfFailed(format!("Hashing failed: {}", e)))?;

    Ok(hash.to_string())
}

/// Verify a password against a stored PHC string.
///
/// Returns `false` for a mismatch; errors only on a malformed stored hash.
pub fn verify_password(stored_hash: &str, password: &str) -> Result<bool> {
    let parsed = PasswordHash::new(stored_hash)
        .map_err(|e| CryptoError::InvalidInput(format!("Malformed password hash: {}", e)))?;

    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}
