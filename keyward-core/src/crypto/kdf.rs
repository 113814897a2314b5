//! Argon2id key derivation for the master password.
//!
//! Parameters for envelope version 1:
//! - Memory cost: 64 MiB (65,536 KiB)
//! - Time cost: 3 iterations
//! - Parallelism: 1 lane
//! - Output length: 32 bytes
//! - Salt length: 16 bytes

use crate::crypto::{CryptoError, Result};
use argon2::{Algorithm, Argon2, Params, Version};
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

/// Salt length in bytes.
pub const SALT_LEN: usize = 16;

/// Derived key length in bytes.
pub const KEY_LEN: usize = 32;

const MEM_COST_KIB: u32 = 65_536;
const TIME_COST: u32 = 3;
const PARALLELISM: u32 = 1;

// OWASP floor for Argon2id; anything below is rejected outright.
const MIN_MEM_COST_KIB: u32 = 19_456;

/// Parameters for Argon2id key derivation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KdfParams {
    /// Salt for key derivation (16 bytes).
    pub salt: [u8; SALT_LEN],

    /// Memory cost in KiB.
    pub mem_cost: u32,

    /// Time cost (number of iterations).
    pub time_cost: u32,

    /// Parallelism (number of lanes).
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            salt: rand::random(),
            mem_cost: MEM_COST_KIB,
            time_cost: TIME_COST,
            parallelism: PARALLELISM,
        }
    }
}

impl KdfParams {
    /// Create parameters with a fresh random salt.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the version-1 cost profile over a known salt.
    ///
    /// Used when decrypting an envelope that carries its own salt.
    pub fn with_salt(salt: [u8; SALT_LEN]) -> Self {
        Self {
            salt,
            mem_cost: MEM_COST_KIB,
            time_cost: TIME_COST,
            parallelism: PARALLELISM,
        }
    }

    /// Verify that parameters are within acceptable ranges.
    pub fn validate(&self) -> Result<()> {
        if self.mem_cost < MIN_MEM_COST_KIB {
            return Err(CryptoError::KdfFailed(format!(
                "Memory cost too low (minimum: {} KiB)",
                MIN_MEM_COST_KIB
            )));
        }
        if self.time_cost < 1 {
            return Err(CryptoError::KdfFailed("Time cost too low (minimum: 1)".to_string()));
        }
        if self.parallelism < 1 {
            return Err(CryptoError::KdfFailed(
                "Parallelism too low (minimum: 1)".to_string(),
            ));
        }
        Ok(())
    }
}

/// A derived vault key, bound to the salt it was derived with.
///
/// Exists only in process memory; the key bytes are wiped on drop.
#[derive(Clone)]
pub struct VaultKey {
    salt: [u8; SALT_LEN],
    key: [u8; KEY_LEN],
}

impl VaultKey {
    pub fn salt(&self) -> &[u8; SALT_LEN] {
        &self.salt
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.key
    }
}

impl Drop for VaultKey {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

impl std::fmt::Debug for VaultKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Key material must never reach logs.
        f.debug_struct("VaultKey").finish_non_exhaustive()
    }
}

/// Derive a vault key from a master password.
///
/// Deterministic for a fixed (password, salt) pair. Input validation runs
/// before any derivation work so malformed requests never pay the
/// memory-hard cost.
pub fn derive_vault_key(password: &[u8], params: &KdfParams) -> Result<VaultKey> {
    if password.is_empty() {
        return Err(CryptoError::InvalidInput(
            "Master password cannot be empty".to_string(),
        ));
    }
    params.validate()?;

    let argon_params = Params::new(
        params.mem_cost,
        params.time_cost,
        params.parallelism,
        Some(KEY_LEN),
    )
    .map_err(|e| CryptoError::KdfFailed(format!("Invalid parameters: {}", e)))?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon_params);

    let mut key = [0u8; KEY_LEN];
    argon2
        .hash_password_into(password, &params.salt, &mut key)
        .map_err(|e| CryptoError::KdfFailed(format!("Derivation failed: {}", e)))?;

    Ok(VaultKey {
        salt: params.salt,
        key,
    })
}
