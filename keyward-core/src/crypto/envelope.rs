//! Authenticated envelopes for vault entries.
//!
//! Each entry is sealed as a self-contained blob:
//!
//! ```text
//! version (1) ‖ salt (16) ‖ nonce (12) ‖ ciphertext‖tag
//! ```
//!
//! base64-rendered for transport. The version byte is explicit; the layout
//! is never inferred from the shape of the string. Encryption is
//! AES-256-GCM under a key derived from the master password via Argon2id.

use crate::crypto::kdf::{derive_vault_key, KdfParams, VaultKey, SALT_LEN};
use crate::crypto::{CryptoError, Result};
use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use std::collections::HashMap;

/// Current envelope format version.
pub const ENVELOPE_V1: u8 = 1;

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const MIN_RAW_LEN: usize = 1 + SALT_LEN + NONCE_LEN + TAG_LEN;

/// A parsed envelope. `ciphertext` carries the GCM tag in its trailing
/// 16 bytes.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub version: u8,
    pub salt: [u8; SALT_LEN],
    pub nonce: [u8; NONCE_LEN],
    pub ciphertext: Vec<u8>,
}

impl Envelope {
    /// Parse a transport blob. Structural problems (bad base64, truncation,
    /// unknown version) are validation errors, distinct from a failed tag
    /// check.
    pub fn decode(blob: &str) -> Result<Self> {
        let raw = STANDARD
            .decode(blob.trim())
            .map_err(|_| CryptoError::MalformedEnvelope("Blob is not valid base64".to_string()))?;

        if raw.len() < MIN_RAW_LEN {
            return Err(CryptoError::MalformedEnvelope(format!(
                "Blob too short: {} bytes",
                raw.len()
            )));
        }

        let version = raw[0];
        if version != ENVELOPE_V1 {
            return Err(CryptoError::UnsupportedVersion(version));
        }

        let mut salt = [0u8; SALT_LEN];
        salt.copy_from_slice(&raw[1..1 + SALT_LEN]);

        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(&raw[1 + SALT_LEN..1 + SALT_LEN + NONCE_LEN]);

        Ok(Self {
            version,
            salt,
            nonce,
            ciphertext: raw[1 + SALT_LEN + NONCE_LEN..].to_vec(),
        })
    }

    /// Render the envelope for transport or storage.
    pub fn encode(&self) -> String {
        let mut raw = Vec::with_capacity(1 + SALT_LEN + NONCE_LEN + self.ciphertext.len());
        raw.push(self.version);
        raw.extend_from_slice(&self.salt);
        raw.extend_from_slice(&self.nonce);
        raw.extend_from_slice(&self.ciphertext);
        STANDARD.encode(raw)
    }
}

/// Encrypt a plaintext under a master password.
///
/// Every call generates a fresh random salt and nonce, so identical
/// plaintext under the same password never yields identical blobs.
pub fn encrypt(plaintext: &str, password: &str) -> Result<String> {
    let key = derive_vault_key(password.as_bytes(), &KdfParams::new())?;
    encrypt_with_key(plaintext, &key)
}

/// Encrypt a plaintext under an already-derived key.
///
/// The envelope carries the key's salt; the nonce is fresh per call. Used
/// by unlocked sessions to avoid re-running the expensive derivation.
pub fn encrypt_with_key(plaintext: &str, key: &VaultKey) -> Result<String> {
    let cipher = Aes256Gcm::new(key.as_bytes().into());
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let nonce_bytes: [u8; NONCE_LEN] = nonce.into();

    let ciphertext = cipher
        .encrypt(&nonce, plaintext.as_bytes())
        .map_err(|e| CryptoError::EncryptionFailed(format!("{}", e)))?;

    Ok(Envelope {
        version: ENVELOPE_V1,
        salt: *key.salt(),
        nonce: nonce_bytes,
        ciphertext,
    }
    .encode())
}

/// Decrypt a blob with a master password.
///
/// Fails with [`CryptoError::AuthenticationFailed`] when the tag does not
/// verify; a wrong password and a tampered blob are not distinguished.
pub fn decrypt(blob: &str, password: &str) -> Result<String> {
    let envelope = Envelope::decode(blob)?;
    let key = derive_vault_key(password.as_bytes(), &KdfParams::with_salt(envelope.salt))?;
    open(&envelope, &key)
}

/// Decrypt a blob with an already-derived key. The key must have been
/// derived with the salt the envelope carries.
pub fn decrypt_with_key(blob: &str, key: &VaultKey) -> Result<String> {
    let envelope = Envelope::decode(blob)?;
    if &envelope.salt != key.salt() {
        return Err(CryptoError::InvalidInput(
            "Envelope salt does not match the derived key".to_string(),
        ));
    }
    open(&envelope, key)
}

/// Attempt a decrypt and report success without raising.
///
/// Used to test a candidate master password against a stored blob.
pub fn validate(blob: &str, password: &str) -> bool {
    decrypt(blob, password).is_ok()
}

pub(crate) fn open(envelope: &Envelope, key: &VaultKey) -> Result<String> {
    if envelope.ciphertext.len() < TAG_LEN {
        return Err(CryptoError::MalformedEnvelope(
            "Ciphertext shorter than the authentication tag".to_string(),
        ));
    }

    let cipher = Aes256Gcm::new(key.as_bytes().into());
    let nonce = Nonce::from(envelope.nonce);

    let plaintext = cipher
        .decrypt(&nonce, envelope.ciphertext.as_slice())
        .map_err(|_| CryptoError::AuthenticationFailed)?;

    String::from_utf8(plaintext)
        .map_err(|_| CryptoError::MalformedEnvelope("Plaintext is not valid UTF-8".to_string()))
}

/// One labeled input to a batch operation.
#[derive(Debug, Clone)]
pub struct BatchItem {
    pub label: String,
    pub value: String,
}

/// Per-item result of a batch operation. Ordering and labels of the input
/// are preserved; one item failing never aborts the rest.
#[derive(Debug)]
pub struct BatchOutcome {
    pub label: String,
    pub result: Result<String>,
}

/// Encrypt a list of labeled plaintexts under one password.
///
/// Each item gets its own fresh salt and nonce.
pub fn encrypt_batch(items: &[BatchItem], password: &str) -> Vec<BatchOutcome> {
    items
        .iter()
        .map(|item| BatchOutcome {
            label: item.label.clone(),
            result: encrypt(&item.value, password),
        })
        .collect()
}

/// Decrypt a list of labeled blobs under one password.
///
/// Derivation is memoized per distinct salt, so a vault written by one
/// session decrypts with a single derivation. A failed item is reported in
/// place; the remaining items still decrypt.
pub fn decrypt_batch(items: &[BatchItem], password: &str) -> Vec<BatchOutcome> {
    let mut keys: HashMap<[u8; SALT_LEN], Result<VaultKey>> = HashMap::new();

    items
        .iter()
        .map(|item| {
            let result = Envelope::decode(&item.value).and_then(|envelope| {
                let key = keys.entry(envelope.salt).or_insert_with(|| {
                    derive_vault_key(password.as_bytes(), &KdfParams::with_salt(envelope.salt))
                });
                match key {
                    Ok(key) => open(&envelope, key),
                    Err(_) => Err(CryptoError::KdfFailed("Derivation failed".to_string())),
                }
            });
            BatchOutcome {
                label: item.label.clone(),
                result,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let blob = encrypt("correct horse battery staple", "master-pw").unwrap();
        let plaintext = decrypt(&blob, "master-pw").unwrap();
        assert_eq!(plaintext, "correct horse battery staple");
    }

    #[test]
    fn test_encryption_is_nondeterministic() {
        let blob1 = encrypt("same data", "master-pw").unwrap();
        let blob2 = encrypt("same data", "master-pw").unwrap();
        assert_ne!(blob1, blob2);

        let env1 = Envelope::decode(&blob1).unwrap();
        let env2 = Envelope::decode(&blob2).unwrap();
        assert_ne!(env1.salt, env2.salt);
        assert_ne!(env1.nonce, env2.nonce);
    }

    #[test]
    fn test_wrong_password_fails_authentication() {
        let blob = encrypt("secret", "password-one").unwrap();
        let err = decrypt(&blob, "password-two").unwrap_err();
        assert!(matches!(err, CryptoError::AuthenticationFailed));
    }

    #[test]
    fn test_any_single_byte_flip_is_detected() {
        let blob = encrypt("payload", "master-pw").unwrap();
        let mut raw = STANDARD.decode(&blob).unwrap();

        // Flip the last byte (inside the tag) and one inside the ciphertext.
        for index in [raw.len() - 1, 1 + SALT_LEN + NONCE_LEN] {
            raw[index] ^= 0x01;
            let tampered = STANDARD.encode(&raw);
            match decrypt(&tampered, "master-pw") {
                Err(CryptoError::AuthenticationFailed) => {}
                other => panic!("tampered blob must fail authentication, got {:?}", other),
            }
            raw[index] ^= 0x01;
        }
    }

    #[test]
    fn test_flipping_salt_or_nonce_fails_authentication() {
        let blob = encrypt("payload", "master-pw").unwrap();
        let mut raw = STANDARD.decode(&blob).unwrap();

        for index in [1, 1 + SALT_LEN] {
            raw[index] ^= 0xFF;
            let tampered = STANDARD.encode(&raw);
            assert!(matches!(
                decrypt(&tampered, "master-pw"),
                Err(CryptoError::AuthenticationFailed)
            ));
            raw[index] ^= 0xFF;
        }
    }

    #[test]
    fn test_malformed_blob_is_a_validation_error() {
        let err = decrypt("not base64 at all!!!", "pw").unwrap_err();
        assert!(err.is_validation());

        let short = STANDARD.encode([ENVELOPE_V1, 0, 0]);
        let err = decrypt(&short, "pw").unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_unknown_version_rejected() {
        let blob = encrypt("payload", "master-pw").unwrap();
        let mut raw = STANDARD.decode(&blob).unwrap();
        raw[0] = 9;
        let err = decrypt(&STANDARD.encode(&raw), "master-pw").unwrap_err();
        assert!(matches!(err, CryptoError::UnsupportedVersion(9)));
    }

    #[test]
    fn test_validate_reports_without_raising() {
        let blob = encrypt("payload", "master-pw").unwrap();
        assert!(validate(&blob, "master-pw"));
        assert!(!validate(&blob, "wrong"));
        assert!(!validate("garbage", "master-pw"));
    }

    #[test]
    fn test_key_reuse_keeps_salt_and_refreshes_nonce() {
        let key = derive_vault_key(b"master-pw", &KdfParams::new()).unwrap();

        let blob1 = encrypt_with_key("entry", &key).unwrap();
        let blob2 = encrypt_with_key("entry", &key).unwrap();
        assert_ne!(blob1, blob2);

        let env1 = Envelope::decode(&blob1).unwrap();
        let env2 = Envelope::decode(&blob2).unwrap();
        assert_eq!(&env1.salt, key.salt());
        assert_eq!(&env2.salt, key.salt());
        assert_ne!(env1.nonce, env2.nonce);

        assert_eq!(decrypt_with_key(&blob1, &key).unwrap(), "entry");
        assert_eq!(decrypt(&blob2, "master-pw").unwrap(), "entry");
    }

    #[test]
    fn test_batch_decrypt_reports_per_item() {
        let items: Vec<BatchItem> = ["one", "two", "three"]
            .iter()
            .enumerate()
            .map(|(i, value)| BatchItem {
                label: format!("app-{}", i),
                value: value.to_string(),
            })
            .collect();

        let encrypted = encrypt_batch(&items, "master-pw");
        assert!(encrypted.iter().all(|o| o.result.is_ok()));

        let mut blobs: Vec<BatchItem> = encrypted
            .into_iter()
            .map(|o| BatchItem {
                label: o.label,
                value: o.result.unwrap(),
            })
            .collect();

        // Corrupt the last byte of the second blob.
        let mut raw = STANDARD.decode(&blobs[1].value).unwrap();
        *raw.last_mut().unwrap() ^= 0x01;
        blobs[1].value = STANDARD.encode(&raw);

        let outcomes = decrypt_batch(&blobs, "master-pw");
        assert_eq!(outcomes.len(), 3);
        assert_eq!(outcomes[0].label, "app-0");
        assert_eq!(outcomes[0].result.as_deref().unwrap(), "one");
        assert!(matches!(
            outcomes[1].result,
            Err(CryptoError::AuthenticationFailed)
        ));
        assert_eq!(outcomes[2].result.as_deref().unwrap(), "three");
    }
}
