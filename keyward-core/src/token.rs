//! Signed, time-limited bearer tokens.
//!
//! A token asserts "this principal completed password + TOTP verification"
//! and nothing else. Format is a compact JWT: base64url-encoded header,
//! claims, and HMAC-SHA256 signature under a server-held secret. Expiry is
//! checked only after the signature verifies.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;
use zeroize::Zeroize;

type HmacSha256 = Hmac<Sha256>;

/// Default token lifetime: 30 minutes.
pub const DEFAULT_TTL_SECS: i64 = 1800;

const MIN_SECRET_LEN: usize = 32;
const HEADER: &str = r#"{"alg":"HS256","typ":"JWT"}"#;

/// Token errors. `Expired` and `InvalidSignature` are distinct so callers
/// can log the kind, but both mean "re-authenticate".
#[derive(Error, Debug, PartialEq, Eq)]
pub enum TokenError {
    #[error("Token expired")]
    Expired,

    #[error("Invalid token signature")]
    InvalidSignature,

    #[error("Malformed token: {0}")]
    Malformed(String),

    #[error("Signing secret rejected: {0}")]
    WeakSecret(String),
}

/// The server-held signing secret. Read-only after initialization; there
/// is no default value.
pub struct SigningSecret(Vec<u8>);

impl SigningSecret {
    /// Accept secret material, refusing anything shorter than 32 bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TokenError> {
        if bytes.len() < MIN_SECRET_LEN {
            return Err(TokenError::WeakSecret(format!(
                "Signing secret must be at least {} bytes, got {}",
                MIN_SECRET_LEN,
                bytes.len()
            )));
        }
        Ok(Self(bytes.to_vec()))
    }
}

impl Drop for SigningSecret {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

/// Signed claims: subject, issued-at, expiry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
}

/// A freshly minted token and its expiry timestamp.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: i64,
}

/// Mints and validates bearer tokens.
pub struct TokenIssuer {
    secret: SigningSecret,
}

impl TokenIssuer {
    pub fn new(secret: SigningSecret) -> Self {
        Self { secret }
    }

    /// Issue a token for a principal. The auth gate is the only caller and
    /// invokes this strictly after both factors verified.
    pub fn issue(&self, principal_id: &str, ttl_secs: i64) -> Result<IssuedToken, TokenError> {
        self.issue_at(principal_id, ttl_secs, Utc::now().timestamp())
    }

    pub fn issue_at(
        &self,
        principal_id: &str,
        ttl_secs: i64,
        now: i64,
    ) -> Result<IssuedToken, TokenError> {
        if principal_id.is_empty() {
            return Err(TokenError::Malformed("Empty principal id".to_string()));
        }
        if ttl_secs <= 0 {
            return Err(TokenError::Malformed("TTL must be positive".to_string()));
        }

        let claims = Claims {
            sub: principal_id.to_string(),
            iat: now,
            exp: now + ttl_secs,
        };
        let claims_json = serde_json::to_vec(&claims)
            .map_err(|e| TokenError::Malformed(format!("Claims serialization: {}", e)))?;

        let signing_input = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(HEADER.as_bytes()),
            URL_SAFE_NO_PAD.encode(claims_json)
        );
        let signature = self.sign(signing_input.as_bytes())?;

        Ok(IssuedToken {
            token: format!("{}.{}", signing_input, URL_SAFE_NO_PAD.encode(signature)),
            expires_at: claims.exp,
        })
    }

    /// Verify a token, returning the principal id it asserts.
    pub fn verify(&self, token: &str) -> Result<String, TokenError> {
        self.verify_at(token, Utc::now().timestamp())
    }

    pub fn verify_at(&self, token: &str, now: i64) -> Result<String, TokenError> {
        let mut parts = token.split('.');
        let header_b64 = parts
            .next()
            .ok_or_else(|| TokenError::Malformed("Missing header".to_string()))?;
        let claims_b64 = parts
            .next()
            .ok_or_else(|| TokenError::Malformed("Missing claims".to_string()))?;
        let signature_b64 = parts
            .next()
            .ok_or_else(|| TokenError::Malformed("Missing signature".to_string()))?;
        if parts.next().is_some() {
            return Err(TokenError::Malformed("Too many segments".to_string()));
        }

        // Signature first; nothing inside the token is trusted before it.
        let signature = URL_SAFE_NO_PAD
            .decode(signature_b64)
            .map_err(|_| TokenError::Malformed("Invalid signature encoding".to_string()))?;
        let signing_input = format!("{}.{}", header_b64, claims_b64);
        let mut mac = HmacSha256::new_from_slice(&self.secret.0)
            .map_err(|_| TokenError::Malformed("HMAC initialization failed".to_string()))?;
        mac.update(signing_input.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| TokenError::InvalidSignature)?;

        let header_bytes = URL_SAFE_NO_PAD
            .decode(header_b64)
            .map_err(|_| TokenError::Malformed("Invalid header encoding".to_string()))?;
        let header: serde_json::Value = serde_json::from_slice(&header_bytes)
            .map_err(|_| TokenError::Malformed("Invalid header JSON".to_string()))?;
        match header.get("alg").and_then(|v| v.as_str()) {
            Some("HS256") => {}
            Some(other) => {
                return Err(TokenError::Malformed(format!(
                    "Unsupported algorithm: {}",
                    other
                )))
            }
            None => return Err(TokenError::Malformed("Header missing alg".to_string())),
        }

        let claims_bytes = URL_SAFE_NO_PAD
            .decode(claims_b64)
            .map_err(|_| TokenError::Malformed("Invalid claims encoding".to_string()))?;
        let claims: Claims = serde_json::from_slice(&claims_bytes)
            .map_err(|_| TokenError::Malformed("Invalid claims JSON".to_string()))?;

        if claims.exp <= now {
            return Err(TokenError::Expired);
        }

        Ok(claims.sub)
    }

    fn sign(&self, input: &[u8]) -> Result<Vec<u8>, TokenError> {
        let mut mac = HmacSha256::new_from_slice(&self.secret.0)
            .map_err(|_| TokenError::Malformed("HMAC initialization failed".to_string()))?;
        mac.update(input);
        Ok(mac.finalize().into_bytes().to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issuer() -> TokenIssuer {
        TokenIssuer::new(SigningSecret::from_bytes(&[7u8; 32]).unwrap())
    }

    #[test]
    fn test_issue_and_verify_roundtrip() {
        let issuer = issuer();
        let issued = issuer.issue_at("principal-1", DEFAULT_TTL_SECS, 1_700_000_000).unwrap();
        assert_eq!(issued.expires_at, 1_700_000_000 + DEFAULT_TTL_SECS);

        let sub = issuer.verify_at(&issued.token, 1_700_000_100).unwrap();
        assert_eq!(sub, "principal-1");
    }

    #[test]
    fn test_expired_token_is_distinct() {
        let issuer = issuer();
        let issued = issuer.issue_at("principal-1", 60, 1_700_000_000).unwrap();
        assert_eq!(
            issuer.verify_at(&issued.token, 1_700_000_061).unwrap_err(),
            TokenError::Expired
        );
    }

    #[test]
    fn test_wrong_secret_fails_signature() {
        let issued = issuer().issue_at("principal-1", 60, 1_700_000_000).unwrap();
        let other = TokenIssuer::new(SigningSecret::from_bytes(&[8u8; 32]).unwrap());
        assert_eq!(
            other.verify_at(&issued.token, 1_700_000_001).unwrap_err(),
            TokenError::InvalidSignature
        );
    }

    #[test]
    fn test_tampered_claims_fail_signature() {
        let issuer = issuer();
        let issued = issuer.issue_at("principal-1", 60, 1_700_000_000).unwrap();

        let mut parts: Vec<&str> = issued.token.split('.').collect();
        let forged = URL_SAFE_NO_PAD.encode(
            serde_json::to_vec(&Claims {
                sub: "principal-2".to_string(),
                iat: 1_700_000_000,
                exp: 1_900_000_000,
            })
            .unwrap(),
        );
        parts[1] = &forged;
        let tampered = parts.join(".");

        assert_eq!(
            issuer.verify_at(&tampered, 1_700_000_001).unwrap_err(),
            TokenError::InvalidSignature
        );
    }

    #[test]
    fn test_malformed_tokens() {
        let issuer = issuer();
        for token in ["", "one.two", "a.b.c.d", "!!!.???.###"] {
            assert!(matches!(
                issuer.verify_at(token, 0).unwrap_err(),
                TokenError::Malformed(_) | TokenError::InvalidSignature
            ));
        }
    }

    #[test]
    fn test_weak_secret_rejected() {
        assert!(matches!(
            SigningSecret::from_bytes(b"short"),
            Err(TokenError::WeakSecret(_))
        ));
    }

    #[test]
    fn test_issue_validates_inputs() {
        let issuer = issuer();
        assert!(issuer.issue_at("", 60, 0).is_err());
        assert!(issuer.issue_at("p", 0, 0).is_err());
    }
}
