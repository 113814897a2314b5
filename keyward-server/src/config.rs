//! Server configuration.

use keyward_core::token::SigningSecret;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable consulted for the token signing secret.
pub const SIGNING_SECRET_ENV: &str = "KEYWARD_SIGNING_SECRET";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: String,
    pub storage_path: PathBuf,
    /// Token signing secret. The environment variable takes precedence;
    /// there is no built-in default.
    pub signing_secret: Option<String>,
    pub token_ttl_secs: i64,
    pub pending_login_ttl_secs: i64,
    pub totp_issuer: String,
    pub totp_tolerance_steps: i64,
    pub login_attempts_per_minute: u32,
    pub max_payload_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8680".to_string(),
            storage_path: PathBuf::from("keyward.db"),
            signing_secret: None,
            token_ttl_secs: 1800,
            pending_login_ttl_secs: 300,
            totp_issuer: "Keyward".to_string(),
            totp_tolerance_steps: 1,
            login_attempts_per_minute: 10,
            max_payload_size: 65_536,
        }
    }
}

impl ServerConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Resolve the token signing secret, aborting startup when none is
    /// configured. Falling back to a guessable default would let anyone
    /// mint tokens, so absence is fatal.
    pub fn resolve_signing_secret(&self) -> anyhow::Result<SigningSecret> {
        let material = std::env::var(SIGNING_SECRET_ENV)
            .ok()
            .filter(|s| !s.is_empty())
            .or_else(|| self.signing_secret.clone())
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "No token signing secret configured; set {} or `signing_secret` in the config file",
                    SIGNING_SECRET_ENV
                )
            })?;

        SigningSecret::from_bytes(material.as_bytes()).map_err(|e| anyhow::anyhow!("{}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.token_ttl_secs, 1800);
        assert_eq!(config.pending_login_ttl_secs, 300);
        assert_eq!(config.totp_tolerance_steps, 1);
        assert!(config.signing_secret.is_none());
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: ServerConfig = toml::from_str("listen_addr = \"0.0.0.0:9000\"").unwrap();
        assert_eq!(config.listen_addr, "0.0.0.0:9000");
        assert_eq!(config.token_ttl_secs, 1800);
    }

    #[test]
    fn test_missing_signing_secret_is_fatal() {
        let config = ServerConfig::default();
        if std::env::var(SIGNING_SECRET_ENV).is_err() {
            assert!(config.resolve_signing_secret().is_err());
        }
    }

    #[test]
    fn test_short_signing_secret_rejected() {
        let config = ServerConfig {
            signing_secret: Some("too-short".to_string()),
            ..Default::default()
        };
        if std::env::var(SIGNING_SECRET_ENV).is_err() {
            assert!(config.resolve_signing_secret().is_err());
        }
    }
}
