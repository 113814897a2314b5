//! TOTP (RFC 6238) one-time codes for the second authentication factor.
//!
//! Codes are 6 digits over HMAC-SHA1 with a 30-second step, matching what
//! the common authenticator apps provision by default.

use crate::{KeywardError, Result};
use data_encoding::BASE32_NOPAD;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha1::Sha1;
use std::time::{SystemTime, UNIX_EPOCH};
use subtle::{Choice, ConstantTimeEq};

type HmacSha1 = Hmac<Sha1>;

/// Time-step length in seconds.
pub const DEFAULT_STEP_SECS: u64 = 30;

/// Accepted clock-skew window, in steps on either side of now.
pub const DEFAULT_TOLERANCE_STEPS: i64 = 1;

const DIGITS: usize = 6;
const SECRET_LEN: usize = 20;

/// Generate a fresh provisioning secret: 20 random bytes as a 32-character
/// base32 string.
pub fn generate_secret() -> String {
    let mut bytes = [0u8; SECRET_LEN];
    rand::thread_rng().fill_bytes(&mut bytes);
    BASE32_NOPAD.encode(&bytes)
}

/// Build an `otpauth://totp/...` provisioning URI for QR-code rendering.
///
/// Pure string construction; rendering the QR image is the caller's
/// collaborator's concern.
pub fn provisioning_uri(secret: &str, account: &str, issuer: &str) -> Result<String> {
    if account.trim().is_empty() || issuer.trim().is_empty() {
        return Err(KeywardError::Validation(
            "Account and issuer labels cannot be empty".to_string(),
        ));
    }
    let normalized = normalize_secret(secret)?;

    Ok(format!(
        "otpauth://totp/{}:{}?secret={}&issuer={}",
        percent_encode(issuer),
        percent_encode(account),
        normalized,
        percent_encode(issuer),
    ))
}

/// Compute the code for a given timestamp and step length.
pub fn code_at(secret: &str, step_secs: u64, timestamp: i64) -> Result<String> {
    if step_secs == 0 {
        return Err(KeywardError::Validation(
            "Time step must be greater than 0".to_string(),
        ));
    }
    let secret_bytes = decode_secret(secret)?;
    let counter = (timestamp.max(0) as u64) / step_secs;
    code_for_counter(&secret_bytes, counter)
}

/// Compute the code for the current time step.
pub fn current_code(secret: &str) -> Result<String> {
    code_at(secret, DEFAULT_STEP_SECS, unix_now())
}

/// Verify a submitted code against the current time window.
///
/// Accepts the code for the current step or any step within
/// ±`tolerance_steps`.
pub fn verify(secret: &str, submitted: &str, tolerance_steps: i64) -> Result<bool> {
    verify_at(secret, submitted, tolerance_steps, unix_now())
}

/// Verify a submitted code against the window around `timestamp`.
///
/// Non-numeric or wrong-length input is rejected before any cryptographic
/// work. Every candidate step is evaluated and compared in constant time;
/// there is no early exit on match.
pub fn verify_at(secret: &str, submitted: &str, tolerance_steps: i64, timestamp: i64) -> Result<bool> {
    if submitted.len() != DIGITS || !submitted.bytes().all(|b| b.is_ascii_digit()) {
        return Ok(false);
    }
    if tolerance_steps < 0 {
        return Err(KeywardError::Validation(
            "Tolerance cannot be negative".to_string(),
        ));
    }

    let secret_bytes = decode_secret(secret)?;
    let current = (timestamp.max(0) as u64 / DEFAULT_STEP_SECS) as i64;

    let mut matched = Choice::from(0u8);
    for delta in -tolerance_steps..=tolerance_steps {
        let counter = current + delta;
        if counter < 0 {
            continue;
        }
        let candidate = code_for_counter(&secret_bytes, counter as u64)?;
        matched |= candidate.as_bytes().ct_eq(submitted.as_bytes());
    }

    Ok(bool::from(matched))
}

fn code_for_counter(secret: &[u8], counter: u64) -> Result<String> {
    let mut mac = HmacSha1::new_from_slice(secret)
        .map_err(|_| KeywardError::Validation("Invalid TOTP secret".to_string()))?;
    mac.update(&counter.to_be_bytes());
    let digest = mac.finalize().into_bytes();

    // RFC 4226 dynamic truncation.
    let offset = (digest[digest.len() - 1] & 0x0f) as usize;
    let binary = ((digest[offset] as u32 & 0x7f) << 24)
        | ((digest[offset + 1] as u32) << 16)
        | ((digest[offset + 2] as u32) << 8)
        | (digest[offset + 3] as u32);

    let code = binary % 10u32.pow(DIGITS as u32);
    Ok(format!("{:0width$}", code, width = DIGITS))
}

fn normalize_secret(secret: &str) -> Result<String> {
    let normalized = secret.trim().replace([' ', '-'], "").to_ascii_uppercase();
    if normalized.is_empty() {
        return Err(KeywardError::Validation(
            "TOTP secret cannot be empty".to_string(),
        ));
    }
    BASE32_NOPAD
        .decode(normalized.as_bytes())
        .map_err(|_| KeywardError::Validation("TOTP secret must be valid base32".to_string()))?;
    Ok(normalized)
}

fn decode_secret(secret: &str) -> Result<Vec<u8>> {
    let normalized = normalize_secret(secret)?;
    BASE32_NOPAD
        .decode(normalized.as_bytes())
        .map_err(|_| KeywardError::Validation("TOTP secret must be valid base32".to_string()))
}

fn percent_encode(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            other => out.push_str(&format!("%{:02X}", other)),
        }
    }
    out
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
