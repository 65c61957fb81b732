//! Request signing for the Agent-Server control channel.
//!
//! `signature = hex(HMAC-SHA256(secret, "{ts}\n{METHOD}\n{path}\n" || body))`.
//! The path excludes the query string and an empty path signs as `/`.
//! Verifiers reject mismatched signatures and timestamps outside the
//! replay window.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

pub const TIMESTAMP_HEADER: &str = "X-Timestamp";
pub const SIGNATURE_HEADER: &str = "X-Signature";
pub const DEFAULT_REPLAY_WINDOW_SECS: i64 = 300;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("Invalid signing key")]
    InvalidKey,

    #[error("Invalid timestamp header: {0:?}")]
    InvalidTimestamp(String),

    #[error("Request timestamp outside replay window ({skew}s > {window}s)")]
    Expired { skew: i64, window: i64 },

    #[error("Signature mismatch")]
    BadSignature,
}

/// Path component of `url` as signed: no query or fragment, `/` when empty.
pub fn signing_path(url: &str) -> String {
    let path = match reqwest::Url::parse(url) {
        Ok(parsed) => parsed.path().to_string(),
        Err(_) => url.split(['?', '#']).next().unwrap_or_default().to_string(),
    };
    if path.is_empty() {
        "/".to_string()
    } else {
        path
    }
}

fn keyed_mac(secret: &[u8], method: &str, path: &str, timestamp: i64, body: &[u8]) -> Result<HmacSha256, AuthError> {
    let mut mac = HmacSha256::new_from_slice(secret).map_err(|_| AuthError::InvalidKey)?;
    let path = if path.is_empty() { "/" } else { path };
    mac.update(format!("{timestamp}\n{}\n{path}\n", method.to_uppercase()).as_bytes());
    mac.update(body);
    Ok(mac)
}

/// Lowercase hex signature for a request.
pub fn sign(secret: &[u8], method: &str, path: &str, timestamp: i64, body: &[u8]) -> Result<String, AuthError> {
    let mac = keyed_mac(secret, method, path, timestamp, body)?;
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Constant-time signature check. Malformed hex is a mismatch.
pub fn verify(secret: &[u8], method: &str, path: &str, timestamp: i64, body: &[u8], signature: &str) -> bool {
    let Ok(expected) = hex::decode(signature.trim()) else {
        return false;
    };
    keyed_mac(secret, method, path, timestamp, body)
        .map(|mac| mac.verify_slice(&expected).is_ok())
        .unwrap_or(false)
}

/// Full verifier contract: timestamp within `window` of `now`, then signature.
#[allow(clippy::too_many_arguments)]
pub fn verify_request(
    secret: &[u8],
    method: &str,
    path: &str,
    timestamp_header: &str,
    body: &[u8],
    signature: &str,
    now: i64,
    window: i64,
) -> Result<(), AuthError> {
    let timestamp: i64 = timestamp_header
        .trim()
        .parse()
        .map_err(|_| AuthError::InvalidTimestamp(timestamp_header.to_string()))?;

    let skew = now.saturating_sub(timestamp).saturating_abs();
    if skew > window {
        return Err(AuthError::Expired { skew, window });
    }

    if verify(secret, method, path, timestamp, body, signature) {
        Ok(())
    } else {
        Err(AuthError::BadSignature)
    }
}
