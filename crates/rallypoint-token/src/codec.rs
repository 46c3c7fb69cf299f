//! Decoding a token string into [`Claims`].
//!
//! A token has three base64url segments separated by dots:
//!
//! ```text
//! eyJhbGciOiJIUzI1NiJ9 . eyJzdWIiOiI0MiIsImV4cCI6MTcwMH0 . c2lnbmF0dXJl
//!        header                      payload                 signature
//! ```
//!
//! Only the payload is read. The header and signature are checked for
//! presence (so `"not-a-token"` is rejected) but never interpreted.
//!
//! All functions here are pure and cheap; callers are expected to decode
//! on demand rather than cache claims.

use std::collections::BTreeSet;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};

use crate::{Claims, TokenError};

/// How many seconds before the real expiry a token is already treated as
/// expired by [`is_expired`].
pub const DEFAULT_EXPIRY_SKEW_SECS: i64 = 300;

/// Decodes the payload of `token` into [`Claims`].
///
/// Valid-but-expired tokens decode fine; expiry is a separate question
/// answered by [`is_expired`].
///
/// # Errors
/// Returns [`TokenError::Malformed`] if the string does not have exactly
/// three segments, the payload is not base64url, or the payload is not a
/// JSON object.
pub fn decode(token: &str) -> Result<Claims, TokenError> {
    let segments: Vec<&str> = token.trim().split('.').collect();
    if segments.len() != 3 {
        return Err(TokenError::Malformed(format!(
            "expected 3 segments, found {}",
            segments.len()
        )));
    }

    let payload = segments[1].trim_end_matches('=');
    if segments[0].is_empty() || payload.is_empty() {
        return Err(TokenError::Malformed("empty header or payload".into()));
    }

    let bytes = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|e| TokenError::Malformed(format!("payload is not base64url: {e}")))?;

    // Parse to a `Value` first: serde would happily build a struct out of
    // a JSON array, and a payload must be an object.
    let value: serde_json::Value = serde_json::from_slice(&bytes)
        .map_err(|e| TokenError::Malformed(format!("payload is not JSON: {e}")))?;
    if !value.is_object() {
        return Err(TokenError::Malformed("payload is not a JSON object".into()));
    }

    serde_json::from_value(value)
        .map_err(|e| TokenError::Malformed(format!("unexpected claim shape: {e}")))
}

/// Returns `true` if `token` is expired, or will be within `skew_secs`.
///
/// Fail-closed: a token that cannot be decoded is reported as expired.
pub fn is_expired(token: &str, skew_secs: i64) -> bool {
    is_expired_at(token, skew_secs, Utc::now())
}

/// Same as [`is_expired`] but against an explicit clock reading.
pub fn is_expired_at(token: &str, skew_secs: i64, now: DateTime<Utc>) -> bool {
    match decode(token) {
        Ok(claims) => claims.is_expired_at(skew_secs, now),
        Err(e) => {
            tracing::debug!(error = %e, "treating undecodable token as expired");
            true
        }
    }
}

/// Permissions granted by `token`, or an empty set if it can't be decoded.
pub fn extract_permissions(token: &str) -> BTreeSet<String> {
    decode(token).map(|c| c.permissions).unwrap_or_default()
}

/// Roles granted by `token`, or an empty set if it can't be decoded.
pub fn extract_roles(token: &str) -> BTreeSet<String> {
    decode(token).map(|c| c.roles).unwrap_or_default()
}

/// Builds an unsigned token (`alg: none`, empty signature) carrying
/// `claims`.
///
/// Useful for tests and local development against a stub API. The
/// Rallypoint API will reject these tokens.
///
/// # Errors
/// Returns [`TokenError::Malformed`] if the claims cannot be serialized.
pub fn encode_unsigned(claims: &Claims) -> Result<String, TokenError> {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
    let payload = serde_json::to_vec(claims)
        .map_err(|e| TokenError::Malformed(format!("cannot encode claims: {e}")))?;
    Ok(format!("{header}.{}.", URL_SAFE_NO_PAD.encode(payload)))
}
