use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;

use crate::error::TokenError;
use crate::model::SessionPayload;

/// Standard alphabet, padding optional. URL-safe segments are mapped onto it first.
const PAYLOAD_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Decodes the claims segment of a session token.
///
/// The signature is not checked: the payload only drives client-side routing,
/// the backend re-validates the cookie on every call.
///
/// # Errors
///
/// Returns `TokenError` if the token does not have exactly three segments, the
/// claims segment is not base64, or the claims do not match [`SessionPayload`].
pub fn decode_payload(token: &str) -> Result<SessionPayload, TokenError> {
    let segments: Vec<&str> = token.trim().split('.').collect();
    if segments.len() != 3 {
        return Err(TokenError::SegmentCount(segments.len()));
    }

    let normalized = segments[1].replace('-', "+").replace('_', "/");
    let bytes = PAYLOAD_ENGINE
        .decode(normalized.as_bytes())
        .map_err(|e| TokenError::Encoding(e.to_string()))?;

    serde_json::from_slice(&bytes).map_err(|e| TokenError::Payload(e.to_string()))
}

/// Decodes the token and rejects it once `exp` has passed.
pub fn decode_unexpired(token: &str, now_unix: i64) -> Result<SessionPayload, TokenError> {
    let payload = decode_payload(token)?;
    if payload.is_expired_at(now_unix) {
        return Err(TokenError::Expired(payload.exp));
    }
    Ok(payload)
}

/// Extracts the cookie value from a `Set-Cookie` header line
/// (`name=value; Path=/; HttpOnly` -> `value`).
pub fn token_from_set_cookie(header: &str) -> Option<String> {
    let pair = header.split(';').next()?.trim();
    let (_, value) = pair.split_once('=')?;
    let value = value.trim().trim_matches('"');
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}
