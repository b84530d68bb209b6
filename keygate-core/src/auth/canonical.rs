//! Protocol credential decoding
//!
//! Turns `Nostr <base64(JSON event)>` into a [`SignedEvent`]. Pure; no
//! validation beyond the shape of the transport string and required fields.

use crate::{KeygateError, Result, SignedEvent};
use base64::{engine::general_purpose::STANDARD, Engine as _};

/// Authorization scheme of the protocol credential (case-sensitive)
pub const NOSTR_SCHEME: &str = "Nostr";

/// Split `"<scheme> <payload>"`; a bare scheme yields an empty payload
pub fn split_scheme(credential: &str) -> (&str, &str) {
    match credential.split_once(' ') {
        Some((scheme, payload)) => (scheme, payload.trim()),
        None => (credential, ""),
    }
}

/// Decode a transport-encoded signed event
pub fn decode_event(credential: &str) -> Result<SignedEvent> {
    let credential = credential.trim();
    if credential.is_empty() {
        return Err(KeygateError::MalformedCredential("empty credential".to_string()));
    }

    let (scheme, payload) = split_scheme(credential);
    if scheme != NOSTR_SCHEME {
        return Err(KeygateError::MalformedCredential(format!(
            "expected '{}' scheme",
            NOSTR_SCHEME
        )));
    }

    if payload.is_empty() {
        return Err(KeygateError::MalformedCredential("empty payload".to_string()));
    }

    let json = STANDARD
        .decode(payload)
        .map_err(|e| KeygateError::MalformedCredential(format!("invalid base64: {}", e)))?;

    serde_json::from_slice(&json)
        .map_err(|e| KeygateError::MalformedCredential(format!("invalid event: {}", e)))
}
