//! Protocol credential validation
//!
//! Checks run in a fixed order and the first failure wins:
//! decode, kind, timestamp window, URL and method binding, then signature.
//! The validator holds no mutable state; replay is bounded by the
//! timestamp window alone.

use crate::auth::canonical::decode_event;
use crate::auth::keys::SignatureVerifier;
use crate::auth::timing::constant_time_str_compare;
use crate::{unix_now, KeygateError, PubKey, Result, SignedEvent};
use std::sync::Arc;
use tracing::debug;

/// Event kind reserved for HTTP authentication
pub const HTTP_AUTH_KIND: u32 = 27235;

/// Default tolerance, in seconds, either side of the server clock
pub const DEFAULT_MAX_SKEW_SECS: i64 = 60;

/// The request an event must be bound to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestTarget {
    /// HTTP method exactly as received
    pub method: String,
    /// Absolute URL: scheme, host, path and query
    pub url: String,
}

impl RequestTarget {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        RequestTarget {
            method: method.into(),
            url: url.into(),
        }
    }
}

pub struct ProtocolValidator {
    verifier: Arc<dyn SignatureVerifier>,
    kind: u32,
    max_skew_secs: i64,
}

impl ProtocolValidator {
    pub fn new(verifier: Arc<dyn SignatureVerifier>) -> Self {
        ProtocolValidator {
            verifier,
            kind: HTTP_AUTH_KIND,
            max_skew_secs: DEFAULT_MAX_SKEW_SECS,
        }
    }

    /// Override the timestamp tolerance
    pub fn with_max_skew(mut self, secs: i64) -> Self {
        self.max_skew_secs = secs;
        self
    }

    pub fn max_skew_secs(&self) -> i64 {
        self.max_skew_secs
    }

    /// Validate a transport credential against the current clock
    pub fn validate(&self, credential: &str, target: &RequestTarget) -> Result<PubKey> {
        self.validate_at(credential, target, unix_now())
    }

    /// Validate a transport credential against an explicit clock reading
    pub fn validate_at(&self, credential: &str, target: &RequestTarget, now: i64) -> Result<PubKey> {
        let event = decode_event(credential)?;
        self.validate_event(&event, target, now)
    }

    /// Run the checks on an already decoded event
    pub fn validate_event(&self, event: &SignedEvent, target: &RequestTarget, now: i64) -> Result<PubKey> {
        self.check_kind(event)?;
        self.check_timestamp(event, now)?;
        self.check_binding(event, target)?;
        self.check_signature(event)
    }

    fn check_kind(&self, event: &SignedEvent) -> Result<()> {
        if event.kind != self.kind {
            debug!(kind = event.kind, "rejecting event with unexpected kind");
            return Err(KeygateError::ProtocolViolation("unexpected kind".to_string()));
        }
        Ok(())
    }

    fn check_timestamp(&self, event: &SignedEvent, now: i64) -> Result<()> {
        let age = now.saturating_sub(event.created_at);
        let lead = event.created_at.saturating_sub(now);

        if age > self.max_skew_secs || lead > self.max_skew_secs {
            debug!(created_at = event.created_at, now, "event outside timestamp window");
            return Err(KeygateError::ExpiredOrFutureTimestamp {
                created_at: event.created_at,
                now,
            });
        }
        Ok(())
    }

    fn check_binding(&self, event: &SignedEvent, target: &RequestTarget) -> Result<()> {
        if event.tag_value("u") != Some(target.url.as_str()) {
            debug!(url = %target.url, "signed URL does not match request");
            return Err(KeygateError::UrlMismatch);
        }

        if event.tag_value("method") != Some(target.method.as_str()) {
            debug!(method = %target.method, "signed method does not match request");
            return Err(KeygateError::MethodMismatch);
        }
        Ok(())
    }

    fn check_signature(&self, event: &SignedEvent) -> Result<PubKey> {
        // Lowercase hex only; anything else is malformed, not a bad signature.
        let pubkey = PubKey::new(&event.pubkey)?;

        let computed = event
            .compute_id()
            .map_err(|_| KeygateError::InvalidSignature)?;

        if !constant_time_str_compare(&computed, &event.id) {
            debug!("event id does not match its content");
            return Err(KeygateError::InvalidSignature);
        }

        match self.verifier.verify(&event.id, &event.pubkey, &event.sig) {
            Ok(true) => {}
            Ok(false) => return Err(KeygateError::InvalidSignature),
            Err(e) => {
                debug!(error = %e, "signature verifier rejected input");
                return Err(KeygateError::InvalidSignature);
            }
        }

        Ok(pubkey)
    }
}

impl std::fmt::Debug for ProtocolValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolValidator")
            .field("kind", &self.kind)
            .field("max_skew_secs", &self.max_skew_secs)
            .finish_non_exhaustive()
    }
}
