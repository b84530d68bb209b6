//! Error types for keygate
//!
//! Every failure carries a stable [`ErrorKind`]. Message text is for humans
//! and logs only; callers branch on the kind.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum KeygateError {
    #[error("missing credential: {0}")]
    MissingCredential(String),

    #[error("malformed credential: {0}")]
    MalformedCredential(String),

    #[error("invalid signature")]
    InvalidSignature,

    #[error("event timestamp {created_at} outside allowed window (now {now})")]
    ExpiredOrFutureTimestamp { created_at: i64, now: i64 },

    #[error("request URL does not match signed URL")]
    UrlMismatch,

    #[error("request method does not match signed method")]
    MethodMismatch,

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("token verification failed")]
    ProviderVerificationFailure,

    #[error("public key is not linked to any account")]
    UnknownPrincipal,

    #[error("public key link is inactive")]
    InactiveAccount,

    #[error("public key is already linked to another account")]
    LinkConflict,

    #[error("public key is not linked to this account")]
    NotOwner,

    #[error("public key is already unlinked")]
    AlreadyUnlinked,

    #[error("token subject does not match linked account")]
    PrincipalMismatch,

    #[error("invalid public key: {0}")]
    InvalidPubKey(String),

    #[error("invalid subject id: {0}")]
    InvalidSubjectId(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Stable classification of a [`KeygateError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    MissingCredential,
    MalformedCredential,
    InvalidSignature,
    ExpiredOrFutureTimestamp,
    UrlMismatch,
    MethodMismatch,
    ProtocolViolation,
    ProviderVerificationFailure,
    UnknownPrincipal,
    InactiveAccount,
    LinkConflict,
    NotOwner,
    AlreadyUnlinked,
    PrincipalMismatch,
    Storage,
    Internal,
}

impl KeygateError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            KeygateError::MissingCredential(_) => ErrorKind::MissingCredential,
            KeygateError::MalformedCredential(_) => ErrorKind::MalformedCredential,
            KeygateError::InvalidSignature => ErrorKind::InvalidSignature,
            KeygateError::ExpiredOrFutureTimestamp { .. } => ErrorKind::ExpiredOrFutureTimestamp,
            KeygateError::UrlMismatch => ErrorKind::UrlMismatch,
            KeygateError::MethodMismatch => ErrorKind::MethodMismatch,
            KeygateError::ProtocolViolation(_) => ErrorKind::ProtocolViolation,
            KeygateError::ProviderVerificationFailure => ErrorKind::ProviderVerificationFailure,
            KeygateError::UnknownPrincipal => ErrorKind::UnknownPrincipal,
            KeygateError::InactiveAccount => ErrorKind::InactiveAccount,
            KeygateError::LinkConflict => ErrorKind::LinkConflict,
            KeygateError::NotOwner => ErrorKind::NotOwner,
            KeygateError::AlreadyUnlinked => ErrorKind::AlreadyUnlinked,
            KeygateError::PrincipalMismatch => ErrorKind::PrincipalMismatch,
            // A pubkey that fails validation can only arrive inside a credential
            KeygateError::InvalidPubKey(_) => ErrorKind::MalformedCredential,
            KeygateError::InvalidSubjectId(_) => ErrorKind::ProviderVerificationFailure,
            KeygateError::Storage(_) | KeygateError::Io(_) => ErrorKind::Storage,
            KeygateError::Serialization(_) | KeygateError::Internal(_) => ErrorKind::Internal,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::MissingCredential => "missing_credential",
            ErrorKind::MalformedCredential => "malformed_credential",
            ErrorKind::InvalidSignature => "invalid_signature",
            ErrorKind::ExpiredOrFutureTimestamp => "expired_or_future_timestamp",
            ErrorKind::UrlMismatch => "url_mismatch",
            ErrorKind::MethodMismatch => "method_mismatch",
            ErrorKind::ProtocolViolation => "protocol_violation",
            ErrorKind::ProviderVerificationFailure => "provider_verification_failure",
            ErrorKind::UnknownPrincipal => "unknown_principal",
            ErrorKind::InactiveAccount => "inactive_account",
            ErrorKind::LinkConflict => "link_conflict",
            ErrorKind::NotOwner => "not_owner",
            ErrorKind::AlreadyUnlinked => "already_unlinked",
            ErrorKind::PrincipalMismatch => "principal_mismatch",
            ErrorKind::Storage => "storage",
            ErrorKind::Internal => "internal",
        };
        f.write_str(name)
    }
}
