//! Core data types for keygate

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Hex-encoded x-only secp256k1 public key (32 bytes, lowercase)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PubKey(String);

impl PubKey {
    /// Create a new public key with validation
    pub fn new(hex_key: &str) -> crate::Result<Self> {
        if hex_key.len() != 64 {
            return Err(crate::KeygateError::InvalidPubKey(format!(
                "expected 64 hex characters, got {}",
                hex_key.len()
            )));
        }

        if !hex_key.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
            return Err(crate::KeygateError::InvalidPubKey(
                "expected lowercase hex".to_string(),
            ));
        }

        Ok(PubKey(hex_key.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for PubKey {
    type Error = crate::KeygateError;

    fn try_from(value: String) -> crate::Result<Self> {
        PubKey::new(&value)
    }
}

impl From<PubKey> for String {
    fn from(key: PubKey) -> Self {
        key.0
    }
}

impl std::fmt::Display for PubKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Provider-issued account identifier (the token `sub` claim)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SubjectId(String);

impl SubjectId {
    pub fn new(subject: &str) -> crate::Result<Self> {
        if subject.is_empty() {
            return Err(crate::KeygateError::InvalidSubjectId("empty subject".to_string()));
        }

        // NUL separates subject and pubkey in the subject index
        if subject.chars().any(|c| c.is_control()) {
            return Err(crate::KeygateError::InvalidSubjectId(
                "control characters not allowed".to_string(),
            ));
        }

        Ok(SubjectId(subject.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for SubjectId {
    type Error = crate::KeygateError;

    fn try_from(value: String) -> crate::Result<Self> {
        SubjectId::new(&value)
    }
}

impl From<SubjectId> for String {
    fn from(subject: SubjectId) -> Self {
        subject.0
    }
}

impl std::fmt::Display for SubjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A self-signed event as carried in the protocol credential
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedEvent {
    pub id: String,
    pub pubkey: String,
    pub created_at: i64,
    pub kind: u32,
    #[serde(default)]
    pub tags: Vec<Vec<String>>,
    #[serde(default)]
    pub content: String,
    pub sig: String,
}

impl SignedEvent {
    /// First value of the first tag named `name`
    pub fn tag_value(&self, name: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|tag| tag.first().map(String::as_str) == Some(name))
            .and_then(|tag| tag.get(1))
            .map(String::as_str)
    }

    /// Serialization the event id commits to: `[0,pubkey,created_at,kind,tags,content]`
    pub fn canonical_serialization(&self) -> crate::Result<String> {
        let canonical = serde_json::json!([
            0,
            self.pubkey,
            self.created_at,
            self.kind,
            self.tags,
            self.content,
        ]);
        Ok(serde_json::to_string(&canonical)?)
    }

    /// Lowercase hex SHA-256 of the canonical serialization
    pub fn compute_id(&self) -> crate::Result<String> {
        let canonical = self.canonical_serialization()?;
        Ok(hex::encode(Sha256::digest(canonical.as_bytes())))
    }
}

/// Persistent binding between a public key and a provider account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityLink {
    pub pubkey: PubKey,
    pub subject_id: SubjectId,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub linked_at: DateTime<Utc>,
    #[serde(default)]
    pub last_used_at: Option<DateTime<Utc>>,
}

impl IdentityLink {
    /// Fresh active link, as written on first successful link
    pub fn new(pubkey: PubKey, subject_id: SubjectId, now: DateTime<Utc>) -> Self {
        IdentityLink {
            pubkey,
            subject_id,
            active: true,
            created_at: now,
            linked_at: now,
            last_used_at: None,
        }
    }
}

/// How a principal was authenticated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    TokenOnly,
    ProtocolOnly,
}

impl std::fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthMethod::TokenOnly => write!(f, "token"),
            AuthMethod::ProtocolOnly => write!(f, "protocol"),
        }
    }
}

/// Request-scoped authenticated identity, never persisted
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Principal {
    pub subject_id: SubjectId,
    pub method: AuthMethod,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pubkey: Option<PubKey>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub claims: BTreeMap<String, String>,
}

/// Result of authenticating one request
pub type AuthOutcome = std::result::Result<Principal, crate::KeygateError>;

/// Composition rule for the two credential mechanisms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Policy {
    /// Bearer token only
    TokenOnly,
    /// Signed event only, resolved through the link store
    ProtocolOnly,
    /// Both credentials, bound to the same account
    Dual,
    /// Token first, signed event as fallback
    Flexible,
}

/// Current time as unix seconds
pub fn unix_now() -> i64 {
    Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;

    const PK: &str = "79be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798";

    #[test]
    fn test_pubkey_validation() {
        assert!(PubKey::new(PK).is_ok());
        assert!(PubKey::new("").is_err());
        assert!(PubKey::new(&PK[..63]).is_err());
        assert!(PubKey::new(&PK.to_uppercase()).is_err());
        assert!(PubKey::new(&format!("{}g", &PK[..63])).is_err());
    }

    #[test]
    fn test_subject_validation() {
        assert!(SubjectId::new("firebase-uid-123").is_ok());
        assert!(SubjectId::new("").is_err());
        assert!(SubjectId::new("a\0b").is_err());
    }

    #[test]
    fn test_tag_value_takes_first_match() {
        let event = SignedEvent {
            id: String::new(),
            pubkey: PK.to_string(),
            created_at: 0,
            kind: 27235,
            tags: vec![
                vec!["method".to_string()],
                vec!["u".to_string(), "https://a.example/x".to_string()],
                vec!["u".to_string(), "https://b.example/y".to_string()],
            ],
            content: String::new(),
            sig: String::new(),
        };

        assert_eq!(event.tag_value("u"), Some("https://a.example/x"));
        assert_eq!(event.tag_value("method"), None);
        assert_eq!(event.tag_value("payload"), None);
    }

    #[test]
    fn test_canonical_serialization_format() {
        let event = SignedEvent {
            id: String::new(),
            pubkey: PK.to_string(),
            created_at: 1_700_000_000,
            kind: 27235,
            tags: vec![vec!["method".to_string(), "GET".to_string()]],
            content: "line\nbreak".to_string(),
            sig: String::new(),
        };

        let canonical = event.canonical_serialization().unwrap();
        assert_eq!(
            canonical,
            format!(r#"[0,"{}",1700000000,27235,[["method","GET"]],"line\nbreak"]"#, PK)
        );

        let id = event.compute_id().unwrap();
        assert_eq!(id.len(), 64);
        assert_eq!(id, event.compute_id().unwrap());
    }

    #[test]
    fn test_principal_serialization_skips_empty_fields() {
        let principal = Principal {
            subject_id: SubjectId::new("s1").unwrap(),
            method: AuthMethod::TokenOnly,
            pubkey: None,
            claims: BTreeMap::new(),
        };

        let json = serde_json::to_value(&principal).unwrap();
        assert_eq!(json, serde_json::json!({"subject_id": "s1", "method": "token_only"}));
    }
}
