//! Provider bearer token verification
//!
//! Verifies RS256 ID tokens issued by an external identity provider
//! (Firebase-style: issuer `https://securetoken.google.com/<project>`,
//! audience `<project>`). Every rejection collapses into
//! `ProviderVerificationFailure`; the underlying reason is only logged.

use crate::{KeygateError, Result, SubjectId};
use jwt_simple::prelude::{RS256PublicKey, RSAPublicKeyLike, Token, VerificationOptions};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::debug;

/// Issuer prefix for Firebase-style ID tokens
pub const FIREBASE_ISSUER_PREFIX: &str = "https://securetoken.google.com/";

/// Subject and claims extracted from a verified token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedToken {
    pub subject: SubjectId,
    pub claims: BTreeMap<String, String>,
}

pub trait TokenVerifier: Send + Sync {
    fn verify(&self, token: &str) -> Result<VerifiedToken>;
}

/// Provider-specific claims read from the token body
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderClaims {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_verified: Option<bool>,
}

/// RS256 verifier over a set of provider signing keys, selected by `kid`
pub struct ProviderTokenVerifier {
    keys: HashMap<String, RS256PublicKey>,
    options: VerificationOptions,
}

impl ProviderTokenVerifier {
    /// Verifier accepting tokens from `issuer` addressed to `audience`
    pub fn new(issuer: impl Into<String>, audience: impl Into<String>) -> Self {
        let options = VerificationOptions {
            allowed_issuers: Some(HashSet::from([issuer.into()])),
            allowed_audiences: Some(HashSet::from([audience.into()])),
            ..Default::default()
        };

        ProviderTokenVerifier {
            keys: HashMap::new(),
            options,
        }
    }

    /// Verifier for a Firebase project
    pub fn firebase(project_id: &str) -> Self {
        Self::new(format!("{}{}", FIREBASE_ISSUER_PREFIX, project_id), project_id)
    }

    /// Register a signing key under its key id
    pub fn add_key(&mut self, kid: impl Into<String>, key: RS256PublicKey) {
        self.keys.insert(kid.into(), key);
    }

    /// Register a PEM-encoded RSA public key
    pub fn add_pem_key(&mut self, kid: impl Into<String>, pem: &str) -> Result<()> {
        let kid = kid.into();
        let key = RS256PublicKey::from_pem(pem)
            .map_err(|e| KeygateError::Internal(format!("invalid key '{}': {}", kid, e)))?;
        self.add_key(kid, key);
        Ok(())
    }

    /// Register every key of a JSON object mapping key id to PEM
    pub fn add_pem_keys_json(&mut self, json: &str) -> Result<usize> {
        let entries: BTreeMap<String, String> = serde_json::from_str(json)?;
        let count = entries.len();
        for (kid, pem) in entries {
            self.add_pem_key(kid, &pem)?;
        }
        Ok(count)
    }

    pub fn key_count(&self) -> usize {
        self.keys.len()
    }

    fn verify_inner(&self, token: &str) -> std::result::Result<VerifiedToken, String> {
        let metadata = Token::decode_metadata(token).map_err(|e| e.to_string())?;
        let kid = metadata.key_id().ok_or("token has no key id")?;
        let key = self
            .keys
            .get(kid)
            .ok_or_else(|| format!("unknown key id '{}'", kid))?;

        let claims = key
            .verify_token::<ProviderClaims>(token, Some(self.options.clone()))
            .map_err(|e| e.to_string())?;

        let subject = claims.subject.as_deref().ok_or("token has no subject")?;
        let subject = SubjectId::new(subject).map_err(|e| e.to_string())?;

        let mut extracted = BTreeMap::new();
        if let Some(email) = claims.custom.email {
            extracted.insert("email".to_string(), email);
        }
        if let Some(verified) = claims.custom.email_verified {
            extracted.insert("email_verified".to_string(), verified.to_string());
        }

        Ok(VerifiedToken {
            subject,
            claims: extracted,
        })
    }
}

impl TokenVerifier for ProviderTokenVerifier {
    fn verify(&self, token: &str) -> Result<VerifiedToken> {
        self.verify_inner(token).map_err(|reason| {
            debug!(%reason, "provider token rejected");
            KeygateError::ProviderVerificationFailure
        })
    }
}

impl std::fmt::Debug for ProviderTokenVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut kids: Vec<&String> = self.keys.keys().collect();
        kids.sort();
        f.debug_struct("ProviderTokenVerifier")
            .field("key_ids", &kids)
            .field("allowed_issuers", &self.options.allowed_issuers)
            .finish_non_exhaustive()
    }
}
