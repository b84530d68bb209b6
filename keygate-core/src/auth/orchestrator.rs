//! Policy-driven composition of the two credential mechanisms
//!
//! Precedence when both mechanisms are consulted:
//! - `Dual` reports the token failure first, then the protocol failure.
//! - `Flexible` reports the protocol failure when both fail.

use crate::auth::canonical::{split_scheme, NOSTR_SCHEME};
use crate::auth::jwt::TokenVerifier;
use crate::auth::protocol::{ProtocolValidator, RequestTarget};
use crate::auth::timing::constant_time_str_compare;
use crate::auth::usage::UsageRecorder;
use crate::{
    AuthMethod, AuthOutcome, IdentityLinkStore, KeygateError, Policy, Principal, PubKey, Result,
    SubjectId,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Authorization scheme of the token credential
pub const BEARER_SCHEME: &str = "Bearer";

/// Credential-bearing parts of an inbound request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthRequest {
    pub method: String,
    /// Absolute URL after forwarded-scheme resolution
    pub url: String,
    /// `Authorization`
    pub authorization: Option<String>,
    /// `X-Firebase-Token`
    pub firebase_token: Option<String>,
    /// `X-Nostr-Authorization`
    pub nostr_authorization: Option<String>,
}

impl AuthRequest {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        AuthRequest {
            method: method.into(),
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn with_authorization(mut self, value: impl Into<String>) -> Self {
        self.authorization = Some(value.into());
        self
    }

    pub fn with_firebase_token(mut self, value: impl Into<String>) -> Self {
        self.firebase_token = Some(value.into());
        self
    }

    pub fn with_nostr_authorization(mut self, value: impl Into<String>) -> Self {
        self.nostr_authorization = Some(value.into());
        self
    }

    /// Bearer token from `Authorization`, else from `X-Firebase-Token`
    pub fn bearer_token(&self) -> Option<&str> {
        let primary = self.authorization.as_deref().and_then(|value| {
            let (scheme, token) = split_scheme(value.trim());
            (scheme == BEARER_SCHEME && !token.is_empty()).then_some(token)
        });

        primary.or_else(|| {
            self.firebase_token
                .as_deref()
                .map(str::trim)
                .filter(|token| !token.is_empty())
        })
    }

    /// Protocol credential from `Authorization` when it carries the `Nostr`
    /// scheme, else from `X-Nostr-Authorization`
    pub fn protocol_credential(&self) -> Option<&str> {
        let primary = self
            .authorization
            .as_deref()
            .filter(|value| split_scheme(value.trim()).0 == NOSTR_SCHEME);

        primary.or_else(|| {
            self.nostr_authorization
                .as_deref()
                .filter(|value| !value.trim().is_empty())
        })
    }

    pub fn target(&self) -> RequestTarget {
        RequestTarget::new(self.method.clone(), self.url.clone())
    }
}

/// Proof that one request controls both a provider account and a key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkProof {
    pub subject: SubjectId,
    pub pubkey: PubKey,
    pub claims: BTreeMap<String, String>,
}

pub struct Authenticator {
    tokens: Arc<dyn TokenVerifier>,
    protocol: Arc<ProtocolValidator>,
    links: Arc<dyn IdentityLinkStore>,
    usage: Option<UsageRecorder>,
}

impl Authenticator {
    pub fn new(
        tokens: Arc<dyn TokenVerifier>,
        protocol: Arc<ProtocolValidator>,
        links: Arc<dyn IdentityLinkStore>,
    ) -> Self {
        Authenticator {
            tokens,
            protocol,
            links,
            usage: None,
        }
    }

    /// Schedule usage updates after protocol-authenticated requests
    pub fn with_usage_recorder(mut self, recorder: UsageRecorder) -> Self {
        self.usage = Some(recorder);
        self
    }

    pub fn links(&self) -> &Arc<dyn IdentityLinkStore> {
        &self.links
    }

    /// Authenticate `request` under `policy`
    pub fn authenticate(&self, policy: Policy, request: &AuthRequest) -> AuthOutcome {
        let outcome = match policy {
            Policy::TokenOnly => self.token_path(request),
            Policy::ProtocolOnly => self.protocol_path(request),
            Policy::Dual => self.dual(request),
            Policy::Flexible => self.flexible(request),
        };

        match &outcome {
            Ok(principal) => {
                debug!(?policy, subject = %principal.subject_id, method = %principal.method, "authenticated");
                if let (Some(pubkey), Some(usage)) = (&principal.pubkey, &self.usage) {
                    usage.record(pubkey.clone());
                }
            }
            Err(e) => debug!(?policy, kind = %e.kind(), error = %e, "authentication failed"),
        }

        outcome
    }

    /// Verify both credentials without consulting the link store.
    ///
    /// Used to establish or remove a link, where the key may not be linked
    /// yet. The token failure is reported first.
    pub fn verify_link_request(&self, request: &AuthRequest) -> Result<LinkProof> {
        let token = request
            .bearer_token()
            .ok_or_else(|| KeygateError::MissingCredential("no bearer token".to_string()))?;
        let verified = self.tokens.verify(token)?;
        let pubkey = self.verify_protocol(request)?;

        Ok(LinkProof {
            subject: verified.subject,
            pubkey,
            claims: verified.claims,
        })
    }

    fn token_path(&self, request: &AuthRequest) -> AuthOutcome {
        let token = request
            .bearer_token()
            .ok_or_else(|| KeygateError::MissingCredential("no bearer token".to_string()))?;
        let verified = self.tokens.verify(token)?;

        Ok(Principal {
            subject_id: verified.subject,
            method: AuthMethod::TokenOnly,
            pubkey: None,
            claims: verified.claims,
        })
    }

    fn verify_protocol(&self, request: &AuthRequest) -> Result<PubKey> {
        let credential = request
            .protocol_credential()
            .ok_or_else(|| KeygateError::MissingCredential("no signed event".to_string()))?;
        self.protocol.validate(credential, &request.target())
    }

    fn protocol_path(&self, request: &AuthRequest) -> AuthOutcome {
        let pubkey = self.verify_protocol(request)?;
        let subject = self.links.resolve(&pubkey)?;

        Ok(Principal {
            subject_id: subject,
            method: AuthMethod::ProtocolOnly,
            pubkey: Some(pubkey),
            claims: BTreeMap::new(),
        })
    }

    fn dual(&self, request: &AuthRequest) -> AuthOutcome {
        let token = self.token_path(request)?;
        let mut principal = self.protocol_path(request)?;

        if !constant_time_str_compare(token.subject_id.as_str(), principal.subject_id.as_str()) {
            return Err(KeygateError::PrincipalMismatch);
        }

        principal.claims = token.claims;
        Ok(principal)
    }

    fn flexible(&self, request: &AuthRequest) -> AuthOutcome {
        match self.token_path(request) {
            Ok(principal) => Ok(principal),
            Err(token_err) => {
                debug!(kind = %token_err.kind(), "token path failed, trying signed event");
                self.protocol_path(request)
            }
        }
    }
}

impl std::fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Authenticator")
            .field("protocol", &self.protocol)
            .field("usage", &self.usage)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::keys::SchnorrVerifier;
    use crate::test_utils::{EventSigner, MemoryLinkStore, StaticTokenVerifier, TEST_URL};
    use crate::ErrorKind;

    struct Fixture {
        auth: Authenticator,
        store: Arc<MemoryLinkStore>,
        signer: EventSigner,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryLinkStore::new());
        let tokens = StaticTokenVerifier::new()
            .with_token("tok-s1", "s1")
            .with_token("tok-s2", "s2");
        let protocol = ProtocolValidator::new(Arc::new(SchnorrVerifier::new()));
        let auth = Authenticator::new(Arc::new(tokens), Arc::new(protocol), store.clone());

        let signer = EventSigner::from_seed(11);
        store
            .link(&signer.pubkey(), &SubjectId::new("s1").unwrap())
            .unwrap();

        Fixture { auth, store, signer }
    }

    fn signed_request(signer: &EventSigner) -> AuthRequest {
        AuthRequest::new("GET", TEST_URL).with_authorization(signer.credential_now("GET", TEST_URL))
    }

    #[test]
    fn test_protocol_only_end_to_end() {
        let f = fixture();
        let principal = f
            .auth
            .authenticate(Policy::ProtocolOnly, &signed_request(&f.signer))
            .unwrap();

        assert_eq!(principal.subject_id.as_str(), "s1");
        assert_eq!(principal.method, AuthMethod::ProtocolOnly);
        assert_eq!(principal.pubkey, Some(f.signer.pubkey()));
    }

    #[test]
    fn test_protocol_only_alternate_header() {
        let f = fixture();
        let request = AuthRequest::new("GET", TEST_URL)
            .with_authorization("Basic dXNlcjpwYXNz")
            .with_nostr_authorization(f.signer.credential_now("GET", TEST_URL));

        let principal = f.auth.authenticate(Policy::ProtocolOnly, &request).unwrap();
        assert_eq!(principal.subject_id.as_str(), "s1");
    }

    #[test]
    fn test_protocol_only_unlinked_and_inactive() {
        let f = fixture();
        let stranger = EventSigner::from_seed(12);
        let err = f
            .auth
            .authenticate(Policy::ProtocolOnly, &signed_request(&stranger))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownPrincipal);

        f.store
            .unlink(&f.signer.pubkey(), &SubjectId::new("s1").unwrap())
            .unwrap();
        let err = f
            .auth
            .authenticate(Policy::ProtocolOnly, &signed_request(&f.signer))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InactiveAccount);
    }

    #[test]
    fn test_protocol_only_without_credential() {
        let f = fixture();
        let request = AuthRequest::new("GET", TEST_URL).with_authorization("Bearer tok-s1");

        let err = f.auth.authenticate(Policy::ProtocolOnly, &request).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingCredential);
    }

    #[test]
    fn test_token_only() {
        let f = fixture();

        let request = AuthRequest::new("GET", TEST_URL).with_authorization("Bearer tok-s2");
        let principal = f.auth.authenticate(Policy::TokenOnly, &request).unwrap();
        assert_eq!(principal.subject_id.as_str(), "s2");
        assert_eq!(principal.method, AuthMethod::TokenOnly);
        assert!(principal.pubkey.is_none());

        let request = AuthRequest::new("GET", TEST_URL).with_firebase_token("tok-s1");
        let principal = f.auth.authenticate(Policy::TokenOnly, &request).unwrap();
        assert_eq!(principal.subject_id.as_str(), "s1");

        let request = AuthRequest::new("GET", TEST_URL).with_authorization("Bearer nope");
        let err = f.auth.authenticate(Policy::TokenOnly, &request).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProviderVerificationFailure);

        let err = f
            .auth
            .authenticate(Policy::TokenOnly, &AuthRequest::new("GET", TEST_URL))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingCredential);
    }

    #[test]
    fn test_bearer_header_precedence() {
        let request = AuthRequest::new("GET", TEST_URL)
            .with_authorization("Bearer primary")
            .with_firebase_token("fallback");
        assert_eq!(request.bearer_token(), Some("primary"));

        let request = AuthRequest::new("GET", TEST_URL)
            .with_authorization("Nostr abc")
            .with_firebase_token("fallback");
        assert_eq!(request.bearer_token(), Some("fallback"));

        let request = AuthRequest::new("GET", TEST_URL)
            .with_authorization("Bearer ")
            .with_firebase_token("  ");
        assert_eq!(request.bearer_token(), None);
    }

    #[test]
    fn test_dual_reports_token_failure_first() {
        let f = fixture();
        let err = f
            .auth
            .authenticate(Policy::Dual, &signed_request(&f.signer))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingCredential);

        // Both broken: still the token's failure
        let request = AuthRequest::new("GET", TEST_URL)
            .with_firebase_token("bad")
            .with_nostr_authorization("Nostr !!!");
        let err = f.auth.authenticate(Policy::Dual, &request).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProviderVerificationFailure);
    }

    #[test]
    fn test_dual_success_and_mismatch() {
        let f = fixture();
        let request = AuthRequest::new("GET", TEST_URL)
            .with_authorization("Bearer tok-s1")
            .with_nostr_authorization(f.signer.credential_now("GET", TEST_URL));
        let principal = f.auth.authenticate(Policy::Dual, &request).unwrap();
        assert_eq!(principal.subject_id.as_str(), "s1");
        assert_eq!(principal.method, AuthMethod::ProtocolOnly);
        assert_eq!(principal.pubkey, Some(f.signer.pubkey()));

        let request = AuthRequest::new("GET", TEST_URL)
            .with_authorization("Bearer tok-s2")
            .with_nostr_authorization(f.signer.credential_now("GET", TEST_URL));
        let err = f.auth.authenticate(Policy::Dual, &request).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PrincipalMismatch);
    }

    #[test]
    fn test_flexible_prefers_token() {
        let f = fixture();
        let request = AuthRequest::new("GET", TEST_URL)
            .with_firebase_token("tok-s2")
            .with_nostr_authorization(f.signer.credential_now("GET", TEST_URL));

        let principal = f.auth.authenticate(Policy::Flexible, &request).unwrap();
        assert_eq!(principal.subject_id.as_str(), "s2");
        assert_eq!(principal.method, AuthMethod::TokenOnly);
    }

    #[test]
    fn test_flexible_falls_back_to_protocol() {
        let f = fixture();
        let request = AuthRequest::new("GET", TEST_URL)
            .with_firebase_token("invalid")
            .with_authorization(f.signer.credential_now("GET", TEST_URL));

        let principal = f.auth.authenticate(Policy::Flexible, &request).unwrap();
        assert_eq!(principal.subject_id.as_str(), "s1");
        assert_eq!(principal.method, AuthMethod::ProtocolOnly);
    }

    #[test]
    fn test_flexible_reports_protocol_failure() {
        let f = fixture();
        let request = AuthRequest::new("GET", TEST_URL)
            .with_firebase_token("invalid")
            .with_authorization(f.signer.credential_now("GET", "https://api.example.com/v1/other"));

        let err = f.auth.authenticate(Policy::Flexible, &request).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UrlMismatch);

        let err = f
            .auth
            .authenticate(Policy::Flexible, &AuthRequest::new("GET", TEST_URL).with_firebase_token("invalid"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingCredential);
    }

    #[test]
    fn test_verify_link_request_skips_resolve() {
        let f = fixture();
        let newcomer = EventSigner::from_seed(13);
        let request = AuthRequest::new("POST", TEST_URL)
            .with_authorization("Bearer tok-s2")
            .with_nostr_authorization(newcomer.credential_now("POST", TEST_URL));

        let proof = f.auth.verify_link_request(&request).unwrap();
        assert_eq!(proof.subject.as_str(), "s2");
        assert_eq!(proof.pubkey, newcomer.pubkey());

        let request = AuthRequest::new("POST", TEST_URL)
            .with_nostr_authorization(newcomer.credential_now("POST", TEST_URL));
        let err = f.auth.verify_link_request(&request).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingCredential);
    }

    #[tokio::test]
    async fn test_protocol_success_schedules_usage() {
        let store = Arc::new(MemoryLinkStore::new());
        let signer = EventSigner::from_seed(14);
        store.link(&signer.pubkey(), &SubjectId::new("s1").unwrap()).unwrap();

        let (recorder, _worker) = UsageRecorder::spawn(store.clone());
        let auth = Authenticator::new(
            Arc::new(StaticTokenVerifier::new().with_token("tok-s1", "s1")),
            Arc::new(ProtocolValidator::new(Arc::new(SchnorrVerifier::new()))),
            store.clone(),
        )
        .with_usage_recorder(recorder);

        let token_request = AuthRequest::new("GET", TEST_URL).with_authorization("Bearer tok-s1");
        auth.authenticate(Policy::TokenOnly, &token_request).unwrap();

        auth.authenticate(Policy::ProtocolOnly, &signed_request(&signer)).unwrap();

        for _ in 0..200 {
            if store.touch_count() > 0 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(store.touch_count(), 1);
        assert!(store.get(&signer.pubkey()).unwrap().last_used_at.is_some());
    }
}
