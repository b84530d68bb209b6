//! Test fixtures for keygate: event signing, token minting, and an
//! in-memory link store.

use crate::auth::canonical::NOSTR_SCHEME;
use crate::auth::jwt::{ProviderClaims, ProviderTokenVerifier, TokenVerifier, VerifiedToken};
use crate::auth::protocol::HTTP_AUTH_KIND;
use crate::{
    IdentityLink, IdentityLinkStore, KeygateError, PubKey, Result, SignedEvent, SubjectId,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::Utc;
use jwt_simple::prelude::{Claims, Clock, Duration, RS256KeyPair, RSAKeyPairLike};
use secp256k1::{Keypair, Message, Secp256k1, SecretKey};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// URL used by the end-to-end examples
pub const TEST_URL: &str = "https://api.example.com/v1/tracks/my";

/// Provider project the fixture tokens are issued for
pub const TEST_PROJECT: &str = "keygate-test";

/// Key id the fixture provider key is published under
pub const TEST_KID: &str = "test-key";

pub const PROVIDER_PRIVATE_PEM: &str = include_str!("../testdata/provider_rs256.pem");
pub const PROVIDER_PUBLIC_PEM: &str = include_str!("../testdata/provider_rs256.pub.pem");
pub const ROGUE_PRIVATE_PEM: &str = include_str!("../testdata/rogue_rs256.pem");

/// Holds a secp256k1 key and signs protocol events with it
pub struct EventSigner {
    keypair: Keypair,
    secp: Secp256k1<secp256k1::All>,
}

impl EventSigner {
    /// Deterministic key derived from a one-byte seed (1..=127)
    pub fn from_seed(seed: u8) -> Self {
        let secp = Secp256k1::new();
        let secret = SecretKey::from_slice(&[seed; 32]).expect("seed yields a valid secret key");
        let keypair = Keypair::from_secret_key(&secp, &secret);
        EventSigner { keypair, secp }
    }

    pub fn pubkey(&self) -> PubKey {
        let (xonly, _parity) = self.keypair.x_only_public_key();
        PubKey::new(&hex::encode(xonly.serialize())).expect("x-only key is 32 bytes")
    }

    /// Hex signature over a hex event id
    pub fn sign_id(&self, event_id: &str) -> String {
        let digest: [u8; 32] = hex::decode(event_id)
            .expect("event id is hex")
            .try_into()
            .expect("event id is 32 bytes");
        let sig = self
            .secp
            .sign_schnorr_no_aux_rand(&Message::from_digest(digest), &self.keypair);
        hex::encode(sig.serialize())
    }

    /// `u` and `method` tags binding an event to a request
    pub fn binding_tags(method: &str, url: &str) -> Vec<Vec<String>> {
        vec![
            vec!["u".to_string(), url.to_string()],
            vec!["method".to_string(), method.to_string()],
        ]
    }

    /// Build an event with a correct id and signature
    pub fn sign_event(&self, kind: u32, created_at: i64, tags: Vec<Vec<String>>, content: &str) -> SignedEvent {
        let mut event = SignedEvent {
            id: String::new(),
            pubkey: self.pubkey().as_str().to_string(),
            created_at,
            kind,
            tags,
            content: content.to_string(),
            sig: String::new(),
        };
        event.id = event.compute_id().expect("event serializes");
        event.sig = self.sign_id(&event.id);
        event
    }

    /// Transport form of an event
    pub fn encode(event: &SignedEvent) -> String {
        let json = serde_json::to_vec(event).expect("event serializes");
        format!("{} {}", NOSTR_SCHEME, STANDARD.encode(json))
    }

    /// Valid HTTP-auth credential for `method url` created at `created_at`
    pub fn credential(&self, method: &str, url: &str, created_at: i64) -> String {
        let event = self.sign_event(HTTP_AUTH_KIND, created_at, Self::binding_tags(method, url), "");
        Self::encode(&event)
    }

    /// Valid credential stamped with the current time
    pub fn credential_now(&self, method: &str, url: &str) -> String {
        self.credential(method, url, crate::unix_now())
    }
}

/// Provider verifier trusting the fixture provider key
pub fn provider_verifier() -> ProviderTokenVerifier {
    let mut verifier = ProviderTokenVerifier::firebase(TEST_PROJECT);
    verifier
        .add_pem_key(TEST_KID, PROVIDER_PUBLIC_PEM)
        .expect("fixture public key parses");
    verifier
}

/// Mints RS256 ID tokens with adjustable defects
#[derive(Debug, Clone)]
pub struct TokenMinter {
    key_pem: &'static str,
    kid: String,
    issuer: String,
    audience: String,
    include_subject: bool,
    expired: bool,
}

impl TokenMinter {
    /// Tokens signed by the trusted fixture key
    pub fn provider() -> Self {
        TokenMinter {
            key_pem: PROVIDER_PRIVATE_PEM,
            kid: TEST_KID.to_string(),
            issuer: format!("{}{}", crate::auth::jwt::FIREBASE_ISSUER_PREFIX, TEST_PROJECT),
            audience: TEST_PROJECT.to_string(),
            include_subject: true,
            expired: false,
        }
    }

    /// Tokens claiming the trusted key id but signed by another key
    pub fn rogue() -> Self {
        TokenMinter {
            key_pem: ROGUE_PRIVATE_PEM,
            ..Self::provider()
        }
    }

    pub fn with_issuer(&self, issuer: &str) -> Self {
        TokenMinter { issuer: issuer.to_string(), ..self.clone() }
    }

    pub fn with_audience(&self, audience: &str) -> Self {
        TokenMinter { audience: audience.to_string(), ..self.clone() }
    }

    pub fn with_kid(&self, kid: &str) -> Self {
        TokenMinter { kid: kid.to_string(), ..self.clone() }
    }

    pub fn without_subject(&self) -> Self {
        TokenMinter { include_subject: false, ..self.clone() }
    }

    pub fn expired(&self) -> Self {
        TokenMinter { expired: true, ..self.clone() }
    }

    pub fn mint(&self, subject: &str, email: Option<&str>) -> String {
        let key = RS256KeyPair::from_pem(self.key_pem)
            .expect("fixture private key parses")
            .with_key_id(&self.kid);

        let custom = ProviderClaims {
            email: email.map(str::to_string),
            email_verified: email.map(|_| true),
        };

        let mut claims = Claims::with_custom_claims(custom, Duration::from_hours(1))
            .with_issuer(&self.issuer)
            .with_audience(&self.audience);

        if self.include_subject {
            claims = claims.with_subject(subject);
        }

        if self.expired {
            let now = Clock::now_since_epoch();
            claims.issued_at = Some(now - Duration::from_hours(3));
            claims.invalid_before = claims.issued_at;
            claims.expires_at = Some(now - Duration::from_hours(2));
        }

        key.sign(claims).expect("fixture token signs")
    }
}

/// Token verifier backed by a fixed token → subject table
#[derive(Debug, Default)]
pub struct StaticTokenVerifier {
    tokens: HashMap<String, (SubjectId, BTreeMap<String, String>)>,
}

impl StaticTokenVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(mut self, token: &str, subject: &str) -> Self {
        let subject = SubjectId::new(subject).expect("valid subject");
        self.tokens.insert(token.to_string(), (subject, BTreeMap::new()));
        self
    }
}

impl TokenVerifier for StaticTokenVerifier {
    fn verify(&self, token: &str) -> Result<VerifiedToken> {
        self.tokens
            .get(token)
            .map(|(subject, claims)| VerifiedToken {
                subject: subject.clone(),
                claims: claims.clone(),
            })
            .ok_or(KeygateError::ProviderVerificationFailure)
    }
}

/// Mutex-guarded link store with the same semantics as the persistent one
#[derive(Debug, Default)]
pub struct MemoryLinkStore {
    links: Mutex<HashMap<PubKey, IdentityLink>>,
    touches: AtomicUsize,
    fail_touch: bool,
}

impl MemoryLinkStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store whose `touch` always fails
    pub fn failing_touch() -> Self {
        MemoryLinkStore {
            fail_touch: true,
            ..Self::default()
        }
    }

    pub fn get(&self, pubkey: &PubKey) -> Option<IdentityLink> {
        self.links.lock().expect("store lock").get(pubkey).cloned()
    }

    pub fn touch_count(&self) -> usize {
        self.touches.load(Ordering::SeqCst)
    }
}

impl IdentityLinkStore for MemoryLinkStore {
    fn link(&self, pubkey: &PubKey, subject: &SubjectId) -> Result<IdentityLink> {
        let mut links = self.links.lock().expect("store lock");
        let now = Utc::now();

        match links.get_mut(pubkey) {
            None => {
                let link = IdentityLink::new(pubkey.clone(), subject.clone(), now);
                links.insert(pubkey.clone(), link.clone());
                Ok(link)
            }
            Some(link) if link.active && &link.subject_id == subject => Ok(link.clone()),
            Some(link) if link.active => Err(KeygateError::LinkConflict),
            Some(link) => {
                link.active = true;
                link.subject_id = subject.clone();
                link.linked_at = now;
                Ok(link.clone())
            }
        }
    }

    fn unlink(&self, pubkey: &PubKey, subject: &SubjectId) -> Result<IdentityLink> {
        let mut links = self.links.lock().expect("store lock");
        let link = links.get_mut(pubkey).ok_or(KeygateError::UnknownPrincipal)?;

        if &link.subject_id != subject {
            return Err(KeygateError::NotOwner);
        }
        if !link.active {
            return Err(KeygateError::AlreadyUnlinked);
        }

        link.active = false;
        Ok(link.clone())
    }

    fn resolve(&self, pubkey: &PubKey) -> Result<SubjectId> {
        let links = self.links.lock().expect("store lock");
        match links.get(pubkey) {
            None => Err(KeygateError::UnknownPrincipal),
            Some(link) if !link.active => Err(KeygateError::InactiveAccount),
            Some(link) => Ok(link.subject_id.clone()),
        }
    }

    fn list_active(&self, subject: &SubjectId) -> Result<Vec<IdentityLink>> {
        let links = self.links.lock().expect("store lock");
        let mut active: Vec<IdentityLink> = links
            .values()
            .filter(|link| link.active && &link.subject_id == subject)
            .cloned()
            .collect();
        active.sort_by(|a, b| a.pubkey.cmp(&b.pubkey));
        Ok(active)
    }

    fn touch(&self, pubkey: &PubKey) -> Result<()> {
        self.touches.fetch_add(1, Ordering::SeqCst);
        if self.fail_touch {
            return Err(KeygateError::Storage("touch disabled".to_string()));
        }

        let mut links = self.links.lock().expect("store lock");
        let link = links.get_mut(pubkey).ok_or(KeygateError::UnknownPrincipal)?;
        link.last_used_at = Some(Utc::now());
        Ok(())
    }
}
