//! Signature verification for protocol credentials
//!
//! Events are signed with BIP-340 Schnorr signatures over secp256k1. The
//! signed message is the 32-byte event id.

use crate::{KeygateError, Result};
use secp256k1::{schnorr, Message, Secp256k1, VerifyOnly, XOnlyPublicKey};

/// Verifies `sig` by `pubkey` over `event_id` (all hex-encoded)
pub trait SignatureVerifier: Send + Sync {
    fn verify(&self, event_id: &str, pubkey: &str, sig: &str) -> Result<bool>;
}

/// secp256k1 Schnorr verifier
pub struct SchnorrVerifier {
    secp: Secp256k1<VerifyOnly>,
}

impl SchnorrVerifier {
    pub fn new() -> Self {
        SchnorrVerifier {
            secp: Secp256k1::verification_only(),
        }
    }
}

impl Default for SchnorrVerifier {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SchnorrVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchnorrVerifier").finish_non_exhaustive()
    }
}

impl SignatureVerifier for SchnorrVerifier {
    fn verify(&self, event_id: &str, pubkey: &str, sig: &str) -> Result<bool> {
        let digest: [u8; 32] = decode_fixed(event_id, "event id")?;
        let key_bytes: [u8; 32] = decode_fixed(pubkey, "public key")?;
        let sig_bytes: [u8; 64] = decode_fixed(sig, "signature")?;

        let public_key = XOnlyPublicKey::from_slice(&key_bytes)
            .map_err(|e| KeygateError::InvalidPubKey(e.to_string()))?;
        let signature = schnorr::Signature::from_slice(&sig_bytes)
            .map_err(|e| KeygateError::MalformedCredential(format!("invalid signature: {}", e)))?;
        let message = Message::from_digest(digest);

        Ok(self
            .secp
            .verify_schnorr(&signature, &message, &public_key)
            .is_ok())
    }
}

fn decode_fixed<const N: usize>(input: &str, what: &str) -> Result<[u8; N]> {
    let bytes = hex::decode(input)
        .map_err(|e| KeygateError::MalformedCredential(format!("invalid {} hex: {}", what, e)))?;

    bytes.try_into().map_err(|bytes: Vec<u8>| {
        KeygateError::MalformedCredential(format!(
            "{} must be {} bytes, got {}",
            what,
            N,
            bytes.len()
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::EventSigner;

    #[test]
    fn test_valid_signature_verifies() {
        let signer = EventSigner::from_seed(7);
        let id = "11".repeat(32);
        let sig = signer.sign_id(&id);

        let verifier = SchnorrVerifier::new();
        assert!(verifier.verify(&id, signer.pubkey().as_str(), &sig).unwrap());
    }

    #[test]
    fn test_signature_by_other_key_is_rejected() {
        let signer = EventSigner::from_seed(7);
        let other = EventSigner::from_seed(8);
        let id = "22".repeat(32);
        let sig = other.sign_id(&id);

        let verifier = SchnorrVerifier::new();
        assert!(!verifier.verify(&id, signer.pubkey().as_str(), &sig).unwrap());
    }

    #[test]
    fn test_signature_over_other_id_is_rejected() {
        let signer = EventSigner::from_seed(7);
        let sig = signer.sign_id(&"33".repeat(32));

        let verifier = SchnorrVerifier::new();
        assert!(!verifier
            .verify(&"34".repeat(32), signer.pubkey().as_str(), &sig)
            .unwrap());
    }

    #[test]
    fn test_malformed_inputs_error() {
        let signer = EventSigner::from_seed(7);
        let id = "44".repeat(32);
        let sig = signer.sign_id(&id);
        let verifier = SchnorrVerifier::new();

        assert!(verifier.verify("zz", signer.pubkey().as_str(), &sig).is_err());
        assert!(verifier.verify(&id[..62], signer.pubkey().as_str(), &sig).is_err());
        assert!(verifier.verify(&id, "abcd", &sig).is_err());
        assert!(verifier.verify(&id, signer.pubkey().as_str(), &sig[..100]).is_err());
    }
}
