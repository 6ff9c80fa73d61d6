//! Salts, message hashes and signature verification.
//!
//! `request_message_hash = base64(sha256(request_message ‖ request_message_salt))`.
//! IdPs sign the UTF-8 bytes of that hash string with an accessor key; nodes
//! sign the UTF-8 bytes of a check string with their node or master key.

use crate::models::KeyType;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use rand::RngCore;
use sha2::{Digest, Sha256};
use thiserror::Error;

const SALT_LEN: usize = 16;

#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("invalid public key: {0}")]
    InvalidKey(String),
    #[error("malformed signature: {0}")]
    MalformedSignature(String),
}

/// 32 random bytes, hex encoded.
pub fn generate_request_id() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

pub fn generate_salt() -> String {
    let mut bytes = [0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut bytes);
    BASE64.encode(bytes)
}

/// One-time challenge for key rotation.
pub fn generate_check_string() -> String {
    let mut bytes = [0u8; 24];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Per-field salt derived from the request's initial salt.
pub fn derive_salt(initial_salt: &str, request_id: &str, field: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(field.as_bytes());
    hasher.update(request_id.as_bytes());
    hasher.update(initial_salt.as_bytes());
    let digest = hasher.finalize();
    BASE64.encode(&digest[..SALT_LEN])
}

pub fn hash_message(message: &str, salt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(message.as_bytes());
    hasher.update(salt.as_bytes());
    BASE64.encode(hasher.finalize())
}

/// Checks detached signatures for one key algorithm.
pub trait Verifier: Send + Sync {
    /// `Ok(false)` for a well-formed signature that does not match.
    fn verify(&self, public_key: &str, message: &[u8], signature: &str)
        -> Result<bool, VerifyError>;

    fn validate_public_key(&self, public_key: &str) -> Result<(), VerifyError>;
}

/// RSA PKCS#1 v1.5 with SHA-256. Keys are PEM, SPKI or PKCS#1.
pub struct RsaSha256Verifier;

impl RsaSha256Verifier {
    fn parse_key(public_key: &str) -> Result<rsa::RsaPublicKey, VerifyError> {
        use rsa::pkcs1::DecodeRsaPublicKey;
        use rsa::pkcs8::DecodePublicKey;

        let pem = public_key.trim();
        rsa::RsaPublicKey::from_public_key_pem(pem)
            .or_else(|_| rsa::RsaPublicKey::from_pkcs1_pem(pem))
            .map_err(|e| VerifyError::InvalidKey(e.to_string()))
    }
}

impl Verifier for RsaSha256Verifier {
    fn verify(
        &self,
        public_key: &str,
        message: &[u8],
        signature: &str,
    ) -> Result<bool, VerifyError> {
        use rsa::signature::Verifier as _;

        let key = Self::parse_key(public_key)?;
        let raw = BASE64
            .decode(signature.trim())
            .map_err(|e| VerifyError::MalformedSignature(e.to_string()))?;
        let signature = rsa::pkcs1v15::Signature::try_from(raw.as_slice())
            .map_err(|e| VerifyError::MalformedSignature(e.to_string()))?;
        let verifying_key = rsa::pkcs1v15::VerifyingKey::<rsa::sha2::Sha256>::new(key);
        Ok(verifying_key.verify(message, &signature).is_ok())
    }

    fn validate_public_key(&self, public_key: &str) -> Result<(), VerifyError> {
        Self::parse_key(public_key).map(|_| ())
    }
}

/// Ed25519 over base64 of the raw 32-byte public key.
pub struct Ed25519Verifier;

impl Ed25519Verifier {
    fn parse_key(public_key: &str) -> Result<ed25519_dalek::VerifyingKey, VerifyError> {
        let bytes = BASE64
            .decode(public_key.trim())
            .map_err(|e| VerifyError::InvalidKey(e.to_string()))?;
        let array: [u8; 32] = bytes
            .try_into()
            .map_err(|_| VerifyError::InvalidKey("expected 32-byte Ed25519 public key".into()))?;
        ed25519_dalek::VerifyingKey::from_bytes(&array)
            .map_err(|e| VerifyError::InvalidKey(e.to_string()))
    }
}

impl Verifier for Ed25519Verifier {
    fn verify(
        &self,
        public_key: &str,
        message: &[u8],
        signature: &str,
    ) -> Result<bool, VerifyError> {
        let key = Self::parse_key(public_key)?;
        let raw = BASE64
            .decode(signature.trim())
            .map_err(|e| VerifyError::MalformedSignature(e.to_string()))?;
        let signature = ed25519_dalek::Signature::from_slice(&raw)
            .map_err(|e| VerifyError::MalformedSignature(e.to_string()))?;
        Ok(key.verify_strict(message, &signature).is_ok())
    }

    fn validate_public_key(&self, public_key: &str) -> Result<(), VerifyError> {
        Self::parse_key(public_key).map(|_| ())
    }
}

pub fn verifier_for(key_type: KeyType) -> &'static dyn Verifier {
    match key_type {
        KeyType::Rsa => &RsaSha256Verifier,
        KeyType::Ed25519 => &Ed25519Verifier,
    }
}

/// Verification that treats malformed input as a mismatch.
pub fn signature_matches(
    key_type: KeyType,
    public_key: &str,
    message: &[u8],
    signature: &str,
) -> bool {
    match verifier_for(key_type).verify(public_key, message, signature) {
        Ok(valid) => valid,
        Err(e) => {
            tracing::debug!(error = %e, "Signature check failed");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Signer, SigningKey};

    #[test]
    fn test_request_id_is_64_hex_chars() {
        let id = generate_request_id();
        assert_eq!(id.len(), 64);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_hash_binds_message_and_salt() {
        let salt = derive_salt("initial", "req-1", "request_message");
        let hash = hash_message("hello", &salt);
        assert_eq!(hash, hash_message("hello", &salt));
        assert_ne!(hash, hash_message("hello!", &salt));
        assert_ne!(salt, derive_salt("initial", "req-2", "request_message"));
    }

    #[test]
    fn test_ed25519_round_trip() {
        let signing = SigningKey::from_bytes(&[7u8; 32]);
        let public_key = BASE64.encode(signing.verifying_key().as_bytes());
        let signature = BASE64.encode(signing.sign(b"payload").to_bytes());

        let verifier = verifier_for(KeyType::Ed25519);
        assert!(verifier.verify(&public_key, b"payload", &signature).unwrap());
        assert!(!verifier.verify(&public_key, b"other", &signature).unwrap());
    }

    #[test]
    fn test_rejects_malformed_key() {
        assert!(Ed25519Verifier.validate_public_key("not-base64!").is_err());
        assert!(RsaSha256Verifier.validate_public_key("garbage").is_err());
        assert!(!signature_matches(KeyType::Rsa, "garbage", b"x", "AAAA"));
    }

    #[test]
    fn test_rsa_round_trip() {
        use rsa::pkcs8::{EncodePublicKey, LineEnding};
        use rsa::signature::{SignatureEncoding, Signer as _};

        let mut rng = rand::thread_rng();
        let private_key = rsa::RsaPrivateKey::new(&mut rng, 1024).unwrap();
        let public_pem = private_key
            .to_public_key()
            .to_public_key_pem(LineEnding::LF)
            .unwrap();
        let signing = rsa::pkcs1v15::SigningKey::<rsa::sha2::Sha256>::new(private_key);
        let signature = BASE64.encode(signing.sign(b"hash").to_bytes());

        assert!(RsaSha256Verifier
            .verify(&public_pem, b"hash", &signature)
            .unwrap());
        assert!(!RsaSha256Verifier
            .verify(&public_pem, b"tampered", &signature)
            .unwrap());
    }
}
