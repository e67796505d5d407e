//! Ed25519 signing keys.
//!
//! Two roles use the same key type: the long-term *static* identity key
//! (ASKE session-acknowledgement signatures) and the per-session
//! *ephemeral* signing key (message framing signatures, destroyed on
//! quit for deniability).

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier as _, VerifyingKey};
use rand::rngs::OsRng;
use zeroize::ZeroizeOnDrop;

use crate::error::CryptoError;

/// A 32-byte Ed25519 public key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey(pub [u8; 32]);

impl PublicKey {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        self.0
    }

    fn verifying_key(&self) -> Result<VerifyingKey, CryptoError> {
        VerifyingKey::from_bytes(&self.0).map_err(|e| CryptoError::InvalidKey(e.to_string()))
    }

    /// Verify a 64-byte signature over `msg`.
    pub fn verify(&self, msg: &[u8], sig_bytes: &[u8; 64]) -> Result<(), CryptoError> {
        let vk = self.verifying_key()?;
        let sig = Signature::from_bytes(sig_bytes);
        vk.verify(msg, &sig)
            .map_err(|_| CryptoError::SignatureVerification)
    }

    /// Human-readable fingerprint for out-of-band identity verification:
    /// SHA-256 of the public key, truncated to 20 bytes, hex-grouped in
    /// 4-digit chunks.
    pub fn fingerprint(&self) -> String {
        use sha2::{Digest, Sha256};
        let digest = Sha256::digest(self.0);
        let hex = hex::encode(&digest[..20]);
        hex.chars()
            .collect::<Vec<_>>()
            .chunks(4)
            .map(|c| c.iter().collect::<String>())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Ed25519 key pair. Secret bytes are zeroized on drop.
#[derive(ZeroizeOnDrop)]
pub struct KeyPair {
    #[zeroize(skip)]
    public: PublicKey,
    secret_bytes: [u8; 32],
}

impl KeyPair {
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        Self {
            public: PublicKey(signing_key.verifying_key().to_bytes()),
            secret_bytes: signing_key.to_bytes(),
        }
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(&bytes);
        Self {
            public: PublicKey(signing_key.verifying_key().to_bytes()),
            secret_bytes: bytes,
        }
    }

    pub fn public(&self) -> PublicKey {
        self.public
    }

    /// Raw 32-byte seed. Exposed only for deniability-waiving flows
    /// (ASKE quit) that must publish it.
    pub fn secret_bytes(&self) -> [u8; 32] {
        self.secret_bytes
    }

    fn signing_key(&self) -> SigningKey {
        SigningKey::from_bytes(&self.secret_bytes)
    }

    /// Sign `msg`, returning a 64-byte raw Ed25519 signature.
    pub fn sign(&self, msg: &[u8]) -> [u8; 64] {
        self.signing_key().sign(msg).to_bytes()
    }
}
