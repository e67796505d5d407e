//! AES-128-CTR data-message cipher.
//!
//! Data messages use a 16-byte random IV and the low 16 bytes of the
//! group key. CTR mode is its own inverse, so `encrypt` and `decrypt`
//! share one keystream-xor implementation.

use aes::Aes128;
use ctr::cipher::{KeyIvInit, StreamCipher};
use rand::RngCore;

use crate::error::CryptoError;

type Aes128Ctr = ctr::Ctr128BE<Aes128>;

/// Generate a fresh random 16-byte IV from the process CSPRNG.
pub fn generate_iv() -> [u8; 16] {
    let mut iv = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut iv);
    iv
}

/// XOR `data` with the AES-128-CTR keystream for `key`/`iv`, in place.
fn apply_keystream(key: &[u8; 16], iv: &[u8; 16], data: &mut [u8]) -> Result<(), CryptoError> {
    let mut cipher = Aes128Ctr::new_from_slices(key, iv)
        .map_err(|e| CryptoError::Cipher(e.to_string()))?;
    cipher.apply_keystream(data);
    Ok(())
}

/// Encrypt `plaintext` under `key`/`iv`. Returns ciphertext of the same
/// length as the input (no padding, no authentication tag — framing-level
/// signatures provide integrity per the wire codec).
pub fn encrypt(key: &[u8; 16], iv: &[u8; 16], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let mut buf = plaintext.to_vec();
    apply_keystream(key, iv, &mut buf)?;
    Ok(buf)
}

/// Decrypt `ciphertext` under `key`/`iv`. Identical operation to
/// [`encrypt`]: AES-CTR keystream XOR is its own inverse.
pub fn decrypt(key: &[u8; 16], iv: &[u8; 16], ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    encrypt(key, iv, ciphertext)
}

/// Pad `plaintext` up to the next multiple of `bucket` bytes (exponential
/// padding parameter `p` from the wire codec). `bucket == 0` disables
/// padding. Padding bytes are CSPRNG-random, matching the codec's
/// traffic-analysis rationale for not using constant fill bytes.
///
/// The true length is recovered on decode from the frame's declared
/// plaintext length (carried alongside the ciphertext), not from the
/// padded buffer itself — this function only produces the padded bytes
/// to be encrypted.
pub fn pad_exponential(plaintext: &[u8], bucket: usize) -> Vec<u8> {
    if bucket == 0 {
        return plaintext.to_vec();
    }
    let target = plaintext.len().div_ceil(bucket) * bucket;
    let target = target.max(bucket);
    let mut out = plaintext.to_vec();
    let mut tail = vec![0u8; target - plaintext.len()];
    rand::rngs::OsRng.fill_bytes(&mut tail);
    out.extend_from_slice(&tail);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let key = [0x11u8; 16];
        let iv = generate_iv();
        let plaintext = b"Don't panic!";
        let ciphertext = encrypt(&key, &iv, plaintext).unwrap();
        assert_ne!(ciphertext, plaintext);
        let recovered = decrypt(&key, &iv, &ciphertext).unwrap();
        assert_eq!(recovered, plaintext);
    }

    #[test]
    fn same_key_different_iv_yields_different_ciphertext() {
        let key = [0x22u8; 16];
        let plaintext = b"same message twice";
        let c1 = encrypt(&key, &[0u8; 16], plaintext).unwrap();
        let c2 = encrypt(&key, &[1u8; 16], plaintext).unwrap();
        assert_ne!(c1, c2);
    }

    #[test]
    fn padding_rounds_up_to_bucket_multiple() {
        let padded = pad_exponential(b"hi", 32);
        assert_eq!(padded.len() % 32, 0);
        assert!(padded.len() >= 32);
    }

    #[test]
    fn zero_bucket_means_no_padding() {
        let padded = pad_exponential(b"hello", 0);
        assert_eq!(padded, b"hello");
    }

    #[test]
    fn padding_then_encryption_is_multiple_of_bucket() {
        let key = [0x33u8; 16];
        let iv = generate_iv();
        let padded = pad_exponential(b"Don't panic!", 32);
        let ciphertext = encrypt(&key, &iv, &padded).unwrap();
        assert_eq!(ciphertext.len() % 32, 0);
    }
}
