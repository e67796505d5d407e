//! Curve25519 group Diffie-Hellman primitives.
//!
//! CLIQUES treats every `int_keys` entry as a point on Curve25519 and
//! advances it by scalar-multiplying with each member's private
//! contribution in turn. `x25519_dalek::StaticSecret` already performs
//! RFC 7748 clamping on generation, so every [`Scalar`] produced by
//! [`Scalar::generate`] is a valid clamped private scalar.

use rand::rngs::OsRng;
use x25519_dalek::{PublicKey as X25519Public, StaticSecret};
use zeroize::Zeroize;

use crate::error::CryptoError;

/// A private Curve25519 scalar. Zeroized on drop via the underlying
/// `StaticSecret`.
pub struct Scalar(StaticSecret);

impl Scalar {
    /// Generate a fresh, clamped scalar from the process CSPRNG.
    pub fn generate() -> Self {
        Self(StaticSecret::random_from_rng(OsRng))
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(StaticSecret::from(bytes))
    }

    /// `self · G` — the public base-point multiple of this scalar.
    pub fn public_point(&self) -> Point {
        Point(X25519Public::from(&self.0).to_bytes())
    }

    /// `self · point` — advance an intermediate key by this scalar.
    pub fn multiply(&self, point: &Point) -> Point {
        let shared = self.0.diffie_hellman(&point.as_x25519());
        Point(*shared.as_bytes())
    }
}

/// A Curve25519 point (Montgomery u-coordinate), 32 bytes.
///
/// Used both as a CLIQUES intermediate key and as the final raw DH shared
/// value before it is run through HKDF.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Point(pub [u8; 32]);

impl Point {
    /// The standard Curve25519 base point, `G`.
    pub fn generator() -> Self {
        // u = 9, the conventional Curve25519 base point.
        let mut bytes = [0u8; 32];
        bytes[0] = 9;
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        self.0
    }

    fn as_x25519(&self) -> X25519Public {
        X25519Public::from(self.0)
    }
}

/// Convert raw bytes into a [`Scalar`], validating length.
pub fn scalar_from_slice(bytes: &[u8]) -> Result<Scalar, CryptoError> {
    let arr: [u8; 32] = bytes
        .try_into()
        .map_err(|_| CryptoError::InvalidKey(format!("scalar must be 32 bytes, got {}", bytes.len())))?;
    Ok(Scalar::from_bytes(arr))
}

/// Convert raw bytes into a [`Point`], validating length.
pub fn point_from_slice(bytes: &[u8]) -> Result<Point, CryptoError> {
    let arr: [u8; 32] = bytes
        .try_into()
        .map_err(|_| CryptoError::InvalidKey(format!("point must be 32 bytes, got {}", bytes.len())))?;
    Ok(Point::from_bytes(arr))
}

impl Drop for Point {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_mult_of_generator_matches_public_point() {
        let s = Scalar::generate();
        let g = Point::generator();
        assert_eq!(s.multiply(&g), s.public_point());
    }

    #[test]
    fn dh_is_commutative_for_two_parties() {
        let a = Scalar::generate();
        let b = Scalar::generate();
        let g = Point::generator();

        let a_pub = a.multiply(&g);
        let b_pub = b.multiply(&g);

        let shared_via_a = a.multiply(&b_pub);
        let shared_via_b = b.multiply(&a_pub);
        assert_eq!(shared_via_a, shared_via_b);
    }

    #[test]
    fn rejects_wrong_length_input() {
        assert!(scalar_from_slice(&[0u8; 31]).is_err());
        assert!(point_from_slice(&[0u8; 33]).is_err());
    }
}
