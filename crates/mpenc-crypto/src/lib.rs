//! Cryptographic primitives and group-key-agreement state machines for
//! the mpenc protocol engine: Curve25519 group Diffie-Hellman (CLIQUES),
//! Ed25519 session authentication (ASKE), HKDF-SHA256, and AES-128-CTR
//! data-message encryption.

pub mod aske;
pub mod cipher;
pub mod cliques;
pub mod dh;
pub mod error;
pub mod hash;
pub mod identity;
pub mod kdf;
pub mod participant;

pub use aske::{AskeMember, AskeMessage, KeyDirectory};
pub use cliques::{Agreement, CliquesMember, CliquesMessage};
pub use error::CryptoError;
pub use identity::{KeyPair, PublicKey};
pub use participant::ParticipantId;
