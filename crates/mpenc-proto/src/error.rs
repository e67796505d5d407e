use thiserror::Error;

use mpenc_crypto::CryptoError;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("bad signature")]
    BadSignature,

    #[error("unknown protocol version: {0}")]
    UnknownVersion(u8),

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("message not addressed to this participant")]
    WrongRecipient,

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error("base64 decode error: {0}")]
    Base64Decode(#[from] base64::DecodeError),
}

/// Route a crypto-layer failure to the right protocol-error variant:
/// signature and structural failures get their own taxonomy entries
/// rather than being buried under a generic wrapper.
pub fn from_crypto(e: CryptoError) -> ProtocolError {
    match e {
        CryptoError::SignatureVerification => ProtocolError::BadSignature,
        CryptoError::ProtocolViolation(msg) => ProtocolError::ProtocolViolation(msg),
        other => ProtocolError::Crypto(other),
    }
}
