//! Data (chat) messages: AES-128-CTR encryption with exponential
//! padding, framed as MESSAGE_SIGNATURE ∥ PROTOCOL_VERSION ∥ MESSAGE_IV
//! ∥ DATA_MESSAGE.

use mpenc_crypto::cipher;
use mpenc_crypto::hash::sha256;
use mpenc_crypto::identity::{KeyPair, PublicKey};

use crate::error::ProtocolError;
use crate::tlv::{self, decode_tlv};

const DATA_DOMAIN: &[u8] = b"mpenc-data\x00";

/// `p == 0` sends plaintext unpadded; `p > 0` pads to the next multiple
/// of `p` bytes before encryption.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaddingSize {
    None,
    Fixed(usize),
}

impl PaddingSize {
    fn bucket(self) -> usize {
        match self {
            PaddingSize::None => 0,
            PaddingSize::Fixed(p) => p,
        }
    }
}

fn session_tag(session_id: &[u8; 32], group_key: &[u8; 32]) -> [u8; 32] {
    let mut buf = Vec::with_capacity(64);
    buf.extend_from_slice(session_id);
    buf.extend_from_slice(group_key);
    sha256(&buf)
}

/// Encrypt `plaintext` and frame it as a signed data packet's TLV body
/// (everything after the outer base64 framing). Errs if `plaintext` is
/// too long for the in-band 2-byte length prefix to carry.
pub fn encode(
    plaintext: &[u8],
    group_key: &[u8; 32],
    session_id: &[u8; 32],
    padding: PaddingSize,
    signing_key: &KeyPair,
) -> Result<Vec<u8>, ProtocolError> {
    let len: u16 = plaintext.len().try_into().map_err(|_| {
        ProtocolError::ProtocolViolation(format!(
            "data message of {} bytes exceeds the {}-byte limit",
            plaintext.len(),
            u16::MAX
        ))
    })?;

    let iv = cipher::generate_iv();
    let low_key: [u8; 16] = group_key[16..32].try_into().expect("group_key is 32 bytes");

    // The length prefix rides inside the padded plaintext so decode can
    // recover the true length without an out-of-band hint.
    let mut prefixed = Vec::with_capacity(2 + plaintext.len());
    prefixed.extend_from_slice(&len.to_be_bytes());
    prefixed.extend_from_slice(plaintext);

    let padded = cipher::pad_exponential(&prefixed, padding.bucket());
    let ciphertext = cipher::encrypt(&low_key, &iv, &padded).expect("fixed-size key/iv");

    let mut body = Vec::new();
    body.extend(tlv::encode_tlv(tlv::PROTOCOL_VERSION, Some(&[crate::frame::PROTOCOL_VERSION])));
    body.extend(tlv::encode_tlv(tlv::MESSAGE_IV, Some(&iv)));
    body.extend(tlv::encode_tlv(tlv::DATA_MESSAGE, Some(&ciphertext)));

    let tag = session_tag(session_id, group_key);
    let mut to_sign = Vec::with_capacity(DATA_DOMAIN.len() + tag.len() + body.len());
    to_sign.extend_from_slice(DATA_DOMAIN);
    to_sign.extend_from_slice(&tag);
    to_sign.extend_from_slice(&body);
    let sig = signing_key.sign(&to_sign);

    let mut out = tlv::encode_tlv(tlv::MESSAGE_SIGNATURE, Some(&sig));
    out.extend(body);
    Ok(out)
}

/// Verify and decrypt a data packet. The true, unpadded length travels
/// inside the encrypted buffer as a 2-byte prefix; bytes beyond it are
/// padding and are discarded without being interpreted.
pub fn decode(
    input: &[u8],
    group_key: &[u8; 32],
    session_id: &[u8; 32],
    source_key: &PublicKey,
) -> Result<Vec<u8>, ProtocolError> {
    let sig_tlv = decode_tlv(input)?;
    if sig_tlv.tlv_type != tlv::MESSAGE_SIGNATURE {
        return Err(ProtocolError::MalformedFrame("expected MESSAGE_SIGNATURE first".into()));
    }
    let signature: [u8; 64] = sig_tlv
        .value
        .try_into()
        .map_err(|_| ProtocolError::MalformedFrame("MESSAGE_SIGNATURE must be 64 bytes".into()))?;
    let body = sig_tlv.rest;

    let tag = session_tag(session_id, group_key);
    let mut signed = Vec::with_capacity(DATA_DOMAIN.len() + tag.len() + body.len());
    signed.extend_from_slice(DATA_DOMAIN);
    signed.extend_from_slice(&tag);
    signed.extend_from_slice(body);
    source_key
        .verify(&signed, &signature)
        .map_err(|_| ProtocolError::BadSignature)?;

    let version_tlv = decode_tlv(body)?;
    if version_tlv.tlv_type != tlv::PROTOCOL_VERSION || version_tlv.value.len() != 1 {
        return Err(ProtocolError::MalformedFrame("expected PROTOCOL_VERSION".into()));
    }
    if version_tlv.value[0] != crate::frame::PROTOCOL_VERSION {
        return Err(ProtocolError::UnknownVersion(version_tlv.value[0]));
    }

    let iv_tlv = decode_tlv(version_tlv.rest)?;
    if iv_tlv.tlv_type != tlv::MESSAGE_IV || iv_tlv.value.len() != 16 {
        return Err(ProtocolError::MalformedFrame("expected 16-byte MESSAGE_IV".into()));
    }
    let iv: [u8; 16] = iv_tlv.value.try_into().expect("length checked above");

    let data_tlv = decode_tlv(iv_tlv.rest)?;
    if data_tlv.tlv_type != tlv::DATA_MESSAGE {
        return Err(ProtocolError::MalformedFrame("expected DATA_MESSAGE".into()));
    }

    let low_key: [u8; 16] = group_key[16..32].try_into().expect("group_key is 32 bytes");
    let plaintext_padded = cipher::decrypt(&low_key, &iv, data_tlv.value)
        .map_err(crate::error::from_crypto)?;
    if plaintext_padded.len() < 2 {
        return Err(ProtocolError::MalformedFrame("data message shorter than length prefix".into()));
    }
    let len = u16::from_be_bytes([plaintext_padded[0], plaintext_padded[1]]) as usize;
    let rest = &plaintext_padded[2..];
    if len > rest.len() {
        return Err(ProtocolError::MalformedFrame("declared plaintext length exceeds frame".into()));
    }
    Ok(rest[..len].to_vec())
}
