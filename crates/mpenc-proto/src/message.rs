//! `ProtocolMessage`: the internal merge of a CLIQUES and ASKE message
//! into one signed wire frame. Not a wire type itself — §4.1 of the
//! codec describes its TLV encoding.

use mpenc_crypto::dh::Point;
use mpenc_crypto::identity::{KeyPair, PublicKey};
use mpenc_crypto::ParticipantId;

use crate::error::ProtocolError;
use crate::tlv::{self, decode_tlv};

const GREET_DOMAIN: &[u8] = b"mpenc-greet\x00";

/// Broadcast destination sentinel: `dest == ""` in the source protocol.
pub fn is_broadcast(dest: &Option<ParticipantId>) -> bool {
    dest.is_none()
}

#[derive(Debug, Clone)]
pub struct ProtocolMessage {
    pub source: ParticipantId,
    pub dest: Option<ParticipantId>,
    pub greet_type: u16,
    pub members: Vec<ParticipantId>,
    pub int_keys: Vec<Point>,
    pub nonces: Vec<[u8; 32]>,
    pub pub_keys: Vec<PublicKey>,
    pub session_signature: Option<[u8; 64]>,
    pub signing_key: Option<[u8; 32]>,
}

fn encode_array<'a, T>(items: &'a [T], tlv_type: u16, as_bytes: impl Fn(&'a T) -> Vec<u8>) -> Vec<u8> {
    let mut out = Vec::new();
    if items.is_empty() {
        out.extend(tlv::encode_tlv(tlv_type, None));
    } else {
        for item in items {
            out.extend(tlv::encode_tlv(tlv_type, Some(&as_bytes(item))));
        }
    }
    out
}

fn decode_array<'a>(
    mut rest: &'a [u8],
    tlv_type: u16,
) -> Result<(Vec<&'a [u8]>, &'a [u8]), ProtocolError> {
    let mut items = Vec::new();
    loop {
        if rest.is_empty() {
            break;
        }
        let peek = decode_tlv(rest)?;
        if peek.tlv_type != tlv_type {
            break;
        }
        items.push(peek.value);
        rest = peek.rest;
    }
    if items.len() == 1 && items[0].is_empty() {
        items.clear();
    }
    Ok((items, rest))
}

/// Body TLV bytes (everything the MESSAGE_SIGNATURE TLV covers, not
/// including that TLV itself).
fn encode_body(msg: &ProtocolMessage) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend(tlv::encode_tlv(tlv::PROTOCOL_VERSION, Some(&[crate::frame::PROTOCOL_VERSION])));
    body.extend(tlv::encode_tlv(tlv::GREET_TYPE, Some(&msg.greet_type.to_be_bytes())));
    body.extend(tlv::encode_tlv(tlv::SOURCE, Some(msg.source.as_bytes())));
    body.extend(tlv::encode_tlv(
        tlv::DEST,
        msg.dest.as_ref().map(|d| d.as_bytes()),
    ));
    body.extend(encode_array(&msg.members, tlv::MEMBER, |m| m.as_bytes().to_vec()));
    body.extend(encode_array(&msg.int_keys, tlv::INT_KEY, |p| p.to_bytes().to_vec()));
    body.extend(encode_array(&msg.nonces, tlv::NONCE, |n| n.to_vec()));
    body.extend(encode_array(&msg.pub_keys, tlv::PUB_KEY, |k| k.to_bytes().to_vec()));
    if let Some(sig) = msg.session_signature {
        body.extend(tlv::encode_tlv(tlv::SESSION_SIGNATURE, Some(&sig)));
    }
    if let Some(sk) = msg.signing_key {
        body.extend(tlv::encode_tlv(tlv::SIGNING_KEY, Some(&sk)));
    }
    body
}

/// Sign and encode a full greet message.
pub fn encode(msg: &ProtocolMessage, signing_key: &KeyPair) -> Vec<u8> {
    let body = encode_body(msg);
    let mut to_sign = Vec::with_capacity(GREET_DOMAIN.len() + body.len());
    to_sign.extend_from_slice(GREET_DOMAIN);
    to_sign.extend_from_slice(&body);
    let sig = signing_key.sign(&to_sign);

    let mut out = tlv::encode_tlv(tlv::MESSAGE_SIGNATURE, Some(&sig));
    out.extend(body);
    out
}

/// Decoded message plus the bytes its signature was computed over, so
/// the caller can verify against the claimed sender's signing key.
pub struct Decoded {
    pub message: ProtocolMessage,
    pub signed_bytes: Vec<u8>,
    pub signature: [u8; 64],
}

pub fn decode(input: &[u8]) -> Result<Decoded, ProtocolError> {
    let sig_tlv = decode_tlv(input)?;
    if sig_tlv.tlv_type != tlv::MESSAGE_SIGNATURE {
        return Err(ProtocolError::MalformedFrame("expected MESSAGE_SIGNATURE first".into()));
    }
    let signature: [u8; 64] = sig_tlv
        .value
        .try_into()
        .map_err(|_| ProtocolError::MalformedFrame("MESSAGE_SIGNATURE must be 64 bytes".into()))?;
    let body = sig_tlv.rest;
    let signed_bytes = {
        let mut v = Vec::with_capacity(GREET_DOMAIN.len() + body.len());
        v.extend_from_slice(GREET_DOMAIN);
        v.extend_from_slice(body);
        v
    };

    let version_tlv = decode_tlv(body)?;
    if version_tlv.tlv_type != tlv::PROTOCOL_VERSION || version_tlv.value.len() != 1 {
        return Err(ProtocolError::MalformedFrame("expected PROTOCOL_VERSION".into()));
    }
    let version = version_tlv.value[0];
    if version != crate::frame::PROTOCOL_VERSION {
        return Err(ProtocolError::UnknownVersion(version));
    }

    let greet_type_tlv = decode_tlv(version_tlv.rest)?;
    if greet_type_tlv.tlv_type != tlv::GREET_TYPE || greet_type_tlv.value.len() != 2 {
        return Err(ProtocolError::MalformedFrame("expected GREET_TYPE".into()));
    }
    let greet_type = u16::from_be_bytes([greet_type_tlv.value[0], greet_type_tlv.value[1]]);

    let source_tlv = decode_tlv(greet_type_tlv.rest)?;
    if source_tlv.tlv_type != tlv::SOURCE {
        return Err(ProtocolError::MalformedFrame("expected SOURCE".into()));
    }
    let source = ParticipantId::from(source_tlv.value.to_vec());

    let dest_tlv = decode_tlv(source_tlv.rest)?;
    if dest_tlv.tlv_type != tlv::DEST {
        return Err(ProtocolError::MalformedFrame("expected DEST".into()));
    }
    let dest = if dest_tlv.value.is_empty() {
        None
    } else {
        Some(ParticipantId::from(dest_tlv.value.to_vec()))
    };

    let (member_bytes, rest) = decode_array(dest_tlv.rest, tlv::MEMBER)?;
    let members: Vec<ParticipantId> = member_bytes.into_iter().map(|b| ParticipantId::from(b.to_vec())).collect();

    let (int_key_bytes, rest) = decode_array(rest, tlv::INT_KEY)?;
    let mut int_keys = Vec::with_capacity(int_key_bytes.len());
    for b in int_key_bytes {
        let arr: [u8; 32] = b
            .try_into()
            .map_err(|_| ProtocolError::MalformedFrame("INT_KEY must be 32 bytes".into()))?;
        int_keys.push(Point::from_bytes(arr));
    }

    let (nonce_bytes, rest) = decode_array(rest, tlv::NONCE)?;
    let mut nonces = Vec::with_capacity(nonce_bytes.len());
    for b in nonce_bytes {
        let arr: [u8; 32] = b
            .try_into()
            .map_err(|_| ProtocolError::MalformedFrame("NONCE must be 32 bytes".into()))?;
        nonces.push(arr);
    }

    let (pub_key_bytes, mut rest) = decode_array(rest, tlv::PUB_KEY)?;
    let mut pub_keys = Vec::with_capacity(pub_key_bytes.len());
    for b in pub_key_bytes {
        let arr: [u8; 32] = b
            .try_into()
            .map_err(|_| ProtocolError::MalformedFrame("PUB_KEY must be 32 bytes".into()))?;
        pub_keys.push(PublicKey::from_bytes(arr));
    }

    let mut session_signature = None;
    if !rest.is_empty() {
        let peek = decode_tlv(rest)?;
        if peek.tlv_type == tlv::SESSION_SIGNATURE {
            let arr: [u8; 64] = peek
                .value
                .try_into()
                .map_err(|_| ProtocolError::MalformedFrame("SESSION_SIGNATURE must be 64 bytes".into()))?;
            session_signature = Some(arr);
            rest = peek.rest;
        }
    }

    let mut signing_key = None;
    if !rest.is_empty() {
        let peek = decode_tlv(rest)?;
        if peek.tlv_type == tlv::SIGNING_KEY {
            let arr: [u8; 32] = peek
                .value
                .try_into()
                .map_err(|_| ProtocolError::MalformedFrame("SIGNING_KEY must be 32 bytes".into()))?;
            signing_key = Some(arr);
        }
    }

    Ok(Decoded {
        message: ProtocolMessage {
            source,
            dest,
            greet_type,
            members,
            int_keys,
            nonces,
            pub_keys,
            session_signature,
            signing_key,
        },
        signed_bytes,
        signature,
    })
}
