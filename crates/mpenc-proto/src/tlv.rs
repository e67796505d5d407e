//! Bit-packed binary TLV wire format: 2-byte big-endian type, 2-byte
//! big-endian length, `length` bytes of payload.

use crate::error::ProtocolError;

pub const PADDING: u16 = 0x0000;
pub const DATA_MESSAGE: u16 = 0x0001;
pub const MESSAGE_SIGNATURE: u16 = 0x0002;
pub const MESSAGE_IV: u16 = 0x0003;
pub const PROTOCOL_VERSION: u16 = 0x0004;
pub const GREET_TYPE: u16 = 0x0005;

pub const SOURCE: u16 = 0x0100;
pub const DEST: u16 = 0x0101;
pub const MEMBER: u16 = 0x0103;
pub const INT_KEY: u16 = 0x0104;
pub const NONCE: u16 = 0x0105;
pub const PUB_KEY: u16 = 0x0106;
pub const SESSION_SIGNATURE: u16 = 0x0107;
pub const SIGNING_KEY: u16 = 0x0108;

pub const FROM: u16 = 0x0200;
pub const SEVERITY: u16 = 0x0201;
pub const ERROR_MESSAGE: u16 = 0x0202;

/// A single decoded TLV record plus the remaining undecoded tail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedTlv<'a> {
    pub tlv_type: u16,
    pub value: &'a [u8],
    pub rest: &'a [u8],
}

/// Encode one TLV record. A `None` value encodes as a zero-length
/// payload, semantically equivalent to an absent field.
pub fn encode_tlv(tlv_type: u16, value: Option<&[u8]>) -> Vec<u8> {
    let value = value.unwrap_or(&[]);
    let mut out = Vec::with_capacity(4 + value.len());
    out.extend_from_slice(&tlv_type.to_be_bytes());
    out.extend_from_slice(&(value.len() as u16).to_be_bytes());
    out.extend_from_slice(value);
    out
}

/// Decode one TLV record from the front of `input`.
pub fn decode_tlv(input: &[u8]) -> Result<DecodedTlv<'_>, ProtocolError> {
    if input.len() < 4 {
        return Err(ProtocolError::MalformedFrame("frame shorter than TLV header".into()));
    }
    let tlv_type = u16::from_be_bytes([input[0], input[1]]);
    let len = u16::from_be_bytes([input[2], input[3]]) as usize;
    if input.len() < 4 + len {
        return Err(ProtocolError::MalformedFrame("TLV payload truncated".into()));
    }
    Ok(DecodedTlv {
        tlv_type,
        value: &input[4..4 + len],
        rest: &input[4 + len..],
    })
}

/// `short2bin`: encode a 16-bit value as a 2-byte big-endian string.
pub fn short2bin(v: u16) -> [u8; 2] {
    v.to_be_bytes()
}

/// `bin2short`: decode a 2-byte big-endian string into a 16-bit value.
pub fn bin2short(b: &[u8]) -> Result<u16, ProtocolError> {
    let arr: [u8; 2] = b
        .try_into()
        .map_err(|_| ProtocolError::MalformedFrame(format!("short must be 2 bytes, got {}", b.len())))?;
    Ok(u16::from_be_bytes(arr))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn s1_encode_tlv_matches_fixed_vector() {
        assert_eq!(encode_tlv(0x0000, Some(b"hello")), b"\x00\x00\x00\x05hello");
        assert_eq!(encode_tlv(14, None), b"\x00\x0e\x00\x00");
    }

    #[test]
    fn s1_decode_tlv_matches_fixed_vector() {
        let input = b"\x00\x00\x00\x05hello\x00\x00\x00\x05world";
        let decoded = decode_tlv(input).unwrap();
        assert_eq!(decoded.tlv_type, 0);
        assert_eq!(decoded.value, b"hello");
        assert_eq!(decoded.rest, b"\x00\x00\x00\x05world");
    }

    #[test]
    fn s2_short2bin_and_bin2short_fixed_vectors() {
        assert_eq!(short2bin(21356), *b"Sl");
        assert_eq!(bin2short(b"\x04\xd2").unwrap(), 1234);
    }

    #[test]
    fn short2bin_bin2short_roundtrip_every_value() {
        for v in (0..=u16::MAX).step_by(997) {
            assert_eq!(bin2short(&short2bin(v)).unwrap(), v);
        }
        assert_eq!(bin2short(&short2bin(u16::MAX)).unwrap(), u16::MAX);
    }

    #[test]
    fn tlv_roundtrip() {
        for (ty, payload) in [(PADDING, &b""[..]), (SOURCE, b"alice"), (INT_KEY, &[7u8; 32])] {
            let encoded = encode_tlv(ty, Some(payload));
            let decoded = decode_tlv(&encoded).unwrap();
            assert_eq!(decoded.tlv_type, ty);
            assert_eq!(decoded.value, payload);
            assert!(decoded.rest.is_empty());
        }
    }

    #[test]
    fn decode_rejects_short_header() {
        assert!(decode_tlv(&[0u8, 1, 0]).is_err());
    }

    #[test]
    fn decode_rejects_truncated_payload() {
        assert!(decode_tlv(&[0, 1, 0, 10, 1, 2, 3]).is_err());
    }
}
