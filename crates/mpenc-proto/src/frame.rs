//! Greet-type bit flags and the outer base64 wire framing.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

use crate::error::ProtocolError;

pub const PROTOCOL_VERSION: u8 = 1;

pub const BIT_DOWN: u16 = 0x001;
pub const BIT_GKA: u16 = 0x002;
pub const BIT_SKE: u16 = 0x004;
pub const BIT_AUX: u16 = 0x008;
pub const BIT_INIT: u16 = 0x010;
pub const BIT_RECOVER: u16 = 0x100;

pub const INIT_INITIATOR_UP: u16 = 0x09c;
pub const INIT_PARTICIPANT_UP: u16 = 0x01c;
pub const INIT_PARTICIPANT_DOWN: u16 = 0x01e;
pub const INIT_PARTICIPANT_CONFIRM_DOWN: u16 = 0x01a;
pub const INCLUDE_AUX_INITIATOR_UP: u16 = 0x0ad;
pub const EXCLUDE_AUX_INITIATOR_DOWN: u16 = 0x0bf;
pub const REFRESH_AUX_INITIATOR_DOWN: u16 = 0x0c7;
pub const QUIT_DOWN: u16 = 0x0d3;

// Not given as worked examples upstream: the join chain needs its own
// up/down pair the same way INIT does, since unlike exclude/refresh it
// relays through new members before broadcasting. Chosen distinct from
// every constant above; the Greeter treats all greet-type constants as
// opaque tokens it assigned itself, never as a bitfield to decompose.
pub const INCLUDE_AUX_PARTICIPANT_UP: u16 = 0x0a5;
pub const INCLUDE_AUX_PARTICIPANT_DOWN: u16 = 0x0a7;
pub const INCLUDE_AUX_INITIATOR_DOWN: u16 = 0x0a3;

pub fn bit_is_set(greet_type: u16, bit: u16) -> bool {
    greet_type & bit != 0
}

/// Clear `bit` in `greet_type`. Rejects transitions the protocol cannot
/// make: clearing DOWN on a message already past confirm-down is an
/// illegal move, not a no-op.
pub fn clear_bit(greet_type: u16, bit: u16) -> Result<u16, ProtocolError> {
    if bit == BIT_DOWN && greet_type == INIT_PARTICIPANT_CONFIRM_DOWN {
        return Err(ProtocolError::ProtocolViolation(
            "cannot clear DOWN on a confirm-down message".into(),
        ));
    }
    Ok(greet_type & !bit)
}

pub fn set_bit(greet_type: u16, bit: u16) -> Result<u16, ProtocolError> {
    if bit_is_set(greet_type, bit) {
        return Err(ProtocolError::ProtocolViolation(format!(
            "bit {bit:#x} already set on greet type {greet_type:#x}"
        )));
    }
    Ok(greet_type | bit)
}

/// Category of a parsed wire string, before any TLV decoding happens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireMessage {
    Greet { version: u8, content: Vec<u8> },
    Data { version: u8, content: Vec<u8> },
    Query { version: u8, hint: String },
    Error { body: String },
    Plain(String),
}

const PREFIX: &str = "?mpENCv";
const ERROR_PREFIX: &str = "?mpENC Error:";

/// Frame a greet or data packet: `"?mpENCv" version ":" base64(content) "."`.
pub fn encode_greet(version: u8, content: &[u8]) -> String {
    format!("{PREFIX}{}:{}.", version as char, BASE64.encode(content))
}

/// Frame a query: `"?mpENCv" version "?" hint`.
pub fn encode_query(version: u8, hint: &str) -> String {
    format!("{PREFIX}{}?{hint}", version as char)
}

/// Frame an error message: `"?mpENC Error:" body "."`.
pub fn encode_error(body: &str) -> String {
    format!("{ERROR_PREFIX}{body}.")
}

/// Parse a raw wire string into its category. Anything not matching a
/// recognized prefix is `Plain`.
pub fn decode_wire(input: &str) -> Result<WireMessage, ProtocolError> {
    if let Some(rest) = input.strip_prefix(ERROR_PREFIX) {
        let body = rest
            .strip_suffix('.')
            .ok_or_else(|| ProtocolError::MalformedFrame("error message missing trailing '.'".into()))?;
        return Ok(WireMessage::Error { body: body.to_string() });
    }

    if let Some(rest) = input.strip_prefix(PREFIX) {
        let mut chars = rest.chars();
        let version_char = chars
            .next()
            .ok_or_else(|| ProtocolError::MalformedFrame("missing version byte".into()))?;
        let version = version_char as u32;
        let version: u8 = version
            .try_into()
            .map_err(|_| ProtocolError::MalformedFrame("version byte out of range".into()))?;
        let remainder = chars.as_str();

        if let Some(hint) = remainder.strip_prefix('?') {
            return Ok(WireMessage::Query {
                version,
                hint: hint.to_string(),
            });
        }
        if let Some(b64) = remainder.strip_prefix(':') {
            let b64 = b64
                .strip_suffix('.')
                .ok_or_else(|| ProtocolError::MalformedFrame("greet message missing trailing '.'".into()))?;
            let content = BASE64.decode(b64)?;
            return Ok(WireMessage::Greet { version, content });
        }
        return Err(ProtocolError::MalformedFrame("unrecognized mpENC message shape".into()));
    }

    Ok(WireMessage::Plain(input.to_string()))
}
