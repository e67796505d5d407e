//! `Session` — a single local member's end-to-end view of an mpenc group
//! chat: owns the [`Greeter`] state machine, distinguishes inbound greet
//! traffic from data traffic on the same wire framing, and exposes
//! `encrypt`/`decrypt` for the current group key.
//!
//! Re-exports the crypto and protocol crates' public surface so a
//! dependent only needs this one crate for the common case.

pub use mpenc_crypto::identity::{KeyPair, PublicKey};
pub use mpenc_crypto::{AskeMember, CliquesMember, CryptoError, KeyDirectory, ParticipantId};
pub use mpenc_proto::{Greeter, GreeterEvent, GreeterState, PaddingSize, ProtocolError, ProtocolMessage};
pub use mpenc_proto::{data, frame, tlv, transport};

use mpenc_proto::tlv::decode_tlv;

/// What a wire string turned out to contain once the outer framing was
/// peeled back. Greet and data packets share the identical `"?mpENCv"`
/// outer format (§6), so the distinction is made by inspecting the third
/// TLV in the content: `GREET_TYPE` for a greet packet, `MESSAGE_IV` for
/// a data packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shape {
    Greet,
    Data,
}

fn sniff_shape(content: &[u8]) -> Result<Shape, ProtocolError> {
    let sig = decode_tlv(content)?;
    let version = decode_tlv(sig.rest)?;
    let third = decode_tlv(version.rest)?;
    if third.tlv_type == tlv::GREET_TYPE {
        Ok(Shape::Greet)
    } else if third.tlv_type == tlv::MESSAGE_IV {
        Ok(Shape::Data)
    } else {
        Err(ProtocolError::MalformedFrame(format!(
            "unrecognized packet shape (third TLV type {:#x})",
            third.tlv_type
        )))
    }
}

/// What `Session::process_incoming` produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incoming {
    /// A greet-protocol reply to relay back onto the transport.
    Reply(String),
    /// A decrypted chat message from `from`.
    Data { from: ParticipantId, plaintext: Vec<u8> },
    /// Nothing to do: a greet message that produced no reply, or a
    /// message not addressed to us.
    None,
}

/// One local participant's session: the greet state machine plus the
/// data-message codec bound to its current group key.
pub struct Session {
    greeter: Greeter,
}

impl Session {
    pub fn new(
        id: ParticipantId,
        static_priv_key: KeyPair,
        static_pub_key_dir: KeyDirectory,
        padding: PaddingSize,
    ) -> Self {
        Self {
            greeter: Greeter::new(id, static_priv_key, static_pub_key_dir, padding),
        }
    }

    pub fn id(&self) -> &ParticipantId {
        &self.greeter.id
    }

    pub fn state(&self) -> GreeterState {
        self.greeter.state
    }

    pub fn greeter(&self) -> &Greeter {
        &self.greeter
    }

    pub fn drain_events(&mut self) -> Vec<GreeterEvent> {
        self.greeter.drain_events()
    }

    pub fn start(&mut self, others: &[ParticipantId]) -> Result<String, ProtocolError> {
        self.greeter.start(others)
    }

    pub fn include(&mut self, new_members: &[ParticipantId]) -> Result<String, ProtocolError> {
        self.greeter.include(new_members)
    }

    pub fn exclude(&mut self, excluded: &[ParticipantId]) -> Result<String, ProtocolError> {
        self.greeter.exclude(excluded)
    }

    pub fn refresh(&mut self) -> Result<String, ProtocolError> {
        self.greeter.refresh()
    }

    pub fn quit(&mut self) -> Result<String, ProtocolError> {
        self.greeter.quit()
    }

    /// Encrypt a chat message under the current group key. Errs if the
    /// session has not yet reached [`GreeterState::Ready`].
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<String, ProtocolError> {
        let group_key = self.greeter.cliques.group_key.ok_or_else(|| {
            ProtocolError::ProtocolViolation("no group key: session is not ready".into())
        })?;
        let session_id = self.greeter.aske.session_id.ok_or_else(|| {
            ProtocolError::ProtocolViolation("no session id: session is not ready".into())
        })?;
        let signer = self
            .greeter
            .aske
            .ephemeral_priv_key
            .as_ref()
            .ok_or_else(|| ProtocolError::ProtocolViolation("no ephemeral signing key".into()))?;

        let content = data::encode(plaintext, &group_key, &session_id, self.greeter.padding(), signer)?;
        Ok(frame::encode_greet(frame::PROTOCOL_VERSION, &content))
    }

    /// Decrypt a chat message, verifying it against `from`'s ephemeral
    /// key for the current (or, if `from` has since left, archived)
    /// session. `from` is supplied by the transport out of band: unlike
    /// greet packets, data packets carry no sender field of their own.
    fn decrypt_from(&self, content: &[u8], from: &ParticipantId) -> Result<Vec<u8>, ProtocolError> {
        let group_key = self.greeter.cliques.group_key.ok_or_else(|| {
            ProtocolError::ProtocolViolation("no group key: session is not ready".into())
        })?;
        let session_id = self.greeter.aske.session_id.ok_or_else(|| {
            ProtocolError::ProtocolViolation("no session id: session is not ready".into())
        })?;
        let source_key = self
            .greeter
            .aske
            .members
            .iter()
            .position(|m| m == from)
            .and_then(|i| self.greeter.aske.ephemeral_pub_keys.get(i).copied())
            .or_else(|| self.greeter.aske.old_ephemeral_keys.get(from).map(|k| k.public))
            .ok_or_else(|| ProtocolError::ProtocolViolation(format!("no known ephemeral key for {from}")))?;

        data::decode(content, &group_key, &session_id, &source_key)
    }

    /// Process one inbound wire string: routes greet packets into the
    /// state machine and decrypts data packets against `from`.
    pub fn process_incoming(&mut self, wire: &str, from: &ParticipantId) -> Result<Incoming, ProtocolError> {
        let parsed = frame::decode_wire(wire)?;
        let content = match &parsed {
            frame::WireMessage::Greet { content, .. } => content,
            frame::WireMessage::Error { .. } | frame::WireMessage::Query { .. } | frame::WireMessage::Plain(_) => {
                return match self.greeter.process_message(wire)? {
                    Some(reply) => Ok(Incoming::Reply(reply)),
                    None => Ok(Incoming::None),
                };
            }
            frame::WireMessage::Data { content, .. } => content,
        };

        match sniff_shape(content)? {
            Shape::Greet => match self.greeter.process_message(wire)? {
                Some(reply) => Ok(Incoming::Reply(reply)),
                None => Ok(Incoming::None),
            },
            Shape::Data => {
                let plaintext = self.decrypt_from(content, from)?;
                Ok(Incoming::Data {
                    from: from.clone(),
                    plaintext,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::{Arc, Mutex};

    fn pid(s: &str) -> ParticipantId {
        ParticipantId::from(s)
    }

    fn build_sessions(ids: &[&str]) -> Vec<Session> {
        let static_keys: Vec<KeyPair> = ids.iter().map(|_| KeyPair::generate()).collect();
        let mut dir_map = BTreeMap::new();
        for (id, key) in ids.iter().zip(static_keys.iter()) {
            dir_map.insert(pid(id), key.public());
        }
        let dir_map = Arc::new(Mutex::new(dir_map));
        let dir: KeyDirectory = {
            let dir_map = dir_map.clone();
            Arc::new(move |id: &ParticipantId| dir_map.lock().unwrap().get(id).copied())
        };

        ids.iter()
            .zip(static_keys)
            .map(|(id, sk)| Session::new(pid(id), sk, dir.clone(), PaddingSize::None))
            .collect()
    }

    fn drive_to_ready(sessions: &mut [Session]) {
        let ids: Vec<ParticipantId> = sessions.iter().map(|s| s.id().clone()).collect();
        let first_id = ids[0].clone();
        let others = ids[1..].to_vec();
        let first = sessions[0].start(&others).unwrap();

        let mut queue = std::collections::VecDeque::new();
        queue.push_back((first_id, first));
        while let Some((from, wire)) = queue.pop_front() {
            for s in sessions.iter_mut() {
                if let Incoming::Reply(reply) = s.process_incoming(&wire, &from).unwrap() {
                    queue.push_back((s.id().clone(), reply));
                }
            }
        }
    }

    #[test]
    fn three_member_session_reaches_ready_and_shares_data() {
        let mut sessions = build_sessions(&["1", "2", "3"]);
        drive_to_ready(&mut sessions);
        for s in &sessions {
            assert_eq!(s.state(), GreeterState::Ready);
        }

        let wire = sessions[0].encrypt(b"hello group").unwrap();
        let sender = sessions[0].id().clone();
        match sessions[1].process_incoming(&wire, &sender).unwrap() {
            Incoming::Data { plaintext, from } => {
                assert_eq!(plaintext, b"hello group");
                assert_eq!(from, sender);
            }
            other => panic!("expected data message, got {other:?}"),
        }
    }

    #[test]
    fn encrypt_before_ready_is_an_error() {
        let mut sessions = build_sessions(&["1", "2"]);
        assert!(sessions[0].encrypt(b"too early").is_err());
    }
}
