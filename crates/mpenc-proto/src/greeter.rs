//! The Greeter state machine: drives CLIQUES and ASKE in lockstep,
//! merges their sub-messages into one signed wire packet, and exposes
//! the session lifecycle (`start`/`include`/`exclude`/`refresh`/`quit`)
//! as the single entry point an outer session layer talks to.

use std::collections::VecDeque;

use mpenc_crypto::aske::{self, AskeMember, AskeMessage, KeyDirectory};
use mpenc_crypto::cliques::{self, CliquesMember, CliquesMessage};
use mpenc_crypto::identity::KeyPair;
use mpenc_crypto::ParticipantId;

use crate::data::PaddingSize;
use crate::error::ProtocolError;
use crate::frame::{self, WireMessage};
use crate::message::{self, ProtocolMessage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GreeterState {
    Null,
    InitUpflow,
    InitDownflow,
    AuxUpflow,
    AuxDownflow,
    Ready,
    Quit,
}

/// UI-intent events the outer session layer drains after each call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GreeterEvent {
    Message(String),
    Info(String),
    Warn(String),
    Error(String),
}

/// Tracks which sub-protocol (and role) a pending greet-type constant
/// describes, so inbound messages can be routed without decomposing the
/// constant's bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
    Init,
    Include,
    Exclude,
    Refresh,
    Quit,
}

fn operation_of(greet_type: u16) -> Option<Operation> {
    match greet_type {
        frame::INIT_INITIATOR_UP
        | frame::INIT_PARTICIPANT_UP
        | frame::INIT_PARTICIPANT_DOWN
        | frame::INIT_PARTICIPANT_CONFIRM_DOWN => Some(Operation::Init),
        frame::INCLUDE_AUX_INITIATOR_UP
        | frame::INCLUDE_AUX_PARTICIPANT_UP
        | frame::INCLUDE_AUX_PARTICIPANT_DOWN
        | frame::INCLUDE_AUX_INITIATOR_DOWN => Some(Operation::Include),
        frame::EXCLUDE_AUX_INITIATOR_DOWN => Some(Operation::Exclude),
        frame::REFRESH_AUX_INITIATOR_DOWN => Some(Operation::Refresh),
        frame::QUIT_DOWN => Some(Operation::Quit),
        _ => None,
    }
}

/// One local participant's combined CLIQUES+ASKE+state-machine session.
pub struct Greeter {
    pub id: ParticipantId,
    pub state: GreeterState,
    pub recovering: bool,
    pub cliques: CliquesMember,
    pub aske: AskeMember,
    events: VecDeque<GreeterEvent>,
    padding: PaddingSize,
}

impl Greeter {
    pub fn new(
        id: ParticipantId,
        static_priv_key: KeyPair,
        static_pub_key_dir: KeyDirectory,
        padding: PaddingSize,
    ) -> Self {
        Self {
            cliques: CliquesMember::new(id.clone()),
            aske: AskeMember::new(id.clone(), static_priv_key, static_pub_key_dir),
            id,
            state: GreeterState::Null,
            recovering: false,
            events: VecDeque::new(),
            padding,
        }
    }

    pub fn padding(&self) -> PaddingSize {
        self.padding
    }

    pub fn drain_events(&mut self) -> Vec<GreeterEvent> {
        self.events.drain(..).collect()
    }

    fn fatal(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        tracing::error!(participant = %self.id, reason, "greeter session terminated");
        self.events.push_back(GreeterEvent::Error(reason));
        self.state = GreeterState::Quit;
    }

    fn sign_and_frame(&self, pm: &ProtocolMessage) -> String {
        let signer = self
            .aske
            .ephemeral_priv_key
            .as_ref()
            .expect("ephemeral key exists once a greet flow has started");
        let content = message::encode(pm, signer);
        frame::encode_greet(frame::PROTOCOL_VERSION, &content)
    }

    fn merge(
        &self,
        cliques_msg: Option<&CliquesMessage>,
        aske_msg: Option<&AskeMessage>,
        greet_type: u16,
    ) -> Result<ProtocolMessage, ProtocolError> {
        let (source, dest, members) = match (cliques_msg, aske_msg) {
            (Some(c), Some(a)) => {
                if c.source != a.source || c.dest != a.dest {
                    return Err(ProtocolError::ProtocolViolation(
                        "CLIQUES and ASKE sub-messages disagree on source/dest".into(),
                    ));
                }
                (c.source.clone(), c.dest.clone(), c.members.clone())
            }
            (Some(c), None) => (c.source.clone(), c.dest.clone(), c.members.clone()),
            (None, Some(a)) => (a.source.clone(), a.dest.clone(), a.members.clone()),
            (None, None) => {
                return Err(ProtocolError::ProtocolViolation(
                    "merge of two empty sub-messages".into(),
                ))
            }
        };

        Ok(ProtocolMessage {
            source,
            dest,
            greet_type,
            members,
            int_keys: cliques_msg.map(|c| c.int_keys.clone()).unwrap_or_default(),
            nonces: aske_msg.map(|a| a.nonces.clone()).unwrap_or_default(),
            pub_keys: aske_msg.map(|a| a.ephemeral_pub_keys.clone()).unwrap_or_default(),
            session_signature: aske_msg.and_then(|a| a.session_signature),
            signing_key: aske_msg.and_then(|a| a.signing_key),
        })
    }

    fn split_cliques(&self, pm: &ProtocolMessage, agreement: cliques::Agreement, flow: cliques::Flow) -> Option<CliquesMessage> {
        if pm.int_keys.is_empty() {
            return None;
        }
        Some(CliquesMessage {
            source: pm.source.clone(),
            dest: pm.dest.clone(),
            agreement,
            flow,
            members: pm.members.clone(),
            int_keys: pm.int_keys.clone(),
        })
    }

    fn split_aske(&self, pm: &ProtocolMessage, flow: aske::Flow) -> Option<AskeMessage> {
        if pm.nonces.is_empty() && pm.signing_key.is_none() {
            return None;
        }
        Some(AskeMessage {
            source: pm.source.clone(),
            dest: pm.dest.clone(),
            flow,
            members: pm.members.clone(),
            nonces: pm.nonces.clone(),
            ephemeral_pub_keys: pm.pub_keys.clone(),
            session_signature: pm.session_signature,
            signing_key: pm.signing_key,
        })
    }

    /// Verify the outer framing signature against the source's published
    /// ephemeral key (fresh in this message, or already known from an
    /// earlier one in the same session).
    fn verify_framing(&self, decoded: &message::Decoded) -> Result<(), ProtocolError> {
        let pm = &decoded.message;
        let idx = pm.members.iter().position(|m| *m == pm.source);
        let ephemeral = match idx.and_then(|i| pm.pub_keys.get(i).copied()) {
            Some(k) => Some(k),
            None => {
                let known_idx = self.aske.members.iter().position(|m| *m == pm.source);
                known_idx.and_then(|i| self.aske.ephemeral_pub_keys.get(i).copied())
            }
        };
        let ephemeral = ephemeral.ok_or_else(|| {
            ProtocolError::ProtocolViolation(format!("no known ephemeral key for {}", pm.source))
        })?;
        ephemeral
            .verify(&decoded.signed_bytes, &decoded.signature)
            .map_err(crate::error::from_crypto)
    }

    /// Begin a session with `others`, relaying 1→2→…→n then broadcasting.
    pub fn start(&mut self, others: &[ParticipantId]) -> Result<String, ProtocolError> {
        let c = self.cliques.ika(others).map_err(crate::error::from_crypto)?;
        let a = self.aske.commit(others).map_err(crate::error::from_crypto)?;
        let pm = self.merge(Some(&c), Some(&a), frame::INIT_INITIATOR_UP)?;
        self.state = GreeterState::InitUpflow;
        Ok(self.sign_and_frame(&pm))
    }

    /// Include `new_members` into the current (READY) session.
    pub fn include(&mut self, new_members: &[ParticipantId]) -> Result<String, ProtocolError> {
        let c = self.cliques.aka_join(new_members).map_err(crate::error::from_crypto)?;
        let a = self.aske.aka_join(new_members).map_err(crate::error::from_crypto)?;
        let pm = self.merge(Some(&c), Some(&a), frame::INCLUDE_AUX_INITIATOR_UP)?;
        self.state = GreeterState::AuxUpflow;
        Ok(self.sign_and_frame(&pm))
    }

    /// Exclude `excluded` from the current session; they are not sent
    /// the resulting broadcast (they are no longer a member).
    pub fn exclude(&mut self, excluded: &[ParticipantId]) -> Result<String, ProtocolError> {
        let c = self.cliques.aka_exclude(excluded).map_err(crate::error::from_crypto)?;
        let a = self.aske.aka_exclude(excluded).map_err(crate::error::from_crypto)?;
        for e in excluded {
            self.events.push_back(GreeterEvent::Info(format!("{e} left the session")));
        }
        let pm = self.merge(Some(&c), Some(&a), frame::EXCLUDE_AUX_INITIATOR_DOWN)?;
        self.state = GreeterState::AuxDownflow;
        Ok(self.sign_and_frame(&pm))
    }

    /// Refresh own contribution without changing membership.
    pub fn refresh(&mut self) -> Result<String, ProtocolError> {
        let c = self.cliques.aka_refresh().map_err(crate::error::from_crypto)?;
        let a = self.aske.full_refresh().map_err(crate::error::from_crypto)?;
        let pm = self.merge(Some(&c), Some(&a), frame::REFRESH_AUX_INITIATOR_DOWN)?;
        self.state = GreeterState::AuxDownflow;
        Ok(self.sign_and_frame(&pm))
    }

    /// Leave the session, publishing the ephemeral signing key to waive
    /// deniability of this member's own past messages.
    pub fn quit(&mut self) -> Result<String, ProtocolError> {
        // Capture the ephemeral key before `aske.quit()` clears it: the
        // outer frame is still signed with it so a receiver who already
        // knows our ephemeral public key can verify this last message.
        let old_ephemeral = self.aske.ephemeral_priv_key.as_ref().map(|kp| kp.secret_bytes());
        let a = self.aske.quit();
        self.cliques.aka_quit();
        let pm = self.merge(None, Some(&a), frame::QUIT_DOWN)?;
        let signer = old_ephemeral.map(KeyPair::from_bytes).unwrap_or_else(KeyPair::generate);
        let content = message::encode(&pm, &signer);
        self.state = GreeterState::Quit;
        Ok(frame::encode_greet(frame::PROTOCOL_VERSION, &content))
    }

    /// Process one inbound wire string, returning an outbound reply (if
    /// any) to send back to the transport.
    pub fn process_message(&mut self, wire: &str) -> Result<Option<String>, ProtocolError> {
        if self.state == GreeterState::Quit {
            return Ok(None);
        }

        let parsed = match frame::decode_wire(wire) {
            Ok(p) => p,
            Err(e) => {
                self.fatal(e.to_string());
                return Err(e);
            }
        };

        let content = match parsed {
            WireMessage::Greet { version, content } => {
                if version != frame::PROTOCOL_VERSION {
                    let e = ProtocolError::UnknownVersion(version);
                    self.fatal(e.to_string());
                    return Err(e);
                }
                content
            }
            WireMessage::Error { body } => {
                self.events.push_back(GreeterEvent::Warn(format!("peer error: {body}")));
                self.state = GreeterState::Quit;
                return Ok(None);
            }
            WireMessage::Query { .. } | WireMessage::Plain(_) => {
                tracing::debug!("ignoring non-greet wire message");
                return Ok(None);
            }
            WireMessage::Data { .. } => {
                return Err(ProtocolError::MalformedFrame(
                    "data message delivered to greeter".into(),
                ))
            }
        };

        let decoded = match message::decode(&content) {
            Ok(d) => d,
            Err(e) => {
                self.fatal(e.to_string());
                return Err(e);
            }
        };

        let pm = &decoded.message;
        if let Some(dest) = &pm.dest {
            if *dest != self.id {
                return Ok(None); // WrongRecipient: silently dropped
            }
        }
        if !pm.members.contains(&self.id) {
            self.events.push_back(GreeterEvent::Error(format!(
                "{} not named in members, leaving session",
                self.id
            )));
            self.state = GreeterState::Quit;
            return Ok(None);
        }

        if let Err(e) = self.verify_framing(&decoded) {
            self.fatal(e.to_string());
            return Err(e);
        }

        let mut greet_type = pm.greet_type;
        if frame::bit_is_set(greet_type, frame::BIT_RECOVER) {
            self.recovering = true;
            for (i, m) in self.aske.members.clone().iter().enumerate() {
                if *m != self.id {
                    self.aske.authenticated_members[i] = false;
                }
            }
            self.state = GreeterState::InitDownflow;
            greet_type = frame::clear_bit(greet_type, frame::BIT_RECOVER).unwrap_or(greet_type);
        }

        let operation = operation_of(greet_type).ok_or_else(|| {
            ProtocolError::ProtocolViolation(format!("unrecognized greet type {greet_type:#x}"))
        })?;

        match operation {
            Operation::Quit => {
                self.events
                    .push_back(GreeterEvent::Info(format!("{} quit the session", pm.source)));
                Ok(None)
            }
            Operation::Init => self.process_upflow_or_downflow(pm, cliques::Agreement::Ika, greet_type),
            Operation::Include => self.process_upflow_or_downflow(pm, cliques::Agreement::Aka, greet_type),
            Operation::Exclude | Operation::Refresh => self.process_broadcast(pm),
        }
    }

    fn process_upflow_or_downflow(
        &mut self,
        pm: &ProtocolMessage,
        agreement: cliques::Agreement,
        greet_type: u16,
    ) -> Result<Option<String>, ProtocolError> {
        // `greet_type`'s bits don't track direction consistently across
        // the constants (the two Init "_DOWN" names are among the ones
        // with the DOWN bit clear). `dest` does: relay hops address a
        // specific next member, the completed broadcast addresses none.
        let down = message::is_broadcast(&pm.dest);
        if !down {
            let flow = cliques::Flow::Up;
            let c_sub = self.split_cliques(pm, agreement, flow);
            let a_sub = self.split_aske(pm, aske::Flow::Up);

            let c_out = match &c_sub {
                Some(c) => Some(self.cliques.upflow(c).map_err(crate::error::from_crypto)?),
                None => None,
            };
            let a_out = match &a_sub {
                Some(a) => Some(self.aske.upflow(a).map_err(crate::error::from_crypto)?),
                None => None,
            };

            let forwarded = c_out.as_ref().map(|m| m.flow == cliques::Flow::Up).unwrap_or(false);
            let out_greet_type = match (agreement, forwarded) {
                (cliques::Agreement::Ika, true) => frame::INIT_PARTICIPANT_UP,
                (cliques::Agreement::Ika, false) => frame::INIT_PARTICIPANT_DOWN,
                (cliques::Agreement::Aka, true) => frame::INCLUDE_AUX_PARTICIPANT_UP,
                (cliques::Agreement::Aka, false) => frame::INCLUDE_AUX_PARTICIPANT_DOWN,
            };
            self.state = if forwarded {
                GreeterState::InitUpflow
            } else {
                GreeterState::InitDownflow
            };
            let out = self.merge(c_out.as_ref(), a_out.as_ref(), out_greet_type)?;
            return Ok(Some(self.sign_and_frame(&out)));
        }

        let c_sub = self.split_cliques(pm, agreement, cliques::Flow::Down);
        if let Some(c) = &c_sub {
            self.cliques.downflow(c).map_err(crate::error::from_crypto)?;
        }
        let a_sub = self.split_aske(pm, aske::Flow::Down);
        let a_out = match &a_sub {
            Some(a) => self.aske.downflow(a).map_err(crate::error::from_crypto)?,
            None => None,
        };

        if self.aske.is_session_acknowledged() {
            self.state = GreeterState::Ready;
            self.recovering = false;
            self.events.push_back(GreeterEvent::Info("session ready".into()));
        }

        match a_out {
            Some(a) => {
                let out_greet_type = if self.aske.is_session_acknowledged() {
                    match agreement {
                        cliques::Agreement::Ika => frame::INIT_PARTICIPANT_CONFIRM_DOWN,
                        cliques::Agreement::Aka => frame::INCLUDE_AUX_INITIATOR_DOWN,
                    }
                } else {
                    match agreement {
                        cliques::Agreement::Ika => frame::INIT_PARTICIPANT_DOWN,
                        cliques::Agreement::Aka => frame::INCLUDE_AUX_PARTICIPANT_DOWN,
                    }
                };
                let out = self.merge(None, Some(&a), out_greet_type)?;
                Ok(Some(self.sign_and_frame(&out)))
            }
            None => Ok(None),
        }
    }

    fn process_broadcast(&mut self, pm: &ProtocolMessage) -> Result<Option<String>, ProtocolError> {
        let c_sub = self.split_cliques(pm, cliques::Agreement::Aka, cliques::Flow::Down);
        if let Some(c) = &c_sub {
            self.cliques.downflow(c).map_err(crate::error::from_crypto)?;
        }
        let a_sub = self.split_aske(pm, aske::Flow::Down);
        let a_out = match &a_sub {
            Some(a) => self.aske.downflow(a).map_err(crate::error::from_crypto)?,
            None => None,
        };

        if self.aske.is_session_acknowledged() {
            self.state = GreeterState::Ready;
            self.events.push_back(GreeterEvent::Info("session ready".into()));
        } else {
            self.state = GreeterState::AuxDownflow;
        }

        match a_out {
            Some(a) => {
                let greet_type = if pm.greet_type == frame::REFRESH_AUX_INITIATOR_DOWN {
                    frame::REFRESH_AUX_INITIATOR_DOWN
                } else {
                    frame::EXCLUDE_AUX_INITIATOR_DOWN
                };
                let out = self.merge(None, Some(&a), greet_type)?;
                Ok(Some(self.sign_and_frame(&out)))
            }
            None => Ok(None),
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

    fn build_greeters(ids: &[&str]) -> Vec<Greeter> {
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
            .map(|(id, sk)| Greeter::new(pid(id), sk, dir.clone(), PaddingSize::None))
            .collect()
    }

    fn drive_to_ready(greeters: &mut [Greeter]) {
        let ids: Vec<ParticipantId> = greeters.iter().map(|g| g.id.clone()).collect();
        let others = ids[1..].to_vec();
        let first = greeters[0].start(&others).unwrap();

        let mut queue: VecDeque<(usize, String)> = VecDeque::new();
        queue.push_back((0, first));

        while let Some((from, wire)) = queue.pop_front() {
            let _ = from;
            for g in greeters.iter_mut() {
                if let Some(reply) = g.process_message(&wire).unwrap() {
                    queue.push_back((0, reply));
                }
            }
        }
    }

    #[test]
    fn three_member_start_reaches_ready_with_shared_key() {
        let mut greeters = build_greeters(&["1", "2", "3"]);
        drive_to_ready(&mut greeters);

        for g in &greeters {
            assert_eq!(g.state, GreeterState::Ready);
            assert!(g.aske.is_session_acknowledged());
        }
        let key0 = greeters[0].cliques.group_key.unwrap();
        for g in &greeters {
            assert_eq!(g.cliques.group_key.unwrap(), key0);
        }
    }

    #[test]
    fn refresh_rekeys_without_changing_membership() {
        let mut greeters = build_greeters(&["1", "2", "3"]);
        drive_to_ready(&mut greeters);
        let old_key = greeters[0].cliques.group_key.unwrap();
        let old_sid = greeters[0].aske.session_id.unwrap();

        let first = greeters[1].refresh().unwrap();
        let mut queue: VecDeque<String> = VecDeque::new();
        queue.push_back(first);
        while let Some(wire) = queue.pop_front() {
            for g in greeters.iter_mut() {
                if let Some(reply) = g.process_message(&wire).unwrap() {
                    queue.push_back(reply);
                }
            }
        }

        for g in &greeters {
            assert_eq!(g.state, GreeterState::Ready);
            assert!(g.aske.is_session_acknowledged());
        }
        let new_key = greeters[0].cliques.group_key.unwrap();
        assert_ne!(new_key, old_key);
        for g in &greeters {
            assert_eq!(g.cliques.group_key.unwrap(), new_key);
        }
        assert_ne!(greeters[0].aske.session_id.unwrap(), old_sid);
    }

    #[test]
    fn quit_transitions_local_state_and_clears_cliques() {
        let mut greeters = build_greeters(&["1", "2"]);
        drive_to_ready(&mut greeters);
        greeters[0].quit().unwrap();
        assert_eq!(greeters[0].state, GreeterState::Quit);
        assert!(greeters[0].cliques.priv_key_list.is_empty());
    }

    #[test]
    fn process_message_on_quit_session_is_a_noop() {
        let mut greeters = build_greeters(&["1", "2"]);
        drive_to_ready(&mut greeters);
        greeters[0].quit().unwrap();
        assert_eq!(greeters[0].process_message("?mpENCv1:AA==.").unwrap(), None);
    }
}
