//! ASKE — Authenticated Signature Key Exchange.
//!
//! Runs alongside CLIQUES, contributing a nonce and an ephemeral Ed25519
//! signing key per member. Once every member's nonce and ephemeral key
//! are known, each signs a session-acknowledgement with their long-term
//! (static) key, giving deniable authentication of the session without
//! binding any individual message to a long-term signature.

use std::sync::Arc;

use rand::rngs::OsRng;
use rand::RngCore;

use crate::error::CryptoError;
use crate::hash::session_id as compute_session_id;
use crate::identity::{KeyPair, PublicKey};
use crate::participant::ParticipantId;

const ACK_DOMAIN: &[u8] = b"acksig";

/// Lookup of long-term public keys by participant id. Read-only after
/// session start.
pub type KeyDirectory = Arc<dyn Fn(&ParticipantId) -> Option<PublicKey> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Up,
    Down,
}

/// An ASKE protocol message.
#[derive(Debug, Clone)]
pub struct AskeMessage {
    pub source: ParticipantId,
    pub dest: Option<ParticipantId>,
    pub flow: Flow,
    pub members: Vec<ParticipantId>,
    pub nonces: Vec<[u8; 32]>,
    pub ephemeral_pub_keys: Vec<PublicKey>,
    pub session_signature: Option<[u8; 64]>,
    /// Published only on quit, to retroactively waive deniability of the
    /// member's own past messages in this session.
    pub signing_key: Option<[u8; 32]>,
}

/// A member's record of a departed participant's ephemeral material.
#[derive(Debug, Clone)]
pub struct OldEphemeralKey {
    pub public: PublicKey,
    pub private: Option<[u8; 32]>,
    pub authenticated: bool,
}

pub struct AskeMember {
    pub id: ParticipantId,
    pub members: Vec<ParticipantId>,
    pub nonces: Vec<[u8; 32]>,
    pub ephemeral_pub_keys: Vec<PublicKey>,
    pub ephemeral_priv_key: Option<KeyPair>,
    pub nonce: [u8; 32],
    pub static_priv_key: KeyPair,
    pub static_pub_key_dir: KeyDirectory,
    pub session_id: Option<[u8; 32]>,
    pub authenticated_members: Vec<bool>,
    pub old_ephemeral_keys: std::collections::BTreeMap<ParticipantId, OldEphemeralKey>,
    acked: std::collections::BTreeSet<[u8; 32]>,
}

impl AskeMember {
    pub fn new(id: ParticipantId, static_priv_key: KeyPair, static_pub_key_dir: KeyDirectory) -> Self {
        Self {
            id,
            members: Vec::new(),
            nonces: Vec::new(),
            ephemeral_pub_keys: Vec::new(),
            ephemeral_priv_key: None,
            nonce: [0u8; 32],
            static_priv_key,
            static_pub_key_dir,
            session_id: None,
            authenticated_members: Vec::new(),
            old_ephemeral_keys: std::collections::BTreeMap::new(),
            acked: std::collections::BTreeSet::new(),
        }
    }

    fn own_index(&self) -> Result<usize, CryptoError> {
        self.members
            .iter()
            .position(|m| *m == self.id)
            .ok_or_else(|| CryptoError::ProtocolViolation("self not in members".into()))
    }

    fn check_no_duplicates(members: &[ParticipantId]) -> Result<(), CryptoError> {
        let mut seen = members.to_vec();
        seen.sort();
        seen.dedup();
        if seen.len() != members.len() {
            tracing::warn!(count = members.len(), "rejecting ASKE message with duplicate members");
            return Err(CryptoError::ProtocolViolation("duplicate members".into()));
        }
        Ok(())
    }

    fn recompute_session_id(&mut self) {
        let pairs: Vec<(Vec<u8>, [u8; 32])> = self
            .members
            .iter()
            .zip(self.nonces.iter())
            .map(|(m, n)| (m.as_bytes().to_vec(), *n))
            .collect();
        self.session_id = Some(compute_session_id(&pairs));
    }

    /// `is_session_acknowledged()` — true only once every member's
    /// acknowledgement has been verified.
    pub fn is_session_acknowledged(&self) -> bool {
        !self.authenticated_members.is_empty() && self.authenticated_members.iter().all(|&a| a)
    }

    fn ack_message(&self, sid: &[u8; 32], member_id: &ParticipantId, ephemeral_pub: &PublicKey, nonce: &[u8; 32]) -> Vec<u8> {
        let mut buf = Vec::with_capacity(ACK_DOMAIN.len() + member_id.as_bytes().len() + 32 + 32 + 32);
        buf.extend_from_slice(ACK_DOMAIN);
        buf.extend_from_slice(member_id.as_bytes());
        buf.extend_from_slice(&ephemeral_pub.to_bytes());
        buf.extend_from_slice(nonce);
        buf.extend_from_slice(sid);
        buf
    }

    /// Initiate a commit: like CLIQUES `ika`, produces an up message.
    pub fn commit(&mut self, other_members: &[ParticipantId]) -> Result<AskeMessage, CryptoError> {
        let mut members = vec![self.id.clone()];
        members.extend(other_members.iter().cloned());
        Self::check_no_duplicates(&members)?;

        let mut nonce = [0u8; 32];
        OsRng.fill_bytes(&mut nonce);
        let ephemeral = KeyPair::generate();

        self.members = members.clone();
        self.nonces = vec![nonce];
        self.ephemeral_pub_keys = vec![ephemeral.public()];
        self.nonce = nonce;
        let ephemeral_pub = ephemeral.public();
        self.ephemeral_priv_key = Some(ephemeral);
        self.authenticated_members = vec![false];

        Ok(AskeMessage {
            source: self.id.clone(),
            dest: other_members.first().cloned(),
            flow: Flow::Up,
            members,
            nonces: self.nonces.clone(),
            ephemeral_pub_keys: vec![ephemeral_pub],
            session_signature: None,
            signing_key: None,
        })
    }

    /// Append our nonce and ephemeral public key; forward, or broadcast
    /// down with our own session signature if we are last.
    pub fn upflow(&mut self, m: &AskeMessage) -> Result<AskeMessage, CryptoError> {
        if !m.members.contains(&self.id) {
            return Err(CryptoError::ProtocolViolation("self not in members".into()));
        }
        Self::check_no_duplicates(&m.members)?;
        if m.nonces.len() != m.ephemeral_pub_keys.len() {
            return Err(CryptoError::ProtocolViolation(
                "nonces/ephemeral_pub_keys length mismatch".into(),
            ));
        }

        let mut nonce = [0u8; 32];
        OsRng.fill_bytes(&mut nonce);
        let ephemeral = KeyPair::generate();

        self.members = m.members.clone();
        self.nonces = m.nonces.clone();
        self.nonces.push(nonce);
        self.ephemeral_pub_keys = m.ephemeral_pub_keys.clone();
        self.ephemeral_pub_keys.push(ephemeral.public());
        self.nonce = nonce;
        let ephemeral_pub = ephemeral.public();
        self.ephemeral_priv_key = Some(ephemeral);
        self.authenticated_members = vec![false; self.members.len()];

        let pos = self.own_index()?;
        let is_last = pos == self.members.len() - 1;

        if !is_last {
            Ok(AskeMessage {
                source: self.id.clone(),
                dest: Some(self.members[pos + 1].clone()),
                flow: Flow::Up,
                members: self.members.clone(),
                nonces: self.nonces.clone(),
                ephemeral_pub_keys: self.ephemeral_pub_keys.clone(),
                session_signature: None,
                signing_key: None,
            })
        } else {
            self.recompute_session_id();
            let sid = self.session_id.expect("just computed");
            let msg = self.ack_message(&sid, &self.id, &ephemeral_pub, &nonce);
            let sig = self.static_priv_key.sign(&msg);
            self.acked.insert(sid);
            self.authenticated_members[pos] = true;

            Ok(AskeMessage {
                source: self.id.clone(),
                dest: None,
                flow: Flow::Down,
                members: self.members.clone(),
                nonces: self.nonces.clone(),
                ephemeral_pub_keys: self.ephemeral_pub_keys.clone(),
                session_signature: Some(sig),
                signing_key: None,
            })
        }
    }

    /// Verify the broadcaster's signature; if we have not yet signed for
    /// this session, broadcast our own acknowledgement.
    pub fn downflow(&mut self, m: &AskeMessage) -> Result<Option<AskeMessage>, CryptoError> {
        if !m.members.contains(&self.id) {
            return Err(CryptoError::ProtocolViolation("self not in members".into()));
        }
        let prev_sid = self.session_id;
        self.members = m.members.clone();
        self.nonces = m.nonces.clone();
        self.ephemeral_pub_keys = m.ephemeral_pub_keys.clone();
        self.recompute_session_id();
        let sid = self.session_id.expect("just computed");
        // A membership change or a refresh both produce a new session id
        // (the nonce set changed); re-arm every member's ack flag so
        // `is_session_acknowledged` doesn't report stale acks from the
        // session this one replaced.
        if Some(sid) != prev_sid || self.authenticated_members.len() != self.members.len() {
            self.authenticated_members = vec![false; self.members.len()];
        }

        // The very first broadcast of a membership change (exclude,
        // refresh) carries no signature yet: it is an announcement, not
        // an ack. Every member, including the one who sent it, replies
        // with their own signed ack below; those carry a signature and
        // do get verified here.
        if let Some(sig) = m.session_signature {
            let source_idx = self
                .members
                .iter()
                .position(|mm| *mm == m.source)
                .ok_or_else(|| CryptoError::ProtocolViolation("unknown message source".into()))?;
            let source_static_key = (self.static_pub_key_dir)(&m.source)
                .ok_or_else(|| CryptoError::ProtocolViolation(format!("no static key for {}", m.source)))?;
            let ack = self.ack_message(&sid, &m.source, &self.ephemeral_pub_keys[source_idx], &self.nonces[source_idx]);
            source_static_key.verify(&ack, &sig)?;
            self.authenticated_members[source_idx] = true;
        }

        if self.acked.contains(&sid) {
            return Ok(None);
        }

        let own_idx = self.own_index()?;
        let ephemeral_pub = self.ephemeral_pub_keys[own_idx];
        let own_nonce = self.nonces[own_idx];
        let own_ack = self.ack_message(&sid, &self.id, &ephemeral_pub, &own_nonce);
        let own_sig = self.static_priv_key.sign(&own_ack);
        self.acked.insert(sid);
        self.authenticated_members[own_idx] = true;

        Ok(Some(AskeMessage {
            source: self.id.clone(),
            dest: None,
            flow: Flow::Down,
            members: self.members.clone(),
            nonces: self.nonces.clone(),
            ephemeral_pub_keys: self.ephemeral_pub_keys.clone(),
            session_signature: Some(own_sig),
            signing_key: None,
        }))
    }

    /// Move current members/nonces/keys aside as "old" and clear active
    /// session state, mirroring a CLIQUES membership change.
    fn archive_current_session(&mut self) {
        for (member, (nonce, pub_key)) in self
            .members
            .iter()
            .zip(self.nonces.iter().zip(self.ephemeral_pub_keys.iter()))
        {
            let _ = nonce;
            self.old_ephemeral_keys.insert(
                member.clone(),
                OldEphemeralKey {
                    public: *pub_key,
                    private: None,
                    authenticated: false,
                },
            );
        }
    }

    /// Mirror of `CliquesMember::aka_join`: fold new members into the
    /// session, starting a fresh nonce/ephemeral-key chain for them.
    pub fn aka_join(&mut self, new_members: &[ParticipantId]) -> Result<AskeMessage, CryptoError> {
        if new_members.is_empty() {
            return Err(CryptoError::ProtocolViolation("join with no members".into()));
        }
        self.archive_current_session();

        let mut combined = self.members.clone();
        combined.extend(new_members.iter().cloned());
        Self::check_no_duplicates(&combined)?;

        self.members = combined.clone();
        self.authenticated_members = vec![false; self.members.len()];
        self.acked.clear();

        Ok(AskeMessage {
            source: self.id.clone(),
            dest: Some(new_members[0].clone()),
            flow: Flow::Up,
            members: combined,
            nonces: self.nonces.clone(),
            ephemeral_pub_keys: self.ephemeral_pub_keys.clone(),
            session_signature: None,
            signing_key: None,
        })
    }

    /// Mirror of `CliquesMember::aka_exclude`.
    pub fn aka_exclude(&mut self, excluded: &[ParticipantId]) -> Result<AskeMessage, CryptoError> {
        if excluded.contains(&self.id) {
            return Err(CryptoError::ProtocolViolation("cannot exclude self".into()));
        }
        self.archive_current_session();

        let keep: Vec<usize> = self
            .members
            .iter()
            .enumerate()
            .filter(|(_, m)| !excluded.contains(m))
            .map(|(i, _)| i)
            .collect();
        self.members = keep.iter().map(|&i| self.members[i].clone()).collect();
        self.nonces = keep.iter().map(|&i| self.nonces[i]).collect();
        self.ephemeral_pub_keys = keep.iter().map(|&i| self.ephemeral_pub_keys[i]).collect();
        self.authenticated_members = vec![false; self.members.len()];
        self.acked.clear();
        self.recompute_session_id();

        Ok(AskeMessage {
            source: self.id.clone(),
            dest: None,
            flow: Flow::Down,
            members: self.members.clone(),
            nonces: self.nonces.clone(),
            ephemeral_pub_keys: self.ephemeral_pub_keys.clone(),
            session_signature: None,
            signing_key: None,
        })
    }

    /// Refresh own nonce and ephemeral key without changing membership,
    /// mirroring `CliquesMember::aka_refresh`'s single-round broadcast:
    /// every other member picks up the new values and replies with a
    /// fresh session acknowledgement via `downflow`.
    pub fn full_refresh(&mut self) -> Result<AskeMessage, CryptoError> {
        let own_idx = self.own_index()?;

        let mut nonce = [0u8; 32];
        OsRng.fill_bytes(&mut nonce);
        let ephemeral = KeyPair::generate();

        self.nonces[own_idx] = nonce;
        self.ephemeral_pub_keys[own_idx] = ephemeral.public();
        self.nonce = nonce;
        self.ephemeral_priv_key = Some(ephemeral);
        self.authenticated_members = vec![false; self.members.len()];
        self.recompute_session_id();

        Ok(AskeMessage {
            source: self.id.clone(),
            dest: None,
            flow: Flow::Down,
            members: self.members.clone(),
            nonces: self.nonces.clone(),
            ephemeral_pub_keys: self.ephemeral_pub_keys.clone(),
            session_signature: None,
            signing_key: None,
        })
    }

    /// Quit: publish our ephemeral private key, waiving deniability for
    /// our own past messages in this session, then clear session state.
    pub fn quit(&mut self) -> AskeMessage {
        let signing_key = self.ephemeral_priv_key.as_ref().map(|kp| kp.secret_bytes());
        let msg = AskeMessage {
            source: self.id.clone(),
            dest: None,
            flow: Flow::Down,
            members: self.members.clone(),
            nonces: Vec::new(),
            ephemeral_pub_keys: Vec::new(),
            session_signature: None,
            signing_key,
        };
        self.members.clear();
        self.nonces.clear();
        self.ephemeral_pub_keys.clear();
        self.ephemeral_priv_key = None;
        self.authenticated_members.clear();
        self.acked.clear();
        self.session_id = None;
        msg
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    fn directory(keys: BTreeMap<ParticipantId, PublicKey>) -> KeyDirectory {
        let keys = Mutex::new(keys);
        Arc::new(move |id: &ParticipantId| keys.lock().unwrap().get(id).copied())
    }

    fn pid(s: &str) -> ParticipantId {
        ParticipantId::from(s)
    }

    fn run_commit(ids: &[&str]) -> Vec<AskeMember> {
        let static_keys: Vec<KeyPair> = ids.iter().map(|_| KeyPair::generate()).collect();
        let mut dir_map = BTreeMap::new();
        for (id, key) in ids.iter().zip(static_keys.iter()) {
            dir_map.insert(pid(id), key.public());
        }
        let dir = directory(dir_map);

        let mut members: Vec<AskeMember> = ids
            .iter()
            .zip(static_keys)
            .map(|(id, sk)| AskeMember::new(pid(id), sk, dir.clone()))
            .collect();

        let others: Vec<ParticipantId> = ids[1..].iter().map(|i| pid(i)).collect();
        let mut msg = members[0].commit(&others).unwrap();
        for member in members.iter_mut().skip(1) {
            msg = member.upflow(&msg).unwrap();
        }

        // msg is now the final broadcast-down with the last member's sig.
        let mut pending = vec![msg];
        while let Some(next) = pending.pop() {
            for member in members.iter_mut() {
                if let Some(reply) = member.downflow(&next).unwrap() {
                    pending.push(reply);
                }
            }
        }
        members
    }

    #[test]
    fn session_id_matches_across_members_after_commit() {
        let members = run_commit(&["alice", "bob", "carol"]);
        let sid = members[0].session_id.unwrap();
        for m in &members {
            assert_eq!(m.session_id.unwrap(), sid);
        }
    }

    #[test]
    fn session_becomes_acknowledged_for_everyone() {
        let members = run_commit(&["alice", "bob", "carol"]);
        for m in &members {
            assert!(m.is_session_acknowledged());
        }
    }

    #[test]
    fn session_id_is_permutation_invariant() {
        let pairs_a = vec![(b"a".to_vec(), [1u8; 32]), (b"b".to_vec(), [2u8; 32])];
        let pairs_b = vec![(b"b".to_vec(), [2u8; 32]), (b"a".to_vec(), [1u8; 32])];
        assert_eq!(compute_session_id(&pairs_a), compute_session_id(&pairs_b));
    }

    #[test]
    fn quit_publishes_ephemeral_signing_key() {
        let mut members = run_commit(&["alice", "bob"]);
        let msg = members[0].quit();
        assert!(msg.signing_key.is_some());
        assert!(members[0].members.is_empty());
    }

    #[test]
    fn tampered_ack_signature_is_rejected() {
        let mut members = run_commit(&["alice", "bob"]);
        let sid = members[0].session_id.unwrap();
        let msg = AskeMessage {
            source: pid("bob"),
            dest: None,
            flow: Flow::Down,
            members: members[0].members.clone(),
            nonces: members[0].nonces.clone(),
            ephemeral_pub_keys: members[0].ephemeral_pub_keys.clone(),
            session_signature: Some([0u8; 64]),
            signing_key: None,
        };
        let _ = sid;
        assert!(members[0].downflow(&msg).is_err());
    }
}
