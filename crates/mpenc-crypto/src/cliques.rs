//! CLIQUES group Diffie-Hellman key agreement.
//!
//! A member's view of the group is a list of `int_keys` parallel to
//! `members`: entry *i* is member *i*'s cardinal key, the Curve25519
//! point that, multiplied by member *i*'s own scalar(s), reproduces the
//! shared group value. During an upflow the last entry of the array is
//! not yet anyone's cardinal — it is the running token, carried forward
//! and split off by the next member to process the message as their own
//! cardinal.

use crate::dh::{Point, Scalar};
use crate::error::CryptoError;
use crate::kdf::derive_group_key;
use crate::participant::ParticipantId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Up,
    Down,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Agreement {
    Ika,
    Aka,
}

/// A CLIQUES protocol message, as exchanged between members.
#[derive(Debug, Clone)]
pub struct CliquesMessage {
    pub source: ParticipantId,
    pub dest: Option<ParticipantId>,
    pub agreement: Agreement,
    pub flow: Flow,
    pub members: Vec<ParticipantId>,
    pub int_keys: Vec<Point>,
}

/// One participant's CLIQUES state.
pub struct CliquesMember {
    pub id: ParticipantId,
    pub members: Vec<ParticipantId>,
    pub priv_key_list: Vec<Scalar>,
    pub int_keys: Vec<Point>,
    pub group_key: Option<[u8; 32]>,
}

impl CliquesMember {
    pub fn new(id: ParticipantId) -> Self {
        Self {
            id,
            members: Vec::new(),
            priv_key_list: Vec::new(),
            int_keys: Vec::new(),
            group_key: None,
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
            tracing::warn!(count = members.len(), "rejecting CLIQUES message with duplicate members");
            return Err(CryptoError::ProtocolViolation("duplicate members".into()));
        }
        Ok(())
    }

    /// Raw Curve25519 shared value: fold every scalar this member has
    /// ever pushed (original plus any refreshes) over its own cardinal.
    fn fold_shared(&self, cardinal: &Point) -> Point {
        self.priv_key_list
            .iter()
            .fold(cardinal.clone(), |acc, s| s.multiply(&acc))
    }

    fn finalize_group_key(&mut self) -> Result<(), CryptoError> {
        let idx = self.own_index()?;
        let cardinal = self.int_keys[idx].clone();
        let shared = self.fold_shared(&cardinal);
        self.group_key = Some(derive_group_key(&shared.to_bytes())?);
        Ok(())
    }

    /// Initiate an IKA round: `self` plus `other_members`, relayed in
    /// list order.
    pub fn ika(&mut self, other_members: &[ParticipantId]) -> Result<CliquesMessage, CryptoError> {
        let mut members = vec![self.id.clone()];
        members.extend(other_members.iter().cloned());
        Self::check_no_duplicates(&members)?;

        let scalar = Scalar::generate();
        self.priv_key_list = vec![scalar];
        self.members = members.clone();
        self.int_keys = vec![Point::generator(), self.priv_key_list[0].public_point()];

        let dest = other_members.first().cloned();
        Ok(CliquesMessage {
            source: self.id.clone(),
            dest,
            agreement: Agreement::Ika,
            flow: Flow::Up,
            members,
            int_keys: self.int_keys.clone(),
        })
    }

    /// Advance a pending chain (IKA upflow, or an AKA-join relay) by one
    /// step: raise every pending cardinal by a fresh scalar, split the
    /// trailing token off as this member's own cardinal, and — unless
    /// this member is last — append a new token for the next hop.
    fn advance_chain(
        &mut self,
        incoming_members: &[ParticipantId],
        incoming_int_keys: &[Point],
    ) -> Result<Vec<Point>, CryptoError> {
        if incoming_int_keys.is_empty() {
            return Err(CryptoError::ProtocolViolation("empty int_keys".into()));
        }
        if incoming_int_keys.len() > incoming_members.len() {
            return Err(CryptoError::ProtocolViolation(
                "int_keys longer than members".into(),
            ));
        }

        let scalar = Scalar::generate();
        self.priv_key_list.push(scalar);
        let scalar = self.priv_key_list.last().expect("just pushed");

        let (pendings, token) = incoming_int_keys.split_at(incoming_int_keys.len() - 1);
        let token = token[0].clone();

        let mut raised: Vec<Point> = pendings.iter().map(|p| scalar.multiply(p)).collect();
        let is_last = incoming_int_keys.len() == incoming_members.len();

        raised.push(token.clone());
        if !is_last {
            raised.push(scalar.multiply(&token));
        }
        Ok(raised)
    }

    /// Process an inbound IKA or AKA-join upflow message.
    pub fn upflow(&mut self, m: &CliquesMessage) -> Result<CliquesMessage, CryptoError> {
        if !m.members.contains(&self.id) {
            return Err(CryptoError::ProtocolViolation("self not in members".into()));
        }
        Self::check_no_duplicates(&m.members)?;

        let new_int_keys = self.advance_chain(&m.members, &m.int_keys)?;
        self.members = m.members.clone();
        self.int_keys = new_int_keys;

        let pos = self.own_index()?;
        let is_last = pos == self.members.len() - 1;

        if !is_last {
            Ok(CliquesMessage {
                source: self.id.clone(),
                dest: Some(self.members[pos + 1].clone()),
                agreement: m.agreement,
                flow: Flow::Up,
                members: self.members.clone(),
                int_keys: self.int_keys.clone(),
            })
        } else {
            self.finalize_group_key()?;
            Ok(CliquesMessage {
                source: self.id.clone(),
                dest: None,
                agreement: m.agreement,
                flow: Flow::Down,
                members: self.members.clone(),
                int_keys: self.int_keys.clone(),
            })
        }
    }

    /// Process an inbound broadcast downflow: take the cardinal at our
    /// own position, fold our scalars over it, derive the group key.
    pub fn downflow(&mut self, m: &CliquesMessage) -> Result<(), CryptoError> {
        if !m.members.contains(&self.id) {
            return Err(CryptoError::ProtocolViolation("self not in members".into()));
        }
        Self::check_no_duplicates(&m.members)?;
        if m.int_keys.len() != m.members.len() {
            return Err(CryptoError::ProtocolViolation(
                "int_keys length mismatch on downflow".into(),
            ));
        }
        self.members = m.members.clone();
        self.int_keys = m.int_keys.clone();
        self.finalize_group_key()
    }

    /// Include `new_members`, extending the current group.
    pub fn aka_join(&mut self, new_members: &[ParticipantId]) -> Result<CliquesMessage, CryptoError> {
        if new_members.is_empty() {
            return Err(CryptoError::ProtocolViolation("join with no members".into()));
        }
        let mut combined = self.members.clone();
        combined.extend(new_members.iter().cloned());
        Self::check_no_duplicates(&combined)?;

        let own_idx = self.own_index()?;
        let own_cardinal = self.int_keys[own_idx].clone();
        let raw_shared = self.fold_shared(&own_cardinal);

        let fresh = Scalar::generate();

        let mut pendings: Vec<Point> = self
            .int_keys
            .iter()
            .enumerate()
            .map(|(i, p)| if i == own_idx { p.clone() } else { fresh.multiply(p) })
            .collect();
        let new_token = fresh.multiply(&raw_shared);

        self.priv_key_list.push(fresh);
        self.members = combined.clone();
        pendings.push(new_token);
        self.int_keys = pendings;

        Ok(CliquesMessage {
            source: self.id.clone(),
            dest: Some(new_members[0].clone()),
            agreement: Agreement::Aka,
            flow: Flow::Up,
            members: combined,
            int_keys: self.int_keys.clone(),
        })
    }

    /// Exclude members, refreshing own contribution so excluded members
    /// cannot derive the new group key from past state.
    pub fn aka_exclude(&mut self, excluded: &[ParticipantId]) -> Result<CliquesMessage, CryptoError> {
        if excluded.contains(&self.id) {
            return Err(CryptoError::ProtocolViolation("cannot exclude self".into()));
        }
        for e in excluded {
            if !self.members.contains(e) {
                return Err(CryptoError::ProtocolViolation(format!(
                    "cannot exclude unknown member {e}"
                )));
            }
        }

        let new_members: Vec<ParticipantId> = self
            .members
            .iter()
            .filter(|m| !excluded.contains(m))
            .cloned()
            .collect();
        let kept_int_keys: Vec<Point> = self
            .members
            .iter()
            .zip(self.int_keys.iter())
            .filter(|(m, _)| !excluded.contains(m))
            .map(|(_, k)| k.clone())
            .collect();

        self.refresh_cardinals(new_members, kept_int_keys)
    }

    /// Refresh own contribution without changing membership.
    pub fn aka_refresh(&mut self) -> Result<CliquesMessage, CryptoError> {
        let members = self.members.clone();
        let int_keys = self.int_keys.clone();
        self.refresh_cardinals(members, int_keys)
    }

    fn refresh_cardinals(
        &mut self,
        members: Vec<ParticipantId>,
        int_keys: Vec<Point>,
    ) -> Result<CliquesMessage, CryptoError> {
        let own_idx = members
            .iter()
            .position(|m| *m == self.id)
            .ok_or_else(|| CryptoError::ProtocolViolation("self not in members".into()))?;

        let fresh = Scalar::generate();
        let new_int_keys: Vec<Point> = int_keys
            .iter()
            .enumerate()
            .map(|(i, k)| if i == own_idx { k.clone() } else { fresh.multiply(k) })
            .collect();

        self.priv_key_list.push(fresh);
        self.members = members.clone();
        self.int_keys = new_int_keys;
        self.finalize_group_key()?;

        Ok(CliquesMessage {
            source: self.id.clone(),
            dest: None,
            agreement: Agreement::Aka,
            flow: Flow::Down,
            members,
            int_keys: self.int_keys.clone(),
        })
    }

    /// Remove self from the group and clear private scalar material.
    /// Dropping each `Scalar` zeroizes its bytes via the underlying
    /// `x25519_dalek::StaticSecret`.
    pub fn aka_quit(&mut self) {
        self.priv_key_list.clear();
        self.members.clear();
        self.int_keys.clear();
        self.group_key = None;
    }
}
