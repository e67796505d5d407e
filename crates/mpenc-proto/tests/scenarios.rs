//! Cross-module scenarios spanning the full Greeter + data-message flow,
//! mirroring a five-member session through start, include, exclude, and
//! a data message.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};

use mpenc_crypto::identity::KeyPair;
use mpenc_crypto::ParticipantId;
use mpenc_proto::data::{self, PaddingSize};
use mpenc_proto::greeter::{Greeter, GreeterState};

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
    let dir = {
        let dir_map = dir_map.clone();
        Arc::new(move |id: &ParticipantId| dir_map.lock().unwrap().get(id).copied())
    };

    ids.iter()
        .zip(static_keys)
        .map(|(id, sk)| Greeter::new(pid(id), sk, dir.clone(), PaddingSize::None))
        .collect()
}

fn broadcast_until_quiescent(greeters: &mut [Greeter], first: String) {
    let mut queue: VecDeque<String> = VecDeque::new();
    queue.push_back(first);
    while let Some(wire) = queue.pop_front() {
        for g in greeters.iter_mut() {
            if let Some(reply) = g.process_message(&wire).unwrap() {
                queue.push_back(reply);
            }
        }
    }
}

#[test]
fn s3_five_member_ika_agrees_on_group_key_via_greeter() {
    let ids = ["1", "2", "3", "4", "5"];
    let mut greeters = build_greeters(&ids);
    let others: Vec<ParticipantId> = ids[1..].iter().map(|i| pid(i)).collect();
    let first = greeters[0].start(&others).unwrap();
    broadcast_until_quiescent(&mut greeters, first);

    for g in &greeters {
        assert_eq!(g.state, GreeterState::Ready);
        assert_eq!(g.cliques.int_keys.len(), 5);
    }
    let key0 = greeters[0].cliques.group_key.unwrap();
    for g in &greeters {
        assert_eq!(g.cliques.group_key.unwrap(), key0);
    }
}

#[test]
fn s4_include_grows_group_with_new_shared_key() {
    let ids = ["1", "2", "3", "4", "5"];
    let mut greeters = build_greeters(&ids);
    let others: Vec<ParticipantId> = ids[1..].iter().map(|i| pid(i)).collect();
    let first = greeters[0].start(&others).unwrap();
    broadcast_until_quiescent(&mut greeters, first);
    let old_key = greeters[0].cliques.group_key.unwrap();
    let old_sid = greeters[0].aske.session_id.unwrap();

    let static_keys: Vec<KeyPair> = vec![KeyPair::generate(), KeyPair::generate()];
    let joiner_ids = ["6", "7"];
    let mut joiners: Vec<Greeter> = joiner_ids
        .iter()
        .zip(static_keys)
        .map(|(id, sk)| {
            Greeter::new(
                pid(id),
                sk,
                greeters[0].aske.static_pub_key_dir.clone(),
                PaddingSize::None,
            )
        })
        .collect();

    let initiator_idx = 3; // "4"
    let new_members: Vec<ParticipantId> = joiner_ids.iter().map(|i| pid(i)).collect();
    let first = greeters[initiator_idx].include(&new_members).unwrap();

    let mut queue: VecDeque<String> = VecDeque::new();
    queue.push_back(first);
    while let Some(wire) = queue.pop_front() {
        for g in greeters.iter_mut() {
            if let Some(reply) = g.process_message(&wire).unwrap() {
                queue.push_back(reply);
            }
        }
        for g in joiners.iter_mut() {
            if let Some(reply) = g.process_message(&wire).unwrap() {
                queue.push_back(reply);
            }
        }
    }

    let new_key = greeters[0].cliques.group_key.unwrap();
    assert_ne!(new_key, old_key);
    for g in greeters.iter().chain(joiners.iter()) {
        assert_eq!(g.cliques.group_key.unwrap(), new_key);
    }
    assert_ne!(greeters[0].aske.session_id.unwrap(), old_sid);
}

#[test]
fn s5_exclude_rejects_self_and_rekeys_remaining_members() {
    let ids = ["1", "2", "3", "4", "5"];
    let mut greeters = build_greeters(&ids);
    let others: Vec<ParticipantId> = ids[1..].iter().map(|i| pid(i)).collect();
    let first = greeters[0].start(&others).unwrap();
    broadcast_until_quiescent(&mut greeters, first);
    let old_key = greeters[0].cliques.group_key.unwrap();

    let err = greeters[2].cliques.aka_exclude(&[pid("3")]).unwrap_err();
    assert!(matches!(err, mpenc_crypto::CryptoError::ProtocolViolation(_)));

    let first = greeters[2].exclude(&[pid("1"), pid("4")]).unwrap();
    broadcast_until_quiescent(&mut greeters, first);

    let new_key = greeters
        .iter()
        .find(|g| g.id == pid("3"))
        .unwrap()
        .cliques
        .group_key
        .unwrap();
    assert_ne!(new_key, old_key);
    for g in greeters.iter().filter(|g| g.id != pid("1") && g.id != pid("4")) {
        assert_eq!(g.cliques.group_key.unwrap(), new_key);
    }
}

#[test]
fn s6_data_message_round_trips_with_and_without_padding() {
    let signer = KeyPair::generate();
    let group_key = [0xab; 32];
    let session_id = [0xcd; 32];
    let plaintext = b"Don't panic!";

    let wire = data::encode(plaintext, &group_key, &session_id, PaddingSize::None, &signer).unwrap();
    let recovered = data::decode(&wire, &group_key, &session_id, &signer.public()).unwrap();
    assert_eq!(recovered, plaintext);

    let padded_wire =
        data::encode(plaintext, &group_key, &session_id, PaddingSize::Fixed(32), &signer).unwrap();
    let recovered_padded =
        data::decode(&padded_wire, &group_key, &session_id, &signer.public()).unwrap();
    assert_eq!(recovered_padded, plaintext);
    assert!(padded_wire.len() > wire.len());
}
