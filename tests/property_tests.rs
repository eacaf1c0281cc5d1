#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! Property-based tests for the generator, transforms, codec and world state.

use nebulous_client::core::codec::PacketCodec;
use nebulous_client::core::packet::{GameChatMessage, Packet, WorldUpdate};
use nebulous_client::core::registry::Registry;
use nebulous_client::core::rng::JavaRandom;
use nebulous_client::core::transform::{ConnectShuffle, PayloadTransform, XorKeystream};
use nebulous_client::session::{Delta, EntityFields, EntityId, EntityKind, Session};
use proptest::prelude::*;
use std::collections::BTreeSet;
use std::sync::Arc;

fn codecs(seed: Option<i64>) -> (PacketCodec, PacketCodec) {
    let registry = Arc::new(Registry::standard().expect("standard registry"));
    let mut client = PacketCodec::client(registry.clone());
    let mut server = PacketCodec::server(registry);
    if let Some(seed) = seed {
        client.set_transforms(
            Box::new(XorKeystream::new(seed)),
            Box::new(XorKeystream::new(seed)),
        );
        server.set_transforms(
            Box::new(XorKeystream::new(seed)),
            Box::new(XorKeystream::new(seed)),
        );
    }
    (client, server)
}

fn fields_strategy() -> impl Strategy<Value = EntityFields> {
    (
        proptest::option::of(0u8..6),
        proptest::option::of((-1.0e6f32..1.0e6, -1.0e6f32..1.0e6)),
        proptest::option::of(0.0f32..1.0e4),
        proptest::option::of(any::<u32>()),
        proptest::option::of(any::<u32>()),
        proptest::option::of(any::<u8>()),
        proptest::option::of("[a-zA-Z0-9 ]{0,16}"),
    )
        .prop_map(|(kind, position, size, color, owner, flags, name)| EntityFields {
            kind: kind.map(EntityKind::from_u8),
            position,
            size,
            color,
            owner,
            flags,
            name,
        })
}

fn delta_strategy() -> impl Strategy<Value = Delta> {
    let id = (0u32..8).prop_map(EntityId);
    prop_oneof![
        (id.clone(), fields_strategy()).prop_map(|(id, fields)| Delta::Add { id, fields }),
        (id.clone(), fields_strategy()).prop_map(|(id, fields)| Delta::Update { id, fields }),
        id.prop_map(|id| Delta::Remove { id }),
    ]
}

// ============================================================================
// Generator
// ============================================================================

proptest! {
    #[test]
    fn prop_java_random_deterministic(seed in any::<i64>(), bound in 1i32..i32::MAX) {
        let mut a = JavaRandom::new(seed);
        let mut b = JavaRandom::new(seed);
        for _ in 0..32 {
            prop_assert_eq!(a.next_int(), b.next_int());
            prop_assert_eq!(a.next_long(), b.next_long());
            let bounded = a.next_int_bounded(bound);
            prop_assert_eq!(bounded, b.next_int_bounded(bound));
            prop_assert!((0..bound).contains(&bounded));
        }
        prop_assert_eq!(a.state(), b.state());
        prop_assert!(a.state() < 1 << 48);
    }
}

proptest! {
    #[test]
    fn prop_reseed_restarts_sequence(seed in any::<i64>(), draws in 0usize..64) {
        let mut rng = JavaRandom::new(seed);
        let first: Vec<i32> = (0..8).map(|_| rng.next_int()).collect();
        for _ in 0..draws {
            rng.next_long();
        }
        rng.set_seed(seed);
        let again: Vec<i32> = (0..8).map(|_| rng.next_int()).collect();
        prop_assert_eq!(first, again);
    }
}

// ============================================================================
// Transforms
// ============================================================================

proptest! {
    #[test]
    fn prop_keystream_lockstep_across_frames(
        seed in any::<i64>(),
        frames in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..64), 0..16),
    ) {
        let mut sender = XorKeystream::new(seed);
        let mut receiver = XorKeystream::new(seed);
        let mut whole = XorKeystream::new(seed);

        let mut wire_concat = Vec::new();
        for frame in &frames {
            let mut wire = frame.clone();
            sender.apply(&mut wire);
            wire_concat.extend_from_slice(&wire);
            receiver.reverse(&mut wire);
            prop_assert_eq!(&wire, frame);
        }

        // The keystream depends only on the byte position, not on framing.
        let mut concat: Vec<u8> = frames.concat();
        whole.apply(&mut concat);
        prop_assert_eq!(concat, wire_concat);
    }
}

proptest! {
    #[test]
    fn prop_skip_keeps_alignment(
        seed in any::<i64>(),
        dropped in prop::collection::vec(any::<u8>(), 0..128),
        kept in prop::collection::vec(any::<u8>(), 0..128),
    ) {
        let mut sender = XorKeystream::new(seed);
        let mut receiver = XorKeystream::new(seed);

        let mut first = dropped.clone();
        sender.apply(&mut first);
        receiver.skip(first.len());

        let mut second = kept.clone();
        sender.apply(&mut second);
        receiver.reverse(&mut second);
        prop_assert_eq!(second, kept);
    }
}

proptest! {
    #[test]
    fn prop_connect_shuffle_reversible(payload in prop::collection::vec(any::<u8>(), 0..300)) {
        let mut shuffled = payload.clone();
        ConnectShuffle.apply(&mut shuffled);

        // Clear header and byte multiset survive.
        let header = payload.len().min(ConnectShuffle::BODY_OFFSET);
        prop_assert_eq!(&shuffled[..header], &payload[..header]);
        let mut sorted_in = payload.clone();
        let mut sorted_out = shuffled.clone();
        sorted_in.sort_unstable();
        sorted_out.sort_unstable();
        prop_assert_eq!(sorted_in, sorted_out);

        ConnectShuffle.reverse(&mut shuffled);
        prop_assert_eq!(shuffled, payload);
    }
}

// ============================================================================
// Codec
// ============================================================================

proptest! {
    #[test]
    fn prop_world_update_survives_the_wire(
        seed in proptest::option::of(any::<i64>()),
        tick in any::<u32>(),
        deltas in prop::collection::vec(delta_strategy(), 0..24),
    ) {
        let (mut client, mut server) = codecs(seed);
        let packet = Packet::WorldUpdate(WorldUpdate { tick, deltas });

        let frame = server.encode_packet(&packet).expect("encode");
        prop_assert_eq!(client.decode_frame(&frame).expect("decode"), packet);
    }
}

proptest! {
    #[test]
    fn prop_chat_text_survives_the_wire(
        seed in any::<i64>(),
        message in "\\PC{0,200}",
        alias in "\\PC{0,16}",
    ) {
        let (mut client, mut server) = codecs(Some(seed));
        let packet = Packet::GameChat(GameChatMessage {
            alias,
            message,
            account_id: -1,
            client_id: Some(7),
            ..GameChatMessage::default()
        });

        let frame = client.encode_packet(&packet).expect("encode");
        prop_assert_eq!(server.decode_frame(&frame).expect("decode"), packet);
    }
}

proptest! {
    #[test]
    fn prop_decode_never_panics(frame in prop::collection::vec(any::<u8>(), 0..512)) {
        let (mut client, mut server) = codecs(Some(1));
        let _ = client.decode_frame(&frame);
        let _ = server.decode_frame(&frame);
    }
}

// ============================================================================
// World state
// ============================================================================

proptest! {
    #[test]
    fn prop_session_membership_matches_model(
        deltas in prop::collection::vec(delta_strategy(), 0..64),
    ) {
        let mut session = Session::new();
        let mut model = BTreeSet::new();
        for delta in &deltas {
            session.apply_delta(delta);
            match delta {
                Delta::Add { id, .. } | Delta::Update { id, .. } => {
                    model.insert(*id);
                }
                Delta::Remove { id } => {
                    model.remove(id);
                }
            }
        }

        let snapshot = session.snapshot();
        let present: BTreeSet<EntityId> = snapshot.entities.keys().copied().collect();
        prop_assert_eq!(present, model);
    }
}

proptest! {
    #[test]
    fn prop_batch_equals_one_by_one(deltas in prop::collection::vec(delta_strategy(), 0..64)) {
        let mut batched = Session::new();
        batched.apply_batch(&deltas);

        let mut single = Session::new();
        for delta in &deltas {
            single.apply_delta(delta);
        }

        let (batched, single) = (batched.snapshot(), single.snapshot());
        prop_assert_eq!(&batched.entities, &single.entities);
    }
}
