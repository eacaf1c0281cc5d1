//! # Payload Transforms
//!
//! Reversible byte-level obfuscation applied to a frame's payload (everything
//! after the opcode byte). The concrete scheme is pluggable: a connection
//! asks its [`TransformFactory`] for a send/receive pair once the handshake
//! has produced a seed.
//!
//! - [`XorKeystream`]: XOR with one `next_bits(8)` draw per byte. Sender and
//!   receiver generators advance by exactly the payload length, so they stay
//!   in lockstep as long as no frame is skipped.
//! - [`ConnectShuffle`]: the connect request's Fisher-Yates permutation,
//!   seeded from the clear header of the same frame.
//! - [`Identity`]: no-op, used before the handshake and when the server does
//!   not supply a session seed.

use crate::core::rng::JavaRandom;
use std::fmt;

pub trait PayloadTransform: Send + fmt::Debug {
    fn name(&self) -> &'static str;

    /// Obfuscate an outgoing payload in place.
    fn apply(&mut self, payload: &mut [u8]);

    /// Undo [`apply`](Self::apply) on an incoming payload in place.
    fn reverse(&mut self, payload: &mut [u8]);

    /// Advance any internal state as if a payload of `len` bytes had been
    /// reversed, without producing output. Used for frames that are dropped
    /// (unknown opcodes) so the keystream stays aligned with the peer.
    fn skip(&mut self, len: usize) {
        let mut scratch = vec![0u8; len];
        self.reverse(&mut scratch);
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Identity;

impl PayloadTransform for Identity {
    fn name(&self) -> &'static str {
        "identity"
    }

    fn apply(&mut self, _payload: &mut [u8]) {}

    fn reverse(&mut self, _payload: &mut [u8]) {}

    fn skip(&mut self, _len: usize) {}
}

#[derive(Debug, Clone)]
pub struct XorKeystream {
    rng: JavaRandom,
}

impl XorKeystream {
    pub fn new(seed: i64) -> Self {
        Self {
            rng: JavaRandom::new(seed),
        }
    }

    fn xor(&mut self, payload: &mut [u8]) {
        for byte in payload {
            *byte ^= self.rng.next_bits(8) as u8;
        }
    }
}

impl PayloadTransform for XorKeystream {
    fn name(&self) -> &'static str {
        "xor-keystream"
    }

    fn apply(&mut self, payload: &mut [u8]) {
        self.xor(payload);
    }

    fn reverse(&mut self, payload: &mut [u8]) {
        self.xor(payload);
    }

    fn skip(&mut self, len: usize) {
        for _ in 0..len {
            self.rng.next_bits(8);
        }
    }
}

/// Byte permutation used by the connect request.
///
/// Payload layout (after the opcode): `[public id: 4][seed: i64 BE][body…]`.
/// The body is shuffled with a generator seeded by the clear `seed`; the first
/// twelve payload bytes are never moved.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConnectShuffle;

impl ConnectShuffle {
    /// Payload offset of the handshake seed.
    pub const SEED_OFFSET: usize = 4;
    /// Payload offset of the first shuffled byte.
    pub const BODY_OFFSET: usize = 12;

    pub fn seed_of(payload: &[u8]) -> Option<i64> {
        let bytes = payload.get(Self::SEED_OFFSET..Self::BODY_OFFSET)?;
        let mut seed = [0u8; 8];
        seed.copy_from_slice(bytes);
        Some(i64::from_be_bytes(seed))
    }

    fn swaps(payload: &[u8]) -> Vec<(usize, usize)> {
        let Some(seed) = Self::seed_of(payload) else {
            return Vec::new();
        };
        let body_len = payload.len() - Self::BODY_OFFSET;
        let mut rng = JavaRandom::new(seed);

        (1..body_len)
            .rev()
            .map(|i| {
                let j = rng.next_int_bounded(i as i32 + 1) as usize;
                (Self::BODY_OFFSET + i, Self::BODY_OFFSET + j)
            })
            .collect()
    }
}

impl PayloadTransform for ConnectShuffle {
    fn name(&self) -> &'static str {
        "connect-shuffle"
    }

    fn apply(&mut self, payload: &mut [u8]) {
        for (a, b) in Self::swaps(payload) {
            payload.swap(a, b);
        }
    }

    fn reverse(&mut self, payload: &mut [u8]) {
        for (a, b) in Self::swaps(payload).into_iter().rev() {
            payload.swap(a, b);
        }
    }

    fn skip(&mut self, _len: usize) {}
}

/// Produces the per-connection session transforms.
pub trait TransformFactory: Send + Sync + fmt::Debug {
    /// Return `(send, receive)` transforms for a session whose handshake
    /// carried `seed` (or none).
    fn session(&self, seed: Option<i64>) -> (Box<dyn PayloadTransform>, Box<dyn PayloadTransform>);
}

/// Default factory: independent keystreams per direction, seeded identically,
/// or plain frames when the server sends no seed.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeystreamFactory;

impl TransformFactory for KeystreamFactory {
    fn session(&self, seed: Option<i64>) -> (Box<dyn PayloadTransform>, Box<dyn PayloadTransform>) {
        match seed {
            Some(seed) => (
                Box::new(XorKeystream::new(seed)),
                Box::new(XorKeystream::new(seed)),
            ),
            None => (Box::new(Identity), Box::new(Identity)),
        }
    }
}

/// Factory that never obfuscates.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainFactory;

impl TransformFactory for PlainFactory {
    fn session(&self, _seed: Option<i64>) -> (Box<dyn PayloadTransform>, Box<dyn PayloadTransform>) {
        (Box::new(Identity), Box::new(Identity))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keystream_is_reversible_and_lockstep() {
        let mut sender = XorKeystream::new(99);
        let mut receiver = XorKeystream::new(99);

        for len in [0usize, 1, 7, 64] {
            let original: Vec<u8> = (0..len as u8).collect();
            let mut wire = original.clone();
            sender.apply(&mut wire);
            if len > 4 {
                assert_ne!(wire, original);
            }
            receiver.reverse(&mut wire);
            assert_eq!(wire, original);
        }
    }

    #[test]
    fn test_keystream_matches_generator_bytes() {
        let mut stream = XorKeystream::new(42);
        let mut payload = [0u8; 8];
        stream.apply(&mut payload);
        assert_eq!(payload, [186, 13, 174, 12, 79, 241, 70, 181]);
    }

    #[test]
    fn test_wrong_seed_does_not_decode() {
        let mut sender = XorKeystream::new(1);
        let mut receiver = XorKeystream::new(2);
        let original = b"hello world".to_vec();
        let mut wire = original.clone();
        sender.apply(&mut wire);
        receiver.reverse(&mut wire);
        assert_ne!(wire, original);
    }

    #[test]
    fn test_skip_keeps_alignment() {
        let mut sender = XorKeystream::new(5);
        let mut receiver = XorKeystream::new(5);

        let mut dropped = vec![1u8; 10];
        sender.apply(&mut dropped);
        receiver.skip(dropped.len());

        let mut wire = b"after".to_vec();
        sender.apply(&mut wire);
        receiver.reverse(&mut wire);
        assert_eq!(wire, b"after");
    }

    #[test]
    fn test_shuffle_keeps_header_and_reverses() {
        let mut payload = vec![0u8; 4];
        payload.extend_from_slice(&0x0123_4567_89AB_CDEFi64.to_be_bytes());
        payload.extend((0u8..40).map(|b| b.wrapping_mul(3)));
        let original = payload.clone();

        let mut shuffle = ConnectShuffle;
        shuffle.apply(&mut payload);
        assert_eq!(&payload[..12], &original[..12]);
        assert_ne!(payload, original);

        let mut sorted_a = payload[12..].to_vec();
        let mut sorted_b = original[12..].to_vec();
        sorted_a.sort_unstable();
        sorted_b.sort_unstable();
        assert_eq!(sorted_a, sorted_b);

        shuffle.reverse(&mut payload);
        assert_eq!(payload, original);
    }

    #[test]
    fn test_shuffle_short_payload_untouched() {
        let mut payload = vec![1, 2, 3];
        ConnectShuffle.apply(&mut payload);
        assert_eq!(payload, vec![1, 2, 3]);
    }
}
