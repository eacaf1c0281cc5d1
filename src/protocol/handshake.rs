//! Connect request construction and handshake result processing.
//!
//! Each `start()` draws a fresh [`Handshake`] from the connection's generator:
//! a non-zero client id, the seed that drives the connect-request shuffle, and
//! a random alias the server echoes back in the world description so the
//! client can find its own player.

use crate::config::SessionConfig;
use crate::core::packet::{ConnectRequest, ConnectResult};
use crate::core::rng::JavaRandom;
use crate::error::{ProtocolError, Result};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, instrument, warn};

/// Length of the generated alias.
pub const ALIAS_LEN: usize = 16;

/// Alias characters are printable ASCII from `!` up to `~`.
const ALIAS_FIRST: u8 = 0x21;
const ALIAS_END: u8 = 0x7F;

/// Per-attempt handshake values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub client_id: i32,
    pub seed: i64,
    pub alias: String,
}

/// Session identifiers granted by a successful handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Established {
    pub client_id: i32,
    pub public_id: i32,
    pub private_id: i32,
    pub game_id: i32,
    pub session_seed: Option<i64>,
}

/// Verdict on a handshake result frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Accepted(Established),
    /// Addressed to another attempt; keep waiting.
    Stale { client_id: i32 },
}

impl Handshake {
    pub fn generate(rng: &mut JavaRandom) -> Self {
        let client_id = loop {
            let id = rng.next_int();
            if id != 0 {
                break id;
            }
        };
        let seed = rng.next_long();
        let alias = (0..ALIAS_LEN)
            .map(|_| {
                let offset = rng.next_int_bounded(i32::from(ALIAS_END - ALIAS_FIRST)) as u8;
                char::from(ALIAS_FIRST + offset)
            })
            .collect();

        Self {
            client_id,
            seed,
            alias,
        }
    }

    /// The connect request for this attempt.
    pub fn request(&self, session: &SessionConfig) -> Result<ConnectRequest> {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
            .unwrap_or_default();

        Ok(ConnectRequest {
            public_id: 0,
            rng_seed: self.seed,
            app_version: session.app_version,
            client_id: self.client_id,
            game_mode: session.game_mode,
            difficulty: session.difficulty,
            game_id: session.game_id,
            ticket: session.ticket.clone(),
            online_mode: session.online_mode,
            mayhem: session.mayhem,
            skin: session.skin,
            eject_skin: session.eject_skin,
            alias: self.alias.clone(),
            custom_skin: session.custom_skin,
            alias_colors: session.alias_colors.clone(),
            pet_id: session.pet_id,
            blob_color: session.blob_color,
            pet_name: session.pet_name.clone(),
            hat: session.hat,
            custom_pet: session.custom_pet,
            halo: session.halo,
            pet_id2: session.pet_id2,
            pet_name2: session.pet_name2.clone(),
            custom_pet2: session.custom_pet2,
            custom_particle: session.custom_particle,
            particle: session.particle,
            alias_font: session.alias_font,
            level_colors: session.level_colors.clone(),
            alias_anim: session.alias_anim,
            skin2: session.skin2,
            skin_interpolation_rate: session.skin_interpolation_rate,
            custom_skin2: session.custom_skin2,
            timestamp,
            secure_ticket: session.secure_ticket_bytes()?,
        })
    }

    /// Judge a handshake result.
    #[instrument(level = "debug", skip_all, fields(client_id = self.client_id))]
    pub fn verify(&self, result: &ConnectResult) -> Result<Verdict> {
        if result.client_id != self.client_id {
            warn!(
                received = result.client_id,
                "Handshake result for another client id"
            );
            return Ok(Verdict::Stale {
                client_id: result.client_id,
            });
        }

        if !result.result.is_success() {
            debug!(code = ?result.result, ban_length = result.ban_length, "Handshake rejected");
            return Err(ProtocolError::HandshakeRejected(result.result));
        }

        Ok(Verdict::Accepted(Established {
            client_id: result.client_id,
            public_id: result.public_id,
            private_id: result.private_id,
            game_id: result.game_id,
            session_seed: result.session_seed,
        }))
    }
}
