//! # Typed Packets
//!
//! The packet set the client understands, with one schema per
//! `(opcode, direction)` pair.
//!
//! Every frame is `[opcode u8][payload]`; the payload is big-endian and laid
//! out exactly as the schema lists its fields. Packets that travel both ways
//! (disconnect, chat) share a struct; their server-to-client schema marks the
//! client-only trailer as optional.
//!
//! Schemas that are registered without a typed counterpart decode into
//! [`Packet::Generic`].

use crate::core::registry::{Direction, Envelope};
use crate::core::schema::{Count, FieldType, LenPrefix, Record, Schema, Value};
use crate::error::{ProtocolError, Result};
use crate::session::{Delta, EntityFields, EntityId, EntityKind};
use serde::{Deserialize, Serialize};
use std::f32::consts::TAU;
use std::net::Ipv4Addr;

/// Opcodes of the standard packet set.
pub mod opcode {
    pub const CONNECT_RESULT: u8 = 1;
    pub const CONTROL: u8 = 2;
    pub const KEEP_ALIVE: u8 = 3;
    pub const DISCONNECT: u8 = 7;
    pub const GAME_CHAT_MESSAGE: u8 = 8;
    pub const CLAN_CHAT_MESSAGE: u8 = 9;
    pub const WORLD_UPDATE: u8 = 22;
    pub const GAME_DATA: u8 = 75;
    pub const CONNECT_REQUEST: u8 = 118;
}

/// Range of the quantized skin interpolation rate.
const INTERPOLATION_RANGE: f32 = 60.0;
/// Range of the quantized eject mass.
pub const EJECT_MASS_RANGE: f64 = 500_000.0;
/// Full scale of a 3-byte quantized coordinate.
const U24_SCALE: f64 = 16_777_215.0;

fn int(v: impl Into<i64>) -> Value {
    Value::Int(v.into())
}

fn float(v: f32) -> Value {
    Value::Float(f64::from(v))
}

fn text(v: &str) -> Value {
    Value::Str(v.to_string())
}

fn blob(v: &[u8]) -> Value {
    Value::Bytes(v.to_vec())
}

fn count(len: usize) -> Value {
    Value::Int(i64::try_from(len).unwrap_or(i64::MAX))
}

fn color_bytes() -> FieldType {
    FieldType::Bytes(LenPrefix::U8)
}

/// Server verdict on a connect request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectResultCode {
    Success,
    GameNotFound,
    Unknown,
    AccountAlreadySignedIn,
    Other(u8),
}

impl ConnectResultCode {
    pub fn from_u8(raw: u8) -> Self {
        match raw {
            0 => ConnectResultCode::Success,
            1 => ConnectResultCode::GameNotFound,
            2 => ConnectResultCode::Unknown,
            3 => ConnectResultCode::AccountAlreadySignedIn,
            other => ConnectResultCode::Other(other),
        }
    }

    pub fn to_u8(self) -> u8 {
        match self {
            ConnectResultCode::Success => 0,
            ConnectResultCode::GameNotFound => 1,
            ConnectResultCode::Unknown => 2,
            ConnectResultCode::AccountAlreadySignedIn => 3,
            ConnectResultCode::Other(raw) => raw,
        }
    }

    pub fn is_success(self) -> bool {
        self == ConnectResultCode::Success
    }
}

/// Connect request (client to server), sent under the connect shuffle.
///
/// `public_id` and `rng_seed` travel in clear; everything after them is
/// permuted with a generator seeded by `rng_seed`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConnectRequest {
    pub public_id: i32,
    pub rng_seed: i64,
    pub app_version: i16,
    pub client_id: i32,
    pub game_mode: u8,
    pub difficulty: u8,
    pub game_id: i32,
    pub ticket: String,
    pub online_mode: u8,
    pub mayhem: bool,
    pub skin: i16,
    pub eject_skin: u8,
    pub alias: String,
    pub custom_skin: i32,
    pub alias_colors: Vec<u8>,
    pub pet_id: u8,
    pub blob_color: i32,
    pub pet_name: String,
    pub hat: u8,
    pub custom_pet: i32,
    pub halo: u8,
    pub pet_id2: u8,
    pub pet_name2: String,
    pub custom_pet2: i32,
    pub custom_particle: i32,
    pub particle: u8,
    pub alias_font: u8,
    pub level_colors: Vec<u8>,
    pub alias_anim: u8,
    pub skin2: i16,
    pub skin_interpolation_rate: f32,
    pub custom_skin2: i32,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    /// Secure ticket bytes from the account service.
    pub secure_ticket: Vec<u8>,
}

impl ConnectRequest {
    pub fn schema() -> Schema {
        Schema::new("ConnectRequest")
            .field("public_id", FieldType::I32)
            .field("rng_seed", FieldType::I64)
            .field("app_version", FieldType::I16)
            .field("client_id", FieldType::I32)
            .field("game_mode", FieldType::U8)
            .field("difficulty", FieldType::U8)
            .field("game_id", FieldType::I32)
            .field("ticket", FieldType::Str)
            .field("online_mode", FieldType::U8)
            .field("mayhem", FieldType::Bool)
            .field("skin", FieldType::I16)
            .field("eject_skin", FieldType::U8)
            .field("alias", FieldType::Str)
            .field("custom_skin", FieldType::I32)
            .field("alias_colors", color_bytes())
            .field("pet_id", FieldType::U8)
            .field("blob_color", FieldType::I32)
            .field("pet_name", FieldType::Str)
            .field("hat", FieldType::U8)
            .field("custom_pet", FieldType::I32)
            .field("halo", FieldType::U8)
            .field("pet_id2", FieldType::U8)
            .field("pet_name2", FieldType::Str)
            .field("custom_pet2", FieldType::I32)
            .field("custom_particle", FieldType::I32)
            .field("particle", FieldType::U8)
            .field("alias_font", FieldType::U8)
            .field("level_colors", color_bytes())
            .field("alias_anim", FieldType::U8)
            .field("skin2", FieldType::I16)
            .field(
                "skin_interpolation_rate",
                FieldType::Compressed {
                    width: 2,
                    max: INTERPOLATION_RANGE,
                },
            )
            .field("custom_skin2", FieldType::I32)
            .field("timestamp", FieldType::I64)
            .field("secure_ticket", FieldType::Bytes(LenPrefix::U16))
    }

    fn to_record(&self) -> Record {
        Record::new()
            .with("public_id", int(self.public_id))
            .with("rng_seed", int(self.rng_seed))
            .with("app_version", int(self.app_version))
            .with("client_id", int(self.client_id))
            .with("game_mode", int(self.game_mode))
            .with("difficulty", int(self.difficulty))
            .with("game_id", int(self.game_id))
            .with("ticket", text(&self.ticket))
            .with("online_mode", int(self.online_mode))
            .with("mayhem", Value::Bool(self.mayhem))
            .with("skin", int(self.skin))
            .with("eject_skin", int(self.eject_skin))
            .with("alias", text(&self.alias))
            .with("custom_skin", int(self.custom_skin))
            .with("alias_colors", blob(&self.alias_colors))
            .with("pet_id", int(self.pet_id))
            .with("blob_color", int(self.blob_color))
            .with("pet_name", text(&self.pet_name))
            .with("hat", int(self.hat))
            .with("custom_pet", int(self.custom_pet))
            .with("halo", int(self.halo))
            .with("pet_id2", int(self.pet_id2))
            .with("pet_name2", text(&self.pet_name2))
            .with("custom_pet2", int(self.custom_pet2))
            .with("custom_particle", int(self.custom_particle))
            .with("particle", int(self.particle))
            .with("alias_font", int(self.alias_font))
            .with("level_colors", blob(&self.level_colors))
            .with("alias_anim", int(self.alias_anim))
            .with("skin2", int(self.skin2))
            .with("skin_interpolation_rate", float(self.skin_interpolation_rate))
            .with("custom_skin2", int(self.custom_skin2))
            .with("timestamp", int(self.timestamp))
            .with("secure_ticket", blob(&self.secure_ticket))
    }

    fn from_record(r: &Record) -> Result<Self> {
        Ok(Self {
            public_id: r.int_as("public_id")?,
            rng_seed: r.int("rng_seed")?,
            app_version: r.int_as("app_version")?,
            client_id: r.int_as("client_id")?,
            game_mode: r.int_as("game_mode")?,
            difficulty: r.int_as("difficulty")?,
            game_id: r.int_as("game_id")?,
            ticket: r.string("ticket")?,
            online_mode: r.int_as("online_mode")?,
            mayhem: r.boolean("mayhem")?,
            skin: r.int_as("skin")?,
            eject_skin: r.int_as("eject_skin")?,
            alias: r.string("alias")?,
            custom_skin: r.int_as("custom_skin")?,
            alias_colors: r.bytes("alias_colors")?,
            pet_id: r.int_as("pet_id")?,
            blob_color: r.int_as("blob_color")?,
            pet_name: r.string("pet_name")?,
            hat: r.int_as("hat")?,
            custom_pet: r.int_as("custom_pet")?,
            halo: r.int_as("halo")?,
            pet_id2: r.int_as("pet_id2")?,
            pet_name2: r.string("pet_name2")?,
            custom_pet2: r.int_as("custom_pet2")?,
            custom_particle: r.int_as("custom_particle")?,
            particle: r.int_as("particle")?,
            alias_font: r.int_as("alias_font")?,
            level_colors: r.bytes("level_colors")?,
            alias_anim: r.int_as("alias_anim")?,
            skin2: r.int_as("skin2")?,
            skin_interpolation_rate: r.float("skin_interpolation_rate")? as f32,
            custom_skin2: r.int_as("custom_skin2")?,
            timestamp: r.int("timestamp")?,
            secure_ticket: r.bytes("secure_ticket")?,
        })
    }
}

/// Handshake result (server to client), always in clear.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectResult {
    pub client_id: i32,
    pub result: ConnectResultCode,
    pub public_id: i32,
    pub private_id: i32,
    pub game_id: i32,
    /// Remaining ban in seconds when the account is banned.
    pub ban_length: i32,
    pub ad_stuff: f32,
    pub split_multiplier: u8,
    /// Seeds the session transforms when present.
    pub session_seed: Option<i64>,
}

impl ConnectResult {
    pub fn schema() -> Schema {
        Schema::new("ConnectResult")
            .field("client_id", FieldType::I32)
            .field("result", FieldType::U8)
            .field("public_id", FieldType::I32)
            .field("private_id", FieldType::I32)
            .field("game_id", FieldType::I32)
            .field("ban_length", FieldType::I32)
            .field("ad_stuff", FieldType::F32)
            .field("split_multiplier", FieldType::U8)
            .optional("session_seed", FieldType::I64)
    }

    fn to_record(&self) -> Record {
        let mut record = Record::new()
            .with("client_id", int(self.client_id))
            .with("result", int(self.result.to_u8()))
            .with("public_id", int(self.public_id))
            .with("private_id", int(self.private_id))
            .with("game_id", int(self.game_id))
            .with("ban_length", int(self.ban_length))
            .with("ad_stuff", float(self.ad_stuff))
            .with("split_multiplier", int(self.split_multiplier));
        if let Some(seed) = self.session_seed {
            record.push("session_seed", int(seed));
        }
        record
    }

    fn from_record(r: &Record) -> Result<Self> {
        Ok(Self {
            client_id: r.int_as("client_id")?,
            result: ConnectResultCode::from_u8(r.int_as("result")?),
            public_id: r.int_as("public_id")?,
            private_id: r.int_as("private_id")?,
            game_id: r.int_as("game_id")?,
            ban_length: r.int_as("ban_length")?,
            ad_stuff: r.float("ad_stuff")? as f32,
            split_multiplier: r.int_as("split_multiplier")?,
            session_seed: r.opt_int_as("session_seed")?,
        })
    }
}

/// Steering input (client to server).
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Control {
    pub public_id: i32,
    /// Radians in `0..2π`.
    pub angle: f32,
    /// `0.0..=1.0`.
    pub speed: f32,
    pub tick: u8,
    pub flags: u8,
    pub player_index: u8,
    pub client_id: i32,
    pub aspect_ratio: f32,
}

impl Control {
    pub const MAX_ASPECT_RATIO: f32 = 3.0;

    pub fn schema() -> Schema {
        Schema::new("Control")
            .field("public_id", FieldType::I32)
            .field("angle", FieldType::Compressed { width: 2, max: TAU })
            .field("speed", FieldType::Compressed { width: 1, max: 1.0 })
            .field("tick", FieldType::U8)
            .field("flags", FieldType::U8)
            .field("player_index", FieldType::U8)
            .field("client_id", FieldType::I32)
            .field(
                "aspect_ratio",
                FieldType::Compressed {
                    width: 1,
                    max: Self::MAX_ASPECT_RATIO,
                },
            )
    }

    fn to_record(&self) -> Record {
        Record::new()
            .with("public_id", int(self.public_id))
            .with("angle", float(self.angle.rem_euclid(TAU)))
            .with("speed", float(self.speed))
            .with("tick", int(self.tick))
            .with("flags", int(self.flags))
            .with("player_index", int(self.player_index))
            .with("client_id", int(self.client_id))
            .with("aspect_ratio", float(self.aspect_ratio))
    }

    fn from_record(r: &Record) -> Result<Self> {
        Ok(Self {
            public_id: r.int_as("public_id")?,
            angle: r.float("angle")? as f32,
            speed: r.float("speed")? as f32,
            tick: r.int_as("tick")?,
            flags: r.int_as("flags")?,
            player_index: r.int_as("player_index")?,
            client_id: r.int_as("client_id")?,
            aspect_ratio: r.float("aspect_ratio")? as f32,
        })
    }
}

/// Keep-alive ping (client to server).
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct KeepAlive {
    pub public_id: i32,
    pub private_id: i32,
    /// Server IPv4 address, octets in little-endian order as the game sends it.
    pub server_ip: [u8; 4],
    pub client_id: i32,
    pub sequence: Option<u32>,
}

impl KeepAlive {
    pub fn schema() -> Schema {
        Schema::new("KeepAlive")
            .field("public_id", FieldType::I32)
            .field("private_id", FieldType::I32)
            .field("server_ip", FieldType::Fixed(4))
            .field("client_id", FieldType::I32)
            .optional("sequence", FieldType::U32)
    }

    /// Store `ip` in wire order.
    pub fn encode_ip(ip: Ipv4Addr) -> [u8; 4] {
        let mut octets = ip.octets();
        octets.reverse();
        octets
    }

    pub fn server_ip(&self) -> Ipv4Addr {
        let mut octets = self.server_ip;
        octets.reverse();
        Ipv4Addr::from(octets)
    }

    fn to_record(&self) -> Record {
        let mut record = Record::new()
            .with("public_id", int(self.public_id))
            .with("private_id", int(self.private_id))
            .with("server_ip", blob(&self.server_ip))
            .with("client_id", int(self.client_id));
        if let Some(sequence) = self.sequence {
            record.push("sequence", int(sequence));
        }
        record
    }

    fn from_record(r: &Record) -> Result<Self> {
        let ip = r.bytes("server_ip")?;
        let server_ip = <[u8; 4]>::try_from(ip.as_slice())
            .map_err(|_| ProtocolError::malformed("server_ip must be 4 bytes"))?;
        Ok(Self {
            public_id: r.int_as("public_id")?,
            private_id: r.int_as("private_id")?,
            server_ip,
            client_id: r.int_as("client_id")?,
            sequence: r.opt_int_as("sequence")?,
        })
    }
}

/// Keep-alive acknowledgement (server to client).
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct KeepAliveAck {
    pub sequence: Option<u32>,
}

impl KeepAliveAck {
    pub fn schema() -> Schema {
        Schema::new("KeepAliveAck").optional("sequence", FieldType::U32)
    }

    fn to_record(&self) -> Record {
        let mut record = Record::new();
        if let Some(sequence) = self.sequence {
            record.push("sequence", int(sequence));
        }
        record
    }

    fn from_record(r: &Record) -> Result<Self> {
        Ok(Self {
            sequence: r.opt_int_as("sequence")?,
        })
    }
}

/// Session teardown, either direction.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Disconnect {
    pub public_id: i32,
    pub private_id: i32,
    pub client_id: i32,
}

impl Disconnect {
    pub fn schema(direction: Direction) -> Schema {
        let schema = Schema::new("Disconnect");
        match direction {
            Direction::ClientToServer => schema
                .field("public_id", FieldType::I32)
                .field("private_id", FieldType::I32)
                .field("client_id", FieldType::I32),
            Direction::ServerToClient => schema
                .optional("public_id", FieldType::I32)
                .optional("private_id", FieldType::I32)
                .optional("client_id", FieldType::I32),
        }
    }

    fn to_record(&self) -> Record {
        Record::new()
            .with("public_id", int(self.public_id))
            .with("private_id", int(self.private_id))
            .with("client_id", int(self.client_id))
    }

    fn from_record(r: &Record) -> Result<Self> {
        Ok(Self {
            public_id: r.opt_int_as("public_id")?.unwrap_or_default(),
            private_id: r.opt_int_as("private_id")?.unwrap_or_default(),
            client_id: r.opt_int_as("client_id")?.unwrap_or_default(),
        })
    }
}

/// In-game chat line.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GameChatMessage {
    pub public_id: i32,
    pub alias: String,
    pub message: String,
    pub account_id: i32,
    pub unknown: bool,
    pub message_id: i64,
    pub alias_colors: Vec<u8>,
    pub show_broadcast_bubble: bool,
    pub alias_font: u8,
    /// Sender's client id; required when sending, absent on relayed lines.
    pub client_id: Option<i32>,
    pub reserved: [bool; 2],
}

impl GameChatMessage {
    pub fn schema(direction: Direction) -> Schema {
        let schema = Schema::new("GameChatMessage")
            .field("public_id", FieldType::I32)
            .field("alias", FieldType::Str)
            .field("message", FieldType::Str)
            .field("account_id", FieldType::I32)
            .field("unknown", FieldType::Bool)
            .field("message_id", FieldType::I64)
            .field("alias_colors", color_bytes())
            .field("show_broadcast_bubble", FieldType::Bool)
            .field("alias_font", FieldType::U8);
        match direction {
            Direction::ClientToServer => schema
                .field("client_id", FieldType::I32)
                .field("reserved_a", FieldType::Bool)
                .field("reserved_b", FieldType::Bool),
            Direction::ServerToClient => schema
                .optional("client_id", FieldType::I32)
                .optional("reserved_a", FieldType::Bool)
                .optional("reserved_b", FieldType::Bool),
        }
    }

    fn to_record(&self) -> Record {
        let mut record = Record::new()
            .with("public_id", int(self.public_id))
            .with("alias", text(&self.alias))
            .with("message", text(&self.message))
            .with("account_id", int(self.account_id))
            .with("unknown", Value::Bool(self.unknown))
            .with("message_id", int(self.message_id))
            .with("alias_colors", blob(&self.alias_colors))
            .with("show_broadcast_bubble", Value::Bool(self.show_broadcast_bubble))
            .with("alias_font", int(self.alias_font));
        if let Some(client_id) = self.client_id {
            record.push("client_id", int(client_id));
            record.push("reserved_a", Value::Bool(self.reserved[0]));
            record.push("reserved_b", Value::Bool(self.reserved[1]));
        }
        record
    }

    fn from_record(r: &Record) -> Result<Self> {
        Ok(Self {
            public_id: r.int_as("public_id")?,
            alias: r.string("alias")?,
            message: r.string("message")?,
            account_id: r.int_as("account_id")?,
            unknown: r.boolean("unknown")?,
            message_id: r.int("message_id")?,
            alias_colors: r.bytes("alias_colors")?,
            show_broadcast_bubble: r.boolean("show_broadcast_bubble")?,
            alias_font: r.int_as("alias_font")?,
            client_id: r.opt_int_as("client_id")?,
            reserved: [
                r.opt_boolean("reserved_a")?.unwrap_or_default(),
                r.opt_boolean("reserved_b")?.unwrap_or_default(),
            ],
        })
    }
}

/// Clan chat line.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ClanChatMessage {
    pub public_id: i32,
    pub alias: String,
    pub message: String,
    pub clan_role: u8,
    pub account_id: i32,
    pub message_id: i64,
    pub alias_colors: Vec<u8>,
    pub client_id: Option<i32>,
    pub reserved: bool,
}

impl ClanChatMessage {
    pub fn schema(direction: Direction) -> Schema {
        let schema = Schema::new("ClanChatMessage")
            .field("public_id", FieldType::I32)
            .field("alias", FieldType::Str)
            .field("message", FieldType::Str)
            .field("clan_role", FieldType::U8)
            .field("account_id", FieldType::I32)
            .field("message_id", FieldType::I64)
            .field("alias_colors", color_bytes());
        match direction {
            Direction::ClientToServer => schema
                .field("client_id", FieldType::I32)
                .field("reserved", FieldType::Bool),
            Direction::ServerToClient => schema
                .optional("client_id", FieldType::I32)
                .optional("reserved", FieldType::Bool),
        }
    }

    fn to_record(&self) -> Record {
        let mut record = Record::new()
            .with("public_id", int(self.public_id))
            .with("alias", text(&self.alias))
            .with("message", text(&self.message))
            .with("clan_role", int(self.clan_role))
            .with("account_id", int(self.account_id))
            .with("message_id", int(self.message_id))
            .with("alias_colors", blob(&self.alias_colors));
        if let Some(client_id) = self.client_id {
            record.push("client_id", int(client_id));
            record.push("reserved", Value::Bool(self.reserved));
        }
        record
    }

    fn from_record(r: &Record) -> Result<Self> {
        Ok(Self {
            public_id: r.int_as("public_id")?,
            alias: r.string("alias")?,
            message: r.string("message")?,
            clan_role: r.int_as("clan_role")?,
            account_id: r.int_as("account_id")?,
            message_id: r.int("message_id")?,
            alias_colors: r.bytes("alias_colors")?,
            client_id: r.opt_int_as("client_id")?,
            reserved: r.opt_boolean("reserved")?.unwrap_or_default(),
        })
    }
}

/// Player description carried by [`GameData`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NetPlayer {
    pub player_id: u8,
    pub skin: i16,
    pub eject_skin: u8,
    pub custom_skin: i32,
    pub custom_pet: i32,
    pub pet_id: u8,
    pub pet_level: i16,
    pub pet_name: String,
    pub hat: u8,
    pub halo: u8,
    pub pet_id2: u8,
    pub pet_level2: i16,
    pub pet_name2: String,
    pub custom_pet2: i32,
    pub custom_particle: i32,
    pub particle: u8,
    pub level_colors: Vec<u8>,
    pub name_animation: u8,
    pub skin2: i16,
    pub skin_interpolation_rate: f32,
    pub custom_skin2: i32,
    pub blob_color: i32,
    pub team_id: u8,
    pub alias: String,
    pub font: u8,
    pub alias_colors: Vec<u8>,
    pub account_id: i32,
    pub player_level: i16,
    pub clan_name: String,
    pub clan_colors: Vec<u8>,
    pub clan_role: u8,
    pub click_type: u8,
}

impl NetPlayer {
    fn schema() -> Schema {
        Schema::new("NetPlayer")
            .field("player_id", FieldType::U8)
            .field("skin", FieldType::I16)
            .field("eject_skin", FieldType::U8)
            .field("custom_skin", FieldType::I32)
            .field("custom_pet", FieldType::I32)
            .field("pet_id", FieldType::U8)
            .field("pet_level", FieldType::I16)
            .field("pet_name", FieldType::Str)
            .field("hat", FieldType::U8)
            .field("halo", FieldType::U8)
            .field("pet_id2", FieldType::U8)
            .field("pet_level2", FieldType::I16)
            .field("pet_name2", FieldType::Str)
            .field("custom_pet2", FieldType::I32)
            .field("custom_particle", FieldType::I32)
            .field("particle", FieldType::U8)
            .field("level_colors", color_bytes())
            .field("name_animation", FieldType::U8)
            .field("skin2", FieldType::I16)
            .field(
                "skin_interpolation_rate",
                FieldType::Compressed {
                    width: 2,
                    max: INTERPOLATION_RANGE,
                },
            )
            .field("custom_skin2", FieldType::I32)
            .field("blob_color", FieldType::I32)
            .field("team_id", FieldType::U8)
            .field("alias", FieldType::Str)
            .field("font", FieldType::U8)
            .field("alias_colors", color_bytes())
            .field("account_id", FieldType::I32)
            .field("player_level", FieldType::I16)
            .field("clan_name", FieldType::Str)
            .field("clan_colors", color_bytes())
            .field("clan_role", FieldType::U8)
            .field("click_type", FieldType::U8)
    }

    fn to_record(&self) -> Record {
        Record::new()
            .with("player_id", int(self.player_id))
            .with("skin", int(self.skin))
            .with("eject_skin", int(self.eject_skin))
            .with("custom_skin", int(self.custom_skin))
            .with("custom_pet", int(self.custom_pet))
            .with("pet_id", int(self.pet_id))
            .with("pet_level", int(self.pet_level))
            .with("pet_name", text(&self.pet_name))
            .with("hat", int(self.hat))
            .with("halo", int(self.halo))
            .with("pet_id2", int(self.pet_id2))
            .with("pet_level2", int(self.pet_level2))
            .with("pet_name2", text(&self.pet_name2))
            .with("custom_pet2", int(self.custom_pet2))
            .with("custom_particle", int(self.custom_particle))
            .with("particle", int(self.particle))
            .with("level_colors", blob(&self.level_colors))
            .with("name_animation", int(self.name_animation))
            .with("skin2", int(self.skin2))
            .with("skin_interpolation_rate", float(self.skin_interpolation_rate))
            .with("custom_skin2", int(self.custom_skin2))
            .with("blob_color", int(self.blob_color))
            .with("team_id", int(self.team_id))
            .with("alias", text(&self.alias))
            .with("font", int(self.font))
            .with("alias_colors", blob(&self.alias_colors))
            .with("account_id", int(self.account_id))
            .with("player_level", int(self.player_level))
            .with("clan_name", text(&self.clan_name))
            .with("clan_colors", blob(&self.clan_colors))
            .with("clan_role", int(self.clan_role))
            .with("click_type", int(self.click_type))
    }

    fn from_record(r: &Record) -> Result<Self> {
        Ok(Self {
            player_id: r.int_as("player_id")?,
            skin: r.int_as("skin")?,
            eject_skin: r.int_as("eject_skin")?,
            custom_skin: r.int_as("custom_skin")?,
            custom_pet: r.int_as("custom_pet")?,
            pet_id: r.int_as("pet_id")?,
            pet_level: r.int_as("pet_level")?,
            pet_name: r.string("pet_name")?,
            hat: r.int_as("hat")?,
            halo: r.int_as("halo")?,
            pet_id2: r.int_as("pet_id2")?,
            pet_level2: r.int_as("pet_level2")?,
            pet_name2: r.string("pet_name2")?,
            custom_pet2: r.int_as("custom_pet2")?,
            custom_particle: r.int_as("custom_particle")?,
            particle: r.int_as("particle")?,
            level_colors: r.bytes("level_colors")?,
            name_animation: r.int_as("name_animation")?,
            skin2: r.int_as("skin2")?,
            skin_interpolation_rate: r.float("skin_interpolation_rate")? as f32,
            custom_skin2: r.int_as("custom_skin2")?,
            blob_color: r.int_as("blob_color")?,
            team_id: r.int_as("team_id")?,
            alias: r.string("alias")?,
            font: r.int_as("font")?,
            alias_colors: r.bytes("alias_colors")?,
            account_id: r.int_as("account_id")?,
            player_level: r.int_as("player_level")?,
            clan_name: r.string("clan_name")?,
            clan_colors: r.bytes("clan_colors")?,
            clan_role: r.int_as("clan_role")?,
            click_type: r.int_as("click_type")?,
        })
    }
}

/// Ejected mass. Coordinates and mass are 3-byte quantized.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NetEject {
    pub eject_id: u8,
    pub x: u32,
    pub y: u32,
    pub mass: u32,
}

/// Food dot; its id is its index plus the packet's dot id offset.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NetDot {
    pub x: u32,
    pub y: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NetItem {
    pub item_type: u8,
    pub x: u32,
    pub y: u32,
}

/// Initial world description (server to client).
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GameData {
    pub public_id: i32,
    pub map_size: f32,
    pub dot_id_offset: u16,
    pub item_id_offset: u8,
    pub players: Vec<NetPlayer>,
    pub ejects: Vec<NetEject>,
    pub dots: Vec<NetDot>,
    pub items: Vec<NetItem>,
}

impl GameData {
    pub fn schema() -> Schema {
        let eject = Schema::new("NetEject")
            .field("eject_id", FieldType::U8)
            .field("x", FieldType::U24)
            .field("y", FieldType::U24)
            .field("mass", FieldType::U24);
        let dot = Schema::new("NetDot")
            .field("x", FieldType::U24)
            .field("y", FieldType::U24);
        let item = Schema::new("NetItem")
            .field("item_type", FieldType::U8)
            .field("x", FieldType::U24)
            .field("y", FieldType::U24);

        Schema::new("GameData")
            .field("public_id", FieldType::I32)
            .field("map_size", FieldType::F32)
            .field("player_count", FieldType::U8)
            .field("eject_count", FieldType::U8)
            .field("dot_id_offset", FieldType::U16)
            .field("dot_count", FieldType::U16)
            .field("item_id_offset", FieldType::U8)
            .field("item_count", FieldType::U8)
            .field(
                "players",
                FieldType::List {
                    count: Count::Field("player_count"),
                    item: NetPlayer::schema(),
                },
            )
            .field(
                "ejects",
                FieldType::List {
                    count: Count::Field("eject_count"),
                    item: eject,
                },
            )
            .field(
                "dots",
                FieldType::List {
                    count: Count::Field("dot_count"),
                    item: dot,
                },
            )
            .field(
                "items",
                FieldType::List {
                    count: Count::Field("item_count"),
                    item,
                },
            )
    }

    /// Convert a 3-byte quantized coordinate into map units.
    pub fn scale(&self, raw: u32) -> f32 {
        (f64::from(raw) / U24_SCALE * f64::from(self.map_size)) as f32
    }

    /// Quantize a map coordinate to its 3-byte wire form.
    pub fn quantize(&self, value: f32) -> u32 {
        if self.map_size <= 0.0 {
            return 0;
        }
        let ratio = (f64::from(value) / f64::from(self.map_size)).clamp(0.0, 1.0);
        (ratio * U24_SCALE).floor() as u32
    }

    /// Every object in the packet as an `Add` delta, ids namespaced per kind.
    pub fn to_deltas(&self) -> Vec<Delta> {
        let players = self.players.iter().map(|p| Delta::Add {
            id: EntityId::namespaced(EntityKind::Player, u32::from(p.player_id)),
            fields: EntityFields {
                kind: Some(EntityKind::Player),
                color: Some(p.blob_color as u32),
                flags: Some(p.team_id),
                name: Some(p.alias.clone()),
                ..EntityFields::default()
            },
        });

        let ejects = self.ejects.iter().map(|e| Delta::Add {
            id: EntityId::namespaced(EntityKind::Eject, u32::from(e.eject_id)),
            fields: EntityFields {
                kind: Some(EntityKind::Eject),
                position: Some((self.scale(e.x), self.scale(e.y))),
                size: Some((f64::from(e.mass) / U24_SCALE * EJECT_MASS_RANGE) as f32),
                ..EntityFields::default()
            },
        });

        let dots = self.dots.iter().enumerate().map(|(i, d)| Delta::Add {
            id: EntityId::namespaced(EntityKind::Dot, u32::from(self.dot_id_offset) + i as u32),
            fields: EntityFields {
                kind: Some(EntityKind::Dot),
                position: Some((self.scale(d.x), self.scale(d.y))),
                ..EntityFields::default()
            },
        });

        let items = self.items.iter().enumerate().map(|(i, it)| Delta::Add {
            id: EntityId::namespaced(EntityKind::Item, u32::from(self.item_id_offset) + i as u32),
            fields: EntityFields {
                kind: Some(EntityKind::Item),
                position: Some((self.scale(it.x), self.scale(it.y))),
                flags: Some(it.item_type),
                ..EntityFields::default()
            },
        });

        players.chain(ejects).chain(dots).chain(items).collect()
    }

    fn to_record(&self) -> Record {
        let players = self.players.iter().map(NetPlayer::to_record).collect();
        let ejects = self
            .ejects
            .iter()
            .map(|e| {
                Record::new()
                    .with("eject_id", int(e.eject_id))
                    .with("x", int(e.x))
                    .with("y", int(e.y))
                    .with("mass", int(e.mass))
            })
            .collect();
        let dots = self
            .dots
            .iter()
            .map(|d| Record::new().with("x", int(d.x)).with("y", int(d.y)))
            .collect();
        let items = self
            .items
            .iter()
            .map(|it| {
                Record::new()
                    .with("item_type", int(it.item_type))
                    .with("x", int(it.x))
                    .with("y", int(it.y))
            })
            .collect();

        Record::new()
            .with("public_id", int(self.public_id))
            .with("map_size", float(self.map_size))
            .with("player_count", count(self.players.len()))
            .with("eject_count", count(self.ejects.len()))
            .with("dot_id_offset", int(self.dot_id_offset))
            .with("dot_count", count(self.dots.len()))
            .with("item_id_offset", int(self.item_id_offset))
            .with("item_count", count(self.items.len()))
            .with("players", Value::List(players))
            .with("ejects", Value::List(ejects))
            .with("dots", Value::List(dots))
            .with("items", Value::List(items))
    }

    fn from_record(r: &Record) -> Result<Self> {
        let players = r
            .list("players")?
            .iter()
            .map(NetPlayer::from_record)
            .collect::<Result<Vec<_>>>()?;
        let ejects = r
            .list("ejects")?
            .iter()
            .map(|e| {
                Ok(NetEject {
                    eject_id: e.int_as("eject_id")?,
                    x: e.int_as("x")?,
                    y: e.int_as("y")?,
                    mass: e.int_as("mass")?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let dots = r
            .list("dots")?
            .iter()
            .map(|d| {
                Ok(NetDot {
                    x: d.int_as("x")?,
                    y: d.int_as("y")?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let items = r
            .list("items")?
            .iter()
            .map(|it| {
                Ok(NetItem {
                    item_type: it.int_as("item_type")?,
                    x: it.int_as("x")?,
                    y: it.int_as("y")?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            public_id: r.int_as("public_id")?,
            map_size: r.float("map_size")? as f32,
            dot_id_offset: r.int_as("dot_id_offset")?,
            item_id_offset: r.int_as("item_id_offset")?,
            players,
            ejects,
            dots,
            items,
        })
    }
}

/// Ordered batch of entity deltas (server to client).
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WorldUpdate {
    pub tick: u32,
    pub deltas: Vec<Delta>,
}

impl WorldUpdate {
    pub fn schema() -> Schema {
        Schema::new("WorldUpdate").field("tick", FieldType::U32).field(
            "deltas",
            FieldType::List {
                count: Count::Prefix(LenPrefix::U16),
                item: Schema::new("DeltaRecord").field("delta", FieldType::Delta),
            },
        )
    }

    fn to_record(&self) -> Record {
        let deltas = self
            .deltas
            .iter()
            .map(|d| Record::new().with("delta", Value::Delta(d.clone())))
            .collect();
        Record::new()
            .with("tick", int(self.tick))
            .with("deltas", Value::List(deltas))
    }

    fn from_record(r: &Record) -> Result<Self> {
        let deltas = r
            .list("deltas")?
            .iter()
            .map(|d| d.delta("delta"))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            tick: r.int_as("tick")?,
            deltas,
        })
    }
}

/// A decoded (or to-be-encoded) packet.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Packet {
    ConnectRequest(ConnectRequest),
    ConnectResult(ConnectResult),
    Control(Control),
    KeepAlive(KeepAlive),
    KeepAliveAck(KeepAliveAck),
    Disconnect(Disconnect),
    GameChat(GameChatMessage),
    ClanChat(ClanChatMessage),
    GameData(GameData),
    WorldUpdate(WorldUpdate),
    /// A registered schema without a typed struct.
    Generic {
        opcode: u8,
        direction: Direction,
        record: Record,
    },
}

impl Packet {
    pub fn opcode(&self) -> u8 {
        match self {
            Packet::ConnectRequest(_) => opcode::CONNECT_REQUEST,
            Packet::ConnectResult(_) => opcode::CONNECT_RESULT,
            Packet::Control(_) => opcode::CONTROL,
            Packet::KeepAlive(_) | Packet::KeepAliveAck(_) => opcode::KEEP_ALIVE,
            Packet::Disconnect(_) => opcode::DISCONNECT,
            Packet::GameChat(_) => opcode::GAME_CHAT_MESSAGE,
            Packet::ClanChat(_) => opcode::CLAN_CHAT_MESSAGE,
            Packet::GameData(_) => opcode::GAME_DATA,
            Packet::WorldUpdate(_) => opcode::WORLD_UPDATE,
            Packet::Generic { opcode, .. } => *opcode,
        }
    }

    /// The only direction this packet may travel, or `None` if it goes both
    /// ways.
    pub fn direction(&self) -> Option<Direction> {
        match self {
            Packet::ConnectRequest(_) | Packet::Control(_) | Packet::KeepAlive(_) => {
                Some(Direction::ClientToServer)
            }
            Packet::ConnectResult(_)
            | Packet::KeepAliveAck(_)
            | Packet::GameData(_)
            | Packet::WorldUpdate(_) => Some(Direction::ServerToClient),
            Packet::Disconnect(_) | Packet::GameChat(_) | Packet::ClanChat(_) => None,
            Packet::Generic { direction, .. } => Some(*direction),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Packet::ConnectRequest(_) => "ConnectRequest",
            Packet::ConnectResult(_) => "ConnectResult",
            Packet::Control(_) => "Control",
            Packet::KeepAlive(_) => "KeepAlive",
            Packet::KeepAliveAck(_) => "KeepAliveAck",
            Packet::Disconnect(_) => "Disconnect",
            Packet::GameChat(_) => "GameChatMessage",
            Packet::ClanChat(_) => "ClanChatMessage",
            Packet::GameData(_) => "GameData",
            Packet::WorldUpdate(_) => "WorldUpdate",
            Packet::Generic { .. } => "Generic",
        }
    }

    pub fn to_record(&self) -> Record {
        match self {
            Packet::ConnectRequest(p) => p.to_record(),
            Packet::ConnectResult(p) => p.to_record(),
            Packet::Control(p) => p.to_record(),
            Packet::KeepAlive(p) => p.to_record(),
            Packet::KeepAliveAck(p) => p.to_record(),
            Packet::Disconnect(p) => p.to_record(),
            Packet::GameChat(p) => p.to_record(),
            Packet::ClanChat(p) => p.to_record(),
            Packet::GameData(p) => p.to_record(),
            Packet::WorldUpdate(p) => p.to_record(),
            Packet::Generic { record, .. } => record.clone(),
        }
    }

    /// Build the typed packet for a decoded record.
    pub fn from_record(opcode: u8, direction: Direction, record: Record) -> Result<Self> {
        use Direction::{ClientToServer as C2S, ServerToClient as S2C};

        Ok(match (opcode, direction) {
            (opcode::CONNECT_REQUEST, C2S) => {
                Packet::ConnectRequest(ConnectRequest::from_record(&record)?)
            }
            (opcode::CONNECT_RESULT, S2C) => {
                Packet::ConnectResult(ConnectResult::from_record(&record)?)
            }
            (opcode::CONTROL, C2S) => Packet::Control(Control::from_record(&record)?),
            (opcode::KEEP_ALIVE, C2S) => Packet::KeepAlive(KeepAlive::from_record(&record)?),
            (opcode::KEEP_ALIVE, S2C) => Packet::KeepAliveAck(KeepAliveAck::from_record(&record)?),
            (opcode::DISCONNECT, _) => Packet::Disconnect(Disconnect::from_record(&record)?),
            (opcode::GAME_CHAT_MESSAGE, _) => {
                Packet::GameChat(GameChatMessage::from_record(&record)?)
            }
            (opcode::CLAN_CHAT_MESSAGE, _) => {
                Packet::ClanChat(ClanChatMessage::from_record(&record)?)
            }
            (opcode::GAME_DATA, S2C) => Packet::GameData(GameData::from_record(&record)?),
            (opcode::WORLD_UPDATE, S2C) => Packet::WorldUpdate(WorldUpdate::from_record(&record)?),
            _ => Packet::Generic {
                opcode,
                direction,
                record,
            },
        })
    }
}

/// Every standard schema with its opcode, direction and envelope.
pub(crate) fn standard_schemas() -> Vec<(u8, Direction, Envelope, Schema)> {
    use Direction::{ClientToServer as C2S, ServerToClient as S2C};

    vec![
        (
            opcode::CONNECT_REQUEST,
            C2S,
            Envelope::ConnectShuffle,
            ConnectRequest::schema(),
        ),
        (opcode::CONNECT_RESULT, S2C, Envelope::Clear, ConnectResult::schema()),
        (opcode::CONTROL, C2S, Envelope::Session, Control::schema()),
        (opcode::KEEP_ALIVE, C2S, Envelope::Session, KeepAlive::schema()),
        (opcode::KEEP_ALIVE, S2C, Envelope::Session, KeepAliveAck::schema()),
        (opcode::DISCONNECT, C2S, Envelope::Session, Disconnect::schema(C2S)),
        (opcode::DISCONNECT, S2C, Envelope::Session, Disconnect::schema(S2C)),
        (
            opcode::GAME_CHAT_MESSAGE,
            C2S,
            Envelope::Session,
            GameChatMessage::schema(C2S),
        ),
        (
            opcode::GAME_CHAT_MESSAGE,
            S2C,
            Envelope::Session,
            GameChatMessage::schema(S2C),
        ),
        (
            opcode::CLAN_CHAT_MESSAGE,
            C2S,
            Envelope::Session,
            ClanChatMessage::schema(C2S),
        ),
        (
            opcode::CLAN_CHAT_MESSAGE,
            S2C,
            Envelope::Session,
            ClanChatMessage::schema(S2C),
        ),
        (opcode::GAME_DATA, S2C, Envelope::Session, GameData::schema()),
        (opcode::WORLD_UPDATE, S2C, Envelope::Session, WorldUpdate::schema()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::codec::PacketCodec;
    use crate::core::registry::Registry;
    use std::sync::Arc;

    fn codecs() -> (PacketCodec, PacketCodec) {
        let registry = Arc::new(Registry::standard().expect("standard registry"));
        (
            PacketCodec::client(registry.clone()),
            PacketCodec::server(registry),
        )
    }

    fn connect_request() -> ConnectRequest {
        ConnectRequest {
            rng_seed: -4962768465676381896,
            app_version: 1100,
            client_id: 1234,
            game_id: -1,
            alias: "#x9!QmZ$rT2@pL&k".into(),
            alias_colors: vec![1, 2, 3],
            pet_name: "pet".into(),
            skin_interpolation_rate: 0.0,
            timestamp: 1_700_000_000_000,
            secure_ticket: vec![0xde, 0xad, 0xbe, 0xef],
            ..ConnectRequest::default()
        }
    }

    #[test]
    fn test_connect_request_shuffle_round_trip() {
        let (mut client, mut server) = codecs();
        let request = Packet::ConnectRequest(connect_request());

        let frame = client.encode_packet(&request).expect("encode");
        assert_eq!(frame[0], opcode::CONNECT_REQUEST);
        // public id and seed are in clear.
        assert_eq!(&frame[1..5], &[0, 0, 0, 0]);
        assert_eq!(&frame[5..13], &(-4962768465676381896i64).to_be_bytes());
        // app version would sit right after the seed without the shuffle.
        assert_eq!(server.decode_frame(&frame).expect("decode"), request);
    }

    #[test]
    fn test_connect_result_fixture_round_trip() {
        let (mut client, mut server) = codecs();
        let mut fixture = vec![opcode::CONNECT_RESULT];
        fixture.extend_from_slice(&77i32.to_be_bytes());
        fixture.push(0);
        fixture.extend_from_slice(&5i32.to_be_bytes());
        fixture.extend_from_slice(&6i32.to_be_bytes());
        fixture.extend_from_slice(&(-1i32).to_be_bytes());
        fixture.extend_from_slice(&0i32.to_be_bytes());
        fixture.extend_from_slice(&1.5f32.to_be_bytes());
        fixture.push(2);

        let packet = client.decode_frame(&fixture).expect("decode");
        let Packet::ConnectResult(result) = &packet else {
            panic!("expected ConnectResult, got {packet:?}");
        };
        assert_eq!(result.client_id, 77);
        assert!(result.result.is_success());
        assert_eq!(result.session_seed, None);
        assert_eq!(&server.encode_packet(&packet).expect("encode")[..], &fixture[..]);

        fixture.extend_from_slice(&42i64.to_be_bytes());
        let packet = client.decode_frame(&fixture).expect("decode");
        assert!(matches!(
            packet,
            Packet::ConnectResult(ConnectResult {
                session_seed: Some(42),
                ..
            })
        ));
        assert_eq!(&server.encode_packet(&packet).expect("encode")[..], &fixture[..]);
    }

    #[test]
    fn test_chat_trailer_required_when_sending() {
        let (mut client, mut server) = codecs();
        let mut chat = GameChatMessage {
            alias: "me".into(),
            message: "hi".into(),
            account_id: -1,
            ..GameChatMessage::default()
        };
        assert!(matches!(
            client.encode_packet(&Packet::GameChat(chat.clone())),
            Err(ProtocolError::InvalidField(_))
        ));

        chat.client_id = Some(99);
        let frame = client
            .encode_packet(&Packet::GameChat(chat.clone()))
            .expect("encode");
        assert_eq!(
            server.decode_frame(&frame).expect("decode"),
            Packet::GameChat(chat.clone())
        );

        // Relayed lines may omit the trailer.
        chat.client_id = None;
        let relayed = server
            .encode_packet(&Packet::GameChat(chat.clone()))
            .expect("encode");
        assert_eq!(
            client.decode_frame(&relayed).expect("decode"),
            Packet::GameChat(chat)
        );
    }

    fn sample_game_data() -> GameData {
        GameData {
            public_id: 3,
            map_size: 1000.0,
            dot_id_offset: 10,
            item_id_offset: 0,
            players: vec![NetPlayer {
                player_id: 4,
                alias: "#x9!QmZ$rT2@pL&k".into(),
                blob_color: 0x00FF00,
                skin_interpolation_rate: 30.0,
                ..NetPlayer::default()
            }],
            ejects: vec![NetEject {
                eject_id: 1,
                x: 0xFF_FFFF,
                y: 0,
                mass: 0x7F_FFFF,
            }],
            dots: vec![NetDot { x: 0x80_0000, y: 0x80_0000 }, NetDot { x: 1, y: 2 }],
            items: vec![NetItem {
                item_type: 7,
                x: 3,
                y: 4,
            }],
        }
    }

    #[test]
    fn test_game_data_round_trip_and_deltas() {
        let (mut client, mut server) = codecs();
        let data = sample_game_data();

        let frame = server
            .encode_packet(&Packet::GameData(data.clone()))
            .expect("encode");
        let decoded = client.decode_frame(&frame).expect("decode");
        let Packet::GameData(decoded) = decoded else {
            panic!("expected GameData");
        };
        assert_eq!(decoded.players.len(), 1);
        assert_eq!(decoded.dots.len(), 2);
        assert!((decoded.players[0].skin_interpolation_rate - 30.0).abs() < 0.01);

        let deltas = decoded.to_deltas();
        assert_eq!(deltas.len(), 5);
        let dot = EntityId::namespaced(EntityKind::Dot, 10);
        let Some(Delta::Add { fields, .. }) = deltas.iter().find(|d| d.id() == dot) else {
            panic!("dot 10 missing");
        };
        let (x, y) = fields.position.expect("dot position");
        assert!((x - 500.0).abs() < 0.01 && (y - 500.0).abs() < 0.01);

        let eject = EntityId::namespaced(EntityKind::Eject, 1);
        let Some(Delta::Add { fields, .. }) = deltas.iter().find(|d| d.id() == eject) else {
            panic!("eject 1 missing");
        };
        assert_eq!(fields.position.map(|p| p.0), Some(1000.0));
    }

    #[test]
    fn test_game_data_truncated_list_is_malformed() {
        let (mut client, mut server) = codecs();
        let frame = server
            .encode_packet(&Packet::GameData(sample_game_data()))
            .expect("encode");
        let err = client.decode_frame(&frame[..frame.len() - 4]).unwrap_err();
        assert!(matches!(err, ProtocolError::MalformedPacket(_)));
    }

    #[test]
    fn test_keep_alive_ip_is_reversed() {
        let ping = KeepAlive {
            server_ip: KeepAlive::encode_ip(Ipv4Addr::new(10, 0, 0, 1)),
            ..KeepAlive::default()
        };
        assert_eq!(ping.server_ip, [1, 0, 0, 10]);
        assert_eq!(ping.server_ip(), Ipv4Addr::new(10, 0, 0, 1));
    }

    #[test]
    fn test_control_quantization() {
        let (mut client, mut server) = codecs();
        let control = Control {
            public_id: 1,
            angle: std::f32::consts::PI,
            speed: 1.0,
            tick: 9,
            player_index: 4,
            client_id: 8,
            aspect_ratio: 1.5,
            ..Control::default()
        };
        let frame = client
            .encode_packet(&Packet::Control(control))
            .expect("encode");
        // opcode + i32 + u16 + u8 * 4 + i32 + u8
        assert_eq!(frame.len(), 1 + 4 + 2 + 1 + 1 + 1 + 1 + 4 + 1);
        let Packet::Control(decoded) = server.decode_frame(&frame).expect("decode") else {
            panic!("expected Control");
        };
        assert!((decoded.angle - std::f32::consts::PI).abs() < 0.001);
        assert_eq!(decoded.speed, 1.0);
        assert_eq!(decoded.tick, 9);
    }

    #[test]
    fn test_unregistered_typed_pair_decodes_generic() {
        let mut registry = Registry::new();
        registry
            .register(
                40,
                Direction::ServerToClient,
                Schema::new("Leaderboard").field("top", FieldType::U16),
            )
            .expect("register");
        let mut client = PacketCodec::client(Arc::new(registry));
        let packet = client.decode_frame(&[40, 0x01, 0x00]).expect("decode");
        let Packet::Generic { opcode, record, .. } = packet else {
            panic!("expected Generic");
        };
        assert_eq!(opcode, 40);
        assert_eq!(record.int("top").expect("top"), 256);
    }
}
