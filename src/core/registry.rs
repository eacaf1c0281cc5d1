//! # Packet Registry
//!
//! Maps `(opcode, direction)` to the schema and envelope used to encode or
//! decode the frame. Each pair may be registered once; the registry is built
//! before a connection starts and shared read-only afterwards.

use crate::core::packet;
use crate::core::schema::Schema;
use crate::error::{ProtocolError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    ClientToServer,
    ServerToClient,
}

impl Direction {
    pub fn opposite(self) -> Self {
        match self {
            Direction::ClientToServer => Direction::ServerToClient,
            Direction::ServerToClient => Direction::ClientToServer,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::ClientToServer => f.write_str("client->server"),
            Direction::ServerToClient => f.write_str("server->client"),
        }
    }
}

/// Which payload transform a frame travels under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Envelope {
    /// The connection's session transform (keystream once connected).
    Session,
    /// Never transformed.
    Clear,
    /// Self-seeded byte shuffle of the connect request.
    ConnectShuffle,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PacketSpec {
    pub opcode: u8,
    pub direction: Direction,
    pub envelope: Envelope,
    pub schema: Schema,
}

impl PacketSpec {
    pub fn name(&self) -> &'static str {
        self.schema.name()
    }
}

#[derive(Debug, Clone, Default)]
pub struct Registry {
    specs: HashMap<(u8, Direction), PacketSpec>,
}

impl Registry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding every packet the client understands.
    pub fn standard() -> Result<Self> {
        let mut registry = Self::new();
        for (opcode, direction, envelope, schema) in packet::standard_schemas() {
            registry.register_with(opcode, direction, schema, envelope)?;
        }
        Ok(registry)
    }

    /// Register a session-enveloped schema.
    pub fn register(&mut self, opcode: u8, direction: Direction, schema: Schema) -> Result<()> {
        self.register_with(opcode, direction, schema, Envelope::Session)
    }

    pub fn register_with(
        &mut self,
        opcode: u8,
        direction: Direction,
        schema: Schema,
        envelope: Envelope,
    ) -> Result<()> {
        if self.specs.contains_key(&(opcode, direction)) {
            return Err(ProtocolError::DuplicateOpcode { opcode, direction });
        }
        schema.validate()?;

        debug!(opcode, %direction, name = schema.name(), "Registered packet schema");
        self.specs.insert(
            (opcode, direction),
            PacketSpec {
                opcode,
                direction,
                envelope,
                schema,
            },
        );
        Ok(())
    }

    pub fn lookup(&self, opcode: u8, direction: Direction) -> Option<&PacketSpec> {
        self.specs.get(&(opcode, direction))
    }

    /// Like [`lookup`](Self::lookup) but failing with `UnknownOpcode`.
    pub fn require(&self, opcode: u8, direction: Direction) -> Result<&PacketSpec> {
        self.lookup(opcode, direction)
            .ok_or(ProtocolError::UnknownOpcode { opcode, direction })
    }

    pub fn contains(&self, opcode: u8, direction: Direction) -> bool {
        self.specs.contains_key(&(opcode, direction))
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PacketSpec> {
        self.specs.values()
    }
}
