//! # World State
//!
//! Live mirror of the server's dynamic entities, rebuilt from ordered delta
//! records.
//!
//! The [`Session`] is mutated only by its connection's processing path. Each
//! batch of deltas is applied to a private table and then published as a new
//! immutable [`WorldSnapshot`] through a `tokio::sync::watch` channel, so a
//! reader holding a [`SnapshotReader`] sees either all of a batch or none of it.
//!
//! ## Delta policy
//! - `Add` on an existing id replaces the entity.
//! - `Update` on an unknown id creates it from the fields it carries.
//! - `Update` overwrites only the fields present.
//! - `Remove` on an unknown id does nothing.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, trace};

/// Entity identifier, unique within a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct EntityId(pub u32);

impl EntityId {
    /// Build an id for an object that the server numbers per kind
    /// (players, dots and items each start at zero).
    pub fn namespaced(kind: EntityKind, index: u32) -> Self {
        EntityId((u32::from(kind.to_u8()) << 24) | (index & 0x00FF_FFFF))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub enum EntityKind {
    #[default]
    Player,
    Eject,
    Dot,
    Item,
    Other(u8),
}

impl EntityKind {
    pub fn from_u8(raw: u8) -> Self {
        match raw {
            0 => EntityKind::Player,
            1 => EntityKind::Eject,
            2 => EntityKind::Dot,
            3 => EntityKind::Item,
            other => EntityKind::Other(other),
        }
    }

    pub fn to_u8(self) -> u8 {
        match self {
            EntityKind::Player => 0,
            EntityKind::Eject => 1,
            EntityKind::Dot => 2,
            EntityKind::Item => 3,
            EntityKind::Other(raw) => raw,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Entity {
    pub id: EntityId,
    pub kind: EntityKind,
    pub position: (f32, f32),
    /// Radius or mass, depending on the kind.
    pub size: f32,
    /// ARGB color.
    pub color: u32,
    /// Owning player, for ejected mass.
    pub owner: Option<u32>,
    pub flags: u8,
    pub name: Option<String>,
}

/// A sparse set of entity attributes. `None` means "not carried".
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct EntityFields {
    pub kind: Option<EntityKind>,
    pub position: Option<(f32, f32)>,
    pub size: Option<f32>,
    pub color: Option<u32>,
    pub owner: Option<u32>,
    pub flags: Option<u8>,
    pub name: Option<String>,
}

impl EntityFields {
    pub fn position(x: f32, y: f32) -> Self {
        Self {
            position: Some((x, y)),
            ..Self::default()
        }
    }

    /// Bit set of the fields present, in wire order.
    pub fn mask(&self) -> u8 {
        let mut mask = 0;
        if self.kind.is_some() {
            mask |= FIELD_KIND;
        }
        if self.position.is_some() {
            mask |= FIELD_POSITION;
        }
        if self.size.is_some() {
            mask |= FIELD_SIZE;
        }
        if self.color.is_some() {
            mask |= FIELD_COLOR;
        }
        if self.owner.is_some() {
            mask |= FIELD_OWNER;
        }
        if self.flags.is_some() {
            mask |= FIELD_FLAGS;
        }
        if self.name.is_some() {
            mask |= FIELD_NAME;
        }
        mask
    }

    fn overwrite(&self, entity: &mut Entity) {
        if let Some(kind) = self.kind {
            entity.kind = kind;
        }
        if let Some(position) = self.position {
            entity.position = position;
        }
        if let Some(size) = self.size {
            entity.size = size;
        }
        if let Some(color) = self.color {
            entity.color = color;
        }
        if self.owner.is_some() {
            entity.owner = self.owner;
        }
        if let Some(flags) = self.flags {
            entity.flags = flags;
        }
        if self.name.is_some() {
            entity.name.clone_from(&self.name);
        }
    }

    fn to_entity(&self, id: EntityId) -> Entity {
        let mut entity = Entity {
            id,
            ..Entity::default()
        };
        self.overwrite(&mut entity);
        entity
    }
}

pub const FIELD_KIND: u8 = 0x01;
pub const FIELD_POSITION: u8 = 0x02;
pub const FIELD_SIZE: u8 = 0x04;
pub const FIELD_COLOR: u8 = 0x08;
pub const FIELD_OWNER: u8 = 0x10;
pub const FIELD_FLAGS: u8 = 0x20;
pub const FIELD_NAME: u8 = 0x40;

/// One add/update/remove instruction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Delta {
    Add { id: EntityId, fields: EntityFields },
    Update { id: EntityId, fields: EntityFields },
    Remove { id: EntityId },
}

impl Delta {
    pub fn id(&self) -> EntityId {
        match self {
            Delta::Add { id, .. } | Delta::Update { id, .. } | Delta::Remove { id } => *id,
        }
    }
}

/// Immutable point-in-time view of the world.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WorldSnapshot {
    pub entities: BTreeMap<EntityId, Entity>,
    pub local_player: Option<EntityId>,
    pub map_size: f32,
    /// Incremented on every publish.
    pub generation: u64,
}

impl WorldSnapshot {
    pub fn get(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(&id)
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.entities.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn of_kind(&self, kind: EntityKind) -> impl Iterator<Item = &Entity> {
        self.entities.values().filter(move |e| e.kind == kind)
    }

    pub fn local_player(&self) -> Option<&Entity> {
        self.local_player.and_then(|id| self.entities.get(&id))
    }
}

pub type SnapshotPublisher = Arc<watch::Sender<Arc<WorldSnapshot>>>;

/// Read side handed to code outside the connection's processing path.
#[derive(Debug, Clone)]
pub struct SnapshotReader {
    rx: watch::Receiver<Arc<WorldSnapshot>>,
}

impl SnapshotReader {
    pub fn new(publisher: &SnapshotPublisher) -> Self {
        Self {
            rx: publisher.subscribe(),
        }
    }

    pub fn snapshot(&self) -> Arc<WorldSnapshot> {
        self.rx.borrow().clone()
    }

    /// Wait until a snapshot newer than the last one seen is published.
    pub async fn changed(&mut self) -> Option<Arc<WorldSnapshot>> {
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }
}

pub fn publisher() -> SnapshotPublisher {
    let (tx, _rx) = watch::channel(Arc::new(WorldSnapshot::default()));
    Arc::new(tx)
}

/// Entity table owned by one connection.
#[derive(Debug)]
pub struct Session {
    table: BTreeMap<EntityId, Entity>,
    local_player: Option<EntityId>,
    map_size: f32,
    generation: u64,
    publisher: SnapshotPublisher,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self::with_publisher(publisher())
    }

    /// Create a session that publishes into an existing channel, so readers
    /// obtained before the session existed keep working across reconnects.
    pub fn with_publisher(publisher: SnapshotPublisher) -> Self {
        let generation = publisher.borrow().generation;
        Self {
            table: BTreeMap::new(),
            local_player: None,
            map_size: 0.0,
            generation,
            publisher,
        }
    }

    pub fn reader(&self) -> SnapshotReader {
        SnapshotReader::new(&self.publisher)
    }

    pub fn snapshot(&self) -> Arc<WorldSnapshot> {
        self.publisher.borrow().clone()
    }

    pub fn local_player(&self) -> Option<EntityId> {
        self.local_player
    }

    pub fn set_local_player(&mut self, id: EntityId) {
        self.local_player = Some(id);
        self.publish();
    }

    pub fn set_map_size(&mut self, map_size: f32) {
        self.map_size = map_size;
        self.publish();
    }

    pub fn apply_delta(&mut self, delta: &Delta) {
        self.apply_batch(std::slice::from_ref(delta));
    }

    /// Apply `deltas` in order, then publish once.
    pub fn apply_batch(&mut self, deltas: &[Delta]) {
        for delta in deltas {
            self.apply_one(delta);
        }
        debug!(
            count = deltas.len(),
            entities = self.table.len(),
            "Applied delta batch"
        );
        self.publish();
    }

    /// Drop all world state; used when the connection leaves `Connected`.
    pub fn clear(&mut self) {
        self.table.clear();
        self.local_player = None;
        self.map_size = 0.0;
        self.publish();
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    fn apply_one(&mut self, delta: &Delta) {
        match delta {
            Delta::Add { id, fields } => {
                trace!(id = id.0, "add");
                self.table.insert(*id, fields.to_entity(*id));
            }
            Delta::Update { id, fields } => match self.table.get_mut(id) {
                Some(entity) => fields.overwrite(entity),
                None => {
                    trace!(id = id.0, "update for unknown entity, adding");
                    self.table.insert(*id, fields.to_entity(*id));
                }
            },
            Delta::Remove { id } => {
                if self.table.remove(id).is_none() {
                    trace!(id = id.0, "remove for unknown entity ignored");
                }
                if self.local_player == Some(*id) {
                    self.local_player = None;
                }
            }
        }
    }

    fn publish(&mut self) {
        self.generation += 1;
        let snapshot = WorldSnapshot {
            entities: self.table.clone(),
            local_player: self.local_player,
            map_size: self.map_size,
            generation: self.generation,
        };
        self.publisher.send_replace(Arc::new(snapshot));
    }
}
