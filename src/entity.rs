//! Live entities and their property store
//!
//! The audio server announces modules, cards, devices and streams by kind and
//! index. The [`Registry`] keeps a copy of each live entity's name and
//! properties and hands out generation-checked [`EntityHandle`]s, so a handle
//! kept after removal can never alias a newer entity that reuses the slot.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

/// Property carrying the id of the process that owns a stream
pub const PROP_PROCESS_ID: &str = "application.process.id";
/// Property carrying the uid of the process that owns a stream
pub const PROP_PROCESS_UID: &str = "application.process.uid";
/// Property carrying the executable of the process that owns a stream
pub const PROP_PROCESS_BINARY: &str = "application.process.binary";
/// Property carrying the client name of a stream
pub const PROP_CLIENT_NAME: &str = "application.name";
/// Comma separated profiles a card supports
pub const PROP_CARD_PROFILES: &str = "card.profiles";
/// Group a stream currently belongs to (written only by the group model)
pub const PROP_POLICY_GROUP: &str = "policy.group";
/// Routing mode stamped on a route target
pub const PROP_POLICY_MODE: &str = "policy.mode";
/// Hardware id stamped on a route target
pub const PROP_POLICY_HWID: &str = "policy.hwid";

/// Kinds of objects the audio server exposes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntityKind {
    Module,
    Card,
    Sink,
    Source,
    SinkInput,
    SourceOutput,
}

impl EntityKind {
    pub const ALL: [EntityKind; 6] = [
        Self::Module,
        Self::Card,
        Self::Sink,
        Self::Source,
        Self::SinkInput,
        Self::SourceOutput,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Module => "module",
            Self::Card => "card",
            Self::Sink => "sink",
            Self::Source => "source",
            Self::SinkInput => "sink-input",
            Self::SourceOutput => "source-output",
        }
    }

    #[must_use]
    pub fn is_stream(self) -> bool {
        matches!(self, Self::SinkInput | Self::SourceOutput)
    }

    #[must_use]
    pub fn is_device(self) -> bool {
        matches!(self, Self::Sink | Self::Source)
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == s || k.as_str().replace('-', "_") == s)
            .ok_or_else(|| {
                format!(
                    "unknown object kind '{s}' (expected one of: \
                     module, card, sink, source, sink-input, source-output)"
                )
            })
    }
}

/// Generation-checked reference to a live entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntityHandle {
    slot: u32,
    generation: u32,
}

/// Anything rule predicates can read attributes from
pub trait Attributes {
    /// Resolve an attribute. `"name"` is the entity's own name.
    fn attribute(&self, property: &str) -> Option<&str>;
}

/// A module, card, device or stream as last announced by the audio server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entity {
    pub kind: EntityKind,
    pub index: u32,
    pub name: String,
    pub properties: BTreeMap<String, String>,
}

impl Entity {
    #[must_use]
    pub fn new(kind: EntityKind, index: u32, name: impl Into<String>) -> Self {
        Self {
            kind,
            index,
            name: name.into(),
            properties: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    /// Profiles listed in [`PROP_CARD_PROFILES`]
    #[must_use]
    pub fn profiles(&self) -> Vec<&str> {
        self.property(PROP_CARD_PROFILES)
            .map(|p| {
                p.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl Attributes for Entity {
    fn attribute(&self, property: &str) -> Option<&str> {
        if property == "name" {
            Some(&self.name)
        } else {
            self.property(property)
        }
    }
}

#[derive(Debug, Default)]
struct Slot {
    generation: u32,
    entity: Option<Entity>,
}

/// Owner of every live entity, indexed by slot and by `(kind, index)`
#[derive(Debug, Default)]
pub struct Registry {
    slots: Vec<Slot>,
    free: Vec<u32>,
    by_index: HashMap<(EntityKind, u32), EntityHandle>,
}

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an entity and return its handle.
    ///
    /// An entity with the same kind and index replaces the previous one, which
    /// is returned alongside so the caller can unwind whatever referenced it.
    pub fn insert(&mut self, entity: Entity) -> (EntityHandle, Option<Entity>) {
        let replaced = self
            .by_index
            .get(&(entity.kind, entity.index))
            .copied()
            .and_then(|old| self.remove(old));

        let key = (entity.kind, entity.index);
        let slot = match self.free.pop() {
            Some(slot) => slot,
            None => {
                self.slots.push(Slot::default());
                (self.slots.len() - 1) as u32
            }
        };
        let entry = &mut self.slots[slot as usize];
        entry.entity = Some(entity);
        let handle = EntityHandle {
            slot,
            generation: entry.generation,
        };
        self.by_index.insert(key, handle);
        (handle, replaced)
    }

    /// Remove an entity. Stale handles return `None`.
    pub fn remove(&mut self, handle: EntityHandle) -> Option<Entity> {
        let slot = self.slots.get_mut(handle.slot as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        let entity = slot.entity.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.slot);
        self.by_index.remove(&(entity.kind, entity.index));
        Some(entity)
    }

    #[must_use]
    pub fn get(&self, handle: EntityHandle) -> Option<&Entity> {
        let slot = self.slots.get(handle.slot as usize)?;
        if slot.generation == handle.generation {
            slot.entity.as_ref()
        } else {
            None
        }
    }

    pub fn get_mut(&mut self, handle: EntityHandle) -> Option<&mut Entity> {
        let slot = self.slots.get_mut(handle.slot as usize)?;
        if slot.generation == handle.generation {
            slot.entity.as_mut()
        } else {
            None
        }
    }

    #[must_use]
    pub fn is_live(&self, handle: EntityHandle) -> bool {
        self.get(handle).is_some()
    }

    #[must_use]
    pub fn lookup(&self, kind: EntityKind, index: u32) -> Option<EntityHandle> {
        self.by_index.get(&(kind, index)).copied()
    }

    /// Live entities of one kind, ordered by server index
    #[must_use]
    pub fn of_kind(&self, kind: EntityKind) -> Vec<(EntityHandle, &Entity)> {
        let mut found: Vec<_> = self
            .by_index
            .iter()
            .filter(|((k, _), _)| *k == kind)
            .filter_map(|(_, h)| self.get(*h).map(|e| (*h, e)))
            .collect();
        found.sort_by_key(|(_, e)| e.index);
        found
    }

    #[must_use]
    pub fn find_by_name(&self, kind: EntityKind, name: &str) -> Option<EntityHandle> {
        self.of_kind(kind)
            .into_iter()
            .find(|(_, e)| e.name == name)
            .map(|(h, _)| h)
    }

    #[must_use]
    pub fn count(&self, kind: EntityKind) -> usize {
        self.by_index.keys().filter(|(k, _)| *k == kind).count()
    }

    /// Set a property. Returns `Some(true)` if the stored value changed,
    /// `Some(false)` if it already held `value`, `None` for a stale handle.
    pub fn set_property(&mut self, handle: EntityHandle, key: &str, value: &str) -> Option<bool> {
        let entity = self.get_mut(handle)?;
        if entity.property(key) == Some(value) {
            return Some(false);
        }
        entity.properties.insert(key.to_string(), value.to_string());
        Some(true)
    }

    /// Delete a property. Returns `Some(true)` if it was present, `None` for a stale handle.
    pub fn delete_property(&mut self, handle: EntityHandle, key: &str) -> Option<bool> {
        let entity = self.get_mut(handle)?;
        Some(entity.properties.remove(key).is_some())
    }
}
