//! Packet type registry: type id → [`Schema`].
//!
//! The known schemas are built once, on first use, from
//! [`PacketKind::KNOWN`]. Unknown ids get a Generic schema created on demand
//! and cached, so every lookup of the same id yields the same `Arc`.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;

use crate::packet::PacketKind;

/// Description of one packet type.
#[derive(Debug, PartialEq, Eq)]
pub struct Schema {
    kind: PacketKind,
}

impl Schema {
    fn new(kind: PacketKind) -> Self {
        Self { kind }
    }

    pub fn kind(&self) -> PacketKind {
        self.kind
    }

    pub fn type_id(&self) -> i16 {
        self.kind.id()
    }

    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    /// Exact body size, or `None` for the Generic raw-bytes schema.
    pub fn body_size(&self) -> Option<usize> {
        self.kind.body_size()
    }

    pub fn is_generic(&self) -> bool {
        matches!(self.kind, PacketKind::Unknown(_))
    }
}

/// Mapping from header type id to schema.
pub struct PacketRegistry {
    known: HashMap<i16, Arc<Schema>>,
    generic: RwLock<HashMap<i16, Arc<Schema>>>,
}

impl PacketRegistry {
    /// Registry holding every kind in [`PacketKind::KNOWN`].
    pub fn new() -> Self {
        let known = PacketKind::KNOWN
            .into_iter()
            .map(|kind| (kind.id(), Arc::new(Schema::new(kind))))
            .collect();
        Self {
            known,
            generic: RwLock::new(HashMap::new()),
        }
    }

    /// Schema for `type_id`. Never fails: unknown ids resolve to a cached
    /// Generic schema.
    pub fn lookup(&self, type_id: i16) -> Arc<Schema> {
        if let Some(schema) = self.known.get(&type_id) {
            return Arc::clone(schema);
        }

        if let Some(schema) = self.generic.read().get(&type_id) {
            return Arc::clone(schema);
        }

        let mut generic = self.generic.write();
        let schema = generic.entry(type_id).or_insert_with(|| {
            tracing::debug!("Registering generic schema for unknown type id {type_id}");
            Arc::new(Schema::new(PacketKind::Unknown(type_id)))
        });
        Arc::clone(schema)
    }

    /// Number of registered (non-generic) schemas.
    pub fn len(&self) -> usize {
        self.known.len()
    }

    pub fn is_empty(&self) -> bool {
        self.known.is_empty()
    }
}

impl Default for PacketRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// The process-wide registry.
pub fn registry() -> &'static PacketRegistry {
    static REGISTRY: OnceLock<PacketRegistry> = OnceLock::new();
    REGISTRY.get_or_init(PacketRegistry::new)
}

/// Shorthand for `registry().lookup(type_id)`.
pub fn lookup_schema(type_id: i16) -> Arc<Schema> {
    registry().lookup(type_id)
}
