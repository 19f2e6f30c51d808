//! Double-buffered bookkeeping of which entities are touching which.
//!
//! The persistent ledger holds the pairs that were touching at the end of the
//! previous frame. The scratch ledger is rebuilt from nothing during each
//! frame's manifold pass and only answers "was X touching Y this frame" when
//! the frame is reconciled.

use std::collections::{HashMap, HashSet};

use hecs::Entity;

/// Entities currently touching one entity, from that entity's point of view.
#[derive(Debug, Default, Clone)]
struct LedgerRow {
    others: HashSet<Entity>,
}

#[derive(Debug, Default)]
pub struct CollisionLedger {
    persistent: HashMap<Entity, LedgerRow>,
    frame: HashMap<Entity, LedgerRow>,
}

impl CollisionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new manifold pass. Forgets everything observed last frame.
    pub fn begin_frame(&mut self) {
        self.frame.clear();
    }

    /// Record that `entity` touches `other` this frame.
    ///
    /// Returns `true` when the pair was not touching at the end of the previous frame.
    pub fn observe(&mut self, entity: Entity, other: Entity) -> bool {
        self.frame.entry(entity).or_default().others.insert(other);
        self.persistent
            .entry(entity)
            .or_default()
            .others
            .insert(other)
    }

    /// Drop every persistent pair that was not observed this frame, calling
    /// `on_end(entity, other)` for each. Rows left empty are removed.
    pub fn reconcile(&mut self, mut on_end: impl FnMut(Entity, Entity)) {
        let frame = &self.frame;
        self.persistent.retain(|entity, row| {
            let seen = frame.get(entity);
            row.others.retain(|other| {
                let still_touching = seen.is_some_and(|r| r.others.contains(other));
                if !still_touching {
                    on_end(*entity, *other);
                }
                still_touching
            });
            !row.others.is_empty()
        });
        self.frame.clear();
    }

    pub fn is_touching(&self, entity: Entity, other: Entity) -> bool {
        self.persistent
            .get(&entity)
            .is_some_and(|row| row.others.contains(&other))
    }

    /// Entities touching `entity` as of the last reconciled frame.
    pub fn touching(&self, entity: Entity) -> impl Iterator<Item = Entity> + '_ {
        self.persistent
            .get(&entity)
            .into_iter()
            .flat_map(|row| row.others.iter().copied())
    }

    /// Number of entities with at least one persistent contact.
    pub fn len(&self) -> usize {
        self.persistent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.persistent.is_empty()
    }

    /// Number of entities observed so far in the current frame.
    pub fn scratch_len(&self) -> usize {
        self.frame.len()
    }
}
