//! Collision notifications: listener registry and dispatch of classified contacts.
//!
//! Three notification kinds exist, each at global and per-entity scope:
//!
//! - `contact`: every step for every manifold with at least one contact point.
//! - `collisionstart`: when a pair starts touching.
//! - `collisionend`: when a pair stops touching.
//!
//! Handlers run synchronously inside [`PhysicsSystem::advance`](super::PhysicsSystem::advance).
//! They cannot reach the system itself; structural changes are queued on the
//! [`Deferred`] they receive and applied once dispatch is over.

use std::collections::HashMap;

use hecs::Entity;

use super::backend::{ConstraintHandle, RawContact};
use super::contact::{self, ContactResult, Side, SingleContactResult};
use super::ledger::CollisionLedger;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CollisionEventKind {
    Contact,
    CollisionStart,
    CollisionEnd,
}

impl CollisionEventKind {
    pub const ALL: [CollisionEventKind; 3] = [
        CollisionEventKind::Contact,
        CollisionEventKind::CollisionStart,
        CollisionEventKind::CollisionEnd,
    ];

    /// Notification name as exposed to scripts and logs.
    pub fn name(self) -> &'static str {
        match self {
            CollisionEventKind::Contact => "contact",
            CollisionEventKind::CollisionStart => "collisionstart",
            CollisionEventKind::CollisionEnd => "collisionend",
        }
    }
}

/// Handle returned by listener registration, used to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

/// Structural mutation requested by a handler during dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeferredOp {
    RemoveBody(Entity),
    AddBody(Entity),
    DestroyBody(Entity),
    RemoveConstraint(ConstraintHandle),
}

/// Queue of mutations applied after the current step's events have been dispatched.
#[derive(Debug, Default)]
pub struct Deferred {
    ops: Vec<DeferredOp>,
}

impl Deferred {
    pub fn new() -> Self {
        Self::default()
    }

    /// Detach the entity's body from the simulation world.
    pub fn remove_body(&mut self, entity: Entity) {
        self.ops.push(DeferredOp::RemoveBody(entity));
    }

    /// Re-attach a previously detached body.
    pub fn add_body(&mut self, entity: Entity) {
        self.ops.push(DeferredOp::AddBody(entity));
    }

    /// Destroy the entity's body and remove its `PhysicsBody` component.
    pub fn destroy_body(&mut self, entity: Entity) {
        self.ops.push(DeferredOp::DestroyBody(entity));
    }

    pub fn remove_constraint(&mut self, constraint: ConstraintHandle) {
        self.ops.push(DeferredOp::RemoveConstraint(constraint));
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Take the queued operations in request order.
    pub fn take(&mut self) -> Vec<DeferredOp> {
        std::mem::take(&mut self.ops)
    }
}

/// Global `contact` handler.
pub type ContactHandler = Box<dyn FnMut(&SingleContactResult, &mut Deferred)>;
/// `collisionstart` handler, and per-entity `contact` handler. Receives the entity the
/// result is seen from.
pub type CollisionHandler = Box<dyn FnMut(Entity, &ContactResult, &mut Deferred)>;
/// `collisionend` handler. Receives the entity and the other entity it stopped touching.
pub type EndHandler = Box<dyn FnMut(Entity, Entity, &mut Deferred)>;

struct Slot<F> {
    id: ListenerId,
    handler: F,
}

fn remove_slot<F>(slots: &mut Vec<Slot<F>>, id: ListenerId) -> bool {
    let before = slots.len();
    slots.retain(|slot| slot.id != id);
    slots.len() != before
}

#[derive(Default)]
struct EntityListeners {
    contact: Vec<Slot<CollisionHandler>>,
    start: Vec<Slot<CollisionHandler>>,
    end: Vec<Slot<EndHandler>>,
}

impl EntityListeners {
    fn is_empty(&self) -> bool {
        self.contact.is_empty() && self.start.is_empty() && self.end.is_empty()
    }

    fn has(&self, kind: CollisionEventKind) -> bool {
        match kind {
            CollisionEventKind::Contact => !self.contact.is_empty(),
            CollisionEventKind::CollisionStart => !self.start.is_empty(),
            CollisionEventKind::CollisionEnd => !self.end.is_empty(),
        }
    }
}

/// Registry of global and per-entity collision listeners.
#[derive(Default)]
pub struct EventRegistry {
    next_id: u64,
    contact: Vec<Slot<ContactHandler>>,
    start: Vec<Slot<CollisionHandler>>,
    end: Vec<Slot<EndHandler>>,
    entities: HashMap<Entity, EntityListeners>,
}

impl std::fmt::Debug for EventRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventRegistry")
            .field("contact", &self.contact.len())
            .field("collisionstart", &self.start.len())
            .field("collisionend", &self.end.len())
            .field("entities", &self.entities.len())
            .finish()
    }
}

impl EventRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate_id(&mut self) -> ListenerId {
        self.next_id += 1;
        ListenerId(self.next_id)
    }

    pub fn on_contact(
        &mut self,
        handler: impl FnMut(&SingleContactResult, &mut Deferred) + 'static,
    ) -> ListenerId {
        let id = self.allocate_id();
        self.contact.push(Slot {
            id,
            handler: Box::new(handler),
        });
        id
    }

    pub fn on_collision_start(
        &mut self,
        handler: impl FnMut(Entity, &ContactResult, &mut Deferred) + 'static,
    ) -> ListenerId {
        let id = self.allocate_id();
        self.start.push(Slot {
            id,
            handler: Box::new(handler),
        });
        id
    }

    pub fn on_collision_end(
        &mut self,
        handler: impl FnMut(Entity, Entity, &mut Deferred) + 'static,
    ) -> ListenerId {
        let id = self.allocate_id();
        self.end.push(Slot {
            id,
            handler: Box::new(handler),
        });
        id
    }

    pub fn on_entity_contact(
        &mut self,
        entity: Entity,
        handler: impl FnMut(Entity, &ContactResult, &mut Deferred) + 'static,
    ) -> ListenerId {
        let id = self.allocate_id();
        self.entities.entry(entity).or_default().contact.push(Slot {
            id,
            handler: Box::new(handler),
        });
        id
    }

    pub fn on_entity_collision_start(
        &mut self,
        entity: Entity,
        handler: impl FnMut(Entity, &ContactResult, &mut Deferred) + 'static,
    ) -> ListenerId {
        let id = self.allocate_id();
        self.entities.entry(entity).or_default().start.push(Slot {
            id,
            handler: Box::new(handler),
        });
        id
    }

    pub fn on_entity_collision_end(
        &mut self,
        entity: Entity,
        handler: impl FnMut(Entity, Entity, &mut Deferred) + 'static,
    ) -> ListenerId {
        let id = self.allocate_id();
        self.entities.entry(entity).or_default().end.push(Slot {
            id,
            handler: Box::new(handler),
        });
        id
    }

    /// Unregister a listener. Returns `false` if the id is unknown.
    pub fn off(&mut self, id: ListenerId) -> bool {
        if remove_slot(&mut self.contact, id)
            || remove_slot(&mut self.start, id)
            || remove_slot(&mut self.end, id)
        {
            return true;
        }

        let mut removed = false;
        self.entities.retain(|_, listeners| {
            if !removed {
                removed = remove_slot(&mut listeners.contact, id)
                    || remove_slot(&mut listeners.start, id)
                    || remove_slot(&mut listeners.end, id);
            }
            !listeners.is_empty()
        });
        removed
    }

    /// Drop every listener registered for `entity`.
    pub fn clear_entity(&mut self, entity: Entity) {
        self.entities.remove(&entity);
    }

    pub fn has_global(&self, kind: CollisionEventKind) -> bool {
        match kind {
            CollisionEventKind::Contact => !self.contact.is_empty(),
            CollisionEventKind::CollisionStart => !self.start.is_empty(),
            CollisionEventKind::CollisionEnd => !self.end.is_empty(),
        }
    }

    pub fn has_entity(&self, entity: Entity, kind: CollisionEventKind) -> bool {
        self.entities
            .get(&entity)
            .is_some_and(|listeners| listeners.has(kind))
    }

    /// Whether a `kind` notification about `entity` would reach anyone.
    pub fn wants(&self, entity: Entity, kind: CollisionEventKind) -> bool {
        match kind {
            // Global contact listeners get the manifold-level payload, not the entity one.
            CollisionEventKind::Contact => self.has_entity(entity, kind),
            _ => self.has_global(kind) || self.has_entity(entity, kind),
        }
    }

    /// Whether any listener of `kind` exists at any scope.
    pub fn has_listener(&self, kind: CollisionEventKind) -> bool {
        self.has_global(kind) || self.entities.values().any(|l| l.has(kind))
    }

    pub fn is_empty(&self) -> bool {
        self.contact.is_empty()
            && self.start.is_empty()
            && self.end.is_empty()
            && self.entities.is_empty()
    }

    pub fn emit_contact(&mut self, result: &SingleContactResult, deferred: &mut Deferred) {
        for slot in &mut self.contact {
            (slot.handler)(result, deferred);
        }
    }

    pub fn emit_entity_contact(
        &mut self,
        entity: Entity,
        result: &ContactResult,
        deferred: &mut Deferred,
    ) {
        if let Some(listeners) = self.entities.get_mut(&entity) {
            for slot in &mut listeners.contact {
                (slot.handler)(entity, result, deferred);
            }
        }
    }

    /// Fire `collisionstart` for `entity` at entity scope, then global scope.
    pub fn emit_collision_start(
        &mut self,
        entity: Entity,
        result: &ContactResult,
        deferred: &mut Deferred,
    ) {
        if let Some(listeners) = self.entities.get_mut(&entity) {
            for slot in &mut listeners.start {
                (slot.handler)(entity, result, deferred);
            }
        }
        for slot in &mut self.start {
            (slot.handler)(entity, result, deferred);
        }
    }

    /// Fire `collisionend` for `entity` at entity scope, then global scope.
    pub fn emit_collision_end(&mut self, entity: Entity, other: Entity, deferred: &mut Deferred) {
        if let Some(listeners) = self.entities.get_mut(&entity) {
            for slot in &mut listeners.end {
                (slot.handler)(entity, other, deferred);
            }
        }
        for slot in &mut self.end {
            (slot.handler)(entity, other, deferred);
        }
    }
}

/// One body of a manifold, resolved to its entity.
#[derive(Debug, Clone, Copy)]
pub struct Participant {
    pub entity: Entity,
    /// Whether the body's `PhysicsBody` reports contacts.
    pub report_contacts: bool,
}

/// Classify one manifold and fire its notifications.
///
/// The global `contact` payload uses the first contact point only. Per-entity
/// payloads carry every point, seen from the receiving entity. Payloads are
/// built only when a listener will receive them; the ledger is updated either way.
pub fn dispatch_manifold(
    registry: &mut EventRegistry,
    ledger: &mut CollisionLedger,
    deferred: &mut Deferred,
    a: Participant,
    b: Participant,
    contacts: &[RawContact],
) {
    let Some(first) = contacts.first() else {
        return;
    };

    if registry.has_global(CollisionEventKind::Contact) {
        let (contact, _) = contact::extract(first);
        let result = SingleContactResult {
            a: a.entity,
            b: b.entity,
            contact,
        };
        registry.emit_contact(&result, deferred);
    }

    for (me, other, side) in [(a, b, Side::A), (b, a, Side::B)] {
        if !me.report_contacts {
            continue;
        }

        let started = ledger.observe(me.entity, other.entity);
        let wants_contact = registry.wants(me.entity, CollisionEventKind::Contact);
        let wants_start = started && registry.wants(me.entity, CollisionEventKind::CollisionStart);
        if !wants_contact && !wants_start {
            continue;
        }

        let result = ContactResult {
            other: other.entity,
            contacts: contact::extract_side(contacts, side),
        };
        if wants_contact {
            registry.emit_entity_contact(me.entity, &result, deferred);
        }
        if wants_start {
            registry.emit_collision_start(me.entity, &result, deferred);
        }
    }
}

/// Reconcile the ledger and fire `collisionend` for every pair that stopped touching.
pub fn dispatch_ended(
    registry: &mut EventRegistry,
    ledger: &mut CollisionLedger,
    deferred: &mut Deferred,
) {
    ledger.reconcile(|entity, other| {
        if registry.wants(entity, CollisionEventKind::CollisionEnd) {
            registry.emit_collision_end(entity, other, deferred);
        }
    });
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use glam::Vec3;

    use super::*;

    fn raw(x: f32) -> RawContact {
        RawContact {
            local_point_a: Vec3::new(x, -0.5, 0.0),
            local_point_b: Vec3::new(x, 0.5, 0.0),
            world_point_a: Vec3::new(x, 0.0, 0.0),
            world_point_b: Vec3::new(x, -0.01, 0.0),
            normal_on_b: Vec3::Y,
            distance: -0.01,
        }
    }

    fn pair() -> (hecs::World, Participant, Participant) {
        let mut world = hecs::World::new();
        let a = world.spawn(());
        let b = world.spawn(());
        (
            world,
            Participant {
                entity: a,
                report_contacts: true,
            },
            Participant {
                entity: b,
                report_contacts: true,
            },
        )
    }

    #[test]
    fn test_event_names() {
        let names: Vec<_> = CollisionEventKind::ALL.iter().map(|k| k.name()).collect();
        assert_eq!(names, ["contact", "collisionstart", "collisionend"]);
    }

    #[test]
    fn test_off_removes_listener() {
        let (_world, a, _) = pair();
        let mut registry = EventRegistry::new();
        let global = registry.on_contact(|_, _| {});
        let local = registry.on_entity_collision_end(a.entity, |_, _, _| {});

        assert!(registry.has_global(CollisionEventKind::Contact));
        assert!(registry.has_entity(a.entity, CollisionEventKind::CollisionEnd));

        assert!(registry.off(global));
        assert!(registry.off(local));
        assert!(!registry.off(local), "second removal is a no-op");
        assert!(registry.is_empty());
    }

    #[test]
    fn test_global_contact_uses_first_point() {
        let (_world, a, b) = pair();
        let mut registry = EventRegistry::new();
        let mut ledger = CollisionLedger::new();
        let mut deferred = Deferred::new();

        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        registry.on_contact(move |result, _| sink.borrow_mut().push(*result));

        let contacts = [raw(1.0), raw(2.0), raw(3.0)];
        ledger.begin_frame();
        dispatch_manifold(&mut registry, &mut ledger, &mut deferred, a, b, &contacts);

        let seen = seen.borrow();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].a, a.entity);
        assert_eq!(seen[0].b, b.entity);
        assert_eq!(seen[0].contact.point, contacts[0].world_point_a);
        assert_eq!(seen[0].contact.normal, contacts[0].normal_on_b);
    }

    #[test]
    fn test_start_payload_is_seen_from_each_entity() {
        let (_world, a, b) = pair();
        let mut registry = EventRegistry::new();
        let mut ledger = CollisionLedger::new();
        let mut deferred = Deferred::new();

        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        registry.on_collision_start(move |entity, result, _| {
            sink.borrow_mut().push((entity, result.clone()))
        });

        let contacts = [raw(1.0), raw(2.0)];
        ledger.begin_frame();
        dispatch_manifold(&mut registry, &mut ledger, &mut deferred, a, b, &contacts);

        let seen = seen.borrow();
        assert_eq!(seen.len(), 2);
        let (entity, from_a) = &seen[0];
        assert_eq!(*entity, a.entity);
        assert_eq!(from_a.other, b.entity);
        assert_eq!(from_a.contacts.len(), 2);
        assert_eq!(from_a.contacts[1].point, contacts[1].world_point_a);

        let (entity, from_b) = &seen[1];
        assert_eq!(*entity, b.entity);
        assert_eq!(from_b.other, a.entity);
        for (pa, pb) in from_a.contacts.iter().zip(&from_b.contacts) {
            assert_eq!(pb.normal, -pa.normal);
            assert_eq!(pb.point, pa.point_other);
            assert_eq!(pb.local_point, pa.local_point_other);
        }
    }

    #[test]
    fn test_non_reporting_side_is_silent() {
        let (_world, a, mut b) = pair();
        b.report_contacts = false;
        let mut registry = EventRegistry::new();
        let mut ledger = CollisionLedger::new();
        let mut deferred = Deferred::new();

        let started = Rc::new(RefCell::new(Vec::new()));
        let sink = started.clone();
        registry.on_collision_start(move |entity, _, _| sink.borrow_mut().push(entity));

        ledger.begin_frame();
        dispatch_manifold(&mut registry, &mut ledger, &mut deferred, a, b, &[raw(0.0)]);

        assert_eq!(*started.borrow(), vec![a.entity]);
        assert!(!ledger.is_touching(b.entity, a.entity));
    }

    #[test]
    fn test_end_fires_on_reconcile() {
        let (_world, a, b) = pair();
        let mut registry = EventRegistry::new();
        let mut ledger = CollisionLedger::new();
        let mut deferred = Deferred::new();

        let ended = Rc::new(RefCell::new(Vec::new()));
        let sink = ended.clone();
        registry.on_entity_collision_end(a.entity, move |entity, other, deferred| {
            sink.borrow_mut().push((entity, other));
            deferred.remove_body(entity);
        });

        ledger.begin_frame();
        dispatch_manifold(&mut registry, &mut ledger, &mut deferred, a, b, &[raw(0.0)]);
        dispatch_ended(&mut registry, &mut ledger, &mut deferred);
        assert!(ended.borrow().is_empty());

        ledger.begin_frame();
        dispatch_ended(&mut registry, &mut ledger, &mut deferred);
        assert_eq!(*ended.borrow(), vec![(a.entity, b.entity)]);
        assert_eq!(deferred.take(), vec![DeferredOp::RemoveBody(a.entity)]);
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_empty_manifold_ignored() {
        let (_world, a, b) = pair();
        let mut registry = EventRegistry::new();
        let mut ledger = CollisionLedger::new();
        let mut deferred = Deferred::new();

        ledger.begin_frame();
        dispatch_manifold(&mut registry, &mut ledger, &mut deferred, a, b, &[]);
        assert_eq!(ledger.scratch_len(), 0);
    }
}
