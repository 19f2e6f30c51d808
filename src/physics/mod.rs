//! Binding between a `hecs` world and a rigid-body simulation.
//!
//! # Architecture
//!
//! [`PhysicsSystem::advance`] runs once per frame:
//!
//! 1. Step the backend (fixed timestep, bounded sub-steps)
//! 2. Synchronize transforms (dynamic bodies → entities, entities → kinematic bodies)
//! 3. Walk the backend's contact manifolds and classify each pair
//! 4. Fire `contact` / `collisionstart` notifications
//! 5. Reconcile the collision ledger and fire `collisionend`
//! 6. Apply mutations queued by handlers

pub mod backend;
pub mod contact;
#[cfg(feature = "cpu-backend")]
pub mod cpu;
pub mod error;
pub mod events;
pub mod ledger;
pub mod raycast;

use std::cell::Cell;
use std::collections::HashMap;

use glam::{Quat, Vec3};
use hecs::Entity;
use tracing::{debug, trace, warn};

use crate::ecs::components::physics::{BodyDesc, BodyKind, PhysicsBody};
use crate::ecs::components::transform::{GlobalTransform, Transform};
use crate::ecs::systems::sync_transforms;

use self::backend::{BodyHandle, ConstraintDesc, ConstraintHandle, PhysicsBackend, Pose};
use self::error::PhysicsError;
use self::events::{Deferred, DeferredOp, EventRegistry, Participant};
use self::ledger::CollisionLedger;
use self::raycast::RaycastResult;

/// Configuration for the physics simulation.
#[derive(Debug, Clone, PartialEq)]
pub struct PhysicsConfig {
    /// Gravity vector. Default: (0, -9.81, 0).
    pub gravity: Vec3,
    /// Fixed timestep for physics updates in seconds. Default: 1/60.
    pub fixed_timestep: f64,
    /// Maximum number of sub-steps per frame. Default: 10.
    pub max_substeps: u32,
    /// Number of constraint solver iterations. Default: 10.
    pub solver_iterations: u32,
}

impl Default for PhysicsConfig {
    fn default() -> Self {
        Self {
            gravity: Vec3::new(0.0, -9.81, 0.0),
            fixed_timestep: 1.0 / 60.0,
            max_substeps: 10,
            solver_iterations: 10,
        }
    }
}

impl PhysicsConfig {
    pub fn validate(&self) -> Result<(), PhysicsError> {
        if !self.gravity.is_finite() {
            return Err(PhysicsError::InvalidConfig("gravity must be finite"));
        }
        if !(self.fixed_timestep.is_finite() && self.fixed_timestep > 0.0) {
            return Err(PhysicsError::InvalidConfig("fixed_timestep must be > 0"));
        }
        if self.max_substeps == 0 {
            return Err(PhysicsError::InvalidConfig("max_substeps must be > 0"));
        }
        if self.solver_iterations == 0 {
            return Err(PhysicsError::InvalidConfig("solver_iterations must be > 0"));
        }
        Ok(())
    }
}

/// Side-table entry for a body owned by an entity.
#[derive(Debug, Clone, Copy)]
struct BodyEntry {
    entity: Entity,
    kind: BodyKind,
    report_contacts: bool,
}

/// Owns the simulation backend and keeps it in step with a `hecs` world.
pub struct PhysicsSystem {
    config: PhysicsConfig,
    backend: Option<Box<dyn PhysicsBackend>>,
    bodies: HashMap<BodyHandle, BodyEntry>,
    entities: HashMap<Entity, BodyHandle>,
    ledger: CollisionLedger,
    events: EventRegistry,
    deferred: Deferred,
    warned_unavailable: Cell<bool>,
}

impl std::fmt::Debug for PhysicsSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhysicsSystem")
            .field("config", &self.config)
            .field("backend", &self.backend.as_ref().map(|b| b.name().to_owned()))
            .field("bodies", &self.bodies.len())
            .field("ledger", &self.ledger)
            .field("events", &self.events)
            .finish()
    }
}

impl PhysicsSystem {
    /// Create a system driving the bundled CPU backend.
    #[cfg(feature = "cpu-backend")]
    pub fn new(config: PhysicsConfig) -> Result<Self, PhysicsError> {
        let backend = cpu::CpuBackend::new(config.gravity, config.solver_iterations);
        Self::with_backend(config, Box::new(backend))
    }

    /// Create a system driving the given backend.
    pub fn with_backend(
        config: PhysicsConfig,
        mut backend: Box<dyn PhysicsBackend>,
    ) -> Result<Self, PhysicsError> {
        config.validate()?;
        backend.set_gravity(config.gravity);
        debug!("Physics backend `{}` attached", backend.name());
        Ok(Self::build(config, Some(backend)))
    }

    /// Create a system with no simulation backend. Every operation is a no-op.
    pub fn without_backend(config: PhysicsConfig) -> Result<Self, PhysicsError> {
        config.validate()?;
        Ok(Self::build(config, None))
    }

    fn build(config: PhysicsConfig, backend: Option<Box<dyn PhysicsBackend>>) -> Self {
        Self {
            config,
            backend,
            bodies: HashMap::new(),
            entities: HashMap::new(),
            ledger: CollisionLedger::new(),
            events: EventRegistry::new(),
            deferred: Deferred::new(),
            warned_unavailable: Cell::new(false),
        }
    }

    fn warn_unavailable(&self) {
        if !self.warned_unavailable.replace(true) {
            warn!("Physics backend unavailable; simulation calls are ignored");
        }
    }

    pub fn config(&self) -> &PhysicsConfig {
        &self.config
    }

    pub fn has_backend(&self) -> bool {
        self.backend.is_some()
    }

    pub fn backend(&self) -> Option<&dyn PhysicsBackend> {
        self.backend.as_deref()
    }

    pub fn backend_mut(&mut self) -> Option<&mut (dyn PhysicsBackend + 'static)> {
        self.backend.as_deref_mut()
    }

    /// Listener registry for collision notifications.
    pub fn events(&self) -> &EventRegistry {
        &self.events
    }

    pub fn events_mut(&mut self) -> &mut EventRegistry {
        &mut self.events
    }

    /// Touching pairs as of the last reconciled frame.
    pub fn ledger(&self) -> &CollisionLedger {
        &self.ledger
    }

    /// Number of bodies owned by entities.
    pub fn body_count(&self) -> usize {
        self.bodies.len()
    }

    pub fn entity_for_body(&self, body: BodyHandle) -> Option<Entity> {
        self.bodies.get(&body).map(|entry| entry.entity)
    }

    pub fn body_handle(&self, entity: Entity) -> Option<BodyHandle> {
        self.entities.get(&entity).copied()
    }

    // ---- Body lifecycle ----

    /// Create a body for `entity` and attach a [`PhysicsBody`] component.
    ///
    /// The body starts at the entity's `Transform` (identity if it has none) and
    /// joins the simulation world when `desc.enabled` is set. Returns `Ok(None)`
    /// when no backend is available.
    pub fn create_body(
        &mut self,
        world: &mut hecs::World,
        entity: Entity,
        desc: &BodyDesc,
    ) -> Result<Option<BodyHandle>, PhysicsError> {
        desc.validate()?;
        match world.satisfies::<&PhysicsBody>(entity) {
            Err(_) => return Err(PhysicsError::EntityNotFound(entity)),
            Ok(true) => return Err(PhysicsError::AlreadyHasBody(entity)),
            Ok(false) => {}
        }

        let Some(backend) = self.backend.as_deref_mut() else {
            self.warn_unavailable();
            return Ok(None);
        };

        let pose = world
            .get::<&Transform>(entity)
            .map(|t| t.pose())
            .unwrap_or_default();

        let handle = backend.create_body(desc, pose);
        if desc.enabled {
            backend.add_body(handle);
        }
        world
            .insert_one(
                entity,
                PhysicsBody::new(handle, desc.kind, desc.report_contacts),
            )
            .map_err(|_| PhysicsError::EntityNotFound(entity))?;

        self.bodies.insert(
            handle,
            BodyEntry {
                entity,
                kind: desc.kind,
                report_contacts: desc.report_contacts,
            },
        );
        self.entities.insert(entity, handle);
        debug!(
            "Created {:?} body {:?} for entity {:?}",
            desc.kind, handle, entity
        );
        Ok(Some(handle))
    }

    /// Take the entity's body out of the simulation world without destroying it.
    ///
    /// Returns `false` if the entity has no body or the body is not in the world.
    pub fn remove_body(&mut self, entity: Entity) -> bool {
        let Some(&handle) = self.entities.get(&entity) else {
            return false;
        };
        let Some(backend) = self.backend.as_deref_mut() else {
            self.warn_unavailable();
            return false;
        };
        let removed = backend.remove_body(handle);
        if removed {
            debug!("Removed body {:?} of entity {:?} from the world", handle, entity);
        }
        removed
    }

    /// Put a previously removed body back into the simulation world.
    pub fn add_body(&mut self, entity: Entity) -> bool {
        let Some(&handle) = self.entities.get(&entity) else {
            return false;
        };
        let Some(backend) = self.backend.as_deref_mut() else {
            self.warn_unavailable();
            return false;
        };
        let added = backend.add_body(handle);
        if added {
            debug!("Added body {:?} of entity {:?} to the world", handle, entity);
        }
        added
    }

    /// Destroy the entity's body and remove its [`PhysicsBody`] component.
    ///
    /// The entity's own listeners are dropped with the body. Pairs the body
    /// was part of end on the next [`advance`](Self::advance).
    pub fn destroy_body(&mut self, world: &mut hecs::World, entity: Entity) -> bool {
        let Some(handle) = self.release_body(entity) else {
            return false;
        };
        let _ = world.remove_one::<PhysicsBody>(entity);
        debug!("Destroyed body {:?} of entity {:?}", handle, entity);
        true
    }

    /// Drop the backend body and side-table rows of `entity`.
    fn release_body(&mut self, entity: Entity) -> Option<BodyHandle> {
        let handle = self.entities.remove(&entity)?;
        self.bodies.remove(&handle);
        if let Some(backend) = self.backend.as_deref_mut() {
            backend.destroy_body(handle);
        }
        self.events.clear_entity(entity);
        Some(handle)
    }

    /// Destroy bodies whose entity was despawned or lost its [`PhysicsBody`]
    /// without going through [`destroy_body`](Self::destroy_body).
    fn reap_detached(&mut self, world: &hecs::World) {
        let detached: Vec<Entity> = self
            .entities
            .keys()
            .copied()
            .filter(|&entity| !world.satisfies::<&PhysicsBody>(entity).unwrap_or(false))
            .collect();
        for entity in detached {
            if let Some(handle) = self.release_body(entity) {
                debug!("Reaped body {:?} of detached entity {:?}", handle, entity);
            }
        }
    }

    // ---- Constraints ----

    pub fn add_constraint(
        &mut self,
        desc: &ConstraintDesc,
    ) -> Result<Option<ConstraintHandle>, PhysicsError> {
        match *desc {
            ConstraintDesc::Distance {
                body_a,
                body_b,
                anchor_a,
                anchor_b,
                rest_length,
            } => {
                if body_a == body_b {
                    return Err(PhysicsError::InvalidConstraint(
                        "a constraint needs two distinct bodies",
                    ));
                }
                if !(anchor_a.is_finite() && anchor_b.is_finite()) {
                    return Err(PhysicsError::InvalidConstraint("anchors must be finite"));
                }
                if !(rest_length.is_finite() && rest_length >= 0.0) {
                    return Err(PhysicsError::InvalidConstraint(
                        "rest_length must be finite and >= 0",
                    ));
                }
                if !self.bodies.contains_key(&body_a) || !self.bodies.contains_key(&body_b) {
                    return Err(PhysicsError::InvalidConstraint(
                        "constrained bodies must belong to entities",
                    ));
                }
            }
        }

        let Some(backend) = self.backend.as_deref_mut() else {
            self.warn_unavailable();
            return Ok(None);
        };
        let handle = backend.add_constraint(desc);
        debug!("Added constraint {:?}", handle);
        Ok(handle)
    }

    /// Keep the anchors of two entities' bodies `rest_length` apart.
    pub fn add_distance_constraint(
        &mut self,
        a: Entity,
        b: Entity,
        anchor_a: Vec3,
        anchor_b: Vec3,
        rest_length: f32,
    ) -> Result<Option<ConstraintHandle>, PhysicsError> {
        let body_a = self.body_handle(a).ok_or(PhysicsError::NoBody(a))?;
        let body_b = self.body_handle(b).ok_or(PhysicsError::NoBody(b))?;
        self.add_constraint(&ConstraintDesc::Distance {
            body_a,
            body_b,
            anchor_a,
            anchor_b,
            rest_length,
        })
    }

    pub fn remove_constraint(&mut self, constraint: ConstraintHandle) -> bool {
        match self.backend.as_deref_mut() {
            Some(backend) => backend.remove_constraint(constraint),
            None => {
                self.warn_unavailable();
                false
            }
        }
    }

    // ---- Gravity ----

    pub fn gravity(&self) -> Vec3 {
        self.config.gravity
    }

    pub fn set_gravity(&mut self, x: f32, y: f32, z: f32) {
        self.set_gravity_vec(Vec3::new(x, y, z));
    }

    pub fn set_gravity_vec(&mut self, gravity: Vec3) {
        if !gravity.is_finite() {
            warn!("Ignoring non-finite gravity {:?}", gravity);
            return;
        }
        self.config.gravity = gravity;
        if let Some(backend) = self.backend.as_deref_mut() {
            backend.set_gravity(gravity);
        }
    }

    // ---- Body motion ----

    fn body_backend(
        &mut self,
        entity: Entity,
    ) -> Option<(BodyHandle, &mut (dyn PhysicsBackend + 'static))> {
        let handle = *self.entities.get(&entity)?;
        let backend = self.backend.as_deref_mut()?;
        Some((handle, backend))
    }

    pub fn linear_velocity(&self, entity: Entity) -> Option<Vec3> {
        let handle = self.body_handle(entity)?;
        self.backend.as_deref()?.linear_velocity(handle)
    }

    pub fn set_linear_velocity(&mut self, entity: Entity, velocity: Vec3) {
        if let Some((handle, backend)) = self.body_backend(entity) {
            backend.set_linear_velocity(handle, velocity);
        }
    }

    pub fn angular_velocity(&self, entity: Entity) -> Option<Vec3> {
        let handle = self.body_handle(entity)?;
        self.backend.as_deref()?.angular_velocity(handle)
    }

    pub fn set_angular_velocity(&mut self, entity: Entity, velocity: Vec3) {
        if let Some((handle, backend)) = self.body_backend(entity) {
            backend.set_angular_velocity(handle, velocity);
        }
    }

    /// Accumulate a force at the center of mass until the next step.
    pub fn apply_force(&mut self, entity: Entity, force: Vec3) {
        if let Some((handle, backend)) = self.body_backend(entity) {
            backend.apply_force(handle, force);
        }
    }

    pub fn apply_torque(&mut self, entity: Entity, torque: Vec3) {
        if let Some((handle, backend)) = self.body_backend(entity) {
            backend.apply_torque(handle, torque);
        }
    }

    /// Apply an impulse at `relative_point`, a world-space offset from the body center.
    pub fn apply_impulse(&mut self, entity: Entity, impulse: Vec3, relative_point: Vec3) {
        if let Some((handle, backend)) = self.body_backend(entity) {
            backend.apply_impulse(handle, impulse, relative_point);
        }
    }

    /// Move a body and its entity to a new pose and wake it.
    pub fn teleport(
        &mut self,
        world: &mut hecs::World,
        entity: Entity,
        position: Vec3,
        rotation: Quat,
    ) -> bool {
        let Some((handle, backend)) = self.body_backend(entity) else {
            return false;
        };
        let pose = Pose::new(position, rotation);
        backend.set_pose(handle, pose);
        backend.activate(handle);

        if let Ok(mut transform) = world.get::<&mut Transform>(entity) {
            transform.apply_pose(&pose);
        }
        if let Ok((transform, global)) =
            world.query_one_mut::<(&Transform, &mut GlobalTransform)>(entity)
        {
            global.0 = transform.to_matrix();
        }
        true
    }

    pub fn activate(&mut self, entity: Entity) {
        if let Some((handle, backend)) = self.body_backend(entity) {
            backend.activate(handle);
        }
    }

    /// Whether the entity's body is in the world and awake.
    pub fn is_active(&self, entity: Entity) -> bool {
        let Some(handle) = self.body_handle(entity) else {
            return false;
        };
        self.backend
            .as_deref()
            .is_some_and(|backend| backend.is_active(handle))
    }

    // ---- Queries ----

    /// Closest entity hit by the segment `start → end`.
    pub fn raycast_first(&self, start: Vec3, end: Vec3) -> Option<RaycastResult> {
        let Some(backend) = self.backend.as_deref() else {
            self.warn_unavailable();
            return None;
        };
        raycast::raycast_first(
            backend,
            |body| self.entity_for_body(body),
            start,
            end,
        )
    }

    // ---- Stepping ----

    /// Advance the simulation by `delta_time` seconds and fire collision notifications.
    ///
    /// Returns the number of fixed steps taken. When no step was taken the
    /// manifold pass is skipped, so notifications are never repeated for the
    /// same simulation state. `contact` therefore fires once per call that
    /// stepped, not once per call: at frame rates above the fixed rate some
    /// calls report nothing, and `collisionend` waits for the next step.
    ///
    /// Bodies whose entity was despawned or lost its [`PhysicsBody`] are
    /// destroyed first, so their pairs end during this call.
    pub fn advance(&mut self, world: &mut hecs::World, delta_time: f64) -> u32 {
        if self.backend.is_none() {
            self.warn_unavailable();
            return 0;
        }
        if !(delta_time.is_finite() && delta_time >= 0.0) {
            warn!("Ignoring invalid delta time {}", delta_time);
            return 0;
        }
        self.reap_detached(world);
        let Some(backend) = self.backend.as_deref_mut() else {
            return 0;
        };

        let steps = backend.step(
            delta_time,
            self.config.max_substeps,
            self.config.fixed_timestep,
        );
        sync_transforms(world, backend);
        if steps == 0 {
            return 0;
        }

        self.ledger.begin_frame();
        for index in 0..backend.manifold_count() {
            let Some(manifold) = backend.manifold(index) else {
                continue;
            };
            if manifold.contacts.is_empty() {
                continue;
            }

            let (Some(a), Some(b)) = (
                self.bodies.get(&manifold.body_a),
                self.bodies.get(&manifold.body_b),
            ) else {
                trace!(
                    "Skipping manifold {:?}/{:?}: body without entity",
                    manifold.body_a,
                    manifold.body_b
                );
                continue;
            };
            if !a.report_contacts && !b.report_contacts {
                continue;
            }
            if a.kind == BodyKind::Static && b.kind == BodyKind::Static {
                continue;
            }

            events::dispatch_manifold(
                &mut self.events,
                &mut self.ledger,
                &mut self.deferred,
                Participant {
                    entity: a.entity,
                    report_contacts: a.report_contacts,
                },
                Participant {
                    entity: b.entity,
                    report_contacts: b.report_contacts,
                },
                &manifold.contacts,
            );
        }
        events::dispatch_ended(&mut self.events, &mut self.ledger, &mut self.deferred);

        self.apply_deferred(world);
        steps
    }

    fn apply_deferred(&mut self, world: &mut hecs::World) {
        for op in self.deferred.take() {
            trace!("Applying deferred {:?}", op);
            match op {
                DeferredOp::RemoveBody(entity) => {
                    self.remove_body(entity);
                }
                DeferredOp::AddBody(entity) => {
                    self.add_body(entity);
                }
                DeferredOp::DestroyBody(entity) => {
                    self.destroy_body(world, entity);
                }
                DeferredOp::RemoveConstraint(constraint) => {
                    self.remove_constraint(constraint);
                }
            }
        }
    }
}
