//! Built-in CPU rigid-body engine.
//!
//! # Architecture
//!
//! Each fixed step runs:
//!
//! 1. Derive kinematic velocities from their pose change
//! 2. Apply forces (gravity) and integrate velocities
//! 3. Broadphase collision detection (spatial hash over margin-expanded AABBs)
//! 4. Narrowphase collision detection (GJK/EPA, SAT, specialized tests)
//! 5. Warm-start and solve contact and joint constraints (sequential impulse)
//! 6. Integrate positions, clear forces, update sleep states
//! 7. Publish the step's contact manifolds

pub mod body;
pub mod broadphase;
pub mod collider;
pub mod contact;
pub mod narrowphase;
pub mod solver;

use std::cell::Cell;

use glam::Vec3;
use slotmap::SlotMap;
use tracing::{debug, trace};

use crate::ecs::components::physics::{BodyDesc, BodyKind};
use crate::physics::backend::{
    BodyHandle, ConstraintDesc, ConstraintHandle, ContactManifold, PhysicsBackend, Pose, RayHit,
};

use self::body::Body;
use self::broadphase::{BroadphaseEntry, SpatialHashGrid};
use self::contact::{ContactCache, ContactConstraint, SolverManifold};
use self::narrowphase::{detect_collision, CONTACT_MARGIN};
use self::solver::DistanceJoint;

/// Speed below which a kinematic body does not wake what it touches.
const KINEMATIC_WAKE_SPEED: f32 = 1e-4;

/// Marks a ray query as open for as long as it lives.
struct QueryGuard<'a>(&'a Cell<usize>);

impl<'a> QueryGuard<'a> {
    fn open(count: &'a Cell<usize>) -> Self {
        count.set(count.get() + 1);
        Self(count)
    }
}

impl Drop for QueryGuard<'_> {
    fn drop(&mut self) {
        self.0.set(self.0.get().saturating_sub(1));
    }
}

/// CPU physics world: bodies, joints, and the state carried between steps.
pub struct CpuBackend {
    gravity: Vec3,
    solver_iterations: u32,
    accumulator: f64,
    bodies: SlotMap<BodyHandle, Body>,
    joints: SlotMap<ConstraintHandle, DistanceJoint>,
    broadphase: SpatialHashGrid,
    contact_cache: ContactCache,
    manifolds: Vec<ContactManifold>,
    open_queries: Cell<usize>,
}

impl CpuBackend {
    pub fn new(gravity: Vec3, solver_iterations: u32) -> Self {
        Self {
            gravity,
            solver_iterations,
            accumulator: 0.0,
            bodies: SlotMap::with_key(),
            joints: SlotMap::with_key(),
            broadphase: SpatialHashGrid::new(),
            contact_cache: ContactCache::new(),
            manifolds: Vec::new(),
            open_queries: Cell::new(0),
        }
    }

    /// Number of ray queries currently in flight. Zero between calls.
    pub fn open_queries(&self) -> usize {
        self.open_queries.get()
    }

    pub fn body_count(&self) -> usize {
        self.bodies.len()
    }

    pub fn constraint_count(&self) -> usize {
        self.joints.len()
    }

    pub fn is_sleeping(&self, body: BodyHandle) -> bool {
        self.bodies.get(body).is_some_and(Body::is_sleeping)
    }

    fn fixed_step(&mut self, dt: f32) {
        // 1. Kinematic velocities
        body::update_kinematic_velocities(&mut self.bodies, dt);

        // 2. Forces and velocity integration
        body::apply_gravity(&mut self.bodies, self.gravity);
        body::integrate_velocities(&mut self.bodies, dt);

        // 3. Broadphase collision detection
        let entries: Vec<BroadphaseEntry> = self
            .bodies
            .iter()
            .filter(|(_, b)| b.in_world)
            .map(|(handle, b)| BroadphaseEntry {
                body: handle,
                aabb: b.shape.compute_aabb(&b.pose).expanded(CONTACT_MARGIN),
                is_static: b.kind == BodyKind::Static,
            })
            .collect();
        let pairs = self.broadphase.find_pairs(&entries);

        // 4. Narrowphase collision detection
        let mut manifolds = self.run_narrowphase(&pairs);
        self.wake_joined_bodies();

        // 5. Warm-start from cached impulses, then solve
        self.contact_cache.warm_start(&mut manifolds);
        solver::prepare_contacts(&mut manifolds, &self.bodies, dt);
        solver::warm_start(&manifolds, &mut self.bodies);
        solver::solve(
            &mut manifolds,
            &self.joints,
            &mut self.bodies,
            self.solver_iterations,
            dt,
        );
        self.contact_cache.update(&manifolds);

        // 6. Positions, forces, sleep
        body::integrate_positions(&mut self.bodies, dt);
        body::clear_forces(&mut self.bodies);
        body::update_sleep_states(&mut self.bodies, dt);

        // 7. Publish contacts at the end-of-step poses
        self.manifolds.clear();
        for m in &manifolds {
            if let (Some(a), Some(b)) = (self.bodies.get(m.body_a), self.bodies.get(m.body_b)) {
                self.manifolds.push(m.to_report(&a.pose, &b.pose));
            }
        }
    }

    /// Run CPU narrowphase on broadphase pairs, waking sleepers that are hit.
    fn run_narrowphase(&mut self, pairs: &[(BodyHandle, BodyHandle)]) -> Vec<SolverManifold> {
        let mut manifolds = Vec::with_capacity(pairs.len());

        for &(ha, hb) in pairs {
            let (Some(a), Some(b)) = (self.bodies.get(ha), self.bodies.get(hb)) else {
                continue;
            };
            let infos = detect_collision(&a.shape, &a.pose, &b.shape, &b.pose);
            let Some(first) = infos.first() else {
                continue;
            };

            let wake_a = a.is_sleeping() && disturbs(b);
            let wake_b = b.is_sleeping() && disturbs(a);

            let contacts = infos
                .iter()
                .map(|info| ContactConstraint {
                    position: (info.point_a + info.point_b) * 0.5,
                    local_a: a.pose.inverse_transform_point(info.point_a),
                    local_b: b.pose.inverse_transform_point(info.point_b),
                    penetration: info.penetration,
                    r_a: Vec3::ZERO,
                    r_b: Vec3::ZERO,
                    normal_mass: 0.0,
                    bias: 0.0,
                    normal_impulse: 0.0,
                })
                .collect();

            manifolds.push(SolverManifold {
                body_a: ha,
                body_b: hb,
                normal: first.normal,
                friction: (a.friction + b.friction) * 0.5,
                restitution: (a.restitution + b.restitution) * 0.5,
                contacts,
            });

            if wake_a {
                self.bodies[ha].wake();
            }
            if wake_b {
                self.bodies[hb].wake();
            }
        }

        manifolds
    }

    /// A sleeping body joined to an awake one is woken so the joint can act.
    fn wake_joined_bodies(&mut self) {
        for joint in self.joints.values() {
            let (Some(a), Some(b)) = (self.bodies.get(joint.body_a), self.bodies.get(joint.body_b))
            else {
                continue;
            };
            let (wake_a, wake_b) = (
                a.is_sleeping() && disturbs(b),
                b.is_sleeping() && disturbs(a),
            );
            if wake_a {
                self.bodies[joint.body_a].wake();
            }
            if wake_b {
                self.bodies[joint.body_b].wake();
            }
        }
    }

    /// Wake every body that shares a published manifold with `body` and drop those manifolds.
    fn purge_contacts(&mut self, body: BodyHandle) {
        let mut touching = Vec::new();
        self.manifolds.retain(|m| {
            if m.body_a == body {
                touching.push(m.body_b);
                false
            } else if m.body_b == body {
                touching.push(m.body_a);
                false
            } else {
                true
            }
        });
        for other in touching {
            if let Some(b) = self.bodies.get_mut(other) {
                b.wake();
            }
        }
        self.contact_cache.forget(body);
    }

    fn wake(&mut self, body: BodyHandle) {
        if let Some(b) = self.bodies.get_mut(body) {
            b.wake();
        }
    }
}

/// Whether contact with `other` should wake a sleeping body.
fn disturbs(other: &Body) -> bool {
    match other.kind {
        BodyKind::Dynamic => other.is_simulated(),
        BodyKind::Kinematic => {
            other.in_world
                && (other.linear_velocity.length() > KINEMATIC_WAKE_SPEED
                    || other.angular_velocity.length() > KINEMATIC_WAKE_SPEED)
        }
        BodyKind::Static => false,
    }
}

impl PhysicsBackend for CpuBackend {
    fn name(&self) -> &str {
        "cpu"
    }

    fn gravity(&self) -> Vec3 {
        self.gravity
    }

    fn set_gravity(&mut self, gravity: Vec3) {
        self.gravity = gravity;
        for (_, body) in self.bodies.iter_mut() {
            if body.is_dynamic() {
                body.wake();
            }
        }
    }

    fn create_body(&mut self, desc: &BodyDesc, pose: Pose) -> BodyHandle {
        let handle = self.bodies.insert(Body::new(desc, pose));
        trace!("Created {:?} body {:?}", desc.kind, handle);
        handle
    }

    fn destroy_body(&mut self, body: BodyHandle) -> bool {
        if !self.bodies.contains_key(body) {
            return false;
        }
        self.remove_body(body);

        let attached: Vec<ConstraintHandle> = self
            .joints
            .iter()
            .filter(|(_, j)| j.body_a == body || j.body_b == body)
            .map(|(handle, _)| handle)
            .collect();
        for handle in attached {
            self.remove_constraint(handle);
        }

        self.bodies.remove(body);
        trace!("Destroyed body {:?}", body);
        true
    }

    fn add_body(&mut self, body: BodyHandle) -> bool {
        match self.bodies.get_mut(body) {
            Some(b) if !b.in_world => {
                b.in_world = true;
                b.prev_pose = b.pose;
                b.wake();
                true
            }
            _ => false,
        }
    }

    fn remove_body(&mut self, body: BodyHandle) -> bool {
        match self.bodies.get_mut(body) {
            Some(b) if b.in_world => {
                b.in_world = false;
                self.purge_contacts(body);
                true
            }
            _ => false,
        }
    }

    fn in_world(&self, body: BodyHandle) -> bool {
        self.bodies.get(body).is_some_and(|b| b.in_world)
    }

    fn body_kind(&self, body: BodyHandle) -> Option<BodyKind> {
        self.bodies.get(body).map(|b| b.kind)
    }

    fn is_active(&self, body: BodyHandle) -> bool {
        self.bodies
            .get(body)
            .is_some_and(|b| b.in_world && !b.is_sleeping())
    }

    fn activate(&mut self, body: BodyHandle) {
        self.wake(body);
    }

    fn pose(&self, body: BodyHandle) -> Option<Pose> {
        self.bodies.get(body).map(|b| b.pose)
    }

    fn set_pose(&mut self, body: BodyHandle, pose: Pose) {
        if let Some(b) = self.bodies.get_mut(body) {
            b.pose = pose;
            // Kinematic velocities come from the difference to the previous pose.
            if b.kind != BodyKind::Kinematic {
                b.prev_pose = pose;
            }
        }
    }

    fn linear_velocity(&self, body: BodyHandle) -> Option<Vec3> {
        self.bodies.get(body).map(|b| b.linear_velocity)
    }

    fn set_linear_velocity(&mut self, body: BodyHandle, velocity: Vec3) {
        if let Some(b) = self.bodies.get_mut(body) {
            b.linear_velocity = velocity;
            b.wake();
        }
    }

    fn angular_velocity(&self, body: BodyHandle) -> Option<Vec3> {
        self.bodies.get(body).map(|b| b.angular_velocity)
    }

    fn set_angular_velocity(&mut self, body: BodyHandle, velocity: Vec3) {
        if let Some(b) = self.bodies.get_mut(body) {
            b.angular_velocity = velocity;
            b.wake();
        }
    }

    fn apply_force(&mut self, body: BodyHandle, force: Vec3) {
        if let Some(b) = self.bodies.get_mut(body).filter(|b| b.is_dynamic()) {
            b.force_accumulator += force;
            b.wake();
        }
    }

    fn apply_torque(&mut self, body: BodyHandle, torque: Vec3) {
        if let Some(b) = self.bodies.get_mut(body).filter(|b| b.is_dynamic()) {
            b.torque_accumulator += torque;
            b.wake();
        }
    }

    fn apply_impulse(&mut self, body: BodyHandle, impulse: Vec3, relative_point: Vec3) {
        if let Some(b) = self.bodies.get_mut(body).filter(|b| b.is_dynamic()) {
            b.wake();
            b.apply_impulse(impulse, relative_point);
        }
    }

    fn add_constraint(&mut self, desc: &ConstraintDesc) -> Option<ConstraintHandle> {
        let ConstraintDesc::Distance {
            body_a,
            body_b,
            anchor_a,
            anchor_b,
            rest_length,
        } = *desc;
        if body_a == body_b || !self.bodies.contains_key(body_a) || !self.bodies.contains_key(body_b)
        {
            return None;
        }

        let handle = self.joints.insert(DistanceJoint {
            body_a,
            body_b,
            anchor_a,
            anchor_b,
            rest_length,
        });
        self.wake(body_a);
        self.wake(body_b);
        debug!("Added distance constraint {:?} ({:?} ↔ {:?})", handle, body_a, body_b);
        Some(handle)
    }

    fn remove_constraint(&mut self, constraint: ConstraintHandle) -> bool {
        match self.joints.remove(constraint) {
            Some(joint) => {
                self.wake(joint.body_a);
                self.wake(joint.body_b);
                true
            }
            None => false,
        }
    }

    fn step(&mut self, delta_time: f64, max_substeps: u32, fixed_timestep: f64) -> u32 {
        if max_substeps == 0 || fixed_timestep <= 0.0 {
            if delta_time <= 0.0 {
                return 0;
            }
            self.fixed_step(delta_time as f32);
            return 1;
        }

        self.accumulator += delta_time;

        let mut substeps = 0u32;
        while self.accumulator >= fixed_timestep && substeps < max_substeps {
            self.fixed_step(fixed_timestep as f32);
            self.accumulator -= fixed_timestep;
            substeps += 1;
        }

        // Clamp accumulator to avoid spiral of death
        if self.accumulator > fixed_timestep * max_substeps as f64 {
            self.accumulator = 0.0;
        }
        substeps
    }

    fn manifold_count(&self) -> usize {
        self.manifolds.len()
    }

    fn manifold(&self, index: usize) -> Option<&ContactManifold> {
        self.manifolds.get(index)
    }

    fn cast_ray(&self, from: Vec3, to: Vec3) -> Option<RayHit> {
        let _query = QueryGuard::open(&self.open_queries);
        let dir = to - from;

        let mut best: Option<RayHit> = None;
        for (handle, body) in self.bodies.iter().filter(|(_, b)| b.in_world) {
            let Some(hit) = body.shape.ray_cast(&body.pose, from, dir, 1.0) else {
                continue;
            };
            if best.map_or(true, |b| hit.t < b.fraction) {
                best = Some(RayHit {
                    body: handle,
                    point: from + dir * hit.t,
                    normal: hit.normal,
                    fraction: hit.t,
                });
            }
        }
        best
    }
}
