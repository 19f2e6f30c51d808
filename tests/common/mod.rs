//! Scripted backend shared by the integration tests.
//!
//! The test keeps a [`ScriptHandle`] and decides, frame by frame, which
//! manifolds the backend reports and how many steps a call to `step` takes.

#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;

use slotmap::SlotMap;
use tether::ecs::components::physics::{BodyDesc, BodyKind};
use tether::glam::Vec3;
use tether::{
    BodyHandle, ConstraintDesc, ConstraintHandle, ContactManifold, PhysicsBackend, Pose,
    RawContact, RayHit,
};

#[derive(Debug)]
pub struct Script {
    /// Manifolds reported after each step until changed.
    pub manifolds: Vec<ContactManifold>,
    /// Steps taken by each call to `step`.
    pub steps: u32,
    /// Hit returned by `cast_ray`.
    pub ray_hit: Option<RayHit>,
    /// Bodies the engine reports as sleeping.
    pub asleep: Vec<BodyHandle>,
    /// Number of `step` calls seen.
    pub step_calls: u32,
}

pub type ScriptHandle = Rc<RefCell<Script>>;

#[derive(Debug, Clone)]
pub struct ScriptBody {
    pub kind: BodyKind,
    pub pose: Pose,
    pub in_world: bool,
    pub linear_velocity: Vec3,
}

pub struct ScriptedBackend {
    script: ScriptHandle,
    gravity: Vec3,
    pub bodies: SlotMap<BodyHandle, ScriptBody>,
    constraints: SlotMap<ConstraintHandle, ConstraintDesc>,
    current: Vec<ContactManifold>,
}

impl ScriptedBackend {
    pub fn new() -> (Self, ScriptHandle) {
        let script = Rc::new(RefCell::new(Script {
            manifolds: Vec::new(),
            steps: 1,
            ray_hit: None,
            asleep: Vec::new(),
            step_calls: 0,
        }));
        let backend = Self {
            script: Rc::clone(&script),
            gravity: Vec3::ZERO,
            bodies: SlotMap::with_key(),
            constraints: SlotMap::with_key(),
            current: Vec::new(),
        };
        (backend, script)
    }
}

impl PhysicsBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    fn gravity(&self) -> Vec3 {
        self.gravity
    }

    fn set_gravity(&mut self, gravity: Vec3) {
        self.gravity = gravity;
    }

    fn create_body(&mut self, desc: &BodyDesc, pose: Pose) -> BodyHandle {
        self.bodies.insert(ScriptBody {
            kind: desc.kind,
            pose,
            in_world: false,
            linear_velocity: Vec3::ZERO,
        })
    }

    fn destroy_body(&mut self, body: BodyHandle) -> bool {
        self.bodies.remove(body).is_some()
    }

    fn add_body(&mut self, body: BodyHandle) -> bool {
        match self.bodies.get_mut(body) {
            Some(b) if !b.in_world => {
                b.in_world = true;
                true
            }
            _ => false,
        }
    }

    fn remove_body(&mut self, body: BodyHandle) -> bool {
        match self.bodies.get_mut(body) {
            Some(b) if b.in_world => {
                b.in_world = false;
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
        self.bodies.get(body).is_some_and(|b| b.in_world)
            && !self.script.borrow().asleep.contains(&body)
    }

    fn activate(&mut self, body: BodyHandle) {
        self.script.borrow_mut().asleep.retain(|&b| b != body);
    }

    fn pose(&self, body: BodyHandle) -> Option<Pose> {
        self.bodies.get(body).map(|b| b.pose)
    }

    fn set_pose(&mut self, body: BodyHandle, pose: Pose) {
        if let Some(b) = self.bodies.get_mut(body) {
            b.pose = pose;
        }
    }

    fn linear_velocity(&self, body: BodyHandle) -> Option<Vec3> {
        self.bodies.get(body).map(|b| b.linear_velocity)
    }

    fn set_linear_velocity(&mut self, body: BodyHandle, velocity: Vec3) {
        if let Some(b) = self.bodies.get_mut(body) {
            b.linear_velocity = velocity;
        }
    }

    fn angular_velocity(&self, body: BodyHandle) -> Option<Vec3> {
        self.bodies.get(body).map(|_| Vec3::ZERO)
    }

    fn set_angular_velocity(&mut self, _body: BodyHandle, _velocity: Vec3) {}

    fn apply_force(&mut self, _body: BodyHandle, _force: Vec3) {}

    fn apply_torque(&mut self, _body: BodyHandle, _torque: Vec3) {}

    fn apply_impulse(&mut self, _body: BodyHandle, _impulse: Vec3, _relative_point: Vec3) {}

    fn add_constraint(&mut self, desc: &ConstraintDesc) -> Option<ConstraintHandle> {
        Some(self.constraints.insert(*desc))
    }

    fn remove_constraint(&mut self, constraint: ConstraintHandle) -> bool {
        self.constraints.remove(constraint).is_some()
    }

    fn step(&mut self, _delta_time: f64, _max_substeps: u32, _fixed_timestep: f64) -> u32 {
        let mut script = self.script.borrow_mut();
        script.step_calls += 1;
        if script.steps > 0 {
            self.current = script.manifolds.clone();
        }
        script.steps
    }

    fn manifold_count(&self) -> usize {
        self.current.len()
    }

    fn manifold(&self, index: usize) -> Option<&ContactManifold> {
        self.current.get(index)
    }

    fn cast_ray(&self, _from: Vec3, _to: Vec3) -> Option<RayHit> {
        self.script.borrow().ray_hit
    }
}

/// A contact between `a` and `b` resting on top of each other, `a` above `b`.
pub fn contact_at(x: f32) -> RawContact {
    RawContact {
        local_point_a: Vec3::new(x, -0.5, 0.0),
        local_point_b: Vec3::new(x, 0.5, 0.0),
        world_point_a: Vec3::new(x, 0.0, 0.0),
        world_point_b: Vec3::new(x, 0.01, 0.0),
        normal_on_b: Vec3::Y,
        distance: -0.01,
    }
}

pub fn manifold(a: BodyHandle, b: BodyHandle, contacts: Vec<RawContact>) -> ContactManifold {
    ContactManifold {
        body_a: a,
        body_b: b,
        contacts,
    }
}

/// One-contact manifold between `a` and `b`.
pub fn touching(a: BodyHandle, b: BodyHandle) -> ContactManifold {
    manifold(a, b, vec![contact_at(0.0)])
}
