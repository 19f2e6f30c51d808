//! Rigid body state and integration functions.

use glam::{Mat3, Quat, Vec3};
use slotmap::SlotMap;

use crate::ecs::components::physics::{BodyDesc, BodyKind, ColliderShape};
use crate::physics::backend::{BodyHandle, Pose};

/// Linear velocity threshold for sleep eligibility.
const LINEAR_SLEEP_THRESHOLD: f32 = 0.1;
/// Angular velocity threshold for sleep eligibility.
const ANGULAR_SLEEP_THRESHOLD: f32 = 0.05;
/// Time in seconds a body must be below thresholds before sleeping.
const SLEEP_TIME: f32 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SleepState {
    Awake,
    Sleeping,
}

/// A simulated rigid body.
#[derive(Debug, Clone)]
pub struct Body {
    pub kind: BodyKind,
    pub shape: ColliderShape,
    pub pose: Pose,
    /// Pose at the end of the previous step. Kinematic velocities are derived from it.
    pub prev_pose: Pose,
    pub inv_mass: f32,
    /// Inverse principal moments of inertia, in local space.
    pub inv_inertia_local: Vec3,
    pub linear_velocity: Vec3,
    pub angular_velocity: Vec3,
    pub force_accumulator: Vec3,
    pub torque_accumulator: Vec3,
    pub linear_damping: f32,
    pub angular_damping: f32,
    pub linear_factor: Vec3,
    pub angular_factor: Vec3,
    pub friction: f32,
    pub restitution: f32,
    pub in_world: bool,
    pub sleep_state: SleepState,
    pub sleep_timer: f32,
}

impl Body {
    pub fn new(desc: &BodyDesc, pose: Pose) -> Self {
        let dynamic = desc.kind == BodyKind::Dynamic && desc.mass > 0.0;
        let (inv_mass, inv_inertia_local) = if dynamic {
            let inertia = principal_inertia(&desc.shape, desc.mass);
            (1.0 / desc.mass, inertia.map(|i| if i > 0.0 { 1.0 / i } else { 0.0 }))
        } else {
            (0.0, Vec3::ZERO)
        };

        Self {
            kind: desc.kind,
            shape: desc.shape.clone(),
            pose,
            prev_pose: pose,
            inv_mass,
            inv_inertia_local,
            linear_velocity: Vec3::ZERO,
            angular_velocity: Vec3::ZERO,
            force_accumulator: Vec3::ZERO,
            torque_accumulator: Vec3::ZERO,
            linear_damping: desc.linear_damping,
            angular_damping: desc.angular_damping,
            linear_factor: desc.linear_factor,
            angular_factor: desc.angular_factor,
            friction: desc.friction,
            restitution: desc.restitution,
            in_world: false,
            sleep_state: SleepState::Awake,
            sleep_timer: 0.0,
        }
    }

    #[inline]
    pub fn is_dynamic(&self) -> bool {
        self.kind == BodyKind::Dynamic
    }

    #[inline]
    pub fn is_sleeping(&self) -> bool {
        self.sleep_state == SleepState::Sleeping
    }

    /// Awake dynamic body in the world: integrated and pushed around by the solver.
    #[inline]
    pub fn is_simulated(&self) -> bool {
        self.in_world && self.is_dynamic() && !self.is_sleeping()
    }

    /// Inverse mass as seen by the solver. Sleeping bodies do not move.
    #[inline]
    pub fn effective_inv_mass(&self) -> f32 {
        if self.is_sleeping() {
            0.0
        } else {
            self.inv_mass
        }
    }

    /// World-space inverse inertia tensor.
    pub fn inv_inertia_world(&self) -> Mat3 {
        if self.is_sleeping() || self.inv_mass == 0.0 {
            return Mat3::ZERO;
        }
        let rotation = Mat3::from_quat(self.pose.rotation);
        rotation * Mat3::from_diagonal(self.inv_inertia_local) * rotation.transpose()
    }

    /// Velocity of the material point at world offset `r` from the center.
    #[inline]
    pub fn velocity_at(&self, r: Vec3) -> Vec3 {
        self.linear_velocity + self.angular_velocity.cross(r)
    }

    /// Apply an impulse at world offset `r` from the center.
    pub fn apply_impulse(&mut self, impulse: Vec3, r: Vec3) {
        if self.effective_inv_mass() == 0.0 {
            return;
        }
        self.linear_velocity += impulse * self.inv_mass * self.linear_factor;
        self.angular_velocity += (self.inv_inertia_world() * r.cross(impulse)) * self.angular_factor;
    }

    pub fn wake(&mut self) {
        if self.sleep_state == SleepState::Sleeping {
            self.sleep_state = SleepState::Awake;
        }
        self.sleep_timer = 0.0;
    }
}

/// Principal moments of inertia of a solid shape with the given mass.
fn principal_inertia(shape: &ColliderShape, mass: f32) -> Vec3 {
    match shape {
        ColliderShape::Sphere { radius } => Vec3::splat(0.4 * mass * radius * radius),
        ColliderShape::Box { half_extents } => box_inertia(*half_extents, mass),
        ColliderShape::Capsule {
            radius,
            half_height,
        } => cylinder_inertia(*radius, *half_height + *radius, mass),
        ColliderShape::Cylinder {
            radius,
            half_height,
        } => cylinder_inertia(*radius, *half_height, mass),
        ColliderShape::ConvexHull { points } => {
            let mut extent = Vec3::ZERO;
            for p in points {
                extent = extent.max(p.abs());
            }
            box_inertia(extent.max(Vec3::splat(1e-3)), mass)
        }
    }
}

fn box_inertia(h: Vec3, mass: f32) -> Vec3 {
    let k = mass / 3.0;
    Vec3::new(
        k * (h.y * h.y + h.z * h.z),
        k * (h.x * h.x + h.z * h.z),
        k * (h.x * h.x + h.y * h.y),
    )
}

/// Solid cylinder along Y.
fn cylinder_inertia(radius: f32, half_height: f32, mass: f32) -> Vec3 {
    let r2 = radius * radius;
    let h = 2.0 * half_height;
    let side = mass * (3.0 * r2 + h * h) / 12.0;
    Vec3::new(side, 0.5 * mass * r2, side)
}

/// Derive kinematic velocities from the pose change since the last step.
pub fn update_kinematic_velocities(bodies: &mut SlotMap<BodyHandle, Body>, dt: f32) {
    for (_, body) in bodies.iter_mut() {
        if body.kind != BodyKind::Kinematic || !body.in_world {
            continue;
        }
        body.linear_velocity = (body.pose.position - body.prev_pose.position) / dt;
        let delta = body.pose.rotation * body.prev_pose.rotation.inverse();
        let (axis, angle) = delta.to_axis_angle();
        let angle = if angle > std::f32::consts::PI {
            angle - std::f32::consts::TAU
        } else {
            angle
        };
        body.angular_velocity = if angle.abs() > 1e-6 {
            axis * (angle / dt)
        } else {
            Vec3::ZERO
        };
    }
}

/// Add gravity to the force accumulator of every awake dynamic body.
pub fn apply_gravity(bodies: &mut SlotMap<BodyHandle, Body>, gravity: Vec3) {
    for (_, body) in bodies.iter_mut() {
        if body.is_simulated() && body.inv_mass > 0.0 {
            body.force_accumulator += gravity / body.inv_mass;
        }
    }
}

/// Integrate velocities using semi-implicit Euler: v += (F/m) * dt.
pub fn integrate_velocities(bodies: &mut SlotMap<BodyHandle, Body>, dt: f32) {
    for (_, body) in bodies.iter_mut() {
        if !body.is_simulated() {
            continue;
        }

        body.linear_velocity += body.force_accumulator * body.inv_mass * dt * body.linear_factor;
        let angular_accel = body.inv_inertia_world() * body.torque_accumulator;
        body.angular_velocity += angular_accel * dt * body.angular_factor;

        // Damping is the fraction of velocity lost per second.
        body.linear_velocity *= (1.0 - body.linear_damping).max(0.0).powf(dt);
        body.angular_velocity *= (1.0 - body.angular_damping).max(0.0).powf(dt);
    }
}

/// Integrate positions: p += v * dt, q += 0.5 * omega * q * dt.
pub fn integrate_positions(bodies: &mut SlotMap<BodyHandle, Body>, dt: f32) {
    for (_, body) in bodies.iter_mut() {
        if body.kind == BodyKind::Kinematic {
            body.prev_pose = body.pose;
            continue;
        }
        if !body.is_simulated() {
            continue;
        }

        body.prev_pose = body.pose;
        body.pose.position += body.linear_velocity * dt;

        let omega = body.angular_velocity;
        if omega.length_squared() > 1e-10 {
            let rotation = body.pose.rotation;
            let omega_quat = Quat::from_xyzw(omega.x, omega.y, omega.z, 0.0);
            let q_dot = omega_quat * rotation * 0.5;
            body.pose.rotation = Quat::from_xyzw(
                rotation.x + q_dot.x * dt,
                rotation.y + q_dot.y * dt,
                rotation.z + q_dot.z * dt,
                rotation.w + q_dot.w * dt,
            )
            .normalize();
        }
    }
}

/// Clear force and torque accumulators on all bodies.
pub fn clear_forces(bodies: &mut SlotMap<BodyHandle, Body>) {
    for (_, body) in bodies.iter_mut() {
        body.force_accumulator = Vec3::ZERO;
        body.torque_accumulator = Vec3::ZERO;
    }
}

/// Update sleep states for all dynamic bodies.
///
/// Bodies with velocities below thresholds for `SLEEP_TIME` seconds
/// transition to `Sleeping`. Sleeping bodies skip integration and gravity.
pub fn update_sleep_states(bodies: &mut SlotMap<BodyHandle, Body>, dt: f32) {
    for (_, body) in bodies.iter_mut() {
        if !body.is_simulated() {
            continue;
        }

        let linear_speed = body.linear_velocity.length();
        let angular_speed = body.angular_velocity.length();

        if linear_speed < LINEAR_SLEEP_THRESHOLD && angular_speed < ANGULAR_SLEEP_THRESHOLD {
            body.sleep_timer += dt;
            if body.sleep_timer >= SLEEP_TIME {
                body.sleep_state = SleepState::Sleeping;
                body.linear_velocity = Vec3::ZERO;
                body.angular_velocity = Vec3::ZERO;
            }
        } else {
            body.sleep_timer = 0.0;
        }
    }
}
