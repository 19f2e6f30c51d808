//! The narrow interface between [`PhysicsSystem`](super::PhysicsSystem) and a
//! rigid-body engine.
//!
//! A backend owns bodies and constraints and hands out opaque handles. It knows
//! nothing about entities; the system keeps the body → entity side table.

use glam::{Mat4, Quat, Vec3};

use crate::ecs::components::physics::{BodyDesc, BodyKind};

slotmap::new_key_type! {
    /// Opaque handle to a body owned by a [`PhysicsBackend`].
    pub struct BodyHandle;

    /// Opaque handle to a constraint owned by a [`PhysicsBackend`].
    pub struct ConstraintHandle;
}

/// Rigid transform of a body: world position and orientation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    pub position: Vec3,
    pub rotation: Quat,
}

impl Pose {
    pub const IDENTITY: Self = Self {
        position: Vec3::ZERO,
        rotation: Quat::IDENTITY,
    };

    pub fn new(position: Vec3, rotation: Quat) -> Self {
        Self { position, rotation }
    }

    pub fn from_position(position: Vec3) -> Self {
        Self {
            position,
            rotation: Quat::IDENTITY,
        }
    }

    /// Map a point from body-local space to world space.
    #[inline]
    pub fn transform_point(&self, local: Vec3) -> Vec3 {
        self.position + self.rotation * local
    }

    /// Map a point from world space to body-local space.
    #[inline]
    pub fn inverse_transform_point(&self, world: Vec3) -> Vec3 {
        self.rotation.inverse() * (world - self.position)
    }

    pub fn to_matrix(&self) -> Mat4 {
        Mat4::from_rotation_translation(self.rotation, self.position)
    }
}

impl Default for Pose {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// One contact point between the two bodies of a manifold, as reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawContact {
    /// Contact point on body A, in A's local frame.
    pub local_point_a: Vec3,
    /// Contact point on body B, in B's local frame.
    pub local_point_b: Vec3,
    /// Contact point on body A, in world space.
    pub world_point_a: Vec3,
    /// Contact point on body B, in world space.
    pub world_point_b: Vec3,
    /// World-space contact normal, pointing away from body B.
    pub normal_on_b: Vec3,
    /// Signed separation along the normal. Negative when penetrating.
    pub distance: f32,
}

/// All contact points between one pair of bodies for the last step.
#[derive(Debug, Clone, PartialEq)]
pub struct ContactManifold {
    pub body_a: BodyHandle,
    pub body_b: BodyHandle,
    pub contacts: Vec<RawContact>,
}

/// Closest ray intersection reported by [`PhysicsBackend::cast_ray`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RayHit {
    pub body: BodyHandle,
    pub point: Vec3,
    pub normal: Vec3,
    /// Position of the hit along the segment, in `[0, 1]`.
    pub fraction: f32,
}

/// Generic two-body constraint.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConstraintDesc {
    /// Keeps two local anchors at a fixed distance.
    Distance {
        body_a: BodyHandle,
        body_b: BodyHandle,
        anchor_a: Vec3,
        anchor_b: Vec3,
        rest_length: f32,
    },
}

impl ConstraintDesc {
    pub fn bodies(&self) -> (BodyHandle, BodyHandle) {
        match *self {
            ConstraintDesc::Distance { body_a, body_b, .. } => (body_a, body_b),
        }
    }
}

/// Rigid-body engine capability consumed by [`PhysicsSystem`](super::PhysicsSystem).
///
/// Handles that do not belong to the backend are ignored: queries return `None`
/// or `false` and mutations do nothing.
pub trait PhysicsBackend {
    /// Human-readable backend name, used in logs.
    fn name(&self) -> &str;

    fn gravity(&self) -> Vec3;
    fn set_gravity(&mut self, gravity: Vec3);

    /// Create a body. It is not part of the simulation world until [`add_body`](Self::add_body).
    fn create_body(&mut self, desc: &BodyDesc, pose: Pose) -> BodyHandle;
    /// Remove the body from the world if needed and free it.
    fn destroy_body(&mut self, body: BodyHandle) -> bool;
    /// Add an existing body to the simulation world. `false` if already present or unknown.
    fn add_body(&mut self, body: BodyHandle) -> bool;
    /// Take a body out of the simulation world without freeing it. `false` if not present.
    fn remove_body(&mut self, body: BodyHandle) -> bool;
    fn in_world(&self, body: BodyHandle) -> bool;
    fn body_kind(&self, body: BodyHandle) -> Option<BodyKind>;

    /// Whether the body is simulated (in the world and not sleeping).
    fn is_active(&self, body: BodyHandle) -> bool;
    /// Wake a sleeping body.
    fn activate(&mut self, body: BodyHandle);

    fn pose(&self, body: BodyHandle) -> Option<Pose>;
    /// Overwrite the simulated pose. Does not change the sleep state.
    fn set_pose(&mut self, body: BodyHandle, pose: Pose);

    fn linear_velocity(&self, body: BodyHandle) -> Option<Vec3>;
    fn set_linear_velocity(&mut self, body: BodyHandle, velocity: Vec3);
    fn angular_velocity(&self, body: BodyHandle) -> Option<Vec3>;
    fn set_angular_velocity(&mut self, body: BodyHandle, velocity: Vec3);

    /// Accumulate a force applied at the center of mass until the next step.
    fn apply_force(&mut self, body: BodyHandle, force: Vec3);
    /// Accumulate a torque until the next step.
    fn apply_torque(&mut self, body: BodyHandle, torque: Vec3);
    /// Apply an instantaneous impulse at `relative_point` (world-space offset from the center).
    fn apply_impulse(&mut self, body: BodyHandle, impulse: Vec3, relative_point: Vec3);

    fn add_constraint(&mut self, desc: &ConstraintDesc) -> Option<ConstraintHandle>;
    fn remove_constraint(&mut self, constraint: ConstraintHandle) -> bool;

    /// Advance the world by `delta_time` seconds using at most `max_substeps`
    /// fixed steps of `fixed_timestep`. With `max_substeps == 0` the world is
    /// stepped once by `delta_time`. Returns the number of steps taken.
    fn step(&mut self, delta_time: f64, max_substeps: u32, fixed_timestep: f64) -> u32;

    /// Number of manifolds produced by the most recent step.
    fn manifold_count(&self) -> usize;
    fn manifold(&self, index: usize) -> Option<&ContactManifold>;

    /// Closest body hit by the segment `from → to`, if any.
    fn cast_ray(&self, from: Vec3, to: Vec3) -> Option<RayHit>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pose_point_roundtrip() {
        let pose = Pose::new(
            Vec3::new(1.0, 2.0, 3.0),
            Quat::from_rotation_z(std::f32::consts::FRAC_PI_2),
        );
        let local = Vec3::new(1.0, 0.0, 0.0);
        let world = pose.transform_point(local);
        assert!((world - Vec3::new(1.0, 3.0, 3.0)).length() < 1e-5);
        assert!((pose.inverse_transform_point(world) - local).length() < 1e-5);
    }

    #[test]
    fn test_pose_matrix_matches_transform_point() {
        let pose = Pose::new(Vec3::new(-2.0, 0.5, 4.0), Quat::from_rotation_x(0.3));
        let p = Vec3::new(0.2, -1.0, 0.7);
        let via_matrix = pose.to_matrix().transform_point3(p);
        assert!((via_matrix - pose.transform_point(p)).length() < 1e-5);
    }
}
