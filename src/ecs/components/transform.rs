//! Transform components for ECS entities.
//!
//! Physics entities are treated as roots: their `Transform` is their world
//! transform. Hierarchy propagation belongs to the host scene graph.

use glam::{Mat4, Quat, Vec3};

use crate::physics::backend::Pose;

/// World-space transform of an entity.
///
/// Bodies only ever read or write the rigid part (position and rotation);
/// `scale` belongs to the scene and is never touched by physics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Transform {
    pub const IDENTITY: Self = Self {
        position: Vec3::ZERO,
        rotation: Quat::IDENTITY,
        scale: Vec3::ONE,
    };

    pub fn identity() -> Self {
        Self::IDENTITY
    }

    pub fn from_position(position: Vec3) -> Self {
        Self {
            position,
            ..Self::IDENTITY
        }
    }

    pub fn from_position_rotation(position: Vec3, rotation: Quat) -> Self {
        Self {
            position,
            rotation,
            ..Self::IDENTITY
        }
    }

    /// Rigid part of the transform, as handed to a body.
    pub fn pose(&self) -> Pose {
        Pose::new(self.position, self.rotation)
    }

    /// Overwrite position and rotation from a simulated pose, keeping scale.
    pub fn apply_pose(&mut self, pose: &Pose) {
        self.position = pose.position;
        self.rotation = pose.rotation;
    }

    /// Translation * rotation * scale.
    pub fn to_matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.position)
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Cached world matrix, refreshed whenever physics writes the entity's `Transform`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GlobalTransform(pub Mat4);

impl Default for GlobalTransform {
    fn default() -> Self {
        Self(Mat4::IDENTITY)
    }
}

impl From<&Transform> for GlobalTransform {
    fn from(transform: &Transform) -> Self {
        Self(transform.to_matrix())
    }
}
