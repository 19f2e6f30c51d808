//! Physics components for ECS entities.

use glam::Vec3;

use crate::physics::backend::BodyHandle;
use crate::physics::error::PhysicsError;

/// Rigid body kind. Fixed for the lifetime of a body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BodyKind {
    /// Immovable.
    Static,
    /// Affected by forces and collisions.
    Dynamic,
    /// Position controlled by the entity transform, pushes dynamic bodies.
    Kinematic,
}

/// Collider shape.
#[derive(Debug, Clone, PartialEq)]
pub enum ColliderShape {
    Sphere { radius: f32 },
    Box { half_extents: Vec3 },
    /// Capsule along the local Y axis.
    Capsule { radius: f32, half_height: f32 },
    /// Cylinder along the local Y axis.
    Cylinder { radius: f32, half_height: f32 },
    ConvexHull { points: Vec<Vec3> },
}

impl ColliderShape {
    fn validate(&self) -> Result<(), PhysicsError> {
        let positive = |v: f32| v.is_finite() && v > 0.0;
        let ok = match self {
            ColliderShape::Sphere { radius } => positive(*radius),
            ColliderShape::Box { half_extents } => {
                positive(half_extents.x) && positive(half_extents.y) && positive(half_extents.z)
            }
            ColliderShape::Capsule {
                radius,
                half_height,
            }
            | ColliderShape::Cylinder {
                radius,
                half_height,
            } => positive(*radius) && half_height.is_finite() && *half_height >= 0.0,
            ColliderShape::ConvexHull { points } => {
                !points.is_empty() && points.iter().all(|p| p.is_finite())
            }
        };
        if ok {
            Ok(())
        } else {
            Err(PhysicsError::InvalidShape(format!("{self:?}")))
        }
    }
}

/// Creation-time description of a rigid body.
///
/// Every property is fixed once the body exists; to change the kind, destroy
/// the body and create a new one.
#[derive(Debug, Clone, PartialEq)]
pub struct BodyDesc {
    pub kind: BodyKind,
    pub shape: ColliderShape,
    /// Mass in kilograms. Ignored for static and kinematic bodies.
    pub mass: f32,
    /// Fraction of linear velocity lost per second, in `[0, 1]`.
    pub linear_damping: f32,
    /// Fraction of angular velocity lost per second, in `[0, 1]`.
    pub angular_damping: f32,
    /// Per-axis multiplier on linear motion. `Vec3::ZERO` locks translation.
    pub linear_factor: Vec3,
    /// Per-axis multiplier on angular motion. `Vec3::ZERO` locks rotation.
    pub angular_factor: Vec3,
    pub friction: f32,
    pub restitution: f32,
    /// Whether contacts involving this body produce events.
    pub report_contacts: bool,
    /// Add the body to the simulation world immediately.
    pub enabled: bool,
}

impl BodyDesc {
    /// Create a dynamic body description with the given mass.
    pub fn new_dynamic(shape: ColliderShape, mass: f32) -> Self {
        Self {
            kind: BodyKind::Dynamic,
            shape,
            mass,
            linear_damping: 0.0,
            angular_damping: 0.0,
            linear_factor: Vec3::ONE,
            angular_factor: Vec3::ONE,
            friction: 0.5,
            restitution: 0.0,
            report_contacts: true,
            enabled: true,
        }
    }

    /// Create a static body description.
    pub fn new_static(shape: ColliderShape) -> Self {
        Self {
            kind: BodyKind::Static,
            mass: 0.0,
            ..Self::new_dynamic(shape, 0.0)
        }
    }

    /// Create a kinematic body description.
    pub fn new_kinematic(shape: ColliderShape) -> Self {
        Self {
            kind: BodyKind::Kinematic,
            mass: 0.0,
            ..Self::new_dynamic(shape, 0.0)
        }
    }

    pub fn with_damping(mut self, linear: f32, angular: f32) -> Self {
        self.linear_damping = linear;
        self.angular_damping = angular;
        self
    }

    pub fn with_factors(mut self, linear: Vec3, angular: Vec3) -> Self {
        self.linear_factor = linear;
        self.angular_factor = angular;
        self
    }

    pub fn with_friction(mut self, friction: f32) -> Self {
        self.friction = friction;
        self
    }

    pub fn with_restitution(mut self, restitution: f32) -> Self {
        self.restitution = restitution;
        self
    }

    pub fn with_contact_reporting(mut self, report_contacts: bool) -> Self {
        self.report_contacts = report_contacts;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Reject descriptions that are caller programming errors.
    pub fn validate(&self) -> Result<(), PhysicsError> {
        self.shape.validate()?;

        match self.kind {
            BodyKind::Dynamic if !(self.mass.is_finite() && self.mass > 0.0) => {
                return Err(PhysicsError::InvalidMass { mass: self.mass });
            }
            BodyKind::Static | BodyKind::Kinematic
                if !(self.mass.is_finite() && self.mass >= 0.0) =>
            {
                return Err(PhysicsError::InvalidMass { mass: self.mass });
            }
            _ => {}
        }

        let unit = |v: f32| v.is_finite() && (0.0..=1.0).contains(&v);
        if !unit(self.linear_damping) {
            return Err(PhysicsError::InvalidProperty("linear_damping"));
        }
        if !unit(self.angular_damping) {
            return Err(PhysicsError::InvalidProperty("angular_damping"));
        }
        if !self.linear_factor.is_finite() {
            return Err(PhysicsError::InvalidProperty("linear_factor"));
        }
        if !self.angular_factor.is_finite() {
            return Err(PhysicsError::InvalidProperty("angular_factor"));
        }
        if !(self.friction.is_finite() && self.friction >= 0.0) {
            return Err(PhysicsError::InvalidProperty("friction"));
        }
        if !(self.restitution.is_finite() && self.restitution >= 0.0) {
            return Err(PhysicsError::InvalidProperty("restitution"));
        }
        Ok(())
    }
}

/// Links an entity to the body it owns.
///
/// Inserted by `PhysicsSystem::create_body` and removed by
/// `PhysicsSystem::destroy_body`. The kind cannot change while the component exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhysicsBody {
    handle: BodyHandle,
    kind: BodyKind,
    report_contacts: bool,
}

impl PhysicsBody {
    pub(crate) fn new(handle: BodyHandle, kind: BodyKind, report_contacts: bool) -> Self {
        Self {
            handle,
            kind,
            report_contacts,
        }
    }

    pub fn handle(&self) -> BodyHandle {
        self.handle
    }

    pub fn kind(&self) -> BodyKind {
        self.kind
    }

    /// Whether this body participates in contact events.
    pub fn report_contacts(&self) -> bool {
        self.report_contacts
    }
}
