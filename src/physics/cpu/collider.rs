//! Collider shape support functions for collision detection and ray casting.

use glam::{Mat3, Vec3};

use crate::ecs::components::physics::ColliderShape;
use crate::physics::backend::Pose;

/// Axis-aligned bounding box for broadphase collision detection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhysicsAabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl PhysicsAabb {
    /// Test whether two AABBs overlap.
    #[inline]
    pub fn overlaps(&self, other: &PhysicsAabb) -> bool {
        self.min.x <= other.max.x
            && self.max.x >= other.min.x
            && self.min.y <= other.max.y
            && self.max.y >= other.min.y
            && self.min.z <= other.max.z
            && self.max.z >= other.min.z
    }

    /// Grow the box by `margin` on every side.
    #[inline]
    pub fn expanded(&self, margin: f32) -> PhysicsAabb {
        PhysicsAabb {
            min: self.min - Vec3::splat(margin),
            max: self.max + Vec3::splat(margin),
        }
    }
}

/// Ray intersection with a single shape.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShapeHit {
    /// Distance along the ray, in units of the ray direction's length.
    pub t: f32,
    /// World-space outward normal.
    pub normal: Vec3,
}

impl ColliderShape {
    /// GJK/EPA support function. Returns the farthest world point in the given direction.
    #[inline]
    pub fn support(&self, direction: Vec3, pose: &Pose) -> Vec3 {
        let local_dir = (pose.rotation.inverse() * direction).normalize_or_zero();

        let local_point = match self {
            ColliderShape::Sphere { radius } => local_dir * *radius,
            ColliderShape::Box { half_extents } => Vec3::new(
                half_extents.x.copysign(local_dir.x),
                half_extents.y.copysign(local_dir.y),
                half_extents.z.copysign(local_dir.z),
            ),
            ColliderShape::Capsule {
                radius,
                half_height,
            } => {
                // Capsule along Y axis
                let base = Vec3::new(0.0, half_height.copysign(local_dir.y), 0.0);
                base + local_dir * *radius
            }
            ColliderShape::Cylinder {
                radius,
                half_height,
            } => {
                // Cylinder along Y axis
                let y = half_height.copysign(local_dir.y);
                let xz = Vec3::new(local_dir.x, 0.0, local_dir.z);
                let xz_len = xz.length();
                let xz_point = if xz_len > 1e-6 {
                    xz * (*radius / xz_len)
                } else {
                    Vec3::ZERO
                };
                Vec3::new(xz_point.x, y, xz_point.z)
            }
            ColliderShape::ConvexHull { points } => points
                .iter()
                .copied()
                .max_by(|a, b| a.dot(local_dir).total_cmp(&b.dot(local_dir)))
                .unwrap_or(Vec3::ZERO),
        };

        pose.transform_point(local_point)
    }

    /// Compute the world-space AABB for this shape.
    #[inline]
    pub fn compute_aabb(&self, pose: &Pose) -> PhysicsAabb {
        match self {
            ColliderShape::Sphere { radius } => PhysicsAabb {
                min: pose.position - Vec3::splat(*radius),
                max: pose.position + Vec3::splat(*radius),
            },
            ColliderShape::Box { half_extents } => aabb_from_extents(*half_extents, pose),
            ColliderShape::Capsule {
                radius,
                half_height,
            } => {
                // Treat as bounding box of the capsule
                let extents = Vec3::new(*radius, *half_height + *radius, *radius);
                aabb_from_extents(extents, pose)
            }
            ColliderShape::Cylinder {
                radius,
                half_height,
            } => {
                let extents = Vec3::new(*radius, *half_height, *radius);
                aabb_from_extents(extents, pose)
            }
            ColliderShape::ConvexHull { points } => {
                let mut min = Vec3::splat(f32::MAX);
                let mut max = Vec3::splat(f32::MIN);
                for p in points {
                    let wp = pose.transform_point(*p);
                    min = min.min(wp);
                    max = max.max(wp);
                }
                if points.is_empty() {
                    min = pose.position;
                    max = pose.position;
                }
                PhysicsAabb { min, max }
            }
        }
    }

    /// Radius of a sphere around the local origin that contains the shape.
    pub fn bounding_radius(&self) -> f32 {
        match self {
            ColliderShape::Sphere { radius } => *radius,
            ColliderShape::Box { half_extents } => half_extents.length(),
            ColliderShape::Capsule {
                radius,
                half_height,
            } => *radius + *half_height,
            ColliderShape::Cylinder {
                radius,
                half_height,
            } => (radius * radius + half_height * half_height).sqrt(),
            ColliderShape::ConvexHull { points } => {
                points.iter().map(|p| p.length()).fold(0.0, f32::max)
            }
        }
    }

    /// Intersect the ray `origin + t * dir`, `t ∈ [0, max_t]`, with this shape.
    ///
    /// Rays starting inside the shape do not hit it. Convex hulls are tested
    /// against their bounding sphere.
    pub fn ray_cast(&self, pose: &Pose, origin: Vec3, dir: Vec3, max_t: f32) -> Option<ShapeHit> {
        let local_origin = pose.inverse_transform_point(origin);
        let local_dir = pose.rotation.inverse() * dir;

        let (t, local_normal) = match self {
            ColliderShape::Sphere { radius } => {
                ray_sphere(local_origin, local_dir, Vec3::ZERO, *radius)?
            }
            ColliderShape::Box { half_extents } => {
                ray_box(local_origin, local_dir, *half_extents)?
            }
            ColliderShape::Capsule {
                radius,
                half_height,
            } => ray_capsule(local_origin, local_dir, *radius, *half_height)?,
            ColliderShape::Cylinder {
                radius,
                half_height,
            } => ray_cylinder(local_origin, local_dir, *radius, *half_height)?,
            ColliderShape::ConvexHull { .. } => {
                ray_sphere(local_origin, local_dir, Vec3::ZERO, self.bounding_radius())?
            }
        };

        if t > max_t {
            return None;
        }
        Some(ShapeHit {
            t,
            normal: (pose.rotation * local_normal).normalize_or_zero(),
        })
    }
}

/// Compute world-space AABB from local half-extents and a pose.
#[inline]
fn aabb_from_extents(half_extents: Vec3, pose: &Pose) -> PhysicsAabb {
    // For each world axis, project the local box axes
    let rotation = Mat3::from_quat(pose.rotation);
    let extent = rotation.x_axis.abs() * half_extents.x
        + rotation.y_axis.abs() * half_extents.y
        + rotation.z_axis.abs() * half_extents.z;

    PhysicsAabb {
        min: pose.position - extent,
        max: pose.position + extent,
    }
}

/// Ray-sphere test via the quadratic formula. Returns the entry point only.
fn ray_sphere(origin: Vec3, dir: Vec3, center: Vec3, radius: f32) -> Option<(f32, Vec3)> {
    let oc = origin - center;
    let a = dir.dot(dir);
    if a < 1e-12 {
        return None;
    }
    let b = 2.0 * oc.dot(dir);
    let c = oc.dot(oc) - radius * radius;
    let discriminant = b * b - 4.0 * a * c;
    if discriminant < 0.0 || c < 0.0 {
        return None;
    }

    let t = (-b - discriminant.sqrt()) / (2.0 * a);
    if t < 0.0 {
        return None;
    }
    let normal = (origin + dir * t - center) / radius;
    Some((t, normal))
}

/// Slab test against an origin-centered box.
fn ray_box(origin: Vec3, dir: Vec3, half_extents: Vec3) -> Option<(f32, Vec3)> {
    let mut t_min = 0.0f32;
    let mut t_max = f32::MAX;
    let mut normal = Vec3::ZERO;

    for axis in 0..3 {
        let o = origin[axis];
        let d = dir[axis];
        let h = half_extents[axis];

        if d.abs() < 1e-8 {
            if o < -h || o > h {
                return None;
            }
            continue;
        }

        let inv = 1.0 / d;
        let mut t1 = (-h - o) * inv;
        let mut t2 = (h - o) * inv;
        // Entering through the -h face when moving along +axis.
        let mut sign = -1.0;
        if t1 > t2 {
            std::mem::swap(&mut t1, &mut t2);
            sign = 1.0;
        }

        if t1 > t_min {
            t_min = t1;
            normal = Vec3::ZERO;
            normal[axis] = sign;
        }
        t_max = t_max.min(t2);
        if t_min > t_max {
            return None;
        }
    }

    // A zero normal means the origin is inside the box.
    if normal == Vec3::ZERO {
        return None;
    }
    Some((t_min, normal))
}

/// Ray against the side of an infinite Y-aligned cylinder, limited to `|y| <= half_height`.
fn ray_cylinder_side(
    origin: Vec3,
    dir: Vec3,
    radius: f32,
    half_height: f32,
) -> Option<(f32, Vec3)> {
    let a = dir.x * dir.x + dir.z * dir.z;
    if a < 1e-12 {
        return None;
    }
    let b = 2.0 * (origin.x * dir.x + origin.z * dir.z);
    let c = origin.x * origin.x + origin.z * origin.z - radius * radius;
    let discriminant = b * b - 4.0 * a * c;
    if discriminant < 0.0 || c < 0.0 {
        return None;
    }

    let t = (-b - discriminant.sqrt()) / (2.0 * a);
    if t < 0.0 {
        return None;
    }
    let hit = origin + dir * t;
    if hit.y.abs() > half_height {
        return None;
    }
    Some((t, Vec3::new(hit.x, 0.0, hit.z) / radius))
}

fn ray_capsule(origin: Vec3, dir: Vec3, radius: f32, half_height: f32) -> Option<(f32, Vec3)> {
    let cap = Vec3::new(0.0, half_height, 0.0);
    [
        ray_cylinder_side(origin, dir, radius, half_height),
        ray_sphere(origin, dir, cap, radius),
        ray_sphere(origin, dir, -cap, radius),
    ]
    .into_iter()
    .flatten()
    .min_by(|a, b| a.0.total_cmp(&b.0))
}

fn ray_cylinder(origin: Vec3, dir: Vec3, radius: f32, half_height: f32) -> Option<(f32, Vec3)> {
    let mut best = ray_cylinder_side(origin, dir, radius, half_height);

    if dir.y.abs() > 1e-8 {
        for (plane_y, normal) in [(half_height, Vec3::Y), (-half_height, -Vec3::Y)] {
            // Only the cap facing the ray origin can be entered.
            if (origin.y - plane_y) * normal.y <= 0.0 {
                continue;
            }
            let t = (plane_y - origin.y) / dir.y;
            if t < 0.0 {
                continue;
            }
            let hit = origin + dir * t;
            if hit.x * hit.x + hit.z * hit.z <= radius * radius
                && best.map_or(true, |(bt, _)| t < bt)
            {
                best = Some((t, normal));
            }
        }
    }
    best
}
