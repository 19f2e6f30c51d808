//! Nearest-hit ray queries mapped back to entities.

use glam::Vec3;
use hecs::Entity;

use super::backend::{BodyHandle, PhysicsBackend};

/// Closest entity hit by a ray.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RaycastResult {
    pub entity: Entity,
    /// World-space hit point.
    pub point: Vec3,
    /// World-space surface normal at the hit point.
    pub normal: Vec3,
}

/// Cast the segment `start → end` and resolve the closest hit to its entity.
///
/// Returns `None` for a degenerate segment, when nothing is hit, or when the
/// hit body is not owned by any entity.
pub fn raycast_first(
    backend: &dyn PhysicsBackend,
    resolve: impl Fn(BodyHandle) -> Option<Entity>,
    start: Vec3,
    end: Vec3,
) -> Option<RaycastResult> {
    if !start.is_finite() || !end.is_finite() || start.distance_squared(end) < 1e-12 {
        return None;
    }

    let hit = backend.cast_ray(start, end)?;
    let Some(entity) = resolve(hit.body) else {
        tracing::trace!("ray hit body {:?} which has no entity", hit.body);
        return None;
    };

    Some(RaycastResult {
        entity,
        point: hit.point,
        normal: hit.normal,
    })
}
