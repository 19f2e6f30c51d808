//! Body ↔ entity transform synchronization.

use crate::ecs::components::physics::{BodyKind, PhysicsBody};
use crate::ecs::components::transform::{GlobalTransform, Transform};
use crate::physics::backend::PhysicsBackend;

/// Synchronize entity transforms with their simulated bodies.
///
/// Dynamic bodies write their pose into `Transform` (scale untouched) and
/// refresh `GlobalTransform`. Kinematic bodies take their pose from `Transform`.
/// Static bodies, sleeping bodies, bodies outside the simulation world and
/// entities without a `Transform` are skipped.
///
/// Returns the number of bodies synchronized.
pub fn sync_transforms(world: &mut hecs::World, backend: &mut dyn PhysicsBackend) -> usize {
    let mut synced = 0;

    for (_, (body, transform, global)) in world.query_mut::<(
        &PhysicsBody,
        Option<&mut Transform>,
        Option<&mut GlobalTransform>,
    )>() {
        let Some(transform) = transform else {
            continue;
        };
        let handle = body.handle();
        if !backend.is_active(handle) {
            continue;
        }

        match body.kind() {
            BodyKind::Dynamic => {
                let Some(pose) = backend.pose(handle) else {
                    continue;
                };
                transform.apply_pose(&pose);
                if let Some(global) = global {
                    global.0 = transform.to_matrix();
                }
            }
            BodyKind::Kinematic => {
                backend.set_pose(handle, transform.pose());
                if let Some(global) = global {
                    global.0 = transform.to_matrix();
                }
            }
            BodyKind::Static => continue,
        }
        synced += 1;
    }

    synced
}
