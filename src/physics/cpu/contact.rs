//! Solver-side contact data and the warm-start cache.

use std::collections::HashMap;

use glam::Vec3;

use crate::physics::backend::{BodyHandle, ContactManifold, Pose, RawContact};

/// A single contact point with accumulated impulse data.
#[derive(Debug, Clone, Copy)]
pub struct ContactConstraint {
    /// Contact position in world space, halfway between both surfaces.
    pub position: Vec3,
    /// Contact point on A, in A's local frame.
    pub local_a: Vec3,
    /// Contact point on B, in B's local frame.
    pub local_b: Vec3,
    /// Penetration depth. Negative for speculative contacts.
    pub penetration: f32,
    /// Offsets from each center of mass, filled by the solver.
    pub r_a: Vec3,
    pub r_b: Vec3,
    /// Effective mass along the normal.
    pub normal_mass: f32,
    /// Target separating velocity.
    pub bias: f32,
    /// Accumulated normal impulse.
    pub normal_impulse: f32,
}

/// Contacts between two bodies for one step, ready for the solver.
#[derive(Debug, Clone)]
pub struct SolverManifold {
    pub body_a: BodyHandle,
    pub body_b: BodyHandle,
    /// Contact normal (from A to B).
    pub normal: Vec3,
    pub friction: f32,
    pub restitution: f32,
    pub contacts: Vec<ContactConstraint>,
}

impl SolverManifold {
    /// Engine-facing report of this manifold at the given end-of-step poses.
    pub fn to_report(&self, pose_a: &Pose, pose_b: &Pose) -> ContactManifold {
        let contacts = self
            .contacts
            .iter()
            .map(|c| RawContact {
                local_point_a: c.local_a,
                local_point_b: c.local_b,
                world_point_a: pose_a.transform_point(c.local_a),
                world_point_b: pose_b.transform_point(c.local_b),
                normal_on_b: -self.normal,
                distance: -c.penetration,
            })
            .collect();
        ContactManifold {
            body_a: self.body_a,
            body_b: self.body_b,
            contacts,
        }
    }
}

/// Cached contact data for warm-starting the solver.
#[derive(Debug, Clone, Copy)]
struct CachedContact {
    /// Contact position in world space (used for matching).
    position: Vec3,
    /// Accumulated normal impulse from the previous step.
    normal_impulse: f32,
}

/// Maximum distance squared for matching contacts across steps.
const CONTACT_MATCH_THRESHOLD_SQ: f32 = 0.02 * 0.02;

/// Cache of contact impulses for warm-starting the constraint solver.
///
/// Impulses are keyed by body pair and matched to the next step's contacts by
/// position proximity.
#[derive(Debug, Default)]
pub struct ContactCache {
    cache: HashMap<(BodyHandle, BodyHandle), Vec<CachedContact>>,
}

impl ContactCache {
    pub fn new() -> Self {
        Self {
            cache: HashMap::new(),
        }
    }

    /// Seed current contacts with the impulses of matching cached contacts.
    pub fn warm_start(&self, manifolds: &mut [SolverManifold]) {
        for manifold in manifolds.iter_mut() {
            let Some(cached) = self.cache.get(&(manifold.body_a, manifold.body_b)) else {
                continue;
            };
            for contact in &mut manifold.contacts {
                let closest = cached.iter().min_by(|a, b| {
                    let da = (a.position - contact.position).length_squared();
                    let db = (b.position - contact.position).length_squared();
                    da.total_cmp(&db)
                });
                if let Some(cc) = closest {
                    if (cc.position - contact.position).length_squared() < CONTACT_MATCH_THRESHOLD_SQ {
                        contact.normal_impulse = cc.normal_impulse;
                    }
                }
            }
        }
    }

    /// Replace the cache with this step's solved contacts.
    pub fn update(&mut self, manifolds: &[SolverManifold]) {
        self.cache.clear();
        for manifold in manifolds {
            let contacts = manifold
                .contacts
                .iter()
                .map(|c| CachedContact {
                    position: c.position,
                    normal_impulse: c.normal_impulse,
                })
                .collect();
            self.cache.insert((manifold.body_a, manifold.body_b), contacts);
        }
    }

    /// Forget every pair involving `body`.
    pub fn forget(&mut self, body: BodyHandle) {
        self.cache.retain(|&(a, b), _| a != body && b != body);
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}
