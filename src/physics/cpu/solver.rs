//! Sequential impulse constraint solver.

use glam::Vec3;
use slotmap::SlotMap;

use crate::physics::backend::{BodyHandle, ConstraintHandle};

use super::body::Body;
use super::contact::SolverManifold;

/// Baumgarte stabilization parameter.
const BAUMGARTE_BETA: f32 = 0.2;
/// Penetration slop (allowed penetration before position correction).
const PENETRATION_SLOP: f32 = 0.005;
/// Approach speed below which contacts do not bounce.
const RESTITUTION_THRESHOLD: f32 = 1.0;

/// Keeps two local anchors at a fixed distance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DistanceJoint {
    pub body_a: BodyHandle,
    pub body_b: BodyHandle,
    pub anchor_a: Vec3,
    pub anchor_b: Vec3,
    pub rest_length: f32,
}

/// Effective mass of a pair along `dir` at offsets `r_a` / `r_b`.
fn inverse_effective_mass(a: &Body, b: &Body, r_a: Vec3, r_b: Vec3, dir: Vec3) -> f32 {
    let ra_x = r_a.cross(dir);
    let rb_x = r_b.cross(dir);
    a.effective_inv_mass()
        + b.effective_inv_mass()
        + (a.inv_inertia_world() * ra_x).dot(ra_x)
        + (b.inv_inertia_world() * rb_x).dot(rb_x)
}

/// Compute lever arms, effective masses and velocity targets for every contact.
pub fn prepare_contacts(
    manifolds: &mut [SolverManifold],
    bodies: &SlotMap<BodyHandle, Body>,
    dt: f32,
) {
    for manifold in manifolds.iter_mut() {
        let (Some(a), Some(b)) = (bodies.get(manifold.body_a), bodies.get(manifold.body_b)) else {
            continue;
        };
        let normal = manifold.normal;

        for contact in &mut manifold.contacts {
            contact.r_a = contact.position - a.pose.position;
            contact.r_b = contact.position - b.pose.position;

            let k = inverse_effective_mass(a, b, contact.r_a, contact.r_b, normal);
            contact.normal_mass = if k > 0.0 { 1.0 / k } else { 0.0 };

            // Baumgarte position correction; speculative contacts may close the gap.
            let position_bias = if contact.penetration > PENETRATION_SLOP {
                BAUMGARTE_BETA / dt * (contact.penetration - PENETRATION_SLOP)
            } else if contact.penetration < 0.0 {
                contact.penetration / dt
            } else {
                0.0
            };

            let approach = (b.velocity_at(contact.r_b) - a.velocity_at(contact.r_a)).dot(normal);
            let bounce = if approach < -RESTITUTION_THRESHOLD {
                -manifold.restitution * approach
            } else {
                0.0
            };

            contact.bias = position_bias + bounce;
        }
    }
}

/// Apply impulses carried over from the previous step.
pub fn warm_start(manifolds: &[SolverManifold], bodies: &mut SlotMap<BodyHandle, Body>) {
    for manifold in manifolds {
        let Some([a, b]) = bodies.get_disjoint_mut([manifold.body_a, manifold.body_b]) else {
            continue;
        };
        for contact in &manifold.contacts {
            if contact.normal_impulse == 0.0 {
                continue;
            }
            let impulse = manifold.normal * contact.normal_impulse;
            a.apply_impulse(-impulse, contact.r_a);
            b.apply_impulse(impulse, contact.r_b);
        }
    }
}

/// Solve contact and joint constraints using sequential impulse iteration.
pub fn solve(
    manifolds: &mut [SolverManifold],
    joints: &SlotMap<ConstraintHandle, DistanceJoint>,
    bodies: &mut SlotMap<BodyHandle, Body>,
    solver_iterations: u32,
    dt: f32,
) {
    for _ in 0..solver_iterations {
        for joint in joints.values() {
            solve_distance(joint, bodies, dt);
        }
        for manifold in manifolds.iter_mut() {
            solve_manifold(manifold, bodies);
        }
    }
}

fn solve_manifold(manifold: &mut SolverManifold, bodies: &mut SlotMap<BodyHandle, Body>) {
    let Some([a, b]) = bodies.get_disjoint_mut([manifold.body_a, manifold.body_b]) else {
        return;
    };
    let normal = manifold.normal;

    for contact in &mut manifold.contacts {
        if contact.normal_mass == 0.0 {
            continue;
        }

        let relative_velocity = b.velocity_at(contact.r_b) - a.velocity_at(contact.r_a);
        let contact_velocity = relative_velocity.dot(normal);

        let j_normal = (-contact_velocity + contact.bias) * contact.normal_mass;

        // Clamp accumulated normal impulse
        let old_impulse = contact.normal_impulse;
        contact.normal_impulse = (old_impulse + j_normal).max(0.0);
        let j_normal = contact.normal_impulse - old_impulse;

        let impulse = normal * j_normal;
        a.apply_impulse(-impulse, contact.r_a);
        b.apply_impulse(impulse, contact.r_b);

        // Friction against the post-impulse tangent velocity
        let relative_velocity = b.velocity_at(contact.r_b) - a.velocity_at(contact.r_a);
        let tangent_vel = relative_velocity - normal * relative_velocity.dot(normal);
        let tangent_len = tangent_vel.length();
        if tangent_len <= 1e-6 {
            continue;
        }
        let tangent = tangent_vel / tangent_len;

        let inv_mass_t = inverse_effective_mass(a, b, contact.r_a, contact.r_b, tangent);
        if inv_mass_t <= 0.0 {
            continue;
        }

        // Coulomb friction: |Jt| <= mu * |Jn|
        let max_friction = manifold.friction * contact.normal_impulse;
        let j_tangent = (-tangent_len / inv_mass_t).clamp(-max_friction, max_friction);

        let friction_impulse = tangent * j_tangent;
        a.apply_impulse(-friction_impulse, contact.r_a);
        b.apply_impulse(friction_impulse, contact.r_b);
    }
}

fn solve_distance(joint: &DistanceJoint, bodies: &mut SlotMap<BodyHandle, Body>, dt: f32) {
    let Some([a, b]) = bodies.get_disjoint_mut([joint.body_a, joint.body_b]) else {
        return;
    };
    if !a.in_world || !b.in_world {
        return;
    }

    let world_a = a.pose.transform_point(joint.anchor_a);
    let world_b = b.pose.transform_point(joint.anchor_b);
    let delta = world_b - world_a;
    let length = delta.length();
    if length < 1e-6 {
        return;
    }
    let dir = delta / length;

    let r_a = world_a - a.pose.position;
    let r_b = world_b - b.pose.position;
    let k = inverse_effective_mass(a, b, r_a, r_b, dir);
    if k <= 0.0 {
        return;
    }

    let error = length - joint.rest_length;
    let relative_velocity = (b.velocity_at(r_b) - a.velocity_at(r_a)).dot(dir);
    let j = -(relative_velocity + BAUMGARTE_BETA / dt * error) / k;

    let impulse = dir * j;
    a.apply_impulse(-impulse, r_a);
    b.apply_impulse(impulse, r_b);
}
