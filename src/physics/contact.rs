//! Contact descriptors handed to event listeners, and their extraction from raw
//! engine contacts.

use glam::Vec3;

use super::backend::RawContact;

/// One contact point seen from one body of a pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContactPoint {
    /// Contact point on this body, in this body's local frame.
    pub local_point: Vec3,
    /// Contact point on the other body, in the other body's local frame.
    pub local_point_other: Vec3,
    /// Contact point on this body, in world space.
    pub point: Vec3,
    /// Contact point on the other body, in world space.
    pub point_other: Vec3,
    /// World-space normal pointing away from the other body.
    pub normal: Vec3,
}

/// Payload of the global `contact` notification.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SingleContactResult {
    pub a: hecs::Entity,
    pub b: hecs::Entity,
    /// First contact point of the manifold, seen from `a`.
    pub contact: ContactPoint,
}

/// Payload of per-entity `contact` and `collisionstart` notifications.
#[derive(Debug, Clone, PartialEq)]
pub struct ContactResult {
    pub other: hecs::Entity,
    /// Every contact point of the manifold, seen from the receiving entity.
    pub contacts: Vec<ContactPoint>,
}

/// Which body of a manifold a descriptor is built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    A,
    B,
}

/// Build the descriptors for body A and body B from one raw contact.
///
/// The B descriptor mirrors A: points are swapped and the normal is negated,
/// since the raw normal points away from B.
#[inline]
pub fn extract(raw: &RawContact) -> (ContactPoint, ContactPoint) {
    let a = ContactPoint {
        local_point: raw.local_point_a,
        local_point_other: raw.local_point_b,
        point: raw.world_point_a,
        point_other: raw.world_point_b,
        normal: raw.normal_on_b,
    };
    let b = ContactPoint {
        local_point: raw.local_point_b,
        local_point_other: raw.local_point_a,
        point: raw.world_point_b,
        point_other: raw.world_point_a,
        normal: -raw.normal_on_b,
    };
    (a, b)
}

/// Extract one side of every contact, preserving manifold order.
pub fn extract_side(contacts: &[RawContact], side: Side) -> Vec<ContactPoint> {
    contacts
        .iter()
        .map(|raw| {
            let (a, b) = extract(raw);
            match side {
                Side::A => a,
                Side::B => b,
            }
        })
        .collect()
}
