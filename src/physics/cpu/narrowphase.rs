//! Narrowphase collision detection: GJK, EPA, and specialized tests.
//!
//! Every test reports contacts for shapes that overlap or are separated by
//! less than the contact margin. Separated contacts carry a negative penetration.

use glam::Vec3;

use crate::ecs::components::physics::ColliderShape;
use crate::physics::backend::Pose;

/// Distance within which separated shapes still produce contacts.
pub const CONTACT_MARGIN: f32 = 0.02;

/// Maximum number of points kept per box-box manifold.
const MAX_BOX_CONTACTS: usize = 4;

/// Information about a single contact between two shapes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContactInfo {
    /// Contact normal (from shape A to shape B).
    pub normal: Vec3,
    /// Penetration depth. Negative when the shapes are separated.
    pub penetration: f32,
    /// Deepest point of A, in world space.
    pub point_a: Vec3,
    /// Deepest point of B, in world space.
    pub point_b: Vec3,
}

/// GJK simplex: up to four Minkowski-difference vertices, newest first.
#[derive(Debug, Clone, Copy)]
pub struct Simplex {
    vertices: [Vec3; 4],
    len: usize,
}

impl Simplex {
    fn single(point: Vec3) -> Self {
        Self {
            vertices: [point, Vec3::ZERO, Vec3::ZERO, Vec3::ZERO],
            len: 1,
        }
    }

    pub fn points(&self) -> &[Vec3] {
        &self.vertices[..self.len]
    }

    fn push(&mut self, point: Vec3) {
        self.vertices.copy_within(0..3, 1);
        self.vertices[0] = point;
        self.len = (self.len + 1).min(4);
    }

    fn set(&mut self, points: &[Vec3]) {
        self.vertices[..points.len()].copy_from_slice(points);
        self.len = points.len();
    }

    /// Reduce to the feature nearest the origin and pick the next search
    /// direction. Returns `true` once the simplex encloses the origin.
    fn evolve(&mut self, direction: &mut Vec3) -> bool {
        match self.len {
            2 => self.line(direction),
            3 => self.triangle(direction),
            4 => self.tetrahedron(direction),
            _ => false,
        }
    }

    fn line(&mut self, direction: &mut Vec3) -> bool {
        let [a, b, ..] = self.vertices;
        let ab = b - a;
        let ao = -a;

        if ab.dot(ao) > 0.0 {
            *direction = ab.cross(ao).cross(ab);
            if direction.length_squared() < 1e-10 {
                // Origin on the segment
                *direction = ab.any_orthonormal_vector();
            }
        } else {
            self.set(&[a]);
            *direction = ao;
        }
        false
    }

    fn triangle(&mut self, direction: &mut Vec3) -> bool {
        let [a, b, c, _] = self.vertices;
        let ab = b - a;
        let ac = c - a;
        let ao = -a;
        let abc = ab.cross(ac);

        if abc.cross(ac).dot(ao) > 0.0 {
            if ac.dot(ao) > 0.0 {
                self.set(&[a, c]);
                *direction = ac.cross(ao).cross(ac);
                return false;
            }
            self.set(&[a, b]);
            return self.line(direction);
        }
        if ab.cross(abc).dot(ao) > 0.0 {
            self.set(&[a, b]);
            return self.line(direction);
        }

        if abc.dot(ao) > 0.0 {
            *direction = abc;
        } else {
            self.set(&[a, c, b]);
            *direction = -abc;
        }
        false
    }

    fn tetrahedron(&mut self, direction: &mut Vec3) -> bool {
        let [a, b, c, d] = self.vertices;
        let ao = -a;
        let faces = [
            ((b - a).cross(c - a), [a, b, c]),
            ((c - a).cross(d - a), [a, c, d]),
            ((d - a).cross(b - a), [a, d, b]),
        ];

        for (normal, face) in faces {
            if normal.dot(ao) > 0.0 {
                self.set(&face);
                *direction = normal;
                return self.triangle(direction);
            }
        }
        true
    }
}

/// Support point of the Minkowski difference A - B.
fn minkowski_support(
    shape_a: &ColliderShape,
    pose_a: &Pose,
    shape_b: &ColliderShape,
    pose_b: &Pose,
    direction: Vec3,
) -> Vec3 {
    shape_a.support(direction, pose_a) - shape_b.support(-direction, pose_b)
}

/// GJK boolean test. Returns the enclosing simplex when the shapes intersect.
pub fn gjk_intersection(
    shape_a: &ColliderShape,
    pose_a: &Pose,
    shape_b: &ColliderShape,
    pose_b: &Pose,
) -> Option<Simplex> {
    const MAX_GJK_ITERATIONS: usize = 64;

    let support = |direction: Vec3| minkowski_support(shape_a, pose_a, shape_b, pose_b, direction);

    let between = pose_b.position - pose_a.position;
    let first = support(if between.length_squared() < 1e-10 {
        Vec3::X
    } else {
        between
    });
    let mut simplex = Simplex::single(first);
    let mut direction = -first;

    for _ in 0..MAX_GJK_ITERATIONS {
        if direction.length_squared() < 1e-10 {
            // Origin on the simplex boundary: touching.
            return Some(simplex);
        }
        let point = support(direction);
        if point.dot(direction) < 0.0 {
            return None;
        }
        simplex.push(point);
        if simplex.evolve(&mut direction) {
            return Some(simplex);
        }
    }

    None
}

/// Triangle of the EPA polytope with its outward unit normal and distance to the origin.
#[derive(Debug, Clone, Copy)]
struct Face {
    indices: [usize; 3],
    normal: Vec3,
    distance: f32,
}

/// Convex hull of Minkowski-difference points grown by EPA around the origin.
struct Polytope {
    vertices: Vec<Vec3>,
    faces: Vec<Face>,
}

impl Polytope {
    /// Seed from the tetrahedron GJK ended with. Faces are wound so normals point outward.
    fn from_tetrahedron(points: &[Vec3]) -> Self {
        let centroid = points.iter().copied().sum::<Vec3>() / points.len() as f32;
        let mut polytope = Self {
            vertices: points.to_vec(),
            faces: Vec::with_capacity(16),
        };
        for [i, j, k] in [[0, 1, 2], [0, 3, 1], [0, 2, 3], [1, 3, 2]] {
            let v = &polytope.vertices;
            let inward = (v[j] - v[i]).cross(v[k] - v[i]).dot(v[i] - centroid) < 0.0;
            polytope.add_face(if inward { [i, k, j] } else { [i, j, k] });
        }
        polytope
    }

    fn add_face(&mut self, indices: [usize; 3]) {
        let [a, b, c] = indices.map(|i| self.vertices[i]);
        let (normal, distance) = match (b - a).cross(c - a).try_normalize() {
            Some(normal) => (normal, normal.dot(a)),
            // Zero-area faces stay for connectivity but are never closest.
            None => (Vec3::ZERO, f32::INFINITY),
        };
        self.faces.push(Face {
            indices,
            normal,
            distance,
        });
    }

    fn closest_face(&self) -> Option<Face> {
        self.faces
            .iter()
            .copied()
            .filter(|face| face.distance.is_finite())
            .min_by(|x, y| x.distance.total_cmp(&y.distance))
    }

    /// Add `point`, replacing every face it can see with a fan from the horizon.
    fn expand(&mut self, point: Vec3) {
        let index = self.vertices.len();
        self.vertices.push(point);

        let mut horizon: Vec<[usize; 2]> = Vec::new();
        let vertices = &self.vertices;
        self.faces.retain(|face| {
            let visible = face.normal.dot(point - vertices[face.indices[0]]) > 0.0;
            if visible {
                let [a, b, c] = face.indices;
                for edge in [[a, b], [b, c], [c, a]] {
                    toggle_edge(&mut horizon, edge);
                }
            }
            !visible
        });

        for [a, b] in horizon {
            self.add_face([a, b, index]);
        }
    }
}

/// Edges shared by two removed faces cancel out, leaving the horizon.
fn toggle_edge(edges: &mut Vec<[usize; 2]>, [a, b]: [usize; 2]) {
    match edges.iter().position(|&edge| edge == [b, a]) {
        Some(pos) => {
            edges.swap_remove(pos);
        }
        None => edges.push([a, b]),
    }
}

/// EPA: penetration depth and normal of two intersecting shapes, from GJK's simplex.
pub fn epa_penetration(
    simplex: &Simplex,
    shape_a: &ColliderShape,
    pose_a: &Pose,
    shape_b: &ColliderShape,
    pose_b: &Pose,
) -> Option<ContactInfo> {
    const EPA_TOLERANCE: f32 = 1e-4;
    const MAX_EPA_ITERATIONS: usize = 64;

    if simplex.points().len() < 4 {
        return epa_fallback(shape_a, pose_a, shape_b, pose_b);
    }

    let mut polytope = Polytope::from_tetrahedron(simplex.points());
    let mut closest = polytope.closest_face()?;

    for _ in 0..MAX_EPA_ITERATIONS {
        let point = minkowski_support(shape_a, pose_a, shape_b, pose_b, closest.normal);
        if point.dot(closest.normal) - closest.distance < EPA_TOLERANCE {
            break;
        }
        polytope.expand(point);
        closest = polytope.closest_face()?;
    }

    // Curved shapes can exhaust the iterations; the closest face is then close enough.
    Some(epa_contact(shape_a, pose_a, closest.normal, closest.distance))
}

/// The closest face normal of the Minkowski difference A - B points from A to B.
fn epa_contact(shape_a: &ColliderShape, pose_a: &Pose, normal: Vec3, depth: f32) -> ContactInfo {
    let point_a = shape_a.support(normal, pose_a);
    ContactInfo {
        normal,
        penetration: depth,
        point_a,
        point_b: point_a - normal * depth,
    }
}

/// Fallback for when GJK terminates with a degenerate simplex (touching shapes).
fn epa_fallback(
    shape_a: &ColliderShape,
    pose_a: &Pose,
    shape_b: &ColliderShape,
    pose_b: &Pose,
) -> Option<ContactInfo> {
    let normal = (pose_b.position - pose_a.position).try_normalize()?;
    let point_a = shape_a.support(normal, pose_a);
    let point_b = shape_b.support(-normal, pose_b);
    Some(ContactInfo {
        normal,
        penetration: (point_a - point_b).dot(normal),
        point_a,
        point_b,
    })
}

/// Specialized sphere-sphere test.
pub fn sphere_sphere(
    radius_a: f32,
    pose_a: &Pose,
    radius_b: f32,
    pose_b: &Pose,
) -> Option<ContactInfo> {
    let center_a = pose_a.position;
    let center_b = pose_b.position;

    let diff = center_b - center_a;
    let dist = diff.length();
    let penetration = radius_a + radius_b - dist;
    if penetration < -CONTACT_MARGIN {
        return None;
    }

    let normal = if dist > 1e-6 { diff / dist } else { Vec3::Y };
    Some(ContactInfo {
        normal,
        penetration,
        point_a: center_a + normal * radius_a,
        point_b: center_b - normal * radius_b,
    })
}

/// Specialized box-sphere test. The normal points from the box to the sphere.
pub fn box_sphere(
    half_extents: Vec3,
    box_pose: &Pose,
    radius: f32,
    sphere_pose: &Pose,
) -> Option<ContactInfo> {
    let sphere_center = sphere_pose.position;
    let local = box_pose.inverse_transform_point(sphere_center);

    // Clamp to box extents to find closest point on box
    let clamped = local.clamp(-half_extents, half_extents);

    if clamped == local {
        // Sphere center is inside the box: push out through the nearest face.
        let mut min_pen = f32::MAX;
        let mut axis = 1;
        let mut sign = 1.0;
        for i in 0..3 {
            let pen_pos = half_extents[i] - local[i];
            let pen_neg = half_extents[i] + local[i];
            if pen_pos < min_pen {
                min_pen = pen_pos;
                axis = i;
                sign = 1.0;
            }
            if pen_neg < min_pen {
                min_pen = pen_neg;
                axis = i;
                sign = -1.0;
            }
        }
        let mut local_normal = Vec3::ZERO;
        local_normal[axis] = sign;
        let mut face_point = local;
        face_point[axis] = sign * half_extents[axis];

        let normal = box_pose.rotation * local_normal;
        return Some(ContactInfo {
            normal,
            penetration: min_pen + radius,
            point_a: box_pose.transform_point(face_point),
            point_b: sphere_center - normal * radius,
        });
    }

    let closest_world = box_pose.transform_point(clamped);
    let to_sphere = sphere_center - closest_world;
    let dist = to_sphere.length();
    let penetration = radius - dist;
    if penetration < -CONTACT_MARGIN {
        return None;
    }

    let normal = to_sphere / dist;
    Some(ContactInfo {
        normal,
        penetration,
        point_a: closest_world,
        point_b: sphere_center - normal * radius,
    })
}

/// SAT (Separating Axis Theorem) test for box-box collision.
///
/// Produces up to four contacts from the vertices of each box that lie inside
/// the other, so boxes resting face to face are stable. Edge-edge cases fall
/// back to a single contact.
pub fn sat_box_box(
    half_a: Vec3,
    pose_a: &Pose,
    half_b: Vec3,
    pose_b: &Pose,
) -> Vec<ContactInfo> {
    let axes_a = [
        pose_a.rotation * Vec3::X,
        pose_a.rotation * Vec3::Y,
        pose_a.rotation * Vec3::Z,
    ];
    let axes_b = [
        pose_b.rotation * Vec3::X,
        pose_b.rotation * Vec3::Y,
        pose_b.rotation * Vec3::Z,
    ];
    let half_a_arr = [half_a.x, half_a.y, half_a.z];
    let half_b_arr = [half_b.x, half_b.y, half_b.z];

    let t = pose_b.position - pose_a.position;

    let mut min_overlap = f32::MAX;
    let mut best_axis = Vec3::ZERO;

    let mut candidates = Vec::with_capacity(15);
    candidates.extend_from_slice(&axes_a);
    candidates.extend_from_slice(&axes_b);
    for a in &axes_a {
        for b in &axes_b {
            let axis = a.cross(*b);
            let len = axis.length();
            if len > 1e-6 {
                candidates.push(axis / len);
            }
        }
    }

    for axis in candidates {
        let overlap = sat_overlap(axis, &axes_a, &half_a_arr, &axes_b, &half_b_arr, t);
        if overlap < -CONTACT_MARGIN {
            return Vec::new();
        }
        // Prefer face axes on ties; edge axes were pushed last.
        if overlap < min_overlap - 1e-5 {
            min_overlap = overlap;
            best_axis = axis;
        }
    }

    // Ensure normal points from A to B
    if best_axis.dot(t) < 0.0 {
        best_axis = -best_axis;
    }
    let normal = best_axis;

    // Support planes of each box along the normal.
    let plane_a = pose_a.position.dot(normal) + projected_radius(normal, &axes_a, &half_a_arr);
    let plane_b = pose_b.position.dot(normal) - projected_radius(normal, &axes_b, &half_b_arr);

    let mut contacts = Vec::new();
    for v in box_vertices(half_b, pose_b) {
        if point_in_box(v, half_a, pose_a, CONTACT_MARGIN) {
            let depth = plane_a - v.dot(normal);
            contacts.push(ContactInfo {
                normal,
                penetration: depth,
                point_a: v + normal * depth,
                point_b: v,
            });
        }
    }
    for v in box_vertices(half_a, pose_a) {
        if point_in_box(v, half_b, pose_b, CONTACT_MARGIN) {
            let depth = v.dot(normal) - plane_b;
            contacts.push(ContactInfo {
                normal,
                penetration: depth,
                point_a: v,
                point_b: v - normal * depth,
            });
        }
    }

    if contacts.is_empty() {
        let center = pose_a.position
            + normal * (projected_radius(normal, &axes_a, &half_a_arr) - min_overlap * 0.5);
        contacts.push(ContactInfo {
            normal,
            penetration: min_overlap,
            point_a: center + normal * (min_overlap * 0.5),
            point_b: center - normal * (min_overlap * 0.5),
        });
    }

    if contacts.len() > MAX_BOX_CONTACTS {
        contacts.sort_by(|a, b| b.penetration.total_cmp(&a.penetration));
        contacts.truncate(MAX_BOX_CONTACTS);
    }
    contacts
}

fn projected_radius(axis: Vec3, axes: &[Vec3; 3], half: &[f32; 3]) -> f32 {
    let mut r = 0.0f32;
    for i in 0..3 {
        r += half[i] * axes[i].dot(axis).abs();
    }
    r
}

/// Signed overlap of both boxes projected on `axis`. Negative when separated.
fn sat_overlap(
    axis: Vec3,
    axes_a: &[Vec3; 3],
    half_a: &[f32; 3],
    axes_b: &[Vec3; 3],
    half_b: &[f32; 3],
    t: Vec3,
) -> f32 {
    let proj_a = projected_radius(axis, axes_a, half_a);
    let proj_b = projected_radius(axis, axes_b, half_b);
    proj_a + proj_b - t.dot(axis).abs()
}

fn box_vertices(half: Vec3, pose: &Pose) -> [Vec3; 8] {
    let mut out = [Vec3::ZERO; 8];
    for (i, v) in out.iter_mut().enumerate() {
        let local = Vec3::new(
            if i & 1 == 0 { -half.x } else { half.x },
            if i & 2 == 0 { -half.y } else { half.y },
            if i & 4 == 0 { -half.z } else { half.z },
        );
        *v = pose.transform_point(local);
    }
    out
}

fn point_in_box(point: Vec3, half: Vec3, pose: &Pose, margin: f32) -> bool {
    let local = pose.inverse_transform_point(point).abs();
    local.cmple(half + Vec3::splat(margin)).all()
}

/// Detect contacts between two shapes, dispatching to specialized tests where possible.
pub fn detect_collision(
    shape_a: &ColliderShape,
    pose_a: &Pose,
    shape_b: &ColliderShape,
    pose_b: &Pose,
) -> Vec<ContactInfo> {
    match (shape_a, shape_b) {
        (ColliderShape::Sphere { radius: ra }, ColliderShape::Sphere { radius: rb }) => {
            sphere_sphere(*ra, pose_a, *rb, pose_b).into_iter().collect()
        }
        (ColliderShape::Box { half_extents }, ColliderShape::Sphere { radius }) => {
            box_sphere(*half_extents, pose_a, *radius, pose_b)
                .into_iter()
                .collect()
        }
        (ColliderShape::Sphere { radius }, ColliderShape::Box { half_extents }) => {
            box_sphere(*half_extents, pose_b, *radius, pose_a)
                .map(flip)
                .into_iter()
                .collect()
        }
        (
            ColliderShape::Box {
                half_extents: half_a,
            },
            ColliderShape::Box {
                half_extents: half_b,
            },
        ) => sat_box_box(*half_a, pose_a, *half_b, pose_b),
        _ => {
            // General GJK + EPA
            gjk_intersection(shape_a, pose_a, shape_b, pose_b)
                .and_then(|simplex| epa_penetration(&simplex, shape_a, pose_a, shape_b, pose_b))
                .into_iter()
                .collect()
        }
    }
}

/// Swap the roles of A and B in a contact.
fn flip(info: ContactInfo) -> ContactInfo {
    ContactInfo {
        normal: -info.normal,
        penetration: info.penetration,
        point_a: info.point_b,
        point_b: info.point_a,
    }
}
