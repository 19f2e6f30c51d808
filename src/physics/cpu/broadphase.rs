//! Broadphase collision detection using a spatial hash grid.

use std::collections::{HashMap, HashSet};

use glam::Vec3;

use crate::physics::backend::BodyHandle;

use super::collider::PhysicsAabb;

type CellKey = (i32, i32, i32);

/// One body as seen by the broadphase.
#[derive(Debug, Clone, Copy)]
pub struct BroadphaseEntry {
    pub body: BodyHandle,
    pub aabb: PhysicsAabb,
    /// Static bodies never pair with each other.
    pub is_static: bool,
}

/// Spatial hash grid broadphase for O(n) average-case pair detection.
pub struct SpatialHashGrid {
    cell_size: f32,
    cells: HashMap<CellKey, Vec<usize>>,
}

impl Default for SpatialHashGrid {
    fn default() -> Self {
        Self::new()
    }
}

impl SpatialHashGrid {
    pub fn new() -> Self {
        Self {
            cell_size: 2.0,
            cells: HashMap::new(),
        }
    }

    /// Compute cell coordinates for a point.
    #[inline]
    fn cell_coords(&self, point: Vec3) -> CellKey {
        let inv = 1.0 / self.cell_size;
        (
            (point.x * inv).floor() as i32,
            (point.y * inv).floor() as i32,
            (point.z * inv).floor() as i32,
        )
    }

    /// Find all pairs of bodies whose AABBs overlap, in a deterministic order.
    ///
    /// Static–static pairs are skipped. Each pair is ordered `(lower, higher)` handle.
    pub fn find_pairs(&mut self, entries: &[BroadphaseEntry]) -> Vec<(BodyHandle, BodyHandle)> {
        self.cells.clear();
        if entries.len() < 2 {
            return Vec::new();
        }

        // Cell size follows the typical body size. Huge static floors would
        // otherwise blow the grid up, so dynamic bodies drive the estimate.
        let mut max_extent: f32 = 0.0;
        for entry in entries.iter().filter(|e| !e.is_static) {
            max_extent = max_extent.max((entry.aabb.max - entry.aabb.min).max_element());
        }
        self.cell_size = (max_extent * 2.0).max(1.0);

        let mut oversized = Vec::new();
        for (index, entry) in entries.iter().enumerate() {
            let min_cell = self.cell_coords(entry.aabb.min);
            let max_cell = self.cell_coords(entry.aabb.max);
            let span = (max_cell.0 - min_cell.0 + 1) as i64
                * (max_cell.1 - min_cell.1 + 1) as i64
                * (max_cell.2 - min_cell.2 + 1) as i64;
            if span > 64 {
                oversized.push(index);
                continue;
            }

            for cx in min_cell.0..=max_cell.0 {
                for cy in min_cell.1..=max_cell.1 {
                    for cz in min_cell.2..=max_cell.2 {
                        self.cells.entry((cx, cy, cz)).or_default().push(index);
                    }
                }
            }
        }

        let mut seen = HashSet::new();
        let mut pairs = Vec::with_capacity(entries.len() * 4);
        let mut consider = |i: usize, j: usize| {
            let (a, b) = (&entries[i], &entries[j]);
            if a.is_static && b.is_static {
                return;
            }
            // Canonical ordering to avoid duplicates
            let pair = if a.body < b.body {
                (a.body, b.body)
            } else {
                (b.body, a.body)
            };
            if a.aabb.overlaps(&b.aabb) && seen.insert(pair) {
                pairs.push(pair);
            }
        };

        for cell in self.cells.values() {
            for i in 0..cell.len() {
                for j in (i + 1)..cell.len() {
                    consider(cell[i], cell[j]);
                }
            }
        }

        // Bodies spanning many cells are tested against everything.
        for &i in &oversized {
            for j in 0..entries.len() {
                if i != j {
                    consider(i, j);
                }
            }
        }

        pairs.sort_unstable();
        pairs
    }
}
