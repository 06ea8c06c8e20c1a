//! The generated mesh and tools for inspecting it.

use itertools::Itertools;
use nalgebra as na;
use nalgebra_sparse as nas;
use ndarray::Array2;

use crate::domain::BoundingBox;
use crate::error::GeometryError;
use crate::geometry;

/// A triangle (2D) or tetrahedron (3D) mesh.
///
/// Cells are stored as a flat list of vertex indices, `DIM + 1` per cell.
#[derive(Clone, Debug, PartialEq)]
pub struct Mesh<const DIM: usize> {
    points: Vec<na::SVector<f64, DIM>>,
    /// indices stored in a flat Vec to avoid generics for simplex size
    cells: Vec<usize>,
}

/// Summary of element quality.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct QualityStats {
    /// Smallest dihedral angle over all cells, in degrees.
    pub min_dihedral: f64,
    /// Largest dihedral angle over all cells, in degrees.
    pub max_dihedral: f64,
    /// Cells with an angle outside the requested bounds.
    pub violations: usize,
    /// Smallest normalized radius ratio.
    pub min_radius_ratio: f64,
    /// Mean normalized radius ratio.
    pub mean_radius_ratio: f64,
}

impl<const DIM: usize> Mesh<DIM> {
    /// Construct a mesh from raw points and cell indices.
    ///
    /// # Errors
    /// Fails if the index list is not a whole number of cells
    /// or refers to a point that does not exist.
    pub fn new(
        points: Vec<na::SVector<f64, DIM>>,
        cells: Vec<usize>,
    ) -> Result<Self, GeometryError> {
        if cells.len() % (DIM + 1) != 0 {
            return Err(GeometryError::IncompleteCell {
                len: cells.len(),
                simplex_size: DIM + 1,
            });
        }
        if let Some(&index) = cells.iter().find(|&&i| i >= points.len()) {
            return Err(GeometryError::IndexOutOfRange {
                index,
                len: points.len(),
            });
        }
        Ok(Self { points, cells })
    }

    /// Build the final mesh from a raw triangulation:
    /// drop cells whose centroid lies more than `geps` outside `domain`
    /// and cells with (near) zero volume,
    /// orient every cell positively,
    /// then remove points no cell refers to and renumber the rest.
    pub fn from_triangulation(
        points: Vec<na::SVector<f64, DIM>>,
        cells: &[usize],
        domain: &BoundingBox<DIM>,
        geps: f64,
    ) -> Self {
        let mut kept: Vec<usize> = Vec::with_capacity(cells.len());
        let mut dropped_outside = 0;
        let mut dropped_flat = 0;
        for cell in cells.chunks_exact(DIM + 1) {
            let verts: Vec<_> = cell.iter().map(|i| points[*i]).collect();
            if domain.signed_distance(&geometry::centroid(&verts)) > geps {
                dropped_outside += 1;
                continue;
            }
            let scale = longest_edge(&verts);
            let orient = geometry::orientation(&verts);
            if orient.abs() <= 1e-12 * scale.powi(DIM as i32) {
                dropped_flat += 1;
                continue;
            }
            let start = kept.len();
            kept.extend_from_slice(cell);
            if orient < 0.0 {
                kept.swap(start, start + 1);
            }
        }
        if dropped_outside + dropped_flat > 0 {
            tracing::debug!(dropped_outside, dropped_flat, "cells removed in cleanup");
        }

        let mut mesh = Self {
            points,
            cells: kept,
        };
        mesh.remove_orphans();
        mesh
    }

    /// Remove points not referenced by any cell, renumbering the cells.
    /// Returns the number of points removed.
    pub fn remove_orphans(&mut self) -> usize {
        let mut new_index = vec![usize::MAX; self.points.len()];
        for &i in &self.cells {
            new_index[i] = 0;
        }
        let mut next = 0;
        let mut points = Vec::with_capacity(self.points.len());
        for (old, slot) in new_index.iter_mut().enumerate() {
            if *slot == 0 {
                *slot = next;
                next += 1;
                points.push(self.points[old]);
            }
        }
        let removed = self.points.len() - points.len();
        for i in &mut self.cells {
            *i = new_index[*i];
        }
        self.points = points;
        if removed > 0 {
            tracing::debug!(removed, "orphan points removed");
        }
        removed
    }

    /// Point coordinates.
    #[inline]
    pub fn points(&self) -> &[na::SVector<f64, DIM>] {
        &self.points
    }

    /// Cell vertex indices, `DIM + 1` per cell.
    #[inline]
    pub fn cells(&self) -> &[usize] {
        &self.cells
    }

    /// Number of points.
    #[inline]
    pub fn num_points(&self) -> usize {
        self.points.len()
    }

    /// Number of cells.
    #[inline]
    pub fn num_cells(&self) -> usize {
        self.cells.len() / (DIM + 1)
    }

    /// Iterate over the vertex indices of each cell.
    pub fn cell_iter(&self) -> std::slice::ChunksExact<'_, usize> {
        self.cells.chunks_exact(DIM + 1)
    }

    /// Vertex positions of a cell.
    pub fn cell_points(&self, cell: usize) -> Vec<na::SVector<f64, DIM>> {
        self.cells[cell * (DIM + 1)..(cell + 1) * (DIM + 1)]
            .iter()
            .map(|i| self.points[*i])
            .collect()
    }

    /// Split into points and cells.
    pub fn into_parts(self) -> (Vec<na::SVector<f64, DIM>>, Vec<usize>) {
        (self.points, self.cells)
    }

    /// Unique edges as sorted vertex pairs, in lexicographic order.
    pub fn edges(&self) -> Vec<[usize; 2]> {
        edges_of::<DIM>(&self.cells)
    }

    /// Signed volume (area in 2D) of each cell.
    pub fn volumes(&self) -> Vec<f64> {
        (0..self.num_cells())
            .map(|c| geometry::signed_volume(&self.cell_points(c)))
            .collect()
    }

    /// Sum of the cell volumes.
    pub fn total_volume(&self) -> f64 {
        self.volumes().iter().sum()
    }

    /// Point coordinates as an `N x DIM` array.
    pub fn points_array(&self) -> Array2<f64> {
        Array2::from_shape_fn((self.points.len(), DIM), |(i, axis)| self.points[i][axis])
    }

    /// Cell indices as an `M x (DIM + 1)` array.
    pub fn cells_array(&self) -> Array2<usize> {
        Array2::from_shape_fn((self.num_cells(), DIM + 1), |(c, k)| {
            self.cells[c * (DIM + 1) + k]
        })
    }

    /// Check that every cell has positive volume and every point is used.
    pub fn validate(&self) -> Result<(), MeshDefect> {
        let mut used = vec![false; self.points.len()];
        for (cell, indices) in self.cell_iter().enumerate() {
            let verts: Vec<_> = indices.iter().map(|i| self.points[*i]).collect();
            if geometry::orientation(&verts) <= 0.0 {
                return Err(MeshDefect::NonPositiveVolume(cell));
            }
            for &i in indices {
                used[i] = true;
            }
        }
        match used.iter().position(|u| !u) {
            Some(point) => Err(MeshDefect::OrphanPoint(point)),
            None => Ok(()),
        }
    }

    /// Dihedral angle statistics.
    /// A cell counts as a violation if any of its angles lies outside `[min_angle, max_angle]`.
    pub fn quality(&self, min_angle: f64, max_angle: f64) -> QualityStats {
        let mut stats = QualityStats {
            min_dihedral: f64::INFINITY,
            max_dihedral: f64::NEG_INFINITY,
            violations: 0,
            min_radius_ratio: f64::INFINITY,
            mean_radius_ratio: 0.0,
        };
        for c in 0..self.num_cells() {
            let verts = self.cell_points(c);
            let (lo, hi) = geometry::dihedral_range(&verts);
            stats.min_dihedral = stats.min_dihedral.min(lo);
            stats.max_dihedral = stats.max_dihedral.max(hi);
            if lo < min_angle || hi > max_angle {
                stats.violations += 1;
            }
            let q = geometry::radius_ratio(&verts);
            stats.min_radius_ratio = stats.min_radius_ratio.min(q);
            stats.mean_radius_ratio += q;
        }
        if self.num_cells() > 0 {
            stats.mean_radius_ratio /= self.num_cells() as f64;
        }
        stats
    }
}

/// A structural problem found by [`Mesh::validate`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum MeshDefect {
    /// The cell is inverted or has no volume.
    #[error("cell {0} has non-positive volume")]
    NonPositiveVolume(usize),
    /// The point is not a vertex of any cell.
    #[error("point {0} is not used by any cell")]
    OrphanPoint(usize),
}

/// Unique edges of a flat cell list as sorted vertex pairs, in lexicographic order.
pub(crate) fn edges_of<const DIM: usize>(cells: &[usize]) -> Vec<[usize; 2]> {
    let mut edges = Vec::with_capacity(cells.len() * DIM);
    for cell in cells.chunks_exact(DIM + 1) {
        // every pair of vertices in a simplex is an edge
        for (a, b) in cell.iter().copied().tuple_combinations() {
            edges.push(if a < b { [a, b] } else { [b, a] });
        }
    }
    // sort to deduplicate edges shared by several cells
    edges.sort_unstable();
    edges.dedup();
    edges
}

/// Edge-vertex incidence map as a sparse matrix,
/// with a row per edge holding -1 at the lower vertex and 1 at the higher one.
pub(crate) fn incidence_map(num_points: usize, edges: &[[usize; 2]]) -> nas::CsrMatrix<f64> {
    let mut coo = nas::CooMatrix::new(edges.len(), num_points);
    for (edge_idx, [a, b]) in edges.iter().enumerate() {
        coo.push(edge_idx, *a, -1.0);
        coo.push(edge_idx, *b, 1.0);
    }
    nas::CsrMatrix::from(&coo)
}

fn longest_edge<const DIM: usize>(verts: &[na::SVector<f64, DIM>]) -> f64 {
    verts
        .iter()
        .tuple_combinations()
        .map(|(a, b)| (a - b).norm())
        .fold(0.0, f64::max)
}

//
// tests
//
