//! Incremental Delaunay triangulation (Bowyer-Watson) in two and three dimensions.
//!
//! Points are inserted one at a time into a triangulation of a large enclosing simplex.
//! Each insertion removes the cavity of cells whose circumsphere contains the new point
//! and fills it with a fan of cells connected to that point.
//! Cells touching the enclosing simplex are dropped at the end.

use fixedbitset::FixedBitSet;
use nalgebra as na;
use std::collections::HashMap;

use crate::error::GeometryError;
use crate::geometry;

/// Marker for a missing neighbor across a facet.
const NONE: usize = usize::MAX;

/// Distance below which two points count as coincident, relative to the point cloud size.
const COINCIDENCE_TOL: f64 = 1e-10;

/// How far outside the bounding box the enclosing simplex is placed,
/// in multiples of the point cloud size.
const ENCLOSING_SCALE: f64 = 1000.0;

/// Triangulate a point set, returning the cells as a flat array of vertex indices,
/// `DIM + 1` per cell, every cell positively oriented.
///
/// # Errors
/// - [`GeometryError::TooFewPoints`] with fewer than `DIM + 1` points,
/// - [`GeometryError::NonFinite`] if a coordinate is NaN or infinite,
/// - [`GeometryError::CoincidentPoints`] if two points are closer than the tolerance,
/// - [`GeometryError::Degenerate`] if all points lie in a hyperplane.
pub fn triangulate<const DIM: usize>(
    points: &[na::SVector<f64, DIM>],
) -> Result<Vec<usize>, GeometryError> {
    let mut tri = Triangulation::new(points)?;
    for &idx in &insertion_order(points) {
        tri.insert(idx)?;
    }
    let cells = tri.into_cells();
    if cells.is_empty() {
        return Err(GeometryError::Degenerate);
    }
    Ok(cells)
}

/// Morton order of the points on a coarse grid,
/// so that consecutive insertions are spatially close.
fn insertion_order<const DIM: usize>(points: &[na::SVector<f64, DIM>]) -> Vec<usize> {
    let (lo, hi) = bounds(points);
    let bits = 30 / DIM;
    let cells = ((1u64 << bits) - 1) as f64;
    let key = |p: &na::SVector<f64, DIM>| -> u64 {
        let q: [u64; DIM] = std::array::from_fn(|axis| {
            let extent = hi[axis] - lo[axis];
            if extent > 0.0 {
                ((p[axis] - lo[axis]) / extent * cells) as u64
            } else {
                0
            }
        });
        let mut code = 0u64;
        for bit in (0..bits).rev() {
            for q in &q {
                code = (code << 1) | ((q >> bit) & 1);
            }
        }
        code
    };
    let mut order: Vec<usize> = (0..points.len()).collect();
    order.sort_by_key(|&i| key(&points[i]));
    order
}

fn bounds<const DIM: usize>(
    points: &[na::SVector<f64, DIM>],
) -> (na::SVector<f64, DIM>, na::SVector<f64, DIM>) {
    points.iter().fold(
        (
            na::SVector::repeat(f64::INFINITY),
            na::SVector::repeat(f64::NEG_INFINITY),
        ),
        |(lo, hi), p| (lo.inf(p), hi.sup(p)),
    )
}

/// Whether the points are not all contained in one hyperplane,
/// judged by the determinant of their covariance matrix.
fn spans_full_dimension<const DIM: usize>(points: &[na::SVector<f64, DIM>], size: f64) -> bool {
    let n = points.len() as f64;
    let mean = points.iter().sum::<na::SVector<f64, DIM>>() / n;
    let mut cov = [[0.0; DIM]; DIM];
    for p in points {
        let d = p - mean;
        for (row, cov_row) in cov.iter_mut().enumerate() {
            for (col, c) in cov_row.iter_mut().enumerate() {
                *c += d[row] * d[col] / n;
            }
        }
    }
    geometry::det::<DIM>(cov).abs() > 1e-14 * size.powi(2 * DIM as i32)
}

/// Facet key: sorted vertex indices of the facet with the new point left out,
/// padded with `NONE`. Supports up to four remaining vertices.
type FacetKey = [usize; 4];

struct Triangulation<'a, const DIM: usize> {
    input: &'a [na::SVector<f64, DIM>],
    /// Vertices of the enclosing simplex, addressed as `input.len() + k`.
    enclosing: Vec<na::SVector<f64, DIM>>,
    /// `DIM + 1` vertex indices per cell slot.
    cells: Vec<usize>,
    /// Neighbor across the facet opposite each vertex.
    neighbors: Vec<usize>,
    /// Cached circumsphere center and squared radius per cell slot.
    spheres: Vec<(na::SVector<f64, DIM>, f64)>,
    alive: FixedBitSet,
    free: Vec<usize>,
    /// Cell to start the next point location from.
    hint: usize,
    coincidence_tol2: f64,
    // scratch buffers reused across insertions
    in_cavity: FixedBitSet,
    cavity: Vec<usize>,
    boundary: Vec<(usize, usize)>,
}

impl<'a, const DIM: usize> Triangulation<'a, DIM> {
    fn new(input: &'a [na::SVector<f64, DIM>]) -> Result<Self, GeometryError> {
        if input.len() < DIM + 1 {
            return Err(GeometryError::TooFewPoints {
                count: input.len(),
                required: DIM + 1,
            });
        }
        if let Some(bad) = input.iter().position(|p| p.iter().any(|c| !c.is_finite())) {
            return Err(GeometryError::NonFinite(bad));
        }

        let (lo, hi) = bounds(input);
        let size = (hi - lo).max();
        if size <= 0.0 || !spans_full_dimension(input, size) {
            return Err(GeometryError::Degenerate);
        }
        // corner simplex {v0, v0 + L e_i} containing the bounding cube with a wide margin
        let margin = ENCLOSING_SCALE * size;
        let v0 = lo - na::SVector::repeat(margin);
        let side = DIM as f64 * (size + 2.0 * margin) + margin;
        let mut enclosing = vec![v0];
        for axis in 0..DIM {
            let mut v = v0;
            v[axis] += side;
            enclosing.push(v);
        }

        let mut tri = Self {
            input,
            enclosing,
            cells: Vec::new(),
            neighbors: Vec::new(),
            spheres: Vec::new(),
            alive: FixedBitSet::new(),
            free: Vec::new(),
            hint: 0,
            coincidence_tol2: (COINCIDENCE_TOL * size).powi(2),
            in_cavity: FixedBitSet::new(),
            cavity: Vec::new(),
            boundary: Vec::new(),
        };
        let first: Vec<usize> = (0..=DIM).map(|k| input.len() + k).collect();
        let mut verts = first.clone();
        if geometry::orientation(&tri.positions(&first)) < 0.0 {
            verts.swap(0, 1);
        }
        let cell = tri.alloc_cell(&verts).ok_or(GeometryError::Degenerate)?;
        tri.hint = cell;
        Ok(tri)
    }

    #[inline]
    fn point(&self, idx: usize) -> na::SVector<f64, DIM> {
        if idx < self.input.len() {
            self.input[idx]
        } else {
            self.enclosing[idx - self.input.len()]
        }
    }

    fn positions(&self, verts: &[usize]) -> Vec<na::SVector<f64, DIM>> {
        verts.iter().map(|v| self.point(*v)).collect()
    }

    #[inline]
    fn cell(&self, c: usize) -> &[usize] {
        &self.cells[c * (DIM + 1)..(c + 1) * (DIM + 1)]
    }

    #[inline]
    fn neighbor(&self, c: usize, facet: usize) -> usize {
        self.neighbors[c * (DIM + 1) + facet]
    }

    #[inline]
    fn set_neighbor(&mut self, c: usize, facet: usize, n: usize) {
        self.neighbors[c * (DIM + 1) + facet] = n;
    }

    /// Store a new cell, reusing a free slot if there is one.
    /// Returns `None` if the cell is degenerate.
    fn alloc_cell(&mut self, verts: &[usize]) -> Option<usize> {
        let sphere = geometry::circumsphere(&self.positions(verts))?;
        let slot = match self.free.pop() {
            Some(slot) => {
                self.cells[slot * (DIM + 1)..(slot + 1) * (DIM + 1)].copy_from_slice(verts);
                self.neighbors[slot * (DIM + 1)..(slot + 1) * (DIM + 1)].fill(NONE);
                self.spheres[slot] = sphere;
                slot
            }
            None => {
                let slot = self.spheres.len();
                self.cells.extend_from_slice(verts);
                self.neighbors.extend(std::iter::repeat(NONE).take(DIM + 1));
                self.spheres.push(sphere);
                self.alive.grow(slot + 1);
                self.in_cavity.grow(slot + 1);
                slot
            }
        };
        self.alive.insert(slot);
        Some(slot)
    }

    /// Orientation of cell `c` with the vertex opposite `facet` replaced by `p`.
    fn facet_orientation(&self, c: usize, facet: usize, p: &na::SVector<f64, DIM>) -> f64 {
        let cell = self.cell(c);
        let pos = |k: usize| if k == facet { *p } else { self.point(cell[k]) };
        let base = pos(0);
        geometry::det::<DIM>(std::array::from_fn(|row| {
            let v = pos(row + 1);
            std::array::from_fn(|col| v[col] - base[col])
        }))
    }

    #[inline]
    fn in_sphere(&self, c: usize, p: &na::SVector<f64, DIM>) -> bool {
        let (center, r2) = &self.spheres[c];
        (p - center).norm_squared() < r2 * (1.0 - 1e-12)
    }

    /// Find a cell containing `p` by walking from the hint cell
    /// towards `p` across facets that separate them.
    fn locate(&self, p: &na::SVector<f64, DIM>) -> Option<usize> {
        let mut c = self.hint;
        let max_steps = self.spheres.len() + 16;
        'walk: for step in 0..max_steps {
            // rotating the starting facet keeps degenerate walks from cycling
            for k in 0..=DIM {
                let facet = (k + step) % (DIM + 1);
                if self.facet_orientation(c, facet, p) < 0.0 {
                    let next = self.neighbor(c, facet);
                    if next == NONE {
                        return None;
                    }
                    c = next;
                    continue 'walk;
                }
            }
            return Some(c);
        }
        // fall back to a scan; any cell whose circumsphere contains the point will do
        self.alive.ones().find(|&c| self.in_sphere(c, p))
    }

    fn insert(&mut self, idx: usize) -> Result<(), GeometryError> {
        let p = self.input[idx];
        let start = self
            .locate(&p)
            .ok_or(GeometryError::InsertionFailed(idx))?;

        self.cavity.clear();
        self.cavity.push(start);
        self.in_cavity.insert(start);
        let result = self.grow_cavity(idx, &p).and_then(|()| self.fill_cavity(idx));
        for &c in &self.cavity {
            self.in_cavity.set(c, false);
        }
        result
    }

    /// Collect the cavity of `p` and its boundary facets.
    fn grow_cavity(&mut self, idx: usize, p: &na::SVector<f64, DIM>) -> Result<(), GeometryError> {
        // breadth first over cells whose circumsphere contains the point
        let mut head = 0;
        while head < self.cavity.len() {
            let c = self.cavity[head];
            head += 1;
            for facet in 0..=DIM {
                let n = self.neighbor(c, facet);
                if n != NONE && !self.in_cavity.contains(n) && self.in_sphere(n, p) {
                    self.in_cavity.insert(n);
                    self.cavity.push(n);
                }
            }
        }

        for &c in &self.cavity {
            for &v in self.cell(c) {
                if v < self.input.len() && (self.input[v] - p).norm_squared() <= self.coincidence_tol2 {
                    return Err(GeometryError::CoincidentPoints {
                        first: v.min(idx),
                        second: v.max(idx),
                    });
                }
            }
        }

        // the cavity must be star-shaped from the new point;
        // facets that are not strictly visible pull their outer neighbor in
        let max_rounds = self.spheres.len() + 1;
        for _ in 0..max_rounds {
            self.boundary.clear();
            let mut grown = false;
            for i in 0..self.cavity.len() {
                let c = self.cavity[i];
                for facet in 0..=DIM {
                    let n = self.neighbor(c, facet);
                    if n != NONE && self.in_cavity.contains(n) {
                        continue;
                    }
                    if self.facet_visible(c, facet, p) {
                        self.boundary.push((c, facet));
                    } else if n == NONE {
                        return Err(GeometryError::InsertionFailed(idx));
                    } else {
                        self.in_cavity.insert(n);
                        self.cavity.push(n);
                        grown = true;
                    }
                }
            }
            if !grown {
                return Ok(());
            }
        }
        Err(GeometryError::InsertionFailed(idx))
    }

    /// Whether replacing the vertex opposite `facet` with `p` gives a properly oriented cell.
    fn facet_visible(&self, c: usize, facet: usize, p: &na::SVector<f64, DIM>) -> bool {
        let verts = self.cell(c);
        let scale = verts
            .iter()
            .enumerate()
            .filter(|(k, _)| *k != facet)
            .map(|(_, v)| (self.point(*v) - p).norm())
            .fold(0.0, f64::max);
        self.facet_orientation(c, facet, p) > 1e-12 * scale.powi(DIM as i32)
    }

    /// Replace the cavity with cells connecting its boundary facets to the new point.
    fn fill_cavity(&mut self, idx: usize) -> Result<(), GeometryError> {
        let boundary = std::mem::take(&mut self.boundary);
        // (cell, facet) of the new cells' facets that contain the new point,
        // waiting for their twin
        let mut open: HashMap<FacetKey, (usize, usize)> = HashMap::with_capacity(boundary.len() * DIM);
        let mut created = Vec::with_capacity(boundary.len());

        let mut result = Ok(());
        for &(c, facet) in &boundary {
            let outer = self.neighbor(c, facet);
            let mut verts: Vec<usize> = self.cell(c).to_vec();
            verts[facet] = idx;
            let Some(new) = self.alloc_cell(&verts) else {
                result = Err(GeometryError::InsertionFailed(idx));
                break;
            };
            created.push(new);

            self.set_neighbor(new, facet, outer);
            if outer != NONE {
                let back = (0..=DIM).find(|&k| self.neighbor(outer, k) == c);
                if let Some(k) = back {
                    self.set_neighbor(outer, k, new);
                }
            }

            for k in (0..=DIM).filter(|&k| k != facet) {
                let mut key = [NONE; 4];
                let mut len = 0;
                for (j, &v) in verts.iter().enumerate() {
                    if j != k && j != facet {
                        key[len] = v;
                        len += 1;
                    }
                }
                key[..len].sort_unstable();
                match open.remove(&key) {
                    Some((twin, twin_facet)) => {
                        self.set_neighbor(new, k, twin);
                        self.set_neighbor(twin, twin_facet, new);
                    }
                    None => {
                        open.insert(key, (new, k));
                    }
                }
            }
        }

        if let Err(e) = result {
            // roll back: the old cavity cells are still intact
            for &new in &created {
                self.alive.set(new, false);
                self.free.push(new);
            }
            for &(c, facet) in &boundary {
                let outer = self.neighbor(c, facet);
                if outer != NONE {
                    if let Some(k) = (0..=DIM).find(|&k| created.contains(&self.neighbor(outer, k))) {
                        self.set_neighbor(outer, k, c);
                    }
                }
            }
            self.boundary = boundary;
            return Err(e);
        }

        for &c in &self.cavity {
            self.alive.set(c, false);
            self.free.push(c);
        }
        if let Some(&last) = created.last() {
            self.hint = last;
        }
        self.boundary = boundary;
        Ok(())
    }

    /// Cells not touching the enclosing simplex, compacted into a flat index list.
    fn into_cells(self) -> Vec<usize> {
        let n = self.input.len();
        let mut out = Vec::new();
        for c in self.alive.ones() {
            let cell = self.cell(c);
            if cell.iter().all(|v| *v < n) {
                out.extend_from_slice(cell);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use itertools::Itertools;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    type Vec2 = na::Vector2<f64>;
    type Vec3 = na::Vector3<f64>;

    fn total_volume<const DIM: usize>(points: &[na::SVector<f64, DIM>], cells: &[usize]) -> f64 {
        cells
            .chunks_exact(DIM + 1)
            .map(|c| {
                let verts: Vec<_> = c.iter().map(|i| points[*i]).collect();
                geometry::signed_volume(&verts)
            })
            .sum()
    }

    /// Check the empty circumsphere property by brute force.
    fn assert_delaunay<const DIM: usize>(points: &[na::SVector<f64, DIM>], cells: &[usize]) {
        for c in cells.chunks_exact(DIM + 1) {
            let verts: Vec<_> = c.iter().map(|i| points[*i]).collect();
            assert!(geometry::orientation(&verts) > 0.0);
            let (center, r2) = geometry::circumsphere(&verts).unwrap();
            for (i, p) in points.iter().enumerate() {
                if c.contains(&i) {
                    continue;
                }
                assert!(
                    (p - center).norm_squared() >= r2 * (1.0 - 1e-9),
                    "point {i} inside circumsphere of {c:?}"
                );
            }
        }
    }

    #[test]
    fn unit_square_gives_two_triangles() {
        let points = vec![
            Vec2::new(0.0, 0.0),
            Vec2::new(1.0, 0.0),
            Vec2::new(1.0, 1.0),
            Vec2::new(0.0, 1.1),
        ];
        let cells = triangulate(&points).unwrap();
        assert_eq!(cells.len(), 6);
        assert_relative_eq!(total_volume(&points, &cells), 1.05, epsilon = 1e-12);
        assert_delaunay(&points, &cells);
    }

    /// Lattice points on the boundary of `[0, 1] x [0, 2]` with spacing 0.1.
    fn boundary_2d() -> Vec<Vec2> {
        let mut points = Vec::new();
        for i in 0..=10 {
            let x = i as f64 * 0.1;
            points.extend([Vec2::new(x, 0.0), Vec2::new(x, 2.0)]);
        }
        for j in 1..20 {
            let y = j as f64 * 0.1;
            points.extend([Vec2::new(0.0, y), Vec2::new(1.0, y)]);
        }
        points
    }

    #[test]
    fn random_points_2d() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut points = boundary_2d();
        // interior points kept away from the boundary lattice
        points.extend(
            (0..300).map(|_| Vec2::new(rng.gen_range(0.05..0.95), rng.gen_range(0.05..1.95))),
        );
        let cells = triangulate(&points).unwrap();
        assert_relative_eq!(total_volume(&points, &cells), 2.0, epsilon = 1e-9);
        assert_delaunay(&points, &cells);
        // every point is used
        let used: std::collections::HashSet<usize> = cells.iter().copied().collect();
        assert_eq!(used.len(), points.len());
    }

    #[test]
    fn random_points_3d() {
        let mut rng = StdRng::seed_from_u64(11);
        // lattice on the surface of the unit cube
        let mut points: Vec<Vec3> = (0..3)
            .map(|_| 0..=4)
            .multi_cartesian_product()
            .filter(|c| c.iter().any(|i| *i == 0 || *i == 4))
            .map(|c| Vec3::new(c[0] as f64, c[1] as f64, c[2] as f64) / 4.0)
            .collect();
        points.extend((0..200).map(|_| {
            Vec3::new(
                rng.gen_range(0.1..0.9),
                rng.gen_range(0.1..0.9),
                rng.gen_range(0.1..0.9),
            )
        }));
        let cells = triangulate(&points).unwrap();
        assert_relative_eq!(total_volume(&points, &cells), 1.0, epsilon = 1e-9);
        assert_delaunay(&points, &cells);
    }

    #[test]
    fn regular_grid_is_handled() {
        // many cocircular quadruples
        let points: Vec<Vec2> = (0..6)
            .cartesian_product(0..5)
            .map(|(i, j)| Vec2::new(i as f64, j as f64))
            .collect();
        let cells = triangulate(&points).unwrap();
        assert_eq!(cells.len() / 3, 2 * 5 * 4);
        assert_relative_eq!(total_volume(&points, &cells), 20.0, epsilon = 1e-9);

        let cube: Vec<Vec3> = (0..3)
            .map(|_| 0..3)
            .multi_cartesian_product()
            .map(|c| Vec3::new(c[0] as f64, c[1] as f64, c[2] as f64))
            .collect();
        let cells = triangulate(&cube).unwrap();
        assert_relative_eq!(total_volume(&cube, &cells), 8.0, epsilon = 1e-9);
    }

    #[test]
    fn coincident_points_are_reported() {
        let points = vec![
            Vec2::new(0.0, 0.0),
            Vec2::new(1.0, 0.0),
            Vec2::new(0.0, 1.0),
            Vec2::new(0.3, 0.3),
            Vec2::new(1.0, 0.0),
        ];
        assert_eq!(
            triangulate(&points),
            Err(GeometryError::CoincidentPoints {
                first: 1,
                second: 4
            })
        );
    }

    #[test]
    fn invalid_inputs() {
        let collinear: Vec<Vec2> = (0..5).map(|i| Vec2::new(i as f64, 2.0 * i as f64)).collect();
        assert_eq!(triangulate(&collinear), Err(GeometryError::Degenerate));

        // a tilted plane through the origin
        let coplanar: Vec<Vec3> = (0..4)
            .cartesian_product(0..4)
            .map(|(i, j)| {
                let (x, y) = (i as f64, j as f64);
                Vec3::new(x, y, 0.5 * x - 2.0 * y)
            })
            .collect();
        assert_eq!(triangulate(&coplanar), Err(GeometryError::Degenerate));

        let few = vec![Vec3::zeros(), Vec3::x(), Vec3::y()];
        assert_eq!(
            triangulate(&few),
            Err(GeometryError::TooFewPoints {
                count: 3,
                required: 4
            })
        );

        let nan = vec![Vec2::zeros(), Vec2::x(), Vec2::new(f64::NAN, 1.0)];
        assert_eq!(triangulate(&nan), Err(GeometryError::NonFinite(2)));
    }
}
