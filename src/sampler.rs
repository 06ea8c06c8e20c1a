//! Initial point distribution for the relaxation.
//!
//! Candidates are laid out on a lattice with spacing `hmin` covering the domain
//! (rows shifted by half a spacing in 2D, a cartesian grid in 3D)
//! and kept with probability `(h_lo / h(p))^DIM`,
//! where `h_lo` is the smallest size found on the lattice.
//! Density therefore follows `1 / h^DIM` and every lattice point at a size minimum is kept.

use nalgebra as na;
use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::domain::BoundingBox;
use crate::sizing::SizingField;

/// Seeded rejection sampler over a sizing field.
#[derive(Clone, Copy, Debug)]
pub struct PointSampler<'a, const DIM: usize> {
    sizing: &'a SizingField<DIM>,
    seed: u64,
}

impl<'a, const DIM: usize> PointSampler<'a, DIM> {
    /// Create a sampler. The same seed always gives the same point set.
    pub fn new(sizing: &'a SizingField<DIM>, seed: u64) -> Self {
        Self { sizing, seed }
    }

    /// Sample the domain.
    ///
    /// The returned set starts with `fixed` in the given order,
    /// followed by the sampled points.
    /// Samples closer than `1e-3 * hmin` to a fixed point are dropped.
    pub fn sample(&self, fixed: &[na::SVector<f64, DIM>]) -> Vec<na::SVector<f64, DIM>> {
        let h0 = self.sizing.hmin();
        let domain = self.sizing.domain();

        let mut h_lo = f64::INFINITY;
        let mut candidates = 0usize;
        for_each_lattice_point(domain, h0, |p| {
            h_lo = h_lo.min(self.sizing.at(&p));
            candidates += 1;
        });

        let merge_tol2 = (1e-3 * h0).powi(2);
        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut points = fixed.to_vec();
        for_each_lattice_point(domain, h0, |p| {
            // one draw per candidate keeps the stream aligned with the lattice
            let keep_prob = (h_lo / self.sizing.at(&p)).powi(DIM as i32);
            let draw: f64 = rng.gen();
            if draw >= keep_prob {
                return;
            }
            if fixed.iter().any(|f| (f - p).norm_squared() < merge_tol2) {
                return;
            }
            points.push(p);
        });

        tracing::debug!(
            candidates,
            kept = points.len() - fixed.len(),
            fixed = fixed.len(),
            "initial points sampled"
        );
        points
    }
}

/// Visit the lattice points of spacing `h0` inside `domain`.
fn for_each_lattice_point<const DIM: usize>(
    domain: &BoundingBox<DIM>,
    h0: f64,
    mut visit: impl FnMut(na::SVector<f64, DIM>),
) {
    // equilateral rows in 2D
    let steps: [f64; DIM] = std::array::from_fn(|axis| {
        if DIM == 2 && axis == 0 {
            h0 * 3f64.sqrt() / 2.0
        } else {
            h0
        }
    });
    let extent = domain.extent();
    let counts: [usize; DIM] =
        std::array::from_fn(|axis| (extent[axis] / steps[axis] + 1e-9).floor() as usize + 1);

    let mut idx = [0usize; DIM];
    'lattice: loop {
        let shift = if DIM == 2 && idx[0] % 2 == 1 {
            0.5 * h0
        } else {
            0.0
        };
        let p = na::SVector::from_fn(|axis, _| {
            let offset = if axis == 1 { shift } else { 0.0 };
            domain.min[axis] + idx[axis] as f64 * steps[axis] + offset
        });
        if domain.contains(&p, 0.0) {
            visit(p);
        }

        for axis in (0..DIM).rev() {
            idx[axis] += 1;
            if idx[axis] < counts[axis] {
                continue 'lattice;
            }
            idx[axis] = 0;
        }
        break;
    }
}
