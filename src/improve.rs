//! Post-processing that removes poorly shaped simplices.
//!
//! Each pass nudges the free vertices of every cell with a dihedral angle
//! outside the configured bounds along the gradients of that cell's
//! barycentric coordinates, keeping a move only if it raises the worst angle
//! among the cells around the vertex.
//! The moved point set is then retriangulated.
//! A pass whose result is no better than the current mesh is discarded
//! and the step length halved, so the minimum angle never decreases.

use nalgebra as na;

use crate::config::GeneratorOptions;
use crate::error::{ConvergenceWarning, MeshError};
use crate::generator::finalize_mesh;
use crate::geometry;
use crate::mesh::{Mesh, QualityStats};
use crate::sizing::SizingField;

/// Starting step as a fraction of the local size.
const INITIAL_STEP: f64 = 0.1;
/// Passes stop once the step has shrunk below this fraction.
const MIN_STEP: f64 = 1e-3;

/// Outcome of [`MeshQualityImprover::improve`].
#[derive(Clone, Debug, PartialEq)]
pub struct ImprovementReport {
    /// Passes attempted.
    pub passes: usize,
    /// Quality of the input mesh.
    pub before: QualityStats,
    /// Quality of the returned mesh.
    pub after: QualityStats,
    /// Set when violations remain.
    pub warning: Option<ConvergenceWarning>,
}

/// Dihedral angle repair over a generated mesh.
#[derive(Clone, Copy, Debug)]
pub struct MeshQualityImprover<'a, const DIM: usize> {
    sizing: &'a SizingField<DIM>,
    min_dh_bound: f64,
    max_dh_bound: f64,
    max_passes: usize,
}

impl<'a, const DIM: usize> MeshQualityImprover<'a, DIM> {
    /// Take the angle bounds and pass limit from the generator options.
    pub fn new(sizing: &'a SizingField<DIM>, options: &GeneratorOptions) -> Self {
        Self {
            sizing,
            min_dh_bound: options.min_dh_bound,
            max_dh_bound: options.max_dh_bound,
            max_passes: options.improvement_passes(),
        }
    }

    /// Improve `mesh`. The first `nfix` points are never moved.
    pub fn improve(
        &self,
        mesh: Mesh<DIM>,
        nfix: usize,
    ) -> Result<(Mesh<DIM>, ImprovementReport), MeshError> {
        let _span = tracing::info_span!("mesh_improvement").entered();
        let geps = 1e-3 * self.sizing.hmin();
        let before = mesh.quality(self.min_dh_bound, self.max_dh_bound);
        tracing::info!(
            violations = before.violations,
            min_dihedral = before.min_dihedral,
            "starting mesh improvement"
        );

        let mut current = mesh;
        let mut stats = before;
        let mut step = INITIAL_STEP;
        let mut passes = 0;
        while stats.violations > 0 && passes < self.max_passes && step >= MIN_STEP {
            passes += 1;
            let mut points = current.points().to_vec();
            let moved = self.perturb(&mut points, current.cells(), nfix, step);
            if moved == 0 {
                tracing::debug!(pass = passes, "no improving move found");
                break;
            }
            let (candidate, _) = finalize_mesh(points, nfix, self.sizing, geps)?;
            let candidate_stats = candidate.quality(self.min_dh_bound, self.max_dh_bound);
            if is_better(&candidate_stats, &stats) {
                tracing::debug!(
                    pass = passes,
                    moved,
                    violations = candidate_stats.violations,
                    min_dihedral = candidate_stats.min_dihedral,
                    "improvement pass accepted"
                );
                current = candidate;
                stats = candidate_stats;
            } else {
                step *= 0.5;
                tracing::debug!(pass = passes, step, "improvement pass rejected");
            }
        }

        let warning = (stats.violations > 0).then(|| ConvergenceWarning::ResidualViolations {
            passes,
            remaining: stats.violations,
            min_dihedral: stats.min_dihedral,
        });
        match &warning {
            Some(w) => tracing::warn!(warning = %w),
            None => tracing::info!(passes, "all simplices within dihedral bounds"),
        }

        Ok((
            current,
            ImprovementReport {
                passes,
                before,
                after: stats,
                warning,
            },
        ))
    }

    /// Move vertices of violating cells in place. Returns how many moves were made.
    fn perturb(
        &self,
        points: &mut [na::SVector<f64, DIM>],
        cells: &[usize],
        nfix: usize,
        step: f64,
    ) -> usize {
        let mut cells_of_point = vec![Vec::new(); points.len()];
        for (c, cell) in cells.chunks_exact(DIM + 1).enumerate() {
            for &v in cell {
                cells_of_point[v].push(c);
            }
        }
        let domain = self.sizing.domain();
        let geps = 1e-3 * self.sizing.hmin();

        let mut moved = 0;
        for cell in cells.chunks_exact(DIM + 1) {
            let verts: Vec<_> = cell.iter().map(|i| points[*i]).collect();
            let (lo, hi) = geometry::dihedral_range(&verts);
            if lo >= self.min_dh_bound && hi <= self.max_dh_bound {
                continue;
            }
            let Some(grads) = geometry::barycentric_gradients(&verts) else {
                continue;
            };
            for (local, &v) in cell.iter().enumerate() {
                if v < nfix {
                    continue;
                }
                let g = grads[local];
                let norm = g.norm();
                if norm == 0.0 {
                    continue;
                }
                let origin = points[v];
                let length = step * self.sizing.at(&origin);
                let mut dir = g / norm;
                // points on the boundary slide along it
                for axis in 0..DIM {
                    if origin[axis] - domain.min[axis] < geps || domain.max[axis] - origin[axis] < geps
                    {
                        dir[axis] = 0.0;
                    }
                }
                if dir.norm() == 0.0 {
                    continue;
                }

                let mut best = local_score(points, cells, &cells_of_point[v]);
                let mut best_pos = None;
                for sign in [1.0, -1.0] {
                    let trial = domain.project(&(origin + sign * length * dir));
                    points[v] = trial;
                    let score = local_score(points, cells, &cells_of_point[v]);
                    if score > best {
                        best = score;
                        best_pos = Some(trial);
                    }
                }
                points[v] = best_pos.unwrap_or(origin);
                if best_pos.is_some() {
                    moved += 1;
                }
            }
        }
        moved
    }
}

/// Smallest dihedral angle among `around`, or `-inf` if any of them is inverted.
fn local_score<const DIM: usize>(
    points: &[na::SVector<f64, DIM>],
    cells: &[usize],
    around: &[usize],
) -> f64 {
    let mut score = f64::INFINITY;
    for &c in around {
        let verts: Vec<_> = cells[c * (DIM + 1)..(c + 1) * (DIM + 1)]
            .iter()
            .map(|i| points[*i])
            .collect();
        if geometry::orientation(&verts) <= 0.0 {
            return f64::NEG_INFINITY;
        }
        score = score.min(geometry::dihedral_range(&verts).0);
    }
    score
}

/// Accept a candidate only if it is no worse in both measures and better in one.
fn is_better(candidate: &QualityStats, current: &QualityStats) -> bool {
    let angle_ok = candidate.min_dihedral >= current.min_dihedral;
    let count_ok = candidate.violations <= current.violations;
    angle_ok
        && count_ok
        && (candidate.min_dihedral > current.min_dihedral
            || candidate.violations < current.violations)
}
