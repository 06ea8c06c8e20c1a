//! Mesh generation by force-equilibrium relaxation (DistMesh).
//!
//! Mesh edges are treated as springs whose rest length follows the sizing field.
//! Starting from a sampled point cloud, points are moved by the net spring force,
//! pushed back into the domain when they leave it,
//! and periodically retriangulated, until they settle.
//!
//! The engine is a small state machine:
//! `Init -> Iterating -> (Converged | MaxIterReached) -> Done`.
//! Running out of iterations is not an error;
//! the best mesh so far is returned with a [`ConvergenceWarning`].

use nalgebra as na;
use nalgebra_sparse as nas;

use crate::config::GeneratorOptions;
use crate::delaunay;
use crate::error::{ConfigurationError, ConvergenceWarning, GeometryError, MeshError};
use crate::improve::{ImprovementReport, MeshQualityImprover};
use crate::mesh::{edges_of, incidence_map, Mesh, QualityStats};
use crate::sampler::PointSampler;
use crate::sizing::SizingField;

/// Stage of the relaxation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GeneratorState {
    /// Points sampled, no topology yet.
    Init,
    /// Relaxation in progress.
    Iterating,
    /// Displacements fell below the tolerance.
    Converged,
    /// The iteration cap was hit first.
    MaxIterReached,
    /// The final mesh has been assembled.
    Done,
}

impl GeneratorState {
    /// Whether relaxation has stopped.
    #[inline]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            GeneratorState::Converged | GeneratorState::MaxIterReached | GeneratorState::Done
        )
    }
}

/// Diagnostics of one generation run.
#[derive(Clone, Debug, PartialEq)]
pub struct GenerationReport {
    /// Why relaxation stopped: [`GeneratorState::Converged`] or [`GeneratorState::MaxIterReached`].
    pub termination: GeneratorState,
    /// Relaxation iterations run.
    pub iterations: usize,
    /// Largest displacement relative to the local size in the last iteration.
    pub max_displacement: f64,
    /// Number of triangulations computed during relaxation.
    pub retriangulations: usize,
    /// Points removed by density control and coincidence handling.
    pub points_removed: usize,
    /// Element quality of the returned mesh.
    pub quality: QualityStats,
    /// Outcome of the quality improvement pass, if it ran.
    pub improvement: Option<ImprovementReport>,
    /// Non-fatal conditions met along the way.
    pub warnings: Vec<ConvergenceWarning>,
}

/// A finished mesh together with its report.
#[derive(Clone, Debug)]
pub struct GeneratedMesh<const DIM: usize> {
    /// The mesh.
    pub mesh: Mesh<DIM>,
    /// How it was made.
    pub report: GenerationReport,
}

/// Serial mesh generator over a sizing field.
#[derive(Clone, Debug)]
pub struct MeshGenerator<'a, const DIM: usize> {
    sizing: &'a SizingField<DIM>,
    options: GeneratorOptions,
}

impl<'a, const DIM: usize> MeshGenerator<'a, DIM> {
    /// Prepare a generator. Options are validated in [`build`][Self::build].
    pub fn new(sizing: &'a SizingField<DIM>, options: GeneratorOptions) -> Self {
        Self { sizing, options }
    }

    /// The generator options.
    pub fn options(&self) -> &GeneratorOptions {
        &self.options
    }

    /// Generate the mesh.
    ///
    /// The same sizing field and options always give the same mesh.
    ///
    /// # Errors
    /// Invalid options and unrecoverable triangulation failures are errors.
    /// Running out of iterations is reported in the returned [`GenerationReport`].
    pub fn build(&self) -> Result<GeneratedMesh<DIM>, MeshError> {
        self.options.validate::<DIM>()?;
        let _span = tracing::info_span!("mesh_generation", dim = DIM).entered();

        let fixed = fixed_points(self.sizing, &self.options)?;
        let points = PointSampler::new(self.sizing, self.options.seed).sample(&fixed);
        tracing::info!(
            points = points.len(),
            fixed = fixed.len(),
            "starting relaxation"
        );

        let params = RelaxParams::new(self.sizing, &self.options);
        let mut engine = Relaxation::new(self.sizing, params, points, fixed.len());
        while !engine.state().is_terminal() {
            engine.step()?;
            let it = engine.iteration();
            if self.options.nscreen > 0 && it > 0 && it % self.options.nscreen == 0 {
                tracing::info!(
                    iteration = it,
                    points = engine.points().len(),
                    max_displacement = engine.max_displacement(),
                    "relaxation progress"
                );
            }
        }
        let termination = engine.state();
        let iterations = engine.iteration();
        let max_displacement = engine.max_displacement();
        let retriangulations = engine.retriangulations();
        let (points, mut points_removed) = engine.into_points();

        let (mesh, removed) = finalize_mesh(points, fixed.len(), self.sizing, params.geps)?;
        points_removed += removed;

        let mut warnings = Vec::new();
        if termination == GeneratorState::MaxIterReached {
            let warning = ConvergenceWarning::MaxIterReached {
                iterations,
                max_displacement,
            };
            tracing::warn!(%warning);
            warnings.push(warning);
        } else {
            tracing::info!(iterations, "relaxation converged");
        }

        let (mesh, improvement) = if self.options.mesh_improvement {
            let improver = MeshQualityImprover::new(self.sizing, &self.options);
            let (mesh, report) = improver.improve(mesh, fixed.len())?;
            warnings.extend(report.warning.clone());
            (mesh, Some(report))
        } else {
            (mesh, None)
        };

        let quality = mesh.quality(self.options.min_dh_bound, self.options.max_dh_bound);
        tracing::info!(
            points = mesh.num_points(),
            cells = mesh.num_cells(),
            min_dihedral = quality.min_dihedral,
            "mesh generated"
        );

        Ok(GeneratedMesh {
            mesh,
            report: GenerationReport {
                termination,
                iterations,
                max_displacement,
                retriangulations,
                points_removed,
                quality,
                improvement,
                warnings,
            },
        })
    }
}

/// Points that never move: the corners of the domain and any user given points.
///
/// User points closer than the geometric tolerance to an earlier fixed point are skipped.
pub(crate) fn fixed_points<const DIM: usize>(
    sizing: &SizingField<DIM>,
    options: &GeneratorOptions,
) -> Result<Vec<na::SVector<f64, DIM>>, ConfigurationError> {
    let domain = sizing.domain();
    let geps = 1e-3 * sizing.hmin();
    let mut fixed = domain.corners();
    for (index, coords) in options.fixed_points.iter().enumerate() {
        if coords.len() != DIM {
            return Err(ConfigurationError::ShapeMismatch {
                expected: vec![DIM],
                got: vec![coords.len()],
            });
        }
        let p = na::SVector::from_fn(|i, _| coords[i]);
        if !domain.contains(&p, geps) {
            return Err(ConfigurationError::FixedPointOutside { index });
        }
        if fixed.iter().all(|f| (f - p).norm() > geps) {
            fixed.push(domain.project(&p));
        }
    }
    Ok(fixed)
}

/// Constants of the relaxation derived from the sizing field and options.
#[derive(Clone, Copy, Debug)]
pub(crate) struct RelaxParams {
    /// Reference length, the smallest element size.
    pub h0: f64,
    /// Geometric tolerance.
    pub geps: f64,
    /// Spring rest length inflation so that springs push outward.
    pub fscale: f64,
    pub time_step: f64,
    pub tolerance: f64,
    pub retriangulation_tolerance: f64,
    pub retriangulation_period: usize,
    pub density_control_period: usize,
    pub max_iter: usize,
}

impl RelaxParams {
    pub fn new<const DIM: usize>(sizing: &SizingField<DIM>, options: &GeneratorOptions) -> Self {
        let h0 = sizing.hmin();
        Self {
            h0,
            geps: 1e-3 * h0,
            fscale: 1.0 + 0.4 / 2f64.powi(DIM as i32 - 1),
            time_step: options.time_step,
            tolerance: options.tolerance,
            retriangulation_tolerance: options.retriangulation_tolerance,
            retriangulation_period: options.retriangulation_period,
            density_control_period: options.density_control_period,
            max_iter: options.max_iter,
        }
    }
}

/// Per-bar geometry of the current configuration.
pub(crate) struct BarGeometry<const DIM: usize> {
    /// `p[b] - p[a]` for bar `[a, b]`.
    pub vectors: Vec<na::SVector<f64, DIM>>,
    pub lengths: Vec<f64>,
    /// Desired size at the bar midpoint.
    pub sizes: Vec<f64>,
}

impl<const DIM: usize> BarGeometry<DIM> {
    pub fn new(
        points: &[na::SVector<f64, DIM>],
        bars: &[[usize; 2]],
        sizing: &SizingField<DIM>,
    ) -> Self {
        let mut vectors = Vec::with_capacity(bars.len());
        let mut lengths = Vec::with_capacity(bars.len());
        let mut sizes = Vec::with_capacity(bars.len());
        for [a, b] in bars {
            let v = points[*b] - points[*a];
            vectors.push(v);
            lengths.push(v.norm());
            sizes.push(sizing.at(&(0.5 * (points[*a] + points[*b]))));
        }
        Self {
            vectors,
            lengths,
            sizes,
        }
    }

    /// `(Σ L^DIM, Σ h^DIM)` over the bars selected by `include`.
    pub fn power_sums(&self, mut include: impl FnMut(usize) -> bool) -> (f64, f64) {
        let mut sums = (0.0, 0.0);
        for (i, (l, h)) in self.lengths.iter().zip(&self.sizes).enumerate() {
            if include(i) {
                sums.0 += l.powi(DIM as i32);
                sums.1 += h.powi(DIM as i32);
            }
        }
        sums
    }

    /// Spring force vectors per bar as an `n_bars x DIM` matrix.
    /// Springs only push: a bar longer than its rest length exerts no force.
    pub fn forces(&self, scale: f64) -> na::DMatrix<f64> {
        let mut forces = na::DMatrix::zeros(self.lengths.len(), DIM);
        for (i, ((v, l), h)) in self
            .vectors
            .iter()
            .zip(&self.lengths)
            .zip(&self.sizes)
            .enumerate()
        {
            let push = (h * scale - l).max(0.0);
            if push > 0.0 && *l > 0.0 {
                for axis in 0..DIM {
                    forces[(i, axis)] = push * v[axis] / l;
                }
            }
        }
        forces
    }
}

/// Factor turning desired sizes into rest lengths,
/// so that the rest lengths sum to slightly more than the current lengths.
pub(crate) fn length_scale<const DIM: usize>(sum_lengths: f64, sum_sizes: f64, fscale: f64) -> f64 {
    if sum_sizes <= 0.0 {
        return fscale;
    }
    fscale * (sum_lengths / sum_sizes).powf(1.0 / DIM as f64)
}

/// Triangulate, dropping the later of any two coincident points until it succeeds.
///
/// Points with index below `nfix` are never dropped.
/// Returns the cells and the indices removed, in removal order.
pub(crate) fn triangulate_dedup<const DIM: usize>(
    points: &mut Vec<na::SVector<f64, DIM>>,
    nfix: usize,
) -> Result<(Vec<usize>, Vec<usize>), GeometryError> {
    let mut removed = Vec::new();
    loop {
        match delaunay::triangulate(points) {
            Ok(cells) => return Ok((cells, removed)),
            Err(GeometryError::CoincidentPoints { first, second }) => {
                let victim = if second >= nfix {
                    second
                } else if first >= nfix {
                    first
                } else {
                    return Err(GeometryError::CoincidentPoints { first, second });
                };
                tracing::debug!(first, second, "dropping coincident point");
                points.remove(victim);
                removed.push(victim);
            }
            Err(e) => return Err(e),
        }
    }
}

/// Triangulate the final point set and clean it up into a [`Mesh`].
/// Returns the mesh and the number of points dropped.
pub(crate) fn finalize_mesh<const DIM: usize>(
    mut points: Vec<na::SVector<f64, DIM>>,
    nfix: usize,
    sizing: &SizingField<DIM>,
    geps: f64,
) -> Result<(Mesh<DIM>, usize), GeometryError> {
    let before = points.len();
    let (cells, _) = triangulate_dedup(&mut points, nfix)?;
    let mesh = Mesh::from_triangulation(points, &cells, sizing.domain(), geps);
    let dropped = before - mesh.num_points();
    Ok((mesh, dropped))
}

/// The serial relaxation loop.
pub(crate) struct Relaxation<'a, const DIM: usize> {
    sizing: &'a SizingField<DIM>,
    params: RelaxParams,
    points: Vec<na::SVector<f64, DIM>>,
    /// The first `nfix` points never move.
    nfix: usize,
    bars: Vec<[usize; 2]>,
    /// Transposed incidence map of `bars`, gathering bar forces onto points.
    coboundary: nas::CsrMatrix<f64>,
    /// Positions at the last triangulation, `None` if topology is stale.
    anchor: Option<Vec<na::SVector<f64, DIM>>>,
    state: GeneratorState,
    iteration: usize,
    max_displacement: f64,
    retriangulations: usize,
    points_removed: usize,
}

impl<'a, const DIM: usize> Relaxation<'a, DIM> {
    pub fn new(
        sizing: &'a SizingField<DIM>,
        params: RelaxParams,
        points: Vec<na::SVector<f64, DIM>>,
        nfix: usize,
    ) -> Self {
        Self {
            sizing,
            params,
            points,
            nfix,
            bars: Vec::new(),
            coboundary: nas::CsrMatrix::zeros(0, 0),
            anchor: None,
            state: GeneratorState::Init,
            iteration: 0,
            max_displacement: f64::INFINITY,
            retriangulations: 0,
            points_removed: 0,
        }
    }

    #[inline]
    pub fn state(&self) -> GeneratorState {
        self.state
    }

    #[inline]
    pub fn iteration(&self) -> usize {
        self.iteration
    }

    #[inline]
    pub fn max_displacement(&self) -> f64 {
        self.max_displacement
    }

    #[inline]
    pub fn retriangulations(&self) -> usize {
        self.retriangulations
    }

    #[inline]
    pub fn points(&self) -> &[na::SVector<f64, DIM>] {
        &self.points
    }

    /// Final positions and the number of points removed during relaxation.
    pub fn into_points(self) -> (Vec<na::SVector<f64, DIM>>, usize) {
        (self.points, self.points_removed)
    }

    /// Advance the state machine by one step.
    pub fn step(&mut self) -> Result<GeneratorState, GeometryError> {
        match self.state {
            GeneratorState::Init => {
                self.retriangulate()?;
                self.state = if self.params.max_iter == 0 {
                    GeneratorState::MaxIterReached
                } else {
                    GeneratorState::Iterating
                };
            }
            GeneratorState::Iterating => self.iterate()?,
            GeneratorState::Converged | GeneratorState::MaxIterReached => {
                self.state = GeneratorState::Done;
            }
            GeneratorState::Done => {}
        }
        Ok(self.state)
    }

    fn topology_stale(&self) -> bool {
        let Some(anchor) = &self.anchor else {
            return true;
        };
        if self.params.retriangulation_period > 0
            && self.iteration > 0
            && self.iteration % self.params.retriangulation_period == 0
        {
            return true;
        }
        let limit = self.params.retriangulation_tolerance * self.params.h0;
        self.points
            .iter()
            .zip(anchor)
            .any(|(p, q)| (p - q).norm() > limit)
    }

    fn retriangulate(&mut self) -> Result<(), GeometryError> {
        let (cells, removed) = triangulate_dedup(&mut self.points, self.nfix)?;
        self.points_removed += removed.len();
        self.bars = edges_of::<DIM>(&cells);
        self.coboundary = incidence_map(self.points.len(), &self.bars).transpose();
        self.anchor = Some(self.points.clone());
        self.retriangulations += 1;
        tracing::debug!(
            iteration = self.iteration,
            points = self.points.len(),
            cells = cells.len() / (DIM + 1),
            bars = self.bars.len(),
            "retriangulated"
        );
        Ok(())
    }

    fn iterate(&mut self) -> Result<(), GeometryError> {
        if self.topology_stale() {
            self.retriangulate()?;
        }

        let bars = BarGeometry::new(&self.points, &self.bars, self.sizing);
        let (sum_l, sum_h) = bars.power_sums(|_| true);
        let scale = length_scale::<DIM>(sum_l, sum_h, self.params.fscale);

        let period = self.params.density_control_period;
        if period > 0 && self.iteration > 0 && self.iteration % period == 0 {
            let culled = short_bar_points(&self.bars, &bars, scale, self.nfix);
            if !culled.is_empty() {
                tracing::debug!(
                    iteration = self.iteration,
                    removed = culled.len(),
                    "density control"
                );
                let mut keep = vec![true; self.points.len()];
                for i in &culled {
                    keep[*i] = false;
                }
                let mut idx = 0;
                self.points.retain(|_| {
                    idx += 1;
                    keep[idx - 1]
                });
                self.points_removed += culled.len();
                self.anchor = None;
                self.advance_iteration(f64::INFINITY);
                return Ok(());
            }
        }

        let net = &self.coboundary * &bars.forces(scale);
        let domain = self.sizing.domain();
        let mut max_disp: f64 = 0.0;
        for (i, p) in self.points.iter_mut().enumerate().skip(self.nfix) {
            let step = na::SVector::<f64, DIM>::from_fn(|axis, _| {
                self.params.time_step * net[(i, axis)]
            });
            let moved = domain.project(&(*p + step));
            let disp = (moved - *p).norm() / self.sizing.at(&moved);
            max_disp = max_disp.max(disp);
            *p = moved;
        }
        self.advance_iteration(max_disp);
        Ok(())
    }

    fn advance_iteration(&mut self, max_disp: f64) {
        self.iteration += 1;
        self.max_displacement = max_disp;
        if max_disp < self.params.tolerance {
            self.state = GeneratorState::Converged;
        } else if self.iteration >= self.params.max_iter {
            self.state = GeneratorState::MaxIterReached;
        }
    }
}

/// Non-fixed endpoints of bars shorter than half their rest length, sorted and unique.
pub(crate) fn short_bar_points<const DIM: usize>(
    bars: &[[usize; 2]],
    geometry: &BarGeometry<DIM>,
    scale: f64,
    nfix: usize,
) -> Vec<usize> {
    let mut culled: Vec<usize> = bars
        .iter()
        .zip(geometry.lengths.iter().zip(&geometry.sizes))
        .filter(|(_, (l, h))| *h * scale > 2.0 * *l)
        .flat_map(|([a, b], _)| [*a, *b])
        .filter(|i| *i >= nfix)
        .collect();
    culled.sort_unstable();
    culled.dedup();
    culled
}
