//! The mesh sizing field: desired local edge length over the meshing domain.
//!
//! Built once from a velocity model by [`SizingFieldBuilder::build`]:
//!
//! 1. raw size `h = v / (freq * wl)` at each working grid node
//!    (uniform `hmin` if `wl` is zero), raised to the CFL floor `dt * v / cr_max` if `dt > 0`,
//! 2. clamped to `[hmin, hmax]`,
//! 3. extended outward by `domain_ext` with the chosen [`PadStyle`],
//! 4. gradient limited so that `|h(a) - h(b)| <= grade * |a - b|` for adjacent nodes.
//!
//! The result is immutable and cheap to share behind an `Arc`.

use std::path::Path;

use nalgebra as na;
use serde::{Deserialize, Serialize};

use crate::config::SizingOptions;
use crate::domain::{BoundingBox, PadStyle, Padding};
use crate::error::{ConfigurationError, MeshError, PersistenceError};
use crate::grid::RegularGrid;
use crate::velocity::VelocityField;

/// Outcome of the grading sweep.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GradingReport {
    /// Number of full sweep passes performed.
    pub passes: usize,
    /// Whether the last pass made no changes.
    pub converged: bool,
}

/// Limit the gradient of a grid so that adjacent nodes differ by at most
/// `grade` times their distance.
///
/// Sizes are only ever decreased, so the smallest value of the grid is preserved.
/// Uses Gauss-Seidel sweeps in all `2^DIM` axis orderings
/// (the same update as a fast sweeping eikonal solver),
/// repeated until a full pass makes no change or `max_passes` is hit.
pub fn limit_gradient<const DIM: usize>(
    grid: &mut RegularGrid<DIM>,
    grade: f64,
    max_passes: usize,
) -> GradingReport {
    let shape = grid.shape();
    let strides = grid.strides();
    let steps: [f64; DIM] = std::array::from_fn(|axis| grade * grid.spacing()[axis]);
    let values = grid.values_mut();

    for pass in 0..max_passes {
        let mut changed = false;
        for ordering in 0..1usize << DIM {
            let mut idx: [usize; DIM] = std::array::from_fn(|axis| {
                if ordering & (1 << axis) != 0 {
                    shape[axis] - 1
                } else {
                    0
                }
            });
            loop {
                let flat: usize = idx.iter().zip(&strides).map(|(i, s)| i * s).sum();
                let mut h = values[flat];
                for axis in 0..DIM {
                    let reversed = ordering & (1 << axis) != 0;
                    // the upwind neighbor is the one already visited in this ordering
                    let upwind = if reversed {
                        (idx[axis] + 1 < shape[axis]).then(|| flat + strides[axis])
                    } else {
                        (idx[axis] > 0).then(|| flat - strides[axis])
                    };
                    if let Some(nb) = upwind {
                        let bound = values[nb] + steps[axis];
                        if bound < h {
                            h = bound;
                            changed = true;
                        }
                    }
                }
                values[flat] = h;

                if !advance(&mut idx, &shape, ordering) {
                    break;
                }
            }
        }
        if !changed {
            return GradingReport {
                passes: pass + 1,
                converged: true,
            };
        }
    }
    GradingReport {
        passes: max_passes,
        converged: false,
    }
}

/// Step an N-dimensional index through the grid in the given axis ordering,
/// last axis fastest. Returns false after the last node.
fn advance<const DIM: usize>(idx: &mut [usize; DIM], shape: &[usize; DIM], ordering: usize) -> bool {
    for axis in (0..DIM).rev() {
        if ordering & (1 << axis) != 0 {
            if idx[axis] > 0 {
                idx[axis] -= 1;
                return true;
            }
            idx[axis] = shape[axis] - 1;
        } else {
            if idx[axis] + 1 < shape[axis] {
                idx[axis] += 1;
                return true;
            }
            idx[axis] = 0;
        }
    }
    false
}

/// Builder turning a velocity model and physical parameters into a [`SizingField`].
#[derive(Clone, Debug)]
pub struct SizingFieldBuilder<'a, const DIM: usize> {
    velocity: &'a VelocityField<DIM>,
    options: SizingOptions,
}

impl<'a, const DIM: usize> SizingFieldBuilder<'a, DIM> {
    /// Prepare a build. Nothing is validated or computed until [`build`][Self::build].
    pub fn new(velocity: &'a VelocityField<DIM>, options: SizingOptions) -> Self {
        Self { velocity, options }
    }

    /// Compute the sizing field.
    ///
    /// # Errors
    /// Fails with a [`ConfigurationError`] for an invalid bounding box,
    /// `hmin > hmax` or any other invalid option, before doing any work.
    pub fn build(&self) -> Result<SizingField<DIM>, ConfigurationError> {
        let opts = &self.options;
        let bbox = opts.validate::<DIM>()?;
        let hmin = opts.hmin;
        let hmax = opts.hmax_value();

        let _span = tracing::info_span!("sizing_field", dim = DIM).entered();

        let shape: [usize; DIM] = match &opts.grid_shape {
            Some(shape) => std::array::from_fn(|axis| shape[axis]),
            None => self.velocity.grid().shape(),
        };
        // resampled velocities in m/s
        let to_mps = opts.units.to_meters_per_second();
        let mut vel = RegularGrid::filled(bbox, shape, 0.0)?;
        for flat in 0..vel.len() {
            let p = vel.node_position(vel.flat_to_nd(flat));
            vel.values_mut()[flat] = self.velocity.at(&p) * to_mps;
        }

        // raw size from the wavelength formula and the CFL floor
        let cfl_factor = (opts.dt > 0.0).then(|| opts.dt / opts.cr_max);
        let raw: Vec<f64> = vel
            .values()
            .iter()
            .map(|&v| {
                let mut h = if opts.wl > 0.0 {
                    v / (opts.freq * opts.wl)
                } else {
                    hmin
                };
                if let Some(c) = cfl_factor {
                    h = h.max(c * v);
                }
                h.clamp(hmin, hmax)
            })
            .collect();
        let mut sizes = RegularGrid::new(bbox, shape, raw)?;
        tracing::debug!(
            min = sizes.min_value(),
            max = sizes.max_value(),
            "raw sizes computed"
        );

        // domain extension
        let cells = padding_cells(&sizes, opts.domain_ext, opts.free_surface);
        if cells.iter().flatten().any(|n| *n > 0) {
            let ramp_target = if hmax.is_finite() {
                hmax
            } else {
                sizes.max_value()
            };
            sizes = pad_grid(&sizes, &cells, opts.padstyle, ramp_target)?;
            vel = pad_grid(&vel, &cells, PadStyle::Edge, 0.0)?;
            tracing::debug!(shape = ?sizes.shape(), style = ?opts.padstyle, "domain extended");
        }

        if opts.grade > 0.0 {
            let report = limit_gradient(&mut sizes, opts.grade, opts.max_grade_passes);
            if report.converged {
                tracing::debug!(passes = report.passes, "grading converged");
            } else {
                tracing::warn!(
                    passes = report.passes,
                    "grading did not converge within the pass limit"
                );
            }
        }

        if let Some(c) = cfl_factor {
            let violations = sizes
                .values()
                .iter()
                .zip(vel.values())
                .filter(|(h, v)| **h < c * **v * (1.0 - 1e-12))
                .count();
            if violations > 0 {
                tracing::warn!(
                    violations,
                    "sizes below the CFL floor after clamping and grading"
                );
            }
        }

        tracing::info!(
            nodes = sizes.len(),
            min = sizes.min_value(),
            max = sizes.max_value(),
            "sizing field built"
        );

        Ok(SizingField {
            grid: sizes,
            original_bbox: bbox,
            hmin,
            hmax,
            grade: opts.grade,
        })
    }
}

/// Number of grid cells added below and above each axis.
fn padding_cells<const DIM: usize>(
    grid: &RegularGrid<DIM>,
    domain_ext: f64,
    free_surface: bool,
) -> [[usize; DIM]; 2] {
    if domain_ext <= 0.0 {
        return [[0; DIM]; 2];
    }
    let widths = Padding::<DIM>::uniform(domain_ext, free_surface);
    let spacing = grid.spacing();
    let cells = |w: f64, axis: usize| (w / spacing[axis]).ceil() as usize;
    [
        std::array::from_fn(|axis| cells(widths.lower[axis], axis)),
        std::array::from_fn(|axis| cells(widths.upper[axis], axis)),
    ]
}

/// Grow a grid by whole cells, filling the new nodes with the given profile.
///
/// `ramp_target` is the value reached at the outer edge for [`PadStyle::LinearRamp`].
fn pad_grid<const DIM: usize>(
    grid: &RegularGrid<DIM>,
    cells: &[[usize; DIM]; 2],
    style: PadStyle,
    ramp_target: f64,
) -> Result<RegularGrid<DIM>, ConfigurationError> {
    let [lower, upper] = cells;
    let spacing = grid.spacing();
    let old_shape = grid.shape();
    let padding = Padding {
        lower: std::array::from_fn(|a| lower[a] as f64 * spacing[a]),
        upper: std::array::from_fn(|a| upper[a] as f64 * spacing[a]),
    };
    let bbox = grid.bbox().padded(&padding);
    let shape: [usize; DIM] = std::array::from_fn(|a| old_shape[a] + lower[a] + upper[a]);
    let interior_max = grid.max_value();

    let mut padded = RegularGrid::filled(bbox, shape, 0.0)?;
    for flat in 0..padded.len() {
        let idx = padded.flat_to_nd(flat);
        // nearest interior node and how far outside we are, as a fraction of the padding
        let mut nearest = [0usize; DIM];
        let mut outside_frac: f64 = 0.0;
        for axis in 0..DIM {
            let i = idx[axis] as isize - lower[axis] as isize;
            let n = old_shape[axis] as isize;
            if i < 0 {
                nearest[axis] = 0;
                outside_frac = outside_frac.max(-i as f64 / lower[axis] as f64);
            } else if i >= n {
                nearest[axis] = old_shape[axis] - 1;
                outside_frac = outside_frac.max((i - n + 1) as f64 / upper[axis] as f64);
            } else {
                nearest[axis] = i as usize;
            }
        }
        let edge = grid.get(nearest);
        let value = if outside_frac == 0.0 {
            edge
        } else {
            match style {
                PadStyle::Edge => edge,
                PadStyle::Constant => interior_max,
                PadStyle::LinearRamp => edge + outside_frac * (ramp_target - edge).max(0.0),
            }
        };
        padded.values_mut()[flat] = value;
    }
    Ok(padded)
}

/// Metadata stored next to an exported sizing field.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct SizingFieldMetadata {
    dim: usize,
    bbox: Vec<f64>,
    original_bbox: Vec<f64>,
    shape: Vec<usize>,
    hmin: f64,
    hmax: Option<f64>,
    grade: f64,
}

/// Desired element size as a function of position.
///
/// Values are bounded to `[hmin, hmax]` everywhere
/// and adjacent grid nodes satisfy the grading limit.
#[derive(Clone, Debug, PartialEq)]
pub struct SizingField<const DIM: usize> {
    grid: RegularGrid<DIM>,
    original_bbox: BoundingBox<DIM>,
    hmin: f64,
    hmax: f64,
    grade: f64,
}

impl<const DIM: usize> SizingField<DIM> {
    /// A uniform field of size `h` over `bbox`, mostly useful for tests.
    pub fn uniform(bbox: BoundingBox<DIM>, h: f64) -> Result<Self, ConfigurationError> {
        if !h.is_finite() || h <= 0.0 {
            return Err(ConfigurationError::NotPositive {
                name: "h",
                value: h,
            });
        }
        Ok(Self {
            grid: RegularGrid::filled(bbox, [2; DIM], h)?,
            original_bbox: bbox,
            hmin: h,
            hmax: h,
            grade: 0.0,
        })
    }

    /// Wrap an already computed size grid.
    ///
    /// Values are clamped into `[hmin, hmax]`; no grading is applied.
    pub fn from_grid(
        mut grid: RegularGrid<DIM>,
        hmin: f64,
        hmax: f64,
    ) -> Result<Self, ConfigurationError> {
        if !hmin.is_finite() || hmin <= 0.0 {
            return Err(ConfigurationError::NotPositive {
                name: "hmin",
                value: hmin,
            });
        }
        if hmin > hmax {
            return Err(ConfigurationError::SizeBoundsInverted { hmin, hmax });
        }
        for v in grid.values_mut() {
            *v = v.clamp(hmin, hmax);
        }
        let original_bbox = *grid.bbox();
        Ok(Self {
            grid,
            original_bbox,
            hmin,
            hmax,
            grade: 0.0,
        })
    }

    /// Desired element size at `p`.
    #[inline]
    pub fn at(&self, p: &na::SVector<f64, DIM>) -> f64 {
        self.grid.interpolate(p).clamp(self.hmin, self.hmax)
    }

    /// The meshing domain, including any extension.
    #[inline]
    pub fn domain(&self) -> &BoundingBox<DIM> {
        self.grid.bbox()
    }

    /// The domain as configured, before extension.
    #[inline]
    pub fn original_bbox(&self) -> &BoundingBox<DIM> {
        &self.original_bbox
    }

    /// Lower size bound.
    #[inline]
    pub fn hmin(&self) -> f64 {
        self.hmin
    }

    /// Upper size bound (infinite if unbounded).
    #[inline]
    pub fn hmax(&self) -> f64 {
        self.hmax
    }

    /// Grading limit the field was built with (zero if none).
    #[inline]
    pub fn grade(&self) -> f64 {
        self.grade
    }

    /// The working grid the field interpolates.
    #[inline]
    pub fn grid(&self) -> &RegularGrid<DIM> {
        &self.grid
    }

    /// Largest amount by which any adjacent node pair exceeds the grading limit.
    /// Zero or negative if the limit holds everywhere.
    pub fn max_grade_violation(&self) -> f64 {
        let values = self.grid.values();
        let mut worst = f64::NEG_INFINITY;
        self.grid.for_each_adjacent_pair(|a, b, dist| {
            worst = worst.max((values[a] - values[b]).abs() - self.grade * dist);
        });
        worst
    }

    /// Write the field to `<stem>.npy` (node values)
    /// and `<stem>.json` (grid geometry and bounds) for later reuse.
    pub fn export(&self, stem: impl AsRef<Path>) -> Result<(), MeshError> {
        let stem = stem.as_ref();
        let meta = SizingFieldMetadata {
            dim: DIM,
            bbox: self.grid.bbox().to_pairs(),
            original_bbox: self.original_bbox.to_pairs(),
            shape: self.grid.shape().to_vec(),
            hmin: self.hmin,
            hmax: self.hmax.is_finite().then_some(self.hmax),
            grade: self.grade,
        };
        ndarray_npy::write_npy(stem.with_extension("npy"), &self.grid.to_ndarray())
            .map_err(PersistenceError::from)?;
        let json = serde_json::to_string_pretty(&meta).map_err(PersistenceError::from)?;
        std::fs::write(stem.with_extension("json"), json)?;
        tracing::info!(path = %stem.display(), "sizing field exported");
        Ok(())
    }

    /// Read a field written by [`export`][Self::export].
    pub fn load(stem: impl AsRef<Path>) -> Result<Self, MeshError> {
        let stem = stem.as_ref();
        let json = std::fs::read_to_string(stem.with_extension("json"))?;
        let meta: SizingFieldMetadata =
            serde_json::from_str(&json).map_err(PersistenceError::from)?;
        if meta.dim != DIM {
            return Err(ConfigurationError::UnsupportedDimension(meta.dim).into());
        }
        let values: ndarray::ArrayD<f64> =
            ndarray_npy::read_npy(stem.with_extension("npy")).map_err(PersistenceError::from)?;
        if values.shape() != meta.shape.as_slice() {
            return Err(ConfigurationError::ShapeMismatch {
                expected: meta.shape,
                got: values.shape().to_vec(),
            }
            .into());
        }
        let grid = RegularGrid::from_ndarray(BoundingBox::from_pairs(&meta.bbox)?, values)?;
        Ok(Self {
            grid,
            original_bbox: BoundingBox::from_pairs(&meta.original_bbox)?,
            hmin: meta.hmin,
            hmax: meta.hmax.unwrap_or(f64::INFINITY),
            grade: meta.grade,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::velocity::VelocityUnits;
    use approx::assert_relative_eq;

    const BBOX_2D: [f64; 4] = [-1000.0, 0.0, 0.0, 2000.0];

    /// Velocity increasing linearly with depth from 1500 m/s at the surface.
    fn layered_model() -> VelocityField<2> {
        let bbox = BoundingBox::from_pairs(&BBOX_2D).unwrap();
        VelocityField::depth_profile(bbox, 21, |z| 1500.0 - 2.0 * z).unwrap()
    }

    /// Low velocity block inside a fast background.
    fn block_model() -> VelocityField<2> {
        let bbox = BoundingBox::from_pairs(&BBOX_2D).unwrap();
        let mut grid = RegularGrid::filled(bbox, [21, 41], 4000.0).unwrap();
        for flat in 0..grid.len() {
            let [i, j] = grid.flat_to_nd(flat);
            if (8..12).contains(&i) && (15..25).contains(&j) {
                grid.values_mut()[flat] = 1500.0;
            }
        }
        VelocityField::new(grid).unwrap()
    }

    fn options() -> SizingOptions {
        SizingOptions::new(&BBOX_2D)
            .with_hmin(20.0)
            .with_hmax(80.0)
            .with_wavelength(10.0, 5.0)
    }

    #[test]
    fn wavelength_formula_and_clamping() {
        let model = layered_model();
        let field = SizingFieldBuilder::new(&model, options()).build().unwrap();
        // 1500 / 50 = 30 at the surface
        assert_relative_eq!(field.at(&na::Vector2::new(0.0, 500.0)), 30.0, epsilon = 1e-9);
        // 3500 / 50 = 70 at the bottom
        assert_relative_eq!(field.at(&na::Vector2::new(-1000.0, 500.0)), 70.0, epsilon = 1e-9);

        let clamped = SizingFieldBuilder::new(&model, options().with_hmax(50.0))
            .build()
            .unwrap();
        assert_relative_eq!(clamped.at(&na::Vector2::new(-1000.0, 500.0)), 50.0);
        for v in clamped.grid().values() {
            assert!((20.0..=50.0).contains(v));
        }
    }

    #[test]
    fn velocity_units_scale_the_samples() {
        let bbox = BoundingBox::from_pairs(&BBOX_2D).unwrap();
        let km_model = VelocityField::depth_profile(bbox, 21, |z| 1.5 - 0.002 * z).unwrap();
        let field = SizingFieldBuilder::new(
            &km_model,
            options().with_units(VelocityUnits::KilometersPerSecond),
        )
        .build()
        .unwrap();
        let reference = SizingFieldBuilder::new(&layered_model(), options())
            .build()
            .unwrap();
        assert_relative_eq!(field.at(&na::Vector2::new(0.0, 500.0)), 30.0, epsilon = 1e-9);
        for (km, m) in field.grid().values().iter().zip(reference.grid().values()) {
            assert_relative_eq!(*km, *m, max_relative = 1e-12);
        }

        // read as m/s the same samples are far too slow and clamp to hmin
        let unscaled = SizingFieldBuilder::new(&km_model, options()).build().unwrap();
        assert!(unscaled.grid().values().iter().all(|h| *h == 20.0));
    }

    #[test]
    fn zero_wavelength_gives_uniform_hmin() {
        let model = layered_model();
        let field = SizingFieldBuilder::new(&model, options().with_wavelength(10.0, 0.0))
            .build()
            .unwrap();
        assert_relative_eq!(field.grid().min_value(), 20.0);
        assert_relative_eq!(field.grid().max_value(), 20.0);
    }

    #[test]
    fn invalid_options_fail_before_building() {
        let model = layered_model();
        let err = SizingFieldBuilder::new(&model, options().with_hmin(100.0))
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigurationError::SizeBoundsInverted { .. }));
        let mut opts = options();
        opts.bbox = vec![0.0, 0.0, 0.0, 1.0];
        let err = SizingFieldBuilder::new(&model, opts).build().unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidExtent { .. }));
    }

    #[test]
    fn grading_limits_adjacent_differences() {
        let model = block_model();
        let grade = 0.05;
        let field = SizingFieldBuilder::new(&model, options().with_grade(grade))
            .build()
            .unwrap();
        assert!(field.max_grade_violation() <= 1e-9);
        // grading only lowers sizes, so the minimum is kept
        assert_relative_eq!(field.grid().min_value(), 30.0, epsilon = 1e-9);
        assert!(field.grid().max_value() <= 80.0);
    }

    #[test]
    fn grading_matches_cone_in_one_dimension() {
        let bbox = BoundingBox::<2>::from_pairs(&[0.0, 1.0, 0.0, 10.0]).unwrap();
        let mut values = vec![10.0; 11];
        values[5] = 1.0;
        let mut grid = RegularGrid::new(bbox, [1, 11], values).unwrap();
        let report = limit_gradient(&mut grid, 0.5, 100);
        assert!(report.converged);
        for (j, v) in grid.values().iter().enumerate() {
            let expected = (1.0 + 0.5 * (j as f64 - 5.0).abs()).min(10.0);
            assert_relative_eq!(*v, expected, epsilon = 1e-12);
        }
    }

    #[test]
    fn grading_respects_pass_limit() {
        let bbox = BoundingBox::<2>::from_pairs(&[0.0, 1.0, 0.0, 1.0]).unwrap();
        let mut grid = RegularGrid::new(bbox, [2, 2], vec![1.0, 5.0, 5.0, 5.0]).unwrap();
        let report = limit_gradient(&mut grid, 0.1, 1);
        assert_eq!(report.passes, 1);
        assert!(!report.converged);
    }

    #[test]
    fn extension_contains_original_box() {
        let model = layered_model();
        let ext = 150.0;
        let field = SizingFieldBuilder::new(&model, options().with_domain_ext(ext, PadStyle::Edge))
            .build()
            .unwrap();
        let orig = field.original_bbox();
        let dom = field.domain();
        assert!(dom.strictly_contains(orig));
        // bottom and both sides extended by at least `ext`
        assert!(dom.min[0] <= orig.min[0] - ext);
        assert!(dom.min[1] <= orig.min[1] - ext);
        assert!(dom.max[1] >= orig.max[1] + ext);
        // free surface untouched
        assert_eq!(dom.max[0], orig.max[0]);

        let no_surface = SizingFieldBuilder::new(
            &model,
            options()
                .with_domain_ext(ext, PadStyle::Edge)
                .with_free_surface(false),
        )
        .build()
        .unwrap();
        assert!(no_surface.domain().max[0] >= orig.max[0] + ext);
    }

    #[test]
    fn constant_padding_is_uniform() {
        let model = block_model();
        let field = SizingFieldBuilder::new(&model, options().with_domain_ext(200.0, PadStyle::Constant))
            .build()
            .unwrap();
        let orig = *field.original_bbox();
        let grid = field.grid();
        let interior_max = (0..grid.len())
            .map(|f| grid.node_position(grid.flat_to_nd(f)))
            .filter(|p| orig.contains(p, 1e-9))
            .map(|p| field.at(&p))
            .fold(f64::NEG_INFINITY, f64::max);
        for flat in 0..grid.len() {
            let p = grid.node_position(grid.flat_to_nd(flat));
            if !orig.contains(&p, 1e-9) {
                assert_relative_eq!(grid.values()[flat], interior_max);
            }
        }
    }

    #[test]
    fn linear_ramp_grows_outward_to_hmax() {
        let model = layered_model();
        let field =
            SizingFieldBuilder::new(&model, options().with_domain_ext(500.0, PadStyle::LinearRamp))
                .build()
                .unwrap();
        let orig = *field.original_bbox();
        let dom = *field.domain();
        // walk outward to the right at mid depth
        let z = -500.0;
        let mut last = field.at(&na::Vector2::new(z, orig.max[1]));
        let steps = 20;
        for k in 1..=steps {
            let x = orig.max[1] + (dom.max[1] - orig.max[1]) * k as f64 / steps as f64;
            let h = field.at(&na::Vector2::new(z, x));
            assert!(h >= last - 1e-9, "size decreased outward: {h} < {last}");
            last = h;
        }
        assert_relative_eq!(last, 80.0, epsilon = 1e-9);
    }

    #[test]
    fn cfl_floor_raises_sizes() {
        let model = layered_model();
        // dt * v / cr_max = 0.02 * 1500 = 30 at the surface, 70 at the bottom
        let field = SizingFieldBuilder::new(
            &model,
            options().with_wavelength(10.0, 0.0).with_cfl(0.02, 1.0),
        )
        .build()
        .unwrap();
        assert_relative_eq!(field.at(&na::Vector2::new(0.0, 100.0)), 30.0, epsilon = 1e-9);
        assert_relative_eq!(field.at(&na::Vector2::new(-1000.0, 100.0)), 70.0, epsilon = 1e-9);
    }

    #[test]
    fn explicit_grid_shape_is_used() {
        let model = layered_model();
        let field = SizingFieldBuilder::new(&model, options().with_grid_shape(&[11, 5]))
            .build()
            .unwrap();
        assert_eq!(field.grid().shape(), [11, 5]);
    }

    #[test]
    fn export_and_load_round_trip() {
        let model = block_model();
        let field = SizingFieldBuilder::new(
            &model,
            options()
                .with_grade(0.1)
                .with_domain_ext(100.0, PadStyle::LinearRamp)
                .with_units(VelocityUnits::MetersPerSecond),
        )
        .build()
        .unwrap();
        let dir = tempfile::tempdir().unwrap();
        let stem = dir.path().join("sizing");
        field.export(&stem).unwrap();
        assert!(stem.with_extension("npy").exists());
        let back = SizingField::<2>::load(&stem).unwrap();
        assert_eq!(back, field);

        let err = SizingField::<3>::load(&stem).unwrap_err();
        assert!(matches!(
            err,
            MeshError::Configuration(ConfigurationError::UnsupportedDimension(2))
        ));
    }
}
