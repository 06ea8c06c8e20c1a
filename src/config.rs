//! Configuration surface of the sizing field builder and the mesh generator.
//!
//! Options can be set in code with the `with_*` methods
//! or loaded from a TOML document:
//!
//! ```
//! # use seismesh::config::MeshConfig;
//! let config = MeshConfig::from_toml_str(r#"
//!     [sizing]
//!     bbox = [-10000.0, 0.0, 0.0, 10000.0]
//!     hmin = 100.0
//!     hmax = 1000.0
//!     grade = 0.005
//!     freq = 10.0
//!     wl = 5.0
//!     domain_ext = 1000.0
//!     padstyle = "linear_ramp"
//!
//!     [generator]
//!     max_iter = 100
//!     seed = 0
//! "#).unwrap();
//! assert_eq!(config.generator.max_iter, 100);
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::domain::{BoundingBox, PadStyle};
use crate::error::{ConfigurationError, MeshError};
use crate::velocity::VelocityUnits;

/// Options of the sizing field builder.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SizingOptions {
    /// Domain extents as `(min, max)` pairs per axis, depth axis first.
    pub bbox: Vec<f64>,
    /// Smallest allowed element size.
    pub hmin: f64,
    /// Largest allowed element size, unbounded if not set.
    pub hmax: Option<f64>,
    /// Largest allowed size gradient `|∇h|`; zero disables grading.
    pub grade: f64,
    /// Dominant source frequency in Hz.
    pub freq: f64,
    /// Number of elements per wavelength; zero gives a uniform `hmin` field.
    pub wl: f64,
    /// Width of the padding added around the domain.
    pub domain_ext: f64,
    /// Fill profile of the padding.
    pub padstyle: PadStyle,
    /// Simulation time step for the CFL size floor; zero disables it.
    pub dt: f64,
    /// Largest allowed Courant number for the CFL size floor.
    pub cr_max: f64,
    /// Units of the velocity samples, applied when sizes are computed.
    pub units: VelocityUnits,
    /// Keep the top of the depth axis unpadded.
    pub free_surface: bool,
    /// Node counts of the working grid (`nz, nx[, ny]`).
    /// Defaults to the shape of the velocity grid.
    pub grid_shape: Option<Vec<usize>>,
    /// Cap on the number of grading sweeps.
    pub max_grade_passes: usize,
}

impl Default for SizingOptions {
    fn default() -> Self {
        Self {
            bbox: Vec::new(),
            hmin: 100.0,
            hmax: None,
            grade: 0.0,
            freq: 5.0,
            wl: 0.0,
            domain_ext: 0.0,
            padstyle: PadStyle::Edge,
            dt: 0.0,
            cr_max: 1.0,
            units: VelocityUnits::MetersPerSecond,
            free_surface: true,
            grid_shape: None,
            max_grade_passes: 1000,
        }
    }
}

impl SizingOptions {
    /// Options for the given domain extents with everything else defaulted.
    pub fn new(bbox: &[f64]) -> Self {
        Self {
            bbox: bbox.to_vec(),
            ..Default::default()
        }
    }

    /// Set the smallest element size.
    pub fn with_hmin(mut self, hmin: f64) -> Self {
        self.hmin = hmin;
        self
    }

    /// Set the largest element size.
    pub fn with_hmax(mut self, hmax: f64) -> Self {
        self.hmax = Some(hmax);
        self
    }

    /// Set the grading limit.
    pub fn with_grade(mut self, grade: f64) -> Self {
        self.grade = grade;
        self
    }

    /// Set the frequency and elements-per-wavelength of the sizing formula.
    pub fn with_wavelength(mut self, freq: f64, wl: f64) -> Self {
        self.freq = freq;
        self.wl = wl;
        self
    }

    /// Set the domain extension width and padding profile.
    pub fn with_domain_ext(mut self, domain_ext: f64, padstyle: PadStyle) -> Self {
        self.domain_ext = domain_ext;
        self.padstyle = padstyle;
        self
    }

    /// Enable the CFL size floor.
    pub fn with_cfl(mut self, dt: f64, cr_max: f64) -> Self {
        self.dt = dt;
        self.cr_max = cr_max;
        self
    }

    /// Set the velocity units.
    pub fn with_units(mut self, units: VelocityUnits) -> Self {
        self.units = units;
        self
    }

    /// Set whether the top of the depth axis is left unpadded.
    pub fn with_free_surface(mut self, free_surface: bool) -> Self {
        self.free_surface = free_surface;
        self
    }

    /// Set the working grid shape.
    pub fn with_grid_shape(mut self, shape: &[usize]) -> Self {
        self.grid_shape = Some(shape.to_vec());
        self
    }

    /// The size cap as a number, infinite if unbounded.
    #[inline]
    pub fn hmax_value(&self) -> f64 {
        self.hmax.unwrap_or(f64::INFINITY)
    }

    /// Check every option and return the validated domain.
    pub fn validate<const DIM: usize>(&self) -> Result<BoundingBox<DIM>, ConfigurationError> {
        if DIM != 2 && DIM != 3 {
            return Err(ConfigurationError::UnsupportedDimension(DIM));
        }
        let bbox = BoundingBox::from_pairs(&self.bbox)?;
        positive("hmin", self.hmin)?;
        if let Some(hmax) = self.hmax {
            positive("hmax", hmax)?;
            if self.hmin > hmax {
                return Err(ConfigurationError::SizeBoundsInverted {
                    hmin: self.hmin,
                    hmax,
                });
            }
        }
        non_negative("grade", self.grade)?;
        non_negative("wl", self.wl)?;
        if self.wl > 0.0 {
            positive("freq", self.freq)?;
        }
        non_negative("domain_ext", self.domain_ext)?;
        non_negative("dt", self.dt)?;
        if self.dt > 0.0 {
            positive("cr_max", self.cr_max)?;
        }
        if let Some(shape) = &self.grid_shape {
            if shape.len() != DIM {
                return Err(ConfigurationError::ShapeMismatch {
                    expected: vec![DIM],
                    got: vec![shape.len()],
                });
            }
            if let Some(axis) = shape.iter().position(|n| *n == 0) {
                return Err(ConfigurationError::EmptyGridAxis { axis });
            }
        }
        Ok(bbox)
    }
}

/// Options of the mesh generator and the optional quality improvement pass.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorOptions {
    /// Iteration cap of the relaxation loop.
    /// Also caps improvement passes unless `improvement_max_iter` is set.
    pub max_iter: usize,
    /// Seed of the initial point sampling.
    pub seed: u64,
    /// Progress is logged every `nscreen` iterations. No effect on results.
    pub nscreen: usize,
    /// Axis along which the domain is split in parallel runs.
    pub axis: usize,
    /// Run the quality improvement pass after relaxation.
    pub mesh_improvement: bool,
    /// Smallest acceptable dihedral angle in degrees.
    pub min_dh_bound: f64,
    /// Largest acceptable dihedral angle in degrees.
    pub max_dh_bound: f64,
    /// Separate cap on improvement passes.
    pub improvement_max_iter: Option<usize>,
    /// Extra points that never move, one coordinate list per point.
    pub fixed_points: Vec<Vec<f64>>,
    /// Convergence tolerance on displacement relative to the local size.
    pub tolerance: f64,
    /// Displacement since the last triangulation, relative to `hmin`,
    /// that triggers a new triangulation.
    pub retriangulation_tolerance: f64,
    /// Triangulation is also refreshed at least this often.
    pub retriangulation_period: usize,
    /// Pseudo time step of the spring relaxation.
    pub time_step: f64,
    /// Points on overly short edges are culled this often; zero disables culling.
    pub density_control_period: usize,
}

impl Default for GeneratorOptions {
    fn default() -> Self {
        Self {
            max_iter: 50,
            seed: 0,
            nscreen: 5,
            axis: 0,
            mesh_improvement: false,
            min_dh_bound: 10.0,
            max_dh_bound: 170.0,
            improvement_max_iter: None,
            fixed_points: Vec::new(),
            tolerance: 1e-3,
            retriangulation_tolerance: 0.1,
            retriangulation_period: 10,
            time_step: 0.1,
            density_control_period: 30,
        }
    }
}

impl GeneratorOptions {
    /// Set the iteration cap.
    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    /// Set the sampling seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Set the progress report interval.
    pub fn with_nscreen(mut self, nscreen: usize) -> Self {
        self.nscreen = nscreen;
        self
    }

    /// Set the parallel decomposition axis.
    pub fn with_axis(mut self, axis: usize) -> Self {
        self.axis = axis;
        self
    }

    /// Enable quality improvement with the given minimum dihedral angle in degrees.
    pub fn with_mesh_improvement(mut self, min_dh_bound: f64) -> Self {
        self.mesh_improvement = true;
        self.min_dh_bound = min_dh_bound;
        self
    }

    /// Set extra fixed points.
    pub fn with_fixed_points(mut self, points: Vec<Vec<f64>>) -> Self {
        self.fixed_points = points;
        self
    }

    /// Number of improvement passes to run.
    #[inline]
    pub fn improvement_passes(&self) -> usize {
        self.improvement_max_iter.unwrap_or(self.max_iter)
    }

    /// Check the options for a `DIM`-dimensional run.
    pub fn validate<const DIM: usize>(&self) -> Result<(), ConfigurationError> {
        if self.axis >= DIM {
            return Err(ConfigurationError::InvalidAxis {
                axis: self.axis,
                dim: DIM,
            });
        }
        positive("tolerance", self.tolerance)?;
        positive("retriangulation_tolerance", self.retriangulation_tolerance)?;
        positive("time_step", self.time_step)?;
        if !(0.0 < self.min_dh_bound
            && self.min_dh_bound < self.max_dh_bound
            && self.max_dh_bound < 180.0)
        {
            return Err(ConfigurationError::InvalidAngleBounds {
                min: self.min_dh_bound,
                max: self.max_dh_bound,
            });
        }
        for (index, p) in self.fixed_points.iter().enumerate() {
            if p.len() != DIM {
                return Err(ConfigurationError::ShapeMismatch {
                    expected: vec![DIM],
                    got: vec![p.len()],
                });
            }
            if p.iter().any(|c| !c.is_finite()) {
                return Err(ConfigurationError::FixedPointOutside { index });
            }
        }
        Ok(())
    }
}

/// Complete configuration of one mesh generation run.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshConfig {
    /// Sizing field options.
    pub sizing: SizingOptions,
    /// Generator options.
    pub generator: GeneratorOptions,
}

impl MeshConfig {
    /// Parse a configuration from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigurationError> {
        toml::from_str(text).map_err(|e| ConfigurationError::Parse(e.to_string()))
    }

    /// Read and parse a TOML configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, MeshError> {
        let text = std::fs::read_to_string(path)?;
        Ok(Self::from_toml_str(&text)?)
    }
}

fn positive(name: &'static str, value: f64) -> Result<(), ConfigurationError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigurationError::NotPositive { name, value })
    }
}

fn non_negative(name: &'static str, value: f64) -> Result<(), ConfigurationError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ConfigurationError::Negative { name, value })
    }
}
