//! Velocity models: a dense grid of wave speeds over the physical domain.
//!
//! Decoding of model files (SEG-Y and friends) happens outside this crate.
//! Anything that can produce an `ndarray` array can feed a model in
//! through the [`VelocityReader`] trait.

use std::path::{Path, PathBuf};

use nalgebra as na;
use ndarray::ArrayD;
use serde::{Deserialize, Serialize};

use crate::domain::BoundingBox;
use crate::error::{ConfigurationError, MeshError, PersistenceError};
use crate::grid::RegularGrid;

/// Units the raw velocity samples are given in.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum VelocityUnits {
    /// Meters per second.
    #[default]
    #[serde(rename = "m-s")]
    MetersPerSecond,
    /// Kilometers per second, converted to m/s when sizes are computed.
    #[serde(rename = "km-s")]
    KilometersPerSecond,
}

impl VelocityUnits {
    /// Factor converting a sample in these units to m/s.
    #[inline]
    pub fn to_meters_per_second(self) -> f64 {
        match self {
            VelocityUnits::MetersPerSecond => 1.0,
            VelocityUnits::KilometersPerSecond => 1000.0,
        }
    }
}

impl std::str::FromStr for VelocityUnits {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "m-s" => Ok(VelocityUnits::MetersPerSecond),
            "km-s" => Ok(VelocityUnits::KilometersPerSecond),
            other => Err(ConfigurationError::UnknownUnits(other.to_string())),
        }
    }
}

/// Source of raw velocity samples.
///
/// The returned array must have one axis per spatial dimension,
/// ordered like the bounding box (depth first).
pub trait VelocityReader {
    /// Read the whole model into memory.
    fn read(&self) -> Result<ArrayD<f64>, MeshError>;
}

/// Reads a velocity model stored as a NumPy `.npy` array of `f64` or `f32`.
#[derive(Clone, Debug)]
pub struct NpyVelocityReader {
    path: PathBuf,
}

impl NpyVelocityReader {
    /// Create a reader for the file at `path`.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl VelocityReader for NpyVelocityReader {
    fn read(&self) -> Result<ArrayD<f64>, MeshError> {
        match ndarray_npy::read_npy::<_, ArrayD<f64>>(&self.path) {
            Ok(arr) => Ok(arr),
            Err(_) => {
                // single precision models are common, promote them
                let arr32: ArrayD<f32> =
                    ndarray_npy::read_npy(&self.path).map_err(PersistenceError::from)?;
                Ok(arr32.mapv(f64::from))
            }
        }
    }
}

/// A dense velocity model with known physical extents.
///
/// Samples are kept as given; [`SizingOptions::units`](crate::SizingOptions::units)
/// says how to read them when a sizing field is built.
/// Lookups interpolate multilinearly between grid nodes
/// and clamp to the boundary outside the model.
#[derive(Clone, Debug, PartialEq)]
pub struct VelocityField<const DIM: usize> {
    grid: RegularGrid<DIM>,
}

impl<const DIM: usize> VelocityField<DIM> {
    /// Wrap a grid of velocity samples.
    ///
    /// # Errors
    /// Fails if any sample is not positive and finite.
    pub fn new(grid: RegularGrid<DIM>) -> Result<Self, ConfigurationError> {
        if DIM != 2 && DIM != 3 {
            return Err(ConfigurationError::UnsupportedDimension(DIM));
        }
        for (index, &value) in grid.values().iter().enumerate() {
            if !value.is_finite() || value <= 0.0 {
                return Err(ConfigurationError::InvalidVelocity { index, value });
            }
        }
        Ok(Self { grid })
    }

    /// Build a model from an array covering `bbox`.
    pub fn from_array(bbox: BoundingBox<DIM>, array: ArrayD<f64>) -> Result<Self, ConfigurationError> {
        Self::new(RegularGrid::from_ndarray(bbox, array)?)
    }

    /// Build a model from an external reader.
    ///
    /// If `expected_shape` is given, the array read must have exactly that shape
    /// (grid counts `nz, nx[, ny]` from the configuration).
    pub fn from_reader(
        reader: &impl VelocityReader,
        bbox: BoundingBox<DIM>,
        expected_shape: Option<[usize; DIM]>,
    ) -> Result<Self, MeshError> {
        let array = reader.read()?;
        if let Some(expected) = expected_shape {
            if array.shape() != expected.as_slice() {
                return Err(ConfigurationError::ShapeMismatch {
                    expected: expected.to_vec(),
                    got: array.shape().to_vec(),
                }
                .into());
            }
        }
        Ok(Self::from_array(bbox, array)?)
    }

    /// A homogeneous model with the same velocity everywhere.
    pub fn constant(bbox: BoundingBox<DIM>, velocity: f64) -> Result<Self, ConfigurationError> {
        Self::new(RegularGrid::filled(bbox, [2; DIM], velocity)?)
    }

    /// A model where velocity varies only with depth (axis 0),
    /// sampled at `samples` nodes by the function `v(z)`.
    pub fn depth_profile(
        bbox: BoundingBox<DIM>,
        samples: usize,
        v: impl Fn(f64) -> f64,
    ) -> Result<Self, ConfigurationError> {
        let mut shape = [2; DIM];
        shape[0] = samples;
        let mut grid = RegularGrid::filled(bbox, shape, 0.0)?;
        for flat in 0..grid.len() {
            let z = grid.node_position(grid.flat_to_nd(flat))[0];
            grid.values_mut()[flat] = v(z);
        }
        Self::new(grid)
    }

    /// Velocity sample interpolated at a point.
    #[inline]
    pub fn at(&self, p: &na::SVector<f64, DIM>) -> f64 {
        self.grid.interpolate(p)
    }

    /// The underlying sample grid.
    #[inline]
    pub fn grid(&self) -> &RegularGrid<DIM> {
        &self.grid
    }

    /// Physical extents of the model.
    #[inline]
    pub fn bbox(&self) -> &BoundingBox<DIM> {
        self.grid.bbox()
    }
}
