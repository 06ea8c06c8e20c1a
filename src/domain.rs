//! Axis-aligned meshing domains and their extension by padding.
//!
//! Coordinates follow the seismic convention used throughout the crate:
//! axis 0 is depth (`z`, surface at the top of the box),
//! axis 1 is `x` and in 3D axis 2 is `y`.

use nalgebra as na;
use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;

/// An axis-aligned bounding box.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundingBox<const DIM: usize> {
    /// The minimum (deepest, leftmost) corner of the box.
    pub min: na::SVector<f64, DIM>,
    /// The maximum corner of the box.
    pub max: na::SVector<f64, DIM>,
}

impl<const DIM: usize> BoundingBox<DIM> {
    /// Create a box from its corners,
    /// failing if any axis has zero or negative extent.
    pub fn new(
        min: na::SVector<f64, DIM>,
        max: na::SVector<f64, DIM>,
    ) -> Result<Self, ConfigurationError> {
        for axis in 0..DIM {
            let (lo, hi) = (min[axis], max[axis]);
            if !lo.is_finite() || !hi.is_finite() || lo >= hi {
                return Err(ConfigurationError::InvalidExtent {
                    axis,
                    min: lo,
                    max: hi,
                });
            }
        }
        Ok(Self { min, max })
    }

    /// Create a box from `(min, max)` pairs per axis,
    /// e.g. `(zmin, zmax, xmin, xmax)` in 2D.
    pub fn from_pairs(values: &[f64]) -> Result<Self, ConfigurationError> {
        if values.len() != 2 * DIM {
            return Err(ConfigurationError::BoundingBoxArity {
                expected: 2 * DIM,
                got: values.len(),
            });
        }
        let min = na::SVector::from_fn(|i, _| values[2 * i]);
        let max = na::SVector::from_fn(|i, _| values[2 * i + 1]);
        Self::new(min, max)
    }

    /// The inverse of [`from_pairs`][Self::from_pairs].
    pub fn to_pairs(&self) -> Vec<f64> {
        (0..DIM).flat_map(|i| [self.min[i], self.max[i]]).collect()
    }

    /// Side lengths of the box.
    #[inline]
    pub fn extent(&self) -> na::SVector<f64, DIM> {
        self.max - self.min
    }

    /// Length of the box diagonal.
    #[inline]
    pub fn diameter(&self) -> f64 {
        self.extent().magnitude()
    }

    /// Midpoint of the box.
    #[inline]
    pub fn center(&self) -> na::SVector<f64, DIM> {
        0.5 * (self.min + self.max)
    }

    /// Whether `p` lies inside the box grown by `tol` on every side.
    pub fn contains(&self, p: &na::SVector<f64, DIM>, tol: f64) -> bool {
        (0..DIM).all(|i| p[i] >= self.min[i] - tol && p[i] <= self.max[i] + tol)
    }

    /// Whether `other` lies inside this box and the two are not identical.
    pub fn strictly_contains(&self, other: &Self) -> bool {
        (0..DIM).all(|i| self.min[i] <= other.min[i] && self.max[i] >= other.max[i])
            && (0..DIM).any(|i| self.min[i] < other.min[i] || self.max[i] > other.max[i])
    }

    /// Signed distance from `p` to the box surface, negative inside.
    pub fn signed_distance(&self, p: &na::SVector<f64, DIM>) -> f64 {
        let center = self.center();
        let half = 0.5 * self.extent();
        let q: na::SVector<f64, DIM> =
            na::SVector::from_fn(|i, _| (p[i] - center[i]).abs() - half[i]);
        let outside = q.map(|v| v.max(0.0)).magnitude();
        let inside = q.max().min(0.0);
        outside + inside
    }

    /// Nearest point of the closed box to `p`.
    ///
    /// Points already inside are returned unchanged.
    pub fn project(&self, p: &na::SVector<f64, DIM>) -> na::SVector<f64, DIM> {
        na::SVector::from_fn(|i, _| p[i].clamp(self.min[i], self.max[i]))
    }

    /// All `2^DIM` corners of the box,
    /// ordered with axis 0 varying fastest.
    pub fn corners(&self) -> Vec<na::SVector<f64, DIM>> {
        (0..1usize << DIM)
            .map(|mask| {
                na::SVector::from_fn(|i, _| {
                    if mask & (1 << i) == 0 {
                        self.min[i]
                    } else {
                        self.max[i]
                    }
                })
            })
            .collect()
    }

    /// Grow the box by the given padding widths.
    pub fn padded(&self, padding: &Padding<DIM>) -> Self {
        Self {
            min: self.min - na::SVector::from(padding.lower),
            max: self.max + na::SVector::from(padding.upper),
        }
    }
}

/// Fill profile for the region added by domain extension.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PadStyle {
    /// Repeat the boundary value outward along each grid line.
    #[default]
    Edge,
    /// Fill the whole padding with one uniform size,
    /// the largest size found in the unpadded field.
    Constant,
    /// Increase linearly from the boundary value to the size cap
    /// at the outer edge of the padding.
    LinearRamp,
}

impl std::str::FromStr for PadStyle {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "edge" => Ok(PadStyle::Edge),
            "constant" => Ok(PadStyle::Constant),
            "linear_ramp" => Ok(PadStyle::LinearRamp),
            other => Err(ConfigurationError::UnknownPadStyle(other.to_string())),
        }
    }
}

/// Widths added below and above the box on each axis.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Padding<const DIM: usize> {
    /// Width added below `min` per axis.
    pub lower: [f64; DIM],
    /// Width added above `max` per axis.
    pub upper: [f64; DIM],
}

impl<const DIM: usize> Padding<DIM> {
    /// No padding at all.
    pub fn none() -> Self {
        Self {
            lower: [0.0; DIM],
            upper: [0.0; DIM],
        }
    }

    /// Uniform padding of `width` on every side,
    /// except the top of the depth axis if `free_surface` is set.
    pub fn uniform(width: f64, free_surface: bool) -> Self {
        let mut upper = [width; DIM];
        if free_surface {
            upper[0] = 0.0;
        }
        Self {
            lower: [width; DIM],
            upper,
        }
    }

    /// Whether no side is padded.
    pub fn is_empty(&self) -> bool {
        self.lower.iter().chain(&self.upper).all(|w| *w <= 0.0)
    }
}
