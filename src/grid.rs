//! Regular sample grids over a bounding box.
//!
//! Both the velocity model and the sizing field are stored this way:
//! `shape[i]` nodes along axis `i`, evenly spaced from `bbox.min[i]` to `bbox.max[i]`,
//! values in row-major order (last axis varies fastest).

use nalgebra as na;
use ndarray::{ArrayD, IxDyn};

use crate::domain::BoundingBox;
use crate::error::ConfigurationError;

/// A dense scalar grid with known physical extents.
#[derive(Clone, Debug, PartialEq)]
pub struct RegularGrid<const DIM: usize> {
    bbox: BoundingBox<DIM>,
    shape: [usize; DIM],
    strides: [usize; DIM],
    spacing: [f64; DIM],
    values: Vec<f64>,
}

impl<const DIM: usize> RegularGrid<DIM> {
    /// Create a grid from values in row-major order.
    ///
    /// # Errors
    /// Fails if any axis has no nodes
    /// or if the number of values does not match the shape.
    pub fn new(
        bbox: BoundingBox<DIM>,
        shape: [usize; DIM],
        values: Vec<f64>,
    ) -> Result<Self, ConfigurationError> {
        for (axis, &n) in shape.iter().enumerate() {
            if n == 0 {
                return Err(ConfigurationError::EmptyGridAxis { axis });
            }
        }
        let node_count: usize = shape.iter().product();
        if values.len() != node_count {
            return Err(ConfigurationError::ShapeMismatch {
                expected: shape.to_vec(),
                got: vec![values.len()],
            });
        }

        let mut strides = [1usize; DIM];
        for axis in (0..DIM.saturating_sub(1)).rev() {
            strides[axis] = strides[axis + 1] * shape[axis + 1];
        }
        let extent = bbox.extent();
        let spacing = std::array::from_fn(|axis| {
            // a single node along an axis has no neighbors on it,
            // so the spacing only matters for coordinates
            if shape[axis] > 1 {
                extent[axis] / (shape[axis] - 1) as f64
            } else {
                extent[axis]
            }
        });

        Ok(Self {
            bbox,
            shape,
            strides,
            spacing,
            values,
        })
    }

    /// Create a grid with every node set to `value`.
    pub fn filled(
        bbox: BoundingBox<DIM>,
        shape: [usize; DIM],
        value: f64,
    ) -> Result<Self, ConfigurationError> {
        let count = shape.iter().product();
        Self::new(bbox, shape, vec![value; count])
    }

    /// Create a grid from an `ndarray` array of matching dimensionality.
    ///
    /// A dimensionality mismatch is reported as a shape mismatch
    /// between the expected and actual number of axes.
    pub fn from_ndarray(
        bbox: BoundingBox<DIM>,
        array: ArrayD<f64>,
    ) -> Result<Self, ConfigurationError> {
        if array.ndim() != DIM {
            return Err(ConfigurationError::ShapeMismatch {
                expected: vec![DIM],
                got: vec![array.ndim()],
            });
        }
        let shape: [usize; DIM] = std::array::from_fn(|i| array.shape()[i]);
        // standard layout first so that raw data is row-major
        // even for Fortran-ordered inputs
        let values = array.as_standard_layout().iter().copied().collect();
        Self::new(bbox, shape, values)
    }

    /// Copy the values into an `ndarray` array.
    pub fn to_ndarray(&self) -> ArrayD<f64> {
        // shape and value count are validated on construction
        ArrayD::from_shape_vec(IxDyn(&self.shape), self.values.clone())
            .unwrap_or_else(|_| unreachable!("grid shape matches value count"))
    }

    /// Physical extents of the grid.
    #[inline]
    pub fn bbox(&self) -> &BoundingBox<DIM> {
        &self.bbox
    }

    /// Number of nodes along each axis.
    #[inline]
    pub fn shape(&self) -> [usize; DIM] {
        self.shape
    }

    /// Node spacing along each axis.
    #[inline]
    pub fn spacing(&self) -> [f64; DIM] {
        self.spacing
    }

    /// Total number of nodes.
    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the grid has no nodes (never true for a validated grid).
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Node values in row-major order.
    #[inline]
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    #[inline]
    pub(crate) fn values_mut(&mut self) -> &mut [f64] {
        &mut self.values
    }

    /// Row-major strides for index computation.
    #[inline]
    pub(crate) fn strides(&self) -> [usize; DIM] {
        self.strides
    }

    /// Convert an N-dimensional index to a flat index.
    #[inline]
    pub fn nd_to_flat(&self, idx: [usize; DIM]) -> usize {
        idx.iter().zip(&self.strides).map(|(i, s)| i * s).sum()
    }

    /// Convert a flat index to an N-dimensional index.
    #[inline]
    pub fn flat_to_nd(&self, mut flat: usize) -> [usize; DIM] {
        let mut idx = [0; DIM];
        for axis in 0..DIM {
            idx[axis] = flat / self.strides[axis];
            flat %= self.strides[axis];
        }
        idx
    }

    /// Value at an N-dimensional node index.
    #[inline]
    pub fn get(&self, idx: [usize; DIM]) -> f64 {
        self.values[self.nd_to_flat(idx)]
    }

    /// Physical position of a node.
    pub fn node_position(&self, idx: [usize; DIM]) -> na::SVector<f64, DIM> {
        na::SVector::from_fn(|axis, _| self.bbox.min[axis] + idx[axis] as f64 * self.spacing[axis])
    }

    /// Multilinear interpolation at an arbitrary point.
    ///
    /// Points outside the grid are clamped onto its boundary,
    /// so lookups never read out of bounds.
    pub fn interpolate(&self, p: &na::SVector<f64, DIM>) -> f64 {
        let mut base = [0usize; DIM];
        let mut frac = [0f64; DIM];
        for axis in 0..DIM {
            let n = self.shape[axis];
            if n == 1 {
                continue;
            }
            let t = ((p[axis] - self.bbox.min[axis]) / self.spacing[axis]).clamp(0.0, (n - 1) as f64);
            // the last cell owns its upper face
            let cell = (t.floor() as usize).min(n - 2);
            base[axis] = cell;
            frac[axis] = t - cell as f64;
        }

        let mut acc = 0.0;
        for corner in 0..1usize << DIM {
            let mut weight = 1.0;
            let mut flat = 0;
            for axis in 0..DIM {
                let upper = corner & (1 << axis) != 0;
                if self.shape[axis] == 1 {
                    if upper {
                        weight = 0.0;
                    }
                    continue;
                }
                let (w, i) = if upper {
                    (frac[axis], base[axis] + 1)
                } else {
                    (1.0 - frac[axis], base[axis])
                };
                weight *= w;
                flat += i * self.strides[axis];
            }
            if weight != 0.0 {
                acc += weight * self.values[flat];
            }
        }
        acc
    }

    /// Smallest node value.
    pub fn min_value(&self) -> f64 {
        self.values.iter().copied().fold(f64::INFINITY, f64::min)
    }

    /// Largest node value.
    pub fn max_value(&self) -> f64 {
        self.values.iter().copied().fold(f64::NEG_INFINITY, f64::max)
    }

    /// Visit the axis-aligned neighbor pairs `(a, b, distance)` of the grid,
    /// each pair once.
    pub fn for_each_adjacent_pair(&self, mut visit: impl FnMut(usize, usize, f64)) {
        for flat in 0..self.values.len() {
            let idx = self.flat_to_nd(flat);
            for axis in 0..DIM {
                if idx[axis] + 1 < self.shape[axis] {
                    visit(flat, flat + self.strides[axis], self.spacing[axis]);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn unit_box_2d() -> BoundingBox<2> {
        BoundingBox::from_pairs(&[0.0, 1.0, 0.0, 2.0]).unwrap()
    }

    #[test]
    fn index_round_trip() {
        let grid = RegularGrid::filled(unit_box_2d(), [3, 5], 0.0).unwrap();
        assert_eq!(grid.strides(), [5, 1]);
        for flat in 0..grid.len() {
            assert_eq!(grid.nd_to_flat(grid.flat_to_nd(flat)), flat);
        }
        assert_eq!(grid.spacing(), [0.5, 0.5]);
    }

    #[test]
    fn shape_mismatch_is_rejected() {
        let err = RegularGrid::new(unit_box_2d(), [2, 2], vec![1.0; 3]).unwrap_err();
        assert!(matches!(err, ConfigurationError::ShapeMismatch { .. }));
        let err = RegularGrid::new(unit_box_2d(), [0, 2], vec![]).unwrap_err();
        assert!(matches!(err, ConfigurationError::EmptyGridAxis { axis: 0 }));
    }

    #[test]
    fn interpolation_reproduces_linear_functions() {
        let bbox = unit_box_2d();
        let shape = [4, 6];
        let mut values = Vec::new();
        let layout = RegularGrid::filled(bbox, shape, 0.0).unwrap();
        for flat in 0..layout.len() {
            let p = layout.node_position(layout.flat_to_nd(flat));
            values.push(3.0 * p[0] - 2.0 * p[1] + 1.0);
        }
        let grid = RegularGrid::new(bbox, shape, values).unwrap();
        for p in [
            na::Vector2::new(0.1, 0.3),
            na::Vector2::new(0.77, 1.95),
            na::Vector2::new(1.0, 2.0),
        ] {
            assert_relative_eq!(grid.interpolate(&p), 3.0 * p[0] - 2.0 * p[1] + 1.0, epsilon = 1e-12);
        }
        // clamped outside
        let outside = grid.interpolate(&na::Vector2::new(-5.0, 10.0));
        assert_relative_eq!(outside, 3.0 * 0.0 - 2.0 * 2.0 + 1.0, epsilon = 1e-12);
    }

    #[test]
    fn single_node_axis_is_constant() {
        let bbox = BoundingBox::<2>::from_pairs(&[0.0, 1.0, 0.0, 1.0]).unwrap();
        let grid = RegularGrid::new(bbox, [1, 2], vec![1.0, 3.0]).unwrap();
        assert_relative_eq!(grid.interpolate(&na::Vector2::new(0.9, 0.5)), 2.0);
    }

    #[test]
    fn ndarray_round_trip() {
        let grid = RegularGrid::new(unit_box_2d(), [2, 3], (0..6).map(f64::from).collect()).unwrap();
        let arr = grid.to_ndarray();
        assert_eq!(arr.shape(), &[2, 3]);
        assert_eq!(arr[[1, 2]], 5.0);
        let back = RegularGrid::from_ndarray(unit_box_2d(), arr).unwrap();
        assert_eq!(back, grid);
    }

    #[test]
    fn adjacent_pairs_are_counted_once() {
        let grid = RegularGrid::filled(unit_box_2d(), [3, 4], 0.0).unwrap();
        let mut count = 0;
        grid.for_each_adjacent_pair(|_, _, _| count += 1);
        // 3 rows of 3 horizontal pairs + 4 columns of 2 vertical pairs
        assert_eq!(count, 3 * 3 + 4 * 2);
    }
}
