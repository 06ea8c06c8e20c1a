//! Error types and non-fatal diagnostics.
//!
//! Configuration and geometry problems are errors and surface immediately.
//! Running out of iterations is not an error;
//! it is reported as a [`ConvergenceWarning`] attached to the returned mesh.

use std::fmt;

/// Invalid combination of options, detected before any computation starts.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ConfigurationError {
    /// An axis of the bounding box has zero or negative extent.
    #[error("invalid extent on axis {axis}: min {min} must be less than max {max}")]
    InvalidExtent {
        /// The axis index.
        axis: usize,
        /// Lower bound given for the axis.
        min: f64,
        /// Upper bound given for the axis.
        max: f64,
    },
    /// The bounding box was given with the wrong number of values.
    #[error("bounding box needs {expected} values (min/max per axis), got {got}")]
    BoundingBoxArity {
        /// Expected number of values.
        expected: usize,
        /// Number of values given.
        got: usize,
    },
    /// `hmin` is larger than `hmax`.
    #[error("hmin {hmin} is larger than hmax {hmax}")]
    SizeBoundsInverted {
        /// The minimum size given.
        hmin: f64,
        /// The maximum size given.
        hmax: f64,
    },
    /// A scalar option that must be positive and finite was not.
    #[error("option `{name}` must be positive and finite, got {value}")]
    NotPositive {
        /// The option name.
        name: &'static str,
        /// The value given.
        value: f64,
    },
    /// A scalar option that must be non-negative and finite was not.
    #[error("option `{name}` must be non-negative and finite, got {value}")]
    Negative {
        /// The option name.
        name: &'static str,
        /// The value given.
        value: f64,
    },
    /// A velocity sample is not positive and finite.
    #[error("invalid velocity at index {index}: {value} (must be positive and finite)")]
    InvalidVelocity {
        /// Flat index of the sample.
        index: usize,
        /// The offending value.
        value: f64,
    },
    /// Array shape does not match what the configuration describes.
    #[error("shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        /// The expected shape.
        expected: Vec<usize>,
        /// The shape encountered.
        got: Vec<usize>,
    },
    /// A grid axis has no samples.
    #[error("grid axis {axis} has no samples")]
    EmptyGridAxis {
        /// The axis index.
        axis: usize,
    },
    /// Unrecognized padding style name.
    #[error("unknown pad style `{0}` (expected `edge`, `constant` or `linear_ramp`)")]
    UnknownPadStyle(String),
    /// Unrecognized velocity unit name.
    #[error("unknown velocity units `{0}` (expected `m-s` or `km-s`)")]
    UnknownUnits(String),
    /// Decomposition axis is not an axis of the domain.
    #[error("decomposition axis {axis} is out of range for a {dim}-dimensional domain")]
    InvalidAxis {
        /// The axis given.
        axis: usize,
        /// Dimension of the domain.
        dim: usize,
    },
    /// Dihedral angle bounds must satisfy `0 < min < max < 180`.
    #[error("invalid dihedral angle bounds [{min}, {max}] (need 0 < min < max < 180 degrees)")]
    InvalidAngleBounds {
        /// The lower bound given, in degrees.
        min: f64,
        /// The upper bound given, in degrees.
        max: f64,
    },
    /// A fixed point lies outside the meshing domain.
    #[error("fixed point {index} lies outside the domain")]
    FixedPointOutside {
        /// Index of the point in the fixed point list.
        index: usize,
    },
    /// Only 2- and 3-dimensional meshes are supported.
    #[error("unsupported dimension {0} (only 2 and 3 are supported)")]
    UnsupportedDimension(usize),
    /// The TOML configuration could not be parsed.
    #[error("invalid configuration file: {0}")]
    Parse(String),
}

/// Invalid geometric input to the triangulator.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum GeometryError {
    /// Two input points are closer than the coincidence tolerance.
    #[error("points {first} and {second} coincide")]
    CoincidentPoints {
        /// The earlier point in input order.
        first: usize,
        /// The later point in input order.
        second: usize,
    },
    /// All input points lie in a lower-dimensional subspace.
    #[error("points are degenerate (collinear or coplanar); no simplex could be formed")]
    Degenerate,
    /// Not enough points to form a single simplex.
    #[error("{count} points given, at least {required} are needed")]
    TooFewPoints {
        /// Number of points given.
        count: usize,
        /// Minimum number needed.
        required: usize,
    },
    /// A point or coordinate is not finite.
    #[error("point {0} has a non-finite coordinate")]
    NonFinite(usize),
    /// Point location or cavity construction could not make progress.
    #[error("failed to insert point {0} into the triangulation")]
    InsertionFailed(usize),
    /// A cell refers to a point that does not exist.
    #[error("vertex index {index} is out of range for {len} points")]
    IndexOutOfRange {
        /// The offending index.
        index: usize,
        /// Number of points.
        len: usize,
    },
    /// The cell index list is not a whole number of cells.
    #[error("{len} cell indices do not divide into cells of {simplex_size}")]
    IncompleteCell {
        /// Length of the index list.
        len: usize,
        /// Vertices per cell.
        simplex_size: usize,
    },
}

/// Failure in rank-to-rank communication. Always fatal for the whole run.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CommunicationError {
    /// A peer rank has hung up.
    #[error("rank {peer} disconnected")]
    Disconnected {
        /// The rank that went away.
        peer: usize,
    },
    /// A message arrived out of protocol order.
    #[error("desynchronized with rank {peer}: expected {expected}, got {got}")]
    Desync {
        /// The rank the message came from.
        peer: usize,
        /// Tag the protocol expected.
        expected: String,
        /// Tag that actually arrived.
        got: String,
    },
    /// A rank index is outside the communicator.
    #[error("rank {rank} is out of range for a world of size {size}")]
    InvalidRank {
        /// The rank given.
        rank: usize,
        /// World size.
        size: usize,
    },
    /// A payload did not have the expected layout.
    #[error("malformed payload from rank {peer}: {reason}")]
    Malformed {
        /// The sending rank.
        peer: usize,
        /// What was wrong with it.
        reason: String,
    },
}

/// Failure reading or writing a persisted artifact.
#[derive(thiserror::Error, Debug)]
pub enum PersistenceError {
    /// Underlying file system error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Error writing a `.npy` array.
    #[error("npy write failed: {0}")]
    NpyWrite(#[from] ndarray_npy::WriteNpyError),
    /// Error reading a `.npy` array.
    #[error("npy read failed: {0}")]
    NpyRead(#[from] ndarray_npy::ReadNpyError),
    /// Error in the JSON metadata sidecar.
    #[error("metadata error: {0}")]
    Metadata(#[from] serde_json::Error),
    /// Error parsing a `.msh` file.
    ///
    /// (parser error converted to string
    /// to avoid lifetime issues with the byte slices it contains)
    #[error("parsing the .msh data failed: {0}")]
    MshParse(String),
    /// The `.msh` file has no nodes.
    #[error("invalid .msh data: no nodes")]
    MissingNodes,
    /// The `.msh` file has no elements of the requested type.
    #[error("invalid .msh data: no elements of the correct type")]
    MissingElements,
}

/// Top-level error of the mesh generation pipeline.
#[derive(thiserror::Error, Debug)]
pub enum MeshError {
    /// See [`ConfigurationError`].
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    /// See [`GeometryError`].
    #[error(transparent)]
    Geometry(#[from] GeometryError),
    /// See [`CommunicationError`].
    #[error(transparent)]
    Communication(#[from] CommunicationError),
    /// See [`PersistenceError`].
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

impl From<std::io::Error> for MeshError {
    fn from(e: std::io::Error) -> Self {
        MeshError::Persistence(PersistenceError::Io(e))
    }
}

/// Convenience alias for results of the mesh generation pipeline.
pub type Result<T> = std::result::Result<T, MeshError>;

/// A non-fatal condition attached to a returned mesh.
#[derive(Clone, Debug, PartialEq)]
pub enum ConvergenceWarning {
    /// Relaxation stopped at the iteration cap without meeting the tolerance.
    MaxIterReached {
        /// Number of iterations run.
        iterations: usize,
        /// Largest relative displacement in the final iteration.
        max_displacement: f64,
    },
    /// Quality improvement ran out of passes with elements still out of bounds.
    ResidualViolations {
        /// Number of repair passes run.
        passes: usize,
        /// Simplices still violating the dihedral angle bounds.
        remaining: usize,
        /// Smallest dihedral angle in the mesh, in degrees.
        min_dihedral: f64,
    },
}

impl fmt::Display for ConvergenceWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConvergenceWarning::MaxIterReached {
                iterations,
                max_displacement,
            } => write!(
                f,
                "relaxation reached {} iterations without converging (max displacement {:.3e})",
                iterations, max_displacement
            ),
            ConvergenceWarning::ResidualViolations {
                passes,
                remaining,
                min_dihedral,
            } => write!(
                f,
                "{} simplices still violate the dihedral bounds after {} passes (min angle {:.2} deg)",
                remaining, passes, min_dihedral
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_inverted_bounds() {
        let e = ConfigurationError::SizeBoundsInverted {
            hmin: 10.0,
            hmax: 5.0,
        };
        assert_eq!(e.to_string(), "hmin 10 is larger than hmax 5");
    }

    #[test]
    fn display_coincident() {
        let e = GeometryError::CoincidentPoints {
            first: 3,
            second: 7,
        };
        assert_eq!(e.to_string(), "points 3 and 7 coincide");
    }

    #[test]
    fn configuration_error_converts_into_mesh_error() {
        let e: MeshError = ConfigurationError::UnsupportedDimension(4).into();
        assert!(matches!(
            e,
            MeshError::Configuration(ConfigurationError::UnsupportedDimension(4))
        ));
        assert!(e.to_string().contains("unsupported dimension 4"));
    }

    #[test]
    fn io_error_converts_into_persistence() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let e: MeshError = io.into();
        assert!(matches!(e, MeshError::Persistence(PersistenceError::Io(_))));
    }

    #[test]
    fn warning_display_mentions_counts() {
        let w = ConvergenceWarning::ResidualViolations {
            passes: 4,
            remaining: 12,
            min_dihedral: 3.5,
        };
        let s = w.to_string();
        assert!(s.contains("12"));
        assert!(s.contains("4 passes"));
    }
}
