//! Simplex mesh generation for seismic velocity models.
//!
//! A [`SizingField`] is built from a [`VelocityField`]
//! so that element size follows the local wavelength,
//! then [`MeshGenerator`] (or [`DomainDecomposer`] across several ranks)
//! relaxes a point cloud against that field into a triangle or tetrahedron [`Mesh`].
//!
//! ```
//! use seismesh::{BoundingBox, GeneratorOptions, MeshGenerator, SizingOptions, VelocityField};
//!
//! # fn run() -> seismesh::Result<()> {
//! let bbox = [-1000.0, 0.0, 0.0, 1000.0];
//! let velocity = VelocityField::<2>::constant(BoundingBox::from_pairs(&bbox)?, 1500.0)?;
//! let sizing_options = SizingOptions::new(&bbox)
//!     .with_hmin(100.0)
//!     .with_wavelength(2.0, 5.0);
//! let sizing = seismesh::SizingFieldBuilder::new(&velocity, sizing_options).build()?;
//!
//! let generated = MeshGenerator::new(&sizing, GeneratorOptions::default().with_max_iter(20)).build()?;
//! assert!(generated.mesh.num_cells() > 0);
//! # Ok(())
//! # }
//! # run().expect("meshing failed");
//! ```

pub mod error;
pub use error::{
    CommunicationError, ConfigurationError, ConvergenceWarning, GeometryError, MeshError,
    PersistenceError, Result,
};

pub mod config;
pub use config::{GeneratorOptions, MeshConfig, SizingOptions};

pub mod domain;
pub use domain::{BoundingBox, PadStyle, Padding};

pub mod grid;
pub use grid::RegularGrid;

pub mod velocity;
pub use velocity::{NpyVelocityReader, VelocityField, VelocityReader, VelocityUnits};

pub mod sizing;
pub use sizing::{limit_gradient, SizingField, SizingFieldBuilder};

pub mod sampler;
pub use sampler::PointSampler;

pub mod geometry;

pub mod delaunay;
pub use delaunay::triangulate;

pub mod mesh;
pub use mesh::{Mesh, MeshDefect, QualityStats};

pub mod generator;
pub use generator::{GeneratedMesh, GenerationReport, GeneratorState, MeshGenerator};

pub mod decompose;
pub use decompose::{ChannelCommunicator, Communicator, DomainDecomposer};

pub mod improve;
pub use improve::{ImprovementReport, MeshQualityImprover};

pub mod gmsh;

/// A point in 2D space.
pub type Vec2 = nalgebra::SVector<f64, 2>;
/// A point in 3D space.
pub type Vec3 = nalgebra::SVector<f64, 3>;
