//! Reading and writing meshes in the [`gmsh`](https://www.gmsh.info/) `.msh` format.
//!
//! Only version 4.1 of the MSH format is supported,
//! as per the [`mshio`] library used for reading.
//! Files are written in ASCII with a single node block and a single element block.

use nalgebra as na;
use std::io::Write;
use std::path::Path;

use crate::error::{MeshError, PersistenceError};
use crate::mesh::Mesh;

/// Gmsh element type code of a first-order simplex.
fn element_code(dim: usize) -> u32 {
    match dim {
        2 => 2,
        _ => 4,
    }
}

/// Write `mesh` in MSH 4.1 ASCII format.
///
/// 2D points are written with a zero `z` coordinate.
/// Node and element tags are the 1-based point and cell indices.
pub fn write_msh<const DIM: usize>(
    mesh: &Mesh<DIM>,
    mut out: impl Write,
) -> Result<(), PersistenceError> {
    let np = mesh.num_points();
    let nc = mesh.num_cells();

    writeln!(out, "$MeshFormat\n4.1 0 8\n$EndMeshFormat")?;

    writeln!(out, "$Nodes")?;
    writeln!(out, "1 {np} 1 {np}")?;
    writeln!(out, "{DIM} 1 0 {np}")?;
    for tag in 1..=np {
        writeln!(out, "{tag}")?;
    }
    for p in mesh.points() {
        let z = if DIM == 3 { p[2] } else { 0.0 };
        writeln!(out, "{} {} {}", p[0], p[1], z)?;
    }
    writeln!(out, "$EndNodes")?;

    writeln!(out, "$Elements")?;
    writeln!(out, "1 {nc} 1 {nc}")?;
    writeln!(out, "{DIM} 1 {} {nc}", element_code(DIM))?;
    for (i, cell) in mesh.cell_iter().enumerate() {
        write!(out, "{}", i + 1)?;
        for v in cell {
            write!(out, " {}", v + 1)?;
        }
        writeln!(out)?;
    }
    writeln!(out, "$EndElements")?;
    out.flush()?;
    Ok(())
}

/// Write `mesh` to a `.msh` file at `path`.
pub fn save_msh<const DIM: usize>(
    mesh: &Mesh<DIM>,
    path: impl AsRef<Path>,
) -> Result<(), PersistenceError> {
    let file = std::fs::File::create(path)?;
    write_msh(mesh, std::io::BufWriter::new(file))
}

/// Load a 2D triangle mesh from `.msh` data.
///
/// First-order triangle elements in the file are interpreted as the triangles of the mesh.
/// These must be of type `Tri3` (see [`ElementType`][mshio::ElementType]).
/// The `z` coordinate of vertices is dropped to project the mesh to 2D space.
///
/// ```
/// # use seismesh::{gmsh, Mesh};
/// # fn roundtrip() -> Result<(), Box<dyn std::error::Error>> {
/// let points = vec![
///     nalgebra::Vector2::new(0.0, 0.0),
///     nalgebra::Vector2::new(1.0, 0.0),
///     nalgebra::Vector2::new(0.0, 1.0),
/// ];
/// let mesh = Mesh::new(points, vec![0, 1, 2])?;
/// let mut bytes = Vec::new();
/// gmsh::write_msh(&mesh, &mut bytes)?;
/// assert_eq!(gmsh::load_trimesh_2d(&bytes)?, mesh);
/// # Ok(())
/// # }
/// # roundtrip().expect("round trip failed");
/// ```
pub fn load_trimesh_2d(bytes: &[u8]) -> Result<Mesh<2>, MeshError> {
    load(bytes, mshio::ElementType::Tri3)
}

/// Load a 3D tetrahedral mesh from `.msh` data.
///
/// First-order tetrahedron elements in the file are interpreted as the tetrahedra of the mesh.
/// These must be of type `Tet4` (see [`ElementType`][mshio::ElementType]).
pub fn load_tetmesh_3d(bytes: &[u8]) -> Result<Mesh<3>, MeshError> {
    load(bytes, mshio::ElementType::Tet4)
}

fn load<const DIM: usize>(
    bytes: &[u8],
    element_type: mshio::ElementType,
) -> Result<Mesh<DIM>, MeshError> {
    let msh = mshio::parse_msh_bytes(bytes)
        .map_err(|e| PersistenceError::MshParse(format!("{}", e)))?;
    let nodes = msh.data.nodes.ok_or(PersistenceError::MissingNodes)?;
    let elements = msh.data.elements.ok_or(PersistenceError::MissingElements)?;

    let points: Vec<na::SVector<f64, DIM>> = nodes
        .node_blocks
        .iter()
        .flat_map(|block| block.nodes.iter())
        .map(|node| {
            let xyz = [node.x, node.y, node.z];
            na::SVector::from_fn(|i, _| xyz[i])
        })
        .collect();
    if points.is_empty() {
        return Err(PersistenceError::MissingNodes.into());
    }

    // node tags are taken to be sequential from 1, as written by `write_msh`
    let mut cells = Vec::new();
    for node_tag in elements
        .element_blocks
        .iter()
        .filter(|block| block.element_type == element_type)
        .flat_map(|block| block.elements.iter())
        .flat_map(|el| el.nodes.iter())
    {
        let index = (*node_tag as usize)
            .checked_sub(1)
            .ok_or_else(|| PersistenceError::MshParse(format!("invalid node tag {node_tag}")))?;
        cells.push(index);
    }
    if cells.is_empty() {
        return Err(PersistenceError::MissingElements.into());
    }

    Ok(Mesh::new(points, cells)?)
}
