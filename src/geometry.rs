//! Small dense linear algebra and simplex geometry.
//!
//! Everything here works on a single simplex given as a slice of `DIM + 1` vertices.
//! The matrices involved are at most 3x3,
//! so they are kept on the stack as plain arrays
//! and solved with Gaussian elimination.

use nalgebra as na;

/// Determinant of a square matrix given as rows.
pub(crate) fn det<const N: usize>(mut m: [[f64; N]; N]) -> f64 {
    let mut det = 1.0;
    for col in 0..N {
        // partial pivoting
        let Some(pivot) = (col..N).max_by(|a, b| m[*a][col].abs().total_cmp(&m[*b][col].abs()))
        else {
            return 1.0;
        };
        if m[pivot][col] == 0.0 {
            return 0.0;
        }
        if pivot != col {
            m.swap(pivot, col);
            det = -det;
        }
        det *= m[col][col];
        for row in col + 1..N {
            let factor = m[row][col] / m[col][col];
            for k in col..N {
                m[row][k] -= factor * m[col][k];
            }
        }
    }
    det
}

/// Solve `m x = b`. Returns `None` if `m` is singular.
pub(crate) fn solve<const N: usize>(mut m: [[f64; N]; N], mut b: [f64; N]) -> Option<[f64; N]> {
    for col in 0..N {
        let pivot = (col..N).max_by(|a, b| m[*a][col].abs().total_cmp(&m[*b][col].abs()))?;
        if m[pivot][col] == 0.0 || !m[pivot][col].is_finite() {
            return None;
        }
        m.swap(pivot, col);
        b.swap(pivot, col);
        for row in col + 1..N {
            let factor = m[row][col] / m[col][col];
            for k in col..N {
                m[row][k] -= factor * m[col][k];
            }
            b[row] -= factor * b[col];
        }
    }
    let mut x = [0.0; N];
    for row in (0..N).rev() {
        let tail: f64 = (row + 1..N).map(|k| m[row][k] * x[k]).sum();
        x[row] = (b[row] - tail) / m[row][row];
    }
    x.iter().all(|v| v.is_finite()).then_some(x)
}

/// Edge vectors from the first vertex, as matrix rows.
#[inline]
fn edge_matrix<const DIM: usize>(verts: &[na::SVector<f64, DIM>]) -> [[f64; DIM]; DIM] {
    std::array::from_fn(|row| std::array::from_fn(|col| verts[row + 1][col] - verts[0][col]))
}

/// `DIM!` times the signed volume of a simplex.
///
/// Positive when the vertices are in counterclockwise (2D)
/// or right-handed (3D) order.
#[inline]
pub fn orientation<const DIM: usize>(verts: &[na::SVector<f64, DIM>]) -> f64 {
    debug_assert_eq!(verts.len(), DIM + 1);
    det(edge_matrix(verts))
}

/// Signed volume of a simplex.
pub fn signed_volume<const DIM: usize>(verts: &[na::SVector<f64, DIM>]) -> f64 {
    let factorial: usize = (1..=DIM).product();
    orientation(verts) / factorial as f64
}

/// Average of the vertices.
pub fn centroid<const DIM: usize>(verts: &[na::SVector<f64, DIM>]) -> na::SVector<f64, DIM> {
    verts.iter().fold(na::SVector::zeros(), |acc, v| acc + v) / verts.len() as f64
}

/// Center and squared radius of the circumsphere,
/// or `None` for a degenerate simplex.
pub fn circumsphere<const DIM: usize>(
    verts: &[na::SVector<f64, DIM>],
) -> Option<(na::SVector<f64, DIM>, f64)> {
    // |c - v_i|^2 = |c - v_0|^2 for every i,
    // which with c = v_0 + x becomes 2 (v_i - v_0) . x = |v_i - v_0|^2
    let edges = edge_matrix(verts);
    let m = edges.map(|row| row.map(|v| 2.0 * v));
    let rhs = edges.map(|row| row.iter().map(|v| v * v).sum::<f64>());
    let x = na::SVector::from(solve(m, rhs)?);
    Some((verts[0] + x, x.norm_squared()))
}

/// Gradients of the barycentric coordinate functions of each vertex.
///
/// `∇λ_i` is normal to the facet opposite vertex `i`, pointing towards the vertex,
/// with magnitude one over the vertex's height above that facet.
/// Returns `None` for a degenerate simplex.
pub fn barycentric_gradients<const DIM: usize>(
    verts: &[na::SVector<f64, DIM>],
) -> Option<Vec<na::SVector<f64, DIM>>> {
    // with E the matrix of edge rows, x - v_0 = E^T λ,
    // so the gradient of λ_i is column i of E^-1
    let edges = edge_matrix(verts);
    let mut grads = Vec::with_capacity(DIM + 1);
    grads.push(na::SVector::zeros());
    for i in 0..DIM {
        let unit = std::array::from_fn(|k| if k == i { 1.0 } else { 0.0 });
        grads.push(na::SVector::from(solve(edges, unit)?));
    }
    grads[0] = -grads[1..].iter().fold(na::SVector::zeros(), |acc, g| acc + g);
    Some(grads)
}

/// Interior angles between each pair of facets, in degrees.
///
/// In 3D these are the six dihedral angles of a tetrahedron;
/// in 2D the same formula gives the three corner angles of a triangle.
/// The angle between the facets opposite vertices `i` and `j` is
/// `acos(-∇λ_i · ∇λ_j / (|∇λ_i| |∇λ_j|))`.
pub fn dihedral_angles<const DIM: usize>(verts: &[na::SVector<f64, DIM>]) -> Option<Vec<f64>> {
    let grads = barycentric_gradients(verts)?;
    let mut angles = Vec::with_capacity(DIM * (DIM + 1) / 2);
    for i in 0..=DIM {
        for j in i + 1..=DIM {
            let cos = -grads[i].dot(&grads[j]) / (grads[i].norm() * grads[j].norm());
            angles.push(cos.clamp(-1.0, 1.0).acos().to_degrees());
        }
    }
    Some(angles)
}

/// Smallest and largest dihedral angle of a simplex in degrees.
/// A degenerate simplex gives `(0, 180)`.
pub fn dihedral_range<const DIM: usize>(verts: &[na::SVector<f64, DIM>]) -> (f64, f64) {
    match dihedral_angles(verts) {
        Some(angles) => angles
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), a| {
                (lo.min(*a), hi.max(*a))
            }),
        None => (0.0, 180.0),
    }
}

/// Normalized radius ratio `DIM * r_in / r_circ`:
/// one for a regular simplex, zero for a degenerate one.
pub fn radius_ratio<const DIM: usize>(verts: &[na::SVector<f64, DIM>]) -> f64 {
    let (Some(grads), Some((_, r2))) = (barycentric_gradients(verts), circumsphere(verts)) else {
        return 0.0;
    };
    // facet area_i = DIM * V * |∇λ_i| and r_in = DIM * V / Σ area_i
    let inradius = 1.0 / grads.iter().map(|g| g.norm()).sum::<f64>();
    DIM as f64 * inradius / r2.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    type Vec2 = na::Vector2<f64>;
    type Vec3 = na::Vector3<f64>;

    fn equilateral() -> [Vec2; 3] {
        [
            Vec2::new(0.0, 0.0),
            Vec2::new(1.0, 0.0),
            Vec2::new(0.5, 0.75f64.sqrt()),
        ]
    }

    fn regular_tet() -> [Vec3; 4] {
        [
            Vec3::new(1.0, 1.0, 1.0),
            Vec3::new(1.0, -1.0, -1.0),
            Vec3::new(-1.0, 1.0, -1.0),
            Vec3::new(-1.0, -1.0, 1.0),
        ]
    }

    #[test]
    fn determinant_and_solve() {
        let m = [[2.0, 1.0, 0.0], [1.0, 3.0, 1.0], [0.0, 1.0, 4.0]];
        assert_relative_eq!(det(m), 18.0, epsilon = 1e-12);
        let x = solve(m, [3.0, 5.0, 5.0]).unwrap();
        for (got, expected) in x.iter().zip([1.0, 1.0, 1.0]) {
            assert_relative_eq!(*got, expected, epsilon = 1e-12);
        }
        assert!(solve([[1.0, 2.0], [2.0, 4.0]], [1.0, 1.0]).is_none());
        assert_eq!(det([[1.0, 2.0], [2.0, 4.0]]), 0.0);
    }

    #[test]
    fn orientation_sign() {
        let mut tri = equilateral();
        assert!(orientation(&tri) > 0.0);
        tri.swap(1, 2);
        assert!(orientation(&tri) < 0.0);
        assert_relative_eq!(signed_volume(&tri).abs(), 0.75f64.sqrt() / 2.0, epsilon = 1e-12);

        let unit_tet = [
            Vec3::zeros(),
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::new(0.0, 1.0, 0.0),
            Vec3::new(0.0, 0.0, 1.0),
        ];
        assert_relative_eq!(signed_volume(&unit_tet), 1.0 / 6.0, epsilon = 1e-12);
    }

    #[test]
    fn circumsphere_of_right_triangle() {
        let tri = [Vec2::new(0.0, 0.0), Vec2::new(2.0, 0.0), Vec2::new(0.0, 2.0)];
        let (center, r2) = circumsphere(&tri).unwrap();
        assert_relative_eq!(center, Vec2::new(1.0, 1.0), epsilon = 1e-12);
        assert_relative_eq!(r2, 2.0, epsilon = 1e-12);

        let flat = [Vec2::new(0.0, 0.0), Vec2::new(1.0, 0.0), Vec2::new(2.0, 0.0)];
        assert!(circumsphere(&flat).is_none());
    }

    #[test]
    fn gradients_sum_to_zero_and_reproduce_coordinates() {
        let tet = [
            Vec3::new(0.1, 0.0, 0.3),
            Vec3::new(1.2, 0.1, 0.0),
            Vec3::new(0.2, 0.9, 0.1),
            Vec3::new(0.3, 0.2, 1.1),
        ];
        let grads = barycentric_gradients(&tet).unwrap();
        let sum = grads.iter().fold(Vec3::zeros(), |acc, g| acc + g);
        assert_relative_eq!(sum, Vec3::zeros(), epsilon = 1e-12);
        // λ_i(v_j) = δ_ij, so ∇λ_i . (v_j - v_0) = δ_ij - δ_i0
        for i in 0..4 {
            for j in 1..4 {
                let expected = if i == j { 1.0 } else { 0.0 } - if i == 0 { 1.0 } else { 0.0 };
                assert_relative_eq!(grads[i].dot(&(tet[j] - tet[0])), expected, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn triangle_angles_are_corner_angles() {
        let angles = dihedral_angles(&equilateral()).unwrap();
        for a in angles {
            assert_relative_eq!(a, 60.0, epsilon = 1e-9);
        }
        let right = [Vec2::new(0.0, 0.0), Vec2::new(1.0, 0.0), Vec2::new(0.0, 1.0)];
        let (lo, hi) = dihedral_range(&right);
        assert_relative_eq!(lo, 45.0, epsilon = 1e-9);
        assert_relative_eq!(hi, 90.0, epsilon = 1e-9);
    }

    #[test]
    fn regular_tetrahedron_quality() {
        let tet = regular_tet();
        let expected = (1.0f64 / 3.0).acos().to_degrees();
        for a in dihedral_angles(&tet).unwrap() {
            assert_relative_eq!(a, expected, epsilon = 1e-9);
        }
        assert_relative_eq!(radius_ratio(&tet), 1.0, epsilon = 1e-9);
        assert_relative_eq!(radius_ratio(&equilateral()), 1.0, epsilon = 1e-9);
    }

    #[test]
    fn sliver_has_extreme_angles() {
        // four nearly coplanar points around a square
        let sliver = [
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(1.0, 1.0, 0.0),
            Vec3::new(1.0, 0.0, 0.01),
            Vec3::new(0.0, 1.0, 0.01),
        ];
        let (lo, hi) = dihedral_range(&sliver);
        assert!(lo < 5.0, "min angle {lo}");
        assert!(hi > 175.0, "max angle {hi}");
        assert!(radius_ratio(&sliver) < 0.1);
    }
}
