//! Reference element bases and geometric mappings.
//!
//! Bases and geometry are kept separate: a [`ReferenceBasis`] evaluates shape
//! functions of the chosen approximation order on the reference domain, while
//! an [`ElementGeometry`] maps reference coordinates to physical coordinates
//! using the linear (triangle) or bilinear (quadrilateral) vertex map. Spaces
//! of order 2 are therefore sub-parametric: the geometry stays first-order.
//!
//! Reference domains: the square `[-1, 1]^2` and the triangle with vertices
//! `(-1, -1)`, `(1, -1)`, `(-1, 1)`.
use nalgebra::{Matrix2, Matrix2xX, Point2};
use serde::{Deserialize, Serialize};

use crate::error::ConstructionError;

/// The shape of the reference element.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElementShape {
    Triangle,
    Quadrilateral,
}

impl ElementShape {
    /// Number of geometry vertices of a cell of this shape.
    pub fn vertex_count(&self) -> usize {
        match self {
            Self::Triangle => 3,
            Self::Quadrilateral => 4,
        }
    }

    /// Number of edges of a cell of this shape.
    pub fn edge_count(&self) -> usize {
        match self {
            Self::Triangle => 3,
            Self::Quadrilateral => 4,
        }
    }

    /// Local vertex index pairs making up each edge, in local edge order.
    pub fn edges(&self) -> &'static [(usize, usize)] {
        match self {
            Self::Triangle => &[(0, 1), (1, 2), (2, 0)],
            Self::Quadrilateral => &[(0, 1), (1, 2), (2, 3), (3, 0)],
        }
    }
}

/// Shape functions of a scalar Lagrange basis on a reference element.
///
/// Supported approximation orders are 1 (P1/Q1) and 2 (P2/Q2). Order-2 bases
/// order their functions as vertex functions first, then edge functions in
/// local edge order, then (for quadrilaterals) the cell-interior function.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ReferenceBasis {
    shape: ElementShape,
    order: usize,
}

impl ReferenceBasis {
    pub fn new(shape: ElementShape, order: usize) -> Result<Self, ConstructionError> {
        match order {
            1 | 2 => Ok(Self { shape, order }),
            _ => Err(ConstructionError::UnsupportedApproximationOrder { order }),
        }
    }

    pub fn shape(&self) -> ElementShape {
        self.shape
    }

    pub fn order(&self) -> usize {
        self.order
    }

    /// Number of basis functions (equivalently, DOFs per element).
    pub fn num_functions(&self) -> usize {
        match (self.shape, self.order) {
            (ElementShape::Triangle, 1) => 3,
            (ElementShape::Triangle, 2) => 6,
            (ElementShape::Quadrilateral, 1) => 4,
            (ElementShape::Quadrilateral, 2) => 9,
            _ => unreachable!("orders are validated at construction"),
        }
    }

    /// Evaluates all basis functions at the reference coordinate `xi`.
    ///
    /// # Panics
    ///
    /// Panics if `values` does not have exactly `num_functions` entries.
    pub fn populate_values(&self, values: &mut [f64], xi: &Point2<f64>) {
        assert_eq!(values.len(), self.num_functions());
        match (self.shape, self.order) {
            (ElementShape::Triangle, 1) => {
                let psi = tri_linear_values(xi);
                values.copy_from_slice(&psi);
            }
            (ElementShape::Triangle, 2) => {
                // The P2 functions are products of the P1 barycentric functions
                let psi = tri_linear_values(xi);
                values[0] = psi[0] * (2.0 * psi[0] - 1.0);
                values[1] = psi[1] * (2.0 * psi[1] - 1.0);
                values[2] = psi[2] * (2.0 * psi[2] - 1.0);
                values[3] = 4.0 * psi[0] * psi[1];
                values[4] = 4.0 * psi[1] * psi[2];
                values[5] = 4.0 * psi[2] * psi[0];
            }
            (ElementShape::Quadrilateral, 1) => {
                let phi = quad_bilinear_values(xi);
                values.copy_from_slice(&phi);
            }
            (ElementShape::Quadrilateral, 2) => {
                let lx = lagrange_quadratic_1d(xi.x);
                let ly = lagrange_quadratic_1d(xi.y);
                for (value, &(a, b)) in values.iter_mut().zip(QUAD9_NODES) {
                    *value = lx[a] * ly[b];
                }
            }
            _ => unreachable!("orders are validated at construction"),
        }
    }

    /// Evaluates the reference-coordinate gradients of all basis functions at
    /// `xi`, one gradient per column.
    ///
    /// # Panics
    ///
    /// Panics if `gradients` does not have exactly `num_functions` columns.
    pub fn populate_gradients(&self, gradients: &mut Matrix2xX<f64>, xi: &Point2<f64>) {
        assert_eq!(gradients.ncols(), self.num_functions());
        match (self.shape, self.order) {
            (ElementShape::Triangle, 1) => {
                gradients.copy_from_slice(&TRI_LINEAR_GRADIENTS);
            }
            (ElementShape::Triangle, 2) => {
                let psi = tri_linear_values(xi);
                let g = &TRI_LINEAR_GRADIENTS;
                // Vertex functions
                for i in 0..3 {
                    let scale = 4.0 * psi[i] - 1.0;
                    gradients[(0, i)] = scale * g[2 * i];
                    gradients[(1, i)] = scale * g[2 * i + 1];
                }
                // Edge functions, edges (0,1), (1,2), (2,0)
                for (col, &(i, j)) in ElementShape::Triangle.edges().iter().enumerate() {
                    let col = 3 + col;
                    gradients[(0, col)] = 4.0 * (psi[j] * g[2 * i] + psi[i] * g[2 * j]);
                    gradients[(1, col)] = 4.0 * (psi[j] * g[2 * i + 1] + psi[i] * g[2 * j + 1]);
                }
            }
            (ElementShape::Quadrilateral, 1) => {
                for (col, &(alpha, beta)) in QUAD4_SIGNS.iter().enumerate() {
                    gradients[(0, col)] = alpha * (1.0 + beta * xi.y) / 4.0;
                    gradients[(1, col)] = beta * (1.0 + alpha * xi.x) / 4.0;
                }
            }
            (ElementShape::Quadrilateral, 2) => {
                let lx = lagrange_quadratic_1d(xi.x);
                let ly = lagrange_quadratic_1d(xi.y);
                let dlx = lagrange_quadratic_1d_derivatives(xi.x);
                let dly = lagrange_quadratic_1d_derivatives(xi.y);
                for (col, &(a, b)) in QUAD9_NODES.iter().enumerate() {
                    gradients[(0, col)] = dlx[a] * ly[b];
                    gradients[(1, col)] = lx[a] * dly[b];
                }
            }
            _ => unreachable!("orders are validated at construction"),
        }
    }
}

/// Barycentric-style linear basis on the reference triangle.
fn tri_linear_values(xi: &Point2<f64>) -> [f64; 3] {
    [
        -0.5 * (xi.x + xi.y),
        0.5 * (1.0 + xi.x),
        0.5 * (1.0 + xi.y),
    ]
}

// Column-major (x, y) gradient pairs of the linear triangle basis; constant
// over the element.
const TRI_LINEAR_GRADIENTS: [f64; 6] = [-0.5, -0.5, 0.5, 0.0, 0.0, 0.5];

// Corner signs (alpha, beta) of the bilinear quad basis, ordered
// counter-clockwise starting from (-1, -1).
const QUAD4_SIGNS: [(f64, f64); 4] = [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)];

fn quad_bilinear_values(xi: &Point2<f64>) -> [f64; 4] {
    let phi = |(alpha, beta): (f64, f64)| (1.0 + alpha * xi.x) * (1.0 + beta * xi.y) / 4.0;
    [
        phi(QUAD4_SIGNS[0]),
        phi(QUAD4_SIGNS[1]),
        phi(QUAD4_SIGNS[2]),
        phi(QUAD4_SIGNS[3]),
    ]
}

// Q2 node layout as (x-index, y-index) into the 1D quadratic Lagrange nodes
// {-1, 0, 1}: four corners, four edge midpoints, then the center.
const QUAD9_NODES: &[(usize, usize); 9] = &[
    (0, 0),
    (2, 0),
    (2, 2),
    (0, 2),
    (1, 0),
    (2, 1),
    (1, 2),
    (0, 1),
    (1, 1),
];

/// 1D quadratic Lagrange basis on [-1, 1] with nodes -1, 0, 1.
fn lagrange_quadratic_1d(x: f64) -> [f64; 3] {
    [0.5 * x * (x - 1.0), 1.0 - x * x, 0.5 * x * (x + 1.0)]
}

fn lagrange_quadratic_1d_derivatives(x: f64) -> [f64; 3] {
    [x - 0.5, -2.0 * x, x + 0.5]
}

/// The geometric map of a single mesh cell.
///
/// Holds the cell's vertex coordinates as columns of `X` and evaluates the
/// map `x(xi) = X N(xi)^T` and its Jacobian `J(xi) = X G(xi)^T`, where `N`
/// and `G` are the values and reference gradients of the linear vertex basis.
#[derive(Debug, Clone, PartialEq)]
pub struct ElementGeometry {
    shape: ElementShape,
    vertices: Matrix2xX<f64>,
}

impl ElementGeometry {
    /// Builds the geometry of a cell from its vertex coordinates.
    ///
    /// # Panics
    ///
    /// Panics if the number of vertices does not match the shape.
    pub fn from_vertices(shape: ElementShape, vertices: &[Point2<f64>]) -> Self {
        assert_eq!(vertices.len(), shape.vertex_count());
        let vertices = Matrix2xX::from_fn(vertices.len(), |i, j| vertices[j][i]);
        Self { shape, vertices }
    }

    pub fn shape(&self) -> ElementShape {
        self.shape
    }

    /// Maps reference coordinates to physical coordinates.
    pub fn map_reference_coords(&self, xi: &Point2<f64>) -> Point2<f64> {
        let mut x = [0.0; 2];
        match self.shape {
            ElementShape::Triangle => {
                let psi = tri_linear_values(xi);
                for (j, psi_j) in psi.iter().enumerate() {
                    x[0] += psi_j * self.vertices[(0, j)];
                    x[1] += psi_j * self.vertices[(1, j)];
                }
            }
            ElementShape::Quadrilateral => {
                let phi = quad_bilinear_values(xi);
                for (j, phi_j) in phi.iter().enumerate() {
                    x[0] += phi_j * self.vertices[(0, j)];
                    x[1] += phi_j * self.vertices[(1, j)];
                }
            }
        }
        Point2::new(x[0], x[1])
    }

    /// The Jacobian of the reference-to-physical map at `xi`.
    ///
    /// For triangles the Jacobian is constant over the element.
    pub fn reference_jacobian(&self, xi: &Point2<f64>) -> Matrix2<f64> {
        let mut j = Matrix2::zeros();
        match self.shape {
            ElementShape::Triangle => {
                for (col, g) in TRI_LINEAR_GRADIENTS.chunks_exact(2).enumerate() {
                    j[(0, 0)] += self.vertices[(0, col)] * g[0];
                    j[(0, 1)] += self.vertices[(0, col)] * g[1];
                    j[(1, 0)] += self.vertices[(1, col)] * g[0];
                    j[(1, 1)] += self.vertices[(1, col)] * g[1];
                }
            }
            ElementShape::Quadrilateral => {
                for (col, &(alpha, beta)) in QUAD4_SIGNS.iter().enumerate() {
                    let gx = alpha * (1.0 + beta * xi.y) / 4.0;
                    let gy = beta * (1.0 + alpha * xi.x) / 4.0;
                    j[(0, 0)] += self.vertices[(0, col)] * gx;
                    j[(0, 1)] += self.vertices[(0, col)] * gy;
                    j[(1, 0)] += self.vertices[(1, col)] * gx;
                    j[(1, 1)] += self.vertices[(1, col)] * gy;
                }
            }
        }
        j
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use matrixcompare::assert_scalar_eq;

    fn sample_points(shape: ElementShape) -> Vec<Point2<f64>> {
        match shape {
            ElementShape::Triangle => vec![
                Point2::new(-1.0, -1.0),
                Point2::new(0.0, -1.0),
                Point2::new(-0.5, -0.5),
                Point2::new(-0.2, -0.7),
            ],
            ElementShape::Quadrilateral => vec![
                Point2::new(-1.0, -1.0),
                Point2::new(0.3, -0.4),
                Point2::new(0.0, 0.0),
                Point2::new(0.9, 0.8),
            ],
        }
    }

    #[test]
    fn bases_are_a_partition_of_unity() {
        for shape in [ElementShape::Triangle, ElementShape::Quadrilateral] {
            for order in [1, 2] {
                let basis = ReferenceBasis::new(shape, order).unwrap();
                let mut values = vec![0.0; basis.num_functions()];
                for xi in sample_points(shape) {
                    basis.populate_values(&mut values, &xi);
                    let sum: f64 = values.iter().sum();
                    assert_scalar_eq!(sum, 1.0, comp = abs, tol = 1e-14);
                }
            }
        }
    }

    #[test]
    fn basis_gradients_sum_to_zero() {
        // Gradients of a partition of unity must sum to the zero vector
        for shape in [ElementShape::Triangle, ElementShape::Quadrilateral] {
            for order in [1, 2] {
                let basis = ReferenceBasis::new(shape, order).unwrap();
                let mut gradients = Matrix2xX::zeros(basis.num_functions());
                for xi in sample_points(shape) {
                    basis.populate_gradients(&mut gradients, &xi);
                    let sum = gradients.column_sum();
                    assert_scalar_eq!(sum[0], 0.0, comp = abs, tol = 1e-14);
                    assert_scalar_eq!(sum[1], 0.0, comp = abs, tol = 1e-14);
                }
            }
        }
    }

    #[test]
    fn order_zero_basis_is_rejected() {
        let result = ReferenceBasis::new(ElementShape::Triangle, 0);
        assert_eq!(
            result.unwrap_err(),
            ConstructionError::UnsupportedApproximationOrder { order: 0 }
        );
    }

    #[test]
    fn unit_square_geometry_has_constant_jacobian() {
        let geometry = ElementGeometry::from_vertices(
            ElementShape::Quadrilateral,
            &[
                Point2::new(0.0, 0.0),
                Point2::new(1.0, 0.0),
                Point2::new(1.0, 1.0),
                Point2::new(0.0, 1.0),
            ],
        );
        for xi in sample_points(ElementShape::Quadrilateral) {
            let j = geometry.reference_jacobian(&xi);
            // The affine map scales each axis by 1/2
            assert_scalar_eq!(j.determinant(), 0.25, comp = abs, tol = 1e-14);
        }
        let center = geometry.map_reference_coords(&Point2::new(0.0, 0.0));
        assert_scalar_eq!(center.x, 0.5, comp = abs, tol = 1e-14);
        assert_scalar_eq!(center.y, 0.5, comp = abs, tol = 1e-14);
    }
}
