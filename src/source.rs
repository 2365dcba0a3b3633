//! Data sources: values (and gradients) supplied at quadrature points.
use std::sync::Arc;

use nalgebra::{DMatrix, DVector, Matrix2xX, Point2};
use serde::{Deserialize, Serialize};

use crate::error::ConstructionError;
use crate::quadrature::{reference_rule, QuadratureRule};
use crate::space::FieldSpace;
use crate::variable::FieldVariable;

/// What a [`DataSource`] is asked to produce at a set of quadrature points.
///
/// The enumeration is closed: every dispatch site matches exhaustively, and a
/// source that does not support a mode returns `None` (a recognized no-op the
/// engine uses to probe capabilities), never a silent fallthrough.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EvalMode {
    /// Scalar values; result has one column.
    Value,
    /// Spatial gradients; result has one column per coordinate.
    Gradient,
}

impl EvalMode {
    /// Number of components a source must produce for this mode.
    pub fn num_components(&self) -> usize {
        match self {
            Self::Value => 1,
            Self::Gradient => 2,
        }
    }
}

/// A supplier of material-like data at quadrature points.
///
/// `coords` are the physical coordinates of the quadrature points of one
/// element; `element_index` identifies that element for sources backed by
/// per-element data. The returned matrix has one row per point and
/// `mode.num_components()` columns. Returning `None` signals that the mode is
/// not supported; the engine treats this as a no-op when probing and as an
/// error only where the mode is required by a term.
///
/// Sources are stateless from the engine's perspective: `evaluate` takes
/// `&self` and the engine never mutates a source.
pub trait DataSource {
    fn evaluate(
        &self,
        element_index: usize,
        coords: &[Point2<f64>],
        mode: EvalMode,
    ) -> Option<DMatrix<f64>>;

    /// Whether this source can produce data for `mode`.
    ///
    /// The default implementation probes `evaluate` with an empty batch of
    /// points, relying on the `None`-for-unsupported-modes contract.
    fn supports_mode(&self, mode: EvalMode) -> bool {
        self.evaluate(0, &[], mode).is_some()
    }
}

/// A source returning the same scalar value at every point.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstantSource {
    value: f64,
}

impl ConstantSource {
    pub fn new(value: f64) -> Self {
        Self { value }
    }
}

impl DataSource for ConstantSource {
    fn evaluate(
        &self,
        _element_index: usize,
        coords: &[Point2<f64>],
        mode: EvalMode,
    ) -> Option<DMatrix<f64>> {
        match mode {
            EvalMode::Value => Some(DMatrix::from_element(coords.len(), 1, self.value)),
            EvalMode::Gradient => None,
        }
    }
}

/// A source backed by a closure evaluated on whole batches of points.
pub struct FnSource<F> {
    function: F,
}

impl<F> FnSource<F>
where
    F: Fn(&[Point2<f64>], EvalMode) -> Option<DMatrix<f64>>,
{
    pub fn new(function: F) -> Self {
        Self { function }
    }
}

impl<F> DataSource for FnSource<F>
where
    F: Fn(&[Point2<f64>], EvalMode) -> Option<DMatrix<f64>>,
{
    fn evaluate(
        &self,
        _element_index: usize,
        coords: &[Point2<f64>],
        mode: EvalMode,
    ) -> Option<DMatrix<f64>> {
        (self.function)(coords, mode)
    }
}

/// A source backed by a precomputed array of per-quadrature-point values,
/// stored element by element.
#[derive(Debug, Clone, PartialEq)]
pub struct QpArraySource {
    values: DVector<f64>,
    points_per_element: usize,
}

impl QpArraySource {
    /// # Panics
    ///
    /// Panics if the number of values is not a multiple of
    /// `points_per_element`.
    pub fn new(values: DVector<f64>, points_per_element: usize) -> Self {
        assert!(points_per_element > 0);
        assert_eq!(values.len() % points_per_element, 0);
        Self {
            values,
            points_per_element,
        }
    }
}

impl DataSource for QpArraySource {
    fn evaluate(
        &self,
        element_index: usize,
        coords: &[Point2<f64>],
        mode: EvalMode,
    ) -> Option<DMatrix<f64>> {
        match mode {
            EvalMode::Value => {
                let offset = element_index * self.points_per_element;
                let slice = self.values.as_slice().get(offset..offset + coords.len())?;
                Some(DMatrix::from_column_slice(coords.len(), 1, slice))
            }
            EvalMode::Gradient => None,
        }
    }
}

/// A source evaluating a field variable at quadrature points of its own mesh.
///
/// Supports both values and gradients, which makes it usable for H1 as well
/// as L2 projection. The source is tied to the quadrature order it was built
/// with: evaluation happens at the reference points of that rule, so the
/// consuming term must use the same order.
pub struct FieldSource {
    dofs: DVector<f64>,
    space: Arc<FieldSpace>,
    rule: Arc<QuadratureRule>,
}

impl FieldSource {
    pub fn from_variable(
        variable: &FieldVariable,
        quadrature_order: usize,
    ) -> Result<Self, ConstructionError> {
        let space = Arc::clone(variable.space());
        let rule = reference_rule(space.shape(), quadrature_order)?;
        Ok(Self {
            dofs: variable.data().clone(),
            space,
            rule,
        })
    }
}

impl DataSource for FieldSource {
    // The default probe passes an empty point batch, which would trip the
    // rule-length check in `evaluate`.
    fn supports_mode(&self, _mode: EvalMode) -> bool {
        true
    }

    fn evaluate(
        &self,
        element_index: usize,
        coords: &[Point2<f64>],
        mode: EvalMode,
    ) -> Option<DMatrix<f64>> {
        assert_eq!(
            coords.len(),
            self.rule.len(),
            "field source evaluated with a different quadrature rule than it was built with"
        );
        let basis = self.space.basis();
        let geometry = self.space.mesh().cell_geometry(element_index);
        let element_dofs = self.space.element_dofs(element_index);
        let n = basis.num_functions();

        let mut output = DMatrix::zeros(coords.len(), mode.num_components());
        let mut values = vec![0.0; n];
        let mut gradients = Matrix2xX::zeros(n);

        for (q, xi) in self.rule.points().iter().enumerate() {
            match mode {
                EvalMode::Value => {
                    basis.populate_values(&mut values, xi);
                    let mut u = 0.0;
                    for (phi, &dof) in values.iter().zip(element_dofs) {
                        u += phi * self.dofs[dof];
                    }
                    output[(q, 0)] = u;
                }
                EvalMode::Gradient => {
                    basis.populate_gradients(&mut gradients, xi);
                    let jacobian = geometry.reference_jacobian(xi);
                    let jacobian_inv_t = jacobian.try_inverse()?.transpose();
                    // grad u = J^{-T} sum_I grad_ref phi_I u_I
                    let mut u_grad_ref = [0.0; 2];
                    for (i, &dof) in element_dofs.iter().enumerate() {
                        u_grad_ref[0] += gradients[(0, i)] * self.dofs[dof];
                        u_grad_ref[1] += gradients[(1, i)] * self.dofs[dof];
                    }
                    let u_grad = jacobian_inv_t
                        * nalgebra::Vector2::new(u_grad_ref[0], u_grad_ref[1]);
                    output[(q, 0)] = u_grad[0];
                    output[(q, 1)] = u_grad[1];
                }
            }
        }
        Some(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::create_unit_square_uniform_quad_mesh;
    use matrixcompare::assert_scalar_eq;

    #[test]
    fn constant_source_supports_values_only() {
        let source = ConstantSource::new(2.5);
        let coords = [Point2::new(0.0, 0.0), Point2::new(0.5, 0.5)];
        let values = source.evaluate(0, &coords, EvalMode::Value).unwrap();
        assert_eq!(values.nrows(), 2);
        assert_scalar_eq!(values[(1, 0)], 2.5, comp = abs, tol = 0.0);
        assert!(source.evaluate(0, &coords, EvalMode::Gradient).is_none());
    }

    #[test]
    fn field_source_reproduces_linear_fields_exactly() {
        let mesh = Arc::new(create_unit_square_uniform_quad_mesh(2));
        let space = Arc::new(FieldSpace::new(Arc::clone(&mesh), 1).unwrap());
        let mut variable = FieldVariable::unknown("u", &space);
        // u(x, y) = 3 x - y at the vertices
        let data = DVector::from_iterator(
            space.num_dofs(),
            mesh.vertices().iter().map(|p| 3.0 * p.x - p.y),
        );
        variable.set_data(data);

        let order = space.default_quadrature_order();
        let source = FieldSource::from_variable(&variable, order).unwrap();
        let rule = reference_rule(space.shape(), order).unwrap();

        for cell in 0..mesh.num_cells() {
            let geometry = mesh.cell_geometry(cell);
            let coords: Vec<_> = rule
                .points()
                .iter()
                .map(|xi| geometry.map_reference_coords(xi))
                .collect();

            let values = source.evaluate(cell, &coords, EvalMode::Value).unwrap();
            for (q, x) in coords.iter().enumerate() {
                assert_scalar_eq!(values[(q, 0)], 3.0 * x.x - x.y, comp = abs, tol = 1e-13);
            }

            let gradients = source.evaluate(cell, &coords, EvalMode::Gradient).unwrap();
            for q in 0..coords.len() {
                assert_scalar_eq!(gradients[(q, 0)], 3.0, comp = abs, tol = 1e-13);
                assert_scalar_eq!(gradients[(q, 1)], -1.0, comp = abs, tol = 1e-13);
            }
        }
    }
}
