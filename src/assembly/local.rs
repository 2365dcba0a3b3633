//! Per-element evaluation of weak-form terms.
use std::fmt;
use std::sync::Arc;

use itertools::izip;
use nalgebra::{DMatrix, DVector, Matrix2xX, Point2};

use crate::element::{ElementGeometry, ReferenceBasis};
use crate::error::{AssemblyError, ConstructionError};
use crate::quadrature::{reference_rule, QuadratureRule};
use crate::source::{DataSource, EvalMode};
use crate::space::FieldSpace;
use crate::variable::{FieldVariable, VariableRole};

/// The sign with which a term enters an equation.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Sign {
    Plus,
    Minus,
}

impl Sign {
    pub fn factor(&self) -> f64 {
        match self {
            Self::Plus => 1.0,
            Self::Minus => -1.0,
        }
    }
}

/// The formula a [`Term`] evaluates.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TermKind {
    /// Mass term: element matrix with entries `int phi_i phi_j dV`.
    VolumeDot,
    /// Diffusion term: element matrix with entries `int grad phi_i . grad phi_j dV`.
    Laplace,
    /// Linear volume functional: element vector `int phi_i d(x) dV`.
    VolumeLvf,
    /// Diffusion residual functional: element vector `int grad phi_i . g(x) dV`.
    DiffusionR,
}

impl TermKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::VolumeDot => "dw_volume_dot",
            Self::Laplace => "dw_laplace",
            Self::VolumeLvf => "dw_volume_lvf",
            Self::DiffusionR => "dw_diffusion_r",
        }
    }

    /// Whether the term produces an element matrix (as opposed to a vector).
    pub fn is_matrix_term(&self) -> bool {
        matches!(self, Self::VolumeDot | Self::Laplace)
    }
}

/// A term operand: the relevant pieces of a [`FieldVariable`] captured at
/// term construction. Parameter operands additionally snapshot their data,
/// since their values enter the residual without being part of the state.
#[derive(Debug, Clone)]
pub(crate) struct TermOperand {
    pub name: String,
    pub role: VariableRole,
    pub space: Arc<FieldSpace>,
    pub primary: Option<String>,
    pub data: Option<DVector<f64>>,
}

impl TermOperand {
    fn capture(variable: &FieldVariable) -> Self {
        let data = (variable.role() == VariableRole::Parameter).then(|| variable.data().clone());
        Self {
            name: variable.name().to_string(),
            role: variable.role(),
            space: Arc::clone(variable.space()),
            primary: variable.primary_var_name().map(str::to_string),
            data,
        }
    }
}

/// An elementary weak-form operator over one or two field variables and
/// optionally a data source.
///
/// Operand roles and spaces are validated here, at construction; assembly
/// assumes a well-formed term. The quadrature rule is also resolved here so
/// that an unsupported order fails before any solve is attempted.
pub struct Term {
    kind: TermKind,
    test: TermOperand,
    unknown: Option<TermOperand>,
    source: Option<Arc<dyn DataSource>>,
    rule: Arc<QuadratureRule>,
}

impl fmt::Debug for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Term")
            .field("kind", &self.kind)
            .field("test", &self.test.name)
            .field("unknown", &self.unknown.as_ref().map(|op| &op.name))
            .field("quadrature_order", &self.rule.order())
            .finish()
    }
}

impl Term {
    /// Creates a mass term `dw_volume_dot(v, u)`.
    pub fn volume_dot(
        test: &FieldVariable,
        unknown: &FieldVariable,
        quadrature_order: usize,
    ) -> Result<Self, ConstructionError> {
        Self::matrix_term(TermKind::VolumeDot, test, unknown, quadrature_order)
    }

    /// Creates a diffusion term `dw_laplace(v, u)`.
    pub fn laplace(
        test: &FieldVariable,
        unknown: &FieldVariable,
        quadrature_order: usize,
    ) -> Result<Self, ConstructionError> {
        Self::matrix_term(TermKind::Laplace, test, unknown, quadrature_order)
    }

    fn matrix_term(
        kind: TermKind,
        test: &FieldVariable,
        unknown: &FieldVariable,
        quadrature_order: usize,
    ) -> Result<Self, ConstructionError> {
        validate_test_operand(test)?;
        if unknown.role() == VariableRole::Test {
            return Err(ConstructionError::RoleMismatch {
                variable: unknown.name().to_string(),
                expected: VariableRole::Unknown,
                found: VariableRole::Test,
            });
        }
        // Matrix terms pair rows and columns of the same space: both
        // operands must agree on mesh and basis.
        if !test.space().shares_mesh_with(unknown.space()) {
            return Err(ConstructionError::MeshMismatch { term: kind.name() });
        }
        if test.space().basis() != unknown.space().basis() {
            return Err(ConstructionError::ShapeMismatch {
                term: kind.name(),
                test: test.space().shape(),
                other: unknown.space().shape(),
            });
        }
        let rule = reference_rule(test.space().shape(), quadrature_order)?;
        Ok(Self {
            kind,
            test: TermOperand::capture(test),
            unknown: Some(TermOperand::capture(unknown)),
            source: None,
            rule,
        })
    }

    /// Creates a linear volume functional `dw_volume_lvf(d.val, v)`.
    pub fn volume_lvf(
        source: Arc<dyn DataSource>,
        test: &FieldVariable,
        quadrature_order: usize,
    ) -> Result<Self, ConstructionError> {
        Self::vector_term(TermKind::VolumeLvf, EvalMode::Value, source, test, quadrature_order)
    }

    /// Creates a diffusion residual functional `dw_diffusion_r(d.gval, v)`.
    pub fn diffusion_r(
        source: Arc<dyn DataSource>,
        test: &FieldVariable,
        quadrature_order: usize,
    ) -> Result<Self, ConstructionError> {
        Self::vector_term(
            TermKind::DiffusionR,
            EvalMode::Gradient,
            source,
            test,
            quadrature_order,
        )
    }

    fn vector_term(
        kind: TermKind,
        required_mode: EvalMode,
        source: Arc<dyn DataSource>,
        test: &FieldVariable,
        quadrature_order: usize,
    ) -> Result<Self, ConstructionError> {
        validate_test_operand(test)?;
        if !source.supports_mode(required_mode) {
            return Err(ConstructionError::UnsupportedEvalMode {
                term: kind.name(),
                mode: required_mode,
            });
        }
        let rule = reference_rule(test.space().shape(), quadrature_order)?;
        Ok(Self {
            kind,
            test: TermOperand::capture(test),
            unknown: None,
            source: Some(source),
            rule,
        })
    }

    pub fn kind(&self) -> TermKind {
        self.kind
    }

    pub fn quadrature_rule(&self) -> &Arc<QuadratureRule> {
        &self.rule
    }

    pub(crate) fn test_operand(&self) -> &TermOperand {
        &self.test
    }

    pub(crate) fn unknown_operand(&self) -> Option<&TermOperand> {
        self.unknown.as_ref()
    }

    pub(crate) fn data_source(&self) -> Option<&Arc<dyn DataSource>> {
        self.source.as_ref()
    }
}

fn validate_test_operand(test: &FieldVariable) -> Result<(), ConstructionError> {
    test.require_role(VariableRole::Test)?;
    test.validate()
}

/// Assembles the element mass matrix `M_ij = int phi_i phi_j dV` using the
/// provided quadrature.
///
/// # Panics
///
/// Panics if `output` is not square with one row per basis function, or if
/// the basis value buffer does not have one entry per basis function.
pub fn assemble_element_mass_matrix(
    output: &mut DMatrix<f64>,
    geometry: &ElementGeometry,
    basis: &ReferenceBasis,
    rule: &QuadratureRule,
    basis_values: &mut [f64],
) {
    let n = basis.num_functions();
    assert_eq!(output.nrows(), n);
    assert_eq!(output.ncols(), n);
    assert_eq!(basis_values.len(), n);

    output.fill(0.0);
    let phi = basis_values;

    for (weight, point) in izip!(rule.weights(), rule.points()) {
        let j_det = geometry.reference_jacobian(point).determinant();
        basis.populate_values(phi, point);
        let scale = weight * j_det.abs();

        // Fill only the upper triangle, then copy over the lower half at the end
        for i in 0..n {
            for j in i..n {
                output[(i, j)] += scale * phi[i] * phi[j];
            }
        }
    }

    clone_upper_to_lower(output);
}

/// Assembles the element diffusion matrix
/// `L_ij = int grad phi_i . grad phi_j dV` using the provided quadrature.
///
/// Reference gradients are mapped to physical space with the inverse
/// transpose of the geometric Jacobian.
pub fn assemble_element_laplace_matrix(
    output: &mut DMatrix<f64>,
    element_index: usize,
    geometry: &ElementGeometry,
    basis: &ReferenceBasis,
    rule: &QuadratureRule,
    basis_gradients: &mut Matrix2xX<f64>,
) -> Result<(), AssemblyError> {
    let n = basis.num_functions();
    assert_eq!(output.nrows(), n);
    assert_eq!(output.ncols(), n);
    assert_eq!(basis_gradients.ncols(), n);

    output.fill(0.0);

    for (weight, point) in izip!(rule.weights(), rule.points()) {
        let jacobian = geometry.reference_jacobian(point);
        let j_det = jacobian.determinant();
        let jacobian_inv_t = jacobian
            .try_inverse()
            .ok_or(AssemblyError::SingularElementGeometry {
                element: element_index,
            })?
            .transpose();

        basis.populate_gradients(basis_gradients, point);
        // Map the reference gradients to physical space in place
        for mut column in basis_gradients.column_iter_mut() {
            let mapped = &jacobian_inv_t * &column.clone_owned();
            column.copy_from(&mapped);
        }

        let scale = weight * j_det.abs();
        for i in 0..n {
            for j in i..n {
                let dot = basis_gradients.column(i).dot(&basis_gradients.column(j));
                output[(i, j)] += scale * dot;
            }
        }
    }

    clone_upper_to_lower(output);
    Ok(())
}

/// Assembles the element source vector `f_i = int phi_i d(x) dV`, where the
/// data `d` is evaluated at the physical coordinates of the quadrature
/// points.
pub fn assemble_element_source_vector(
    output: &mut DVector<f64>,
    element_index: usize,
    geometry: &ElementGeometry,
    basis: &ReferenceBasis,
    rule: &QuadratureRule,
    source: &dyn DataSource,
    basis_values: &mut [f64],
    coords: &mut Vec<Point2<f64>>,
) -> Result<(), AssemblyError> {
    let n = basis.num_functions();
    assert_eq!(output.len(), n);
    assert_eq!(basis_values.len(), n);

    populate_physical_coords(coords, geometry, rule);
    let data = source
        .evaluate(element_index, coords, EvalMode::Value)
        .ok_or(AssemblyError::SourceModeUnavailable {
            mode: EvalMode::Value,
        })?;

    output.fill(0.0);
    let phi = basis_values;

    for (q, (weight, point)) in izip!(rule.weights(), rule.points()).enumerate() {
        let j_det = geometry.reference_jacobian(point).determinant();
        basis.populate_values(phi, point);
        let scale = weight * j_det.abs() * data[(q, 0)];
        for i in 0..n {
            output[i] += scale * phi[i];
        }
    }
    Ok(())
}

/// Assembles the element gradient-source vector
/// `f_i = int grad phi_i . g(x) dV`, where the gradient data `g` is
/// evaluated at the physical coordinates of the quadrature points.
pub fn assemble_element_gradient_source_vector(
    output: &mut DVector<f64>,
    element_index: usize,
    geometry: &ElementGeometry,
    basis: &ReferenceBasis,
    rule: &QuadratureRule,
    source: &dyn DataSource,
    basis_gradients: &mut Matrix2xX<f64>,
    coords: &mut Vec<Point2<f64>>,
) -> Result<(), AssemblyError> {
    let n = basis.num_functions();
    assert_eq!(output.len(), n);
    assert_eq!(basis_gradients.ncols(), n);

    populate_physical_coords(coords, geometry, rule);
    let data = source
        .evaluate(element_index, coords, EvalMode::Gradient)
        .ok_or(AssemblyError::SourceModeUnavailable {
            mode: EvalMode::Gradient,
        })?;

    output.fill(0.0);

    for (q, (weight, point)) in izip!(rule.weights(), rule.points()).enumerate() {
        let jacobian = geometry.reference_jacobian(point);
        let j_det = jacobian.determinant();
        let jacobian_inv_t = jacobian
            .try_inverse()
            .ok_or(AssemblyError::SingularElementGeometry {
                element: element_index,
            })?
            .transpose();

        basis.populate_gradients(basis_gradients, point);
        let scale = weight * j_det.abs();
        let gx = data[(q, 0)];
        let gy = data[(q, 1)];
        for i in 0..n {
            let grad = &jacobian_inv_t * &basis_gradients.column(i).clone_owned();
            output[i] += scale * (grad[0] * gx + grad[1] * gy);
        }
    }
    Ok(())
}

fn populate_physical_coords(
    coords: &mut Vec<Point2<f64>>,
    geometry: &ElementGeometry,
    rule: &QuadratureRule,
) {
    coords.clear();
    coords.extend(rule.points().iter().map(|xi| geometry.map_reference_coords(xi)));
}

fn clone_upper_to_lower(matrix: &mut DMatrix<f64>) {
    for i in 1..matrix.nrows() {
        for j in 0..i {
            matrix[(i, j)] = matrix[(j, i)];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::ElementShape;
    use crate::mesh::create_unit_square_uniform_quad_mesh;
    use crate::source::ConstantSource;
    use matrixcompare::assert_scalar_eq;
    use nalgebra::Point2;
    use std::sync::Arc;

    fn unit_square_geometry() -> ElementGeometry {
        ElementGeometry::from_vertices(
            ElementShape::Quadrilateral,
            &[
                Point2::new(0.0, 0.0),
                Point2::new(1.0, 0.0),
                Point2::new(1.0, 1.0),
                Point2::new(0.0, 1.0),
            ],
        )
    }

    #[test]
    fn unit_square_mass_matrix_matches_reference() {
        let geometry = unit_square_geometry();
        let basis = ReferenceBasis::new(ElementShape::Quadrilateral, 1).unwrap();
        let rule = reference_rule(ElementShape::Quadrilateral, 2).unwrap();
        let mut output = DMatrix::zeros(4, 4);
        let mut values = vec![0.0; 4];

        assemble_element_mass_matrix(&mut output, &geometry, &basis, &rule, &mut values);

        // The bilinear mass matrix of the unit square is
        //  1/36 * [4 2 1 2; 2 4 2 1; 1 2 4 2; 2 1 2 4]
        let expected = DMatrix::from_row_slice(
            4,
            4,
            &[
                4.0, 2.0, 1.0, 2.0, //
                2.0, 4.0, 2.0, 1.0, //
                1.0, 2.0, 4.0, 2.0, //
                2.0, 1.0, 2.0, 4.0,
            ],
        ) / 36.0;
        for i in 0..4 {
            for j in 0..4 {
                assert_scalar_eq!(output[(i, j)], expected[(i, j)], comp = abs, tol = 1e-13);
            }
        }
    }

    #[test]
    fn unit_square_laplace_matrix_rows_sum_to_zero() {
        // Constants lie in the kernel of the diffusion operator
        let geometry = unit_square_geometry();
        let basis = ReferenceBasis::new(ElementShape::Quadrilateral, 1).unwrap();
        let rule = reference_rule(ElementShape::Quadrilateral, 2).unwrap();
        let mut output = DMatrix::zeros(4, 4);
        let mut gradients = Matrix2xX::zeros(4);

        assemble_element_laplace_matrix(&mut output, 0, &geometry, &basis, &rule, &mut gradients)
            .unwrap();

        for i in 0..4 {
            let row_sum: f64 = output.row(i).iter().sum();
            assert_scalar_eq!(row_sum, 0.0, comp = abs, tol = 1e-13);
        }
        assert_scalar_eq!(output[(0, 0)], 2.0 / 3.0, comp = abs, tol = 1e-13);
    }

    #[test]
    fn constant_source_vector_integrates_basis_functions() {
        let geometry = unit_square_geometry();
        let basis = ReferenceBasis::new(ElementShape::Quadrilateral, 1).unwrap();
        let rule = reference_rule(ElementShape::Quadrilateral, 2).unwrap();
        let source = ConstantSource::new(8.0);
        let mut output = DVector::zeros(4);
        let mut values = vec![0.0; 4];
        let mut coords = Vec::new();

        assemble_element_source_vector(
            &mut output,
            0,
            &geometry,
            &basis,
            &rule,
            &source,
            &mut values,
            &mut coords,
        )
        .unwrap();

        // int phi_i over the unit square is 1/4 for every bilinear function
        for i in 0..4 {
            assert_scalar_eq!(output[i], 2.0, comp = abs, tol = 1e-13);
        }
    }

    #[test]
    fn diffusion_r_rejects_value_only_sources() {
        let mesh = Arc::new(create_unit_square_uniform_quad_mesh(1));
        let space = Arc::new(crate::space::FieldSpace::new(mesh, 1).unwrap());
        let v = FieldVariable::test("v", &space, "u");
        // A constant source cannot produce gradients
        let source = Arc::new(ConstantSource::new(1.0));
        let result = Term::diffusion_r(source, &v, 2);
        assert_eq!(
            result.unwrap_err(),
            ConstructionError::UnsupportedEvalMode {
                term: "dw_diffusion_r",
                mode: EvalMode::Gradient,
            }
        );
    }

    #[test]
    fn matrix_terms_require_a_test_variable() {
        let mesh = Arc::new(create_unit_square_uniform_quad_mesh(1));
        let space = Arc::new(crate::space::FieldSpace::new(mesh, 1).unwrap());
        let u = FieldVariable::unknown("u", &space);
        let w = FieldVariable::unknown("w", &space);
        let result = Term::volume_dot(&w, &u, 2);
        assert!(matches!(
            result.unwrap_err(),
            ConstructionError::RoleMismatch { .. }
        ));
    }
}
