//! Weak-form projection drivers.
//!
//! These assemble and solve small variational problems that project given
//! data onto a finite element space: L2 projection matches values in the
//! mean-square sense, H1 projection additionally matches gradients.
use std::sync::Arc;

use log::warn;
use nalgebra::DVector;
use nalgebra_sparse::csr::CsrMatrix;

use crate::assembly::{Equation, EquationSystem, Term};
use crate::error::{ConstructionError, ProjectionError};
use crate::solver::{FaerCholesky, LinearSolver, NewtonSolver, NewtonStatus};
use crate::source::{DataSource, FieldSource};
use crate::space::FieldSpace;
use crate::variable::{FieldVariable, VariableRole};

/// Projects `source` onto the space of `target` in the L2 sense, writing the
/// resulting DOF values into `target`.
///
/// Solves `dw_volume_dot(v, u) - dw_volume_lvf(d, v) = 0` with a sparse
/// Cholesky backend (the mass matrix is symmetric positive definite). The
/// quadrature order defaults to twice the approximation order of the target
/// space; pass `Some(order)` to override it, for instance when the data is
/// rough.
///
/// Non-convergence is not an error: the best available result is written to
/// `target`, a warning is logged, and the returned status carries a nonzero
/// condition code.
pub fn project_l2(
    target: &mut FieldVariable,
    source: Arc<dyn DataSource>,
    quadrature_order: Option<usize>,
) -> Result<NewtonStatus, ProjectionError> {
    project_l2_with_solver(target, source, quadrature_order, &FaerCholesky::default())
}

/// [`project_l2`] with a caller-provided linear solver.
pub fn project_l2_with_solver(
    target: &mut FieldVariable,
    source: Arc<dyn DataSource>,
    quadrature_order: Option<usize>,
    linear_solver: &dyn LinearSolver,
) -> Result<NewtonStatus, ProjectionError> {
    target.require_role(VariableRole::Unknown)?;
    let space = Arc::clone(target.space());
    let order = quadrature_order.unwrap_or_else(|| space.default_quadrature_order());

    let u = FieldVariable::unknown("u", &space);
    let v = FieldVariable::test("v", &space, "u");
    let equation = Equation::new("l2_projection", Term::volume_dot(&v, &u, order)?)
        .minus(Term::volume_lvf(source, &v, order)?)?;

    solve_projection(target, equation, linear_solver)
}

/// Projects the values of one field variable onto the space of another.
///
/// Both variables must live on the same mesh; the source is evaluated at the
/// quadrature points of the target's elements through its own basis.
pub fn project_l2_from_variable(
    target: &mut FieldVariable,
    source: &FieldVariable,
) -> Result<NewtonStatus, ProjectionError> {
    if !target.space().shares_mesh_with(source.space()) {
        return Err(ConstructionError::MeshMismatch {
            term: "dw_volume_lvf",
        }
        .into());
    }
    let order = target.space().default_quadrature_order();
    let field_source = Arc::new(FieldSource::from_variable(source, order)?);
    project_l2(target, field_source, Some(order))
}

/// Projects `source` onto the space of `target` in the H1 sense: both values
/// and gradients enter the projection.
///
/// Solves
/// `dw_volume_dot(v, u) + dw_laplace(v, u) - dw_volume_lvf(d, v) - dw_diffusion_r(d, v) = 0`.
/// The source must support gradient evaluation. The quadrature order is
/// always twice the approximation order of the target space.
pub fn project_h1(
    target: &mut FieldVariable,
    source: Arc<dyn DataSource>,
) -> Result<NewtonStatus, ProjectionError> {
    project_h1_with_solver(target, source, &FaerCholesky::default())
}

/// [`project_h1`] with a caller-provided linear solver.
pub fn project_h1_with_solver(
    target: &mut FieldVariable,
    source: Arc<dyn DataSource>,
    linear_solver: &dyn LinearSolver,
) -> Result<NewtonStatus, ProjectionError> {
    target.require_role(VariableRole::Unknown)?;
    let space = Arc::clone(target.space());
    let order = space.default_quadrature_order();

    let u = FieldVariable::unknown("u", &space);
    let v = FieldVariable::test("v", &space, "u");
    let equation = Equation::new("h1_projection", Term::volume_dot(&v, &u, order)?)
        .plus(Term::laplace(&v, &u, order)?)?
        .minus(Term::volume_lvf(Arc::clone(&source), &v, order)?)?
        .minus(Term::diffusion_r(source, &v, order)?)?;

    solve_projection(target, equation, linear_solver)
}

/// Assembles the mass matrix of a space, `M_ij = int phi_i phi_j dV`.
///
/// The quadrature order defaults to twice the approximation order of the
/// space.
pub fn create_mass_matrix(
    space: &Arc<FieldSpace>,
    quadrature_order: Option<usize>,
) -> Result<CsrMatrix<f64>, ProjectionError> {
    let order = quadrature_order.unwrap_or_else(|| space.default_quadrature_order());
    let u = FieldVariable::unknown("u", space);
    let v = FieldVariable::test("v", space, "u");
    let equation = Equation::new("mass", Term::volume_dot(&v, &u, order)?);

    let mut system = EquationSystem::new(vec![equation])?;
    let state = DVector::zeros(system.num_dofs());
    system.evaluate(&state)?;
    Ok(system.tangent().clone())
}

fn solve_projection(
    target: &mut FieldVariable,
    equation: Equation,
    linear_solver: &dyn LinearSolver,
) -> Result<NewtonStatus, ProjectionError> {
    let name = equation.name().to_string();
    let mut system = EquationSystem::new(vec![equation])?;
    let mut state = DVector::zeros(system.num_dofs());

    let status = NewtonSolver::default().solve(&mut system, linear_solver, &mut state)?;
    if !status.converged() {
        warn!(
            "{}: iteration did not converge (condition {}, residual norm {:.6e} after {} iterations); \
             keeping the last iterate",
            name, status.condition, status.residual_norm, status.iterations
        );
    }

    let offset = system
        .variable_offset("u")
        .expect("projection equations always number the unknown 'u'");
    target.set_data(state.rows(offset, target.space().num_dofs()).into_owned());
    Ok(status)
}
