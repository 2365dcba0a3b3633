use std::sync::Arc;

use galerkin::error::LinearSolverError;
use galerkin::mesh::{create_unit_square_uniform_quad_mesh, create_unit_square_uniform_tri_mesh};
use galerkin::projection::{project_h1, project_l2, project_l2_from_variable, project_l2_with_solver};
use galerkin::quadrature::reference_rule;
use galerkin::solver::LinearSolver;
use galerkin::source::{ConstantSource, DataSource, EvalMode, FieldSource, FnSource};
use galerkin::{FieldSpace, FieldVariable};

use matrixcompare::assert_scalar_eq;
use nalgebra::{DMatrix, DVector, Point2};
use nalgebra_sparse::csr::CsrMatrix;

/// A source for a scalar function given by closures for its value and
/// gradient.
fn analytic_source(
    value: impl Fn(&Point2<f64>) -> f64 + 'static,
    gradient: impl Fn(&Point2<f64>) -> [f64; 2] + 'static,
) -> Arc<dyn DataSource> {
    Arc::new(FnSource::new(move |coords, mode| match mode {
        EvalMode::Value => Some(DMatrix::from_iterator(
            coords.len(),
            1,
            coords.iter().map(&value),
        )),
        EvalMode::Gradient => {
            let mut output = DMatrix::zeros(coords.len(), 2);
            for (q, x) in coords.iter().enumerate() {
                let g = gradient(x);
                output[(q, 0)] = g[0];
                output[(q, 1)] = g[1];
            }
            Some(output)
        }
    }))
}

/// Evaluates a variable at the quadrature points of every element and checks
/// it against an exact function.
fn assert_matches_function(
    variable: &FieldVariable,
    exact: impl Fn(&Point2<f64>) -> f64,
    tol: f64,
) {
    let space = variable.space();
    let order = space.default_quadrature_order();
    let source = FieldSource::from_variable(variable, order).unwrap();
    let rule = reference_rule(space.shape(), order).unwrap();
    let mesh = space.mesh();

    for cell in 0..mesh.num_cells() {
        let geometry = mesh.cell_geometry(cell);
        let coords: Vec<_> = rule
            .points()
            .iter()
            .map(|xi| geometry.map_reference_coords(xi))
            .collect();
        let values = source.evaluate(cell, &coords, EvalMode::Value).unwrap();
        for (q, x) in coords.iter().enumerate() {
            assert_scalar_eq!(values[(q, 0)], exact(x), comp = abs, tol = tol);
        }
    }
}

#[test]
fn l2_projection_is_exact_for_functions_in_the_space() {
    // A full quadratic is contained in the Q2 space, so its projection
    // reproduces it up to solver tolerance
    let f = |x: &Point2<f64>| x.x * x.x - 2.0 * x.x * x.y + 3.0 * x.y + 1.0;
    let mesh = Arc::new(create_unit_square_uniform_quad_mesh(2));
    let space = Arc::new(FieldSpace::new(mesh, 2).unwrap());
    let mut target = FieldVariable::unknown("p", &space);

    let source = analytic_source(f, |x| [2.0 * x.x - 2.0 * x.y, -2.0 * x.x + 3.0]);
    let status = project_l2(&mut target, source, None).unwrap();

    assert_eq!(status.condition, 0);
    assert_matches_function(&target, f, 1e-9);
}

#[test]
fn l2_projection_accepts_a_quadrature_order_override() {
    let mesh = Arc::new(create_unit_square_uniform_tri_mesh(2));
    let space = Arc::new(FieldSpace::new(mesh, 1).unwrap());
    let mut target = FieldVariable::unknown("p", &space);

    let status = project_l2(&mut target, Arc::new(ConstantSource::new(2.0)), Some(6)).unwrap();
    assert!(status.converged());
    for &dof in target.data().iter() {
        assert_scalar_eq!(dof, 2.0, comp = abs, tol = 1e-9);
    }
}

#[test]
fn projection_onto_the_own_space_is_idempotent() {
    // x^3 is not representable in the P1 space, so the first projection
    // truncates it; projecting the result again must reproduce it
    let mesh = Arc::new(create_unit_square_uniform_tri_mesh(3));
    let space = Arc::new(FieldSpace::new(mesh, 1).unwrap());
    let mut first = FieldVariable::unknown("p1", &space);

    let source = analytic_source(|x| x.x * x.x * x.x, |x| [3.0 * x.x * x.x, 0.0]);
    project_l2(&mut first, source, None).unwrap();

    let mut second = FieldVariable::unknown("p2", &space);
    let status = project_l2_from_variable(&mut second, &first).unwrap();
    assert!(status.converged());

    for (a, b) in first.data().iter().zip(second.data().iter()) {
        assert_scalar_eq!(*a, *b, comp = abs, tol = 1e-9);
    }
}

#[test]
fn cross_mesh_variable_projection_is_rejected() {
    let mesh_a = Arc::new(create_unit_square_uniform_tri_mesh(2));
    let mesh_b = Arc::new(create_unit_square_uniform_tri_mesh(2));
    let space_a = Arc::new(FieldSpace::new(mesh_a, 1).unwrap());
    let space_b = Arc::new(FieldSpace::new(mesh_b, 1).unwrap());
    let source = FieldVariable::parameter("q", &space_a);
    let mut target = FieldVariable::unknown("p", &space_b);
    assert!(project_l2_from_variable(&mut target, &source).is_err());
}

#[test]
fn h1_projection_of_zero_data_is_zero() {
    let mesh = Arc::new(create_unit_square_uniform_quad_mesh(2));
    let space = Arc::new(FieldSpace::new(mesh, 2).unwrap());
    let mut target = FieldVariable::unknown("p", &space);

    let source = analytic_source(|_| 0.0, |_| [0.0, 0.0]);
    let status = project_h1(&mut target, source).unwrap();

    assert!(status.converged());
    for &dof in target.data().iter() {
        assert_scalar_eq!(dof, 0.0, comp = abs, tol = 1e-12);
    }
}

#[test]
fn h1_projection_reproduces_linear_functions() {
    let f = |x: &Point2<f64>| 2.0 * x.x - x.y + 0.5;
    let mesh = Arc::new(create_unit_square_uniform_tri_mesh(3));
    let space = Arc::new(FieldSpace::new(Arc::clone(&mesh), 1).unwrap());
    let mut target = FieldVariable::unknown("p", &space);

    let source = analytic_source(f, |_| [2.0, -1.0]);
    let status = project_h1(&mut target, source).unwrap();
    assert!(status.converged());

    // Order-1 DOFs are nodal at the vertices
    for (vertex, &dof) in mesh.vertices().iter().zip(target.data().iter()) {
        assert_scalar_eq!(dof, f(vertex), comp = abs, tol = 1e-9);
    }
}

#[test]
fn h1_projection_requires_gradient_data() {
    let mesh = Arc::new(create_unit_square_uniform_quad_mesh(1));
    let space = Arc::new(FieldSpace::new(mesh, 1).unwrap());
    let mut target = FieldVariable::unknown("p", &space);
    // Constant sources provide values only
    let result = project_h1(&mut target, Arc::new(ConstantSource::new(1.0)));
    assert!(result.is_err());
}

#[test]
fn single_element_constant_projection_converges_immediately() {
    let mesh = Arc::new(create_unit_square_uniform_quad_mesh(1));
    let space = Arc::new(FieldSpace::new(mesh, 1).unwrap());
    let mut target = FieldVariable::unknown("p", &space);

    let status = project_l2(&mut target, Arc::new(ConstantSource::new(3.0)), None).unwrap();

    assert_eq!(status.condition, 0);
    assert_eq!(status.iterations, 1);
    assert_eq!(target.data().len(), 4);
    for &dof in target.data().iter() {
        assert_scalar_eq!(dof, 3.0, comp = abs, tol = 1e-10);
    }
}

struct AlwaysFailingSolver;

impl LinearSolver for AlwaysFailingSolver {
    fn solve(
        &self,
        _matrix: &CsrMatrix<f64>,
        _rhs: &DVector<f64>,
    ) -> Result<DVector<f64>, LinearSolverError> {
        Err(LinearSolverError::new("deliberately failing"))
    }
}

#[test]
fn failing_linear_solver_yields_a_diagnostic_status_without_panicking() {
    let mesh = Arc::new(create_unit_square_uniform_quad_mesh(2));
    let space = Arc::new(FieldSpace::new(mesh, 1).unwrap());
    let mut target = FieldVariable::unknown("p", &space);

    let status = project_l2_with_solver(
        &mut target,
        Arc::new(ConstantSource::new(1.0)),
        None,
        &AlwaysFailingSolver,
    )
    .unwrap();

    assert_ne!(status.condition, 0);
    assert!(!status.converged());
    // The initial (zero) iterate is still written back
    assert!(target.data().iter().all(|&v| v == 0.0));
}
