use std::sync::Arc;

use galerkin::assembly::{Equation, EquationSystem, Term};
use galerkin::mesh::{create_unit_square_uniform_quad_mesh, create_unit_square_uniform_tri_mesh};
use galerkin::projection::create_mass_matrix;
use galerkin::source::ConstantSource;
use galerkin::{FieldSpace, FieldVariable};

use matrixcompare::assert_scalar_eq;
use nalgebra::{DMatrix, DVector};

fn l2_system(cells: usize, order: usize) -> EquationSystem {
    let mesh = Arc::new(create_unit_square_uniform_tri_mesh(cells));
    let space = Arc::new(FieldSpace::new(mesh, order).unwrap());
    let u = FieldVariable::unknown("u", &space);
    let v = FieldVariable::test("v", &space, "u");
    let quadrature_order = space.default_quadrature_order();
    let equation = Equation::new(
        "projection",
        Term::volume_dot(&v, &u, quadrature_order).unwrap(),
    )
    .minus(Term::volume_lvf(Arc::new(ConstantSource::new(1.0)), &v, quadrature_order).unwrap())
    .unwrap();
    EquationSystem::new(vec![equation]).unwrap()
}

#[test]
fn mass_matrix_is_symmetric_positive_definite() {
    for order in [1, 2] {
        let mesh = Arc::new(create_unit_square_uniform_tri_mesh(3));
        let space = Arc::new(FieldSpace::new(mesh, order).unwrap());
        let mass = create_mass_matrix(&space, None).unwrap();
        let dense = DMatrix::from(&mass);

        let asymmetry = (&dense - dense.transpose()).abs().max();
        assert_scalar_eq!(asymmetry, 0.0, comp = abs, tol = 1e-14);

        // Positive definiteness: a Cholesky factorization must exist
        assert!(dense.clone().cholesky().is_some());
    }
}

#[test]
fn mass_matrix_entries_sum_to_the_domain_area() {
    // Partition of unity: sum_ij M_ij = int 1 dV over the unit square
    let mesh = Arc::new(create_unit_square_uniform_quad_mesh(3));
    let space = Arc::new(FieldSpace::new(mesh, 1).unwrap());
    let mass = create_mass_matrix(&space, None).unwrap();
    let total: f64 = mass.values().iter().sum();
    assert_scalar_eq!(total, 1.0, comp = abs, tol = 1e-12);
}

#[test]
fn sparsity_pattern_is_deterministic_across_builds() {
    let first = l2_system(4, 2);
    let second = l2_system(4, 2);
    assert_eq!(
        first.pattern().major_offsets(),
        second.pattern().major_offsets()
    );
    assert_eq!(
        first.pattern().minor_indices(),
        second.pattern().minor_indices()
    );
}

#[test]
fn l2_tangent_equals_the_mass_matrix() {
    let mut system = l2_system(2, 1);
    let state = DVector::zeros(system.num_dofs());
    system.evaluate(&state).unwrap();

    let mesh = Arc::new(create_unit_square_uniform_tri_mesh(2));
    let space = Arc::new(FieldSpace::new(mesh, 1).unwrap());
    let mass = create_mass_matrix(&space, None).unwrap();

    let tangent_dense = DMatrix::from(system.tangent());
    let mass_dense = DMatrix::from(&mass);
    let difference = (&tangent_dense - &mass_dense).abs().max();
    assert_scalar_eq!(difference, 0.0, comp = abs, tol = 1e-14);
}

#[test]
fn residual_is_linear_in_the_state_for_matrix_terms() {
    let mut system = l2_system(2, 1);
    let n = system.num_dofs();

    let state: DVector<f64> = DVector::from_fn(n, |i, _| (i as f64) * 0.1 - 0.3);
    system.evaluate(&state).unwrap();
    let residual_at_state = system.residual().clone();

    system.evaluate(&DVector::zeros(n)).unwrap();
    let residual_at_zero = system.residual().clone();
    let tangent = DMatrix::from(system.tangent());

    // r(u) = M u + r(0) for the linear projection system
    let predicted = &tangent * &state + &residual_at_zero;
    for i in 0..n {
        assert_scalar_eq!(residual_at_state[i], predicted[i], comp = abs, tol = 1e-12);
    }
}
