//! Direct sparse linear solvers behind an opaque trait.
use nalgebra::DVector;
use nalgebra_sparse::csr::CsrMatrix;
use rustc_hash::FxHashMap;

use crate::error::LinearSolverError;

/// An opaque key/value option map for [`LinearSolver`] implementations.
///
/// The core never inspects the entries; they exist so that callers can pass
/// backend-specific configuration through the projection drivers without the
/// drivers knowing about any particular backend.
#[derive(Debug, Clone, Default)]
pub struct SolverOptions {
    entries: FxHashMap<String, String>,
}

impl SolverOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.entries.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }
}

/// A direct solver for the sparse linear systems arising in the Newton loop.
///
/// Implementations factorize on every call; the systems solved here are
/// factorized once per nonlinear iteration anyway, so there is nothing to be
/// gained from splitting factorization and solve at this interface.
pub trait LinearSolver {
    fn solve(
        &self,
        matrix: &CsrMatrix<f64>,
        rhs: &DVector<f64>,
    ) -> Result<DVector<f64>, LinearSolverError>;
}

fn to_faer(matrix: &CsrMatrix<f64>) -> faer::sparse::SparseRowMat<usize, f64> {
    let symbolic = faer::sparse::SymbolicSparseRowMat::new_checked(
        matrix.nrows(),
        matrix.ncols(),
        matrix.row_offsets().to_vec(),
        None,
        matrix.col_indices().to_vec(),
    );
    faer::sparse::SparseRowMat::new(symbolic, matrix.values().to_vec())
}

fn to_faer_col(rhs: &DVector<f64>) -> faer::Col<f64> {
    faer::Col::from_fn(rhs.nrows(), |i| rhs[i])
}

fn from_faer_col(col: faer::Col<f64>) -> DVector<f64> {
    DVector::from_iterator(col.nrows(), col.iter().copied())
}

/// Sparse LU with partial pivoting.
///
/// The general-purpose choice: works for any invertible tangent, symmetric
/// or not.
#[derive(Debug, Clone, Default)]
pub struct FaerLu {
    options: SolverOptions,
}

impl FaerLu {
    pub fn new(options: SolverOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &SolverOptions {
        &self.options
    }
}

impl LinearSolver for FaerLu {
    fn solve(
        &self,
        matrix: &CsrMatrix<f64>,
        rhs: &DVector<f64>,
    ) -> Result<DVector<f64>, LinearSolverError> {
        use faer::prelude::SpSolver;
        let lu = to_faer(matrix)
            .sp_lu()
            .map_err(|err| LinearSolverError::new(format!("sparse LU failed: {:?}", err)))?;
        Ok(from_faer_col(lu.solve(to_faer_col(rhs))))
    }
}

/// Sparse Cholesky (LLT) for symmetric positive definite systems.
///
/// Both the L2 and H1 projection tangents are SPD, so this is the natural
/// backend for the projection drivers.
#[derive(Debug, Clone, Default)]
pub struct FaerCholesky {
    options: SolverOptions,
}

impl FaerCholesky {
    pub fn new(options: SolverOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &SolverOptions {
        &self.options
    }
}

impl LinearSolver for FaerCholesky {
    fn solve(
        &self,
        matrix: &CsrMatrix<f64>,
        rhs: &DVector<f64>,
    ) -> Result<DVector<f64>, LinearSolverError> {
        use faer::prelude::SpSolver;
        let llt = to_faer(matrix)
            .sp_cholesky(faer::Side::Upper)
            .map_err(|err| LinearSolverError::new(format!("sparse Cholesky failed: {:?}", err)))?;
        Ok(from_faer_col(llt.solve(to_faer_col(rhs))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use matrixcompare::assert_scalar_eq;
    use nalgebra::DMatrix;

    fn dense_to_csr(dense: &DMatrix<f64>) -> CsrMatrix<f64> {
        CsrMatrix::from(dense)
    }

    #[test]
    fn lu_solves_a_small_unsymmetric_system() {
        let a = DMatrix::from_row_slice(2, 2, &[2.0, 1.0, 0.0, 4.0]);
        let rhs = DVector::from_column_slice(&[5.0, 8.0]);
        let x = FaerLu::default().solve(&dense_to_csr(&a), &rhs).unwrap();
        assert_scalar_eq!(x[0], 1.5, comp = abs, tol = 1e-12);
        assert_scalar_eq!(x[1], 2.0, comp = abs, tol = 1e-12);
    }

    #[test]
    fn cholesky_solves_a_small_spd_system() {
        let a = DMatrix::from_row_slice(2, 2, &[4.0, 1.0, 1.0, 3.0]);
        let rhs = DVector::from_column_slice(&[1.0, 2.0]);
        let x = FaerCholesky::default()
            .solve(&dense_to_csr(&a), &rhs)
            .unwrap();
        // Verify by substituting back
        let reconstructed = &a * &x;
        assert_scalar_eq!(reconstructed[0], 1.0, comp = abs, tol = 1e-12);
        assert_scalar_eq!(reconstructed[1], 2.0, comp = abs, tol = 1e-12);
    }

    #[test]
    fn options_are_passed_through_untouched() {
        let mut options = SolverOptions::new();
        options.set("use_umfpack", "false");
        let solver = FaerLu::new(options);
        assert_eq!(solver.options().get("use_umfpack"), Some("false"));
        assert_eq!(solver.options().get("absent"), None);
    }
}
