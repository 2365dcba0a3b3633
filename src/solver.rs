//! Linear and nonlinear solvers for the assembled systems.
pub mod linear;
pub mod newton;

pub use linear::{FaerCholesky, FaerLu, LinearSolver, SolverOptions};
pub use newton::{NewtonSettings, NewtonSolver, NewtonState, NewtonStatus};
