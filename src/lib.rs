pub mod assembly;
pub mod element;
pub mod error;
pub mod mesh;
pub mod projection;
pub mod quadrature;
pub mod solver;
pub mod source;
pub mod space;
pub mod variable;

pub extern crate nalgebra;
pub extern crate nalgebra_sparse;

pub use crate::projection::{
    create_mass_matrix, project_h1, project_h1_with_solver, project_l2,
    project_l2_from_variable, project_l2_with_solver,
};
pub use crate::solver::NewtonStatus;
pub use crate::space::FieldSpace;
pub use crate::variable::{FieldVariable, VariableRole};
