//! Weak-form term evaluation and global system assembly.
//!
//! The `local` module evaluates per-element contributions of individual
//! terms; the `global` module owns the DOF numbering and sparsity pattern and
//! scatter-adds local contributions into the global residual and tangent.
pub mod global;
pub mod local;

pub use global::{Equation, EquationSystem};
pub use local::{Sign, Term, TermKind};
