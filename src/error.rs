//! Error types for term construction, system assembly and linear solves.
use std::error::Error;
use std::fmt;
use std::fmt::Display;

use crate::element::ElementShape;
use crate::quadrature::QuadratureError;
use crate::source::EvalMode;
use crate::variable::VariableRole;

/// Errors raised while constructing spaces, variables, terms or equations.
///
/// These indicate a malformed problem description and are always fatal:
/// they are raised immediately at construction, never deferred to solve time.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum ConstructionError {
    /// The requested approximation order is not supported by any basis.
    UnsupportedApproximationOrder { order: usize },
    /// A variable was used in a position requiring a different role.
    RoleMismatch {
        variable: String,
        expected: VariableRole,
        found: VariableRole,
    },
    /// A test variable was created without naming its primary unknown.
    TestWithoutPrimary { variable: String },
    /// Two operands of a term live on different meshes.
    MeshMismatch { term: &'static str },
    /// Two operands of a term have different element shapes.
    ShapeMismatch {
        term: &'static str,
        test: ElementShape,
        other: ElementShape,
    },
    /// A term was added to an equation whose test variable differs.
    TestVariableMismatch { equation: String, term: &'static str },
    /// A data source does not support a mode required by the term.
    UnsupportedEvalMode { term: &'static str, mode: EvalMode },
    /// No quadrature rule satisfying the requirements is available.
    Quadrature(QuadratureError),
}

impl Display for ConstructionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsupportedApproximationOrder { order } => {
                write!(f, "unsupported approximation order {}", order)
            }
            Self::RoleMismatch {
                variable,
                expected,
                found,
            } => {
                write!(
                    f,
                    "variable '{}' has role {:?}, but role {:?} is required here",
                    variable, found, expected
                )
            }
            Self::TestWithoutPrimary { variable } => {
                write!(
                    f,
                    "test variable '{}' does not name the primary unknown it pairs with",
                    variable
                )
            }
            Self::MeshMismatch { term } => {
                write!(f, "operands of term '{}' live on different meshes", term)
            }
            Self::ShapeMismatch { term, test, other } => {
                write!(
                    f,
                    "operands of term '{}' have different element shapes ({:?} vs {:?})",
                    term, test, other
                )
            }
            Self::TestVariableMismatch { equation, term } => {
                write!(
                    f,
                    "term '{}' added to equation '{}' uses a different test variable",
                    term, equation
                )
            }
            Self::UnsupportedEvalMode { term, mode } => {
                write!(
                    f,
                    "data source bound to term '{}' does not support evaluation mode {:?}",
                    term, mode
                )
            }
            Self::Quadrature(err) => {
                write!(f, "quadrature rule construction failed: {}", err)
            }
        }
    }
}

impl Error for ConstructionError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Quadrature(err) => Some(err),
            _ => None,
        }
    }
}

impl From<QuadratureError> for ConstructionError {
    fn from(err: QuadratureError) -> Self {
        Self::Quadrature(err)
    }
}

/// Errors raised while building the DOF numbering and sparsity pattern
/// or while evaluating residual and tangent contributions.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum AssemblyError {
    /// A variable referenced by a term has no entry in the DOF numbering.
    SpaceNotNumbered { variable: String },
    /// Two numbered variables share a name but refer to different spaces.
    ConflictingNumbering { variable: String },
    /// A data source stopped providing a mode it supported at construction.
    SourceModeUnavailable { mode: EvalMode },
    /// An element's geometric map is degenerate (non-invertible Jacobian).
    SingularElementGeometry { element: usize },
    /// The state vector handed to `evaluate` has the wrong length.
    StateDimensionMismatch { expected: usize, found: usize },
}

impl Display for AssemblyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SpaceNotNumbered { variable } => {
                write!(
                    f,
                    "variable '{}' is not present in the DOF numbering of the equation system",
                    variable
                )
            }
            Self::ConflictingNumbering { variable } => {
                write!(
                    f,
                    "variable name '{}' is bound to two different field spaces",
                    variable
                )
            }
            Self::SourceModeUnavailable { mode } => {
                write!(f, "data source no longer provides values for mode {:?}", mode)
            }
            Self::SingularElementGeometry { element } => {
                write!(
                    f,
                    "the geometric map of element {} has a singular Jacobian",
                    element
                )
            }
            Self::StateDimensionMismatch { expected, found } => {
                write!(
                    f,
                    "state vector has {} entries, but the DOF numbering has {}",
                    found, expected
                )
            }
        }
    }
}

impl Error for AssemblyError {}

/// Failure reported by a [`LinearSolver`](crate::solver::LinearSolver)
/// implementation, typically a singular or near-singular system.
#[derive(Debug, Clone)]
pub struct LinearSolverError {
    message: String,
}

impl LinearSolverError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl Display for LinearSolverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "linear solver failure: {}", self.message)
    }
}

impl Error for LinearSolverError {}

/// Top-level error type returned by the projection drivers.
///
/// Solver and convergence failures are deliberately *not* part of this type;
/// they are surfaced through [`NewtonStatus`](crate::solver::NewtonStatus)
/// so that callers can decide how to treat them.
#[derive(Debug)]
#[non_exhaustive]
pub enum ProjectionError {
    Construction(ConstructionError),
    Assembly(AssemblyError),
}

impl Display for ProjectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Construction(err) => write!(f, "{}", err),
            Self::Assembly(err) => write!(f, "{}", err),
        }
    }
}

impl Error for ProjectionError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Construction(err) => Some(err),
            Self::Assembly(err) => Some(err),
        }
    }
}

impl From<ConstructionError> for ProjectionError {
    fn from(err: ConstructionError) -> Self {
        Self::Construction(err)
    }
}

impl From<AssemblyError> for ProjectionError {
    fn from(err: AssemblyError) -> Self {
        Self::Assembly(err)
    }
}

impl From<QuadratureError> for ProjectionError {
    fn from(err: QuadratureError) -> Self {
        Self::Construction(ConstructionError::Quadrature(err))
    }
}
