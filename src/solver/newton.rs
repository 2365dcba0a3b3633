//! Newton iteration on the residual and tangent of an [`EquationSystem`].
use log::debug;
use nalgebra::DVector;
use serde::{Deserialize, Serialize};

use crate::assembly::EquationSystem;
use crate::error::AssemblyError;
use crate::solver::linear::LinearSolver;

/// Parameters of the Newton iteration.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewtonSettings {
    /// Maximum number of Newton updates before the iteration is abandoned.
    pub max_iterations: usize,
    /// Residual norm below which the iteration is considered converged.
    pub tolerance: f64,
}

impl Default for NewtonSettings {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            tolerance: 1e-10,
        }
    }
}

/// The terminal phase of an iteration.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NewtonState {
    Converged,
    Diverged,
}

/// Outcome of a Newton solve.
///
/// `condition == 0` signals convergence; negative values classify the
/// failure. Non-convergence is reported here rather than as an error so that
/// callers can inspect the partial result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewtonStatus {
    /// `0` converged, `-1` iteration limit reached, `-2` linear solver failed.
    pub condition: i32,
    /// Residual norm at termination.
    pub residual_norm: f64,
    /// Number of Newton updates applied.
    pub iterations: usize,
}

impl NewtonStatus {
    pub fn converged(&self) -> bool {
        self.condition == 0
    }

    /// The terminal phase the iteration reached.
    pub fn state(&self) -> NewtonState {
        if self.condition == 0 {
            NewtonState::Converged
        } else {
            NewtonState::Diverged
        }
    }
}

/// A damped-free Newton iteration: at each step the tangent system
/// `J dx = -r` is solved by the given [`LinearSolver`] and the full update is
/// applied.
///
/// The loop never special-cases linear problems; for them the second residual
/// evaluation simply lands below the tolerance, terminating after exactly one
/// update.
#[derive(Debug, Default)]
pub struct NewtonSolver {
    settings: NewtonSettings,
}

impl NewtonSolver {
    pub fn new(settings: NewtonSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &NewtonSettings {
        &self.settings
    }

    /// Runs the iteration, updating `state` in place.
    ///
    /// Assembly failures abort the solve with an error; linear solver
    /// failures and hitting the iteration limit terminate it with a
    /// non-converged status and leave the last state intact.
    pub fn solve(
        &self,
        system: &mut EquationSystem,
        linear_solver: &dyn LinearSolver,
        state: &mut DVector<f64>,
    ) -> Result<NewtonStatus, AssemblyError> {
        let mut iterations = 0;

        loop {
            system.evaluate(state)?;
            let residual_norm = system.residual().norm();
            debug!(
                "newton: iteration {}, residual norm {:.6e}",
                iterations, residual_norm
            );

            if residual_norm <= self.settings.tolerance {
                return Ok(NewtonStatus {
                    condition: 0,
                    residual_norm,
                    iterations,
                });
            }
            if iterations >= self.settings.max_iterations {
                debug!(
                    "newton: iteration limit {} reached, residual norm {:.6e}",
                    self.settings.max_iterations, residual_norm
                );
                return Ok(NewtonStatus {
                    condition: -1,
                    residual_norm,
                    iterations,
                });
            }

            let rhs = -system.residual();
            match linear_solver.solve(system.tangent(), &rhs) {
                Ok(update) => {
                    *state += update;
                    iterations += 1;
                }
                Err(err) => {
                    debug!("newton: linear solver failed: {}", err);
                    return Ok(NewtonStatus {
                        condition: -2,
                        residual_norm,
                        iterations,
                    });
                }
            }
        }
    }
}
