//! Nonlinear and time-stepping solvers
//!
//! [newton] drives damped-free Newton iteration over any [NonlinearSystem];
//! [runge_kutta] builds the stage systems of a Butcher-table method and hands
//! them to Newton. [linalg] holds the dense linear algebra underneath both.

pub mod linalg;
pub mod newton;
pub mod runge_kutta;

use nalgebra::{DMatrix, DVector};
use std::fmt;

/// Failure modes of the linear and nonlinear solvers
#[derive(Clone, Debug, PartialEq)]
pub enum SolveError {
    /// The linear system's matrix was singular to working precision
    SingularMatrix,
    /// A Jacobian was required but the assembly did not produce one
    MissingJacobian,
    /// Residual or Jacobian assembly failed with the given message
    AssemblyFailure(String),
}

impl fmt::Display for SolveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SingularMatrix => {
                write!(f, "Cannot solve linear system; Matrix is singular!")
            }
            Self::MissingJacobian => {
                write!(f, "Jacobian was requested but not assembled!")
            }
            Self::AssemblyFailure(msg) => {
                write!(f, "System assembly failed: {}!", msg)
            }
        }
    }
}

impl std::error::Error for SolveError {}

/// A square nonlinear system `R(u) = 0` solvable by Newton iteration
pub trait NonlinearSystem {
    fn dim(&self) -> usize;

    /// Evaluate the residual at `u`, and the Jacobian when `need_jacobian` is
    /// set
    ///
    /// Implementations may skip Jacobian assembly when it is not requested;
    /// the Newton solver exploits this when reusing a cached factorization.
    fn assemble(
        &mut self,
        u: &DVector<f64>,
        need_jacobian: bool,
    ) -> Result<(DVector<f64>, Option<DMatrix<f64>>), SolveError>;
}

/// A linear solver for the Newton update systems
pub trait LinearSolver {
    fn solve(&mut self, a: &DMatrix<f64>, b: &DVector<f64>) -> Result<DVector<f64>, SolveError>;
}
