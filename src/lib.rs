//! # hp_transient_2d
//!
//! An adaptive nonlinear finite-element time-integration driver for transient
//! PDE problems on 2D quadrilateral meshes.
//!
//! The crate orchestrates the numerical subsystems of a transient hp-FEM
//! calculation:
//! * [`Mesh`](mesh::Mesh): hierarchical h-refinement/derefinement with boundary
//!   and material markers
//! * [`H1Space`](space::H1Space): global DoF enumeration with essential
//!   boundary conditions and hanging-node conformity
//! * [`project_global`](projection::project_global): norm-minimizing projection
//!   of fields onto discrete spaces
//! * [`NewtonSolver`](solver::newton::NewtonSolver): nonlinear algebraic solves
//!   against an external assembly collaborator
//! * [`RungeKutta`](solver::runge_kutta::RungeKutta): time stepping from an
//!   arbitrary Butcher table, implicit or explicit
//! * [`calc_err_est`](adaptivity::calc_err_est) / [`adapt`](adaptivity::adapt):
//!   reference-solution error estimation and hp-refinement selection
//! * [`TimeStepOrchestrator`](transient::TimeStepOrchestrator): the top-level
//!   time-marching loop with periodic derefinement and spatial adaptivity
//!
//! PDE-specific weak forms, residuals, and Jacobians are supplied by the caller
//! through the [`SpatialOperator`](solver::runge_kutta::SpatialOperator) and
//! [`NonlinearSystem`](solver::NonlinearSystem) traits.

/// Error estimation and hp-refinement selection
pub mod adaptivity;
/// The geometric structure of the computational domain. Modified by h-refinements and derefinements.
pub mod mesh;
/// Global and local (element-wise) projection of fields onto discrete spaces
pub mod projection;
/// Evaluable solution fields: finite-element and analytic
pub mod solution;
/// Nonlinear and linear solver drivers and their collaborator traits
pub mod solver;
/// Discrete H1 function spaces over a Mesh
pub mod space;
/// Regression-test diagnostics
pub mod testing;
/// The top-level transient calculation driver
pub mod transient;

use std::fmt;

pub use mesh::Mesh;
pub use solution::{ExactFunction, FeSolution, ScalarField};
pub use space::H1Space;

/// Error type for mismatched or inconsistent setup arguments. Fatal at configuration time.
#[derive(Debug, Clone)]
pub enum ConfigurationError {
    /// The slices passed to a multi-field operation have different lengths
    MismatchedCounts {
        spaces: usize,
        sources: usize,
        norms: usize,
    },
    /// A Butcher table violates the Runge-Kutta consistency order conditions
    InvalidButcherTable(String),
    /// A projection Gram matrix could not be factorized (degenerate space)
    SingularGram,
}

impl fmt::Display for ConfigurationError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::MismatchedCounts {
                spaces,
                sources,
                norms,
            } => write!(
                f,
                "Mismatched argument counts: {} spaces, {} source functions, {} norms; Cannot Project!",
                spaces, sources, norms
            ),
            Self::InvalidButcherTable(msg) => {
                write!(f, "Butcher table violates order conditions: {}", msg)
            }
            Self::SingularGram => {
                write!(f, "Projection Gram matrix is singular; Cannot Project!")
            }
        }
    }
}
