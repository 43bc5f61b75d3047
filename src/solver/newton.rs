//! Newton iteration over a [NonlinearSystem]

use super::{LinearSolver, NonlinearSystem, SolveError};
use nalgebra::{DMatrix, DVector};

/// Why a Newton solve stopped without converging
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DivergenceCause {
    MaxIterations,
    ResidualGrowth,
}

/// The outcome of a Newton solve
///
/// Non-convergence is reported here rather than as an error; the caller
/// decides whether the last iterate is still usable.
#[derive(Clone, Debug)]
pub struct NewtonStatus {
    pub converged: bool,
    pub iterations: usize,
    pub residual_norm: f64,
    pub cause: Option<DivergenceCause>,
}

/// A Newton solver with optional Jacobian caching
///
/// With [`set_jacobian_constant`](NewtonSolver::set_jacobian_constant) the
/// Jacobian is assembled once and reused for every subsequent iteration and
/// solve, which is exact for linear problems and a cheap quasi-Newton scheme
/// otherwise. `max_steps_with_reused_jacobian` allows bounded reuse without
/// assuming constancy.
pub struct NewtonSolver {
    pub tolerance: f64,
    pub max_iterations: usize,
    /// Divergence is declared when the residual norm exceeds this multiple of
    /// the initial residual norm
    pub residual_growth_limit: f64,
    jacobian_constant: bool,
    max_steps_with_reused_jacobian: usize,
    cached_jacobian: Option<DMatrix<f64>>,
}

impl NewtonSolver {
    pub fn new(tolerance: f64, max_iterations: usize) -> Self {
        Self {
            tolerance,
            max_iterations,
            residual_growth_limit: 1e8,
            jacobian_constant: false,
            max_steps_with_reused_jacobian: 0,
            cached_jacobian: None,
        }
    }

    /// Assemble the Jacobian once and reuse it for all iterations and solves
    pub fn set_jacobian_constant(&mut self, constant: bool) {
        self.jacobian_constant = constant;
        if !constant {
            self.cached_jacobian = None;
        }
    }

    /// Reuse each assembled Jacobian for up to `steps` further iterations
    pub fn set_max_steps_with_reused_jacobian(&mut self, steps: usize) {
        self.max_steps_with_reused_jacobian = steps;
    }

    /// Run Newton iteration from `initial_guess`
    ///
    /// Returns the final iterate and a [NewtonStatus]; hard failures of the
    /// linear solver or the assembly surface as `Err`.
    pub fn solve<S: NonlinearSystem, L: LinearSolver>(
        &mut self,
        system: &mut S,
        linear: &mut L,
        initial_guess: DVector<f64>,
    ) -> Result<(DVector<f64>, NewtonStatus), SolveError> {
        let mut u = initial_guess;
        if !self.jacobian_constant {
            self.cached_jacobian = None;
        }
        // space rebuilds change the system size between solves; a cached
        // Jacobian of the wrong dimension must not reach the linear solver
        if self
            .cached_jacobian
            .as_ref()
            .map(|jac| jac.nrows() != system.dim())
            .unwrap_or(false)
        {
            self.cached_jacobian = None;
        }

        let mut initial_residual_norm = None;
        let mut steps_with_reused = 0usize;

        for iteration in 1..=self.max_iterations {
            let need_jacobian = match &self.cached_jacobian {
                None => true,
                Some(_) if self.jacobian_constant => false,
                Some(_) if steps_with_reused < self.max_steps_with_reused_jacobian => false,
                Some(_) => true,
            };

            let (residual, jacobian) = system.assemble(&u, need_jacobian)?;
            let residual_norm = residual.norm();
            log::debug!(
                "newton iteration {}: residual norm {:.3e}",
                iteration,
                residual_norm
            );

            let initial = *initial_residual_norm.get_or_insert(residual_norm);
            if residual_norm < self.tolerance {
                return Ok((
                    u,
                    NewtonStatus {
                        converged: true,
                        iterations: iteration - 1,
                        residual_norm,
                        cause: None,
                    },
                ));
            }
            if residual_norm > self.residual_growth_limit * initial.max(self.tolerance) {
                return Ok((
                    u,
                    NewtonStatus {
                        converged: false,
                        iterations: iteration - 1,
                        residual_norm,
                        cause: Some(DivergenceCause::ResidualGrowth),
                    },
                ));
            }

            if need_jacobian {
                self.cached_jacobian = Some(jacobian.ok_or(SolveError::MissingJacobian)?);
                steps_with_reused = 0;
            } else {
                steps_with_reused += 1;
            }

            let jacobian_ref = self
                .cached_jacobian
                .as_ref()
                .ok_or(SolveError::MissingJacobian)?;
            let delta = linear.solve(jacobian_ref, &residual)?;
            u -= &delta;

            if delta.norm() < self.tolerance {
                return Ok((
                    u,
                    NewtonStatus {
                        converged: true,
                        iterations: iteration,
                        residual_norm,
                        cause: None,
                    },
                ));
            }
        }

        // final residual for reporting
        let (residual, _) = system.assemble(&u, false)?;
        Ok((
            u,
            NewtonStatus {
                converged: false,
                iterations: self.max_iterations,
                residual_norm: residual.norm(),
                cause: Some(DivergenceCause::MaxIterations),
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::linalg::DenseLu;
    use nalgebra::dvector;

    /// R(u) = u^2 - 4, root at u = 2
    struct Quadratic;

    impl NonlinearSystem for Quadratic {
        fn dim(&self) -> usize {
            1
        }

        fn assemble(
            &mut self,
            u: &DVector<f64>,
            need_jacobian: bool,
        ) -> Result<(DVector<f64>, Option<DMatrix<f64>>), SolveError> {
            let residual = dvector![u[0] * u[0] - 4.0];
            let jacobian = need_jacobian.then(|| DMatrix::from_element(1, 1, 2.0 * u[0]));
            Ok((residual, jacobian))
        }
    }

    #[test]
    fn converges_on_a_scalar_root() {
        let mut newton = NewtonSolver::new(1e-12, 50);
        let (u, status) = newton
            .solve(&mut Quadratic, &mut DenseLu, dvector![3.0])
            .unwrap();
        assert!(status.converged);
        assert!((u[0] - 2.0).abs() < 1e-10);
        assert!(status.iterations < 10);
    }

    #[test]
    fn iteration_budget_exhaustion_is_reported() {
        let mut newton = NewtonSolver::new(1e-12, 2);
        let (_, status) = newton
            .solve(&mut Quadratic, &mut DenseLu, dvector![100.0])
            .unwrap();
        assert!(!status.converged);
        assert_eq!(status.cause, Some(DivergenceCause::MaxIterations));
        assert_eq!(status.iterations, 2);
    }

    /// R(u) = cbrt(u); Newton's update is u <- -2u, so the iterates diverge
    struct CubeRoot;

    impl NonlinearSystem for CubeRoot {
        fn dim(&self) -> usize {
            1
        }

        fn assemble(
            &mut self,
            u: &DVector<f64>,
            need_jacobian: bool,
        ) -> Result<(DVector<f64>, Option<DMatrix<f64>>), SolveError> {
            let residual = dvector![u[0].cbrt()];
            let jacobian =
                need_jacobian.then(|| DMatrix::from_element(1, 1, u[0].abs().powf(-2.0 / 3.0) / 3.0));
            Ok((residual, jacobian))
        }
    }

    #[test]
    fn residual_growth_is_detected() {
        let mut newton = NewtonSolver::new(1e-12, 100);
        newton.residual_growth_limit = 2.0;
        let (_, status) = newton
            .solve(&mut CubeRoot, &mut DenseLu, dvector![1.0])
            .unwrap();
        assert!(!status.converged);
        assert_eq!(status.cause, Some(DivergenceCause::ResidualGrowth));
    }

    /// A linear system that counts Jacobian assemblies
    struct CountingLinear {
        jacobian_assemblies: usize,
    }

    impl NonlinearSystem for CountingLinear {
        fn dim(&self) -> usize {
            1
        }

        fn assemble(
            &mut self,
            u: &DVector<f64>,
            need_jacobian: bool,
        ) -> Result<(DVector<f64>, Option<DMatrix<f64>>), SolveError> {
            let residual = dvector![3.0 * u[0] - 6.0];
            let jacobian = need_jacobian.then(|| {
                self.jacobian_assemblies += 1;
                DMatrix::from_element(1, 1, 3.0)
            });
            Ok((residual, jacobian))
        }
    }

    #[test]
    fn constant_jacobian_is_assembled_once() {
        let mut system = CountingLinear {
            jacobian_assemblies: 0,
        };
        let mut newton = NewtonSolver::new(1e-12, 20);
        newton.set_jacobian_constant(true);

        let (u, status) = newton
            .solve(&mut system, &mut DenseLu, dvector![0.0])
            .unwrap();
        assert!(status.converged);
        assert!((u[0] - 2.0).abs() < 1e-12);

        // a second solve reuses the cached factor source
        let (_, status) = newton
            .solve(&mut system, &mut DenseLu, dvector![10.0])
            .unwrap();
        assert!(status.converged);
        assert_eq!(system.jacobian_assemblies, 1);
    }

    /// R(u) = 2u - 1 over a configurable number of unknowns
    struct ResizableLinear {
        dim: usize,
        jacobian_assemblies: usize,
    }

    impl NonlinearSystem for ResizableLinear {
        fn dim(&self) -> usize {
            self.dim
        }

        fn assemble(
            &mut self,
            u: &DVector<f64>,
            need_jacobian: bool,
        ) -> Result<(DVector<f64>, Option<DMatrix<f64>>), SolveError> {
            let residual = 2.0 * u - DVector::from_element(self.dim, 1.0);
            let jacobian = need_jacobian.then(|| {
                self.jacobian_assemblies += 1;
                DMatrix::identity(self.dim, self.dim) * 2.0
            });
            Ok((residual, jacobian))
        }
    }

    #[test]
    fn cached_jacobian_is_dropped_when_the_system_size_changes() {
        let mut newton = NewtonSolver::new(1e-12, 20);
        newton.set_jacobian_constant(true);

        let mut small = ResizableLinear {
            dim: 2,
            jacobian_assemblies: 0,
        };
        let (u, status) = newton
            .solve(&mut small, &mut DenseLu, DVector::zeros(2))
            .unwrap();
        assert!(status.converged);
        assert!((u[0] - 0.5).abs() < 1e-12);

        // the 2x2 cache must be rebuilt for the 3-dof system, not reused
        let mut large = ResizableLinear {
            dim: 3,
            jacobian_assemblies: 0,
        };
        let (u, status) = newton
            .solve(&mut large, &mut DenseLu, DVector::zeros(3))
            .unwrap();
        assert!(status.converged);
        assert_eq!(large.jacobian_assemblies, 1);
        assert!((u[2] - 0.5).abs() < 1e-12);
    }
}
