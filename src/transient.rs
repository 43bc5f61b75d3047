//! The transient hp-adaptive driver
//!
//! Each time step runs an inner adaptivity loop: the working mesh is
//! uniformly refined into a reference mesh, the previous solution is carried
//! onto the reference space by projection, one Runge-Kutta step advances it,
//! and the reference result is projected back onto the working space for
//! error estimation. The working mesh is adapted and the step repeated until
//! the estimate falls below the stopping tolerance. The previous-step
//! solution is never touched inside the loop, so every repetition of the step
//! starts from identical data.

use crate::adaptivity::{adapt, calc_err_est, AdaptStrategy};
use crate::mesh::refinement::UnrefinementMethod;
use crate::mesh::{Mesh, MeshError};
use crate::projection::{project_global, ProjNorm};
use crate::solution::{FeSolution, ScalarField};
use crate::solver::newton::NewtonSolver;
use crate::solver::runge_kutta::{ButcherTable, RungeKutta, SpatialOperator};
use crate::solver::SolveError;
use crate::space::essential_bc::EssentialBCs;
use crate::space::H1Space;
use crate::ConfigurationError;
use std::fmt;
use std::sync::Arc;

/// What to do when Newton fails to converge inside a time step
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DivergencePolicy {
    /// Log a warning and continue from the last Newton iterate
    AcceptLastIterate,
    /// Abort the calculation with [TransientError::ConvergenceFailure]
    Abort,
}

/// Configuration of the transient driver
#[derive(Clone)]
pub struct TransientConfig {
    pub time_step: f64,
    pub t_final: f64,
    /// Uniform polynomial degree of the base mesh
    pub initial_order: u8,
    /// Degree increment of reference spaces over the working space
    pub order_increase: u8,
    /// Derefine the working mesh every this many time steps
    pub unref_freq: usize,
    pub unref_method: UnrefinementMethod,
    pub strategy: AdaptStrategy,
    pub threshold: f64,
    /// Stop adapting once the relative error estimate falls below this, in
    /// percent
    pub err_stop_percent: f64,
    /// Suppress refinement once the working space reaches this many DoFs
    pub ndof_stop: Option<usize>,
    /// Bail out of the inner adaptivity loop after this many adaptations
    pub max_adaptations: usize,
    pub newton_tolerance: f64,
    pub newton_max_iterations: usize,
    /// Assemble the Newton Jacobian once per solve and reuse it
    pub jacobian_constant: bool,
    pub butcher: ButcherTable,
    pub on_divergence: DivergencePolicy,
    pub proj_norm: ProjNorm,
}

impl Default for TransientConfig {
    fn default() -> Self {
        Self {
            time_step: 0.05,
            t_final: 0.5,
            initial_order: 2,
            order_increase: 1,
            unref_freq: 1,
            unref_method: UnrefinementMethod::StripLayerAndDecreaseOrder,
            strategy: AdaptStrategy::CumulativeFraction,
            threshold: 0.3,
            err_stop_percent: 1.0,
            ndof_stop: Some(60000),
            max_adaptations: 32,
            newton_tolerance: 1e-5,
            newton_max_iterations: 20,
            jacobian_constant: false,
            butcher: ButcherTable::implicit_euler(),
            on_divergence: DivergencePolicy::AcceptLastIterate,
            proj_norm: ProjNorm::H1,
        }
    }
}

/// Failure modes of a transient calculation
#[derive(Debug)]
pub enum TransientError {
    Mesh(MeshError),
    Solve(SolveError),
    Configuration(ConfigurationError),
    /// Newton diverged and the configuration demands an abort
    ConvergenceFailure { time: f64, residual_norm: f64 },
}

impl fmt::Display for TransientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mesh(err) => err.fmt(f),
            Self::Solve(err) => err.fmt(f),
            Self::Configuration(err) => err.fmt(f),
            Self::ConvergenceFailure {
                time,
                residual_norm,
            } => write!(
                f,
                "Newton iteration failed to converge at t = {} (residual norm {:.3e})!",
                time, residual_norm
            ),
        }
    }
}

impl std::error::Error for TransientError {}

impl From<MeshError> for TransientError {
    fn from(err: MeshError) -> Self {
        Self::Mesh(err)
    }
}

impl From<SolveError> for TransientError {
    fn from(err: SolveError) -> Self {
        Self::Solve(err)
    }
}

impl From<ConfigurationError> for TransientError {
    fn from(err: ConfigurationError) -> Self {
        Self::Configuration(err)
    }
}

/// Drives a transient calculation over a base mesh
///
/// Owns a pristine copy of the base mesh alongside the working mesh, so the
/// [ResetToBase](UnrefinementMethod::ResetToBase) derefinement can restore
/// the starting point exactly.
pub struct TimeStepOrchestrator {
    base_mesh: Mesh,
    mesh: Mesh,
    bcs: Arc<EssentialBCs>,
    config: TransientConfig,
}

impl TimeStepOrchestrator {
    pub fn new(mut base_mesh: Mesh, bcs: Arc<EssentialBCs>, config: TransientConfig) -> Self {
        base_mesh.set_uniform_order(config.initial_order);
        Self {
            mesh: base_mesh.clone(),
            base_mesh,
            bcs,
            config,
        }
    }

    /// The current working mesh
    pub fn mesh(&self) -> &Mesh {
        &self.mesh
    }

    fn derefine(&mut self) {
        match self.config.unref_method {
            UnrefinementMethod::ResetToBase => {
                self.mesh = self.base_mesh.clone();
            }
            UnrefinementMethod::StripLayer => {
                self.mesh.unrefine_all_elements();
                self.mesh.set_uniform_order(self.config.initial_order);
            }
            UnrefinementMethod::StripLayerAndDecreaseOrder => {
                self.mesh.unrefine_all_elements();
                self.mesh.adjust_element_order(-1);
            }
        }
    }

    /// Run the calculation from the given initial condition and return the
    /// solution at `t_final`
    pub fn run(
        &mut self,
        op: &dyn SpatialOperator,
        initial: &dyn ScalarField,
    ) -> Result<FeSolution, TransientError> {
        let config = self.config.clone();
        config.butcher.verify()?;

        let mut newton = NewtonSolver::new(config.newton_tolerance, config.newton_max_iterations);
        newton.set_jacobian_constant(config.jacobian_constant);
        let mut rk = RungeKutta::new(config.butcher.clone(), newton);

        // initial condition on the working space at t = 0
        let initial_space = H1Space::new(&self.mesh, self.bcs.clone(), 0.0)?;
        let initial_coeffs =
            project_global(&[&initial_space], &[initial], &[config.proj_norm])?;
        let mut prev = FeSolution::new(initial_space, initial_coeffs);

        let mut time = 0.0;
        let mut time_step = 1usize;
        let dt = config.time_step;

        while time < config.t_final - 1e-10 * dt {
            let next_time = time + dt;
            log::info!(
                "time step {}: t = {:.6} -> {:.6}",
                time_step,
                time,
                next_time
            );

            if time_step > 1 && time_step % config.unref_freq.max(1) == 0 {
                self.derefine();
            }

            let mut adaptations = 0;
            prev = loop {
                // reference companions of the working mesh and space
                let ref_mesh = self.mesh.create_reference_mesh()?;
                let ref_space = H1Space::reference(
                    &ref_mesh,
                    self.bcs.clone(),
                    config.order_increase,
                    next_time,
                )?;

                // previous-step solution carried onto the reference space
                let y0 = project_global(
                    &[&ref_space],
                    &[&prev as &dyn ScalarField],
                    &[config.proj_norm],
                )?;

                let step = rk.step(&ref_space, op, &y0, time, dt)?;
                if !step.newton.converged {
                    match config.on_divergence {
                        DivergencePolicy::Abort => {
                            return Err(TransientError::ConvergenceFailure {
                                time: next_time,
                                residual_norm: step.newton.residual_norm,
                            });
                        }
                        DivergencePolicy::AcceptLastIterate => {
                            log::warn!(
                                "newton did not converge at t = {:.6} (residual {:.3e}); \
                                 continuing from the last iterate",
                                next_time,
                                step.newton.residual_norm
                            );
                        }
                    }
                }
                let ref_sln = FeSolution::new(ref_space, step.coeffs);

                // projection back onto the working space for error estimation
                let coarse_space = H1Space::new(&self.mesh, self.bcs.clone(), next_time)?;
                let coarse_ndof = coarse_space.num_dofs();
                let coarse_coeffs = project_global(
                    &[&coarse_space],
                    &[&ref_sln as &dyn ScalarField],
                    &[config.proj_norm],
                )?;
                let coarse_sln = FeSolution::new(coarse_space, coarse_coeffs);

                let estimate = calc_err_est(&coarse_sln, &ref_sln);
                log::info!(
                    "  ndof: {} (coarse) / {} (reference), error estimate: {:.4}%",
                    coarse_ndof,
                    ref_sln.space.num_dofs(),
                    estimate.total_rel_percent
                );

                if estimate.total_rel_percent < config.err_stop_percent {
                    break ref_sln;
                }
                if adaptations >= config.max_adaptations {
                    log::warn!(
                        "adaptation budget exhausted at t = {:.6}; accepting the step at {:.4}%",
                        next_time,
                        estimate.total_rel_percent
                    );
                    break ref_sln;
                }

                let done = adapt(
                    &mut self.mesh,
                    &estimate,
                    config.strategy,
                    config.threshold,
                    config.ndof_stop,
                    coarse_ndof,
                )?;
                if done {
                    break ref_sln;
                }
                adaptations += 1;
            };

            time = next_time;
            time_step += 1;
        }

        Ok(prev)
    }
}
