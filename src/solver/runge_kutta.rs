//! Runge-Kutta time stepping over a spatial operator
//!
//! A step with an s-stage Butcher table solves the coupled stage system
//!
//! ```text
//!     K_i = f(t + c_i * dt, y0 + dt * sum_j a_ij * K_j)     i = 1..s
//! ```
//!
//! with Newton iteration (implicit tables) or direct evaluation (explicit
//! tables), then combines `y1 = y0 + dt * sum_i b_i * K_i`.

use super::linalg::DenseLu;
use super::newton::{NewtonSolver, NewtonStatus};
use super::{NonlinearSystem, SolveError};
use crate::space::H1Space;
use crate::ConfigurationError;
use nalgebra::{DMatrix, DVector};

/// A Butcher table defining a Runge-Kutta method
#[derive(Clone, Debug)]
pub struct ButcherTable {
    pub a: Vec<Vec<f64>>,
    pub b: Vec<f64>,
    pub c: Vec<f64>,
}

impl ButcherTable {
    /// Construct and verify a custom table
    pub fn new(a: Vec<Vec<f64>>, b: Vec<f64>, c: Vec<f64>) -> Result<Self, ConfigurationError> {
        let table = Self { a, b, c };
        table.verify()?;
        Ok(table)
    }

    /// Check the structural consistency conditions: a square `a`, matching
    /// lengths, weights summing to one, and row sums matching `c`
    pub fn verify(&self) -> Result<(), ConfigurationError> {
        let s = self.b.len();
        if self.c.len() != s || self.a.len() != s || self.a.iter().any(|row| row.len() != s) {
            return Err(ConfigurationError::InvalidButcherTable(
                "dimensions are inconsistent".to_string(),
            ));
        }
        let weight_sum: f64 = self.b.iter().sum();
        if (weight_sum - 1.0).abs() > 1e-10 {
            return Err(ConfigurationError::InvalidButcherTable(format!(
                "weights sum to {} instead of 1",
                weight_sum
            )));
        }
        for (i, row) in self.a.iter().enumerate() {
            let row_sum: f64 = row.iter().sum();
            if (row_sum - self.c[i]).abs() > 1e-10 {
                return Err(ConfigurationError::InvalidButcherTable(format!(
                    "row {} sums to {} instead of c = {}",
                    i, row_sum, self.c[i]
                )));
            }
        }
        Ok(())
    }

    pub fn num_stages(&self) -> usize {
        self.b.len()
    }

    /// An explicit table is strictly lower triangular; its stages can be
    /// evaluated sequentially without a nonlinear solve
    pub fn is_explicit(&self) -> bool {
        self.a
            .iter()
            .enumerate()
            .all(|(i, row)| row.iter().skip(i).all(|entry| *entry == 0.0))
    }

    // ---- predefined tables ----

    pub fn explicit_euler() -> Self {
        Self {
            a: vec![vec![0.0]],
            b: vec![1.0],
            c: vec![0.0],
        }
    }

    pub fn heun2() -> Self {
        Self {
            a: vec![vec![0.0, 0.0], vec![1.0, 0.0]],
            b: vec![0.5, 0.5],
            c: vec![0.0, 1.0],
        }
    }

    pub fn classical_rk4() -> Self {
        Self {
            a: vec![
                vec![0.0, 0.0, 0.0, 0.0],
                vec![0.5, 0.0, 0.0, 0.0],
                vec![0.0, 0.5, 0.0, 0.0],
                vec![0.0, 0.0, 1.0, 0.0],
            ],
            b: vec![1.0 / 6.0, 1.0 / 3.0, 1.0 / 3.0, 1.0 / 6.0],
            c: vec![0.0, 0.5, 0.5, 1.0],
        }
    }

    pub fn implicit_euler() -> Self {
        Self {
            a: vec![vec![1.0]],
            b: vec![1.0],
            c: vec![1.0],
        }
    }

    /// The trapezoidal (Lobatto IIIA, order 2) table
    pub fn crank_nicolson() -> Self {
        Self {
            a: vec![vec![0.0, 0.0], vec![0.5, 0.5]],
            b: vec![0.5, 0.5],
            c: vec![0.0, 1.0],
        }
    }

    /// Two-stage SDIRK of order 2, L-stable
    pub fn sdirk22() -> Self {
        let gamma = 1.0 - std::f64::consts::FRAC_1_SQRT_2;
        Self {
            a: vec![vec![gamma, 0.0], vec![1.0 - gamma, gamma]],
            b: vec![1.0 - gamma, gamma],
            c: vec![gamma, 1.0],
        }
    }

    pub fn lobatto_iiic2() -> Self {
        Self {
            a: vec![vec![0.5, -0.5], vec![0.5, 0.5]],
            b: vec![0.5, 0.5],
            c: vec![0.0, 1.0],
        }
    }

    pub fn radau_iia2() -> Self {
        Self {
            a: vec![
                vec![5.0 / 12.0, -1.0 / 12.0],
                vec![0.75, 0.25],
            ],
            b: vec![0.75, 0.25],
            c: vec![1.0 / 3.0, 1.0],
        }
    }
}

/// The semidiscrete spatial operator `du/dt = f(t, u)` over a space's free
/// DoFs
pub trait SpatialOperator {
    /// Evaluate `f(t, u)`
    fn rhs(&self, space: &H1Space, time: f64, u: &DVector<f64>)
        -> Result<DVector<f64>, SolveError>;

    /// Evaluate the Jacobian `df/du` at `(t, u)`
    fn jacobian(
        &self,
        space: &H1Space,
        time: f64,
        u: &DVector<f64>,
    ) -> Result<DMatrix<f64>, SolveError>;
}

/// The coupled stage equations of one implicit step, as a [NonlinearSystem]
/// over the stacked stage vector `[K_1; ...; K_s]`
struct StageSystem<'a> {
    op: &'a dyn SpatialOperator,
    space: &'a H1Space,
    table: &'a ButcherTable,
    y0: &'a DVector<f64>,
    time: f64,
    dt: f64,
}

impl<'a> StageSystem<'a> {
    fn stage_state(&self, stages: &DVector<f64>, i: usize) -> DVector<f64> {
        let n = self.y0.len();
        let mut state = self.y0.clone();
        for (j, a_ij) in self.table.a[i].iter().enumerate() {
            if *a_ij != 0.0 {
                state += self.dt * *a_ij * stages.rows(j * n, n);
            }
        }
        state
    }
}

impl<'a> NonlinearSystem for StageSystem<'a> {
    fn dim(&self) -> usize {
        self.y0.len() * self.table.num_stages()
    }

    fn assemble(
        &mut self,
        stages: &DVector<f64>,
        need_jacobian: bool,
    ) -> Result<(DVector<f64>, Option<DMatrix<f64>>), SolveError> {
        let n = self.y0.len();
        let s = self.table.num_stages();

        let mut residual = DVector::zeros(n * s);
        let mut jacobian = need_jacobian.then(|| DMatrix::zeros(n * s, n * s));

        for i in 0..s {
            let state = self.stage_state(stages, i);
            let stage_time = self.time + self.table.c[i] * self.dt;
            let f = self.op.rhs(self.space, stage_time, &state)?;
            residual
                .rows_mut(i * n, n)
                .copy_from(&(stages.rows(i * n, n) - f));

            if let Some(jac) = jacobian.as_mut() {
                let df = self.op.jacobian(self.space, stage_time, &state)?;
                for j in 0..s {
                    let a_ij = self.table.a[i][j];
                    let mut block = jac.slice_mut((i * n, j * n), (n, n));
                    if a_ij != 0.0 {
                        block.copy_from(&(-self.dt * a_ij * &df));
                    }
                    if i == j {
                        for d in 0..n {
                            block[(d, d)] += 1.0;
                        }
                    }
                }
            }
        }

        Ok((residual, jacobian))
    }
}

/// The result of one time step
pub struct RkStep {
    /// Coefficients of the new solution over the space's free DoFs
    pub coeffs: DVector<f64>,
    pub newton: NewtonStatus,
}

/// A Runge-Kutta stepper pairing a [ButcherTable] with a Newton solver
pub struct RungeKutta {
    pub table: ButcherTable,
    pub newton: NewtonSolver,
    linear: DenseLu,
}

impl RungeKutta {
    pub fn new(table: ButcherTable, newton: NewtonSolver) -> Self {
        Self {
            table,
            newton,
            linear: DenseLu,
        }
    }

    /// Advance `prev` from `time` to `time + dt`
    ///
    /// Newton non-convergence is reported in the returned [RkStep], not as an
    /// error; the step coefficients then come from the last iterate.
    pub fn step(
        &mut self,
        space: &H1Space,
        op: &dyn SpatialOperator,
        prev: &DVector<f64>,
        time: f64,
        dt: f64,
    ) -> Result<RkStep, SolveError> {
        let n = prev.len();
        let s = self.table.num_stages();

        let (stages, status) = if self.table.is_explicit() {
            let mut stages = DVector::zeros(n * s);
            for i in 0..s {
                let mut state = prev.clone();
                for j in 0..i {
                    let a_ij = self.table.a[i][j];
                    if a_ij != 0.0 {
                        state += dt * a_ij * stages.rows(j * n, n);
                    }
                }
                let f = op.rhs(space, time + self.table.c[i] * dt, &state)?;
                stages.rows_mut(i * n, n).copy_from(&f);
            }
            let status = NewtonStatus {
                converged: true,
                iterations: 0,
                residual_norm: 0.0,
                cause: None,
            };
            (stages, status)
        } else {
            // initial guess: every stage starts from f(t, y0)
            let f0 = op.rhs(space, time, prev)?;
            let mut guess = DVector::zeros(n * s);
            for i in 0..s {
                guess.rows_mut(i * n, n).copy_from(&f0);
            }

            let mut system = StageSystem {
                op,
                space,
                table: &self.table,
                y0: prev,
                time,
                dt,
            };
            self.newton.solve(&mut system, &mut self.linear, guess)?
        };

        let mut coeffs = prev.clone();
        for (i, b_i) in self.table.b.iter().enumerate() {
            coeffs += dt * *b_i * stages.rows(i * n, n);
        }

        Ok(RkStep {
            coeffs,
            newton: status,
        })
    }
}
