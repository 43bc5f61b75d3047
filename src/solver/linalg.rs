//! Dense linear algebra for the solver layer

use super::{LinearSolver, SolveError};
use nalgebra::{DMatrix, DVector};

/// Dense LU factorization with partial pivoting
#[derive(Clone, Copy, Debug, Default)]
pub struct DenseLu;

impl LinearSolver for DenseLu {
    fn solve(&mut self, a: &DMatrix<f64>, b: &DVector<f64>) -> Result<DVector<f64>, SolveError> {
        a.clone().lu().solve(b).ok_or(SolveError::SingularMatrix)
    }
}

/// The Euclidean norm of a coefficient vector
pub fn l2_norm(v: &DVector<f64>) -> f64 {
    v.norm()
}
