//! A nonlinear diffusion operator shared by the integration tests
//!
//! The PDE is `du/dt = div(lambda(u) grad u) + f(x, y, t)` with
//! `lambda(u) = 1 + u^2`. Two manufactured problems are provided, both with
//! the exact solution known in closed form.

// not every test binary uses both manufactured problems
#![allow(dead_code)]

use hp_transient_2d::solver::runge_kutta::SpatialOperator;
use hp_transient_2d::solver::SolveError;
use hp_transient_2d::space::shape_fns::{gauss_legendre_01, lagrange_deriv, lagrange_value};
use hp_transient_2d::space::{H1Space, SpaceElem};
use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;

pub struct NonlinearDiffusion {
    source: Box<dyn Fn(f64, f64, f64) -> f64 + Send + Sync>,
    /// Time derivative of the prescribed boundary values, assumed spatially
    /// uniform
    boundary_rate: f64,
}

impl NonlinearDiffusion {
    /// Exact solution `u = x + y + t`: the source balances the PDE so the
    /// linear-in-time field is reproduced exactly by any p >= 1 space
    pub fn linear_in_time() -> Self {
        Self {
            source: Box::new(|x, y, t| 1.0 - 4.0 * (x + y + t)),
            boundary_rate: 1.0,
        }
    }

    /// Steady exact solution `u = x + y` with time-independent boundary
    /// values; transients decay toward it
    pub fn steady() -> Self {
        Self {
            source: Box::new(|x, y, _| -4.0 * (x + y)),
            boundary_rate: 0.0,
        }
    }

    /// Assemble the mass matrix, the stiffness-and-load vector
    /// `b - K(u) - M_uf * g'`, and optionally the stiffness Jacobian, all
    /// over the free DoFs of the space
    ///
    /// Element values are resolved through the space, so the current
    /// prescribed boundary values enter both `u` and its gradient. Callers
    /// must keep the space's boundary values synchronized with the stage time.
    fn assemble(
        &self,
        space: &H1Space,
        time: f64,
        u: &DVector<f64>,
        need_jacobian: bool,
    ) -> (DMatrix<f64>, DVector<f64>, Option<DMatrix<f64>>) {
        let ndof = space.num_dofs();
        let mut mass = DMatrix::zeros(ndof, ndof);
        let mut rhs = DVector::zeros(ndof);
        let mut stiff_jac = need_jacobian.then(|| DMatrix::zeros(ndof, ndof));

        struct Local {
            elem_idx: usize,
            mass: DMatrix<f64>,
            rhs: DVector<f64>,
            jac: Option<DMatrix<f64>>,
        }

        let locals: Vec<Local> = space
            .elems
            .par_iter()
            .enumerate()
            .map(|(elem_idx, elem)| {
                let values = space.element_values(elem_idx, u);
                let (mass, rhs, jac) =
                    self.local_system(elem, &values, time, need_jacobian);
                Local {
                    elem_idx,
                    mass,
                    rhs,
                    jac,
                }
            })
            .collect();

        for local in locals {
            let elem = &space.elems[local.elem_idx];
            let expansions: Vec<_> = elem
                .nodes
                .iter()
                .map(|node_idx| space.node_expansion(*node_idx))
                .collect();

            for (a, exp_a) in expansions.iter().enumerate() {
                for (dof_a, w_a) in &exp_a.dofs {
                    rhs[*dof_a] += w_a * local.rhs[a];
                    for (b, exp_b) in expansions.iter().enumerate() {
                        let m_ab = local.mass[(a, b)];
                        for (dof_b, w_b) in &exp_b.dofs {
                            mass[(*dof_a, *dof_b)] += w_a * w_b * m_ab;
                            if let (Some(jac), Some(local_jac)) =
                                (stiff_jac.as_mut(), local.jac.as_ref())
                            {
                                jac[(*dof_a, *dof_b)] += w_a * w_b * local_jac[(a, b)];
                            }
                        }
                        // moving boundary values contribute M_uf * g'
                        rhs[*dof_a] -= w_a * m_ab * exp_b.fixed_weight * self.boundary_rate;
                    }
                }
            }
        }

        (mass, rhs, stiff_jac)
    }

    fn local_system(
        &self,
        elem: &SpaceElem,
        values: &[f64],
        time: f64,
        need_jacobian: bool,
    ) -> (DMatrix<f64>, DVector<f64>, Option<DMatrix<f64>>) {
        let p = elem.degree;
        let n = p as usize + 1;
        let n_local = n * n;
        let (points, weights) = gauss_legendre_01(p as usize + 3);

        let width = elem.rect.width();
        let height = elem.rect.height();
        let jacobian_det = width * height;

        let mut mass = DMatrix::zeros(n_local, n_local);
        let mut rhs = DVector::zeros(n_local);
        let mut jac = need_jacobian.then(|| DMatrix::zeros(n_local, n_local));

        let mut phi = vec![0.0; n_local];
        let mut dphi_dx = vec![0.0; n_local];
        let mut dphi_dy = vec![0.0; n_local];

        for (qj, v) in points.iter().enumerate() {
            for (qi, u_par) in points.iter().enumerate() {
                let weight = weights[qi] * weights[qj] * jacobian_det;
                let pt = elem.rect.map(*u_par, *v);

                for j in 0..n {
                    let lv = lagrange_value(p, j, *v);
                    let ld = lagrange_deriv(p, j, *v);
                    for i in 0..n {
                        let a = j * n + i;
                        phi[a] = lagrange_value(p, i, *u_par) * lv;
                        dphi_dx[a] = lagrange_deriv(p, i, *u_par) / width * lv;
                        dphi_dy[a] = lagrange_value(p, i, *u_par) * ld / height;
                    }
                }

                let mut u_val = 0.0;
                let mut u_grad = [0.0, 0.0];
                for a in 0..n_local {
                    u_val += values[a] * phi[a];
                    u_grad[0] += values[a] * dphi_dx[a];
                    u_grad[1] += values[a] * dphi_dy[a];
                }

                let lambda = 1.0 + u_val * u_val;
                let dlambda = 2.0 * u_val;
                let f = (self.source)(pt.x, pt.y, time);

                for a in 0..n_local {
                    let grad_dot = u_grad[0] * dphi_dx[a] + u_grad[1] * dphi_dy[a];
                    rhs[a] += weight * (f * phi[a] - lambda * grad_dot);

                    for b in 0..n_local {
                        mass[(a, b)] += weight * phi[a] * phi[b];
                        if let Some(jac) = jac.as_mut() {
                            jac[(a, b)] += weight
                                * (dlambda * phi[b] * grad_dot
                                    + lambda
                                        * (dphi_dx[a] * dphi_dx[b] + dphi_dy[a] * dphi_dy[b]));
                        }
                    }
                }
            }
        }

        (mass, rhs, jac)
    }
}

impl SpatialOperator for NonlinearDiffusion {
    fn rhs(
        &self,
        space: &H1Space,
        time: f64,
        u: &DVector<f64>,
    ) -> Result<DVector<f64>, SolveError> {
        let (mass, rhs, _) = self.assemble(space, time, u, false);
        mass.lu().solve(&rhs).ok_or(SolveError::SingularMatrix)
    }

    fn jacobian(
        &self,
        space: &H1Space,
        time: f64,
        u: &DVector<f64>,
    ) -> Result<DMatrix<f64>, SolveError> {
        let (mass, _, stiff_jac) = self.assemble(space, time, u, true);
        let stiff_jac = stiff_jac.ok_or(SolveError::MissingJacobian)?;
        mass.lu()
            .solve(&(-stiff_jac))
            .ok_or(SolveError::SingularMatrix)
    }
}
