//! Regression test for the manually driven time loop
//!
//! The manufactured solution `u = x + y + t` is linear in space and time, so
//! a p >= 1 space represents it exactly and backward Euler integrates it
//! without truncation error. The coefficient vector norm at the final time is
//! checked against its closed-form value.

mod common;

use hp_transient_2d::projection::{project_global, ProjNorm};
use hp_transient_2d::solver::linalg::l2_norm;
use hp_transient_2d::solver::newton::NewtonSolver;
use hp_transient_2d::solver::runge_kutta::{ButcherTable, RungeKutta};
use hp_transient_2d::space::essential_bc::{EssentialBC, EssentialBCs};
use hp_transient_2d::testing::test_value;
use hp_transient_2d::{ExactFunction, H1Space, Mesh, ScalarField};
use std::sync::Arc;

// sqrt of sum over the 15x15 interior grid nodes of (i/16 + j/16 + 0.3)^2
const RECORDED_COEFF_NORM: f64 = 20.32393917;

#[test]
fn recorded_coefficient_norm_is_reproduced() {
    let mut mesh = Mesh::rectangle(0.0, 0.0, 1.0, 1.0, 4, 4, "Bdy");
    mesh.refine_all_elements(1).unwrap();
    mesh.set_uniform_order(2);

    let bcs = Arc::new(EssentialBCs::new(vec![EssentialBC::time_dependent(
        "Bdy",
        |x, y, t| x + y + t,
    )]));
    let mut space = H1Space::new(&mesh, bcs, 0.0).unwrap();
    assert_eq!(space.num_dofs(), 225);

    let initial = ExactFunction::new(|x, y| x + y, |_, _| [1.0, 1.0]);
    let mut coeffs = project_global(
        &[&space],
        &[&initial as &dyn ScalarField],
        &[ProjNorm::H1],
    )
    .unwrap();

    let op = common::NonlinearDiffusion::linear_in_time();
    let mut rk = RungeKutta::new(
        ButcherTable::implicit_euler(),
        NewtonSolver::new(1e-10, 30),
    );

    let dt = 0.05;
    for step in 0..6 {
        let time = step as f64 * dt;
        // backward Euler evaluates everything at the end of the step
        space.update_essential_bc_values(time + dt);
        let result = rk.step(&space, &op, &coeffs, time, dt).unwrap();
        assert!(
            result.newton.converged,
            "newton failed at t = {}",
            time + dt
        );
        coeffs = result.coeffs;
    }

    let norm = l2_norm(&coeffs);
    assert!(test_value(
        norm,
        RECORDED_COEFF_NORM,
        "coefficient vector norm at t = 0.3",
        1e-1
    ));
}
