//! End-to-end test of the adaptive transient driver
//!
//! The nonlinear diffusion problem with the steady manufactured solution
//! `u = x + y` is started from a perturbed initial condition. The transient
//! bump decays under backward Euler, so the final solution must sit close to
//! the steady field regardless of how the mesh was adapted along the way.

mod common;

use hp_transient_2d::adaptivity::AdaptStrategy;
use hp_transient_2d::mesh::refinement::UnrefinementMethod;
use hp_transient_2d::projection::ProjNorm;
use hp_transient_2d::solver::runge_kutta::ButcherTable;
use hp_transient_2d::space::essential_bc::{EssentialBC, EssentialBCs};
use hp_transient_2d::transient::{DivergencePolicy, TimeStepOrchestrator, TransientConfig};
use hp_transient_2d::{ExactFunction, Mesh};
use std::f64::consts::PI;
use std::sync::Arc;

#[test]
fn perturbed_initial_condition_decays_to_the_steady_solution() {
    let mesh = Mesh::rectangle(0.0, 0.0, 1.0, 1.0, 2, 2, "Bdy");
    let bcs = Arc::new(EssentialBCs::new(vec![EssentialBC::time_dependent(
        "Bdy",
        |x, y, _| x + y,
    )]));

    let config = TransientConfig {
        time_step: 0.1,
        t_final: 0.5,
        initial_order: 2,
        order_increase: 1,
        unref_freq: 1,
        unref_method: UnrefinementMethod::StripLayer,
        strategy: AdaptStrategy::CumulativeFraction,
        threshold: 0.3,
        err_stop_percent: 5.0,
        ndof_stop: Some(500),
        max_adaptations: 3,
        newton_tolerance: 1e-6,
        newton_max_iterations: 25,
        jacobian_constant: false,
        butcher: ButcherTable::implicit_euler(),
        on_divergence: DivergencePolicy::Abort,
        proj_norm: ProjNorm::H1,
    };

    let mut driver = TimeStepOrchestrator::new(mesh, bcs, config);

    // a half-amplitude bump on top of the steady field
    let initial = ExactFunction::new(
        |x, y| x + y + 0.5 * (PI * x).sin() * (PI * y).sin(),
        |x, y| {
            [
                1.0 + 0.5 * PI * (PI * x).cos() * (PI * y).sin(),
                1.0 + 0.5 * PI * (PI * x).sin() * (PI * y).cos(),
            ]
        },
    );

    let op = common::NonlinearDiffusion::steady();
    let final_sln = driver.run(&op, &initial).unwrap();

    // the bump has decayed by several orders of magnitude by t = 0.5
    for (x, y) in [(0.5, 0.5), (0.25, 0.75), (0.8, 0.3), (0.1, 0.1)] {
        let value = final_sln.get_pt_value(x, y).unwrap();
        assert!(
            (value - (x + y)).abs() < 5e-2,
            "solution at ({}, {}) is {} but the steady field is {}",
            x,
            y,
            value,
            x + y
        );
    }
}
