//! Global and local projection of scalar fields onto [H1Space]s
//!
//! Global projection solves the Gram system of the chosen norm, so the result
//! is the best approximation of the source in that norm. It is the bridge
//! between spaces: previous-step solutions are carried onto reference spaces,
//! and reference solutions back onto coarse spaces, by projection.

use crate::solution::{FeSolution, ScalarField};
use crate::space::shape_fns::{gauss_legendre_01, lagrange_deriv, lagrange_value};
use crate::space::{H1Space, NodeClass, SpaceElem};
use crate::ConfigurationError;
use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;

/// The norm minimized by a global projection
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProjNorm {
    L2,
    H1,
}

/// The dense local Gram matrix and load vector of one element
struct LocalSystem {
    elem_idx: usize,
    matrix: DMatrix<f64>,
    rhs: DVector<f64>,
}

fn local_system(
    elem_idx: usize,
    elem: &SpaceElem,
    source: &dyn ScalarField,
    norm: ProjNorm,
) -> LocalSystem {
    let p = elem.degree;
    let n = p as usize + 1;
    let n_local = n * n;
    let (points, weights) = gauss_legendre_01(p as usize + 2);

    let width = elem.rect.width();
    let height = elem.rect.height();
    let jacobian = width * height;

    let mut matrix = DMatrix::zeros(n_local, n_local);
    let mut rhs = DVector::zeros(n_local);

    for (qj, v) in points.iter().enumerate() {
        for (qi, u) in points.iter().enumerate() {
            let weight = weights[qi] * weights[qj] * jacobian;
            let pt = elem.rect.map(*u, *v);

            // tensor-product basis values and derivatives at the quad point
            let mut phi = vec![0.0; n_local];
            let mut dphi_dx = vec![0.0; n_local];
            let mut dphi_dy = vec![0.0; n_local];
            for j in 0..n {
                let lv = lagrange_value(p, j, *v);
                let ld = lagrange_deriv(p, j, *v);
                for i in 0..n {
                    let a = j * n + i;
                    phi[a] = lagrange_value(p, i, *u) * lv;
                    dphi_dx[a] = lagrange_deriv(p, i, *u) / width * lv;
                    dphi_dy[a] = lagrange_value(p, i, *u) * ld / height;
                }
            }

            let f = source.value(pt.x, pt.y);
            let grad_f = match norm {
                ProjNorm::H1 => source.gradient(pt.x, pt.y),
                ProjNorm::L2 => [0.0, 0.0],
            };

            for a in 0..n_local {
                let mut load = f * phi[a];
                if norm == ProjNorm::H1 {
                    load += grad_f[0] * dphi_dx[a] + grad_f[1] * dphi_dy[a];
                }
                rhs[a] += weight * load;

                for b in 0..n_local {
                    let mut entry = phi[a] * phi[b];
                    if norm == ProjNorm::H1 {
                        entry += dphi_dx[a] * dphi_dx[b] + dphi_dy[a] * dphi_dy[b];
                    }
                    matrix[(a, b)] += weight * entry;
                }
            }
        }
    }

    LocalSystem {
        elem_idx,
        matrix,
        rhs,
    }
}

/// Project each source onto its space in the given norm, solving one Gram
/// system per space
///
/// Returns a single coefficient vector over the concatenated free DoFs of all
/// spaces, in argument order. The three slices must have equal lengths.
pub fn project_global(
    spaces: &[&H1Space],
    sources: &[&dyn ScalarField],
    norms: &[ProjNorm],
) -> Result<DVector<f64>, ConfigurationError> {
    if spaces.len() != sources.len() || spaces.len() != norms.len() {
        return Err(ConfigurationError::MismatchedCounts {
            spaces: spaces.len(),
            sources: sources.len(),
            norms: norms.len(),
        });
    }

    let total_ndof: usize = spaces.iter().map(|s| s.num_dofs()).sum();
    let mut coeffs = DVector::zeros(total_ndof);
    let mut offset = 0;

    for ((space, source), norm) in spaces.iter().zip(sources.iter()).zip(norms.iter()) {
        let ndof = space.num_dofs();
        let mut gram = DMatrix::zeros(ndof, ndof);
        let mut rhs = DVector::zeros(ndof);

        let locals: Vec<LocalSystem> = space
            .elems
            .par_iter()
            .enumerate()
            .map(|(elem_idx, elem)| local_system(elem_idx, elem, *source, *norm))
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
                        let m_ab = local.matrix[(a, b)];
                        for (dof_b, w_b) in &exp_b.dofs {
                            gram[(*dof_a, *dof_b)] += w_a * w_b * m_ab;
                        }
                        // prescribed values move to the right-hand side
                        rhs[*dof_a] -= w_a * exp_b.fixed_value * m_ab;
                    }
                }
            }
        }

        let solution = gram
            .lu()
            .solve(&rhs)
            .ok_or(ConfigurationError::SingularGram)?;
        coeffs.rows_mut(offset, ndof).copy_from(&solution);
        offset += ndof;
    }

    Ok(coeffs)
}

/// Interpolate a source at the free DoF node positions of a space
///
/// Cheaper than [project_global] and exact whenever the source already lies in
/// the space; used for initial conditions given in closed form.
pub fn project_local(space: &H1Space, source: &dyn ScalarField) -> DVector<f64> {
    let mut coeffs = DVector::zeros(space.num_dofs());
    for node in &space.nodes {
        if let NodeClass::Unknown(dof) = node.class {
            coeffs[dof] = source.value(node.pos.x, node.pos.y);
        }
    }
    coeffs
}

/// Split a concatenated coefficient vector back into one [FeSolution] per
/// space, consuming the space snapshots
pub fn vector_to_solutions(coeffs: &DVector<f64>, spaces: Vec<H1Space>) -> Vec<FeSolution> {
    let mut solutions = Vec::with_capacity(spaces.len());
    let mut offset = 0;
    for space in spaces {
        let ndof = space.num_dofs();
        let slice = coeffs.rows(offset, ndof).into_owned();
        offset += ndof;
        solutions.push(FeSolution::new(space, slice));
    }
    solutions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::Mesh;
    use crate::solution::ExactFunction;
    use crate::space::essential_bc::{EssentialBC, EssentialBCs};
    use std::sync::Arc;

    fn space_of_order(order: u8) -> H1Space {
        let mut mesh = Mesh::rectangle(0.0, 0.0, 1.0, 1.0, 2, 2, "Bdy");
        mesh.set_uniform_order(order);
        H1Space::new(&mesh, Arc::new(EssentialBCs::empty()), 0.0).unwrap()
    }

    #[test]
    fn polynomials_in_the_space_are_reproduced() {
        // a biquadratic source lies in the p = 2 space; projection is exact
        let space = space_of_order(2);
        let source = ExactFunction::new(
            |x, y| x * x + x * y + 3.0,
            |x, y| [2.0 * x + y, x],
        );

        for norm in [ProjNorm::L2, ProjNorm::H1] {
            let coeffs = project_global(&[&space], &[&source], &[norm]).unwrap();
            let sln = FeSolution::new(space.clone(), coeffs);
            for (x, y) in [(0.1, 0.9), (0.5, 0.5), (0.75, 0.25)] {
                let value = sln.get_pt_value(x, y).unwrap();
                assert!((value - (x * x + x * y + 3.0)).abs() < 1e-10);
            }
        }
    }

    #[test]
    fn fixed_boundary_values_are_respected() {
        let mut mesh = Mesh::rectangle(0.0, 0.0, 1.0, 1.0, 2, 2, "Bdy");
        mesh.set_uniform_order(1);
        let bcs = Arc::new(EssentialBCs::new(vec![EssentialBC::time_dependent(
            "Bdy",
            |x, y, _| x + y,
        )]));
        let space = H1Space::new(&mesh, bcs, 0.0).unwrap();

        let source = ExactFunction::new(|x, y| x + y, |_, _| [1.0, 1.0]);
        let coeffs = project_global(&[&space], &[&source], &[ProjNorm::H1]).unwrap();
        let sln = FeSolution::new(space, coeffs);

        // boundary values come from the condition, interior from the Gram solve;
        // both agree with the linear source
        for (x, y) in [(0.0, 0.5), (0.5, 0.5), (1.0, 1.0)] {
            let value = sln.get_pt_value(x, y).unwrap();
            assert!((value - (x + y)).abs() < 1e-10);
        }
    }

    #[test]
    fn mixed_degree_neighbors_project_exactly() {
        let mut mesh = Mesh::rectangle(0.0, 0.0, 2.0, 1.0, 2, 1, "Bdy");
        mesh.set_elem_order(0, 3).unwrap();
        mesh.set_elem_order(1, 2).unwrap();
        let space = H1Space::new(&mesh, Arc::new(EssentialBCs::empty()), 0.0).unwrap();

        // a linear field lies in the constrained space on both sides of the
        // degree jump
        let source = ExactFunction::new(|x, y| x + y, |_, _| [1.0, 1.0]);
        let coeffs = project_global(&[&space], &[&source], &[ProjNorm::H1]).unwrap();
        let sln = FeSolution::new(space, coeffs);
        for (x, y) in [(0.5, 0.5), (1.0, 0.25), (1.5, 0.75)] {
            let value = sln.get_pt_value(x, y).unwrap();
            assert!((value - (x + y)).abs() < 1e-9);
        }
    }

    #[test]
    fn mismatched_argument_counts_are_rejected() {
        let space = space_of_order(1);
        let source = ExactFunction::constant(1.0);
        let result = project_global(&[&space], &[&source], &[ProjNorm::L2, ProjNorm::H1]);
        assert!(matches!(
            result,
            Err(ConfigurationError::MismatchedCounts { .. })
        ));
    }

    #[test]
    fn local_projection_interpolates_nodal_values() {
        let space = space_of_order(1);
        let source = ExactFunction::new(|x, y| 2.0 * x - y, |_, _| [2.0, -1.0]);
        let coeffs = project_local(&space, &source);
        let sln = FeSolution::new(space, coeffs);
        let value = sln.get_pt_value(0.25, 0.75).unwrap();
        assert!((value - (0.5 - 0.75)).abs() < 1e-12);
    }

    #[test]
    fn stacked_vectors_split_back_into_solutions() {
        let space_a = space_of_order(1);
        let space_b = space_of_order(2);
        let src_a = ExactFunction::constant(1.0);
        let src_b = ExactFunction::constant(2.0);
        let coeffs = project_global(
            &[&space_a, &space_b],
            &[&src_a, &src_b],
            &[ProjNorm::L2, ProjNorm::L2],
        )
        .unwrap();
        assert_eq!(coeffs.len(), space_a.num_dofs() + space_b.num_dofs());

        let slns = vector_to_solutions(&coeffs, vec![space_a, space_b]);
        assert!((slns[0].get_pt_value(0.5, 0.5).unwrap() - 1.0).abs() < 1e-10);
        assert!((slns[1].get_pt_value(0.5, 0.5).unwrap() - 2.0).abs() < 1e-10);
    }
}
