//! Error estimation and hp-adaptive refinement
//!
//! The error estimate compares a coarse solution against its reference
//! companion in the H1 norm, element by element. Elements selected by the
//! active [AdaptStrategy] are then refined by the best-scoring candidate
//! among p-enrichment, isotropic and anisotropic bisection, and combined
//! hp-refinement.

use crate::mesh::refinement::HRef;
use crate::mesh::{Mesh, MeshError, MAX_POLYNOMIAL_ORDER, MIN_EDGE_LENGTH};
use crate::solution::{FeSolution, ScalarField};
use crate::space::shape_fns::{gauss_legendre_01, lagrange_deriv, lagrange_value};
use crate::space::SpaceElem;
use rayon::prelude::*;

/// Per-element and total error of a coarse solution against its reference
#[derive(Clone, Debug)]
pub struct ErrorEstimate {
    /// `(mesh element id, squared H1 error)` per active coarse element
    pub elem_errors: Vec<(usize, f64)>,
    /// Sum of the squared element errors
    pub total_err_sq: f64,
    /// Total error relative to the reference solution norm, in percent
    pub total_rel_percent: f64,
}

impl ErrorEstimate {
    pub fn max_elem_err_sq(&self) -> f64 {
        self.elem_errors
            .iter()
            .map(|(_, err)| *err)
            .fold(0.0, f64::max)
    }
}

/// Evaluate the coarse solution locally on one of its elements
fn local_value_and_gradient(elem: &SpaceElem, values: &[f64], u: f64, v: f64) -> (f64, [f64; 2]) {
    let p = elem.degree;
    let n = p as usize + 1;
    let inv_w = 1.0 / elem.rect.width();
    let inv_h = 1.0 / elem.rect.height();

    let mut value = 0.0;
    let mut grad = [0.0, 0.0];
    for j in 0..n {
        let phi_j = lagrange_value(p, j, v);
        let dphi_j = lagrange_deriv(p, j, v);
        for i in 0..n {
            let phi_i = lagrange_value(p, i, u);
            let dphi_i = lagrange_deriv(p, i, u);
            let coeff = values[j * n + i];
            value += coeff * phi_i * phi_j;
            grad[0] += coeff * dphi_i * phi_j * inv_w;
            grad[1] += coeff * phi_i * dphi_j * inv_h;
        }
    }
    (value, grad)
}

/// Estimate the H1 error of `coarse` against `reference`, per coarse element
///
/// Each coarse element is integrated over its 2x2 subcells so the quadrature
/// cells line up with the once-refined reference mesh.
pub fn calc_err_est(coarse: &FeSolution, reference: &FeSolution) -> ErrorEstimate {
    let per_elem: Vec<(usize, f64, f64)> = coarse
        .space
        .elems
        .par_iter()
        .enumerate()
        .map(|(elem_idx, elem)| {
            let values = coarse.space.element_values(elem_idx, &coarse.coeffs);
            let quad_order = elem.degree as usize + 3;
            let (points, weights) = gauss_legendre_01(quad_order);

            let mut err_sq = 0.0;
            let mut ref_sq = 0.0;
            for sub_i in 0..2 {
                for sub_j in 0..2 {
                    let jacobian = elem.rect.area() / 4.0;
                    for (qj, v) in points.iter().enumerate() {
                        for (qi, u) in points.iter().enumerate() {
                            let local_u = 0.5 * (sub_i as f64 + u);
                            let local_v = 0.5 * (sub_j as f64 + v);
                            let weight = weights[qi] * weights[qj] * jacobian;
                            let pt = elem.rect.map(local_u, local_v);

                            let (c_val, c_grad) =
                                local_value_and_gradient(elem, &values, local_u, local_v);
                            let r_val = reference.value(pt.x, pt.y);
                            let r_grad = reference.gradient(pt.x, pt.y);

                            let dv = c_val - r_val;
                            let dgx = c_grad[0] - r_grad[0];
                            let dgy = c_grad[1] - r_grad[1];
                            err_sq += weight * (dv * dv + dgx * dgx + dgy * dgy);
                            ref_sq += weight
                                * (r_val * r_val + r_grad[0] * r_grad[0] + r_grad[1] * r_grad[1]);
                        }
                    }
                }
            }
            (elem.mesh_id, err_sq, ref_sq)
        })
        .collect();

    let total_err_sq: f64 = per_elem.iter().map(|(_, err, _)| err).sum();
    let total_ref_sq: f64 = per_elem.iter().map(|(_, _, r)| r).sum();
    let total_rel_percent = if total_ref_sq > f64::MIN_POSITIVE {
        100.0 * (total_err_sq / total_ref_sq).sqrt()
    } else {
        0.0
    };

    ErrorEstimate {
        elem_errors: per_elem.iter().map(|(id, err, _)| (*id, *err)).collect(),
        total_err_sq,
        total_rel_percent,
    }
}

/// How elements are selected for refinement from an [ErrorEstimate]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AdaptStrategy {
    /// Refine elements in decreasing error order until `sqrt(threshold)` times
    /// the total error has been processed; elements with similar errors are
    /// kept together to preserve mesh symmetry
    CumulativeFraction,
    /// Refine all elements whose error exceeds `threshold` times the largest
    /// element error
    RelativeToMax,
    /// Refine all elements whose squared error exceeds `threshold`
    AbsoluteThreshold,
}

#[derive(Clone, Copy, Debug)]
enum Candidate {
    P { new_degree: u8 },
    H { refinement: HRef },
    Hp { child_degree: u8 },
}

/// Score the refinement candidates of one element and return the best
///
/// The score is the projected error reduction per added DoF, with reduction
/// factors from a-priori convergence rates: `2^-p` for isotropic bisection,
/// `2^-p/2` per direction for anisotropic, and a flat halving for
/// p-enrichment.
fn best_candidate(rect_w: f64, rect_h: f64, degree: u8, err: f64) -> Option<Candidate> {
    let p = degree as f64;
    let n_current = (p + 1.0) * (p + 1.0);
    let mut best: Option<(f64, Candidate)> = None;

    let mut consider = |score: f64, candidate: Candidate| {
        if best.map(|(s, _)| score > s).unwrap_or(true) {
            best = Some((score, candidate));
        }
    };

    let h_allowed = |w: f64, h: f64| w >= 2.0 * MIN_EDGE_LENGTH && h >= 2.0 * MIN_EDGE_LENGTH;

    if degree < MAX_POLYNOMIAL_ORDER {
        let added = 2.0 * p + 3.0;
        consider(
            err * 0.5 / added,
            Candidate::P {
                new_degree: degree + 1,
            },
        );
    }

    if h_allowed(rect_w, rect_h) {
        let factor = 1.0 - (2.0f64).powf(-p);
        let added = 3.0 * p * p + 2.0 * p;
        consider(err * factor / added.max(1.0), Candidate::H { refinement: HRef::T });

        // hp: bisect and drop the children to roughly half the degree
        let child_degree = (degree / 2 + 1).max(1);
        let q = child_degree as f64;
        let hp_factor = 1.0 - (2.0f64).powf(-q - 1.0);
        let hp_added = 4.0 * (q + 1.0) * (q + 1.0) - n_current;
        consider(
            err * hp_factor / hp_added.max(1.0),
            Candidate::Hp { child_degree },
        );
    }

    // anisotropic bisection along the longer extent only
    let aniso = if rect_w > rect_h { HRef::U } else { HRef::V };
    let aniso_allowed = match aniso {
        HRef::U => rect_w >= 2.0 * MIN_EDGE_LENGTH,
        _ => rect_h >= 2.0 * MIN_EDGE_LENGTH,
    };
    if aniso_allowed {
        let factor = 1.0 - (2.0f64).powf(-p / 2.0);
        let added = p * (p + 1.0);
        consider(err * factor / added.max(1.0), Candidate::H { refinement: aniso });
    }

    best.map(|(_, candidate)| candidate)
}

/// Select and refine elements of `mesh` according to the estimate
///
/// Returns `Ok(true)` when no element was refined, either because every
/// element fell below the selection threshold or because `current_ndof`
/// already reached the `ndof_stop` ceiling. A `false` return means the mesh
/// changed and dependent spaces must be rebuilt.
pub fn adapt(
    mesh: &mut Mesh,
    estimate: &ErrorEstimate,
    strategy: AdaptStrategy,
    threshold: f64,
    ndof_stop: Option<usize>,
    current_ndof: usize,
) -> Result<bool, MeshError> {
    if let Some(ceiling) = ndof_stop {
        if current_ndof >= ceiling {
            log::warn!(
                "DoF ceiling reached ({} >= {}); suppressing further refinement",
                current_ndof,
                ceiling
            );
            return Ok(true);
        }
    }

    let mut sorted = estimate.elem_errors.clone();
    sorted.sort_by(|a, b| b.1.total_cmp(&a.1));

    let selected: Vec<(usize, f64)> = match strategy {
        AdaptStrategy::CumulativeFraction => {
            let target = threshold * estimate.total_err_sq;
            let mut cumulative = 0.0;
            let mut taken = Vec::new();
            let mut last_taken_err = f64::INFINITY;
            for (id, err_sq) in sorted {
                let processed_enough = cumulative >= target;
                let similar_to_last = err_sq > 0.95 * last_taken_err;
                if processed_enough && !similar_to_last {
                    break;
                }
                cumulative += err_sq;
                last_taken_err = err_sq;
                taken.push((id, err_sq));
            }
            taken
        }
        AdaptStrategy::RelativeToMax => {
            let max_err = estimate.max_elem_err_sq();
            sorted
                .into_iter()
                .filter(|(_, err_sq)| *err_sq > threshold * max_err)
                .collect()
        }
        AdaptStrategy::AbsoluteThreshold => sorted
            .into_iter()
            .filter(|(_, err_sq)| *err_sq > threshold)
            .collect(),
    };

    let mut refined_any = false;
    for (id, err_sq) in selected {
        // a regularity cascade from an earlier selection may have split this
        // element already
        if mesh.elems[id].has_children() {
            refined_any = true;
            continue;
        }
        let rect = mesh.elem_rect(id);
        let degree = mesh.elems[id].degree;
        let candidate = match best_candidate(rect.width(), rect.height(), degree, err_sq.sqrt()) {
            Some(candidate) => candidate,
            None => continue,
        };

        match candidate {
            Candidate::P { new_degree } => {
                mesh.set_elem_order(id, new_degree)?;
                refined_any = true;
            }
            Candidate::H { refinement } => {
                mesh.refine_elem(id, refinement)?;
                refined_any = true;
            }
            Candidate::Hp { child_degree } => {
                mesh.refine_elem(id, HRef::T)?;
                if let Some((_, child_ids)) = mesh.elems[id].children().cloned() {
                    for child_id in child_ids {
                        mesh.set_elem_order(child_id, child_degree)?;
                    }
                }
                refined_any = true;
            }
        }
    }

    Ok(!refined_any)
}
