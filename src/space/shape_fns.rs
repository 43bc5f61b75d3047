//! 1D Lagrange shape functions on uniform nodes and Gauss-Legendre quadrature
//!
//! Shape functions are defined on the parametric interval [0, 1] with nodes at
//! `k / p` for a degree-`p` expansion. Tensor products of these define the
//! element-local basis of an [H1Space](super::H1Space).

use nalgebra::{DMatrix, SymmetricEigen};

/// Evaluate the `i`th degree-`p` Lagrange shape function at `t` in [0, 1]
pub fn lagrange_value(p: u8, i: usize, t: f64) -> f64 {
    let p = p as usize;
    let t_i = i as f64 / p as f64;
    let mut value = 1.0;
    for k in 0..=p {
        if k != i {
            let t_k = k as f64 / p as f64;
            value *= (t - t_k) / (t_i - t_k);
        }
    }
    value
}

/// Evaluate the derivative of the `i`th degree-`p` Lagrange shape function at `t`
pub fn lagrange_deriv(p: u8, i: usize, t: f64) -> f64 {
    let p = p as usize;
    let t_i = i as f64 / p as f64;
    let mut deriv = 0.0;
    for j in 0..=p {
        if j == i {
            continue;
        }
        let t_j = j as f64 / p as f64;
        let mut term = 1.0 / (t_i - t_j);
        for k in 0..=p {
            if k != i && k != j {
                let t_k = k as f64 / p as f64;
                term *= (t - t_k) / (t_i - t_k);
            }
        }
        deriv += term;
    }
    deriv
}

/// Compute the `n`-point Gauss-Legendre rule on [-1, 1] via the Golub-Welsch
/// eigendecomposition of the Jacobi matrix
///
/// Returns `(abscissae, weights)` sorted by abscissa. An `n`-point rule
/// integrates polynomials up to degree `2n - 1` exactly.
pub fn gauss_legendre(n: usize) -> (Vec<f64>, Vec<f64>) {
    if n == 1 {
        return (vec![0.0], vec![2.0]);
    }

    let mut jacobi = DMatrix::<f64>::zeros(n, n);
    for k in 1..n {
        let beta = k as f64 / (4.0 * (k * k) as f64 - 1.0).sqrt();
        jacobi[(k - 1, k)] = beta;
        jacobi[(k, k - 1)] = beta;
    }

    let decomp = SymmetricEigen::new(jacobi);
    let mut rule: Vec<(f64, f64)> = decomp
        .eigenvalues
        .iter()
        .enumerate()
        .map(|(col, abscissa)| {
            let first_component = decomp.eigenvectors[(0, col)];
            (*abscissa, 2.0 * first_component * first_component)
        })
        .collect();
    rule.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap());

    rule.into_iter().unzip()
}

/// The `n`-point Gauss-Legendre rule mapped to [0, 1]
pub fn gauss_legendre_01(n: usize) -> (Vec<f64>, Vec<f64>) {
    let (abscissae, weights) = gauss_legendre(n);
    (
        abscissae.iter().map(|x| 0.5 * (x + 1.0)).collect(),
        weights.iter().map(|w| 0.5 * w).collect(),
    )
}
