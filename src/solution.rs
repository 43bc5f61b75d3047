//! Solution representations: exact closed-form fields and finite element
//! solutions tied to an [H1Space]

use crate::space::shape_fns::{lagrange_deriv, lagrange_value};
use crate::space::H1Space;
use nalgebra::DVector;

/// A scalar field over the computational domain
///
/// Implemented both by closed-form functions ([ExactFunction]) and by discrete
/// solutions ([FeSolution]), so projection and error estimation can treat the
/// two uniformly.
pub trait ScalarField: Sync {
    fn value(&self, x: f64, y: f64) -> f64;
    /// The gradient `[du/dx, du/dy]` at a point
    fn gradient(&self, x: f64, y: f64) -> [f64; 2];
}

/// A closed-form scalar field given by value and gradient closures
pub struct ExactFunction {
    value: Box<dyn Fn(f64, f64) -> f64 + Send + Sync>,
    gradient: Box<dyn Fn(f64, f64) -> [f64; 2] + Send + Sync>,
}

impl ExactFunction {
    pub fn new(
        value: impl Fn(f64, f64) -> f64 + Send + Sync + 'static,
        gradient: impl Fn(f64, f64) -> [f64; 2] + Send + Sync + 'static,
    ) -> Self {
        Self {
            value: Box::new(value),
            gradient: Box::new(gradient),
        }
    }

    /// A spatially constant field
    pub fn constant(value: f64) -> Self {
        Self::new(move |_, _| value, |_, _| [0.0, 0.0])
    }
}

impl ScalarField for ExactFunction {
    fn value(&self, x: f64, y: f64) -> f64 {
        (self.value)(x, y)
    }

    fn gradient(&self, x: f64, y: f64) -> [f64; 2] {
        (self.gradient)(x, y)
    }
}

/// A finite element solution: a coefficient vector over the free DoFs of an
/// owned [H1Space] snapshot
///
/// The space snapshot keeps the solution evaluable after the originating mesh
/// has been refined or unrefined.
pub struct FeSolution {
    pub space: H1Space,
    pub coeffs: DVector<f64>,
}

impl FeSolution {
    pub fn new(space: H1Space, coeffs: DVector<f64>) -> Self {
        debug_assert_eq!(space.num_dofs(), coeffs.len());
        Self { space, coeffs }
    }

    /// A solution with every free DoF set to `value`
    ///
    /// Fixed boundary DoFs keep their prescribed values, so the field is only
    /// constant when those agree with `value`.
    pub fn constant(space: H1Space, value: f64) -> Self {
        let coeffs = DVector::from_element(space.num_dofs(), value);
        Self { space, coeffs }
    }

    /// The solution value at a point, or `None` outside the domain
    pub fn get_pt_value(&self, x: f64, y: f64) -> Option<f64> {
        let elem_idx = self.space.find_elem(x, y)?;
        let elem = &self.space.elems[elem_idx];
        let values = self.space.element_values(elem_idx, &self.coeffs);

        let u = (x - elem.rect.x0) / elem.rect.width();
        let v = (y - elem.rect.y0) / elem.rect.height();
        let p = elem.degree;
        let n = p as usize + 1;

        let mut result = 0.0;
        for j in 0..n {
            let phi_j = lagrange_value(p, j, v);
            for i in 0..n {
                result += values[j * n + i] * lagrange_value(p, i, u) * phi_j;
            }
        }
        Some(result)
    }

    /// The solution gradient at a point, or `None` outside the domain
    pub fn get_pt_gradient(&self, x: f64, y: f64) -> Option<[f64; 2]> {
        let elem_idx = self.space.find_elem(x, y)?;
        let elem = &self.space.elems[elem_idx];
        let values = self.space.element_values(elem_idx, &self.coeffs);

        let u = (x - elem.rect.x0) / elem.rect.width();
        let v = (y - elem.rect.y0) / elem.rect.height();
        let p = elem.degree;
        let n = p as usize + 1;
        let inv_w = 1.0 / elem.rect.width();
        let inv_h = 1.0 / elem.rect.height();

        let mut grad = [0.0, 0.0];
        for j in 0..n {
            let phi_j = lagrange_value(p, j, v);
            let dphi_j = lagrange_deriv(p, j, v);
            for i in 0..n {
                let phi_i = lagrange_value(p, i, u);
                let dphi_i = lagrange_deriv(p, i, u);
                grad[0] += values[j * n + i] * dphi_i * phi_j * inv_w;
                grad[1] += values[j * n + i] * phi_i * dphi_j * inv_h;
            }
        }
        Some(grad)
    }
}

impl ScalarField for FeSolution {
    fn value(&self, x: f64, y: f64) -> f64 {
        self.get_pt_value(x, y).unwrap_or(0.0)
    }

    fn gradient(&self, x: f64, y: f64) -> [f64; 2] {
        self.get_pt_gradient(x, y).unwrap_or([0.0, 0.0])
    }
}
