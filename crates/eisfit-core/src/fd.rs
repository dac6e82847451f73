//! Finite-difference derivatives for the gradient-based minimizers.
//!
//! Central differences with a relative step; accuracy is ample for the
//! smooth chi-square surfaces produced by circuit models.

use nalgebra::{DMatrix, DVector};

// First differences tolerate a smaller step than second differences,
// where cancellation grows as 1/h^2.
const GRAD_REL_STEP: f64 = 1e-6;
const HESS_REL_STEP: f64 = 1e-4;

fn step(x: f64, rel: f64) -> f64 {
    rel * x.abs().max(1.0)
}

/// Central-difference gradient of `f` at `x`.
pub fn gradient(f: &dyn Fn(&DVector<f64>) -> f64, x: &DVector<f64>) -> DVector<f64> {
    let n = x.len();
    let mut grad = DVector::zeros(n);
    let mut probe = x.clone();
    for i in 0..n {
        let h = step(x[i], GRAD_REL_STEP);
        probe[i] = x[i] + h;
        let fp = f(&probe);
        probe[i] = x[i] - h;
        let fm = f(&probe);
        probe[i] = x[i];
        grad[i] = (fp - fm) / (2.0 * h);
    }
    grad
}

/// Central-difference Hessian of `f` at `x`. Symmetric by construction.
pub fn hessian(f: &dyn Fn(&DVector<f64>) -> f64, x: &DVector<f64>) -> DMatrix<f64> {
    let n = x.len();
    let f0 = f(x);
    let mut hess = DMatrix::zeros(n, n);
    let mut probe = x.clone();

    for i in 0..n {
        let hi = step(x[i], HESS_REL_STEP);

        probe[i] = x[i] + hi;
        let fp = f(&probe);
        probe[i] = x[i] - hi;
        let fm = f(&probe);
        probe[i] = x[i];
        hess[(i, i)] = (fp - 2.0 * f0 + fm) / (hi * hi);

        for j in (i + 1)..n {
            let hj = step(x[j], HESS_REL_STEP);

            probe[i] = x[i] + hi;
            probe[j] = x[j] + hj;
            let fpp = f(&probe);
            probe[j] = x[j] - hj;
            let fpm = f(&probe);
            probe[i] = x[i] - hi;
            let fmm = f(&probe);
            probe[j] = x[j] + hj;
            let fmp = f(&probe);
            probe[i] = x[i];
            probe[j] = x[j];

            let v = (fpp - fpm - fmp + fmm) / (4.0 * hi * hj);
            hess[(i, j)] = v;
            hess[(j, i)] = v;
        }
    }
    hess
}
