//! EIS smart mode: the data-normalized, retry-with-perturbation driver.
//!
//! Measured impedances span orders of magnitude; normalizing by the largest
//! observed real part keeps the simplex well-conditioned. The fitted
//! parameters are rescaled back to original units before they are returned,
//! and the observed data is restored, so normalization is never observable.

use num_complex::Complex64;
use tracing::{debug, warn};

use crate::circuit::element_tags;
use crate::solver::inner::{self, InnerSolution, NELDER_MEAD_MAX_ITERS};
use crate::solver::Solver;
use crate::types::{FitResult, FitStatus};

/// Divide the observed data by its largest real part, returning the scale.
/// Data without a positive real part is left untouched (scale 1).
pub(crate) fn prepare_data(observed: &mut [Complex64]) -> f64 {
    let mut max_re: f64 = 0.0;
    for z in observed.iter() {
        if z.re > max_re {
            max_re = z.re;
        }
    }
    if max_re <= 0.0 {
        return 1.0;
    }
    for z in observed.iter_mut() {
        *z = *z / max_re;
    }
    max_re
}

/// Multiply the observed data back by `scale`, undoing [`prepare_data`].
pub(crate) fn scale_data(observed: &mut [Complex64], scale: f64) {
    for z in observed.iter_mut() {
        *z = *z * scale;
    }
}

/// Element-wise starting values derived from the data by walking the code.
/// Resistors seed from the observed real part at the frequency closest (in
/// log10) to the geometric mean of the sweep.
pub(crate) fn initial_values(code: &str, freqs: &[f64], observed: &[Complex64]) -> Vec<f64> {
    let mut values = Vec::new();
    for ch in code.chars() {
        match ch {
            'r' => values.push(resistor_seed(freqs, observed)),
            'c' | 'l' | 'w' => values.push(1e-5),
            'q' => values.extend([1e-5, 0.8]),
            'o' | 't' | 'g' => values.extend([1.0, 1.0]),
            'f' => values.extend([1.0, 1.0, 1.0]),
            _ => {}
        }
    }
    values
}

fn resistor_seed(freqs: &[f64], observed: &[Complex64]) -> f64 {
    let mut lo = f64::INFINITY;
    let mut hi = f64::NEG_INFINITY;
    for &f in freqs {
        lo = lo.min(f);
        hi = hi.max(f);
    }
    let mid = (lo.log10() + hi.log10()) / 2.0;

    let mut index = 0;
    let mut closest = f64::INFINITY;
    for (k, &f) in freqs.iter().enumerate() {
        let d = (f.log10() - mid).abs();
        if d < closest {
            closest = d;
            index = k;
        }
    }
    observed[index].re
}

/// Perturb a parameter vector between Nelder-Mead attempts: negative values
/// snap back to their primary seed, the CPE exponent stays in [0, 1], and
/// resistive/capacitive magnitudes are nudged upward by 10%.
pub(crate) fn modify_params(values: &mut [f64], primary: &[f64], tags: &[&str]) {
    for i in 0..values.len() {
        if values[i] < 0.0 {
            values[i] = primary[i];
        }
        if tags[i] == "qn" {
            values[i] = values[i].clamp(0.0, 1.0);
        }
        if matches!(tags[i], "r" | "c" | "qy") {
            values[i] *= 1.1;
        }
    }
}

/// Map parameters fitted on normalized data back to original units:
/// impedance-like magnitudes scale with the data, admittance-like ones
/// scale inversely, exponents and diffusion time constants are
/// dimensionless and stay put.
pub(crate) fn scale_params(params: &mut [f64], tags: &[&str], scale: f64) {
    assert_eq!(params.len(), tags.len(), "scale_params: tag/parameter length mismatch");
    for (value, tag) in params.iter_mut().zip(tags) {
        match *tag {
            "r" => *value *= scale,
            "c" | "w" | "qy" | "oy" | "ty" | "gy" | "fy" => *value /= scale,
            _ => {}
        }
    }
}

pub(crate) fn eis_solve(solver: &mut Solver, min_target: f64, max_iterations: usize) -> FitResult {
    let scale = prepare_data(&mut solver.observed);
    if solver.init_values.is_empty() {
        solver.init_values = initial_values(solver.code(), &solver.freqs, &solver.observed);
        debug!(values = ?solver.init_values, "seeded initial values from normalized data");
    }

    let tags = element_tags(solver.code());
    let primary = solver.init_values.clone();
    let mut best: Option<InnerSolution> = None;

    for round in 0..max_iterations {
        let sol = match inner::nelder_mead(solver.problem(), &solver.init_values, NELDER_MEAD_MAX_ITERS) {
            Ok(sol) => sol,
            Err(err) => {
                warn!(round, error = %err, "nelder-mead attempt failed; perturbing and retrying");
                modify_params(&mut solver.init_values, &primary, &tags);
                continue;
            }
        };
        debug!(round, min = sol.min, "nelder-mead attempt finished");

        let best_min = best.as_ref().map_or(f64::INFINITY, |b| b.min);
        let done = sol.min < min_target;
        if sol.min < best_min {
            best = Some(sol.clone());
        }
        if done {
            break;
        }
        solver.init_values = sol.params;
        modify_params(&mut solver.init_values, &primary, &tags);
    }

    let result = match best {
        Some(sol) if sol.min.is_finite() => {
            let mut params = sol.params;
            scale_params(&mut params, &tags, scale);
            FitResult {
                params,
                min: sol.min,
                min_unit: "ChiSq".to_string(),
                status: FitStatus::Ok,
                iterations: sol.iterations,
                func_evals: sol.func_evals,
                runtime_ms: 0.0,
            }
        }
        _ => {
            warn!(code = solver.code(), "eis smart mode found no usable minimum");
            FitResult::error()
        }
    };

    scale_data(&mut solver.observed, scale);
    result
}
