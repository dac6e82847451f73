//! Fit driver.
//!
//! [`Solver`] owns one spectrum and dispatches to a chosen minimization
//! strategy. Inner minimizers are black boxes behind a uniform contract
//! (see [`inner`]); their failures become `ERROR` fit results, never
//! panics. The default strategy is the EIS smart mode of [`smart`].

pub(crate) mod inner;
pub(crate) mod smart;

use std::time::Instant;

use num_complex::Complex64;
use tracing::{debug, info, warn};

use crate::chisq::chi_square;
use crate::circuit::{circuit_impedance, parameter_arity};
use crate::error::FitError;
use crate::types::{FitResult, FitStatus, Method, Weighting};

use inner::ChiSqProblem;

/// One fitting task: a circuit code plus the observed spectrum.
#[derive(Debug, Clone)]
pub struct Solver {
    code: String,
    /// Frequency vector, Hz.
    pub freqs: Vec<f64>,
    /// Observed complex impedance, one sample per frequency.
    pub observed: Vec<Complex64>,
    /// Starting parameters; empty means derive them from the data.
    pub init_values: Vec<f64>,
    /// Optimization strategy.
    pub method: Method,
    /// Residual weighting.
    pub weighting: Weighting,
}

impl Solver {
    /// Build a solver for `code` over the given samples. The code is
    /// lowercased; weighting defaults to modulus and the method to EIS
    /// smart mode.
    pub fn new(code: &str, freqs: Vec<f64>, observed: Vec<Complex64>) -> Self {
        Self {
            code: code.to_lowercase(),
            freqs,
            observed,
            init_values: Vec::new(),
            method: Method::Eis,
            weighting: Weighting::Modulus,
        }
    }

    /// The (lowercased) circuit code being fitted.
    pub fn code(&self) -> &str {
        &self.code
    }

    /// Run the configured strategy.
    ///
    /// `min_target` is the chi-square below which the smart mode stops
    /// retrying; `max_iterations` bounds its retry loop. Repeated calls on
    /// the same solver see identical inputs and produce identical results:
    /// internal normalization and seeding are undone before returning.
    pub fn solve(&mut self, min_target: f64, max_iterations: usize) -> FitResult {
        let started = Instant::now();
        let saved_init = self.init_values.clone();

        let mut result = match self.validate() {
            Ok(()) => match self.method {
                Method::All => self.solve_all(min_target, max_iterations),
                Method::Eis => smart::eis_solve(self, min_target, max_iterations),
                method => self.solve_single(method),
            },
            Err(err) => {
                warn!(code = %self.code, error = %err, "rejecting fit request");
                FitResult::error()
            }
        };

        self.init_values = saved_init;
        result.runtime_ms = started.elapsed().as_secs_f64() * 1e3;
        result
    }

    fn validate(&self) -> Result<(), FitError> {
        if self.freqs.is_empty() || self.freqs.len() != self.observed.len() {
            return Err(FitError::DataLengthMismatch {
                frequencies: self.freqs.len(),
                points: self.observed.len(),
            });
        }
        if !self.init_values.is_empty() {
            let expected = parameter_arity(&self.code);
            if self.init_values.len() != expected {
                return Err(FitError::ParameterArityMismatch {
                    code: self.code.clone(),
                    expected,
                    actual: self.init_values.len(),
                });
            }
        }
        Ok(())
    }

    pub(crate) fn problem(&self) -> ChiSqProblem {
        ChiSqProblem {
            code: self.code.clone(),
            freqs: self.freqs.clone(),
            observed: self.observed.clone(),
            weighting: self.weighting,
        }
    }

    fn ensure_init_values(&mut self) {
        if self.init_values.is_empty() {
            self.init_values = smart::initial_values(&self.code, &self.freqs, &self.observed);
            debug!(values = ?self.init_values, "derived initial values from the data");
        }
    }

    fn solve_single(&mut self, method: Method) -> FitResult {
        self.ensure_init_values();
        let x0 = self.init_values.clone();

        let outcome = match method {
            Method::LevenbergMarquardt => inner::levenberg_marquardt(self.problem(), &x0),
            Method::GradientDescent => inner::gradient_descent(self.problem(), &x0),
            Method::Lbfgs => inner::lbfgs(self.problem(), &x0),
            Method::Newton => inner::newton(self.problem(), &x0),
            Method::Eis | Method::All => unreachable!("dispatched before solve_single"),
        };

        match outcome {
            Ok(sol) => {
                let mut result = FitResult {
                    params: sol.params,
                    min: sol.min,
                    min_unit: "ChiSq".to_string(),
                    status: FitStatus::Ok,
                    iterations: sol.iterations,
                    func_evals: sol.func_evals,
                    runtime_ms: 0.0,
                };
                self.recalibrate(&mut result);
                if !result.min.is_finite() {
                    warn!(method = %method, "minimum is not finite; reporting an error result");
                    return FitResult::error();
                }
                result
            }
            Err(err) => {
                warn!(method = %method, error = %err, "inner solver failed");
                FitResult::error()
            }
        }
    }

    /// Recompute the reported minimum as a chi-square of the fitted model
    /// against the observed data, so every method reports in one unit. The
    /// solver's own value is kept when the recomputation is not finite.
    /// Smart mode never goes through here; its scaling is internal.
    fn recalibrate(&self, result: &mut FitResult) {
        if result.status != FitStatus::Ok || result.params.is_empty() {
            return;
        }
        let theoretical = circuit_impedance(&self.code, &self.freqs, &result.params);
        let chisq = chi_square(&self.observed, &theoretical, self.weighting);
        if chisq.is_finite() {
            result.min = chisq;
            result.min_unit = "ChiSq".to_string();
        } else {
            warn!(reported = result.min, "recalculated chi-square is not finite; keeping the solver value");
        }
    }

    fn solve_all(&mut self, min_target: f64, max_iterations: usize) -> FitResult {
        const METHODS: [Method; 5] = [
            Method::Eis,
            Method::LevenbergMarquardt,
            Method::GradientDescent,
            Method::Lbfgs,
            Method::Newton,
        ];

        info!(code = %self.code, "running all optimization methods");
        let mut best: Option<FitResult> = None;

        for method in METHODS {
            let saved_init = self.init_values.clone();
            let result = match method {
                Method::Eis => smart::eis_solve(self, min_target, max_iterations),
                m => self.solve_single(m),
            };
            self.init_values = saved_init;

            if result.status == FitStatus::Ok
                && result.min < best.as_ref().map_or(f64::INFINITY, |b| b.min)
            {
                debug!(method = %method, min = result.min, "new best method");
                best = Some(result);
            }
        }

        best.unwrap_or_else(|| {
            warn!(code = %self.code, "all optimization methods failed");
            FitResult::error()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn resistor_solver() -> Solver {
        let freqs = vec![1.0, 10.0, 100.0];
        let observed = vec![Complex64::new(50.0, 0.0); 3];
        let mut solver = Solver::new("r", freqs, observed);
        solver.weighting = Weighting::Unity;
        solver
    }

    fn synthetic_randles() -> (Vec<f64>, Vec<Complex64>, [f64; 4]) {
        let truth = [50.0, 1e-6, 0.8, 100.0];
        let freqs = vec![1.0, 10.0, 100.0, 1000.0, 10_000.0];
        let observed = circuit_impedance("r(qr)", &freqs, &truth);
        (freqs, observed, truth)
    }

    #[test]
    fn trivial_resistor_fit() {
        let mut solver = resistor_solver();
        let result = solver.solve(1e-10, 10);
        assert_eq!(result.status, FitStatus::Ok);
        assert_relative_eq!(result.params[0], 50.0, max_relative = 1e-6);
        assert!(result.min < 1e-12);
        assert!(result.runtime_ms >= 0.0);
    }

    #[test]
    fn smart_mode_recovers_randles_parameters() {
        let (freqs, observed, truth) = synthetic_randles();
        let mut solver = Solver::new("R(QR)", freqs, observed);
        solver.init_values = vec![10.0, 1e-7, 0.5, 10.0];
        let result = solver.solve(1e-8, 10);

        assert_eq!(result.status, FitStatus::Ok);
        for (fitted, expected) in result.params.iter().zip(&truth) {
            assert_relative_eq!(*fitted, *expected, max_relative = 0.05);
        }
        assert!(result.min < 1e-8, "chi-square too large: {}", result.min);
    }

    #[test]
    fn smart_mode_seeds_itself_when_unseeded() {
        let (freqs, observed, truth) = synthetic_randles();
        let mut solver = Solver::new("r(qr)", freqs, observed);
        let result = solver.solve(1e-8, 10);

        assert_eq!(result.status, FitStatus::Ok);
        for (fitted, expected) in result.params.iter().zip(&truth) {
            assert_relative_eq!(*fitted, *expected, max_relative = 0.05);
        }
    }

    #[test]
    fn repeated_solves_are_idempotent() {
        let (freqs, observed, _) = synthetic_randles();
        let before = observed.clone();
        let mut solver = Solver::new("r(qr)", freqs, observed);

        let first = solver.solve(1e-8, 10);
        let second = solver.solve(1e-8, 10);

        assert_eq!(first.status, second.status);
        assert_relative_eq!(first.min, second.min, max_relative = 1e-9);
        for (a, b) in first.params.iter().zip(&second.params) {
            assert_relative_eq!(*a, *b, max_relative = 1e-9);
        }
        for (a, b) in solver.observed.iter().zip(&before) {
            assert_relative_eq!(a.re, b.re, max_relative = 1e-12);
            assert_relative_eq!(a.im, b.im, max_relative = 1e-12);
        }
    }

    #[test]
    fn rescaled_parameters_reproduce_the_original_data() {
        // With modulus weighting the chi-square is scale invariant, so the
        // minimum reported on normalized data must match a chi-square of
        // the rescaled parameters against the original data.
        let (freqs, observed, _) = synthetic_randles();
        let mut solver = Solver::new("r(qr)", freqs.clone(), observed.clone());
        let result = solver.solve(1e-12, 10);
        assert_eq!(result.status, FitStatus::Ok);

        let model = circuit_impedance("r(qr)", &freqs, &result.params);
        let chisq = chi_square(&observed, &model, Weighting::Modulus);
        assert!((chisq - result.min).abs() <= 1e-6 * result.min.max(1e-12));
    }

    #[test]
    fn levenberg_marquardt_reports_recalibrated_chi_square() {
        let mut solver = resistor_solver();
        solver.method = Method::LevenbergMarquardt;
        solver.init_values = vec![30.0];
        let result = solver.solve(1e-10, 10);

        assert_eq!(result.status, FitStatus::Ok);
        let model = circuit_impedance("r", &solver.freqs, &result.params);
        let expected = chi_square(&solver.observed, &model, Weighting::Unity);
        assert_relative_eq!(result.min, expected, max_relative = 1e-9, epsilon = 1e-30);
    }

    #[test]
    fn all_methods_mode_returns_a_converged_fit() {
        let mut solver = resistor_solver();
        solver.method = Method::All;
        let result = solver.solve(1e-10, 5);
        assert_eq!(result.status, FitStatus::Ok);
        assert_relative_eq!(result.params[0], 50.0, max_relative = 1e-3);
    }

    #[test]
    fn mismatched_initial_values_are_rejected() {
        let mut solver = resistor_solver();
        solver.init_values = vec![10.0, 20.0];
        let result = solver.solve(1e-10, 10);
        assert_eq!(result.status, FitStatus::Error);
        assert!(result.min.is_infinite());
        assert!(result.params.is_empty());
    }

    #[test]
    fn empty_data_is_rejected() {
        let mut solver = Solver::new("r", Vec::new(), Vec::new());
        assert_eq!(solver.solve(1e-10, 10).status, FitStatus::Error);
    }

    #[test]
    fn length_mismatch_is_rejected() {
        let mut solver = Solver::new(
            "r",
            vec![1.0, 10.0, 100.0, 1000.0, 10_000.0],
            vec![Complex64::new(50.0, 0.0); 4],
        );
        assert_eq!(solver.solve(1e-10, 10).status, FitStatus::Error);
    }

    #[test]
    fn non_finite_observations_yield_an_error_result() {
        let freqs = vec![1.0, 10.0, 100.0];
        let observed = vec![Complex64::new(f64::NAN, 0.0); 3];
        let mut solver = Solver::new("r", freqs, observed);
        solver.method = Method::LevenbergMarquardt;
        solver.init_values = vec![50.0];
        let result = solver.solve(1e-10, 10);
        assert_eq!(result.status, FitStatus::Error);
        assert!(result.min.is_infinite());
    }
}
