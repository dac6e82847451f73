//! The production job processor: wires the worker pool to the fitting
//! engine and resolves starting values from the configuration.

use eisfit_core::{FitResult, Solver};
use num_complex::Complex64;
use tracing::{debug, info, warn};

use crate::config::FitConfig;
use crate::pool::JobProcessor;

/// Fits spectra with `eisfit-core` according to the service [`FitConfig`].
pub struct EisProcessor;

impl JobProcessor for EisProcessor {
    fn process(&self, freqs: &[f64], observed: &[Complex64], cfg: &FitConfig) -> FitResult {
        if freqs.is_empty() || freqs.len() != observed.len() {
            warn!(
                frequencies = freqs.len(),
                points = observed.len(),
                "rejecting job with inconsistent data"
            );
            return FitResult::error();
        }

        let mut solver = Solver::new(&cfg.circuit_code, freqs.to_vec(), observed.to_vec());
        solver.method = cfg.method;
        solver.weighting = cfg.weighting;
        solver.init_values = resolve_init_values(cfg);

        debug!(
            code = solver.code(),
            method = %cfg.method,
            points = freqs.len(),
            "fitting spectrum"
        );
        let result = solver.solve(cfg.min_target, cfg.max_iterations);

        if result.is_ok() {
            info!(
                method = %cfg.method,
                chi_square = result.min,
                runtime_ms = result.runtime_ms,
                "fit completed"
            );
        } else {
            warn!(method = %cfg.method, "fit failed");
        }
        result
    }
}

/// Caller-supplied values win; otherwise the known-circuit table seeds
/// the fit, and an empty result leaves the engine to derive element-wise
/// defaults from the data.
fn resolve_init_values(cfg: &FitConfig) -> Vec<f64> {
    if !cfg.init_values.is_empty() {
        return cfg.init_values.clone();
    }
    cfg.known_initials
        .get(&cfg.circuit_code.to_lowercase())
        .cloned()
        .unwrap_or_default()
}
