//! Result and configuration types shared across the fitting engine.

use serde::{Deserialize, Serialize};

/// Residual weighting scheme for the chi-square objective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Weighting {
    /// Each squared residual is divided by the squared modulus of the
    /// observed point. Points with zero modulus fall back to unit weight.
    Modulus,
    /// Unweighted sum of squared residuals.
    Unity,
}

/// Outcome classification of a fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FitStatus {
    /// The minimizer converged and the reported minimum is finite.
    Ok,
    /// The minimizer failed; `min` is infinite and `params` is empty.
    Error,
}

/// Optimization strategy selected for a solve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// Data-normalized Nelder-Mead with perturbation retries (the default).
    Eis,
    /// Levenberg-Marquardt on the per-point weighted squared residuals.
    LevenbergMarquardt,
    /// Steepest descent with finite-difference gradients.
    GradientDescent,
    /// Limited-memory BFGS with finite-difference gradients.
    Lbfgs,
    /// Newton's method with finite-difference gradients and Hessians.
    Newton,
    /// Run every method and keep the lowest finite minimum.
    All,
}

impl Method {
    /// Parse a method name, accepting the short aliases used on the wire.
    pub fn parse(name: &str) -> Option<Method> {
        match name {
            "nelder-mead" | "eis" => Some(Method::Eis),
            "levenberg-marquardt" | "lm" => Some(Method::LevenbergMarquardt),
            "gradient-descent" | "gd" => Some(Method::GradientDescent),
            "lbfgs" => Some(Method::Lbfgs),
            "newton" => Some(Method::Newton),
            "all" => Some(Method::All),
            _ => None,
        }
    }

    /// Canonical name, matching the wire-level method strings.
    pub fn name(&self) -> &'static str {
        match self {
            Method::Eis => "nelder-mead",
            Method::LevenbergMarquardt => "levenberg-marquardt",
            Method::GradientDescent => "gradient-descent",
            Method::Lbfgs => "lbfgs",
            Method::Newton => "newton",
            Method::All => "all",
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Result of one fit, in the shape delivered to the webhook pipeline.
#[derive(Debug, Clone, Serialize)]
pub struct FitResult {
    /// Fitted parameter vector, in original (un-normalized) units.
    pub params: Vec<f64>,
    /// Minimum of the objective. Finite when `status` is [`FitStatus::Ok`].
    pub min: f64,
    /// Unit of `min`; always chi-square in this engine.
    pub min_unit: String,
    /// Outcome classification.
    pub status: FitStatus,
    /// Major iterations of the winning inner minimizer.
    pub iterations: u64,
    /// Objective evaluations of the winning inner minimizer.
    pub func_evals: u64,
    /// Wall-clock time of the whole solve, in milliseconds.
    pub runtime_ms: f64,
}

impl FitResult {
    /// The canonical failed fit: infinite minimum, empty parameter vector.
    pub fn error() -> Self {
        Self {
            params: Vec::new(),
            min: f64::INFINITY,
            min_unit: "ChiSq".to_string(),
            status: FitStatus::Error,
            iterations: 0,
            func_evals: 0,
            runtime_ms: 0.0,
        }
    }

    /// Whether the fit converged.
    pub fn is_ok(&self) -> bool {
        self.status == FitStatus::Ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_parse_accepts_aliases() {
        assert_eq!(Method::parse("lm"), Some(Method::LevenbergMarquardt));
        assert_eq!(Method::parse("levenberg-marquardt"), Some(Method::LevenbergMarquardt));
        assert_eq!(Method::parse("gd"), Some(Method::GradientDescent));
        assert_eq!(Method::parse("nelder-mead"), Some(Method::Eis));
        assert_eq!(Method::parse("simulated-annealing"), None);
    }

    #[test]
    fn error_result_shape() {
        let res = FitResult::error();
        assert_eq!(res.status, FitStatus::Error);
        assert!(res.min.is_infinite());
        assert!(res.params.is_empty());
    }
}
