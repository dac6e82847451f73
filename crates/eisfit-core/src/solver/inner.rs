//! The bounded inner minimizers behind a single contract.
//!
//! Every function here takes an objective description plus a starting point
//! and returns `Result<InnerSolution, FitError>`. Backend failures
//! (singular Hessians, failed line searches, non-finite residuals) come
//! back as `Err`; they never unwind into the driver.

use argmin::core::{CostFunction, Error, Executor, Gradient, Hessian, State};
use argmin::solver::gradientdescent::SteepestDescent;
use argmin::solver::linesearch::MoreThuenteLineSearch;
use argmin::solver::neldermead::NelderMead;
use argmin::solver::newton::Newton;
use argmin::solver::quasinewton::LBFGS;
use levenberg_marquardt::{LeastSquaresProblem, LevenbergMarquardt};
use nalgebra::storage::Owned;
use nalgebra::{DMatrix, DVector, Dyn};
use num_complex::Complex64;

use crate::chisq::chi_square;
use crate::circuit::circuit_impedance;
use crate::error::FitError;
use crate::fd;
use crate::types::Weighting;

/// Iteration bound for the Nelder-Mead simplex.
pub(crate) const NELDER_MEAD_MAX_ITERS: u64 = 2000;
/// Iteration bound for the gradient-based methods.
const GRADIENT_MAX_ITERS: u64 = 500;
/// Simplex standard-deviation tolerance.
const SD_TOLERANCE: f64 = 1e-12;
/// L-BFGS history length.
const LBFGS_MEMORY: usize = 7;

/// What an inner minimizer hands back to the driver.
#[derive(Debug, Clone)]
pub(crate) struct InnerSolution {
    pub params: Vec<f64>,
    pub min: f64,
    pub iterations: u64,
    pub func_evals: u64,
}

/// The chi-square surface for one circuit and data set.
#[derive(Debug, Clone)]
pub(crate) struct ChiSqProblem {
    pub code: String,
    pub freqs: Vec<f64>,
    pub observed: Vec<Complex64>,
    pub weighting: Weighting,
}

impl ChiSqProblem {
    pub fn objective(&self, x: &DVector<f64>) -> f64 {
        let calculated = circuit_impedance(&self.code, &self.freqs, x.as_slice());
        chi_square(&self.observed, &calculated, self.weighting)
    }
}

impl CostFunction for ChiSqProblem {
    type Param = DVector<f64>;
    type Output = f64;

    fn cost(&self, p: &Self::Param) -> Result<Self::Output, Error> {
        Ok(self.objective(p))
    }
}

impl Gradient for ChiSqProblem {
    type Param = DVector<f64>;
    type Gradient = DVector<f64>;

    fn gradient(&self, p: &Self::Param) -> Result<Self::Gradient, Error> {
        Ok(fd::gradient(&|x| self.objective(x), p))
    }
}

impl Hessian for ChiSqProblem {
    type Param = DVector<f64>;
    type Hessian = DMatrix<f64>;

    fn hessian(&self, p: &Self::Param) -> Result<Self::Hessian, Error> {
        Ok(fd::hessian(&|x| self.objective(x), p))
    }
}

fn backend(err: Error) -> FitError {
    FitError::Backend(err.to_string())
}

fn solution<I>(state: &I) -> Result<InnerSolution, FitError>
where
    I: State<Param = DVector<f64>, Float = f64>,
{
    let params = state
        .get_best_param()
        .ok_or_else(|| FitError::Backend("minimizer produced no parameters".to_string()))?;
    let func_evals = state
        .get_func_counts()
        .values()
        .copied()
        .sum::<u64>();
    Ok(InnerSolution {
        params: params.iter().copied().collect(),
        min: state.get_best_cost(),
        iterations: state.get_iter(),
        func_evals,
    })
}

/// Simplex around `x0`: one vertex per axis, nudged by 5% (or a small
/// absolute step for zero components).
fn initial_simplex(x0: &[f64]) -> Vec<DVector<f64>> {
    let base = DVector::from_column_slice(x0);
    let mut simplex = vec![base.clone()];
    for i in 0..x0.len() {
        let mut vertex = base.clone();
        if vertex[i] != 0.0 {
            vertex[i] *= 1.05;
        } else {
            vertex[i] = 2.5e-4;
        }
        simplex.push(vertex);
    }
    simplex
}

pub(crate) fn nelder_mead(
    problem: ChiSqProblem,
    x0: &[f64],
    max_iters: u64,
) -> Result<InnerSolution, FitError> {
    if x0.is_empty() {
        return Err(FitError::EmptyInitialValues);
    }
    let solver = NelderMead::new(initial_simplex(x0))
        .with_sd_tolerance(SD_TOLERANCE)
        .map_err(backend)?;
    let res = Executor::new(problem, solver)
        .configure(|state| state.max_iters(max_iters))
        .run()
        .map_err(backend)?;
    solution(res.state())
}

pub(crate) fn gradient_descent(problem: ChiSqProblem, x0: &[f64]) -> Result<InnerSolution, FitError> {
    if x0.is_empty() {
        return Err(FitError::EmptyInitialValues);
    }
    let solver = SteepestDescent::new(MoreThuenteLineSearch::new());
    let res = Executor::new(problem, solver)
        .configure(|state| {
            state
                .param(DVector::from_column_slice(x0))
                .max_iters(GRADIENT_MAX_ITERS)
        })
        .run()
        .map_err(backend)?;
    solution(res.state())
}

pub(crate) fn lbfgs(problem: ChiSqProblem, x0: &[f64]) -> Result<InnerSolution, FitError> {
    if x0.is_empty() {
        return Err(FitError::EmptyInitialValues);
    }
    let solver = LBFGS::new(MoreThuenteLineSearch::new(), LBFGS_MEMORY);
    let res = Executor::new(problem, solver)
        .configure(|state| {
            state
                .param(DVector::from_column_slice(x0))
                .max_iters(GRADIENT_MAX_ITERS)
        })
        .run()
        .map_err(backend)?;
    solution(res.state())
}

pub(crate) fn newton(problem: ChiSqProblem, x0: &[f64]) -> Result<InnerSolution, FitError> {
    if x0.is_empty() {
        return Err(FitError::EmptyInitialValues);
    }
    let solver = Newton::new();
    let res = Executor::new(problem, solver)
        .configure(|state| {
            state
                .param(DVector::from_column_slice(x0))
                .max_iters(GRADIENT_MAX_ITERS)
        })
        .run()
        .map_err(backend)?;
    solution(res.state())
}

/// Least-squares view of the objective for Levenberg-Marquardt: one
/// residual per data point, each the weighted squared complex distance.
struct ResidualProblem {
    inner: ChiSqProblem,
    params: DVector<f64>,
}

impl ResidualProblem {
    fn residuals_at(&self, x: &DVector<f64>) -> DVector<f64> {
        let calculated = circuit_impedance(&self.inner.code, &self.inner.freqs, x.as_slice());
        DVector::from_iterator(
            self.inner.observed.len(),
            self.inner.observed.iter().zip(&calculated).map(|(o, c)| {
                let d2 = (o.re - c.re).powi(2) + (o.im - c.im).powi(2);
                match self.inner.weighting {
                    Weighting::Unity => d2,
                    Weighting::Modulus => {
                        let w2 = o.norm_sqr();
                        if w2 > 0.0 {
                            d2 / w2
                        } else {
                            d2
                        }
                    }
                }
            }),
        )
    }
}

impl LeastSquaresProblem<f64, Dyn, Dyn> for ResidualProblem {
    type ParameterStorage = Owned<f64, Dyn>;
    type ResidualStorage = Owned<f64, Dyn>;
    type JacobianStorage = Owned<f64, Dyn, Dyn>;

    fn set_params(&mut self, x: &DVector<f64>) {
        self.params.copy_from(x);
    }

    fn params(&self) -> DVector<f64> {
        self.params.clone()
    }

    fn residuals(&self) -> Option<DVector<f64>> {
        let r = self.residuals_at(&self.params);
        if r.iter().all(|v| v.is_finite()) {
            Some(r)
        } else {
            None
        }
    }

    fn jacobian(&self) -> Option<DMatrix<f64>> {
        let x = &self.params;
        let m = self.inner.observed.len();
        let n = x.len();
        let mut jac = DMatrix::zeros(m, n);
        let mut probe = x.clone();
        for j in 0..n {
            let h = 1e-6 * x[j].abs().max(1.0);
            probe[j] = x[j] + h;
            let rp = self.residuals_at(&probe);
            probe[j] = x[j] - h;
            let rm = self.residuals_at(&probe);
            probe[j] = x[j];
            for i in 0..m {
                jac[(i, j)] = (rp[i] - rm[i]) / (2.0 * h);
            }
        }
        if jac.iter().all(|v| v.is_finite()) {
            Some(jac)
        } else {
            None
        }
    }
}

pub(crate) fn levenberg_marquardt(
    problem: ChiSqProblem,
    x0: &[f64],
) -> Result<InnerSolution, FitError> {
    if x0.is_empty() {
        return Err(FitError::EmptyInitialValues);
    }
    let residual_problem = ResidualProblem {
        inner: problem,
        params: DVector::from_column_slice(x0),
    };
    let (solved, report) = LevenbergMarquardt::new().minimize(residual_problem);
    if !report.termination.was_successful() {
        return Err(FitError::Backend(format!(
            "levenberg-marquardt terminated: {:?}",
            report.termination
        )));
    }
    let params: Vec<f64> = solved.params.iter().copied().collect();
    // Report the minimum in chi-square units rather than the internal
    // least-squares objective.
    let calculated = circuit_impedance(&solved.inner.code, &solved.inner.freqs, &params);
    let min = chi_square(&solved.inner.observed, &calculated, solved.inner.weighting);
    Ok(InnerSolution {
        params,
        min,
        iterations: report.number_of_evaluations as u64,
        func_evals: report.number_of_evaluations as u64,
    })
}
