//! Equivalent-circuit fitting engine for electrochemical impedance spectra.
//!
//! This crate parses circuit description codes (e.g. `r(qr)`), evaluates the
//! complex impedance of the described network over a frequency vector, and
//! fits the circuit parameters to observed impedance samples by nonlinear
//! minimization of a weighted chi-square objective.
//!
//! # Circuit codes
//!
//! A circuit code is a string over `{r, c, l, w, q, o, t, g, f, (, )}`.
//! Elements are combined in series by default; every parenthesis toggles
//! between series and parallel combination, so `r(qr)` is a resistor in
//! series with a CPE-resistor parallel pair.
//!
//! # Example
//!
//! ```rust
//! use eisfit_core::{circuit_impedance, Solver, FitStatus};
//!
//! let freqs = vec![1.0, 10.0, 100.0];
//! let observed = circuit_impedance("r", &freqs, &[50.0]);
//!
//! let mut solver = Solver::new("r", freqs, observed);
//! let result = solver.solve(1e-10, 10);
//! assert_eq!(result.status, FitStatus::Ok);
//! assert!((result.params[0] - 50.0).abs() < 1e-3);
//! ```

pub mod chisq;
pub mod circuit;
pub mod elements;
pub mod error;
pub mod fd;
pub mod solver;
pub mod types;

pub use chisq::chi_square;
pub use circuit::{circuit_impedance, element_tags, parameter_arity};
pub use elements::{element_impedances, ElementImpedance};
pub use error::FitError;
pub use solver::Solver;
pub use types::{FitResult, FitStatus, Method, Weighting};
