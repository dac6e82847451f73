//! Error types for the fitting engine.
//!
//! Inner minimizers are treated as fallible black boxes: any backend failure
//! (singular Hessian, failed line search, non-finite objective) is converted
//! into a [`FitError`] and surfaced as an `ERROR` fit result at the driver
//! boundary. Nothing in this crate unwinds through the solver.

/// Primary error type for fitting operations.
#[derive(Debug, thiserror::Error)]
pub enum FitError {
    /// No initial parameter values were available for the minimizer.
    #[error("no initial parameter values available")]
    EmptyInitialValues,

    /// The supplied parameter vector does not match the circuit's arity.
    #[error("circuit `{code}` takes {expected} parameters, got {actual}")]
    ParameterArityMismatch {
        /// Circuit code being fitted.
        code: String,
        /// Parameter count the code requires.
        expected: usize,
        /// Parameter count that was supplied.
        actual: usize,
    },

    /// Frequency and impedance vectors have different lengths, or are empty.
    #[error("data length mismatch: {frequencies} frequencies vs {points} impedance points")]
    DataLengthMismatch {
        /// Number of frequency samples.
        frequencies: usize,
        /// Number of impedance samples.
        points: usize,
    },

    /// The optimization backend reported a failure.
    #[error("optimizer failed: {0}")]
    Backend(String),

    /// The objective at the returned minimum is NaN or infinite.
    #[error("objective is not finite at the returned minimum")]
    NonFiniteObjective,
}
