//! Service configuration.
//!
//! Everything is carried in explicit config values handed to the
//! components at construction; there are no globals. Environment
//! overrides are honored at startup but none are required.

use std::collections::HashMap;
use std::path::PathBuf;

use eisfit_core::{Method, Weighting};
use tracing::warn;

/// Chi-square below which the smart mode stops retrying.
pub const DEFAULT_MIN_TARGET: f64 = 1.35e-2;
/// Retry budget for the smart mode.
pub const DEFAULT_MAX_ITERATIONS: usize = 10;

/// How each spectrum is fitted.
#[derive(Debug, Clone)]
pub struct FitConfig {
    /// Circuit code, as displayed on the wire (e.g. `R(QR)`).
    pub circuit_code: String,
    /// Optimization strategy.
    pub method: Method,
    /// Residual weighting.
    pub weighting: Weighting,
    /// Explicit starting parameters; empty means consult
    /// `known_initials`, then derive from the data.
    pub init_values: Vec<f64>,
    /// Early-exit chi-square for the smart mode.
    pub min_target: f64,
    /// Retry budget for the smart mode.
    pub max_iterations: usize,
    /// Starting-value table for well-known circuits, keyed by lowercased
    /// code.
    pub known_initials: HashMap<String, Vec<f64>>,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            circuit_code: "R(QR)".to_string(),
            method: Method::Eis,
            weighting: Weighting::Modulus,
            init_values: Vec::new(),
            min_target: DEFAULT_MIN_TARGET,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            known_initials: known_initials_table(),
        }
    }
}

/// Starting values for circuits seen often enough to have tuned seeds.
pub fn known_initials_table() -> HashMap<String, Vec<f64>> {
    let mut table = HashMap::new();
    table.insert("r(cr)".to_string(), vec![50.0, 1e-6, 100.0]);
    table.insert("r(qr)".to_string(), vec![50.0, 1e-6, 0.8, 100.0]);
    table.insert("r(cr)(cr)".to_string(), vec![50.0, 1e-6, 100.0, 1e-6, 100.0]);
    table.insert(
        "r(q(r(qr)))".to_string(),
        vec![50.0, 1e-6, 0.8, 100.0, 1e-6, 0.8, 100.0],
    );
    table.insert(
        "r(q(r(q(r(qr)))))".to_string(),
        vec![50.0, 1e-6, 0.8, 100.0, 1e-6, 0.8, 100.0, 1e-6, 0.8, 100.0],
    );
    table
}

/// Listener, pool and delivery settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP listen port.
    pub port: u16,
    /// Worker count for the fitting pool.
    pub workers: usize,
    /// Downstream webhook receiver.
    pub webhook_url: String,
    /// Timing CSV path.
    pub timing_path: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            workers: 5,
            webhook_url: "http://webplot:3001/webhook".to_string(),
            timing_path: PathBuf::from("concurrent_timing_results.csv"),
        }
    }
}

/// Build the configuration pair, applying `EISFIT_*` environment
/// overrides where present.
pub fn from_env() -> (FitConfig, ServerConfig) {
    let mut fit = FitConfig::default();
    let mut server = ServerConfig::default();

    if let Ok(code) = std::env::var("EISFIT_CIRCUIT") {
        fit.circuit_code = code;
    }
    if let Ok(name) = std::env::var("EISFIT_METHOD") {
        match Method::parse(&name) {
            Some(method) => fit.method = method,
            None => warn!(method = %name, "unknown optimization method, keeping nelder-mead"),
        }
    }
    if let Ok(port) = std::env::var("EISFIT_PORT") {
        match port.parse() {
            Ok(port) => server.port = port,
            Err(_) => warn!(port = %port, "invalid EISFIT_PORT, keeping default"),
        }
    }
    if let Ok(workers) = std::env::var("EISFIT_WORKERS") {
        match workers.parse() {
            Ok(workers) => server.workers = workers,
            Err(_) => warn!(workers = %workers, "invalid EISFIT_WORKERS, keeping default"),
        }
    }
    if let Ok(url) = std::env::var("EISFIT_WEBHOOK_URL") {
        server.webhook_url = url;
    }
    if let Ok(path) = std::env::var("EISFIT_TIMING_PATH") {
        server.timing_path = PathBuf::from(path);
    }

    (fit, server)
}

#[cfg(test)]
mod tests {
    use super::*;
    use eisfit_core::parameter_arity;

    #[test]
    fn defaults_match_the_service_contract() {
        let fit = FitConfig::default();
        assert_eq!(fit.circuit_code, "R(QR)");
        assert_eq!(fit.method, Method::Eis);
        assert_eq!(fit.max_iterations, 10);

        let server = ServerConfig::default();
        assert_eq!(server.port, 8080);
        assert_eq!(server.workers, 5);
    }

    #[test]
    fn known_initials_have_matching_arity() {
        for (code, values) in known_initials_table() {
            assert_eq!(parameter_arity(&code), values.len(), "table entry {code}");
        }
    }
}
