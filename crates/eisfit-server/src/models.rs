//! Wire formats and internal pipeline records.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam::channel::Sender;
use eisfit_core::{ElementImpedance, FitResult};
use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use crate::config::FitConfig;

// ── Incoming requests ───────────────────────────────────────────────

/// One complex impedance sample.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct ImpedancePoint {
    pub real: f64,
    pub imag: f64,
}

/// Body of `POST /eis-data`: one measured spectrum. `magnitude` and
/// `phase` are accepted for compatibility with instrument exports but
/// the fit works on the complex samples.
#[derive(Debug, Clone, Deserialize)]
pub struct ImpedanceData {
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub frequencies: Vec<f64>,
    #[serde(default)]
    pub magnitude: Vec<f64>,
    #[serde(default)]
    pub phase: Vec<f64>,
    #[serde(default)]
    pub impedance: Vec<ImpedancePoint>,
}

/// One spectrum inside a batch, ordered by `iteration`.
#[derive(Debug, Clone, Deserialize)]
pub struct BatchItem {
    pub iteration: usize,
    pub impedance_data: ImpedanceData,
}

/// Body of `POST /eis-data/batch`.
#[derive(Debug, Clone, Deserialize)]
pub struct ImpedanceBatch {
    #[serde(default)]
    pub batch_id: String,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub spectra: Vec<BatchItem>,
}

// ── Pipeline records ────────────────────────────────────────────────

/// One fitting task handed to the worker pool.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: usize,
    pub request_id: String,
    pub batch_id: String,
    pub iteration: usize,
    pub freqs: Vec<f64>,
    pub observed: Vec<Complex64>,
    pub fit: Arc<FitConfig>,
    pub submitted_at: Instant,
    /// Per-request reply channel; bounded, so slow collectors apply
    /// backpressure to the workers.
    pub reply: Sender<WorkResult>,
}

/// What a worker sends back for one job.
#[derive(Debug, Clone)]
pub struct WorkResult {
    pub id: usize,
    pub request_id: String,
    pub batch_id: String,
    pub iteration: usize,
    pub result: FitResult,
    pub processing_time: Duration,
    pub success: bool,
    pub freqs: Vec<f64>,
    pub real_imp: Vec<f64>,
    pub imag_imp: Vec<f64>,
    pub circuit_code: String,
}

/// One queued webhook dispatch.
#[derive(Debug, Clone)]
pub struct WebhookItem {
    pub request_id: String,
    pub chi_square: f64,
    pub real_imp: Vec<f64>,
    pub imag_imp: Vec<f64>,
    pub freqs: Vec<f64>,
    pub params: Vec<f64>,
    pub element_names: Vec<String>,
    pub element_impedances: Vec<ElementImpedance>,
    pub circuit_code: String,
}

/// Per-spectrum timing record, indexed by iteration within its batch.
#[derive(Debug, Clone, Default)]
pub struct SpectrumTiming {
    pub iteration: usize,
    pub processing_time: Duration,
    pub chi_square: f64,
    pub success: bool,
    pub circuit_code: String,
}

// ── Outgoing webhook payload ────────────────────────────────────────

/// JSON body POSTed to the webhook sink, one per fitted spectrum.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookPayload {
    pub id: String,
    pub time: String,
    pub chi_square: f64,
    pub real_impedance: Vec<f64>,
    pub imaginary_impedance: Vec<f64>,
    pub frequencies: Vec<f64>,
    pub parameters: Vec<f64>,
    pub element_names: Vec<String>,
    pub element_impedances: Vec<ElementImpedanceJson>,
    pub circuit_type: String,
}

/// Wire form of one element's impedance row.
#[derive(Debug, Clone, Serialize)]
pub struct ElementImpedanceJson {
    pub name: String,
    pub impedances: Vec<ImpedancePoint>,
}

impl From<&ElementImpedance> for ElementImpedanceJson {
    fn from(row: &ElementImpedance) -> Self {
        Self {
            name: row.name.clone(),
            impedances: row
                .impedances
                .iter()
                .map(|&(real, imag)| ImpedancePoint { real, imag })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_request_decodes() {
        let body = r#"{
            "timestamp": "2024-05-01T10:00:00Z",
            "frequencies": [1.0, 10.0],
            "magnitude": [50.0, 49.0],
            "phase": [0.0, -0.1],
            "impedance": [{"real": 50.0, "imag": 0.0}, {"real": 49.0, "imag": -4.0}]
        }"#;
        let data: ImpedanceData = serde_json::from_str(body).unwrap();
        assert_eq!(data.frequencies.len(), 2);
        assert_eq!(data.impedance[1].imag, -4.0);
    }

    #[test]
    fn batch_decodes_with_missing_optionals() {
        let body = r#"{
            "batch_id": "b-1",
            "spectra": [
                {"iteration": 0, "impedance_data": {"frequencies": [1.0], "impedance": [{"real": 1.0, "imag": 0.0}]}}
            ]
        }"#;
        let batch: ImpedanceBatch = serde_json::from_str(body).unwrap();
        assert_eq!(batch.batch_id, "b-1");
        assert_eq!(batch.spectra[0].iteration, 0);
        assert!(batch.timestamp.is_empty());
    }

    #[test]
    fn malformed_impedance_point_is_a_decode_error() {
        let body = r#"{"frequencies": [1.0], "impedance": [{"real": 1.0}]}"#;
        assert!(serde_json::from_str::<ImpedanceData>(body).is_err());
    }

    #[test]
    fn webhook_payload_field_names() {
        let payload = WebhookPayload {
            id: "abc".into(),
            time: "t".into(),
            chi_square: 0.5,
            real_impedance: vec![1.0],
            imaginary_impedance: vec![-1.0],
            frequencies: vec![10.0],
            parameters: vec![50.0],
            element_names: vec!["r".into()],
            element_impedances: vec![ElementImpedanceJson {
                name: "r".into(),
                impedances: vec![ImpedancePoint { real: 50.0, imag: 0.0 }],
            }],
            circuit_type: "R(QR)".into(),
        };
        let json = serde_json::to_value(&payload).unwrap();
        for key in [
            "id",
            "time",
            "chi_square",
            "real_impedance",
            "imaginary_impedance",
            "frequencies",
            "parameters",
            "element_names",
            "element_impedances",
            "circuit_type",
        ] {
            assert!(json.get(key).is_some(), "missing key {key}");
        }
        assert_eq!(json["element_impedances"][0]["impedances"][0]["real"], 50.0);
    }
}
