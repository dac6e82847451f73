//! Per-request orchestration: split, submit, collect, emit, record.
//!
//! The collection loop polls the request's reply channel and places each
//! result by its `iteration` index, so arrival order never matters. A
//! spectrum whose fit failed still counts as received; the batch always
//! completes and its timing row marks the failure.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam::channel::{Sender, TryRecvError};
use eisfit_core::{element_impedances, element_tags};
use num_complex::Complex64;
use tracing::{debug, error, info, warn};

use crate::http::ServiceState;
use crate::id::generate_id;
use crate::models::{ImpedanceBatch, ImpedanceData, Job, SpectrumTiming, WebhookItem, WorkResult};
use crate::timing::BatchStats;

/// Sleep between result polls.
const POLL_BACKOFF: Duration = Duration::from_millis(1);

/// Process one batch to completion. Runs on a blocking thread; the HTTP
/// handler has already acknowledged the request.
pub fn run_batch(state: &ServiceState, batch: ImpedanceBatch) {
    let batch_start = Instant::now();
    let n = batch.spectra.len();
    info!(batch = %batch.batch_id, spectra = n, "batch processing started");

    let (reply_tx, reply_rx) = state.pool.reply_channel();
    let mut timings = vec![SpectrumTiming::default(); n];
    let mut received = 0usize;

    // Submission interleaves with collection: once the bounded jobs queue
    // fills, workers can only free slots if their replies are drained, so
    // a batch larger than the combined queue capacity must start
    // collecting before it finishes submitting.
    let mut full_warned = false;
    for item in &batch.spectra {
        let mut job = build_job(
            state,
            &item.impedance_data,
            &batch.batch_id,
            item.iteration,
            generate_id(),
            reply_tx.clone(),
        );
        loop {
            match state.pool.try_submit(job) {
                Ok(()) => break,
                Err(returned) => {
                    job = returned;
                    if !full_warned {
                        warn!(batch = %batch.batch_id, "jobs queue full, collecting while submitting");
                        full_warned = true;
                    }
                    while let Ok(result) = reply_rx.try_recv() {
                        record_batch_result(state, result, &mut timings);
                        received += 1;
                    }
                    std::thread::sleep(POLL_BACKOFF);
                }
            }
        }
    }
    drop(reply_tx);

    while received < n {
        match reply_rx.try_recv() {
            Ok(result) => {
                record_batch_result(state, result, &mut timings);
                received += 1;
            }
            Err(TryRecvError::Empty) => std::thread::sleep(POLL_BACKOFF),
            Err(TryRecvError::Disconnected) => {
                warn!(batch = %batch.batch_id, received, total = n, "worker pool went away mid-batch");
                return;
            }
        }
    }

    let total_time = batch_start.elapsed();
    let stats = BatchStats::compute(&timings, total_time, state.pool.workers());
    if let Err(err) = state.timing.append(&batch.batch_id, &stats) {
        error!(batch = %batch.batch_id, error = %err, "failed to persist timing row");
    }
    info!(
        batch = %batch.batch_id,
        total_ms = total_time.as_secs_f64() * 1e3,
        success_rate = stats.success_rate,
        efficiency = stats.efficiency_score,
        "batch processing completed"
    );
}

/// Process one stand-alone spectrum through the same pool.
pub fn run_single(state: &ServiceState, request_id: String, data: ImpedanceData) {
    let (reply_tx, reply_rx) = state.pool.reply_channel();
    let job = build_job(state, &data, "", 0, request_id.clone(), reply_tx.clone());
    state.pool.submit(job);
    drop(reply_tx);

    loop {
        match reply_rx.try_recv() {
            Ok(result) => {
                state.pool.queue_webhook(webhook_item(&result, result.request_id.clone()));
                info!(request = %result.request_id, chi_square = result.result.min, "spectrum processed");
                return;
            }
            Err(TryRecvError::Empty) => std::thread::sleep(POLL_BACKOFF),
            Err(TryRecvError::Disconnected) => {
                warn!(request = %request_id, "worker pool went away before the result arrived");
                return;
            }
        }
    }
}

fn record_batch_result(state: &ServiceState, result: WorkResult, timings: &mut [SpectrumTiming]) {
    timings[result.iteration] = SpectrumTiming {
        iteration: result.iteration,
        processing_time: result.processing_time,
        chi_square: result.result.min,
        success: result.success,
        circuit_code: result.circuit_code.clone(),
    };

    let request_id = format!("{}_iter_{:03}", result.request_id, result.iteration);
    state.pool.queue_webhook(webhook_item(&result, request_id));
    debug!(iteration = result.iteration, chi_square = result.result.min, "processed spectrum");
}

fn build_job(
    state: &ServiceState,
    data: &ImpedanceData,
    batch_id: &str,
    iteration: usize,
    request_id: String,
    reply: Sender<WorkResult>,
) -> Job {
    let observed: Vec<Complex64> = data
        .impedance
        .iter()
        .map(|p| Complex64::new(p.real, p.imag))
        .collect();
    for (index, z) in observed.iter().enumerate() {
        if !z.re.is_finite() || !z.im.is_finite() {
            warn!(request = %request_id, index, re = z.re, im = z.im, "non-finite impedance sample");
        }
    }

    Job {
        id: iteration,
        request_id,
        batch_id: batch_id.to_string(),
        iteration,
        freqs: data.frequencies.clone(),
        observed,
        fit: Arc::clone(&state.fit),
        submitted_at: Instant::now(),
        reply,
    }
}

/// Build the dispatch for one finished fit, including the per-element
/// impedance rows.
pub(crate) fn webhook_item(result: &WorkResult, request_id: String) -> WebhookItem {
    let code = result.circuit_code.to_lowercase();
    let tags = element_tags(&code);
    let rows = element_impedances(&result.freqs, &result.result.params, &tags);

    WebhookItem {
        request_id,
        chi_square: result.result.min,
        real_imp: result.real_imp.clone(),
        imag_imp: result.imag_imp.clone(),
        freqs: result.freqs.clone(),
        params: result.result.params.clone(),
        element_names: tags.iter().map(|t| t.to_string()).collect(),
        element_impedances: rows,
        circuit_code: result.circuit_code.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FitConfig;
    use crate::models::{BatchItem, ImpedancePoint};
    use crate::pool::{JobProcessor, WorkerPool};
    use crate::timing::TimingSink;
    use crate::webhook::{WebhookError, WebhookSink};
    use eisfit_core::{FitResult, FitStatus};
    use parking_lot::Mutex;

    struct InstantProcessor;

    impl JobProcessor for InstantProcessor {
        fn process(&self, _freqs: &[f64], _observed: &[Complex64], _cfg: &FitConfig) -> FitResult {
            FitResult {
                params: vec![50.0],
                min: 1e-9,
                min_unit: "ChiSq".to_string(),
                status: FitStatus::Ok,
                iterations: 3,
                func_evals: 9,
                runtime_ms: 0.1,
            }
        }
    }

    #[derive(Default)]
    struct CollectingSink {
        items: Mutex<Vec<WebhookItem>>,
    }

    impl WebhookSink for CollectingSink {
        fn deliver(&self, item: &WebhookItem) -> Result<(), WebhookError> {
            self.items.lock().push(item.clone());
            Ok(())
        }
    }

    fn spectrum() -> ImpedanceData {
        ImpedanceData {
            timestamp: String::new(),
            frequencies: vec![1.0, 10.0, 100.0],
            magnitude: Vec::new(),
            phase: Vec::new(),
            impedance: vec![
                ImpedancePoint { real: 50.0, imag: 0.0 },
                ImpedancePoint { real: 49.0, imag: -2.0 },
                ImpedancePoint { real: 48.0, imag: -4.0 },
            ],
        }
    }

    fn test_state(sink: Arc<CollectingSink>, dir: &tempfile::TempDir) -> ServiceState {
        ServiceState {
            fit: Arc::new(FitConfig::default()),
            pool: Arc::new(WorkerPool::new(2, Arc::new(InstantProcessor), sink)),
            timing: Arc::new(TimingSink::new(dir.path().join("timings.csv"))),
        }
    }

    fn wait_for_webhooks(sink: &CollectingSink, count: usize) -> Vec<WebhookItem> {
        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            let items = sink.items.lock().clone();
            if items.len() >= count {
                return items;
            }
            assert!(Instant::now() < deadline, "webhooks never arrived");
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn batch_emits_one_webhook_per_spectrum_with_iteration_ids() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(CollectingSink::default());
        let state = test_state(Arc::clone(&sink), &dir);

        let batch = ImpedanceBatch {
            batch_id: "b-42".to_string(),
            timestamp: String::new(),
            spectra: (0..5)
                .map(|iteration| BatchItem { iteration, impedance_data: spectrum() })
                .collect(),
        };
        run_batch(&state, batch);

        let items = wait_for_webhooks(&sink, 5);
        assert_eq!(items.len(), 5);
        let mut suffixes: Vec<String> = items
            .iter()
            .map(|i| i.request_id.rsplit("_iter_").next().unwrap().to_string())
            .collect();
        suffixes.sort();
        assert_eq!(suffixes, vec!["000", "001", "002", "003", "004"]);
        for item in &items {
            assert_eq!(item.freqs.len(), item.real_imp.len());
            assert_eq!(item.freqs.len(), item.imag_imp.len());
            assert_eq!(item.circuit_code, "R(QR)");
        }

        let csv = std::fs::read_to_string(state.timing.path()).unwrap();
        assert!(csv.contains("b-42"));

        state.pool.shutdown();
    }

    #[test]
    fn single_spectrum_webhook_has_no_iteration_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(CollectingSink::default());
        let state = test_state(Arc::clone(&sink), &dir);

        run_single(&state, "cafebabe12345678".to_string(), spectrum());

        let items = wait_for_webhooks(&sink, 1);
        assert_eq!(items[0].request_id, "cafebabe12345678");
        assert_eq!(items[0].params, vec![50.0]);

        state.pool.shutdown();
    }

    #[test]
    fn webhook_item_carries_element_rows() {
        let result = WorkResult {
            id: 0,
            request_id: "req".to_string(),
            batch_id: String::new(),
            iteration: 0,
            result: FitResult {
                params: vec![50.0, 1e-6, 0.8, 100.0],
                min: 1e-9,
                min_unit: "ChiSq".to_string(),
                status: FitStatus::Ok,
                iterations: 1,
                func_evals: 1,
                runtime_ms: 0.1,
            },
            processing_time: Duration::from_millis(1),
            success: true,
            freqs: vec![1.0, 10.0],
            real_imp: vec![150.0, 140.0],
            imag_imp: vec![0.0, -5.0],
            circuit_code: "R(QR)".to_string(),
        };

        let item = webhook_item(&result, "req_iter_000".to_string());
        assert_eq!(item.element_names, vec!["r", "qy", "qn", "r"]);
        let row_names: Vec<&str> = item.element_impedances.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(row_names, vec!["r", "Q", "r"]);
        assert_eq!(item.element_impedances[0].impedances.len(), 2);
    }
}
