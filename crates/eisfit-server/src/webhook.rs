//! Webhook delivery: a pooled HTTP client and the queue-draining sender.
//!
//! Delivery is best effort. Failures of any kind (connect, timeout,
//! 4xx/5xx) are logged and never retried; the fitting pipeline must not
//! be coupled to the health of the downstream sink.

use std::sync::Arc;
use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use crossbeam::channel::Receiver;
use crossbeam::queue::SegQueue;
use tracing::{debug, error, warn};

use crate::models::{ElementImpedanceJson, WebhookItem, WebhookPayload};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(45);
const IDLE_TIMEOUT: Duration = Duration::from_secs(90);
const MAX_IDLE_PER_HOST: usize = 20;
const ENCODE_BUFFER_CAPACITY: usize = 1024;

/// Webhook delivery failure.
#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("failed to encode webhook payload: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("failed to send webhook: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("webhook request failed with status {0}")]
    Status(reqwest::StatusCode),
}

/// Where finished results go. The production implementation is
/// [`WebhookClient`]; tests substitute their own sinks.
pub trait WebhookSink: Send + Sync + 'static {
    fn deliver(&self, item: &WebhookItem) -> Result<(), WebhookError>;
}

/// HTTP client with connection reuse and pooled JSON encode buffers.
pub struct WebhookClient {
    url: String,
    client: reqwest::blocking::Client,
    buffers: Arc<SegQueue<Vec<u8>>>,
}

impl WebhookClient {
    /// Build a client for the given sink URL.
    pub fn new(url: impl Into<String>) -> Result<Self, reqwest::Error> {
        let client = reqwest::blocking::Client::builder()
            .pool_max_idle_per_host(MAX_IDLE_PER_HOST)
            .pool_idle_timeout(IDLE_TIMEOUT)
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            url: url.into(),
            client,
            buffers: Arc::new(SegQueue::new()),
        })
    }

    /// Compose the payload and POST it. Returns an error on transport
    /// failure or any 4xx/5xx response.
    pub fn send(&self, item: &WebhookItem) -> Result<(), WebhookError> {
        let payload = build_payload(item);

        let mut buf = self
            .buffers
            .pop()
            .unwrap_or_else(|| Vec::with_capacity(ENCODE_BUFFER_CAPACITY));
        buf.clear();
        serde_json::to_writer(&mut buf, &payload)?;
        let body = buf.clone();
        self.buffers.push(buf);

        let response = self
            .client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()?;

        let status = response.status();
        debug!(request = %item.request_id, chi_square = item.chi_square, status = %status, "webhook sent");
        if status.is_client_error() || status.is_server_error() {
            return Err(WebhookError::Status(status));
        }
        Ok(())
    }
}

impl WebhookSink for WebhookClient {
    fn deliver(&self, item: &WebhookItem) -> Result<(), WebhookError> {
        self.send(item)
    }
}

/// Single consumer of the webhook queue. Runs on its own thread; on
/// shutdown it drains what is already queued, then exits.
pub(crate) fn sender_loop(
    queue: Receiver<WebhookItem>,
    shutdown: Receiver<()>,
    sink: Arc<dyn WebhookSink>,
) {
    loop {
        crossbeam::select! {
            recv(queue) -> item => {
                let Ok(item) = item else { return };
                deliver(sink.as_ref(), &item);
            }
            recv(shutdown) -> _ => {
                while let Ok(item) = queue.try_recv() {
                    deliver(sink.as_ref(), &item);
                }
                return;
            }
        }
    }
}

fn deliver(sink: &dyn WebhookSink, item: &WebhookItem) {
    if let Err(err) = sink.deliver(item) {
        error!(request = %item.request_id, error = %err, "webhook delivery failed");
    }
}

/// Build the wire payload, replacing every non-finite float by 0.0.
pub(crate) fn build_payload(item: &WebhookItem) -> WebhookPayload {
    let mut chi_square = item.chi_square;
    if !chi_square.is_finite() {
        warn!(request = %item.request_id, value = chi_square, "sanitizing non-finite chi_square to 0.0");
        chi_square = 0.0;
    }

    WebhookPayload {
        id: item.request_id.clone(),
        time: Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true),
        chi_square,
        real_impedance: sanitized(&item.real_imp, "real_impedance", &item.request_id),
        imaginary_impedance: sanitized(&item.imag_imp, "imaginary_impedance", &item.request_id),
        frequencies: sanitized(&item.freqs, "frequencies", &item.request_id),
        parameters: sanitized(&item.params, "parameters", &item.request_id),
        element_names: item.element_names.clone(),
        element_impedances: item.element_impedances.iter().map(Into::into).collect(),
        circuit_type: item.circuit_code.clone(),
    }
}

fn sanitized(values: &[f64], field: &str, request_id: &str) -> Vec<f64> {
    let mut out = values.to_vec();
    let mut replaced = 0usize;
    for v in &mut out {
        if !v.is_finite() {
            *v = 0.0;
            replaced += 1;
        }
    }
    if replaced > 0 {
        warn!(request = request_id, field, replaced, "sanitized non-finite values to 0.0");
    }
    out
}
