//! eisfit-server -- networked EIS fitting service.
//!
//! Accepts single spectra and batches over HTTP, fits them on a fixed
//! worker pool, and delivers results asynchronously to a webhook sink.
//!
//! Endpoints:
//! - `POST /eis-data`       - single spectrum, 202 with a request id
//! - `POST /eis-data/batch` - batch of spectra, 202 with the batch id
//! - `GET  /health`         - health check
//!
//! Processing is fire-and-forget: the HTTP surface acknowledges
//! immediately, workers fit each spectrum, and one webhook POST per
//! spectrum carries the fitted parameters, goodness of fit and
//! per-element impedances downstream. Batch completions append a timing
//! row to a CSV file for throughput analysis.

pub mod batch;
pub mod config;
pub mod error;
pub mod fit;
pub mod http;
pub mod id;
pub mod models;
pub mod pool;
pub mod timing;
pub mod webhook;
