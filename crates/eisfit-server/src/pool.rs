//! Fixed-size worker pool with bounded queues and buffer reuse.
//!
//! Workers are OS threads: the fit is CPU-bound numerical code and must
//! never run on the async accept path. Three capacities shape the
//! backpressure. The `jobs` queue and the per-request reply channels hold
//! `2 * workers` entries so a stalled consumer slows producers; the
//! webhook queue holds `4 * workers` because delivery is slower and more
//! variable, and overflow there drops instead of blocking.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use crossbeam::channel::{bounded, Receiver, Sender, TrySendError};
use crossbeam::queue::SegQueue;
use eisfit_core::{FitResult, FitStatus};
use num_complex::Complex64;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::FitConfig;
use crate::models::{Job, WebhookItem, WorkResult};
use crate::webhook::{self, WebhookSink};

/// Worker count used when the configuration asks for zero.
pub const DEFAULT_WORKERS: usize = 5;

/// Buffers never shrink below this many entries.
const MIN_BUFFER_CAPACITY: usize = 200;

/// The fitting computation, abstracted so the pool can be exercised with
/// stub processors in tests.
pub trait JobProcessor: Send + Sync + 'static {
    fn process(&self, freqs: &[f64], observed: &[Complex64], cfg: &FitConfig) -> FitResult;
}

// ── Reusable buffers ────────────────────────────────────────────────

/// Scratch arrays a worker fills while splitting a spectrum into the
/// result's real/imaginary columns.
#[derive(Debug)]
pub struct BufferSet {
    pub real: Vec<f64>,
    pub imag: Vec<f64>,
    pub pairs: Vec<[f64; 2]>,
}

impl BufferSet {
    fn new() -> Self {
        Self {
            real: Vec::with_capacity(MIN_BUFFER_CAPACITY),
            imag: Vec::with_capacity(MIN_BUFFER_CAPACITY),
            pairs: Vec::with_capacity(MIN_BUFFER_CAPACITY),
        }
    }

    fn reset(&mut self) {
        self.real.clear();
        self.imag.clear();
        self.pairs.clear();
    }

    /// Make room for `n` entries, growing to `n * 1.25` (but never below
    /// the minimum) when the current capacity is exceeded.
    pub fn ensure(&mut self, n: usize) {
        if self.real.capacity() < n {
            let cap = (n + n / 4).max(MIN_BUFFER_CAPACITY);
            self.real = Vec::with_capacity(cap);
            self.imag = Vec::with_capacity(cap);
            self.pairs = Vec::with_capacity(cap);
        }
    }
}

/// Free list of buffer sets shared by all workers.
struct BufferPool {
    free: Arc<SegQueue<BufferSet>>,
}

impl BufferPool {
    fn new() -> Self {
        Self {
            free: Arc::new(SegQueue::new()),
        }
    }

    fn get(&self) -> PooledBuffer {
        let mut buf = self.free.pop().unwrap_or_else(BufferSet::new);
        buf.reset();
        PooledBuffer {
            buf: Some(buf),
            pool: Arc::clone(&self.free),
        }
    }
}

/// RAII borrow of a [`BufferSet`]; returns to the pool on drop without
/// shrinking.
struct PooledBuffer {
    buf: Option<BufferSet>,
    pool: Arc<SegQueue<BufferSet>>,
}

impl Deref for PooledBuffer {
    type Target = BufferSet;
    fn deref(&self) -> &BufferSet {
        self.buf.as_ref().expect("buffer present until drop")
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut BufferSet {
        self.buf.as_mut().expect("buffer present until drop")
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.pool.push(buf);
        }
    }
}

// ── The pool ────────────────────────────────────────────────────────

/// Fixed worker set plus the webhook sender thread.
pub struct WorkerPool {
    jobs_tx: Sender<Job>,
    webhook_tx: Sender<WebhookItem>,
    shutdown_tx: Mutex<Option<Sender<()>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    workers: usize,
}

impl WorkerPool {
    /// Start `workers` fitting threads and one webhook sender.
    pub fn new(
        workers: usize,
        processor: Arc<dyn JobProcessor>,
        sink: Arc<dyn WebhookSink>,
    ) -> Self {
        let workers = if workers == 0 { DEFAULT_WORKERS } else { workers };

        let (jobs_tx, jobs_rx) = bounded::<Job>(workers * 2);
        let (webhook_tx, webhook_rx) = bounded::<WebhookItem>(workers * 4);
        let (shutdown_tx, shutdown_rx) = bounded::<()>(0);
        let buffers = Arc::new(BufferPool::new());

        let mut handles = Vec::with_capacity(workers + 1);
        for worker_id in 0..workers {
            let jobs_rx = jobs_rx.clone();
            let shutdown_rx = shutdown_rx.clone();
            let processor = Arc::clone(&processor);
            let buffers = Arc::clone(&buffers);
            handles.push(
                std::thread::Builder::new()
                    .name(format!("eisfit-worker-{worker_id}"))
                    .spawn(move || worker_loop(worker_id, jobs_rx, shutdown_rx, processor, buffers))
                    .expect("spawn worker thread"),
            );
        }
        handles.push(
            std::thread::Builder::new()
                .name("eisfit-webhook".to_string())
                .spawn(move || webhook::sender_loop(webhook_rx, shutdown_rx, sink))
                .expect("spawn webhook sender thread"),
        );

        info!(workers, "worker pool started");
        Self {
            jobs_tx,
            webhook_tx,
            shutdown_tx: Mutex::new(Some(shutdown_tx)),
            handles: Mutex::new(handles),
            workers,
        }
    }

    /// Number of fitting threads.
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// A fresh per-request reply channel, bounded like the jobs queue.
    pub fn reply_channel(&self) -> (Sender<WorkResult>, Receiver<WorkResult>) {
        bounded(self.workers * 2)
    }

    /// Non-blocking submit: hands the job back when the queue is full so
    /// the caller can make progress (collect results) before retrying.
    pub fn try_submit(&self, job: Job) -> Result<(), Job> {
        match self.jobs_tx.try_send(job) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(job)) => Err(job),
            Err(TrySendError::Disconnected(job)) => {
                warn!(request = %job.request_id, "worker pool is shut down, job dropped");
                Ok(())
            }
        }
    }

    /// Submit a job. Never drops: when the queue is full this logs once
    /// and blocks until a worker frees a slot.
    pub fn submit(&self, job: Job) {
        match self.jobs_tx.try_send(job) {
            Ok(()) => {}
            Err(TrySendError::Full(job)) => {
                warn!(request = %job.request_id, "jobs queue full, submit will block");
                if self.jobs_tx.send(job).is_err() {
                    warn!("worker pool is shut down, job dropped");
                }
            }
            Err(TrySendError::Disconnected(job)) => {
                warn!(request = %job.request_id, "worker pool is shut down, job dropped");
            }
        }
    }

    /// Queue a webhook dispatch. Best effort: a full queue drops the item
    /// so fitting throughput never waits on the sink.
    pub fn queue_webhook(&self, item: WebhookItem) {
        match self.webhook_tx.try_send(item) {
            Ok(()) => {}
            Err(TrySendError::Full(item)) => {
                warn!(request = %item.request_id, "webhook queue full, dropping webhook");
            }
            Err(TrySendError::Disconnected(item)) => {
                warn!(request = %item.request_id, "webhook sender is shut down, dropping webhook");
            }
        }
    }

    /// Cooperative shutdown: signal every thread, then join them. Workers
    /// finish their in-flight job; queued jobs are abandoned; the webhook
    /// sender drains what is already queued.
    pub fn shutdown(&self) {
        let Some(shutdown_tx) = self.shutdown_tx.lock().take() else {
            return;
        };
        info!("shutting down worker pool");
        drop(shutdown_tx);
        let handles = std::mem::take(&mut *self.handles.lock());
        for handle in handles {
            let _ = handle.join();
        }
        info!("worker pool shutdown complete");
    }
}

fn worker_loop(
    worker_id: usize,
    jobs: Receiver<Job>,
    shutdown: Receiver<()>,
    processor: Arc<dyn JobProcessor>,
    buffers: Arc<BufferPool>,
) {
    debug!(worker = worker_id, "worker started");
    loop {
        crossbeam::select! {
            recv(jobs) -> job => {
                let Ok(job) = job else { return };
                let result = process_job(&job, processor.as_ref(), &buffers);
                if job.reply.send(result).is_err() {
                    warn!(worker = worker_id, request = %job.request_id, "result receiver gone, discarding result");
                }
            }
            recv(shutdown) -> _ => {
                debug!(worker = worker_id, "worker stopping");
                return;
            }
        }
    }
}

fn process_job(job: &Job, processor: &dyn JobProcessor, buffers: &Arc<BufferPool>) -> WorkResult {
    debug!(
        request = %job.request_id,
        iteration = job.iteration,
        queued_for = ?job.submitted_at.elapsed(),
        "job picked up"
    );

    let started = Instant::now();
    let result = processor.process(&job.freqs, &job.observed, &job.fit);
    let processing_time = started.elapsed();

    // Split the spectrum into columns through the reusable buffers, then
    // copy out: the buffer goes back to the pool, the result must not
    // alias it.
    let mut buf = buffers.get();
    buf.ensure(job.observed.len());
    let scratch = &mut *buf;
    scratch.pairs.extend(job.observed.iter().map(|z| [z.re, z.im]));
    scratch.real.extend(scratch.pairs.iter().map(|p| p[0]));
    scratch.imag.extend(scratch.pairs.iter().map(|p| p[1]));
    let real_imp = scratch.real.clone();
    let imag_imp = scratch.imag.clone();

    let success = result.status == FitStatus::Ok;
    WorkResult {
        id: job.id,
        request_id: job.request_id.clone(),
        batch_id: job.batch_id.clone(),
        iteration: job.iteration,
        result,
        processing_time,
        success,
        freqs: job.freqs.clone(),
        real_imp,
        imag_imp,
        circuit_code: job.fit.circuit_code.clone(),
    }
}
