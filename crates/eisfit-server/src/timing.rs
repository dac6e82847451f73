//! Batch timing sink: aggregate statistics appended to a CSV file.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use parking_lot::Mutex;

use crate::models::SpectrumTiming;

const HEADER: [&str; 13] = [
    "Timestamp",
    "BatchID",
    "TotalSpectra",
    "Concurrency",
    "TotalBatchTime_ms",
    "AvgSpectrumTime_ms",
    "MinSpectrumTime_ms",
    "MaxSpectrumTime_ms",
    "SuccessRate",
    "AvgChiSquare",
    "SpectraPerSecond",
    "EfficiencyScore",
    "CircuitCode",
];

/// Failure to persist a timing row.
#[derive(Debug, thiserror::Error)]
pub enum TimingError {
    #[error("timing file I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to write timing record: {0}")]
    Csv(#[from] csv::Error),
}

/// Aggregate view of one completed batch.
#[derive(Debug, Clone)]
pub struct BatchStats {
    pub total_spectra: usize,
    pub concurrency: usize,
    pub total_time: Duration,
    pub avg_time: Duration,
    pub min_time: Duration,
    pub max_time: Duration,
    /// Percentage of spectra with a successful fit.
    pub success_rate: f64,
    /// Mean chi-square over successful spectra only; 0 when none.
    pub avg_chi_square: f64,
    pub spectra_per_second: f64,
    /// `(avg * n) / (total * concurrency)`; 1.0 at perfect linear
    /// speed-up.
    pub efficiency_score: f64,
    pub circuit_code: String,
}

impl BatchStats {
    /// Fold the per-spectrum records of one batch.
    pub fn compute(timings: &[SpectrumTiming], total_time: Duration, concurrency: usize) -> Self {
        let n = timings.len();
        let mut sum = Duration::ZERO;
        let mut min_time = Duration::MAX;
        let mut max_time = Duration::ZERO;
        let mut successful = 0usize;
        let mut chi_sum = 0.0;

        for timing in timings {
            sum += timing.processing_time;
            min_time = min_time.min(timing.processing_time);
            max_time = max_time.max(timing.processing_time);
            if timing.success {
                successful += 1;
                chi_sum += timing.chi_square;
            }
        }

        let avg_time = if n > 0 { sum / n as u32 } else { Duration::ZERO };
        let success_rate = if n > 0 {
            successful as f64 / n as f64 * 100.0
        } else {
            0.0
        };
        let avg_chi_square = if successful > 0 { chi_sum / successful as f64 } else { 0.0 };

        let total_secs = total_time.as_secs_f64();
        let spectra_per_second = if total_secs > 0.0 { n as f64 / total_secs } else { 0.0 };
        let efficiency_score = if total_secs > 0.0 && concurrency > 0 {
            (avg_time.as_secs_f64() * n as f64) / (total_secs * concurrency as f64)
        } else {
            0.0
        };

        Self {
            total_spectra: n,
            concurrency,
            total_time,
            avg_time,
            min_time: if n > 0 { min_time } else { Duration::ZERO },
            max_time,
            success_rate,
            avg_chi_square,
            spectra_per_second,
            efficiency_score,
            circuit_code: timings
                .first()
                .map(|t| t.circuit_code.clone())
                .unwrap_or_else(|| "Unknown".to_string()),
        }
    }
}

/// Append-only CSV sink. A mutex serializes appends from concurrently
/// completing batches; the header is written only when the file is
/// created.
pub struct TimingSink {
    path: PathBuf,
    lock: Mutex<()>,
}

impl TimingSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one row for a completed batch.
    pub fn append(&self, batch_id: &str, stats: &BatchStats) -> Result<(), TimingError> {
        let _guard = self.lock.lock();

        let write_header = !self.path.exists();
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(file);

        if write_header {
            writer.write_record(HEADER)?;
        }

        let ms = |d: Duration| format!("{:.2}", d.as_secs_f64() * 1e3);
        writer.write_record(&[
            Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            batch_id.to_string(),
            stats.total_spectra.to_string(),
            stats.concurrency.to_string(),
            ms(stats.total_time),
            ms(stats.avg_time),
            ms(stats.min_time),
            ms(stats.max_time),
            format!("{:.1}", stats.success_rate),
            format!("{:.6e}", stats.avg_chi_square),
            format!("{:.2}", stats.spectra_per_second),
            format!("{:.3}", stats.efficiency_score),
            stats.circuit_code.clone(),
        ])?;
        writer.flush()?;
        Ok(())
    }
}
