//! 📂 FileProcessingJob: one file, start to finish, no matter what.
//!
//! Extract → store each record → log how long it took. That's the whole job.
//! Whatever goes wrong in here stays in here: a broken file is logged and reported,
//! a failed store call is logged and skipped, and the job still comes back with a report.
//! The worker that ran it never sees an `Err`.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::{error, info, warn};

use crate::common::source_file_name;
use crate::extractors::StreamingMetricExtractor;
use crate::stores::MetricStore;

/// 🏁 How a job ended.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    /// ✅ The whole document was read. Some records may still have failed to store.
    Completed,
    /// 💀 The file could not be read to the end. Records before the failure were still stored.
    Failed { cause: String },
}

/// 📊 What one job did, for the logs and the end-of-run summary.
#[derive(Debug, Clone, PartialEq)]
pub struct JobReport {
    pub path: PathBuf,
    pub outcome: JobOutcome,
    pub records_stored: usize,
    pub records_failed: usize,
    pub products_skipped: usize,
    pub elapsed: Duration,
}

impl JobReport {
    /// 🧯 The report for a job that never got to report for itself.
    pub(crate) fn crashed(path: PathBuf, cause: String, elapsed: Duration) -> Self {
        Self {
            path,
            outcome: JobOutcome::Failed { cause },
            records_stored: 0,
            records_failed: 0,
            products_skipped: 0,
            elapsed,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.outcome, JobOutcome::Failed { .. })
    }
}

/// 📂 The unit of work: one path.
#[derive(Debug, Clone)]
pub struct FileProcessingJob {
    path: PathBuf,
}

impl FileProcessingJob {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 🚀 Runs the job to completion. Never errors, always reports.
    pub async fn run<S: MetricStore + ?Sized>(self, store: &S) -> JobReport {
        let started = Instant::now();
        let file_name = source_file_name(&self.path);
        info!("🚀 Processing file '{}'", self.path.display());

        let mut records_stored = 0;
        let mut records_failed = 0;

        let (outcome, products_skipped) = match StreamingMetricExtractor::open(&self.path).await {
            Err(err) => {
                error!("💀 Error processing file '{}': {}", self.path.display(), error_chain(&err));
                (JobOutcome::Failed { cause: error_chain(&err) }, 0)
            }
            Ok(mut extractor) => {
                let outcome = loop {
                    match extractor.next_metric().await {
                        Ok(Some(record)) => match store.store(&record).await {
                            Ok(()) => {
                                records_stored += 1;
                                info!(
                                    "✅ Stored mean metric {:.2} for Product ID: {} from file {}",
                                    record.mean_value, record.product_id, record.source_file
                                );
                            }
                            Err(err) => {
                                // -- 🩹 one record down, the rest of the file carries on
                                records_failed += 1;
                                error!(
                                    "💀 Error storing metric for Product ID {} from file {}: {}",
                                    record.product_id,
                                    record.source_file,
                                    error_chain(&err)
                                );
                            }
                        },
                        Ok(None) => break JobOutcome::Completed,
                        Err(err) => {
                            error!(
                                "💀 Error processing file '{}': {}",
                                extractor.path().display(),
                                error_chain(&err)
                            );
                            break JobOutcome::Failed { cause: error_chain(&err) };
                        }
                    }
                };
                (outcome, extractor.handler().skipped_products())
            }
        };

        let elapsed = started.elapsed();
        if products_skipped > 0 {
            warn!(
                "🙈 {} product(s) in '{}' had no id or no usable metrics and were skipped",
                products_skipped, file_name
            );
        }
        info!(
            "🏁 Finished processing file '{}' in {:.2} seconds ({} stored, {} failed, {} skipped).",
            file_name,
            elapsed.as_secs_f64(),
            records_stored,
            records_failed,
            products_skipped
        );

        JobReport {
            path: self.path,
            outcome,
            records_stored,
            records_failed,
            products_skipped,
            elapsed,
        }
    }
}

/// 🧅 "outer: middle: inner", so the log line carries the whole story without a backtrace.
pub(crate) fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut message = err.to_string();
    let mut cause = err.source();
    while let Some(inner) = cause {
        message.push_str(": ");
        message.push_str(&inner.to_string());
        cause = inner.source();
    }
    message
}
