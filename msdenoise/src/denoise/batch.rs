//! Parallel denoising of a spectral library.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use tracing::{debug, info, trace};

use crate::data::spectrum::SpectralRecord;
use crate::denoise::config::DenoiseConfig;
use crate::denoise::engine::{CandidateCache, DenoisedSpectrum, DenoisingEngine};
use crate::denoise::report::Report;
use crate::error::{BatchError, RecordError};

/// Cooperative cancellation flag, checked before each record starts.
///
/// Records already running finish normally; records not yet started are skipped.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Records finished so far, succeeded, failed or skipped alike.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BatchProgress {
    pub completed: usize,
    pub total: usize,
}

impl BatchProgress {
    pub fn fraction(&self) -> f64 {
        match self.total {
            0 => 1.0,
            n => self.completed as f64 / n as f64,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum RecordOutcome {
    Succeeded(DenoisedSpectrum),
    Failed(RecordError),
    Skipped,
}

/// Cleaned records of the succeeded inputs, in input order, and the report.
#[derive(Clone, Debug, PartialEq)]
pub struct BatchOutput {
    pub cleaned: Vec<SpectralRecord>,
    pub report: Report,
}

/// Denoise a batch of records on `config.worker_count` threads.
///
/// The configuration is validated before anything runs. Every worker owns its
/// candidate cache; results are put back in input order. Failing records are
/// reported and left out of the cleaned output without affecting their siblings.
///
/// # Arguments
///
/// * `records` - the spectral library, never modified
/// * `config` - shared denoising configuration
/// * `cancel` - cancellation flag, may be triggered from another thread
///
/// # Returns
///
/// * `BatchOutput` - cleaned records and report, or the configuration error
///
/// # Example
///
/// ```
/// use msdenoise::data::spectrum::{Peak, SpectralRecord};
/// use msdenoise::denoise::batch::{process, CancellationToken};
/// use msdenoise::denoise::config::DenoiseConfig;
///
/// let records = vec![
///     SpectralRecord::new("C9H11NO2", 165.0784, 1, vec![Peak::new(120.081, 1.0)]),
///     SpectralRecord::new("C9H11NO2Q", 165.0784, 1, vec![Peak::new(120.081, 1.0)]),
/// ];
/// let config = DenoiseConfig::default().with_workers(2);
/// let output = process(&records, &config, &CancellationToken::new()).unwrap();
/// assert_eq!(output.cleaned.len(), 1);
/// assert_eq!(output.report.failed, 1);
/// ```
pub fn process(
    records: &[SpectralRecord],
    config: &DenoiseConfig,
    cancel: &CancellationToken,
) -> Result<BatchOutput, BatchError> {
    process_with_progress(records, config, cancel, |_| {})
}

/// Like [`process`], calling `on_progress` from the worker threads after every record.
///
/// `completed` counts up from 1 to `total`; calls may arrive out of order across
/// workers. Cancelling from inside the callback skips every record not yet started.
///
/// # Example
///
/// ```
/// use std::sync::atomic::{AtomicUsize, Ordering};
///
/// use msdenoise::data::spectrum::{Peak, SpectralRecord};
/// use msdenoise::denoise::batch::{process_with_progress, CancellationToken};
/// use msdenoise::denoise::config::DenoiseConfig;
///
/// let records = vec![SpectralRecord::new("C9H11NO2", 165.0784, 1, vec![Peak::new(120.081, 1.0)]); 3];
/// let calls = AtomicUsize::new(0);
/// let output = process_with_progress(&records, &DenoiseConfig::default(), &CancellationToken::new(), |progress| {
///     assert_eq!(progress.total, 3);
///     calls.fetch_add(1, Ordering::SeqCst);
/// })
/// .unwrap();
/// assert_eq!(calls.load(Ordering::SeqCst), 3);
/// assert_eq!(output.report.succeeded, 3);
/// ```
pub fn process_with_progress<F>(
    records: &[SpectralRecord],
    config: &DenoiseConfig,
    cancel: &CancellationToken,
    on_progress: F,
) -> Result<BatchOutput, BatchError>
where
    F: Fn(BatchProgress) + Sync,
{
    config.validate()?;
    info!(
        "denoising {} records on {} workers, tolerance {} Da, depth {}",
        records.len(),
        config.worker_count,
        config.tolerance_da,
        config.candidate_depth
    );

    let pool = ThreadPoolBuilder::new().num_threads(config.worker_count).build()?;
    let total = records.len();
    let completed = AtomicUsize::new(0);

    let mut tagged: Vec<(usize, RecordOutcome)> = pool.install(|| {
        records
            .par_iter()
            .enumerate()
            .map_init(CandidateCache::new, |cache, (index, record)| {
                let outcome = if cancel.is_cancelled() {
                    RecordOutcome::Skipped
                } else {
                    match DenoisingEngine::new(record, config).run_with_cache(cache) {
                        Ok(denoised) => RecordOutcome::Succeeded(denoised),
                        Err(e) => RecordOutcome::Failed(e),
                    }
                };
                let progress = BatchProgress {
                    completed: completed.fetch_add(1, Ordering::SeqCst) + 1,
                    total,
                };
                trace!("record {} finished, {}/{}", index, progress.completed, progress.total);
                on_progress(progress);
                (index, outcome)
            })
            .collect()
    });
    tagged.sort_by_key(|(index, _)| *index);
    let outcomes: Vec<RecordOutcome> = tagged.into_iter().map(|(_, outcome)| outcome).collect();

    let report = Report::from_outcomes(records, &outcomes);
    if cancel.is_cancelled() {
        debug!("batch cancelled, {} records skipped", report.skipped);
    }
    info!("{}", report);

    let cleaned = outcomes
        .into_iter()
        .filter_map(|outcome| match outcome {
            RecordOutcome::Succeeded(denoised) => Some(denoised.record),
            _ => None,
        })
        .collect();

    Ok(BatchOutput { cleaned, report })
}
