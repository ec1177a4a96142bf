//! Run orchestration: plan chunks, drain each job into a chunk-local
//! collector, fold the collectors into one store, then sweep.

use callpeak_core::config::{CallpeakConfig, ChunkFailurePolicy};
use callpeak_core::details::DetailsReport;
use callpeak_core::jobs::MIN_POLL_INTERVAL;
use callpeak_core::models::{plan_chunks, AnalysisWindow, DailyPeak, Interval, JobChunk, PeakResult};
use callpeak_core::{
    compute_peak, daily_peaks, ApiError, CallpeakError, ChunkReport, DetailsQuery, JobError,
    JobOrchestrator, JobSettings, RequestClient, RetryPolicy, StaticTokenProvider,
};
use callpeak_ingest::{ExtractError, ExtractStats, IntervalCollector, IntervalExtractor, IntervalStore};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Setup(#[from] CallpeakError),

    #[error(transparent)]
    Extractor(#[from] ExtractError),

    #[error("API client error: {0}")]
    Client(#[from] ApiError),

    #[error("Chunk {index} ({interval}) failed{}: {source}", status_suffix(.status))]
    Chunk {
        index: usize,
        interval: String,
        status: Option<u16>,
        #[source]
        source: JobError,
    },
}

fn status_suffix(status: &Option<u16>) -> String {
    match status {
        Some(status) => format!(" with HTTP {status}"),
        None => String::new(),
    }
}

impl RunError {
    pub fn is_auth(&self) -> bool {
        match self {
            RunError::Client(e) => e.is_auth(),
            RunError::Chunk { source, .. } => source.is_auth(),
            _ => false,
        }
    }
}

/// Effective parameters for one run, after config and CLI overrides.
#[derive(Debug, Clone, Serialize)]
pub struct RunParameters {
    pub window: AnalysisWindow,
    pub chunk_days: u32,
    pub page_size: u32,
    pub poll_interval_secs: u64,
    pub max_poll_wait_minutes: u64,
    pub media_type_filter: bool,
    pub loose: bool,
    pub chunk_failure_policy: ChunkFailurePolicy,
    pub max_parallel_chunks: usize,
}

impl RunParameters {
    pub fn from_config(config: &CallpeakConfig, window: AnalysisWindow) -> Self {
        Self {
            window,
            chunk_days: config.run.chunk_days,
            page_size: config.jobs.page_size,
            poll_interval_secs: config.jobs.poll_interval_secs,
            max_poll_wait_minutes: config.jobs.max_poll_wait_minutes,
            media_type_filter: config.jobs.media_type_filter,
            loose: config.extractor.loose,
            chunk_failure_policy: config.run.chunk_failure_policy,
            max_parallel_chunks: config.run.max_parallel_chunks,
        }
    }

    pub fn job_settings(&self) -> JobSettings {
        JobSettings {
            page_size: self.page_size.max(1),
            poll_interval: Duration::from_secs(self.poll_interval_secs).max(MIN_POLL_INTERVAL),
            max_poll_wait: Duration::from_secs(self.max_poll_wait_minutes * 60),
            media_type_filter: self.media_type_filter,
        }
    }
}

/// Explicit request context shared by every chunk of a run.
#[derive(Clone)]
pub struct RunContext {
    pub client: RequestClient,
    pub extractor: IntervalExtractor,
}

impl RunContext {
    pub fn new(client: RequestClient, extractor: IntervalExtractor) -> Self {
        Self { client, extractor }
    }

    /// Build the client and extractor from config. `token` wins over
    /// `api.token`.
    pub fn from_config(config: &CallpeakConfig, token: Option<&str>) -> Result<Self, RunError> {
        let token = token
            .or(config.api.token.as_deref())
            .unwrap_or_default();
        let tokens = StaticTokenProvider::new(token).map_err(ApiError::from)?;
        let client = RequestClient::new(
            config.api.base_url.clone(),
            Arc::new(tokens),
            RetryPolicy::from_config(&config.retry),
            Duration::from_secs(config.api.request_timeout_secs),
        )?;
        let extractor = IntervalExtractor::from_config(&config.extractor)?;
        Ok(Self::new(client, extractor))
    }
}

/// A chunk left out of the result under [`ChunkFailurePolicy::Skip`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ChunkFailure {
    pub index: usize,
    pub interval: String,
    pub status: Option<u16>,
    pub message: String,
}

#[derive(Debug)]
pub struct RunOutcome {
    pub parameters: RunParameters,
    pub chunks: Vec<JobChunk>,
    pub reports: Vec<ChunkReport>,
    pub failed_chunks: Vec<ChunkFailure>,
    pub stats: ExtractStats,
    pub intervals: Vec<Interval>,
    pub peak: PeakResult,
    pub daily: Vec<DailyPeak>,
}

impl RunOutcome {
    fn finish(
        parameters: RunParameters,
        chunks: Vec<JobChunk>,
        reports: Vec<ChunkReport>,
        failed_chunks: Vec<ChunkFailure>,
        stats: ExtractStats,
        store: IntervalStore,
    ) -> Self {
        let peak = compute_peak(store.iter(), parameters.window.start, parameters.window.end);
        let daily = daily_peaks(&peak.series);
        tracing::info!(
            intervals = store.len(),
            observations = store.observations(),
            peak = peak.peak_concurrent,
            first_peak_minute = ?peak.first_peak_minute,
            "Peak computed"
        );
        Self {
            parameters,
            chunks,
            reports,
            failed_chunks,
            stats,
            intervals: store.into_intervals(),
            peak,
            daily,
        }
    }
}

/// Async-jobs pipeline over the whole window.
///
/// Up to `max_parallel_chunks` jobs run at once. Each drains into its own
/// collector and the driver alone folds collectors into the global store.
pub async fn run_peak_analysis(ctx: &RunContext, params: RunParameters) -> Result<RunOutcome, RunError> {
    let chunks = plan_chunks(&params.window, params.chunk_days)?;
    let orchestrator = JobOrchestrator::new(ctx.client.clone(), params.job_settings());
    let extractor = ctx.extractor.clone().with_loose(params.loose);
    let parallel = params.max_parallel_chunks.max(1);

    tracing::info!(
        window = %params.window.iso_interval(),
        chunks = chunks.len(),
        chunk_days = params.chunk_days,
        parallel,
        loose = params.loose,
        "Starting peak analysis"
    );

    let mut store = IntervalStore::new();
    let mut stats = ExtractStats::default();
    let mut reports = Vec::with_capacity(chunks.len());
    let mut failed_chunks = Vec::new();

    let orchestrator = &orchestrator;
    let mut results = stream::iter(chunks.iter())
        .map(|chunk| {
            let mut collector = IntervalCollector::new(extractor.clone());
            async move {
                let result = orchestrator.run_chunk(chunk, &mut collector).await;
                (chunk, result, collector)
            }
        })
        .buffer_unordered(parallel);

    while let Some((chunk, result, collector)) = results.next().await {
        match result {
            Ok(report) => {
                let (local, local_stats) = collector.into_parts();
                store.absorb(local);
                stats.absorb(&local_stats);
                tracing::info!(
                    chunk = chunk.index,
                    job_id = %report.job_id,
                    pages = report.pages,
                    intervals = report.intervals_emitted,
                    unique_intervals = store.len(),
                    sessions = local_stats.sessions,
                    skipped = ?local_stats,
                    "Chunk merged"
                );
                reports.push(report);
            }
            Err(source) => {
                let status = source.http_status();
                if source.is_auth() || params.chunk_failure_policy == ChunkFailurePolicy::Abort {
                    tracing::error!(chunk = chunk.index, status = ?status, error = %source, "Chunk failed, aborting run");
                    return Err(RunError::Chunk {
                        index: chunk.index,
                        interval: chunk.iso_interval(),
                        status,
                        source,
                    });
                }
                tracing::warn!(chunk = chunk.index, status = ?status, error = %source, "Chunk failed, skipping");
                failed_chunks.push(ChunkFailure {
                    index: chunk.index,
                    interval: chunk.iso_interval(),
                    status,
                    message: source.to_string(),
                });
            }
        }
    }
    drop(results);

    reports.sort_by_key(|r| r.chunk_index);
    failed_chunks.sort_by_key(|f| f.index);
    Ok(RunOutcome::finish(params, chunks, reports, failed_chunks, stats, store))
}

/// Synchronous details-query pipeline, for small windows and cross-checking
/// the jobs path.
pub async fn run_details_validation(
    ctx: &RunContext,
    params: RunParameters,
) -> Result<(RunOutcome, DetailsReport), RunError> {
    let mut query = DetailsQuery::new(ctx.client.clone(), params.page_size);
    if !params.media_type_filter {
        query = query.with_segment_filters(None);
    }
    let mut collector = IntervalCollector::new(ctx.extractor.clone().with_loose(params.loose));
    let report = query.run(&params.window, &mut collector).await?;
    tracing::info!(
        pages = report.pages,
        records = report.records,
        intervals = report.intervals_emitted,
        "Details query drained"
    );

    let (store, stats) = collector.into_parts();
    let outcome = RunOutcome::finish(params, Vec::new(), Vec::new(), Vec::new(), stats, store);
    Ok((outcome, report))
}
