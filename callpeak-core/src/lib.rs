pub mod auth;
pub mod client;
pub mod config;
pub mod details;
pub mod error;
pub mod jobs;
pub mod models;
pub mod ratelimit;
pub mod sweep;

pub use auth::{BearerToken, StaticTokenProvider, TokenProvider};
pub use client::{ApiError, Pause, RequestClient, RetryPolicy, TokioPause};
pub use config::CallpeakConfig;
pub use details::DetailsQuery;
pub use error::CallpeakError;
pub use jobs::{ChunkReport, JobError, JobOrchestrator, JobSettings, RecordSink};
pub use models::{
    AnalysisWindow, ConversationRecord, Interval, IntervalKey, JobChunk, JobState, PeakResult,
    RateLimitSnapshot,
};
pub use sweep::{compute_peak, daily_peaks};
