use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct CallpeakConfig {
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub jobs: JobsConfig,
    #[serde(default)]
    pub extractor: ExtractorConfig,
    #[serde(default)]
    pub run: RunConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServiceConfig {
    pub log_level: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ApiConfig {
    /// API root without the `/api/v2` suffix, e.g. `https://api.mypurecloud.com`
    pub base_url: String,
    /// Bearer token. Usually supplied through `CALLPEAK__API__TOKEN` or `--token`.
    #[serde(default)]
    pub token: Option<String>,
    pub request_timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.mypurecloud.com".to_string(),
            token: None,
            request_timeout_secs: 60,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetryConfig {
    /// Total attempts per request, including the first one
    pub max_attempts: usize,
    /// Wait applied to a 429 that carries no usable reset hint
    pub default_rate_limit_wait_secs: u64,
    /// Upper bound of the exponential schedule for 5xx and transport errors
    pub max_backoff_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 6,
            default_rate_limit_wait_secs: 10,
            max_backoff_secs: 60,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct JobsConfig {
    pub page_size: u32,
    pub poll_interval_secs: u64,
    pub max_poll_wait_minutes: u64,
    /// Ask the server to pre-filter on `mediaType == voice`
    pub media_type_filter: bool,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            page_size: 100,
            poll_interval_secs: 5,
            max_poll_wait_minutes: 60,
            media_type_filter: true,
        }
    }
}

impl JobsConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn max_poll_wait(&self) -> Duration {
        Duration::from_secs(self.max_poll_wait_minutes * 60)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExtractorConfig {
    /// Case-insensitive pattern matched against participant purpose / type
    pub external_pattern: String,
    /// Disable the external-participant guard entirely
    pub loose: bool,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            external_pattern: "customer|external".to_string(),
            loose: false,
        }
    }
}

/// What to do when a single chunk hits a fatal job error.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ChunkFailurePolicy {
    /// Stop the whole run on the first failed chunk
    #[default]
    Abort,
    /// Log the failed chunk, leave it out of the result, keep going
    Skip,
}

impl std::str::FromStr for ChunkFailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "abort" => Ok(Self::Abort),
            "skip" => Ok(Self::Skip),
            other => Err(format!("unknown chunk failure policy '{other}' (expected abort|skip)")),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RunConfig {
    pub chunk_days: u32,
    pub chunk_failure_policy: ChunkFailurePolicy,
    pub max_parallel_chunks: usize,
    pub output_dir: String,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            chunk_days: 7,
            chunk_failure_policy: ChunkFailurePolicy::Abort,
            max_parallel_chunks: 1,
            output_dir: "./callpeak-out".to_string(),
        }
    }
}

impl CallpeakConfig {
    /// Load from an optional TOML file, then apply `CALLPEAK__SECTION__KEY`
    /// environment overrides.
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::with_name(path));
        }
        let s = builder
            .add_source(
                Environment::with_prefix("CALLPEAK")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        s.try_deserialize()
    }
}
