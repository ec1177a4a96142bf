//! Async analytics job orchestration: submit → poll → drain.
//!
//! One [`JobOrchestrator::run_chunk`] call drives a single chunk through
//! `Created → Polling → Fulfilled → Draining → Done`, or fails with a
//! [`JobError`]. Result pages are drained strictly in cursor order and the
//! absence of a cursor is the only end-of-results signal.

use reqwest::Url;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

use crate::client::{ApiError, RequestClient};
use crate::config::JobsConfig;
use crate::models::{ConversationRecord, JobChunk, JobState};

pub const JOBS_PATH: &str = "/api/v2/analytics/conversations/details/jobs";

/// Floor for the poll interval. A zero setting would otherwise poll in a
/// tight loop.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Receives decoded conversation records as pages are drained.
///
/// Implementations own their accumulated state. The return value is the
/// number of intervals the record produced, used for progress logging.
pub trait RecordSink: Send {
    fn accept(&mut self, record: ConversationRecord) -> usize;
}

impl RecordSink for Vec<ConversationRecord> {
    fn accept(&mut self, record: ConversationRecord) -> usize {
        self.push(record);
        0
    }
}

#[derive(Error, Debug)]
pub enum JobError {
    #[error("{stage} request failed: {source}")]
    Api {
        stage: &'static str,
        #[source]
        source: ApiError,
    },

    #[error("Job {job_id} ended in state {state}: {}", .message.as_deref().unwrap_or("no error message"))]
    JobFailed {
        job_id: String,
        state: JobState,
        message: Option<String>,
    },

    #[error("Job {job_id} did not complete within {waited_secs}s")]
    PollTimeout { job_id: String, waited_secs: u64 },

    #[error("Job submission response carried no job id")]
    MissingJobId,

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

impl JobError {
    fn api(stage: &'static str) -> impl FnOnce(ApiError) -> JobError {
        move |source| JobError::Api { stage, source }
    }

    pub fn http_status(&self) -> Option<u16> {
        match self {
            JobError::Api { source, .. } => source.status(),
            _ => None,
        }
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, JobError::Api { source, .. } if source.is_auth())
    }
}

#[derive(Debug, Clone)]
pub struct JobSettings {
    pub page_size: u32,
    pub poll_interval: Duration,
    pub max_poll_wait: Duration,
    pub media_type_filter: bool,
}

impl Default for JobSettings {
    fn default() -> Self {
        Self::from_config(&JobsConfig::default())
    }
}

impl JobSettings {
    pub fn from_config(config: &JobsConfig) -> Self {
        Self {
            page_size: config.page_size.max(1),
            poll_interval: config.poll_interval().max(MIN_POLL_INTERVAL),
            max_poll_wait: config.max_poll_wait(),
            media_type_filter: config.media_type_filter,
        }
    }
}

/// Per-chunk progress numbers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkReport {
    pub chunk_index: usize,
    pub job_id: String,
    pub pages: usize,
    pub records: usize,
    pub skipped_records: usize,
    pub intervals_emitted: usize,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobCreated {
    #[serde(alias = "id")]
    job_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobStatus {
    state: Option<String>,
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResultsPage {
    #[serde(default)]
    conversations: Vec<Value>,
    cursor: Option<String>,
}

/// Server-side `mediaType == voice` segment filter.
pub fn voice_segment_filter() -> Value {
    json!([{
        "type": "and",
        "predicates": [{ "dimension": "mediaType", "value": "voice" }]
    }])
}

/// Decode one raw page entry. Undecodable records are logged and dropped.
pub(crate) fn decode_record(raw: Value) -> Option<ConversationRecord> {
    match serde_json::from_value::<ConversationRecord>(raw) {
        Ok(record) => Some(record),
        Err(e) => {
            tracing::warn!(error = %e, "Skipping undecodable conversation record");
            None
        }
    }
}

pub struct JobOrchestrator {
    client: RequestClient,
    settings: JobSettings,
}

impl JobOrchestrator {
    pub fn new(client: RequestClient, settings: JobSettings) -> Self {
        Self { client, settings }
    }

    pub fn job_body(&self, interval: &str, filtered: bool) -> Value {
        if !filtered {
            return json!({ "interval": interval });
        }
        let mut body = json!({
            "interval": interval,
            "order": "asc",
            "orderBy": "conversationStart",
        });
        if self.settings.media_type_filter {
            body["segmentFilters"] = voice_segment_filter();
        }
        body
    }

    /// Submit the job. A filtered body rejected with a plain 4xx is retried
    /// once with the minimal `{interval}` body.
    pub async fn submit(&self, chunk: &JobChunk) -> Result<String, JobError> {
        let url = self.client.url(JOBS_PATH);
        let interval = chunk.iso_interval();

        let created: JobCreated = match self
            .client
            .post_json(&url, &self.job_body(&interval, true))
            .await
        {
            Ok(created) => created,
            Err(ApiError::Status { status, body }) if (400..500).contains(&status) => {
                tracing::warn!(
                    chunk = chunk.index,
                    status,
                    body = %body,
                    "Job body rejected, resubmitting without filters"
                );
                self.client
                    .post_json(&url, &self.job_body(&interval, false))
                    .await
                    .map_err(JobError::api("submit"))?
            }
            Err(e) => return Err(JobError::api("submit")(e)),
        };

        let job_id = created
            .job_id
            .filter(|id| !id.trim().is_empty())
            .ok_or(JobError::MissingJobId)?;
        tracing::info!(chunk = chunk.index, job_id = %job_id, interval = %interval, "Job submitted");
        Ok(job_id)
    }

    /// Poll until a terminal state. The budget is `max_poll_wait` of wall
    /// time since the first poll, request and retry time included, and never
    /// less than the sum of the poll pauses.
    pub async fn wait_for_completion(&self, job_id: &str) -> Result<JobState, JobError> {
        let url = self.client.url(&format!("{JOBS_PATH}/{job_id}"));
        let pause = self.client.pause_handle();
        let interval = self.settings.poll_interval.max(MIN_POLL_INTERVAL);
        let started = Instant::now();
        let mut paused = Duration::ZERO;
        let mut last_state: Option<JobState> = None;

        loop {
            let status: JobStatus = self
                .client
                .get_json(&url)
                .await
                .map_err(JobError::api("poll"))?;
            let state = JobState::from_api(status.state.as_deref().unwrap_or_default());
            let waited = started.elapsed().max(paused);

            if last_state.as_ref() != Some(&state) {
                tracing::info!(job_id = %job_id, state = %state, waited_secs = waited.as_secs(), "Job state");
                last_state = Some(state.clone());
            }

            if state.is_terminal_success() {
                return Ok(state);
            }
            if state.is_terminal_failure() {
                return Err(JobError::JobFailed {
                    job_id: job_id.to_string(),
                    state,
                    message: status.error_message,
                });
            }
            if waited >= self.settings.max_poll_wait {
                return Err(JobError::PollTimeout {
                    job_id: job_id.to_string(),
                    waited_secs: waited.as_secs(),
                });
            }

            pause.pause(interval).await;
            paused += interval;
        }
    }

    fn results_url(&self, job_id: &str, cursor: Option<&str>) -> Result<Url, JobError> {
        let base = self.client.url(&format!("{JOBS_PATH}/{job_id}/results"));
        let page_size = self.settings.page_size.to_string();
        let mut params: Vec<(&str, &str)> = vec![("pageSize", page_size.as_str())];
        if let Some(cursor) = cursor {
            params.push(("cursor", cursor));
        }
        Url::parse_with_params(&base, &params).map_err(|e| JobError::InvalidUrl(e.to_string()))
    }

    /// Drain every result page into `sink`.
    pub async fn drain_results(
        &self,
        job_id: &str,
        sink: &mut dyn RecordSink,
        report: &mut ChunkReport,
    ) -> Result<(), JobError> {
        let mut cursor: Option<String> = None;

        loop {
            let url = self.results_url(job_id, cursor.as_deref())?;
            let page: ResultsPage = self
                .client
                .get_json(url.as_str())
                .await
                .map_err(JobError::api("results"))?;

            report.pages += 1;
            let in_page = page.conversations.len();
            for raw in page.conversations {
                match decode_record(raw) {
                    Some(record) => {
                        report.records += 1;
                        report.intervals_emitted += sink.accept(record);
                    }
                    None => report.skipped_records += 1,
                }
            }
            tracing::debug!(job_id = %job_id, page = report.pages, records = in_page, "Result page drained");

            match page.cursor.filter(|c| !c.is_empty()) {
                Some(next) => cursor = Some(next),
                None => return Ok(()),
            }
        }
    }

    pub async fn run_chunk(
        &self,
        chunk: &JobChunk,
        sink: &mut dyn RecordSink,
    ) -> Result<ChunkReport, JobError> {
        let job_id = self.submit(chunk).await?;
        self.wait_for_completion(&job_id).await?;

        let mut report = ChunkReport {
            chunk_index: chunk.index,
            job_id: job_id.clone(),
            ..Default::default()
        };
        self.drain_results(&job_id, sink, &mut report).await?;

        tracing::info!(
            chunk = chunk.index,
            job_id = %job_id,
            pages = report.pages,
            records = report.records,
            skipped = report.skipped_records,
            intervals = report.intervals_emitted,
            "Chunk drained"
        );
        Ok(report)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::tests::test_client;
    use crate::models::AnalysisWindow;
    use wiremock::matchers::{body_json, body_partial_json, method, path, query_param, query_param_is_missing};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn settings() -> JobSettings {
        JobSettings {
            page_size: 2,
            poll_interval: Duration::from_secs(5),
            max_poll_wait: Duration::from_secs(15),
            media_type_filter: true,
        }
    }

    fn chunk() -> JobChunk {
        let w = AnalysisWindow::parse_iso_interval("2024-02-01T00:00:00Z/2024-02-08T00:00:00Z").unwrap();
        JobChunk {
            index: 0,
            start: w.start,
            end: w.end,
        }
    }

    fn conv(id: &str) -> Value {
        json!({ "conversationId": id, "participants": [] })
    }

    async fn mount_submit_and_fulfilled(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path(JOBS_PATH))
            .respond_with(ResponseTemplate::new(202).set_body_json(json!({ "jobId": "job-1" })))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("{JOBS_PATH}/job-1")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "state": "FULFILLED" })))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_run_chunk_submits_polls_and_drains() {
        let server = MockServer::start().await;
        let (client, pause) = test_client(&server, 3);
        let orchestrator = JobOrchestrator::new(client, settings());

        Mock::given(method("POST"))
            .and(path(JOBS_PATH))
            .and(body_partial_json(json!({
                "interval": "2024-02-01T00:00:00.000Z/2024-02-08T00:00:00.000Z",
                "order": "asc",
                "orderBy": "conversationStart",
                "segmentFilters": voice_segment_filter(),
            })))
            .respond_with(ResponseTemplate::new(202).set_body_json(json!({ "jobId": "job-1" })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("{JOBS_PATH}/job-1")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "state": "RUNNING" })))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("{JOBS_PATH}/job-1")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "state": "FULFILLED" })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("{JOBS_PATH}/job-1/results")))
            .and(query_param("pageSize", "2"))
            .and(query_param_is_missing("cursor"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "conversations": [conv("a"), conv("b")],
                "cursor": "c1"
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("{JOBS_PATH}/job-1/results")))
            .and(query_param("cursor", "c1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "conversations": [conv("c")]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let mut sink: Vec<ConversationRecord> = Vec::new();
        let report = orchestrator.run_chunk(&chunk(), &mut sink).await.unwrap();

        assert_eq!(report.job_id, "job-1");
        assert_eq!(report.pages, 2);
        assert_eq!(report.records, 3);
        let ids: Vec<_> = sink.iter().filter_map(|r| r.conversation_id.clone()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(pause.waits(), vec![Duration::from_secs(5); 2]);
    }

    #[tokio::test]
    async fn test_drain_stops_when_cursor_is_absent() {
        let server = MockServer::start().await;
        let (client, _pause) = test_client(&server, 1);
        let orchestrator = JobOrchestrator::new(client, settings());
        mount_submit_and_fulfilled(&server).await;

        Mock::given(method("GET"))
            .and(path(format!("{JOBS_PATH}/job-1/results")))
            .and(query_param_is_missing("cursor"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "conversations": [conv("a"), conv("b")],
                "cursor": "c1"
            })))
            .mount(&server)
            .await;
        // Full page (== pageSize) but no cursor: must be the last request.
        Mock::given(method("GET"))
            .and(path(format!("{JOBS_PATH}/job-1/results")))
            .and(query_param("cursor", "c1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "conversations": [conv("c"), conv("d")]
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("{JOBS_PATH}/job-1/results")))
            .and(query_param("cursor", "c2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "conversations": [] })))
            .expect(0)
            .mount(&server)
            .await;

        let mut sink: Vec<ConversationRecord> = Vec::new();
        let report = orchestrator.run_chunk(&chunk(), &mut sink).await.unwrap();
        assert_eq!(report.pages, 2);
        assert_eq!(sink.len(), 4);
    }

    #[tokio::test]
    async fn test_rejected_filter_falls_back_to_minimal_body() {
        let server = MockServer::start().await;
        let (client, _pause) = test_client(&server, 1);
        let orchestrator = JobOrchestrator::new(client, settings());

        Mock::given(method("POST"))
            .and(path(JOBS_PATH))
            .and(body_partial_json(json!({ "segmentFilters": voice_segment_filter() })))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad filter"))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(JOBS_PATH))
            .and(body_json(json!({
                "interval": "2024-02-01T00:00:00.000Z/2024-02-08T00:00:00.000Z"
            })))
            .respond_with(ResponseTemplate::new(202).set_body_json(json!({ "jobId": "job-9" })))
            .expect(1)
            .mount(&server)
            .await;

        let job_id = orchestrator.submit(&chunk()).await.unwrap();
        assert_eq!(job_id, "job-9");
    }

    #[tokio::test]
    async fn test_failed_job_state_is_fatal() {
        let server = MockServer::start().await;
        let (client, _pause) = test_client(&server, 1);
        let orchestrator = JobOrchestrator::new(client, settings());

        Mock::given(method("POST"))
            .and(path(JOBS_PATH))
            .respond_with(ResponseTemplate::new(202).set_body_json(json!({ "jobId": "job-1" })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("{JOBS_PATH}/job-1")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "state": "FAILED",
                "errorMessage": "query too large"
            })))
            .mount(&server)
            .await;

        let mut sink: Vec<ConversationRecord> = Vec::new();
        let err = orchestrator.run_chunk(&chunk(), &mut sink).await.unwrap_err();
        match err {
            JobError::JobFailed { job_id, state, message } => {
                assert_eq!(job_id, "job-1");
                assert_eq!(state, JobState::Failed);
                assert_eq!(message.as_deref(), Some("query too large"));
            }
            other => panic!("Expected JobFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_poll_budget_exceeded() {
        let server = MockServer::start().await;
        let (client, pause) = test_client(&server, 1);
        let orchestrator = JobOrchestrator::new(client, settings());

        Mock::given(method("GET"))
            .and(path(format!("{JOBS_PATH}/job-1")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "state": "RUNNING" })))
            .expect(4)
            .mount(&server)
            .await;

        let err = orchestrator.wait_for_completion("job-1").await.unwrap_err();
        assert!(matches!(err, JobError::PollTimeout { waited_secs: 15, .. }), "{err:?}");
        assert_eq!(pause.waits().len(), 3);
    }

    #[tokio::test]
    async fn test_zero_poll_interval_still_hits_budget() {
        let server = MockServer::start().await;
        let (client, pause) = test_client(&server, 1);
        let orchestrator = JobOrchestrator::new(
            client,
            JobSettings {
                poll_interval: Duration::ZERO,
                ..settings()
            },
        );

        Mock::given(method("GET"))
            .and(path(format!("{JOBS_PATH}/job-1")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "state": "RUNNING" })))
            .mount(&server)
            .await;

        let err = tokio::time::timeout(Duration::from_secs(10), orchestrator.wait_for_completion("job-1"))
            .await
            .expect("poll loop must end on its own")
            .unwrap_err();
        assert!(matches!(err, JobError::PollTimeout { waited_secs: 15, .. }), "{err:?}");
        assert_eq!(pause.waits(), vec![MIN_POLL_INTERVAL; 15]);
    }

    #[tokio::test]
    async fn test_poll_budget_counts_request_time() {
        let server = MockServer::start().await;
        let (client, pause) = test_client(&server, 1);
        let orchestrator = JobOrchestrator::new(
            client,
            JobSettings {
                poll_interval: Duration::from_secs(1),
                max_poll_wait: Duration::from_secs(2),
                ..settings()
            },
        );

        // Each poll takes 1.5 s of wall time.
        Mock::given(method("GET"))
            .and(path(format!("{JOBS_PATH}/job-1")))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "state": "RUNNING" }))
                    .set_delay(Duration::from_millis(1500)),
            )
            .expect(2)
            .mount(&server)
            .await;

        let err = orchestrator.wait_for_completion("job-1").await.unwrap_err();
        assert!(matches!(err, JobError::PollTimeout { .. }), "{err:?}");
        assert_eq!(pause.waits().len(), 1);
    }

    #[test]
    fn settings_clamp_zero_poll_interval() {
        let config = JobsConfig {
            poll_interval_secs: 0,
            ..JobsConfig::default()
        };
        assert_eq!(JobSettings::from_config(&config).poll_interval, MIN_POLL_INTERVAL);
    }

    #[tokio::test]
    async fn test_undecodable_record_is_skipped() {
        let server = MockServer::start().await;
        let (client, _pause) = test_client(&server, 1);
        let orchestrator = JobOrchestrator::new(client, settings());
        mount_submit_and_fulfilled(&server).await;

        Mock::given(method("GET"))
            .and(path(format!("{JOBS_PATH}/job-1/results")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "conversations": [conv("a"), { "participants": "not-a-list" }]
            })))
            .mount(&server)
            .await;

        let mut sink: Vec<ConversationRecord> = Vec::new();
        let report = orchestrator.run_chunk(&chunk(), &mut sink).await.unwrap();
        assert_eq!(report.records, 1);
        assert_eq!(report.skipped_records, 1);
    }

    #[tokio::test]
    async fn test_unretryable_error_carries_status() {
        let server = MockServer::start().await;
        let (client, _pause) = test_client(&server, 1);
        let orchestrator = JobOrchestrator::new(client, settings());

        Mock::given(method("POST"))
            .and(path(JOBS_PATH))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let err = orchestrator.submit(&chunk()).await.unwrap_err();
        assert_eq!(err.http_status(), Some(500));
        assert!(!err.is_auth());
    }
}
