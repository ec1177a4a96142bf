//! Synchronous conversation details query for small validation runs.
//!
//! Pages by `pageNumber` and stops at the first short or empty page.

use serde::Deserialize;
use serde_json::{json, Value};

use crate::client::{ApiError, RequestClient};
use crate::jobs::{decode_record, voice_segment_filter, RecordSink};
use crate::models::AnalysisWindow;

pub const DETAILS_QUERY_PATH: &str = "/api/v2/analytics/conversations/details/query";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DetailsPage {
    #[serde(default)]
    conversations: Vec<Value>,
    total_hits: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DetailsReport {
    pub pages: usize,
    pub records: usize,
    pub skipped_records: usize,
    pub intervals_emitted: usize,
    pub total_hits: Option<u64>,
}

pub struct DetailsQuery {
    client: RequestClient,
    page_size: u32,
    /// Predicate tree sent as `segmentFilters`; `None` sends no filter
    segment_filters: Option<Value>,
}

impl DetailsQuery {
    pub fn new(client: RequestClient, page_size: u32) -> Self {
        Self {
            client,
            page_size: page_size.max(1),
            segment_filters: Some(voice_segment_filter()),
        }
    }

    pub fn with_segment_filters(mut self, filters: Option<Value>) -> Self {
        self.segment_filters = filters;
        self
    }

    pub fn body(&self, window: &AnalysisWindow, page_number: u32) -> Value {
        let mut body = json!({
            "interval": window.iso_interval(),
            "order": "asc",
            "orderBy": "conversationStart",
            "paging": { "pageSize": self.page_size, "pageNumber": page_number },
        });
        if let Some(filters) = &self.segment_filters {
            body["segmentFilters"] = filters.clone();
        }
        body
    }

    pub async fn run(
        &self,
        window: &AnalysisWindow,
        sink: &mut dyn RecordSink,
    ) -> Result<DetailsReport, ApiError> {
        let url = self.client.url(DETAILS_QUERY_PATH);
        let mut report = DetailsReport::default();
        let mut page_number = 1u32;

        loop {
            let page: DetailsPage = self.client.post_json(&url, &self.body(window, page_number)).await?;
            report.pages += 1;
            if report.total_hits.is_none() {
                report.total_hits = page.total_hits;
            }

            let count = page.conversations.len();
            for raw in page.conversations {
                match decode_record(raw) {
                    Some(record) => {
                        report.records += 1;
                        report.intervals_emitted += sink.accept(record);
                    }
                    None => report.skipped_records += 1,
                }
            }
            tracing::info!(page = page_number, records = count, total_hits = ?report.total_hits, "Details page fetched");

            if count < self.page_size as usize {
                return Ok(report);
            }
            page_number += 1;
        }
    }
}
