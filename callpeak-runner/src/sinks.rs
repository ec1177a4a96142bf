//! Run artifacts: `intervals.csv`, `per_minute.csv` and `summary.json`.

use callpeak_core::models::chunk::format_iso;
use callpeak_core::models::{DailyPeak, Interval, MinutePoint};
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

use crate::driver::{ChunkFailure, RunOutcome, RunParameters};

pub const INTERVALS_FILE: &str = "intervals.csv";
pub const PER_MINUTE_FILE: &str = "per_minute.csv";
pub const SUMMARY_FILE: &str = "summary.json";

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Failed to write {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize summary: {0}")]
    Json(#[from] serde_json::Error),
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> SinkError + '_ {
    move |source| SinkError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Expand `~` and environment references in a configured output directory.
pub fn resolve_output_dir(raw: &str) -> PathBuf {
    match shellexpand::full(raw) {
        Ok(expanded) => PathBuf::from(expanded.into_owned()),
        Err(_) => PathBuf::from(shellexpand::tilde(raw).into_owned()),
    }
}

fn minute_label(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Quote a CSV field when it contains a delimiter, quote or line break.
pub fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn csv_row(fields: &[&str]) -> String {
    let mut row = fields.iter().map(|f| csv_field(f)).collect::<Vec<_>>().join(",");
    row.push('\n');
    row
}

pub fn write_intervals_csv(path: &Path, intervals: &[Interval]) -> Result<(), SinkError> {
    let file = File::create(path).map_err(io_err(path))?;
    let mut out = BufWriter::new(file);
    out.write_all(
        csv_row(&[
            "conversationId",
            "participantId",
            "sessionId",
            "startUtc",
            "endUtc",
            "ani",
            "dnis",
            "divisionIds",
        ])
        .as_bytes(),
    )
    .map_err(io_err(path))?;

    for interval in intervals {
        let start = format_iso(interval.start);
        let end = format_iso(interval.end);
        let divisions = interval.division_ids.join(";");
        let row = csv_row(&[
            interval.key.conversation_id.as_str(),
            interval.key.participant_id.as_str(),
            interval.key.session_id.as_str(),
            start.as_str(),
            end.as_str(),
            interval.ani.as_deref().unwrap_or_default(),
            interval.dnis.as_deref().unwrap_or_default(),
            divisions.as_str(),
        ]);
        out.write_all(row.as_bytes()).map_err(io_err(path))?;
    }
    out.flush().map_err(io_err(path))
}

pub fn write_series_csv(path: &Path, series: &[MinutePoint]) -> Result<(), SinkError> {
    let file = File::create(path).map_err(io_err(path))?;
    let mut out = BufWriter::new(file);
    writeln!(out, "minuteUtc,activeCalls").map_err(io_err(path))?;
    for point in series {
        writeln!(out, "{},{}", minute_label(point.minute), point.active).map_err(io_err(path))?;
    }
    out.flush().map_err(io_err(path))
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    Jobs,
    Details,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct SummaryParameters {
    pub mode: RunMode,
    pub window_start_utc: String,
    pub window_end_utc: String,
    pub chunk_days: u32,
    pub page_size: u32,
    pub poll_interval_seconds: u64,
    pub max_poll_wait_minutes: u64,
    pub media_type_filter: bool,
    pub loose_filter: bool,
    pub chunk_failure_policy: callpeak_core::config::ChunkFailurePolicy,
    pub max_parallel_chunks: usize,
}

impl SummaryParameters {
    fn new(params: &RunParameters, mode: RunMode) -> Self {
        Self {
            mode,
            window_start_utc: format_iso(params.window.start),
            window_end_utc: format_iso(params.window.end),
            chunk_days: params.chunk_days,
            page_size: params.page_size,
            poll_interval_seconds: params.poll_interval_secs,
            max_poll_wait_minutes: params.max_poll_wait_minutes,
            media_type_filter: params.media_type_filter,
            loose_filter: params.loose,
            chunk_failure_policy: params.chunk_failure_policy,
            max_parallel_chunks: params.max_parallel_chunks,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct DailyPeakRow {
    pub day: NaiveDate,
    pub peak_concurrent_calls: u32,
    pub first_peak_minute_utc: Option<String>,
}

impl From<&DailyPeak> for DailyPeakRow {
    fn from(day: &DailyPeak) -> Self {
        Self {
            day: day.day,
            peak_concurrent_calls: day.peak_concurrent,
            first_peak_minute_utc: day.first_peak_minute.map(minute_label),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct RunSummary {
    pub run_id: Uuid,
    pub generated_at_utc: String,
    pub parameters: SummaryParameters,
    pub peak_concurrent_calls: u32,
    pub first_peak_minute_utc: Option<String>,
    pub peak_minutes_utc: Vec<String>,
    pub interval_count: usize,
    pub chunks_total: usize,
    pub chunks_failed: Vec<ChunkFailure>,
    pub daily_peaks: Vec<DailyPeakRow>,
    pub extraction: callpeak_ingest::ExtractStats,
}

impl RunSummary {
    pub fn new(outcome: &RunOutcome, run_id: Uuid, mode: RunMode, generated_at: DateTime<Utc>) -> Self {
        Self {
            run_id,
            generated_at_utc: generated_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            parameters: SummaryParameters::new(&outcome.parameters, mode),
            peak_concurrent_calls: outcome.peak.peak_concurrent,
            first_peak_minute_utc: outcome.peak.first_peak_minute.map(minute_label),
            peak_minutes_utc: outcome.peak.peak_minutes.iter().copied().map(minute_label).collect(),
            interval_count: outcome.intervals.len(),
            chunks_total: outcome.chunks.len(),
            chunks_failed: outcome.failed_chunks.clone(),
            daily_peaks: outcome.daily.iter().map(DailyPeakRow::from).collect(),
            extraction: outcome.stats,
        }
    }
}

pub fn write_summary_json(path: &Path, summary: &RunSummary) -> Result<(), SinkError> {
    let json = serde_json::to_string_pretty(summary)?;
    std::fs::write(path, json).map_err(io_err(path))
}

#[derive(Debug, Clone)]
pub struct OutputPaths {
    pub intervals: PathBuf,
    pub per_minute: PathBuf,
    pub summary: PathBuf,
}

/// Write all three artifacts under `dir`, creating it if needed.
pub fn write_outputs(dir: &Path, outcome: &RunOutcome, summary: &RunSummary) -> Result<OutputPaths, SinkError> {
    std::fs::create_dir_all(dir).map_err(io_err(dir))?;
    let paths = OutputPaths {
        intervals: dir.join(INTERVALS_FILE),
        per_minute: dir.join(PER_MINUTE_FILE),
        summary: dir.join(SUMMARY_FILE),
    };
    write_intervals_csv(&paths.intervals, &outcome.intervals)?;
    write_series_csv(&paths.per_minute, &outcome.peak.series)?;
    write_summary_json(&paths.summary, summary)?;
    tracing::info!(dir = %dir.display(), intervals = outcome.intervals.len(), "Outputs written");
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use callpeak_core::models::IntervalKey;
    use chrono::TimeZone;

    #[test]
    fn csv_quotes_only_when_needed() {
        assert_eq!(csv_field("tel:+15551234"), "tel:+15551234");
        assert_eq!(csv_field("a,b"), "\"a,b\"");
        assert_eq!(csv_field("say \"hi\""), "\"say \"\"hi\"\"\"");
        assert_eq!(csv_field("two\nlines"), "\"two\nlines\"");
    }

    #[test]
    fn intervals_csv_has_header_and_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(INTERVALS_FILE);
        let start = Utc.with_ymd_and_hms(2024, 2, 16, 18, 0, 5).unwrap();
        let interval = Interval::new(
            IntervalKey {
                conversation_id: "c,1".to_string(),
                participant_id: "p1".to_string(),
                session_id: "s1".to_string(),
            },
            start,
            start + chrono::Duration::minutes(3),
        )
        .unwrap()
        .with_tags(Some("tel:+1555".to_string()), None, vec!["d1".to_string(), "d2".to_string()]);

        write_intervals_csv(&path, &[interval]).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines[0],
            "conversationId,participantId,sessionId,startUtc,endUtc,ani,dnis,divisionIds"
        );
        assert_eq!(
            lines[1],
            "\"c,1\",p1,s1,2024-02-16T18:00:05.000Z,2024-02-16T18:03:05.000Z,tel:+1555,,d1;d2"
        );
    }

    #[test]
    fn series_csv_uses_minute_labels() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(PER_MINUTE_FILE);
        let minute = Utc.with_ymd_and_hms(2024, 2, 16, 18, 23, 0).unwrap();
        write_series_csv(&path, &[MinutePoint { minute, active: 10 }]).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, "minuteUtc,activeCalls\n2024-02-16T18:23:00Z,10\n");
    }

    #[test]
    fn output_dir_expands_home() {
        let resolved = resolve_output_dir("~/callpeak-out");
        assert!(!resolved.to_string_lossy().starts_with('~'));
        assert_eq!(resolve_output_dir("./out"), PathBuf::from("./out"));
    }
}
