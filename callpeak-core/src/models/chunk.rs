use chrono::{DateTime, Duration, NaiveDate, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CallpeakError;

/// Half-open analysis window `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl AnalysisWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, CallpeakError> {
        if end <= start {
            return Err(CallpeakError::InvalidWindow(format!(
                "window end {} must be after start {}",
                format_iso(end),
                format_iso(start)
            )));
        }
        Ok(Self { start, end })
    }

    /// Whole calendar month in UTC.
    pub fn month(year: i32, month: u32) -> Result<Self, CallpeakError> {
        let first = NaiveDate::from_ymd_opt(year, month, 1)
            .ok_or_else(|| CallpeakError::InvalidWindow(format!("no such month {year}-{month:02}")))?;
        let next = if month == 12 {
            NaiveDate::from_ymd_opt(year + 1, 1, 1)
        } else {
            NaiveDate::from_ymd_opt(year, month + 1, 1)
        }
        .ok_or_else(|| CallpeakError::InvalidWindow(format!("no month after {year}-{month:02}")))?;

        let start = Utc.from_utc_datetime(&first.and_hms_opt(0, 0, 0).unwrap_or_default());
        let end = Utc.from_utc_datetime(&next.and_hms_opt(0, 0, 0).unwrap_or_default());
        Self::new(start, end)
    }

    /// Parse `YYYY-MM`.
    pub fn parse_month(raw: &str) -> Result<Self, CallpeakError> {
        let (y, m) = raw
            .trim()
            .split_once('-')
            .ok_or_else(|| CallpeakError::InvalidWindow(format!("expected YYYY-MM, got '{raw}'")))?;
        let year: i32 = y
            .parse()
            .map_err(|_| CallpeakError::InvalidWindow(format!("bad year in '{raw}'")))?;
        let month: u32 = m
            .parse()
            .map_err(|_| CallpeakError::InvalidWindow(format!("bad month in '{raw}'")))?;
        Self::month(year, month)
    }

    /// Parse an ISO-8601 `start/end` interval string.
    pub fn parse_iso_interval(raw: &str) -> Result<Self, CallpeakError> {
        let (s, e) = raw.trim().split_once('/').ok_or_else(|| {
            CallpeakError::InvalidWindow(format!("expected 'start/end', got '{raw}'"))
        })?;
        let parse = |v: &str| {
            DateTime::parse_from_rfc3339(v.trim())
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| CallpeakError::InvalidWindow(format!("bad timestamp '{v}': {e}")))
        };
        Self::new(parse(s)?, parse(e)?)
    }

    pub fn iso_interval(&self) -> String {
        format!("{}/{}", format_iso(self.start), format_iso(self.end))
    }
}

/// One bounded slice of the analysis window, driven as a single async job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobChunk {
    pub index: usize,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl JobChunk {
    pub fn iso_interval(&self) -> String {
        format!("{}/{}", format_iso(self.start), format_iso(self.end))
    }
}

/// Split the window into contiguous `chunk_days`-day chunks. The last chunk
/// is truncated at the window end, and a step past the representable range
/// yields a single chunk.
pub fn plan_chunks(window: &AnalysisWindow, chunk_days: u32) -> Result<Vec<JobChunk>, CallpeakError> {
    if chunk_days == 0 {
        return Err(CallpeakError::InvalidChunkSize);
    }
    let step = Duration::days(i64::from(chunk_days));
    let mut chunks = Vec::new();
    let mut cursor = window.start;
    while cursor < window.end {
        let end = cursor
            .checked_add_signed(step)
            .map_or(window.end, |end| end.min(window.end));
        chunks.push(JobChunk {
            index: chunks.len(),
            start: cursor,
            end,
        });
        cursor = end;
    }
    Ok(chunks)
}

pub fn format_iso(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leap_february_covers_29_days() {
        let w = AnalysisWindow::parse_month("2024-02").unwrap();
        assert_eq!(w.end - w.start, Duration::days(29));
        assert_eq!(
            w.iso_interval(),
            "2024-02-01T00:00:00.000Z/2024-03-01T00:00:00.000Z"
        );
    }

    #[test]
    fn december_rolls_into_next_year() {
        let w = AnalysisWindow::month(2023, 12).unwrap();
        assert_eq!(w.end, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn chunks_are_contiguous_and_cover_window_once() {
        let w = AnalysisWindow::parse_month("2024-02").unwrap();
        let chunks = plan_chunks(&w, 7).unwrap();
        assert_eq!(chunks.len(), 5);
        assert_eq!(chunks[0].start, w.start);
        assert_eq!(chunks.last().unwrap().end, w.end);
        for pair in chunks.windows(2) {
            assert_eq!(pair[0].end, pair[1].start);
        }
        assert_eq!(chunks[4].end - chunks[4].start, Duration::days(1));
        assert_eq!(
            chunks[1].iso_interval(),
            "2024-02-08T00:00:00.000Z/2024-02-15T00:00:00.000Z"
        );
    }

    #[test]
    fn oversized_chunk_days_give_one_chunk() {
        let w = AnalysisWindow::parse_month("2024-02").unwrap();
        let chunks = plan_chunks(&w, u32::MAX).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!((chunks[0].start, chunks[0].end), (w.start, w.end));
        assert_eq!(plan_chunks(&w, 365).unwrap().len(), 1);
    }

    #[test]
    fn zero_chunk_days_is_rejected() {
        let w = AnalysisWindow::parse_month("2024-02").unwrap();
        assert!(matches!(plan_chunks(&w, 0), Err(CallpeakError::InvalidChunkSize)));
    }

    #[test]
    fn iso_interval_round_trips_and_rejects_inverted() {
        let w = AnalysisWindow::parse_iso_interval("2024-02-16T18:00:00Z/2024-02-16T19:00:00Z")
            .unwrap();
        assert_eq!(w.end - w.start, Duration::hours(1));
        assert!(AnalysisWindow::parse_iso_interval("2024-02-16T19:00:00Z/2024-02-16T18:00:00Z")
            .is_err());
        assert!(AnalysisWindow::parse_month("2024-13").is_err());
    }
}
