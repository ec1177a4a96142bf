//! Minute-granularity sweep-line over a bounded window.
//!
//! Each interval is clamped to the window, its start floored to the minute
//! and its end ceiled to the next minute boundary (unless already aligned),
//! so a call active for any part of a minute counts for that minute. Deltas
//! live in a sparse `BTreeMap`, and the walk visits every minute of the
//! window in chronological order.

use chrono::{DateTime, NaiveDate, Utc};
use std::collections::BTreeMap;

use crate::models::{DailyPeak, Interval, MinutePoint, PeakResult};

/// Minutes since the Unix epoch, floored.
fn floor_minute(ts: DateTime<Utc>) -> i64 {
    ts.timestamp().div_euclid(60)
}

/// Minutes since the Unix epoch, rounded up unless already aligned.
fn ceil_minute(ts: DateTime<Utc>) -> i64 {
    let floor = floor_minute(ts);
    if minute_start(floor) < ts {
        floor + 1
    } else {
        floor
    }
}

fn minute_start(minute: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(minute * 60, 0).unwrap_or_default()
}

/// Sparse `minute -> delta` accumulator.
#[derive(Debug, Default)]
struct DeltaSeries {
    deltas: BTreeMap<i64, i64>,
}

impl DeltaSeries {
    fn add(&mut self, start: DateTime<Utc>, end: DateTime<Utc>) {
        let from = floor_minute(start);
        let to = ceil_minute(end);
        if from >= to {
            return;
        }
        *self.deltas.entry(from).or_insert(0) += 1;
        *self.deltas.entry(to).or_insert(0) -= 1;
    }
}

/// Compute the peak number of simultaneously active intervals over
/// `[window_start, window_end)`.
pub fn compute_peak<'a, I>(intervals: I, window_start: DateTime<Utc>, window_end: DateTime<Utc>) -> PeakResult
where
    I: IntoIterator<Item = &'a Interval>,
{
    if window_end <= window_start {
        return PeakResult::default();
    }

    let mut deltas = DeltaSeries::default();
    let mut contributing = 0usize;
    for interval in intervals {
        let start = interval.start.max(window_start);
        let end = interval.end.min(window_end);
        if end <= start {
            continue;
        }
        deltas.add(start, end);
        contributing += 1;
    }

    let first = floor_minute(window_start);
    let last_exclusive = ceil_minute(window_end);
    let mut series = Vec::with_capacity((last_exclusive - first).max(0) as usize);
    let mut running: i64 = 0;
    let mut peak: i64 = 0;
    let mut first_peak: Option<i64> = None;

    for minute in first..last_exclusive {
        if let Some(delta) = deltas.deltas.get(&minute) {
            running += delta;
        }
        let active = running.max(0);
        if active > peak {
            peak = active;
            first_peak = Some(minute);
        }
        series.push(MinutePoint {
            minute: minute_start(minute),
            active: active as u32,
        });
    }

    let peak_minutes = if peak > 0 {
        series
            .iter()
            .filter(|p| i64::from(p.active) == peak)
            .map(|p| p.minute)
            .collect()
    } else {
        Vec::new()
    };

    tracing::debug!(
        intervals = contributing,
        minutes = series.len(),
        peak,
        "Sweep complete"
    );

    PeakResult {
        peak_concurrent: peak as u32,
        first_peak_minute: first_peak.map(minute_start),
        peak_minutes,
        series,
    }
}

/// Per-UTC-day peak derived from a per-minute series.
pub fn daily_peaks(series: &[MinutePoint]) -> Vec<DailyPeak> {
    let mut days: BTreeMap<NaiveDate, DailyPeak> = BTreeMap::new();
    for point in series {
        let day = point.minute.date_naive();
        let entry = days.entry(day).or_insert(DailyPeak {
            day,
            peak_concurrent: 0,
            first_peak_minute: None,
        });
        if point.active > entry.peak_concurrent {
            entry.peak_concurrent = point.active;
            entry.first_peak_minute = Some(point.minute);
        }
    }
    days.into_values().collect()
}

// ============================================================================
// TESTS
// ============================================================================
