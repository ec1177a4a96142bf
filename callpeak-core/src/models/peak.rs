use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Running count for one minute of the analyzed window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MinutePoint {
    pub minute: DateTime<Utc>,
    pub active: u32,
}

/// Output of the sweep-line calculation.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PeakResult {
    pub peak_concurrent: u32,
    /// `None` when no interval falls inside the window
    pub first_peak_minute: Option<DateTime<Utc>>,
    /// Every minute tied at the peak, in chronological order
    pub peak_minutes: Vec<DateTime<Utc>>,
    pub series: Vec<MinutePoint>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyPeak {
    pub day: NaiveDate,
    pub peak_concurrent: u32,
    pub first_peak_minute: Option<DateTime<Utc>>,
}
