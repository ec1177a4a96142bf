use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identity of one call leg: a single session of a single participant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IntervalKey {
    pub conversation_id: String,
    pub participant_id: String,
    pub session_id: String,
}

/// Active span of a call leg. `end > start` always holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interval {
    pub key: IntervalKey,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub ani: Option<String>,
    pub dnis: Option<String>,
    pub division_ids: Vec<String>,
}

impl Interval {
    /// Returns `None` when `end <= start`.
    pub fn new(key: IntervalKey, start: DateTime<Utc>, end: DateTime<Utc>) -> Option<Self> {
        if end <= start {
            return None;
        }
        Some(Self {
            key,
            start,
            end,
            ani: None,
            dnis: None,
            division_ids: Vec::new(),
        })
    }

    pub fn with_tags(
        mut self,
        ani: Option<String>,
        dnis: Option<String>,
        division_ids: Vec<String>,
    ) -> Self {
        self.ani = ani;
        self.dnis = dnis;
        self.division_ids = division_ids;
        self.division_ids.sort();
        self.division_ids.dedup();
        self
    }

    /// Widen to the union envelope of `self` and `other`. A tag present on
    /// only one side is kept; when both carry one the smaller wins, so the
    /// result does not depend on merge order.
    pub fn widen(&mut self, other: &Interval) {
        if other.start < self.start {
            self.start = other.start;
        }
        if other.end > self.end {
            self.end = other.end;
        }
        self.ani = pick_tag(self.ani.take(), other.ani.as_ref());
        self.dnis = pick_tag(self.dnis.take(), other.dnis.as_ref());
        for div in &other.division_ids {
            if !self.division_ids.contains(div) {
                self.division_ids.push(div.clone());
            }
        }
        self.division_ids.sort();
    }
}

fn pick_tag(current: Option<String>, other: Option<&String>) -> Option<String> {
    match (current, other) {
        (Some(a), Some(b)) if *b < a => Some(b.clone()),
        (Some(a), _) => Some(a),
        (None, b) => b.cloned(),
    }
}
