//! Interval deduplication across overlapping chunk results.
//!
//! A conversation spanning a chunk boundary can be returned by both jobs.
//! The store keeps one envelope per `(conversation, participant, session)`
//! and only ever inserts or widens, so merging is idempotent and
//! order-independent.

use callpeak_core::jobs::RecordSink;
use callpeak_core::models::{ConversationRecord, Interval, IntervalKey};
use std::collections::BTreeMap;

use crate::extract::{ExtractStats, IntervalExtractor};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Inserted,
    Widened,
    Unchanged,
}

#[derive(Debug, Clone, Default)]
pub struct IntervalStore {
    intervals: BTreeMap<IntervalKey, Interval>,
    observations: usize,
}

impl IntervalStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn merge(&mut self, interval: Interval) -> MergeOutcome {
        self.observations += 1;
        match self.intervals.get_mut(&interval.key) {
            None => {
                self.intervals.insert(interval.key.clone(), interval);
                MergeOutcome::Inserted
            }
            Some(existing) => {
                let before = (existing.start, existing.end);
                existing.widen(&interval);
                if (existing.start, existing.end) == before {
                    MergeOutcome::Unchanged
                } else {
                    MergeOutcome::Widened
                }
            }
        }
    }

    /// Merge every interval of `other` into `self`.
    pub fn absorb(&mut self, other: IntervalStore) {
        for interval in other.intervals.into_values() {
            self.merge(interval);
        }
    }

    pub fn len(&self) -> usize {
        self.intervals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    /// Total merge calls, duplicates included.
    pub fn observations(&self) -> usize {
        self.observations
    }

    pub fn get(&self, key: &IntervalKey) -> Option<&Interval> {
        self.intervals.get(key)
    }

    /// Intervals in key order.
    pub fn iter(&self) -> impl Iterator<Item = &Interval> {
        self.intervals.values()
    }

    pub fn into_intervals(self) -> Vec<Interval> {
        self.intervals.into_values().collect()
    }
}

/// Extractor plus store: the accumulator a chunk drains into.
#[derive(Clone)]
pub struct IntervalCollector {
    extractor: IntervalExtractor,
    store: IntervalStore,
    stats: ExtractStats,
}

impl IntervalCollector {
    pub fn new(extractor: IntervalExtractor) -> Self {
        Self {
            extractor,
            store: IntervalStore::new(),
            stats: ExtractStats::default(),
        }
    }

    pub fn store(&self) -> &IntervalStore {
        &self.store
    }

    pub fn stats(&self) -> &ExtractStats {
        &self.stats
    }

    pub fn into_parts(self) -> (IntervalStore, ExtractStats) {
        (self.store, self.stats)
    }
}

impl RecordSink for IntervalCollector {
    fn accept(&mut self, record: ConversationRecord) -> usize {
        let intervals = self.extractor.extract_with_stats(&record, &mut self.stats);
        let emitted = intervals.len();
        for interval in intervals {
            self.store.merge(interval);
        }
        emitted
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use proptest::prelude::*;

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 2, 7, 23, 50, 0).unwrap()
    }

    fn iv(conv: &str, start_min: i64, end_min: i64) -> Interval {
        Interval::new(
            IntervalKey {
                conversation_id: conv.to_string(),
                participant_id: "p".to_string(),
                session_id: "s".to_string(),
            },
            base() + Duration::minutes(start_min),
            base() + Duration::minutes(end_min),
        )
        .unwrap()
    }

    #[test]
    fn duplicate_key_widens_to_envelope() {
        let mut store = IntervalStore::new();
        assert_eq!(store.merge(iv("c1", 0, 10)), MergeOutcome::Inserted);
        assert_eq!(store.merge(iv("c1", 5, 25)), MergeOutcome::Widened);
        assert_eq!(store.merge(iv("c1", 2, 8)), MergeOutcome::Unchanged);

        assert_eq!(store.len(), 1);
        assert_eq!(store.observations(), 3);
        let merged = store.iter().next().unwrap();
        assert_eq!(merged.start, base());
        assert_eq!(merged.end, base() + Duration::minutes(25));
    }

    #[test]
    fn absorb_merges_chunk_local_stores() {
        let mut left = IntervalStore::new();
        left.merge(iv("c1", 0, 10));
        left.merge(iv("c2", 0, 3));
        let mut right = IntervalStore::new();
        right.merge(iv("c1", 8, 20));
        right.merge(iv("c3", 1, 2));

        left.absorb(right);
        assert_eq!(left.len(), 3);
        let ids: Vec<_> = left.iter().map(|i| i.key.conversation_id.as_str()).collect();
        assert_eq!(ids, vec!["c1", "c2", "c3"]);
        assert_eq!(left.iter().next().unwrap().end, base() + Duration::minutes(20));
    }

    #[test]
    fn collector_reports_emitted_count() {
        let record: ConversationRecord = serde_json::from_value(serde_json::json!({
            "conversationId": "c-1",
            "participants": [{
                "participantId": "p-1",
                "purpose": "customer",
                "sessions": [{
                    "sessionId": "s-1",
                    "mediaType": "voice",
                    "ani": "tel:+1555",
                    "dnis": "tel:+1666",
                    "segments": [{
                        "segmentStart": "2024-02-07T23:55:00Z",
                        "segmentEnd": "2024-02-08T00:05:00Z",
                        "segmentType": "interact"
                    }]
                }]
            }]
        }))
        .unwrap();

        let mut collector = IntervalCollector::new(IntervalExtractor::default());
        assert_eq!(collector.accept(record.clone()), 1);
        assert_eq!(collector.accept(record), 1);
        assert_eq!(collector.store().len(), 1);
        assert_eq!(collector.stats().emitted, 2);
    }

    type Raw = (u8, i64, i64, Option<u8>, Option<u8>, Vec<u8>);

    fn raw_strategy() -> impl Strategy<Value = Vec<Raw>> {
        prop::collection::vec(
            (
                0u8..5,
                0i64..120,
                1i64..90,
                prop::option::of(0u8..3),
                prop::option::of(0u8..3),
                prop::collection::vec(0u8..4, 0..3),
            ),
            1..40,
        )
    }

    fn tagged((c, s, len, ani, dnis, divs): &Raw) -> Interval {
        iv(&format!("c{c}"), *s, s + len).with_tags(
            ani.map(|a| format!("tel:+1555000{a}")),
            dnis.map(|d| format!("tel:+1666000{d}")),
            divs.iter().map(|d| format!("div-{d}")).collect(),
        )
    }

    proptest! {
        #[test]
        fn merge_order_does_not_matter(raw in raw_strategy(), seed in any::<u64>()) {
            let intervals: Vec<Interval> = raw.iter().map(tagged).collect();

            let mut forward = IntervalStore::new();
            for i in intervals.iter().cloned() {
                forward.merge(i);
            }

            // Deterministic shuffle, then every interval merged twice.
            let mut shuffled = intervals.clone();
            let n = shuffled.len();
            let mut state = seed;
            for i in (1..n).rev() {
                state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                let j = (state >> 33) as usize % (i + 1);
                shuffled.swap(i, j);
            }
            let mut twice = IntervalStore::new();
            for i in shuffled.iter().chain(shuffled.iter()).cloned() {
                twice.merge(i);
            }

            prop_assert_eq!(forward.into_intervals(), twice.into_intervals());
        }

        #[test]
        fn stored_intervals_are_always_valid(raw in raw_strategy()) {
            let mut store = IntervalStore::new();
            for r in &raw {
                store.merge(tagged(r));
            }
            for interval in store.iter() {
                prop_assert!(interval.end > interval.start);
            }
        }
    }
}
