//! Interval extraction from conversation records.
//!
//! A session yields an interval only if it looks like an external trunk leg:
//! - voice media
//! - `tel:` origin and destination
//! - an external participant (skipped in loose mode)
//! - no non-`tel:` secondary destination
//!
//! The span runs from the earliest non-wrapup segment start to the latest
//! segment end. This is a best-effort filter over ambiguous vendor data.

use callpeak_core::config::ExtractorConfig;
use callpeak_core::models::{ConversationRecord, Interval, IntervalKey, Participant, Session};
use chrono::{DateTime, Utc};
use regex::{Regex, RegexBuilder};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("Invalid participant pattern: {0}")]
    InvalidPattern(#[from] regex::Error),
}

/// Decides whether a participant is externally sourced (a customer or an
/// outside party) rather than an internal agent or system leg.
pub trait ParticipantPredicate: Send + Sync {
    fn is_external(&self, participant: &Participant) -> bool;
}

/// Case-insensitive regex over `purpose` and `participantType`.
#[derive(Debug, Clone)]
pub struct PatternPredicate {
    pattern: Regex,
}

impl PatternPredicate {
    pub const DEFAULT_PATTERN: &'static str = "customer|external";

    pub fn new(pattern: &str) -> Result<Self, ExtractError> {
        let pattern = RegexBuilder::new(pattern).case_insensitive(true).build()?;
        Ok(Self { pattern })
    }
}

impl Default for PatternPredicate {
    fn default() -> Self {
        Self {
            pattern: RegexBuilder::new(Self::DEFAULT_PATTERN)
                .case_insensitive(true)
                .build()
                .unwrap_or_else(|_| unreachable!("default pattern is valid")),
        }
    }
}

impl ParticipantPredicate for PatternPredicate {
    fn is_external(&self, participant: &Participant) -> bool {
        [participant.purpose.as_deref(), participant.participant_type.as_deref()]
            .into_iter()
            .flatten()
            .any(|v| self.pattern.is_match(v))
    }
}

/// Why sessions were skipped, summed over the records seen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExtractStats {
    pub sessions: usize,
    pub non_voice: usize,
    pub non_tel_address: usize,
    pub internal_participant: usize,
    pub internal_secondary_address: usize,
    pub no_usable_segments: usize,
    pub missing_ids: usize,
    pub malformed_segments: usize,
    pub emitted: usize,
}

impl ExtractStats {
    pub fn absorb(&mut self, other: &ExtractStats) {
        self.sessions += other.sessions;
        self.non_voice += other.non_voice;
        self.non_tel_address += other.non_tel_address;
        self.internal_participant += other.internal_participant;
        self.internal_secondary_address += other.internal_secondary_address;
        self.no_usable_segments += other.no_usable_segments;
        self.missing_ids += other.missing_ids;
        self.malformed_segments += other.malformed_segments;
        self.emitted += other.emitted;
    }
}

fn is_tel(address: Option<&str>) -> bool {
    address
        .map(|a| a.trim().get(..4).is_some_and(|p| p.eq_ignore_ascii_case("tel:")))
        .unwrap_or(false)
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

#[derive(Clone)]
pub struct IntervalExtractor {
    predicate: Arc<dyn ParticipantPredicate>,
    loose: bool,
}

impl Default for IntervalExtractor {
    fn default() -> Self {
        Self::new(Arc::new(PatternPredicate::default()), false)
    }
}

impl IntervalExtractor {
    pub fn new(predicate: Arc<dyn ParticipantPredicate>, loose: bool) -> Self {
        Self { predicate, loose }
    }

    pub fn from_config(config: &ExtractorConfig) -> Result<Self, ExtractError> {
        let predicate = PatternPredicate::new(&config.external_pattern)?;
        Ok(Self::new(Arc::new(predicate), config.loose))
    }

    pub fn with_loose(mut self, loose: bool) -> Self {
        self.loose = loose;
        self
    }

    pub fn extract(&self, record: &ConversationRecord) -> Vec<Interval> {
        let mut stats = ExtractStats::default();
        self.extract_with_stats(record, &mut stats)
    }

    pub fn extract_with_stats(
        &self,
        record: &ConversationRecord,
        stats: &mut ExtractStats,
    ) -> Vec<Interval> {
        let mut out = Vec::new();
        let conversation_id = non_empty(record.conversation_id.as_deref());

        for participant in &record.participants {
            let external = self.loose || self.predicate.is_external(participant);
            let participant_id = non_empty(participant.participant_id.as_deref());

            for session in &participant.sessions {
                stats.sessions += 1;

                if !session
                    .media_type
                    .as_deref()
                    .is_some_and(|m| m.trim().eq_ignore_ascii_case("voice"))
                {
                    stats.non_voice += 1;
                    continue;
                }
                if !is_tel(session.origin()) || !is_tel(session.destination()) {
                    stats.non_tel_address += 1;
                    continue;
                }
                if !external {
                    stats.internal_participant += 1;
                    continue;
                }
                if non_empty(session.session_dnis.as_deref()).is_some()
                    && !is_tel(session.session_dnis.as_deref())
                {
                    stats.internal_secondary_address += 1;
                    continue;
                }

                let (Some(conversation_id), Some(participant_id), Some(session_id)) = (
                    conversation_id,
                    participant_id,
                    non_empty(session.session_id.as_deref()),
                ) else {
                    stats.missing_ids += 1;
                    continue;
                };

                let Some((start, end)) = session_span(session, stats) else {
                    stats.no_usable_segments += 1;
                    continue;
                };

                let key = IntervalKey {
                    conversation_id: conversation_id.to_string(),
                    participant_id: participant_id.to_string(),
                    session_id: session_id.to_string(),
                };
                match Interval::new(key, start, end) {
                    Some(interval) => {
                        stats.emitted += 1;
                        out.push(interval.with_tags(
                            session.origin().map(str::to_string),
                            session.destination().map(str::to_string),
                            record.division_ids.clone(),
                        ));
                    }
                    None => stats.no_usable_segments += 1,
                }
            }
        }

        out
    }
}

/// Envelope of the session's non-wrapup segments. Zero-length segments
/// still anchor the envelope; `Interval::new` rejects an empty result.
fn session_span(session: &Session, stats: &mut ExtractStats) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let mut spans: Vec<(DateTime<Utc>, DateTime<Utc>)> = Vec::with_capacity(session.segments.len());
    for segment in &session.segments {
        if segment.is_wrapup() {
            continue;
        }
        match (segment.start(), segment.end()) {
            (Some(start), Some(end)) if end >= start => spans.push((start, end)),
            _ => {
                stats.malformed_segments += 1;
                tracing::debug!(
                    session_id = ?session.session_id,
                    segment_start = ?segment.segment_start,
                    segment_end = ?segment.segment_end,
                    "Skipping segment without a usable time span"
                );
            }
        }
    }
    spans.sort_by_key(|(start, _)| *start);

    let start = spans.first()?.0;
    let end = spans.iter().map(|(_, end)| *end).max()?;
    Some((start, end))
}

// ============================================================================
// TESTS
// ============================================================================
