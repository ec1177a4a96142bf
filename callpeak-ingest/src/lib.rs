//! Record ingestion: turn raw conversation records into deduplicated
//! call-leg intervals.

pub mod dedup;
pub mod extract;

pub use dedup::{IntervalCollector, IntervalStore, MergeOutcome};
pub use extract::{
    ExtractError, ExtractStats, IntervalExtractor, ParticipantPredicate, PatternPredicate,
};
