pub mod chunk;
pub mod interval;
pub mod job;
pub mod peak;
pub mod ratelimit;
pub mod record;

pub use chunk::{plan_chunks, AnalysisWindow, JobChunk};
pub use interval::{Interval, IntervalKey};
pub use job::JobState;
pub use peak::{DailyPeak, MinutePoint, PeakResult};
pub use ratelimit::RateLimitSnapshot;
pub use record::{ConversationRecord, Participant, Segment, Session};
