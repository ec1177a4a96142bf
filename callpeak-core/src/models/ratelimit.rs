/// Server rate-limit state as seen on one response. Never persisted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RateLimitSnapshot {
    pub limit: Option<u64>,
    pub remaining: Option<u64>,
    /// Raw reset value as sent: relative seconds or an epoch timestamp
    pub reset: Option<i64>,
}

impl RateLimitSnapshot {
    pub fn is_empty(&self) -> bool {
        self.limit.is_none() && self.remaining.is_none() && self.reset.is_none()
    }
}
