use serde::{Deserialize, Serialize};
use std::fmt;

/// Normalized analytics job state.
///
/// Raw server strings only pass through [`JobState::from_api`]; everything
/// downstream matches on the enum.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    Queued,
    Running,
    Fulfilled,
    Failed,
    Cancelled,
    Other(String),
}

impl JobState {
    pub fn from_api(raw: &str) -> Self {
        let s = raw.trim().to_ascii_lowercase();
        if s.contains("fulfilled") || s.contains("completed") {
            JobState::Fulfilled
        } else if s.contains("failed") {
            JobState::Failed
        } else if s.contains("canceled") || s.contains("cancelled") {
            JobState::Cancelled
        } else if s == "queued" {
            JobState::Queued
        } else if s == "running" || s == "pending" {
            JobState::Running
        } else {
            JobState::Other(raw.trim().to_string())
        }
    }

    pub fn is_terminal_success(&self) -> bool {
        matches!(self, JobState::Fulfilled)
    }

    pub fn is_terminal_failure(&self) -> bool {
        matches!(self, JobState::Failed | JobState::Cancelled)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::Queued => write!(f, "QUEUED"),
            JobState::Running => write!(f, "RUNNING"),
            JobState::Fulfilled => write!(f, "FULFILLED"),
            JobState::Failed => write!(f, "FAILED"),
            JobState::Cancelled => write!(f, "CANCELLED"),
            JobState::Other(raw) => write!(f, "{raw}"),
        }
    }
}
