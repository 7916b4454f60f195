//! Run outcome classification.
//!
//! Maps a run's terminal state and tag set onto a [`RunStatus`]. The mapping
//! is total: states the nightly jobs never produce fall back to
//! [`RunStatus::Unknown`].

use std::collections::BTreeSet;

/// Tag written by the nightly job when the run met its metric thresholds.
pub const TAG_PASSED: &str = "nightly_test_passed";

/// Tag written by the nightly job when the run regressed on its metrics.
pub const TAG_FAILED: &str = "nightly_test_failed";

/// Run state as reported by the tracking backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RunState {
    Finished,
    Crashed,
    Failed,
    Running,
    Pending,
    Killed,
    /// Any state string the backend may add later.
    Other(String),
}

impl From<&str> for RunState {
    fn from(s: &str) -> Self {
        match s {
            "finished" => RunState::Finished,
            "crashed" => RunState::Crashed,
            "failed" => RunState::Failed,
            "running" => RunState::Running,
            "pending" => RunState::Pending,
            "killed" => RunState::Killed,
            other => RunState::Other(other.to_string()),
        }
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunState::Finished => write!(f, "finished"),
            RunState::Crashed => write!(f, "crashed"),
            RunState::Failed => write!(f, "failed"),
            RunState::Running => write!(f, "running"),
            RunState::Pending => write!(f, "pending"),
            RunState::Killed => write!(f, "killed"),
            RunState::Other(s) => write!(f, "{}", s),
        }
    }
}

/// Outcome of a nightly run, derived from its state and tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RunStatus {
    Succeeded,
    Crashed,
    MetricsRegression,
    Failed,
    Unknown,
}

impl RunStatus {
    /// Marker used in the rendered report.
    pub fn glyph(self) -> &'static str {
        match self {
            RunStatus::Succeeded => "✅",
            RunStatus::Crashed => "🟥",
            RunStatus::MetricsRegression => "⚠️",
            RunStatus::Failed => "🚫",
            RunStatus::Unknown => "❓",
        }
    }

    pub fn is_success(self) -> bool {
        self == RunStatus::Succeeded
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Succeeded => write!(f, "SUCCEEDED"),
            RunStatus::Crashed => write!(f, "CRASHED"),
            RunStatus::MetricsRegression => write!(f, "METRICS_REGRESSION"),
            RunStatus::Failed => write!(f, "FAILED"),
            RunStatus::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// Classify a run. First matching rule wins:
///
/// 1. finished + `nightly_test_passed` -> `Succeeded`
/// 2. finished + `nightly_test_failed` -> `MetricsRegression`
/// 3. crashed -> `Crashed`
/// 4. failed -> `Failed`
/// 5. anything else -> `Unknown`
pub fn classify(state: &RunState, tags: &BTreeSet<String>) -> RunStatus {
    match state {
        RunState::Finished if tags.contains(TAG_PASSED) => RunStatus::Succeeded,
        RunState::Finished if tags.contains(TAG_FAILED) => RunStatus::MetricsRegression,
        RunState::Crashed => RunStatus::Crashed,
        RunState::Failed => RunStatus::Failed,
        _ => RunStatus::Unknown,
    }
}
