//! Experiment-tracking backend seam.
//!
//! The pipeline only needs two read operations from the backend: list the
//! projects of an entity, and list the runs of one project created after a
//! cutoff. [`wandb::WandbClient`] implements them against the W&B GraphQL API;
//! tests substitute in-memory fakes.

pub mod wandb;

use std::collections::BTreeSet;

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

use crate::status::RunState;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("request to tracking backend failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("tracking backend returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("tracking backend query failed: {0}")]
    Query(String),

    #[error("malformed response from tracking backend: {0}")]
    Malformed(String),

    #[error("project {entity}/{project} not found")]
    ProjectNotFound { entity: String, project: String },
}

/// One run as read from the backend. Transient, never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRecord {
    pub url: String,
    pub state: RunState,
    pub tags: BTreeSet<String>,
}

/// The window of runs considered "last night".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub since: DateTime<Utc>,
}

impl TimeWindow {
    /// Window covering `lookback` up to the current instant. `None` if the
    /// cutoff is not representable.
    pub fn ending_now(lookback: Duration) -> Option<Self> {
        Self::ending_at(Utc::now(), lookback)
    }

    pub fn ending_at(now: DateTime<Utc>, lookback: Duration) -> Option<Self> {
        let since = now.checked_sub_signed(lookback)?;
        Some(Self { since })
    }
}

/// Filter applied to a run listing.
///
/// `tags` uses ANY-match semantics: a run is kept if it carries at least one
/// of the listed tags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunFilter {
    pub since: DateTime<Utc>,
    pub tags: Option<Vec<String>>,
}

impl RunFilter {
    pub fn new(window: TimeWindow) -> Self {
        Self {
            since: window.since,
            tags: None,
        }
    }

    /// Restrict to runs carrying any of `tags`. An empty list means no tag filter.
    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = if tags.is_empty() { None } else { Some(tags) };
        self
    }

    /// Whether `run_tags` passes the tag filter.
    pub fn matches_tags(&self, run_tags: &BTreeSet<String>) -> bool {
        match &self.tags {
            None => true,
            Some(wanted) => wanted.iter().any(|t| run_tags.contains(t)),
        }
    }
}

/// Listing order for runs. Presentation only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunOrder {
    #[default]
    NewestFirst,
}

impl RunOrder {
    /// Order key in the backend's `[-]field` notation.
    pub fn as_backend_key(self) -> &'static str {
        match self {
            RunOrder::NewestFirst => "-created_at",
        }
    }
}

/// Read operations consumed from the tracking backend.
#[async_trait::async_trait]
pub trait TrackingBackend: Send + Sync {
    /// Names of every project owned by `entity`.
    async fn list_projects(&self, entity: &str) -> Result<Vec<String>, BackendError>;

    /// Runs of `entity/project` matching `filter`, in `order`.
    async fn list_runs(
        &self,
        entity: &str,
        project: &str,
        filter: &RunFilter,
        order: RunOrder,
    ) -> Result<Vec<RunRecord>, BackendError>;
}
