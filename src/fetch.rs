//! Per-project run fetching.
//!
//! A failing project never escapes this module as an error: it comes back as
//! [`ProjectOutcome::Failed`] so sibling projects are unaffected.

use tracing::{debug, warn};

use crate::report::{ProjectFailure, ReportEntry};
use crate::status::classify;
use crate::tracking::{RunFilter, RunOrder, TrackingBackend};

/// Result of fetching one project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProjectOutcome {
    Runs {
        project: String,
        entries: Vec<ReportEntry>,
    },
    Failed(ProjectFailure),
}

/// Fetch and classify the runs of `entity/project` matching `filter`.
///
/// The tag filter is re-checked on the returned runs, so a backend that
/// ignores it cannot leak unrelated runs into the report.
pub async fn fetch_project(
    backend: &dyn TrackingBackend,
    entity: &str,
    project: &str,
    filter: &RunFilter,
) -> ProjectOutcome {
    match backend
        .list_runs(entity, project, filter, RunOrder::NewestFirst)
        .await
    {
        Ok(runs) => {
            let entries: Vec<ReportEntry> = runs
                .into_iter()
                .filter(|run| filter.matches_tags(&run.tags))
                .map(|run| ReportEntry::new(classify(&run.state, &run.tags), run.url))
                .collect();
            debug!(%project, runs = entries.len(), "fetched project runs");
            ProjectOutcome::Runs {
                project: project.to_string(),
                entries,
            }
        }
        Err(e) => {
            warn!(%project, error = %e, "failed to fetch runs");
            ProjectOutcome::Failed(ProjectFailure::fetch(project, e.to_string()))
        }
    }
}
