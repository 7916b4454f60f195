//! Aggregated nightly report and its text rendering.

use crate::status::RunStatus;

/// One classified run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportEntry {
    pub status: RunStatus,
    pub url: String,
}

impl ReportEntry {
    pub fn new(status: RunStatus, url: impl Into<String>) -> Self {
        Self {
            status,
            url: url.into(),
        }
    }
}

/// Where a project dropped out of the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FailureStage {
    /// The backend call for the project failed or timed out.
    Fetch,
    /// The fetch task itself died (panic or cancellation).
    Task,
}

/// A project that produced an error line instead of runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectFailure {
    pub project: String,
    pub stage: FailureStage,
    pub error: String,
}

impl ProjectFailure {
    pub fn fetch(project: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            stage: FailureStage::Fetch,
            error: error.into(),
        }
    }

    pub fn task(project: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            stage: FailureStage::Task,
            error: error.into(),
        }
    }
}

impl std::fmt::Display for ProjectFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.stage {
            FailureStage::Fetch => write!(
                f,
                "error fetching runs for project {}: {}",
                self.project, self.error
            ),
            FailureStage::Task => write!(f, "error processing project {}: {}", self.project, self.error),
        }
    }
}

/// Everything one invocation learned. Built once, rendered, dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AggregatedReport {
    pub entries: Vec<ReportEntry>,
    pub failures: Vec<ProjectFailure>,
}

impl AggregatedReport {
    /// Run entries plus one line per failed project.
    pub fn total_entries(&self) -> usize {
        self.entries.len() + self.failures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.total_entries() == 0
    }

    pub fn has_problems(&self) -> bool {
        !self.failures.is_empty() || self.entries.iter().any(|e| !e.status.is_success())
    }

    /// Stable presentation order: by status, then URL. Failures by project.
    pub fn sort(&mut self) {
        self.entries
            .sort_by(|a, b| a.status.cmp(&b.status).then_with(|| a.url.cmp(&b.url)));
        self.failures
            .sort_by(|a, b| a.project.cmp(&b.project).then_with(|| a.stage.cmp(&b.stage)));
    }
}

/// Short name of a run URL: the fifth `/` segment after the scheme.
///
/// `https://x/a/b/c/bad/2` -> `bad`. URLs with fewer segments are returned whole.
pub fn short_name(url: &str) -> &str {
    let rest = url.split_once("://").map(|(_, rest)| rest).unwrap_or(url);
    match rest.split('/').nth(4) {
        Some(segment) if !segment.is_empty() => segment,
        _ => url,
    }
}

/// Render `report` as a single message.
///
/// Entry order is preserved; call [`AggregatedReport::sort`] first for a
/// deterministic layout.
pub fn render(report: &AggregatedReport, build_ref_url: &str) -> String {
    let mut out = format!("*Nightly Build Completed!*\nBuild URL: {}", build_ref_url);

    if report.has_problems() {
        let problems: Vec<&str> = report
            .entries
            .iter()
            .filter(|e| !e.status.is_success())
            .map(|e| short_name(&e.url))
            .chain(report.failures.iter().map(|f| f.project.as_str()))
            .collect();
        out.push_str("\nFailed runs: ");
        out.push_str(&problems.join(", "));
    }

    let lines: Vec<String> = report
        .entries
        .iter()
        .map(|e| format!("{} {}", e.status.glyph(), e.url))
        .chain(report.failures.iter().map(|f| f.to_string()))
        .collect();
    out.push_str("\nWandB URLs:\n```\n");
    out.push_str(&lines.join("\n"));
    out.push_str("\n```");

    out
}
