//! nightly-summary -- health report for nightly robot-learning training runs.
//!
//! Polls the experiment-tracking backend for every nightly project, classifies
//! each run from its state and tags, and renders one consolidated message that
//! is either printed or posted to Slack.

pub mod config;
pub mod fetch;
pub mod notify;
pub mod report;
pub mod scheduler;
pub mod status;
pub mod tracking;

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use crate::config::Config;
use crate::notify::NotificationTransport;
use crate::scheduler::{ScheduleOptions, Scheduler};
use crate::tracking::{RunFilter, TimeWindow, TrackingBackend};

/// Names of `entity`'s projects starting with `prefix`.
pub async fn discover_projects(backend: &dyn TrackingBackend, entity: &str, prefix: &str) -> Result<Vec<String>> {
    let all = backend
        .list_projects(entity)
        .await
        .with_context(|| format!("Failed to list projects for entity {}", entity))?;
    let total = all.len();
    let nightly: Vec<String> = all.into_iter().filter(|name| name.starts_with(prefix)).collect();
    info!(%entity, %prefix, total, nightly = nightly.len(), "discovered projects");
    Ok(nightly)
}

/// Build the report text: discover, fetch in parallel, sort, render.
pub async fn summarize(config: &Config, backend: Arc<dyn TrackingBackend>) -> Result<String> {
    let projects = discover_projects(backend.as_ref(), &config.entity, &config.project_prefix).await?;

    let window = config
        .lookback()
        .and_then(TimeWindow::ending_now)
        .with_context(|| format!("Lookback of {} hours is out of range", config.lookback_hours))?;
    let filter = RunFilter::new(window).with_tags(config.filter_tags.clone());
    info!(since = %window.since.to_rfc3339(), "collecting runs");

    let scheduler = Scheduler::new(
        backend,
        ScheduleOptions {
            max_workers: config.worker_limit(),
            fetch_timeout: config.fetch_timeout(),
        },
    );
    let mut report = scheduler.collect(&config.entity, projects, &filter).await;
    report.sort();

    Ok(report::render(&report, &config.build.url()))
}

/// Summarize and post to the configured Slack channel.
///
/// Slack settings are checked before the backend is touched.
pub async fn deliver_summary(
    config: &Config,
    backend: Arc<dyn TrackingBackend>,
    transport: &dyn NotificationTransport,
) -> Result<()> {
    notify::validate(&config.slack.channel, &config.slack.token)?;

    let text = summarize(config, backend).await?;
    notify::deliver(transport, &text, &config.slack.channel, &config.slack.token).await?;
    Ok(())
}
