//! Bounded fan-out of project fetches and fan-in of their results.
//!
//! One tokio task per project. A semaphore caps how many fetches are in
//! flight; the rest wait for a permit. Finished tasks append to a shared
//! report in completion order, and [`Scheduler::collect`] only returns after
//! every task has been joined.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, error, info, warn};

use crate::fetch::{fetch_project, ProjectOutcome};
use crate::report::{AggregatedReport, ProjectFailure};
use crate::tracking::{RunFilter, TrackingBackend};

/// Knobs for one collection pass.
#[derive(Debug, Clone)]
pub struct ScheduleOptions {
    /// Maximum concurrent fetches. Clamped to at least 1.
    pub max_workers: usize,
    /// Per-project deadline. `None` waits for the backend indefinitely.
    pub fetch_timeout: Option<Duration>,
}

impl Default for ScheduleOptions {
    fn default() -> Self {
        Self {
            max_workers: crate::config::default_worker_limit(),
            fetch_timeout: None,
        }
    }
}

/// Runs one fetch task per project against a shared backend.
#[derive(Clone)]
pub struct Scheduler {
    backend: Arc<dyn TrackingBackend>,
    options: ScheduleOptions,
}

impl Scheduler {
    pub fn new(backend: Arc<dyn TrackingBackend>, options: ScheduleOptions) -> Self {
        Self { backend, options }
    }

    /// Fetch every project in `projects` and merge the results.
    ///
    /// Never fails: backend errors become fetch failures, and a task that
    /// dies becomes an `error processing project` line.
    pub async fn collect(&self, entity: &str, projects: Vec<String>, filter: &RunFilter) -> AggregatedReport {
        let workers = self.options.max_workers.max(1);
        info!(projects = projects.len(), workers, "fetching nightly projects");

        let semaphore = Arc::new(Semaphore::new(workers));
        let report = Arc::new(Mutex::new(AggregatedReport::default()));
        let entity: Arc<str> = Arc::from(entity);
        let filter = Arc::new(filter.clone());

        let mut handles = Vec::with_capacity(projects.len());
        for project in projects {
            let backend = self.backend.clone();
            let semaphore = semaphore.clone();
            let report = report.clone();
            let entity = entity.clone();
            let filter = filter.clone();
            let fetch_timeout = self.options.fetch_timeout;
            let name = project.clone();

            let handle = tokio::spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(e) => {
                        report.lock().await.failures.push(ProjectFailure::task(&name, e.to_string()));
                        return;
                    }
                };

                let fetch = fetch_project(backend.as_ref(), &entity, &name, &filter);
                let outcome = match fetch_timeout {
                    Some(limit) => match tokio::time::timeout(limit, fetch).await {
                        Ok(outcome) => outcome,
                        Err(_) => {
                            warn!(project = %name, timeout_secs = limit.as_secs_f64(), "project fetch timed out");
                            ProjectOutcome::Failed(ProjectFailure::fetch(
                                &name,
                                format!("timed out after {}s", limit.as_secs_f64()),
                            ))
                        }
                    },
                    None => fetch.await,
                };

                merge(&mut *report.lock().await, outcome);
            });
            handles.push((project, handle));
        }

        // Barrier: every task is joined, successful or not.
        let joined = join_all(
            handles
                .into_iter()
                .map(|(project, handle)| async move { (project, handle.await) }),
        )
        .await;

        let mut report = report.lock().await;
        for (project, result) in joined {
            if let Err(e) = result {
                error!(%project, error = %e, "fetch task failed");
                report.failures.push(ProjectFailure::task(project, e.to_string()));
            }
        }

        info!(
            runs = report.entries.len(),
            failed_projects = report.failures.len(),
            "collection complete"
        );
        std::mem::take(&mut *report)
    }
}

fn merge(report: &mut AggregatedReport, outcome: ProjectOutcome) {
    match outcome {
        ProjectOutcome::Runs { project, entries } => {
            debug!(%project, runs = entries.len(), "merged project");
            report.entries.extend(entries);
        }
        ProjectOutcome::Failed(failure) => report.failures.push(failure),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::FailureStage;
    use crate::status::{RunState, TAG_PASSED};
    use crate::tracking::{BackendError, RunOrder, RunRecord, TimeWindow};
    use std::collections::{BTreeSet, HashMap};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn filter() -> RunFilter {
        RunFilter::new(TimeWindow::ending_now(chrono::Duration::hours(16)).unwrap())
    }

    fn projects(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("nightly_{}", i)).collect()
    }

    fn finished_run(project: &str, i: usize) -> RunRecord {
        RunRecord {
            url: format!("https://wandb.ai/e/{}/runs/{}", project, i),
            state: RunState::Finished,
            tags: [TAG_PASSED.to_string()].into(),
        }
    }

    /// Serves a fixed number of runs per project; listed projects fail or panic.
    #[derive(Default)]
    struct ScriptedBackend {
        run_counts: HashMap<String, usize>,
        failing: BTreeSet<String>,
        panicking: BTreeSet<String>,
        hanging: BTreeSet<String>,
    }

    #[async_trait::async_trait]
    impl TrackingBackend for ScriptedBackend {
        async fn list_projects(&self, _entity: &str) -> Result<Vec<String>, BackendError> {
            Ok(self.run_counts.keys().cloned().collect())
        }

        async fn list_runs(
            &self,
            _entity: &str,
            project: &str,
            _filter: &RunFilter,
            _order: RunOrder,
        ) -> Result<Vec<RunRecord>, BackendError> {
            if self.failing.contains(project) {
                return Err(BackendError::Query("permission denied".to_string()));
            }
            if self.panicking.contains(project) {
                panic!("backend client blew up");
            }
            if self.hanging.contains(project) {
                std::future::pending::<()>().await;
            }
            let count = self.run_counts.get(project).copied().unwrap_or(0);
            Ok((0..count).map(|i| finished_run(project, i)).collect())
        }
    }

    fn options(max_workers: usize) -> ScheduleOptions {
        ScheduleOptions {
            max_workers,
            fetch_timeout: None,
        }
    }

    #[tokio::test]
    async fn test_one_failing_project_is_isolated() {
        let names = projects(5);
        let mut backend = ScriptedBackend::default();
        for (i, name) in names.iter().enumerate() {
            backend.run_counts.insert(name.clone(), i + 1);
        }
        backend.failing.insert("nightly_2".to_string());

        let scheduler = Scheduler::new(Arc::new(backend), options(2));
        let report = scheduler.collect("e", names, &filter()).await;

        // 1 + 2 + 4 + 5 runs from healthy projects, plus one error line.
        assert_eq!(report.entries.len(), 12);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.total_entries(), 13);
        assert_eq!(report.failures[0].project, "nightly_2");
        assert_eq!(report.failures[0].stage, FailureStage::Fetch);
        assert!(report.entries.iter().all(|e| !e.url.contains("/nightly_2/")));
    }

    #[tokio::test]
    async fn test_results_match_as_sets() {
        let names = projects(8);
        let mut backend = ScriptedBackend::default();
        for name in &names {
            backend.run_counts.insert(name.clone(), 2);
        }
        let scheduler = Scheduler::new(Arc::new(backend), options(3));
        let report = scheduler.collect("e", names.clone(), &filter()).await;

        let got: BTreeSet<String> = report.entries.iter().map(|e| e.url.clone()).collect();
        let expected: BTreeSet<String> = names
            .iter()
            .flat_map(|p| (0..2).map(move |i| finished_run(p, i).url))
            .collect();
        assert_eq!(got, expected);
        assert!(report.failures.is_empty());
    }

    #[tokio::test]
    async fn test_panicking_task_is_recorded_and_others_continue() {
        let names = projects(3);
        let mut backend = ScriptedBackend::default();
        for name in &names {
            backend.run_counts.insert(name.clone(), 1);
        }
        backend.panicking.insert("nightly_1".to_string());

        let scheduler = Scheduler::new(Arc::new(backend), options(4));
        let report = scheduler.collect("e", names, &filter()).await;

        assert_eq!(report.entries.len(), 2);
        assert_eq!(report.failures.len(), 1);
        let line = report.failures[0].to_string();
        assert!(line.starts_with("error processing project nightly_1:"), "{}", line);
    }

    #[tokio::test]
    async fn test_fetch_timeout_converts_hung_project() {
        let names = projects(2);
        let mut backend = ScriptedBackend::default();
        backend.run_counts.insert("nightly_0".to_string(), 3);
        backend.hanging.insert("nightly_1".to_string());

        let scheduler = Scheduler::new(
            Arc::new(backend),
            ScheduleOptions {
                max_workers: 2,
                fetch_timeout: Some(Duration::from_millis(50)),
            },
        );
        let report = scheduler.collect("e", names, &filter()).await;

        assert_eq!(report.entries.len(), 3);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].project, "nightly_1");
        assert!(report.failures[0].error.contains("timed out"));
    }

    #[tokio::test]
    async fn test_no_projects_yields_empty_report() {
        let scheduler = Scheduler::new(Arc::new(ScriptedBackend::default()), options(4));
        let report = scheduler.collect("e", Vec::new(), &filter()).await;
        assert!(report.is_empty());
    }

    /// Blocks every fetch until the test releases the gate.
    struct GatedBackend {
        gate: Semaphore,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl TrackingBackend for GatedBackend {
        async fn list_projects(&self, _entity: &str) -> Result<Vec<String>, BackendError> {
            Ok(Vec::new())
        }

        async fn list_runs(
            &self,
            _entity: &str,
            project: &str,
            _filter: &RunFilter,
            _order: RunOrder,
        ) -> Result<Vec<RunRecord>, BackendError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            let _released = self
                .gate
                .acquire()
                .await
                .map_err(|e| BackendError::Query(e.to_string()))?;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(vec![finished_run(project, 0)])
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_in_flight_fetches_never_exceed_limit() {
        const LIMIT: usize = 3;
        const PROJECTS: usize = 10;

        let backend = Arc::new(GatedBackend {
            gate: Semaphore::new(0),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let scheduler = Scheduler::new(backend.clone(), options(LIMIT));
        let run = tokio::spawn(async move { scheduler.collect("e", projects(PROJECTS), &filter()).await });

        // Wait for the pool to fill, then give queued tasks a chance to misbehave.
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while backend.in_flight.load(Ordering::SeqCst) < LIMIT {
            assert!(tokio::time::Instant::now() < deadline, "workers never started");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(backend.in_flight.load(Ordering::SeqCst), LIMIT);

        backend.gate.add_permits(PROJECTS);
        let report = run.await.unwrap();

        assert_eq!(report.entries.len(), PROJECTS);
        assert_eq!(backend.peak.load(Ordering::SeqCst), LIMIT);
    }
}
