//! W&B GraphQL client.

use std::collections::BTreeSet;
use std::time::Duration;

use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use super::{BackendError, RunFilter, RunOrder, RunRecord, TrackingBackend};
use crate::config::WandbConfig;
use crate::status::RunState;

const PAGE_SIZE: u32 = 50;

const PROJECTS_QUERY: &str = r#"
query Projects($entity: String, $cursor: String, $perPage: Int) {
  models(entityName: $entity, after: $cursor, first: $perPage) {
    edges { node { name } }
    pageInfo { endCursor hasNextPage }
  }
}
"#;

const RUNS_QUERY: &str = r#"
query Runs($project: String!, $entity: String!, $cursor: String, $perPage: Int, $order: String, $filters: JSONString) {
  project(name: $project, entityName: $entity) {
    runs(filters: $filters, after: $cursor, first: $perPage, order: $order) {
      edges { node { name state tags } }
      pageInfo { endCursor hasNextPage }
    }
  }
}
"#;

/// Tracking backend backed by the W&B public GraphQL endpoint.
pub struct WandbClient {
    client: Client,
    graphql_url: String,
    app_url: String,
    api_key: Option<String>,
}

impl WandbClient {
    pub fn new(config: &WandbConfig) -> Result<Self, BackendError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self {
            client,
            graphql_url: format!("{}/graphql", config.base_url.trim_end_matches('/')),
            app_url: config.app_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    /// Browser URL of a run.
    pub fn run_url(&self, entity: &str, project: &str, run_name: &str) -> String {
        format!("{}/{}/{}/runs/{}", self.app_url, entity, project, run_name)
    }

    async fn query<T: DeserializeOwned>(&self, query: &str, variables: Value) -> Result<T, BackendError> {
        let mut req = self
            .client
            .post(&self.graphql_url)
            .json(&json!({ "query": query, "variables": variables }));
        if let Some(key) = &self.api_key {
            req = req.basic_auth("api", Some(key));
        }

        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(BackendError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let envelope: GraphqlResponse<T> = resp
            .json()
            .await
            .map_err(|e| BackendError::Malformed(e.to_string()))?;

        if !envelope.errors.is_empty() {
            let messages: Vec<String> = envelope.errors.into_iter().map(|e| e.message).collect();
            return Err(BackendError::Query(messages.join("; ")));
        }
        envelope
            .data
            .ok_or_else(|| BackendError::Malformed("response has no data".to_string()))
    }
}

/// Serialize a filter into the backend's JSON filter string.
pub fn filters_json(filter: &RunFilter) -> String {
    let mut filters = json!({
        "created_at": { "$gte": filter.since.to_rfc3339() },
    });
    if let Some(tags) = &filter.tags {
        filters["tags"] = json!({ "$in": tags });
    }
    filters.to_string()
}

#[async_trait::async_trait]
impl TrackingBackend for WandbClient {
    async fn list_projects(&self, entity: &str) -> Result<Vec<String>, BackendError> {
        let mut names = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let data: ProjectsData = self
                .query(
                    PROJECTS_QUERY,
                    json!({ "entity": entity, "cursor": cursor, "perPage": PAGE_SIZE }),
                )
                .await?;
            let page = data
                .models
                .ok_or_else(|| BackendError::Malformed(format!("no projects listing for entity {}", entity)))?;

            names.extend(page.edges.into_iter().map(|e| e.node.name));
            match page.page_info.next_cursor() {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        debug!(%entity, count = names.len(), "listed projects");
        Ok(names)
    }

    async fn list_runs(
        &self,
        entity: &str,
        project: &str,
        filter: &RunFilter,
        order: RunOrder,
    ) -> Result<Vec<RunRecord>, BackendError> {
        let filters = filters_json(filter);
        let mut runs = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let data: RunsData = self
                .query(
                    RUNS_QUERY,
                    json!({
                        "entity": entity,
                        "project": project,
                        "cursor": cursor,
                        "perPage": PAGE_SIZE,
                        "order": order.as_backend_key(),
                        "filters": filters,
                    }),
                )
                .await?;
            let page = data
                .project
                .ok_or_else(|| BackendError::ProjectNotFound {
                    entity: entity.to_string(),
                    project: project.to_string(),
                })?
                .runs
                .ok_or_else(|| BackendError::Malformed(format!("no runs listing for {}/{}", entity, project)))?;

            for edge in page.edges {
                let node = edge.node;
                runs.push(RunRecord {
                    url: self.run_url(entity, project, &node.name),
                    state: RunState::from(node.state.as_deref().unwrap_or_default()),
                    tags: node.tags.unwrap_or_default().into_iter().collect::<BTreeSet<_>>(),
                });
            }
            match page.page_info.next_cursor() {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        debug!(%entity, %project, count = runs.len(), "listed runs");
        Ok(runs)
    }
}

#[derive(Debug, Deserialize)]
struct GraphqlResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<GraphqlError>,
}

#[derive(Debug, Deserialize)]
struct GraphqlError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct Connection<N> {
    edges: Vec<Edge<N>>,
    #[serde(rename = "pageInfo")]
    page_info: PageInfo,
}

#[derive(Debug, Deserialize)]
struct Edge<N> {
    node: N,
}

#[derive(Debug, Deserialize)]
struct PageInfo {
    #[serde(rename = "endCursor")]
    end_cursor: Option<String>,
    #[serde(rename = "hasNextPage", default)]
    has_next_page: bool,
}

impl PageInfo {
    fn next_cursor(self) -> Option<String> {
        if self.has_next_page {
            self.end_cursor
        } else {
            None
        }
    }
}

#[derive(Debug, Deserialize)]
struct ProjectsData {
    models: Option<Connection<ProjectNode>>,
}

#[derive(Debug, Deserialize)]
struct ProjectNode {
    name: String,
}

#[derive(Debug, Deserialize)]
struct RunsData {
    project: Option<ProjectRuns>,
}

#[derive(Debug, Deserialize)]
struct ProjectRuns {
    runs: Option<Connection<RunNode>>,
}

#[derive(Debug, Deserialize)]
struct RunNode {
    name: String,
    state: Option<String>,
    tags: Option<Vec<String>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracking::TimeWindow;
    use chrono::{Duration as ChronoDuration, TimeZone, Utc};

    fn filter() -> RunFilter {
        let now = Utc.with_ymd_and_hms(2024, 5, 2, 8, 0, 0).unwrap();
        RunFilter::new(TimeWindow::ending_at(now, ChronoDuration::hours(16)).unwrap())
    }

    #[test]
    fn test_filters_json_without_tags() {
        let parsed: Value = serde_json::from_str(&filters_json(&filter())).unwrap();
        assert_eq!(parsed["created_at"]["$gte"], "2024-05-01T16:00:00+00:00");
        assert!(parsed.get("tags").is_none());
    }

    #[test]
    fn test_filters_json_with_tags() {
        let f = filter().with_tags(vec!["g1".to_string()]);
        let parsed: Value = serde_json::from_str(&filters_json(&f)).unwrap();
        assert_eq!(parsed["tags"]["$in"], json!(["g1"]));
    }

    #[test]
    fn test_run_url_layout() {
        let client = WandbClient::new(&WandbConfig {
            app_url: "https://wandb.ai/".to_string(),
            ..WandbConfig::default()
        })
        .unwrap();
        assert_eq!(
            client.run_url("far-wandb", "nightly_g1", "abc123"),
            "https://wandb.ai/far-wandb/nightly_g1/runs/abc123"
        );
    }

    #[test]
    fn test_page_info_stops_without_next_page() {
        let info = PageInfo {
            end_cursor: Some("c1".to_string()),
            has_next_page: false,
        };
        assert_eq!(info.next_cursor(), None);
    }

    #[test]
    fn test_null_tags_deserialize() {
        let node: RunNode =
            serde_json::from_value(json!({ "name": "r1", "state": "running", "tags": null })).unwrap();
        assert!(node.tags.is_none());
    }
}
