//! Slack Web API transport (`chat.postMessage`).

use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{NotificationTransport, NotifyError};

pub struct SlackClient {
    client: Client,
    post_url: String,
}

impl SlackClient {
    /// `api_url` is the Web API root, e.g. `https://slack.com/api`.
    pub fn new(api_url: &str) -> Result<Self, NotifyError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| NotifyError::Delivery(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            post_url: format!("{}/chat.postMessage", api_url.trim_end_matches('/')),
        })
    }
}

#[derive(Debug, Serialize)]
struct PostMessage<'a> {
    channel: &'a str,
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct PostMessageResponse {
    ok: bool,
    error: Option<String>,
}

#[async_trait::async_trait]
impl NotificationTransport for SlackClient {
    async fn post_message(&self, channel: &str, text: &str, token: &str) -> Result<(), NotifyError> {
        let resp = self
            .client
            .post(&self.post_url)
            .bearer_auth(token)
            .json(&PostMessage { channel, text })
            .send()
            .await
            .map_err(|e| NotifyError::Delivery(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(NotifyError::Delivery(format!("Slack returned HTTP {}", status.as_u16())));
        }

        // Slack reports API-level failures with HTTP 200 and `ok: false`.
        let body: PostMessageResponse = resp
            .json()
            .await
            .map_err(|e| NotifyError::Delivery(format!("unreadable Slack response: {}", e)))?;
        if !body.ok {
            return Err(NotifyError::Delivery(
                body.error.unwrap_or_else(|| "unknown Slack error".to_string()),
            ));
        }

        debug!(%channel, "posted message to Slack");
        Ok(())
    }
}
