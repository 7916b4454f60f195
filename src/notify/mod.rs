//! Report delivery.

pub mod slack;

use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum NotifyError {
    /// Required delivery settings are missing. Raised before any send.
    #[error("notification not configured: {0}")]
    Configuration(&'static str),

    /// The transport call failed.
    #[error("failed to deliver notification: {0}")]
    Delivery(String),
}

/// Outbound message transport.
#[async_trait::async_trait]
pub trait NotificationTransport: Send + Sync {
    async fn post_message(&self, channel: &str, text: &str, token: &str) -> Result<(), NotifyError>;
}

/// Check that a delivery could be attempted at all.
pub fn validate(channel: &str, token: &str) -> Result<(), NotifyError> {
    if token.is_empty() {
        return Err(NotifyError::Configuration("SLACK_BOT_TOKEN is not set"));
    }
    if channel.is_empty() {
        return Err(NotifyError::Configuration("SLACK_CHANNEL is not set"));
    }
    Ok(())
}

/// Send `text` to `channel`. Exactly one transport call on success, none
/// when the settings are incomplete. No retry.
pub async fn deliver<T>(transport: &T, text: &str, channel: &str, token: &str) -> Result<(), NotifyError>
where
    T: NotificationTransport + ?Sized,
{
    validate(channel, token)?;
    transport.post_message(channel, text, token).await?;
    info!(%channel, bytes = text.len(), "summary delivered");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingTransport {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait::async_trait]
    impl NotificationTransport for CountingTransport {
        async fn post_message(&self, _channel: &str, _text: &str, _token: &str) -> Result<(), NotifyError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(NotifyError::Delivery("channel_not_found".to_string()));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_missing_channel_sends_nothing() {
        let transport = CountingTransport::default();
        let err = deliver(&transport, "hi", "", "xoxb-1").await.unwrap_err();
        assert!(matches!(err, NotifyError::Configuration(_)));
        assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_missing_token_sends_nothing() {
        let transport = CountingTransport::default();
        let err = deliver(&transport, "hi", "C123", "").await.unwrap_err();
        assert!(matches!(err, NotifyError::Configuration(_)));
        assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_successful_delivery_sends_once() {
        let transport = CountingTransport::default();
        deliver(&transport, "hi", "C123", "xoxb-1").await.unwrap();
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_transport_failure_propagates() {
        let transport = CountingTransport {
            fail: true,
            ..Default::default()
        };
        let err = deliver(&transport, "hi", "C123", "xoxb-1").await.unwrap_err();
        assert!(matches!(err, NotifyError::Delivery(_)));
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
    }
}
