//! Outbound notification delivery.
//!
//! The pipeline talks to a `Notifier` trait object; `SlackNotifier` is the
//! webhook implementation. Failures are surfaced and dropped by the
//! caller; there is no retry and no durable queue, since the upstream
//! watch re-lists on reconnect and the dedup TTL bounds re-notification.

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

use crate::error::{Error, Result};

const SEND_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Default, Serialize)]
pub struct SlackMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<SlackAttachment>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SlackAttachment {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<SlackField>,
    #[serde(rename = "ts", skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SlackField {
    pub title: String,
    pub value: String,
    pub short: bool,
}

impl SlackMessage {
    #[must_use]
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            attachments: Vec::new(),
        }
    }
}

/// Message sink the pipeline delivers to.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver one message.
    ///
    /// # Errors
    ///
    /// `Sink` for a non-2xx reply, `Transport` for connection failures
    /// and timeouts.
    async fn send(&self, message: &SlackMessage) -> Result<()>;

    /// Deliver a plain-text message.
    ///
    /// # Errors
    ///
    /// Same as [`Notifier::send`].
    async fn send_text(&self, text: &str) -> Result<()> {
        self.send(&SlackMessage::from_text(text)).await
    }
}

/// Incoming-webhook client.
pub struct SlackNotifier {
    webhook_url: String,
    client: Client,
}

impl SlackNotifier {
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be built.
    pub fn new(webhook_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder().timeout(SEND_TIMEOUT).build()?;
        Ok(Self {
            webhook_url: webhook_url.into(),
            client,
        })
    }
}

#[async_trait]
impl Notifier for SlackNotifier {
    async fn send(&self, message: &SlackMessage) -> Result<()> {
        let response = self
            .client
            .post(&self.webhook_url)
            .json(message)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Sink(status.as_u16()));
        }

        debug!(status = status.as_u16(), "webhook delivered");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_serialization_shape() {
        let message = SlackMessage {
            text: Some("hello".to_string()),
            attachments: vec![SlackAttachment {
                color: Some("good".to_string()),
                title: Some("[Pod] default/web".to_string()),
                text: None,
                fields: vec![SlackField {
                    title: "イベントタイプ".to_string(),
                    value: "ADDED".to_string(),
                    short: true,
                }],
                timestamp: Some(1_700_000_000),
            }],
        };

        let json: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&message).unwrap()).unwrap();
        assert_eq!(json["text"], "hello");
        assert_eq!(json["attachments"][0]["color"], "good");
        assert_eq!(json["attachments"][0]["ts"], 1_700_000_000);
        assert_eq!(json["attachments"][0]["fields"][0]["short"], true);
        assert!(json["attachments"][0].get("text").is_none());
    }

    #[test]
    fn test_empty_fields_are_omitted() {
        let message = SlackMessage::from_text("ping");
        let json = serde_json::to_string(&message).unwrap();
        assert_eq!(json, r#"{"text":"ping"}"#);
    }
}
