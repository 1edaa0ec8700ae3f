//! Chat sink transport and the Telegram Bot API implementation.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tradewatch_core::DeliveryError;

use crate::webhook::map_reqwest;

/// Where a chat message goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatTarget {
    pub token: String,
    pub destination: String,
    pub thread: Option<String>,
}

/// Sends one text message to a chat destination.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn send(&self, target: &ChatTarget, message: &str) -> Result<(), DeliveryError>;
}

/// Telegram Bot API `sendMessage`.
#[derive(Clone)]
pub struct TelegramTransport {
    http: Client,
    api_url: String,
}

impl std::fmt::Debug for TelegramTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramTransport")
            .field("api_url", &self.api_url)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    message_thread_id: Option<i64>,
    disable_web_page_preview: bool,
}

#[derive(Debug, Deserialize)]
struct ApiReply {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

impl TelegramTransport {
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(api_url: impl Into<String>, timeout: Duration) -> Result<Self, DeliveryError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DeliveryError::Network(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            api_url: api_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl ChatTransport for TelegramTransport {
    async fn send(&self, target: &ChatTarget, message: &str) -> Result<(), DeliveryError> {
        let url = format!("{}/bot{}/sendMessage", self.api_url, target.token);
        let body = SendMessage {
            chat_id: &target.destination,
            text: message,
            message_thread_id: target.thread.as_deref().and_then(|t| t.trim().parse().ok()),
            disable_web_page_preview: true,
        };

        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(map_reqwest)?;

        let status = response.status().as_u16();
        let reply: Option<ApiReply> = response.json().await.ok();
        match reply {
            Some(ApiReply { ok: true, .. }) if status == 200 => Ok(()),
            Some(ApiReply {
                description: Some(description),
                ..
            }) => Err(DeliveryError::Rejected(description)),
            _ => Err(DeliveryError::HttpStatus(status)),
        }
    }
}
