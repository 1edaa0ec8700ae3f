//! HTTP webhook sink.

use std::time::Duration;

use reqwest::Client;
use tradewatch_core::{DeliveryError, EventPayload};

/// Header carrying the shared secret receivers use to authenticate us.
pub const SECRET_HEADER: &str = "X-Webhook-Secret";

/// Posts event payloads as JSON. Only HTTP 200 counts as delivered; there
/// is no retry here.
#[derive(Clone)]
pub struct WebhookSink {
    http: Client,
    secret: String,
}

impl std::fmt::Debug for WebhookSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookSink").finish_non_exhaustive()
    }
}

impl WebhookSink {
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(secret: impl Into<String>, timeout: Duration) -> Result<Self, DeliveryError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DeliveryError::Network(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            secret: secret.into(),
        })
    }

    /// Delivers `payload` to `url`.
    ///
    /// # Errors
    /// Returns `HttpStatus` for any status other than 200, or a transport
    /// error if the request could not complete.
    pub async fn deliver(&self, url: &str, payload: &EventPayload) -> Result<(), DeliveryError> {
        let response = self
            .http
            .post(url)
            .header(SECRET_HEADER, &self.secret)
            .json(payload)
            .send()
            .await
            .map_err(map_reqwest)?;

        let status = response.status().as_u16();
        if status == 200 {
            Ok(())
        } else {
            Err(DeliveryError::HttpStatus(status))
        }
    }
}

pub(crate) fn map_reqwest(err: reqwest::Error) -> DeliveryError {
    if err.is_timeout() {
        DeliveryError::Timeout(err.to_string())
    } else {
        DeliveryError::Network(err.to_string())
    }
}
