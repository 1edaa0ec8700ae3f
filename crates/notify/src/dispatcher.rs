//! Fan-out of event payloads to an instance's configured sinks.

use std::sync::Arc;

use tracing::{debug, warn};
use tradewatch_core::events::activity;
use tradewatch_core::symbol::active_base_currency;
use tradewatch_core::{
    DeliveryError, EventPayload, MonitoredInstance, NotificationConfig, NotificationTargets,
};

use crate::chat::{ChatTarget, ChatTransport, TelegramTransport};
use crate::format::render_message;
use crate::rate_limit::ChatRateLimiter;
use crate::webhook::WebhookSink;

/// Which sink a delivery went to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkKind {
    Webhook,
    Chat,
}

/// Result of one delivery attempt.
#[derive(Debug)]
pub struct DeliveryOutcome {
    pub sink: SinkKind,
    pub result: Result<(), DeliveryError>,
}

impl DeliveryOutcome {
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    /// Activity type recorded for this attempt.
    #[must_use]
    pub const fn activity_type(&self) -> &'static str {
        match (self.sink, self.result.is_ok()) {
            (SinkKind::Webhook, true) => activity::WEBHOOK_SENT,
            (SinkKind::Webhook, false) => activity::WEBHOOK_FAILED,
            (SinkKind::Chat, true) => activity::CHAT_SENT,
            (SinkKind::Chat, false) => activity::CHAT_FAILED,
        }
    }

    /// Error type recorded when the attempt failed.
    #[must_use]
    pub const fn error_type(&self) -> &'static str {
        match self.sink {
            SinkKind::Webhook => "webhook_delivery",
            SinkKind::Chat => "chat_delivery",
        }
    }
}

/// Sinks an instance delivers to after applying config defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchTargets {
    pub webhook_url: Option<String>,
    pub chat: Option<ChatTarget>,
}

fn non_blank(value: Option<&String>) -> Option<String> {
    value
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

impl DispatchTargets {
    /// Merges an instance's own targets with the configured defaults.
    ///
    /// Chat is enabled only when both a token and a destination resolve.
    #[must_use]
    pub fn resolve(targets: &NotificationTargets, defaults: &NotificationConfig) -> Self {
        let token = non_blank(targets.chat_token.as_ref())
            .or_else(|| non_blank(defaults.default_telegram_bot_token.as_ref()));
        let destination = non_blank(targets.chat_destination.as_ref())
            .or_else(|| non_blank(defaults.default_chat_destination.as_ref()));
        let thread = non_blank(targets.chat_thread.as_ref())
            .or_else(|| non_blank(defaults.default_chat_thread.as_ref()));

        let chat = match (token, destination) {
            (Some(token), Some(destination)) => Some(ChatTarget {
                token,
                destination,
                thread,
            }),
            _ => None,
        };

        Self {
            webhook_url: non_blank(targets.webhook_url.as_ref()),
            chat,
        }
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.webhook_url.is_none() && self.chat.is_none()
    }
}

/// Delivers payloads for one instance.
///
/// Owns the instance's chat rate limiter, so one dispatcher must serve all
/// of an instance's cycles.
pub struct EventDispatcher {
    targets: DispatchTargets,
    webhook: WebhookSink,
    chat: Arc<dyn ChatTransport>,
    limiter: ChatRateLimiter,
    instance_name: String,
    active_coin: Option<String>,
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("instance_name", &self.instance_name)
            .field("webhook", &self.targets.webhook_url.is_some())
            .field("chat", &self.targets.chat.is_some())
            .finish_non_exhaustive()
    }
}

impl EventDispatcher {
    /// Builds a dispatcher that sends chat messages through Telegram.
    ///
    /// # Errors
    /// Returns an error if an HTTP client cannot be built.
    pub fn for_instance(
        instance: &MonitoredInstance,
        config: &NotificationConfig,
    ) -> Result<Self, DeliveryError> {
        let telegram = TelegramTransport::new(&config.telegram_api_url, config.telegram_timeout())?;
        Self::with_transport(instance, config, Arc::new(telegram))
    }

    /// Builds a dispatcher with a caller-supplied chat transport.
    ///
    /// # Errors
    /// Returns an error if the webhook HTTP client cannot be built.
    pub fn with_transport(
        instance: &MonitoredInstance,
        config: &NotificationConfig,
        chat: Arc<dyn ChatTransport>,
    ) -> Result<Self, DeliveryError> {
        Ok(Self {
            targets: DispatchTargets::resolve(&instance.notifications, config),
            webhook: WebhookSink::new(&config.webhook_secret, config.webhook_timeout())?,
            chat,
            limiter: ChatRateLimiter::new(config.chat_min_spacing()),
            instance_name: instance.name.clone(),
            active_coin: instance.pair_filter().map(active_base_currency),
        })
    }

    #[must_use]
    pub const fn targets(&self) -> &DispatchTargets {
        &self.targets
    }

    /// Re-resolves targets after the instance row changed, keeping the
    /// rate limiter's history.
    pub fn retarget(&mut self, instance: &MonitoredInstance, config: &NotificationConfig) {
        self.targets = DispatchTargets::resolve(&instance.notifications, config);
        self.instance_name.clone_from(&instance.name);
        self.active_coin = instance.pair_filter().map(active_base_currency);
    }

    /// Delivers `payload` to every configured sink, webhook first.
    ///
    /// Never fails; each attempt is reported in the returned outcomes.
    pub async fn dispatch(&self, payload: &EventPayload) -> Vec<DeliveryOutcome> {
        let mut outcomes = Vec::with_capacity(2);

        if let Some(url) = &self.targets.webhook_url {
            let result = self.webhook.deliver(url, payload).await;
            if let Err(e) = &result {
                warn!(
                    instance_id = payload.instance_id,
                    event_type = %payload.event_type,
                    symbol = %payload.symbol,
                    "Webhook delivery failed: {}",
                    e
                );
            }
            outcomes.push(DeliveryOutcome {
                sink: SinkKind::Webhook,
                result,
            });
        }

        if let Some(target) = &self.targets.chat {
            let message = render_message(payload, &self.instance_name, self.active_coin.as_deref());
            let result = self
                .limiter
                .throttle(self.chat.send(target, &message))
                .await;
            if let Err(e) = &result {
                warn!(
                    instance_id = payload.instance_id,
                    event_type = %payload.event_type,
                    symbol = %payload.symbol,
                    "Chat delivery failed: {}",
                    e
                );
            }
            outcomes.push(DeliveryOutcome {
                sink: SinkKind::Chat,
                result,
            });
        }

        if outcomes.is_empty() {
            debug!(instance_id = payload.instance_id, "No notification targets configured");
        }
        outcomes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use parking_lot::Mutex;
    use tokio::time::{sleep, Duration, Instant};
    use tradewatch_core::record::fields;
    use tradewatch_core::{EventType, ExchangeRecord, PayloadContext};
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Default)]
    struct RecordingTransport {
        sent: Mutex<Vec<(Instant, String, String)>>,
        fail: bool,
    }

    #[async_trait]
    impl ChatTransport for RecordingTransport {
        async fn send(&self, target: &ChatTarget, message: &str) -> Result<(), DeliveryError> {
            self.sent
                .lock()
                .push((Instant::now(), target.destination.clone(), message.to_string()));
            if self.fail {
                Err(DeliveryError::Rejected("chat not found".into()))
            } else {
                Ok(())
            }
        }
    }

    fn payload() -> EventPayload {
        let record = ExchangeRecord::new()
            .with(fields::SYMBOL, "XRP/USDT:USDT")
            .with(fields::ID, "o-1")
            .with(fields::STATUS, "open");
        let ctx = PayloadContext {
            instance_id: 1,
            exchange: "bybit",
            strategy: "Grid",
            timestamp: Utc::now(),
        };
        EventPayload::from_record(EventType::NewOrder, &record, &ctx)
    }

    fn chat_instance() -> MonitoredInstance {
        MonitoredInstance::new(1, "Main", "bybit").with_notifications(NotificationTargets {
            chat_token: Some("123:abc".into()),
            chat_destination: Some("-1001".into()),
            ..NotificationTargets::default()
        })
    }

    #[test]
    fn test_resolve_falls_back_to_defaults() {
        let defaults = NotificationConfig {
            default_telegram_bot_token: Some("default-token".into()),
            default_chat_destination: Some("-42".into()),
            default_chat_thread: Some("7".into()),
            ..NotificationConfig::default()
        };
        let own = NotificationTargets {
            chat_destination: Some("-1001".into()),
            ..NotificationTargets::default()
        };

        let targets = DispatchTargets::resolve(&own, &defaults);
        let chat = targets.chat.unwrap();
        assert_eq!(chat.token, "default-token");
        assert_eq!(chat.destination, "-1001");
        assert_eq!(chat.thread.as_deref(), Some("7"));
        assert!(targets.webhook_url.is_none());
    }

    #[test]
    fn test_chat_requires_token_and_destination() {
        let own = NotificationTargets {
            chat_token: Some("t".into()),
            webhook_url: Some("  ".into()),
            ..NotificationTargets::default()
        };
        let targets = DispatchTargets::resolve(&own, &NotificationConfig::default());
        assert!(targets.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_chat_sends_are_spaced_per_instance() {
        let transport = Arc::new(RecordingTransport::default());
        let dispatcher = EventDispatcher::with_transport(
            &chat_instance(),
            &NotificationConfig::default(),
            transport.clone(),
        )
        .unwrap();

        let first = dispatcher.dispatch(&payload()).await;
        sleep(Duration::from_secs(1)).await;
        let second = dispatcher.dispatch(&payload()).await;

        assert!(first[0].is_success() && second[0].is_success());
        let sent = transport.sent.lock();
        assert_eq!(sent.len(), 2);
        assert!(sent[1].0 - sent[0].0 >= Duration::from_secs(5));
        assert!(sent[0].2.contains("New order | Main"));
    }

    #[tokio::test]
    async fn test_outcomes_report_each_sink() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;

        let mut instance = chat_instance();
        instance.notifications.webhook_url = Some(server.uri());
        let transport = Arc::new(RecordingTransport {
            fail: true,
            ..RecordingTransport::default()
        });
        let dispatcher =
            EventDispatcher::with_transport(&instance, &NotificationConfig::default(), transport)
                .unwrap();

        let outcomes = dispatcher.dispatch(&payload()).await;
        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0].sink, SinkKind::Webhook);
        assert_eq!(outcomes[0].activity_type(), "webhook_failed");
        assert!(matches!(outcomes[0].result, Err(DeliveryError::HttpStatus(500))));
        assert_eq!(outcomes[1].activity_type(), "chat_failed");
        assert_eq!(outcomes[1].error_type(), "chat_delivery");
    }

    #[tokio::test]
    async fn test_no_targets_no_outcomes() {
        let instance = MonitoredInstance::new(2, "Quiet", "bitget");
        let dispatcher = EventDispatcher::with_transport(
            &instance,
            &NotificationConfig::default(),
            Arc::new(RecordingTransport::default()),
        )
        .unwrap();
        assert!(dispatcher.dispatch(&payload()).await.is_empty());
    }
}
