//! Notification delivery: JSON webhooks and rate-limited chat messages.

pub mod chat;
pub mod dispatcher;
pub mod format;
pub mod rate_limit;
pub mod webhook;

pub use chat::{ChatTarget, ChatTransport, TelegramTransport};
pub use dispatcher::{DeliveryOutcome, DispatchTargets, EventDispatcher, SinkKind};
pub use format::render_message;
pub use rate_limit::ChatRateLimiter;
pub use webhook::{WebhookSink, SECRET_HEADER};
