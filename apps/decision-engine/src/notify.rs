//! Alert notifications.
//!
//! Fire-and-forget by design: a notifier failure is logged and dropped,
//! never propagated into the pipeline or the emergency path.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::NotificationsConfig;

/// Events worth telling a human about.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EngineEvent {
    /// The engine halted itself or was halted by an operator.
    EmergencyStop {
        /// Why.
        reason: String,
    },
    /// An order exhausted retries or was rejected.
    OrderFailed {
        /// Instrument traded.
        instrument: String,
        /// Decision behind the order.
        decision_id: String,
        /// Failure detail.
        reason: String,
    },
    /// A decision was blocked by a hard risk limit.
    DecisionBlocked {
        /// Instrument affected.
        instrument: String,
        /// Blocked decision.
        decision_id: String,
        /// Limits that fired.
        limits: Vec<String>,
    },
    /// A decision is waiting in the manual-approval queue.
    ApprovalPending {
        /// Decision waiting.
        decision_id: String,
        /// Instrument affected.
        instrument: String,
        /// When the request lapses.
        expires_at: DateTime<Utc>,
    },
    /// A pending approval lapsed unreviewed.
    ApprovalExpired {
        /// Decision that lapsed.
        decision_id: String,
        /// Instrument affected.
        instrument: String,
    },
}

impl EngineEvent {
    /// One-line human-readable form, used by webhook payloads.
    #[must_use]
    pub fn summary(&self) -> String {
        match self {
            Self::EmergencyStop { reason } => {
                format!("EMERGENCY STOP: {reason}")
            }
            Self::OrderFailed {
                instrument,
                decision_id,
                reason,
            } => format!("Order failed for {instrument} (decision {decision_id}): {reason}"),
            Self::DecisionBlocked {
                instrument,
                decision_id,
                limits,
            } => format!(
                "Decision {decision_id} for {instrument} blocked by {}",
                limits.join(", ")
            ),
            Self::ApprovalPending {
                decision_id,
                instrument,
                expires_at,
            } => format!(
                "Decision {decision_id} for {instrument} awaits manual approval until {expires_at}"
            ),
            Self::ApprovalExpired {
                decision_id,
                instrument,
            } => format!("Approval for decision {decision_id} ({instrument}) expired unreviewed"),
        }
    }
}

/// Notification sink.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver one event. Must not fail the caller.
    async fn notify(&self, event: &EngineEvent);
}

/// Notifier that writes to the structured log. Always present.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, event: &EngineEvent) {
        match event {
            EngineEvent::EmergencyStop { .. } => {
                tracing::error!(summary = %event.summary(), "Engine alert");
            }
            _ => tracing::warn!(summary = %event.summary(), "Engine alert"),
        }
    }
}

/// Notifier that POSTs a Slack-compatible payload to a webhook.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    /// Notifier targeting the given webhook URL.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[derive(Serialize)]
struct WebhookPayload<'a> {
    text: String,
    #[serde(flatten)]
    event: &'a EngineEvent,
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, event: &EngineEvent) {
        let payload = WebhookPayload {
            text: event.summary(),
            event,
        };
        match self.client.post(&self.url).json(&payload).send().await {
            Ok(response) if response.status().is_success() => {}
            Ok(response) => {
                tracing::warn!(status = %response.status(), "Webhook notification refused");
            }
            Err(error) => {
                tracing::warn!(%error, "Webhook notification failed");
            }
        }
    }
}

/// Delivers every event to each wrapped notifier in turn.
pub struct FanoutNotifier {
    sinks: Vec<Arc<dyn Notifier>>,
}

impl FanoutNotifier {
    /// Fan-out over the given sinks.
    #[must_use]
    pub fn new(sinks: Vec<Arc<dyn Notifier>>) -> Self {
        Self { sinks }
    }
}

#[async_trait]
impl Notifier for FanoutNotifier {
    async fn notify(&self, event: &EngineEvent) {
        for sink in &self.sinks {
            sink.notify(event).await;
        }
    }
}

/// Build the notifier stack from configuration: the log sink always,
/// plus the webhook sink when a URL is set.
#[must_use]
pub fn build_notifier(config: &NotificationsConfig) -> Arc<dyn Notifier> {
    if config.webhook_enabled() {
        Arc::new(FanoutNotifier::new(vec![
            Arc::new(LogNotifier),
            Arc::new(WebhookNotifier::new(config.webhook_url.clone())),
        ]))
    } else {
        Arc::new(LogNotifier)
    }
}
