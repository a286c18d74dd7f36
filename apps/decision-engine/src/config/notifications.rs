//! Notification configuration.

use serde::{Deserialize, Serialize};

/// Where alert events are delivered.
///
/// Events always go to the structured log; a webhook is added when a
/// URL is configured.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotificationsConfig {
    /// Webhook URL for alert delivery (Slack-compatible payload).
    /// Empty disables webhook delivery.
    #[serde(default)]
    pub webhook_url: String,
}

impl NotificationsConfig {
    /// Returns true when a webhook target is configured.
    #[must_use]
    pub fn webhook_enabled(&self) -> bool {
        !self.webhook_url.is_empty()
    }
}
