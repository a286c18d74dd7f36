//! Broker adapters and the uniform adapter contract.
//!
//! The engine talks to every brokerage through [`BrokerAdapter`].
//! Failures are split into transient (worth a retry) and terminal
//! (an answer, not an outage); the retry loop keys off that split.

mod alpaca;
mod paper;
mod retry;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{AccountSnapshot, MarketClock, OrderAck, OrderRequest, Position};

pub use alpaca::AlpacaBroker;
pub use paper::PaperBroker;
pub use retry::{BackoffSchedule, RetryPolicy, is_retryable_status};

/// Broker failure taxonomy.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// Network-level failure (timeout, reset, DNS). Transient.
    #[error("Broker transport error: {0}")]
    Transport(String),

    /// Rate limited by the broker. Transient; honor `retry_after` when set.
    #[error("Broker rate limited")]
    RateLimited {
        /// Server-suggested wait before the next attempt.
        retry_after: Option<Duration>,
    },

    /// Broker-side outage (5xx and friends). Transient.
    #[error("Broker unavailable (HTTP {status})")]
    Unavailable {
        /// HTTP status returned.
        status: u16,
    },

    /// The broker understood the order and said no. Terminal.
    #[error("Order rejected: {reason}")]
    Rejected {
        /// Broker-supplied rejection reason.
        reason: String,
    },

    /// The order itself is malformed. Terminal.
    #[error("Invalid order: {reason}")]
    InvalidOrder {
        /// What was wrong with it.
        reason: String,
    },

    /// Credentials refused. Terminal.
    #[error("Broker authentication failed")]
    Auth,

    /// Referenced entity does not exist at the broker. Terminal.
    #[error("Not found at broker: {0}")]
    NotFound(String),
}

impl BrokerError {
    /// Returns true if a retry could plausibly succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::RateLimited { .. } | Self::Unavailable { .. }
        )
    }

    /// Maps an HTTP status plus response body into the taxonomy.
    #[must_use]
    pub fn from_status(status: u16, body: &str) -> Self {
        match status {
            401 | 403 => Self::Auth,
            404 => Self::NotFound(body.to_string()),
            422 => Self::Rejected {
                reason: body.to_string(),
            },
            429 => Self::RateLimited { retry_after: None },
            s if is_retryable_status(s) => Self::Unavailable { status: s },
            _ => Self::InvalidOrder {
                reason: format!("HTTP {status}: {body}"),
            },
        }
    }
}

/// Uniform brokerage contract.
///
/// One instance is bound per process; the safety gate decides whether a
/// decision ever reaches it.
#[async_trait]
pub trait BrokerAdapter: Send + Sync {
    /// Short adapter name for logs.
    fn name(&self) -> &'static str;

    /// Submit a market order. Must be safe to call once per decision only;
    /// idempotency is enforced by the caller's decision ledger.
    async fn submit_order(&self, request: &OrderRequest) -> Result<OrderAck, BrokerError>;

    /// Fresh account snapshot.
    async fn get_account(&self) -> Result<AccountSnapshot, BrokerError>;

    /// All open positions.
    async fn get_positions(&self) -> Result<Vec<Position>, BrokerError>;

    /// Cancel an order by broker ID. Used by the emergency path.
    async fn cancel_order(&self, broker_order_id: &str) -> Result<(), BrokerError>;

    /// Market session state.
    async fn market_clock(&self) -> Result<MarketClock, BrokerError>;

    /// Cheap connectivity probe for the risk monitor.
    async fn health_check(&self) -> Result<(), BrokerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(BrokerError::Transport("reset".to_string()).is_transient());
        assert!(BrokerError::RateLimited { retry_after: None }.is_transient());
        assert!(BrokerError::Unavailable { status: 503 }.is_transient());

        assert!(
            !BrokerError::Rejected {
                reason: "insufficient buying power".to_string()
            }
            .is_transient()
        );
        assert!(!BrokerError::Auth.is_transient());
        assert!(!BrokerError::NotFound("order".to_string()).is_transient());
    }

    #[test]
    fn test_status_mapping() {
        assert!(matches!(
            BrokerError::from_status(401, ""),
            BrokerError::Auth
        ));
        assert!(matches!(
            BrokerError::from_status(422, "rejected"),
            BrokerError::Rejected { .. }
        ));
        assert!(matches!(
            BrokerError::from_status(429, ""),
            BrokerError::RateLimited { .. }
        ));
        assert!(matches!(
            BrokerError::from_status(503, ""),
            BrokerError::Unavailable { status: 503 }
        ));
        assert!(matches!(
            BrokerError::from_status(400, "bad field"),
            BrokerError::InvalidOrder { .. }
        ));
    }
}
