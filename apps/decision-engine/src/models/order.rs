//! Order types for the broker edge.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Order side (buy or sell).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderSide {
    /// Buy order.
    Buy,
    /// Sell order.
    Sell,
}

/// Order status in the lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Created locally, not yet acknowledged by a broker.
    Pending,
    /// Accepted by the broker, not yet filled.
    Submitted,
    /// Partially filled.
    PartiallyFilled,
    /// Completely filled.
    Filled,
    /// Rejected by the broker (terminal, no retry).
    Rejected,
    /// Failed on our side (retries exhausted, cancellation, etc.).
    Failed,
    /// Canceled.
    Canceled,
}

impl OrderStatus {
    /// Returns true if the order is in a terminal state.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Filled | Self::Rejected | Self::Failed | Self::Canceled
        )
    }

    /// Returns true if the order is still active at the broker.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        matches!(self, Self::Pending | Self::Submitted | Self::PartiallyFilled)
    }
}

/// Request handed to a broker adapter. Market orders only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    /// Decision this order executes (idempotency key).
    pub decision_id: String,
    /// Instrument to trade.
    pub instrument: String,
    /// Buy or sell.
    pub side: OrderSide,
    /// Quantity in whole shares.
    pub quantity: Decimal,
    /// Price used for sizing; paper brokers fill at this price.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_price: Option<Decimal>,
    /// Take-profit target, mapped to a bracket leg where supported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_target: Option<Decimal>,
    /// Protective stop, mapped to a bracket leg where supported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_loss: Option<Decimal>,
}

/// Broker acknowledgment for a submitted order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderAck {
    /// Broker-assigned order ID.
    pub broker_order_id: String,
    /// Status as reported by the broker.
    pub status: OrderStatus,
    /// Quantity filled so far.
    pub filled_quantity: Decimal,
    /// Average fill price, if any quantity filled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_fill_price: Option<Decimal>,
}

/// Complete order record as tracked by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    /// Engine-internal order ID.
    pub order_id: String,
    /// Decision that produced this order.
    pub decision_id: String,
    /// Run the decision came from.
    pub run_id: String,
    /// Instrument traded.
    pub instrument: String,
    /// Buy or sell.
    pub side: OrderSide,
    /// Requested quantity.
    pub quantity: Decimal,
    /// Current status.
    pub status: OrderStatus,
    /// Broker's ID once acknowledged.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub broker_order_id: Option<String>,
    /// Quantity filled so far.
    pub filled_quantity: Decimal,
    /// Average fill price, if any quantity filled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_fill_price: Option<Decimal>,
    /// Submission attempts that hit a transient failure before this outcome.
    pub retry_count: u32,
    /// Last status detail (broker reason, retry exhaustion, etc.).
    pub status_message: String,
    /// First submission attempt timestamp.
    pub submitted_at: DateTime<Utc>,
    /// Last state change timestamp.
    pub updated_at: DateTime<Utc>,
}
