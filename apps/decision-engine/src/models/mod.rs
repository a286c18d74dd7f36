//! Core domain models for the decision engine.
//!
//! These types flow through the whole pipeline: analyst signals in,
//! risk assessments and decisions through the middle, orders and
//! account state at the broker edge.

mod account;
mod assessment;
mod decision;
mod order;
mod signal;

pub use account::{AccountSnapshot, MarketClock, Position};
pub use assessment::{LimitBreach, RiskAssessment, RiskVerdict};
pub use decision::{Decision, SignalSummary, TradeAction};
pub use order::{Order, OrderAck, OrderRequest, OrderSide, OrderStatus};
pub use signal::{Signal, Stance};
