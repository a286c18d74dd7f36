//! In-process simulated brokerage.
//!
//! Fills every market order immediately at the request's reference
//! price. Backs the PAPER_BROKER safety level and most of the test
//! suite; the live adapter replaces it behind the same trait.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::models::{
    AccountSnapshot, MarketClock, OrderAck, OrderRequest, OrderSide, OrderStatus, Position,
};

use super::{BrokerAdapter, BrokerError};

#[derive(Debug, Clone)]
struct PaperPosition {
    quantity: Decimal,
    avg_entry_price: Decimal,
    last_price: Decimal,
}

#[derive(Debug)]
struct PaperState {
    cash: Decimal,
    positions: HashMap<String, PaperPosition>,
    // broker_order_id -> still active
    orders: HashMap<String, bool>,
}

/// Simulated account with immediate fills.
#[derive(Debug)]
pub struct PaperBroker {
    state: Mutex<PaperState>,
}

impl PaperBroker {
    /// New simulated account with the given starting cash.
    #[must_use]
    pub fn new(starting_cash: Decimal) -> Self {
        Self {
            state: Mutex::new(PaperState {
                cash: starting_cash,
                positions: HashMap::new(),
                orders: HashMap::new(),
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PaperState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn fill_buy(
        state: &mut PaperState,
        instrument: &str,
        quantity: Decimal,
        price: Decimal,
    ) -> Result<(), BrokerError> {
        let cost = quantity * price;
        if cost > state.cash {
            return Err(BrokerError::Rejected {
                reason: format!("insufficient buying power: need {cost}, have {}", state.cash),
            });
        }

        state.cash -= cost;
        let entry = state
            .positions
            .entry(instrument.to_string())
            .or_insert(PaperPosition {
                quantity: Decimal::ZERO,
                avg_entry_price: Decimal::ZERO,
                last_price: price,
            });

        let total_cost = entry.avg_entry_price * entry.quantity + cost;
        entry.quantity += quantity;
        if entry.quantity > Decimal::ZERO {
            entry.avg_entry_price = total_cost / entry.quantity;
        }
        entry.last_price = price;
        Ok(())
    }

    fn fill_sell(
        state: &mut PaperState,
        instrument: &str,
        quantity: Decimal,
        price: Decimal,
    ) -> Result<(), BrokerError> {
        let held = state
            .positions
            .get(instrument)
            .map_or(Decimal::ZERO, |p| p.quantity);
        if quantity > held {
            return Err(BrokerError::Rejected {
                reason: format!("insufficient position: selling {quantity}, hold {held}"),
            });
        }

        state.cash += quantity * price;
        if let Some(entry) = state.positions.get_mut(instrument) {
            entry.quantity -= quantity;
            entry.last_price = price;
            if entry.quantity.is_zero() {
                state.positions.remove(instrument);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl BrokerAdapter for PaperBroker {
    fn name(&self) -> &'static str {
        "paper"
    }

    async fn submit_order(&self, request: &OrderRequest) -> Result<OrderAck, BrokerError> {
        let price = request
            .reference_price
            .ok_or_else(|| BrokerError::InvalidOrder {
                reason: "paper fills require a reference price".to_string(),
            })?;
        if request.quantity <= Decimal::ZERO {
            return Err(BrokerError::InvalidOrder {
                reason: "quantity must be positive".to_string(),
            });
        }

        let mut state = self.lock();
        match request.side {
            OrderSide::Buy => Self::fill_buy(&mut state, &request.instrument, request.quantity, price)?,
            OrderSide::Sell => {
                Self::fill_sell(&mut state, &request.instrument, request.quantity, price)?;
            }
        }

        let broker_order_id = Uuid::new_v4().to_string();
        state.orders.insert(broker_order_id.clone(), false);

        tracing::debug!(
            instrument = %request.instrument,
            side = ?request.side,
            quantity = %request.quantity,
            price = %price,
            "Paper fill"
        );

        Ok(OrderAck {
            broker_order_id,
            status: OrderStatus::Filled,
            filled_quantity: request.quantity,
            avg_fill_price: Some(price),
        })
    }

    async fn get_account(&self) -> Result<AccountSnapshot, BrokerError> {
        let state = self.lock();
        let position_value: Decimal = state
            .positions
            .values()
            .map(|p| p.quantity * p.last_price)
            .sum();
        Ok(AccountSnapshot {
            cash: state.cash,
            buying_power: state.cash,
            equity: state.cash + position_value,
            taken_at: Utc::now(),
        })
    }

    async fn get_positions(&self) -> Result<Vec<Position>, BrokerError> {
        let state = self.lock();
        Ok(state
            .positions
            .iter()
            .map(|(instrument, p)| {
                let market_value = p.quantity * p.last_price;
                let cost_basis = p.quantity * p.avg_entry_price;
                Position {
                    instrument: instrument.clone(),
                    quantity: p.quantity,
                    avg_entry_price: p.avg_entry_price,
                    market_value,
                    cost_basis,
                    unrealized_pnl: market_value - cost_basis,
                }
            })
            .collect())
    }

    async fn cancel_order(&self, broker_order_id: &str) -> Result<(), BrokerError> {
        let mut state = self.lock();
        match state.orders.get_mut(broker_order_id) {
            Some(active) if *active => {
                *active = false;
                Ok(())
            }
            Some(_) => Err(BrokerError::InvalidOrder {
                reason: "order already in a terminal state".to_string(),
            }),
            None => Err(BrokerError::NotFound(broker_order_id.to_string())),
        }
    }

    async fn market_clock(&self) -> Result<MarketClock, BrokerError> {
        // The simulated market never closes.
        Ok(MarketClock {
            is_open: true,
            next_open: None,
            next_close: None,
        })
    }

    async fn health_check(&self) -> Result<(), BrokerError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    fn buy_request(instrument: &str, quantity: Decimal, price: Decimal) -> OrderRequest {
        OrderRequest {
            decision_id: Uuid::new_v4().to_string(),
            instrument: instrument.to_string(),
            side: OrderSide::Buy,
            quantity,
            reference_price: Some(price),
            price_target: None,
            stop_loss: None,
        }
    }

    #[tokio::test]
    async fn test_buy_then_account_reflects_position() {
        let broker = PaperBroker::new(dec!(10000));
        let ack = broker
            .submit_order(&buy_request("AAPL", dec!(10), dec!(100)))
            .await
            .unwrap();
        assert_eq!(ack.status, OrderStatus::Filled);
        assert_eq!(ack.filled_quantity, dec!(10));

        let account = broker.get_account().await.unwrap();
        assert_eq!(account.cash, dec!(9000));
        assert_eq!(account.equity, dec!(10000));

        let positions = broker.get_positions().await.unwrap();
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].quantity, dec!(10));
        assert_eq!(positions[0].avg_entry_price, dec!(100));
    }

    #[tokio::test]
    async fn test_buy_rejected_when_cash_short() {
        let broker = PaperBroker::new(dec!(500));
        let err = broker
            .submit_order(&buy_request("AAPL", dec!(10), dec!(100)))
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::Rejected { .. }));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_sell_without_position_rejected() {
        let broker = PaperBroker::new(dec!(10000));
        let mut request = buy_request("AAPL", dec!(5), dec!(100));
        request.side = OrderSide::Sell;
        let err = broker.submit_order(&request).await.unwrap_err();
        assert!(matches!(err, BrokerError::Rejected { .. }));
    }

    #[tokio::test]
    async fn test_round_trip_preserves_cash_at_flat_price() {
        let broker = PaperBroker::new(dec!(10000));
        broker
            .submit_order(&buy_request("AAPL", dec!(10), dec!(100)))
            .await
            .unwrap();

        let mut sell = buy_request("AAPL", dec!(10), dec!(100));
        sell.side = OrderSide::Sell;
        broker.submit_order(&sell).await.unwrap();

        let account = broker.get_account().await.unwrap();
        assert_eq!(account.cash, dec!(10000));
        assert!(broker.get_positions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_reference_price_invalid() {
        let broker = PaperBroker::new(dec!(10000));
        let mut request = buy_request("AAPL", dec!(1), dec!(1));
        request.reference_price = None;
        let err = broker.submit_order(&request).await.unwrap_err();
        assert!(matches!(err, BrokerError::InvalidOrder { .. }));
    }

    #[tokio::test]
    async fn test_cancel_unknown_order() {
        let broker = PaperBroker::new(dec!(10000));
        let err = broker.cancel_order("missing").await.unwrap_err();
        assert!(matches!(err, BrokerError::NotFound(_)));
    }
}
