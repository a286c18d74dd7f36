//! Alpaca REST broker adapter.
//!
//! Single-shot requests only: retry scheduling belongs to the order
//! executor, so this adapter's job is faithful error mapping into
//! [`BrokerError`]. The decision ID is forwarded as Alpaca's
//! `client_order_id`, which makes duplicate submissions fail broker-side
//! as well.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::config::{BrokerConfig, Environment};
use crate::models::{
    AccountSnapshot, MarketClock, OrderAck, OrderRequest, OrderSide, OrderStatus, Position,
};

use super::{BrokerAdapter, BrokerError};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Alpaca trading API adapter.
#[derive(Debug, Clone)]
pub struct AlpacaBroker {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    api_secret: String,
    environment: Environment,
}

impl AlpacaBroker {
    /// Build an adapter from broker configuration.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Auth`] when credentials are missing, or a
    /// transport error if the HTTP client cannot be constructed.
    pub fn new(config: &BrokerConfig) -> Result<Self, BrokerError> {
        if config.api_key.is_empty() || config.api_secret.is_empty() {
            return Err(BrokerError::Auth);
        }

        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| BrokerError::Transport(e.to_string()))?;

        if config.environment.is_live() {
            tracing::warn!("Alpaca adapter bound to the LIVE environment; orders use real money");
        }

        Ok(Self {
            client,
            base_url: config.resolved_base_url(),
            api_key: config.api_key.clone(),
            api_secret: config.api_secret.clone(),
            environment: config.environment,
        })
    }

    fn authed(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder
            .header("APCA-API-KEY-ID", &self.api_key)
            .header("APCA-API-SECRET-KEY", &self.api_secret)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, BrokerError> {
        let url = format!("{}{path}", self.base_url);
        let response = self
            .authed(self.client.get(&url))
            .send()
            .await
            .map_err(|e| BrokerError::Transport(e.to_string()))?;
        Self::decode(response).await
    }

    async fn post_json<T: DeserializeOwned, B: Serialize + Sync>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, BrokerError> {
        let url = format!("{}{path}", self.base_url);
        let response = self
            .authed(self.client.post(&url))
            .json(body)
            .send()
            .await
            .map_err(|e| BrokerError::Transport(e.to_string()))?;
        Self::decode(response).await
    }

    async fn delete(&self, path: &str) -> Result<(), BrokerError> {
        let url = format!("{}{path}", self.base_url);
        let response = self
            .authed(self.client.delete(&url))
            .send()
            .await
            .map_err(|e| BrokerError::Transport(e.to_string()))?;

        if response.status().is_success() {
            return Ok(());
        }
        Err(Self::error_from(response).await)
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, BrokerError> {
        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }
        let text = response
            .text()
            .await
            .map_err(|e| BrokerError::Transport(e.to_string()))?;
        serde_json::from_str(&text)
            .map_err(|e| BrokerError::Transport(format!("response decode failed: {e}")))
    }

    async fn error_from(response: reqwest::Response) -> BrokerError {
        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get("Retry-After")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs);

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<AlpacaErrorBody>(&body)
            .map_or(body, |parsed| parsed.message);

        if status == 429 {
            return BrokerError::RateLimited { retry_after };
        }
        BrokerError::from_status(status, &message)
    }
}

#[async_trait]
impl BrokerAdapter for AlpacaBroker {
    fn name(&self) -> &'static str {
        "alpaca"
    }

    async fn submit_order(&self, request: &OrderRequest) -> Result<OrderAck, BrokerError> {
        let api_request = AlpacaOrderRequest::from_request(request);

        tracing::info!(
            instrument = %request.instrument,
            side = ?request.side,
            quantity = %request.quantity,
            environment = %self.environment,
            "Submitting order to Alpaca"
        );

        let order: AlpacaOrder = self.post_json("/v2/orders", &api_request).await?;
        Ok(order.into_ack())
    }

    async fn get_account(&self) -> Result<AccountSnapshot, BrokerError> {
        let account: AlpacaAccount = self.get_json("/v2/account").await?;
        Ok(AccountSnapshot {
            cash: account.cash,
            buying_power: account.buying_power,
            equity: account.equity,
            taken_at: Utc::now(),
        })
    }

    async fn get_positions(&self) -> Result<Vec<Position>, BrokerError> {
        let positions: Vec<AlpacaPosition> = self.get_json("/v2/positions").await?;
        Ok(positions.into_iter().map(AlpacaPosition::into_model).collect())
    }

    async fn cancel_order(&self, broker_order_id: &str) -> Result<(), BrokerError> {
        self.delete(&format!("/v2/orders/{broker_order_id}")).await
    }

    async fn market_clock(&self) -> Result<MarketClock, BrokerError> {
        let clock: AlpacaClock = self.get_json("/v2/clock").await?;
        Ok(MarketClock {
            is_open: clock.is_open,
            next_open: clock.next_open,
            next_close: clock.next_close,
        })
    }

    async fn health_check(&self) -> Result<(), BrokerError> {
        let _: AlpacaAccount = self.get_json("/v2/account").await?;
        Ok(())
    }
}

// ============================================
// Wire types
// ============================================

#[derive(Debug, Serialize)]
struct AlpacaOrderRequest {
    symbol: String,
    qty: String,
    side: &'static str,
    #[serde(rename = "type")]
    order_type: &'static str,
    time_in_force: &'static str,
    client_order_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    order_class: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    take_profit: Option<TakeProfitSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop_loss: Option<StopLossSpec>,
}

#[derive(Debug, Serialize)]
struct TakeProfitSpec {
    limit_price: String,
}

#[derive(Debug, Serialize)]
struct StopLossSpec {
    stop_price: String,
}

impl AlpacaOrderRequest {
    fn from_request(request: &OrderRequest) -> Self {
        let side = match request.side {
            OrderSide::Buy => "buy",
            OrderSide::Sell => "sell",
        };

        // Alpaca accepts attached legs only as a full bracket; a lone
        // target or stop is carried in the journal instead.
        let bracket = match (request.price_target, request.stop_loss) {
            (Some(target), Some(stop)) if request.side == OrderSide::Buy => {
                Some((target, stop))
            }
            _ => None,
        };

        Self {
            symbol: request.instrument.clone(),
            qty: request.quantity.to_string(),
            side,
            order_type: "market",
            time_in_force: "day",
            client_order_id: request.decision_id.clone(),
            order_class: bracket.map(|_| "bracket"),
            take_profit: bracket.map(|(target, _)| TakeProfitSpec {
                limit_price: target.to_string(),
            }),
            stop_loss: bracket.map(|(_, stop)| StopLossSpec {
                stop_price: stop.to_string(),
            }),
        }
    }
}

#[derive(Debug, Deserialize)]
struct AlpacaOrder {
    id: String,
    status: String,
    #[serde(default)]
    filled_qty: Option<Decimal>,
    #[serde(default)]
    filled_avg_price: Option<Decimal>,
}

impl AlpacaOrder {
    fn into_ack(self) -> OrderAck {
        OrderAck {
            status: map_order_status(&self.status),
            filled_quantity: self.filled_qty.unwrap_or(Decimal::ZERO),
            avg_fill_price: self.filled_avg_price,
            broker_order_id: self.id,
        }
    }
}

fn map_order_status(status: &str) -> OrderStatus {
    match status {
        "filled" => OrderStatus::Filled,
        "partially_filled" => OrderStatus::PartiallyFilled,
        "rejected" => OrderStatus::Rejected,
        "canceled" | "expired" => OrderStatus::Canceled,
        // new, accepted, pending_new, held, ...
        _ => OrderStatus::Submitted,
    }
}

#[derive(Debug, Deserialize)]
struct AlpacaAccount {
    cash: Decimal,
    buying_power: Decimal,
    equity: Decimal,
}

#[derive(Debug, Deserialize)]
struct AlpacaPosition {
    symbol: String,
    qty: Decimal,
    avg_entry_price: Decimal,
    market_value: Decimal,
    cost_basis: Decimal,
    unrealized_pl: Decimal,
}

impl AlpacaPosition {
    fn into_model(self) -> Position {
        Position {
            instrument: self.symbol,
            quantity: self.qty,
            avg_entry_price: self.avg_entry_price,
            market_value: self.market_value,
            cost_basis: self.cost_basis,
            unrealized_pnl: self.unrealized_pl,
        }
    }
}

#[derive(Debug, Deserialize)]
struct AlpacaClock {
    is_open: bool,
    #[serde(default)]
    next_open: Option<DateTime<Utc>>,
    #[serde(default)]
    next_close: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct AlpacaErrorBody {
    message: String,
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn adapter_for(server: &MockServer) -> AlpacaBroker {
        let config = BrokerConfig {
            kind: crate::config::BrokerKind::Alpaca,
            api_key: "key-id".to_string(),
            api_secret: "key-secret".to_string(),
            base_url: Some(server.uri()),
            ..Default::default()
        };
        AlpacaBroker::new(&config).unwrap()
    }

    fn order_request() -> OrderRequest {
        OrderRequest {
            decision_id: "decision-123".to_string(),
            instrument: "AAPL".to_string(),
            side: OrderSide::Buy,
            quantity: dec!(10),
            reference_price: Some(dec!(190)),
            price_target: None,
            stop_loss: None,
        }
    }

    #[test]
    fn test_new_requires_credentials() {
        let config = BrokerConfig::default(); // empty key/secret
        assert!(matches!(
            AlpacaBroker::new(&config).unwrap_err(),
            BrokerError::Auth
        ));
    }

    #[tokio::test]
    async fn test_submit_order_maps_ack() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/orders"))
            .and(header("APCA-API-KEY-ID", "key-id"))
            .and(body_partial_json(serde_json::json!({
                "symbol": "AAPL",
                "side": "buy",
                "type": "market",
                "client_order_id": "decision-123",
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "broker-1",
                "status": "filled",
                "filled_qty": "10",
                "filled_avg_price": "190.25"
            })))
            .mount(&server)
            .await;

        let ack = adapter_for(&server)
            .submit_order(&order_request())
            .await
            .unwrap();
        assert_eq!(ack.broker_order_id, "broker-1");
        assert_eq!(ack.status, OrderStatus::Filled);
        assert_eq!(ack.filled_quantity, dec!(10));
        assert_eq!(ack.avg_fill_price, Some(dec!(190.25)));
    }

    #[tokio::test]
    async fn test_rejection_is_terminal() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/orders"))
            .respond_with(ResponseTemplate::new(422).set_body_json(serde_json::json!({
                "code": 40310000,
                "message": "insufficient buying power"
            })))
            .mount(&server)
            .await;

        let err = adapter_for(&server)
            .submit_order(&order_request())
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::Rejected { ref reason } if reason.contains("buying power")));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_outage_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/orders"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = adapter_for(&server)
            .submit_order(&order_request())
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::Unavailable { status: 503 }));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_rate_limit_carries_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/orders"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "3"))
            .mount(&server)
            .await;

        let err = adapter_for(&server)
            .submit_order(&order_request())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BrokerError::RateLimited {
                retry_after: Some(d)
            } if d == Duration::from_secs(3)
        ));
    }

    #[tokio::test]
    async fn test_account_and_positions_parse() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/account"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "cash": "25000.50",
                "buying_power": "50000",
                "equity": "31000.25"
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v2/positions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([{
                "symbol": "AAPL",
                "qty": "30",
                "avg_entry_price": "180",
                "market_value": "5700",
                "cost_basis": "5400",
                "unrealized_pl": "300"
            }])))
            .mount(&server)
            .await;

        let adapter = adapter_for(&server);
        let account = adapter.get_account().await.unwrap();
        assert_eq!(account.cash, dec!(25000.50));
        assert_eq!(account.equity, dec!(31000.25));

        let positions = adapter.get_positions().await.unwrap();
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].instrument, "AAPL");
        assert_eq!(positions[0].market_value, dec!(5700));
    }

    #[tokio::test]
    async fn test_market_clock_parses() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/clock"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "is_open": false,
                "next_open": "2026-08-26T13:30:00Z",
                "next_close": "2026-08-26T20:00:00Z"
            })))
            .mount(&server)
            .await;

        let clock = adapter_for(&server).market_clock().await.unwrap();
        assert!(!clock.is_open);
        assert!(clock.next_open.is_some());
    }
}
