//! HTTP/JSON control API.
//!
//! Thin operator surface over the engine: status, manual run trigger,
//! safety-level transitions, emergency stop and approval resolution.
//! Every mutation goes through the same engine methods the scheduler
//! and monitor use; the API adds nothing but transport.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};

use crate::broker::BrokerAdapter;
use crate::engine::{Disposition, Engine, EngineError, EngineStatus, RunReport};
use crate::gate::{GateError, GateOutcome, SafetyLevel};
use crate::models::OrderStatus;

/// Shared state for the control API.
pub struct ApiState<B: BrokerAdapter> {
    engine: Arc<Engine<B>>,
}

impl<B: BrokerAdapter> Clone for ApiState<B> {
    fn clone(&self) -> Self {
        Self {
            engine: self.engine.clone(),
        }
    }
}

/// Build the router with every control endpoint mounted.
#[must_use]
pub fn create_router<B: BrokerAdapter + 'static>(engine: Arc<Engine<B>>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/status", get(status::<B>))
        .route("/api/v1/run", post(trigger_run::<B>))
        .route("/api/v1/safety/escalate", post(escalate::<B>))
        .route("/api/v1/safety/de-escalate", post(de_escalate::<B>))
        .route("/api/v1/safety/clear-halt", post(clear_halt::<B>))
        .route("/api/v1/emergency-stop", post(emergency_stop::<B>))
        .route("/api/v1/approvals", post(resolve_approval::<B>))
        .with_state(ApiState { engine })
}

async fn health() -> &'static str {
    "OK"
}

async fn status<B: BrokerAdapter + 'static>(
    State(state): State<ApiState<B>>,
) -> Json<EngineStatus> {
    Json(state.engine.status())
}

async fn trigger_run<B: BrokerAdapter + 'static>(
    State(state): State<ApiState<B>>,
) -> Result<Json<RunReport>, ApiError> {
    let report = state.engine.run_once().await?;
    Ok(Json(report))
}

/// Response for safety-level transitions.
#[derive(Debug, Serialize)]
pub struct LevelResponse {
    /// Level after the transition.
    pub safety_level: SafetyLevel,
}

async fn escalate<B: BrokerAdapter + 'static>(
    State(state): State<ApiState<B>>,
) -> Result<Json<LevelResponse>, ApiError> {
    let safety_level = state.engine.escalate()?;
    Ok(Json(LevelResponse { safety_level }))
}

async fn de_escalate<B: BrokerAdapter + 'static>(
    State(state): State<ApiState<B>>,
) -> Result<Json<LevelResponse>, ApiError> {
    let safety_level = state.engine.de_escalate()?;
    Ok(Json(LevelResponse { safety_level }))
}

async fn clear_halt<B: BrokerAdapter + 'static>(
    State(state): State<ApiState<B>>,
) -> Result<Json<LevelResponse>, ApiError> {
    let safety_level = state.engine.clear_halt()?;
    Ok(Json(LevelResponse { safety_level }))
}

/// Body for the emergency-stop endpoint. An empty object works; the
/// reason defaults.
#[derive(Debug, Serialize, Deserialize)]
pub struct EmergencyStopRequest {
    /// Why the operator pulled the cord.
    #[serde(default)]
    pub reason: Option<String>,
}

async fn emergency_stop<B: BrokerAdapter + 'static>(
    State(state): State<ApiState<B>>,
    Json(request): Json<EmergencyStopRequest>,
) -> Json<LevelResponse> {
    let reason = request
        .reason
        .unwrap_or_else(|| "operator emergency stop".to_string());
    state.engine.emergency_stop(&reason).await;
    Json(LevelResponse {
        safety_level: SafetyLevel::Halted,
    })
}

/// Body for resolving a parked decision.
#[derive(Debug, Serialize, Deserialize)]
pub struct ApprovalRequest {
    /// Parked decision to resolve.
    pub decision_id: String,
    /// True forwards it to execution, false discards it.
    pub approve: bool,
}

/// What became of a resolved approval.
#[derive(Debug, Serialize)]
pub struct ApprovalResponse {
    /// Decision that was resolved.
    pub decision_id: String,
    /// Whether the operator approved it.
    pub approved: bool,
    /// Gate outcome for an approved decision.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disposition: Option<Disposition>,
    /// Terminal order status when the decision executed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_status: Option<OrderStatus>,
}

async fn resolve_approval<B: BrokerAdapter + 'static>(
    State(state): State<ApiState<B>>,
    Json(request): Json<ApprovalRequest>,
) -> Result<Json<ApprovalResponse>, ApiError> {
    let outcome = state
        .engine
        .submit_approval(&request.decision_id, request.approve)
        .await?;
    let approved = outcome.is_some();
    let (disposition, order_status) = match outcome {
        None => (None, None),
        Some(GateOutcome::Executed(order)) => (Some(Disposition::Executed), Some(order.status)),
        Some(GateOutcome::SimulatedOnly) => (Some(Disposition::Simulated), None),
        Some(GateOutcome::RefusedHalted) => (Some(Disposition::Refused), None),
        Some(GateOutcome::Parked { .. }) => (Some(Disposition::Parked), None),
        Some(GateOutcome::Held) => (Some(Disposition::Held), None),
    };
    Ok(Json(ApprovalResponse {
        decision_id: request.decision_id,
        approved,
        disposition,
        order_status,
    }))
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

/// API error carrying the HTTP status it maps to.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl From<GateError> for ApiError {
    fn from(error: GateError) -> Self {
        let status = match &error {
            GateError::Halted { .. }
            | GateError::AtCeiling { .. }
            | GateError::AtFloor { .. }
            | GateError::NotHalted
            | GateError::DuplicateDecision { .. } => StatusCode::CONFLICT,
            GateError::ApprovalNotFound { .. } => StatusCode::NOT_FOUND,
            GateError::ApprovalExpired { .. } => StatusCode::GONE,
            GateError::Journal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: error.to_string(),
        }
    }
}

impl From<EngineError> for ApiError {
    fn from(error: EngineError) -> Self {
        match error {
            EngineError::Gate(gate) => gate.into(),
            EngineError::Broker(broker) => Self {
                status: StatusCode::SERVICE_UNAVAILABLE,
                message: broker.to_string(),
            },
            other => Self {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                message: other.to_string(),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        (
            self.status,
            Json(ErrorBody {
                error: self.message,
            }),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use axum::body::Body;
    use axum::http::Request;
    use rust_decimal_macros::dec;
    use tokio_util::sync::CancellationToken;
    use tower::ServiceExt;

    use crate::broker::PaperBroker;
    use crate::config::{AnalystsConfig, Config, MarketDataConfig, SafetyConfig, SchedulerConfig};
    use crate::journal::{Journal, MemoryJournal};
    use crate::marketdata::{MarketData, StaticMarketData};
    use crate::notify::{LogNotifier, Notifier};

    use super::*;

    fn test_config(level: SafetyLevel) -> Config {
        let mut series = HashMap::new();
        series.insert(
            "AAPL".to_string(),
            vec![dec!(100), dec!(101), dec!(102), dec!(103)],
        );
        Config {
            safety: SafetyConfig {
                initial_level: level,
                approval_expiry_secs: 600,
            },
            scheduler: SchedulerConfig {
                run_interval_secs: 60,
                instruments: vec!["AAPL".to_string()],
                market_hours_only: false,
            },
            analysts: AnalystsConfig {
                enabled: vec!["momentum".to_string()],
                lookback: 4,
                ..AnalystsConfig::default()
            },
            market_data: MarketDataConfig { series },
            ..Config::default()
        }
    }

    fn make_app(level: SafetyLevel) -> (Router, Arc<Engine<PaperBroker>>) {
        let config = test_config(level);
        let data = Arc::new(StaticMarketData::from_config(&config.market_data));
        let engine = Arc::new(
            Engine::new(
                config,
                Arc::new(PaperBroker::new(dec!(100_000))),
                data as Arc<dyn MarketData>,
                Arc::new(MemoryJournal::new()) as Arc<dyn Journal>,
                Arc::new(LogNotifier) as Arc<dyn Notifier>,
                CancellationToken::new(),
            )
            .unwrap(),
        );
        (create_router(engine.clone()), engine)
    }

    async fn send(app: Router, method: &str, uri: &str, body: Option<String>) -> (StatusCode, serde_json::Value) {
        let request = match body {
            Some(json) => Request::builder()
                .method(method)
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(json))
                .unwrap(),
            None => Request::builder()
                .method(method)
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        };
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::String(
                String::from_utf8_lossy(&bytes).to_string(),
            ))
        };
        (status, value)
    }

    #[tokio::test]
    async fn test_health() {
        let (app, _engine) = make_app(SafetyLevel::Simulated);
        let (status, body) = send(app, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, serde_json::Value::String("OK".to_string()));
    }

    #[tokio::test]
    async fn test_status_reports_the_level() {
        let (app, _engine) = make_app(SafetyLevel::Simulated);
        let (status, body) = send(app, "GET", "/api/v1/status", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["safety_level"], "SIMULATED");
        assert_eq!(body["broker"], "paper");
        assert_eq!(body["analysts"][0], "momentum");
    }

    #[tokio::test]
    async fn test_run_endpoint_returns_the_report() {
        let (app, _engine) = make_app(SafetyLevel::PaperBroker);
        let (status, body) = send(app, "POST", "/api/v1/run", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["outcome"], "SUCCESS");
        assert_eq!(body["results"][0]["instrument"], "AAPL");
        assert_eq!(body["results"][0]["disposition"], "EXECUTED");
        assert_eq!(body["results"][0]["order_status"], "FILLED");
    }

    #[tokio::test]
    async fn test_escalation_walks_the_ladder_and_hits_the_ceiling() {
        let (app, _engine) = make_app(SafetyLevel::Simulated);

        for expected in ["PAPER_BROKER", "MANUAL_APPROVAL", "AUTO_TRADING"] {
            let (status, body) =
                send(app.clone(), "POST", "/api/v1/safety/escalate", None).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["safety_level"], expected);
        }

        let (status, body) = send(app, "POST", "/api/v1/safety/escalate", None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(body["error"].as_str().unwrap().contains("highest"));
    }

    #[tokio::test]
    async fn test_de_escalation_hits_the_floor() {
        let (app, _engine) = make_app(SafetyLevel::Simulated);
        let (status, body) = send(app, "POST", "/api/v1/safety/de-escalate", None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(body["error"].as_str().unwrap().contains("lowest"));
    }

    #[tokio::test]
    async fn test_emergency_stop_and_clear_halt() {
        let (app, engine) = make_app(SafetyLevel::PaperBroker);

        // Clearing without a halt is refused.
        let (status, _body) = send(app.clone(), "POST", "/api/v1/safety/clear-halt", None).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, body) = send(
            app.clone(),
            "POST",
            "/api/v1/emergency-stop",
            Some(r#"{"reason":"fat finger"}"#.to_string()),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["safety_level"], "HALTED");
        assert_eq!(engine.status().halt_reason.as_deref(), Some("fat finger"));

        // Escalation is absorbed by the halt.
        let (status, _body) = send(app.clone(), "POST", "/api/v1/safety/escalate", None).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, body) = send(app, "POST", "/api/v1/safety/clear-halt", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["safety_level"], "SIMULATED");
    }

    #[tokio::test]
    async fn test_unknown_approval_is_not_found() {
        let (app, _engine) = make_app(SafetyLevel::ManualApproval);
        let (status, body) = send(
            app,
            "POST",
            "/api/v1/approvals",
            Some(r#"{"decision_id":"nope","approve":true}"#.to_string()),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].as_str().unwrap().contains("nope"));
    }

    #[tokio::test]
    async fn test_approval_via_api_executes_the_order() {
        let (app, engine) = make_app(SafetyLevel::ManualApproval);

        let report = engine.run_once().await.unwrap();
        let decision_id = report.results[0].decision_id.clone();

        let (status, body) = send(
            app,
            "POST",
            "/api/v1/approvals",
            Some(format!(
                r#"{{"decision_id":"{decision_id}","approve":true}}"#
            )),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["approved"], true);
        assert_eq!(body["disposition"], "EXECUTED");
        assert_eq!(body["order_status"], "FILLED");
    }

    #[tokio::test]
    async fn test_lapsed_approval_is_gone() {
        let (app, engine) = {
            let mut config = test_config(SafetyLevel::ManualApproval);
            config.safety.approval_expiry_secs = 0;
            let data = Arc::new(StaticMarketData::from_config(&config.market_data));
            let engine = Arc::new(
                Engine::new(
                    config,
                    Arc::new(PaperBroker::new(dec!(100_000))),
                    data as Arc<dyn MarketData>,
                    Arc::new(MemoryJournal::new()) as Arc<dyn Journal>,
                    Arc::new(LogNotifier) as Arc<dyn Notifier>,
                    CancellationToken::new(),
                )
                .unwrap(),
            );
            (create_router(engine.clone()), engine)
        };

        let report = engine.run_once().await.unwrap();
        let decision_id = report.results[0].decision_id.clone();

        let (status, _body) = send(
            app,
            "POST",
            "/api/v1/approvals",
            Some(format!(
                r#"{{"decision_id":"{decision_id}","approve":true}}"#
            )),
        )
        .await;
        assert_eq!(status, StatusCode::GONE);
    }
}
