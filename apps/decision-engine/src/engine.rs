//! Engine wiring and run orchestration.
//!
//! [`Engine`] owns the full stack for one broker binding: analyst
//! pool, risk engine, synthesizer, safety gate, executor and monitor,
//! all sharing one [`SafetyController`] so a halt lands everywhere at
//! once. A run flows strictly one way; the only state that survives a
//! run is the safety level, the approval queue, the idempotency ledger
//! and the peak-equity tracker.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::analysts::AnalystPool;
use crate::broker::{BrokerAdapter, BrokerError};
use crate::config::{Config, ConfigError};
use crate::execution::OrderExecutor;
use crate::gate::{
    ApprovalOutcome, ApprovalQueue, GateError, GateOutcome, PendingApproval, SafetyController,
    SafetyGate, SafetyLevel,
};
use crate::journal::{Journal, JournalError, JournalRecord};
use crate::marketdata::MarketData;
use crate::models::{OrderStatus, RiskVerdict, Signal, TradeAction};
use crate::monitor::RiskMonitor;
use crate::notify::{EngineEvent, Notifier};
use crate::pipeline::{RunContext, RunOutcome, Synthesizer, aggregate_signals};
use crate::risk::{PortfolioSnapshot, RiskEngine};

/// Failures that abort a run or engine construction.
///
/// Per-instrument trouble never surfaces here; analysts degrade to
/// neutral and broker rejections end up inside the order record.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Invalid configuration at construction.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Journal write failed; the run cannot be recorded.
    #[error(transparent)]
    Journal(#[from] JournalError),

    /// Gate dispatch failed.
    #[error(transparent)]
    Gate(#[from] GateError),

    /// The account snapshot could not be fetched.
    #[error("broker unavailable: {0}")]
    Broker(#[from] BrokerError),
}

/// What the gate did with one decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Disposition {
    /// Non-actionable; journaled only.
    Held,
    /// Journaled at SIMULATED, no broker call.
    Simulated,
    /// Waiting in the manual-approval queue.
    Parked,
    /// Reached the broker; see the attached order status.
    Executed,
    /// Refused by the halted gate.
    Refused,
}

/// One instrument's slice of a run report.
#[derive(Debug, Clone, Serialize)]
pub struct InstrumentResult {
    /// Instrument decided on.
    pub instrument: String,
    /// Decision behind this result.
    pub decision_id: String,
    /// Action the synthesizer chose.
    pub action: TradeAction,
    /// Final quantity, zero for holds.
    pub quantity: Decimal,
    /// Risk verdict attached to the decision.
    pub verdict: RiskVerdict,
    /// What the gate did with it.
    pub disposition: Disposition,
    /// Terminal order status when the decision executed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_status: Option<OrderStatus>,
    /// Engine-side order id when the decision executed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
}

/// Summary of one completed (or refused) run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Run identity.
    pub run_id: String,
    /// Folded severity outcome.
    pub outcome: RunOutcome,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// Instruments evaluated.
    pub instruments: Vec<String>,
    /// Analyst invocations that degraded to neutral.
    pub analyst_failures: u32,
    /// Per-instrument results, in allocation order.
    pub results: Vec<InstrumentResult>,
}

/// Point-in-time engine state for the status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    /// Current safety level.
    pub safety_level: SafetyLevel,
    /// Why the engine halted, when it did.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub halt_reason: Option<String>,
    /// Bound broker adapter.
    pub broker: &'static str,
    /// Instruments evaluated each run.
    pub instruments: Vec<String>,
    /// Registered analyst capabilities.
    pub analysts: Vec<&'static str>,
    /// Decisions waiting for manual review.
    pub pending_approvals: Vec<PendingApproval>,
    /// Orders acknowledged but not yet terminal.
    pub active_orders: usize,
}

/// The decision engine bound to one broker adapter.
pub struct Engine<B: BrokerAdapter> {
    config: Config,
    broker: Arc<B>,
    data: Arc<dyn MarketData>,
    pool: AnalystPool,
    risk: RiskEngine,
    synthesizer: Synthesizer,
    controller: Arc<SafetyController>,
    approvals: Arc<ApprovalQueue>,
    executor: Arc<OrderExecutor<B>>,
    gate: SafetyGate<B>,
    monitor: Arc<RiskMonitor<B>>,
    journal: Arc<dyn Journal>,
    notifier: Arc<dyn Notifier>,
    peak_equity: Mutex<Decimal>,
    shutdown: CancellationToken,
}

impl<B: BrokerAdapter + 'static> Engine<B> {
    /// Wires the full stack from validated configuration.
    ///
    /// # Errors
    ///
    /// Unknown analyst names and journal read-back failures surface
    /// here; everything else waits for the first run.
    pub fn new(
        config: Config,
        broker: Arc<B>,
        data: Arc<dyn MarketData>,
        journal: Arc<dyn Journal>,
        notifier: Arc<dyn Notifier>,
        shutdown: CancellationToken,
    ) -> Result<Self, EngineError> {
        let pool = AnalystPool::from_config(&config.analysts, data.clone())?;
        let controller = Arc::new(SafetyController::new(config.safety.initial_level));
        let approvals = Arc::new(ApprovalQueue::new(config.safety.approval_expiry_secs));
        let executor = Arc::new(OrderExecutor::new(
            broker.clone(),
            config.retry.to_policy(),
            journal.clone(),
            shutdown.clone(),
        )?);
        let gate = SafetyGate::new(
            controller.clone(),
            approvals.clone(),
            executor.clone(),
            journal.clone(),
            notifier.clone(),
        );
        let monitor = Arc::new(RiskMonitor::new(
            broker.clone(),
            executor.clone(),
            controller.clone(),
            journal.clone(),
            notifier.clone(),
            config.risk_limits.clone(),
            config.monitor.clone(),
        ));
        let risk = RiskEngine::new(config.risk_limits.clone());
        let synthesizer = Synthesizer::new(config.synthesis.clone());

        tracing::info!(
            broker = broker.name(),
            level = %controller.current(),
            instruments = ?config.scheduler.instruments,
            "Engine assembled"
        );

        Ok(Self {
            config,
            broker,
            data,
            pool,
            risk,
            synthesizer,
            controller,
            approvals,
            executor,
            gate,
            monitor,
            journal,
            notifier,
            peak_equity: Mutex::new(Decimal::ZERO),
            shutdown,
        })
    }

    /// The engine's risk monitor, for spawning its loop.
    #[must_use]
    pub fn monitor(&self) -> Arc<RiskMonitor<B>> {
        self.monitor.clone()
    }

    /// One full pipeline run over the configured instruments.
    ///
    /// # Errors
    ///
    /// Journal writes and the account snapshot must succeed; analyst
    /// and broker trouble degrade inside the run instead.
    pub async fn run_once(&self) -> Result<RunReport, EngineError> {
        self.sweep_expired_approvals().await?;

        let instruments = self.config.scheduler.instruments.clone();
        let ctx = RunContext::new(instruments);
        let run_id = ctx.run_id().to_string();

        if self.controller.current().is_halted() {
            tracing::warn!(%run_id, "Run refused: engine is halted");
            let report = RunReport {
                run_id: run_id.clone(),
                outcome: RunOutcome::HaltedRefusal,
                started_at: ctx.started_at(),
                instruments: ctx.instruments().to_vec(),
                analyst_failures: 0,
                results: vec![],
            };
            self.journal_run(&report)?;
            return Ok(report);
        }

        tracing::info!(%run_id, instruments = ?ctx.instruments(), "Run started");

        let (signals, analyst_failures) = self.pool.fan_out(&ctx).await;
        let prices = self.reference_prices(ctx.instruments()).await;
        let snapshot = self.portfolio_snapshot().await?;

        let mut by_instrument: HashMap<String, Vec<Signal>> = HashMap::new();
        for signal in signals {
            by_instrument
                .entry(signal.instrument.clone())
                .or_default()
                .push(signal);
        }
        let opinions = ctx
            .instruments()
            .iter()
            .map(|instrument| {
                aggregate_signals(
                    instrument.clone(),
                    by_instrument.remove(instrument).unwrap_or_default(),
                )
            })
            .collect();

        let decisions = self
            .synthesizer
            .synthesize(&run_id, opinions, &prices, &snapshot, &self.risk);

        let mut outcome = if analyst_failures > 0 {
            RunOutcome::PartialFailure
        } else {
            RunOutcome::Success
        };
        let mut results = Vec::with_capacity(decisions.len());
        for decision in &decisions {
            self.journal.append(&JournalRecord::DecisionMade {
                decision: decision.clone(),
                recorded_at: Utc::now(),
            })?;
            if decision.verdict.is_block() {
                outcome = outcome.max(RunOutcome::BlockedByRisk);
                self.notifier
                    .notify(&EngineEvent::DecisionBlocked {
                        instrument: decision.instrument.clone(),
                        decision_id: decision.decision_id.clone(),
                        limits: decision.breaches.iter().map(|b| b.limit.clone()).collect(),
                    })
                    .await;
            }

            let mut result = InstrumentResult {
                instrument: decision.instrument.clone(),
                decision_id: decision.decision_id.clone(),
                action: decision.action,
                quantity: decision.quantity,
                verdict: decision.verdict,
                disposition: Disposition::Held,
                order_status: None,
                order_id: None,
            };
            match self.gate.dispatch(decision).await? {
                GateOutcome::Held => {}
                GateOutcome::SimulatedOnly => result.disposition = Disposition::Simulated,
                GateOutcome::Parked { .. } => result.disposition = Disposition::Parked,
                GateOutcome::Executed(order) => {
                    if matches!(order.status, OrderStatus::Rejected | OrderStatus::Failed) {
                        outcome = outcome.max(RunOutcome::PartialFailure);
                    }
                    result.disposition = Disposition::Executed;
                    result.order_status = Some(order.status);
                    result.order_id = Some(order.order_id);
                }
                GateOutcome::RefusedHalted => {
                    // A monitor halt can land mid-run.
                    outcome = outcome.max(RunOutcome::HaltedRefusal);
                    result.disposition = Disposition::Refused;
                }
            }
            results.push(result);
        }

        let report = RunReport {
            run_id: run_id.clone(),
            outcome,
            started_at: ctx.started_at(),
            instruments: ctx.instruments().to_vec(),
            analyst_failures,
            results,
        };
        self.journal_run(&report)?;
        tracing::info!(
            %run_id,
            outcome = %report.outcome,
            decisions = report.results.len(),
            analyst_failures,
            "Run completed"
        );
        Ok(report)
    }

    /// Scheduled runs until shutdown. The interval keeps ticking while
    /// halted; each refused run is journaled like any other.
    pub async fn run_continuous(&self) {
        let mut interval =
            tokio::time::interval(Duration::from_secs(self.config.scheduler.run_interval_secs));
        tracing::info!(
            interval_secs = self.config.scheduler.run_interval_secs,
            market_hours_only = self.config.scheduler.market_hours_only,
            "Scheduler started"
        );
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if self.config.scheduler.market_hours_only && !self.market_open().await {
                        tracing::debug!("Market closed, skipping scheduled run");
                        continue;
                    }
                    if let Err(error) = self.run_once().await {
                        tracing::error!(%error, "Scheduled run failed");
                    }
                }
                () = self.shutdown.cancelled() => {
                    tracing::info!("Scheduler shutting down");
                    break;
                }
            }
        }
    }

    /// Resolve a parked decision.
    ///
    /// Approval forwards to execution under the current level and the
    /// gate's outcome comes back; rejection discards the decision and
    /// returns `None`.
    ///
    /// # Errors
    ///
    /// Unknown or lapsed decision ids, journal failures, and the
    /// dispatch errors of [`SafetyGate::dispatch_approved`].
    pub async fn submit_approval(
        &self,
        decision_id: &str,
        approve: bool,
    ) -> Result<Option<GateOutcome>, GateError> {
        let resolution = self.approvals.resolve(decision_id, approve)?;
        self.journal.append(&JournalRecord::ApprovalResolved {
            decision_id: decision_id.to_string(),
            approved: matches!(resolution, ApprovalOutcome::Approved(_)),
            recorded_at: Utc::now(),
        })?;
        match resolution {
            ApprovalOutcome::Approved(decision) => {
                tracing::info!(%decision_id, "Decision approved, forwarding to the gate");
                Ok(Some(self.gate.dispatch_approved(&decision).await?))
            }
            ApprovalOutcome::Rejected(decision) => {
                tracing::info!(
                    %decision_id,
                    instrument = %decision.instrument,
                    "Decision rejected by operator"
                );
                Ok(None)
            }
        }
    }

    /// Move the safety level one rung up.
    ///
    /// # Errors
    ///
    /// See [`SafetyController::escalate`].
    pub fn escalate(&self) -> Result<SafetyLevel, GateError> {
        self.controller.escalate()
    }

    /// Move the safety level one rung down.
    ///
    /// # Errors
    ///
    /// See [`SafetyController::de_escalate`].
    pub fn de_escalate(&self) -> Result<SafetyLevel, GateError> {
        self.controller.de_escalate()
    }

    /// Clear an engaged halt; the engine re-enters at SIMULATED.
    ///
    /// # Errors
    ///
    /// [`GateError::NotHalted`] when no halt is engaged.
    pub fn clear_halt(&self) -> Result<SafetyLevel, GateError> {
        let level = self.controller.clear_halt()?;
        self.journal.append(&JournalRecord::HaltCleared {
            recorded_at: Utc::now(),
        })?;
        Ok(level)
    }

    /// Operator-triggered emergency stop, same path the monitor takes.
    pub async fn emergency_stop(&self, reason: &str) {
        self.monitor.emergency_stop(reason).await;
    }

    /// Current engine state for operators.
    #[must_use]
    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            safety_level: self.controller.current(),
            halt_reason: self.controller.halt_reason(),
            broker: self.broker.name(),
            instruments: self.config.scheduler.instruments.clone(),
            analysts: self.pool.analyst_names(),
            pending_approvals: self.approvals.pending(),
            active_orders: self.executor.active_order_count(),
        }
    }

    async fn sweep_expired_approvals(&self) -> Result<(), JournalError> {
        for decision in self.approvals.sweep_expired() {
            tracing::warn!(
                decision_id = %decision.decision_id,
                instrument = %decision.instrument,
                "Parked approval lapsed unreviewed"
            );
            self.journal.append(&JournalRecord::ApprovalExpired {
                decision_id: decision.decision_id.clone(),
                recorded_at: Utc::now(),
            })?;
            self.notifier
                .notify(&EngineEvent::ApprovalExpired {
                    decision_id: decision.decision_id,
                    instrument: decision.instrument,
                })
                .await;
        }
        Ok(())
    }

    /// An unreachable clock counts as closed; skipping a run is safer
    /// than trading blind into an unknown session.
    async fn market_open(&self) -> bool {
        match self.broker.market_clock().await {
            Ok(clock) => clock.is_open,
            Err(error) => {
                tracing::warn!(%error, "Market clock unavailable, treating the market as closed");
                false
            }
        }
    }

    async fn reference_prices(&self, instruments: &[String]) -> HashMap<String, Decimal> {
        let mut prices = HashMap::new();
        for instrument in instruments {
            match self.data.last_price(instrument).await {
                Ok(price) => {
                    prices.insert(instrument.clone(), price);
                }
                Err(error) => {
                    tracing::warn!(%instrument, %error, "No reference price available");
                }
            }
        }
        prices
    }

    async fn portfolio_snapshot(&self) -> Result<PortfolioSnapshot, BrokerError> {
        let account = self.broker.get_account().await?;
        let positions = self.broker.get_positions().await?;
        let prior_peak = {
            let mut peak = self
                .peak_equity
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            *peak = (*peak).max(account.equity);
            *peak
        };
        Ok(PortfolioSnapshot::new(account, positions, prior_peak))
    }

    fn journal_run(&self, report: &RunReport) -> Result<(), JournalError> {
        self.journal.append(&JournalRecord::RunCompleted {
            run_id: report.run_id.clone(),
            outcome: report.outcome,
            instruments: report.instruments.clone(),
            analyst_failures: report.analyst_failures,
            decision_count: report.results.len(),
            recorded_at: Utc::now(),
        })
    }
}
