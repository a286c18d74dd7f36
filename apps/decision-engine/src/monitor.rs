//! Independent risk monitor.
//!
//! Runs on its own cadence beside the decision pipeline and watches the
//! account as it actually is, not as a proposed trade would leave it.
//! Soft limit breaches become journaled alerts; hard breaches take the
//! emergency path: halt the engine, sweep active orders, alert.
//!
//! A monitor that cannot see the account cannot vouch for it. Fetch
//! failures count consecutively, and at the configured threshold the
//! monitor halts on the assumption that an unverifiable book is an
//! unsafe one. Clean cycles reset the count.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;
use tokio_util::sync::CancellationToken;

use crate::broker::BrokerAdapter;
use crate::config::{MonitorConfig, RiskLimitsConfig};
use crate::execution::OrderExecutor;
use crate::gate::SafetyController;
use crate::journal::{Journal, JournalRecord};
use crate::models::LimitBreach;
use crate::notify::{EngineEvent, Notifier};
use crate::risk::{PortfolioSnapshot, limits};

#[derive(Debug)]
struct MonitorState {
    consecutive_failures: u32,
    peak_equity: Decimal,
    equity_window: VecDeque<Decimal>,
}

/// Watches the live account and halts the engine when a hard limit or
/// a run of unverifiable cycles says automation must stop.
pub struct RiskMonitor<B: BrokerAdapter> {
    broker: Arc<B>,
    executor: Arc<OrderExecutor<B>>,
    controller: Arc<SafetyController>,
    journal: Arc<dyn Journal>,
    notifier: Arc<dyn Notifier>,
    limits: RiskLimitsConfig,
    config: MonitorConfig,
    state: Mutex<MonitorState>,
}

impl<B: BrokerAdapter + 'static> RiskMonitor<B> {
    /// Monitor over the given broker, sharing the executor and safety
    /// controller with the pipeline so a halt lands everywhere at once.
    #[must_use]
    pub fn new(
        broker: Arc<B>,
        executor: Arc<OrderExecutor<B>>,
        controller: Arc<SafetyController>,
        journal: Arc<dyn Journal>,
        notifier: Arc<dyn Notifier>,
        limits: RiskLimitsConfig,
        config: MonitorConfig,
    ) -> Self {
        Self {
            broker,
            executor,
            controller,
            journal,
            notifier,
            limits,
            config,
            state: Mutex::new(MonitorState {
                consecutive_failures: 0,
                peak_equity: Decimal::ZERO,
                equity_window: VecDeque::new(),
            }),
        }
    }

    /// Run the monitoring loop until shutdown is signaled.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(Duration::from_secs(self.config.interval_secs));

        tracing::info!(
            interval_secs = self.config.interval_secs,
            failure_threshold = self.config.failure_threshold,
            min_cash = %self.config.min_cash,
            max_window_drawdown = %self.config.max_window_drawdown,
            "Risk monitor started"
        );

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.cycle().await;
                }
                () = shutdown.cancelled() => {
                    tracing::info!("Risk monitor shutting down");
                    break;
                }
            }
        }
    }

    /// One monitoring pass: fetch the account, refresh the trackers,
    /// evaluate every limit against the live book.
    pub async fn cycle(&self) {
        if self.controller.current().is_halted() {
            // Nothing left to protect; only an operator clear changes that.
            return;
        }

        let account = match self.broker.get_account().await {
            Ok(account) => account,
            Err(error) => {
                self.record_cycle_failure(&error.to_string()).await;
                return;
            }
        };
        let positions = match self.broker.get_positions().await {
            Ok(positions) => positions,
            Err(error) => {
                self.record_cycle_failure(&error.to_string()).await;
                return;
            }
        };

        let (snapshot, window_high) = {
            let mut state = self.lock_state();
            state.consecutive_failures = 0;
            state.equity_window.push_back(account.equity);
            while state.equity_window.len() > self.config.equity_window {
                state.equity_window.pop_front();
            }
            let window_high = state
                .equity_window
                .iter()
                .copied()
                .max()
                .unwrap_or(account.equity);
            let snapshot = PortfolioSnapshot::new(account, positions, state.peak_equity);
            state.peak_equity = snapshot.peak_equity;
            (snapshot, window_high)
        };

        if let Some(breach) = limits::drawdown_guard(&snapshot, &self.limits) {
            self.emergency_stop(&breach.detail).await;
            return;
        }

        if snapshot.account.cash < self.config.min_cash {
            self.emergency_stop(&format!(
                "cash {} below the {} liquidity floor",
                snapshot.account.cash, self.config.min_cash
            ))
            .await;
            return;
        }

        // The current sample is in the window, so the slide is never
        // negative and a single-sample window is trivially clean.
        if window_high > Decimal::ZERO {
            let slide = (window_high - snapshot.account.equity) / window_high;
            if slide > self.config.max_window_drawdown {
                self.emergency_stop(&format!(
                    "equity {} slid {slide:.4} from the trailing window high {window_high}",
                    snapshot.account.equity
                ))
                .await;
                return;
            }
        }

        self.raise_soft_alerts(&snapshot);
    }

    /// Zero-delta soft checks over the held book. Breaches alert but
    /// never halt; the book got here through the gate, and unwinding
    /// it is an operator call.
    fn raise_soft_alerts(&self, snapshot: &PortfolioSnapshot) {
        let mut breaches: Vec<LimitBreach> = Vec::new();
        for position in &snapshot.positions {
            breaches.extend(limits::position_weight(
                snapshot,
                &position.instrument,
                Decimal::ZERO,
                &self.limits,
            ));
            breaches.extend(limits::sector_weight(
                snapshot,
                &position.instrument,
                Decimal::ZERO,
                &self.limits,
            ));
        }
        if let Some(first) = snapshot.positions.first() {
            breaches.extend(limits::concentration(
                snapshot,
                &first.instrument,
                Decimal::ZERO,
                &self.limits,
            ));
        }

        // Sector checks repeat once per position in the sector.
        let mut seen = HashSet::new();
        breaches.retain(|breach| seen.insert(breach.detail.clone()));

        for breach in breaches {
            let message = format!("{}: {}", breach.limit, breach.detail);
            tracing::warn!(limit = %breach.limit, detail = %breach.detail, "Portfolio limit breached");
            if let Err(error) = self.journal.append(&JournalRecord::Alert {
                message,
                recorded_at: Utc::now(),
            }) {
                tracing::error!(%error, "Failed to journal a portfolio alert");
            }
        }
    }

    /// Halt the engine, sweep active orders, and raise the alarm.
    ///
    /// Safe to call from anywhere; only the call that actually engages
    /// the halt performs the sweep and notification.
    pub async fn emergency_stop(&self, reason: &str) {
        if !self.controller.force_halt(reason) {
            tracing::debug!(%reason, "Emergency stop requested while already halted");
            return;
        }

        let canceled = self.executor.cancel_active_orders().await;
        tracing::error!(%reason, canceled, "Emergency stop engaged");

        if let Err(error) = self.journal.append(&JournalRecord::HaltEngaged {
            reason: reason.to_string(),
            recorded_at: Utc::now(),
        }) {
            tracing::error!(%error, "Failed to journal the halt");
        }
        self.notifier
            .notify(&EngineEvent::EmergencyStop {
                reason: reason.to_string(),
            })
            .await;
    }

    async fn record_cycle_failure(&self, error: &str) {
        let failures = {
            let mut state = self.lock_state();
            state.consecutive_failures += 1;
            state.consecutive_failures
        };
        tracing::warn!(
            %error,
            failures,
            threshold = self.config.failure_threshold,
            "Risk monitor cycle failed"
        );
        if failures >= self.config.failure_threshold {
            self.emergency_stop(&format!(
                "cannot verify account state after {failures} consecutive monitor failures: {error}"
            ))
            .await;
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, MonitorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    use async_trait::async_trait;
    use rust_decimal_macros::dec;

    use crate::broker::{BrokerError, RetryPolicy};
    use crate::gate::SafetyLevel;
    use crate::journal::MemoryJournal;
    use crate::models::{
        AccountSnapshot, Decision, MarketClock, OrderAck, OrderRequest, OrderStatus, Position,
        RiskVerdict, TradeAction,
    };

    use super::*;

    /// Broker whose account state the test scripts, with failure and
    /// cancel switches.
    struct ScriptedBroker {
        account: Mutex<AccountSnapshot>,
        positions: Mutex<Vec<Position>>,
        fail_fetches: AtomicBool,
        account_calls: AtomicU32,
        cancels: AtomicU32,
    }

    impl ScriptedBroker {
        fn with_equity(equity: Decimal) -> Self {
            Self {
                account: Mutex::new(AccountSnapshot {
                    cash: equity,
                    buying_power: equity,
                    equity,
                    taken_at: Utc::now(),
                }),
                positions: Mutex::new(vec![]),
                fail_fetches: AtomicBool::new(false),
                account_calls: AtomicU32::new(0),
                cancels: AtomicU32::new(0),
            }
        }

        fn set_equity(&self, equity: Decimal) {
            let mut account = self.account.lock().unwrap();
            account.cash = equity;
            account.buying_power = equity;
            account.equity = equity;
        }

        fn set_cash(&self, cash: Decimal) {
            self.account.lock().unwrap().cash = cash;
        }

        fn set_positions(&self, positions: Vec<Position>) {
            *self.positions.lock().unwrap() = positions;
        }
    }

    #[async_trait]
    impl BrokerAdapter for ScriptedBroker {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn submit_order(&self, request: &OrderRequest) -> Result<OrderAck, BrokerError> {
            Ok(OrderAck {
                broker_order_id: format!("bo-{}", request.decision_id),
                status: OrderStatus::Submitted,
                filled_quantity: Decimal::ZERO,
                avg_fill_price: None,
            })
        }

        async fn get_account(&self) -> Result<AccountSnapshot, BrokerError> {
            self.account_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_fetches.load(Ordering::SeqCst) {
                return Err(BrokerError::Transport("connection refused".to_string()));
            }
            Ok(self.account.lock().unwrap().clone())
        }

        async fn get_positions(&self) -> Result<Vec<Position>, BrokerError> {
            if self.fail_fetches.load(Ordering::SeqCst) {
                return Err(BrokerError::Transport("connection refused".to_string()));
            }
            Ok(self.positions.lock().unwrap().clone())
        }

        async fn cancel_order(&self, _broker_order_id: &str) -> Result<(), BrokerError> {
            self.cancels.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn market_clock(&self) -> Result<MarketClock, BrokerError> {
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

    struct RecordingNotifier {
        events: Mutex<Vec<EngineEvent>>,
    }

    impl RecordingNotifier {
        fn new() -> Self {
            Self {
                events: Mutex::new(vec![]),
            }
        }

        fn events(&self) -> Vec<EngineEvent> {
            self.events.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify(&self, event: &EngineEvent) {
            self.events.lock().unwrap().push(event.clone());
        }
    }

    struct Harness {
        broker: Arc<ScriptedBroker>,
        executor: Arc<OrderExecutor<ScriptedBroker>>,
        controller: Arc<SafetyController>,
        journal: Arc<MemoryJournal>,
        notifier: Arc<RecordingNotifier>,
        monitor: RiskMonitor<ScriptedBroker>,
    }

    fn make_harness(broker: ScriptedBroker, config: MonitorConfig) -> Harness {
        let broker = Arc::new(broker);
        let journal = Arc::new(MemoryJournal::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let controller = Arc::new(SafetyController::new(SafetyLevel::PaperBroker));
        let executor = Arc::new(
            OrderExecutor::new(
                broker.clone(),
                RetryPolicy::no_retries(),
                journal.clone() as Arc<dyn Journal>,
                CancellationToken::new(),
            )
            .unwrap(),
        );
        let monitor = RiskMonitor::new(
            broker.clone(),
            executor.clone(),
            controller.clone(),
            journal.clone() as Arc<dyn Journal>,
            notifier.clone() as Arc<dyn Notifier>,
            RiskLimitsConfig::default(),
            config,
        );
        Harness {
            broker,
            executor,
            controller,
            journal,
            notifier,
            monitor,
        }
    }

    fn fast_config() -> MonitorConfig {
        MonitorConfig {
            interval_secs: 1,
            failure_threshold: 3,
            min_cash: dec!(10_000),
            equity_window: 8,
            max_window_drawdown: dec!(0.05),
        }
    }

    fn make_decision(id: &str) -> Decision {
        Decision {
            decision_id: id.to_string(),
            run_id: "r-1".to_string(),
            instrument: "AAPL".to_string(),
            action: TradeAction::Buy,
            quantity: dec!(5),
            notional: dec!(500),
            confidence: dec!(0.8),
            score: dec!(0.4),
            reference_price: Some(dec!(100)),
            price_target: None,
            stop_loss: None,
            signals: vec![],
            verdict: RiskVerdict::Allow,
            breaches: vec![],
            rationale: "test".to_string(),
            created_at: Utc::now(),
        }
    }

    fn position(instrument: &str, market_value: Decimal) -> Position {
        Position {
            instrument: instrument.to_string(),
            quantity: market_value / dec!(100),
            avg_entry_price: dec!(100),
            market_value,
            cost_basis: market_value,
            unrealized_pnl: Decimal::ZERO,
        }
    }

    #[tokio::test]
    async fn test_clean_cycle_leaves_the_engine_running() {
        let harness = make_harness(ScriptedBroker::with_equity(dec!(100_000)), fast_config());

        harness.monitor.cycle().await;

        assert_eq!(harness.controller.current(), SafetyLevel::PaperBroker);
        assert!(harness.notifier.events().is_empty());
        assert!(harness.journal.records().is_empty());
    }

    #[tokio::test]
    async fn test_drawdown_breach_halts_and_sweeps_orders() {
        let harness = make_harness(ScriptedBroker::with_equity(dec!(100_000)), fast_config());

        // An order sits at the venue when the account turns sour.
        let order = harness.executor.execute(&make_decision("d-1")).await.unwrap();
        assert_eq!(order.status, OrderStatus::Submitted);
        assert_eq!(harness.executor.active_order_count(), 1);

        harness.monitor.cycle().await; // seeds the peak at 100k
        harness.broker.set_equity(dec!(80_000)); // 20% drawdown
        harness.monitor.cycle().await;

        assert_eq!(harness.controller.current(), SafetyLevel::Halted);
        assert_eq!(harness.broker.cancels.load(Ordering::SeqCst), 1);
        assert_eq!(harness.executor.active_order_count(), 0);
        assert!(
            harness
                .journal
                .records()
                .iter()
                .any(|r| matches!(r, JournalRecord::HaltEngaged { .. }))
        );
        let events = harness.notifier.events();
        assert!(
            matches!(&events[..], [EngineEvent::EmergencyStop { reason }] if reason.contains("drawdown"))
        );
    }

    #[tokio::test]
    async fn test_liquidity_floor_halts() {
        let harness = make_harness(ScriptedBroker::with_equity(dec!(100_000)), fast_config());

        harness.broker.set_cash(dec!(4_000));
        harness.monitor.cycle().await;

        assert!(harness.controller.current().is_halted());
        assert_eq!(
            harness.controller.halt_reason().unwrap(),
            "cash 4000 below the 10000 liquidity floor"
        );
    }

    #[tokio::test]
    async fn test_window_slide_halts_before_the_peak_guard() {
        let harness = make_harness(ScriptedBroker::with_equity(dec!(100_000)), fast_config());

        harness.monitor.cycle().await;
        // 6% off the window high: under the 15% drawdown limit but over
        // the 5% window limit.
        harness.broker.set_equity(dec!(94_000));
        harness.monitor.cycle().await;

        assert!(harness.controller.current().is_halted());
        assert!(
            harness
                .controller
                .halt_reason()
                .unwrap()
                .contains("trailing window high 100000")
        );
    }

    #[tokio::test]
    async fn test_window_forgets_old_highs() {
        let config = MonitorConfig {
            equity_window: 2,
            ..fast_config()
        };
        let harness = make_harness(ScriptedBroker::with_equity(dec!(100_000)), config);

        harness.monitor.cycle().await;
        harness.broker.set_equity(dec!(97_000));
        harness.monitor.cycle().await;
        harness.broker.set_equity(dec!(94_000));
        // The 100k sample has aged out; 94k vs 97k is ~3.1%.
        harness.monitor.cycle().await;

        assert!(!harness.controller.current().is_halted());
    }

    #[tokio::test]
    async fn test_consecutive_fetch_failures_halt() {
        let harness = make_harness(ScriptedBroker::with_equity(dec!(100_000)), fast_config());
        harness.broker.fail_fetches.store(true, Ordering::SeqCst);

        harness.monitor.cycle().await;
        harness.monitor.cycle().await;
        assert!(!harness.controller.current().is_halted());

        harness.monitor.cycle().await;
        assert!(harness.controller.current().is_halted());
        assert!(
            harness
                .controller
                .halt_reason()
                .unwrap()
                .contains("3 consecutive monitor failures")
        );
    }

    #[tokio::test]
    async fn test_clean_cycle_resets_the_failure_counter() {
        let harness = make_harness(ScriptedBroker::with_equity(dec!(100_000)), fast_config());

        harness.broker.fail_fetches.store(true, Ordering::SeqCst);
        harness.monitor.cycle().await;
        harness.monitor.cycle().await;

        harness.broker.fail_fetches.store(false, Ordering::SeqCst);
        harness.monitor.cycle().await;

        harness.broker.fail_fetches.store(true, Ordering::SeqCst);
        harness.monitor.cycle().await;
        harness.monitor.cycle().await;

        // Never three in a row.
        assert!(!harness.controller.current().is_halted());
    }

    #[tokio::test]
    async fn test_soft_breach_alerts_without_halting() {
        let harness = make_harness(ScriptedBroker::with_equity(dec!(100_000)), fast_config());
        harness
            .broker
            .set_positions(vec![position("AAPL", dec!(15_000))]);

        harness.monitor.cycle().await;

        assert!(!harness.controller.current().is_halted());
        let alerts: Vec<String> = harness
            .journal
            .records()
            .iter()
            .filter_map(|r| match r {
                JournalRecord::Alert { message, .. } => Some(message.clone()),
                _ => None,
            })
            .collect();
        // 15% in one name trips the weight cap, and a one-name book is
        // maximally concentrated.
        assert!(alerts.iter().any(|m| m.contains("MAX_POSITION_WEIGHT")));
        assert!(alerts.iter().any(|m| m.contains("MAX_CONCENTRATION")));
        assert!(harness.notifier.events().is_empty());
    }

    #[tokio::test]
    async fn test_emergency_stop_is_idempotent() {
        let harness = make_harness(ScriptedBroker::with_equity(dec!(100_000)), fast_config());

        harness.monitor.emergency_stop("first stop").await;
        harness.monitor.emergency_stop("second stop").await;

        assert_eq!(harness.controller.halt_reason().unwrap(), "first stop");
        assert_eq!(harness.notifier.events().len(), 1);
    }

    #[tokio::test]
    async fn test_halted_engine_skips_the_cycle() {
        let harness = make_harness(ScriptedBroker::with_equity(dec!(100_000)), fast_config());
        harness.controller.force_halt("manual stop");

        harness.monitor.cycle().await;

        assert_eq!(harness.broker.account_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_run_loop_cycles_until_shutdown() {
        let harness = Arc::new(make_harness(
            ScriptedBroker::with_equity(dec!(100_000)),
            fast_config(),
        ));
        let shutdown = CancellationToken::new();

        let monitor = harness.clone();
        let token = shutdown.clone();
        let handle = tokio::spawn(async move { monitor.monitor.run(token).await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.cancel();
        handle.await.unwrap();

        // The first interval tick fires immediately.
        assert!(harness.broker.account_calls.load(Ordering::SeqCst) >= 1);
    }
}
