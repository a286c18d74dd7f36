//! Order execution with an idempotency ledger and transient retry.
//!
//! Every decision gets at most one submission lifecycle. The executor
//! claims the decision ID in an in-memory ledger seeded from the
//! journal, so a decision stays spent across restarts; after that it
//! journals intent (`OrderPlaced`), drives the retry loop, and journals
//! the outcome (`OrderUpdated`). Broker answers (rejections) are
//! terminal immediately; broker outages retry on the configured
//! backoff until the attempt budget runs out.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use rust_decimal::Decimal;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::broker::{BackoffSchedule, BrokerAdapter, BrokerError, RetryPolicy};
use crate::journal::{Journal, JournalError, JournalRecord};
use crate::models::{Decision, Order, OrderAck, OrderRequest, OrderSide, OrderStatus, TradeAction};

/// Execution-path failures that propagate to the caller.
///
/// Broker failures never appear here; they become a terminal order
/// state instead.
#[derive(Debug, Error)]
pub enum ExecError {
    /// The decision already reached the execution path once.
    #[error("decision '{decision_id}' was already executed")]
    DuplicateDecision {
        /// Offending decision.
        decision_id: String,
    },

    /// Journal write failed; execution cannot proceed unrecorded.
    #[error(transparent)]
    Journal(#[from] JournalError),
}

/// Submits orders for decisions, exactly once per decision ID.
pub struct OrderExecutor<B: BrokerAdapter> {
    broker: Arc<B>,
    policy: RetryPolicy,
    journal: Arc<dyn Journal>,
    shutdown: CancellationToken,
    executed: Mutex<HashSet<String>>,
    active: Mutex<HashMap<String, Order>>,
}

impl<B: BrokerAdapter> OrderExecutor<B> {
    /// Executor with its ledger seeded from the journal.
    ///
    /// # Errors
    ///
    /// Returns a [`JournalError`] if the journal cannot be read.
    pub fn new(
        broker: Arc<B>,
        policy: RetryPolicy,
        journal: Arc<dyn Journal>,
        shutdown: CancellationToken,
    ) -> Result<Self, JournalError> {
        let executed: HashSet<String> = journal.executed_decision_ids()?.into_iter().collect();
        if !executed.is_empty() {
            tracing::info!(
                count = executed.len(),
                "Seeded decision ledger from journal"
            );
        }
        Ok(Self {
            broker,
            policy,
            journal,
            shutdown,
            executed: Mutex::new(executed),
            active: Mutex::new(HashMap::new()),
        })
    }

    /// Submit the order for a decision and drive it to a terminal or
    /// acknowledged state.
    ///
    /// # Errors
    ///
    /// [`ExecError::DuplicateDecision`] if this decision ID was ever
    /// executed before (this process or a previous one), and journal
    /// failures. A broker failure is not an error here: the returned
    /// order carries it as `Rejected` or `Failed`.
    pub async fn execute(&self, decision: &Decision) -> Result<Order, ExecError> {
        self.claim(&decision.decision_id)?;

        let side = match decision.action {
            TradeAction::Buy => OrderSide::Buy,
            // Holds never reach the executor; the gate filters them.
            TradeAction::Sell | TradeAction::Hold => OrderSide::Sell,
        };
        let now = Utc::now();
        let mut order = Order {
            order_id: Uuid::new_v4().to_string(),
            decision_id: decision.decision_id.clone(),
            run_id: decision.run_id.clone(),
            instrument: decision.instrument.clone(),
            side,
            quantity: decision.quantity,
            status: OrderStatus::Pending,
            broker_order_id: None,
            filled_quantity: Decimal::ZERO,
            avg_fill_price: None,
            retry_count: 0,
            status_message: String::new(),
            submitted_at: now,
            updated_at: now,
        };

        // Intent is journaled before the first submission. If that
        // write fails nothing was sent, so the claim is released.
        if let Err(err) = self.journal.append(&JournalRecord::OrderPlaced {
            order: order.clone(),
            recorded_at: Utc::now(),
        }) {
            self.release(&decision.decision_id);
            return Err(err.into());
        }

        let request = OrderRequest {
            decision_id: decision.decision_id.clone(),
            instrument: decision.instrument.clone(),
            side,
            quantity: decision.quantity,
            reference_price: decision.reference_price,
            price_target: decision.price_target,
            stop_loss: decision.stop_loss,
        };

        let mut schedule = BackoffSchedule::new(self.policy);
        loop {
            match self.broker.submit_order(&request).await {
                Ok(ack) => {
                    order.retry_count = schedule.retries_issued();
                    self.apply_ack(&mut order, &ack)?;
                    return Ok(order);
                }
                Err(err) if err.is_transient() => {
                    let Some(backoff) = schedule.next_backoff() else {
                        order.retry_count = schedule.retries_issued();
                        self.finish(
                            &mut order,
                            OrderStatus::Failed,
                            format!("retries exhausted: {err}"),
                        )?;
                        return Ok(order);
                    };
                    // A server-suggested wait overrides our own schedule.
                    let wait = if let BrokerError::RateLimited {
                        retry_after: Some(after),
                    } = &err
                    {
                        *after
                    } else {
                        backoff
                    };
                    tracing::warn!(
                        order_id = %order.order_id,
                        instrument = %order.instrument,
                        error = %err,
                        wait_ms = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX),
                        "Transient broker failure, retrying"
                    );
                    tokio::select! {
                        () = self.shutdown.cancelled() => {
                            order.retry_count = schedule.retries_issued();
                            self.finish(
                                &mut order,
                                OrderStatus::Failed,
                                "submission abandoned at shutdown".to_string(),
                            )?;
                            return Ok(order);
                        }
                        () = tokio::time::sleep(wait) => {}
                    }
                }
                Err(err) => {
                    order.retry_count = schedule.retries_issued();
                    let status = match err {
                        BrokerError::Rejected { .. } | BrokerError::InvalidOrder { .. } => {
                            OrderStatus::Rejected
                        }
                        _ => OrderStatus::Failed,
                    };
                    self.finish(&mut order, status, err.to_string())?;
                    return Ok(order);
                }
            }
        }
    }

    /// Best-effort cancellation of everything still active at the
    /// broker. Used by the emergency stop; failures are logged and
    /// dropped because there is nothing better to do with them there.
    pub async fn cancel_active_orders(&self) -> usize {
        let orders: Vec<Order> = {
            let mut active = self.lock_active();
            active.drain().map(|(_, order)| order).collect()
        };

        let mut canceled = 0;
        for mut order in orders {
            let Some(broker_order_id) = order.broker_order_id.clone() else {
                continue;
            };
            match self.broker.cancel_order(&broker_order_id).await {
                Ok(()) => {
                    order.status = OrderStatus::Canceled;
                    order.status_message = "canceled by emergency stop".to_string();
                    order.updated_at = Utc::now();
                    if let Err(error) = self.journal.append(&JournalRecord::OrderUpdated {
                        order: order.clone(),
                        recorded_at: Utc::now(),
                    }) {
                        tracing::error!(%error, order_id = %order.order_id, "Failed to journal cancellation");
                    }
                    canceled += 1;
                }
                Err(error) => {
                    tracing::error!(
                        %error,
                        order_id = %order.order_id,
                        broker_order_id = %broker_order_id,
                        "Cancel failed during emergency stop"
                    );
                }
            }
        }
        if canceled > 0 {
            tracing::warn!(canceled, "Active orders canceled");
        }
        canceled
    }

    /// Orders acknowledged by the broker but not yet terminal.
    #[must_use]
    pub fn active_order_count(&self) -> usize {
        self.lock_active().len()
    }

    fn claim(&self, decision_id: &str) -> Result<(), ExecError> {
        let mut executed = self.executed.lock().unwrap_or_else(PoisonError::into_inner);
        if !executed.insert(decision_id.to_string()) {
            return Err(ExecError::DuplicateDecision {
                decision_id: decision_id.to_string(),
            });
        }
        Ok(())
    }

    fn release(&self, decision_id: &str) {
        self.executed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(decision_id);
    }

    fn lock_active(&self) -> MutexGuard<'_, HashMap<String, Order>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn apply_ack(&self, order: &mut Order, ack: &OrderAck) -> Result<(), ExecError> {
        order.broker_order_id = Some(ack.broker_order_id.clone());
        order.status = ack.status;
        order.filled_quantity = ack.filled_quantity;
        order.avg_fill_price = ack.avg_fill_price;
        order.updated_at = Utc::now();
        self.journal.append(&JournalRecord::OrderUpdated {
            order: order.clone(),
            recorded_at: Utc::now(),
        })?;
        if order.status.is_active() {
            self.lock_active()
                .insert(order.order_id.clone(), order.clone());
        }
        tracing::info!(
            order_id = %order.order_id,
            broker_order_id = %ack.broker_order_id,
            status = ?order.status,
            filled = %order.filled_quantity,
            retries = order.retry_count,
            "Order acknowledged"
        );
        Ok(())
    }

    fn finish(
        &self,
        order: &mut Order,
        status: OrderStatus,
        message: String,
    ) -> Result<(), ExecError> {
        order.status = status;
        order.status_message = message;
        order.updated_at = Utc::now();
        self.journal.append(&JournalRecord::OrderUpdated {
            order: order.clone(),
            recorded_at: Utc::now(),
        })?;
        tracing::error!(
            order_id = %order.order_id,
            instrument = %order.instrument,
            status = ?order.status,
            message = %order.status_message,
            retries = order.retry_count,
            "Order reached a terminal failure"
        );
        Ok(())
    }
}
