//! Portfolio decision synthesis.
//!
//! Turns aggregated opinions plus risk verdicts into at most one
//! decision per instrument. Buying power is allocated greedily in
//! descending |score| order: high-conviction trades size first and
//! low-conviction trades are starved to holds when the budget runs
//! out. Sells never consume the budget; they are capped by the held
//! position instead, so a sell can never open a short.

use std::collections::HashMap;

use chrono::Utc;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::config::SynthesisConfig;
use crate::models::{Decision, LimitBreach, RiskVerdict, Stance, TradeAction};
use crate::risk::{PortfolioSnapshot, RiskEngine, TradeProposal};

use super::AggregateOpinion;

/// Builds final decisions from aggregated opinions.
#[derive(Debug, Clone)]
pub struct Synthesizer {
    config: SynthesisConfig,
}

impl Synthesizer {
    /// Synthesizer with the configured tie-break and budget policy.
    #[must_use]
    pub const fn new(config: SynthesisConfig) -> Self {
        Self { config }
    }

    /// Synthesizes one decision per opinion.
    ///
    /// Returned decisions are in allocation order (largest |score|
    /// first, ties broken by instrument name) so the journal reflects
    /// how buying power was handed out.
    #[must_use]
    pub fn synthesize(
        &self,
        run_id: &str,
        mut opinions: Vec<AggregateOpinion>,
        prices: &HashMap<String, Decimal>,
        snapshot: &PortfolioSnapshot,
        risk: &RiskEngine,
    ) -> Vec<Decision> {
        opinions.sort_by(|a, b| {
            b.score
                .abs()
                .cmp(&a.score.abs())
                .then_with(|| a.instrument.cmp(&b.instrument))
        });

        let mut remaining = snapshot.account.buying_power.max(Decimal::ZERO);
        let mut decisions = Vec::with_capacity(opinions.len());
        for opinion in opinions {
            let decision =
                self.synthesize_one(run_id, &opinion, prices, snapshot, risk, &mut remaining);
            tracing::info!(
                run_id,
                instrument = %decision.instrument,
                action = ?decision.action,
                quantity = %decision.quantity,
                verdict = ?decision.verdict,
                "Decision synthesized"
            );
            decisions.push(decision);
        }
        decisions
    }

    fn synthesize_one(
        &self,
        run_id: &str,
        opinion: &AggregateOpinion,
        prices: &HashMap<String, Decimal>,
        snapshot: &PortfolioSnapshot,
        risk: &RiskEngine,
        remaining: &mut Decimal,
    ) -> Decision {
        let score = opinion.score;
        if score.abs() <= self.config.score_epsilon {
            return hold(
                run_id,
                opinion,
                prices.get(&opinion.instrument).copied(),
                RiskVerdict::Allow,
                Vec::new(),
                opinion.confidence,
                format!(
                    "score {score} inside the ±{} neutral band",
                    self.config.score_epsilon
                ),
            );
        }

        let Some(price) = prices.get(&opinion.instrument).copied().filter(|p| *p > Decimal::ZERO)
        else {
            return hold(
                run_id,
                opinion,
                None,
                RiskVerdict::Allow,
                Vec::new(),
                opinion.confidence,
                "no reference price available".to_string(),
            );
        };

        let action = if score > Decimal::ZERO {
            TradeAction::Buy
        } else {
            TradeAction::Sell
        };

        // Budget is defined against the snapshot's buying power; the
        // running remainder only caps, it never grows the budget.
        let target_notional =
            score.abs() * self.config.trade_budget_fraction * snapshot.account.buying_power;
        let mut quantity = (target_notional / price).floor();

        if action == TradeAction::Sell {
            let held = snapshot.held_quantity(&opinion.instrument);
            if held <= Decimal::ZERO {
                return hold(
                    run_id,
                    opinion,
                    Some(price),
                    RiskVerdict::Allow,
                    Vec::new(),
                    opinion.confidence,
                    "sell signal without a held position; short entries are not taken".to_string(),
                );
            }
            quantity = quantity.min(held);
        }

        if quantity <= Decimal::ZERO {
            return hold(
                run_id,
                opinion,
                Some(price),
                RiskVerdict::Allow,
                Vec::new(),
                opinion.confidence,
                format!("target notional {target_notional} sizes below one share at {price}"),
            );
        }

        if action == TradeAction::Buy && quantity * price > *remaining {
            quantity = (*remaining / price).floor();
            if quantity <= Decimal::ZERO {
                return hold(
                    run_id,
                    opinion,
                    Some(price),
                    RiskVerdict::Allow,
                    Vec::new(),
                    opinion.confidence,
                    "buying power exhausted by higher-priority trades".to_string(),
                );
            }
        }

        let signed_notional = match action {
            TradeAction::Buy => quantity * price,
            TradeAction::Sell | TradeAction::Hold => -(quantity * price),
        };
        let assessment = risk.assess(
            snapshot,
            &TradeProposal {
                instrument: opinion.instrument.clone(),
                exposure_delta: signed_notional,
                confidence: opinion.confidence,
            },
        );

        match assessment.verdict {
            RiskVerdict::Block => {
                return hold(
                    run_id,
                    opinion,
                    Some(price),
                    RiskVerdict::Block,
                    assessment.breaches.clone(),
                    Decimal::ZERO,
                    format!("blocked by {}", breach_names(&assessment.breaches)),
                );
            }
            RiskVerdict::ScaleDown => {
                quantity = (quantity * risk.limits().scale_down_factor).floor();
                if quantity <= Decimal::ZERO {
                    return hold(
                        run_id,
                        opinion,
                        Some(price),
                        RiskVerdict::ScaleDown,
                        assessment.breaches.clone(),
                        opinion.confidence,
                        format!("scaled down to zero by {}", breach_names(&assessment.breaches)),
                    );
                }
            }
            RiskVerdict::Allow => {}
        }

        let notional = quantity * price;
        if action == TradeAction::Buy {
            *remaining -= notional;
        }

        let stance = match action {
            TradeAction::Buy => Stance::Bullish,
            TradeAction::Sell | TradeAction::Hold => Stance::Bearish,
        };
        let strongest = opinion.strongest(stance);

        let mut rationale = format!(
            "score {score} from {} signals sized {quantity} shares (~{notional})",
            opinion.signals.len()
        );
        if assessment.verdict == RiskVerdict::ScaleDown {
            rationale.push_str(&format!(
                "; scaled down by {}",
                breach_names(&assessment.breaches)
            ));
        }

        Decision {
            decision_id: Uuid::new_v4().to_string(),
            run_id: run_id.to_string(),
            instrument: opinion.instrument.clone(),
            action,
            quantity,
            notional,
            confidence: opinion.confidence,
            score,
            reference_price: Some(price),
            price_target: strongest.and_then(|s| s.price_target),
            stop_loss: strongest.and_then(|s| s.stop_loss),
            signals: opinion.summaries(),
            verdict: assessment.verdict,
            breaches: assessment.breaches,
            rationale,
            created_at: Utc::now(),
        }
    }
}

fn breach_names(breaches: &[LimitBreach]) -> String {
    breaches
        .iter()
        .map(|b| b.limit.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

fn hold(
    run_id: &str,
    opinion: &AggregateOpinion,
    reference_price: Option<Decimal>,
    verdict: RiskVerdict,
    breaches: Vec<LimitBreach>,
    confidence: Decimal,
    rationale: String,
) -> Decision {
    Decision {
        decision_id: Uuid::new_v4().to_string(),
        run_id: run_id.to_string(),
        instrument: opinion.instrument.clone(),
        action: TradeAction::Hold,
        quantity: Decimal::ZERO,
        notional: Decimal::ZERO,
        confidence,
        score: opinion.score,
        reference_price,
        price_target: None,
        stop_loss: None,
        signals: opinion.summaries(),
        verdict,
        breaches,
        rationale,
        created_at: Utc::now(),
    }
}
