//! Dislocation-from-mean capability.

use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::json;

use crate::config::AnalystsConfig;
use crate::marketdata::MarketData;
use crate::models::{Signal, Stance};
use crate::pipeline::RunContext;

use super::{Analyst, AnalystError};

/// Fades prices stretched away from their window mean.
///
/// Dispersion is the mean absolute deviation over the window. When the
/// last price sits more than `reversion_entry_ratio` dispersions from
/// the mean, the capability bets on a snap back toward it and carries
/// the mean as the price target.
pub struct MeanReversionAnalyst {
    data: Arc<dyn MarketData>,
    lookback: usize,
    entry_ratio: Decimal,
}

impl MeanReversionAnalyst {
    /// Capability over the shared data source.
    #[must_use]
    pub fn new(data: Arc<dyn MarketData>, config: &AnalystsConfig) -> Self {
        Self {
            data,
            lookback: config.lookback,
            entry_ratio: config.reversion_entry_ratio,
        }
    }
}

#[async_trait]
impl Analyst for MeanReversionAnalyst {
    fn name(&self) -> &'static str {
        "mean_reversion"
    }

    async fn evaluate(
        &self,
        _ctx: &RunContext,
        instrument: &str,
    ) -> Result<Option<Signal>, AnalystError> {
        let bars = self.data.history(instrument, self.lookback).await?;
        let Some(last) = bars.last().copied() else {
            return Ok(None);
        };

        let count = Decimal::from(bars.len());
        let mean = bars.iter().copied().sum::<Decimal>() / count;
        let dispersion = bars.iter().map(|bar| (*bar - mean).abs()).sum::<Decimal>() / count;

        if dispersion.is_zero() {
            // A flat window has nothing to revert.
            return Ok(Some(
                Signal::new(
                    instrument,
                    self.name(),
                    Stance::Neutral,
                    dec!(0.5),
                    format!("window flat at {mean}, no dislocation"),
                )
                .with_metrics(json!({"mean": mean, "dispersion": dispersion})),
            ));
        }

        let deviation = last - mean;
        let ratio = deviation.abs() / dispersion;
        let metrics = json!({
            "mean": mean,
            "dispersion": dispersion,
            "deviation_ratio": ratio,
        });

        let signal = if ratio >= self.entry_ratio {
            let stance = if deviation > Decimal::ZERO {
                Stance::Bearish
            } else {
                Stance::Bullish
            };
            let confidence = (ratio / (Decimal::TWO * self.entry_ratio)).min(Decimal::ONE);
            let mut signal = Signal::new(
                instrument,
                self.name(),
                stance,
                confidence,
                format!("last {last} sits {ratio} dispersions from the {mean} mean"),
            );
            signal.price_target = Some(mean);
            signal
        } else {
            let confidence =
                ((Decimal::ONE - ratio / self.entry_ratio) * dec!(0.5)).max(Decimal::ZERO);
            Signal::new(
                instrument,
                self.name(),
                Stance::Neutral,
                confidence,
                format!("last {last} within {ratio} dispersions of the {mean} mean"),
            )
        };

        Ok(Some(signal.with_metrics(metrics)))
    }
}
