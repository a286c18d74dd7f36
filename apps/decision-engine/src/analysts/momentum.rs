//! Trailing-return momentum capability.

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

/// Rides the trailing return over the lookback window.
///
/// A move past the entry threshold in either direction is a directional
/// signal whose confidence saturates at twice the threshold; anything
/// inside the band is a neutral opinion that weakens as the move
/// approaches the threshold.
pub struct MomentumAnalyst {
    data: Arc<dyn MarketData>,
    lookback: usize,
    entry_return: Decimal,
}

impl MomentumAnalyst {
    /// Capability over the shared data source.
    #[must_use]
    pub fn new(data: Arc<dyn MarketData>, config: &AnalystsConfig) -> Self {
        Self {
            data,
            lookback: config.lookback,
            entry_return: config.momentum_entry_return,
        }
    }
}

#[async_trait]
impl Analyst for MomentumAnalyst {
    fn name(&self) -> &'static str {
        "momentum"
    }

    async fn evaluate(
        &self,
        _ctx: &RunContext,
        instrument: &str,
    ) -> Result<Option<Signal>, AnalystError> {
        let bars = self.data.history(instrument, self.lookback).await?;
        let (Some(first), Some(last)) = (bars.first(), bars.last()) else {
            return Ok(None);
        };
        if first.is_zero() {
            return Err(AnalystError::Evaluation(format!(
                "zero price at the start of the window for '{instrument}'"
            )));
        }

        let trailing = last / first - Decimal::ONE;
        let (stance, confidence, rationale) = if trailing >= self.entry_return {
            (
                Stance::Bullish,
                (trailing / (Decimal::TWO * self.entry_return)).min(Decimal::ONE),
                format!(
                    "trailing return {trailing} over {} bars clears the {} entry",
                    self.lookback, self.entry_return
                ),
            )
        } else if trailing <= -self.entry_return {
            (
                Stance::Bearish,
                (trailing.abs() / (Decimal::TWO * self.entry_return)).min(Decimal::ONE),
                format!(
                    "trailing return {trailing} over {} bars clears the -{} entry",
                    self.lookback, self.entry_return
                ),
            )
        } else {
            // Conviction in "no trend" fades as the move nears the entry.
            (
                Stance::Neutral,
                ((Decimal::ONE - trailing.abs() / self.entry_return) * dec!(0.5))
                    .max(Decimal::ZERO),
                format!(
                    "trailing return {trailing} inside the ±{} band",
                    self.entry_return
                ),
            )
        };

        Ok(Some(
            Signal::new(instrument, self.name(), stance, confidence, rationale).with_metrics(
                json!({
                    "trailing_return": trailing,
                    "lookback": self.lookback,
                }),
            ),
        ))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use crate::marketdata::{MarketDataError, StaticMarketData};

    use super::*;

    fn analyst_over(series: Vec<Decimal>) -> MomentumAnalyst {
        let config = AnalystsConfig {
            lookback: series.len(),
            ..AnalystsConfig::default()
        };
        let data = StaticMarketData::with_series(HashMap::from([("AAPL".to_string(), series)]));
        MomentumAnalyst::new(Arc::new(data), &config)
    }

    fn ctx() -> RunContext {
        RunContext::new(vec!["AAPL".to_string()])
    }

    #[tokio::test]
    async fn test_rising_window_is_bullish() {
        let analyst = analyst_over(vec![dec!(100), dec!(101), dec!(102), dec!(103)]);
        let signal = analyst.evaluate(&ctx(), "AAPL").await.unwrap().unwrap();

        // 3% trailing return over a 2% entry: confidence 0.03 / 0.04.
        assert_eq!(signal.stance, Stance::Bullish);
        assert_eq!(signal.confidence, dec!(0.75));
        assert_eq!(signal.analyst, "momentum");
    }

    #[tokio::test]
    async fn test_falling_window_is_bearish() {
        let analyst = analyst_over(vec![dec!(100), dec!(99), dec!(98), dec!(97)]);
        let signal = analyst.evaluate(&ctx(), "AAPL").await.unwrap().unwrap();

        assert_eq!(signal.stance, Stance::Bearish);
        assert_eq!(signal.confidence, dec!(0.75));
    }

    #[tokio::test]
    async fn test_confidence_saturates_on_large_moves() {
        let analyst = analyst_over(vec![dec!(100), dec!(110)]);
        let signal = analyst.evaluate(&ctx(), "AAPL").await.unwrap().unwrap();

        assert_eq!(signal.stance, Stance::Bullish);
        assert_eq!(signal.confidence, Decimal::ONE);
    }

    #[tokio::test]
    async fn test_flat_window_is_neutral() {
        let analyst = analyst_over(vec![dec!(100), dec!(100.5)]);
        let signal = analyst.evaluate(&ctx(), "AAPL").await.unwrap().unwrap();

        // 0.5% move against a 2% entry: (1 - 0.25) * 0.5.
        assert_eq!(signal.stance, Stance::Neutral);
        assert_eq!(signal.confidence, dec!(0.375));
    }

    #[tokio::test]
    async fn test_short_history_propagates() {
        let config = AnalystsConfig::default(); // lookback 20
        let data = StaticMarketData::with_series(HashMap::from([(
            "AAPL".to_string(),
            vec![dec!(100), dec!(101)],
        )]));
        let analyst = MomentumAnalyst::new(Arc::new(data), &config);

        let err = analyst.evaluate(&ctx(), "AAPL").await.unwrap_err();
        assert!(matches!(
            err,
            AnalystError::MarketData(MarketDataError::InsufficientHistory { .. })
        ));
    }

    #[tokio::test]
    async fn test_zero_base_price_is_an_evaluation_failure() {
        let analyst = analyst_over(vec![dec!(0), dec!(100)]);
        let err = analyst.evaluate(&ctx(), "AAPL").await.unwrap_err();
        assert!(matches!(err, AnalystError::Evaluation(_)));
    }
}
