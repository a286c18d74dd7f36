//! Volatility-regime capability.

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

/// Classifies the window by realized volatility.
///
/// Volatility is the mean absolute bar-over-bar return. A calm regime
/// reads as supportive (bullish), a stressed one as hostile (bearish);
/// between the two thresholds the capability stays neutral, least sure
/// of itself in the middle of the transition band.
pub struct RegimeAnalyst {
    data: Arc<dyn MarketData>,
    lookback: usize,
    calm: Decimal,
    stressed: Decimal,
}

impl RegimeAnalyst {
    /// Capability over the shared data source.
    #[must_use]
    pub fn new(data: Arc<dyn MarketData>, config: &AnalystsConfig) -> Self {
        Self {
            data,
            lookback: config.lookback,
            calm: config.calm_volatility,
            stressed: config.stressed_volatility,
        }
    }
}

#[async_trait]
impl Analyst for RegimeAnalyst {
    fn name(&self) -> &'static str {
        "regime"
    }

    async fn evaluate(
        &self,
        _ctx: &RunContext,
        instrument: &str,
    ) -> Result<Option<Signal>, AnalystError> {
        let bars = self.data.history(instrument, self.lookback).await?;
        if bars.len() < 2 {
            return Ok(None);
        }

        let mut total = Decimal::ZERO;
        for window in bars.windows(2) {
            let (prev, next) = (window[0], window[1]);
            if prev.is_zero() {
                return Err(AnalystError::Evaluation(format!(
                    "zero price inside the window for '{instrument}'"
                )));
            }
            total += (next / prev - Decimal::ONE).abs();
        }
        let volatility = total / Decimal::from(bars.len() - 1);

        let (stance, confidence, rationale) = if volatility <= self.calm {
            (
                Stance::Bullish,
                Decimal::ONE - dec!(0.5) * (volatility / self.calm),
                format!("realized volatility {volatility} under the calm threshold {}", self.calm),
            )
        } else if volatility >= self.stressed {
            let overshoot = ((volatility - self.stressed) / self.stressed).min(Decimal::ONE);
            (
                Stance::Bearish,
                dec!(0.5) + dec!(0.5) * overshoot,
                format!(
                    "realized volatility {volatility} over the stressed threshold {}",
                    self.stressed
                ),
            )
        } else {
            // Least confident mid-transition, where the regime is genuinely
            // ambiguous.
            let t = (volatility - self.calm) / (self.stressed - self.calm);
            let confidence = dec!(0.5) * (Decimal::ONE - (Decimal::TWO * t - Decimal::ONE).abs());
            (
                Stance::Neutral,
                confidence,
                format!(
                    "realized volatility {volatility} between the {} and {} thresholds",
                    self.calm, self.stressed
                ),
            )
        };

        Ok(Some(
            Signal::new(instrument, self.name(), stance, confidence, rationale).with_metrics(
                json!({
                    "volatility": volatility,
                    "calm_threshold": self.calm,
                    "stressed_threshold": self.stressed,
                }),
            ),
        ))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use crate::marketdata::StaticMarketData;

    use super::*;

    fn analyst_over(series: Vec<Decimal>) -> RegimeAnalyst {
        let config = AnalystsConfig {
            lookback: series.len(),
            ..AnalystsConfig::default()
        };
        let data = StaticMarketData::with_series(HashMap::from([("AAPL".to_string(), series)]));
        RegimeAnalyst::new(Arc::new(data), &config)
    }

    fn ctx() -> RunContext {
        RunContext::new(vec!["AAPL".to_string()])
    }

    #[tokio::test]
    async fn test_calm_window_is_bullish() {
        // Each bar up 0.1%: volatility 0.001 against a 0.008 calm line.
        let series = vec![dec!(100), dec!(100.1), dec!(100.2001), dec!(100.3003001)];
        let signal = analyst_over(series)
            .evaluate(&ctx(), "AAPL")
            .await
            .unwrap()
            .unwrap();

        assert_eq!(signal.stance, Stance::Bullish);
        assert_eq!(signal.confidence, dec!(0.9375));
    }

    #[tokio::test]
    async fn test_stressed_window_is_bearish() {
        // 3% swings against a 2% stressed line: overshoot 0.5.
        let series = vec![dec!(100), dec!(103), dec!(99.91)];
        let signal = analyst_over(series)
            .evaluate(&ctx(), "AAPL")
            .await
            .unwrap()
            .unwrap();

        assert_eq!(signal.stance, Stance::Bearish);
        assert_eq!(signal.confidence, dec!(0.75));
    }

    #[tokio::test]
    async fn test_transition_band_is_neutral() {
        // Volatility 0.014 sits exactly mid-band between 0.008 and 0.02.
        let series = vec![dec!(100), dec!(101.4)];
        let signal = analyst_over(series)
            .evaluate(&ctx(), "AAPL")
            .await
            .unwrap()
            .unwrap();

        assert_eq!(signal.stance, Stance::Neutral);
        assert_eq!(signal.confidence, dec!(0.5));
    }

    #[tokio::test]
    async fn test_zero_price_is_an_evaluation_failure() {
        let series = vec![dec!(0), dec!(100)];
        let err = analyst_over(series)
            .evaluate(&ctx(), "AAPL")
            .await
            .unwrap_err();
        assert!(matches!(err, AnalystError::Evaluation(_)));
    }
}
