//! Analyst capabilities and the fan-out pool.
//!
//! Each capability gives an independent opinion on one instrument. The
//! pool fans every (capability, instrument) pair out with bounded
//! concurrency and a per-invocation timeout; a capability that fails or
//! times out degrades to a zero-confidence neutral placeholder instead
//! of taking the run down. Each capability also owns one write-once
//! namespace in the run context, recorded after the fan-out settles.

mod mean_reversion;
mod momentum;
mod regime;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{FutureExt, StreamExt, stream};
use serde_json::json;
use thiserror::Error;

use crate::config::{AnalystsConfig, ConfigError};
use crate::marketdata::{MarketData, MarketDataError};
use crate::models::Signal;
use crate::pipeline::RunContext;

pub use mean_reversion::MeanReversionAnalyst;
pub use momentum::MomentumAnalyst;
pub use regime::RegimeAnalyst;

/// Capability names accepted in `analysts.enabled`.
pub const KNOWN_ANALYSTS: &[&str] = &["momentum", "mean_reversion", "regime"];

/// True if `name` is a registered capability.
#[must_use]
pub fn is_known(name: &str) -> bool {
    KNOWN_ANALYSTS.contains(&name)
}

/// Analyst evaluation failures. Either way the pool degrades the
/// invocation to a neutral placeholder.
#[derive(Debug, Error)]
pub enum AnalystError {
    /// Price history was missing or too short.
    #[error(transparent)]
    MarketData(#[from] MarketDataError),

    /// The capability could not produce an opinion from the data it got.
    #[error("Evaluation failed: {0}")]
    Evaluation(String),
}

/// One opinion-producing capability.
///
/// `Ok(None)` means the capability deliberately has no view on this
/// instrument; that is not a failure and produces no placeholder.
#[async_trait]
pub trait Analyst: Send + Sync {
    /// Capability name; doubles as its run-context namespace.
    fn name(&self) -> &'static str;

    /// Evaluate one instrument within one run.
    async fn evaluate(
        &self,
        ctx: &RunContext,
        instrument: &str,
    ) -> Result<Option<Signal>, AnalystError>;
}

impl std::fmt::Debug for dyn Analyst {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Analyst").field("name", &self.name()).finish()
    }
}

/// Instantiates the enabled capabilities over a shared data source.
///
/// # Errors
///
/// Returns a [`ConfigError`] for capability names that are not
/// registered.
pub fn build_analysts(
    config: &AnalystsConfig,
    data: Arc<dyn MarketData>,
) -> Result<Vec<Arc<dyn Analyst>>, ConfigError> {
    let mut analysts: Vec<Arc<dyn Analyst>> = Vec::with_capacity(config.enabled.len());
    for name in &config.enabled {
        let analyst: Arc<dyn Analyst> = match name.as_str() {
            "momentum" => Arc::new(MomentumAnalyst::new(Arc::clone(&data), config)),
            "mean_reversion" => Arc::new(MeanReversionAnalyst::new(Arc::clone(&data), config)),
            "regime" => Arc::new(RegimeAnalyst::new(Arc::clone(&data), config)),
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "unknown analyst capability '{other}'"
                )));
            }
        };
        analysts.push(analyst);
    }
    Ok(analysts)
}

/// Fans capabilities out over a run's instruments.
pub struct AnalystPool {
    analysts: Vec<Arc<dyn Analyst>>,
    timeout: Duration,
    max_concurrent: usize,
}

impl AnalystPool {
    /// Pool over explicit capabilities.
    #[must_use]
    pub fn new(analysts: Vec<Arc<dyn Analyst>>, config: &AnalystsConfig) -> Self {
        Self {
            analysts,
            timeout: Duration::from_millis(config.timeout_ms),
            max_concurrent: config.max_concurrent,
        }
    }

    /// Pool over the configured capabilities.
    ///
    /// # Errors
    ///
    /// Propagates [`build_analysts`] failures.
    pub fn from_config(
        config: &AnalystsConfig,
        data: Arc<dyn MarketData>,
    ) -> Result<Self, ConfigError> {
        Ok(Self::new(build_analysts(config, data)?, config))
    }

    /// Registered capability names.
    #[must_use]
    pub fn analyst_names(&self) -> Vec<&'static str> {
        self.analysts.iter().map(|a| a.name()).collect()
    }

    /// Evaluate every capability against every instrument in the run.
    ///
    /// Returns the collected signals plus the number of invocations
    /// that degraded (error or timeout). Signals arrive in completion
    /// order; aggregation downstream is order-independent.
    pub async fn fan_out(&self, ctx: &RunContext) -> (Vec<Signal>, u32) {
        let mut jobs = Vec::with_capacity(self.analysts.len() * ctx.instruments().len());
        for analyst in &self.analysts {
            for instrument in ctx.instruments() {
                jobs.push((Arc::clone(analyst), instrument.clone()));
            }
        }

        let timeout = self.timeout;
        let results: Vec<_> = stream::iter(jobs)
            .map(|(analyst, instrument)| async move {
                let name = analyst.name();
                let outcome =
                    tokio::time::timeout(timeout, analyst.evaluate(ctx, &instrument)).await;
                (name, instrument, outcome)
            })
            .buffer_unordered(self.max_concurrent)
            .collect::<Vec<_>>()
            .boxed()
            .await;

        let mut signals = Vec::new();
        let mut failures: u32 = 0;
        let mut per_analyst: BTreeMap<&'static str, BTreeMap<String, serde_json::Value>> =
            BTreeMap::new();

        for (name, instrument, outcome) in results {
            match outcome {
                Ok(Ok(Some(signal))) => {
                    per_analyst.entry(name).or_default().insert(
                        signal.instrument.clone(),
                        json!({
                            "stance": signal.stance,
                            "confidence": signal.confidence,
                        }),
                    );
                    signals.push(signal);
                }
                Ok(Ok(None)) => {
                    tracing::debug!(analyst = name, %instrument, "Analyst declined to opine");
                }
                Ok(Err(error)) => {
                    failures += 1;
                    tracing::warn!(analyst = name, %instrument, %error, "Analyst degraded");
                    signals.push(Signal::neutral(
                        &instrument,
                        name,
                        format!("analyst error: {error}"),
                    ));
                }
                Err(_elapsed) => {
                    failures += 1;
                    tracing::warn!(
                        analyst = name,
                        %instrument,
                        timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                        "Analyst timed out"
                    );
                    signals.push(Signal::neutral(
                        &instrument,
                        name,
                        format!("timed out after {}ms", timeout.as_millis()),
                    ));
                }
            }
        }

        // One write per capability namespace, after the dust settles.
        for (name, opinions) in per_analyst {
            if let Err(error) = ctx.record(name, json!(opinions)) {
                tracing::warn!(analyst = name, %error, "Namespace record refused");
            }
        }

        ctx.log(
            "analysts",
            format!(
                "{} signals from {} capabilities, {} degraded",
                signals.len(),
                self.analysts.len(),
                failures
            ),
        );
        (signals, failures)
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    use crate::models::Stance;

    use super::*;

    struct StubAnalyst;

    #[async_trait]
    impl Analyst for StubAnalyst {
        fn name(&self) -> &'static str {
            "stub"
        }

        async fn evaluate(
            &self,
            _ctx: &RunContext,
            instrument: &str,
        ) -> Result<Option<Signal>, AnalystError> {
            if instrument == "MSFT" {
                return Ok(None);
            }
            Ok(Some(Signal::new(
                instrument,
                "stub",
                Stance::Bullish,
                dec!(0.9),
                "stubbed",
            )))
        }
    }

    struct FailingAnalyst;

    #[async_trait]
    impl Analyst for FailingAnalyst {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn evaluate(
            &self,
            _ctx: &RunContext,
            _instrument: &str,
        ) -> Result<Option<Signal>, AnalystError> {
            Err(AnalystError::Evaluation("model exploded".to_string()))
        }
    }

    struct SlowAnalyst;

    #[async_trait]
    impl Analyst for SlowAnalyst {
        fn name(&self) -> &'static str {
            "slow"
        }

        async fn evaluate(
            &self,
            _ctx: &RunContext,
            instrument: &str,
        ) -> Result<Option<Signal>, AnalystError> {
            tokio::time::sleep(Duration::from_millis(250)).await;
            Ok(Some(Signal::new(
                instrument,
                "slow",
                Stance::Bearish,
                dec!(0.5),
                "too late",
            )))
        }
    }

    fn pool_config(timeout_ms: u64) -> AnalystsConfig {
        AnalystsConfig {
            timeout_ms,
            ..AnalystsConfig::default()
        }
    }

    #[test]
    fn test_known_names() {
        assert!(is_known("momentum"));
        assert!(is_known("mean_reversion"));
        assert!(is_known("regime"));
        assert!(!is_known("oracle"));
    }

    #[test]
    fn test_build_rejects_unknown_capability() {
        let config = AnalystsConfig {
            enabled: vec!["momentum".to_string(), "oracle".to_string()],
            ..AnalystsConfig::default()
        };
        let data: Arc<dyn MarketData> =
            Arc::new(crate::marketdata::StaticMarketData::with_series(Default::default()));
        let err = build_analysts(&config, data).unwrap_err();
        assert!(err.to_string().contains("oracle"));
    }

    #[test]
    fn test_build_registers_enabled_capabilities() {
        let config = AnalystsConfig::default();
        let data: Arc<dyn MarketData> =
            Arc::new(crate::marketdata::StaticMarketData::with_series(Default::default()));
        let pool = AnalystPool::from_config(&config, data).unwrap();
        assert_eq!(
            pool.analyst_names(),
            vec!["momentum", "mean_reversion", "regime"]
        );
    }

    #[tokio::test]
    async fn test_fan_out_mixes_signals_and_degradations() {
        let pool = AnalystPool::new(
            vec![Arc::new(StubAnalyst), Arc::new(FailingAnalyst)],
            &pool_config(1_000),
        );
        let ctx = RunContext::new(vec!["AAPL".to_string(), "MSFT".to_string()]);

        let (signals, failures) = pool.fan_out(&ctx).await;

        // Stub opines on AAPL only; failing degrades on both.
        assert_eq!(signals.len(), 3);
        assert_eq!(failures, 2);

        let degraded: Vec<_> = signals
            .iter()
            .filter(|s| s.stance == Stance::Neutral && s.confidence == Decimal::ZERO)
            .collect();
        assert_eq!(degraded.len(), 2);
        assert!(degraded.iter().all(|s| s.analyst == "failing"));
        assert!(degraded.iter().all(|s| s.rationale.contains("model exploded")));
    }

    #[tokio::test]
    async fn test_timeout_degrades_to_neutral() {
        let pool = AnalystPool::new(vec![Arc::new(SlowAnalyst)], &pool_config(5));
        let ctx = RunContext::new(vec!["AAPL".to_string()]);

        let (signals, failures) = pool.fan_out(&ctx).await;

        assert_eq!(failures, 1);
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].stance, Stance::Neutral);
        assert_eq!(signals[0].confidence, Decimal::ZERO);
        assert!(signals[0].rationale.contains("timed out"));
    }

    #[tokio::test]
    async fn test_namespace_recorded_once_per_capability() {
        let pool = AnalystPool::new(
            vec![Arc::new(StubAnalyst), Arc::new(FailingAnalyst)],
            &pool_config(1_000),
        );
        let ctx = RunContext::new(vec!["AAPL".to_string(), "GOOG".to_string()]);

        pool.fan_out(&ctx).await;

        // Stub wrote both instruments under one namespace; the failing
        // capability produced nothing and claimed no namespace.
        assert_eq!(ctx.namespaces(), vec!["stub"]);
        let recorded = ctx.get("stub").unwrap();
        assert!(recorded.get("AAPL").is_some());
        assert!(recorded.get("GOOG").is_some());
    }
}
