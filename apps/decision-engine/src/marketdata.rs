//! Market data pull port.
//!
//! Analysts and the synthesizer read prices through [`MarketData`]; the
//! in-process [`StaticMarketData`] serves configured series. A live
//! feed integrates by implementing the same trait.

use std::collections::HashMap;

use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;

use crate::config::MarketDataConfig;

/// Market data failures.
#[derive(Debug, Error)]
pub enum MarketDataError {
    /// No series configured for the instrument.
    #[error("No market data for instrument '{0}'")]
    UnknownInstrument(String),

    /// Series exists but is shorter than the caller needs.
    #[error("Insufficient history for '{instrument}': need {needed}, have {available}")]
    InsufficientHistory {
        /// Instrument asked about.
        instrument: String,
        /// Bars requested.
        needed: usize,
        /// Bars available.
        available: usize,
    },
}

/// Read-only price access.
#[async_trait]
pub trait MarketData: Send + Sync {
    /// Last `bars` closes for the instrument, oldest first.
    async fn history(&self, instrument: &str, bars: usize) -> Result<Vec<Decimal>, MarketDataError>;

    /// Most recent close.
    async fn last_price(&self, instrument: &str) -> Result<Decimal, MarketDataError>;
}

/// Fixed series source backed by configuration.
#[derive(Debug, Default)]
pub struct StaticMarketData {
    series: HashMap<String, Vec<Decimal>>,
}

impl StaticMarketData {
    /// Source over the configured series.
    #[must_use]
    pub fn from_config(config: &MarketDataConfig) -> Self {
        Self {
            series: config.series.clone(),
        }
    }

    /// Source over explicit series (tests).
    #[must_use]
    pub fn with_series(series: HashMap<String, Vec<Decimal>>) -> Self {
        Self { series }
    }

    fn series_for(&self, instrument: &str) -> Result<&Vec<Decimal>, MarketDataError> {
        self.series
            .get(instrument)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| MarketDataError::UnknownInstrument(instrument.to_string()))
    }
}

#[async_trait]
impl MarketData for StaticMarketData {
    async fn history(&self, instrument: &str, bars: usize) -> Result<Vec<Decimal>, MarketDataError> {
        let series = self.series_for(instrument)?;
        if series.len() < bars {
            return Err(MarketDataError::InsufficientHistory {
                instrument: instrument.to_string(),
                needed: bars,
                available: series.len(),
            });
        }
        Ok(series[series.len() - bars..].to_vec())
    }

    async fn last_price(&self, instrument: &str) -> Result<Decimal, MarketDataError> {
        let series = self.series_for(instrument)?;
        // series_for rejects empty series
        Ok(*series.last().unwrap_or(&Decimal::ZERO))
    }
}
