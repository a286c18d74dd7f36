//! Broker selection and credentials.

use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Trading environment (paper or live).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Environment {
    /// Paper trading account (fake money).
    Paper,
    /// Live trading account (real money).
    Live,
}

impl Environment {
    /// Returns true when trading with real money.
    #[must_use]
    pub const fn is_live(&self) -> bool {
        matches!(self, Self::Live)
    }

    /// Alpaca trading API base URL for this environment.
    #[must_use]
    pub const fn alpaca_base_url(&self) -> &'static str {
        match self {
            Self::Paper => "https://paper-api.alpaca.markets",
            Self::Live => "https://api.alpaca.markets",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Paper => write!(f, "PAPER"),
            Self::Live => write!(f, "LIVE"),
        }
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "PAPER" => Ok(Self::Paper),
            "LIVE" => Ok(Self::Live),
            other => Err(format!("unknown environment: {other}")),
        }
    }
}

/// Which broker adapter the engine binds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BrokerKind {
    /// In-process simulated account.
    Paper,
    /// Alpaca REST adapter.
    Alpaca,
}

/// Broker adapter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Adapter to bind.
    #[serde(default = "default_kind")]
    pub kind: BrokerKind,
    /// Paper or live endpoints for REST brokers.
    #[serde(default = "default_environment")]
    pub environment: Environment,
    /// API key, typically `${ALPACA_API_KEY}`.
    #[serde(default)]
    pub api_key: String,
    /// API secret, typically `${ALPACA_API_SECRET}`.
    #[serde(default)]
    pub api_secret: String,
    /// Override for the REST base URL (tests, proxies).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Starting cash for the in-process paper account.
    #[serde(default = "default_starting_cash")]
    pub starting_cash: Decimal,
}

impl BrokerConfig {
    /// REST base URL: the configured override, or the environment default.
    #[must_use]
    pub fn resolved_base_url(&self) -> String {
        self.base_url
            .clone()
            .unwrap_or_else(|| self.environment.alpaca_base_url().to_string())
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            kind: default_kind(),
            environment: default_environment(),
            api_key: String::new(),
            api_secret: String::new(),
            base_url: None,
            starting_cash: default_starting_cash(),
        }
    }
}

const fn default_kind() -> BrokerKind {
    BrokerKind::Paper
}

const fn default_environment() -> Environment {
    Environment::Paper
}

const fn default_starting_cash() -> Decimal {
    Decimal::from_parts(100_000, 0, 0, false, 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_parse_and_display() {
        assert_eq!("paper".parse::<Environment>().unwrap(), Environment::Paper);
        assert_eq!("LIVE".parse::<Environment>().unwrap(), Environment::Live);
        assert!("staging".parse::<Environment>().is_err());
        assert_eq!(Environment::Paper.to_string(), "PAPER");
        assert_eq!(Environment::Live.to_string(), "LIVE");
    }

    #[test]
    fn test_environment_urls() {
        assert!(!Environment::Paper.is_live());
        assert!(Environment::Live.is_live());
        assert_eq!(
            Environment::Paper.alpaca_base_url(),
            "https://paper-api.alpaca.markets"
        );
        assert_eq!(
            Environment::Live.alpaca_base_url(),
            "https://api.alpaca.markets"
        );
    }

    #[test]
    fn test_base_url_override_wins() {
        let config = BrokerConfig {
            base_url: Some("http://localhost:9999".to_string()),
            ..Default::default()
        };
        assert_eq!(config.resolved_base_url(), "http://localhost:9999");

        let default_config = BrokerConfig::default();
        assert_eq!(
            default_config.resolved_base_url(),
            "https://paper-api.alpaca.markets"
        );
    }
}
